//! リアクション実行スケジューラ
//!
//! 全コメントのリアクションを単一のFIFOチェーンで直列実行する。
//! 後から来たコメントの処理は、前のコメントのチェーンが完了・失敗・放棄の
//! いずれかで決着するまで開始されない。キャンセルは世代カウンタで行い、
//! 実行中タスクは各中断点で世代を照合して静かに離脱する。

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::chat::Comment;
use crate::llm::ReplyGenerator;
use crate::voice::playback::AudioOutput;
use crate::voice::SpeechSynthesizer;

use super::policy::{PolicyHandle, ReactionPolicy};
use super::text;

/// リアクションタスク（適格と判定されたコメント1件分）
#[derive(Debug)]
struct ReactionTask {
    comment: Comment,
    received_at_ms: i64,
    generation: u64,
}

/// コメントに反応すべきか
///
/// ポリシーはキュー投入時と実行直前の2回、別々のスナップショットで評価される。
pub fn should_react(
    comment: &Comment,
    received_at_ms: i64,
    session_start_ms: i64,
    policy: &ReactionPolicy,
) -> bool {
    if !policy.speech_enabled {
        return false;
    }

    // セッション開始前のコメント（過去ログ）は読み上げない
    let effective_ms = if comment.timestamp_ms > 0 {
        comment.timestamp_ms
    } else {
        received_at_ms
    };
    if effective_ms < session_start_ms {
        tracing::debug!("⏭️ 過去のコメントのためスキップ: {}", comment.id);
        return false;
    }

    if policy.blocked_authors.contains(&comment.author) {
        tracing::debug!("⏭️ ブロック済み投稿者のためスキップ: {}", comment.author);
        return false;
    }

    if text::contains_ng_word(&comment.raw_text(), &policy.ng_words) {
        tracing::debug!("⏭️ NGワードを含むためスキップ: {}", comment.id);
        return false;
    }

    true
}

struct Shared {
    generation: AtomicU64,
    cancel: watch::Sender<u64>,
    policy: PolicyHandle,
    session_start_ms: AtomicI64,
    responded: parking_lot::Mutex<HashSet<String>>,
    synthesizer: Arc<dyn SpeechSynthesizer>,
    llm: Arc<dyn ReplyGenerator>,
    audio: Arc<dyn AudioOutput>,
}

impl Shared {
    fn abandoned(&self, generation: u64) -> bool {
        self.generation.load(Ordering::Acquire) != generation
    }
}

/// リアクションスケジューラ
pub struct ReactionScheduler {
    queue: mpsc::UnboundedSender<ReactionTask>,
    shared: Arc<Shared>,
    _worker: JoinHandle<()>,
}

impl ReactionScheduler {
    /// スケジューラを作成し、単一のワーカーループを開始する
    pub fn new(
        policy: PolicyHandle,
        synthesizer: Arc<dyn SpeechSynthesizer>,
        llm: Arc<dyn ReplyGenerator>,
        audio: Arc<dyn AudioOutput>,
    ) -> Self {
        let (queue, receiver) = mpsc::unbounded_channel();
        let (cancel, _) = watch::channel(0u64);

        let shared = Arc::new(Shared {
            generation: AtomicU64::new(0),
            cancel,
            policy,
            session_start_ms: AtomicI64::new(chrono::Utc::now().timestamp_millis()),
            responded: parking_lot::Mutex::new(HashSet::new()),
            synthesizer,
            llm,
            audio,
        });

        let worker = tokio::spawn(run_worker(Arc::clone(&shared), receiver));

        Self {
            queue,
            shared,
            _worker: worker,
        }
    }

    /// コメントをリアクション対象として投入する（非ブロッキング）
    ///
    /// 適格性はここで一度評価し、実行直前にもう一度評価される。
    pub fn enqueue(&self, comment: Comment) {
        let received_at_ms = chrono::Utc::now().timestamp_millis();
        let policy = self.shared.policy.snapshot();
        let session_start = self.shared.session_start_ms.load(Ordering::Acquire);

        if !should_react(&comment, received_at_ms, session_start, &policy) {
            return;
        }

        let task = ReactionTask {
            comment,
            received_at_ms,
            generation: self.shared.generation.load(Ordering::Acquire),
        };

        // ワーカー終了後のsendエラーは無視（シャットダウン中）
        let _ = self.queue.send(task);
    }

    /// 実行中・待機中の全タスクを取り消す
    ///
    /// 世代カウンタを進めて全タスクを無効化し、実行中のネットワーク呼び出しを
    /// 中断して再生を止める。即座に戻り、いつ呼んでも安全。
    pub fn cancel_all(&self) {
        let next = self.shared.generation.fetch_add(1, Ordering::AcqRel) + 1;
        self.shared.cancel.send_replace(next);
        self.shared.audio.stop();
        tracing::info!("🚫 リアクションを全て取り消し (世代: {})", next);
    }

    /// セッションをリセットする（インジェスト再開時に使う）
    ///
    /// 全タスクの取り消しに加え、応答済みセットを空にしてセッション開始時刻を
    /// 現在に取り直す。
    pub fn reset(&self) {
        self.cancel_all();
        self.shared.responded.lock().clear();
        self.shared
            .session_start_ms
            .store(chrono::Utc::now().timestamp_millis(), Ordering::Release);
    }

    /// LLM応答を発行済みのコメント数（冪等性確認用）
    pub fn responded_count(&self) -> usize {
        self.shared.responded.lock().len()
    }
}

/// 単一ワーカーループ
///
/// 到着順にタスクを1件ずつ処理する。2件が並行して走ることはない。
async fn run_worker(shared: Arc<Shared>, mut receiver: mpsc::UnboundedReceiver<ReactionTask>) {
    tracing::debug!("🔁 リアクションワーカーを開始");

    while let Some(task) = receiver.recv().await {
        run_task(&shared, task).await;
    }

    tracing::debug!("🔁 リアクションワーカーを終了");
}

/// futureをキャンセル可能にして実行する
///
/// cancel_allが発火したらfutureをdropして中断する（reqwestの場合は
/// 接続ごと中断される）。Noneは「放棄された」ことを表す。
async fn cancellable<T>(
    cancel_rx: &mut watch::Receiver<u64>,
    fut: impl Future<Output = T>,
) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel_rx.changed() => None,
        result = fut => Some(result),
    }
}

/// 1タスク分の実行チェーン
///
/// ステップA: 読み上げ（合成 → 再生）。ステップB: トリガー一致時のLLM応答
/// （応答生成 → 合成 → 再生）。BはAの成否に関わらず、Aの決着後に実行する。
/// 各中断点で世代を照合し、不一致なら副作用なしで離脱する。
async fn run_task(shared: &Shared, task: ReactionTask) {
    let generation = task.generation;

    // この購読以降のキャンセルはchanged()で検出できる。
    // それ以前のキャンセルは直後の世代照合で検出する。
    let mut cancel_rx = shared.cancel.subscribe();
    cancel_rx.borrow_and_update();

    if shared.abandoned(generation) {
        return;
    }

    // 実行直前に最新のポリシーで再評価（キュー待ちの間に変わりうる）
    let policy = shared.policy.snapshot();
    let session_start = shared.session_start_ms.load(Ordering::Acquire);
    if !should_react(&task.comment, task.received_at_ms, session_start, &policy) {
        return;
    }

    // ステップA: コメント読み上げ
    if let Some(speaker) = policy.tts_speaker {
        let spoken = text::spoken_text(&task.comment, &policy);
        if text::is_speakable(&spoken) {
            match cancellable(&mut cancel_rx, shared.synthesizer.synthesize(&spoken, speaker))
                .await
            {
                None => return,
                Some(Err(e)) => {
                    tracing::warn!("⚠️ 音声合成に失敗: {}", e);
                }
                Some(Ok(wav)) => {
                    if shared.abandoned(generation) {
                        return;
                    }
                    match cancellable(&mut cancel_rx, shared.audio.play(wav)).await {
                        None => return,
                        Some(Err(e)) => tracing::warn!("⚠️ 再生に失敗: {}", e),
                        Some(Ok(())) => {}
                    }
                }
            }
        }
    }

    if shared.abandoned(generation) {
        return;
    }

    // ステップB: トリガーキーワードへのLLM応答
    let raw = task.comment.raw_text();
    if !text::contains_trigger(&raw, &policy.trigger_keywords) {
        return;
    }
    if !policy.llm_ready() {
        return;
    }

    // ネットワーク呼び出しの前にマークして最大1回を保証する
    if !shared.responded.lock().insert(task.comment.id.clone()) {
        tracing::debug!("⏭️ 応答済みコメントのためスキップ: {}", task.comment.id);
        return;
    }

    let api_key = policy.api_key.clone().unwrap_or_default();
    let display_name = policy.display_name(&task.comment.author);
    let prompt = format!("「{}」さんからのコメント: {}", display_name, raw);

    tracing::info!("🤖 LLM応答を生成: {}", task.comment.id);

    let reply = match cancellable(
        &mut cancel_rx,
        shared.llm.respond(&api_key, &prompt, &policy.persona),
    )
    .await
    {
        None => return,
        Some(Err(e)) => {
            tracing::warn!("⚠️ LLM呼び出しに失敗: {}", e);
            return;
        }
        Some(Ok(reply)) => reply,
    };

    if shared.abandoned(generation) {
        return;
    }

    let spoken_reply = text::spoken_reply(&reply, &policy);
    if !text::is_speakable(&spoken_reply) {
        return;
    }
    let Some(speaker) = policy.llm_speaker else {
        return;
    };

    let wav = match cancellable(
        &mut cancel_rx,
        shared.synthesizer.synthesize(&spoken_reply, speaker),
    )
    .await
    {
        None => return,
        Some(Err(e)) => {
            tracing::warn!("⚠️ 応答の音声合成に失敗: {}", e);
            return;
        }
        Some(Ok(wav)) => wav,
    };

    if shared.abandoned(generation) {
        return;
    }

    match cancellable(&mut cancel_rx, shared.audio.play(wav)).await {
        None => {}
        Some(Err(e)) => tracing::warn!("⚠️ 応答の再生に失敗: {}", e),
        Some(Ok(())) => {}
    }
}
