//! リアクションスケジューラの統合テスト
//!
//! 合成・LLM・再生を偽実装に差し替え、順序保証・キャンセル・冪等性を検証する。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use komochi::chat::{Comment, CommentPart};
use komochi::llm::{LlmError, ReplyGenerator};
use komochi::reaction::{PolicyHandle, ReactionPolicy, ReactionScheduler, Replacement};
use komochi::voice::playback::AudioOutput;
use komochi::voice::{SpeechSynthesizer, VoiceError};
use tokio::sync::Semaphore;

/// 呼び出しを記録する偽合成器（ゲート付き）
struct FakeSynth {
    calls: parking_lot::Mutex<Vec<(String, i32)>>,
    gate: Option<Arc<Semaphore>>,
}

impl FakeSynth {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: parking_lot::Mutex::new(Vec::new()),
            gate: None,
        })
    }

    /// 各合成呼び出しがセマフォの許可を1つ消費するまで完了しなくなる
    fn gated(gate: Arc<Semaphore>) -> Arc<Self> {
        Arc::new(Self {
            calls: parking_lot::Mutex::new(Vec::new()),
            gate: Some(gate),
        })
    }

    fn calls(&self) -> Vec<(String, i32)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl SpeechSynthesizer for FakeSynth {
    async fn synthesize(&self, text: &str, speaker: i32) -> Result<Vec<u8>, VoiceError> {
        self.calls.lock().push((text.to_string(), speaker));
        if let Some(gate) = &self.gate {
            let permit = gate.acquire().await.expect("gate closed");
            permit.forget();
        }
        Ok(vec![0u8; 4])
    }
}

/// 再生を記録する偽出力
#[derive(Default)]
struct FakeAudio {
    plays: parking_lot::Mutex<usize>,
    stops: parking_lot::Mutex<usize>,
}

#[async_trait]
impl AudioOutput for FakeAudio {
    async fn play(&self, _wav: Vec<u8>) -> Result<(), VoiceError> {
        *self.plays.lock() += 1;
        Ok(())
    }

    fn stop(&self) {
        *self.stops.lock() += 1;
    }
}

/// プロンプトを記録する偽LLM
#[derive(Default)]
struct FakeLlm {
    prompts: parking_lot::Mutex<Vec<String>>,
}

#[async_trait]
impl ReplyGenerator for FakeLlm {
    async fn respond(
        &self,
        _api_key: &str,
        prompt: &str,
        _persona: &str,
    ) -> Result<String, LlmError> {
        self.prompts.lock().push(prompt.to_string());
        Ok("おへんじです".to_string())
    }
}

fn comment(id: &str, author: &str, text: &str) -> Comment {
    Comment {
        id: id.to_string(),
        author: author.to_string(),
        text: text.to_string(),
        // セッション開始より未来のソース時刻
        timestamp_ms: chrono::Utc::now().timestamp_millis() + 1000,
        ..Default::default()
    }
}

fn base_policy() -> ReactionPolicy {
    ReactionPolicy {
        speech_enabled: true,
        tts_speaker: Some(1),
        ..Default::default()
    }
}

/// 条件が成立するまでポーリングする
async fn wait_until(mut f: impl FnMut() -> bool) {
    for _ in 0..300 {
        if f() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("条件が時間内に成立しなかった");
}

/// 副作用が発生しないことを確認するための猶予
async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[tokio::test]
async fn test_reactions_run_in_fifo_order() {
    let gate = Arc::new(Semaphore::new(0));
    let synth = FakeSynth::gated(Arc::clone(&gate));
    let audio = Arc::new(FakeAudio::default());
    let policy = PolicyHandle::new(base_policy());

    let scheduler = ReactionScheduler::new(
        policy,
        synth.clone(),
        Arc::new(FakeLlm::default()),
        audio.clone(),
    );

    scheduler.enqueue(comment("c1", "@a", "ひとつめ"));
    scheduler.enqueue(comment("c2", "@b", "ふたつめ"));

    // c1の合成が始まるまで待つ。c2はc1の決着まで始まらない。
    wait_until(|| synth.calls().len() == 1).await;
    settle().await;
    assert_eq!(synth.calls().len(), 1);
    assert_eq!(synth.calls()[0].0, "ひとつめ");

    gate.add_permits(1);
    wait_until(|| synth.calls().len() == 2).await;
    assert_eq!(synth.calls()[1].0, "ふたつめ");

    gate.add_permits(1);
    wait_until(|| *audio.plays.lock() == 2).await;
}

#[tokio::test]
async fn test_cancel_during_synthesis_suppresses_all_side_effects() {
    let gate = Arc::new(Semaphore::new(0));
    let synth = FakeSynth::gated(Arc::clone(&gate));
    let audio = Arc::new(FakeAudio::default());
    let llm = Arc::new(FakeLlm::default());

    let mut p = base_policy();
    p.trigger_keywords.push("komochi".to_string());
    p.api_key = Some("sk-test".to_string());
    p.llm_speaker = Some(3);
    let policy = PolicyHandle::new(p);

    let scheduler = ReactionScheduler::new(policy, synth.clone(), llm.clone(), audio.clone());

    scheduler.enqueue(comment("c1", "@a", "hey komochi"));
    wait_until(|| synth.calls().len() == 1).await;

    // 合成の待機中にキャンセル → 以降の副作用は一切発生しない
    scheduler.cancel_all();
    gate.add_permits(10);
    settle().await;

    assert_eq!(*audio.plays.lock(), 0);
    assert!(llm.prompts.lock().is_empty());
    // キャンセルは再生停止も行う
    assert!(*audio.stops.lock() >= 1);

    // キャンセル後の新しいコメントは通常どおり処理される
    scheduler.enqueue(comment("c2", "@b", "こんにちは"));
    wait_until(|| synth.calls().len() == 2).await;
}

#[tokio::test]
async fn test_trigger_fires_llm_exactly_once() {
    let synth = FakeSynth::new();
    let audio = Arc::new(FakeAudio::default());
    let llm = Arc::new(FakeLlm::default());

    let mut p = base_policy();
    p.tts_speaker = None; // 読み上げなしでもLLM応答は発火する
    p.trigger_keywords.push("komochi".to_string());
    p.api_key = Some("sk-test".to_string());
    p.llm_speaker = Some(3);
    p.author_aliases
        .insert("@bob".to_string(), "ボブ".to_string());
    let policy = PolicyHandle::new(p);

    let scheduler = ReactionScheduler::new(policy, synth.clone(), llm.clone(), audio.clone());

    let c = comment("c1", "@bob", "hey komochi");
    scheduler.enqueue(c.clone());
    wait_until(|| !llm.prompts.lock().is_empty()).await;

    // プロンプトには別名解決済みの表示名と生テキストが入る
    let prompt = llm.prompts.lock()[0].clone();
    assert!(prompt.contains("ボブ"));
    assert!(prompt.contains("hey komochi"));
    assert_eq!(scheduler.responded_count(), 1);

    // 応答は llm_speaker で合成され再生される
    wait_until(|| *audio.plays.lock() == 1).await;
    assert_eq!(synth.calls(), vec![("おへんじです".to_string(), 3)]);

    // 同一IDの再配送ではLLM呼び出しが増えない
    scheduler.enqueue(c.clone());
    scheduler.enqueue(c);
    settle().await;
    assert_eq!(llm.prompts.lock().len(), 1);
    assert_eq!(scheduler.responded_count(), 1);
}

#[tokio::test]
async fn test_ng_word_suppresses_synthesis() {
    let synth = FakeSynth::new();
    let llm = Arc::new(FakeLlm::default());

    let mut p = base_policy();
    p.ng_words.push("spam".to_string());
    p.trigger_keywords.push("spam".to_string());
    p.api_key = Some("sk-test".to_string());
    p.llm_speaker = Some(3);
    let policy = PolicyHandle::new(p);

    let scheduler = ReactionScheduler::new(
        policy,
        synth.clone(),
        llm.clone(),
        Arc::new(FakeAudio::default()),
    );

    scheduler.enqueue(comment("c1", "@a", "this is spam"));
    settle().await;

    // NGワードは読み上げもLLMも発火させない
    assert!(synth.calls().is_empty());
    assert!(llm.prompts.lock().is_empty());
    assert_eq!(scheduler.responded_count(), 0);
}

#[tokio::test]
async fn test_policy_change_while_queued_is_respected() {
    let gate = Arc::new(Semaphore::new(0));
    let synth = FakeSynth::gated(Arc::clone(&gate));
    let policy = PolicyHandle::new(base_policy());

    let scheduler = ReactionScheduler::new(
        policy.clone(),
        synth.clone(),
        Arc::new(FakeLlm::default()),
        Arc::new(FakeAudio::default()),
    );

    scheduler.enqueue(comment("c1", "@a", "ひとつめ"));
    scheduler.enqueue(comment("c2", "@a", "だめなやつ"));
    wait_until(|| synth.calls().len() == 1).await;

    // c2がキュー待ちの間にNGワードを追加 → 実行直前の再評価で弾かれる
    policy.update(|p| p.ng_words.push("だめ".to_string()));

    gate.add_permits(10);
    settle().await;
    assert_eq!(synth.calls().len(), 1);
}

#[tokio::test]
async fn test_replacement_pipeline_applies_to_spoken_text() {
    let synth = FakeSynth::new();
    let mut p = base_policy();
    p.replacements.push(Replacement {
        from: "w".to_string(),
        to: "わら".to_string(),
    });
    let policy = PolicyHandle::new(p);

    let scheduler = ReactionScheduler::new(
        policy,
        synth.clone(),
        Arc::new(FakeLlm::default()),
        Arc::new(FakeAudio::default()),
    );

    scheduler.enqueue(comment("c1", "@a", "うけるw"));
    wait_until(|| !synth.calls().is_empty()).await;
    assert_eq!(synth.calls()[0].0, "うけるわら");
}

#[tokio::test]
async fn test_sticker_only_comment_is_silent() {
    let synth = FakeSynth::new();
    let policy = PolicyHandle::new(base_policy());

    let scheduler = ReactionScheduler::new(
        policy,
        synth.clone(),
        Arc::new(FakeLlm::default()),
        Arc::new(FakeAudio::default()),
    );

    let c = Comment {
        id: "c1".to_string(),
        author: "@a".to_string(),
        timestamp_ms: chrono::Utc::now().timestamp_millis() + 1000,
        parts: vec![CommentPart::Sticker {
            sticker: "https://example.com/s.png".to_string(),
        }],
        ..Default::default()
    };
    scheduler.enqueue(c);
    settle().await;
    assert!(synth.calls().is_empty());
}

#[tokio::test]
async fn test_reset_clears_responded_set() {
    let llm = Arc::new(FakeLlm::default());
    let mut p = base_policy();
    p.tts_speaker = None;
    p.trigger_keywords.push("komochi".to_string());
    p.api_key = Some("sk-test".to_string());
    p.llm_speaker = Some(3);
    let policy = PolicyHandle::new(p);

    let scheduler = ReactionScheduler::new(
        policy,
        FakeSynth::new(),
        llm.clone(),
        Arc::new(FakeAudio::default()),
    );

    scheduler.enqueue(comment("c1", "@a", "hey komochi"));
    wait_until(|| llm.prompts.lock().len() == 1).await;
    assert_eq!(scheduler.responded_count(), 1);

    // セッションリセットで応答済みセットは空になる
    scheduler.reset();
    assert_eq!(scheduler.responded_count(), 0);

    scheduler.enqueue(comment("c1", "@a", "hey komochi"));
    wait_until(|| llm.prompts.lock().len() == 2).await;
}
