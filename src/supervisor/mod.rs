//! ワーカープロセス監督（Process Supervisor）
//!
//! インジェストワーカーを1プロセスだけ起動し、stdoutの行区切りJSONを
//! 型付きイベントに変換して配信する。直近コメントはリングバッファに保持し、
//! 停止は「stopコマンド → 猶予付き待機 → 強制終了」の順で行う。

pub mod ring;

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, watch, Notify};

use crate::chat::protocol::{WorkerMessage, STOP_COMMAND};
use crate::chat::Comment;
use ring::RingBuffer;

/// リングバッファの容量
pub const RECENT_MAX: usize = 500;

/// stop送信後、強制終了までの猶予
pub const STOP_GRACE: Duration = Duration::from_secs(5);

/// イベントチャンネルの容量
const EVENT_CAPACITY: usize = 256;

/// プロセス終了後、パイプに残った行を読み切る際の1行あたりの待ち時間
const STDOUT_DRAIN: Duration = Duration::from_millis(500);

/// ワーカー起動設定
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// ワーカーの実行ファイル
    pub program: PathBuf,
    /// 入力文字列の前に付く固定引数
    pub args: Vec<String>,
    /// ワーカーに渡すDB出力ディレクトリ
    pub db_dir: PathBuf,
    /// 強制終了までの猶予
    pub stop_grace: Duration,
    /// リングバッファ容量
    pub capacity: usize,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("komochi-worker"),
            args: Vec::new(),
            db_dir: PathBuf::from("."),
            stop_grace: STOP_GRACE,
            capacity: RECENT_MAX,
        }
    }
}

/// 監督の内部状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// 停止中
    Idle,
    /// 起動処理中
    Starting,
    /// ワーカー稼働中
    Running,
    /// stop送信済み、終了待ち
    StopRequested,
    /// ワーカーがstoppedを報告した（終了処理中）
    Exited,
}

/// 購読者へ配信するイベント
///
/// 配信順はワーカーstdoutの行順と一致する。
#[derive(Debug, Clone)]
pub enum ChatEvent {
    /// ワーカーが報告した保存先DBパス
    DbPath(PathBuf),
    /// 受信コメント1件
    Comment(Comment),
    /// 非致命エラー（不正な行、ワーカー報告エラー）
    Error(String),
    /// 稼働状態の遷移
    Running(bool),
    /// 終了通知（終端イベント）
    Stopped,
}

/// 監督エラー
#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("ワーカープロセスの起動に失敗しました: {0}")]
    Spawn(#[from] std::io::Error),
}

struct Inner {
    state: parking_lot::Mutex<SupervisorState>,
    running: watch::Sender<bool>,
    ring: parking_lot::Mutex<RingBuffer>,
    db_path: parking_lot::Mutex<Option<PathBuf>>,
    stdin: tokio::sync::Mutex<Option<ChildStdin>>,
    kill_req: Notify,
    events: broadcast::Sender<ChatEvent>,
}

impl Inner {
    fn emit(&self, event: ChatEvent) {
        // 購読者がいない間の送信エラーは無視
        let _ = self.events.send(event);
    }

    fn set_state(&self, next: SupervisorState) {
        let mut state = self.state.lock();
        if *state != next {
            tracing::debug!("🔄 監督状態遷移: {:?} -> {:?}", *state, next);
            *state = next;
        }
    }
}

/// ワーカープロセス監督
pub struct ChatSupervisor {
    config: SupervisorConfig,
    inner: Arc<Inner>,
}

impl ChatSupervisor {
    /// 新しい監督を作成（ワーカーはまだ起動しない）
    pub fn new(config: SupervisorConfig) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (running, _) = watch::channel(false);
        let capacity = config.capacity.max(1);

        Self {
            config,
            inner: Arc::new(Inner {
                state: parking_lot::Mutex::new(SupervisorState::Idle),
                running,
                ring: parking_lot::Mutex::new(RingBuffer::new(capacity)),
                db_path: parking_lot::Mutex::new(None),
                stdin: tokio::sync::Mutex::new(None),
                kill_req: Notify::new(),
                events,
            }),
        }
    }

    /// イベント購読を開始する
    pub fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.inner.events.subscribe()
    }

    /// ワーカーが稼働中か
    pub fn is_running(&self) -> bool {
        *self.inner.running.borrow()
    }

    /// ワーカーが報告したDBパス
    pub fn db_path(&self) -> Option<PathBuf> {
        self.inner.db_path.lock().clone()
    }

    /// 直近コメントを古い順で返す（limitは[1, capacity]にクランプ）
    pub fn recent(&self, limit: usize) -> Vec<Comment> {
        self.inner.ring.lock().recent(limit)
    }

    /// ワーカーを起動する
    ///
    /// 前のワーカーのプロセスが完全に終了するまでは何もせずOkを返す。
    /// 起動時にリングバッファとDBパスはリセットされる。
    /// 唯一の致命エラーはプロセス起動の失敗。
    pub async fn start(&self, input: &str) -> Result<(), SupervisorError> {
        {
            let mut state = self.inner.state.lock();
            match *state {
                // Exitedを含む他の状態では前のワーカーのプロセスがまだ
                // 生きているため、Idleに戻るまでstartは受け付けない
                SupervisorState::Idle => {
                    *state = SupervisorState::Starting;
                }
                _ => {
                    tracing::debug!("⏭️ 前のワーカーが終了していないためstartを無視");
                    return Ok(());
                }
            }
        }

        self.inner.ring.lock().clear();
        *self.inner.db_path.lock() = None;

        tracing::info!(
            "▶️ ワーカー起動: {:?} (入力: {})",
            self.config.program,
            input
        );

        let spawned = Command::new(&self.config.program)
            .args(&self.config.args)
            .arg(input.trim())
            .arg("--db-dir")
            .arg(&self.config.db_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                self.inner.set_state(SupervisorState::Idle);
                tracing::error!("❌ ワーカー起動失敗: {}", e);
                return Err(SupervisorError::Spawn(e));
            }
        };

        let stdin = child.stdin.take();
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        *self.inner.stdin.lock().await = stdin;

        self.inner.set_state(SupervisorState::Running);
        self.inner.running.send_replace(true);
        self.inner.emit(ChatEvent::Running(true));

        // stderrは診断テキストとしてログに流すだけ（パースしない）
        if let Some(stderr) = stderr {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    tracing::warn!("[worker] {}", line);
                }
            });
        }

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            read_worker_output(inner, child, stdout).await;
        });

        Ok(())
    }

    /// ワーカーを停止する
    ///
    /// stopコマンドを送り、猶予内に終了しなければ強制終了する。
    /// 常に完了し、多重呼び出しや停止済み状態でも安全。
    pub async fn stop(&self) {
        {
            let mut state = self.inner.state.lock();
            match *state {
                SupervisorState::Running | SupervisorState::Starting => {
                    *state = SupervisorState::StopRequested;
                }
                SupervisorState::StopRequested | SupervisorState::Exited => {
                    // 既に停止処理中。終了を待つだけ。
                }
                SupervisorState::Idle => return,
            }
        }

        tracing::info!("⏹️ ワーカー停止を要求");

        if let Some(stdin) = self.inner.stdin.lock().await.as_mut() {
            let command = format!("{}\n", STOP_COMMAND);
            if let Err(e) = stdin.write_all(command.as_bytes()).await {
                tracing::warn!("⚠️ stopコマンド送信に失敗: {}", e);
            }
            let _ = stdin.flush().await;
        }

        let mut running = self.inner.running.subscribe();
        let graceful = tokio::time::timeout(self.config.stop_grace, running.wait_for(|r| !*r))
            .await
            .is_ok();

        if !graceful {
            tracing::warn!(
                "⚠️ ワーカーが{}秒以内に終了しないため強制終了します",
                self.config.stop_grace.as_secs()
            );
            self.inner.kill_req.notify_one();
            let _ = running.wait_for(|r| !*r).await;
        }

        tracing::info!("✅ ワーカー停止完了");
    }
}

/// stdout読み取りループ
///
/// 行単位でプロトコルメッセージをパースし、イベントとして配信する。
/// パースできない行はErrorイベントを出して読み飛ばす。
/// 終了はstdoutのEOFではなくOSプロセスの終了で判定する。stdoutが先に
/// 閉じても強制終了要求には応答し続け、逆にプロセスが先に終われば
/// パイプに残った行を読み切ってからRunning(false)とStoppedを配信する。
async fn read_worker_output(
    inner: Arc<Inner>,
    mut child: Child,
    stdout: Option<tokio::process::ChildStdout>,
) {
    let status = if let Some(stdout) = stdout {
        let mut lines = BufReader::new(stdout).lines();
        let mut stdout_open = true;
        let status = loop {
            tokio::select! {
                status = child.wait() => break status,
                line = lines.next_line(), if stdout_open => match line {
                    Ok(Some(line)) => handle_line(&inner, &line),
                    Ok(None) => stdout_open = false,
                    Err(e) => {
                        inner.emit(ChatEvent::Error(format!("stdout読み取りエラー: {}", e)));
                        stdout_open = false;
                    }
                },
                _ = inner.kill_req.notified() => {
                    tracing::warn!("💀 ワーカーを強制終了します");
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("⚠️ 強制終了に失敗: {}", e);
                    }
                }
            }
        };

        // 残りの行を読み切る。パイプを握ったままの孫プロセスが
        // いる場合に備えて1行ごとにタイムアウトを付ける。
        if stdout_open {
            while let Ok(Ok(Some(line))) =
                tokio::time::timeout(STDOUT_DRAIN, lines.next_line()).await
            {
                handle_line(&inner, &line);
            }
        }
        status
    } else {
        loop {
            tokio::select! {
                status = child.wait() => break status,
                _ = inner.kill_req.notified() => {
                    if let Err(e) = child.start_kill() {
                        tracing::warn!("⚠️ 強制終了に失敗: {}", e);
                    }
                }
            }
        }
    };

    match status {
        Ok(status) => tracing::info!("🏁 ワーカー終了: {}", status),
        Err(e) => tracing::warn!("⚠️ ワーカーの終了待機に失敗: {}", e),
    }

    *inner.stdin.lock().await = None;
    inner.set_state(SupervisorState::Idle);
    inner.running.send_replace(false);
    inner.emit(ChatEvent::Running(false));
    inner.emit(ChatEvent::Stopped);
}

fn handle_line(inner: &Inner, line: &str) {
    match WorkerMessage::parse_line(line) {
        Ok(None) => {}
        Ok(Some(WorkerMessage::DbPath { db_path })) => {
            let path = PathBuf::from(db_path);
            tracing::info!("🗄️ DBパス: {:?}", path);
            *inner.db_path.lock() = Some(path.clone());
            inner.emit(ChatEvent::DbPath(path));
        }
        Ok(Some(WorkerMessage::Comment { comment })) => {
            inner.ring.lock().push(comment.clone());
            inner.emit(ChatEvent::Comment(comment));
        }
        Ok(Some(WorkerMessage::Error { message })) => {
            tracing::warn!("⚠️ ワーカー報告エラー: {}", message);
            inner.emit(ChatEvent::Error(message));
        }
        Ok(Some(WorkerMessage::Stopped)) => {
            // 終端処理はプロセス終了側で行う
            inner.set_state(SupervisorState::Exited);
        }
        Err(e) => {
            tracing::warn!("⚠️ 不正な行を無視: {} ({})", line, e);
            inner.emit(ChatEvent::Error(format!("不正な行: {}", e)));
        }
    }
}
