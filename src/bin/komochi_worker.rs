//! インジェストワーカー
//!
//! 監督プロセスから起動され、コメントをSQLiteに保存しつつ行区切りJSONで
//! stdoutに流す。stdoutはプロトコル専用で、診断ログは全てstderrに出す。
//! stdinのリテラル行 `stop`（またはSIGINT/SIGTERM）で停止し、最後に
//! 必ず `stopped` 行を出して終了する。
//!
//! ライブソースのスクレイパは本体に含まないため、`--replay` でNDJSON
//! ファイル（1行1コメント）を時系列再生するのが開発・テスト時のソースになる。

use std::io::Write as _;
use std::path::PathBuf;

use clap::Parser;
use komochi::chat::protocol::{WorkerMessage, STOP_COMMAND};
use komochi::chat::store::ChatStore;
use komochi::chat::Comment;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;

#[derive(Parser, Debug)]
#[command(name = "komochi-worker", about = "ライブチャット取り込みワーカー")]
struct Args {
    /// 取り込み対象（videoId / @handle / channelId）
    input: Option<String>,

    /// コメントDBの出力ディレクトリ
    #[arg(long, default_value = ".")]
    db_dir: PathBuf,

    /// 再生するNDJSONコメントファイル（なければstopまで待機）
    #[arg(long)]
    replay: Option<PathBuf>,

    /// 再生コメント間の待機（ミリ秒）
    #[arg(long, default_value_t = 0)]
    interval_ms: u64,
}

/// プロトコルメッセージを1行書き出す
fn write_msg(msg: &WorkerMessage) {
    let mut stdout = std::io::stdout().lock();
    let _ = writeln!(stdout, "{}", msg.to_line());
    let _ = stdout.flush();
}

#[tokio::main]
async fn main() {
    let _ = komochi::logging::init_stderr();

    let mut args = Args::parse();
    let Some(input) = args.input.take().filter(|s| !s.trim().is_empty()) else {
        write_msg(&WorkerMessage::Error {
            message: "input is required".to_string(),
        });
        std::process::exit(2);
    };

    match run(&input, args).await {
        Ok(()) => {
            write_msg(&WorkerMessage::Stopped);
            // stdinを読んでいるブロッキングスレッドの完了を
            // ランタイム終了で待たないよう明示的に抜ける
            std::process::exit(0);
        }
        Err(e) => {
            write_msg(&WorkerMessage::Error {
                message: format!("{:#}", e),
            });
            write_msg(&WorkerMessage::Stopped);
            std::process::exit(1);
        }
    }
}

async fn run(input: &str, args: Args) -> anyhow::Result<()> {
    tracing::info!("📥 インジェスト開始: {}", input.trim());

    let store = ChatStore::open(&args.db_dir)?;
    write_msg(&WorkerMessage::DbPath {
        db_path: store.db_path().to_string_lossy().into_owned(),
    });

    let (stop_tx, stop_rx) = watch::channel(false);
    spawn_stop_listener(stop_tx);

    match &args.replay {
        Some(path) => {
            replay_comments(&store, path, args.interval_ms, stop_rx).await?;
        }
        None => {
            // ライブソースなし。停止要求まで待機する。
            tracing::info!("⏸️ 再生ソースなし、stop待ち");
            let mut stop_rx = stop_rx;
            let _ = stop_rx.wait_for(|stop| *stop).await;
        }
    }

    tracing::info!("📥 インジェスト終了");
    Ok(())
}

/// stdinのstopコマンドとシグナルを監視する
fn spawn_stop_listener(stop_tx: watch::Sender<bool>) {
    {
        let stop_tx = stop_tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if line.trim() == STOP_COMMAND {
                    tracing::info!("⏹️ stopコマンド受信");
                    stop_tx.send_replace(true);
                    return;
                }
            }
            // stdinが閉じたら親は消えている。停止する。
            stop_tx.send_replace(true);
        });
    }

    tokio::spawn(async move {
        wait_for_signal().await;
        tracing::info!("⏹️ 停止シグナル受信");
        stop_tx.send_replace(true);
    });
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut term = match signal(SignalKind::terminate()) {
        Ok(term) => term,
        Err(_) => {
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = term.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// NDJSONファイルのコメントを順に保存・送出する
async fn replay_comments(
    store: &ChatStore,
    path: &PathBuf,
    interval_ms: u64,
    mut stop_rx: watch::Receiver<bool>,
) -> anyhow::Result<()> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut count = 0usize;

    while let Some(line) = lines.next_line().await? {
        if *stop_rx.borrow() {
            break;
        }

        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let comment: Comment = match serde_json::from_str(line) {
            Ok(comment) => comment,
            Err(e) => {
                tracing::warn!("⚠️ 不正なNDJSON行を無視: {}", e);
                write_msg(&WorkerMessage::Error {
                    message: format!("不正なコメント行: {}", e),
                });
                continue;
            }
        };

        if let Err(e) = store.save(&comment) {
            tracing::warn!("⚠️ コメント保存に失敗: {}", e);
        }
        write_msg(&WorkerMessage::Comment { comment });
        count += 1;

        if interval_ms > 0 {
            tokio::select! {
                _ = tokio::time::sleep(std::time::Duration::from_millis(interval_ms)) => {}
                _ = stop_rx.wait_for(|stop| *stop) => break,
            }
        }
    }

    tracing::info!("📥 {}件のコメントを再生", count);
    Ok(())
}
