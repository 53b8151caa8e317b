//! komochi 本体
//!
//! ワーカープロセスを監督してライブチャットを取り込み、コメントごとに
//! 読み上げ・LLM応答のリアクションを実行する。

use std::sync::Arc;

use clap::Parser;
use komochi::chat::Comment;
use komochi::config::AppConfig;
use komochi::llm::OpenAiClient;
use komochi::reaction::{PolicyHandle, ReactionScheduler};
use komochi::supervisor::{ChatEvent, ChatSupervisor};
use komochi::voice::playback::RodioOutput;
use komochi::voice::VoicevoxClient;

/// VOICEVOX疎通の再確認間隔
const PROBE_INTERVAL: std::time::Duration = std::time::Duration::from_secs(30);

#[derive(Parser, Debug)]
#[command(name = "komochi", about = "ライブチャット読み上げアシスタント")]
struct Args {
    /// 取り込み対象（videoId / @handle / channelId）
    input: String,

    /// ワーカー実行ファイルの上書き
    #[arg(long)]
    worker: Option<std::path::PathBuf>,

    /// コメントDBの出力ディレクトリの上書き
    #[arg(long)]
    db_dir: Option<std::path::PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    komochi::logging::init()?;

    let args = Args::parse();
    let config = AppConfig::load()?;

    tracing::info!("🎬 komochi 起動 (入力: {})", args.input);

    // ポリシーと外部サービスクライアント
    let policy = PolicyHandle::new(config.initial_policy());
    let voice = Arc::new(VoicevoxClient::new(config.voicevox.clone()));
    let llm = Arc::new(OpenAiClient::new(config.openai.model.clone()));
    let audio = Arc::new(RodioOutput::new());

    // VOICEVOXの疎通確認（結果がspeech_enabledになる）
    let alive = voice.is_alive().await;
    policy.set_speech_enabled(alive);
    if alive {
        match voice.speakers().await {
            Ok(speakers) => {
                let styles: usize = speakers.iter().map(|s| s.styles.len()).sum();
                tracing::info!("🎙️ VOICEVOX話者: {}名 {}スタイル", speakers.len(), styles);
            }
            Err(e) => tracing::warn!("⚠️ 話者一覧の取得に失敗: {}", e),
        }
    } else {
        tracing::warn!("⚠️ VOICEVOXに接続できないため読み上げは無効です");
    }

    // 定期的に疎通を再確認して読み上げ可否を追従させる
    {
        let policy = policy.clone();
        let voice = Arc::clone(&voice);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PROBE_INTERVAL);
            interval.tick().await;
            loop {
                interval.tick().await;
                policy.set_speech_enabled(voice.is_alive().await);
            }
        });
    }

    let scheduler = ReactionScheduler::new(policy.clone(), voice, llm, audio);

    // 監督を設定して起動
    let mut supervisor_config = config.supervisor_config()?;
    if let Some(worker) = args.worker {
        supervisor_config.program = worker;
    }
    if let Some(db_dir) = args.db_dir {
        supervisor_config.db_dir = db_dir;
    }

    let supervisor = ChatSupervisor::new(supervisor_config);
    let mut events = supervisor.subscribe();

    scheduler.reset();
    supervisor.start(&args.input).await?;

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(ChatEvent::Comment(comment)) => {
                    print_comment(&comment);
                    scheduler.enqueue(comment);
                }
                Ok(ChatEvent::DbPath(path)) => {
                    tracing::info!("🗄️ コメントDB: {:?}", path);
                }
                Ok(ChatEvent::Error(message)) => {
                    tracing::warn!("⚠️ {}", message);
                }
                Ok(ChatEvent::Running(running)) => {
                    tracing::info!("🔄 稼働状態: {}", if running { "Running" } else { "Idle" });
                }
                Ok(ChatEvent::Stopped) => {
                    tracing::info!("🏁 インジェスト終了");
                    break;
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("⚠️ イベントを{}件取りこぼしました", n);
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("⏹️ 停止シグナル受信");
                scheduler.cancel_all();
                supervisor.stop().await;
                break;
            }
        }
    }

    scheduler.cancel_all();
    tracing::info!("👋 komochi 終了");
    Ok(())
}

fn print_comment(comment: &Comment) {
    let amount = comment
        .amount_text
        .as_deref()
        .map(|a| format!(" [{}]", a))
        .unwrap_or_default();
    tracing::info!(
        "💬 {} {}{}: {}",
        comment.timestamp,
        comment.author,
        amount,
        comment.raw_text()
    );
}
