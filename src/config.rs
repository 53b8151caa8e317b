//! アプリケーション設定管理モジュール
//!
//! XDGディレクトリの config.toml から設定を読み込む。ファイルがなければ
//! デフォルト値で起動する。

use std::path::PathBuf;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};

use crate::reaction::ReactionPolicy;
use crate::supervisor::{SupervisorConfig, RECENT_MAX, STOP_GRACE};
use crate::voice::VoicevoxConfig;

/// ワーカープロセス設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// ワーカーの実行ファイル
    pub program: PathBuf,
    /// 入力文字列の前に付く固定引数
    #[serde(default)]
    pub args: Vec<String>,
    /// コメントDBの出力ディレクトリ（Noneの場合はXDGデータディレクトリ）
    #[serde(default)]
    pub db_dir: Option<PathBuf>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("komochi-worker"),
            args: Vec::new(),
            db_dir: None,
        }
    }
}

/// OpenAI設定
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenAiConfig {
    /// APIキー（環境変数 OPENAI_API_KEY が優先）
    #[serde(default)]
    pub api_key: Option<String>,
    /// 使用モデル
    #[serde(default = "default_model")]
    pub model: String,
    /// 返答の性格/口調
    #[serde(default)]
    pub persona: String,
}

fn default_model() -> String {
    crate::llm::DEFAULT_MODEL.to_string()
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            persona: String::new(),
        }
    }
}

/// アプリケーション設定
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// ワーカー設定
    #[serde(default)]
    pub worker: WorkerConfig,

    /// VOICEVOX設定
    #[serde(default)]
    pub voicevox: VoicevoxConfig,

    /// OpenAI設定
    #[serde(default)]
    pub openai: OpenAiConfig,

    /// リアクション設定（speech_enabledは実行時に上書きされる）
    #[serde(default)]
    pub reaction: ReactionPolicy,
}

/// プロジェクトディレクトリを取得
fn project_dirs() -> Result<ProjectDirs> {
    ProjectDirs::from("dev", "sifyfy", "komochi")
        .context("プロジェクトディレクトリの取得に失敗しました")
}

/// 設定ファイルのパス
pub fn config_path() -> Result<PathBuf> {
    Ok(project_dirs()?.config_dir().join("config.toml"))
}

/// デフォルトのDB出力ディレクトリ（XDGデータディレクトリ配下）
pub fn default_db_dir() -> Result<PathBuf> {
    Ok(project_dirs()?.data_dir().join("db"))
}

impl AppConfig {
    /// 設定ファイルを読み込む（存在しなければデフォルト）
    pub fn load() -> Result<Self> {
        let path = config_path()?;
        if !path.exists() {
            tracing::debug!("設定ファイルなし、デフォルト設定を使用: {:?}", path);
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .with_context(|| format!("設定ファイルの読み込みに失敗: {:?}", path))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("設定ファイルのパースに失敗: {:?}", path))?;

        tracing::info!("⚙️ 設定を読み込みました: {:?}", path);
        Ok(config)
    }

    /// 初期ポリシーを組み立てる
    ///
    /// APIキーは 環境変数 > 設定ファイル の順で解決する。
    /// speech_enabledはVOICEVOXの疎通確認後に実行時設定される。
    pub fn initial_policy(&self) -> ReactionPolicy {
        let mut policy = self.reaction.clone();
        policy.speech_enabled = false;

        let env_key = std::env::var("OPENAI_API_KEY").ok().filter(|k| !k.is_empty());
        if env_key.is_some() {
            policy.api_key = env_key;
        } else if policy.api_key.is_none() {
            policy.api_key = self.openai.api_key.clone();
        }
        if policy.persona.is_empty() {
            policy.persona = self.openai.persona.clone();
        }
        policy
    }

    /// 監督設定を組み立てる
    pub fn supervisor_config(&self) -> Result<SupervisorConfig> {
        let db_dir = match &self.worker.db_dir {
            Some(dir) => dir.clone(),
            None => default_db_dir()?,
        };
        Ok(SupervisorConfig {
            program: self.worker.program.clone(),
            args: self.worker.args.clone(),
            db_dir,
            stop_grace: STOP_GRACE,
            capacity: RECENT_MAX,
        })
    }
}
