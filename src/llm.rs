//! OpenAI応答クライアント
//!
//! トリガーキーワードに反応する返答を Responses API で生成する。
//! 1リクエスト/1レスポンスの単純な呼び出しで、明示的なデッドラインを持つ。

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// LLM呼び出しのタイムアウト
const LLM_TIMEOUT: Duration = Duration::from_secs(20);

/// デフォルトモデル
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

const RESPONSES_URL: &str = "https://api.openai.com/v1/responses";

/// 返答生成の基本指示
const SYSTEM_TEXT: &str = "あなたは配信コメントに返答するアシスタントです。\
日本語で、短く自然に返答してください。\
危険な依頼や個人情報には答えず、必要ならやんわり断ってください。";

/// LLMエラー
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("APIキーが設定されていません")]
    MissingKey,

    #[error("HTTPリクエストに失敗しました: {0}")]
    Http(#[from] reqwest::Error),

    #[error("OpenAIがエラーを返しました: HTTP {status} {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },

    #[error("呼び出しがタイムアウトしました")]
    Timeout,

    #[error("応答が空でした")]
    EmptyReply,
}

/// プロンプトから返答テキストを生成するインターフェース
#[async_trait]
pub trait ReplyGenerator: Send + Sync {
    async fn respond(
        &self,
        api_key: &str,
        prompt: &str,
        persona: &str,
    ) -> Result<String, LlmError>;
}

#[derive(Serialize)]
struct RequestBody<'a> {
    model: &'a str,
    input: Vec<InputItem<'a>>,
}

#[derive(Serialize)]
struct InputItem<'a> {
    role: &'a str,
    content: Vec<ContentItem<'a>>,
}

#[derive(Serialize)]
struct ContentItem<'a> {
    #[serde(rename = "type")]
    kind: &'a str,
    text: &'a str,
}

#[derive(Deserialize, Default)]
struct ResponseBody {
    #[serde(default)]
    output_text: Option<String>,
    #[serde(default)]
    output: Vec<OutputItem>,
}

#[derive(Deserialize, Default)]
struct OutputItem {
    #[serde(default)]
    content: Vec<OutputContent>,
}

#[derive(Deserialize, Default)]
struct OutputContent {
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    text: String,
}

impl ResponseBody {
    /// 応答本文を抽出する（output_text優先、なければoutputを連結）
    fn output_text(&self) -> String {
        if let Some(text) = &self.output_text {
            return text.trim().to_string();
        }

        let parts: Vec<&str> = self
            .output
            .iter()
            .flat_map(|item| item.content.iter())
            .filter(|c| c.kind == "output_text" || c.kind == "text")
            .map(|c| c.text.as_str())
            .collect();
        parts.join("\n").trim().to_string()
    }
}

/// OpenAIクライアント
pub struct OpenAiClient {
    client: reqwest::Client,
    model: String,
}

impl OpenAiClient {
    pub fn new(model: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(LLM_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            client,
            model: model.into(),
        }
    }

    fn system_text(persona: &str) -> String {
        let persona = persona.trim();
        if persona.is_empty() {
            SYSTEM_TEXT.to_string()
        } else {
            // 性格指定は長すぎないよう切り詰める
            let persona: String = persona.chars().take(2000).collect();
            format!("{}\n\n【性格/口調】\n{}", SYSTEM_TEXT, persona)
        }
    }
}

impl Default for OpenAiClient {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

#[async_trait]
impl ReplyGenerator for OpenAiClient {
    async fn respond(
        &self,
        api_key: &str,
        prompt: &str,
        persona: &str,
    ) -> Result<String, LlmError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(LlmError::MissingKey);
        }

        let system_text = Self::system_text(persona);
        let body = RequestBody {
            model: &self.model,
            input: vec![
                InputItem {
                    role: "system",
                    content: vec![ContentItem {
                        kind: "input_text",
                        text: &system_text,
                    }],
                },
                InputItem {
                    role: "user",
                    content: vec![ContentItem {
                        kind: "input_text",
                        text: prompt,
                    }],
                },
            ],
        };

        let response = self
            .client
            .post(RESPONSES_URL)
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    LlmError::Timeout
                } else {
                    LlmError::Http(e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(LlmError::Status { status, body });
        }

        let parsed: ResponseBody = response.json().await?;
        let text = parsed.output_text();
        if text.is_empty() {
            return Err(LlmError::EmptyReply);
        }

        tracing::debug!("🤖 LLM応答: {}", text);
        Ok(text)
    }
}
