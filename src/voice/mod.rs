//! VOICEVOX音声合成クライアント
//!
//! ローカルのVOICEVOXエンジンに対する audio_query / synthesis / 話者一覧 /
//! 疎通確認の薄いHTTPクライアント。全呼び出しに明示的なデッドラインを付ける。

pub mod playback;

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// 疎通確認のタイムアウト（短め）
const PROBE_TIMEOUT: Duration = Duration::from_millis(1500);

/// 合成系呼び出しのタイムアウト
const SYNTHESIS_TIMEOUT: Duration = Duration::from_secs(30);

/// 話速スケールの範囲
const SPEED_RANGE: (f32, f32) = (0.5, 2.0);

/// 音量スケールの範囲
const VOLUME_RANGE: (f32, f32) = (0.0, 2.0);

/// 音声合成エラー
#[derive(Debug, Error)]
pub enum VoiceError {
    #[error("HTTPリクエストに失敗しました: {0}")]
    Http(#[from] reqwest::Error),

    #[error("VOICEVOXがエラーを返しました: ステータス {0}")]
    Status(reqwest::StatusCode),

    #[error("呼び出しがタイムアウトしました")]
    Timeout,

    #[error("音声出力エラー: {0}")]
    AudioOutput(String),

    #[error("音声デコードエラー: {0}")]
    AudioDecode(String),
}

/// VOICEVOX接続設定
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct VoicevoxConfig {
    /// ホスト名
    pub host: String,
    /// ポート番号
    pub port: u16,
    /// 話速スケール (0.5〜2.0)
    #[serde(default = "default_scale")]
    pub speed_scale: f32,
    /// 音量スケール (0.0〜2.0)
    #[serde(default = "default_scale")]
    pub volume_scale: f32,
}

fn default_scale() -> f32 {
    1.0
}

impl Default for VoicevoxConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 50021,
            speed_scale: 1.0,
            volume_scale: 1.0,
        }
    }
}

/// 話者スタイル
#[derive(Debug, Clone, Deserialize)]
pub struct SpeakerStyle {
    pub name: String,
    pub id: i32,
}

/// 話者
#[derive(Debug, Clone, Deserialize)]
pub struct Speaker {
    pub name: String,
    #[serde(default)]
    pub speaker_uuid: String,
    #[serde(default)]
    pub styles: Vec<SpeakerStyle>,
}

/// テキストを音声データに合成するインターフェース
///
/// スケジューラはこの抽象だけに依存する（テストでは偽実装を差し込む）。
#[async_trait]
pub trait SpeechSynthesizer: Send + Sync {
    /// テキストをWAVバイト列に合成する
    async fn synthesize(&self, text: &str, speaker: i32) -> Result<Vec<u8>, VoiceError>;
}

/// VOICEVOXクライアント
pub struct VoicevoxClient {
    config: VoicevoxConfig,
    client: reqwest::Client,
}

impl VoicevoxClient {
    pub fn new(config: VoicevoxConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(SYNTHESIS_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { config, client }
    }

    fn base_url(&self) -> String {
        format!("http://{}:{}", self.config.host, self.config.port)
    }

    /// エンジンが応答するか（/versionを短いタイムアウトで叩く）
    pub async fn is_alive(&self) -> bool {
        let url = format!("{}/version", self.base_url());
        let request = self.client.get(&url).timeout(PROBE_TIMEOUT).send();

        match request.await {
            Ok(response) if response.status().is_success() => {
                if let Ok(version) = response.text().await {
                    tracing::info!("✅ VOICEVOX接続成功 (バージョン: {})", version.trim());
                }
                true
            }
            Ok(response) => {
                tracing::warn!("⚠️ VOICEVOX接続失敗: ステータス {}", response.status());
                false
            }
            Err(e) => {
                tracing::debug!("VOICEVOX疎通確認失敗: {}", e);
                false
            }
        }
    }

    /// 話者一覧を取得する
    pub async fn speakers(&self) -> Result<Vec<Speaker>, VoiceError> {
        let url = format!("{}/speakers", self.base_url());
        let response = self
            .client
            .get(&url)
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .map_err(timeout_or_http)?;

        if !response.status().is_success() {
            return Err(VoiceError::Status(response.status()));
        }
        Ok(response.json().await?)
    }

    /// 合成パラメータ（audio_query）を取得する
    async fn audio_query(&self, text: &str, speaker: i32) -> Result<serde_json::Value, VoiceError> {
        let url = format!(
            "{}/audio_query?speaker={}&text={}",
            self.base_url(),
            speaker,
            urlencoding::encode(text),
        );

        let response = self.client.post(&url).send().await.map_err(timeout_or_http)?;
        if !response.status().is_success() {
            return Err(VoiceError::Status(response.status()));
        }
        Ok(response.json().await?)
    }

    /// 話速・音量スケールをクエリに反映する（範囲外はクランプ）
    fn apply_scales(&self, query: &mut serde_json::Value) {
        if let Some(obj) = query.as_object_mut() {
            let speed = self.config.speed_scale.clamp(SPEED_RANGE.0, SPEED_RANGE.1);
            let volume = self
                .config
                .volume_scale
                .clamp(VOLUME_RANGE.0, VOLUME_RANGE.1);

            if let Some(n) = serde_json::Number::from_f64(speed as f64) {
                obj.insert("speedScale".to_string(), serde_json::Value::Number(n));
            }
            if let Some(n) = serde_json::Number::from_f64(volume as f64) {
                obj.insert("volumeScale".to_string(), serde_json::Value::Number(n));
            }
        }
    }

    /// audio_queryをWAVバイト列に合成する
    async fn synthesis(
        &self,
        query: &serde_json::Value,
        speaker: i32,
    ) -> Result<Vec<u8>, VoiceError> {
        let url = format!("{}/synthesis?speaker={}", self.base_url(), speaker);

        let response = self
            .client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(query)
            .send()
            .await
            .map_err(timeout_or_http)?;

        if !response.status().is_success() {
            return Err(VoiceError::Status(response.status()));
        }
        Ok(response.bytes().await?.to_vec())
    }
}

fn timeout_or_http(e: reqwest::Error) -> VoiceError {
    if e.is_timeout() {
        VoiceError::Timeout
    } else {
        VoiceError::Http(e)
    }
}

#[async_trait]
impl SpeechSynthesizer for VoicevoxClient {
    async fn synthesize(&self, text: &str, speaker: i32) -> Result<Vec<u8>, VoiceError> {
        tracing::debug!("🔊 音声合成: speaker={} text={}", speaker, text);

        let mut query = self.audio_query(text, speaker).await?;
        self.apply_scales(&mut query);
        self.synthesis(&query, speaker).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = VoicevoxConfig::default();
        assert_eq!(config.host, "127.0.0.1");
        assert_eq!(config.port, 50021);
        assert_eq!(config.speed_scale, 1.0);
    }

    #[test]
    fn test_apply_scales_clamps() {
        let client = VoicevoxClient::new(VoicevoxConfig {
            speed_scale: 99.0,
            volume_scale: -1.0,
            ..Default::default()
        });

        let mut query = serde_json::json!({ "accent_phrases": [] });
        client.apply_scales(&mut query);

        assert_eq!(query["speedScale"], serde_json::json!(2.0));
        assert_eq!(query["volumeScale"], serde_json::json!(0.0));
    }

    #[test]
    fn test_base_url() {
        let client = VoicevoxClient::new(VoicevoxConfig::default());
        assert_eq!(client.base_url(), "http://127.0.0.1:50021");
    }
}
