//! 音声再生
//!
//! rodioによるWAV再生。再生は常に最大1本で、キャンセル時に途中停止できるよう
//! 再生中のSinkへのハンドルを保持する。

use std::io::Cursor;
use std::sync::Arc;

use async_trait::async_trait;
use rodio::{Decoder, OutputStream, Sink};

use super::VoiceError;

/// 合成済み音声を再生するインターフェース
#[async_trait]
pub trait AudioOutput: Send + Sync {
    /// WAVデータを最後まで（または停止されるまで）再生する
    async fn play(&self, wav: Vec<u8>) -> Result<(), VoiceError>;

    /// 再生中の音声を即座に止める（再生していなければ何もしない）
    fn stop(&self);
}

/// rodioによる実再生
#[derive(Default)]
pub struct RodioOutput {
    current: Arc<parking_lot::Mutex<Option<Arc<Sink>>>>,
}

impl RodioOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn play_blocking(
        current: Arc<parking_lot::Mutex<Option<Arc<Sink>>>>,
        wav: Vec<u8>,
    ) -> Result<(), VoiceError> {
        // OutputStreamはこのスレッドで生かしたままにする
        let (_stream, stream_handle) = OutputStream::try_default()
            .map_err(|e| VoiceError::AudioOutput(format!("音声出力の初期化に失敗: {}", e)))?;

        let sink = Sink::try_new(&stream_handle)
            .map_err(|e| VoiceError::AudioOutput(format!("音声シンクの作成に失敗: {}", e)))?;
        let sink = Arc::new(sink);

        let source = Decoder::new(Cursor::new(wav))
            .map_err(|e| VoiceError::AudioDecode(format!("WAVデコードに失敗: {}", e)))?;

        *current.lock() = Some(Arc::clone(&sink));

        sink.append(source);
        // stop()されるとsleep_until_endは即座に戻る
        sink.sleep_until_end();

        *current.lock() = None;
        Ok(())
    }
}

#[async_trait]
impl AudioOutput for RodioOutput {
    async fn play(&self, wav: Vec<u8>) -> Result<(), VoiceError> {
        let current = Arc::clone(&self.current);

        tokio::task::spawn_blocking(move || Self::play_blocking(current, wav))
            .await
            .map_err(|e| VoiceError::AudioOutput(format!("再生タスクエラー: {}", e)))?
    }

    fn stop(&self) {
        if let Some(sink) = self.current.lock().take() {
            tracing::debug!("🔇 再生を停止");
            sink.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_without_playback_is_noop() {
        let output = RodioOutput::new();
        output.stop();
        output.stop();
    }
}
