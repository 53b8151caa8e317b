//! クレート共通エラー型

use thiserror::Error;

/// komochi共通エラー
#[derive(Debug, Error)]
pub enum KomochiError {
    #[error(transparent)]
    Supervisor(#[from] crate::supervisor::SupervisorError),

    #[error(transparent)]
    Voice(#[from] crate::voice::VoiceError),

    #[error(transparent)]
    Llm(#[from] crate::llm::LlmError),

    #[error(transparent)]
    Protocol(#[from] crate::chat::protocol::ProtocolError),

    #[error(transparent)]
    General(#[from] anyhow::Error),
}

/// komochi共通Result
pub type KomochiResult<T> = Result<T, KomochiError>;
