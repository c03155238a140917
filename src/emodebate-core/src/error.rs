//! Error types for the debate system.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DebateError {
    /// A generation, classification, or speech backend could not serve the call.
    #[error("{capability} unavailable: {reason}")]
    CapabilityUnavailable {
        capability: &'static str,
        reason: String,
    },

    /// A best-effort send failed. Never fatal.
    #[error("Transient I/O error: {0}")]
    TransientIo(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("OpenAI API error: {0}")]
    OpenAIError(#[from] async_openai::error::OpenAIError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Session log error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Audio encoding error: {0}")]
    Audio(#[from] hound::Error),
}

impl DebateError {
    pub fn unavailable(capability: &'static str, reason: impl Into<String>) -> Self {
        DebateError::CapabilityUnavailable {
            capability,
            reason: reason.into(),
        }
    }

    /// Whether the orchestrator may recover from this error locally.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DebateError::CapabilityUnavailable { .. }
                | DebateError::TransientIo(_)
                | DebateError::OpenAIError(_)
        )
    }
}
