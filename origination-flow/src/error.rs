use thiserror::Error;

/// Errors raised while routing a conversation turn
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("Unknown stage: {0}")]
    UnknownStage(String),

    #[error("Stage task failed: {0}")]
    StageFailed(String),

    /// The conversation store could not be read or written
    #[error("Storage error: {0}")]
    StorageError(String),
}

pub type Result<T> = std::result::Result<T, FlowError>;
