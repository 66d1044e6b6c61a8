//! Central error handling for the lifecycle core.
//!
//! Provides a unified RenderError enum with consistent categorization.
//! Errors are propagated as soon as they are detected; nothing is deferred
//! to frame end, since a deferred failure would corrupt every subsequent
//! draw in the frame.

/// Result alias used throughout the crate.
pub type RenderResult<T> = Result<T, RenderError>;

/// Centralized error type for all lifecycle operations.
#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    /// Caller or configuration bug: pool capacity exceeded, invalid
    /// buffering depth, unsupported queue/operation combination. Fatal,
    /// never retried.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Native object creation failure. The hardware state is not trusted
    /// after this; no silent retry.
    #[error("Device error: {0}")]
    Device(String),

    /// Command batch submission failure.
    #[error("Submit error: {0}")]
    Submit(String),

    /// Failure in the copy/upload subsystem.
    #[error("Upload error: {0}")]
    Upload(String),
}

impl RenderError {
    /// Convenience constructors for common error categories.
    pub fn config<T: ToString>(msg: T) -> Self {
        RenderError::Config(msg.to_string())
    }

    pub fn device<T: ToString>(msg: T) -> Self {
        RenderError::Device(msg.to_string())
    }

    pub fn submit<T: ToString>(msg: T) -> Self {
        RenderError::Submit(msg.to_string())
    }

    pub fn upload<T: ToString>(msg: T) -> Self {
        RenderError::Upload(msg.to_string())
    }
}
