use thiserror::Error;

/// Unified error type for Clogger.
#[derive(Error, Debug)]
pub enum ClogError {
    #[error("Format error in {directive:?}: {reason}")]
    Format { directive: String, reason: String },

    #[error("Config error: {0}")]
    Config(String),

    #[error("No usable clock: wall clock is before the Unix epoch or unreadable")]
    ClockUnavailable,

    #[error("app response not a 3 element response: {0}")]
    BadAppResponse(#[source] AppError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Body close failed: {0}")]
    Body(#[source] std::io::Error),
}

impl ClogError {
    pub fn format(directive: impl Into<String>, reason: impl Into<String>) -> Self {
        ClogError::Format {
            directive: directive.into(),
            reason: reason.into(),
        }
    }

    /// True for errors that can only be raised while building a logger,
    /// never while serving a request.
    pub fn is_construction_error(&self) -> bool {
        matches!(
            self,
            ClogError::Format { .. } | ClogError::Config(_) | ClogError::ClockUnavailable
        )
    }
}

/// Failure reported by the wrapped handler instead of a response.
#[derive(Error, Debug)]
pub enum AppError {
    /// The handler produced something that is not a status/headers/body triple.
    #[error("{0}")]
    Malformed(String),

    #[error("handler failed: {0}")]
    Failed(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl AppError {
    pub fn malformed(what: impl Into<String>) -> Self {
        AppError::Malformed(what.into())
    }
}

pub type Result<T> = std::result::Result<T, ClogError>;
