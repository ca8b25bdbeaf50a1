use thiserror::Error;

pub type Result<T> = std::result::Result<T, EaselError>;

/// Failure classes for a single image action.
///
/// `Validation` messages are written for end users and surface verbatim in
/// the status line; the other kinds are wrapped with an action prefix
/// before display.
#[derive(Debug, Error)]
pub enum EaselError {
    #[error("{0}")]
    Validation(String),

    #[error("image service request failed: {0}")]
    Service(String),

    #[error("could not decode image payload: {0}")]
    Decode(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EaselError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn service(message: impl Into<String>) -> Self {
        Self::Service(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    /// Stable lowercase tag for event payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "validation",
            Self::Service(_) => "service",
            Self::Decode(_) => "decode",
            Self::Io(_) => "io",
        }
    }
}
