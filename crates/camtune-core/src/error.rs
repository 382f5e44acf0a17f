use thiserror::Error;

/// Errors produced by the camtune protocol layer.
#[derive(Debug, Error)]
pub enum TuneError {
    /// Framing or sequencing error; the session must be torn down.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// The imaging pipeline refused or failed an operation.
    #[error("pipeline error: {0}")]
    Collaborator(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

impl TuneError {
    /// Whether this error demands immediate session teardown for a framing fault
    /// (as opposed to a transport fault or a tolerated handler failure).
    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, TuneError::ProtocolViolation(_))
    }

    pub(crate) fn violation(msg: impl Into<String>) -> Self {
        TuneError::ProtocolViolation(msg.into())
    }
}

pub type TuneResult<T> = Result<T, TuneError>;
