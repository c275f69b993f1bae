//! Play-service error type with wire code mapping.

// Layer 1: Standard library
// (none)

// Layer 2: Third-party
use thiserror::Error;

// Layer 3: Internal
use playhouse_comm::error::{CommError, ErrorCode};

/// Errors surfaced by stages, actors, and the play dispatcher.
///
/// User handlers abort with [`PlayError::with_code`] to put a specific
/// wire code on the reply; any other failure a handler returns maps to
/// `UncheckedContentsError`.
#[derive(Error, Debug)]
pub enum PlayError {
    /// Abort carrying an explicit wire code.
    #[error("{message} (code {code})")]
    Coded { code: u16, message: String },

    /// Stage type has no registered factory.
    #[error("Unknown stage type: {0}")]
    UnknownStageType(String),

    /// Game loop parameters failed validation.
    #[error("Invalid game loop config: {0}")]
    GameLoop(String),

    /// Mesh transport failure underneath a stage operation.
    #[error(transparent)]
    Comm(#[from] CommError),

    /// Handler failure without a typed code.
    #[error("Handler error: {0}")]
    Handler(String),
}

impl PlayError {
    /// Abort with an explicit wire code.
    pub fn with_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Coded {
            code: code.as_u16(),
            message: message.into(),
        }
    }

    /// Abort with a raw application code (`>= ErrorCode::ApplicationBase`).
    pub fn with_raw_code(code: u16, message: impl Into<String>) -> Self {
        Self::Coded {
            code,
            message: message.into(),
        }
    }

    /// The wire code replied to the caller when this error aborts a
    /// request handler.
    pub fn code(&self) -> u16 {
        match self {
            PlayError::Coded { code, .. } => *code,
            PlayError::UnknownStageType(_) => ErrorCode::InvalidStageType.as_u16(),
            PlayError::GameLoop(_) => ErrorCode::InvalidMessage.as_u16(),
            PlayError::Comm(comm) => comm.error_code().as_u16(),
            PlayError::Handler(_) => ErrorCode::UncheckedContentsError.as_u16(),
        }
    }
}
