//! Wire-visible error codes and transport-level error types.

// Layer 1: Standard library
use std::time::Duration;

// Layer 2: Third-party
use thiserror::Error;

/// Stable, wire-visible error codes shared by every service in the mesh.
///
/// The numeric values travel inside client frames and route headers and
/// must never be renumbered. Codes at or above [`ErrorCode::ApplicationBase`]
/// are reserved for user content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    Success = 0,
    RequestTimeout = 1,
    ServerNotFound = 2,
    StageNotFound = 3,
    ActorNotFound = 4,
    AuthenticationFailed = 5,
    NotAuthenticated = 6,
    AlreadyAuthenticated = 7,
    StageAlreadyExists = 8,
    StageCreationFailed = 9,
    JoinStageFailed = 10,
    InvalidMessage = 11,
    HandlerNotFound = 12,
    InvalidStageType = 13,
    SystemError = 14,
    UncheckedContentsError = 15,
    InvalidAccountId = 16,
    JoinStageRejected = 17,
    InternalError = 99,
    /// First code available for application-defined errors.
    ApplicationBase = 1000,
}

impl ErrorCode {
    /// Numeric value carried on the wire.
    pub fn as_u16(self) -> u16 {
        self as u16
    }

    /// Best-effort mapping from a wire value back to a known code.
    ///
    /// Unknown values below `ApplicationBase` fold into `SystemError`;
    /// application codes are reported as `ApplicationBase`.
    pub fn from_u16(value: u16) -> Self {
        match value {
            0 => Self::Success,
            1 => Self::RequestTimeout,
            2 => Self::ServerNotFound,
            3 => Self::StageNotFound,
            4 => Self::ActorNotFound,
            5 => Self::AuthenticationFailed,
            6 => Self::NotAuthenticated,
            7 => Self::AlreadyAuthenticated,
            8 => Self::StageAlreadyExists,
            9 => Self::StageCreationFailed,
            10 => Self::JoinStageFailed,
            11 => Self::InvalidMessage,
            12 => Self::HandlerNotFound,
            13 => Self::InvalidStageType,
            14 => Self::SystemError,
            15 => Self::UncheckedContentsError,
            16 => Self::InvalidAccountId,
            17 => Self::JoinStageRejected,
            99 => Self::InternalError,
            v if v >= 1000 => Self::ApplicationBase,
            _ => Self::SystemError,
        }
    }

    /// Whether this code means the operation succeeded.
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

impl From<ErrorCode> for u16 {
    fn from(code: ErrorCode) -> Self {
        code.as_u16()
    }
}

/// Errors raised by the mesh transport and routing layers.
#[derive(Error, Debug)]
pub enum CommError {
    /// Malformed or over-limit message (oversized payload, bad frame,
    /// duplicate request sequence).
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Peer send queue stayed at the high-water mark past the bounded wait.
    #[error("Send buffer overflow toward peer {peer}")]
    BufferOverflow { peer: String },

    /// No live server matches the requested destination.
    #[error("Server not found: {0}")]
    ServerNotFound(String),

    /// A pending request's deadline expired before its reply arrived.
    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),

    /// The pending request was canceled (shutdown or explicit cancel).
    #[error("Request canceled")]
    Canceled,

    /// The peer link or local channel closed underneath an operation.
    #[error("Connection closed: {0}")]
    Closed(String),

    /// Could not bind the router socket listener.
    #[error("Failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// Configuration validation failed.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Frame decode failure on an inbound connection.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Underlying socket I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CommError {
    /// Wire error code this error maps to when it must be reported to a
    /// remote caller.
    pub fn error_code(&self) -> ErrorCode {
        match self {
            CommError::InvalidMessage(_) | CommError::Decode(_) => ErrorCode::InvalidMessage,
            CommError::RequestTimeout(_) => ErrorCode::RequestTimeout,
            CommError::ServerNotFound(_) | CommError::Canceled => ErrorCode::ServerNotFound,
            CommError::BufferOverflow { .. }
            | CommError::Closed(_)
            | CommError::Io(_)
            | CommError::Bind { .. }
            | CommError::Config(_) => ErrorCode::SystemError,
        }
    }

    /// Check if the error is transient (a retry may succeed).
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CommError::BufferOverflow { .. } | CommError::RequestTimeout(_)
        )
    }

    /// Check if the error is fatal for the owning process.
    ///
    /// Fatal errors abort startup; everything else is logged and the mesh
    /// keeps running.
    pub fn is_fatal(&self) -> bool {
        matches!(self, CommError::Bind { .. } | CommError::Config(_))
    }

    /// Process exit code for fatal startup errors.
    ///
    /// `1` for configuration errors, `2` for bind failures, `0` otherwise.
    pub fn exit_code(&self) -> i32 {
        match self {
            CommError::Config(_) => 1,
            CommError::Bind { .. } => 2,
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_round_trip() {
        for code in [
            ErrorCode::Success,
            ErrorCode::RequestTimeout,
            ErrorCode::ServerNotFound,
            ErrorCode::StageNotFound,
            ErrorCode::HandlerNotFound,
            ErrorCode::UncheckedContentsError,
            ErrorCode::InternalError,
            ErrorCode::ApplicationBase,
        ] {
            assert_eq!(ErrorCode::from_u16(code.as_u16()), code);
        }
    }

    #[test]
    fn test_unknown_codes_fold_into_system_error() {
        assert_eq!(ErrorCode::from_u16(500), ErrorCode::SystemError);
        assert_eq!(ErrorCode::from_u16(2000), ErrorCode::ApplicationBase);
    }

    #[test]
    fn test_error_code_mapping() {
        let err = CommError::RequestTimeout(Duration::from_millis(200));
        assert_eq!(err.error_code(), ErrorCode::RequestTimeout);

        let err = CommError::ServerNotFound("1:play-1".to_string());
        assert_eq!(err.error_code(), ErrorCode::ServerNotFound);

        let err = CommError::InvalidMessage("payload too large".to_string());
        assert_eq!(err.error_code(), ErrorCode::InvalidMessage);
    }

    #[test]
    fn test_transient_and_fatal_predicates() {
        let overflow = CommError::BufferOverflow {
            peer: "2:api-1".to_string(),
        };
        assert!(overflow.is_transient());
        assert!(!overflow.is_fatal());

        let config = CommError::Config("server_id must not be empty".to_string());
        assert!(config.is_fatal());
        assert_eq!(config.exit_code(), 1);

        let bind = CommError::Bind {
            endpoint: "0.0.0.0:7000".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::AddrInUse),
        };
        assert!(bind.is_fatal());
        assert_eq!(bind.exit_code(), 2);
    }
}
