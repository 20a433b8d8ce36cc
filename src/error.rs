//! Error types for the session adapter

use crate::decoder::DecodeError;
use thiserror::Error;

/// Status code returned by boundary calls on success
pub const STATUS_OK: i32 = 0;
/// Null or malformed argument, stale handle, consumed builder
pub const STATUS_INVALID_ARGUMENT: i32 = -1;
/// Operation not allowed in the session's current state
pub const STATUS_INVALID_STATE: i32 = -2;
/// Configuration, connection or engine failure
pub const STATUS_ENGINE: i32 = -3;
/// A panic or other unanticipated failure was caught at the boundary
pub const STATUS_INTERNAL: i32 = -4;

/// Errors raised by a streaming engine
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("gateway error: {0}")]
    Gateway(String),

    #[error("malformed record: {0}")]
    Decode(#[from] DecodeError),

    #[error("delivery loop is already started")]
    AlreadyStarted,
}

pub type EngineResult<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the public session API and converted at the C boundary
#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("{0} pointer is null")]
    NullArgument(&'static str),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid or already freed {0} handle")]
    InvalidHandle(&'static str),

    #[error("builder has already been consumed")]
    BuilderConsumed,

    #[error("session is already running")]
    AlreadyRunning,

    #[error("session has faulted; it can only be released")]
    Faulted,

    #[error("cannot {0} while the delivery loop is active")]
    LoopActive(&'static str),

    #[error("cannot {0}: no subscriptions have been registered")]
    NoSubscriptions(&'static str),

    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("unexpected error in {op}: {message}")]
    Internal { op: &'static str, message: String },
}

impl BridgeError {
    /// Negative status code for the C boundary
    pub fn status_code(&self) -> i32 {
        match self {
            BridgeError::NullArgument(_)
            | BridgeError::InvalidArgument(_)
            | BridgeError::InvalidHandle(_)
            | BridgeError::BuilderConsumed => STATUS_INVALID_ARGUMENT,
            BridgeError::AlreadyRunning
            | BridgeError::Faulted
            | BridgeError::LoopActive(_)
            | BridgeError::NoSubscriptions(_) => STATUS_INVALID_STATE,
            BridgeError::Config(_) | BridgeError::Engine(_) => STATUS_ENGINE,
            BridgeError::Internal { .. } => STATUS_INTERNAL,
        }
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Failure while routing a single record. Never leaves the delivery loop.
#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes_by_category() {
        assert_eq!(BridgeError::NullArgument("builder").status_code(), STATUS_INVALID_ARGUMENT);
        assert_eq!(BridgeError::BuilderConsumed.status_code(), STATUS_INVALID_ARGUMENT);
        assert_eq!(BridgeError::AlreadyRunning.status_code(), STATUS_INVALID_STATE);
        assert_eq!(
            BridgeError::Engine(EngineError::AlreadyStarted).status_code(),
            STATUS_ENGINE
        );
        let internal = BridgeError::Internal { op: "fb_session_start", message: "boom".into() };
        assert_eq!(internal.status_code(), STATUS_INTERNAL);
        assert_eq!(internal.to_string(), "unexpected error in fb_session_start: boom");
    }

    #[test]
    fn test_messages() {
        assert_eq!(BridgeError::NullArgument("api_key").to_string(), "api_key pointer is null");
        assert_eq!(
            BridgeError::NoSubscriptions("resubscribe").to_string(),
            "cannot resubscribe: no subscriptions have been registered"
        );
    }
}
