use std::time::Duration;

use thiserror::Error;

use crate::context::WindowId;
use crate::ipc::envelope::{Convention, ErrorCode, WireError};

/// All errors produced by tipc-core.
#[derive(Debug, Error)]
pub enum TipcError {
    #[error("unknown procedure: {path}")]
    UnknownProcedure { path: String },

    #[error("procedure {path} is registered as {registered}, called as {called}")]
    ConventionMismatch {
        path: String,
        registered: Convention,
        called: Convention,
    },

    #[error("invalid arguments for {path}: {reason}")]
    InvalidArgs { path: String, reason: String },

    #[error("handler failed: {0}")]
    HandlerFailure(String),

    #[error("transport unavailable for window {window}")]
    TransportUnavailable { window: WindowId },

    #[error("window {window} is already attached")]
    WindowAttached { window: WindowId },

    #[error("no reply from {path} within {after:?}")]
    Timeout { path: String, after: Duration },

    #[error("procedure registered twice: {path}")]
    DuplicateProcedure { path: String },

    #[error("invalid procedure path: {path:?}")]
    InvalidPath { path: String },

    #[error("remote error: {0}")]
    Remote(WireError),

    #[error("envelope codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl TipcError {
    /// Wire classification of this error, if it has one.
    ///
    /// Errors that crossed the boundary keep the code the dispatcher attached.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Self::UnknownProcedure { .. } => Some(ErrorCode::UnknownProcedure),
            Self::ConventionMismatch { .. } => Some(ErrorCode::ConventionMismatch),
            Self::InvalidArgs { .. } => Some(ErrorCode::InvalidArgs),
            Self::HandlerFailure(_) => Some(ErrorCode::HandlerFailure),
            Self::Remote(err) => err.code,
            _ => None,
        }
    }

    /// Serializable form sent inside an `error` envelope.
    pub fn to_wire(&self) -> WireError {
        match self {
            Self::Remote(err) => err.clone(),
            other => WireError {
                message: other.to_string(),
                code: other.code(),
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, TipcError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remote_errors_keep_their_wire_code() {
        let err = TipcError::Remote(WireError {
            message: "unknown procedure: counter.nope".into(),
            code: Some(ErrorCode::UnknownProcedure),
        });
        assert_eq!(err.code(), Some(ErrorCode::UnknownProcedure));
        assert_eq!(err.to_wire().message, "unknown procedure: counter.nope");
    }

    #[test]
    fn local_only_errors_have_no_wire_code() {
        let err = TipcError::TransportUnavailable {
            window: WindowId(3),
        };
        assert_eq!(err.code(), None);
        assert_eq!(err.to_wire().code, None);
        assert!(err.to_string().contains("window 3"));
    }
}
