//! Wire envelopes exchanged between renderer windows and the privileged process.
//!
//! Every envelope travels as one JSON object on the single `"tipc"` channel
//! of a window's channel pair. The `kind` tag selects the variant:
//!
//! | kind | direction | shape |
//! |------|-----------|-------|
//! | `call` | renderer → main | `{ path, convention, correlationId, args }` |
//! | `result` | main → renderer | `{ correlationId, payload }` |
//! | `error` | main → renderer | `{ correlationId, error: { message, code? } }` |
//! | `push` | main → renderer | `{ correlationId, payload }` |
//! | `complete` | main → renderer | `{ correlationId }` |
//! | `unsubscribe` | renderer → main | `{ correlationId }` |

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

// ---------------------------------------------------------------------------
// Calling conventions
// ---------------------------------------------------------------------------

/// How a procedure is called and answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Convention {
    /// Request/response: exactly one `result` or `error` per call.
    Query,
    /// Fire-and-forget: no reply is ever sent.
    Notify,
    /// Subscription: zero or more `push` envelopes until unsubscribed.
    Stream,
}

impl fmt::Display for Convention {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Convention::Query => "query",
            Convention::Notify => "notify",
            Convention::Stream => "stream",
        })
    }
}

// ---------------------------------------------------------------------------
// Errors on the wire
// ---------------------------------------------------------------------------

/// Classification attached to `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    UnknownProcedure,
    ConventionMismatch,
    InvalidArgs,
    HandlerFailure,
}

/// Payload of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<ErrorCode>,
}

impl fmt::Display for WireError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// One message on the tipc channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum Envelope {
    Call {
        path: String,
        convention: Convention,
        correlation_id: String,
        #[serde(default)]
        args: Value,
    },
    Result {
        correlation_id: String,
        #[serde(default)]
        payload: Value,
    },
    Error {
        correlation_id: String,
        error: WireError,
    },
    Push {
        correlation_id: String,
        #[serde(default)]
        payload: Value,
    },
    Complete {
        correlation_id: String,
    },
    Unsubscribe {
        correlation_id: String,
    },
}

impl Envelope {
    pub fn correlation_id(&self) -> &str {
        match self {
            Envelope::Call { correlation_id, .. }
            | Envelope::Result { correlation_id, .. }
            | Envelope::Error { correlation_id, .. }
            | Envelope::Push { correlation_id, .. }
            | Envelope::Complete { correlation_id }
            | Envelope::Unsubscribe { correlation_id } => correlation_id,
        }
    }

    /// The `kind` tag as it appears on the wire.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Call { .. } => "call",
            Envelope::Result { .. } => "result",
            Envelope::Error { .. } => "error",
            Envelope::Push { .. } => "push",
            Envelope::Complete { .. } => "complete",
            Envelope::Unsubscribe { .. } => "unsubscribe",
        }
    }

    pub fn encode(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn decode(frame: &str) -> Result<Self> {
        Ok(serde_json::from_str(frame)?)
    }
}
