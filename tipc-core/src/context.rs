//! Window identity and the per-call context handed to every handler.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity of a renderer window (one end of a per-window channel pair).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u32);

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Built fresh for every dispatched call and never stored.
///
/// Handlers address "the caller's window" through `sender` instead of any
/// global lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    /// Window that sent the call envelope.
    pub sender: WindowId,
    /// Correlation id of the call, scoped to `sender`.
    pub correlation_id: String,
    /// Dotted procedure path being invoked.
    pub path: String,
}
