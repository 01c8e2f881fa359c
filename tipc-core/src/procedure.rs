//! Compile-time procedure definitions shared by both sides of the bridge.
//!
//! A procedure is declared once as a marker type. The privileged side
//! registers a handler against it (`RouterBuilder::query::<P, _, _>`) and the
//! renderer calls it (`Client::invoke::<P>`), so argument and result types
//! are checked by the compiler at both ends.
//!
//! ```ignore
//! pub struct Set;
//!
//! impl QueryProcedure for Set {
//!     const PATH: &'static str = "counter.set";
//!     type Args = i64;
//!     type Output = i64;
//! }
//! ```

use serde::{de::DeserializeOwned, Serialize};

/// Request/response procedure.
pub trait QueryProcedure: 'static {
    /// Dotted path, e.g. `"counter.get"`.
    const PATH: &'static str;
    type Args: Serialize + DeserializeOwned + Send + 'static;
    type Output: Serialize + DeserializeOwned + Send + 'static;
}

/// Fire-and-forget procedure.
pub trait NotifyProcedure: 'static {
    const PATH: &'static str;
    type Args: Serialize + DeserializeOwned + Send + 'static;
}

/// Subscription procedure producing a stream of `Item`s.
pub trait StreamProcedure: 'static {
    const PATH: &'static str;
    type Item: Serialize + DeserializeOwned + Send + 'static;
}
