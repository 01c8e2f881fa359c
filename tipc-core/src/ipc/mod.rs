//! Wire types exchanged over the per-window message channel.
//!
//! All types derive `serde::Serialize` + `serde::Deserialize`; the transport
//! moves them as JSON text so nothing but serializable values crosses the
//! process boundary.

pub mod envelope;
