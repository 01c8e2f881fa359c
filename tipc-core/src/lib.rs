//! # tipc-core
//!
//! Typed IPC bridge between a privileged process and its renderer windows.
//!
//! ## Architecture
//!
//! ```text
//! Client::invoke/emit/subscribe ──► WindowPort ──JSON──► MainInbox
//!                                                           │
//!                                                   Dispatcher::handle
//!                                                    │            │
//!                                        Router::resolve    SubscriptionManager
//!                                         (in-loop futures)  (forwarder task)
//!                                                    │            │
//!                          Client reader ◄──JSON── IpcBus::send(window, …)
//! ```
//!
//! Three calling conventions share the one channel: Query (request/response),
//! Notify (fire-and-forget) and Stream (subscription). Procedures are declared
//! once as marker types (`procedure`), so the registry and the client agree
//! on argument and result types at compile time.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod client;
pub mod config;
pub mod context;
pub mod dispatcher;
pub mod error;
pub mod ipc;
pub mod procedure;
pub mod registry;
pub mod subscriptions;
pub mod transport;
pub mod value;

// Convenience re-exports for downstream crates
pub use client::{Client, Subscription};
pub use config::{ClientConfig, DispatcherConfig};
pub use context::{CallContext, WindowId};
pub use dispatcher::{DispatchSnapshot, Dispatcher};
pub use error::{Result, TipcError};
pub use ipc::envelope::{Convention, Envelope, ErrorCode, WireError};
pub use procedure::{NotifyProcedure, QueryProcedure, StreamProcedure};
pub use registry::{Router, RouterBuilder};
pub use subscriptions::SubscriptionManager;
pub use transport::{Inbound, IpcBus, MainLink, Transport};
pub use value::SharedValue;
