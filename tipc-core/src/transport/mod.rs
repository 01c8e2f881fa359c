//! Transport adapter: uniform view of the per-window channel pairs.
//!
//! The privileged side sees one `Transport` that can address any window and
//! one inbound stream of `Inbound` items. Each renderer sees a `MainLink`
//! bound to its own window. Implementations must not block in `send`; the
//! subscription forwarder calls it while holding its table lock.

pub mod memory;

use crate::context::WindowId;
use crate::error::Result;
use crate::ipc::envelope::Envelope;

pub use memory::{IpcBus, MainInbox, WindowInbox, WindowPort};

/// Privileged-side outbound half.
pub trait Transport: Send + Sync + 'static {
    /// Deliver `envelope` to `target`.
    ///
    /// # Errors
    /// `TipcError::TransportUnavailable` when the window is gone.
    fn send(&self, target: WindowId, envelope: &Envelope) -> Result<()>;
}

/// Renderer-side outbound half, bound to one window.
pub trait MainLink: Send + Sync + 'static {
    fn window(&self) -> WindowId;

    /// Deliver `envelope` to the privileged process, tagged with `window()`.
    fn send(&self, envelope: &Envelope) -> Result<()>;
}

/// What the privileged side receives from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// An envelope and the window that sent it.
    Message { sender: WindowId, envelope: Envelope },
    /// The window was destroyed; nothing more will arrive from it.
    WindowClosed(WindowId),
}
