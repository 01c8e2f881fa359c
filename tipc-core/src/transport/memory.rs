//! In-process channel pairs standing in for the platform's per-window IPC.
//!
//! ```text
//! WindowPort ──JSON──► main mpsc ──► MainInbox  (Stream<Item = Inbound>)
//!                                        │
//! WindowInbox ◄──JSON── window mpsc ◄── IpcBus::send(target, …)
//! ```
//!
//! Every envelope is encoded to a JSON string on send and decoded on receipt,
//! so only serializable values ever cross. Each window gets its own FIFO
//! channel; there is no ordering across windows.

use std::collections::hash_map::{Entry, HashMap};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{ready, Stream};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::{Inbound, MainLink, Transport};
use crate::context::WindowId;
use crate::error::{Result, TipcError};
use crate::ipc::envelope::Envelope;

enum MainFrame {
    Message { sender: WindowId, frame: String },
    Closed(WindowId),
}

struct Attachment {
    generation: u64,
    tx: mpsc::UnboundedSender<String>,
}

struct BusInner {
    main_tx: mpsc::UnboundedSender<MainFrame>,
    windows: RwLock<HashMap<WindowId, Attachment>>,
    generations: AtomicU64,
}

/// Privileged-side handle to every window channel.
///
/// Cheap to clone; all clones address the same set of windows.
#[derive(Clone)]
pub struct IpcBus {
    inner: Arc<BusInner>,
}

impl IpcBus {
    /// Create a bus and the inbound stream the dispatcher reads from.
    pub fn new() -> (Self, MainInbox) {
        let (main_tx, main_rx) = mpsc::unbounded_channel();
        let bus = Self {
            inner: Arc::new(BusInner {
                main_tx,
                windows: RwLock::new(HashMap::new()),
                generations: AtomicU64::new(0),
            }),
        };
        (bus, MainInbox { rx: main_rx })
    }

    /// Open the channel pair for `window`.
    ///
    /// An id stays taken until it is detached. Subscriptions are keyed by
    /// window id, so handing a live id to a second pair would route the
    /// first window's pushes into it.
    pub fn attach(&self, window: WindowId) -> Result<(WindowPort, WindowInbox)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let generation = self.inner.generations.fetch_add(1, Ordering::Relaxed);
        match self.inner.windows.write().entry(window) {
            Entry::Occupied(_) => {
                warn!(window = %window, "attach refused; window already attached");
                return Err(TipcError::WindowAttached { window });
            }
            Entry::Vacant(slot) => {
                slot.insert(Attachment { generation, tx });
            }
        }
        debug!(window = %window, generation, "window attached");

        let port = WindowPort {
            window,
            generation,
            inner: Arc::clone(&self.inner),
        };
        Ok((port, WindowInbox { window, rx }))
    }

    /// Tear down the channel pair for `window` and tell the privileged side.
    ///
    /// Returns `false` if the window was not attached.
    pub fn detach(&self, window: WindowId) -> bool {
        if self.inner.windows.write().remove(&window).is_none() {
            return false;
        }
        info!(window = %window, "window detached");
        // Inbox already gone means the dispatcher stopped; nothing to notify.
        let _ = self.inner.main_tx.send(MainFrame::Closed(window));
        true
    }

    pub fn is_attached(&self, window: WindowId) -> bool {
        self.inner.windows.read().contains_key(&window)
    }

    /// Currently attached windows, sorted.
    pub fn windows(&self) -> Vec<WindowId> {
        let mut ids: Vec<WindowId> = self.inner.windows.read().keys().copied().collect();
        ids.sort();
        ids
    }
}

impl Transport for IpcBus {
    fn send(&self, target: WindowId, envelope: &Envelope) -> Result<()> {
        let frame = envelope.encode()?;
        let windows = self.inner.windows.read();
        let attachment = windows
            .get(&target)
            .ok_or(TipcError::TransportUnavailable { window: target })?;
        attachment
            .tx
            .send(frame)
            .map_err(|_| TipcError::TransportUnavailable { window: target })
    }
}

impl std::fmt::Debug for IpcBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IpcBus")
            .field("windows", &self.windows())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Renderer side
// ---------------------------------------------------------------------------

/// A window's sending half towards the privileged process.
pub struct WindowPort {
    window: WindowId,
    generation: u64,
    inner: Arc<BusInner>,
}

impl WindowPort {
    fn is_current(&self) -> bool {
        self.inner
            .windows
            .read()
            .get(&self.window)
            .is_some_and(|a| a.generation == self.generation)
    }

    #[cfg(test)]
    pub(crate) fn send_frame(&self, frame: &str) {
        let _ = self.inner.main_tx.send(MainFrame::Message {
            sender: self.window,
            frame: frame.to_string(),
        });
    }
}

impl std::fmt::Debug for WindowPort {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowPort")
            .field("window", &self.window)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl MainLink for WindowPort {
    fn window(&self) -> WindowId {
        self.window
    }

    fn send(&self, envelope: &Envelope) -> Result<()> {
        let unavailable = || TipcError::TransportUnavailable {
            window: self.window,
        };
        if !self.is_current() {
            return Err(unavailable());
        }
        let frame = envelope.encode()?;
        self.inner
            .main_tx
            .send(MainFrame::Message {
                sender: self.window,
                frame,
            })
            .map_err(|_| unavailable())
    }
}

/// Envelopes addressed to one window. Ends when the window is detached.
pub struct WindowInbox {
    window: WindowId,
    rx: mpsc::UnboundedReceiver<String>,
}

impl WindowInbox {
    pub fn window(&self) -> WindowId {
        self.window
    }
}

impl std::fmt::Debug for WindowInbox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WindowInbox")
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

impl Stream for WindowInbox {
    type Item = Envelope;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Envelope>> {
        let this = self.get_mut();
        loop {
            let Some(frame) = ready!(this.rx.poll_recv(cx)) else {
                return Poll::Ready(None);
            };
            match Envelope::decode(&frame) {
                Ok(envelope) => return Poll::Ready(Some(envelope)),
                Err(e) => warn!(window = %this.window, "discarding undecodable frame: {e}"),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Privileged side
// ---------------------------------------------------------------------------

/// Everything the renderers send, in per-window FIFO order.
///
/// Undecodable frames are logged and skipped.
pub struct MainInbox {
    rx: mpsc::UnboundedReceiver<MainFrame>,
}

impl Stream for MainInbox {
    type Item = Inbound;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Inbound>> {
        let this = self.get_mut();
        loop {
            match ready!(this.rx.poll_recv(cx)) {
                None => return Poll::Ready(None),
                Some(MainFrame::Closed(window)) => {
                    return Poll::Ready(Some(Inbound::WindowClosed(window)))
                }
                Some(MainFrame::Message { sender, frame }) => match Envelope::decode(&frame) {
                    Ok(envelope) => return Poll::Ready(Some(Inbound::Message { sender, envelope })),
                    Err(e) => warn!(window = %sender, "discarding undecodable frame: {e}"),
                },
            }
        }
    }
}
