//! Simulated window manager.
//!
//! A "window" here is a record (url, bounds, state flags) plus a channel pair
//! on the `IpcBus` and the renderer-side `Client` bound to it. Closing a
//! window detaches it from the bus, which tells the dispatcher to dispose the
//! window's subscriptions.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tipc_core::{Client, ClientConfig, IpcBus, WindowId};
use tracing::{debug, info};

const DEFAULT_WIDTH: u32 = 800;
const DEFAULT_HEIGHT: u32 = 600;
const CASCADE_STEP: i32 = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Snapshot returned by `window.getInfo`.
///
/// Only `id` is present when the window is already gone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WindowInfo {
    pub id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bounds: Option<Bounds>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_maximized: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_minimized: Option<bool>,
}

struct WindowRecord {
    url: String,
    bounds: Bounds,
    maximized: bool,
    minimized: bool,
    client: Client,
}

pub struct WindowManager {
    bus: IpcBus,
    client_config: ClientConfig,
    next_id: AtomicU32,
    windows: RwLock<BTreeMap<WindowId, WindowRecord>>,
}

impl WindowManager {
    pub fn new(bus: IpcBus, client_config: ClientConfig) -> Self {
        Self {
            bus,
            client_config,
            next_id: AtomicU32::new(1),
            windows: RwLock::new(BTreeMap::new()),
        }
    }

    /// Create a window loading `url` and attach its renderer to the bus.
    ///
    /// Spawns the renderer's reply reader; call inside a Tokio runtime.
    pub fn open(&self, url: impl Into<String>) -> tipc_core::Result<WindowId> {
        let id = WindowId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let url = url.into();
        let (port, inbox) = self.bus.attach(id)?;
        let client = Client::connect(port, inbox, self.client_config.clone());

        let mut windows = self.windows.write();
        let offset = CASCADE_STEP * windows.len() as i32;
        let bounds = Bounds {
            x: offset,
            y: offset,
            width: DEFAULT_WIDTH,
            height: DEFAULT_HEIGHT,
        };
        windows.insert(
            id,
            WindowRecord {
                url: url.clone(),
                bounds,
                maximized: false,
                minimized: false,
                client,
            },
        );
        info!(window = %id, url = %url, "window opened");
        Ok(id)
    }

    /// Destroy `id`. Returns `false` if it was already gone.
    pub fn close(&self, id: WindowId) -> bool {
        let removed = self.windows.write().remove(&id);
        if removed.is_none() {
            debug!(window = %id, "close for unknown window ignored");
            return false;
        }
        self.bus.detach(id);
        info!(window = %id, "window closed");
        true
    }

    pub fn close_all(&self) -> usize {
        let ids = self.ids();
        ids.iter().filter(|id| self.close(**id)).count()
    }

    pub fn maximize(&self, id: WindowId) -> bool {
        self.with_record(id, |w| {
            w.maximized = true;
            w.minimized = false;
        })
    }

    pub fn minimize(&self, id: WindowId) -> bool {
        self.with_record(id, |w| w.minimized = true)
    }

    pub fn info(&self, id: WindowId) -> WindowInfo {
        match self.windows.read().get(&id) {
            Some(w) => WindowInfo {
                id: id.0,
                bounds: Some(w.bounds),
                is_maximized: Some(w.maximized),
                is_minimized: Some(w.minimized),
            },
            None => WindowInfo {
                id: id.0,
                bounds: None,
                is_maximized: None,
                is_minimized: None,
            },
        }
    }

    pub fn url(&self, id: WindowId) -> Option<String> {
        self.windows.read().get(&id).map(|w| w.url.clone())
    }

    /// The renderer-side client of `id`.
    pub fn client(&self, id: WindowId) -> Option<Client> {
        self.windows.read().get(&id).map(|w| w.client.clone())
    }

    pub fn ids(&self) -> Vec<WindowId> {
        self.windows.read().keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.windows.read().len()
    }

    pub fn is_open(&self, id: WindowId) -> bool {
        self.windows.read().contains_key(&id)
    }

    fn with_record(&self, id: WindowId, f: impl FnOnce(&mut WindowRecord)) -> bool {
        match self.windows.write().get_mut(&id) {
            Some(record) => {
                f(record);
                debug!(window = %id, maximized = record.maximized, minimized = record.minimized, "window state changed");
                true
            }
            None => false,
        }
    }
}
