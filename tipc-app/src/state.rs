//! Privileged-side application state.
//!
//! One `AppState` is built per shell and handed to the procedure catalog as
//! an `Arc`; handlers never reach for globals.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use tipc_core::{Dispatcher, DispatchSnapshot, IpcBus, SharedValue, WindowId};
use tokio::task::JoinHandle;
use tracing::info;

use crate::functions;
use crate::renderer::Api;
use crate::settings::AppSettings;
use crate::windows::WindowManager;

pub struct AppState {
    /// Value behind `counter.*`.
    pub counter: SharedValue<i64>,
    pub windows: WindowManager,
    /// Base URL `window.open` loads routes from.
    pub dev_server_url: String,
    /// Reported by `system.getAppInfo`.
    pub app_path: PathBuf,
}

impl AppState {
    pub fn new(bus: IpcBus, settings: &AppSettings) -> Self {
        let app_path = std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from("."));
        Self {
            counter: SharedValue::new(settings.initial_counter),
            windows: WindowManager::new(bus, settings.client_config()),
            dev_server_url: settings.dev_server_url.clone(),
            app_path,
        }
    }

    /// URL a window opened on `route` loads.
    pub fn route_url(&self, route: &str) -> String {
        format!("{}/#{}", self.dev_server_url, route)
    }
}

/// The running privileged side: state, dispatcher and its inbound loop.
pub struct Shell {
    state: Arc<AppState>,
    dispatcher: Arc<Dispatcher>,
    task: JoinHandle<()>,
}

impl Shell {
    /// Build the catalog and start dispatching. Call inside a Tokio runtime.
    pub fn start(settings: &AppSettings) -> anyhow::Result<Self> {
        let (bus, inbox) = IpcBus::new();
        let state = Arc::new(AppState::new(bus.clone(), settings));
        let router = functions::router(&state).context("building procedure catalog")?;
        for (path, convention) in router.procedures() {
            tracing::debug!(path = %path, convention = %convention, "procedure registered");
        }

        let dispatcher = Arc::new(Dispatcher::new(
            Arc::new(router),
            Arc::new(bus),
            settings.dispatcher_config(),
        ));
        let task = dispatcher.spawn(inbox);
        info!("shell started");
        Ok(Self {
            state,
            dispatcher,
            task,
        })
    }

    pub fn state(&self) -> &Arc<AppState> {
        &self.state
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn diagnostics(&self) -> DispatchSnapshot {
        self.dispatcher.diagnostics_snapshot()
    }

    /// Open a window on `route` from the privileged side (startup windows).
    pub fn open_window(&self, route: &str) -> tipc_core::Result<WindowId> {
        self.state.windows.open(self.state.route_url(route))
    }

    /// Renderer-side API of window `id`, if it is still open.
    pub fn renderer(&self, id: WindowId) -> Option<Api> {
        self.state.windows.client(id).map(Api::new)
    }

    /// Close every window and stop the dispatcher.
    pub async fn shutdown(self) {
        let closed = self.state.windows.close_all();
        // The bus outlives the inbox's senders, so the loop never ends on its own.
        self.task.abort();
        let _ = self.task.await;
        self.dispatcher.subscriptions().clear();
        let stats = self.dispatcher.diagnostics_snapshot();
        info!(
            windows_closed = closed,
            calls = stats.calls,
            handler_failures = stats.handler_failures,
            "shell stopped"
        );
    }
}
