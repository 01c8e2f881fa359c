//! Renderer-side façade mirroring the catalog's shape.
//!
//! `api.counter().increment()`, `api.window().close()`, ... Every method is a
//! thin wrapper over `Client` using the same marker types the catalog
//! registers, so a renamed path or changed payload breaks both sides at
//! compile time.

use tipc_core::{Client, Result, Subscription};

use crate::functions::{counter, logger, system, window};
use crate::windows::WindowInfo;

#[derive(Clone, Debug)]
pub struct Api {
    client: Client,
}

impl Api {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn window(&self) -> WindowApi<'_> {
        WindowApi {
            client: &self.client,
        }
    }

    pub fn logger(&self) -> LoggerApi<'_> {
        LoggerApi {
            client: &self.client,
        }
    }

    pub fn counter(&self) -> CounterApi<'_> {
        CounterApi {
            client: &self.client,
        }
    }

    pub fn system(&self) -> SystemApi<'_> {
        SystemApi {
            client: &self.client,
        }
    }
}

pub struct WindowApi<'a> {
    client: &'a Client,
}

impl WindowApi<'_> {
    pub async fn open(&self, route: &str) -> Result<window::OpenResult> {
        self.client.invoke::<window::Open>(route.to_string()).await
    }

    pub async fn get_info(&self) -> Result<WindowInfo> {
        self.client.invoke::<window::GetInfo>(()).await
    }

    pub fn maximize(&self) {
        self.client.emit::<window::Maximize>(());
    }

    pub fn minimize(&self) {
        self.client.emit::<window::Minimize>(());
    }

    pub fn close(&self) {
        self.client.emit::<window::Close>(());
    }
}

pub struct LoggerApi<'a> {
    client: &'a Client,
}

impl LoggerApi<'_> {
    pub fn info(&self, message: impl Into<String>) {
        self.client.emit::<logger::Info>(message.into());
    }

    pub fn error(&self, message: impl Into<String>) {
        self.client.emit::<logger::Error>(message.into());
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.client.emit::<logger::Warn>(message.into());
    }
}

pub struct CounterApi<'a> {
    client: &'a Client,
}

impl CounterApi<'_> {
    /// `on_change` sees every value published after this call.
    pub fn subscribe<F>(&self, on_change: F) -> Subscription
    where
        F: FnMut(i64) + Send + 'static,
    {
        self.client.subscribe::<counter::Subscribe, _>(on_change)
    }

    pub async fn get(&self) -> Result<i64> {
        self.client.invoke::<counter::Get>(()).await
    }

    pub async fn increment(&self) -> Result<i64> {
        self.client.invoke::<counter::Increment>(()).await
    }

    pub async fn decrement(&self) -> Result<i64> {
        self.client.invoke::<counter::Decrement>(()).await
    }

    pub async fn set(&self, value: i64) -> Result<i64> {
        self.client.invoke::<counter::Set>(value).await
    }

    pub fn reset(&self) {
        self.client.emit::<counter::Reset>(());
    }
}

pub struct SystemApi<'a> {
    client: &'a Client,
}

impl SystemApi<'_> {
    pub async fn get_info(&self) -> Result<system::SystemInfo> {
        self.client.invoke::<system::GetInfo>(()).await
    }

    pub async fn get_app_info(&self) -> Result<system::AppInfo> {
        self.client.invoke::<system::GetAppInfo>(()).await
    }
}
