//! Persistent shell settings (JSON file in the app data directory).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tipc_core::{ClientConfig, DispatcherConfig};

pub const DEFAULT_DEV_SERVER_URL: &str = "http://localhost:7777";
pub const DEFAULT_LOG_FILTER: &str = "tipc=info";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
#[serde(default)]
pub struct AppSettings {
    /// Base URL new windows load; the route goes after `#`.
    pub dev_server_url: String,
    /// Renderer query timeout. `0` waits forever.
    pub query_timeout_ms: u64,
    /// Used when `RUST_LOG` is unset.
    pub log_filter: String,
    pub initial_counter: i64,
    pub max_in_flight_queries: usize,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            dev_server_url: DEFAULT_DEV_SERVER_URL.into(),
            query_timeout_ms: 30_000,
            log_filter: DEFAULT_LOG_FILTER.into(),
            initial_counter: 0,
            max_in_flight_queries: 256,
        }
    }
}

impl AppSettings {
    pub fn normalize(&mut self) {
        self.dev_server_url = normalize_dev_server_url(&self.dev_server_url);
        if self.query_timeout_ms != 0 {
            self.query_timeout_ms = self.query_timeout_ms.clamp(100, 600_000);
        }
        let filter = self.log_filter.trim();
        self.log_filter = if filter.is_empty() {
            DEFAULT_LOG_FILTER.into()
        } else {
            filter.into()
        };
        self.max_in_flight_queries = self.max_in_flight_queries.clamp(1, 4096);
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            query_timeout: (self.query_timeout_ms > 0)
                .then(|| Duration::from_millis(self.query_timeout_ms)),
        }
    }

    pub fn dispatcher_config(&self) -> DispatcherConfig {
        DispatcherConfig {
            max_in_flight: self.max_in_flight_queries,
        }
    }
}

pub fn normalize_dev_server_url(raw: &str) -> String {
    let url = raw.trim().trim_end_matches('/');
    if url.is_empty() {
        return DEFAULT_DEV_SERVER_URL.into();
    }
    if url.contains("://") {
        url.into()
    } else {
        format!("http://{url}")
    }
}

pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        std::env::var_os("APPDATA")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("tipc")
            .join("settings.json")
    }
    #[cfg(not(target_os = "windows"))]
    {
        std::env::var_os("XDG_DATA_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|| {
                std::env::var_os("HOME")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from("/tmp"))
                    .join(".local")
                    .join("share")
            })
            .join("tipc")
            .join("settings.json")
    }
}

/// Missing or unreadable files fall back to defaults.
pub fn load_settings(path: &Path) -> AppSettings {
    let mut settings = fs::read_to_string(path)
        .ok()
        .and_then(|raw| serde_json::from_str::<AppSettings>(&raw).ok())
        .unwrap_or_default();
    settings.normalize();
    settings
}

pub fn save_settings(path: &Path, settings: &AppSettings) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_string_pretty(settings).map_err(std::io::Error::other)?;
    fs::write(path, json)
}
