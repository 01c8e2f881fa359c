//! `system.*`: host and application facts.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use sysinfo::System;
use tipc_core::{QueryProcedure, RouterBuilder};

use crate::state::AppState;

pub struct GetInfo;
impl QueryProcedure for GetInfo {
    const PATH: &'static str = "system.getInfo";
    type Args = ();
    type Output = SystemInfo;
}

pub struct GetAppInfo;
impl QueryProcedure for GetAppInfo {
    const PATH: &'static str = "system.getAppInfo";
    type Args = ();
    type Output = AppInfo;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemInfo {
    pub platform: String,
    pub arch: String,
    /// Kernel release.
    pub version: String,
    pub cpus: usize,
    pub memory: MemoryInfo,
}

/// Bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    pub total: u64,
    pub free: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInfo {
    pub name: String,
    pub version: String,
    pub path: String,
}

pub fn register(builder: RouterBuilder, state: &Arc<AppState>) -> RouterBuilder {
    let app_state = Arc::clone(state);
    builder
        .query::<GetInfo, _, _>(|(), _ctx| system_info())
        .query::<GetAppInfo, _, _>(move |(), _ctx| app_info(Arc::clone(&app_state)))
}

async fn system_info() -> anyhow::Result<SystemInfo> {
    // sysinfo reads block.
    let info = tokio::task::spawn_blocking(|| {
        let mut sys = System::new();
        sys.refresh_memory();
        sys.refresh_cpu_all();
        SystemInfo {
            platform: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            version: System::kernel_version().unwrap_or_else(|| "unknown".into()),
            cpus: sys.cpus().len(),
            memory: MemoryInfo {
                total: sys.total_memory(),
                free: sys.free_memory(),
            },
        }
    })
    .await?;
    Ok(info)
}

async fn app_info(state: Arc<AppState>) -> anyhow::Result<AppInfo> {
    Ok(AppInfo {
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        path: state.app_path.display().to_string(),
    })
}
