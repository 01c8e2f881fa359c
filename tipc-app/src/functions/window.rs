//! `window.*`: window control, always relative to the calling window.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tipc_core::{CallContext, NotifyProcedure, QueryProcedure, RouterBuilder};
use tracing::debug;

use crate::state::AppState;
use crate::windows::WindowInfo;

pub struct Open;
impl QueryProcedure for Open {
    const PATH: &'static str = "window.open";
    /// Route appended after `#` in the dev server URL.
    type Args = String;
    type Output = OpenResult;
}

pub struct GetInfo;
impl QueryProcedure for GetInfo {
    const PATH: &'static str = "window.getInfo";
    type Args = ();
    type Output = WindowInfo;
}

pub struct Maximize;
impl NotifyProcedure for Maximize {
    const PATH: &'static str = "window.maximize";
    type Args = ();
}

pub struct Minimize;
impl NotifyProcedure for Minimize {
    const PATH: &'static str = "window.minimize";
    type Args = ();
}

pub struct Close;
impl NotifyProcedure for Close {
    const PATH: &'static str = "window.close";
    type Args = ();
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OpenResult {
    pub success: bool,
    pub window_id: u32,
}

pub fn register(builder: RouterBuilder, state: &Arc<AppState>) -> RouterBuilder {
    let (open_s, info_s, max_s, min_s, close_s) = (
        Arc::clone(state),
        Arc::clone(state),
        Arc::clone(state),
        Arc::clone(state),
        Arc::clone(state),
    );
    builder
        .query::<Open, _, _>(move |route, ctx| open(Arc::clone(&open_s), route, ctx))
        .query::<GetInfo, _, _>(move |(), ctx| get_info(Arc::clone(&info_s), ctx))
        .notify::<Maximize, _, _>(move |(), ctx| maximize(Arc::clone(&max_s), ctx))
        .notify::<Minimize, _, _>(move |(), ctx| minimize(Arc::clone(&min_s), ctx))
        .notify::<Close, _, _>(move |(), ctx| close(Arc::clone(&close_s), ctx))
}

async fn open(state: Arc<AppState>, route: String, ctx: CallContext) -> anyhow::Result<OpenResult> {
    let id = state.windows.open(state.route_url(&route))?;
    debug!(opener = %ctx.sender, window = %id, "window opened from renderer");
    Ok(OpenResult {
        success: true,
        window_id: id.0,
    })
}

async fn get_info(state: Arc<AppState>, ctx: CallContext) -> anyhow::Result<WindowInfo> {
    Ok(state.windows.info(ctx.sender))
}

// A window that is already gone makes these no-ops.

async fn maximize(state: Arc<AppState>, ctx: CallContext) -> anyhow::Result<()> {
    state.windows.maximize(ctx.sender);
    Ok(())
}

async fn minimize(state: Arc<AppState>, ctx: CallContext) -> anyhow::Result<()> {
    state.windows.minimize(ctx.sender);
    Ok(())
}

async fn close(state: Arc<AppState>, ctx: CallContext) -> anyhow::Result<()> {
    state.windows.close(ctx.sender);
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::functions::testing::{self, eventually};

    #[tokio::test]
    async fn get_info_describes_the_calling_window() {
        let t = testing::start();
        let (a, api_a) = &t.a;
        let (b, api_b) = &t.b;

        let info_a = api_a.window().get_info().await.expect("info a");
        let info_b = api_b.window().get_info().await.expect("info b");
        assert_eq!(info_a.id, a.0);
        assert_eq!(info_b.id, b.0);
        assert_ne!(info_a.bounds, info_b.bounds, "windows cascade");
        t.shell.shutdown().await;
    }

    #[tokio::test]
    async fn maximize_affects_only_the_caller() {
        let t = testing::start();
        let (a, api_a) = &t.a;
        let (b, _) = &t.b;

        api_a.window().maximize();
        let windows = &t.shell.state().windows;
        eventually("a maximized", || windows.info(*a).is_maximized == Some(true)).await;
        assert_eq!(windows.info(*b).is_maximized, Some(false));
        t.shell.shutdown().await;
    }

    #[tokio::test]
    async fn close_from_one_window_never_closes_another() {
        let t = testing::start();
        let (a, api_a) = &t.a;
        let (b, api_b) = &t.b;

        api_a.window().close();
        let windows = &t.shell.state().windows;
        eventually("a closed", || !windows.is_open(*a)).await;
        assert!(windows.is_open(*b));
        assert_eq!(api_b.counter().get().await.expect("b still served"), 0);
        t.shell.shutdown().await;
    }

    #[tokio::test]
    async fn open_loads_route_from_dev_server() {
        let t = testing::start();
        let (_, api_a) = &t.a;

        let opened = api_a.window().open("/settings").await.expect("open");
        assert!(opened.success);
        let id = tipc_core::WindowId(opened.window_id);
        assert_eq!(
            t.shell.state().windows.url(id).as_deref(),
            Some("http://localhost:7777/#/settings")
        );
        assert!(t.shell.renderer(id).is_some());
        t.shell.shutdown().await;
    }
}
