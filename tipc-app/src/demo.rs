//! Scripted walk through the catalog, as a renderer would drive it.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Context};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::renderer::Api;
use crate::state::Shell;

#[derive(Debug, Clone)]
pub struct DemoOptions {
    /// Renderer windows opened at startup (at least one).
    pub windows: usize,
    /// How long subscriptions stay open, and the pause between maximize and
    /// minimize.
    pub linger: Duration,
}

/// What the run observed.
#[derive(Debug, Clone, PartialEq)]
pub struct DemoReport {
    pub windows_opened: usize,
    pub final_counter: i64,
    /// Counter values pushed to each window, in window order.
    pub pushes: Vec<Vec<i64>>,
    pub windows_left: usize,
}

type Pushes = Arc<Mutex<Vec<i64>>>;

pub async fn run(shell: &Shell, options: &DemoOptions) -> anyhow::Result<DemoReport> {
    let mut apis = Vec::new();
    for n in 0..options.windows.max(1) {
        let id = shell
            .open_window(&format!("/window/{n}"))
            .context("opening startup window")?;
        let api = shell
            .renderer(id)
            .with_context(|| format!("window {id} closed before the demo started"))?;
        apis.push(api);
    }
    let main = &apis[0];
    let pushes: Vec<Pushes> = apis.iter().map(|_| Pushes::default()).collect();

    if let Err(e) = ipc_demo(shell, &apis, &pushes, options.linger).await {
        warn!("ipc demo failed: {e:#}");
        main.logger().error(format!("ipc demo failed: {e}"));
        return Err(e);
    }

    let last = &apis[apis.len() - 1];
    window_control_demo(last, options.linger).await?;

    let final_counter = main.counter().get().await.context("counter.get")?;

    if let Some(second) = apis.get(1) {
        info!(window = %second.client().window(), "second window closes itself");
        second.window().close();
        let state = shell.state();
        wait_for(|| !state.windows.is_open(second.client().window())).await;
    }

    Ok(DemoReport {
        windows_opened: apis.len(),
        final_counter,
        pushes: pushes.iter().map(|p| p.lock().clone()).collect(),
        windows_left: shell.state().windows.len(),
    })
}

async fn ipc_demo(
    shell: &Shell,
    apis: &[Api],
    pushes: &[Pushes],
    linger: Duration,
) -> anyhow::Result<()> {
    let main = &apis[0];

    let system = main.system().get_info().await.context("system.getInfo")?;
    info!(?system, "system info");
    let app = main.system().get_app_info().await.context("system.getAppInfo")?;
    info!(?app, "app info");
    let window = main.window().get_info().await.context("window.getInfo")?;
    info!(?window, "window info");

    main.logger().info("shell started");
    main.logger().warn("this is a warning");

    let current = main.counter().get().await.context("counter.get")?;
    info!(current, "counter value");

    let subscriptions: Vec<_> = apis
        .iter()
        .zip(pushes)
        .map(|(api, seen)| {
            let window = api.client().window();
            let seen = Arc::clone(seen);
            api.counter().subscribe(move |count| {
                info!(window = %window, count, "counter changed");
                seen.lock().push(count);
            })
        })
        .collect();
    let subs = shell.dispatcher().subscriptions();
    wait_for(|| subs.active_count() >= apis.len()).await;

    main.counter().increment().await.context("counter.increment")?;
    main.counter().increment().await.context("counter.increment")?;
    main.counter().decrement().await.context("counter.decrement")?;
    main.counter().reset();

    tokio::time::sleep(linger).await;
    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    info!(count = subscriptions.len(), "unsubscribed");

    let after = main.counter().get().await.context("counter.get")?;
    ensure!(after == 0, "counter should be reset, found {after}");
    Ok(())
}

async fn window_control_demo(api: &Api, linger: Duration) -> anyhow::Result<()> {
    let info = api.window().get_info().await.context("window.getInfo")?;
    info!(?info, "current window");

    api.window().maximize();
    tokio::time::sleep(linger).await;
    api.window().minimize();

    let info = api.window().get_info().await.context("window.getInfo")?;
    info!(?info, "window after maximize/minimize");
    Ok(())
}

async fn wait_for(mut ready: impl FnMut() -> bool) {
    for _ in 0..200 {
        if ready() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    warn!("condition not reached; continuing");
}
