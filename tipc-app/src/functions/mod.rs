//! The procedure catalog.
//!
//! Each submodule declares its procedures as marker types (imported by the
//! renderer façade too) and registers handlers for them. Paths follow the
//! `namespace.name` layout the renderer sees: `window.open`,
//! `counter.subscribe`, `system.getInfo`, ...

pub mod counter;
pub mod logger;
pub mod system;
pub mod window;

use std::sync::Arc;

use tipc_core::Router;

use crate::state::AppState;

/// Build the full catalog against `state`.
pub fn router(state: &Arc<AppState>) -> tipc_core::Result<Router> {
    let builder = Router::builder();
    let builder = window::register(builder, state);
    let builder = logger::register(builder);
    let builder = counter::register(builder, state);
    let builder = system::register(builder, state);
    builder.build()
}

#[cfg(test)]
pub(crate) mod testing {
    //! A running shell with two renderer windows, for catalog tests.

    use tipc_core::WindowId;

    use crate::renderer::Api;
    use crate::settings::AppSettings;
    use crate::state::Shell;

    pub struct TestShell {
        pub shell: Shell,
        pub a: (WindowId, Api),
        pub b: (WindowId, Api),
    }

    pub fn start() -> TestShell {
        let shell = Shell::start(&AppSettings::default()).expect("shell starts");
        let a = shell.open_window("/").expect("window a opens");
        let b = shell.open_window("/second").expect("window b opens");
        let api_a = shell.renderer(a).expect("window a open");
        let api_b = shell.renderer(b).expect("window b open");
        TestShell {
            shell,
            a: (a, api_a),
            b: (b, api_b),
        }
    }

    /// Poll `check` until it holds or a second passes.
    pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
        for _ in 0..200 {
            if check() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
        panic!("timed out waiting for: {what}");
    }
}
