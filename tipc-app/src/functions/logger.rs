//! `logger.*`: renderer log lines forwarded into the privileged tracing sink.

use tipc_core::{CallContext, NotifyProcedure, RouterBuilder};
use tracing::{error, info, warn};

pub struct Info;
impl NotifyProcedure for Info {
    const PATH: &'static str = "logger.info";
    type Args = String;
}

pub struct Error;
impl NotifyProcedure for Error {
    const PATH: &'static str = "logger.error";
    type Args = String;
}

pub struct Warn;
impl NotifyProcedure for Warn {
    const PATH: &'static str = "logger.warn";
    type Args = String;
}

const TARGET: &str = "tipc::renderer";

pub fn register(builder: RouterBuilder) -> RouterBuilder {
    builder
        .notify::<Info, _, _>(|message, ctx| log_info(message, ctx))
        .notify::<Error, _, _>(|message, ctx| log_error(message, ctx))
        .notify::<Warn, _, _>(|message, ctx| log_warn(message, ctx))
}

async fn log_info(message: String, ctx: CallContext) -> anyhow::Result<()> {
    info!(target: TARGET, window = %ctx.sender, "{message}");
    Ok(())
}

async fn log_error(message: String, ctx: CallContext) -> anyhow::Result<()> {
    error!(target: TARGET, window = %ctx.sender, "{message}");
    Ok(())
}

async fn log_warn(message: String, ctx: CallContext) -> anyhow::Result<()> {
    warn!(target: TARGET, window = %ctx.sender, "{message}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::functions::testing::{self, eventually};

    #[tokio::test]
    async fn log_lines_are_fire_and_forget() {
        let t = testing::start();
        let (_, api) = &t.a;

        api.logger().info("hello from the renderer");
        api.logger().warn("careful");
        api.logger().error("something broke");

        eventually("three notifications dispatched", || {
            t.shell.diagnostics().notifies == 3
        })
        .await;
        assert_eq!(t.shell.diagnostics().handler_failures, 0);
        assert_eq!(api.client().pending_count(), 0, "no reply is awaited");
        t.shell.shutdown().await;
    }
}
