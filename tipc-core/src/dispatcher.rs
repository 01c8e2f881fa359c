//! Privileged-side dispatcher.
//!
//! ```text
//! MainInbox ──► Dispatcher::run ──► handle
//!                 ├─ call/query   ─► handler future ─► result | error
//!                 ├─ call/notify  ─► handler future ─► (nothing)
//!                 ├─ call/stream  ─► SubscriptionManager::subscribe
//!                 ├─ unsubscribe  ─► SubscriptionManager::unsubscribe
//!                 └─ window closed ─► SubscriptionManager::drop_window
//! ```
//!
//! All handler futures live on the one inbound loop. Each is polled up to its
//! first suspension before the next envelope is read, so handlers start in
//! arrival order and only interleave at `.await` points, whatever runtime
//! flavor hosts the loop. A panic inside a handler is reported as a
//! `HANDLER_FAILURE` reply instead of taking the dispatcher down.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::stream::FuturesUnordered;
use futures::{FutureExt, Stream, StreamExt};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::config::DispatcherConfig;
use crate::context::CallContext;
use crate::error::{Result, TipcError};
use crate::ipc::envelope::{Convention, Envelope};
use crate::registry::{Handler, NotifyHandler, QueryHandler, Router, StreamHandler};
use crate::subscriptions::SubscriptionManager;
use crate::transport::{Inbound, Transport};

/// A started query or notify call, driven by the inbound loop.
type CallTask = BoxFuture<'static, ()>;

// ---------------------------------------------------------------------------
// Diagnostics
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct DispatchDiagnostics {
    pub calls: AtomicUsize,
    pub queries: AtomicUsize,
    pub notifies: AtomicUsize,
    pub streams: AtomicUsize,
    pub unknown_procedure: AtomicUsize,
    pub convention_mismatch: AtomicUsize,
    pub handler_failures: AtomicUsize,
    pub replies_dropped: AtomicUsize,
}

impl DispatchDiagnostics {
    pub fn snapshot(&self) -> DispatchSnapshot {
        DispatchSnapshot {
            calls: self.calls.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            notifies: self.notifies.load(Ordering::Relaxed),
            streams: self.streams.load(Ordering::Relaxed),
            unknown_procedure: self.unknown_procedure.load(Ordering::Relaxed),
            convention_mismatch: self.convention_mismatch.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
            replies_dropped: self.replies_dropped.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSnapshot {
    pub calls: usize,
    pub queries: usize,
    pub notifies: usize,
    pub streams: usize,
    pub unknown_procedure: usize,
    pub convention_mismatch: usize,
    pub handler_failures: usize,
    pub replies_dropped: usize,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

pub struct Dispatcher {
    router: Arc<Router>,
    transport: Arc<dyn Transport>,
    subscriptions: SubscriptionManager,
    max_in_flight: usize,
    diagnostics: Arc<DispatchDiagnostics>,
}

impl Dispatcher {
    pub fn new(router: Arc<Router>, transport: Arc<dyn Transport>, config: DispatcherConfig) -> Self {
        let max_in_flight = config.max_in_flight.max(1);
        info!(
            procedures = router.len(),
            max_in_flight,
            "dispatcher ready"
        );
        Self {
            subscriptions: SubscriptionManager::new(Arc::clone(&transport)),
            router,
            transport,
            max_in_flight,
            diagnostics: Arc::new(DispatchDiagnostics::default()),
        }
    }

    pub fn router(&self) -> &Router {
        &self.router
    }

    pub fn subscriptions(&self) -> &SubscriptionManager {
        &self.subscriptions
    }

    pub fn diagnostics_snapshot(&self) -> DispatchSnapshot {
        self.diagnostics.snapshot()
    }

    /// Drain `inbound` until it ends, then dispose every subscription.
    ///
    /// While `max_in_flight` calls are suspended no further envelope is read;
    /// they queue in the transport in arrival order.
    pub async fn run<S>(&self, mut inbound: S)
    where
        S: Stream<Item = Inbound> + Unpin,
    {
        let mut in_flight: FuturesUnordered<CallTask> = FuturesUnordered::new();
        loop {
            let saturated = in_flight.len() >= self.max_in_flight;
            tokio::select! {
                biased;
                Some(()) = in_flight.next(), if !in_flight.is_empty() => {}
                item = inbound.next(), if !saturated => {
                    let Some(item) = item else { break };
                    if let Some(mut task) = self.handle(item) {
                        // Run to the first suspension before the next envelope.
                        if futures::poll!(&mut task).is_pending() {
                            in_flight.push(task);
                        }
                    }
                }
            }
        }
        info!(
            abandoned = in_flight.len(),
            "inbound channel closed; dispatcher stopping"
        );
        drop(in_flight);
        self.subscriptions.clear();
    }

    /// Run the inbound loop on its own task.
    pub fn spawn<S>(self: &Arc<Self>, inbound: S) -> JoinHandle<()>
    where
        S: Stream<Item = Inbound> + Unpin + Send + 'static,
    {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run(inbound).await })
    }

    /// Route one inbound item. Query and notify calls come back as tasks for
    /// the loop to drive; everything else completes here.
    fn handle(&self, item: Inbound) -> Option<CallTask> {
        match item {
            Inbound::Message {
                sender,
                envelope:
                    Envelope::Call {
                        path,
                        convention,
                        correlation_id,
                        args,
                    },
            } => {
                let ctx = CallContext {
                    sender,
                    correlation_id,
                    path,
                };
                self.dispatch_call(ctx, convention, args)
            }
            Inbound::Message {
                sender,
                envelope: Envelope::Unsubscribe { correlation_id },
            } => {
                self.subscriptions.unsubscribe(sender, &correlation_id);
                None
            }
            Inbound::Message { sender, envelope } => {
                warn!(
                    window = %sender,
                    kind = envelope.kind(),
                    "unexpected envelope on privileged side; ignored"
                );
                None
            }
            Inbound::WindowClosed(window) => {
                let dropped = self.subscriptions.drop_window(window);
                debug!(window = %window, dropped, "window closed");
                None
            }
        }
    }

    fn dispatch_call(&self, ctx: CallContext, called: Convention, args: Value) -> Option<CallTask> {
        DispatchDiagnostics::bump(&self.diagnostics.calls);

        let Some(handler) = self.router.resolve(&ctx.path).cloned() else {
            DispatchDiagnostics::bump(&self.diagnostics.unknown_procedure);
            let err = TipcError::UnknownProcedure {
                path: ctx.path.clone(),
            };
            self.reject(&ctx, called, err);
            return None;
        };

        let registered = handler.convention();
        if registered != called {
            DispatchDiagnostics::bump(&self.diagnostics.convention_mismatch);
            let err = TipcError::ConventionMismatch {
                path: ctx.path.clone(),
                registered,
                called,
            };
            self.reject(&ctx, called, err);
            return None;
        }

        debug!(
            window = %ctx.sender,
            correlation_id = %ctx.correlation_id,
            path = %ctx.path,
            convention = %called,
            "dispatching call"
        );

        match handler {
            Handler::Query(h) => {
                DispatchDiagnostics::bump(&self.diagnostics.queries);
                Some(self.query_task(h, ctx, args))
            }
            Handler::Notify(h) => {
                DispatchDiagnostics::bump(&self.diagnostics.notifies);
                Some(self.notify_task(h, ctx, args))
            }
            Handler::Stream(h) => {
                DispatchDiagnostics::bump(&self.diagnostics.streams);
                self.open_stream(h, ctx);
                None
            }
        }
    }

    fn query_task(&self, handler: QueryHandler, ctx: CallContext, args: Value) -> CallTask {
        let transport = Arc::clone(&self.transport);
        let diagnostics = Arc::clone(&self.diagnostics);

        async move {
            let call_ctx = ctx.clone();
            let outcome = guarded(async move { handler(args, call_ctx).await }).await;

            let reply = match outcome {
                Ok(payload) => Envelope::Result {
                    correlation_id: ctx.correlation_id.clone(),
                    payload,
                },
                Err(err) => {
                    DispatchDiagnostics::bump(&diagnostics.handler_failures);
                    warn!(
                        window = %ctx.sender,
                        correlation_id = %ctx.correlation_id,
                        path = %ctx.path,
                        "query failed: {err}"
                    );
                    Envelope::Error {
                        correlation_id: ctx.correlation_id.clone(),
                        error: err.to_wire(),
                    }
                }
            };

            if let Err(e) = transport.send(ctx.sender, &reply) {
                DispatchDiagnostics::bump(&diagnostics.replies_dropped);
                debug!(
                    window = %ctx.sender,
                    correlation_id = %ctx.correlation_id,
                    "reply dropped: {e}"
                );
            }
        }
        .boxed()
    }

    fn notify_task(&self, handler: NotifyHandler, ctx: CallContext, args: Value) -> CallTask {
        let diagnostics = Arc::clone(&self.diagnostics);

        async move {
            let call_ctx = ctx.clone();
            let outcome = guarded(async move { handler(args, call_ctx).await }).await;
            if let Err(err) = outcome {
                DispatchDiagnostics::bump(&diagnostics.handler_failures);
                warn!(
                    window = %ctx.sender,
                    path = %ctx.path,
                    "notification failed: {err}"
                );
            }
        }
        .boxed()
    }

    fn open_stream(&self, handler: StreamHandler, ctx: CallContext) {
        if self
            .subscriptions
            .is_active(ctx.sender, &ctx.correlation_id)
        {
            debug!(
                window = %ctx.sender,
                correlation_id = %ctx.correlation_id,
                "duplicate subscription ignored"
            );
            return;
        }

        let opened = std::panic::catch_unwind(AssertUnwindSafe(|| handler(ctx.clone())))
            .unwrap_or_else(|payload| Err(panicked(payload)));
        match opened {
            Ok(source) => {
                self.subscriptions.subscribe(ctx, source);
            }
            Err(err) => {
                DispatchDiagnostics::bump(&self.diagnostics.handler_failures);
                warn!(path = %ctx.path, window = %ctx.sender, "stream handler failed: {err}");
                self.send_error(&ctx, &err);
            }
        }
    }

    /// Reply with an error for query/stream calls; notify calls get nothing.
    fn reject(&self, ctx: &CallContext, called: Convention, err: TipcError) {
        match called {
            Convention::Notify => {
                warn!(window = %ctx.sender, path = %ctx.path, "notification dropped: {err}");
            }
            Convention::Query | Convention::Stream => {
                debug!(window = %ctx.sender, path = %ctx.path, "call rejected: {err}");
                self.send_error(ctx, &err);
            }
        }
    }

    fn send_error(&self, ctx: &CallContext, err: &TipcError) {
        let reply = Envelope::Error {
            correlation_id: ctx.correlation_id.clone(),
            error: err.to_wire(),
        };
        if let Err(e) = self.transport.send(ctx.sender, &reply) {
            DispatchDiagnostics::bump(&self.diagnostics.replies_dropped);
            debug!(window = %ctx.sender, "error reply dropped: {e}");
        }
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("procedures", &self.router.len())
            .field("subscriptions", &self.subscriptions.active_count())
            .field("diagnostics", &self.diagnostics.snapshot())
            .finish()
    }
}

/// Await a handler, turning a panic into `HandlerFailure`.
async fn guarded<T>(call: impl Future<Output = Result<T>>) -> Result<T> {
    AssertUnwindSafe(call)
        .catch_unwind()
        .await
        .unwrap_or_else(|payload| Err(panicked(payload)))
}

fn panicked(payload: Box<dyn Any + Send>) -> TipcError {
    TipcError::HandlerFailure(format!("handler panicked: {}", panic_message(payload.as_ref())))
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&'static str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}
