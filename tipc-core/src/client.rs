//! Renderer-side client proxy.
//!
//! One `Client` per window. It owns the window's `MainLink` and a reader task
//! that routes every inbound envelope by correlation id:
//!
//! - `result` / `error` resolve the pending `invoke` with that id,
//! - `push` feeds the subscription callback with that id,
//! - `complete` retires the subscription.
//!
//! Replies are never matched by arrival order. When the window's inbox ends
//! every pending `invoke` is rejected with `TransportUnavailable` and later
//! calls fail fast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::context::WindowId;
use crate::error::{Result, TipcError};
use crate::ipc::envelope::{Convention, Envelope};
use crate::procedure::{NotifyProcedure, QueryProcedure, StreamProcedure};
use crate::transport::MainLink;

type Resolver = oneshot::Sender<Result<Value>>;
type StreamSink = Arc<Mutex<Box<dyn FnMut(Value) + Send>>>;

struct ClientInner {
    link: Box<dyn MainLink>,
    config: ClientConfig,
    next_id: AtomicU64,
    pending: Mutex<HashMap<String, Resolver>>,
    streams: Mutex<HashMap<String, StreamSink>>,
    closed: AtomicBool,
    reader: Mutex<Option<JoinHandle<()>>>,
}

impl ClientInner {
    fn window(&self) -> WindowId {
        self.link.window()
    }

    fn next_correlation_id(&self) -> String {
        (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string()
    }

    fn unavailable(&self) -> TipcError {
        TipcError::TransportUnavailable {
            window: self.window(),
        }
    }

    fn route(&self, envelope: Envelope) {
        match envelope {
            Envelope::Result {
                correlation_id,
                payload,
            } => self.resolve(&correlation_id, Ok(payload)),
            Envelope::Error {
                correlation_id,
                error,
            } => {
                if self.streams.lock().remove(&correlation_id).is_some() {
                    warn!(
                        window = %self.window(),
                        correlation_id = %correlation_id,
                        "subscription rejected: {error}"
                    );
                    return;
                }
                self.resolve(&correlation_id, Err(TipcError::Remote(error)));
            }
            Envelope::Push {
                correlation_id,
                payload,
            } => {
                let sink = self.streams.lock().get(&correlation_id).cloned();
                match sink {
                    Some(sink) => {
                        let mut callback = sink.lock();
                        (*callback)(payload);
                    }
                    None => debug!(
                        window = %self.window(),
                        correlation_id = %correlation_id,
                        "push for inactive subscription dropped"
                    ),
                }
            }
            Envelope::Complete { correlation_id } => {
                if self.streams.lock().remove(&correlation_id).is_some() {
                    debug!(
                        window = %self.window(),
                        correlation_id = %correlation_id,
                        "subscription completed by source"
                    );
                }
            }
            other => warn!(
                window = %self.window(),
                kind = other.kind(),
                "unexpected envelope on renderer side; ignored"
            ),
        }
    }

    fn resolve(&self, correlation_id: &str, outcome: Result<Value>) {
        match self.pending.lock().remove(correlation_id) {
            // Receiver gone means the invoke timed out or was dropped.
            Some(resolver) => {
                let _ = resolver.send(outcome);
            }
            None => debug!(
                window = %self.window(),
                correlation_id = %correlation_id,
                "late or unmatched reply dropped"
            ),
        }
    }

    fn shut(&self) {
        let mut pending = self.pending.lock();
        self.closed.store(true, Ordering::SeqCst);
        let rejected = pending.len();
        for (_, resolver) in pending.drain() {
            let _ = resolver.send(Err(self.unavailable()));
        }
        drop(pending);
        self.streams.lock().clear();
        debug!(window = %self.window(), rejected, "client transport closed");
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.get_mut().take() {
            reader.abort();
        }
    }
}

/// Typed proxy for one renderer window. Cheap to clone.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Wrap a window's channel pair. Spawns the reply reader, so this must be
    /// called inside a Tokio runtime.
    pub fn connect<L, S>(link: L, inbox: S, config: ClientConfig) -> Self
    where
        L: MainLink,
        S: Stream<Item = Envelope> + Unpin + Send + 'static,
    {
        let inner = Arc::new(ClientInner {
            link: Box::new(link),
            config,
            next_id: AtomicU64::new(0),
            pending: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
            reader: Mutex::new(None),
        });
        let reader = tokio::spawn(read_replies(Arc::downgrade(&inner), inbox));
        *inner.reader.lock() = Some(reader);
        Self { inner }
    }

    pub fn window(&self) -> WindowId {
        self.inner.window()
    }

    /// `true` once the window's inbox has ended.
    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Queries awaiting a reply.
    pub fn pending_count(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Subscriptions with a live callback.
    pub fn active_subscriptions(&self) -> usize {
        self.inner.streams.lock().len()
    }

    /// Call a request/response procedure and wait for its reply.
    ///
    /// # Errors
    /// - `TipcError::Remote` for an `error` reply (see `TipcError::code`).
    /// - `TipcError::TransportUnavailable` if the window is closed or closes
    ///   while waiting.
    /// - `TipcError::Timeout` after `ClientConfig::query_timeout`.
    pub async fn invoke<P: QueryProcedure>(&self, args: P::Args) -> Result<P::Output> {
        let args = serde_json::to_value(args)?;
        let correlation_id = self.inner.next_correlation_id();
        let (tx, rx) = oneshot::channel();
        {
            let mut pending = self.inner.pending.lock();
            if self.is_closed() {
                return Err(self.inner.unavailable());
            }
            pending.insert(correlation_id.clone(), tx);
        }
        let _slot = PendingSlot {
            inner: &self.inner,
            correlation_id: correlation_id.clone(),
        };

        self.inner.link.send(&Envelope::Call {
            path: P::PATH.to_string(),
            convention: Convention::Query,
            correlation_id: correlation_id.clone(),
            args,
        })?;

        let reply = match self.inner.config.query_timeout {
            Some(after) => match tokio::time::timeout(after, rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(
                        window = %self.window(),
                        correlation_id = %correlation_id,
                        path = P::PATH,
                        "query timed out after {after:?}"
                    );
                    return Err(TipcError::Timeout {
                        path: P::PATH.to_string(),
                        after,
                    });
                }
            },
            None => rx.await,
        };

        let payload = reply.map_err(|_| self.inner.unavailable())??;
        Ok(serde_json::from_value(payload)?)
    }

    /// Fire a notification. Never waits and never fails; a dead transport
    /// is logged and the call dropped.
    pub fn emit<P: NotifyProcedure>(&self, args: P::Args) {
        let args = match serde_json::to_value(args) {
            Ok(args) => args,
            Err(e) => {
                warn!(path = P::PATH, "notification args not serializable: {e}");
                return;
            }
        };
        let call = Envelope::Call {
            path: P::PATH.to_string(),
            convention: Convention::Notify,
            correlation_id: self.inner.next_correlation_id(),
            args,
        };
        if let Err(e) = self.inner.link.send(&call) {
            debug!(window = %self.window(), path = P::PATH, "notification dropped: {e}");
        }
    }

    /// Subscribe to a stream procedure. `on_value` runs on the reader task
    /// for every pushed item, in push order.
    ///
    /// The subscription lasts until `Subscription::unsubscribe`, guard drop,
    /// source completion or window teardown. If the call cannot be sent the
    /// returned guard is inert.
    pub fn subscribe<P, F>(&self, mut on_value: F) -> Subscription
    where
        P: StreamProcedure,
        F: FnMut(P::Item) + Send + 'static,
    {
        let correlation_id = self.inner.next_correlation_id();
        let sink: StreamSink = Arc::new(Mutex::new(Box::new(move |payload: Value| {
            match serde_json::from_value::<P::Item>(payload) {
                Ok(item) => on_value(item),
                Err(e) => warn!(path = P::PATH, "undecodable stream item dropped: {e}"),
            }
        })));

        let live = if self.is_closed() {
            debug!(window = %self.window(), path = P::PATH, "subscribe on closed client");
            false
        } else {
            self.inner
                .streams
                .lock()
                .insert(correlation_id.clone(), sink);
            let call = Envelope::Call {
                path: P::PATH.to_string(),
                convention: Convention::Stream,
                correlation_id: correlation_id.clone(),
                args: Value::Null,
            };
            match self.inner.link.send(&call) {
                Ok(()) => true,
                Err(e) => {
                    self.inner.streams.lock().remove(&correlation_id);
                    warn!(window = %self.window(), path = P::PATH, "subscribe failed: {e}");
                    false
                }
            }
        };

        Subscription {
            inner: Arc::clone(&self.inner),
            correlation_id,
            path: P::PATH,
            active: AtomicBool::new(live),
        }
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("window", &self.window())
            .field("pending", &self.pending_count())
            .field("subscriptions", &self.active_subscriptions())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Removes a pending resolver when `invoke` finishes, times out or is dropped.
struct PendingSlot<'a> {
    inner: &'a ClientInner,
    correlation_id: String,
}

impl Drop for PendingSlot<'_> {
    fn drop(&mut self) {
        self.inner.pending.lock().remove(&self.correlation_id);
    }
}

async fn read_replies<S>(inner: Weak<ClientInner>, mut inbox: S)
where
    S: Stream<Item = Envelope> + Unpin,
{
    while let Some(envelope) = inbox.next().await {
        let Some(inner) = inner.upgrade() else {
            return;
        };
        inner.route(envelope);
    }
    if let Some(inner) = inner.upgrade() {
        inner.shut();
    }
}

// ---------------------------------------------------------------------------
// Subscription guard
// ---------------------------------------------------------------------------

/// Handle to a live stream subscription. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    inner: Arc<ClientInner>,
    correlation_id: String,
    path: &'static str,
    active: AtomicBool,
}

impl Subscription {
    pub fn correlation_id(&self) -> &str {
        &self.correlation_id
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    /// `false` after unsubscribe, source completion or window teardown.
    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
            && self.inner.streams.lock().contains_key(&self.correlation_id)
    }

    /// Stop receiving values. Idempotent: only the first call sends an
    /// `unsubscribe` envelope.
    pub fn unsubscribe(&self) {
        if !self.active.swap(false, Ordering::SeqCst) {
            return;
        }
        self.inner.streams.lock().remove(&self.correlation_id);
        let envelope = Envelope::Unsubscribe {
            correlation_id: self.correlation_id.clone(),
        };
        if let Err(e) = self.inner.link.send(&envelope) {
            debug!(
                window = %self.inner.window(),
                correlation_id = %self.correlation_id,
                "unsubscribe not delivered: {e}"
            );
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("path", &self.path)
            .field("correlation_id", &self.correlation_id)
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ipc::envelope::{ErrorCode, WireError};
    use crate::transport::{Inbound, IpcBus, MainInbox, Transport};
    use serde_json::json;
    use std::time::Duration;

    struct Get;
    impl QueryProcedure for Get {
        const PATH: &'static str = "counter.get";
        type Args = ();
        type Output = i64;
    }

    struct Ticks;
    impl StreamProcedure for Ticks {
        const PATH: &'static str = "counter.subscribe";
        type Item = i64;
    }

    /// A client wired to a bus with no dispatcher; the test plays main.
    fn manual() -> (IpcBus, MainInbox, Client) {
        let (bus, main) = IpcBus::new();
        let (port, inbox) = bus.attach(WindowId(1)).expect("attach");
        let client = Client::connect(port, inbox, ClientConfig::default());
        (bus, main, client)
    }

    async fn next_call(main: &mut MainInbox) -> (String, Convention) {
        let item = tokio::time::timeout(Duration::from_secs(1), main.next())
            .await
            .expect("call arrives")
            .expect("inbox open");
        match item {
            Inbound::Message {
                envelope:
                    Envelope::Call {
                        correlation_id,
                        convention,
                        ..
                    },
                ..
            } => (correlation_id, convention),
            other => panic!("expected call, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn replies_are_matched_by_id_not_order() {
        let (bus, mut main, client) = manual();

        let first = tokio::spawn({
            let client = client.clone();
            async move { client.invoke::<Get>(()).await }
        });
        let (id_a, _) = next_call(&mut main).await;
        let second = tokio::spawn({
            let client = client.clone();
            async move { client.invoke::<Get>(()).await }
        });
        let (id_b, _) = next_call(&mut main).await;
        assert_ne!(id_a, id_b);

        bus.send(WindowId(1), &Envelope::Result { correlation_id: id_b, payload: json!(2) })
            .expect("reply b");
        bus.send(WindowId(1), &Envelope::Result { correlation_id: id_a, payload: json!(1) })
            .expect("reply a");

        assert_eq!(first.await.expect("join").expect("first ok"), 1);
        assert_eq!(second.await.expect("join").expect("second ok"), 2);
        assert_eq!(client.pending_count(), 0);
    }

    #[tokio::test]
    async fn error_reply_surfaces_as_remote() {
        let (bus, mut main, client) = manual();
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.invoke::<Get>(()).await }
        });
        let (id, convention) = next_call(&mut main).await;
        assert_eq!(convention, Convention::Query);
        bus.send(
            WindowId(1),
            &Envelope::Error {
                correlation_id: id,
                error: WireError {
                    message: "boom".into(),
                    code: Some(ErrorCode::HandlerFailure),
                },
            },
        )
        .expect("error reply");

        let err = call.await.expect("join").expect_err("remote error");
        assert_eq!(err.code(), Some(ErrorCode::HandlerFailure));
    }

    #[tokio::test(start_paused = true)]
    async fn invoke_times_out_and_forgets_resolver() {
        let (bus, main) = IpcBus::new();
        let (port, inbox) = bus.attach(WindowId(1)).expect("attach");
        let client = Client::connect(
            port,
            inbox,
            ClientConfig {
                query_timeout: Some(Duration::from_millis(200)),
            },
        );

        let err = client.invoke::<Get>(()).await.expect_err("nobody answers");
        assert!(matches!(err, TipcError::Timeout { ref path, .. } if path == "counter.get"));
        assert_eq!(client.pending_count(), 0);
        drop(main);
    }

    #[tokio::test]
    async fn detach_rejects_pending_and_fails_fast_afterwards() {
        let (bus, mut main, client) = manual();
        let call = tokio::spawn({
            let client = client.clone();
            async move { client.invoke::<Get>(()).await }
        });
        next_call(&mut main).await;
        bus.detach(WindowId(1));

        let err = call.await.expect("join").expect_err("rejected on close");
        assert!(matches!(err, TipcError::TransportUnavailable { .. }));
        assert!(client.is_closed());

        let err = client.invoke::<Get>(()).await.expect_err("fails fast");
        assert!(matches!(err, TipcError::TransportUnavailable { .. }));
    }

    #[tokio::test]
    async fn pushes_reach_callback_until_unsubscribed() {
        let (bus, mut main, client) = manual();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sub = client.subscribe::<Ticks, _>({
            let seen = Arc::clone(&seen);
            move |n| seen.lock().push(n)
        });
        let (id, convention) = next_call(&mut main).await;
        assert_eq!(convention, Convention::Stream);
        assert_eq!(sub.correlation_id(), id);

        for n in [4, 5] {
            bus.send(WindowId(1), &Envelope::Push { correlation_id: id.clone(), payload: json!(n) })
                .expect("push");
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock(), vec![4, 5]);

        sub.unsubscribe();
        sub.unsubscribe();
        let unsubscribes: Vec<Inbound> = {
            let mut out = Vec::new();
            while let Ok(Some(item)) =
                tokio::time::timeout(Duration::from_millis(20), main.next()).await
            {
                out.push(item);
            }
            out
        };
        assert_eq!(unsubscribes.len(), 1, "second unsubscribe sends nothing");

        bus.send(WindowId(1), &Envelope::Push { correlation_id: id, payload: json!(6) })
            .expect("late push");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(*seen.lock(), vec![4, 5], "late push ignored");
        assert!(!sub.is_active());
    }

    #[tokio::test]
    async fn emit_after_close_is_silent() {
        struct Ping;
        impl NotifyProcedure for Ping {
            const PATH: &'static str = "logger.info";
            type Args = String;
        }

        let (bus, _main, client) = manual();
        bus.detach(WindowId(1));
        client.emit::<Ping>("still here?".into());
        let sub = client.subscribe::<Ticks, _>(|_| {});
        assert!(!sub.is_active(), "subscription on a dead window is inert");
    }
}
