//! Subscription manager: the (window, correlation id) → live stream table.
//!
//! Every accepted Stream call gets one forwarder task that drains the
//! handler's value source and pushes each item to the subscribing window.
//! The table entry is the single source of truth for "is this subscription
//! live": the forwarder re-checks it under the table lock before every push,
//! so once `unsubscribe` or `drop_window` returns no further push for that
//! key is sent.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::context::{CallContext, WindowId};
use crate::ipc::envelope::Envelope;
use crate::registry::ValueStream;
use crate::transport::Transport;

type SubscriptionKey = (WindowId, String);
type Table = Arc<Mutex<HashMap<SubscriptionKey, ActiveSubscription>>>;

struct ActiveSubscription {
    generation: u64,
    path: String,
    task: JoinHandle<()>,
}

pub struct SubscriptionManager {
    table: Table,
    transport: Arc<dyn Transport>,
    generations: AtomicU64,
}

impl SubscriptionManager {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            table: Arc::new(Mutex::new(HashMap::new())),
            transport,
            generations: AtomicU64::new(0),
        }
    }

    /// Start forwarding `source` to `ctx.sender` under `ctx.correlation_id`.
    ///
    /// Returns `false` (and drops `source`) if that key is already live.
    /// Must be called from inside a Tokio runtime.
    pub fn subscribe(&self, ctx: CallContext, source: ValueStream) -> bool {
        let key: SubscriptionKey = (ctx.sender, ctx.correlation_id);
        let mut table = self.table.lock();
        if table.contains_key(&key) {
            debug!(
                window = %key.0,
                correlation_id = %key.1,
                "duplicate subscription ignored"
            );
            return false;
        }

        let generation = self.generations.fetch_add(1, Ordering::Relaxed);
        let task = tokio::spawn(forward(
            Arc::clone(&self.table),
            Arc::clone(&self.transport),
            key.clone(),
            generation,
            source,
        ));
        debug!(
            window = %key.0,
            correlation_id = %key.1,
            path = %ctx.path,
            "subscription started"
        );
        table.insert(
            key,
            ActiveSubscription {
                generation,
                path: ctx.path,
                task,
            },
        );
        true
    }

    /// Stop the subscription for `(window, correlation_id)`.
    ///
    /// Returns `false` when nothing was live under that key.
    pub fn unsubscribe(&self, window: WindowId, correlation_id: &str) -> bool {
        let removed = self
            .table
            .lock()
            .remove(&(window, correlation_id.to_string()));
        match removed {
            Some(sub) => {
                sub.task.abort();
                debug!(
                    window = %window,
                    correlation_id = %correlation_id,
                    path = %sub.path,
                    "subscription stopped"
                );
                true
            }
            None => {
                debug!(
                    window = %window,
                    correlation_id = %correlation_id,
                    "unsubscribe for unknown subscription ignored"
                );
                false
            }
        }
    }

    /// Dispose every subscription owned by `window`. Returns how many.
    pub fn drop_window(&self, window: WindowId) -> usize {
        let mut dropped = Vec::new();
        self.table.lock().retain(|(owner, _), sub| {
            if *owner == window {
                sub.task.abort();
                dropped.push(sub.path.clone());
                false
            } else {
                true
            }
        });
        if !dropped.is_empty() {
            info!(window = %window, count = dropped.len(), "window subscriptions disposed");
        }
        dropped.len()
    }

    pub fn is_active(&self, window: WindowId, correlation_id: &str) -> bool {
        self.table
            .lock()
            .contains_key(&(window, correlation_id.to_string()))
    }

    pub fn active_count(&self) -> usize {
        self.table.lock().len()
    }

    /// Live subscriptions owned by `window`.
    pub fn active_for(&self, window: WindowId) -> usize {
        self.table
            .lock()
            .keys()
            .filter(|(owner, _)| *owner == window)
            .count()
    }

    /// Dispose everything (dispatcher shutdown).
    pub fn clear(&self) {
        let mut table = self.table.lock();
        for sub in table.values() {
            sub.task.abort();
        }
        table.clear();
    }
}

impl Drop for SubscriptionManager {
    fn drop(&mut self) {
        self.clear();
    }
}

async fn forward(
    table: Table,
    transport: Arc<dyn Transport>,
    key: SubscriptionKey,
    generation: u64,
    mut source: ValueStream,
) {
    let (window, correlation_id) = &key;

    while let Some(payload) = source.next().await {
        let push = Envelope::Push {
            correlation_id: correlation_id.clone(),
            payload,
        };
        let mut guard = table.lock();
        if !is_current(&guard, &key, generation) {
            return;
        }
        if let Err(e) = transport.send(*window, &push) {
            guard.remove(&key);
            warn!(
                window = %window,
                correlation_id = %correlation_id,
                "push failed, subscription removed: {e}"
            );
            return;
        }
    }

    let mut guard = table.lock();
    if !is_current(&guard, &key, generation) {
        return;
    }
    guard.remove(&key);
    let complete = Envelope::Complete {
        correlation_id: correlation_id.clone(),
    };
    match transport.send(*window, &complete) {
        Ok(()) => debug!(window = %window, correlation_id = %correlation_id, "subscription completed"),
        Err(e) => debug!(window = %window, "complete not delivered: {e}"),
    }
}

fn is_current(
    table: &HashMap<SubscriptionKey, ActiveSubscription>,
    key: &SubscriptionKey,
    generation: u64,
) -> bool {
    table.get(key).is_some_and(|sub| sub.generation == generation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{IpcBus, WindowInbox};
    use futures::stream;
    use serde_json::{json, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    fn ctx(window: u32, id: &str) -> CallContext {
        CallContext {
            sender: WindowId(window),
            correlation_id: id.into(),
            path: "counter.subscribe".into(),
        }
    }

    /// Source driven by hand; ends when the sender is dropped.
    fn manual_source() -> (mpsc::UnboundedSender<Value>, ValueStream) {
        let (tx, rx) = mpsc::unbounded_channel();
        let source = stream::unfold(rx, |mut rx| async move {
            let value = rx.recv().await?;
            Some((value, rx))
        });
        (tx, source.boxed())
    }

    async fn next_envelope(rx: &mut WindowInbox) -> Envelope {
        tokio::time::timeout(Duration::from_secs(1), rx.next())
            .await
            .expect("envelope arrives")
            .expect("inbox open")
    }

    #[tokio::test]
    async fn pushes_in_order_then_completes() {
        let (bus, _main) = IpcBus::new();
        let (_port, mut rx) = bus.attach(WindowId(1)).expect("attach");
        let subs = SubscriptionManager::new(Arc::new(bus.clone()));

        let source = stream::iter(vec![json!(1), json!(2)]).boxed();
        assert!(subs.subscribe(ctx(1, "s1"), source));

        for expected in [json!(1), json!(2)] {
            match next_envelope(&mut rx).await {
                Envelope::Push { correlation_id, payload } => {
                    assert_eq!(correlation_id, "s1");
                    assert_eq!(payload, expected);
                }
                other => panic!("expected push, got {other:?}"),
            }
        }
        assert_eq!(
            next_envelope(&mut rx).await,
            Envelope::Complete {
                correlation_id: "s1".into()
            }
        );
        assert_eq!(subs.active_count(), 0, "completed subscription is removed");
    }

    #[tokio::test]
    async fn duplicate_key_is_a_no_op() {
        let (bus, _main) = IpcBus::new();
        let (_port, _rx) = bus.attach(WindowId(1)).expect("attach");
        let subs = SubscriptionManager::new(Arc::new(bus.clone()));

        let (_tx1, first) = manual_source();
        let (_tx2, second) = manual_source();
        let (_tx3, third) = manual_source();
        assert!(subs.subscribe(ctx(1, "s"), first));
        assert!(!subs.subscribe(ctx(1, "s"), second));
        assert!(subs.subscribe(ctx(2, "s"), third), "other window, same id");
        assert_eq!(subs.active_count(), 2);
    }

    #[tokio::test]
    async fn unsubscribe_stops_pushes_and_is_idempotent() {
        let (bus, _main) = IpcBus::new();
        let (_port, mut rx) = bus.attach(WindowId(1)).expect("attach");
        let subs = SubscriptionManager::new(Arc::new(bus.clone()));

        let (tx, source) = manual_source();
        subs.subscribe(ctx(1, "s"), source);
        tx.send(json!("a")).expect("source open");
        assert!(matches!(next_envelope(&mut rx).await, Envelope::Push { .. }));

        assert!(subs.unsubscribe(WindowId(1), "s"));
        assert!(!subs.unsubscribe(WindowId(1), "s"));
        let _ = tx.send(json!("b"));

        let late = tokio::time::timeout(Duration::from_millis(50), rx.next()).await;
        assert!(late.is_err(), "no push after unsubscribe");
    }

    #[tokio::test]
    async fn drop_window_only_touches_that_window() {
        let (bus, _main) = IpcBus::new();
        let (_p1, _r1) = bus.attach(WindowId(1)).expect("attach");
        let (_p2, _r2) = bus.attach(WindowId(2)).expect("attach");
        let subs = SubscriptionManager::new(Arc::new(bus.clone()));

        let mut senders = Vec::new();
        for (window, id) in [(1, "a"), (1, "b"), (2, "a")] {
            let (tx, source) = manual_source();
            senders.push(tx);
            assert!(subs.subscribe(ctx(window, id), source));
        }

        assert_eq!(subs.drop_window(WindowId(1)), 2);
        assert_eq!(subs.active_for(WindowId(1)), 0);
        assert!(subs.is_active(WindowId(2), "a"));
        assert_eq!(subs.drop_window(WindowId(1)), 0);
    }

    #[tokio::test]
    async fn failed_push_removes_subscription() {
        let (bus, _main) = IpcBus::new();
        let (_port, _rx) = bus.attach(WindowId(5)).expect("attach");
        let subs = SubscriptionManager::new(Arc::new(bus.clone()));

        let (tx, source) = manual_source();
        subs.subscribe(ctx(5, "s"), source);
        bus.detach(WindowId(5));
        tx.send(json!(1)).expect("source open");

        for _ in 0..50 {
            if subs.active_count() == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("subscription to a gone window was not removed");
    }
}
