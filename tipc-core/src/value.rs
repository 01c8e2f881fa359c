//! `SharedValue`: a single current value broadcast to many observers.
//!
//! Backed by `tokio::sync::watch`, so delivery is latest-wins: a subscriber
//! that falls behind skips to the newest value instead of buffering, and the
//! publisher never waits on any subscriber. New subscribers start from the
//! next change; the current value is not replayed.

use futures::stream::{self, BoxStream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::watch;

pub struct SharedValue<T> {
    tx: watch::Sender<T>,
    /// Serializes read-modify-publish so concurrent updates never interleave.
    write: Mutex<()>,
}

impl<T> SharedValue<T>
where
    T: Clone + Send + Sync + 'static,
{
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(initial);
        Self {
            tx,
            write: Mutex::new(()),
        }
    }

    /// Current value (snapshot).
    pub fn get(&self) -> T {
        self.tx.borrow().clone()
    }

    /// Replace the value and notify every subscriber. Returns the new value.
    pub fn set(&self, value: T) -> T {
        let _guard = self.write.lock();
        self.tx.send_replace(value.clone());
        value
    }

    /// Compute the next value from the current one and publish it atomically.
    pub fn update<F>(&self, f: F) -> T
    where
        F: FnOnce(&T) -> T,
    {
        let _guard = self.write.lock();
        let next = f(&*self.tx.borrow());
        self.tx.send_replace(next.clone());
        next
    }

    /// Stream of every value published after this call.
    ///
    /// Ends when the `SharedValue` is dropped.
    pub fn changes(&self) -> BoxStream<'static, T> {
        let rx = self.tx.subscribe();
        stream::unfold(rx, |mut rx| async move {
            rx.changed().await.ok()?;
            let value = rx.borrow_and_update().clone();
            Some((value, rx))
        })
        .boxed()
    }

    /// Number of live `changes()` streams.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl<T: Clone + Send + Sync + Default + 'static> Default for SharedValue<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: std::fmt::Debug> std::fmt::Debug for SharedValue<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedValue")
            .field("value", &*self.tx.borrow())
            .finish_non_exhaustive()
    }
}
