//! `counter.*`: a shared number every window can change and watch.
//!
//! Subscribers get every value published after they subscribe; the current
//! value is fetched with `counter.get`.

use std::sync::Arc;

use futures::Stream;
use tipc_core::{CallContext, NotifyProcedure, QueryProcedure, RouterBuilder, StreamProcedure};
use tracing::debug;

use crate::state::AppState;

pub struct Subscribe;
impl StreamProcedure for Subscribe {
    const PATH: &'static str = "counter.subscribe";
    type Item = i64;
}

pub struct Get;
impl QueryProcedure for Get {
    const PATH: &'static str = "counter.get";
    type Args = ();
    type Output = i64;
}

pub struct Increment;
impl QueryProcedure for Increment {
    const PATH: &'static str = "counter.increment";
    type Args = ();
    type Output = i64;
}

pub struct Decrement;
impl QueryProcedure for Decrement {
    const PATH: &'static str = "counter.decrement";
    type Args = ();
    type Output = i64;
}

pub struct Reset;
impl NotifyProcedure for Reset {
    const PATH: &'static str = "counter.reset";
    type Args = ();
}

pub struct Set;
impl QueryProcedure for Set {
    const PATH: &'static str = "counter.set";
    type Args = i64;
    type Output = i64;
}

pub fn register(builder: RouterBuilder, state: &Arc<AppState>) -> RouterBuilder {
    let (sub_s, get_s, inc_s, dec_s, reset_s, set_s) = (
        Arc::clone(state),
        Arc::clone(state),
        Arc::clone(state),
        Arc::clone(state),
        Arc::clone(state),
        Arc::clone(state),
    );
    builder
        .stream::<Subscribe, _, _>(move |ctx| subscribe(&sub_s, ctx))
        .query::<Get, _, _>(move |(), _ctx| get(Arc::clone(&get_s)))
        .query::<Increment, _, _>(move |(), _ctx| step(Arc::clone(&inc_s), 1))
        .query::<Decrement, _, _>(move |(), _ctx| step(Arc::clone(&dec_s), -1))
        .notify::<Reset, _, _>(move |(), _ctx| reset(Arc::clone(&reset_s)))
        .query::<Set, _, _>(move |value, _ctx| set(Arc::clone(&set_s), value))
}

fn subscribe(
    state: &AppState,
    ctx: CallContext,
) -> anyhow::Result<impl Stream<Item = i64> + Send + 'static> {
    debug!(window = %ctx.sender, correlation_id = %ctx.correlation_id, "counter subscribed");
    Ok(state.counter.changes())
}

async fn get(state: Arc<AppState>) -> anyhow::Result<i64> {
    Ok(state.counter.get())
}

async fn step(state: Arc<AppState>, delta: i64) -> anyhow::Result<i64> {
    Ok(state.counter.update(|v| v.saturating_add(delta)))
}

async fn reset(state: Arc<AppState>) -> anyhow::Result<()> {
    state.counter.set(0);
    Ok(())
}

async fn set(state: Arc<AppState>, value: i64) -> anyhow::Result<i64> {
    Ok(state.counter.set(value))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use crate::functions::testing::{self, eventually};

    #[tokio::test]
    async fn set_then_get() {
        let t = testing::start();
        let (_, api) = &t.a;
        assert_eq!(api.counter().set(7).await.expect("set"), 7);
        assert_eq!(api.counter().get().await.expect("get"), 7);
        t.shell.shutdown().await;
    }

    #[tokio::test]
    async fn increment_decrement_and_reset() {
        let t = testing::start();
        let (_, api_a) = &t.a;
        let (_, api_b) = &t.b;

        assert_eq!(api_a.counter().increment().await.expect("inc"), 1);
        assert_eq!(api_b.counter().increment().await.expect("inc"), 2);
        assert_eq!(api_a.counter().decrement().await.expect("dec"), 1);

        api_b.counter().reset();
        let counter = &t.shell.state().counter;
        eventually("reset applied", || counter.get() == 0).await;
        t.shell.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn reset_from_one_window_is_seen_by_its_next_get() {
        let t = testing::start();
        let (_, api) = &t.a;

        for round in 1..=200 {
            api.counter().set(round).await.expect("set");
            api.counter().reset();
            assert_eq!(api.counter().get().await.expect("get"), 0, "round {round}");
        }
        t.shell.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn both_windows_see_pushes_late_subscriber_does_not_replay() {
        let t = testing::start();
        let (_, api_a) = &t.a;
        let (_, api_b) = &t.b;
        let dispatcher = t.shell.dispatcher();

        api_a.counter().set(4).await.expect("set 4");

        let seen_a = Arc::new(Mutex::new(Vec::new()));
        let seen_b = Arc::new(Mutex::new(Vec::new()));
        let _sub_a = api_a.counter().subscribe({
            let seen = Arc::clone(&seen_a);
            move |v| seen.lock().push(v)
        });
        let _sub_b = api_b.counter().subscribe({
            let seen = Arc::clone(&seen_b);
            move |v| seen.lock().push(v)
        });
        eventually("two subscriptions", || dispatcher.subscriptions().active_count() == 2).await;

        assert_eq!(api_a.counter().increment().await.expect("inc"), 5);
        eventually("both saw 5", || {
            *seen_a.lock() == vec![5] && *seen_b.lock() == vec![5]
        })
        .await;

        let seen_late = Arc::new(Mutex::new(Vec::new()));
        let _sub_late = api_b.counter().subscribe({
            let seen = Arc::clone(&seen_late);
            move |v| seen.lock().push(v)
        });
        eventually("third subscription", || dispatcher.subscriptions().active_count() == 3).await;
        assert!(seen_late.lock().is_empty());

        api_b.counter().set(9).await.expect("set 9");
        eventually("all saw 9", || {
            *seen_a.lock() == vec![5, 9] && *seen_b.lock() == vec![5, 9] && *seen_late.lock() == vec![9]
        })
        .await;
        t.shell.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn closing_a_window_drops_its_subscription() {
        let t = testing::start();
        let (a, api_a) = &t.a;
        let (_, api_b) = &t.b;
        let dispatcher = t.shell.dispatcher();

        let _sub_a = api_a.counter().subscribe(|_| {});
        let _sub_b = api_b.counter().subscribe(|_| {});
        eventually("two subscriptions", || dispatcher.subscriptions().active_count() == 2).await;

        api_a.window().close();
        eventually("window a torn down", || {
            dispatcher.subscriptions().active_for(*a) == 0
        })
        .await;
        assert_eq!(dispatcher.subscriptions().active_count(), 1);
        t.shell.shutdown().await;
    }
}
