//! Procedure registry: a nested namespace tree of type-erased handlers.
//!
//! Built once at startup with `RouterBuilder` and shared read-only with the
//! dispatcher. Typed handlers are erased at registration time: argument
//! decoding, result encoding and failure classification all happen inside
//! the erased closure, so the dispatcher only ever sees `serde_json::Value`.

use std::collections::{btree_map::Entry, BTreeMap};
use std::future::Future;
use std::sync::Arc;

use futures::future::{self, BoxFuture};
use futures::stream::{BoxStream, Stream, StreamExt};
use futures::FutureExt;
use serde_json::Value;
use tracing::warn;

use crate::context::CallContext;
use crate::error::{Result, TipcError};
use crate::ipc::envelope::Convention;
use crate::procedure::{NotifyProcedure, QueryProcedure, StreamProcedure};

/// Encoded items produced by a stream handler.
pub type ValueStream = BoxStream<'static, Value>;

pub type QueryHandler = Arc<dyn Fn(Value, CallContext) -> BoxFuture<'static, Result<Value>> + Send + Sync>;
pub type NotifyHandler = Arc<dyn Fn(Value, CallContext) -> BoxFuture<'static, Result<()>> + Send + Sync>;
pub type StreamHandler = Arc<dyn Fn(CallContext) -> Result<ValueStream> + Send + Sync>;

/// A registered handler, tagged with its calling convention.
#[derive(Clone)]
pub enum Handler {
    Query(QueryHandler),
    Notify(NotifyHandler),
    Stream(StreamHandler),
}

impl Handler {
    pub fn convention(&self) -> Convention {
        match self {
            Handler::Query(_) => Convention::Query,
            Handler::Notify(_) => Convention::Notify,
            Handler::Stream(_) => Convention::Stream,
        }
    }
}

impl std::fmt::Debug for Handler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Handler").field(&self.convention()).finish()
    }
}

enum Node {
    Namespace(BTreeMap<String, Node>),
    Leaf(Handler),
}

/// Immutable procedure tree.
pub struct Router {
    root: BTreeMap<String, Node>,
    len: usize,
}

impl Router {
    pub fn builder() -> RouterBuilder {
        RouterBuilder::default()
    }

    /// Resolve a dotted path to its handler.
    ///
    /// Returns `None` for unknown paths and for paths that name a namespace
    /// rather than a procedure.
    pub fn resolve(&self, path: &str) -> Option<&Handler> {
        let mut level = &self.root;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let last = segments.peek().is_none();
            match level.get(segment)? {
                Node::Leaf(handler) if last => return Some(handler),
                Node::Namespace(children) if !last => level = children,
                _ => return None,
            }
        }
        None
    }

    /// Number of registered procedures.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every registered path with its convention, sorted by path.
    pub fn procedures(&self) -> Vec<(String, Convention)> {
        fn walk(prefix: &str, level: &BTreeMap<String, Node>, out: &mut Vec<(String, Convention)>) {
            for (name, node) in level {
                let path = if prefix.is_empty() {
                    name.clone()
                } else {
                    format!("{prefix}.{name}")
                };
                match node {
                    Node::Leaf(handler) => out.push((path, handler.convention())),
                    Node::Namespace(children) => walk(&path, children, out),
                }
            }
        }

        let mut out = Vec::with_capacity(self.len);
        walk("", &self.root, &mut out);
        out
    }
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Router")
            .field("procedures", &self.procedures())
            .finish()
    }
}

/// Collects typed handlers; path conflicts are reported by `build()`.
#[derive(Default)]
pub struct RouterBuilder {
    entries: Vec<(&'static str, Handler)>,
}

impl RouterBuilder {
    /// Register a request/response handler for `P`.
    pub fn query<P, F, Fut>(mut self, handler: F) -> Self
    where
        P: QueryProcedure,
        F: Fn(P::Args, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<P::Output>> + Send + 'static,
    {
        let erased: QueryHandler = Arc::new(
            move |args: Value, ctx: CallContext| -> BoxFuture<'static, Result<Value>> {
                let args = match decode_args::<P::Args>(P::PATH, args) {
                    Ok(args) => args,
                    Err(e) => return future::ready(Err(e)).boxed(),
                };
                let call = handler(args, ctx);
                async move {
                    let output = call.await.map_err(handler_failure)?;
                    Ok::<Value, TipcError>(serde_json::to_value(output)?)
                }
                .boxed()
            },
        );
        self.entries.push((P::PATH, Handler::Query(erased)));
        self
    }

    /// Register a fire-and-forget handler for `P`.
    pub fn notify<P, F, Fut>(mut self, handler: F) -> Self
    where
        P: NotifyProcedure,
        F: Fn(P::Args, CallContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let erased: NotifyHandler = Arc::new(
            move |args: Value, ctx: CallContext| -> BoxFuture<'static, Result<()>> {
                let args = match decode_args::<P::Args>(P::PATH, args) {
                    Ok(args) => args,
                    Err(e) => return future::ready(Err(e)).boxed(),
                };
                handler(args, ctx).map(|r| r.map_err(handler_failure)).boxed()
            },
        );
        self.entries.push((P::PATH, Handler::Notify(erased)));
        self
    }

    /// Register a subscription handler for `P`.
    ///
    /// The handler returns the value source for one subscriber; it is called
    /// once per accepted subscription.
    pub fn stream<P, F, S>(mut self, handler: F) -> Self
    where
        P: StreamProcedure,
        F: Fn(CallContext) -> anyhow::Result<S> + Send + Sync + 'static,
        S: Stream<Item = P::Item> + Send + 'static,
    {
        let erased: StreamHandler = Arc::new(move |ctx: CallContext| -> Result<ValueStream> {
            let items = handler(ctx).map_err(handler_failure)?;
            let encoded = items.filter_map(|item| {
                future::ready(match serde_json::to_value(item) {
                    Ok(value) => Some(value),
                    Err(e) => {
                        warn!(path = P::PATH, "dropping unserializable stream item: {e}");
                        None
                    }
                })
            });
            Ok(encoded.boxed())
        });
        self.entries.push((P::PATH, Handler::Stream(erased)));
        self
    }

    /// Build the namespace tree.
    ///
    /// # Errors
    /// - `TipcError::InvalidPath` for empty segments, disallowed characters or
    ///   a path that is both a namespace and a procedure.
    /// - `TipcError::DuplicateProcedure` if a path is registered twice.
    pub fn build(self) -> Result<Router> {
        let mut root = BTreeMap::new();
        let len = self.entries.len();
        for (path, handler) in self.entries {
            insert(&mut root, path, handler)?;
        }
        Ok(Router { root, len })
    }
}

fn insert(root: &mut BTreeMap<String, Node>, path: &str, handler: Handler) -> Result<()> {
    let invalid = || TipcError::InvalidPath {
        path: path.to_string(),
    };

    let segments: Vec<&str> = path.split('.').collect();
    if segments.iter().any(|s| !is_valid_segment(s)) {
        return Err(invalid());
    }
    let Some((leaf, namespaces)) = segments.split_last() else {
        return Err(invalid());
    };

    let mut level = root;
    for segment in namespaces {
        let node = level
            .entry((*segment).to_string())
            .or_insert_with(|| Node::Namespace(BTreeMap::new()));
        level = match node {
            Node::Namespace(children) => children,
            Node::Leaf(_) => return Err(invalid()),
        };
    }

    match level.entry((*leaf).to_string()) {
        Entry::Vacant(slot) => {
            slot.insert(Node::Leaf(handler));
            Ok(())
        }
        Entry::Occupied(existing) => match existing.get() {
            Node::Leaf(_) => Err(TipcError::DuplicateProcedure {
                path: path.to_string(),
            }),
            Node::Namespace(_) => Err(invalid()),
        },
    }
}

fn is_valid_segment(segment: &str) -> bool {
    !segment.is_empty()
        && segment
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

fn decode_args<A: serde::de::DeserializeOwned>(path: &str, args: Value) -> Result<A> {
    serde_json::from_value(args).map_err(|e| TipcError::InvalidArgs {
        path: path.to_string(),
        reason: e.to_string(),
    })
}

fn handler_failure(err: anyhow::Error) -> TipcError {
    TipcError::HandlerFailure(format!("{err:#}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::WindowId;
    use crate::ipc::envelope::ErrorCode;
    use serde_json::json;

    struct Echo;
    impl QueryProcedure for Echo {
        const PATH: &'static str = "debug.echo";
        type Args = String;
        type Output = String;
    }

    struct Ping;
    impl NotifyProcedure for Ping {
        const PATH: &'static str = "debug.ping";
        type Args = ();
    }

    struct Ticks;
    impl StreamProcedure for Ticks {
        const PATH: &'static str = "debug.ticks";
        type Item = u32;
    }

    struct Shadow;
    impl QueryProcedure for Shadow {
        const PATH: &'static str = "debug";
        type Args = ();
        type Output = ();
    }

    fn ctx(path: &str) -> CallContext {
        CallContext {
            sender: WindowId(1),
            correlation_id: "1".into(),
            path: path.into(),
        }
    }

    fn sample_router() -> Router {
        Router::builder()
            .query::<Echo, _, _>(|text, _ctx| async move { Ok(text) })
            .notify::<Ping, _, _>(|(), _ctx| async { Ok(()) })
            .stream::<Ticks, _, _>(|_ctx| Ok(futures::stream::iter(vec![1u32, 2, 3])))
            .build()
            .expect("sample router builds")
    }

    #[test]
    fn empty_builder_yields_empty_router() {
        let router = Router::builder().build().expect("empty router builds");
        assert!(router.is_empty());
        assert!(router.resolve("debug.echo").is_none());
        assert!(router.procedures().is_empty());
    }

    #[test]
    fn resolves_leaves_and_reports_conventions() {
        let router = sample_router();
        assert_eq!(router.len(), 3);
        assert!(!router.is_empty());
        assert_eq!(
            router.resolve("debug.echo").map(Handler::convention),
            Some(Convention::Query)
        );
        assert_eq!(
            router.resolve("debug.ping").map(Handler::convention),
            Some(Convention::Notify)
        );
        assert_eq!(
            router.resolve("debug.ticks").map(Handler::convention),
            Some(Convention::Stream)
        );
        assert_eq!(
            router.procedures(),
            vec![
                ("debug.echo".to_string(), Convention::Query),
                ("debug.ping".to_string(), Convention::Notify),
                ("debug.ticks".to_string(), Convention::Stream),
            ]
        );
    }

    #[test]
    fn namespaces_and_unknown_paths_do_not_resolve() {
        let router = sample_router();
        assert!(router.resolve("debug").is_none());
        assert!(router.resolve("debug.echo.deeper").is_none());
        assert!(router.resolve("debug.doesNotExist").is_none());
        assert!(router.resolve("").is_none());
    }

    #[test]
    fn duplicate_paths_are_rejected() {
        let err = Router::builder()
            .query::<Echo, _, _>(|text, _ctx| async move { Ok(text) })
            .query::<Echo, _, _>(|text, _ctx| async move { Ok(text) })
            .build()
            .expect_err("duplicate must fail");
        assert!(matches!(err, TipcError::DuplicateProcedure { ref path } if path == "debug.echo"));
    }

    #[test]
    fn leaf_and_namespace_cannot_share_a_path() {
        let err = Router::builder()
            .query::<Echo, _, _>(|text, _ctx| async move { Ok(text) })
            .query::<Shadow, _, _>(|(), _ctx| async { Ok(()) })
            .build()
            .expect_err("leaf over namespace must fail");
        assert!(matches!(err, TipcError::InvalidPath { .. }));
    }

    #[test]
    fn segment_validation() {
        assert!(is_valid_segment("getInfo"));
        assert!(is_valid_segment("get_app-info2"));
        assert!(!is_valid_segment(""));
        assert!(!is_valid_segment("has space"));
        assert!(!is_valid_segment("slash/y"));
    }

    #[tokio::test]
    async fn erased_query_decodes_args_and_encodes_output() {
        let router = sample_router();
        let Some(Handler::Query(echo)) = router.resolve("debug.echo") else {
            panic!("echo should be a query");
        };

        let out = echo(json!("hi"), ctx("debug.echo")).await.expect("echo succeeds");
        assert_eq!(out, json!("hi"));

        let err = echo(json!(12), ctx("debug.echo"))
            .await
            .expect_err("number is not a string");
        assert_eq!(err.code(), Some(ErrorCode::InvalidArgs));
    }

    #[tokio::test]
    async fn erased_query_classifies_handler_errors() {
        let router = Router::builder()
            .query::<Echo, _, _>(|_text, _ctx| async { Err(anyhow::anyhow!("disk on fire")) })
            .build()
            .expect("router builds");
        let Some(Handler::Query(echo)) = router.resolve("debug.echo") else {
            panic!("echo should be a query");
        };
        let err = echo(json!("x"), ctx("debug.echo"))
            .await
            .expect_err("handler fails");
        assert_eq!(err.code(), Some(ErrorCode::HandlerFailure));
        assert!(err.to_string().contains("disk on fire"));
    }

    #[tokio::test]
    async fn erased_stream_encodes_items() {
        let router = sample_router();
        let Some(Handler::Stream(ticks)) = router.resolve("debug.ticks") else {
            panic!("ticks should be a stream");
        };
        let items: Vec<Value> = ticks(ctx("debug.ticks"))
            .expect("stream opens")
            .collect()
            .await;
        assert_eq!(items, vec![json!(1), json!(2), json!(3)]);
    }
}
