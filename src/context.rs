//! Request-scoped context and cooperative cancellation.
//!
//! Every request carries a [`Context`]: its request ID, a [`CancelToken`] that
//! fires when the client goes away or the server shuts down, the server-wide
//! [`Resources`], and a typed bag of values that pre-request phases and
//! middleware can fill in for the handler.
//!
//! Token hierarchy:
//!
//! ```text
//! server token ──┬── request token   (cancelled on disconnect / completion)
//!                └── session token   (WebSocket; outlives the upgrade request)
//! ```

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use http::Extensions;
use tokio::sync::watch;

use crate::config::Resources;

// ── CancelToken ──────────────────────────────────────────────────────────────

/// A cloneable cancellation signal. Cancelling a token cancels every child
/// derived from it; cancelling a child leaves the parent untouched.
#[derive(Clone, Debug)]
pub struct CancelToken {
    node: Arc<Node>,
}

#[derive(Debug)]
struct Node {
    tx: watch::Sender<bool>,
    parent: Option<CancelToken>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::with_parent(None)
    }

    fn with_parent(parent: Option<CancelToken>) -> Self {
        let (tx, _) = watch::channel(false);
        Self { node: Arc::new(Node { tx, parent }) }
    }

    /// A new token that is cancelled whenever `self` is.
    pub fn child(&self) -> Self {
        Self::with_parent(Some(self.clone()))
    }

    pub fn cancel(&self) {
        self.node.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.node.tx.borrow()
            || self.node.parent.as_ref().is_some_and(CancelToken::is_cancelled)
    }

    /// Resolves once this token or any ancestor is cancelled.
    pub fn cancelled(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            let mut rx = self.node.tx.subscribe();
            match &self.node.parent {
                Some(parent) => {
                    tokio::select! {
                        () = wait_set(&mut rx) => {}
                        () = parent.cancelled() => {}
                    }
                }
                None => wait_set(&mut rx).await,
            }
        })
    }

    /// Cancels the token when the returned guard is dropped.
    pub fn drop_guard(self) -> DropGuard {
        DropGuard(self)
    }
}

async fn wait_set(rx: &mut watch::Receiver<bool>) {
    // The sender lives in the token being awaited, so this cannot fail.
    let _ = rx.wait_for(|cancelled| *cancelled).await;
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Cancels its token on drop, including during unwinding.
#[derive(Debug)]
pub struct DropGuard(CancelToken);

impl Drop for DropGuard {
    fn drop(&mut self) {
        self.0.cancel();
    }
}

// ── Context ──────────────────────────────────────────────────────────────────

/// Request-scoped state handed from the dispatcher through middleware and
/// pre-request phases to the handler.
///
/// Cloning is cheap; values are reference counted.
#[derive(Clone, Debug)]
pub struct Context {
    request_id: Option<Arc<str>>,
    cancel: CancelToken,
    server: CancelToken,
    resources: Arc<Resources>,
    values: Extensions,
}

impl Context {
    pub(crate) fn for_request(server: &CancelToken, resources: Arc<Resources>) -> Self {
        Self {
            request_id: None,
            cancel: server.child(),
            server: server.clone(),
            resources,
            values: Extensions::new(),
        }
    }

    /// The request ID assigned by the dispatcher, if any.
    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub(crate) fn set_request_id(&mut self, id: impl Into<Arc<str>>) {
        self.request_id = Some(id.into());
    }

    /// Fires when the client disconnects, the request finishes, or the server
    /// shuts down.
    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// A context for work that outlives this request (a WebSocket session).
    /// It shares ID, resources and values, but its token descends from the
    /// server token rather than the request token.
    pub fn detach(&self) -> Self {
        Self {
            cancel: self.server.child(),
            ..self.clone()
        }
    }

    /// Server-wide resources: database handle, cache, authorizer.
    pub fn resources(&self) -> &Resources {
        &self.resources
    }

    /// Stores a typed value, replacing any previous value of the same type.
    pub fn insert<T: Clone + Send + Sync + 'static>(&mut self, value: T) -> Option<T> {
        self.values.insert(value)
    }

    pub fn get<T: Send + Sync + 'static>(&self) -> Option<&T> {
        self.values.get::<T>()
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::for_request(&CancelToken::new(), Arc::new(Resources::default()))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn cancelling_parent_cancels_child() {
        let parent = CancelToken::new();
        let child = parent.child();
        parent.cancel();
        assert!(child.is_cancelled());
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child should observe parent cancellation");
    }

    #[test]
    fn cancelling_child_leaves_parent_running() {
        let parent = CancelToken::new();
        let child = parent.child();
        child.cancel();
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[test]
    fn drop_guard_cancels() {
        let token = CancelToken::new();
        drop(token.clone().drop_guard());
        assert!(token.is_cancelled());
    }

    #[test]
    fn detached_context_survives_request_cancellation() {
        let server = CancelToken::new();
        let ctx = Context::for_request(&server, Arc::new(Resources::default()));
        let session = ctx.detach();
        ctx.cancel_token().cancel();
        assert!(!session.cancel_token().is_cancelled());
        server.cancel();
        assert!(session.cancel_token().is_cancelled());
    }

    #[test]
    fn typed_values_round_trip() {
        #[derive(Clone, Debug, PartialEq)]
        struct UserId(u64);

        let mut ctx = Context::default();
        assert!(ctx.get::<UserId>().is_none());
        ctx.insert(UserId(7));
        assert_eq!(ctx.get::<UserId>(), Some(&UserId(7)));
    }
}
