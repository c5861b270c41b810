//! Handler trait and type erasure.
//!
//! # How async handlers are stored
//!
//! The route table holds handlers of *different* types in one map, and
//! middleware wraps them in more handlers of yet other types. Everything is
//! stored behind one trait object (`dyn ErasedHandler`):
//!
//! ```text
//! async fn users(req: Request) -> Response { … }   ← user writes this
//!        ↓ app.get("/users", users)
//! users.into_boxed_handler()                       ← Handler blanket impl
//!        ↓
//! Arc::new(FnHandler(users))                       ← heap-allocated wrapper
//!        ↓  stored as BoxedHandler = Arc<dyn ErasedHandler>
//! middleware(handler) → BoxedHandler               ← composed at registration
//!        ↓
//! handler.call(req)  at request time               ← one vtable dispatch per layer
//! ```
//!
//! Each handler also carries a label for route listings. It defaults to the
//! handler's type name (`my_app::users`); wrap with [`named`] to choose one.

use std::any::type_name;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use crate::request::Request;
use crate::response::{IntoResponse, Response};

// ── Internal types ───────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future.
///
/// `Pin<Box<…>>` lets the runtime poll it in place; `Send + 'static` let
/// tokio move it across worker threads.
pub type BoxFuture<T = Response> = Pin<Box<dyn Future<Output = T> + Send + 'static>>;

/// Dispatch interface shared by handlers and middleware-wrapped handlers.
pub trait ErasedHandler: Send + Sync + 'static {
    fn call(&self, req: Request) -> BoxFuture;
}

/// A type-erased handler shared across concurrent requests.
pub type BoxedHandler = Arc<dyn ErasedHandler>;

// ── Public Handler trait ─────────────────────────────────────────────────────

/// Implemented for every valid route handler.
///
/// You never implement this yourself. It is satisfied for any `async fn` (or
/// closure returning a future) with the signature:
///
/// ```text
/// async fn name(req: Request) -> impl IntoResponse
/// ```
///
/// and for the [`Named`] wrapper. The trait is **sealed**.
pub trait Handler: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_handler(self) -> BoxedHandler;

    /// Label shown in route listings.
    #[doc(hidden)]
    fn label(&self) -> String
    where
        Self: Sized,
    {
        type_name::<Self>().to_owned()
    }
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
}

impl<F, Fut, R> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_boxed_handler(self) -> BoxedHandler {
        Arc::new(FnHandler(self))
    }
}

// ── Concrete wrappers ────────────────────────────────────────────────────────

/// Bridges a typed handler function to [`ErasedHandler`].
struct FnHandler<F>(F);

impl<F, Fut, R> ErasedHandler for FnHandler<F>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_response() })
    }
}

/// A handler with an explicit listing label. Built by [`named`].
pub struct Named<H> {
    label: String,
    handler: H,
}

/// Gives `handler` a human-readable label for route listings.
///
/// ```rust
/// use gatehouse::{App, Request, handler::named};
///
/// let mut app = App::default();
/// app.get("/users", named("list users", |_req: Request| async { "[]" }));
/// ```
pub fn named<H: Handler>(label: impl Into<String>, handler: H) -> Named<H> {
    Named { label: label.into(), handler }
}

impl<H: Handler> private::Sealed for Named<H> {}

impl<H: Handler> Handler for Named<H> {
    fn into_boxed_handler(self) -> BoxedHandler {
        self.handler.into_boxed_handler()
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;

    use super::*;

    async fn list_users(_req: Request) -> &'static str {
        "[]"
    }

    #[test]
    fn label_defaults_to_type_name() {
        assert!(list_users.label().ends_with("list_users"));
    }

    #[test]
    fn named_overrides_label() {
        assert_eq!(named("users", list_users).label(), "users");
    }

    #[tokio::test]
    async fn boxed_handler_converts_output() {
        let h = (|_req: Request| async { StatusCode::ACCEPTED }).into_boxed_handler();
        let resp = h.call(Request::new(http::Method::GET, "/")).await;
        assert_eq!(resp.status_code(), StatusCode::ACCEPTED);
    }
}
