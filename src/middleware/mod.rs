//! Middleware layer.
//!
//! A [`Middleware`] turns one handler into another. Middleware registered on
//! the app wraps the whole dispatch pipeline, so it also sees gRPC and
//! WebSocket requests. Middleware registered on a group wraps only that
//! group's routes and runs after pre-request phases.
//!
//! For a list `[m1, m2, m3]` the composed handler is `m1(m2(m3(h)))`: the
//! first-registered middleware runs first.
//!
//! ```rust
//! use gatehouse::middleware::{self, Next};
//! use gatehouse::{App, Request};
//!
//! let mut app = App::default();
//! app.layer(middleware::from_fn(|req: Request, next: Next| async move {
//!     let mut resp = next.run(req).await;
//!     resp.headers_mut().insert("x-served-by", http::HeaderValue::from_static("gatehouse"));
//!     resp
//! }));
//! ```

mod auth;

use std::future::Future;
use std::sync::Arc;

pub use auth::authorize;

use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::request::Request;
use crate::response::IntoResponse;

/// A handler transform.
pub type Middleware = Arc<dyn Fn(BoxedHandler) -> BoxedHandler + Send + Sync>;

/// The rest of the chain, handed to a [`from_fn`] middleware.
pub struct Next {
    inner: BoxedHandler,
}

impl Next {
    pub fn run(self, req: Request) -> BoxFuture {
        self.inner.call(req)
    }
}

/// Builds middleware from an async function of the request and the rest of
/// the chain. Not calling `next.run` short-circuits everything inside.
pub fn from_fn<F, Fut, R>(f: F) -> Middleware
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |inner: BoxedHandler| -> BoxedHandler {
        Arc::new(FromFn { f: Arc::clone(&f), inner })
    })
}

struct FromFn<F> {
    f: Arc<F>,
    inner: BoxedHandler,
}

impl<F, Fut, R> ErasedHandler for FromFn<F>
where
    F: Fn(Request, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.f)(req, Next { inner: Arc::clone(&self.inner) });
        Box::pin(async move { fut.await.into_response() })
    }
}

/// Wraps `handler` so that `chain[0]` runs outermost.
pub fn compose(handler: BoxedHandler, chain: &[Middleware]) -> BoxedHandler {
    chain.iter().rev().fold(handler, |inner, mw| mw(inner))
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::handler::Handler;
    use crate::response::Response;

    type Trail = Arc<Mutex<Vec<&'static str>>>;

    fn mark(trail: &Trail, name: &'static str) -> Middleware {
        let trail = Arc::clone(trail);
        from_fn(move |req: Request, next: Next| {
            trail.lock().unwrap().push(name);
            next.run(req)
        })
    }

    #[tokio::test]
    async fn first_registered_runs_first() {
        let trail: Trail = Arc::default();
        let h = {
            let trail = Arc::clone(&trail);
            (move |_req: Request| {
                trail.lock().unwrap().push("h");
                async { "done" }
            })
            .into_boxed_handler()
        };
        let composed = compose(h, &[mark(&trail, "a"), mark(&trail, "b")]);
        composed.call(Request::new(http::Method::GET, "/")).await;
        assert_eq!(*trail.lock().unwrap(), ["a", "b", "h"]);
    }

    #[tokio::test]
    async fn skipping_next_short_circuits() {
        let deny = from_fn(|_req: Request, _next: Next| async {
            Response::status(http::StatusCode::FORBIDDEN)
        });
        let h = (|_req: Request| async { "unreachable" }).into_boxed_handler();
        let resp = compose(h, &[deny]).call(Request::new(http::Method::GET, "/")).await;
        assert_eq!(resp.status_code(), http::StatusCode::FORBIDDEN);
    }
}
