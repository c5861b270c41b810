//! Built-in health check.
//!
//! Every [`App`](crate::App) answers `GET /_/health` with `200 OK` and body
//! `"OK"`. The route goes through global middleware and the pre/post phases
//! like any other, so a failing pre-request phase also fails the probe.
//!
//! Gate on dependencies by registering your own handler on another path:
//!
//! ```rust,no_run
//! use gatehouse::{App, Request, Response};
//! use http::StatusCode;
//!
//! async fn ready(_req: Request) -> Response {
//!     if dependencies_are_healthy().await {
//!         Response::text("ready")
//!     } else {
//!         Response::status(StatusCode::SERVICE_UNAVAILABLE)
//!     }
//! }
//!
//! async fn dependencies_are_healthy() -> bool { true }
//!
//! let mut app = App::default();
//! app.get("/readyz", ready);
//! ```

use crate::{Request, Response};

pub const HEALTH_PATH: &str = "/_/health";

/// Always `200 OK` with body `"OK"`. If the process can answer at all, it is
/// alive; this handler has no dependencies.
pub async fn health(_req: Request) -> Response {
    Response::text("OK")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn answers_ok() {
        let resp = health(Request::new(http::Method::GET, HEALTH_PATH)).await;
        assert_eq!(resp.status_code(), http::StatusCode::OK);
        assert_eq!(resp.body().as_ref(), b"OK");
    }
}
