//! Protocol classification.
//!
//! Before the route table is consulted, each registered [`ProtocolHandler`]
//! is asked, in registration order, whether it claims the request. The first
//! one that does owns the request outright: routing, pre/post phases, and
//! debug capture are all skipped, and the handler produces the response
//! itself.
//!
//! Default order: gRPC, then WebSocket, then anything registered with
//! [`App::protocol`](crate::App::protocol).

use std::sync::Arc;

use http::header::{CONNECTION, CONTENT_TYPE, UPGRADE};
use http::HeaderMap;

use crate::handler::BoxFuture;
use crate::request::Request;
use crate::response::Response;

/// A wire protocol that can claim requests.
pub trait ProtocolHandler: Send + Sync + 'static {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Whether this handler claims `req`. Must not have side effects, and
    /// should look only at the method, version, and headers.
    fn detect(&self, req: &Request) -> bool;

    fn handle(&self, req: Request) -> BoxFuture;
}

/// Ordered, append-only list of protocol handlers.
#[derive(Clone, Default)]
pub struct ProtocolRegistry {
    handlers: Vec<Arc<dyn ProtocolHandler>>,
}

impl ProtocolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, handler: Arc<dyn ProtocolHandler>) {
        self.handlers.push(handler);
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.handlers.iter().map(|h| h.name()).collect()
    }

    /// The first handler claiming `req`.
    pub fn detect(&self, req: &Request) -> Option<&Arc<dyn ProtocolHandler>> {
        self.handlers.iter().find(|h| h.detect(req))
    }

    /// Hands `req` to the first claiming handler, or gives it back.
    pub async fn dispatch(&self, req: Request) -> Result<Response, Request> {
        match self.detect(&req).map(Arc::clone) {
            Some(handler) => {
                tracing::debug!(protocol = handler.name(), "request claimed by protocol handler");
                Ok(handler.handle(req).await)
            }
            None => Err(req),
        }
    }
}

// ── Detectors ────────────────────────────────────────────────────────────────

/// gRPC: HTTP/2 with a `content-type` containing `application/grpc`.
pub fn is_grpc_request(req: &Request) -> bool {
    req.proto_major() == 2
        && req
            .header(CONTENT_TYPE)
            .is_some_and(|ct| ct.contains("application/grpc"))
}

/// WebSocket: `Connection` lists `upgrade` and `Upgrade` lists `websocket`,
/// both compared case-insensitively.
pub fn is_websocket_upgrade(req: &Request) -> bool {
    header_has_token(req.headers(), CONNECTION, "upgrade")
        && header_has_token(req.headers(), UPGRADE, "websocket")
}

fn header_has_token(headers: &HeaderMap, name: http::HeaderName, token: &str) -> bool {
    headers
        .get_all(name)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .any(|t| t.trim().eq_ignore_ascii_case(token))
}

#[cfg(test)]
mod tests {
    use http::Version;

    use super::*;

    struct Fixed {
        name: &'static str,
        claims: bool,
    }

    impl ProtocolHandler for Fixed {
        fn name(&self) -> &'static str { self.name }
        fn detect(&self, _req: &Request) -> bool { self.claims }
        fn handle(&self, _req: Request) -> BoxFuture {
            let name = self.name;
            Box::pin(async move { Response::text(name) })
        }
    }

    fn registry(entries: &[(&'static str, bool)]) -> ProtocolRegistry {
        let mut reg = ProtocolRegistry::new();
        for &(name, claims) in entries {
            reg.register(Arc::new(Fixed { name, claims }));
        }
        reg
    }

    #[tokio::test]
    async fn first_claiming_handler_wins() {
        let reg = registry(&[("a", false), ("b", true), ("c", true)]);
        let resp = reg.dispatch(Request::new(http::Method::GET, "/")).await.ok().unwrap();
        assert_eq!(resp.body().as_ref(), b"b");
    }

    #[tokio::test]
    async fn unclaimed_request_is_returned() {
        let reg = registry(&[("a", false)]);
        let req = reg.dispatch(Request::new(http::Method::GET, "/kept")).await.unwrap_err();
        assert_eq!(req.path(), "/kept");
    }

    #[test]
    fn grpc_needs_http2_and_grpc_content_type() {
        let h1 = Request::new(http::Method::POST, "/svc/M").with_header("content-type", "application/grpc");
        assert!(!is_grpc_request(&h1));
        let h2 = h1.with_version(Version::HTTP_2);
        assert!(is_grpc_request(&h2));
        let proto = Request::new(http::Method::POST, "/svc/M")
            .with_version(Version::HTTP_2)
            .with_header("content-type", "application/grpc+proto");
        assert!(is_grpc_request(&proto));
        let json = Request::new(http::Method::POST, "/svc/M")
            .with_version(Version::HTTP_2)
            .with_header("content-type", "application/json");
        assert!(!is_grpc_request(&json));
    }

    #[test]
    fn websocket_upgrade_tokens_are_case_insensitive() {
        let req = Request::new(http::Method::GET, "/ws")
            .with_header("connection", "keep-alive, Upgrade")
            .with_header("upgrade", "WebSocket");
        assert!(is_websocket_upgrade(&req));
        let plain = Request::new(http::Method::GET, "/ws").with_header("upgrade", "websocket");
        assert!(!is_websocket_upgrade(&plain));
    }
}
