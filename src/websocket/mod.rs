//! WebSocket protocol handler.
//!
//! WebSocket routes live in their own exact-path table, separate from HTTP
//! routes, with their own middleware chain. An upgrade request for a path
//! with no WebSocket route is answered `404` without touching the HTTP
//! table.
//!
//! ```rust,no_run
//! use gatehouse::App;
//! use gatehouse::websocket::WsConnection;
//!
//! let mut app = App::default();
//! app.ws("/echo", |mut conn: WsConnection| async move {
//!     while let Some(msg) = conn.recv().await {
//!         if conn.send(msg).is_err() {
//!             break;
//!         }
//!     }
//! });
//! ```

mod registry;
mod session;

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use http::header::{CONNECTION, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, SEC_WEBSOCKET_VERSION, UPGRADE};
use http::{HeaderValue, StatusCode};
use hyper_util::rt::TokioIo;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tracing::{debug, warn};

pub use registry::ConnectionRegistry;
pub use session::{WsConnection, WsPeer};
pub use tokio_tungstenite::tungstenite::Message;

use crate::app_error::AppError;
use crate::handler::BoxFuture;
use crate::protocol::{ProtocolHandler, is_websocket_upgrade};
use crate::request::Request;
use crate::response::{IntoResponse, Response};

/// A type-erased WebSocket route handler.
pub type WsHandler = Arc<dyn Fn(WsConnection) -> BoxFuture<()> + Send + Sync>;

/// A WebSocket handler transform.
pub type WsMiddleware = Arc<dyn Fn(WsHandler) -> WsHandler + Send + Sync>;

/// Erases an async function of a connection into a [`WsHandler`].
pub fn ws_handler<F, Fut>(f: F) -> WsHandler
where
    F: Fn(WsConnection) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    Arc::new(move |conn| -> BoxFuture<()> { Box::pin(f(conn)) })
}

// ── Setup ────────────────────────────────────────────────────────────────────

/// WebSocket routes and middleware collected during setup.
#[derive(Clone, Default)]
pub struct WsRouter {
    routes: HashMap<String, WsHandler>,
    order: Vec<String>,
    middleware: Vec<WsMiddleware>,
}

impl WsRouter {
    pub fn route(&mut self, pattern: &str, handler: WsHandler) {
        if self.routes.insert(pattern.to_owned(), handler).is_none() {
            self.order.push(pattern.to_owned());
        }
    }

    pub fn layer(&mut self, mw: WsMiddleware) {
        self.middleware.push(mw);
    }

    /// Registered paths, in first-registration order.
    pub fn patterns(&self) -> &[String] {
        &self.order
    }

    /// Applies the middleware chain to every route. The first-registered
    /// middleware runs outermost.
    fn compose(&self) -> HashMap<String, WsHandler> {
        self.routes
            .iter()
            .map(|(pattern, handler)| {
                let composed = self
                    .middleware
                    .iter()
                    .rev()
                    .fold(Arc::clone(handler), |inner, mw| mw(inner));
                (pattern.clone(), composed)
            })
            .collect()
    }
}

// ── Protocol handler ─────────────────────────────────────────────────────────

/// Claims WebSocket upgrade requests.
pub struct WebSocketHandler {
    routes: HashMap<String, WsHandler>,
    connections: ConnectionRegistry,
    handshake_timeout: Duration,
}

impl WebSocketHandler {
    pub fn new(router: &WsRouter, connections: ConnectionRegistry, handshake_timeout: Duration) -> Self {
        Self { routes: router.compose(), connections, handshake_timeout }
    }

    fn upgrade(&self, mut req: Request) -> Response {
        let Some(handler) = self.routes.get(req.path()).map(Arc::clone) else {
            return Response::builder()
                .status(StatusCode::NOT_FOUND)
                .text("WebSocket route not found\n");
        };

        let accept = match validate_handshake(&req) {
            Ok(accept) => accept,
            Err(err) => return err.into_response(),
        };
        let Some(on_upgrade) = req.take_upgrade() else {
            return AppError::internal("An internal error occurred")
                .add_internal_log("connection does not support protocol upgrades")
                .into_response();
        };

        let ctx = req.context().detach();
        let connections = self.connections.clone();
        let timeout = self.handshake_timeout;
        let path = req.path().to_owned();
        tokio::spawn(async move {
            let upgraded = match tokio::time::timeout(timeout, on_upgrade).await {
                Ok(Ok(upgraded)) => upgraded,
                Ok(Err(e)) => {
                    warn!(path = %path, error = %e, "websocket upgrade failed");
                    return;
                }
                Err(_) => {
                    warn!(path = %path, "websocket handshake timed out");
                    return;
                }
            };
            debug!(path = %path, "websocket session started");
            let ws = WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None).await;
            session::run_session(ws, handler, ctx, connections).await;
            debug!(path = %path, "websocket session ended");
        });

        let mut resp = Response::status(StatusCode::SWITCHING_PROTOCOLS);
        let headers = resp.headers_mut();
        headers.insert(UPGRADE, HeaderValue::from_static("websocket"));
        headers.insert(CONNECTION, HeaderValue::from_static("Upgrade"));
        headers.insert(SEC_WEBSOCKET_ACCEPT, accept);
        resp
    }
}

/// Checks the client handshake and computes `Sec-WebSocket-Accept`.
fn validate_handshake(req: &Request) -> Result<HeaderValue, AppError> {
    if req.method() != http::Method::GET {
        return Err(AppError::bad_request("WebSocket upgrade requires GET"));
    }
    if req.header(SEC_WEBSOCKET_VERSION) != Some("13") {
        return Err(AppError::bad_request("Unsupported WebSocket version"));
    }
    let key = req
        .header(SEC_WEBSOCKET_KEY)
        .filter(|k| !k.is_empty())
        .ok_or_else(|| AppError::bad_request("Missing Sec-WebSocket-Key"))?;
    HeaderValue::from_str(&derive_accept_key(key.as_bytes()))
        .map_err(|e| AppError::internal("An internal error occurred").with_error(e))
}

impl ProtocolHandler for WebSocketHandler {
    fn name(&self) -> &'static str {
        "websocket"
    }

    fn detect(&self, req: &Request) -> bool {
        is_websocket_upgrade(req)
    }

    fn handle(&self, req: Request) -> BoxFuture {
        let resp = self.upgrade(req);
        Box::pin(async move { resp })
    }
}
