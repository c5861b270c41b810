//! Application setup.
//!
//! An [`App`] is the mutable half of a server: routes, groups, middleware,
//! WebSocket endpoints, gRPC services, and the static fallback are all
//! registered on it during startup. [`App::build`] freezes everything into a
//! [`Dispatcher`], which is shared read-only by every connection.
//!
//! Every app starts with two built-in routes:
//!
//! | Path | Method | Purpose |
//! |---|---|---|
//! | `/_/health` | GET | Liveness probe, always `"OK"` |
//! | `/_/debug/toggle` | POST | Flip debug capture (needs `X-Debug-Key`) |

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::app_error::AppError;
use crate::config::ServerConfig;
use crate::debug::{self, DebugConfig, TOGGLE_PATH};
use crate::dispatcher::Dispatcher;
use crate::group::Group;
use crate::grpc::{GrpcHandler, GrpcServer, GrpcService};
use crate::handler::{BoxedHandler, Handler, named};
use crate::health::{self, HEALTH_PATH};
use crate::method::{Method, MethodSet};
use crate::middleware::Middleware;
use crate::protocol::{ProtocolHandler, ProtocolRegistry};
use crate::request::Request;
use crate::router::{RouteInfo, RouteList, RouteTable};
use crate::static_files::{StaticFiles, StaticOptions};
use crate::websocket::{ConnectionRegistry, WebSocketHandler, WsConnection, WsMiddleware, WsRouter, ws_handler};

/// Server setup. See the [module docs](self).
///
/// ```rust
/// use gatehouse::{App, Request, ServerConfig};
///
/// let mut app = App::new(ServerConfig::from_env());
/// app.get("/hello", |_req: Request| async { "hello" });
///
/// let mut api = app.group("/api");
/// api.get("/users", |_req: Request| async { "[]" });
///
/// let dispatcher = app.build();
/// ```
pub struct App {
    config: ServerConfig,
    middleware: Vec<Middleware>,
    routes: RouteTable,
    ws: WsRouter,
    grpc: GrpcServer,
    protocols: Vec<Arc<dyn ProtocolHandler>>,
    static_files: Option<StaticFiles>,
    connections: ConnectionRegistry,
    debug: Arc<DebugConfig>,
}

impl App {
    pub fn new(config: ServerConfig) -> Self {
        let debug = Arc::new(DebugConfig::new(config.debug_key.clone()));
        let mut app = Self {
            config,
            middleware: Vec::new(),
            routes: RouteTable::new(),
            ws: WsRouter::default(),
            grpc: GrpcServer::new(),
            protocols: Vec::new(),
            static_files: None,
            connections: ConnectionRegistry::new(),
            debug,
        };

        let toggle_config = Arc::clone(&app.debug);
        app.post(
            TOGGLE_PATH,
            named("DebugToggle", move |req: Request| debug::toggle(Arc::clone(&toggle_config), req)),
        );
        app.get(HEALTH_PATH, named("Health", health::health));
        app
    }

    // ── Middleware ───────────────────────────────────────────────────────────

    /// Appends global middleware. It wraps the whole pipeline, including
    /// requests a protocol handler claims, regardless of when routes were
    /// registered.
    pub fn layer(&mut self, mw: Middleware) -> &mut Self {
        self.middleware.push(mw);
        self
    }

    // ── HTTP routes ──────────────────────────────────────────────────────────

    /// Registers `handler` at the exact path `pattern` for `methods` (GET if
    /// empty). Registering a path again replaces the earlier route.
    pub fn route<H: Handler>(
        &mut self,
        pattern: &str,
        methods: impl IntoIterator<Item = Method>,
        handler: H,
    ) -> &mut Self {
        let label = handler.label();
        self.insert_route(pattern, MethodSet::new(methods), handler.into_boxed_handler(), label);
        self
    }

    pub fn get<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Get], handler)
    }

    pub fn post<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Post], handler)
    }

    pub fn put<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Put], handler)
    }

    pub fn delete<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Delete], handler)
    }

    pub fn patch<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Patch], handler)
    }

    /// A route group under `prefix`.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group::new(self, prefix)
    }

    pub(crate) fn insert_route(&mut self, pattern: &str, methods: MethodSet, handler: BoxedHandler, label: String) {
        self.routes.insert(pattern, methods, handler, label);
    }

    // ── Other protocols ──────────────────────────────────────────────────────

    /// Registers a WebSocket endpoint at the exact path `pattern`.
    pub fn ws<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(WsConnection) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.ws.route(pattern, ws_handler(handler));
        self
    }

    /// Appends WebSocket middleware. Applies to every WebSocket route.
    pub fn ws_layer(&mut self, mw: WsMiddleware) -> &mut Self {
        self.ws.layer(mw);
        self
    }

    /// Registers a gRPC service under its fully-qualified name.
    pub fn grpc_service(&mut self, name: impl Into<String>, service: Arc<dyn GrpcService>) -> &mut Self {
        self.grpc.register(name, service);
        self
    }

    /// Adds a protocol handler after the built-in gRPC and WebSocket ones.
    pub fn protocol(&mut self, handler: Arc<dyn ProtocolHandler>) -> &mut Self {
        self.protocols.push(handler);
        self
    }

    /// Serves files from `dist` for requests nothing else claimed.
    pub fn serve_static(&mut self, dist: impl AsRef<Path>, options: StaticOptions) -> Result<(), AppError> {
        let files = StaticFiles::new(dist, options)?;
        info!(root = %files.root().display(), spa = files.options().spa, "static files registered");
        self.static_files = Some(files);
        Ok(())
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// Every registered route: HTTP routes in registration order, then
    /// WebSocket routes, then the static fallback.
    pub fn routes(&self) -> RouteList {
        let mut list = self.routes.infos();
        list.extend(self.ws.patterns().iter().map(|pattern| RouteInfo {
            pattern: pattern.clone(),
            methods: vec![Method::Get.as_str()],
            handler: "WebSocket".to_owned(),
        }));
        if let Some(files) = &self.static_files {
            list.push(RouteInfo {
                pattern: "/*".to_owned(),
                methods: vec![Method::Get.as_str()],
                handler: files.label(),
            });
        }
        RouteList(list)
    }

    pub fn log_routes(&self) {
        info!("\n{}", self.routes());
    }

    /// The registry WebSocket sessions publish themselves into.
    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }

    pub fn debug(&self) -> &Arc<DebugConfig> {
        &self.debug
    }

    // ── Build ────────────────────────────────────────────────────────────────

    /// Freezes the setup. Protocol priority is gRPC, then WebSocket, then
    /// anything added with [`protocol`](Self::protocol).
    pub fn build(self) -> Dispatcher {
        let mut protocols = ProtocolRegistry::new();
        protocols.register(Arc::new(GrpcHandler::new(Arc::new(self.grpc))));
        protocols.register(Arc::new(WebSocketHandler::new(
            &self.ws,
            self.connections.clone(),
            self.config.ws_handshake_timeout,
        )));
        for handler in self.protocols {
            protocols.register(handler);
        }

        Dispatcher::new(
            self.config,
            protocols,
            self.routes,
            self.static_files,
            self.middleware,
            self.debug,
            self.connections,
        )
    }
}

impl Default for App {
    fn default() -> Self {
        Self::new(ServerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_ins_are_listed_first() {
        let app = App::default();
        let routes = app.routes();
        let listed: Vec<(&str, &str)> = routes.0.iter().map(|r| (r.pattern.as_str(), r.handler.as_str())).collect();
        assert_eq!(listed, [(TOGGLE_PATH, "DebugToggle"), (HEALTH_PATH, "Health")]);
    }

    #[test]
    fn listing_order_is_http_then_websocket_then_static() {
        let dist = tempfile::tempdir().unwrap();
        std::fs::write(dist.path().join("index.html"), "app").unwrap();

        let mut app = App::default();
        app.ws("/chat", |_conn: WsConnection| async {});
        app.get("/users", named("ListUsers", |_req: Request| async { "[]" }));
        app.serve_static(dist.path(), StaticOptions::default()).unwrap();

        let routes = app.routes();
        let tail: Vec<(&str, &str)> =
            routes.0[2..].iter().map(|r| (r.pattern.as_str(), r.handler.as_str())).collect();
        assert_eq!(
            tail,
            [("/users", "ListUsers"), ("/chat", "WebSocket"), ("/*", "FileServer(index.html)")]
        );
        let printed = routes.to_string();
        assert!(printed.contains("Pattern: /chat"));
    }

    #[test]
    fn default_label_is_the_type_name() {
        async fn list_users(_req: Request) -> &'static str {
            "[]"
        }
        let mut app = App::default();
        app.get("/users", list_users);
        let routes = app.routes();
        assert!(routes.0[2].handler.ends_with("list_users"), "{}", routes.0[2].handler);
    }

    #[test]
    fn serve_static_propagates_validation_errors() {
        let mut app = App::default();
        let err = app.serve_static("/no/such/dist", StaticOptions::default()).unwrap_err();
        assert_eq!(err.message(), "Distribution directory not found");
        assert_eq!(app.routes().0.len(), 2);
    }
}
