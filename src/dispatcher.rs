//! The request pipeline.
//!
//! ```text
//! request ─► assign request ID
//!         ─► global middleware ─┬─► protocol handler (gRPC, WebSocket, …)
//!                               └─► route table ─┬─► 405
//!                                                ├─► static files / 404
//!                                                └─► debug dump
//!                                                    pre-request phases
//!                                                    group middleware ─► handler
//!                                                    post-request phases
//! ```
//!
//! Requests a protocol handler claims skip everything below it: no route
//! lookup, no phases, no debug capture. Global middleware still wraps them.

use std::sync::Arc;
use std::time::{Duration, Instant};

use http::HeaderValue;
use tracing::{Instrument, debug, info_span, warn};

use crate::app_error::write_error;
use crate::config::{Resources, ServerConfig};
use crate::context::{CancelToken, Context};
use crate::debug::{self, DebugCapture, DebugConfig};
use crate::handler::{BoxFuture, BoxedHandler, ErasedHandler};
use crate::middleware::{Middleware, compose};
use crate::phase::{self, Completion, PostRequestFn, PreRequestFn};
use crate::protocol::ProtocolRegistry;
use crate::request::Request;
use crate::request_id::RequestIdGenerator;
use crate::response::Response;
use crate::router::{self, Resolution, Route, RouteTable};
use crate::static_files::StaticFiles;
use crate::websocket::ConnectionRegistry;
use crate::writer::{BufferedWriter, StatusRecorder};

/// A frozen [`App`](crate::App), shared by every connection.
pub struct Dispatcher {
    pipeline: BoxedHandler,
    ids: RequestIdGenerator,
    resources: Arc<Resources>,
    shutdown: CancelToken,
    shutdown_grace: Duration,
    debug: Arc<DebugConfig>,
    connections: ConnectionRegistry,
}

impl Dispatcher {
    pub(crate) fn new(
        config: ServerConfig,
        protocols: ProtocolRegistry,
        routes: RouteTable,
        static_files: Option<StaticFiles>,
        middleware: Vec<Middleware>,
        debug: Arc<DebugConfig>,
        connections: ConnectionRegistry,
    ) -> Self {
        let core = Arc::new(Core {
            protocols,
            routes,
            static_files,
            debug: Arc::clone(&debug),
            pre_request: config.pre_request,
            post_request: config.post_request,
        });
        Self {
            pipeline: compose(Arc::new(CoreHandler(core)), &middleware),
            ids: RequestIdGenerator::new(config.id_shards, config.request_id_header),
            resources: Arc::new(config.resources),
            shutdown: CancelToken::new(),
            shutdown_grace: config.shutdown_grace,
            debug,
            connections,
        }
    }

    /// Runs one request through the pipeline.
    ///
    /// The request gets a fresh context bound to this dispatcher: its
    /// resources, and a token that fires when the request finishes or the
    /// dispatcher shuts down. Any context already on `req` is replaced.
    pub async fn handle(&self, mut req: Request) -> Response {
        *req.context_mut() = self.new_context();
        self.dispatch(req).await
    }

    /// [`handle`](Self::handle) for a request whose context came from
    /// [`new_context`](Self::new_context).
    pub(crate) async fn dispatch(&self, mut req: Request) -> Response {
        let _request_done = req.context().cancel_token().clone().drop_guard();
        let id = self.ids.assign(&mut req);
        let span = info_span!("request", request_id = %id, method = %req.method(), path = req.path());

        async move {
            let mut resp = self.pipeline.call(req).await;
            match HeaderValue::from_str(&id) {
                Ok(value) => {
                    resp.headers_mut().insert(self.ids.header().clone(), value);
                }
                Err(e) => warn!(error = %e, "request id not echoed"),
            }
            resp
        }
        .instrument(span)
        .await
    }

    pub(crate) fn new_context(&self) -> Context {
        Context::for_request(&self.shutdown, Arc::clone(&self.resources))
    }

    /// Cancels every request and WebSocket session context.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn shutdown_grace(&self) -> Duration {
        self.shutdown_grace
    }

    pub fn request_ids(&self) -> &RequestIdGenerator {
        &self.ids
    }

    pub fn debug(&self) -> &DebugConfig {
        &self.debug
    }

    pub fn connections(&self) -> &ConnectionRegistry {
        &self.connections
    }
}

// ── Core ─────────────────────────────────────────────────────────────────────

/// Everything inside global middleware.
struct Core {
    protocols: ProtocolRegistry,
    routes: RouteTable,
    static_files: Option<StaticFiles>,
    debug: Arc<DebugConfig>,
    pre_request: Vec<PreRequestFn>,
    post_request: Vec<PostRequestFn>,
}

struct CoreHandler(Arc<Core>);

impl ErasedHandler for CoreHandler {
    fn call(&self, req: Request) -> BoxFuture {
        let core = Arc::clone(&self.0);
        Box::pin(async move { core.serve(req).await })
    }
}

impl Core {
    async fn serve(&self, req: Request) -> Response {
        let req = match self.protocols.dispatch(req).await {
            Ok(resp) => return resp,
            Err(req) => req,
        };
        match self.routes.resolve(req.method(), req.path()) {
            Resolution::Found(route) => self.run_route(route, req).await,
            Resolution::MethodNotAllowed(route) => router::method_not_allowed(route.methods(), req.method()),
            Resolution::NotFound => match &self.static_files {
                Some(files) => files.serve(&req).await,
                None => router::not_found(),
            },
        }
    }

    async fn run_route(&self, route: &Route, mut req: Request) -> Response {
        let started = Instant::now();
        let capture = self.debug.is_enabled();
        if capture {
            debug::log_request(&req);
        }
        let head = req.head();
        let mut w = DebugCapture::new(StatusRecorder::new(BufferedWriter::new()), capture, req.version());

        let ctx = match phase::run_pre(&self.pre_request, req.context().clone(), &req) {
            Ok(ctx) => ctx,
            Err((index, e)) => {
                warn!(phase = index, error = %e, "pre-request phase failed");
                write_error(&mut w, e);
                return w.finish().into_inner().into_response();
            }
        };
        *req.context_mut() = ctx.clone();

        route.handler.call(req).await.write_to(&mut w);

        let recorder = w.finish();
        let completion = Completion {
            status: recorder.status(),
            size: recorder.size(),
            duration: started.elapsed(),
        };
        debug!(
            status = completion.status.as_u16(),
            size = completion.size,
            duration_ms = completion.duration.as_millis() as u64,
            "request completed"
        );
        phase::run_post(&self.post_request, &ctx, &head, &completion);
        recorder.into_inner().into_response()
    }
}

#[cfg(test)]
mod tests {
    use tracing_test::traced_test;

    use crate::app::App;
    use crate::request::Request;

    fn app() -> App {
        let mut app = App::default();
        app.get("/ping", |_req: Request| async { "pong-body" });
        app
    }

    #[tokio::test]
    #[traced_test]
    async fn dumps_only_while_debug_is_enabled() {
        let dispatcher = app().build();

        dispatcher.handle(Request::new(http::Method::GET, "/ping")).await;
        assert!(!logs_contain("request dump"));

        dispatcher.debug().set_enabled(true);
        let resp = dispatcher.handle(Request::new(http::Method::GET, "/ping")).await;
        assert_eq!(resp.body().as_ref(), b"pong-body");
        assert!(logs_contain("request dump"));
        assert!(logs_contain("response dump"));
        assert!(logs_contain("pong-body"));
    }

    #[tokio::test]
    #[traced_test]
    async fn unmatched_requests_skip_capture_and_completion() {
        let dispatcher = app().build();
        dispatcher.debug().set_enabled(true);

        let resp = dispatcher.handle(Request::new(http::Method::GET, "/missing")).await;
        assert_eq!(resp.status_code(), http::StatusCode::NOT_FOUND);
        assert!(!logs_contain("request dump"));
        assert!(!logs_contain("request completed"));
    }

    #[tokio::test]
    async fn response_carries_the_request_id() {
        let dispatcher = app().build();
        let resp = dispatcher.handle(Request::new(http::Method::GET, "/ping")).await;
        let echoed = resp.headers()[dispatcher.request_ids().header()].to_str().unwrap();
        assert!(echoed.starts_with(dispatcher.request_ids().prefix()), "{echoed}");
    }

    #[test]
    fn shutdown_cancels_request_contexts() {
        let dispatcher = app().build();
        let ctx = dispatcher.new_context();
        let session = ctx.detach();
        dispatcher.shutdown();
        assert!(dispatcher.is_shut_down());
        assert!(ctx.cancel_token().is_cancelled());
        assert!(session.cancel_token().is_cancelled());
    }
}
