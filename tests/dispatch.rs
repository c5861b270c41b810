//! In-process pipeline tests through `Dispatcher::handle`.

use std::sync::{Arc, Mutex};

use bytes::Bytes;
use gatehouse::grpc::{self, GrpcFuture, GrpcService};
use gatehouse::middleware::{self, Middleware, Next};
use gatehouse::{App, Completion, Context, Request, Response, ServerConfig};
use http::{StatusCode, Version};

type Trail = Arc<Mutex<Vec<String>>>;

fn mark(trail: &Trail, name: &'static str) -> Middleware {
    let trail = Arc::clone(trail);
    middleware::from_fn(move |req: Request, next: Next| {
        trail.lock().unwrap().push(name.to_owned());
        next.run(req)
    })
}

struct Echo;

impl GrpcService for Echo {
    fn call(&self, _method: &str, _ctx: Context, message: Bytes) -> GrpcFuture {
        Box::pin(async move { Ok(message) })
    }
}

fn grpc_call(path: &str, message: &[u8]) -> Request {
    Request::new(http::Method::POST, path)
        .with_version(Version::HTTP_2)
        .with_header("content-type", "application/grpc")
        .with_body(grpc::encode_frame(message))
}

#[tokio::test]
async fn grpc_claims_requests_before_routing() {
    let mut app = App::default();
    app.grpc_service("echo.Echo", Arc::new(Echo));
    app.post("/echo.Echo/Say", |_req: Request| async { "http route" });
    let dispatcher = app.build();

    let resp = dispatcher.handle(grpc_call("/echo.Echo/Say", b"hi")).await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(resp.headers()["content-type"], "application/grpc");
    assert_eq!(resp.body(), &grpc::encode_frame(b"hi"));
    assert_eq!(resp.trailers().unwrap()["grpc-status"], "0");
}

#[tokio::test]
async fn grpc_content_type_over_http1_is_routed_as_http() {
    let mut app = App::default();
    app.grpc_service("echo.Echo", Arc::new(Echo));
    app.post("/echo.Echo/Say", |_req: Request| async { "http route" });
    let dispatcher = app.build();

    let req = grpc_call("/echo.Echo/Say", b"hi").with_version(Version::HTTP_11);
    let resp = dispatcher.handle(req).await;
    assert_eq!(resp.body().as_ref(), b"http route");
}

#[tokio::test]
async fn global_then_group_middleware_then_handler() {
    let trail: Trail = Arc::default();
    let mut app = App::default();
    app.layer(mark(&trail, "global"));
    {
        let mut api = app.group("/api");
        api.layer(mark(&trail, "a"));
        api.layer(mark(&trail, "b"));
        let handler_trail = Arc::clone(&trail);
        api.get("/users", move |_req: Request| {
            handler_trail.lock().unwrap().push("handler".to_owned());
            async { "users" }
        });
    }
    let dispatcher = app.build();

    let resp = dispatcher.handle(Request::new(http::Method::GET, "/api/users")).await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(*trail.lock().unwrap(), ["global", "a", "b", "handler"]);
}

#[tokio::test]
async fn nested_group_runs_parent_then_child_middleware() {
    let trail: Trail = Arc::default();
    let mut app = App::default();
    app.layer(mark(&trail, "global"));
    {
        let mut api = app.group("/api/");
        api.layer(mark(&trail, "api"));
        {
            let mut admin = api.group("//admin/");
            admin.layer(mark(&trail, "admin"));
            let handler_trail = Arc::clone(&trail);
            admin.get("/stats", move |_req: Request| {
                handler_trail.lock().unwrap().push("handler".to_owned());
                async { "stats" }
            });
        }
        api.get("/users", |_req: Request| async { "users" });
    }
    let dispatcher = app.build();

    let resp = dispatcher.handle(Request::new(http::Method::GET, "/api/admin/stats")).await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(resp.body().as_ref(), b"stats");
    assert_eq!(*trail.lock().unwrap(), ["global", "api", "admin", "handler"]);

    // The child's middleware never leaks into the parent.
    trail.lock().unwrap().clear();
    let resp = dispatcher.handle(Request::new(http::Method::GET, "/api/users")).await;
    assert_eq!(resp.status_code(), StatusCode::OK);
    assert_eq!(*trail.lock().unwrap(), ["global", "api"]);
}

#[tokio::test]
async fn global_middleware_also_wraps_unmatched_requests() {
    let trail: Trail = Arc::default();
    let mut app = App::default();
    app.layer(mark(&trail, "global"));
    let dispatcher = app.build();

    let resp = dispatcher.handle(Request::new(http::Method::GET, "/missing")).await;
    assert_eq!(resp.status_code(), StatusCode::NOT_FOUND);
    assert_eq!(*trail.lock().unwrap(), ["global"]);
}

#[tokio::test]
async fn failing_pre_phase_aborts_without_post_phases() {
    let trail: Trail = Arc::default();
    let post_trail = Arc::clone(&trail);
    let config = ServerConfig::new()
        .pre_request(|_ctx, _req| Err("tenant lookup failed".into()))
        .post_request(move |_ctx, _head, _done| {
            post_trail.lock().unwrap().push("post".to_owned());
            Ok(())
        });
    let mut app = App::new(config);
    let handler_trail = Arc::clone(&trail);
    app.get("/work", move |_req: Request| {
        handler_trail.lock().unwrap().push("handler".to_owned());
        async { "done" }
    });
    let dispatcher = app.build();

    let resp = dispatcher.handle(Request::new(http::Method::GET, "/work")).await;
    assert_eq!(resp.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["error"]["code"], "INTERNAL_ERROR");
    assert!(trail.lock().unwrap().is_empty());
}

#[derive(Clone)]
struct Tenant(&'static str);

#[tokio::test]
async fn pre_phase_context_reaches_handler_and_post_phase() {
    let seen: Arc<Mutex<Option<Completion>>> = Arc::default();
    let post_seen = Arc::clone(&seen);
    let config = ServerConfig::new()
        .pre_request(|mut ctx, _req| {
            ctx.insert(Tenant("acme"));
            Ok(ctx)
        })
        .post_request(move |ctx, head, done| {
            assert_eq!(ctx.get::<Tenant>().map(|t| t.0), Some("acme"));
            assert_eq!(head.uri.path(), "/tenant");
            *post_seen.lock().unwrap() = Some(*done);
            Ok(())
        });
    let mut app = App::new(config);
    app.get("/tenant", |req: Request| async move {
        req.context().get::<Tenant>().map_or("none", |t| t.0)
    });
    let dispatcher = app.build();

    let resp = dispatcher.handle(Request::new(http::Method::GET, "/tenant")).await;
    assert_eq!(resp.body().as_ref(), b"acme");
    let done = seen.lock().unwrap().expect("post phase ran");
    assert_eq!(done.status, StatusCode::OK);
    assert_eq!(done.size, 4);
}

#[tokio::test]
async fn peers_from_different_addresses_share_the_id_prefix() {
    let mut app = App::default();
    app.get("/id", |req: Request| async move { req.request_id().unwrap_or_default().to_owned() });
    let dispatcher = app.build();

    let mut ids = Vec::new();
    for addr in ["10.0.0.1:1000", "10.0.0.2:2000"] {
        let req = Request::new(http::Method::GET, "/id").with_remote_addr(addr.parse().unwrap());
        let resp = dispatcher.handle(req).await;
        ids.push(String::from_utf8(resp.body().to_vec()).unwrap());
    }
    let prefix = dispatcher.request_ids().prefix();
    assert!(ids.iter().all(|id| id.starts_with(prefix)), "{ids:?}");
}

#[tokio::test]
async fn request_context_is_cancelled_once_the_response_is_built() {
    let token: Arc<Mutex<Option<gatehouse::CancelToken>>> = Arc::default();
    let captured = Arc::clone(&token);
    let mut app = App::default();
    app.get("/ctx", move |req: Request| {
        *captured.lock().unwrap() = Some(req.context().cancel_token().clone());
        async { "ok" }
    });
    let dispatcher = app.build();

    dispatcher.handle(Request::new(http::Method::GET, "/ctx")).await;
    let token = token.lock().unwrap().take().expect("handler ran");
    assert!(token.is_cancelled());
}

#[tokio::test]
async fn authorize_middleware_guards_a_group() {
    struct HeaderKey;

    impl gatehouse::Authorizer for HeaderKey {
        fn authorize(&self, _ctx: &Context, req: &Request) -> Result<(), gatehouse::BoxError> {
            match req.header("x-api-key") {
                Some("letmein") => Ok(()),
                _ => Err("bad api key".into()),
            }
        }
    }

    let mut app = App::new(ServerConfig::new().authorizer(Arc::new(HeaderKey)));
    {
        let mut admin = app.group("/admin");
        admin.layer(middleware::authorize());
        admin.get("/stats", |_req: Request| async { Response::envelope(StatusCode::OK, "stats") });
    }
    let dispatcher = app.build();

    let denied = dispatcher.handle(Request::new(http::Method::GET, "/admin/stats")).await;
    assert_eq!(denied.status_code(), StatusCode::UNAUTHORIZED);

    let allowed = Request::new(http::Method::GET, "/admin/stats").with_header("x-api-key", "letmein");
    assert_eq!(dispatcher.handle(allowed).await.status_code(), StatusCode::OK);
}
