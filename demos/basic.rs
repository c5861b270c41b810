//! Minimal gatehouse example: JSON endpoints, a guarded admin group, a
//! response cache, and a gRPC echo service, all on one port.
//!
//! Run with:
//!   DEBUG_AUTH_KEY=s3cret RUST_LOG=gatehouse=debug cargo run --example basic
//!
//! Try:
//!   curl localhost:7841/_/health
//!   curl 'localhost:7841/api/users?name[sw]=al&age={"gte":21}'
//!   curl -X POST localhost:7841/api/users -d '{"name":"alice"}'
//!   curl -H 'authorization: Bearer t' localhost:7841/api/admin/stats
//!   curl -X POST -H 'X-Debug-Key: s3cret' localhost:7841/_/debug/toggle

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use gatehouse::cache::{Cache, InMemoryCache};
use gatehouse::grpc::{GrpcFuture, GrpcService, GrpcStatus};
use gatehouse::{
    App, AppError, Authorizer, BoxError, CancelToken, Context, Request, Response, Server, ServerConfig,
    middleware, query_filter,
};
use http::StatusCode;
use serde::Deserialize;

#[tokio::main]
async fn main() -> Result<(), gatehouse::Error> {
    gatehouse::logging::init()?;

    let cache = Arc::new(InMemoryCache::new(Duration::from_secs(60), Duration::from_secs(30)));
    cache.start_cleanup(&CancelToken::new());

    let config = ServerConfig::from_env()
        .cache(cache)
        .authorizer(Arc::new(BearerToken))
        .post_request(|ctx, head, done| {
            tracing::info!(
                request_id = ctx.request_id().unwrap_or("-"),
                path = head.uri.path(),
                status = done.status.as_u16(),
                "served"
            );
            Ok(())
        });

    let mut app = App::new(config);
    app.grpc_service("echo.v1.Echo", Arc::new(Echo));

    let mut api = app.group("/api");
    api.get("/users",  list_users);
    api.post("/users", create_user);

    let mut admin = api.group("/admin");
    admin.layer(middleware::authorize());
    admin.get("/stats", stats);

    Server::bind(":7841").await?.serve(app).await
}

// GET /api/users?name[sw]=al
//
// Filters come back as parsed; a real service would turn them into a query.
async fn list_users(req: Request) -> Result<Response, AppError> {
    let filters = query_filter::from_request(&req)?;
    Ok(Response::envelope_with(StatusCode::OK, "users", &filters))
}

#[derive(Deserialize)]
struct NewUser {
    name: String,
}

// POST /api/users
async fn create_user(req: Request) -> Result<Response, AppError> {
    let user: NewUser = req.json()?;
    if user.name.trim().is_empty() {
        return Err(AppError::validation("Invalid user").with_field("name", "must not be empty"));
    }
    if let Some(cache) = req.context().resources().cache() {
        cache.set(&format!("user:{}", user.name), Bytes::from(user.name.clone()));
    }
    Ok(Response::builder()
        .status(StatusCode::CREATED)
        .header("location", &format!("/api/users/{}", user.name))
        .envelope("created"))
}

// GET /api/admin/stats → requires `authorization: Bearer …`
async fn stats(req: Request) -> Response {
    let cached = req
        .context()
        .resources()
        .cache()
        .and_then(|c| c.get("user:alice"))
        .is_some();
    Response::envelope_with(StatusCode::OK, "stats", &serde_json::json!({ "alice_cached": cached }))
}

struct BearerToken;

impl Authorizer for BearerToken {
    fn authorize(&self, _ctx: &Context, req: &Request) -> Result<(), BoxError> {
        match req.header("authorization") {
            Some(v) if v.starts_with("Bearer ") => Ok(()),
            _ => Err("missing bearer token".into()),
        }
    }
}

/// Replies with the request message for `Say`; everything else is
/// unimplemented.
struct Echo;

impl GrpcService for Echo {
    fn call(&self, method: &str, _ctx: Context, message: Bytes) -> GrpcFuture {
        let method = method.to_owned();
        Box::pin(async move {
            match method.as_str() {
                "Say" => Ok(message),
                other => Err(GrpcStatus::unimplemented(format!("unknown method {other}"))),
            }
        })
    }
}
