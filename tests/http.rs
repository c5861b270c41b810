//! End-to-end HTTP/1.1 tests against a live server.

use gatehouse::{App, AppError, Request, Response, ServerConfig};
use http::StatusCode;

mod common;

fn app() -> App {
    let mut app = App::new(ServerConfig::new().debug_key("s3cret"));
    let mut api = app.group("/api");
    api.get("/users", |_req: Request| async { Response::envelope(StatusCode::OK, "users") });
    api.post("/users", create_user);
    app.get("/whoami", |req: Request| async move {
        req.request_id().unwrap_or_default().to_owned()
    });
    app
}

async fn create_user(req: Request) -> Result<Response, AppError> {
    let user: serde_json::Value = req.json()?;
    match user.get("name").and_then(|n| n.as_str()) {
        Some(name) if !name.is_empty() => Ok(Response::envelope(StatusCode::CREATED, "created")),
        _ => Err(AppError::validation("Invalid user").with_field("name", "must not be empty")),
    }
}

#[tokio::test]
async fn health_answers_ok() {
    let server = common::start(app()).await;
    let resp = common::get(server.addr, "/_/health").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.body, "OK");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn grouped_route_answers_with_an_envelope() {
    let server = common::start(app()).await;
    let resp = common::get(server.addr, "/api/users").await;
    assert_eq!(resp.status, 200);
    assert_eq!(resp.header("content-type"), Some("application/json"));
    assert_eq!(resp.body, "{\"ok\":true,\"message\":\"users\"}\n");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn wrong_method_is_405_with_allow_header() {
    let server = common::start(app()).await;
    let resp = common::send(server.addr, "DELETE", "/_/health", &[], "").await;
    assert_eq!(resp.status, 405);
    assert_eq!(resp.header("allow"), Some("GET"));
    let body = resp.json();
    assert_eq!(body["ok"], false);
    assert_eq!(body["message"], "Method not allowed");
    assert_eq!(body["results"]["allowed_methods"], serde_json::json!(["GET"]));
    assert_eq!(body["results"]["current_method"], "DELETE");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn unknown_path_is_a_404_envelope() {
    let server = common::start(app()).await;
    let resp = common::get(server.addr, "/nope").await;
    assert_eq!(resp.status, 404);
    let body = resp.json();
    assert_eq!(body["message"], "Route not found");
    assert_eq!(body["error"]["code"], "NOT_FOUND");
    server.stop().await.unwrap();
}

#[tokio::test]
async fn validation_errors_expose_code_and_message_only() {
    let server = common::start(app()).await;
    let resp = common::send(
        server.addr,
        "POST",
        "/api/users",
        &[("content-type", "application/json")],
        r#"{"name":""}"#,
    )
    .await;
    assert_eq!(resp.status, 400);
    assert_eq!(
        resp.json(),
        serde_json::json!({
            "ok": false,
            "message": "Invalid user",
            "error": {"code": "VALIDATION_ERROR", "message": "Invalid user"},
        })
    );
    server.stop().await.unwrap();
}

#[tokio::test]
async fn incoming_request_id_is_chained_and_echoed() {
    let server = common::start(app()).await;
    let resp = common::send(server.addr, "GET", "/whoami", &[("X-ReqId", "upstream-1")], "").await;
    assert_eq!(resp.status, 200);
    assert!(resp.body.starts_with("upstream-1/"), "{}", resp.body);
    assert_eq!(resp.header("x-reqid"), Some(resp.body.as_str()));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn fresh_request_ids_share_a_prefix() {
    let server = common::start(app()).await;
    let first = common::get(server.addr, "/whoami").await.body;
    let second = common::get(server.addr, "/whoami").await.body;
    let prefix = |id: &str| id.rsplit_once('-').map(|(p, _)| p.to_owned());
    assert_eq!(prefix(&first), prefix(&second));
    server.stop().await.unwrap();
}

#[tokio::test]
async fn debug_toggle_requires_the_key() {
    let server = common::start(app()).await;

    let missing = common::send(server.addr, "POST", "/_/debug/toggle", &[], "").await;
    assert_eq!(missing.status, 401);
    assert_eq!(missing.json()["error"]["code"], "UNAUTHORIZED");

    let wrong = common::send(server.addr, "POST", "/_/debug/toggle", &[("X-Debug-Key", "guess")], "").await;
    assert_eq!(wrong.status, 401);

    let ok = common::send(
        server.addr,
        "POST",
        "/_/debug/toggle",
        &[("X-Debug-Key", "s3cret")],
        r#"{"enable":true}"#,
    )
    .await;
    assert_eq!(ok.status, 200);
    assert_eq!(ok.json()["results"]["debug_enabled"], true);

    server.stop().await.unwrap();
}
