//! # gatehouse
//!
//! A single-port request dispatcher for services that speak more than one
//! protocol. gRPC, WebSocket, and plain HTTP share one listener; each
//! request is classified, routed, and answered by the right handler.
//!
//! ## How a request flows
//!
//! 1. A request ID is assigned (or chained onto the caller's `X-ReqId`).
//! 2. Global middleware runs.
//! 3. Protocol handlers are asked, in order, whether they claim the request:
//!    gRPC (HTTP/2 + `application/grpc`), then WebSocket (upgrade headers).
//!    A claimed request is finished by that handler.
//! 4. Otherwise the exact-path route table is consulted. A known path with
//!    the wrong method is `405`; an unknown path goes to the static file
//!    fallback or `404`.
//! 5. For a matched route: pre-request phases, group middleware, the
//!    handler, post-request phases.
//!
//! Errors returned as [`AppError`] reach the client as a JSON envelope
//! carrying only `code` and `message`; everything else about them is logged.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use gatehouse::{App, AppError, Request, Response, Server, ServerConfig};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), gatehouse::Error> {
//!     gatehouse::logging::init()?;
//!
//!     let mut app = App::new(ServerConfig::from_env());
//!     let mut api = app.group("/api");
//!     api.get("/users", list_users);
//!     api.post("/users", create_user);
//!
//!     Server::bind(":7841").await?.serve(app).await
//! }
//!
//! async fn list_users(_req: Request) -> Response {
//!     Response::envelope(StatusCode::OK, "users")
//! }
//!
//! #[derive(serde::Deserialize)]
//! struct NewUser {
//!     name: String,
//! }
//!
//! async fn create_user(req: Request) -> Result<Response, AppError> {
//!     let user: NewUser = req.json()?;
//!     if user.name.is_empty() {
//!         return Err(AppError::validation("Invalid user").with_field("name", "must not be empty"));
//!     }
//!     Ok(Response::envelope(StatusCode::CREATED, "created"))
//! }
//! ```

mod app;
mod app_error;
mod config;
mod context;
mod dispatcher;
mod error;
mod group;
mod method;
mod phase;
mod request;
mod request_id;
mod response;
mod router;
mod server;
mod writer;

pub mod cache;
pub mod debug;
pub mod grpc;
pub mod handler;
pub mod health;
pub mod logging;
pub mod middleware;
pub mod protocol;
pub mod query_filter;
pub mod static_files;
pub mod websocket;

pub use app::App;
pub use app_error::{AppError, DetailContext, ErrorCode, ErrorDetail, error_response, write_error};
pub use config::{
    Authorizer, DEBUG_KEY_ENV, DEFAULT_ID_SHARDS, DEFAULT_REQUEST_ID_HEADER, DEFAULT_SHUTDOWN_GRACE, Resources,
    SHUTDOWN_GRACE_ENV, ServerConfig,
};
pub use context::{CancelToken, Context, DropGuard};
pub use dispatcher::Dispatcher;
pub use error::{BoxError, Error};
pub use group::{Group, clean_path, join_paths};
pub use handler::Handler;
pub use method::{Method, MethodSet};
pub use phase::{Completion, PostRequestFn, PreRequestFn};
pub use request::{Request, RequestHead};
pub use request_id::RequestIdGenerator;
pub use response::{ContentType, Envelope, ErrorInfo, IntoResponse, Response, ResponseBuilder};
pub use router::{Route, RouteInfo, RouteList, RouteTable};
pub use server::{DEFAULT_ADDR, Server, shutdown_signal};
pub use static_files::StaticOptions;
pub use writer::{BufferedWriter, ResponseWriter, StatusRecorder};
