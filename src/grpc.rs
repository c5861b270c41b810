//! Embedded unary gRPC server.
//!
//! Services register under their fully-qualified name (`echo.v1.Echo`) and
//! receive `(method, context, message bytes)` for each call on
//! `/echo.v1.Echo/<Method>`. Message encoding is the service's business;
//! this module only handles gRPC's framing and status reporting:
//!
//! ```text
//! request body   = flag:u8(0) | len:u32be | message
//! success reply  = 200, application/grpc, framed reply, trailers { grpc-status: 0 }
//! failure reply  = 200, application/grpc, headers { grpc-status, grpc-message }, no body
//! ```
//!
//! Compressed frames and streaming calls are answered `UNIMPLEMENTED`.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use http::{HeaderMap, HeaderValue, StatusCode};
use percent_encoding::{AsciiSet, CONTROLS, utf8_percent_encode};
use thiserror::Error;
use tracing::{debug, warn};

use crate::context::Context;
use crate::handler::BoxFuture;
use crate::protocol::{ProtocolHandler, is_grpc_request};
use crate::request::Request;
use crate::response::{ContentType, Response};

const FRAME_HEADER_LEN: usize = 5;

// ── Status ───────────────────────────────────────────────────────────────────

/// gRPC status codes.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[repr(u8)]
pub enum Code {
    Ok                 = 0,
    Cancelled          = 1,
    Unknown            = 2,
    InvalidArgument    = 3,
    DeadlineExceeded   = 4,
    NotFound           = 5,
    AlreadyExists      = 6,
    PermissionDenied   = 7,
    ResourceExhausted  = 8,
    FailedPrecondition = 9,
    Aborted            = 10,
    OutOfRange         = 11,
    Unimplemented      = 12,
    Internal           = 13,
    Unavailable        = 14,
    DataLoss           = 15,
    Unauthenticated    = 16,
}

/// A failed call: status code plus a message for the client.
#[derive(Clone, Debug, Eq, Error, PartialEq)]
#[error("grpc status {code:?}: {message}")]
pub struct GrpcStatus {
    pub code: Code,
    pub message: String,
}

impl GrpcStatus {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self { code, message: message.into() }
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(Code::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(Code::Internal, message)
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(Code::InvalidArgument, message)
    }
}

// ── Services ─────────────────────────────────────────────────────────────────

pub type GrpcFuture = BoxFuture<Result<Bytes, GrpcStatus>>;

/// One gRPC service. `method` is the bare method name (`Say`).
pub trait GrpcService: Send + Sync + 'static {
    fn call(&self, method: &str, ctx: Context, message: Bytes) -> GrpcFuture;
}

/// Service registry and unary call executor.
#[derive(Clone, Default)]
pub struct GrpcServer {
    services: HashMap<String, Arc<dyn GrpcService>>,
}

impl GrpcServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `service` under `name`, replacing any previous one.
    pub fn register(&mut self, name: impl Into<String>, service: Arc<dyn GrpcService>) {
        self.services.insert(name.into(), service);
    }

    pub fn service_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.services.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub async fn serve(&self, req: Request) -> Response {
        match self.call(&req).await {
            Ok(reply) => success(reply),
            Err(status) => {
                debug!(path = req.path(), code = ?status.code, message = %status.message, "grpc call failed");
                failure(&status)
            }
        }
    }

    async fn call(&self, req: &Request) -> Result<Bytes, GrpcStatus> {
        let (service, method) = split_path(req.path())
            .ok_or_else(|| GrpcStatus::unimplemented(format!("malformed method path {}", req.path())))?;
        let svc = self
            .services
            .get(service)
            .ok_or_else(|| GrpcStatus::unimplemented(format!("unknown service {service}")))?;
        let message = decode_frame(req.body())?;
        svc.call(method, req.context().clone(), message).await
    }
}

fn split_path(path: &str) -> Option<(&str, &str)> {
    let (service, method) = path.strip_prefix('/')?.split_once('/')?;
    (!service.is_empty() && !method.is_empty() && !method.contains('/')).then_some((service, method))
}

// ── Framing ──────────────────────────────────────────────────────────────────

/// Prefixes `message` with an uncompressed frame header.
pub fn encode_frame(message: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + message.len());
    buf.put_u8(0);
    buf.put_u32(message.len() as u32);
    buf.put_slice(message);
    buf.freeze()
}

/// Extracts the single message from a unary request body.
pub fn decode_frame(body: &Bytes) -> Result<Bytes, GrpcStatus> {
    if body.len() < FRAME_HEADER_LEN {
        return Err(GrpcStatus::internal("malformed frame: short header"));
    }
    match body[0] {
        0 => {}
        1 => return Err(GrpcStatus::unimplemented("compressed messages are not supported")),
        flag => return Err(GrpcStatus::internal(format!("malformed frame: flag {flag}"))),
    }
    let len = u32::from_be_bytes([body[1], body[2], body[3], body[4]]) as usize;
    let end = FRAME_HEADER_LEN + len;
    if body.len() < end {
        return Err(GrpcStatus::internal("malformed frame: truncated message"));
    }
    if body.len() > end {
        return Err(GrpcStatus::unimplemented("streaming calls are not supported"));
    }
    Ok(body.slice(FRAME_HEADER_LEN..end))
}

fn success(reply: Bytes) -> Response {
    let mut trailers = HeaderMap::new();
    trailers.insert("grpc-status", HeaderValue::from_static("0"));
    Response::builder()
        .bytes(ContentType::Grpc, encode_frame(&reply))
        .with_trailers(trailers)
}

fn failure(status: &GrpcStatus) -> Response {
    let mut resp = Response::builder().status(StatusCode::OK).bytes(ContentType::Grpc, Bytes::new());
    let headers = resp.headers_mut();
    headers.insert("grpc-status", HeaderValue::from(status.code as u16));
    match HeaderValue::from_str(&percent_encode(&status.message)) {
        Ok(v) => {
            headers.insert("grpc-message", v);
        }
        Err(e) => warn!(error = %e, "grpc-message not representable"),
    }
    resp
}

/// Percent-encodes everything outside printable ASCII, and `%` itself.
/// Bytes outside printable ASCII, plus `%` itself, are escaped in `grpc-message`.
const GRPC_MESSAGE: &AsciiSet = &CONTROLS.add(b'%');

fn percent_encode(msg: &str) -> String {
    utf8_percent_encode(msg, GRPC_MESSAGE).to_string()
}

// ── Protocol handler ─────────────────────────────────────────────────────────

/// Claims gRPC requests for an embedded [`GrpcServer`].
pub struct GrpcHandler {
    server: Arc<GrpcServer>,
}

impl GrpcHandler {
    pub fn new(server: Arc<GrpcServer>) -> Self {
        Self { server }
    }
}

impl ProtocolHandler for GrpcHandler {
    fn name(&self) -> &'static str {
        "grpc"
    }

    fn detect(&self, req: &Request) -> bool {
        is_grpc_request(req)
    }

    fn handle(&self, req: Request) -> BoxFuture {
        let server = Arc::clone(&self.server);
        Box::pin(async move { server.serve(req).await })
    }
}
