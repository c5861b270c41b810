//! Runtime debug capture.
//!
//! While enabled, every routed request is dumped before it runs and its
//! response is dumped once written, both at DEBUG level under the
//! `gatehouse::debug` target. Capture never changes the bytes delivered.
//!
//! The flag is flipped at runtime through `POST /_/debug/toggle`, which
//! requires an `X-Debug-Key` header equal to the configured key:
//!
//! ```text
//! curl -X POST -H 'X-Debug-Key: s3cret' -d '{"enable":true}' localhost:7841/_/debug/toggle
//! ```
//!
//! An empty body flips the current state.

use std::fmt::Write as _;
use std::sync::Arc;

use bytes::BytesMut;
use http::{HeaderMap, HeaderName, StatusCode, Version};
use parking_lot::RwLock;
use serde::Deserialize;
use subtle::ConstantTimeEq;
use tracing::{debug, info};

use crate::app_error::AppError;
use crate::request::Request;
use crate::response::Response;
use crate::writer::ResponseWriter;

pub const TOGGLE_PATH: &str = "/_/debug/toggle";
pub const DEBUG_KEY_HEADER: HeaderName = HeaderName::from_static("x-debug-key");

// ── DebugConfig ──────────────────────────────────────────────────────────────

/// The debug flag and the key that guards it.
#[derive(Debug, Default)]
pub struct DebugConfig {
    enabled: RwLock<bool>,
    auth_key: Option<String>,
}

impl DebugConfig {
    pub fn new(auth_key: Option<String>) -> Self {
        Self { enabled: RwLock::new(false), auth_key: auth_key.filter(|k| !k.is_empty()) }
    }

    pub fn is_enabled(&self) -> bool {
        *self.enabled.read()
    }

    pub fn set_enabled(&self, enabled: bool) {
        *self.enabled.write() = enabled;
    }

    /// Flips the flag and returns the new state.
    pub fn flip(&self) -> bool {
        let mut enabled = self.enabled.write();
        *enabled = !*enabled;
        *enabled
    }

    /// Checks a presented key against the configured one.
    pub fn authenticate(&self, presented: Option<&str>) -> Result<(), AppError> {
        let Some(expected) = self.auth_key.as_deref() else {
            return Err(AppError::unauthorized("Debug authentication not configured"));
        };
        let presented = match presented {
            Some(key) if !key.is_empty() => key,
            _ => return Err(AppError::unauthorized("Debug key required")),
        };
        if !bool::from(presented.as_bytes().ct_eq(expected.as_bytes())) {
            return Err(AppError::unauthorized("Invalid debug key"));
        }
        Ok(())
    }
}

// ── Toggle endpoint ──────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct ToggleBody {
    enable: bool,
}

/// Handles `POST /_/debug/toggle`.
pub(crate) async fn toggle(config: Arc<DebugConfig>, req: Request) -> Result<Response, AppError> {
    config.authenticate(req.header(DEBUG_KEY_HEADER))?;
    let enabled = if req.body().iter().all(u8::is_ascii_whitespace) {
        config.flip()
    } else {
        let body: ToggleBody = req.json()?;
        config.set_enabled(body.enable);
        body.enable
    };
    info!(enabled, "debug mode updated");
    Ok(Response::envelope_with(
        StatusCode::OK,
        "Debug mode updated",
        &serde_json::json!({ "debug_enabled": enabled }),
    ))
}

// ── Dumps ────────────────────────────────────────────────────────────────────

fn write_headers(out: &mut String, headers: &HeaderMap) {
    for (name, value) in headers {
        let _ = write!(out, "{name}: {}\r\n", String::from_utf8_lossy(value.as_bytes()));
    }
    out.push_str("\r\n");
}

/// Wire-style dump of a request, body included.
pub fn dump_request(req: &Request) -> String {
    let mut out = format!("{} {} {:?}\r\n", req.method(), req.uri(), req.version());
    write_headers(&mut out, req.headers());
    out.push_str(&String::from_utf8_lossy(req.body()));
    out
}

/// Wire-style dump of a response, body included.
pub fn dump_response(version: Version, status: StatusCode, headers: &HeaderMap, body: &[u8]) -> String {
    let mut out = format!("{version:?} {status}\r\n");
    write_headers(&mut out, headers);
    out.push_str(&String::from_utf8_lossy(body));
    out
}

pub(crate) fn log_request(req: &Request) {
    debug!(method = %req.method(), path = req.path(), dump = ?dump_request(req), "request dump");
}

// ── DebugCapture ─────────────────────────────────────────────────────────────

/// Outermost writer: passes everything through and, when capture was on at
/// construction, copies the body so [`finish`](Self::finish) can log it.
pub struct DebugCapture<W> {
    inner: W,
    active: bool,
    version: Version,
    status: StatusCode,
    committed: bool,
    buf: BytesMut,
}

impl<W: ResponseWriter> DebugCapture<W> {
    pub fn new(inner: W, active: bool, version: Version) -> Self {
        Self { inner, active, version, status: StatusCode::OK, committed: false, buf: BytesMut::new() }
    }

    /// Logs the response dump if capture is active and returns the inner
    /// writer.
    pub fn finish(mut self) -> W {
        if self.active {
            let dump = dump_response(self.version, self.status, self.inner.headers_mut(), &self.buf);
            debug!(status = self.status.as_u16(), dump = ?dump, "response dump");
        }
        self.inner
    }
}

impl<W: ResponseWriter> ResponseWriter for DebugCapture<W> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    // The first status wins, matching what the inner writer delivers.
    fn write_header(&mut self, status: StatusCode) {
        if !self.committed {
            self.status = status;
            self.committed = true;
        }
        self.inner.write_header(status);
    }

    fn write(&mut self, buf: &[u8]) {
        self.committed = true;
        if self.active {
            self.buf.extend_from_slice(buf);
        }
        self.inner.write(buf);
    }
}
