//! Response writers.
//!
//! Route handlers produce a [`Response`](crate::Response) value, which the
//! dispatcher replays into a chain of writers so the response can be observed
//! on its way out:
//!
//! ```text
//! DebugCapture ─► StatusRecorder ─► BufferedWriter ─► Response
//!  (dumps body)    (status, size)     (collects)
//! ```
//!
//! Each decorator owns the next writer and hands it back from `into_inner`.

use bytes::BytesMut;
use http::{HeaderMap, StatusCode};

use crate::response::Response;

/// Sink for a response: headers, then one status line, then body bytes.
pub trait ResponseWriter: Send {
    fn headers_mut(&mut self) -> &mut HeaderMap;

    fn write_header(&mut self, status: StatusCode);

    fn write(&mut self, buf: &[u8]);
}

// ── BufferedWriter ───────────────────────────────────────────────────────────

/// Collects everything written into a [`Response`].
#[derive(Debug, Default)]
pub struct BufferedWriter {
    status: Option<StatusCode>,
    headers: HeaderMap,
    body: BytesMut,
}

impl BufferedWriter {
    pub fn new() -> Self {
        Self::default()
    }

    /// A status that was never written is `200 OK`.
    pub fn into_response(self) -> Response {
        Response {
            status: self.status.unwrap_or(StatusCode::OK),
            headers: self.headers,
            body: self.body.freeze(),
            trailers: None,
        }
    }
}

impl ResponseWriter for BufferedWriter {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    fn write_header(&mut self, status: StatusCode) {
        self.status = Some(status);
    }

    fn write(&mut self, buf: &[u8]) {
        self.body.extend_from_slice(buf);
    }
}

// ── StatusRecorder ───────────────────────────────────────────────────────────

/// Records the status and byte count passing through.
///
/// The first status written wins and commits the response; later calls to
/// `write_header` are ignored. Writing body bytes before any status commits
/// `200 OK`.
#[derive(Debug)]
pub struct StatusRecorder<W> {
    inner: W,
    status: StatusCode,
    size: u64,
    committed: bool,
}

impl<W: ResponseWriter> StatusRecorder<W> {
    pub fn new(inner: W) -> Self {
        Self { inner, status: StatusCode::OK, size: 0, committed: false }
    }

    pub fn status(&self) -> StatusCode { self.status }
    pub fn size(&self) -> u64 { self.size }
    pub fn committed(&self) -> bool { self.committed }

    pub fn into_inner(self) -> W {
        self.inner
    }
}

impl<W: ResponseWriter> ResponseWriter for StatusRecorder<W> {
    fn headers_mut(&mut self) -> &mut HeaderMap {
        self.inner.headers_mut()
    }

    fn write_header(&mut self, status: StatusCode) {
        if self.committed {
            return;
        }
        self.status = status;
        self.committed = true;
        self.inner.write_header(status);
    }

    fn write(&mut self, buf: &[u8]) {
        if !self.committed {
            self.write_header(StatusCode::OK);
        }
        self.size += buf.len() as u64;
        self.inner.write(buf);
    }
}
