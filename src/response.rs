//! Outgoing response type, the standard JSON envelope, and the
//! [`IntoResponse`] conversion trait.
//!
//! Every non-protocol response the dispatcher produces on its own (errors,
//! 404, 405, the debug toggle) is an envelope:
//!
//! ```json
//! {"ok":false,"message":"Method not allowed","results":{...},"error":{...}}
//! ```
//!
//! `ok` is true exactly when the status is 2xx. `results` and `error` are
//! omitted when absent. The encoded body ends with a newline.

use std::convert::Infallible;
use std::future;

use bytes::Bytes;
use http::header::{CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use http::StatusCode;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use tracing::{error, warn};

use crate::app_error::ErrorCode;
use crate::writer::ResponseWriter;

// ── ContentType ──────────────────────────────────────────────────────────────

/// Common content-type values for use with [`ResponseBuilder::bytes`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ContentType {
    Css,          // text/css
    Csv,          // text/csv
    EventStream,  // text/event-stream  (SSE)
    Gif,          // image/gif
    Grpc,         // application/grpc
    Html,         // text/html; charset=utf-8
    Icon,         // image/x-icon
    Jpeg,         // image/jpeg
    JavaScript,   // text/javascript; charset=utf-8
    Json,         // application/json
    OctetStream,  // application/octet-stream  (binary / file download)
    Pdf,          // application/pdf
    Png,          // image/png
    Svg,          // image/svg+xml
    Text,         // text/plain; charset=utf-8
    Wasm,         // application/wasm
    Woff2,        // font/woff2
    Xml,          // application/xml
}

impl ContentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Css         => "text/css",
            Self::Csv         => "text/csv",
            Self::EventStream => "text/event-stream",
            Self::Gif         => "image/gif",
            Self::Grpc        => "application/grpc",
            Self::Html        => "text/html; charset=utf-8",
            Self::Icon        => "image/x-icon",
            Self::Jpeg        => "image/jpeg",
            Self::JavaScript  => "text/javascript; charset=utf-8",
            Self::Json        => "application/json",
            Self::OctetStream => "application/octet-stream",
            Self::Pdf         => "application/pdf",
            Self::Png         => "image/png",
            Self::Svg         => "image/svg+xml",
            Self::Text        => "text/plain; charset=utf-8",
            Self::Wasm        => "application/wasm",
            Self::Woff2       => "font/woff2",
            Self::Xml         => "application/xml",
        }
    }

    /// Guesses from a file extension (without the dot). Unknown extensions
    /// are served as `application/octet-stream`.
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "css"                => Self::Css,
            "csv"                => Self::Csv,
            "gif"                => Self::Gif,
            "htm" | "html"       => Self::Html,
            "ico"                => Self::Icon,
            "jpeg" | "jpg"       => Self::Jpeg,
            "js" | "mjs"         => Self::JavaScript,
            "json" | "map"       => Self::Json,
            "pdf"                => Self::Pdf,
            "png"                => Self::Png,
            "svg"                => Self::Svg,
            "txt"                => Self::Text,
            "wasm"               => Self::Wasm,
            "woff2"              => Self::Woff2,
            "xml"                => Self::Xml,
            _                    => Self::OctetStream,
        }
    }
}

// ── Envelope ─────────────────────────────────────────────────────────────────

/// The standard response body.
#[derive(Debug, Serialize)]
pub struct Envelope<'a, T: Serialize = ()> {
    pub ok: bool,
    pub message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<&'a T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorInfo<'a>>,
}

/// The only part of an [`AppError`](crate::AppError) a client ever sees.
#[derive(Debug, Serialize)]
pub struct ErrorInfo<'a> {
    pub code: &'a ErrorCode,
    pub message: &'a str,
}

// ── Response ─────────────────────────────────────────────────────────────────

/// An outgoing response.
///
/// # Shortcuts (200 OK, no custom headers needed)
///
/// ```rust
/// use gatehouse::Response;
/// use http::StatusCode;
///
/// Response::json(r#"{"id":1}"#);
/// Response::text("hello");
/// Response::status(StatusCode::NO_CONTENT);
/// Response::envelope(StatusCode::OK, "users");
/// ```
///
/// # Builder (custom status or headers)
///
/// ```rust
/// use gatehouse::{ContentType, Response};
/// use http::StatusCode;
///
/// Response::builder()
///     .status(StatusCode::CREATED)
///     .header("location", "/users/42")
///     .envelope_with("created", &serde_json::json!({"id": 42}));
///
/// Response::builder()
///     .bytes(ContentType::Xml, "<ok/>");
/// ```
#[derive(Clone, Debug)]
pub struct Response {
    pub(crate) status: StatusCode,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Bytes,
    pub(crate) trailers: Option<HeaderMap>,
}

impl Response {
    /// `200 OK`, `application/json`.
    pub fn json(body: impl Into<Bytes>) -> Self {
        Self::builder().json(body)
    }

    /// `200 OK`, `text/plain; charset=utf-8`.
    pub fn text(body: impl Into<String>) -> Self {
        Self::builder().text(body)
    }

    /// Response with no body.
    pub fn status(code: StatusCode) -> Self {
        Self::builder().status(code).no_body()
    }

    /// Envelope with only `ok` and `message`.
    pub fn envelope(status: StatusCode, message: &str) -> Self {
        Self::builder().status(status).envelope(message)
    }

    /// Envelope carrying `results`.
    pub fn envelope_with<T: Serialize>(status: StatusCode, message: &str, results: &T) -> Self {
        Self::builder().status(status).envelope_with(message, results)
    }

    pub(crate) fn error_envelope(status: StatusCode, code: &ErrorCode, message: &str) -> Self {
        encode_envelope(
            status,
            HeaderMap::new(),
            &Envelope::<()> {
                ok: false,
                message,
                results: None,
                error: Some(ErrorInfo { code, message }),
            },
        )
    }

    pub fn builder() -> ResponseBuilder {
        ResponseBuilder { headers: HeaderMap::new(), status: StatusCode::OK }
    }

    pub fn status_code(&self) -> StatusCode { self.status }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn trailers(&self) -> Option<&HeaderMap> { self.trailers.as_ref() }

    pub(crate) fn with_trailers(mut self, trailers: HeaderMap) -> Self {
        self.trailers = Some(trailers);
        self
    }

    /// Replays the response through a writer chain: headers, status, body.
    /// Trailers are not carried; only protocol handlers produce them, and
    /// their responses bypass the writer chain.
    pub fn write_to(self, w: &mut dyn ResponseWriter) {
        let headers = w.headers_mut();
        for (name, value) in &self.headers {
            headers.append(name.clone(), value.clone());
        }
        w.write_header(self.status);
        if !self.body.is_empty() {
            w.write(&self.body);
        }
    }

    /// Converts into a hyper response.
    pub fn into_inner(self) -> http::Response<BoxBody<Bytes, Infallible>> {
        let full = Full::new(self.body);
        let body = match self.trailers {
            Some(trailers) => full
                .with_trailers(future::ready(Some(Ok(trailers))))
                .boxed(),
            None => full.boxed(),
        };
        let mut resp = http::Response::new(body);
        *resp.status_mut() = self.status;
        *resp.headers_mut() = self.headers;
        resp
    }
}

fn encode_envelope<T: Serialize>(
    status: StatusCode,
    mut headers: HeaderMap,
    envelope: &Envelope<'_, T>,
) -> Response {
    match serde_json::to_vec(envelope) {
        Ok(mut body) => {
            body.push(b'\n');
            headers.insert(CONTENT_TYPE, HeaderValue::from_static(ContentType::Json.as_str()));
            Response { status, headers, body: body.into(), trailers: None }
        }
        Err(e) => {
            error!(error = %e, "failed to encode JSON response");
            Response::status(StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

// ── ResponseBuilder ──────────────────────────────────────────────────────────

/// Fluent builder for [`Response`].
///
/// Obtain via [`Response::builder()`]. Defaults to `200 OK`. Terminated by a
/// typed body method.
#[derive(Debug)]
pub struct ResponseBuilder {
    headers: HeaderMap,
    status: StatusCode,
}

impl ResponseBuilder {
    pub fn status(mut self, code: StatusCode) -> Self {
        self.status = code;
        self
    }

    /// Appends a header. Invalid names or values are dropped with a warning.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            _ => warn!(header = name, "dropping invalid response header"),
        }
        self
    }

    /// Terminate with a JSON body (`application/json`).
    pub fn json(self, body: impl Into<Bytes>) -> Response {
        self.finish(ContentType::Json, body.into())
    }

    /// Terminate with a plain-text body (`text/plain; charset=utf-8`).
    pub fn text(self, body: impl Into<String>) -> Response {
        self.finish(ContentType::Text, Bytes::from(body.into()))
    }

    /// Terminate with a typed body. Use this for HTML, binary, SSE, etc.
    pub fn bytes(self, content_type: ContentType, body: impl Into<Bytes>) -> Response {
        self.finish(content_type, body.into())
    }

    /// Terminate with a standard envelope.
    pub fn envelope(self, message: &str) -> Response {
        let ok = self.status.is_success();
        encode_envelope(
            self.status,
            self.headers,
            &Envelope::<()> { ok, message, results: None, error: None },
        )
    }

    /// Terminate with a standard envelope carrying `results`.
    pub fn envelope_with<T: Serialize>(self, message: &str, results: &T) -> Response {
        let ok = self.status.is_success();
        encode_envelope(
            self.status,
            self.headers,
            &Envelope { ok, message, results: Some(results), error: None },
        )
    }

    /// Terminate with no body (e.g. `204 No Content`, redirects).
    pub fn no_body(self) -> Response {
        Response { status: self.status, headers: self.headers, body: Bytes::new(), trailers: None }
    }

    fn finish(mut self, content_type: ContentType, body: Bytes) -> Response {
        self.headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type.as_str()));
        Response { status: self.status, headers: self.headers, body, trailers: None }
    }
}

// ── IntoResponse ─────────────────────────────────────────────────────────────

/// Conversion into a [`Response`].
///
/// Implement on your own types to return them directly from handlers.
///
/// # Example: typed `Json<T>` wrapper with serde
///
/// ```rust,ignore
/// use gatehouse::{IntoResponse, Response};
/// use serde::Serialize;
///
/// struct Json<T: Serialize>(T);
///
/// impl<T: Serialize> IntoResponse for Json<T> {
///     fn into_response(self) -> Response {
///         Response::envelope_with(http::StatusCode::OK, "ok", &self.0)
///     }
/// }
/// ```
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response { self }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response { Response::text(self) }
}

impl IntoResponse for String {
    fn into_response(self) -> Response { Response::text(self) }
}

/// Return a bare status from a handler: `return StatusCode::NO_CONTENT`
impl IntoResponse for StatusCode {
    fn into_response(self) -> Response { Response::status(self) }
}
