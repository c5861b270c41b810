//! Incoming request type.

use std::net::{Ipv4Addr, SocketAddr};

use bytes::Bytes;
use http::header::{AsHeaderName, HeaderMap, HeaderName, HeaderValue};
use http::{Uri, Version};
use http_body_util::BodyExt;
use hyper::upgrade::OnUpgrade;
use serde::de::DeserializeOwned;

use crate::app_error::{AppError, ErrorCode};
use crate::context::Context;

/// An incoming request with its body fully read.
///
/// The dispatcher builds one per hyper request. Tests and embedders build
/// them directly:
///
/// ```rust
/// use gatehouse::Request;
///
/// let req = Request::new(http::Method::POST, "/api/users")
///     .with_header("content-type", "application/json")
///     .with_body(r#"{"name":"alice"}"#);
/// assert_eq!(req.path(), "/api/users");
/// ```
pub struct Request {
    method: http::Method,
    uri: Uri,
    version: Version,
    headers: HeaderMap,
    body: Bytes,
    remote_addr: SocketAddr,
    context: Context,
    upgrade: Option<OnUpgrade>,
}

impl Request {
    /// # Panics
    ///
    /// Panics if `uri` is not a valid request target.
    pub fn new(method: http::Method, uri: &str) -> Self {
        let uri = uri.parse().unwrap_or_else(|e| panic!("invalid request uri `{uri}`: {e}"));
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            remote_addr: SocketAddr::from((Ipv4Addr::LOCALHOST, 0)),
            context: Context::default(),
            upgrade: None,
        }
    }

    /// Reads the whole body of a hyper request. The upgrade handle, if the
    /// connection offers one, is kept for the WebSocket handler.
    pub(crate) async fn from_hyper<B>(
        req: http::Request<B>,
        remote_addr: SocketAddr,
        context: Context,
    ) -> Result<Self, B::Error>
    where
        B: hyper::body::Body,
    {
        let (mut parts, body) = req.into_parts();
        let upgrade = parts.extensions.remove::<OnUpgrade>();
        let body = body.collect().await?.to_bytes();
        Ok(Self {
            method: parts.method,
            uri: parts.uri,
            version: parts.version,
            headers: parts.headers,
            body,
            remote_addr,
            context,
            upgrade,
        })
    }

    // ── Builders ─────────────────────────────────────────────────────────────

    /// Appends a header. Invalid names or values are ignored.
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        if let (Ok(name), Ok(value)) = (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            self.headers.append(name, value);
        }
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_remote_addr(mut self, addr: SocketAddr) -> Self {
        self.remote_addr = addr;
        self
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.context = context;
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn method(&self) -> &http::Method { &self.method }
    pub fn uri(&self) -> &Uri { &self.uri }
    pub fn path(&self) -> &str { self.uri.path() }
    pub fn query(&self) -> Option<&str> { self.uri.query() }
    pub fn version(&self) -> Version { self.version }
    pub fn headers(&self) -> &HeaderMap { &self.headers }
    pub fn headers_mut(&mut self) -> &mut HeaderMap { &mut self.headers }
    pub fn body(&self) -> &Bytes { &self.body }
    pub fn remote_addr(&self) -> SocketAddr { self.remote_addr }
    pub fn context(&self) -> &Context { &self.context }
    pub fn context_mut(&mut self) -> &mut Context { &mut self.context }

    /// Protocol major version: 1 for HTTP/1.x, 2 for HTTP/2.
    pub fn proto_major(&self) -> u8 {
        match self.version {
            Version::HTTP_09 | Version::HTTP_10 | Version::HTTP_11 => 1,
            Version::HTTP_2 => 2,
            _ => 3,
        }
    }

    /// Header lookup as a string. `None` if absent or not visible ASCII.
    pub fn header<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// The chained request ID assigned by the dispatcher.
    pub fn request_id(&self) -> Option<&str> {
        self.context.request_id()
    }

    /// Deserializes the body as JSON, failing with a `BAD_REQUEST` error.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, AppError> {
        serde_json::from_slice(&self.body).map_err(|e| {
            AppError::new(ErrorCode::BadRequest, "Invalid request body").with_error(e)
        })
    }

    /// A copy of everything but the body, for use after the request has
    /// been handed to its handler.
    pub fn head(&self) -> RequestHead {
        RequestHead {
            method: self.method.clone(),
            uri: self.uri.clone(),
            version: self.version,
            headers: self.headers.clone(),
            remote_addr: self.remote_addr,
        }
    }

    pub(crate) fn take_upgrade(&mut self) -> Option<OnUpgrade> {
        self.upgrade.take()
    }
}

/// Method, target, version, headers and peer of a request; no body.
#[derive(Clone, Debug)]
pub struct RequestHead {
    pub method: http::Method,
    pub uri: Uri,
    pub version: Version,
    pub headers: HeaderMap,
    pub remote_addr: SocketAddr,
}
