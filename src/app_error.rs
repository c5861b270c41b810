//! Structured application errors.
//!
//! An [`AppError`] has two faces. The client sees only its code and message,
//! wrapped in the standard envelope with a status fixed at construction. The
//! server log sees everything else: accumulated details (each with a
//! timestamp, an optional field name, a stack snapshot, and metadata), the
//! underlying error, and internal log lines.
//!
//! ```rust
//! use gatehouse::{AppError, ErrorCode};
//!
//! let err = AppError::new(ErrorCode::Validation, "invalid signup")
//!     .with_field("email", "must contain @")
//!     .with_metadata("input", "alice.example.com")
//!     .add_internal_log("signup rejected before hitting the database");
//! assert_eq!(err.status(), http::StatusCode::BAD_REQUEST);
//! ```

use std::any::{TypeId, type_name};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;
use std::time::SystemTime;

use http::StatusCode;
use serde::{Serialize, Serializer};
use tracing::error;

use crate::context::Context;
use crate::error::BoxError;
use crate::response::{IntoResponse, Response};
use crate::writer::ResponseWriter;

// ── ErrorCode ────────────────────────────────────────────────────────────────

/// Machine-readable error identifier sent to clients.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum ErrorCode {
    Internal,
    Validation,
    Unauthorized,
    NotFound,
    BadRequest,
    /// Application-defined code. Always maps to 500.
    Custom(String),
}

impl ErrorCode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Internal     => "INTERNAL_ERROR",
            Self::Validation   => "VALIDATION_ERROR",
            Self::Unauthorized => "UNAUTHORIZED",
            Self::NotFound     => "NOT_FOUND",
            Self::BadRequest   => "BAD_REQUEST",
            Self::Custom(code) => code,
        }
    }

    /// The HTTP status for this code. Total: anything unlisted is 500.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Validation | Self::BadRequest => StatusCode::BAD_REQUEST,
            Self::Unauthorized                  => StatusCode::UNAUTHORIZED,
            Self::NotFound                      => StatusCode::NOT_FOUND,
            Self::Internal | Self::Custom(_)    => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

// ── ErrorDetail ──────────────────────────────────────────────────────────────

/// One accumulated detail. Never sent to clients.
#[derive(Clone, Debug)]
pub struct ErrorDetail {
    pub code: ErrorCode,
    pub message: String,
    pub field: Option<String>,
    pub context: DetailContext,
}

/// Where and when a detail was recorded.
#[derive(Clone, Debug)]
pub struct DetailContext {
    pub time: SystemTime,
    /// Captured frames, one per line. Empty unless backtraces are enabled
    /// (`RUST_BACKTRACE` / `RUST_LIB_BACKTRACE`).
    pub stack: Vec<String>,
    pub metadata: BTreeMap<String, String>,
}

impl DetailContext {
    fn capture() -> Self {
        let bt = Backtrace::capture();
        let stack = match bt.status() {
            BacktraceStatus::Captured => bt
                .to_string()
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_owned)
                .collect(),
            _ => Vec::new(),
        };
        Self { time: SystemTime::now(), stack, metadata: BTreeMap::new() }
    }
}

impl fmt::Display for ErrorDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)?;
        if let Some(field) = &self.field {
            write!(f, " (field {field})")?;
        }
        if !self.context.metadata.is_empty() {
            write!(f, " {:?}", self.context.metadata)?;
        }
        Ok(())
    }
}

// ── AppError ─────────────────────────────────────────────────────────────────

/// An application error with a client-safe projection.
///
/// Builder methods take and return `self`, so a chain produces one value with
/// every addition applied.
#[derive(Debug)]
pub struct AppError {
    code: ErrorCode,
    message: String,
    status: StatusCode,
    details: Vec<ErrorDetail>,
    main_error: Option<BoxError>,
    internal_logs: Vec<String>,
    context: Option<Context>,
}

impl AppError {
    /// Creates an error whose status is fixed by `code`.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            status: code.status(),
            code,
            message: message.into(),
            details: Vec::new(),
            main_error: None,
            internal_logs: Vec::new(),
            context: None,
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Unauthorized, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadRequest, message)
    }

    // ── Builders ─────────────────────────────────────────────────────────────

    /// Attaches the underlying error. Logged, never sent.
    pub fn with_error(mut self, err: impl Into<BoxError>) -> Self {
        self.main_error = Some(err.into());
        self
    }

    pub fn with_context(mut self, ctx: Context) -> Self {
        self.context = Some(ctx);
        self
    }

    /// Appends a detail, capturing a stack snapshot.
    pub fn with_detail(mut self, code: ErrorCode, message: impl Into<String>) -> Self {
        self.details.push(ErrorDetail {
            code,
            message: message.into(),
            field: None,
            context: DetailContext::capture(),
        });
        self
    }

    /// Appends a `VALIDATION_ERROR` detail naming `field`.
    pub fn with_field(self, field: impl Into<String>, message: impl Into<String>) -> Self {
        let mut err = self.with_detail(ErrorCode::Validation, message);
        if let Some(last) = err.details.last_mut() {
            last.field = Some(field.into());
        }
        err
    }

    /// Adds metadata to the most recent detail. Does nothing without one.
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        if let Some(last) = self.details.last_mut() {
            last.context.metadata.insert(key.into(), value.into());
        }
        self
    }

    pub fn add_internal_log(mut self, line: impl Into<String>) -> Self {
        self.internal_logs.push(line.into());
        self
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    pub fn code(&self) -> &ErrorCode { &self.code }
    pub fn message(&self) -> &str { &self.message }
    pub fn status(&self) -> StatusCode { self.status }
    pub fn details(&self) -> &[ErrorDetail] { &self.details }
    pub fn internal_logs(&self) -> &[String] { &self.internal_logs }
    pub fn context(&self) -> Option<&Context> { self.context.as_ref() }

    pub fn main_error(&self) -> Option<&(dyn StdError + Send + Sync + 'static)> {
        self.main_error.as_deref()
    }

    /// The client projection: envelope with `{code, message}` and the fixed
    /// status. Does not log.
    fn to_response(&self) -> Response {
        Response::error_envelope(self.status, &self.code, &self.message)
    }

    fn log(&self) {
        let details: Vec<String> = self.details.iter().map(ToString::to_string).collect();
        let original = self.main_error.as_ref().map(ToString::to_string);
        error!(
            code = %self.code,
            message = %self.message,
            status = self.status.as_u16(),
            request_id = self.context.as_ref().and_then(Context::request_id),
            details = ?details,
            internal_logs = ?self.internal_logs,
            original_error = ?original,
            "request error"
        );
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.main_error.as_deref().map(|e| e as &(dyn StdError + 'static))
    }
}

// ── Error handler ────────────────────────────────────────────────────────────

/// Turns any error into the client response, logging the full diagnostic.
///
/// If `err` is an [`AppError`], or has one anywhere in its `source()` chain,
/// that error is logged and projected. Anything else is wrapped in an
/// `INTERNAL_ERROR` that records the original and its type name. An error
/// that arrives already boxed is named by its concrete type where known.
pub fn error_response<E>(err: E) -> Response
where
    E: Into<BoxError> + 'static,
{
    let err: BoxError = err.into();
    if let Some(app) = find_app_error(&*err) {
        app.log();
        return app.to_response();
    }
    let kind = if TypeId::of::<E>() == TypeId::of::<BoxError>() {
        boxed_type_name(&*err).map_or_else(|| format!("{} ({err:?})", type_name::<E>()), str::to_owned)
    } else {
        type_name::<E>().to_owned()
    };
    let wrapped = AppError::internal("An internal error occurred")
        .add_internal_log(format!("Unexpected error type: {kind}"))
        .with_error(err);
    wrapped.log();
    wrapped.to_response()
}

/// Writes the error response through a response writer.
pub fn write_error<E>(w: &mut dyn ResponseWriter, err: E)
where
    E: Into<BoxError> + 'static,
{
    error_response(err).write_to(w);
}

fn boxed_type_name(err: &(dyn StdError + 'static)) -> Option<&'static str> {
    macro_rules! known {
        ($($ty:ty),* $(,)?) => {
            $(if err.is::<$ty>() { return Some(type_name::<$ty>()); })*
        };
    }
    known!(
        std::io::Error,
        std::fmt::Error,
        std::num::ParseIntError,
        std::num::ParseFloatError,
        std::str::Utf8Error,
        std::string::FromUtf8Error,
        std::net::AddrParseError,
        serde_json::Error,
        http::Error,
        http::header::InvalidHeaderValue,
        hyper::Error,
        url::ParseError,
        tokio::time::error::Elapsed,
        tokio_tungstenite::tungstenite::Error,
        crate::error::Error,
    );
    None
}

fn find_app_error<'a>(err: &'a (dyn StdError + 'static)) -> Option<&'a AppError> {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(app) = e.downcast_ref::<AppError>() {
            return Some(app);
        }
        current = e.source();
    }
    None
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        error_response(self)
    }
}

/// Lets handlers return `Result<impl IntoResponse, E>` and use `?`.
impl<T, E> IntoResponse for Result<T, E>
where
    T: IntoResponse,
    E: Into<BoxError> + 'static,
{
    fn into_response(self) -> Response {
        match self {
            Ok(value) => value.into_response(),
            Err(err) => error_response(err),
        }
    }
}
