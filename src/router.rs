//! Exact-path route table.
//!
//! One entry per path string. No parameters, no wildcards: `/users` and
//! `/users/` are different routes. The only catch-all is the static-file
//! fallback, which lives outside this table.
//!
//! Lookup is a single hash probe followed by a method check, so a path that
//! exists but doesn't accept the method is answered `405` with an `Allow`
//! header rather than falling through to `404`.

use std::collections::HashMap;
use std::fmt;

use http::header::ALLOW;
use http::{HeaderValue, StatusCode};
use serde::Serialize;

use crate::app_error::ErrorCode;
use crate::handler::BoxedHandler;
use crate::method::MethodSet;
use crate::response::Response;

/// A registered route. The handler is already wrapped in its group
/// middleware.
pub struct Route {
    pub(crate) pattern: String,
    pub(crate) methods: MethodSet,
    pub(crate) handler: BoxedHandler,
    pub(crate) label: String,
}

impl Route {
    pub fn pattern(&self) -> &str { &self.pattern }
    pub fn methods(&self) -> &MethodSet { &self.methods }
    pub fn label(&self) -> &str { &self.label }
}

/// Outcome of matching a request against the table.
pub enum Resolution<'a> {
    Found(&'a Route),
    MethodNotAllowed(&'a Route),
    NotFound,
}

/// Path-keyed routes plus the order they were registered in.
///
/// Registering a path twice replaces the handler and methods, but the path
/// appears twice in [`order`](Self::order) and therefore twice in listings.
#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<String, Route>,
    order: Vec<String>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a route. A pattern registered twice keeps the last handler
    /// but appears twice in [`order`](Self::order) and in listings.
    pub fn insert(&mut self, pattern: &str, methods: MethodSet, handler: BoxedHandler, label: String) {
        self.order.push(pattern.to_owned());
        self.routes.insert(
            pattern.to_owned(),
            Route { pattern: pattern.to_owned(), methods, handler, label },
        );
    }

    pub fn get(&self, pattern: &str) -> Option<&Route> {
        self.routes.get(pattern)
    }

    pub fn resolve(&self, method: &http::Method, path: &str) -> Resolution<'_> {
        match self.routes.get(path) {
            Some(route) if route.methods.contains(method) => Resolution::Found(route),
            Some(route) => Resolution::MethodNotAllowed(route),
            None => Resolution::NotFound,
        }
    }

    /// Distinct patterns.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Patterns in registration order, duplicates included.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// One entry per registration, describing the route as it stands now.
    pub fn infos(&self) -> Vec<RouteInfo> {
        self.order
            .iter()
            .filter_map(|pattern| self.routes.get(pattern))
            .map(|route| RouteInfo {
                pattern: route.pattern.clone(),
                methods: route.methods.names(),
                handler: route.label.clone(),
            })
            .collect()
    }
}

impl fmt::Display for RouteTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        RouteList(self.infos()).fmt(f)
    }
}

// ── Listings ─────────────────────────────────────────────────────────────────

/// One line of a route listing.
#[derive(Clone, Debug, Eq, PartialEq, Serialize)]
pub struct RouteInfo {
    pub pattern: String,
    pub methods: Vec<&'static str>,
    pub handler: String,
}

/// A printable route listing.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct RouteList(pub Vec<RouteInfo>);

impl fmt::Display for RouteList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Registered Routes:")?;
        writeln!(f, "==================")?;
        for route in &self.0 {
            writeln!(
                f,
                "Pattern: {:<20} Methods: {:<20} Handler: {}",
                route.pattern,
                route.methods.join(","),
                route.handler,
            )?;
        }
        write!(f, "==================")
    }
}

// ── 405 ──────────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct NotAllowed<'a> {
    allowed_methods: Vec<&'static str>,
    current_method: &'a str,
}

/// `405 Method Not Allowed` with an `Allow` header and the allowed set in
/// the envelope results.
pub(crate) fn method_not_allowed(allowed: &MethodSet, current: &http::Method) -> Response {
    let mut resp = Response::envelope_with(
        StatusCode::METHOD_NOT_ALLOWED,
        "Method not allowed",
        &NotAllowed { allowed_methods: allowed.names(), current_method: current.as_str() },
    );
    if let Ok(value) = HeaderValue::from_str(&allowed.allow_header()) {
        resp.headers_mut().insert(ALLOW, value);
    }
    resp
}

/// `404 Not Found` for a request nothing claimed.
pub(crate) fn not_found() -> Response {
    Response::error_envelope(StatusCode::NOT_FOUND, &ErrorCode::NotFound, "Route not found")
}
