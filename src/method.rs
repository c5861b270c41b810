//! HTTP method as a typed enum, and the ordered set a route accepts.
//!
//! Covers the RFC 9110 standard methods. Extension methods are never allowed
//! on a route: a request with one is answered `405 Method Not Allowed` when the
//! path exists, and `404` otherwise.

use std::fmt;
use std::str::FromStr;

/// A known HTTP method.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Method {
    Connect,
    Delete,
    Get,
    Head,
    Options,
    Patch,
    Post,
    Put,
    Trace,
}

impl Method {
    /// Returns the uppercase wire representation (e.g. `"GET"`).
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Delete  => "DELETE",
            Self::Get     => "GET",
            Self::Head    => "HEAD",
            Self::Options => "OPTIONS",
            Self::Patch   => "PATCH",
            Self::Post    => "POST",
            Self::Put     => "PUT",
            Self::Trace   => "TRACE",
        }
    }

    /// Maps a wire method onto the typed enum. `None` for extension methods.
    pub fn from_http(method: &http::Method) -> Option<Self> {
        method.as_str().parse().ok()
    }
}

/// Parses an uppercase method string (e.g. `"GET"`). Case-sensitive per RFC 9110 §9.1.
impl FromStr for Method {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CONNECT" => Ok(Self::Connect),
            "DELETE"  => Ok(Self::Delete),
            "GET"     => Ok(Self::Get),
            "HEAD"    => Ok(Self::Head),
            "OPTIONS" => Ok(Self::Options),
            "PATCH"   => Ok(Self::Patch),
            "POST"    => Ok(Self::Post),
            "PUT"     => Ok(Self::Put),
            "TRACE"   => Ok(Self::Trace),
            _         => Err(()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── MethodSet ────────────────────────────────────────────────────────────────

/// The methods a route accepts, in the order they were given.
///
/// Order matters only for presentation: the `Allow` header and the 405 body
/// list methods exactly as registered. Duplicates are dropped. An empty input
/// yields `{GET}`.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct MethodSet(Vec<Method>);

impl MethodSet {
    pub fn new(methods: impl IntoIterator<Item = Method>) -> Self {
        let mut set = Vec::new();
        for m in methods {
            if !set.contains(&m) {
                set.push(m);
            }
        }
        if set.is_empty() {
            set.push(Method::Get);
        }
        Self(set)
    }

    pub fn contains(&self, method: &http::Method) -> bool {
        Method::from_http(method).is_some_and(|m| self.0.contains(&m))
    }

    pub fn iter(&self) -> impl Iterator<Item = Method> + '_ {
        self.0.iter().copied()
    }

    /// Uppercase method names, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.0.iter().map(|m| m.as_str()).collect()
    }

    /// The value of an `Allow` header: `"GET, POST"`.
    pub fn allow_header(&self) -> String {
        self.names().join(", ")
    }
}

impl From<Method> for MethodSet {
    fn from(m: Method) -> Self {
        Self(vec![m])
    }
}
