//! Route groups.
//!
//! A group is a path prefix plus a middleware list, borrowed from the
//! [`App`] while routes are being registered. Nested groups start from a
//! copy of the parent's middleware, so adding middleware to a child never
//! changes the parent:
//!
//! ```rust
//! use gatehouse::{App, Request, middleware};
//!
//! # let (auth, audit) = (middleware::authorize(), middleware::authorize());
//! let mut app = App::default();
//! let mut api = app.group("/api");
//! api.layer(auth);
//! api.get("/users", |_req: Request| async { "users" });        // auth
//!
//! let mut admin = api.group("/admin");
//! admin.layer(audit);
//! admin.get("/stats", |_req: Request| async { "stats" });      // auth, audit
//! ```

use crate::app::App;
use crate::handler::Handler;
use crate::method::{Method, MethodSet};
use crate::middleware::{Middleware, compose};

/// A prefix and middleware chain applied to every route registered through
/// it.
pub struct Group<'a> {
    app: &'a mut App,
    prefix: String,
    middleware: Vec<Middleware>,
}

impl<'a> Group<'a> {
    pub(crate) fn new(app: &'a mut App, prefix: &str) -> Self {
        Self { app, prefix: join_paths(&["/", prefix]), middleware: Vec::new() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Appends middleware. Applies to routes registered afterwards.
    pub fn layer(&mut self, mw: Middleware) -> &mut Self {
        self.middleware.push(mw);
        self
    }

    /// A sub-group under `prefix`, starting with this group's middleware.
    pub fn group(&mut self, prefix: &str) -> Group<'_> {
        Group {
            app: &mut *self.app,
            prefix: join_paths(&[&self.prefix, prefix]),
            middleware: self.middleware.clone(),
        }
    }

    /// Registers `handler` at `prefix + pattern` for `methods` (GET if
    /// empty), wrapped in this group's middleware.
    pub fn route<H: Handler>(
        &mut self,
        pattern: &str,
        methods: impl IntoIterator<Item = Method>,
        handler: H,
    ) -> &mut Self {
        let label = handler.label();
        let composed = compose(handler.into_boxed_handler(), &self.middleware);
        let path = join_paths(&[&self.prefix, pattern]);
        self.app.insert_route(&path, MethodSet::new(methods), composed, label);
        self
    }

    pub fn get<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Get], handler)
    }

    pub fn post<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Post], handler)
    }

    pub fn put<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Put], handler)
    }

    pub fn delete<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Delete], handler)
    }

    pub fn patch<H: Handler>(&mut self, pattern: &str, handler: H) -> &mut Self {
        self.route(pattern, [Method::Patch], handler)
    }
}

// ── Paths ────────────────────────────────────────────────────────────────────

/// Joins non-empty elements with `/` and cleans the result. All-empty input
/// yields `""`.
pub fn join_paths(elems: &[&str]) -> String {
    let joined = elems
        .iter()
        .filter(|e| !e.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/");
    if joined.is_empty() {
        return joined;
    }
    clean_path(&joined)
}

/// Lexical path cleaning: collapses repeated slashes, drops `.` segments,
/// resolves `..` against the preceding segment, and strips any trailing
/// slash. A rooted path never climbs above `/`.
pub fn clean_path(path: &str) -> String {
    let rooted = path.starts_with('/');
    let mut out: Vec<&str> = Vec::new();
    for seg in path.split('/') {
        match seg {
            "" | "." => {}
            ".." => match out.last() {
                Some(&last) if last != ".." => {
                    out.pop();
                }
                _ if rooted => {}
                _ => out.push(".."),
            },
            _ => out.push(seg),
        }
    }
    match (rooted, out.is_empty()) {
        (true, _) => format!("/{}", out.join("/")),
        (false, true) => ".".to_owned(),
        (false, false) => out.join("/"),
    }
}
