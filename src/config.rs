//! Server-wide configuration and shared resources.
//!
//! A [`ServerConfig`] is assembled once at startup and handed to
//! [`App::new`](crate::App::new). The collaborator handles it carries (database,
//! cache, authorizer) end up in [`Resources`], which every request can reach
//! through its [`Context`](crate::Context).
//!
//! Environment:
//!
//! | Variable | Effect |
//! |---|---|
//! | `DEBUG_AUTH_KEY` | Key required by `POST /_/debug/toggle`. Unset or empty disables the endpoint. |
//! | `GATEHOUSE_SHUTDOWN_GRACE_SECS` | Seconds in-flight requests get after a shutdown signal. |

use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use http::HeaderName;
use tracing::warn;

use crate::cache::Cache;
use crate::context::Context;
use crate::error::BoxError;
use crate::phase::{Completion, PostRequestFn, PreRequestFn};
use crate::request::{Request, RequestHead};

pub const DEBUG_KEY_ENV: &str = "DEBUG_AUTH_KEY";
pub const SHUTDOWN_GRACE_ENV: &str = "GATEHOUSE_SHUTDOWN_GRACE_SECS";

/// Header carrying the chained request ID.
pub const DEFAULT_REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-reqid");
pub const DEFAULT_ID_SHARDS: usize = 64;
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);
pub const DEFAULT_WS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ── Authorizer ───────────────────────────────────────────────────────────────

/// Decides whether a request may proceed.
///
/// The dispatcher never calls this on its own; wire it in with
/// [`middleware::authorize`](crate::middleware::authorize) on the groups that
/// need it, or call it from a handler through
/// [`Resources::authorizer`].
pub trait Authorizer: Send + Sync + 'static {
    fn authorize(&self, ctx: &Context, req: &Request) -> Result<(), BoxError>;
}

// ── Resources ────────────────────────────────────────────────────────────────

/// Collaborators shared by every request.
#[derive(Clone, Default)]
pub struct Resources {
    database: Option<Arc<dyn Any + Send + Sync>>,
    cache: Option<Arc<dyn Cache>>,
    authorizer: Option<Arc<dyn Authorizer>>,
}

impl Resources {
    /// The database handle, if one was configured with type `T`.
    pub fn database<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.database.clone()?.downcast::<T>().ok()
    }

    pub fn cache(&self) -> Option<&Arc<dyn Cache>> {
        self.cache.as_ref()
    }

    pub fn authorizer(&self) -> Option<&Arc<dyn Authorizer>> {
        self.authorizer.as_ref()
    }
}

impl fmt::Debug for Resources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Resources")
            .field("database", &self.database.is_some())
            .field("cache", &self.cache.is_some())
            .field("authorizer", &self.authorizer.is_some())
            .finish()
    }
}

// ── ServerConfig ─────────────────────────────────────────────────────────────

/// Options for one server instance.
///
/// ```rust
/// use std::time::Duration;
/// use gatehouse::ServerConfig;
///
/// let config = ServerConfig::from_env()
///     .debug_key("s3cret")
///     .shutdown_grace(Duration::from_secs(10));
/// ```
pub struct ServerConfig {
    pub(crate) resources: Resources,
    pub(crate) pre_request: Vec<PreRequestFn>,
    pub(crate) post_request: Vec<PostRequestFn>,
    pub(crate) debug_key: Option<String>,
    pub(crate) request_id_header: HeaderName,
    pub(crate) id_shards: usize,
    pub(crate) shutdown_grace: Duration,
    pub(crate) ws_handshake_timeout: Duration,
}

impl ServerConfig {
    pub fn new() -> Self {
        Self {
            resources: Resources::default(),
            pre_request: Vec::new(),
            post_request: Vec::new(),
            debug_key: None,
            request_id_header: DEFAULT_REQUEST_ID_HEADER,
            id_shards: DEFAULT_ID_SHARDS,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
            ws_handshake_timeout: DEFAULT_WS_HANDSHAKE_TIMEOUT,
        }
    }

    /// Defaults, overlaid with `DEBUG_AUTH_KEY` and
    /// `GATEHOUSE_SHUTDOWN_GRACE_SECS` from the process environment.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::new();
        config.debug_key = lookup(DEBUG_KEY_ENV).filter(|k| !k.is_empty());
        if let Some(raw) = lookup(SHUTDOWN_GRACE_ENV) {
            match raw.trim().parse::<u64>() {
                Ok(secs) => config.shutdown_grace = Duration::from_secs(secs),
                Err(e) => warn!(
                    value = %raw,
                    error = %e,
                    "ignoring {SHUTDOWN_GRACE_ENV}; using default grace period"
                ),
            }
        }
        config
    }

    /// Any value can serve as the database handle; handlers get it back with
    /// [`Resources::database`].
    pub fn database<T: Any + Send + Sync>(mut self, db: Arc<T>) -> Self {
        self.resources.database = Some(db);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn Cache>) -> Self {
        self.resources.cache = Some(cache);
        self
    }

    pub fn authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.resources.authorizer = Some(authorizer);
        self
    }

    /// Appends a pre-request phase. Phases run in the order they were added.
    pub fn pre_request<F>(mut self, f: F) -> Self
    where
        F: Fn(Context, &Request) -> Result<Context, BoxError> + Send + Sync + 'static,
    {
        self.pre_request.push(Arc::new(f));
        self
    }

    /// Appends a post-request phase. Phases run in the order they were added.
    pub fn post_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&Context, &RequestHead, &Completion) -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.post_request.push(Arc::new(f));
        self
    }

    pub fn debug_key(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        self.debug_key = (!key.is_empty()).then_some(key);
        self
    }

    pub fn request_id_header(mut self, name: HeaderName) -> Self {
        self.request_id_header = name;
        self
    }

    /// Number of request-ID counters. Clamped to at least one.
    pub fn id_shards(mut self, shards: usize) -> Self {
        self.id_shards = shards.max(1);
        self
    }

    pub fn shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    pub fn ws_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.ws_handshake_timeout = timeout;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn env_supplies_debug_key_and_grace() {
        let config = ServerConfig::from_lookup(lookup(&[
            (DEBUG_KEY_ENV, "k"),
            (SHUTDOWN_GRACE_ENV, "12"),
        ]));
        assert_eq!(config.debug_key.as_deref(), Some("k"));
        assert_eq!(config.shutdown_grace, Duration::from_secs(12));
    }

    #[test]
    fn empty_debug_key_is_treated_as_unset() {
        let config = ServerConfig::from_lookup(lookup(&[(DEBUG_KEY_ENV, "")]));
        assert!(config.debug_key.is_none());
    }

    #[test]
    fn malformed_grace_falls_back_to_default() {
        let config = ServerConfig::from_lookup(lookup(&[(SHUTDOWN_GRACE_ENV, "soon")]));
        assert_eq!(config.shutdown_grace, DEFAULT_SHUTDOWN_GRACE);
    }

    #[test]
    fn database_handle_downcasts_to_its_own_type_only() {
        struct Pool(&'static str);

        let config = ServerConfig::new().database(Arc::new(Pool("primary")));
        let pool = config.resources.database::<Pool>().expect("pool configured");
        assert_eq!(pool.0, "primary");
        assert!(config.resources.database::<String>().is_none());
    }
}
