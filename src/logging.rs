//! Log subscriber installation for binaries.
//!
//! gatehouse itself only emits `tracing` events; whichever subscriber the host
//! process installs decides where they go. [`init`] is the stock choice:
//! human-readable lines on stderr, filtered by `RUST_LOG`.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::error::Error;

/// Filter used when `RUST_LOG` is unset or unparsable.
pub const DEFAULT_FILTER: &str = "gatehouse=info";

/// Installs a global `fmt` subscriber filtered by `RUST_LOG`.
///
/// Set `RUST_LOG=gatehouse::debug=debug` to see debug-capture dumps.
/// Fails if a global subscriber is already installed.
pub fn init() -> Result<(), Error> {
    init_with(DEFAULT_FILTER)
}

/// Like [`init`], with a caller-chosen fallback filter.
pub fn init_with(default_filter: &str) -> Result<(), Error> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))
}
