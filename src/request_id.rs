//! Request identifiers.
//!
//! IDs look like `web-1/aZ3kQ9xLmP-000042`: a per-process prefix (hostname
//! and a random nonce fixed at startup), then a six-digit counter. The
//! counter comes from one of N independent atomics picked by hashing the
//! peer address, so concurrent requests from different peers rarely touch
//! the same cache line and never take a lock.
//!
//! An ID already present on the request is extended rather than replaced:
//! `upstream-id/web-1/aZ3kQ9xLmP-000042`.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use const_fnv1a_hash::fnv1a_hash_str_64;
use http::{HeaderName, HeaderValue};
use rand::Rng;
use rand::distributions::Alphanumeric;
use tracing::warn;

use crate::request::Request;

const NONCE_LEN: usize = 10;

/// Sharded request-ID source. One per server instance.
#[derive(Debug)]
pub struct RequestIdGenerator {
    prefix: String,
    shards: Box<[AtomicU64]>,
    header: HeaderName,
}

impl RequestIdGenerator {
    /// A generator with a fresh `hostname/nonce` prefix.
    pub fn new(shards: usize, header: HeaderName) -> Self {
        let nonce: String = rand::thread_rng()
            .sample_iter(&Alphanumeric)
            .take(NONCE_LEN)
            .map(char::from)
            .collect();
        Self::with_prefix(format!("{}/{nonce}", hostname()), shards, header)
    }

    pub fn with_prefix(prefix: impl Into<String>, shards: usize, header: HeaderName) -> Self {
        let shards = (0..shards.max(1)).map(|_| AtomicU64::new(0)).collect();
        Self { prefix: prefix.into(), shards, header }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn header(&self) -> &HeaderName {
        &self.header
    }

    fn shard_for(&self, key: &str) -> usize {
        (fnv1a_hash_str_64(key) % self.shards.len() as u64) as usize
    }

    /// The next ID from the shard `key` hashes to.
    pub fn next_id(&self, key: &str) -> String {
        let n = self.shards[self.shard_for(key)].fetch_add(1, Ordering::Relaxed) + 1;
        format!("{}-{n:06}", self.prefix)
    }

    /// Assigns an ID to `req`: chains it after any incoming ID, writes it
    /// back to the request header, and stores it in the request context.
    pub fn assign(&self, req: &mut Request) -> Arc<str> {
        let fresh = self.next_id(&req.remote_addr().to_string());
        let id: Arc<str> = match req.header(&self.header) {
            Some(existing) if !existing.is_empty() => format!("{existing}/{fresh}").into(),
            _ => fresh.into(),
        };
        match HeaderValue::from_str(&id) {
            Ok(value) => {
                req.headers_mut().insert(self.header.clone(), value);
            }
            Err(e) => warn!(error = %e, "request id is not a valid header value"),
        }
        req.context_mut().set_request_id(Arc::clone(&id));
        id
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/proc/sys/kernel/hostname").ok())
        .map(|h| h.trim().to_owned())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_owned())
}
