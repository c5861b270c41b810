//! Pluggable key/value cache.
//!
//! [`Cache`] is the interface handlers see through
//! [`Resources::cache`](crate::Resources::cache). [`InMemoryCache`] is a small
//! TTL map: every entry expires a fixed time after it was written, expired
//! entries are dropped when read, and an optional background task purges the
//! rest periodically.

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::context::CancelToken;

/// A shared key/value store.
pub trait Cache: Send + Sync + 'static {
    fn set(&self, key: &str, value: Bytes);
    fn get(&self, key: &str) -> Option<Bytes>;
    fn delete(&self, key: &str);
}

#[derive(Clone, Debug)]
struct Entry {
    value: Bytes,
    expires_at: Instant,
}

/// In-process [`Cache`] with a single TTL for every entry.
#[derive(Debug)]
pub struct InMemoryCache {
    entries: Arc<DashMap<String, Entry>>,
    ttl: Duration,
    cleanup_every: Duration,
    cleanup: Mutex<Option<CancelToken>>,
}

impl InMemoryCache {
    pub fn new(ttl: Duration, cleanup_every: Duration) -> Self {
        Self {
            entries: Arc::new(DashMap::new()),
            ttl,
            cleanup_every,
            cleanup: Mutex::new(None),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Number of stored entries, expired or not.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Starts the periodic purge task. It stops when `token` is cancelled or
    /// [`stop_cleanup`](Self::stop_cleanup) is called. Starting again
    /// replaces the previous task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn start_cleanup(&self, token: &CancelToken) {
        let stop = token.child();
        if let Some(previous) = self.cleanup.lock().replace(stop.clone()) {
            previous.cancel();
        }

        let entries = Arc::clone(&self.entries);
        let every = self.cleanup_every;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = stop.cancelled() => break,
                    _ = ticker.tick() => purge_expired(&entries),
                }
            }
            debug!("cache cleanup stopped");
        });
    }

    pub fn stop_cleanup(&self) {
        if let Some(token) = self.cleanup.lock().take() {
            token.cancel();
        }
    }
}

fn purge_expired(entries: &DashMap<String, Entry>) {
    let now = Instant::now();
    let before = entries.len();
    entries.retain(|_, entry| entry.expires_at > now);
    let purged = before.saturating_sub(entries.len());
    if purged > 0 {
        debug!(purged, "purged expired cache entries");
    }
}

impl Cache for InMemoryCache {
    fn set(&self, key: &str, value: Bytes) {
        let expires_at = Instant::now() + self.ttl;
        self.entries.insert(key.to_owned(), Entry { value, expires_at });
    }

    fn get(&self, key: &str) -> Option<Bytes> {
        let now = Instant::now();
        let entry = self.entries.get(key)?;
        if entry.expires_at > now {
            return Some(entry.value.clone());
        }
        drop(entry);
        self.entries.remove_if(key, |_, e| e.expires_at <= now);
        None
    }

    fn delete(&self, key: &str) {
        self.entries.remove(key);
    }
}

impl Drop for InMemoryCache {
    fn drop(&mut self) {
        self.stop_cleanup();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_get_delete() {
        let cache = InMemoryCache::new(Duration::from_secs(60), Duration::from_secs(60));
        cache.set("k", Bytes::from_static(b"v"));
        assert_eq!(cache.get("k"), Some(Bytes::from_static(b"v")));
        cache.delete("k");
        assert_eq!(cache.get("k"), None);
    }

    #[test]
    fn expired_entries_are_dropped_on_read() {
        let cache = InMemoryCache::new(Duration::ZERO, Duration::from_secs(60));
        cache.set("k", Bytes::from_static(b"v"));
        assert_eq!(cache.get("k"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn cleanup_task_purges_without_reads() {
        let cache = InMemoryCache::new(Duration::from_millis(100), Duration::from_millis(50));
        cache.set("a", Bytes::from_static(b"1"));
        cache.set("b", Bytes::from_static(b"2"));
        cache.start_cleanup(&CancelToken::new());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.is_empty());
        cache.stop_cleanup();
    }

    #[tokio::test(start_paused = true)]
    async fn stopped_cleanup_leaves_entries_for_expiry_on_read() {
        let cache = InMemoryCache::new(Duration::from_millis(100), Duration::from_millis(50));
        cache.set("k", Bytes::from_static(b"v"));
        cache.start_cleanup(&CancelToken::new());
        cache.stop_cleanup();

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k"), None);
    }
}
