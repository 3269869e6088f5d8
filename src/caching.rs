//! Single-flight TTL cache.
//!
//! Bearer tokens and discovery documents change on minute/hour scale. A cold
//! or expired cache with many concurrent readers must still issue exactly one
//! fetch; everything else here follows from that requirement.

use crate::clock::Clock;
use chrono::{DateTime, Duration, Utc};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::Mutex;

struct Entry<T> {
    stored_at: DateTime<Utc>,
    value: Arc<T>,
}

/// A lazily produced value with a fixed TTL.
///
/// `get` returns the cached value while it is fresh; callers receive the same
/// `Arc` until expiry. An expired or empty slot is refilled by the supplied
/// fetch future, which runs under the atom's lock: concurrent callers queue
/// and observe the stored result instead of fetching again. A failed fetch
/// leaves the slot empty, so the next caller retries.
pub struct CachedAtom<T> {
    ttl: Duration,
    clock: Arc<dyn Clock>,
    slot: Mutex<Option<Entry<T>>>,
}

impl<T: Send + Sync + 'static> CachedAtom<T> {
    pub fn new(ttl: Duration, clock: Arc<dyn Clock>) -> Self {
        Self {
            ttl,
            clock,
            slot: Mutex::new(None),
        }
    }

    /// Return the cached value, or produce it with `fetch`.
    ///
    /// The fetch future is spawned on the runtime so that a waiter dropping
    /// its `get` call cannot abort a fetch that is already in flight.
    pub async fn get<F, Fut, E>(&self, fetch: F) -> Result<Arc<T>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        E: Send + 'static,
    {
        let mut slot = self.slot.lock().await;

        if let Some(entry) = slot.as_ref() {
            if entry.stored_at + self.ttl > self.clock.now_utc() {
                return Ok(entry.value.clone());
            }
        }

        let handle = tokio::spawn(fetch());
        let value = match handle.await {
            Ok(result) => Arc::new(result?),
            Err(join_error) => {
                // A panicking fetcher is a bug in the fetcher; surface it.
                std::panic::resume_unwind(join_error.into_panic())
            }
        };

        *slot = Some(Entry {
            stored_at: self.clock.now_utc(),
            value: value.clone(),
        });
        Ok(value)
    }
}
