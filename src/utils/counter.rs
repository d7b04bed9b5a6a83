#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::{Client, StatusCode};

use crate::utils::errors::Errors;

// ***************************************************************************
//                                  Traits
// ***************************************************************************
/** The two-operation counter store contract.  Both realizations are
 * interchangeable from the greeting handler's point of view; which one backs
 * the service is decided once at startup from the configuration.
 */
#[allow(async_fn_in_trait)]
pub trait CounterStore {
    /// Current count for the key; keys never seen read as zero.
    async fn get(&self, key: &str) -> Result<u64, Errors>;

    /// Bump the count for the key by one and return the pre-increment value,
    /// so the first increment of a new key returns zero.
    async fn increment(&self, key: &str) -> Result<u64, Errors>;
}

// ***************************************************************************
//                              Backend Selection
// ***************************************************************************
// ---------------------------------------------------------------------------
// CounterBackend:
// ---------------------------------------------------------------------------
/** The backend constructed at startup and held in the runtime context. */
#[derive(Debug)]
pub enum CounterBackend {
    Local(LocalCounterStore),
    Shared(SharedCounterStore),
}

impl CounterStore for CounterBackend {
    async fn get(&self, key: &str) -> Result<u64, Errors> {
        match self {
            CounterBackend::Local(store) => store.get(key).await,
            CounterBackend::Shared(store) => store.get(key).await,
        }
    }

    async fn increment(&self, key: &str) -> Result<u64, Errors> {
        match self {
            CounterBackend::Local(store) => store.increment(key).await,
            CounterBackend::Shared(store) => store.increment(key).await,
        }
    }
}

// ***************************************************************************
//                            Local Counter Store
// ***************************************************************************
// ---------------------------------------------------------------------------
// LocalCounterStore:
// ---------------------------------------------------------------------------
/** Process-local counts, valid for exactly the lifetime of one process and
 * not shared across replicas.  The lock is held across the whole
 * read-modify-write so concurrent increments of one key hand out each value
 * exactly once.
 */
#[derive(Debug, Default)]
pub struct LocalCounterStore {
    counts: Mutex<HashMap<String, u64>>,
}

impl LocalCounterStore {
    pub fn new() -> Self {
        LocalCounterStore::default()
    }

    // A poisoned lock only means another increment panicked mid-update; the
    // map itself is still usable, so recover it rather than spreading panics.
    fn lock_counts(&self) -> std::sync::MutexGuard<'_, HashMap<String, u64>> {
        self.counts.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl CounterStore for LocalCounterStore {
    async fn get(&self, key: &str) -> Result<u64, Errors> {
        Ok(self.lock_counts().get(key).copied().unwrap_or(0))
    }

    async fn increment(&self, key: &str) -> Result<u64, Errors> {
        let mut counts = self.lock_counts();
        let count = counts.entry(key.to_owned()).or_insert(0);
        let previous = *count;
        *count += 1;
        Ok(previous)
    }
}

// ***************************************************************************
//                            Shared Counter Store
// ***************************************************************************
// ---------------------------------------------------------------------------
// SharedCounterStore:
// ---------------------------------------------------------------------------
/** Counts owned by an external key-value counter service, shared across
 * replicas and surviving our restarts.  Atomicity is delegated to the store's
 * per-key increment primitive:
 *
 *   POST {base_url}/incr?key=<k>   bumps the count, answers the new count
 *   GET  {base_url}/value?key=<k>  answers the current count, 404 meaning zero
 *
 * Counts travel as decimal text.  Every failure here is recoverable per
 * request; the caller reports it and keeps serving.
 */
#[derive(Debug)]
pub struct SharedCounterStore {
    base_url: String,
    client: Client,
}

impl SharedCounterStore {
    /** Build the store client.  The timeout bounds every outbound call since
     * no cancellation is propagated from inbound requests.
     */
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Errors> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Errors::CounterClientInitialization(e.to_string()))?;
        Ok(SharedCounterStore {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Parse a decimal count out of a store reply body.
    fn parse_count(body: &str) -> Result<u64, Errors> {
        body.trim()
            .parse::<u64>()
            .map_err(|_| Errors::CounterStoreResponse(format!("not a count: {:?}", body)))
    }

    /// Turn an increment reply into the pre-increment count.  The store
    /// answers with the post-increment count, which is always at least one.
    fn previous_from_incr_reply(body: &str) -> Result<u64, Errors> {
        match Self::parse_count(body)? {
            0 => Err(Errors::CounterStoreResponse(
                "impossible post-increment count: 0".to_string(),
            )),
            count => Ok(count - 1),
        }
    }
}

impl CounterStore for SharedCounterStore {
    async fn get(&self, key: &str) -> Result<u64, Errors> {
        let resp = self
            .client
            .get(format!("{}/value", self.base_url))
            .query(&[("key", key)])
            .send()
            .await
            .map_err(|e| Errors::CounterStoreUnavailable(e.to_string()))?;

        // A key the store has never seen reads as zero.
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(0);
        }
        let resp = resp
            .error_for_status()
            .map_err(|e| Errors::CounterStoreResponse(e.to_string()))?;
        let body = resp
            .text()
            .await
            .map_err(|e| Errors::CounterStoreUnavailable(e.to_string()))?;
        Self::parse_count(&body)
    }

    async fn increment(&self, key: &str) -> Result<u64, Errors> {
        let resp = self
            .client
            .post(format!("{}/incr", self.base_url))
            .query(&[("key", key)])
            .send()
            .await
            .map_err(|e| Errors::CounterStoreUnavailable(e.to_string()))?
            .error_for_status()
            .map_err(|e| Errors::CounterStoreResponse(e.to_string()))?;
        let body = resp
            .text()
            .await
            .map_err(|e| Errors::CounterStoreUnavailable(e.to_string()))?;

        // Callers report the value seen before this request.
        Self::previous_from_incr_reply(&body)
    }
}
