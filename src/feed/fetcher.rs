use futures::future::{BoxFuture, FutureExt, Shared};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use super::error::{ErrorKind, FetchError};
use super::item::ProxyFeed;
use super::proxy::ProxyClient;
use super::url::{build_variants, normalize};

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<ProxyFeed>, FetchError>>>;

struct InFlight {
    id: u64,
    task: SharedFetch,
}

struct Inner {
    client: ProxyClient,
    backoff_base: Duration,
    /// Canonical URL -> pending request. The id tells apart a request from
    /// a forced one that replaced it in the same slot.
    in_flight: Mutex<HashMap<String, InFlight>>,
    next_id: AtomicU64,
}

/// Fetches feeds through the relay, retrying transient failures and falling
/// back to alternate URLs.
///
/// Concurrent non-forced fetches of the same canonical URL share a single
/// request. Cloning is cheap and clones share the in-flight table.
#[derive(Clone)]
pub struct Fetcher {
    inner: Arc<Inner>,
}

impl Fetcher {
    pub fn new(client: ProxyClient, backoff_base: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                client,
                backoff_base,
                in_flight: Mutex::new(HashMap::new()),
                next_id: AtomicU64::new(0),
            }),
        }
    }

    /// Fetch a feed, trying each candidate URL up to `max_retries + 1` times.
    ///
    /// The request runs on its own task, so it settles and frees its
    /// in-flight slot even when every caller has given up waiting.
    ///
    /// # Errors
    ///
    /// The last classified error once every candidate is exhausted, or a
    /// configuration error ([`FetchError::NoProxy`]) as soon as it is seen.
    pub async fn fetch(
        &self,
        url: &str,
        max_retries: u32,
        force_refresh: bool,
    ) -> Result<Arc<ProxyFeed>, FetchError> {
        let key = normalize(url);
        self.claim(&key, url, max_retries, force_refresh).await
    }

    fn claim(&self, key: &str, url: &str, max_retries: u32, force_refresh: bool) -> SharedFetch {
        let mut in_flight = lock(&self.inner.in_flight);

        if !force_refresh {
            if let Some(entry) = in_flight.get(key) {
                tracing::debug!(feed = %key, "Joining in-flight fetch");
                return entry.task.clone();
            }
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let request = fetch_candidates(
            self.inner.client.clone(),
            url.to_string(),
            max_retries,
            force_refresh,
            self.inner.backoff_base,
        );

        // The slot is released by the request itself, unless a forced
        // request has taken it over in the meantime. The lock held here
        // keeps the release from running before the insert below.
        let owner = Arc::downgrade(&self.inner);
        let slot = key.to_string();
        let handle = tokio::spawn(async move {
            let result = request.await;
            if let Some(inner) = owner.upgrade() {
                release(&inner, &slot, id);
            }
            result
        });

        let task = async move {
            handle
                .await
                .unwrap_or_else(|e| Err(FetchError::Network(format!("fetch task failed: {e}"))))
        }
        .boxed()
        .shared();

        in_flight.insert(
            key.to_string(),
            InFlight {
                id,
                task: task.clone(),
            },
        );
        task
    }

    #[cfg(test)]
    fn in_flight_count(&self) -> usize {
        lock(&self.inner.in_flight).len()
    }
}

fn release(inner: &Inner, key: &str, id: u64) {
    let mut in_flight = lock(&inner.in_flight);
    if in_flight.get(key).is_some_and(|entry| entry.id == id) {
        in_flight.remove(key);
    }
}

fn lock(in_flight: &Mutex<HashMap<String, InFlight>>) -> MutexGuard<'_, HashMap<String, InFlight>> {
    // The map holds no invariants a panicking holder could break
    in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Delay before retry number `attempt + 1` on the same candidate.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2u32.saturating_pow(attempt))
}

async fn fetch_candidates(
    client: ProxyClient,
    url: String,
    max_retries: u32,
    force_refresh: bool,
    backoff_base: Duration,
) -> Result<Arc<ProxyFeed>, FetchError> {
    let candidates = build_variants(&url);
    let mut last_error = FetchError::NoCandidates;

    for (index, candidate) in candidates.iter().enumerate() {
        for attempt in 0..=max_retries {
            match client.fetch(candidate, force_refresh).await {
                Ok(feed) => {
                    if index > 0 {
                        tracing::info!(feed = %url, candidate = %candidate, "Fetched via alternate URL");
                    }
                    return Ok(Arc::new(feed));
                }
                Err(e) if e.kind() == ErrorKind::Configuration => return Err(e),
                Err(e) if e.is_retryable() && attempt < max_retries => {
                    let delay = retry_delay(backoff_base, attempt);
                    tracing::warn!(
                        feed = %url,
                        candidate = %candidate,
                        attempt = attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Fetch failed, retrying after delay"
                    );
                    last_error = e;
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    tracing::debug!(
                        feed = %url,
                        candidate = %candidate,
                        attempt = attempt,
                        error = %e,
                        "Giving up on candidate"
                    );
                    last_error = e;
                    break;
                }
            }
        }
    }

    tracing::warn!(
        feed = %url,
        candidates = candidates.len(),
        attempts_per_candidate = max_retries + 1,
        error = %last_error,
        "Failed to fetch feed"
    );
    Err(last_error)
}
