use futures::future::join_all;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch};

use super::error::SyncError;
use super::sync::{FeedSync, SyncSummary};
use super::url::normalize;
use crate::config::Config;
use crate::storage::Feed;

/// Per-feed failure backoff starts at the fetch retry base times this.
const FEED_BACKOFF_MULTIPLIER: u32 = 60;

/// Progress events buffered per subscriber before the oldest are dropped
const PROGRESS_EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    pub concurrency: usize,
    /// Non-forced runs closer together than this are skipped
    pub min_interval: Duration,
    pub backoff_base: Duration,
    pub max_backoff: Duration,
    pub unread_limit: usize,
}

impl From<&Config> for SchedulerSettings {
    fn from(config: &Config) -> Self {
        Self {
            concurrency: config.concurrency,
            min_interval: config.refresh_all_min_interval(),
            backoff_base: config.backoff_base(),
            max_backoff: config.max_backoff(),
            unread_limit: config.unread_limit,
        }
    }
}

/// `(completed, total)` for the run in progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshProgress {
    pub completed: usize,
    pub total: usize,
}

/// Consecutive failures of one feed and when it may be tried again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureState {
    pub count: u32,
    pub next_allowed: Instant,
}

/// Result of syncing one feed during a fleet refresh.
#[derive(Debug)]
pub struct FeedOutcome {
    pub feed_id: i64,
    pub url: String,
    pub result: Result<SyncSummary, SyncError>,
}

/// Refreshes every stored feed with bounded concurrency.
///
/// Failing feeds back off exponentially and are skipped until their
/// backoff expires; full runs are throttled to one per `min_interval`.
/// Forced runs bypass both.
pub struct Scheduler {
    sync: FeedSync,
    settings: SchedulerSettings,
    failures: Mutex<HashMap<String, FailureState>>,
    last_run: Mutex<Option<Instant>>,
    progress: watch::Sender<Option<RefreshProgress>>,
    progress_events: broadcast::Sender<RefreshProgress>,
}

impl Scheduler {
    pub fn new(sync: FeedSync, settings: SchedulerSettings) -> Self {
        let (progress, _) = watch::channel(None);
        let (progress_events, _) = broadcast::channel(PROGRESS_EVENT_CAPACITY);
        Self {
            sync,
            settings,
            failures: Mutex::new(HashMap::new()),
            last_run: Mutex::new(None),
            progress,
            progress_events,
        }
    }

    /// Progress of the current run; `None` while idle.
    pub fn progress(&self) -> watch::Receiver<Option<RefreshProgress>> {
        self.progress.subscribe()
    }

    /// Every progress step of later runs, starting with `(0, total)` and
    /// then one event per feed, skipped feeds included.
    pub fn progress_events(&self) -> broadcast::Receiver<RefreshProgress> {
        self.progress_events.subscribe()
    }

    /// Failure state of a feed, looked up by its canonical URL.
    pub fn failure_state(&self, url: &str) -> Option<FailureState> {
        lock(&self.failures).get(&normalize(url)).copied()
    }

    /// Backoff after `count` consecutive failures:
    /// `backoff_base * 60 * 2^(count - 1)`, capped at `max_backoff`.
    pub fn feed_backoff(&self, count: u32) -> Duration {
        let base = self.settings.backoff_base.saturating_mul(FEED_BACKOFF_MULTIPLIER);
        let factor = 2u32.saturating_pow(count.saturating_sub(1));
        base.saturating_mul(factor).min(self.settings.max_backoff)
    }

    /// Sync every stored feed.
    ///
    /// Feeds in backoff are counted as completed but produce no outcome.
    /// Outcomes are in completion order.
    ///
    /// # Errors
    ///
    /// Only when the feed list cannot be loaded; per-feed failures are
    /// reported in the outcomes.
    pub async fn refresh_all(&self, force: bool) -> Result<Vec<FeedOutcome>, SyncError> {
        if !self.claim_run(force) {
            tracing::info!("Skipping full refresh: ran too recently");
            return Ok(Vec::new());
        }

        let feeds = self
            .sync
            .database()
            .get_feeds_with_unread_counts()
            .await
            .map_err(SyncError::database)?;

        let total = feeds.len();
        let queue = Mutex::new(VecDeque::from(feeds));
        let completed = AtomicUsize::new(0);
        let outcomes = Mutex::new(Vec::with_capacity(total));

        let _clear = ProgressGuard(&self.progress);
        self.publish(RefreshProgress { completed: 0, total });

        let workers = self.settings.concurrency.max(1).min(total);
        tracing::info!(feeds = total, workers = workers, force = force, "Refreshing all feeds");

        join_all((0..workers).map(|_| self.worker(&queue, &completed, total, &outcomes, force))).await;

        let outcomes = outcomes
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
        tracing::info!(
            synced = outcomes.len() - failed,
            failed = failed,
            skipped = total - outcomes.len(),
            "Full refresh finished"
        );
        Ok(outcomes)
    }

    /// Records the start of a run, unless a non-forced run is throttled.
    fn claim_run(&self, force: bool) -> bool {
        let now = Instant::now();
        let mut last_run = lock(&self.last_run);
        let throttled = last_run.is_some_and(|last| now.duration_since(last) < self.settings.min_interval);
        if throttled && !force {
            return false;
        }
        *last_run = Some(now);
        true
    }

    async fn worker(
        &self,
        queue: &Mutex<VecDeque<Feed>>,
        completed: &AtomicUsize,
        total: usize,
        outcomes: &Mutex<Vec<FeedOutcome>>,
        force: bool,
    ) {
        loop {
            let next = lock(queue).pop_front();
            let Some(feed) = next else { break };

            let key = normalize(&feed.url);
            let previous = lock(&self.failures).get(&key).copied();

            if let Some(state) = previous.filter(|s| !force && Instant::now() < s.next_allowed) {
                tracing::debug!(feed = %feed.url, failures = state.count, "Feed in backoff, skipping");
                self.advance(completed, total);
                continue;
            }

            let result = self
                .sync
                .sync_feed(&feed, self.settings.unread_limit, force)
                .await;

            match &result {
                Ok(_) => {
                    lock(&self.failures).remove(&key);
                }
                Err(e) => {
                    let count = previous.map_or(0, |s| s.count) + 1;
                    let backoff = self.feed_backoff(count);
                    tracing::warn!(
                        feed = %feed.url,
                        failures = count,
                        backoff_secs = backoff.as_secs(),
                        error = %e,
                        "Feed refresh failed, backing off"
                    );
                    lock(&self.failures).insert(
                        key,
                        FailureState {
                            count,
                            next_allowed: Instant::now() + backoff,
                        },
                    );
                }
            }

            lock(outcomes).push(FeedOutcome {
                feed_id: feed.id,
                url: feed.url,
                result,
            });
            self.advance(completed, total);
        }
    }

    fn advance(&self, completed: &AtomicUsize, total: usize) {
        let done = completed.fetch_add(1, Ordering::Relaxed).saturating_add(1);
        self.publish(RefreshProgress { completed: done, total });
    }

    fn publish(&self, step: RefreshProgress) {
        self.progress.send_replace(Some(step));
        // No subscribers is fine
        let _ = self.progress_events.send(step);
    }
}

/// Resets progress to idle when a run ends, however it ends.
struct ProgressGuard<'a>(&'a watch::Sender<Option<RefreshProgress>>);

impl Drop for ProgressGuard<'_> {
    fn drop(&mut self) {
        self.0.send_replace(None);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
