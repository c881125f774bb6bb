//! Feed synchronization engine.
//!
//! Feeds are fetched through a relay that returns JSON, reconciled against
//! what is already stored, and inserted with older new articles pre-archived.
//!
//! # Architecture
//!
//! - [`url`] - canonical feed URLs and fallback candidates
//! - [`ProxyClient`] - one relay request with timeout and size cap
//! - [`Fetcher`] - retries, candidate fallback, in-flight dedup
//! - [`item`] - relay item shapes normalized into [`FeedItem`]
//! - [`reconcile`] - identity keys, new-vs-existing, link backfill
//! - [`archive`] - unread/archived split by recency
//! - [`FeedSync`] - one feed end to end, plus `subscribe`
//! - [`Scheduler`] - all feeds with bounded concurrency and backoff
//!
//! # Example
//!
//! ```ignore
//! let fetcher = Fetcher::new(ProxyClient::new(config.proxy_base.clone(), config.fetch_timeout())?, config.backoff_base());
//! let sync = FeedSync::new(db, fetcher, Arc::new(AllowListSanitizer::default()), SyncSettings::from(&config));
//! let scheduler = Scheduler::new(sync, SchedulerSettings::from(&config));
//!
//! for outcome in scheduler.refresh_all(false).await? {
//!     println!("{}: {:?}", outcome.url, outcome.result);
//! }
//! ```

pub mod archive;
mod error;
mod fetcher;
pub mod item;
mod proxy;
pub mod reconcile;
mod scheduler;
mod sync;
pub mod url;

pub use error::{ErrorKind, FetchError, SyncError};
pub use fetcher::{retry_delay, Fetcher};
pub use item::{FeedItem, ProxyFeed, RawItem};
pub use proxy::ProxyClient;
pub use scheduler::{FailureState, FeedOutcome, RefreshProgress, Scheduler, SchedulerSettings};
pub use sync::{FeedSync, SyncSettings, SyncSummary};
