use chrono::Utc;
use std::sync::Arc;
use url::Url;

use super::archive::partition;
use super::error::SyncError;
use super::fetcher::Fetcher;
use super::item::{FeedItem, ProxyFeed};
use super::reconcile::{build_article, reconcile, ExistingArticles, Reconciliation};
use crate::config::Config;
use crate::storage::{Database, Feed, NewArticle};
use crate::util::Sanitizer;

const UNKNOWN_FEED_TITLE: &str = "Unknown Feed";

/// Knobs for a single feed sync.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    pub max_retries: u32,
    pub snippet_length: usize,
    /// Default unread limit for syncs that do not pass their own
    pub unread_limit: usize,
}

impl From<&Config> for SyncSettings {
    fn from(config: &Config) -> Self {
        Self {
            max_retries: config.max_fetch_retries,
            snippet_length: config.snippet_length,
            unread_limit: config.unread_limit,
        }
    }
}

/// Counts of articles inserted by one sync.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    pub unread: usize,
    pub archived: usize,
    pub total: usize,
}

/// Syncs one feed end to end: fetch, reconcile against history, archive,
/// persist.
#[derive(Clone)]
pub struct FeedSync {
    db: Database,
    fetcher: Fetcher,
    sanitizer: Arc<dyn Sanitizer>,
    settings: SyncSettings,
}

impl FeedSync {
    pub fn new(db: Database, fetcher: Fetcher, sanitizer: Arc<dyn Sanitizer>, settings: SyncSettings) -> Self {
        Self {
            db,
            fetcher,
            sanitizer,
            settings,
        }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Fetch `feed` and store its new articles.
    ///
    /// At most `unread_limit` new articles stay unread; older ones are
    /// stored as read. On failure the message is recorded on the feed's
    /// error field before the error is returned.
    pub async fn sync_feed(
        &self,
        feed: &Feed,
        unread_limit: usize,
        force_refresh: bool,
    ) -> Result<SyncSummary, SyncError> {
        let result = match self
            .fetcher
            .fetch(&feed.url, self.settings.max_retries, force_refresh)
            .await
        {
            Ok(data) => self.store(feed, &data, unread_limit).await,
            Err(e) => Err(e.into()),
        };

        if let Err(e) = &result {
            self.record_error(feed, e).await;
        }
        result
    }

    /// Subscribe to `url` after checking that it can be fetched, then run
    /// its first sync. Returns the new feed's id.
    ///
    /// Subscribing to a URL that is already stored keeps that feed's title
    /// and syncs it again.
    pub async fn subscribe(&self, url: &str, folder_id: Option<i64>) -> Result<i64, SyncError> {
        let url = url.trim();
        let data = self
            .fetcher
            .fetch(url, self.settings.max_retries, false)
            .await?;

        let title = non_blank(data.title.as_deref())
            .map(str::to_owned)
            .or_else(|| Url::parse(url).ok().and_then(|u| u.host_str().map(str::to_owned)))
            .unwrap_or_else(|| url.to_string());
        let website = non_blank(data.link.as_deref()).unwrap_or(url);

        let feed_id = self
            .db
            .insert_feed(url, &title, website, folder_id)
            .await
            .map_err(SyncError::database)?;
        tracing::info!(feed = %url, feed_id = feed_id, title = %title, "Subscribed to feed");

        let feed = self
            .db
            .get_feed(feed_id)
            .await
            .map_err(SyncError::database)?
            .ok_or_else(|| SyncError::Database(format!("feed {feed_id} missing after insert")))?;

        // The fetch above already validated the feed; reuse its data
        let result = self.store(&feed, &data, self.settings.unread_limit).await;
        if let Err(e) = &result {
            self.record_error(&feed, e).await;
        }
        result.map(|_| feed_id)
    }

    async fn store(&self, feed: &Feed, data: &ProxyFeed, unread_limit: usize) -> Result<SyncSummary, SyncError> {
        let title = non_blank(Some(feed.title.as_str()))
            .or_else(|| non_blank(data.title.as_deref()))
            .unwrap_or(UNKNOWN_FEED_TITLE);
        self.db
            .record_fetch_success(feed.id, title)
            .await
            .map_err(SyncError::database)?;

        let now = Utc::now();
        let processed: Vec<NewArticle> = data
            .items
            .iter()
            .map(|raw| FeedItem::from_raw(raw, now))
            .map(|item| {
                build_article(
                    feed,
                    &item,
                    self.sanitizer.as_ref(),
                    self.settings.snippet_length,
                    now.timestamp_millis(),
                )
            })
            .collect();

        let keys: Vec<String> = processed.iter().map(|a| a.guid.clone()).collect();
        let existing = ExistingArticles {
            keyed: self
                .db
                .existing_articles_for_guids(feed.id, &keys)
                .await
                .map_err(SyncError::database)?,
            missing_link: self
                .db
                .articles_missing_link(feed.id)
                .await
                .map_err(SyncError::database)?,
        };

        let Reconciliation {
            new_articles,
            link_backfills,
        } = reconcile(processed, &existing);
        let (unread, archived) = partition(new_articles, unread_limit);

        let mut to_insert = unread;
        to_insert.extend(archived);
        let inserted = self
            .db
            .apply_sync(feed.id, &link_backfills, &to_insert)
            .await
            .map_err(SyncError::database)?;
        let summary = SyncSummary {
            unread: inserted.unread,
            archived: inserted.archived,
            total: inserted.total(),
        };

        tracing::info!(
            feed = %feed.url,
            items = data.items.len(),
            inserted = summary.total,
            unread = summary.unread,
            archived = summary.archived,
            backfilled = link_backfills.len(),
            "Feed synced"
        );
        Ok(summary)
    }

    async fn record_error(&self, feed: &Feed, error: &SyncError) {
        tracing::warn!(feed = %feed.url, error = %error, "Feed sync failed");
        if let Err(db_err) = self.db.set_feed_error(feed.id, Some(&error.to_string())).await {
            tracing::warn!(feed_id = feed.id, error = %db_err, "Failed to record feed error");
        }
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.trim().is_empty())
}
