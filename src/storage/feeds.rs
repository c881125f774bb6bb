use anyhow::Result;

use super::schema::Database;
use super::types::{feed_from_row, Feed, FeedRow};

const FEED_COLUMNS: &str = r#"
    f.id, f.url, f.title, f.website, f.folder_id, f.last_fetched, f.error,
    COUNT(CASE WHEN a.read = 0 THEN 1 END) as unread_count
"#;

impl Database {
    // ========================================================================
    // Feed Operations
    // ========================================================================

    /// Subscribe to a feed, returning its ID.
    ///
    /// The URL is the unique key: subscribing to an existing URL returns the
    /// existing ID. A stored non-blank title is kept; the website is updated.
    pub async fn insert_feed(
        &self,
        url: &str,
        title: &str,
        website: &str,
        folder_id: Option<i64>,
    ) -> Result<i64> {
        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO feeds (url, title, website, folder_id)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(url) DO UPDATE SET
                title = CASE WHEN TRIM(feeds.title) = '' THEN excluded.title ELSE feeds.title END,
                website = excluded.website,
                folder_id = COALESCE(excluded.folder_id, feeds.folder_id)
            RETURNING id
        "#,
        )
        .bind(url)
        .bind(title)
        .bind(website)
        .bind(folder_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.0)
    }

    /// Get all feeds with their unread article counts
    pub async fn get_feeds_with_unread_counts(&self) -> Result<Vec<Feed>> {
        let rows: Vec<FeedRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f
             LEFT JOIN articles a ON f.id = a.feed_id
             GROUP BY f.id
             ORDER BY f.title"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(feed_from_row).collect())
    }

    pub async fn get_feed(&self, feed_id: i64) -> Result<Option<Feed>> {
        let row: Option<FeedRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f
             LEFT JOIN articles a ON f.id = a.feed_id
             WHERE f.id = ?
             GROUP BY f.id"
        ))
        .bind(feed_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(feed_from_row))
    }

    /// Unique lookup on the subscription URL
    pub async fn get_feed_by_url(&self, url: &str) -> Result<Option<Feed>> {
        let row: Option<FeedRow> = sqlx::query_as(&format!(
            "SELECT {FEED_COLUMNS} FROM feeds f
             LEFT JOIN articles a ON f.id = a.feed_id
             WHERE f.url = ?
             GROUP BY f.id"
        ))
        .bind(url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(feed_from_row))
    }

    /// Record a successful fetch: set the title, stamp `last_fetched` and
    /// clear any previous error.
    pub async fn record_fetch_success(&self, feed_id: i64, title: &str) -> Result<()> {
        let now = chrono::Utc::now().timestamp_millis();
        sqlx::query("UPDATE feeds SET title = ?, last_fetched = ?, error = NULL WHERE id = ?")
            .bind(title)
            .bind(now)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Set or clear the error status for a feed
    pub async fn set_feed_error(&self, feed_id: i64, error: Option<&str>) -> Result<()> {
        sqlx::query("UPDATE feeds SET error = ? WHERE id = ?")
            .bind(error)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Move a feed into a folder, or to uncategorized if `folder_id` is `None`.
    pub async fn move_feed_to_folder(&self, feed_id: i64, folder_id: Option<i64>) -> Result<()> {
        sqlx::query("UPDATE feeds SET folder_id = ? WHERE id = ?")
            .bind(folder_id)
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}
