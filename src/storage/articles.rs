use anyhow::Result;
use sqlx::QueryBuilder;

use super::schema::Database;
use super::types::{Article, ArticleDbRow, ArticleRef, InsertCounts, LinkBackfill, NewArticle};
use crate::util::tokenize;

// ============================================================================
// Query Limit Constants
// ============================================================================

/// Maximum number of articles to return from any single query (OOM protection)
const MAX_ARTICLES: i64 = 2000;

/// Bound parameters per IN (...) lookup, well under SQLite's variable limit
const LOOKUP_CHUNK: usize = 500;

/// 11 bound columns * 50 rows = 550 parameters per insert statement
const INSERT_CHUNK: usize = 50;

const ARTICLE_COLUMNS: &str = "id, feed_id, guid, title, link, content, snippet, author, \
                               iso_date, received_at, read, starred, words";

impl Database {
    // ========================================================================
    // Sync Lookups
    // ========================================================================

    /// Batched identity lookup: the stored articles of `feed_id` whose guid is
    /// one of `guids`. Uses the `(feed_id, guid)` unique index, never scans
    /// the feed's full history.
    pub async fn existing_articles_for_guids(
        &self,
        feed_id: i64,
        guids: &[String],
    ) -> Result<Vec<ArticleRef>> {
        let mut found = Vec::new();

        for chunk in guids.chunks(LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("SELECT id, guid, title, link FROM articles WHERE feed_id = ");
            builder.push_bind(feed_id);
            builder.push(" AND guid IN (");

            let mut separated = builder.separated(", ");
            for guid in chunk {
                separated.push_bind(guid);
            }
            separated.push_unseparated(")");

            let rows: Vec<ArticleRef> = builder.build_query_as().fetch_all(&self.pool).await?;
            found.extend(rows);
        }

        Ok(found)
    }

    /// Stored articles of a feed that still have no usable link.
    pub async fn articles_missing_link(&self, feed_id: i64) -> Result<Vec<ArticleRef>> {
        let rows = sqlx::query_as::<_, ArticleRef>(
            "SELECT id, guid, title, link FROM articles WHERE feed_id = ? AND TRIM(link) = ''",
        )
        .bind(feed_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows)
    }

    /// Persist one feed's sync result atomically: link backfills first, then
    /// the new articles. Returns the rows actually inserted, by read state.
    ///
    /// Inserts use `INSERT OR IGNORE` on the `(feed_id, guid)` key, so a
    /// retried sync after a partial failure never duplicates articles.
    pub async fn apply_sync(
        &self,
        feed_id: i64,
        backfills: &[LinkBackfill],
        articles: &[NewArticle],
    ) -> Result<InsertCounts> {
        if backfills.is_empty() && articles.is_empty() {
            return Ok(InsertCounts::default());
        }

        let mut tx = self.pool.begin().await?;

        for backfill in backfills {
            match backfill {
                LinkBackfill::ByGuid { guid, link } => {
                    sqlx::query("UPDATE articles SET link = ? WHERE feed_id = ? AND guid = ?")
                        .bind(link)
                        .bind(feed_id)
                        .bind(guid)
                        .execute(&mut *tx)
                        .await?;
                }
                LinkBackfill::ById { id, link } => {
                    sqlx::query("UPDATE articles SET link = ? WHERE id = ? AND feed_id = ?")
                        .bind(link)
                        .bind(id)
                        .bind(feed_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }
        }

        let (archived, unread): (Vec<&NewArticle>, Vec<&NewArticle>) =
            articles.iter().partition(|a| a.read);
        let mut counts = InsertCounts::default();
        for (group, count) in [(unread, &mut counts.unread), (archived, &mut counts.archived)] {
            for chunk in group.chunks(INSERT_CHUNK) {
                let mut builder: QueryBuilder<sqlx::Sqlite> = QueryBuilder::new(
                    "INSERT OR IGNORE INTO articles \
                     (feed_id, guid, title, link, content, snippet, author, iso_date, received_at, read, words) ",
                );

                builder.push_values(chunk, |mut b, article| {
                    b.push_bind(feed_id)
                        .push_bind(&article.guid)
                        .push_bind(&article.title)
                        .push_bind(&article.link)
                        .push_bind(&article.content)
                        .push_bind(&article.snippet)
                        .push_bind(&article.author)
                        .push_bind(&article.iso_date)
                        .push_bind(article.received_at)
                        .push_bind(article.read)
                        .push_bind(article.words.join(" "));
                });

                let result = builder.build().execute(&mut *tx).await?;
                *count += result.rows_affected() as usize;
            }
        }

        tx.commit().await?;
        Ok(counts)
    }

    // ========================================================================
    // Article Queries
    // ========================================================================

    /// Get articles for a specific feed, newest first. Capped at
    /// [`MAX_ARTICLES`].
    pub async fn get_articles_for_feed(
        &self,
        feed_id: i64,
        limit: Option<i64>,
    ) -> Result<Vec<Article>> {
        let limit = limit.unwrap_or(500).min(MAX_ARTICLES);

        let rows = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles
             WHERE feed_id = ?
             ORDER BY iso_date DESC, received_at DESC
             LIMIT ?"
        ))
        .bind(feed_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    pub async fn get_article_by_id(&self, article_id: i64) -> Result<Option<Article>> {
        let row = sqlx::query_as::<_, ArticleDbRow>(&format!(
            "SELECT {ARTICLE_COLUMNS} FROM articles WHERE id = ?"
        ))
        .bind(article_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ArticleDbRow::into_article))
    }

    /// Token search over the indexed words of every article.
    ///
    /// The query goes through the same tokenizer as article text; an article
    /// matches when it carries every query token.
    pub async fn search_articles(&self, query: &str) -> Result<Vec<Article>> {
        let tokens = tokenize(query);
        if tokens.is_empty() {
            return Ok(Vec::new());
        }

        let mut builder: QueryBuilder<sqlx::Sqlite> =
            QueryBuilder::new(format!("SELECT {ARTICLE_COLUMNS} FROM articles WHERE 1 = 1"));
        for token in &tokens {
            builder.push(" AND (' ' || words || ' ') LIKE ");
            builder.push_bind(format!("% {} %", token));
        }
        builder.push(" ORDER BY iso_date DESC LIMIT ");
        builder.push_bind(MAX_ARTICLES);

        let rows: Vec<ArticleDbRow> = builder.build_query_as().fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(ArticleDbRow::into_article).collect())
    }

    // ========================================================================
    // Article Mutations
    // ========================================================================

    /// Set the read flag on a batch of articles, returns how many changed
    pub async fn set_articles_read(&self, ids: &[i64], read: bool) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        let mut changed = 0;
        for chunk in ids.chunks(LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<sqlx::Sqlite> =
                QueryBuilder::new("UPDATE articles SET read = ");
            builder.push_bind(read);
            builder.push(" WHERE read != ");
            builder.push_bind(read);
            builder.push(" AND id IN (");
            let mut separated = builder.separated(", ");
            for id in chunk {
                separated.push_bind(*id);
            }
            separated.push_unseparated(")");

            changed += builder.build().execute(&self.pool).await?.rows_affected();
        }
        Ok(changed)
    }

    /// Mark all articles as read for a specific feed, returns count of articles marked
    pub async fn mark_all_read_for_feed(&self, feed_id: i64) -> Result<u64> {
        let result = sqlx::query("UPDATE articles SET read = 1 WHERE feed_id = ? AND read = 0")
            .bind(feed_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Mark all articles as read across all feeds
    pub async fn mark_all_read(&self) -> Result<u64> {
        let result = sqlx::query("UPDATE articles SET read = 1 WHERE read = 0")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    /// Atomically toggle starred status, returning the new value
    pub async fn toggle_article_starred(&self, article_id: i64) -> Result<bool> {
        let result: (bool,) = sqlx::query_as(
            r#"UPDATE articles SET starred = NOT starred WHERE id = ? RETURNING starred"#,
        )
        .bind(article_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(result.0)
    }
}
