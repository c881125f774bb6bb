use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Database-specific errors with user-friendly messages
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Another process holds the database lock
    #[error("Another vesper process appears to be using the database. Please close it and try again.")]
    InstanceLocked,

    /// Migration failed
    #[error("Database migration failed: {0}")]
    Migration(String),

    /// Generic database error
    #[error("Database error: {0}")]
    Other(#[from] sqlx::Error),
}

impl DatabaseError {
    /// Check if a sqlx error indicates database locking
    pub(crate) fn from_sqlx(err: sqlx::Error) -> Self {
        if is_lock_message(&err.to_string()) {
            return DatabaseError::InstanceLocked;
        }
        DatabaseError::Other(err)
    }
}

/// SQLITE_BUSY (5), SQLITE_LOCKED (6) and SQLITE_CANTOPEN (14) all surface as
/// one of these messages.
pub(crate) fn is_lock_message(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("database is locked")
        || message.contains("database table is locked")
        || message.contains("sqlite_busy")
        || message.contains("sqlite_locked")
        || message.contains("unable to open database file")
}

// ============================================================================
// Helper Types
// ============================================================================

/// Row type for feed query with unread count
pub(crate) type FeedRow = (
    i64,
    String,
    String,
    String,
    Option<i64>,
    Option<i64>,
    Option<String>,
    i64, // unread_count
);

pub(crate) fn feed_from_row(row: FeedRow) -> Feed {
    let (id, url, title, website, folder_id, last_fetched, error, unread_count) = row;
    Feed {
        id,
        url,
        title,
        website,
        folder_id,
        last_fetched,
        error,
        unread_count,
    }
}

/// Article about to be inserted by a sync run.
///
/// `read` is decided by the auto-archive partition before insertion and is
/// never flipped afterwards by the sync engine.
#[derive(Debug, Clone, PartialEq)]
pub struct NewArticle {
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub snippet: String,
    pub author: Option<String>,
    /// Publication date as supplied by the source (RFC 3339 when known)
    pub iso_date: String,
    /// Local receipt time, unix milliseconds
    pub received_at: i64,
    pub read: bool,
    pub words: Vec<String>,
}

/// Minimal projection of a stored article used for identity and link checks.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ArticleRef {
    pub id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
}

/// A link repair applied to an article that was stored without one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkBackfill {
    /// Identity key matched an incoming item exactly
    ByGuid { guid: String, link: String },
    /// Recovered through a title match after the identity key changed
    ById { id: i64, link: String },
}

/// Rows written by one `apply_sync`, split by read state. Keys that were
/// already stored are not counted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertCounts {
    pub unread: usize,
    pub archived: usize,
}

impl InsertCounts {
    pub fn total(&self) -> usize {
        self.unread + self.archived
    }
}

/// Internal row type for Article queries (used by sqlx FromRow)
#[derive(Debug, sqlx::FromRow)]
pub(crate) struct ArticleDbRow {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub snippet: String,
    pub author: Option<String>,
    pub iso_date: String,
    pub received_at: i64,
    pub read: bool,
    pub starred: bool,
    pub words: String,
}

impl ArticleDbRow {
    pub(crate) fn into_article(self) -> Article {
        Article {
            id: self.id,
            feed_id: self.feed_id,
            guid: self.guid,
            title: self.title,
            link: self.link,
            content: self.content,
            snippet: self.snippet,
            author: self.author,
            iso_date: self.iso_date,
            received_at: self.received_at,
            read: self.read,
            starred: self.starred,
            words: self.words.split_whitespace().map(str::to_owned).collect(),
        }
    }
}

// ============================================================================
// Data Structures
// ============================================================================

/// Feed data from database
#[derive(Debug, Clone, PartialEq)]
pub struct Feed {
    pub id: i64,
    /// Subscription URL, unique across feeds
    pub url: String,
    pub title: String,
    /// Website the feed belongs to, used as the first base for relative links
    pub website: String,
    pub folder_id: Option<i64>,
    /// Unix milliseconds of the last successful fetch
    pub last_fetched: Option<i64>,
    /// Last fetch error, cleared on success
    pub error: Option<String>,
    pub unread_count: i64,
}

/// Article data from database
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: i64,
    pub feed_id: i64,
    pub guid: String,
    pub title: String,
    pub link: String,
    pub content: String,
    pub snippet: String,
    pub author: Option<String>,
    pub iso_date: String,
    pub received_at: i64,
    pub read: bool,
    pub starred: bool,
    pub words: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Folder {
    pub id: i64,
    pub name: String,
    pub collapsed: bool,
}
