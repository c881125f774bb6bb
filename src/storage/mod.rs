//! SQLite persistence for feeds, articles, folders and settings.
//!
//! `Database` is split across files by table; each file adds an `impl`
//! block. The sync engine only needs the batched identity lookup, the
//! missing-link query and the transactional `apply_sync`.

mod articles;
mod feeds;
mod folders;
mod schema;
mod settings;
mod types;

pub use schema::Database;
pub use types::{
    Article, ArticleRef, DatabaseError, Feed, Folder, InsertCounts, LinkBackfill, NewArticle,
};
