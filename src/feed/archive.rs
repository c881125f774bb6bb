use chrono::DateTime;

use crate::storage::NewArticle;

/// Splits a sync's new articles into an unread head and an archived tail.
///
/// Newest first by publication date; ties keep their incoming order and
/// unreadable dates sort last. The first `unread_limit` stay unread, the
/// rest are stored already read.
pub fn partition(mut articles: Vec<NewArticle>, unread_limit: usize) -> (Vec<NewArticle>, Vec<NewArticle>) {
    // `sort_by_key` is stable; `None` orders before any `Some`
    articles.sort_by_key(|article| std::cmp::Reverse(published_millis(&article.iso_date)));

    let split = unread_limit.min(articles.len());
    let mut archived = articles.split_off(split);
    let mut unread = articles;

    for article in &mut unread {
        article.read = false;
    }
    for article in &mut archived {
        article.read = true;
    }

    (unread, archived)
}

fn published_millis(raw: &str) -> Option<i64> {
    let raw = raw.trim();
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| DateTime::parse_from_rfc2822(raw))
        .ok()
        .map(|d| d.timestamp_millis())
}
