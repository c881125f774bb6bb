//! Turning fetched items into articles and matching them against history.

use sha2::{Digest, Sha256};
use std::collections::{HashMap, HashSet};
use url::Url;

use super::item::FeedItem;
use crate::storage::{ArticleRef, Feed, LinkBackfill, NewArticle};
use crate::util::{snippet, tokenize, Sanitizer};

const UNTITLED: &str = "Untitled";

/// Resolves `candidate` to an absolute URL: as-is when already absolute,
/// otherwise against each base in turn. Empty when nothing works.
pub fn resolve_url(candidate: &str, bases: &[&str]) -> String {
    let trimmed = candidate.trim();
    if trimmed.is_empty() {
        return String::new();
    }

    if let Ok(url) = Url::parse(trimmed) {
        return url.to_string();
    }

    bases
        .iter()
        .filter(|base| !base.trim().is_empty())
        .find_map(|base| Url::parse(base.trim()).and_then(|b| b.join(trimmed)).ok())
        .map(|url| url.to_string())
        .unwrap_or_default()
}

/// The item's canonical link: its link field, or failing that its guid
/// (often a permalink), resolved against the feed's website and then its
/// subscription URL.
pub fn resolve_item_link(item: &FeedItem, feed: &Feed) -> String {
    let bases = [feed.website.as_str(), feed.url.as_str()];

    [item.link.as_deref(), item.guid.as_deref()]
        .into_iter()
        .flatten()
        .map(|candidate| resolve_url(candidate, &bases))
        .find(|resolved| !resolved.is_empty())
        .unwrap_or_default()
}

/// Stable identity of an item within its feed.
///
/// First non-blank of guid, id, comments link, raw link and title. Items
/// with none of those use their resolved link, or a hash of title, source
/// date and feed id. A change in the source's date format therefore mints a
/// new key for such items.
pub fn identity_key(item: &FeedItem, resolved_link: &str, feed_id: i64) -> String {
    let declared = [&item.guid, &item.id, &item.comments, &item.link, &item.title]
        .into_iter()
        .filter_map(|field| field.as_deref())
        .map(str::trim)
        .find(|value| !value.is_empty());

    if let Some(key) = declared {
        return key.to_string();
    }
    if !resolved_link.is_empty() {
        return resolved_link.to_string();
    }

    let title = item.title.as_deref().unwrap_or("").trim();
    let digest = Sha256::digest(format!("{}|{}|{}", title, item.source_date, feed_id).as_bytes());
    format!("{:x}", digest)
}

/// Builds the article a fetched item would be stored as. `read` starts
/// false; the archive partition decides it later.
pub fn build_article(
    feed: &Feed,
    item: &FeedItem,
    sanitizer: &dyn Sanitizer,
    snippet_length: usize,
    received_at: i64,
) -> NewArticle {
    let content = sanitizer.sanitize(&item.content);
    let link = resolve_item_link(item, feed);
    let guid = identity_key(item, &link, feed.id);
    let raw_title = item.title.as_deref().unwrap_or("");

    NewArticle {
        feed_id: feed.id,
        guid,
        title: if raw_title.trim().is_empty() {
            UNTITLED.to_string()
        } else {
            raw_title.to_string()
        },
        link,
        snippet: snippet(&content, snippet_length),
        words: tokenize(&format!("{} {}", raw_title, content)),
        author: item.author.clone(),
        iso_date: item.iso_date.clone(),
        received_at,
        read: false,
        content,
    }
}

/// What the store already knows about a feed, fetched before reconciling.
#[derive(Debug, Clone, Default)]
pub struct ExistingArticles {
    /// Stored articles whose guid matches one of the incoming keys
    pub keyed: Vec<ArticleRef>,
    /// All stored articles of the feed that have no link
    pub missing_link: Vec<ArticleRef>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciliation {
    pub new_articles: Vec<NewArticle>,
    pub link_backfills: Vec<LinkBackfill>,
}

/// Splits processed articles into genuinely new ones and link repairs for
/// stored ones.
///
/// Incoming articles with duplicate keys collapse to the first occurrence.
/// An incoming article used to repair a stored link is not inserted again.
pub fn reconcile(mut processed: Vec<NewArticle>, existing: &ExistingArticles) -> Reconciliation {
    let mut seen = HashSet::new();
    processed.retain(|article| seen.insert(article.guid.clone()));

    let stored_by_guid: HashMap<&str, &ArticleRef> = existing
        .keyed
        .iter()
        .map(|stored| (stored.guid.as_str(), stored))
        .collect();

    // Only articles that carry a link can repair anything
    let mut linked_by_guid: HashMap<&str, &NewArticle> = HashMap::new();
    let mut linked_by_title: HashMap<String, &NewArticle> = HashMap::new();
    for article in processed.iter().filter(|a| !a.link.is_empty()) {
        linked_by_guid.entry(article.guid.as_str()).or_insert(article);
        let title_key = article.title.trim().to_lowercase();
        if !title_key.is_empty() {
            linked_by_title.entry(title_key).or_insert(article);
        }
    }

    let mut consumed: HashSet<&str> = HashSet::new();
    let mut repaired_ids: HashSet<i64> = HashSet::new();
    let mut link_backfills = Vec::new();

    // Pass 1: same key, stored without a link
    for article in processed.iter().filter(|a| !a.link.is_empty()) {
        if let Some(stored) = stored_by_guid.get(article.guid.as_str()) {
            if stored.link.trim().is_empty() {
                link_backfills.push(LinkBackfill::ByGuid {
                    guid: article.guid.clone(),
                    link: article.link.clone(),
                });
                consumed.insert(article.guid.as_str());
                repaired_ids.insert(stored.id);
            }
        }
    }

    // Pass 2: remaining link-less records, matched by key or by title
    for stored in &existing.missing_link {
        if repaired_ids.contains(&stored.id) {
            continue;
        }

        let title_key = stored.title.trim().to_lowercase();
        let matched = linked_by_guid.get(stored.guid.as_str()).or_else(|| {
            if title_key.is_empty() {
                None
            } else {
                linked_by_title.get(&title_key)
            }
        });

        if let Some(article) = matched {
            if article.link != stored.link {
                link_backfills.push(LinkBackfill::ById {
                    id: stored.id,
                    link: article.link.clone(),
                });
                consumed.insert(article.guid.as_str());
                repaired_ids.insert(stored.id);
            }
        }
    }

    let excluded: HashSet<String> = stored_by_guid
        .keys()
        .chain(consumed.iter())
        .map(|guid| guid.to_string())
        .collect();

    let new_articles = processed
        .into_iter()
        .filter(|article| !excluded.contains(&article.guid))
        .collect();

    Reconciliation {
        new_articles,
        link_backfills,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::AllowListSanitizer;
    use pretty_assertions::assert_eq;

    fn feed() -> Feed {
        Feed {
            id: 7,
            url: "https://example.com/feed.xml".into(),
            title: "Example".into(),
            website: "https://example.com/blog/".into(),
            folder_id: None,
            last_fetched: None,
            error: None,
            unread_count: 0,
        }
    }

    fn item() -> FeedItem {
        FeedItem {
            title: None,
            link: None,
            guid: None,
            id: None,
            comments: None,
            content: String::new(),
            author: None,
            iso_date: "2024-01-01T00:00:00Z".into(),
            source_date: "2024-01-01T00:00:00Z".into(),
        }
    }

    fn article(guid: &str, title: &str, link: &str) -> NewArticle {
        NewArticle {
            feed_id: 7,
            guid: guid.into(),
            title: title.into(),
            link: link.into(),
            content: String::new(),
            snippet: String::new(),
            author: None,
            iso_date: "2024-01-01T00:00:00Z".into(),
            received_at: 0,
            read: false,
            words: Vec::new(),
        }
    }

    fn stored(id: i64, guid: &str, title: &str, link: &str) -> ArticleRef {
        ArticleRef {
            id,
            guid: guid.into(),
            title: title.into(),
            link: link.into(),
        }
    }

    fn guids(articles: &[NewArticle]) -> Vec<&str> {
        articles.iter().map(|a| a.guid.as_str()).collect()
    }

    #[test]
    fn test_resolve_url() {
        assert_eq!(resolve_url(" https://a.example/x ", &[]), "https://a.example/x");
        assert_eq!(
            resolve_url("post/1", &["https://example.com/blog/"]),
            "https://example.com/blog/post/1"
        );
        assert_eq!(
            resolve_url("/post/1", &["", "not a url", "https://example.com/feed.xml"]),
            "https://example.com/post/1"
        );
        assert_eq!(resolve_url("post/1", &["not a url"]), "");
        assert_eq!(resolve_url("   ", &["https://example.com/"]), "");
    }

    #[test]
    fn test_resolve_item_link_prefers_link_then_guid() {
        let feed = feed();

        let with_link = FeedItem {
            link: Some("/a".into()),
            guid: Some("https://other.example/g".into()),
            ..item()
        };
        assert_eq!(resolve_item_link(&with_link, &feed), "https://example.com/a");

        let guid_only = FeedItem {
            guid: Some("https://other.example/g".into()),
            ..item()
        };
        assert_eq!(resolve_item_link(&guid_only, &feed), "https://other.example/g");

        assert_eq!(resolve_item_link(&item(), &feed), "");
    }

    #[test]
    fn test_identity_key_priority() {
        let full = FeedItem {
            guid: Some(" g ".into()),
            id: Some("i".into()),
            comments: Some("c".into()),
            link: Some("l".into()),
            title: Some("t".into()),
            ..item()
        };
        assert_eq!(identity_key(&full, "https://x", 7), "g");

        let blank_guid = FeedItem {
            guid: Some("   ".into()),
            comments: Some("c".into()),
            title: Some("t".into()),
            ..item()
        };
        assert_eq!(identity_key(&blank_guid, "", 7), "c");

        let title_only = FeedItem {
            title: Some("Hello".into()),
            ..item()
        };
        assert_eq!(identity_key(&title_only, "", 7), "Hello");
    }

    #[test]
    fn test_identity_key_fallbacks_are_deterministic() {
        assert_eq!(identity_key(&item(), "https://example.com/p", 7), "https://example.com/p");

        let hashed = identity_key(&item(), "", 7);
        assert_eq!(hashed.len(), 64);
        assert_eq!(hashed, identity_key(&item(), "", 7));
        assert_ne!(hashed, identity_key(&item(), "", 8));

        let other_date = FeedItem {
            source_date: "Mon, 01 Jan 2024 00:00:00 GMT".into(),
            ..item()
        };
        assert_ne!(hashed, identity_key(&other_date, "", 7));
    }

    #[test]
    fn test_build_article() {
        let it = FeedItem {
            title: Some("Big News".into()),
            link: Some("/news".into()),
            guid: Some("tag:1".into()),
            content: "<p onclick=\"x\">Rust release</p><script>bad()</script>".into(),
            author: Some("Ann".into()),
            ..item()
        };

        let a = build_article(&feed(), &it, &AllowListSanitizer::default(), 150, 1234);
        assert_eq!(a.guid, "tag:1");
        assert_eq!(a.title, "Big News");
        assert_eq!(a.link, "https://example.com/news");
        assert_eq!(a.content, "<p>Rust release</p>");
        assert_eq!(a.snippet, "Rust release");
        assert_eq!(a.words, vec!["big", "news", "rust", "release"]);
        assert_eq!(a.author.as_deref(), Some("Ann"));
        assert_eq!(a.received_at, 1234);
        assert!(!a.read);
    }

    #[test]
    fn test_build_article_untitled() {
        let a = build_article(&feed(), &item(), &AllowListSanitizer::default(), 150, 0);
        assert_eq!(a.title, "Untitled");
        assert!(a.words.is_empty());
    }

    #[test]
    fn test_reconcile_all_new() {
        let processed = vec![article("a", "A", ""), article("b", "B", "https://x/b")];
        let result = reconcile(processed, &ExistingArticles::default());
        assert_eq!(guids(&result.new_articles), vec!["a", "b"]);
        assert!(result.link_backfills.is_empty());
    }

    #[test]
    fn test_reconcile_skips_known_keys() {
        let existing = ExistingArticles {
            keyed: vec![stored(1, "a", "A", "https://x/a")],
            missing_link: vec![],
        };
        let processed = vec![article("a", "A", "https://x/a"), article("b", "B", "")];

        let result = reconcile(processed, &existing);
        assert_eq!(guids(&result.new_articles), vec!["b"]);
        assert!(result.link_backfills.is_empty());
    }

    #[test]
    fn test_reconcile_collapses_duplicate_keys() {
        let processed = vec![article("a", "first", ""), article("a", "second", "")];
        let result = reconcile(processed, &ExistingArticles::default());
        assert_eq!(result.new_articles.len(), 1);
        assert_eq!(result.new_articles[0].title, "first");
    }

    #[test]
    fn test_reconcile_backfills_by_key() {
        let existing = ExistingArticles {
            keyed: vec![stored(1, "a", "A", "")],
            missing_link: vec![stored(1, "a", "A", "")],
        };
        let processed = vec![article("a", "A", "https://x/a")];

        let result = reconcile(processed, &existing);
        assert!(result.new_articles.is_empty());
        assert_eq!(
            result.link_backfills,
            vec![LinkBackfill::ByGuid {
                guid: "a".into(),
                link: "https://x/a".into()
            }]
        );
    }

    #[test]
    fn test_reconcile_backfills_by_title_when_key_changed() {
        // Stored under its title back when the item had no guid
        let existing = ExistingArticles {
            keyed: vec![],
            missing_link: vec![stored(5, "Hello World", "Hello World", "")],
        };
        let processed = vec![article("tag:new", "  hello world ", "https://x/hello")];

        let result = reconcile(processed, &existing);
        assert!(result.new_articles.is_empty());
        assert_eq!(
            result.link_backfills,
            vec![LinkBackfill::ById {
                id: 5,
                link: "https://x/hello".into()
            }]
        );
    }

    #[test]
    fn test_reconcile_linkless_incoming_does_not_backfill() {
        let existing = ExistingArticles {
            keyed: vec![stored(1, "a", "A", "")],
            missing_link: vec![stored(1, "a", "A", "")],
        };
        let result = reconcile(vec![article("a", "A", "")], &existing);
        assert!(result.new_articles.is_empty());
        assert!(result.link_backfills.is_empty());
    }
}
