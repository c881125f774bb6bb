//! Feed URL canonicalization and fallback candidates.

use url::Url;

/// Hosts that serve feeds behind a redirector and need query/path rewrites.
const REDIRECTOR_HOSTS: &[&str] = &["feeds.feedburner.com", "feedburner.google.com"];

/// Canonical form of a feed URL, used as the dedup and backoff key.
///
/// Never fails: input that does not parse as an absolute URL comes back
/// trimmed but otherwise untouched. Applying it twice gives the same result.
pub fn normalize(url: &str) -> String {
    let trimmed = url.trim();
    let Ok(mut parsed) = Url::parse(trimmed) else {
        return trimmed.to_string();
    };

    let is_redirector = parsed
        .host_str()
        .is_some_and(|host| REDIRECTOR_HOSTS.contains(&host));
    if is_redirector {
        rewrite_redirector(&mut parsed);
    }

    parsed.to_string()
}

fn rewrite_redirector(url: &mut Url) {
    let mut pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

    // `format` keeps its position, duplicates collapse into the first one
    match pairs.iter().position(|(k, _)| k == "format") {
        Some(first) => {
            pairs[first].1 = "xml".to_string();
            let mut index = 0;
            pairs.retain(|(k, _)| {
                let keep = k != "format" || index == first;
                index += 1;
                keep
            });
        }
        None => pairs.push(("format".to_string(), "xml".to_string())),
    }
    if !pairs.iter().any(|(k, _)| k == "fmt") {
        pairs.push(("fmt".to_string(), "xml".to_string()));
    }

    url.query_pairs_mut().clear().extend_pairs(pairs);

    if matches!(url.path(), "" | "/") {
        let reversed = url
            .host_str()
            .map(|host| host.rsplit('.').collect::<Vec<_>>().join("/"))
            .unwrap_or_default();
        url.set_path(&format!("/feeds/{reversed}"));
    }
}

/// Ordered candidate URLs to try for a feed: the canonical form, then the
/// form without trailing slashes, then the other scheme (http/https).
///
/// Order is retry precedence. Duplicates and empty strings are dropped.
pub fn build_variants(url: &str) -> Vec<String> {
    let normalized = normalize(url);
    let mut variants: Vec<String> = Vec::with_capacity(3);

    let mut push = |candidate: String| {
        if !candidate.is_empty() && !variants.contains(&candidate) {
            variants.push(candidate);
        }
    };

    push(normalized.clone());
    push(normalized.trim_end_matches('/').to_string());
    if let Some(flipped) = flip_scheme(&normalized) {
        push(flipped);
    }

    variants
}

fn flip_scheme(url: &str) -> Option<String> {
    let mut parsed = Url::parse(url).ok()?;
    let target = if parsed.scheme() == "https" {
        "http"
    } else {
        "https"
    };
    parsed.set_scheme(target).ok()?;
    Some(parsed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn test_normalize_trims_and_canonicalizes() {
        assert_eq!(normalize("  https://Example.COM  "), "https://example.com/");
        assert_eq!(
            normalize("https://example.com/feed.xml"),
            "https://example.com/feed.xml"
        );
    }

    #[test]
    fn test_normalize_unparseable_returns_trimmed_input() {
        assert_eq!(normalize("  not a url "), "not a url");
        assert_eq!(normalize("/relative/feed"), "/relative/feed");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_normalize_feedburner_root() {
        assert_eq!(
            normalize("http://feeds.feedburner.com"),
            "http://feeds.feedburner.com/feeds/com/feedburner/feeds?format=xml&fmt=xml"
        );
    }

    #[test]
    fn test_normalize_feedburner_keeps_path_and_existing_fmt() {
        assert_eq!(
            normalize("https://feeds.feedburner.com/Example?fmt=rss&format=atom&format=x"),
            "https://feeds.feedburner.com/Example?fmt=rss&format=xml"
        );
    }

    #[test]
    fn test_normalize_leaves_other_hosts_query_alone() {
        assert_eq!(
            normalize("https://example.com/rss?format=json"),
            "https://example.com/rss?format=json"
        );
    }

    #[test]
    fn test_build_variants_order() {
        assert_eq!(
            build_variants("https://example.com/feed/"),
            vec![
                "https://example.com/feed/",
                "https://example.com/feed",
                "http://example.com/feed/",
            ]
        );
    }

    #[test]
    fn test_build_variants_collapses_duplicates() {
        assert_eq!(
            build_variants("http://example.com/rss"),
            vec!["http://example.com/rss", "https://example.com/rss"]
        );
    }

    #[test]
    fn test_build_variants_unparseable_has_no_flip() {
        assert_eq!(build_variants("example.com/rss/"), vec!["example.com/rss/", "example.com/rss"]);
        assert!(build_variants("   ").is_empty());
    }

    fn feed_url() -> impl Strategy<Value = String> {
        (
            prop::sample::select(vec!["http", "https"]),
            prop_oneof![
                "[a-z]{1,8}\\.(com|org|net)",
                Just("feeds.feedburner.com".to_string()),
                Just("feedburner.google.com".to_string()),
            ],
            "(/[a-zA-Z0-9_-]{1,8}){0,3}/?",
            prop::option::of("[a-z]{1,5}=[a-zA-Z0-9]{0,5}(&[a-z]{1,5}=[a-z0-9]{0,5}){0,2}"),
            " {0,2}",
        )
            .prop_map(|(scheme, host, path, query, pad)| {
                let query = query.map(|q| format!("?{q}")).unwrap_or_default();
                format!("{pad}{scheme}://{host}{path}{query}{pad}")
            })
    }

    proptest! {
        #[test]
        fn prop_normalize_is_idempotent(url in feed_url()) {
            let once = normalize(&url);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn prop_variants_start_with_normalized(url in feed_url()) {
            let variants = build_variants(&url);
            prop_assert_eq!(&variants[0], &normalize(&url));
            prop_assert!(variants.len() <= 3);
        }
    }
}
