use ammonia::{Builder, UrlRelative};
use std::collections::{HashMap, HashSet};

/// HTML sanitizer applied to article content before it is stored.
///
/// Implementations must be idempotent and must never fail: malformed input is
/// escaped or stripped, not rejected.
pub trait Sanitizer: Send + Sync {
    fn sanitize(&self, html: &str) -> String;
}

const ALLOWED_TAGS: &[&str] = &[
    "b", "i", "em", "strong", "a", "p", "br", "ul", "ol", "li", "blockquote", "img", "h1", "h2",
    "h3", "h4", "code", "pre",
];

const ALLOWED_ATTRIBUTES: &[&str] = &["href", "src", "alt", "title", "class", "target"];

/// Schemes allowed in `href`/`src`. Relative URLs pass through untouched.
const ALLOWED_URL_SCHEMES: &[&str] = &["http", "https", "mailto"];

/// Elements whose content is dropped along with the markup
const DROP_CONTENT_TAGS: &[&str] = &["script", "style", "iframe", "object", "noscript", "template"];

/// Keeps an allow-listed set of tags and attributes; everything else is
/// removed.
///
/// Parsing and serialization go through html5ever (via `ammonia`), so
/// character references are decoded before URL schemes are checked and the
/// output is always well-formed.
#[derive(Debug)]
pub struct AllowListSanitizer {
    builder: Builder<'static>,
}

impl AllowListSanitizer {
    pub fn new(tags: &[&'static str], attributes: &[&'static str]) -> Self {
        let mut builder = Builder::default();
        builder
            .tags(tags.iter().copied().collect::<HashSet<_>>())
            .clean_content_tags(DROP_CONTENT_TAGS.iter().copied().collect::<HashSet<_>>())
            .tag_attributes(HashMap::new())
            .generic_attributes(attributes.iter().copied().collect::<HashSet<_>>())
            .url_schemes(ALLOWED_URL_SCHEMES.iter().copied().collect::<HashSet<_>>())
            .url_relative(UrlRelative::PassThrough)
            .link_rel(None)
            .strip_comments(true);
        Self { builder }
    }
}

impl Default for AllowListSanitizer {
    fn default() -> Self {
        Self::new(ALLOWED_TAGS, ALLOWED_ATTRIBUTES)
    }
}

impl Sanitizer for AllowListSanitizer {
    fn sanitize(&self, html: &str) -> String {
        self.builder.clean(html).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn clean(html: &str) -> String {
        AllowListSanitizer::default().sanitize(html)
    }

    #[test]
    fn test_keeps_allowed_markup() {
        let html = r#"<p class="lead">Hello <a href="https://example.com" target="_blank">link</a></p>"#;
        assert_eq!(clean(html), html);
    }

    #[test]
    fn test_keeps_relative_and_mailto_links() {
        assert_eq!(
            clean(r#"<a href="/posts/1">a</a><a href="mailto:me@example.com">b</a>"#),
            r#"<a href="/posts/1">a</a><a href="mailto:me@example.com">b</a>"#
        );
    }

    #[test]
    fn test_drops_script_with_content() {
        assert_eq!(
            clean("<p>a</p><script>alert('x')</script><p>b</p>"),
            "<p>a</p><p>b</p>"
        );
        assert_eq!(clean("<p>a</p><SCRIPT src=x>"), "<p>a</p>");
    }

    #[test]
    fn test_drops_disallowed_tags_but_keeps_text() {
        assert_eq!(clean("<div><span>text</span></div>"), "text");
    }

    #[test]
    fn test_drops_event_handlers_and_script_urls() {
        assert_eq!(
            clean(r#"<a href="javascript:alert(1)" onclick="x()">go</a>"#),
            "<a>go</a>"
        );
        assert_eq!(
            clean(r#"<img src="jav&#x09;ascript:alert(1)" alt="pic">"#),
            r#"<img alt="pic">"#
        );
    }

    #[test]
    fn test_drops_entity_encoded_script_url() {
        let out = clean(r#"<a href="&#106;avascript:alert(1)">x</a>"#);
        assert_eq!(out, "<a>x</a>");
        assert!(!out.contains("avascript:"));
    }

    #[test]
    fn test_drops_data_and_other_scheme_urls() {
        let out = clean(
            r#"<a href="data:text/html;base64,PHNjcmlwdD4=">y</a><img src="vbscript:x" alt="v">"#,
        );
        assert_eq!(out, r#"<a>y</a><img alt="v">"#);
        assert!(!out.contains("data:"));
    }

    #[test]
    fn test_normalizes_tag_shape() {
        assert_eq!(clean("<BR/>"), "<br>");
        assert_eq!(clean("<IMG SRC='a.png' ALT=x>"), r#"<img src="a.png" alt="x">"#);
        assert_eq!(clean(r#"<p title='say "hi"'>x</p>"#), r#"<p title="say &quot;hi&quot;">x</p>"#);
    }

    #[test]
    fn test_escapes_stray_angle_brackets() {
        assert_eq!(clean("1 < 2 > 0"), "1 &lt; 2 &gt; 0");
    }

    #[test]
    fn test_removes_comments_and_declarations() {
        assert_eq!(clean("<!doctype html><!-- hidden -->visible"), "visible");
    }

    #[test]
    fn test_sanitize_is_idempotent_on_messy_input() {
        let messy = r#"<<b>b> <p title="x>y" onclick=evil>t</P><img src=foo/><br/ ><a href='q"r'>"#;
        let once = clean(messy);
        assert_eq!(clean(&once), once);
    }

    fn fragment() -> impl Strategy<Value = &'static str> {
        prop::sample::select(vec![
            "<p>", "</p>", "<b>", "</b>", "<em>", "</em>", "<ul>", "<li>", "</ul>", "<div>",
            "</div>", "<a href='/x'>", "</a>", "<img src=y>", "<br/>", "<script>", "</script>",
            "<!-- c -->", "text", " ", "<", ">", "&", "\"", "'",
        ])
    }

    proptest! {
        #[test]
        fn prop_sanitize_is_idempotent(parts in prop::collection::vec(fragment(), 0..16)) {
            let html = parts.concat();
            let once = clean(&html);
            prop_assert_eq!(clean(&once), once);
        }
    }
}
