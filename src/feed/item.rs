//! Relay payload types and item normalization.
//!
//! The relay forwards whatever its XML-to-JSON step produced, so most fields
//! can arrive as a string, a number, an object or an array depending on the
//! source feed. All shape probing happens here; the rest of the crate only
//! sees [`FeedItem`].

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

/// Feed document as returned by the relay.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(from = "WireFeed")]
pub struct ProxyFeed {
    pub title: Option<String>,
    /// Website of the feed, first link when several are given
    pub link: Option<String>,
    pub description: Option<String>,
    pub items: Vec<RawItem>,
}

#[derive(Deserialize)]
struct WireFeed {
    #[serde(default)]
    title: Value,
    #[serde(default)]
    link: Value,
    #[serde(default)]
    description: Value,
    #[serde(default)]
    items: Value,
}

impl From<WireFeed> for ProxyFeed {
    fn from(wire: WireFeed) -> Self {
        // Anything other than an array of objects is treated as "no items"
        let items = match wire.items {
            Value::Array(values) => values
                .into_iter()
                .filter(Value::is_object)
                .filter_map(|v| serde_json::from_value(v).ok())
                .collect(),
            _ => Vec::new(),
        };

        ProxyFeed {
            title: text(&wire.title),
            link: link_text(&wire.link),
            description: text(&wire.description),
            items,
        }
    }
}

/// One item exactly as the relay sent it.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RawItem {
    pub title: Option<Value>,
    pub link: Option<Value>,
    pub guid: Option<Value>,
    pub id: Option<Value>,
    pub comments: Option<Value>,
    #[serde(rename = "pubDate")]
    pub pub_date: Option<Value>,
    #[serde(rename = "isoDate")]
    pub iso_date: Option<Value>,
    #[serde(rename = "content:encoded")]
    pub content_encoded: Option<Value>,
    pub content: Option<Value>,
    pub summary: Option<Value>,
    #[serde(rename = "dc:creator")]
    pub dc_creator: Option<Value>,
    pub creator: Option<Value>,
    pub author: Option<Value>,
}

/// An item with every field reduced to plain text.
///
/// Optional fields are `None` when absent, blank or of an unusable shape.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedItem {
    pub title: Option<String>,
    /// Raw link text, not yet resolved against any base
    pub link: Option<String>,
    pub guid: Option<String>,
    pub id: Option<String>,
    pub comments: Option<String>,
    /// Unsanitized HTML body
    pub content: String,
    pub author: Option<String>,
    /// Publication date, RFC 3339 when it could be read, else the fetch time
    pub iso_date: String,
    /// Date exactly as the source gave it; empty when it gave none
    pub source_date: String,
}

impl FeedItem {
    /// Normalizes a relay item. `now` stands in for a missing or unreadable
    /// publication date.
    pub fn from_raw(raw: &RawItem, now: DateTime<Utc>) -> Self {
        let iso_date_raw = raw.iso_date.as_ref().and_then(text);
        let pub_date_raw = raw.pub_date.as_ref().and_then(text);

        let iso_date = iso_date_raw
            .clone()
            .or_else(|| pub_date_raw.as_deref().and_then(parse_date))
            .unwrap_or_else(|| now.to_rfc3339());
        let source_date = iso_date_raw.or(pub_date_raw).unwrap_or_default();

        FeedItem {
            title: raw.title.as_ref().and_then(text),
            link: raw.link.as_ref().and_then(link_text),
            guid: raw.guid.as_ref().and_then(text),
            id: raw.id.as_ref().and_then(text),
            comments: raw.comments.as_ref().and_then(text),
            content: first_text(&[&raw.content_encoded, &raw.content, &raw.summary])
                .unwrap_or_default(),
            author: first_text(&[&raw.creator, &raw.dc_creator, &raw.author]),
            iso_date,
            source_date,
        }
    }
}

/// Text of a scalar-ish JSON value. Strings and numbers are used directly;
/// XML-to-JSON wrappers (`{"_": ..}`, `{"#text": ..}`, `{"name": ..}`) are
/// unwrapped. Blank strings count as absent.
fn text(value: &Value) -> Option<String> {
    let s = match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Object(map) => return ["_", "#text", "name"].iter().find_map(|k| map.get(*k).and_then(text)),
        _ => return None,
    };
    (!s.trim().is_empty()).then_some(s)
}

/// Link fields: a string, an object with `href`, or an array of either
/// (first element wins).
fn link_text(value: &Value) -> Option<String> {
    match value {
        Value::Array(values) => values.first().and_then(link_text),
        Value::Object(map) => map.get("href").and_then(text),
        other => text(other),
    }
}

fn first_text(candidates: &[&Option<Value>]) -> Option<String> {
    candidates
        .iter()
        .find_map(|candidate| candidate.as_ref().and_then(text))
}

/// RSS dates are RFC 2822; some feeds use RFC 3339 in `pubDate` anyway.
fn parse_date(raw: &str) -> Option<String> {
    let raw = raw.trim();
    DateTime::parse_from_rfc2822(raw)
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|d| d.with_timezone(&Utc).to_rfc3339())
}
