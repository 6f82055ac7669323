//! Feed item normalization.
//!
//! Turns the item nodes of one feed document into [`FeedItem`]s. Nothing in
//! here fails because of a single item: a node that cannot be displayed or
//! addressed is dropped, missing fields get placeholders, and odd shapes are
//! logged and degraded. Only a document that cannot be read at all is an
//! error, and that error stays scoped to its channel.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;
use thiserror::Error;

use super::shape::{all_texts, as_list, attr, describe, first_text, is_unexpected_shape};
use super::xml::{parse_tree, XmlError};
use crate::storage::{Channel, FeedItem};

/// Title used when an item has an identifier but no title.
pub const NO_TITLE: &str = "No title";
/// Body used when an item has no usable content or description.
pub const NO_BODY: &str = "No HTML body text.";

/// First `<img ... src="...">` in an HTML fragment.
static IMG_SRC_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<img[^>]+src\s*=\s*['"]([^'"]+)['"]"#).expect("Invalid img src pattern")
});

/// Errors that make a whole document unusable.
#[derive(Debug, Error)]
pub enum DocumentError {
    #[error(transparent)]
    Xml(#[from] XmlError),

    #[error("Atom parse error: {0}")]
    Atom(String),

    #[error("Unrecognized feed format: root element <{0}>")]
    UnrecognizedFormat(String),
}

/// Outcome of normalizing one document.
#[derive(Debug, Default)]
pub struct ParsedDocument {
    /// Items in document order.
    pub items: Vec<FeedItem>,
    /// Item nodes dropped because they had neither a title nor an identifier.
    pub dropped: usize,
}

/// Fields pulled out of a source item before the shared rules are applied.
#[derive(Debug, Default)]
struct RawItem {
    title: Option<String>,
    identifier: Option<String>,
    link: Option<String>,
    body: Option<String>,
    tags: Vec<String>,
    published: Option<DateTime<Utc>>,
    image: Option<String>,
}

/// Normalize every item of a feed document for `channel`.
///
/// RSS 2.0 (`rss/channel/item`) and RSS 1.0 (`RDF/item`) go through the
/// tree normalizer. Atom (`feed/entry`) is read with `feed-rs` and then
/// passes through the same identifier, tag, body and cover rules.
///
/// An RSS document without a `<channel>` yields no items rather than an
/// error.
pub fn normalize_document(content: &str, channel: &Channel) -> Result<ParsedDocument, DocumentError> {
    let tree = parse_tree(content)?;

    let nodes = if let Some(rss) = tree.get("rss") {
        let Some(channel_node) = as_list(rss.get("channel")).into_iter().next() else {
            tracing::warn!(channel = %channel.name, "RSS document has no <channel> element");
            return Ok(ParsedDocument::default());
        };
        as_list(channel_node.get("item"))
    } else if let Some(rdf) = tree.get("RDF") {
        as_list(rdf.get("item"))
    } else if tree.get("feed").is_some() {
        return normalize_atom(content.as_bytes(), channel);
    } else {
        let root = tree
            .as_object()
            .and_then(|m| m.keys().next().cloned())
            .unwrap_or_default();
        return Err(DocumentError::UnrecognizedFormat(root));
    };

    let mut parsed = ParsedDocument::default();
    for (index, node) in nodes.into_iter().enumerate() {
        match normalize_item(node, channel, index) {
            Some(item) => parsed.items.push(item),
            None => parsed.dropped += 1,
        }
    }

    if parsed.dropped > 0 {
        tracing::debug!(
            channel = %channel.name,
            dropped = parsed.dropped,
            "Dropped items with neither title nor identifier"
        );
    }

    Ok(parsed)
}

/// Normalize a single RSS item node.
///
/// `index` is the node's position among all item nodes of its document and
/// feeds the synthetic identifier when the item has neither `guid` nor
/// `link`. Returns `None` for an item with neither a title nor an identifier.
pub fn normalize_item(node: &Value, channel: &Channel, index: usize) -> Option<FeedItem> {
    let title = first_text(node, "title").map(str::to_owned);

    let raw = RawItem {
        identifier: first_text(node, "guid")
            .or_else(|| first_text(node, "link"))
            .map(str::to_owned),
        link: item_link(node),
        body: item_body(node, channel, title.as_deref()),
        tags: item_tags(node, channel),
        published: ["pubDate", "date", "published", "updated"]
            .iter()
            .find_map(|key| first_text(node, key))
            .and_then(parse_date),
        image: explicit_image(node),
        title,
    };

    finish(raw, channel, index)
}

/// Apply the rules shared by every source format.
fn finish(raw: RawItem, channel: &Channel, index: usize) -> Option<FeedItem> {
    if raw.title.is_none() && raw.identifier.is_none() {
        return None;
    }

    let id = raw
        .identifier
        .unwrap_or_else(|| synthetic_id(&channel.name, index));

    let tags = if raw.tags.is_empty() {
        None
    } else {
        Some(raw.tags.join(", "))
    };

    let cover_image = raw
        .image
        .or_else(|| raw.body.as_deref().and_then(first_img_src));

    Some(FeedItem {
        id,
        channel: channel.clone(),
        title: raw.title.unwrap_or_else(|| NO_TITLE.to_owned()),
        link: raw.link,
        published_at: raw.published,
        tags,
        body: raw.body.unwrap_or_else(|| NO_BODY.to_owned()),
        cover_image,
        bookmarked: false,
    })
}

/// Identifier for an item that carries neither `guid` nor `link`.
///
/// Only stable while the upstream feed keeps its item order.
pub fn synthetic_id(channel_name: &str, index: usize) -> String {
    format!("sem_id_{}_{}", channel_name, index)
}

/// `content:encoded` wins over `description`; blank text counts as absent.
fn item_body(node: &Value, channel: &Channel, title: Option<&str>) -> Option<String> {
    let mut body = None;
    for key in ["encoded", "description"] {
        let Some(field) = node.get(key) else {
            continue;
        };
        if let Some(text) = first_text(node, key) {
            body = Some(text.to_owned());
            break;
        }
        if is_unexpected_shape(field) {
            tracing::warn!(
                channel = %channel.name,
                item = title.unwrap_or(NO_TITLE),
                field = key,
                shape = describe(field),
                "Item body has an unexpected shape, using placeholder"
            );
        }
    }
    body
}

fn item_tags(node: &Value, channel: &Channel) -> Vec<String> {
    let occurrences = as_list(node.get("category"));
    let tags: Vec<String> = all_texts(node, "category")
        .into_iter()
        .map(str::to_owned)
        .collect();

    let unusable = occurrences.iter().filter(|v| is_unexpected_shape(v)).count();
    if unusable > 0 {
        tracing::warn!(
            channel = %channel.name,
            skipped = unusable,
            "Ignoring category entries with an unexpected shape"
        );
    }

    tags
}

/// Text `<link>`, falling back to an `href` attribute (Atom-style link).
fn item_link(node: &Value) -> Option<String> {
    first_text(node, "link")
        .or_else(|| {
            as_list(node.get("link"))
                .into_iter()
                .find_map(|l| attr(l, "href"))
        })
        .map(str::to_owned)
}

/// An image the feed provides separately from the body: an image
/// enclosure, a media thumbnail, or media content marked as an image.
fn explicit_image(node: &Value) -> Option<String> {
    let is_image_type = |n: &Value| attr(n, "type").is_some_and(|t| t.starts_with("image/"));

    let enclosure = as_list(node.get("enclosure"))
        .into_iter()
        .filter(|e| is_image_type(e))
        .find_map(|e| attr(e, "url"));

    let thumbnail = || {
        as_list(node.get("thumbnail"))
            .into_iter()
            .find_map(|t| attr(t, "url"))
    };

    let media = || {
        as_list(node.get("content"))
            .into_iter()
            .filter(|c| attr(c, "medium") == Some("image") || is_image_type(c))
            .find_map(|c| attr(c, "url"))
    };

    enclosure
        .or_else(thumbnail)
        .or_else(media)
        .map(str::to_owned)
}

/// First `<img src>` URL in an HTML body.
pub fn first_img_src(body: &str) -> Option<String> {
    IMG_SRC_PATTERN
        .captures(body)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_owned())
}

/// Parse a feed date. Unparseable input yields `None`, never an error.
///
/// Accepts RFC 2822 (RSS `pubDate`), RFC 3339 (Atom, `dc:date`), and the
/// bare `YYYY-MM-DD[ HH:MM:SS]` forms some generators emit, read as UTC.
pub fn parse_date(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim();

    if let Ok(dt) = DateTime::parse_from_rfc2822(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
        return Some(naive.and_utc());
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return date.and_hms_opt(0, 0, 0).map(|naive| naive.and_utc());
    }

    tracing::debug!(value = %s, "Unparseable publication date");
    None
}

fn normalize_atom(bytes: &[u8], channel: &Channel) -> Result<ParsedDocument, DocumentError> {
    let feed = feed_rs::parser::parse(bytes).map_err(|e| DocumentError::Atom(e.to_string()))?;

    let mut parsed = ParsedDocument::default();
    for (index, entry) in feed.entries.into_iter().enumerate() {
        let link = entry
            .links
            .iter()
            .find(|l| l.rel.as_deref().map_or(true, |r| r == "alternate"))
            .or_else(|| entry.links.first())
            .map(|l| l.href.clone());

        let non_blank = |s: String| {
            let trimmed = s.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_owned())
        };

        let raw = RawItem {
            title: entry.title.map(|t| t.content).and_then(non_blank),
            identifier: non_blank(entry.id).or_else(|| link.clone()),
            body: entry
                .content
                .and_then(|c| c.body)
                .and_then(non_blank)
                .or_else(|| entry.summary.map(|s| s.content).and_then(non_blank)),
            tags: entry
                .categories
                .into_iter()
                .filter_map(|c| c.label.and_then(non_blank).or_else(|| non_blank(c.term)))
                .collect(),
            published: entry.published.or(entry.updated),
            image: entry
                .media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.clone())
                .next(),
            link,
        };

        match finish(raw, channel, index) {
            Some(item) => parsed.items.push(item),
            None => parsed.dropped += 1,
        }
    }

    Ok(parsed)
}
