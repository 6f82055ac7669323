//! XML document to dynamic tree conversion.
//!
//! Feeds in the wild disagree about almost everything, so items are not
//! deserialized into fixed structs. Instead the document becomes a
//! [`serde_json::Value`] tree and the normalizer probes it field by field.
//!
//! Conventions:
//! - an element becomes an object keyed by child element names
//! - attributes become `"@_" + name` members
//! - text content becomes a `"#text"` member
//! - an element with only text collapses to a plain string (`""` if empty)
//! - repeated sibling names become an array; a single child stays bare
//! - namespace prefixes are dropped (`content:encoded` -> `encoded`)
//!   and `xmlns` declarations are ignored
//! - CDATA is treated as text
//!
//! Because of the last three rules a field may be a string, an object, or an
//! array of either; see [`super::shape`] for the helpers that flatten that.

use quick_xml::escape::{resolve_html5_entity, resolve_predefined_entity, unescape_with};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde_json::{Map, Value};
use std::borrow::Cow;
use thiserror::Error;

/// Maximum element nesting depth accepted in a feed document.
const MAX_XML_DEPTH: usize = 64;

/// Longest entity name considered; anything longer is literal text.
const MAX_ENTITY_NAME: usize = 32;

pub const TEXT_KEY: &str = "#text";
pub const ATTR_PREFIX: &str = "@_";

#[derive(Debug, Error)]
pub enum XmlError {
    #[error("XML parse error: {0}")]
    Syntax(String),

    #[error("XML nesting depth exceeds maximum of {0} levels")]
    MaxDepthExceeded(usize),

    #[error("Document ended before element <{0}> was closed")]
    UnexpectedEof(String),

    #[error("Document has no root element")]
    Empty,
}

struct Frame {
    name: String,
    members: Map<String, Value>,
    text: String,
    has_children_or_attrs: bool,
}

impl Frame {
    fn open(e: &BytesStart<'_>) -> Self {
        let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
        let mut members = Map::new();

        for attr in e.attributes() {
            let attr = match attr {
                Ok(attr) => attr,
                Err(err) => {
                    tracing::debug!(element = %name, error = %err, "Skipping malformed attribute");
                    continue;
                }
            };
            if attr.key.as_namespace_binding().is_some() {
                continue;
            }
            let key = format!(
                "{}{}",
                ATTR_PREFIX,
                String::from_utf8_lossy(attr.key.local_name().as_ref())
            );
            let raw = String::from_utf8_lossy(&attr.value);
            members.insert(key, Value::String(decode_entities(&raw).into_owned()));
        }

        let has_children_or_attrs = !members.is_empty();
        Self {
            name,
            members,
            text: String::new(),
            has_children_or_attrs,
        }
    }

    fn add_child(&mut self, name: String, value: Value) {
        self.has_children_or_attrs = true;
        match self.members.get_mut(&name) {
            Some(Value::Array(siblings)) => siblings.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None => {
                self.members.insert(name, value);
            }
        }
    }

    fn close(mut self) -> (String, Value) {
        let text = self.text.trim();
        if !self.has_children_or_attrs {
            return (self.name, Value::String(text.to_owned()));
        }
        if !text.is_empty() {
            self.members
                .insert(TEXT_KEY.to_owned(), Value::String(text.to_owned()));
        }
        (self.name, Value::Object(self.members))
    }
}

/// Parse `content` into a tree of the shape `{ "<root>": <root value> }`.
///
/// # Errors
///
/// Malformed markup, mismatched end tags, unclosed elements and nesting
/// deeper than 64 levels are rejected. Unknown entities inside text are not
/// an error: the raw text is kept.
pub fn parse_tree(content: &str) -> Result<Value, XmlError> {
    let mut reader = Reader::from_str(content);
    let mut buf = Vec::new();
    let mut stack: Vec<Frame> = Vec::new();

    loop {
        let event = reader
            .read_event_into(&mut buf)
            .map_err(|e| XmlError::Syntax(e.to_string()))?;

        match event {
            Event::Start(e) => {
                if stack.len() >= MAX_XML_DEPTH {
                    return Err(XmlError::MaxDepthExceeded(MAX_XML_DEPTH));
                }
                stack.push(Frame::open(&e));
            }
            Event::Empty(e) => {
                let (name, value) = Frame::open(&e).close();
                match stack.last_mut() {
                    Some(parent) => parent.add_child(name, value),
                    None => return Ok(root(name, value)),
                }
            }
            Event::Text(e) => {
                if let Some(top) = stack.last_mut() {
                    let raw = String::from_utf8_lossy(&e);
                    top.text.push_str(&decode_entities(&raw));
                }
            }
            Event::CData(e) => {
                if let Some(top) = stack.last_mut() {
                    top.text.push_str(&String::from_utf8_lossy(&e));
                }
            }
            Event::End(_) => {
                let Some(frame) = stack.pop() else {
                    return Err(XmlError::Syntax("unexpected closing tag".into()));
                };
                let (name, value) = frame.close();
                match stack.last_mut() {
                    Some(parent) => parent.add_child(name, value),
                    None => return Ok(root(name, value)),
                }
            }
            Event::Eof => {
                return match stack.pop() {
                    Some(frame) => Err(XmlError::UnexpectedEof(frame.name)),
                    None => Err(XmlError::Empty),
                };
            }
            _ => {}
        }
        buf.clear();
    }
}

fn resolve_entity(name: &str) -> Option<&'static str> {
    resolve_predefined_entity(name).or_else(|| resolve_html5_entity(name))
}

/// Decode entity references one at a time.
///
/// XML predefined entities, character references and HTML5 named entities
/// are decoded. An unknown or malformed reference stays as literal text and
/// does not affect its neighbours.
pub fn decode_entities(raw: &str) -> Cow<'_, str> {
    if !raw.contains('&') {
        return Cow::Borrowed(raw);
    }

    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];

        let name_len = tail[1..]
            .find(';')
            .filter(|&n| n > 0 && n <= MAX_ENTITY_NAME)
            .filter(|&n| !tail[1..=n].contains(|c: char| c == '&' || c.is_whitespace()));

        match name_len {
            Some(n) => {
                let reference = &tail[..n + 2];
                match unescape_with(reference, resolve_entity) {
                    Ok(decoded) => out.push_str(&decoded),
                    Err(_) => out.push_str(reference),
                }
                rest = &tail[n + 2..];
            }
            None => {
                out.push('&');
                rest = &tail[1..];
            }
        }
    }
    out.push_str(rest);
    Cow::Owned(out)
}

fn root(name: String, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(name, value);
    Value::Object(map)
}
