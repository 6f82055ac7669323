//! Helpers that flatten the shape variance of a parsed feed tree.
//!
//! Any field the normalizer reads goes through these, never through ad hoc
//! checks. A field can arrive as:
//! - missing or `null`
//! - a plain string
//! - an object carrying attributes and a `#text` member
//! - an array of any of the above (repeated elements)

use serde_json::Value;

use super::xml::{ATTR_PREFIX, TEXT_KEY};

/// Every occurrence of a possibly-repeated field, in document order.
///
/// Missing and `null` give an empty list, an array gives its elements,
/// anything else is a one-element list.
pub fn as_list(value: Option<&Value>) -> Vec<&Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    }
}

/// Text carried by a single node: the string itself, or the `#text`
/// member of an object. Arrays, numbers and attribute-only objects have none.
pub fn text_of(value: &Value) -> Option<&str> {
    match value {
        Value::String(s) => Some(s),
        Value::Object(map) => map.get(TEXT_KEY).and_then(Value::as_str),
        _ => None,
    }
}

/// Like [`text_of`] but blank text counts as absent.
pub fn non_empty_text(value: &Value) -> Option<&str> {
    text_of(value).map(str::trim).filter(|s| !s.is_empty())
}

/// First non-blank text among all occurrences of `key` on `node`.
pub fn first_text<'a>(node: &'a Value, key: &str) -> Option<&'a str> {
    as_list(node.get(key)).into_iter().find_map(non_empty_text)
}

/// Non-blank texts of all occurrences of `key`, in order.
pub fn all_texts<'a>(node: &'a Value, key: &str) -> Vec<&'a str> {
    as_list(node.get(key))
        .into_iter()
        .filter_map(non_empty_text)
        .collect()
}

/// Attribute `name` of an element node.
pub fn attr<'a>(node: &'a Value, name: &str) -> Option<&'a str> {
    node.as_object()?
        .get(&format!("{}{}", ATTR_PREFIX, name))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// Short name of a value's JSON type, for diagnostics.
pub fn describe(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(map) if map.contains_key(TEXT_KEY) => "text object",
        Value::Object(_) => "attribute-only object",
    }
}

/// True when a present field carries nothing usable and is not simply empty.
///
/// An empty string is a normal "no value"; an attribute-only object, a number
/// or a nested array where text was expected is an unexpected shape.
pub fn is_unexpected_shape(value: &Value) -> bool {
    match value {
        Value::Null | Value::String(_) => false,
        Value::Array(items) => {
            items.iter().all(|v| text_of(v).is_none()) && items.iter().any(is_unexpected_shape)
        }
        other => text_of(other).is_none(),
    }
}
