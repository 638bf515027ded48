//! Syntactic repair and parsing of raw provider text.
//!
//! The only repair allowed is trimming whitespace and removing a code fence
//! that wraps the whole payload. A reply whose JSON sits in a fenced block
//! after some prose is read from that block, but only when the text does not
//! parse on its own. Anything else is left for the schema to reject.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use super::SchemaViolation;

/// Longest excerpt of a bad payload carried in an error.
const EXCERPT_CHARS: usize = 200;

lazy_static! {
    /// First fenced block anywhere in the text, with an optional `json` tag.
    static ref EMBEDDED_BLOCK: Regex =
        Regex::new(r"(?s)```[ \t]*(?:json|JSON)?[ \t]*\r?\n?(.*?)```").expect("valid fence regex");
}

/// Top-level JSON shape a payload kind expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Shape {
    Object,
    List,
}

impl Shape {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Shape::Object => "object",
            Shape::List => "list",
        }
    }
}

/// Trim whitespace and remove a code fence wrapping the whole text.
///
/// Fences inside the payload, such as a snippet in a string field, are
/// left alone.
pub fn strip_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    let inner = match trimmed
        .strip_prefix("```")
        .and_then(|rest| rest.strip_suffix("```"))
    {
        Some(inner) => inner,
        None => return trimmed,
    };

    let inner = inner.trim_start_matches([' ', '\t']);
    inner
        .strip_prefix("json")
        .or_else(|| inner.strip_prefix("JSON"))
        .unwrap_or(inner)
        .trim()
}

/// Body of the first fenced block in `raw`, if there is one.
fn embedded_block(raw: &str) -> Option<&str> {
    EMBEDDED_BLOCK
        .captures(raw)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
}

/// Parse raw provider text into JSON of the expected top-level shape.
pub(crate) fn parse(raw: &str, expected: Shape) -> Result<Value, SchemaViolation> {
    let body = strip_fences(raw);

    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => embedded_block(raw)
            .and_then(|block| serde_json::from_str(block).ok())
            .ok_or_else(|| SchemaViolation::Unparseable {
                reason: e.to_string(),
                excerpt: excerpt(body),
            })?,
    };

    let found = match &value {
        Value::Object(_) => Some(Shape::Object),
        Value::Array(_) => Some(Shape::List),
        _ => None,
    };

    if found != Some(expected) {
        return Err(SchemaViolation::ShapeMismatch {
            expected: expected.name(),
            found: json_type_name(&value),
        });
    }

    Ok(value)
}

/// Leading characters of a payload, cut on a char boundary.
pub fn excerpt(text: &str) -> String {
    match text.char_indices().nth(EXCERPT_CHARS) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "list",
        Value::Object(_) => "object",
    }
}
