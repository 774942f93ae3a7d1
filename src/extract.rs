//! Key extraction from raw records.
//!
//! Two strategies, both pure and safe to share between worker threads:
//!
//! - [`PatternExtractor`]: first match of a compiled pattern, verbatim. Never
//!   fails; a record without a match yields the empty key.
//! - [`FieldExtractor`]: parses the record as a JSON object and renders one
//!   top-level field as a string. Nested lookup is not supported; a field
//!   name containing dots is looked up literally.

use std::borrow::Cow;

use regex_lite::Regex;
use serde_json::{Map, Value};

use crate::error::{BlobError, Result};

/// Pattern used when none is configured.
pub const DEFAULT_KEY_PATTERN: &str = r"ai-[\d]+-[\w]+";

/// Field used when none is configured.
pub const DEFAULT_KEY_FIELD: &str = "finc.record_id";

// ── PatternExtractor ───────────────────────────────────────────────

/// Extracts the key as the first match of a regular expression.
#[derive(Debug, Clone)]
pub struct PatternExtractor {
    pattern: Regex,
}

impl PatternExtractor {
    pub fn new(pattern: &str) -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(pattern)?,
        })
    }

    pub fn as_str(&self) -> &str {
        self.pattern.as_str()
    }

    /// First match in `record`, or the empty string.
    ///
    /// Matching runs on the record decoded as UTF-8 with invalid sequences
    /// replaced, so a match that spans invalid bytes contains U+FFFD rather
    /// than the original bytes. The default pattern only matches ASCII.
    pub fn extract(&self, record: &[u8]) -> String {
        // Records are usually UTF-8; only invalid input pays for a copy.
        let text: Cow<'_, str> = String::from_utf8_lossy(record);
        self.pattern
            .find(&text)
            .map(|m| m.as_str().to_string())
            .unwrap_or_default()
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self {
            pattern: Regex::new(DEFAULT_KEY_PATTERN).expect("default key pattern compiles"),
        }
    }
}

// ── FieldExtractor ─────────────────────────────────────────────────

/// Extracts the key from a top-level field of a JSON object.
#[derive(Debug, Clone)]
pub struct FieldExtractor {
    field: String,
}

impl FieldExtractor {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
        }
    }

    pub fn field(&self) -> &str {
        &self.field
    }

    pub fn extract(&self, record: &[u8]) -> Result<String> {
        let object: Map<String, Value> = serde_json::from_slice(record)?;
        match object.get(&self.field) {
            Some(value) => render_value(&self.field, value),
            None => Err(BlobError::KeyNotFound {
                field: self.field.clone(),
                record: String::from_utf8_lossy(record).trim_end().to_string(),
            }),
        }
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_KEY_FIELD)
    }
}

/// Render a field value as a key.
///
/// Strings are used as-is, integers in decimal. Floats are truncated
/// towards zero and rendered as integers, so `3.9` becomes `"3"`. Every
/// other JSON type is rejected.
pub fn render_value(field: &str, value: &Value) -> Result<String> {
    let unsupported = |kind| BlobError::UnsupportedValue {
        field: field.to_string(),
        kind,
    };
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(i.to_string())
            } else if let Some(u) = n.as_u64() {
                Ok(u.to_string())
            } else {
                // `as` saturates out-of-range floats at the i64 bounds
                let f = n.as_f64().ok_or_else(|| unsupported("number"))?;
                Ok((f.trunc() as i64).to_string())
            }
        }
        Value::Bool(_) => Err(unsupported("bool")),
        Value::Null => Err(unsupported("null")),
        Value::Array(_) => Err(unsupported("array")),
        Value::Object(_) => Err(unsupported("object")),
    }
}

// ── KeyExtractor ───────────────────────────────────────────────────

/// The configured extraction strategy.
#[derive(Debug, Clone)]
pub enum KeyExtractor {
    Pattern(PatternExtractor),
    Field(FieldExtractor),
}

impl KeyExtractor {
    pub fn pattern(pattern: &str) -> Result<Self> {
        Ok(KeyExtractor::Pattern(PatternExtractor::new(pattern)?))
    }

    pub fn field(field: impl Into<String>) -> Self {
        KeyExtractor::Field(FieldExtractor::new(field))
    }

    /// Extract the key of one record.
    pub fn extract(&self, record: &[u8]) -> Result<String> {
        match self {
            KeyExtractor::Pattern(p) => Ok(p.extract(record)),
            KeyExtractor::Field(f) => f.extract(record),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            KeyExtractor::Pattern(_) => "pattern",
            KeyExtractor::Field(_) => "field",
        }
    }

    /// The configured pattern or field name.
    pub fn source(&self) -> &str {
        match self {
            KeyExtractor::Pattern(p) => p.as_str(),
            KeyExtractor::Field(f) => f.field(),
        }
    }
}

impl Default for KeyExtractor {
    fn default() -> Self {
        KeyExtractor::Pattern(PatternExtractor::default())
    }
}
