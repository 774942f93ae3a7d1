//! Index entries: a key and the byte range of its record in the blob file.

use serde::{Deserialize, Serialize};

/// Byte range of one record inside the blob file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub offset: u64,
    pub length: u64,
}

impl Span {
    pub fn new(offset: u64, length: u64) -> Self {
        Self { offset, length }
    }

    /// First byte past the record.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Associates a key with a section of the blob file.
///
/// Serialized with the short field names of the line format (`k`, `o`, `l`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    #[serde(rename = "k")]
    pub key: String,
    #[serde(rename = "o")]
    pub offset: u64,
    #[serde(rename = "l")]
    pub length: u64,
}

impl Entry {
    pub fn new(key: impl Into<String>, offset: u64, length: u64) -> Self {
        Self {
            key: key.into(),
            offset,
            length,
        }
    }

    pub fn span(&self) -> Span {
        Span::new(self.offset, self.length)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_json_uses_short_names() {
        let entry = Entry::new("ai-1-x", 12, 30);
        let json = serde_json::to_string(&entry).unwrap();
        assert_eq!(json, r#"{"k":"ai-1-x","o":12,"l":30}"#);

        let back: Entry = serde_json::from_str(&json).unwrap();
        assert_eq!(back, entry);
        assert_eq!(back.span().end(), 42);
    }
}
