//! Tag queries: parsing, canonical form and fingerprints.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

/// A single `name:value` search criterion.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Tag {
    pub name: String,
    pub value: String,
}

impl Tag {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl std::fmt::Display for Tag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.name, self.value)
    }
}

/// Errors from parsing the `name:value,name:value` query syntax.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TagParseError {
    /// A pair without a `:` separator.
    #[error("Invalid tag format '{0}'. Expected format: tagName:tagValue")]
    MissingSeparator(String),

    /// A pair whose name or value is blank after trimming.
    #[error("Tag name and value cannot be empty in '{0}'")]
    EmptyPart(String),
}

/// An ordered set of tags combined with AND semantics.
///
/// Construction order is preserved for display; [`TagSet::canonical`] gives
/// the order-independent form used for cache keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagSet(Vec<Tag>);

impl TagSet {
    pub fn new(tags: Vec<Tag>) -> Self {
        Self(tags)
    }

    /// Parses comma-separated `name:value` pairs.
    ///
    /// Whitespace around names and values is trimmed. The value may itself
    /// contain `:`. An empty input yields an empty set; any malformed pair
    /// rejects the whole input.
    pub fn parse(input: &str) -> Result<Self, TagParseError> {
        if input.trim().is_empty() {
            return Ok(Self::default());
        }

        input
            .split(',')
            .map(|pair| {
                let (name, value) = pair
                    .split_once(':')
                    .ok_or_else(|| TagParseError::MissingSeparator(pair.trim().to_string()))?;
                let (name, value) = (name.trim(), value.trim());
                if name.is_empty() || value.is_empty() {
                    return Err(TagParseError::EmptyPart(pair.trim().to_string()));
                }
                Ok(Tag::new(name, value))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.0.iter()
    }

    /// Returns the tags sorted by (name, value) with duplicates removed.
    pub fn canonical(&self) -> Vec<Tag> {
        let mut tags = self.0.clone();
        tags.sort();
        tags.dedup();
        tags
    }

    /// Order-independent digest of this query, safe to embed in a cache key.
    pub fn fingerprint(&self) -> Fingerprint {
        let canonical = self.canonical();
        let pairs: Vec<[&str; 2]> = canonical
            .iter()
            .map(|t| [t.name.as_str(), t.value.as_str()])
            .collect();
        // A vector of string pairs always serializes.
        let encoded = serde_json::to_vec(&pairs).unwrap_or_default();
        Fingerprint(hex::encode(Sha256::digest(&encoded)))
    }
}

impl std::fmt::Display for TagSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let rendered: Vec<String> = self.0.iter().map(Tag::to_string).collect();
        f.write_str(&rendered.join(","))
    }
}

impl FromIterator<Tag> for TagSet {
    fn from_iter<I: IntoIterator<Item = Tag>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Hex SHA-256 of a canonical tag set.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}
