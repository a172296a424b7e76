//! Common types used throughout SpanStore.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// User-visible key/value properties attached to spaces and content items.
pub type Properties = BTreeMap<String, String>;

/// Shortest space identifier accepted.
pub const MIN_SPACE_ID_LEN: usize = 3;
/// Longest space identifier accepted.
pub const MAX_SPACE_ID_LEN: usize = 63;
/// Longest content identifier accepted, in UTF-8 bytes.
pub const MAX_CONTENT_ID_BYTES: usize = 1024;

/// Identifier of a space (bucket/container).
///
/// Space ids must be portable across every backend, so the accepted
/// alphabet is the intersection of the usual bucket naming rules.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SpaceId(String);

impl SpaceId {
    /// Create a new SpaceId from a string.
    ///
    /// # Preconditions
    /// - 3 to 63 characters of `a-z`, `0-9`, `-` and `.`
    /// - starts with a letter, does not end with `-` or `.`
    /// - no `..`, `-.` or `.-` sequences
    ///
    /// # Errors
    /// - Returns `InvalidInput` if any rule is violated
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        validate_space_id(&id)?;
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn validate_space_id(id: &str) -> crate::Result<()> {
    let invalid = |reason: &str| {
        Err(crate::Error::InvalidInput(format!(
            "Invalid space id '{}': {}",
            id, reason
        )))
    };

    if id.len() < MIN_SPACE_ID_LEN || id.len() > MAX_SPACE_ID_LEN {
        return invalid("length must be between 3 and 63");
    }
    if !id.starts_with(|c: char| c.is_ascii_lowercase()) {
        return invalid("must start with a lowercase letter");
    }
    if id.ends_with('-') || id.ends_with('.') {
        return invalid("must not end with '-' or '.'");
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '.')
    {
        return invalid("only a-z, 0-9, '-' and '.' are allowed");
    }
    if id.contains("..") || id.contains("-.") || id.contains(".-") {
        return invalid("must not contain '..', '-.' or '.-'");
    }
    Ok(())
}

impl fmt::Display for SpaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for SpaceId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<SpaceId> for String {
    fn from(id: SpaceId) -> Self {
        id.0
    }
}

impl FromStr for SpaceId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}

/// Identifier of a content item, unique within its space.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId(String);

impl ContentId {
    /// Create a new ContentId from a string.
    ///
    /// # Preconditions
    /// - non-empty, at most 1024 UTF-8 bytes
    /// - no `?`, `\` or control characters
    ///
    /// # Errors
    /// - Returns `InvalidInput` if any rule is violated
    pub fn new(id: impl Into<String>) -> crate::Result<Self> {
        let id = id.into();
        if id.is_empty() {
            return Err(crate::Error::InvalidInput(
                "ContentId cannot be empty".to_string(),
            ));
        }
        if id.len() > MAX_CONTENT_ID_BYTES {
            return Err(crate::Error::InvalidInput(format!(
                "ContentId exceeds {} bytes",
                MAX_CONTENT_ID_BYTES
            )));
        }
        if id.chars().any(|c| c == '?' || c == '\\' || c.is_control()) {
            return Err(crate::Error::InvalidInput(format!(
                "ContentId '{}' contains a reserved character",
                id.escape_debug()
            )));
        }
        Ok(Self(id))
    }

    /// Get the inner string value.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Build a derived id by appending `suffix`.
    pub fn with_suffix(&self, suffix: &str) -> crate::Result<Self> {
        Self::new(format!("{}{}", self.0, suffix))
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ContentId {
    type Error = crate::Error;

    fn try_from(value: String) -> crate::Result<Self> {
        Self::new(value)
    }
}

impl From<ContentId> for String {
    fn from(id: ContentId) -> Self {
        id.0
    }
}

impl FromStr for ContentId {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        Self::new(s)
    }
}
