use std::fmt;
use std::str::FromStr;

use thiserror::Error;

use super::content_type::ContentType;

/// Addresses a single entity inside the [`crate::store::content_store::ContentStore`].
///
/// Serializes to and parses from `"{type}/{id}"`, e.g. `"media/a1b2c3"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StoreKey {
    pub content_type: ContentType,
    pub id: String,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreKeyParseError {
    #[error("malformed store key: {0}")]
    Malformed(String),

    #[error("unknown content type: {0}")]
    UnknownType(String),

    #[error("store key id contains a path traversal segment: {0}")]
    PathTraversal(String),
}

impl StoreKey {
    pub fn new(content_type: ContentType, id: impl Into<String>) -> Self {
        Self {
            content_type,
            id: id.into(),
        }
    }

    /// Parses `"type/id"`. Also accepts a leading `/player/cache/` or `/store/`
    /// prefix so callers can pass a request path straight through.
    pub fn parse(raw: &str) -> Result<Self, StoreKeyParseError> {
        let trimmed = raw
            .trim_start_matches("/player/cache/")
            .trim_start_matches("/store/")
            .trim_start_matches('/');

        let mut parts = trimmed.splitn(2, '/');
        let type_part = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StoreKeyParseError::Malformed(raw.to_string()))?;
        let id_part = parts
            .next()
            .filter(|s| !s.is_empty())
            .ok_or_else(|| StoreKeyParseError::Malformed(raw.to_string()))?;

        let content_type = type_part
            .parse::<ContentType>()
            .map_err(|_| StoreKeyParseError::UnknownType(type_part.to_string()))?;

        if id_part.split('/').any(|segment| segment == "..") {
            return Err(StoreKeyParseError::PathTraversal(id_part.to_string()));
        }

        Ok(StoreKey {
            content_type,
            id: id_part.to_string(),
        })
    }
}

impl fmt::Display for StoreKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.content_type, self.id)
    }
}

impl FromStr for StoreKey {
    type Err = StoreKeyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StoreKey::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_type_and_id() {
        let key = StoreKey::parse("media/abc123").unwrap();
        assert_eq!(key.content_type, ContentType::Media);
        assert_eq!(key.id, "abc123");
    }

    #[test]
    fn parses_id_containing_slashes() {
        let key = StoreKey::parse("widget/clock/v2").unwrap();
        assert_eq!(key.id, "clock/v2");
    }

    #[test]
    fn strips_store_prefix() {
        let key = StoreKey::parse("/store/media/abc123").unwrap();
        assert_eq!(key.content_type, ContentType::Media);
        assert_eq!(key.id, "abc123");
    }

    #[test]
    fn strips_player_cache_prefix() {
        let key = StoreKey::parse("/player/cache/static/logo.png").unwrap();
        assert_eq!(key.content_type, ContentType::Static);
        assert_eq!(key.id, "logo.png");
    }

    #[test]
    fn rejects_path_traversal() {
        let err = StoreKey::parse("media/../../etc/passwd").unwrap_err();
        assert!(matches!(err, StoreKeyParseError::PathTraversal(_)));
    }

    #[test]
    fn rejects_unknown_type() {
        assert!(matches!(
            StoreKey::parse("video/abc"),
            Err(StoreKeyParseError::UnknownType(_))
        ));
    }

    #[test]
    fn display_round_trips() {
        let key = StoreKey::new(ContentType::Layout, "42");
        assert_eq!(key.to_string(), "layout/42");
        assert_eq!(StoreKey::parse(&key.to_string()).unwrap(), key);
    }
}
