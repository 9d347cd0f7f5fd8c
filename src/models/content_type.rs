use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The known entity kinds a [`super::StoreKey`] can address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Media,
    Layout,
    Widget,
    Static,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ContentType::Media => "media",
            ContentType::Layout => "layout",
            ContentType::Widget => "widget",
            ContentType::Static => "static",
        };
        f.write_str(s)
    }
}

impl FromStr for ContentType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "media" => Ok(ContentType::Media),
            "layout" => Ok(ContentType::Layout),
            "widget" => Ok(ContentType::Widget),
            "static" => Ok(ContentType::Static),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_display_and_from_str() {
        for ct in [
            ContentType::Media,
            ContentType::Layout,
            ContentType::Widget,
            ContentType::Static,
        ] {
            let s = ct.to_string();
            assert_eq!(s.parse::<ContentType>().unwrap(), ct);
        }
    }

    #[test]
    fn rejects_unknown_type() {
        assert!("video".parse::<ContentType>().is_err());
    }
}
