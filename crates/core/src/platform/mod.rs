use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::EchoError;

/// Error reporting source an event originates from.
///
/// The set is fixed at compile time. Frames naming anything else are
/// rejected at the ingestion boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Javascript,
    Node,
    Python,
    Ruby,
    Cocoa,
    Csharp,
    Elixir,
    Go,
    Java,
    Objc,
    Php,
    Perl,
    C,
    Other,
}

impl Platform {
    pub const ALL: [Platform; 14] = [
        Platform::Javascript,
        Platform::Node,
        Platform::Python,
        Platform::Ruby,
        Platform::Cocoa,
        Platform::Csharp,
        Platform::Elixir,
        Platform::Go,
        Platform::Java,
        Platform::Objc,
        Platform::Php,
        Platform::Perl,
        Platform::C,
        Platform::Other,
    ];

    /// Wire name used by the event stream.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Javascript => "javascript",
            Platform::Node => "node",
            Platform::Python => "python",
            Platform::Ruby => "ruby",
            Platform::Cocoa => "cocoa",
            Platform::Csharp => "csharp",
            Platform::Elixir => "elixir",
            Platform::Go => "go",
            Platform::Java => "java",
            Platform::Objc => "objc",
            Platform::Php => "php",
            Platform::Perl => "perl",
            Platform::C => "c",
            Platform::Other => "other",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = EchoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Platform::ALL
            .iter()
            .copied()
            .find(|platform| platform.as_str() == s)
            .ok_or_else(|| EchoError::UnknownPlatform(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_every_wire_name() {
        for platform in Platform::ALL {
            assert_eq!(platform.as_str().parse::<Platform>().unwrap(), platform);
        }
    }

    #[test]
    fn rejects_unknown_names() {
        let err = "cobol".parse::<Platform>().unwrap_err();
        assert!(matches!(err, EchoError::UnknownPlatform(name) if name == "cobol"));
        assert!("Go".parse::<Platform>().is_err());
    }

    #[test]
    fn serializes_as_lowercase_map_key() {
        let mut map = std::collections::BTreeMap::new();
        map.insert(Platform::Objc, 1);
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"objc":1}"#);

        let back: std::collections::BTreeMap<Platform, i32> = serde_json::from_str(&json).unwrap();
        assert_eq!(back.get(&Platform::Objc), Some(&1));
    }
}
