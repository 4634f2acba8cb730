use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Protocol version of the game client, e.g. `1.4-ENG`.
///
/// Selects the decode rule set used for a connection. Compared by value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProtocolVersion {
    /// Major version number
    pub major: u16,

    /// Minor version number
    pub minor: u16,

    /// Client language tag (e.g. ENG, KOR, JPN)
    pub language: String,
}

impl ProtocolVersion {
    /// Create a new protocol version
    pub fn new(major: u16, minor: u16, language: impl Into<String>) -> Self {
        Self {
            major,
            minor,
            language: language.into().to_uppercase(),
        }
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::new(1, 0, "ENG")
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}-{}", self.major, self.minor, self.language)
    }
}

impl FromStr for ProtocolVersion {
    type Err = String;

    /// Parse `major.minor-LANG`
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let (number, language) = s
            .split_once('-')
            .ok_or_else(|| format!("missing language tag in protocol version '{}'", s))?;

        let (major, minor) = number
            .split_once('.')
            .ok_or_else(|| format!("expected major.minor in protocol version '{}'", s))?;

        let major = major
            .parse::<u16>()
            .map_err(|e| format!("invalid major version '{}': {}", major, e))?;
        let minor = minor
            .parse::<u16>()
            .map_err(|e| format!("invalid minor version '{}': {}", minor, e))?;

        if language.is_empty() || !language.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(format!("invalid language tag '{}'", language));
        }

        Ok(Self::new(major, minor, language))
    }
}
