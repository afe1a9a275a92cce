use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer, de};

use crate::config::ConfigError;

/// Spellings accepted for the one supported language, compared
/// case-insensitively.
const PYTHON_ALIASES: [&str; 3] = ["python", "python3", "py"];

/// A language the sandbox can execute
///
/// Only the Python-like language is supported; anything else is rejected
/// before the source is looked at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Language {
    Python,
}

impl Language {
    /// Resolve a declared language name
    pub fn from_declared(name: &str) -> Result<Self, ConfigError> {
        let normalized = name.trim().to_ascii_lowercase();
        if PYTHON_ALIASES.contains(&normalized.as_str()) {
            Ok(Language::Python)
        } else {
            Err(ConfigError::UnsupportedLanguage(name.to_owned()))
        }
    }

    /// Canonical identifier
    pub fn id(self) -> &'static str {
        match self {
            Language::Python => "python",
        }
    }

    /// Every spelling accepted by [`Language::from_declared`]
    pub fn aliases(self) -> &'static [&'static str] {
        match self {
            Language::Python => &PYTHON_ALIASES,
        }
    }
}

impl FromStr for Language {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Language::from_declared(s)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl Serialize for Language {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.id())
    }
}

impl<'de> Deserialize<'de> for Language {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Language::from_declared(&s).map_err(|_| {
            de::Error::invalid_value(de::Unexpected::Str(&s), &"one of python, python3, py")
        })
    }
}

#[cfg(test)]
mod tests {
    use yare::parameterized;

    use super::*;

    #[parameterized(
        lower = { "python" },
        versioned = { "python3" },
        short = { "py" },
        upper = { "PYTHON" },
        mixed = { "Python3" },
        padded = { "  py " },
    )]
    fn accepts_python_spellings(name: &str) {
        assert_eq!(Language::from_declared(name).unwrap(), Language::Python);
    }

    #[parameterized(
        javascript = { "javascript" },
        python2 = { "python2" },
        empty = { "" },
        ruby = { "ruby" },
    )]
    fn rejects_other_languages(name: &str) {
        match Language::from_declared(name) {
            Err(ConfigError::UnsupportedLanguage(declared)) => assert_eq!(declared, name),
            other => panic!("expected UnsupportedLanguage, got {other:?}"),
        }
    }

    #[test]
    fn from_str_matches_from_declared() {
        assert_eq!("py".parse::<Language>().unwrap(), Language::Python);
        assert!("go".parse::<Language>().is_err());
    }

    #[test]
    fn display_uses_canonical_id() {
        assert_eq!(Language::Python.to_string(), "python");
        assert!(Language::Python.aliases().contains(&"py"));
    }

    #[test]
    fn serde_round_trip() {
        let json = serde_json::to_string(&Language::Python).unwrap();
        assert_eq!(json, "\"python\"");
        let parsed: Language = serde_json::from_str("\"Python3\"").unwrap();
        assert_eq!(parsed, Language::Python);
        assert!(serde_json::from_str::<Language>("\"perl\"").is_err());
    }
}
