use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Prefix that marks a user preset in a persisted selection.
pub const USER_PRESET_PREFIX: &str = "user:";

/// The closed set of presets shipped with the panel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinPreset {
    /// Whatever the user dialled in by hand; selecting it changes nothing.
    Custom,
    /// Flat curve.
    Reset,
    Rock,
    Pop,
    Jazz,
    Rap,
    House,
    Bass,
    Treble,
    Vocal,
    Classical,
    Dance,
}

impl BuiltinPreset {
    /// Display order in the preset picker.
    pub const ALL: [BuiltinPreset; 12] = [
        BuiltinPreset::Custom,
        BuiltinPreset::Reset,
        BuiltinPreset::Rock,
        BuiltinPreset::Pop,
        BuiltinPreset::Jazz,
        BuiltinPreset::Rap,
        BuiltinPreset::House,
        BuiltinPreset::Bass,
        BuiltinPreset::Treble,
        BuiltinPreset::Vocal,
        BuiltinPreset::Classical,
        BuiltinPreset::Dance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            BuiltinPreset::Custom => "custom",
            BuiltinPreset::Reset => "reset",
            BuiltinPreset::Rock => "rock",
            BuiltinPreset::Pop => "pop",
            BuiltinPreset::Jazz => "jazz",
            BuiltinPreset::Rap => "rap",
            BuiltinPreset::House => "house",
            BuiltinPreset::Bass => "bass",
            BuiltinPreset::Treble => "treble",
            BuiltinPreset::Vocal => "vocal",
            BuiltinPreset::Classical => "classical",
            BuiltinPreset::Dance => "dance",
        }
    }

    /// Picker label: "Preset: Custom", "Preset: Flat", otherwise the
    /// capitalised identifier.
    pub fn label(&self) -> String {
        match self {
            BuiltinPreset::Custom => "Preset: Custom".to_string(),
            BuiltinPreset::Reset => "Preset: Flat".to_string(),
            other => {
                let id = other.as_str();
                let mut chars = id.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().chain(chars).collect(),
                    None => String::new(),
                }
            }
        }
    }
}

impl FromStr for BuiltinPreset {
    type Err = ParsePresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BuiltinPreset::ALL
            .iter()
            .copied()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ParsePresetError(s.to_string()))
    }
}

/// A validated user preset name: 2–20 characters from `[A-Za-z0-9_-]`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PresetName(String);

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // ASCII word characters only; `\w` in `regex` is Unicode-aware.
        Regex::new(r"^[A-Za-z0-9_-]{2,20}$").expect("preset name pattern is valid")
    })
}

impl PresetName {
    pub fn parse(name: &str) -> Result<Self, InvalidPresetName> {
        if name_pattern().is_match(name) {
            Ok(Self(name.to_string()))
        } else {
            Err(InvalidPresetName(name.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PresetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid preset name {0:?}: expected 2-20 letters, digits, '_' or '-'")]
pub struct InvalidPresetName(pub String);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown preset identifier {0:?}")]
pub struct ParsePresetError(pub String);

/// Which preset the panel applies: a built-in or a named user preset.
///
/// Persisted as a plain string (`"rock"`, `"user:late-night"`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PresetId {
    Builtin(BuiltinPreset),
    User(String),
}

impl PresetId {
    pub fn user(name: &PresetName) -> Self {
        PresetId::User(name.as_str().to_string())
    }

    pub fn label(&self) -> String {
        match self {
            PresetId::Builtin(b) => b.label(),
            PresetId::User(name) => format!("User: {}", name),
        }
    }
}

impl Default for PresetId {
    fn default() -> Self {
        PresetId::Builtin(BuiltinPreset::Custom)
    }
}

impl fmt::Display for PresetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PresetId::Builtin(b) => f.write_str(b.as_str()),
            PresetId::User(name) => write!(f, "{}{}", USER_PRESET_PREFIX, name),
        }
    }
}

impl FromStr for PresetId {
    type Err = ParsePresetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some(name) = s.strip_prefix(USER_PRESET_PREFIX) {
            if name.is_empty() {
                return Err(ParsePresetError(s.to_string()));
            }
            return Ok(PresetId::User(name.to_string()));
        }
        s.parse::<BuiltinPreset>().map(PresetId::Builtin)
    }
}

impl Serialize for PresetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for PresetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preset_name_accepts_word_chars_and_hyphens() {
        assert!(PresetName::parse("ab").is_ok());
        assert!(PresetName::parse("a-b-c").is_ok());
        assert!(PresetName::parse("Late_Night-2").is_ok());
        assert!(PresetName::parse(&"x".repeat(20)).is_ok());
    }

    #[test]
    fn test_preset_name_rejects_bad_input() {
        for bad in ["", "a", "has space", "semi;colon", "dots.no", "ümlaut"] {
            assert!(PresetName::parse(bad).is_err(), "{bad:?} should be rejected");
        }
        assert!(PresetName::parse(&"x".repeat(21)).is_err());
    }

    #[test]
    fn test_preset_id_string_form() {
        assert_eq!(
            "rock".parse::<PresetId>().unwrap(),
            PresetId::Builtin(BuiltinPreset::Rock)
        );
        assert_eq!(
            "user:evening".parse::<PresetId>().unwrap(),
            PresetId::User("evening".into())
        );
        assert_eq!(PresetId::User("evening".into()).to_string(), "user:evening");
        assert!("user:".parse::<PresetId>().is_err());
        assert!("loudness".parse::<PresetId>().is_err());
    }

    #[test]
    fn test_labels() {
        assert_eq!(BuiltinPreset::Custom.label(), "Preset: Custom");
        assert_eq!(BuiltinPreset::Reset.label(), "Preset: Flat");
        assert_eq!(BuiltinPreset::Classical.label(), "Classical");
        assert_eq!(PresetId::User("evening".into()).label(), "User: evening");
    }

    #[test]
    fn test_serde_as_string() {
        let json = serde_json::to_string(&PresetId::User("a-b".into())).unwrap();
        assert_eq!(json, "\"user:a-b\"");
        let back: PresetId = serde_json::from_str("\"jazz\"").unwrap();
        assert_eq!(back, PresetId::Builtin(BuiltinPreset::Jazz));
    }
}
