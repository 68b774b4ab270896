use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};

use crate::curve::GainCurve;
use crate::preset::PresetId;

/// Storage keys.  Both tiers are shared with unrelated data, so every
/// writer touches only its own keys.
pub mod keys {
    pub const ENABLED: &str = "enabled";
    pub const APPLY_ALL: &str = "applyAll";
    pub const ALLOWLIST: &str = "allowlist";
    pub const GAIN_VALUE: &str = "gainValue";
    pub const EQ_BANDS: &str = "eqBands";
    pub const CUSTOM_PRESETS: &str = "customPresets";
    pub const LAST_PRESET: &str = "lastPresetSelection";
    pub const REFRESH_MODE: &str = "refreshMode";
}

pub const DEFAULT_GAIN: f32 = 1.5;

/// Meter polling cadence chosen by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshMode {
    #[default]
    Fast,
    Eco,
}

impl RefreshMode {
    /// Delay between the end of one meter poll and the start of the next.
    pub fn meter_delay(&self) -> Duration {
        match self {
            RefreshMode::Fast => Duration::from_millis(100),
            RefreshMode::Eco => Duration::from_millis(300),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RefreshMode::Fast => "fast",
            RefreshMode::Eco => "eco",
        }
    }
}

impl std::str::FromStr for RefreshMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(RefreshMode::Fast),
            "eco" => Ok(RefreshMode::Eco),
            other => anyhow::bail!("unknown refresh mode {:?} (expected fast or eco)", other),
        }
    }
}

/// Hostnames the processor is allowed to act on.  Insertion-ordered,
/// lower-cased, no duplicates.  Stored lists go through the same
/// normalisation on load.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
#[serde(transparent)]
pub struct AllowList(Vec<String>);

impl AllowList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Trims and lower-cases `host` before appending.  Returns false (and
    /// leaves the list alone) for empty input or a host already present.
    pub fn insert(&mut self, host: &str) -> bool {
        let host = host.trim().to_lowercase();
        if host.is_empty() || self.0.contains(&host) {
            return false;
        }
        self.0.push(host);
        true
    }

    /// Removes the entry at `index`; out-of-range is a no-op.
    pub fn remove_at(&mut self, index: usize) -> Option<String> {
        if index < self.0.len() {
            Some(self.0.remove(index))
        } else {
            None
        }
    }

    pub fn position(&self, host: &str) -> Option<usize> {
        let host = host.trim().to_lowercase();
        self.0.iter().position(|h| *h == host)
    }

    pub fn hosts(&self) -> &[String] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<'de> Deserialize<'de> for AllowList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Vec::<String>::deserialize(deserializer).map(|hosts| hosts.into_iter().collect())
    }
}

impl<S: AsRef<str>> FromIterator<S> for AllowList {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut list = AllowList::new();
        for host in iter {
            list.insert(host.as_ref());
        }
        list
    }
}

/// Everything persisted to the cross-device tier.  Each field maps to one
/// storage key (see [`keys`]); a missing or malformed key falls back to the
/// field default independently of the others.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncState {
    pub enabled: bool,
    pub apply_all: bool,
    pub allowlist: AllowList,
    pub gain_value: f32,
    pub eq_bands: GainCurve,
    pub custom_presets: BTreeMap<String, GainCurve>,
    #[serde(rename = "lastPresetSelection")]
    pub last_preset: PresetId,
    pub refresh_mode: RefreshMode,
}

impl Default for SyncState {
    fn default() -> Self {
        Self {
            enabled: true,
            apply_all: true,
            allowlist: AllowList::new(),
            gain_value: DEFAULT_GAIN,
            eq_bands: GainCurve::default(),
            custom_presets: BTreeMap::new(),
            last_preset: PresetId::default(),
            refresh_mode: RefreshMode::Fast,
        }
    }
}

/// Everything persisted to the device-local tier.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocalState {
    #[serde(default)]
    pub eq_bands: Option<GainCurve>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowlist_normalises_and_dedupes() {
        let mut list = AllowList::new();
        assert!(list.insert("  Example.COM "));
        assert!(!list.insert("example.com"));
        assert!(!list.insert("   "));
        assert!(list.insert("radio.example"));
        assert_eq!(list.hosts(), &["example.com", "radio.example"]);
        assert_eq!(list.position("EXAMPLE.com"), Some(0));
    }

    #[test]
    fn test_allowlist_remove_out_of_range_is_noop() {
        let mut list: AllowList = ["a.com", "b.com"].into_iter().collect();
        assert_eq!(list.remove_at(5), None);
        assert_eq!(list.remove_at(0), Some("a.com".into()));
        assert_eq!(list.hosts(), &["b.com"]);
    }

    #[test]
    fn test_stored_allowlist_is_normalised_on_load() {
        let list: AllowList =
            serde_json::from_value(serde_json::json!(["A.com", "a.com", " ", "b.com "])).unwrap();
        assert_eq!(list.hosts(), &["a.com", "b.com"]);
    }

    #[test]
    fn test_refresh_mode_delays() {
        assert_eq!(RefreshMode::Fast.meter_delay(), Duration::from_millis(100));
        assert_eq!(RefreshMode::Eco.meter_delay(), Duration::from_millis(300));
        assert_eq!("eco".parse::<RefreshMode>().unwrap(), RefreshMode::Eco);
        assert!("turbo".parse::<RefreshMode>().is_err());
    }

    #[test]
    fn test_sync_state_uses_storage_key_names() {
        let value = serde_json::to_value(SyncState::default()).unwrap();
        let obj = value.as_object().unwrap();
        for key in [
            keys::ENABLED,
            keys::APPLY_ALL,
            keys::ALLOWLIST,
            keys::GAIN_VALUE,
            keys::EQ_BANDS,
            keys::CUSTOM_PRESETS,
            keys::LAST_PRESET,
            keys::REFRESH_MODE,
        ] {
            assert!(obj.contains_key(key), "missing key {key}");
        }
        assert_eq!(obj[keys::LAST_PRESET], "custom");
        assert_eq!(obj[keys::REFRESH_MODE], "fast");
    }
}
