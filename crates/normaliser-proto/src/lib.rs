//! Shared vocabulary for the normaliser control panel: gain curves, preset
//! identifiers, persisted records, configuration and the processor wire
//! protocol.

pub mod config;
pub mod curve;
pub mod platform;
pub mod preset;
pub mod protocol;
pub mod state;

pub use curve::{FrequencyTable, GainCurve};
pub use preset::{BuiltinPreset, PresetId, PresetName};
pub use state::{AllowList, LocalState, RefreshMode, SyncState};
