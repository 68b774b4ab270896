//! The control panel: cold start, settings edits and preset selection on top
//! of the synchronizer, catalog, bridge and meter.
//!
//! Every edit follows the same order: in-memory state, then the
//! cross-device tier, then the processor.  A failed persist or send is
//! logged and never rolls the edit back.

use normaliser_proto::config::TimingConfig;
use normaliser_proto::state::keys;
use normaliser_proto::{
    AllowList, BuiltinPreset, FrequencyTable, GainCurve, PresetId, RefreshMode,
};
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::bridge::{BridgeError, LivenessFlag, MessagingBridge};
use crate::meter::{MeterCadence, MeterPoller};
use crate::presets::{PresetCatalog, PresetError};
use crate::store::Tiers;
use crate::sync::EqSynchronizer;

/// Result of a processor send, after the local side already happened.
pub type Delivery = Result<bool, BridgeError>;

pub struct ControlPanel {
    enabled: bool,
    apply_all: bool,
    allowlist: AllowList,
    gain: f32,
    selected: PresetId,
    refresh_mode: watch::Sender<RefreshMode>,
    frequencies: FrequencyTable,
    tiers: Tiers,
    bridge: MessagingBridge,
    eq: EqSynchronizer,
    presets: PresetCatalog,
    cadence: MeterCadence,
}

impl ControlPanel {
    /// Loads persisted state and restores the last preset selection.
    pub async fn open(tiers: Tiers, bridge: MessagingBridge, timing: &TimingConfig) -> Self {
        let state = tiers.load_sync_state().await;
        let local = tiers.load_local_state().await;
        let curve = match local.eq_bands {
            Some(curve) => {
                debug!("panel: using local eqBands");
                curve
            }
            None => state.eq_bands,
        };

        // Hint stays up until the first exchange succeeds.
        bridge.liveness().mark_degraded();

        let (refresh_mode, _) = watch::channel(state.refresh_mode);
        let mut panel = Self {
            enabled: state.enabled,
            apply_all: state.apply_all,
            allowlist: state.allowlist,
            gain: state.gain_value,
            selected: state.last_preset.clone(),
            refresh_mode,
            frequencies: FrequencyTable::default(),
            eq: EqSynchronizer::new(curve, tiers.clone(), bridge.clone(), timing),
            presets: PresetCatalog::new(state.custom_presets, tiers.sync.clone()),
            tiers,
            bridge,
            cadence: MeterCadence::from(timing),
        };

        let restored = panel.curve_for(&state.last_preset);
        if restored != panel.eq.current() {
            info!("panel: restoring preset {}", state.last_preset);
            panel.eq.update(restored);
        }
        panel
    }

    // ── read side ─────────────────────────────────────────────────────────────

    pub fn enabled(&self) -> bool {
        self.enabled
    }

    pub fn apply_all(&self) -> bool {
        self.apply_all
    }

    pub fn allowlist(&self) -> &AllowList {
        &self.allowlist
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn gain_label(&self) -> String {
        format!("{:.1}x", self.gain)
    }

    pub fn curve(&self) -> GainCurve {
        self.eq.current()
    }

    /// `(label, gain)` per band, low to high.
    pub fn bands(&self) -> Vec<(String, i32)> {
        self.eq
            .current()
            .bands()
            .iter()
            .enumerate()
            .map(|(i, gain)| (self.frequencies.label(i), *gain))
            .collect()
    }

    pub fn selected_preset(&self) -> &PresetId {
        &self.selected
    }

    pub fn presets(&self) -> &PresetCatalog {
        &self.presets
    }

    pub fn refresh_mode(&self) -> RefreshMode {
        *self.refresh_mode.borrow()
    }

    pub fn liveness(&self) -> &LivenessFlag {
        self.bridge.liveness()
    }

    pub fn equalizer(&self) -> &EqSynchronizer {
        &self.eq
    }

    // ── settings ──────────────────────────────────────────────────────────────

    pub async fn set_gain(&mut self, value: f32) -> Delivery {
        self.gain = value;
        self.persist(keys::GAIN_VALUE, &value).await;
        self.bridge.set_gain(value).await
    }

    pub async fn set_enabled(&mut self, value: bool) -> Delivery {
        self.enabled = value;
        self.persist(keys::ENABLED, &value).await;
        self.bridge.set_enabled(value).await
    }

    pub async fn set_apply_all(&mut self, value: bool) -> Delivery {
        self.apply_all = value;
        self.persist(keys::APPLY_ALL, &value).await;
        self.bridge.set_apply_all(value).await
    }

    /// Appends a host (trimmed, lower-cased).  Empty input and hosts already
    /// listed change nothing and return `None`.
    pub async fn add_site(&mut self, host: &str) -> Option<Delivery> {
        if !self.allowlist.insert(host) {
            return None;
        }
        Some(self.publish_allowlist().await)
    }

    /// Removes the host at `index`; out of range is a no-op.
    pub async fn remove_site(&mut self, index: usize) -> Option<Delivery> {
        let removed = self.allowlist.remove_at(index)?;
        debug!("panel: removed {:?} from allowlist", removed);
        Some(self.publish_allowlist().await)
    }

    pub async fn remove_host(&mut self, host: &str) -> Option<Delivery> {
        let index = self.allowlist.position(host)?;
        self.remove_site(index).await
    }

    /// Hostname of `url`, for pre-filling the allow-list input.  Empty when
    /// `url` does not parse or has no host.
    pub fn host_suggestion(url: &str) -> String {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
            .unwrap_or_default()
    }

    pub async fn resume_audio(&self) -> Delivery {
        self.bridge.resume_audio().await
    }

    /// Analyser levels from the processor; also a cheap liveness probe.
    pub async fn spectrum(&self) -> Result<Vec<f32>, BridgeError> {
        self.bridge.spectrum().await
    }

    pub async fn set_refresh_mode(&mut self, mode: RefreshMode) {
        self.refresh_mode.send_replace(mode);
        self.persist(keys::REFRESH_MODE, &mode).await;
    }

    // ── equalizer & presets ───────────────────────────────────────────────────

    /// Merges one band edit.  The curve no longer matches any preset, so the
    /// selection moves to `custom`.  `None` (and no edit) when `index` is
    /// past the last band.
    pub async fn set_band(&mut self, index: usize, gain: i32) -> Option<GainCurve> {
        if index >= self.eq.band_count() {
            return None;
        }
        let curve = self.eq.set_band(index, gain);
        if self.selected != PresetId::default() {
            self.selected = PresetId::default();
            let selected = self.selected.clone();
            self.persist(keys::LAST_PRESET, &selected).await;
        }
        Some(curve)
    }

    /// Persists the selection, then feeds the resolved curve to the
    /// synchronizer.  `custom` keeps the current curve.
    pub async fn apply_preset(&mut self, id: PresetId) {
        self.selected = id.clone();
        self.persist(keys::LAST_PRESET, &id).await;
        if id == PresetId::Builtin(BuiltinPreset::Custom) {
            return;
        }
        let curve = self.curve_for(&id);
        self.eq.update(curve);
    }

    /// Saves the current curve as `name` and selects it.
    pub async fn save_preset(&mut self, name: &str) -> Result<(), PresetError> {
        let saved = self.presets.save(name, self.eq.current()).await;
        let name = match saved {
            Ok(name) => name,
            // Kept in memory; the tier already reported the failure.
            Err(PresetError::Storage(_)) => normaliser_proto::PresetName::parse(name)?,
            Err(e) => return Err(e),
        };
        let id = PresetId::user(&name);
        self.selected = id.clone();
        self.persist(keys::LAST_PRESET, &id).await;
        Ok(())
    }

    /// Deletes `name`; when it was selected the selection falls back to
    /// `custom`.  Returns whether a preset was removed.
    pub async fn delete_preset(&mut self, name: &str) -> bool {
        let removed = match self.presets.delete(name).await {
            Ok(removed) => removed,
            Err(e) => {
                debug!("panel: delete of {:?} not persisted: {}", name, e);
                !self.presets.contains(name)
            }
        };
        if removed && self.selected == PresetId::User(name.to_string()) {
            self.selected = PresetId::default();
            let selected = self.selected.clone();
            self.persist(keys::LAST_PRESET, &selected).await;
        }
        removed
    }

    // ── lifecycle ─────────────────────────────────────────────────────────────

    /// Starts the meter loop; it follows later `set_refresh_mode` calls.
    pub fn start_meter(&self) -> MeterPoller {
        MeterPoller::spawn(
            self.bridge.clone(),
            self.refresh_mode.subscribe(),
            self.cadence,
        )
    }

    /// Writes out any pending curve edit immediately.
    pub async fn flush(&self) {
        self.eq.flush().await;
    }

    fn curve_for(&self, id: &PresetId) -> GainCurve {
        let band_count = self.eq.band_count();
        if *id == PresetId::Builtin(BuiltinPreset::Custom) {
            return self.eq.current();
        }
        match self.presets.resolve(id, band_count) {
            Ok(curve) => curve,
            Err(e) => {
                debug!("panel: {}, using flat curve", e);
                GainCurve::flat(band_count)
            }
        }
    }

    async fn publish_allowlist(&mut self) -> Delivery {
        self.persist(keys::ALLOWLIST, &self.allowlist).await;
        self.bridge.update_allowlist(self.allowlist.clone()).await
    }

    async fn persist<T: Serialize + ?Sized + Sync>(&self, key: &str, value: &T) {
        if let Err(e) = self.tiers.sync.write(key, value).await {
            debug!("panel: {} not persisted: {}", key, e);
        }
    }
}
