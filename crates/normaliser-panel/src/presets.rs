//! Built-in curve templates and the user preset catalog.

use std::collections::BTreeMap;

use normaliser_proto::preset::InvalidPresetName;
use normaliser_proto::state::keys;
use normaliser_proto::{BuiltinPreset, GainCurve, PresetId, PresetName};
use tracing::{debug, info};

use crate::store::{StoreError, Tier};

#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    #[error(transparent)]
    InvalidName(#[from] InvalidPresetName),
    #[error("no user preset named {0:?}")]
    NotFound(String),
    #[error("preset catalog not persisted: {0}")]
    Storage(#[from] StoreError),
}

/// Template of a built-in shape, authored against ten bands.  `Custom` and
/// `Reset` have none and resolve flat.
pub fn template(preset: BuiltinPreset) -> &'static [i32] {
    match preset {
        BuiltinPreset::Custom | BuiltinPreset::Reset => &[],
        BuiltinPreset::Rock => &[4, 3, 2, 0, -2, -1, 1, 3, 4, 5],
        BuiltinPreset::Pop => &[0, 2, 3, 3, 1, -1, -1, 1, 2, 2],
        BuiltinPreset::Jazz => &[2, 3, 2, 1, 0, 1, 2, 3, 2, 1],
        BuiltinPreset::Rap => &[5, 4, 3, 1, -1, -1, 1, 3, 4, 5],
        BuiltinPreset::House => &[3, 4, 2, 0, -1, 0, 2, 3, 4, 3],
        BuiltinPreset::Bass => &[6, 5, 3, 1, 0, 0, 0, -1, -2, -3],
        BuiltinPreset::Treble => &[-3, -2, -1, 0, 0, 0, 1, 2, 3, 4],
        BuiltinPreset::Vocal => &[-2, 0, 2, 3, 3, 2, 1, 0, 0, -1],
        BuiltinPreset::Classical => &[0, 0, 0, 1, 2, 2, 1, 0, 0, 0],
        BuiltinPreset::Dance => &[3, 3, 2, 1, 0, 1, 2, 3, 4, 4],
    }
}

/// Fits `template` to `band_count` bands: index-for-index while the template
/// lasts, then its last value repeated.  No interpolation.
pub fn stretch(template: &[i32], band_count: usize) -> GainCurve {
    let Some(&last) = template.last() else {
        return GainCurve::flat(band_count);
    };
    GainCurve::new((0..band_count).map(|i| template.get(i).copied().unwrap_or(last)))
}

/// User presets, mirrored as a whole into the `customPresets` key of the
/// tier it was built with.
pub struct PresetCatalog {
    user: BTreeMap<String, GainCurve>,
    tier: Tier,
}

impl PresetCatalog {
    pub fn new(user: BTreeMap<String, GainCurve>, tier: Tier) -> Self {
        Self { user, tier }
    }

    /// Reads `customPresets`; missing or malformed data gives an empty
    /// catalog.
    pub async fn load(tier: Tier) -> Self {
        let user: BTreeMap<String, GainCurve> = match tier.read(keys::CUSTOM_PRESETS).await {
            Ok(Some(map)) => map,
            Ok(None) => BTreeMap::new(),
            Err(e) => {
                debug!("presets: could not read catalog: {}", e);
                BTreeMap::new()
            }
        };
        Self::new(user, tier)
    }

    pub fn resolve(&self, id: &PresetId, band_count: usize) -> Result<GainCurve, PresetError> {
        match id {
            PresetId::Builtin(builtin) => Ok(stretch(template(*builtin), band_count)),
            PresetId::User(name) => self
                .user
                .get(name)
                .cloned()
                .ok_or_else(|| PresetError::NotFound(name.clone())),
        }
    }

    /// Stores `curve` under `name` (replacing any preset of that name) and
    /// persists the whole catalog.  The in-memory catalog keeps the preset
    /// even if persisting fails.
    pub async fn save(&mut self, name: &str, curve: GainCurve) -> Result<PresetName, PresetError> {
        let name = PresetName::parse(name)?;
        self.user.insert(name.as_str().to_string(), curve);
        self.persist().await?;
        info!("presets: saved {:?}", name.as_str());
        Ok(name)
    }

    /// Removes `name`.  Returns false (and writes nothing) if it was absent.
    pub async fn delete(&mut self, name: &str) -> Result<bool, PresetError> {
        if self.user.remove(name).is_none() {
            return Ok(false);
        }
        self.persist().await?;
        info!("presets: deleted {:?}", name);
        Ok(true)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.user.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.user.keys().map(String::as_str)
    }

    /// Picker entries: built-ins in fixed order, then user presets by name.
    pub fn options(&self) -> Vec<(PresetId, String)> {
        BuiltinPreset::ALL
            .iter()
            .map(|b| PresetId::Builtin(*b))
            .chain(self.user.keys().map(|name| PresetId::User(name.clone())))
            .map(|id| {
                let label = id.label();
                (id, label)
            })
            .collect()
    }

    async fn persist(&self) -> Result<(), StoreError> {
        self.tier.write(keys::CUSTOM_PRESETS, &self.user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;
    use std::sync::Arc;

    fn catalog() -> (PresetCatalog, Arc<MemoryStore>) {
        let backend = Arc::new(MemoryStore::new());
        let tier = Tier::new("sync", backend.clone());
        (PresetCatalog::new(BTreeMap::new(), tier), backend)
    }

    #[test]
    fn test_stretch_length_and_values() {
        let template = [3, -1, 5];
        for n in 0..16 {
            let out = stretch(&template, n);
            assert_eq!(out.len(), n);
            for i in 0..n {
                let expected = if i < template.len() { template[i] } else { 5 };
                assert_eq!(out.get(i), Some(expected), "n={n} i={i}");
            }
        }
    }

    #[test]
    fn test_stretch_ten_band_template_to_fourteen() {
        let rock = stretch(template(BuiltinPreset::Rock), 14);
        assert_eq!(rock.bands(), &[4, 3, 2, 0, -2, -1, 1, 3, 4, 5, 5, 5, 5, 5]);

        let short = stretch(template(BuiltinPreset::Bass), 4);
        assert_eq!(short.bands(), &[6, 5, 3, 1]);
    }

    #[test]
    fn test_reset_and_custom_resolve_flat() {
        let (catalog, _) = catalog();
        for id in [BuiltinPreset::Reset, BuiltinPreset::Custom] {
            let curve = catalog.resolve(&PresetId::Builtin(id), 12).unwrap();
            assert_eq!(curve, GainCurve::flat(12));
        }
    }

    #[test]
    fn test_every_template_is_in_range() {
        for preset in BuiltinPreset::ALL {
            let t = template(preset);
            assert!(t.is_empty() || t.len() == 10, "{:?}", preset);
            assert_eq!(stretch(t, t.len()).bands(), t);
        }
    }

    #[tokio::test]
    async fn test_save_then_resolve_round_trips() {
        let (mut catalog, backend) = catalog();
        let curve = GainCurve::new(vec![1, -2, 3, -4, 5, -6, 7, -8, 9, -10, 11, -12]);

        let name = catalog.save("late-night", curve.clone()).await.unwrap();
        assert_eq!(name.as_str(), "late-night");
        let resolved = catalog
            .resolve(&PresetId::User("late-night".into()), curve.len())
            .unwrap();
        assert_eq!(resolved, curve);

        assert_eq!(
            backend.snapshot()[keys::CUSTOM_PRESETS],
            json!({ "late-night": [1, -2, 3, -4, 5, -6, 7, -8, 9, -10, 11, -12] })
        );
    }

    #[tokio::test]
    async fn test_save_persists_whole_catalog() {
        let (mut catalog, backend) = catalog();
        catalog.save("one", GainCurve::flat(2)).await.unwrap();
        catalog.save("two", GainCurve::new(vec![1, 1])).await.unwrap();

        let writes = backend.writes_of(keys::CUSTOM_PRESETS);
        assert_eq!(writes.len(), 2);
        assert_eq!(
            writes[1].entries[keys::CUSTOM_PRESETS],
            json!({ "one": [0, 0], "two": [1, 1] })
        );
    }

    #[tokio::test]
    async fn test_delete_then_resolve_is_not_found() {
        let (mut catalog, backend) = catalog();
        catalog.save("gone", GainCurve::flat(10)).await.unwrap();

        assert!(catalog.delete("gone").await.unwrap());
        let err = catalog
            .resolve(&PresetId::User("gone".into()), 10)
            .unwrap_err();
        assert!(matches!(err, PresetError::NotFound(name) if name == "gone"));

        // Absent name: no error, no write.
        let before = backend.writes().len();
        assert!(!catalog.delete("gone").await.unwrap());
        assert_eq!(backend.writes().len(), before);
    }

    #[tokio::test]
    async fn test_invalid_names_change_nothing() {
        let (mut catalog, backend) = catalog();
        let long = "x".repeat(21);
        for bad in ["", "a", long.as_str(), "has space", "semi;colon", "dots.too"] {
            let err = catalog.save(bad, GainCurve::flat(10)).await.unwrap_err();
            assert!(matches!(err, PresetError::InvalidName(_)), "{bad:?}");
        }
        assert_eq!(catalog.names().count(), 0);
        assert!(backend.writes().is_empty());

        for good in ["ab", "a-b-c", "Under_score9"] {
            catalog.save(good, GainCurve::flat(10)).await.unwrap();
        }
        assert_eq!(catalog.names().count(), 3);
    }

    #[tokio::test]
    async fn test_options_list_builtins_then_user_presets() {
        let (mut catalog, _) = catalog();
        catalog.save("zeta", GainCurve::flat(10)).await.unwrap();
        catalog.save("alpha", GainCurve::flat(10)).await.unwrap();

        let options = catalog.options();
        assert_eq!(options.len(), 14);
        assert_eq!(options[0].1, "Preset: Custom");
        assert_eq!(options[1].1, "Preset: Flat");
        assert_eq!(options[2].1, "Rock");
        assert_eq!(options[12], (PresetId::User("alpha".into()), "User: alpha".into()));
        assert_eq!(options[13].0.to_string(), "user:zeta");
    }

    #[tokio::test]
    async fn test_load_reads_custom_presets_key() {
        let backend = Arc::new(MemoryStore::with_entries(serde_json::Map::from_iter([(
            keys::CUSTOM_PRESETS.to_string(),
            json!({ "mine": [1, 2, 3] }),
        )])));
        let catalog = PresetCatalog::load(Tier::new("sync", backend)).await;
        assert!(catalog.contains("mine"));
        assert_eq!(
            catalog.resolve(&PresetId::User("mine".into()), 3).unwrap(),
            GainCurve::new(vec![1, 2, 3])
        );
    }
}
