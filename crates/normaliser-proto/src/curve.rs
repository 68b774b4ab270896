use serde::{Deserialize, Deserializer, Serialize};

/// Lowest gain a band can hold, in dB.
pub const MIN_BAND_DB: i32 = -12;
/// Highest gain a band can hold, in dB.
pub const MAX_BAND_DB: i32 = 12;
/// Band count used when nothing has been persisted yet.
pub const DEFAULT_BAND_COUNT: usize = 10;

/// Per-band gains, low to high frequency.  Every value is kept inside
/// `[MIN_BAND_DB, MAX_BAND_DB]`; construction clamps instead of rejecting.
///
/// Serialises as a plain JSON array so it matches the `eqBands` storage key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct GainCurve(Vec<i32>);

impl GainCurve {
    pub fn new(bands: impl IntoIterator<Item = i32>) -> Self {
        Self(bands.into_iter().map(clamp_band).collect())
    }

    /// All-zero curve of `band_count` bands.
    pub fn flat(band_count: usize) -> Self {
        Self(vec![0; band_count])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn bands(&self) -> &[i32] {
        &self.0
    }

    pub fn get(&self, index: usize) -> Option<i32> {
        self.0.get(index).copied()
    }

    /// Copy of this curve with one band replaced.  An out-of-range index
    /// leaves the curve untouched.
    pub fn with_band(&self, index: usize, gain: i32) -> Self {
        let mut bands = self.0.clone();
        if let Some(slot) = bands.get_mut(index) {
            *slot = clamp_band(gain);
        }
        Self(bands)
    }

    pub fn into_vec(self) -> Vec<i32> {
        self.0
    }
}

impl Default for GainCurve {
    fn default() -> Self {
        Self::flat(DEFAULT_BAND_COUNT)
    }
}

impl From<Vec<i32>> for GainCurve {
    fn from(bands: Vec<i32>) -> Self {
        Self::new(bands)
    }
}

// Stored curves may come from older writers that kept floats or
// out-of-range values; normalise them on the way in.
impl<'de> Deserialize<'de> for GainCurve {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Vec::<f64>::deserialize(deserializer)?;
        Ok(Self::new(raw.into_iter().map(|v| {
            if v.is_finite() {
                v.round().clamp(i32::MIN as f64, i32::MAX as f64) as i32
            } else {
                0
            }
        })))
    }
}

fn clamp_band(gain: i32) -> i32 {
    gain.clamp(MIN_BAND_DB, MAX_BAND_DB)
}

/// Centre frequencies (Hz) used to label bands.  Carries no invariant beyond
/// ordering; bands beyond the table get a positional label.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyTable(Vec<f32>);

impl FrequencyTable {
    pub fn new(freqs: Vec<f32>) -> Self {
        Self(freqs)
    }

    pub fn get(&self, index: usize) -> Option<f32> {
        self.0.get(index).copied()
    }

    /// `"120Hz"` for a known band, `"B11"` past the end of the table.
    pub fn label(&self, index: usize) -> String {
        match self.get(index) {
            Some(hz) => format!("{}Hz", hz),
            None => format!("B{}", index + 1),
        }
    }
}

impl Default for FrequencyTable {
    fn default() -> Self {
        Self(vec![
            30.0, 60.0, 120.0, 240.0, 480.0, 960.0, 1920.0, 3840.0, 7680.0, 15360.0,
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_clamps_out_of_range_bands() {
        let curve = GainCurve::new([-40, -12, 0, 12, 99]);
        assert_eq!(curve.bands(), &[-12, -12, 0, 12, 12]);
    }

    #[test]
    fn test_with_band_preserves_order_and_ignores_bad_index() {
        let curve = GainCurve::new([1, 2, 3]);
        assert_eq!(curve.with_band(1, 20).bands(), &[1, 12, 3]);
        assert_eq!(curve.with_band(7, 5), curve);
    }

    #[test]
    fn test_deserialize_normalises_floats() {
        let curve: GainCurve = serde_json::from_str("[1.4, -2.6, 30, -13]").unwrap();
        assert_eq!(curve.bands(), &[1, -3, 12, -12]);
    }

    #[test]
    fn test_band_labels() {
        let table = FrequencyTable::default();
        assert_eq!(table.label(0), "30Hz");
        assert_eq!(table.label(9), "15360Hz");
        assert_eq!(table.label(10), "B11");
    }
}
