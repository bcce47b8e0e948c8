use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// How the sheet image is turned into a marks-as-foreground binary image.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "method")]
pub enum Binarization {
    /// Global Otsu threshold. Works well for evenly lit scans.
    Otsu,
    /// Local mean threshold over a `(2 * block_radius + 1)²` window.
    /// More robust to shading gradients in photographed sheets.
    Adaptive { block_radius: u32 },
}

/// Tunables for the whole per-image pipeline.
///
/// Every threshold that varied across historical calibrations is a field
/// here rather than a constant; the named presets below bundle the
/// combinations that used to be separate processor implementations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DetectionConfig {
    /// Binarization method used by the candidate extractor.
    pub binarization: Binarization,

    /// Minimum contour area (px²) for a bubble candidate.
    pub min_bubble_area: f32,
    /// Maximum contour area (px²) for a bubble candidate.
    pub max_bubble_area: f32,
    /// Accepted width/height band is `[1 - tol, 1 + tol]`.
    pub aspect_ratio_tolerance: f32,
    /// Minimum circularity, `4π · area / perimeter²`.
    pub circularity_threshold: f32,
    /// Minimum solidity, `area / convex hull area`.
    pub solidity_threshold: f32,

    /// Base y-tolerance (px) when growing a row around its running mean.
    pub row_tolerance: f32,
    /// Rows with fewer members are dropped (the final row relaxes this to 2).
    pub min_bubbles_per_row: usize,
    /// Rows with more members are filtered by confidence before being dropped.
    pub max_bubbles_per_row: usize,
    /// A row is a column reference when its length is within this distance
    /// of the modal row length.
    pub reference_row_tolerance: usize,
    /// Fewer accepted rows than this fails layout detection.
    pub min_rows: usize,

    /// Direct mapping below this fraction of the expected question count is
    /// a failure; above it, missing questions are extrapolated.
    pub acceptable_mapping_ratio: f32,
    /// Option letters per question (clamped to 3..=5).
    pub expected_options_per_question: usize,

    /// Radius (px) of the sampled neighborhood around each bubble center.
    pub bubble_radius: u32,
    /// Outer fraction of the radius excluded from sampling, so the printed
    /// outline does not count as a mark.
    pub edge_band_fraction: f32,

    pub intensity: IntensityConfig,
    pub consensus: ConsensusConfig,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            binarization: Binarization::Otsu,
            min_bubble_area: 120.0,
            max_bubble_area: 4000.0,
            aspect_ratio_tolerance: 0.35,
            circularity_threshold: 0.55,
            solidity_threshold: 0.80,
            row_tolerance: 12.0,
            min_bubbles_per_row: 3,
            max_bubbles_per_row: 30,
            reference_row_tolerance: 1,
            min_rows: 5,
            acceptable_mapping_ratio: 0.85,
            expected_options_per_question: 5,
            bubble_radius: 12,
            edge_band_fraction: 0.15,
            intensity: IntensityConfig::default(),
            consensus: ConsensusConfig::default(),
        }
    }
}

impl DetectionConfig {
    /// Preset for dense 40+ question sheets: smaller bubbles packed into
    /// three or four column groups, so the layout gate wants more rows.
    pub fn dense_sheet() -> Self {
        Self {
            min_bubble_area: 80.0,
            max_bubble_area: 2500.0,
            row_tolerance: 9.0,
            min_rows: 10,
            ..Self::default()
        }
    }

    /// Preset for dim or unevenly lit photographs: local thresholding and
    /// looser shape gates.
    pub fn low_contrast() -> Self {
        Self {
            binarization: Binarization::Adaptive { block_radius: 12 },
            circularity_threshold: 0.45,
            solidity_threshold: 0.70,
            ..Self::default()
        }
    }
}

/// Tunables shared by the intensity estimation methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IntensityConfig {
    /// Gray cutoffs for the very-dark / dark / medium tiers.
    pub dark_levels: [u8; 3],
    /// Coverage ratios paired with `dark_levels`; meeting any pair marks the
    /// bubble.
    pub mark_ratios: [f32; 3],
    /// Reported intensity is raised to at least this once marked.
    pub marked_floor: f32,
    /// Reported intensity is capped at this while unmarked.
    pub unmarked_ceiling: f32,
    /// Standard deviation (gray levels) at which uniformity reaches zero.
    pub uniformity_scale: f32,
    /// Weight of the darkness term in the statistical method's blend.
    pub darkness_weight: f32,
    /// Contours smaller than this (px²) are ignored by the contour-area
    /// method.
    pub contour_noise_floor: f32,
}

impl Default for IntensityConfig {
    fn default() -> Self {
        Self {
            dark_levels: [64, 96, 128],
            mark_ratios: [0.35, 0.45, 0.55],
            marked_floor: 0.60,
            unmarked_ceiling: 0.35,
            uniformity_scale: 80.0,
            darkness_weight: 0.7,
            contour_noise_floor: 6.0,
        }
    }
}

/// Tunables for combining method intensities into per-question answers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConsensusConfig {
    pub method_weights: MethodWeights,
    /// Low / medium / high vote thresholds on the combined intensity. Each
    /// tier crossed adds one vote for the option.
    pub vote_tiers: [f32; 3],
    /// A winning option below this combined intensity resolves BLANK.
    /// The comparison is inclusive.
    pub detection_threshold: f32,
    /// Overrides of `detection_threshold` keyed by section index.
    pub per_section_thresholds: BTreeMap<usize, f32>,
    /// Confidence multiplier applied when more than one option crosses the
    /// detection threshold. Must stay above zero.
    pub multiple_mark_penalty: f32,
    /// Inter-method variance below this counts as agreement.
    pub low_variance_bound: f32,
    /// Confidence multiplier applied on agreement, capped at 1.0.
    pub agreement_boost: f32,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            method_weights: MethodWeights::default(),
            vote_tiers: [0.30, 0.50, 0.70],
            detection_threshold: 0.40,
            per_section_thresholds: BTreeMap::new(),
            multiple_mark_penalty: 0.65,
            low_variance_bound: 0.005,
            agreement_boost: 1.08,
        }
    }
}

impl ConsensusConfig {
    /// The detection threshold for a section, honoring any override.
    pub fn threshold_for_section(&self, section_index: usize) -> f32 {
        self.per_section_thresholds
            .get(&section_index)
            .copied()
            .unwrap_or(self.detection_threshold)
    }
}

/// Fixed per-method combination weights. Expected to sum to 1; the resolver
/// normalizes by the actual sum so edits here cannot skew intensities.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MethodWeights {
    pub darkness_ratio: f32,
    pub morphological_fill: f32,
    pub contour_area: f32,
    pub template_match: f32,
    pub statistical: f32,
}

impl Default for MethodWeights {
    fn default() -> Self {
        Self {
            darkness_ratio: 0.30,
            morphological_fill: 0.20,
            contour_area: 0.20,
            template_match: 0.15,
            statistical: 0.15,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_weights_sum_to_one() {
        let w = MethodWeights::default();
        let sum =
            w.darkness_ratio + w.morphological_fill + w.contour_area + w.template_match + w.statistical;
        assert!((sum - 1.0).abs() < 1e-6, "weights sum to {}", sum);
    }

    #[test]
    fn section_threshold_override() {
        let mut config = ConsensusConfig::default();
        config.per_section_thresholds.insert(2, 0.55);
        assert_eq!(config.threshold_for_section(0), config.detection_threshold);
        assert_eq!(config.threshold_for_section(2), 0.55);
    }

    #[test]
    fn config_round_trips_through_json() {
        let config = DetectionConfig::dense_sheet();
        let json = serde_json::to_string(&config).unwrap();
        let back: DetectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let config: DetectionConfig =
            serde_json::from_str(r#"{"minBubbleArea": 200.0}"#).unwrap();
        assert_eq!(config.min_bubble_area, 200.0);
        assert_eq!(config.max_bubble_area, DetectionConfig::default().max_bubble_area);
    }
}
