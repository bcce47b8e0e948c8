use std::collections::BTreeMap;

use image::GrayImage;
use log::debug;
use logging_timer::time;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{
    config::{ConsensusConfig, DetectionConfig},
    intensity::{extract_region, standard_methods, BubbleIntensityResult, IntensityMethod, MethodId},
    mapping::Question,
};

/// Terminal outcome for one question.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum Resolution {
    /// Exactly one option crossed the detection threshold.
    Answered { option: char, confidence: f32 },
    /// No option crossed the detection threshold. The confidence reports the
    /// strongest mark evidence seen, so a clean blank scores low.
    Blank { confidence: f32 },
    /// More than one option crossed the detection threshold; the strongest
    /// wins with a reduced, never-zeroed confidence.
    Multiple { option: char, confidence: f32 },
}

impl Resolution {
    pub fn option(&self) -> Option<char> {
        match self {
            Resolution::Answered { option, .. } | Resolution::Multiple { option, .. } => {
                Some(*option)
            }
            Resolution::Blank { .. } => None,
        }
    }

    pub fn confidence(&self) -> f32 {
        match self {
            Resolution::Answered { confidence, .. }
            | Resolution::Blank { confidence }
            | Resolution::Multiple { confidence, .. } => *confidence,
        }
    }

    pub fn is_multiple(&self) -> bool {
        matches!(self, Resolution::Multiple { .. })
    }
}

/// The resolved answer for one question, with the per-method evidence that
/// produced it. Immutable once returned.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsensusAnswer {
    pub question_number: u32,
    pub resolution: Resolution,
    pub method_intensities: BTreeMap<char, BTreeMap<MethodId, f32>>,
}

/// One option's combined evidence.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoredOption {
    pub letter: char,
    pub intensity: f32,
    pub confidence: f32,
    pub per_method: Vec<BubbleIntensityResult>,
}

/// Combines per-method intensities with the fixed weights. The combined
/// intensity is the pure weighted mean; agreement between methods boosts
/// only the confidence.
pub fn combine_methods(results: &[BubbleIntensityResult], config: &ConsensusConfig) -> (f32, f32) {
    let weights = &config.method_weights;
    let weight_of = |method: MethodId| match method {
        MethodId::DarknessRatio => weights.darkness_ratio,
        MethodId::MorphologicalFill => weights.morphological_fill,
        MethodId::ContourArea => weights.contour_area,
        MethodId::TemplateMatch => weights.template_match,
        MethodId::Statistical => weights.statistical,
    };

    let total_weight = results.iter().map(|r| weight_of(r.method)).sum::<f32>();
    if total_weight <= 0.0 {
        return (0.0, 0.0);
    }
    let combined = results
        .iter()
        .map(|r| weight_of(r.method) * r.intensity)
        .sum::<f32>()
        / total_weight;

    let variance = results
        .iter()
        .map(|r| {
            let d = r.intensity - combined;
            d * d
        })
        .sum::<f32>()
        / results.len() as f32;

    let confidence = if variance < config.low_variance_bound {
        (combined * config.agreement_boost).min(1.0)
    } else {
        combined
    };

    (combined, confidence)
}

/// Decides one question from its options' combined evidence.
///
/// Each vote tier crossed adds one vote; most votes wins, ties break to the
/// higher combined intensity. The detection threshold comparison is
/// inclusive, and may be overridden per section.
pub fn resolve_scored(
    question_number: u32,
    section_index: usize,
    mut scored: Vec<ScoredOption>,
    config: &ConsensusConfig,
) -> ConsensusAnswer {
    let method_intensities = scored
        .iter()
        .map(|option| {
            (
                option.letter,
                option
                    .per_method
                    .iter()
                    .map(|r| (r.method, r.intensity))
                    .collect::<BTreeMap<MethodId, f32>>(),
            )
        })
        .collect::<BTreeMap<char, BTreeMap<MethodId, f32>>>();

    let votes_for = |intensity: f32| {
        config
            .vote_tiers
            .iter()
            .filter(|tier| intensity >= **tier)
            .count()
    };

    scored.sort_by(|a, b| {
        votes_for(b.intensity)
            .cmp(&votes_for(a.intensity))
            .then(
                b.intensity
                    .partial_cmp(&a.intensity)
                    .expect("intensities are finite"),
            )
            .then(a.letter.cmp(&b.letter))
    });

    let resolution = match scored.first() {
        None => Resolution::Blank { confidence: 0.0 },
        Some(winner) => {
            let threshold = config.threshold_for_section(section_index);
            let crossing = scored.iter().filter(|o| o.intensity >= threshold).count();
            if winner.intensity < threshold {
                Resolution::Blank {
                    confidence: winner.confidence,
                }
            } else if crossing > 1 {
                Resolution::Multiple {
                    option: winner.letter,
                    confidence: (winner.confidence * config.multiple_mark_penalty).max(f32::EPSILON),
                }
            } else {
                Resolution::Answered {
                    option: winner.letter,
                    confidence: winner.confidence,
                }
            }
        }
    };

    ConsensusAnswer {
        question_number,
        resolution,
        method_intensities,
    }
}

/// Scores and resolves one question against the image.
fn resolve_question(
    img: &GrayImage,
    question: &Question,
    methods: &[Box<dyn IntensityMethod>],
    config: &DetectionConfig,
) -> ConsensusAnswer {
    let scored = question
        .options
        .iter()
        .map(|(letter, coordinate)| {
            let region = extract_region(
                img,
                coordinate,
                config.bubble_radius,
                config.edge_band_fraction,
            );
            let per_method = methods
                .iter()
                .map(|method| method.score(&region))
                .collect::<Vec<BubbleIntensityResult>>();
            let (intensity, confidence) = combine_methods(&per_method, &config.consensus);
            ScoredOption {
                letter: *letter,
                intensity,
                confidence,
                per_method,
            }
        })
        .collect::<Vec<ScoredOption>>();

    resolve_scored(
        question.number,
        question.section_index,
        scored,
        &config.consensus,
    )
}

/// Resolves every question's answer. Questions are independent, read-only
/// lookups against the same buffer, so they run on the rayon pool and
/// gather back in question order. Calling this twice with the same inputs
/// returns identical results.
#[time]
pub fn resolve_answers(
    img: &GrayImage,
    questions: &BTreeMap<u32, Question>,
    config: &DetectionConfig,
) -> Vec<ConsensusAnswer> {
    let methods = standard_methods(&config.intensity);
    let mut answers = questions
        .par_iter()
        .map(|(_, question)| resolve_question(img, question, &methods, config))
        .collect::<Vec<ConsensusAnswer>>();
    answers.sort_by_key(|a| a.question_number);

    let multiples = answers
        .iter()
        .filter(|a| a.resolution.is_multiple())
        .count();
    if multiples > 0 {
        debug!("{} questions carry multiple marks", multiples);
    }

    answers
}
