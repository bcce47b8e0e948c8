use image::GrayImage;
use log::info;
use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::{
    config::DetectionConfig,
    consensus::{resolve_answers, ConsensusAnswer},
    error::MarkscanError,
    layout::{detect_layout, LayoutVariant},
    mapping::{map_coordinates, MappingWarning},
};

/// Everything the pipeline produces for one sheet image.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetInterpretation {
    pub layout_variant: LayoutVariant,
    pub expected_questions: u32,
    pub answers: Vec<ConsensusAnswer>,
    pub warnings: Vec<MappingWarning>,
}

/// Runs the whole per-image pipeline: discover the layout, map question
/// coordinates, and resolve every answer by multi-method consensus.
///
/// The pipeline is deterministic; the only concurrency is the per-question
/// intensity analysis, which is read-only against the image buffer.
#[time]
pub fn interpret_sheet(
    img: &GrayImage,
    expected_questions: u32,
    config: &DetectionConfig,
) -> Result<SheetInterpretation, MarkscanError> {
    let layout = detect_layout(img, config)?;
    let mapped = map_coordinates(&layout, expected_questions, config)?;
    let answers = resolve_answers(img, &mapped.questions, config);

    let answered = answers
        .iter()
        .filter(|a| a.resolution.option().is_some())
        .count();
    info!(
        "interpreted sheet: {} of {} questions answered",
        answered,
        answers.len()
    );

    Ok(SheetInterpretation {
        layout_variant: layout.variant,
        expected_questions,
        answers,
        warnings: mapped.warnings,
    })
}
