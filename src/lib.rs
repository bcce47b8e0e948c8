//! Template-free optical mark recognition for multiple-choice answer sheets.
//!
//! Given a grayscale sheet image and an expected question count, the
//! pipeline discovers the bubble layout (rows, option-columns, and
//! side-by-side sections), maps question numbers to per-option pixel
//! coordinates with extrapolation for questions the clustering missed, and
//! decides each answer by combining several independent fill-intensity
//! estimates into a consensus with a confidence score.

pub mod candidates;
pub mod clustering;
pub mod config;
pub mod consensus;
pub mod error;
pub mod geometry;
pub mod image_utils;
pub mod intensity;
pub mod interpret;
pub mod layout;
pub mod mapping;

// Main entry points: layout detection, coordinate mapping, answer
// resolution, and the one-call pipeline.
pub use crate::config::{Binarization, ConsensusConfig, DetectionConfig, IntensityConfig};
pub use crate::consensus::{resolve_answers, ConsensusAnswer, Resolution};
pub use crate::error::MarkscanError;
pub use crate::interpret::{interpret_sheet, SheetInterpretation};
pub use crate::layout::{detect_layout, Layout, LayoutVariant};
pub use crate::mapping::{
    map_coordinates, BubbleCoordinate, MappedQuestions, MappingWarning, Question,
};
