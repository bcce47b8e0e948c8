use image::GrayImage;
use imageproc::{point::Point, rect::Rect};
use log::info;
use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::{
    candidates::extract_bubble_candidates,
    clustering::{cluster_rows, infer_columns, Row, Section},
    config::DetectionConfig,
    error::MarkscanError,
};

/// Structural classification of the sheet. The tag only steers how the
/// coordinate mapper iterates and what gets logged; nothing else depends on
/// it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum LayoutVariant {
    MultiSection,
    TwoSection,
    WideSingle,
    StandardSingle,
    NarrowSingle,
}

/// What survives of a candidate once clustering is done: its center and box,
/// kept around so recovery can search bubbles that fell out of the rows.
#[derive(Debug, Clone, Copy)]
pub struct BubbleBox {
    pub center: Point<f32>,
    pub rect: Rect,
}

/// The inferred structure of one sheet image. Built once per image and read
/// by the coordinate mapper; carries no cross-call state.
#[derive(Debug, Clone)]
pub struct Layout {
    pub rows: Vec<Row>,
    pub column_positions: Vec<f32>,
    pub sections: Vec<Section>,
    pub variant: LayoutVariant,
    /// Every extracted candidate, including those not in any accepted row.
    pub bubbles: Vec<BubbleBox>,
}

/// Discovers the sheet's bubble layout without a per-exam template.
///
/// Fails with `LayoutUndetected` when clustering yields fewer than
/// `min_rows` rows; callers holding a fixed-template coordinate set for the
/// exam may fall back to it then.
#[time]
pub fn detect_layout(img: &GrayImage, config: &DetectionConfig) -> Result<Layout, MarkscanError> {
    let candidates = extract_bubble_candidates(img, config)?;
    let bubbles = candidates
        .iter()
        .map(|c| BubbleBox {
            center: c.center,
            rect: c.rect,
        })
        .collect::<Vec<BubbleBox>>();

    let rows = cluster_rows(candidates, config);
    if rows.len() < config.min_rows {
        return Err(MarkscanError::LayoutUndetected {
            rows_found: rows.len(),
            min_rows: config.min_rows,
        });
    }

    let (column_positions, sections) = infer_columns(&rows, config);
    let variant = classify_variant(sections.len(), column_positions.len());

    info!(
        "detected {:?} layout: {} rows, {} columns, {} sections",
        variant,
        rows.len(),
        column_positions.len(),
        sections.len()
    );

    Ok(Layout {
        rows,
        column_positions,
        sections,
        variant,
        bubbles,
    })
}

fn classify_variant(section_count: usize, column_count: usize) -> LayoutVariant {
    if section_count >= 3 {
        LayoutVariant::MultiSection
    } else if section_count == 2 {
        LayoutVariant::TwoSection
    } else if column_count >= 10 {
        LayoutVariant::WideSingle
    } else if column_count >= 5 {
        LayoutVariant::StandardSingle
    } else {
        LayoutVariant::NarrowSingle
    }
}

impl Layout {
    /// Mean y distance between consecutive rows; used to extrapolate rows
    /// past the clustered ones.
    pub fn row_pitch(&self) -> f32 {
        let ys = self.rows.iter().map(Row::mean_y).collect::<Vec<f32>>();
        let deltas = crate::geometry::deltas_between(&ys);
        if deltas.is_empty() {
            0.0
        } else {
            crate::geometry::mean(&deltas)
        }
    }

    /// Mean spacing between adjacent columns inside a section.
    pub fn column_pitch(&self) -> f32 {
        let mut spacings = Vec::new();
        for section in &self.sections {
            for col in section.start_col..section.end_col {
                if let (Some(a), Some(b)) = (
                    self.column_positions.get(col),
                    self.column_positions.get(col + 1),
                ) {
                    spacings.push(b - a);
                }
            }
        }
        if spacings.is_empty() {
            // Single-column fallback: bubble width stands in for the pitch.
            self.bubbles
                .first()
                .map(|b| b.rect.width() as f32)
                .unwrap_or(0.0)
        } else {
            crate::geometry::mean(&spacings)
        }
    }
}
