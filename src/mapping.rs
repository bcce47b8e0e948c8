use std::collections::BTreeMap;

use log::{debug, info, warn};
use logging_timer::time;
use serde::{Deserialize, Serialize};

use crate::{
    clustering::Section,
    config::DetectionConfig,
    error::MarkscanError,
    layout::Layout,
};

// Widening multipliers for the recovery search bands; the last pass may
// settle for two bubbles instead of three.
const RECOVERY_WIDENING: [f32; 4] = [1.0, 1.5, 2.0, 2.5];

const MAX_OPTIONS: usize = 5;
const MIN_OPTIONS_DIRECT: usize = 3;
const MIN_OPTIONS_RECOVERED: usize = 2;

/// Pixel-space box of one option bubble. Purely geometric; fill information
/// lives in the intensity results.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BubbleCoordinate {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

impl BubbleCoordinate {
    pub fn center(&self) -> (f32, f32) {
        (self.x + self.width / 2.0, self.y + self.height / 2.0)
    }
}

/// One question with its option bubbles, letters ascending with x.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Question {
    pub number: u32,
    pub row_index: usize,
    pub section_index: usize,
    pub options: BTreeMap<char, BubbleCoordinate>,
}

/// Non-fatal conditions surfaced by the mapper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum MappingWarning {
    /// Direct mapping fell short; the listed questions were extrapolated
    /// (or stayed missing) while the overall ratio remained acceptable.
    PartialMapping {
        recovered: Vec<u32>,
        unrecovered: Vec<u32>,
    },
}

/// The mapper's output: questions keyed by number, plus warnings.
#[derive(Debug, Clone)]
pub struct MappedQuestions {
    pub questions: BTreeMap<u32, Question>,
    pub warnings: Vec<MappingWarning>,
}

/// Assigns question numbers and per-option coordinates from a layout.
///
/// Sections are walked left to right, rows top to bottom within each
/// section, so numbering matches how such sheets are printed. Numbers are
/// 1-based, strictly increasing, and unique. Questions the clustering missed
/// are extrapolated from their section neighbors when enough of the sheet
/// mapped directly.
#[time]
pub fn map_coordinates(
    layout: &Layout,
    expected_questions: u32,
    config: &DetectionConfig,
) -> Result<MappedQuestions, MarkscanError> {
    let max_options = config.expected_options_per_question.clamp(MIN_OPTIONS_DIRECT, MAX_OPTIONS);
    let half_pitch = layout.column_pitch() / 2.0;

    let mut questions: BTreeMap<u32, Question> = BTreeMap::new();
    let mut next_number = 1u32;

    'sections: for (section_index, section) in layout.sections.iter().enumerate() {
        let (band_start, band_end) = section_band(section, half_pitch);
        for (row_index, row) in layout.rows.iter().enumerate() {
            if next_number > expected_questions {
                break 'sections;
            }
            let slice = row
                .members
                .iter()
                .filter(|m| m.center.x >= band_start && m.center.x <= band_end)
                .collect::<Vec<_>>();
            if slice.len() < MIN_OPTIONS_DIRECT {
                continue;
            }
            let coordinates = slice
                .iter()
                .map(|m| coordinate_of(m.rect))
                .collect::<Vec<BubbleCoordinate>>();
            let question = build_question(
                next_number,
                row_index,
                section_index,
                coordinates,
                max_options,
            );
            questions.insert(next_number, question);
            next_number += 1;
        }
    }

    let direct = questions.len();
    debug!(
        "mapped {} of {} questions directly",
        direct, expected_questions
    );

    if direct as u32 >= expected_questions {
        return Ok(MappedQuestions {
            questions,
            warnings: Vec::new(),
        });
    }

    let acceptable = config.acceptable_mapping_ratio;
    if (direct as f32) < acceptable * expected_questions as f32 {
        return Err(MarkscanError::MappingFailed {
            mapped: direct,
            expected: expected_questions,
            acceptable_ratio: acceptable,
        });
    }

    // Recovery: extrapolate each missing question from the geometric pattern
    // of its two nearest mapped predecessors in the same section.
    let mut recovered = Vec::new();
    let mut unrecovered = Vec::new();
    for number in 1..=expected_questions {
        if questions.contains_key(&number) {
            continue;
        }
        match recover_question(layout, &questions, number, max_options, config) {
            Some(question) => {
                info!("recovered question {} by extrapolation", number);
                questions.insert(number, question);
                recovered.push(number);
            }
            None => {
                warn!("could not recover question {}", number);
                unrecovered.push(number);
            }
        }
    }

    if (questions.len() as f32) < acceptable * expected_questions as f32 {
        return Err(MarkscanError::MappingFailed {
            mapped: questions.len(),
            expected: expected_questions,
            acceptable_ratio: acceptable,
        });
    }

    Ok(MappedQuestions {
        questions,
        warnings: vec![MappingWarning::PartialMapping {
            recovered,
            unrecovered,
        }],
    })
}

/// Locates a missing question by projecting the row-index delta of the two
/// most recent mapped questions in its section, then searching the retained
/// bubble list around the projected row inside the section's x band. The
/// search widens progressively; a synthesized question never has fewer than
/// two options.
fn recover_question(
    layout: &Layout,
    questions: &BTreeMap<u32, Question>,
    number: u32,
    max_options: usize,
    config: &DetectionConfig,
) -> Option<Question> {
    let previous = questions.range(..number).next_back().map(|(_, q)| q)?;
    let section_index = previous.section_index;
    let second = questions
        .range(..previous.number)
        .rev()
        .map(|(_, q)| q)
        .find(|q| q.section_index == section_index);

    let row_delta = second
        .map(|q| previous.row_index.saturating_sub(q.row_index))
        .unwrap_or(1)
        .max(1);
    let projected_row = previous.row_index + row_delta;

    let target_y = match layout.rows.get(projected_row) {
        Some(row) => row.mean_y(),
        None => {
            // Off the clustered rows; extrapolate from the last row's band.
            let last = layout.rows.last()?;
            let beyond = projected_row + 1 - layout.rows.len();
            last.mean_y() + layout.row_pitch() * beyond as f32
        }
    };

    let section = layout.sections.get(section_index)?;
    let half_pitch = layout.column_pitch() / 2.0;

    for (pass, widen) in RECOVERY_WIDENING.iter().enumerate() {
        let y_tolerance = config.row_tolerance * widen;
        let (band_start, band_end) = section_band(section, half_pitch * widen);
        let mut found = layout
            .bubbles
            .iter()
            .filter(|b| {
                (b.center.y - target_y).abs() <= y_tolerance
                    && b.center.x >= band_start
                    && b.center.x <= band_end
            })
            .collect::<Vec<_>>();
        found.sort_by(|a, b| {
            a.center
                .x
                .partial_cmp(&b.center.x)
                .expect("bubble centers are finite")
        });

        let last_pass = pass == RECOVERY_WIDENING.len() - 1;
        let needed = if last_pass {
            MIN_OPTIONS_RECOVERED
        } else {
            MIN_OPTIONS_DIRECT
        };
        if found.len() >= needed {
            let coordinates = found
                .iter()
                .map(|b| coordinate_of(b.rect))
                .collect::<Vec<BubbleCoordinate>>();
            return Some(build_question(
                number,
                projected_row,
                section_index,
                coordinates,
                max_options,
            ));
        }
    }
    None
}

/// Option letters are a gap-free prefix of A..=E assigned in x order.
fn build_question(
    number: u32,
    row_index: usize,
    section_index: usize,
    coordinates: Vec<BubbleCoordinate>,
    max_options: usize,
) -> Question {
    let options = coordinates
        .into_iter()
        .take(max_options)
        .enumerate()
        .map(|(i, coordinate)| ((b'A' + i as u8) as char, coordinate))
        .collect::<BTreeMap<char, BubbleCoordinate>>();
    Question {
        number,
        row_index,
        section_index,
        options,
    }
}

fn coordinate_of(rect: imageproc::rect::Rect) -> BubbleCoordinate {
    BubbleCoordinate {
        x: rect.left() as f32,
        y: rect.top() as f32,
        width: rect.width() as f32,
        height: rect.height() as f32,
    }
}

/// The x range a section claims, padded by half the column pitch so a row
/// with missing leading bubbles still slices correctly.
fn section_band(section: &Section, half_pitch: f32) -> (f32, f32) {
    (section.start_x - half_pitch, section.end_x + half_pitch)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidates::BubbleCandidate;
    use crate::clustering::Row;
    use crate::layout::{BubbleBox, Layout, LayoutVariant};
    use imageproc::point::Point;
    use imageproc::rect::Rect;

    fn candidate(x: f32, y: f32) -> BubbleCandidate {
        BubbleCandidate {
            rect: Rect::at(x as i32 - 10, y as i32 - 10).of_size(20, 20),
            center: Point::new(x, y),
            area: 300.0,
            aspect_ratio: 1.0,
            circularity: 0.9,
            solidity: 0.95,
            confidence: 0.9,
        }
    }

    /// Two sections of `cols` columns each, `rows` rows, 34px pitch.
    fn two_section_layout(rows: usize, cols: usize) -> Layout {
        let mut all = Vec::new();
        let mut layout_rows = Vec::new();
        let section_offset = cols as f32 * 34.0 + 80.0;
        for r in 0..rows {
            let y = 50.0 + r as f32 * 40.0;
            let mut members = Vec::new();
            for s in 0..2 {
                for c in 0..cols {
                    members.push(candidate(40.0 + s as f32 * section_offset + c as f32 * 34.0, y));
                }
            }
            all.extend(members.iter().cloned());
            layout_rows.push(Row { members });
        }
        let mut column_positions = Vec::new();
        for s in 0..2 {
            for c in 0..cols {
                column_positions.push(40.0 + s as f32 * section_offset + c as f32 * 34.0);
            }
        }
        let sections = vec![
            Section {
                start_col: 0,
                end_col: cols - 1,
                start_x: column_positions[0],
                end_x: column_positions[cols - 1],
            },
            Section {
                start_col: cols,
                end_col: 2 * cols - 1,
                start_x: column_positions[cols],
                end_x: column_positions[2 * cols - 1],
            },
        ];
        Layout {
            rows: layout_rows,
            column_positions,
            sections,
            variant: LayoutVariant::TwoSection,
            bubbles: all
                .iter()
                .map(|c| BubbleBox {
                    center: c.center,
                    rect: c.rect,
                })
                .collect(),
        }
    }

    #[test]
    fn numbering_is_section_major_and_contiguous() {
        let layout = two_section_layout(10, 5);
        let mapped = map_coordinates(&layout, 20, &DetectionConfig::default()).unwrap();
        assert_eq!(mapped.questions.len(), 20);
        assert!(mapped.warnings.is_empty());
        let numbers = mapped.questions.keys().copied().collect::<Vec<u32>>();
        assert_eq!(numbers, (1..=20).collect::<Vec<u32>>());
        // Q1 and Q11 are the same row in different sections.
        assert_eq!(mapped.questions[&1].row_index, 0);
        assert_eq!(mapped.questions[&1].section_index, 0);
        assert_eq!(mapped.questions[&11].row_index, 0);
        assert_eq!(mapped.questions[&11].section_index, 1);
    }

    #[test]
    fn option_letters_ascend_with_x() {
        let layout = two_section_layout(10, 5);
        let mapped = map_coordinates(&layout, 20, &DetectionConfig::default()).unwrap();
        for question in mapped.questions.values() {
            let letters = question.options.keys().copied().collect::<Vec<char>>();
            assert_eq!(letters, vec!['A', 'B', 'C', 'D', 'E']);
            let xs = question.options.values().map(|c| c.x).collect::<Vec<f32>>();
            let mut sorted = xs.clone();
            sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
            assert_eq!(xs, sorted);
        }
    }

    #[test]
    fn mapping_stops_at_the_expected_count() {
        let layout = two_section_layout(10, 5);
        let mapped = map_coordinates(&layout, 15, &DetectionConfig::default()).unwrap();
        assert_eq!(mapped.questions.len(), 15);
        assert_eq!(*mapped.questions.keys().last().unwrap(), 15);
    }

    #[test]
    fn far_too_few_rows_is_mapping_failed() {
        let layout = two_section_layout(5, 5);
        let result = map_coordinates(&layout, 40, &DetectionConfig::default());
        match result {
            Err(MarkscanError::MappingFailed { mapped, expected, .. }) => {
                assert_eq!(mapped, 10);
                assert_eq!(expected, 40);
            }
            other => panic!("expected MappingFailed, got {:?}", other.map(|m| m.questions.len())),
        }
    }

    #[test]
    fn missing_tail_questions_are_recovered_from_retained_bubbles() {
        let mut layout = two_section_layout(10, 5);
        // Remove the last two rows' members from section 1 so Q19/Q20 cannot
        // map directly; the bubbles stay in the retained list.
        let band_start = layout.sections[1].start_x - 17.0;
        for row in layout.rows.iter_mut().skip(8) {
            row.members.retain(|m| m.center.x < band_start);
        }
        let mapped = map_coordinates(&layout, 20, &DetectionConfig::default()).unwrap();
        assert_eq!(mapped.questions.len(), 20);
        assert_eq!(
            mapped.warnings,
            vec![MappingWarning::PartialMapping {
                recovered: vec![19, 20],
                unrecovered: vec![],
            }]
        );
        for number in [19u32, 20] {
            let question = &mapped.questions[&number];
            assert_eq!(question.section_index, 1);
            assert_eq!(question.options.len(), 5);
        }
        assert_eq!(mapped.questions[&19].row_index, 8);
        assert_eq!(mapped.questions[&20].row_index, 9);
    }

    #[test]
    fn recovery_never_duplicates_numbers() {
        let mut layout = two_section_layout(10, 5);
        let band_start = layout.sections[1].start_x - 17.0;
        for row in layout.rows.iter_mut().skip(9) {
            row.members.retain(|m| m.center.x < band_start);
        }
        let mapped = map_coordinates(&layout, 20, &DetectionConfig::default()).unwrap();
        let numbers = mapped.questions.keys().copied().collect::<Vec<u32>>();
        let mut unique = numbers.clone();
        unique.dedup();
        assert_eq!(numbers, unique);
        assert_eq!(numbers, (1..=20).collect::<Vec<u32>>());
    }
}
