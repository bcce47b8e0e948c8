//! Renders synthetic answer-sheet images for the end-to-end tests: printed
//! bubble outlines laid out in aligned rows across one or more sections,
//! with configurable per-bubble fill levels.

use std::collections::BTreeMap;

use image::{GrayImage, Luma};
use imageproc::drawing::{draw_filled_circle_mut, draw_hollow_circle_mut};

const PAPER: Luma<u8> = Luma([255]);
const OUTLINE: Luma<u8> = Luma([0]);
const INK: Luma<u8> = Luma([10]);

pub struct SheetSpec {
    /// Questions per section, left to right.
    pub section_questions: Vec<usize>,
    /// Option bubbles per question.
    pub options: usize,
    pub bubble_radius: i32,
    pub column_pitch: i32,
    pub row_pitch: i32,
    /// Extra horizontal space between sections, beyond the column pitch.
    pub section_gap: i32,
    pub origin: (i32, i32),
}

impl SheetSpec {
    pub fn standard(section_questions: &[usize], options: usize) -> Self {
        Self {
            section_questions: section_questions.to_vec(),
            options,
            bubble_radius: 10,
            column_pitch: 34,
            row_pitch: 40,
            section_gap: 70,
            origin: (50, 50),
        }
    }

    pub fn question_count(&self) -> u32 {
        self.section_questions.iter().sum::<usize>() as u32
    }

    fn section_width(&self) -> i32 {
        (self.options as i32 - 1) * self.column_pitch
    }

    fn section_x(&self, section: usize) -> i32 {
        let stride = self.section_width() + self.column_pitch + self.section_gap;
        self.origin.0 + section as i32 * stride
    }

    /// Section index and row index (within the section) of a 1-based
    /// question number, matching section-major numbering.
    pub fn locate(&self, number: u32) -> (usize, usize) {
        let mut remaining = number as usize - 1;
        for (section, count) in self.section_questions.iter().enumerate() {
            if remaining < *count {
                return (section, remaining);
            }
            remaining -= count;
        }
        panic!("question {} is beyond the sheet", number);
    }

    pub fn center_of(&self, number: u32, option_index: usize) -> (i32, i32) {
        let (section, row) = self.locate(number);
        (
            self.section_x(section) + option_index as i32 * self.column_pitch,
            self.origin.1 + row as i32 * self.row_pitch,
        )
    }

    pub fn canvas_size(&self) -> (u32, u32) {
        let sections = self.section_questions.len() as i32;
        let stride = self.section_width() + self.column_pitch + self.section_gap;
        let width = 2 * self.origin.0 + (sections - 1) * stride + self.section_width();
        let rows = self.section_questions.iter().copied().max().unwrap_or(0) as i32;
        let height = 2 * self.origin.1 + (rows - 1).max(0) * self.row_pitch;
        (width as u32, height as u32)
    }
}

/// Renders the sheet. `fills` maps (question number, option index) to a
/// fill level in [0, 1]; absent bubbles stay empty outlines.
pub fn render(sheet: &SheetSpec, fills: &BTreeMap<(u32, usize), f32>) -> GrayImage {
    let (width, height) = sheet.canvas_size();
    let mut img = GrayImage::from_pixel(width, height, PAPER);

    for number in 1..=sheet.question_count() {
        for option_index in 0..sheet.options {
            let (cx, cy) = sheet.center_of(number, option_index);
            draw_hollow_circle_mut(&mut img, (cx, cy), sheet.bubble_radius, OUTLINE);
            draw_hollow_circle_mut(&mut img, (cx, cy), sheet.bubble_radius - 1, OUTLINE);

            if let Some(level) = fills.get(&(number, option_index)) {
                let level = level.clamp(0.0, 1.0);
                let radius = (sheet.bubble_radius as f32 * level.sqrt()).round() as i32;
                if radius > 0 {
                    draw_filled_circle_mut(&mut img, (cx, cy), radius, INK);
                }
            }
        }
    }

    img
}

/// Fill one option of every question at the same level.
pub fn all_filled(sheet: &SheetSpec, option_index: usize, level: f32) -> BTreeMap<(u32, usize), f32> {
    (1..=sheet.question_count())
        .map(|number| ((number, option_index), level))
        .collect()
}
