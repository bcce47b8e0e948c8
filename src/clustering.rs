use log::{debug, trace};
use logging_timer::time;

use crate::{
    candidates::BubbleCandidate,
    config::DetectionConfig,
    geometry::{deltas_between, mean, median},
};

// Gap detection multipliers over the spacing statistics.
const GAP_MEAN_FACTOR: f32 = 1.5;
const GAP_MEDIAN_FACTOR: f32 = 1.8;

// Row tolerance widens 2% per member, capped at +50%.
const TOLERANCE_GROWTH_PER_MEMBER: f32 = 0.02;
const TOLERANCE_GROWTH_CAP: f32 = 1.5;

// Members below this shape confidence are dropped when a row close-out
// fails its size bounds.
const RETRY_CONFIDENCE_FLOOR: f32 = 0.5;

/// One horizontal band of bubbles, sorted by x ascending.
#[derive(Debug, Clone)]
pub struct Row {
    pub members: Vec<BubbleCandidate>,
}

impl Row {
    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    pub fn mean_y(&self) -> f32 {
        mean(&self.members.iter().map(|m| m.center.y).collect::<Vec<f32>>())
    }
}

/// A contiguous block of option-columns separated from its neighbors by a
/// spacing gap.
#[derive(Debug, Clone, PartialEq)]
pub struct Section {
    pub start_col: usize,
    pub end_col: usize,
    pub start_x: f32,
    pub end_x: f32,
}

/// Groups candidates into rows with a single y-sorted scan.
///
/// A row grows while the next candidate stays within a tolerance band around
/// the row's running mean y; the band widens slightly as the row grows. The
/// last row is accepted with as few as two members so a clipped bottom row
/// is not lost.
#[time]
pub fn cluster_rows(mut candidates: Vec<BubbleCandidate>, config: &DetectionConfig) -> Vec<Row> {
    candidates.sort_by(|a, b| {
        a.center
            .y
            .partial_cmp(&b.center.y)
            .expect("candidate centers are finite")
    });

    let mut rows: Vec<Row> = Vec::new();
    let mut current: Vec<BubbleCandidate> = Vec::new();
    let mut running_y = 0.0f32;

    for candidate in candidates {
        if current.is_empty() {
            running_y = candidate.center.y;
            current.push(candidate);
            continue;
        }

        let growth =
            (1.0 + TOLERANCE_GROWTH_PER_MEMBER * current.len() as f32).min(TOLERANCE_GROWTH_CAP);
        let tolerance = config.row_tolerance * growth;

        if (candidate.center.y - running_y).abs() <= tolerance {
            current.push(candidate);
            let ys = current.iter().map(|m| m.center.y).collect::<Vec<f32>>();
            running_y = mean(&ys);
        } else {
            if let Some(row) = close_row(std::mem::take(&mut current), config, false) {
                rows.push(row);
            }
            running_y = candidate.center.y;
            current.push(candidate);
        }
    }

    if let Some(row) = close_row(current, config, true) {
        rows.push(row);
    }

    debug!("clustered {} rows", rows.len());
    rows
}

/// Accepts, repairs, or drops a finished row.
fn close_row(members: Vec<BubbleCandidate>, config: &DetectionConfig, is_last: bool) -> Option<Row> {
    let min = if is_last { 2 } else { config.min_bubbles_per_row };

    let accept = |mut members: Vec<BubbleCandidate>| {
        members.sort_by(|a, b| {
            a.center
                .x
                .partial_cmp(&b.center.x)
                .expect("candidate centers are finite")
        });
        Some(Row { members })
    };

    if members.len() >= min && members.len() <= config.max_bubbles_per_row {
        return accept(members);
    }

    // One repair attempt: shed low-confidence members, then re-check.
    let filtered = members
        .iter()
        .filter(|m| m.confidence >= RETRY_CONFIDENCE_FLOOR)
        .cloned()
        .collect::<Vec<BubbleCandidate>>();
    if filtered.len() != members.len()
        && filtered.len() >= min
        && filtered.len() <= config.max_bubbles_per_row
    {
        trace!(
            "row retained after confidence filter: {} -> {} members",
            members.len(),
            filtered.len()
        );
        return accept(filtered);
    }

    trace!("dropped row with {} members", members.len());
    None
}

/// Infers per-column x positions and section boundaries from the accepted
/// rows.
///
/// Only reference rows, whose length matches the modal row length within the
/// configured tolerance, contribute to the column positions. A section break
/// is a spacing gap larger than both `1.5 × mean` and `1.8 × median` of all
/// consecutive column spacings; with fewer than two spacing samples the
/// whole sheet is a single section.
pub fn infer_columns(rows: &[Row], config: &DetectionConfig) -> (Vec<f32>, Vec<Section>) {
    let modal_len = modal_row_length(rows);
    let reference_rows = rows
        .iter()
        .filter(|row| row.len().abs_diff(modal_len) <= config.reference_row_tolerance)
        .collect::<Vec<&Row>>();

    let mut column_positions = Vec::with_capacity(modal_len);
    for col in 0..modal_len {
        let xs = reference_rows
            .iter()
            .filter_map(|row| row.members.get(col).map(|m| m.center.x))
            .collect::<Vec<f32>>();
        if !xs.is_empty() {
            column_positions.push(mean(&xs));
        }
    }

    let deltas = deltas_between(&column_positions);
    if deltas.len() < 2 {
        let sections = vec![section_over(&column_positions, 0, column_positions.len().saturating_sub(1))];
        return (column_positions, sections);
    }

    let gap_threshold = (GAP_MEAN_FACTOR * mean(&deltas)).max(GAP_MEDIAN_FACTOR * median(&deltas));

    let mut sections = Vec::new();
    let mut start = 0usize;
    for (i, delta) in deltas.iter().enumerate() {
        if *delta > gap_threshold {
            sections.push(section_over(&column_positions, start, i));
            start = i + 1;
        }
    }
    sections.push(section_over(&column_positions, start, column_positions.len() - 1));

    debug!(
        "inferred {} columns in {} sections (modal row length {}, {} reference rows)",
        column_positions.len(),
        sections.len(),
        modal_len,
        reference_rows.len()
    );

    (column_positions, sections)
}

fn section_over(column_positions: &[f32], start_col: usize, end_col: usize) -> Section {
    Section {
        start_col,
        end_col,
        start_x: column_positions.get(start_col).copied().unwrap_or(0.0),
        end_x: column_positions.get(end_col).copied().unwrap_or(0.0),
    }
}

/// The most common row length; ties resolve to the longer row.
fn modal_row_length(rows: &[Row]) -> usize {
    let mut counts = std::collections::BTreeMap::<usize, usize>::new();
    for row in rows {
        *counts.entry(row.len()).or_insert(0) += 1;
    }
    counts
        .into_iter()
        .max_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
        .map(|(len, _)| len)
        .unwrap_or(0)
}
