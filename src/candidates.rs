use std::f32::consts::PI;

use image::GrayImage;
use imageproc::{
    contours::{find_contours, BorderType, Contour},
    geometry::{arc_length, convex_hull},
    point::Point,
    rect::Rect,
};
use log::debug;
use logging_timer::time;

use crate::{
    config::DetectionConfig,
    error::MarkscanError,
    geometry::{center_of_rect, polygon_area},
    image_utils::binarize_marks,
};

// Blend weights for the shape-confidence score.
const AREA_WEIGHT: f32 = 0.20;
const CIRCULARITY_WEIGHT: f32 = 0.45;
const SOLIDITY_WEIGHT: f32 = 0.35;

/// A contour that passed the bubble shape gates. Only the center and the
/// bounding box outlive clustering.
#[derive(Debug, Clone)]
pub struct BubbleCandidate {
    pub rect: Rect,
    pub center: Point<f32>,
    pub area: f32,
    pub aspect_ratio: f32,
    pub circularity: f32,
    pub solidity: f32,
    pub confidence: f32,
}

/// Finds bubble-shaped contours in a grayscale sheet image.
///
/// The output carries no ordering guarantee. Fails with
/// `InsufficientSignal` when nothing bubble-shaped is found, which is fatal
/// for the image.
#[time]
pub fn extract_bubble_candidates(
    img: &GrayImage,
    config: &DetectionConfig,
) -> Result<Vec<BubbleCandidate>, MarkscanError> {
    let binary = binarize_marks(img, &config.binarization);
    let contours = find_contours::<i32>(&binary);

    let candidates = contours
        .iter()
        .filter(|contour| contour.border_type == BorderType::Outer)
        .filter_map(|contour| score_contour(contour, config))
        .collect::<Vec<BubbleCandidate>>();

    debug!(
        "extracted {} bubble candidates from {} contours",
        candidates.len(),
        contours.len()
    );

    if candidates.is_empty() {
        return Err(MarkscanError::InsufficientSignal);
    }
    Ok(candidates)
}

/// Applies the area, aspect, circularity, and solidity gates to one contour.
fn score_contour(contour: &Contour<i32>, config: &DetectionConfig) -> Option<BubbleCandidate> {
    if contour.points.len() < 3 {
        return None;
    }

    let area = polygon_area(&contour.points);
    if area < config.min_bubble_area || area > config.max_bubble_area {
        return None;
    }

    let rect = bounding_rect(&contour.points);
    let aspect_ratio = rect.width() as f32 / rect.height() as f32;
    if (aspect_ratio - 1.0).abs() > config.aspect_ratio_tolerance {
        return None;
    }

    let perimeter = arc_length(&contour.points, true) as f32;
    if perimeter <= 0.0 {
        return None;
    }
    let circularity = 4.0 * PI * area / (perimeter * perimeter);
    if circularity < config.circularity_threshold {
        return None;
    }

    let hull = convex_hull(contour.points.as_slice());
    let hull_area = polygon_area(&hull);
    if hull_area <= 0.0 {
        return None;
    }
    let solidity = area / hull_area;
    if solidity < config.solidity_threshold {
        return None;
    }

    // Area scores highest in the middle of the accepted band.
    let band_mid = (config.min_bubble_area + config.max_bubble_area) / 2.0;
    let band_half = (config.max_bubble_area - config.min_bubble_area) / 2.0;
    let area_score = (1.0 - (area - band_mid).abs() / band_half).clamp(0.0, 1.0);

    let confidence = (AREA_WEIGHT * area_score
        + CIRCULARITY_WEIGHT * circularity.min(1.0)
        + SOLIDITY_WEIGHT * solidity.min(1.0))
    .clamp(0.0, 1.0);

    Some(BubbleCandidate {
        rect,
        center: center_of_rect(&rect),
        area,
        aspect_ratio,
        circularity,
        solidity,
        confidence,
    })
}

fn bounding_rect(points: &[Point<i32>]) -> Rect {
    let min_x = points.iter().map(|p| p.x).min().unwrap_or(0);
    let max_x = points.iter().map(|p| p.x).max().unwrap_or(0);
    let min_y = points.iter().map(|p| p.y).min().unwrap_or(0);
    let max_y = points.iter().map(|p| p.y).max().unwrap_or(0);
    Rect::at(min_x, min_y).of_size((max_x - min_x + 1) as u32, (max_y - min_y + 1) as u32)
}
