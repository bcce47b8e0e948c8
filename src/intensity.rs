use image::{GrayImage, Luma};
use imageproc::{
    contours::{find_contours, BorderType},
    contrast::otsu_level,
    distance_transform::Norm,
    morphology::{close, open},
    template_matching::{match_template, MatchTemplateMethod},
};
use serde::{Deserialize, Serialize};

use crate::{
    config::IntensityConfig,
    geometry::polygon_area,
    image_utils::{dark_ratio, mean_std},
    mapping::BubbleCoordinate,
};

/// Identifies one fill-intensity estimation method.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "camelCase")]
pub enum MethodId {
    DarknessRatio,
    MorphologicalFill,
    ContourArea,
    TemplateMatch,
    Statistical,
}

/// Whether the sampled region was usable. Degraded regions score zero
/// intensity instead of failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RegionQuality {
    Ok,
    OutOfBounds,
    Empty,
}

/// Raw pixel statistics of the sampled region.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegionStats {
    pub mean: f32,
    pub std_dev: f32,
    pub min: u8,
    pub max: u8,
    pub pixel_count: usize,
}

/// One method's fill estimate for one bubble. Recomputed on every call,
/// never cached.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BubbleIntensityResult {
    pub method: MethodId,
    pub intensity: f32,
    pub stats: RegionStats,
    pub quality: RegionQuality,
}

/// The circular pixel neighborhood of one bubble center, minus a thin edge
/// band so the printed outline does not read as a mark.
pub struct Region {
    /// Square patch around the center; pixels outside the circular mask are
    /// forced white so they never count as ink.
    patch: GrayImage,
    /// The in-mask samples.
    pixels: Vec<u8>,
    inner_radius: f32,
    quality: RegionQuality,
}

impl Region {
    pub fn quality(&self) -> RegionQuality {
        self.quality
    }

    pub fn stats(&self) -> RegionStats {
        let (mean, std_dev) = mean_std(&self.pixels);
        RegionStats {
            mean,
            std_dev,
            min: self.pixels.iter().copied().min().unwrap_or(0),
            max: self.pixels.iter().copied().max().unwrap_or(0),
            pixel_count: self.pixels.len(),
        }
    }
}

/// Samples the circular neighborhood of a bubble coordinate. Regions that
/// fall outside the image, or contain no pixels, come back flagged rather
/// than failing.
pub fn extract_region(
    img: &GrayImage,
    coordinate: &BubbleCoordinate,
    radius: u32,
    edge_band_fraction: f32,
) -> Region {
    let (cx, cy) = coordinate.center();
    let cx = cx.round() as i64;
    let cy = cy.round() as i64;
    let r = radius as i64;
    let inner_radius = radius as f32 * (1.0 - edge_band_fraction.clamp(0.0, 0.9));

    let side = (2 * r + 1) as u32;
    let mut patch = GrayImage::from_pixel(side, side, Luma([u8::MAX]));
    let mut pixels = Vec::new();

    let fully_outside = cx + r < 0
        || cy + r < 0
        || cx - r >= img.width() as i64
        || cy - r >= img.height() as i64;
    if fully_outside {
        return Region {
            patch,
            pixels,
            inner_radius,
            quality: RegionQuality::OutOfBounds,
        };
    }

    let mut clipped = false;
    for dy in -r..=r {
        for dx in -r..=r {
            let distance = ((dx * dx + dy * dy) as f32).sqrt();
            if distance > inner_radius {
                continue;
            }
            let x = cx + dx;
            let y = cy + dy;
            if x < 0 || y < 0 || x >= img.width() as i64 || y >= img.height() as i64 {
                clipped = true;
                continue;
            }
            let value = img.get_pixel(x as u32, y as u32).0[0];
            patch.put_pixel((dx + r) as u32, (dy + r) as u32, Luma([value]));
            pixels.push(value);
        }
    }

    let quality = if pixels.is_empty() {
        RegionQuality::Empty
    } else if clipped {
        RegionQuality::OutOfBounds
    } else {
        RegionQuality::Ok
    };

    Region {
        patch,
        pixels,
        inner_radius,
        quality,
    }
}

/// One way of estimating how marked a region is. The consensus resolver
/// holds a list of these with fixed weights, so methods can be added or
/// removed independently.
pub trait IntensityMethod: Send + Sync {
    fn id(&self) -> MethodId;
    fn score(&self, region: &Region) -> BubbleIntensityResult;
}

/// The standard method set, in the order their weights are defined.
pub fn standard_methods(config: &IntensityConfig) -> Vec<Box<dyn IntensityMethod>> {
    vec![
        Box::new(DarknessRatio {
            config: config.clone(),
        }),
        Box::new(MorphologicalFill),
        Box::new(ContourArea {
            noise_floor: config.contour_noise_floor,
        }),
        Box::new(TemplateMatch),
        Box::new(Statistical {
            config: config.clone(),
        }),
    ]
}

fn degraded(method: MethodId, region: &Region) -> BubbleIntensityResult {
    BubbleIntensityResult {
        method,
        intensity: 0.0,
        stats: region.stats(),
        quality: region.quality(),
    }
}

fn result(method: MethodId, intensity: f32, region: &Region) -> BubbleIntensityResult {
    BubbleIntensityResult {
        method,
        intensity: intensity.clamp(0.0, 1.0),
        stats: region.stats(),
        quality: RegionQuality::Ok,
    }
}

/// Tiered dark-pixel coverage. A bubble counts as marked once any
/// (coverage, darkness tier) pair is satisfied; the reported intensity is
/// floored when marked and capped when unmarked so values near the decision
/// thresholds do not flap.
struct DarknessRatio {
    config: IntensityConfig,
}

impl IntensityMethod for DarknessRatio {
    fn id(&self) -> MethodId {
        MethodId::DarknessRatio
    }

    fn score(&self, region: &Region) -> BubbleIntensityResult {
        if region.quality != RegionQuality::Ok {
            return degraded(self.id(), region);
        }
        let ratios = self
            .config
            .dark_levels
            .map(|level| dark_ratio(&region.pixels, level));
        let marked = ratios
            .iter()
            .zip(self.config.mark_ratios.iter())
            .any(|(ratio, required)| ratio >= required);
        // Medium-tier coverage is the raw fill estimate.
        let raw = ratios[2];
        let intensity = if marked {
            raw.max(self.config.marked_floor)
        } else {
            raw.min(self.config.unmarked_ceiling)
        };
        result(self.id(), intensity, region)
    }
}

/// Foreground fraction after closing and opening the binarized region,
/// which fills pen gaps and drops isolated specks.
struct MorphologicalFill;

impl IntensityMethod for MorphologicalFill {
    fn id(&self) -> MethodId {
        MethodId::MorphologicalFill
    }

    fn score(&self, region: &Region) -> BubbleIntensityResult {
        if region.quality != RegionQuality::Ok {
            return degraded(self.id(), region);
        }
        let binary = binarize_patch(&region.patch);
        let cleaned = open(&close(&binary, Norm::LInf, 1), Norm::LInf, 1);
        let foreground = cleaned.pixels().filter(|p| p.0[0] > 0).count();
        let intensity = foreground as f32 / region.pixels.len() as f32;
        result(self.id(), intensity, region)
    }
}

/// Summed contour area of inked blobs over the region area.
struct ContourArea {
    noise_floor: f32,
}

impl IntensityMethod for ContourArea {
    fn id(&self) -> MethodId {
        MethodId::ContourArea
    }

    fn score(&self, region: &Region) -> BubbleIntensityResult {
        if region.quality != RegionQuality::Ok {
            return degraded(self.id(), region);
        }
        let binary = binarize_patch(&region.patch);
        let inked = find_contours::<i32>(&binary)
            .iter()
            .filter(|contour| contour.border_type == BorderType::Outer)
            .map(|contour| polygon_area(&contour.points))
            .filter(|area| *area > self.noise_floor)
            .sum::<f32>();
        let intensity = inked / region.pixels.len() as f32;
        result(self.id(), intensity, region)
    }
}

/// Normalized cross-correlation against a synthetic filled disc of the
/// region's own radius.
struct TemplateMatch;

impl IntensityMethod for TemplateMatch {
    fn id(&self) -> MethodId {
        MethodId::TemplateMatch
    }

    fn score(&self, region: &Region) -> BubbleIntensityResult {
        if region.quality != RegionQuality::Ok {
            return degraded(self.id(), region);
        }
        // Work on inverted images (ink bright) so a blank region correlates
        // to zero instead of matching the template's white surround.
        let mut inverted = region.patch.clone();
        for pixel in inverted.pixels_mut() {
            pixel.0[0] = u8::MAX - pixel.0[0];
        }
        if inverted.pixels().all(|p| p.0[0] == 0) {
            return result(self.id(), 0.0, region);
        }

        let side = region.patch.width();
        let center = side as f32 / 2.0;
        let template = GrayImage::from_fn(side, side, |x, y| {
            let dx = x as f32 + 0.5 - center;
            let dy = y as f32 + 0.5 - center;
            if (dx * dx + dy * dy).sqrt() <= region.inner_radius {
                Luma([u8::MAX])
            } else {
                Luma([0])
            }
        });

        let scores = match_template(
            &inverted,
            &template,
            MatchTemplateMethod::CrossCorrelationNormalized,
        );
        let intensity = scores.get_pixel(0, 0).0[0];
        result(self.id(), intensity, region)
    }
}

/// Darkness-gated blend of normalized darkness and uniformity. Gating the
/// uniformity term by darkness keeps a blank-but-even region from scoring
/// and keeps the estimate monotone as more pixels darken.
struct Statistical {
    config: IntensityConfig,
}

impl IntensityMethod for Statistical {
    fn id(&self) -> MethodId {
        MethodId::Statistical
    }

    fn score(&self, region: &Region) -> BubbleIntensityResult {
        if region.quality != RegionQuality::Ok {
            return degraded(self.id(), region);
        }
        let stats = region.stats();
        let darkness = 1.0 - stats.mean / 255.0;
        let uniformity = (1.0 - stats.std_dev / self.config.uniformity_scale).clamp(0.0, 1.0);
        let w = self.config.darkness_weight;
        let intensity = darkness * (w + (1.0 - w) * uniformity);
        result(self.id(), intensity, region)
    }
}

// A patch with less gray spread than this has no ink to separate; Otsu on
// such a patch returns a degenerate level.
const MIN_PATCH_CONTRAST: u8 = 30;

/// Ink-as-foreground binarization of a patch by its own Otsu level.
fn binarize_patch(patch: &GrayImage) -> GrayImage {
    let mut out = GrayImage::new(patch.width(), patch.height());
    let min = patch.pixels().map(|p| p.0[0]).min().unwrap_or(0);
    let max = patch.pixels().map(|p| p.0[0]).max().unwrap_or(0);
    if max.saturating_sub(min) < MIN_PATCH_CONTRAST {
        return out;
    }
    let level = otsu_level(patch);
    for (x, y, pixel) in patch.enumerate_pixels() {
        let value = if pixel.0[0] <= level { u8::MAX } else { 0 };
        out.put_pixel(x, y, Luma([value]));
    }
    out
}
