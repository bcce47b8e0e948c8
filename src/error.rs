use std::path::PathBuf;

use thiserror::Error;

/// Fatal, per-image failures of the detection pipeline.
///
/// Everything here aborts the current image only. Local conditions such as an
/// out-of-bounds bubble region or a double-marked question are not errors;
/// they are reported as quality flags and warnings on the result values.
#[derive(Debug, Error)]
pub enum MarkscanError {
    /// Binarization and shape filtering produced no bubble candidates at all.
    #[error("no bubble candidates survived shape filtering")]
    InsufficientSignal,

    /// Row clustering did not yield enough structure to build a layout.
    /// Callers holding a fixed per-exam template may fall back to it.
    #[error("no usable sheet structure: {rows_found} rows clustered, at least {min_rows} required")]
    LayoutUndetected { rows_found: usize, min_rows: usize },

    /// Too few questions could be located, even after recovery.
    #[error("mapped {mapped} of {expected} questions, below the acceptable ratio {acceptable_ratio}")]
    MappingFailed {
        mapped: usize,
        expected: u32,
        acceptable_ratio: f32,
    },

    /// The sheet image could not be opened or decoded.
    #[error("failed to open sheet image {path}: {source}")]
    ImageOpen {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
}
