//! Core types and error definitions for cell_dataset.

use metadata::MetadataError;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("csv parse error at {path}: {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("image decode error at {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("channel plane {path} is {width}x{height}, expected {expected_width}x{expected_height}")]
    ShapeMismatch {
        path: PathBuf,
        width: u32,
        height: u32,
        expected_width: u32,
        expected_height: u32,
    },
    #[error(transparent)]
    Metadata(#[from] MetadataError),
    #[error("no single cells detected across the training partition")]
    NoCells,
    #[error("sampling class {class} has no image with detected cells")]
    EmptyClass { class: String },
    #[error("batch worker failed: {0}")]
    Worker(String),
    #[error("{0}")]
    Other(String),
}

/// Multi-channel image pixels in CHW layout, normalized to [0, 1].
#[derive(Debug, Clone)]
pub struct ImagePixels {
    pub width: u32,
    pub height: u32,
    pub channels: usize,
    pub data: Vec<f32>,
}

impl ImagePixels {
    /// Square crop of side `box_size` centered at (cx, cy), clamped so the
    /// window stays inside the image. Returns CHW data of shape
    /// [channels, box_size, box_size].
    pub fn crop(&self, cx: u32, cy: u32, box_size: usize) -> Vec<f32> {
        let w = self.width as usize;
        let h = self.height as usize;
        let side = box_size.min(w).min(h);
        let half = side / 2;
        let x0 = (cx as usize).saturating_sub(half).min(w - side);
        let y0 = (cy as usize).saturating_sub(half).min(h - side);

        let mut out = Vec::with_capacity(self.channels * box_size * box_size);
        for c in 0..self.channels {
            let plane = c * w * h;
            for y in 0..box_size {
                for x in 0..box_size {
                    // Windows shrunk by a small image repeat their last row/col.
                    let sy = y0 + y.min(side - 1);
                    let sx = x0 + x.min(side - 1);
                    out.push(self.data[plane + sy * w + sx]);
                }
            }
        }
        out
    }
}

/// Pixel coordinate of one detected cell center.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Location {
    pub x: f32,
    pub y: f32,
}

/// One worker batch: images with their keys, per-target class indices,
/// and the sampled single-cell locations.
#[derive(Debug, Clone)]
pub struct DatasetBatch {
    pub keys: Vec<String>,
    pub images: Vec<ImagePixels>,
    /// targets[row][target] = class index.
    pub targets: Vec<Vec<usize>>,
    pub locations: Vec<Vec<Location>>,
}

impl DatasetBatch {
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Which partition an inspection pass iterates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Frame {
    All,
    Train,
    Val,
}

impl Frame {
    pub fn parse(name: &str) -> Option<Frame> {
        match name {
            "all" => Some(Frame::All),
            "train" => Some(Frame::Train),
            "val" => Some(Frame::Val),
            _ => None,
        }
    }
}

/// Resolved file locations for one image record.
#[derive(Debug, Clone)]
pub struct ImagePaths {
    pub key: String,
    pub channels: Vec<PathBuf>,
    pub outline: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gradient_pixels() -> ImagePixels {
        // Single channel 8x8 ramp 0..64.
        let data: Vec<f32> = (0..64).map(|v| v as f32).collect();
        ImagePixels {
            width: 8,
            height: 8,
            channels: 1,
            data,
        }
    }

    #[test]
    fn crop_is_centered_when_fully_inside() {
        let pixels = gradient_pixels();
        let crop = pixels.crop(4, 4, 4);
        assert_eq!(crop.len(), 16);
        // Window starts at (2, 2): first element = 2*8 + 2.
        assert_eq!(crop[0], 18.0);
    }

    #[test]
    fn crop_clamps_at_the_border() {
        let pixels = gradient_pixels();
        let crop = pixels.crop(0, 0, 4);
        assert_eq!(crop[0], 0.0);
        let crop = pixels.crop(7, 7, 4);
        // Window clamped to start at (4, 4).
        assert_eq!(crop[0], 36.0);
    }
}
