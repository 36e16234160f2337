//! Pixel loading: channel planes stacked into normalized CHW buffers.

use crate::types::{DatasetError, DatasetResult, ImagePixels};
use std::path::{Path, PathBuf};

/// Capability seam for pixel I/O. The dataset treats image decoding as an
/// external collaborator so tests and alternative storage layers can
/// substitute their own reader.
pub trait PixelSource: Send + Sync {
    /// Reads one multi-channel image: one grayscale plane per channel
    /// path, all of identical dimensions, optionally masked by an outline
    /// image (pixels outside any object are zeroed).
    fn read(&self, channels: &[PathBuf], outline: Option<&Path>) -> DatasetResult<ImagePixels>;
}

/// Reads channel planes from disk with the `image` crate. Planes are
/// converted to 16-bit grayscale and normalized to [0, 1].
#[derive(Debug, Default, Clone)]
pub struct FileImageReader;

impl FileImageReader {
    fn open_plane(path: &Path) -> DatasetResult<(u32, u32, Vec<f32>)> {
        let decoded = image::open(path).map_err(|e| DatasetError::Image {
            path: path.to_path_buf(),
            source: e,
        })?;
        let plane = decoded.to_luma16();
        let (width, height) = plane.dimensions();
        let data = plane
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / u16::MAX as f32)
            .collect();
        Ok((width, height, data))
    }
}

impl PixelSource for FileImageReader {
    fn read(&self, channels: &[PathBuf], outline: Option<&Path>) -> DatasetResult<ImagePixels> {
        let first = channels.first().ok_or_else(|| {
            DatasetError::Other("image record has no channel paths".to_string())
        })?;
        let (width, height, mut data) = Self::open_plane(first)?;
        data.reserve((channels.len() - 1) * data.len());

        for path in &channels[1..] {
            let (w, h, plane) = Self::open_plane(path)?;
            if w != width || h != height {
                return Err(DatasetError::ShapeMismatch {
                    path: path.clone(),
                    width: w,
                    height: h,
                    expected_width: width,
                    expected_height: height,
                });
            }
            data.extend(plane);
        }

        let mut pixels = ImagePixels {
            width,
            height,
            channels: channels.len(),
            data,
        };

        if let Some(outline_path) = outline {
            apply_outline_mask(&mut pixels, outline_path)?;
        }
        Ok(pixels)
    }
}

/// Zeroes every pixel the outline mask marks as background (mask == 0),
/// across all channels.
fn apply_outline_mask(pixels: &mut ImagePixels, path: &Path) -> DatasetResult<()> {
    let decoded = image::open(path).map_err(|e| DatasetError::Image {
        path: path.to_path_buf(),
        source: e,
    })?;
    let mask = decoded.to_luma8();
    let (w, h) = mask.dimensions();
    if w != pixels.width || h != pixels.height {
        return Err(DatasetError::ShapeMismatch {
            path: path.to_path_buf(),
            width: w,
            height: h,
            expected_width: pixels.width,
            expected_height: pixels.height,
        });
    }
    let plane_len = (w * h) as usize;
    let mask = mask.into_raw();
    for c in 0..pixels.channels {
        let offset = c * plane_len;
        for (i, m) in mask.iter().enumerate() {
            if *m == 0 {
                pixels.data[offset + i] = 0.0;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DatasetError;
    use image::{ImageBuffer, Luma};

    fn write_plane(path: &Path, size: u32, shade: u8) {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> =
            ImageBuffer::from_pixel(size, size, Luma([shade]));
        img.save(path).unwrap();
    }

    /// Left half background (0), right half object (255).
    fn write_mask(path: &Path, size: u32) {
        let img: ImageBuffer<Luma<u8>, Vec<u8>> = ImageBuffer::from_fn(size, size, |x, _| {
            Luma([if x < size / 2 { 0 } else { 255 }])
        });
        img.save(path).unwrap();
    }

    #[test]
    fn outline_mask_zeroes_background_across_channels() {
        let tmp = tempfile::tempdir().unwrap();
        let dna = tmp.path().join("dna.png");
        let rna = tmp.path().join("rna.png");
        let mask = tmp.path().join("mask.png");
        write_plane(&dna, 8, 60);
        write_plane(&rna, 8, 120);
        write_mask(&mask, 8);

        let pixels = FileImageReader
            .read(&[dna.clone(), rna.clone()], Some(&mask))
            .unwrap();
        assert_eq!(pixels.channels, 2);
        let plane = (pixels.width * pixels.height) as usize;
        for c in 0..2 {
            // (0, 0) is background, (7, 0) is inside the object.
            assert_eq!(pixels.data[c * plane], 0.0);
            assert!(pixels.data[c * plane + 7] > 0.0);
        }

        // Without the mask the same pixel keeps its shade.
        let unmasked = FileImageReader.read(&[dna, rna], None).unwrap();
        assert!(unmasked.data[0] > 0.0);
    }

    #[test]
    fn wrong_sized_mask_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dna = tmp.path().join("dna.png");
        let mask = tmp.path().join("mask.png");
        write_plane(&dna, 8, 60);
        write_mask(&mask, 4);

        let err = FileImageReader.read(&[dna], Some(&mask)).unwrap_err();
        assert!(matches!(err, DatasetError::ShapeMismatch { .. }));
    }

    #[test]
    fn mismatched_channel_planes_are_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let dna = tmp.path().join("dna.png");
        let rna = tmp.path().join("rna.png");
        write_plane(&dna, 8, 60);
        write_plane(&rna, 16, 120);

        let err = FileImageReader.read(&[dna, rna], None).unwrap_err();
        assert!(matches!(err, DatasetError::ShapeMismatch { .. }));
    }
}
