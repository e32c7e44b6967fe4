//! Compression collaborator.
//!
//! The engine treats compression as an external seam: anything that
//! turns raw bytes into a bounded-size encoded payload plus dimensions
//! satisfies [`Compressor`]. The provided implementation decodes with
//! the `image` crate, downsizes to a configured longest edge and
//! re-encodes as JPEG.

use image::codecs::jpeg::JpegEncoder;
use image::GenericImageView;

use crate::error::MediaError;
use crate::records::Dimensions;

#[derive(Debug, Clone)]
pub struct CompressedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

/// Incremental progress is reported 0-100; the upload pipeline rescales
/// it into its own band.
pub trait Compressor: Send + Sync {
    fn compress(
        &self,
        bytes: &[u8],
        progress: &(dyn Fn(u8) + Sync),
    ) -> Result<CompressedImage, MediaError>;
}

/// Decode check used by upload pre-validation; rejects corrupt input
/// without touching any store.
pub fn probe_image(name: &str, bytes: &[u8]) -> Result<Dimensions, MediaError> {
    let img = image::load_from_memory(bytes)
        .map_err(|e| MediaError::validation(name, format!("not a decodable image: {e}")))?;
    let (width, height) = img.dimensions();
    Ok(Dimensions { width, height })
}

pub struct JpegCompressor {
    max_dimension: u32,
    quality: u8,
}

impl JpegCompressor {
    pub fn new(max_dimension: u32, quality: u8) -> Self {
        Self {
            max_dimension,
            quality,
        }
    }
}

impl Compressor for JpegCompressor {
    fn compress(
        &self,
        bytes: &[u8],
        progress: &(dyn Fn(u8) + Sync),
    ) -> Result<CompressedImage, MediaError> {
        progress(5);
        let img = image::load_from_memory(bytes)
            .map_err(|e| MediaError::validation("image", format!("decode failed: {e}")))?;
        progress(30);

        let (w, h) = img.dimensions();
        let img = if w.max(h) > self.max_dimension {
            img.thumbnail(self.max_dimension, self.max_dimension)
        } else {
            img
        };
        progress(60);

        let rgb = img.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut out = Vec::new();
        let mut encoder = JpegEncoder::new_with_quality(&mut out, self.quality);
        encoder
            .encode_image(&rgb)
            .map_err(|e| MediaError::validation("image", format!("encode failed: {e}")))?;
        progress(100);

        Ok(CompressedImage {
            bytes: out,
            width,
            height,
        })
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use image::codecs::png::PngEncoder;
    use image::{ExtendedColorType, ImageEncoder, RgbImage};

    /// Small valid PNG for pipeline tests.
    pub fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        });
        let mut out = Vec::new();
        PngEncoder::new(&mut out)
            .write_image(img.as_raw(), width, height, ExtendedColorType::Rgb8)
            .unwrap();
        out
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::sample_png;
    use super::*;

    #[test]
    fn probe_reports_dimensions() {
        let png = sample_png(8, 6);
        let dims = probe_image("sample.png", &png).unwrap();
        assert_eq!(dims.width, 8);
        assert_eq!(dims.height, 6);
    }

    #[test]
    fn probe_rejects_corrupt_input() {
        let err = probe_image("bad.png", b"not an image").unwrap_err();
        assert!(matches!(err, MediaError::Validation { .. }));
    }

    #[test]
    fn compress_downsizes_to_max_dimension() {
        let png = sample_png(64, 32);
        let compressor = JpegCompressor::new(16, 80);
        let result = compressor.compress(&png, &|_| {}).unwrap();
        assert!(result.width <= 16 && result.height <= 16);
        assert!(!result.bytes.is_empty());
    }

    #[test]
    fn compress_reports_monotonic_progress() {
        use std::sync::Mutex;

        let png = sample_png(10, 10);
        let compressor = JpegCompressor::new(1920, 80);
        let seen = Mutex::new(Vec::new());
        compressor
            .compress(&png, &|p| seen.lock().unwrap().push(p))
            .unwrap();

        let seen = seen.into_inner().unwrap();
        assert!(seen.windows(2).all(|w| w[0] <= w[1]));
        assert_eq!(*seen.last().unwrap(), 100);
    }
}
