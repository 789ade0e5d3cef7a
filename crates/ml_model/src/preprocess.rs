//! Decoding and normalizing images into network input.

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};

/// Color channels fed to the network (RGB).
pub const CHANNELS: usize = 3;

/// A decoded square image in channel-first layout, values in `[0, 1]`.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedImage {
    size: usize,
    data: Vec<f32>,
}

impl PreparedImage {
    /// Wraps raw CHW data.
    ///
    /// # Errors
    ///
    /// Returns an error if `data` is not `3 × size × size` long.
    pub fn from_chw(size: usize, data: Vec<f32>) -> Result<Self> {
        anyhow::ensure!(
            data.len() == CHANNELS * size * size,
            "expected {} values for a {size}x{size} image, got {}",
            CHANNELS * size * size,
            data.len()
        );
        Ok(Self { size, data })
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub(crate) fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }
}

/// Decodes `bytes`, converts to RGB, resizes to `size × size` with a nearest
/// filter and scales pixel values to `[0, 1]`.
///
/// # Errors
///
/// Returns an error if the bytes are not a decodable image.
pub fn prepare_image(bytes: &[u8], size: usize) -> Result<PreparedImage> {
    let side = u32::try_from(size).context("image size does not fit in u32")?;
    anyhow::ensure!(side > 0, "image size must be positive");

    let decoded = image::load_from_memory(bytes).context("failed to decode image")?;
    let rgb = decoded.to_rgb8();
    let resized = if rgb.dimensions() == (side, side) {
        rgb
    } else {
        imageops::resize(&rgb, side, side, FilterType::Nearest)
    };

    let plane = size * size;
    let mut data = vec![0.0; CHANNELS * plane];
    for (i, pixel) in resized.pixels().enumerate() {
        for (channel, value) in pixel.0.iter().enumerate() {
            data[channel * plane + i] = f32::from(*value) / 255.0;
        }
    }

    Ok(PreparedImage { size, data })
}

#[cfg(test)]
pub(crate) mod tests {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat, Rgb, RgbImage};

    use super::*;

    /// Encodes a solid-color PNG.
    pub(crate) fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        let img = RgbImage::from_pixel(width, height, Rgb(color));
        let mut buf = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(img)
            .write_to(&mut buf, ImageFormat::Png)
            .expect("encode png");
        buf.into_inner()
    }

    #[test]
    fn test_prepare_resizes_and_scales() {
        let bytes = solid_png(20, 10, [255, 0, 51]);
        let prepared = prepare_image(&bytes, 8).expect("prepare");

        assert_eq!(prepared.size(), 8);
        assert_eq!(prepared.data().len(), CHANNELS * 64);

        let (red, rest) = prepared.data().split_at(64);
        let (green, blue) = rest.split_at(64);
        assert!(red.iter().all(|v| (*v - 1.0).abs() < 1e-6));
        assert!(green.iter().all(|v| v.abs() < 1e-6));
        assert!(blue.iter().all(|v| (*v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn test_prepare_rejects_garbage() {
        assert!(prepare_image(b"definitely not an image", 8).is_err());
        assert!(prepare_image(&[], 8).is_err());
    }

    #[test]
    fn test_from_chw_checks_length() {
        assert!(PreparedImage::from_chw(2, vec![0.0; 12]).is_ok());
        assert!(PreparedImage::from_chw(2, vec![0.0; 11]).is_err());
    }
}
