//! Random augmentation applied to training images.

use crate::preprocess::{CHANNELS, PreparedImage};
use crate::rng::Lcg;

/// Applies random rotation and horizontal flips.
#[derive(Debug, Clone)]
pub struct Augmenter {
    rotation_range: f32,
    horizontal_flip: bool,
    rng: Lcg,
}

impl Augmenter {
    #[must_use]
    pub const fn new(rotation_range: f32, horizontal_flip: bool, seed: u64) -> Self {
        Self {
            rotation_range,
            horizontal_flip,
            rng: Lcg::new(seed),
        }
    }

    /// Augments `image` in place.
    pub fn apply(&mut self, image: &mut PreparedImage) {
        if self.rotation_range > 0.0 {
            let degrees = (self.rng.next_f32() * 2.0 - 1.0) * self.rotation_range;
            rotate(image, degrees);
        }
        if self.horizontal_flip && self.rng.next_f32() < 0.5 {
            flip_horizontal(image);
        }
    }
}

/// Rotates around the center, sampling the nearest source pixel.
///
/// Pixels that map outside the image take the nearest edge pixel.
pub fn rotate(image: &mut PreparedImage, degrees: f32) {
    let size = image.size();
    if size < 2 || degrees.abs() < f32::EPSILON {
        return;
    }

    let (sin, cos) = degrees.to_radians().sin_cos();
    let center = (size - 1) as f32 / 2.0;
    let max = (size - 1) as f32;
    let plane = size * size;

    let source = image.data().to_vec();
    let target = image.data_mut();

    for y in 0..size {
        for x in 0..size {
            let dx = x as f32 - center;
            let dy = y as f32 - center;
            let sx = cos.mul_add(dx, sin * dy) + center;
            let sy = (-sin).mul_add(dx, cos * dy) + center;
            let sx = sx.round().clamp(0.0, max) as usize;
            let sy = sy.round().clamp(0.0, max) as usize;

            for channel in 0..CHANNELS {
                let offset = channel * plane;
                target[offset + y * size + x] = source[offset + sy * size + sx];
            }
        }
    }
}

/// Mirrors the image left to right.
pub fn flip_horizontal(image: &mut PreparedImage) {
    let size = image.size();
    for row in image.data_mut().chunks_exact_mut(size.max(1)) {
        row.reverse();
    }
}
