//! BRIEF binary descriptors for keyframes that arrive without descriptors.
//!
//! 256 intensity comparisons inside a square patch of the smoothed image,
//! packed into the same 32-byte layout the matcher and place index use.

use image::GrayImage;
use imageproc::filter::gaussian_blur_f32;
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::tracking::matching::Descriptor;

const NUM_TESTS: usize = 256;
const PATTERN_SEED: u64 = 0x5eed_b41e;

pub struct BriefExtractor {
    /// Comparison pairs as offsets from the keypoint.
    pattern: Vec<[(i32, i32); 2]>,
    half_patch: i32,
    smoothing_sigma: f32,
}

impl BriefExtractor {
    pub fn new(half_patch: i32, smoothing_sigma: f32) -> Self {
        let mut rng = StdRng::seed_from_u64(PATTERN_SEED);
        let mut offset = || (rng.gen_range(-half_patch..=half_patch), rng.gen_range(-half_patch..=half_patch));
        let pattern = (0..NUM_TESTS).map(|_| [offset(), offset()]).collect();
        Self {
            pattern,
            half_patch,
            smoothing_sigma,
        }
    }

    /// Whether a full patch around `kp` fits in an image of the given size.
    pub fn fits(&self, kp: &Point2<f64>, width: u32, height: u32) -> bool {
        let (x, y) = (kp.x.round() as i64, kp.y.round() as i64);
        let h = self.half_patch as i64;
        x - h >= 0 && y - h >= 0 && x + h < width as i64 && y + h < height as i64
    }

    /// One descriptor per keypoint; `None` where the patch leaves the image.
    pub fn compute(&self, image: &GrayImage, keypoints: &[Point2<f64>]) -> Vec<Option<Descriptor>> {
        let smoothed = gaussian_blur_f32(image, self.smoothing_sigma);
        let (w, h) = smoothed.dimensions();
        keypoints
            .iter()
            .map(|kp| {
                if !self.fits(kp, w, h) {
                    return None;
                }
                let (cx, cy) = (kp.x.round() as i32, kp.y.round() as i32);
                let intensity = |(dx, dy): (i32, i32)| smoothed.get_pixel((cx + dx) as u32, (cy + dy) as u32)[0];

                let mut desc = [0u8; 32];
                for (bit, [a, b]) in self.pattern.iter().enumerate() {
                    if intensity(*a) < intensity(*b) {
                        desc[bit / 8] |= 1 << (bit % 8);
                    }
                }
                Some(desc)
            })
            .collect()
    }
}

impl Default for BriefExtractor {
    fn default() -> Self {
        Self::new(15, 2.0)
    }
}
