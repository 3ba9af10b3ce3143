//! Pyramidal Lucas-Kanade feature tracking (forward additive).
//!
//! Each feature is tracked coarse-to-fine starting from a predicted
//! location; the displacement found at one level seeds the next finer level
//! after doubling.

use image::GrayImage;
use nalgebra::Point2;

/// Outcome of tracking one feature.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackStatus {
    Tracked,
    /// The iteration diverged or the patch had no texture.
    Lost,
    /// The final position left the image.
    OutOfBounds,
}

/// Single-channel f32 image.
#[derive(Debug, Clone)]
pub struct ImageF32 {
    width: usize,
    height: usize,
    data: Vec<f32>,
}

impl ImageF32 {
    pub fn from_gray(img: &GrayImage) -> Self {
        Self {
            width: img.width() as usize,
            height: img.height() as usize,
            data: img.as_raw().iter().map(|&v| v as f32).collect(),
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    #[inline]
    fn at(&self, x: usize, y: usize) -> f32 {
        self.data[y * self.width + x]
    }

    /// Bilinear sample, clamped to the image border.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        let max_x = (self.width - 1) as f32;
        let max_y = (self.height - 1) as f32;
        let x = x.clamp(0.0, max_x);
        let y = y.clamp(0.0, max_y);
        let x0 = x.floor() as usize;
        let y0 = y.floor() as usize;
        let x1 = (x0 + 1).min(self.width - 1);
        let y1 = (y0 + 1).min(self.height - 1);
        let ax = x - x0 as f32;
        let ay = y - y0 as f32;

        let top = self.at(x0, y0) * (1.0 - ax) + self.at(x1, y0) * ax;
        let bottom = self.at(x0, y1) * (1.0 - ax) + self.at(x1, y1) * ax;
        top * (1.0 - ay) + bottom * ay
    }

    /// Half-resolution image by 2x2 averaging.
    fn downsample(&self) -> Self {
        let width = (self.width / 2).max(1);
        let height = (self.height / 2).max(1);
        let mut data = Vec::with_capacity(width * height);
        for y in 0..height {
            for x in 0..width {
                let (sx, sy) = (2 * x, 2 * y);
                let sx1 = (sx + 1).min(self.width - 1);
                let sy1 = (sy + 1).min(self.height - 1);
                data.push(0.25 * (self.at(sx, sy) + self.at(sx1, sy) + self.at(sx, sy1) + self.at(sx1, sy1)));
            }
        }
        Self { width, height, data }
    }
}

#[derive(Debug, Clone)]
pub struct Pyramid {
    pub levels: Vec<ImageF32>,
}

impl Pyramid {
    /// Builds `max_level + 1` levels, stopping early once a level would be
    /// smaller than a tracking window.
    pub fn build(img: &GrayImage, max_level: usize, min_size: usize) -> Self {
        let mut levels = vec![ImageF32::from_gray(img)];
        for _ in 0..max_level {
            let last = &levels[levels.len() - 1];
            if last.width / 2 < min_size || last.height / 2 < min_size {
                break;
            }
            let next = last.downsample();
            levels.push(next);
        }
        Self { levels }
    }

    pub fn num_levels(&self) -> usize {
        self.levels.len()
    }
}

enum LkResult {
    Converged(f32, f32),
    MaxIter(f32, f32),
    Singular,
}

/// Pyramidal KLT tracker.
#[derive(Debug, Clone)]
pub struct KltTracker {
    /// Patch half-size; the patch is `(2 * half_window + 1)²`.
    pub half_window: usize,
    pub max_iterations: usize,
    /// Convergence threshold on the update, in pixels.
    pub epsilon: f32,
    pub max_level: usize,
}

impl KltTracker {
    pub fn new(window_size: usize, max_iterations: usize, epsilon: f32, max_level: usize) -> Self {
        Self {
            half_window: (window_size / 2).max(1),
            max_iterations,
            epsilon,
            max_level,
        }
    }

    pub fn build_pyramid(&self, img: &GrayImage) -> Pyramid {
        Pyramid::build(img, self.max_level, 2 * self.half_window + 1)
    }

    /// Tracks `ref_points` from `prev` to `curr`, seeding each search at
    /// the matching entry of `predicted`.
    pub fn track(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        ref_points: &[Point2<f64>],
        predicted: &[Point2<f64>],
    ) -> Vec<(Point2<f64>, TrackStatus)> {
        let num_levels = prev.num_levels().min(curr.num_levels());
        ref_points
            .iter()
            .zip(predicted)
            .map(|(r, p)| self.track_single(prev, curr, r, p, num_levels))
            .collect()
    }

    fn track_single(
        &self,
        prev: &Pyramid,
        curr: &Pyramid,
        ref_pt: &Point2<f64>,
        predicted: &Point2<f64>,
        num_levels: usize,
    ) -> (Point2<f64>, TrackStatus) {
        let top = num_levels - 1;
        let top_scale = 1.0 / (1u32 << top) as f32;
        let mut dx = (predicted.x - ref_pt.x) as f32 * top_scale;
        let mut dy = (predicted.y - ref_pt.y) as f32 * top_scale;

        for level in (0..num_levels).rev() {
            let scale = 1.0 / (1u32 << level) as f32;
            let fx = ref_pt.x as f32 * scale;
            let fy = ref_pt.y as f32 * scale;

            match self.lk_forward_additive(&prev.levels[level], &curr.levels[level], fx, fy, dx, dy) {
                LkResult::Converged(ndx, ndy) | LkResult::MaxIter(ndx, ndy) => {
                    dx = ndx;
                    dy = ndy;
                }
                LkResult::Singular => {
                    let pos = Point2::new(ref_pt.x + (dx / scale) as f64, ref_pt.y + (dy / scale) as f64);
                    return (pos, TrackStatus::Lost);
                }
            }

            if level > 0 {
                dx *= 2.0;
                dy *= 2.0;
            }
        }

        let pos = Point2::new(ref_pt.x + dx as f64, ref_pt.y + dy as f64);
        if !dx.is_finite() || !dy.is_finite() {
            return (*ref_pt, TrackStatus::Lost);
        }
        let w = curr.levels[0].width() as f64;
        let h = curr.levels[0].height() as f64;
        let status = if pos.x >= 0.0 && pos.x < w && pos.y >= 0.0 && pos.y < h {
            TrackStatus::Tracked
        } else {
            TrackStatus::OutOfBounds
        };
        (pos, status)
    }

    fn lk_forward_additive(
        &self,
        prev: &ImageF32,
        curr: &ImageF32,
        fx: f32,
        fy: f32,
        mut dx: f32,
        mut dy: f32,
    ) -> LkResult {
        let half = self.half_window as isize;

        for _ in 0..self.max_iterations {
            let (mut h00, mut h01, mut h11) = (0.0f32, 0.0f32, 0.0f32);
            let (mut b0, mut b1) = (0.0f32, 0.0f32);

            for py in -half..=half {
                for px in -half..=half {
                    let (ox, oy) = (px as f32, py as f32);
                    let t_val = prev.sample(fx + ox, fy + oy);
                    let wx = fx + dx + ox;
                    let wy = fy + dy + oy;
                    let e = t_val - curr.sample(wx, wy);

                    let gx = 0.5 * (curr.sample(wx + 1.0, wy) - curr.sample(wx - 1.0, wy));
                    let gy = 0.5 * (curr.sample(wx, wy + 1.0) - curr.sample(wx, wy - 1.0));

                    h00 += gx * gx;
                    h01 += gx * gy;
                    h11 += gy * gy;
                    b0 += gx * e;
                    b1 += gy * e;
                }
            }

            let det = h00 * h11 - h01 * h01;
            if det.abs() < 1e-6 {
                return LkResult::Singular;
            }
            let inv_det = 1.0 / det;
            let step_x = inv_det * (h11 * b0 - h01 * b1);
            let step_y = inv_det * (h00 * b1 - h01 * b0);
            dx += step_x;
            dy += step_y;

            if step_x * step_x + step_y * step_y < self.epsilon * self.epsilon {
                return LkResult::Converged(dx, dy);
            }
        }

        LkResult::MaxIter(dx, dy)
    }
}
