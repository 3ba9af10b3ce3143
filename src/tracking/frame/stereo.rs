//! Stereo frame: left `Frame` plus right-image correspondences and the
//! triangulated 3D point of every left keypoint.

use anyhow::{ensure, Result};
use image::GrayImage;
use nalgebra::{Point2, Vector3};
use serde::Deserialize;

use crate::tracking::tracking_frame::Frame;
use crate::tracking::KeypointStatus;
use crate::types::{FrameId, Timestamp};

/// Limits for sparse stereo matching along the rectified epipolar line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StereoMatchingParams {
    pub min_depth: f64,
    pub max_depth: f64,
    /// Tolerance on `|v_left - v_right|` in pixels.
    pub vertical_margin: f64,
    /// Half size of the square patch compared along the epipolar line.
    pub template_half_size: u32,
    /// Max mean absolute intensity difference for an accepted match.
    pub max_patch_error: f64,
}

impl Default for StereoMatchingParams {
    fn default() -> Self {
        Self {
            min_depth: 0.1,
            max_depth: 40.0,
            vertical_margin: 2.0,
            template_half_size: 5,
            max_patch_error: 15.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StereoFrame {
    pub id: FrameId,
    pub timestamp: Timestamp,
    pub left: Frame,
    pub right_image: Option<GrayImage>,
    /// Right-image location of each left keypoint (valid when the status is).
    pub right_keypoints: Vec<Point2<f64>>,
    pub right_keypoints_status: Vec<KeypointStatus>,
    /// Point in the left camera frame; zero unless the status is valid.
    pub keypoints_3d: Vec<Vector3<f64>>,
}

impl StereoFrame {
    pub fn new(left: Frame, right_image: Option<GrayImage>) -> Self {
        let n = left.len();
        Self {
            id: left.id,
            timestamp: left.timestamp,
            left,
            right_image,
            right_keypoints: vec![Point2::origin(); n],
            right_keypoints_status: vec![KeypointStatus::NoRightRect; n],
            keypoints_3d: vec![Vector3::zeros(); n],
        }
    }

    /// Sets the right-image counterparts of the left keypoints and
    /// triangulates them (`z = fx·b / d`).
    pub fn set_right_keypoints(&mut self, right: &[Option<Point2<f64>>], params: &StereoMatchingParams) -> Result<()> {
        ensure!(
            right.len() == self.left.len(),
            "frame {}: {} right keypoints for {} left keypoints",
            self.id,
            right.len(),
            self.left.len()
        );

        let cam = self.left.camera;
        let max_disparity = cam.fx * cam.baseline / params.min_depth;
        let min_disparity = cam.fx * cam.baseline / params.max_depth;

        self.right_keypoints = vec![Point2::origin(); right.len()];
        self.right_keypoints_status = vec![KeypointStatus::NoRightRect; right.len()];
        self.keypoints_3d = vec![Vector3::zeros(); right.len()];

        for (i, r) in right.iter().enumerate() {
            let Some(r) = r else { continue };
            let l = self.left.keypoints[i];
            self.right_keypoints[i] = *r;

            if (l.y - r.y).abs() > params.vertical_margin {
                continue;
            }
            let disparity = l.x - r.x;
            if disparity < min_disparity || disparity > max_disparity {
                self.right_keypoints_status[i] = KeypointStatus::NoDepth;
                continue;
            }
            // Rectified rows agree up to the margin; use the left row.
            if let Some(p) = cam.backproject_stereo(l.x, r.x, l.y) {
                self.keypoints_3d[i] = p;
                self.right_keypoints_status[i] = KeypointStatus::Valid;
            } else {
                self.right_keypoints_status[i] = KeypointStatus::NoDepth;
            }
        }
        Ok(())
    }

    /// Finds right keypoints by patch matching along the epipolar row of
    /// the right image, within the disparity range implied by the depth
    /// limits. Sub-pixel position from a parabola through the cost minimum.
    pub fn sparse_stereo_matching(&mut self, params: &StereoMatchingParams) -> Result<()> {
        let Some(right) = self.right_image.as_ref() else {
            anyhow::bail!("frame {} has no right image", self.id);
        };

        let cam = self.left.camera;
        let max_disparity = (cam.fx * cam.baseline / params.min_depth).ceil() as i64;
        let min_disparity = (cam.fx * cam.baseline / params.max_depth).floor().max(0.0) as i64;
        let half = params.template_half_size as i64;
        let (w, h) = (right.width() as i64, right.height() as i64);

        let mut found = Vec::with_capacity(self.left.len());
        for kp in &self.left.keypoints {
            let (ul, v) = (kp.x.round() as i64, kp.y.round() as i64);
            if ul - half < 0 || ul + half >= w || v - half < 0 || v + half >= h {
                found.push(None);
                continue;
            }

            let mut costs = Vec::new();
            for d in min_disparity..=max_disparity {
                let ur = ul - d;
                if ur - half < 0 {
                    break;
                }
                costs.push((d, patch_error(&self.left.image, right, ul, ur, v, half)));
            }

            let best = costs
                .iter()
                .enumerate()
                .min_by(|a, b| a.1 .1.total_cmp(&b.1 .1));
            let Some((k, &(d, cost))) = best else {
                found.push(None);
                continue;
            };
            if cost > params.max_patch_error {
                found.push(None);
                continue;
            }

            let mut offset = 0.0;
            if k > 0 && k + 1 < costs.len() {
                let (c0, c1, c2) = (costs[k - 1].1, cost, costs[k + 1].1);
                let denom = c0 - 2.0 * c1 + c2;
                if denom.abs() > 1e-9 {
                    offset = (0.5 * (c0 - c2) / denom).clamp(-0.5, 0.5);
                }
            }
            let disparity = d as f64 + offset;
            found.push(Some(Point2::new(kp.x - disparity, kp.y)));
        }

        self.set_right_keypoints(&found, params)
    }

    /// Number of left keypoints with a valid 3D point.
    pub fn valid_stereo_count(&self) -> usize {
        self.right_keypoints_status
            .iter()
            .filter(|s| **s == KeypointStatus::Valid)
            .count()
    }
}

fn patch_error(left: &GrayImage, right: &GrayImage, ul: i64, ur: i64, v: i64, half: i64) -> f64 {
    let mut sum = 0.0;
    for dy in -half..=half {
        for dx in -half..=half {
            let a = left.get_pixel((ul + dx) as u32, (v + dy) as u32)[0] as f64;
            let b = right.get_pixel((ur + dx) as u32, (v + dy) as u32)[0] as f64;
            sum += (a - b).abs();
        }
    }
    let n = (2 * half + 1) * (2 * half + 1);
    sum / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::CameraModel;
    use crate::types::LandmarkId;
    use approx::assert_relative_eq;
    use image::Luma;

    fn camera() -> CameraModel {
        CameraModel::new(400.0, 400.0, 80.0, 60.0, 0.1)
    }

    fn textured(width: u32, height: u32, shift: f64) -> GrayImage {
        GrayImage::from_fn(width, height, |x, y| {
            let xf = x as f64 + shift;
            let yf = y as f64;
            let val = 128.0 + 60.0 * (0.35 * xf).sin() * (0.3 * yf).cos() + 40.0 * (0.13 * xf + 0.21 * yf).sin();
            Luma([val.clamp(0.0, 255.0) as u8])
        })
    }

    #[test]
    fn test_set_right_keypoints_triangulates() {
        let cam = camera();
        let mut left = Frame::new(FrameId::new(3), 0, GrayImage::new(160, 120), cam);
        let p = Vector3::new(0.2, -0.1, 2.0);
        let l = cam.project(&p).unwrap();
        left.push_feature(l, Some(LandmarkId::new(0)), 1, 0.0);
        left.push_feature(Point2::new(50.0, 50.0), Some(LandmarkId::new(1)), 1, 0.0);
        left.push_feature(Point2::new(70.0, 50.0), Some(LandmarkId::new(2)), 1, 0.0);

        let mut stereo = StereoFrame::new(left, None);
        let disparity = cam.fx * cam.baseline / p.z;
        let right = vec![
            Some(Point2::new(l.x - disparity, l.y)),
            None,
            // Disparity below the max depth limit.
            Some(Point2::new(69.5, 50.0)),
        ];
        stereo.set_right_keypoints(&right, &StereoMatchingParams::default()).unwrap();

        assert_eq!(stereo.right_keypoints_status[0], KeypointStatus::Valid);
        assert_relative_eq!(stereo.keypoints_3d[0], p, epsilon = 1e-9);
        assert_eq!(stereo.right_keypoints_status[1], KeypointStatus::NoRightRect);
        assert_eq!(stereo.right_keypoints_status[2], KeypointStatus::NoDepth);
        assert_eq!(stereo.valid_stereo_count(), 1);
    }

    #[test]
    fn test_sparse_stereo_matching_finds_shift() {
        let cam = camera();
        let left_img = textured(160, 120, 0.0);
        // Right image content appears 8 pixels to the left.
        let right_img = textured(160, 120, 8.0);
        let mut left = Frame::new(FrameId::new(0), 0, left_img, cam);
        left.push_feature(Point2::new(100.0, 60.0), Some(LandmarkId::new(0)), 1, 0.0);

        let mut stereo = StereoFrame::new(left, Some(right_img));
        stereo.sparse_stereo_matching(&StereoMatchingParams::default()).unwrap();
        assert_eq!(stereo.right_keypoints_status[0], KeypointStatus::Valid);
        assert!((stereo.right_keypoints[0].x - 92.0).abs() < 0.5);
        assert_relative_eq!(stereo.keypoints_3d[0].z, cam.fx * cam.baseline / 8.0, epsilon = 0.5);
    }
}
