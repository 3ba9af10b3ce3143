//! Rectified stereo pinhole camera model.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::Deserialize;

/// Intrinsics of the rectified left camera plus the stereo baseline.
/// Both cameras share `fx, fy, cx, cy` after rectification.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct CameraModel {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    /// Stereo baseline in meters.
    pub baseline: f64,
}

impl CameraModel {
    pub fn new(fx: f64, fy: f64, cx: f64, cy: f64, baseline: f64) -> Self {
        Self { fx, fy, cx, cy, baseline }
    }

    pub fn k_matrix(&self) -> Matrix3<f64> {
        Matrix3::new(self.fx, 0.0, self.cx, 0.0, self.fy, self.cy, 0.0, 0.0, 1.0)
    }

    pub fn k_inverse(&self) -> Matrix3<f64> {
        Matrix3::new(
            1.0 / self.fx,
            0.0,
            -self.cx / self.fx,
            0.0,
            1.0 / self.fy,
            -self.cy / self.fy,
            0.0,
            0.0,
            1.0,
        )
    }

    /// Project a point in camera coordinates; `None` behind the camera.
    pub fn project(&self, p: &Vector3<f64>) -> Option<Point2<f64>> {
        if p.z <= 0.0 {
            return None;
        }
        Some(Point2::new(
            self.fx * p.x / p.z + self.cx,
            self.fy * p.y / p.z + self.cy,
        ))
    }

    /// Unit bearing vector through a pixel.
    pub fn bearing(&self, px: &Point2<f64>) -> Vector3<f64> {
        Vector3::new((px.x - self.cx) / self.fx, (px.y - self.cy) / self.fy, 1.0).normalize()
    }

    /// Back-project a rectified stereo measurement `(u_left, u_right, v)`.
    pub fn backproject_stereo(&self, u_left: f64, u_right: f64, v: f64) -> Option<Vector3<f64>> {
        let disparity = u_left - u_right;
        if disparity <= 0.0 {
            return None;
        }
        let z = self.fx * self.baseline / disparity;
        Some(Vector3::new(
            (u_left - self.cx) * z / self.fx,
            (v - self.cy) * z / self.fy,
            z,
        ))
    }

    /// Jacobian of [`Self::backproject_stereo`] with respect to
    /// `(u_left, u_right, v)`.
    pub fn backproject_stereo_jacobian(&self, u_left: f64, u_right: f64, v: f64) -> Option<Matrix3<f64>> {
        let d = u_left - u_right;
        if d <= 0.0 {
            return None;
        }
        let b = self.baseline;
        let d2 = d * d;
        let ul = u_left - self.cx;
        let vl = v - self.cy;
        let fxy = self.fx / self.fy;

        Some(Matrix3::new(
            b / d - ul * b / d2, ul * b / d2, 0.0,
            -vl * fxy * b / d2, vl * fxy * b / d2, fxy * b / d,
            -self.fx * b / d2, self.fx * b / d2, 0.0,
        ))
    }
}

impl Default for CameraModel {
    fn default() -> Self {
        // EuRoC cam0 after rectification.
        Self::new(435.2, 435.2, 367.2, 252.2, 0.11)
    }
}
