//! Absolute orientation (Arun / Horn) between corresponding 3D point sets.
//!
//! Finds the rigid transform with `p_ref ≈ R p_cur + t` minimizing the sum of
//! squared point distances. Scale is fixed to 1 (stereo depth is metric).

use nalgebra::{Matrix3, Vector3};

use super::ransac::RansacProblem;
use super::SE3;

/// Closed-form SVD solution. `None` for fewer than three points or a
/// degenerate (near-collinear) configuration.
pub fn arun(points_ref: &[Vector3<f64>], points_cur: &[Vector3<f64>]) -> Option<SE3> {
    let n = points_ref.len();
    if n < 3 || n != points_cur.len() {
        return None;
    }

    let centroid_ref = compute_centroid(points_ref);
    let centroid_cur = compute_centroid(points_cur);

    // Cross-covariance H = Σ (p_cur - c_cur)(p_ref - c_ref)ᵀ
    let mut h = Matrix3::zeros();
    for (pr, pc) in points_ref.iter().zip(points_cur) {
        h += (pc - centroid_cur) * (pr - centroid_ref).transpose();
    }

    let svd = h.svd(true, true);
    let singular = svd.singular_values;
    // Rank < 2 means all points lie on a line (or coincide).
    if singular[1] < 1e-9 * singular[0].max(1e-12) {
        return None;
    }
    let u = svd.u?;
    let v_t = svd.v_t?;

    // R = V Uᵀ
    let mut rotation = v_t.transpose() * u.transpose();

    // Reflection: flip the axis of the smallest singular value.
    if rotation.determinant() < 0.0 {
        let mut v = v_t.transpose();
        v.column_mut(2).neg_mut();
        rotation = v * u.transpose();
    }

    let translation = centroid_ref - rotation * centroid_cur;
    Some(SE3::from_rt(&rotation, &translation))
}

fn compute_centroid(points: &[Vector3<f64>]) -> Vector3<f64> {
    if points.is_empty() {
        return Vector3::zeros();
    }
    let sum: Vector3<f64> = points.iter().sum();
    sum / points.len() as f64
}

/// 3-point RANSAC over stereo point correspondences. Residual is the
/// point-to-point distance in meters.
pub struct PointCloudProblem<'a> {
    pub points_ref: &'a [Vector3<f64>],
    pub points_cur: &'a [Vector3<f64>],
}

impl PointCloudProblem<'_> {
    fn solve(&self, indices: &[usize]) -> Option<SE3> {
        let a: Vec<_> = indices.iter().map(|&i| self.points_ref[i]).collect();
        let b: Vec<_> = indices.iter().map(|&i| self.points_cur[i]).collect();
        arun(&a, &b)
    }
}

impl RansacProblem for PointCloudProblem<'_> {
    type Model = SE3;

    fn sample_size(&self) -> usize {
        3
    }

    fn len(&self) -> usize {
        self.points_ref.len()
    }

    fn fit(&self, sample: &[usize]) -> Vec<SE3> {
        self.solve(sample).into_iter().collect()
    }

    fn residual(&self, model: &SE3, index: usize) -> f64 {
        (model.transform_point(&self.points_cur[index]) - self.points_ref[index]).norm()
    }

    fn refine(&self, _model: &SE3, inliers: &[usize]) -> Option<SE3> {
        self.solve(inliers)
    }
}
