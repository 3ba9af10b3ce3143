//! Translation-only solvers used when the rotation is known.

use nalgebra::{Matrix2, Matrix3, Vector2, Vector3};

use super::ransac::RansacProblem;

/// Depths `(d_ref, d_cur)` along two bearings that best satisfy
/// `d_ref * f_ref = d_cur * R f_cur + t` in the least-squares sense.
/// `None` when the rays are parallel.
pub fn triangulate_depths(
    f_ref: &Vector3<f64>,
    rotated_f_cur: &Vector3<f64>,
    t: &Vector3<f64>,
) -> Option<(f64, f64)> {
    // Normal equations of [f_ref, -R f_cur] [d_ref, d_cur]^T = t.
    let a = f_ref;
    let b = -rotated_f_cur;
    let ata = Matrix2::new(a.dot(a), a.dot(&b), a.dot(&b), b.dot(&b));
    if ata.determinant().abs() < 1e-12 {
        return None;
    }
    let atb = Vector2::new(a.dot(t), b.dot(t));
    let d = ata.try_inverse()? * atb;
    Some((d.x, d.y))
}

/// Unit translation direction from two bearing correspondences with known
/// rotation `ref_R_cur`.
///
/// Each correspondence constrains `t` to be orthogonal to `R f_cur × f_ref`;
/// two of them fix the direction up to sign, which is resolved by requiring
/// positive depth on the first correspondence.
pub fn translation_from_two_bearings(
    rotation: &Matrix3<f64>,
    f_ref: [&Vector3<f64>; 2],
    f_cur: [&Vector3<f64>; 2],
) -> Option<Vector3<f64>> {
    let m0 = (rotation * f_cur[0]).cross(f_ref[0]);
    let m1 = (rotation * f_cur[1]).cross(f_ref[1]);
    let t = m0.cross(&m1);
    let norm = t.norm();
    if norm < 1e-12 {
        return None;
    }
    let mut t = t / norm;

    let (d_ref, d_cur) = triangulate_depths(f_ref[0], &(rotation * f_cur[0]), &t)?;
    if d_ref < 0.0 && d_cur < 0.0 {
        t = -t;
    }
    Some(t)
}

/// Information-weighted fusion of translation hypotheses:
/// `t = (Σ Λ_i)⁻¹ Σ Λ_i t_i`, with covariance `(Σ Λ_i)⁻¹`.
pub fn fuse_translations(
    hypotheses: &[Vector3<f64>],
    information: &[Matrix3<f64>],
    indices: &[usize],
) -> Option<(Vector3<f64>, Matrix3<f64>)> {
    if indices.is_empty() {
        return None;
    }
    let mut sum_info = Matrix3::zeros();
    let mut sum_info_t = Vector3::zeros();
    for &i in indices {
        sum_info += information[i];
        sum_info_t += information[i] * hypotheses[i];
    }
    let covariance = sum_info.try_inverse()?;
    Some((covariance * sum_info_t, covariance))
}

/// 1-point RANSAC over per-correspondence translation hypotheses
/// `t_i = p_ref - R p_cur`, gated by Mahalanobis distance.
pub struct TranslationGivenRotationProblem<'a> {
    pub hypotheses: &'a [Vector3<f64>],
    pub information: &'a [Matrix3<f64>],
}

impl RansacProblem for TranslationGivenRotationProblem<'_> {
    type Model = Vector3<f64>;

    fn sample_size(&self) -> usize {
        1
    }

    fn len(&self) -> usize {
        self.hypotheses.len()
    }

    fn fit(&self, sample: &[usize]) -> Vec<Vector3<f64>> {
        vec![self.hypotheses[sample[0]]]
    }

    fn residual(&self, t: &Vector3<f64>, index: usize) -> f64 {
        let d = self.hypotheses[index] - t;
        d.dot(&(self.information[index] * d))
    }

    fn refine(&self, _t: &Vector3<f64>, inliers: &[usize]) -> Option<Vector3<f64>> {
        fuse_translations(self.hypotheses, self.information, inliers).map(|(t, _)| t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::so3::yaw_rotation;
    use approx::assert_relative_eq;

    #[test]
    fn test_two_point_translation() {
        let r = yaw_rotation(0.1);
        let t = Vector3::new(0.3, -0.1, 0.05);
        // Points in the current frame, mapped to ref by p_ref = R p_cur + t.
        let p_cur = [Vector3::new(0.5, 0.2, 4.0), Vector3::new(-1.0, 0.4, 6.0)];
        let f_cur: Vec<_> = p_cur.iter().map(|p| p.normalize()).collect();
        let f_ref: Vec<_> = p_cur.iter().map(|p| (r * p + t).normalize()).collect();

        let est = translation_from_two_bearings(&r, [&f_ref[0], &f_ref[1]], [&f_cur[0], &f_cur[1]])
            .unwrap();
        assert_relative_eq!(est, t.normalize(), epsilon = 1e-9);
    }

    #[test]
    fn test_fuse_translations_weights_by_information() {
        let hyps = vec![Vector3::new(1.0, 0.0, 0.0), Vector3::new(2.0, 0.0, 0.0)];
        let infos = vec![Matrix3::identity() * 3.0, Matrix3::identity()];
        let (t, cov) = fuse_translations(&hyps, &infos, &[0, 1]).unwrap();
        assert_relative_eq!(t, Vector3::new(1.25, 0.0, 0.0), epsilon = 1e-12);
        assert_relative_eq!(cov, Matrix3::identity() * 0.25, epsilon = 1e-12);
    }

    #[test]
    fn test_triangulate_depths() {
        let t = Vector3::new(1.0, 0.0, 0.0);
        let p_ref = Vector3::new(0.5, 0.0, 2.0);
        let p_cur = p_ref - t;
        let (d_ref, d_cur) =
            triangulate_depths(&p_ref.normalize(), &p_cur.normalize(), &t).unwrap();
        assert_relative_eq!(d_ref, p_ref.norm(), epsilon = 1e-9);
        assert_relative_eq!(d_cur, p_cur.norm(), epsilon = 1e-9);
    }
}
