//! SO(3) helpers shared by the epipolar and stereo solvers.

use nalgebra::{Matrix3, UnitQuaternion, Vector3};

/// Constructs the skew-symmetric matrix [v]× such that [v]× u = v × u.
///
/// ```text
/// [v]× = |  0   -v_z   v_y |
///        |  v_z   0   -v_x |
///        | -v_y  v_x    0  |
/// ```
#[inline]
pub fn skew(v: &Vector3<f64>) -> Matrix3<f64> {
    Matrix3::new(
        0.0, -v.z, v.y,
        v.z, 0.0, -v.x,
        -v.y, v.x, 0.0,
    )
}

/// Projects an arbitrary 3x3 matrix onto the closest rotation (Frobenius norm).
pub fn orthonormalize(m: &Matrix3<f64>) -> Option<Matrix3<f64>> {
    let svd = m.svd(true, true);
    let u = svd.u?;
    let v_t = svd.v_t?;
    let mut r = u * v_t;
    if r.determinant() < 0.0 {
        let mut u_fixed = u;
        u_fixed.column_mut(2).neg_mut();
        r = u_fixed * v_t;
    }
    Some(r)
}

/// Rotation about the camera y axis (yaw in a z-forward camera frame).
pub fn yaw_rotation(angle: f64) -> Matrix3<f64> {
    *UnitQuaternion::from_axis_angle(&Vector3::y_axis(), angle)
        .to_rotation_matrix()
        .matrix()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_skew_cross_product() {
        let v = Vector3::new(1.0, 2.0, 3.0);
        let u = Vector3::new(4.0, 5.0, 6.0);

        assert_relative_eq!(v.cross(&u), skew(&v) * u, epsilon = 1e-12);
    }

    #[test]
    fn test_skew_antisymmetric() {
        let skew_v = skew(&Vector3::new(1.0, 2.0, 3.0));
        assert_relative_eq!(skew_v, -skew_v.transpose(), epsilon = 1e-12);
    }

    #[test]
    fn test_orthonormalize_recovers_rotation() {
        let r = yaw_rotation(0.4);
        let noisy = r + Matrix3::from_element(1e-4);
        let fixed = orthonormalize(&noisy).unwrap();
        assert_relative_eq!(fixed.determinant(), 1.0, epsilon = 1e-9);
        assert_relative_eq!(fixed, r, epsilon = 1e-3);
    }
}
