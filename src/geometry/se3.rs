//! Rigid-body transforms.
//!
//! `SE3` maps points from its source frame into its target frame:
//! `a_T_b.transform_point(p_b) = p_a`. Composition follows the same
//! subscript-chaining rule, `a_T_c = a_T_b.compose(&b_T_c)`.

use nalgebra::{Matrix3, Matrix4, Rotation3, UnitQuaternion, Vector3, Vector6};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SE3 {
    pub rotation: UnitQuaternion<f64>,
    pub translation: Vector3<f64>,
}

impl SE3 {
    pub fn identity() -> Self {
        Self {
            rotation: UnitQuaternion::identity(),
            translation: Vector3::zeros(),
        }
    }

    pub fn from_rt(rotation: &Matrix3<f64>, translation: &Vector3<f64>) -> Self {
        let rot = Rotation3::from_matrix_unchecked(*rotation);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot),
            translation: *translation,
        }
    }

    pub fn from_quaternion(rotation: UnitQuaternion<f64>, translation: Vector3<f64>) -> Self {
        Self {
            rotation,
            translation,
        }
    }

    /// Build from a homogeneous 4x4 matrix. The rotation block is
    /// re-orthonormalized so slightly noisy calibration data is accepted.
    pub fn from_matrix(mat: Matrix4<f64>) -> Self {
        let r = mat.fixed_view::<3, 3>(0, 0).into_owned();
        let t = mat.fixed_view::<3, 1>(0, 3).into_owned();
        let rot = Rotation3::from_matrix(&r);
        Self {
            rotation: UnitQuaternion::from_rotation_matrix(&rot),
            translation: t,
        }
    }

    pub fn to_matrix(&self) -> Matrix4<f64> {
        let mut m = Matrix4::identity();
        m.fixed_view_mut::<3, 3>(0, 0)
            .copy_from(self.rotation.to_rotation_matrix().matrix());
        m.fixed_view_mut::<3, 1>(0, 3).copy_from(&self.translation);
        m
    }

    pub fn rotation_matrix(&self) -> Matrix3<f64> {
        *self.rotation.to_rotation_matrix().matrix()
    }

    pub fn inverse(&self) -> Self {
        let rot_inv = self.rotation.inverse();
        Self {
            rotation: rot_inv,
            translation: -(rot_inv * self.translation),
        }
    }

    pub fn compose(&self, other: &SE3) -> Self {
        Self {
            rotation: self.rotation * other.rotation,
            translation: self.rotation * other.translation + self.translation,
        }
    }

    #[inline]
    pub fn transform_point(&self, p: &Vector3<f64>) -> Vector3<f64> {
        self.rotation * p + self.translation
    }

    /// Tangent coordinates `[φ, t]` (rotation vector then translation).
    ///
    /// This is the decoupled parameterization used by the pose graph; it is
    /// not the coupled SE(3) logarithm.
    pub fn log(&self) -> Vector6<f64> {
        let phi = self.rotation.scaled_axis();
        Vector6::new(
            phi.x,
            phi.y,
            phi.z,
            self.translation.x,
            self.translation.y,
            self.translation.z,
        )
    }

    pub fn exp(tangent: &Vector6<f64>) -> Self {
        let phi = Vector3::new(tangent[0], tangent[1], tangent[2]);
        Self {
            rotation: UnitQuaternion::from_scaled_axis(phi),
            translation: Vector3::new(tangent[3], tangent[4], tangent[5]),
        }
    }

    /// Rotation angle between two poses, in radians.
    pub fn angular_distance(&self, other: &SE3) -> f64 {
        self.rotation.angle_to(&other.rotation)
    }

    pub fn translation_distance(&self, other: &SE3) -> f64 {
        (self.translation - other.translation).norm()
    }
}

impl Default for SE3 {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sample_pose() -> SE3 {
        SE3::from_quaternion(
            UnitQuaternion::from_euler_angles(0.1, -0.2, 0.3),
            Vector3::new(1.0, -2.0, 0.5),
        )
    }

    #[test]
    fn test_inverse_composes_to_identity() {
        let pose = sample_pose();
        let ident = pose.compose(&pose.inverse());
        assert_relative_eq!(ident.translation, Vector3::zeros(), epsilon = 1e-12);
        assert!(ident.rotation.angle() < 1e-12);
    }

    #[test]
    fn test_compose_matches_matrix_product() {
        let a = sample_pose();
        let b = SE3::from_quaternion(
            UnitQuaternion::from_euler_angles(-0.3, 0.05, 0.2),
            Vector3::new(0.2, 0.1, -1.0),
        );
        let expected = a.to_matrix() * b.to_matrix();
        assert_relative_eq!(a.compose(&b).to_matrix(), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_log_exp() {
        let pose = sample_pose();
        let back = SE3::exp(&pose.log());
        assert_relative_eq!(back.to_matrix(), pose.to_matrix(), epsilon = 1e-12);
    }

    #[test]
    fn test_from_matrix_roundtrip() {
        let pose = sample_pose();
        let back = SE3::from_matrix(pose.to_matrix());
        assert!(back.angular_distance(&pose) < 1e-9);
        assert_relative_eq!(back.translation, pose.translation, epsilon = 1e-12);
    }
}
