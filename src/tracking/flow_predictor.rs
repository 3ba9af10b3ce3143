//! Optical flow prediction used to seed KLT tracking.

use nalgebra::{Matrix3, Point2, Vector3};
use serde::Deserialize;

use crate::tracking::frame::CameraModel;
use crate::types::OptionError;

/// Which predictor the tracker uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpticalFlowPredictorType {
    /// Next location = previous location.
    #[serde(alias = "static")]
    Identity,
    /// Next location from the inter-frame rotation homography.
    Rotational,
}

impl Default for OpticalFlowPredictorType {
    fn default() -> Self {
        Self::Identity
    }
}

impl TryFrom<i32> for OpticalFlowPredictorType {
    type Error = OptionError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Identity),
            1 => Ok(Self::Rotational),
            _ => Err(OptionError {
                option: "optical flow predictor",
                value,
            }),
        }
    }
}

#[derive(Debug, Clone)]
pub enum OpticalFlowPredictor {
    Identity,
    Rotational {
        k: Matrix3<f64>,
        k_inv: Matrix3<f64>,
        /// `cur_R_ref`, updated before every prediction.
        rotation: Matrix3<f64>,
    },
}

impl OpticalFlowPredictor {
    pub fn new(kind: OpticalFlowPredictorType, camera: &CameraModel) -> Self {
        match kind {
            OpticalFlowPredictorType::Identity => Self::Identity,
            OpticalFlowPredictorType::Rotational => Self::rotational(camera.k_matrix(), camera.k_inverse()),
        }
    }

    pub fn rotational(k: Matrix3<f64>, k_inv: Matrix3<f64>) -> Self {
        Self::Rotational {
            k,
            k_inv,
            rotation: Matrix3::identity(),
        }
    }

    pub fn kind(&self) -> OpticalFlowPredictorType {
        match self {
            Self::Identity => OpticalFlowPredictorType::Identity,
            Self::Rotational { .. } => OpticalFlowPredictorType::Rotational,
        }
    }

    /// Sets the rotation from the reference camera into the current one.
    /// Ignored by the identity predictor.
    pub fn update_inter_frame_rotation(&mut self, cur_r_ref: Matrix3<f64>) {
        if let Self::Rotational { rotation, .. } = self {
            *rotation = cur_r_ref;
        }
    }

    /// Predicted location of each previous keypoint in the next frame.
    pub fn predict_flow(&self, prev_keypoints: &[Point2<f64>]) -> Vec<Point2<f64>> {
        match self {
            Self::Identity => prev_keypoints.to_vec(),
            Self::Rotational { k, k_inv, rotation } => {
                let h = k * rotation * k_inv;
                prev_keypoints
                    .iter()
                    .map(|kp| {
                        let p = h * Vector3::new(kp.x, kp.y, 1.0);
                        if p.z > 0.0 {
                            Point2::new(p.x / p.z, p.y / p.z)
                        } else {
                            // Rotated behind the camera.
                            *kp
                        }
                    })
                    .collect()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::so3::yaw_rotation;
    use approx::assert_relative_eq;

    fn keypoints() -> Vec<Point2<f64>> {
        vec![Point2::new(0.1, -0.2), Point2::new(0.5, 0.3), Point2::new(-0.4, 0.0)]
    }

    #[test]
    fn test_identity_predictor() {
        let pred = OpticalFlowPredictor::new(OpticalFlowPredictorType::Identity, &CameraModel::default());
        assert_eq!(pred.predict_flow(&keypoints()), keypoints());
    }

    #[test]
    fn test_rotational_zero_yaw_identity_k() {
        let mut pred = OpticalFlowPredictor::rotational(Matrix3::identity(), Matrix3::identity());
        pred.update_inter_frame_rotation(yaw_rotation(0.0));
        let out = pred.predict_flow(&keypoints());
        for (a, b) in out.iter().zip(keypoints().iter()) {
            assert_relative_eq!(a.coords, b.coords, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_rotational_behind_camera_falls_back() {
        let mut pred = OpticalFlowPredictor::rotational(Matrix3::identity(), Matrix3::identity());
        pred.update_inter_frame_rotation(yaw_rotation(std::f64::consts::PI));
        let out = pred.predict_flow(&keypoints());
        assert_eq!(out, keypoints());
    }

    #[test]
    fn test_rotational_matches_reprojection() {
        let cam = CameraModel::new(400.0, 400.0, 320.0, 240.0, 0.1);
        let r = yaw_rotation(0.05);
        let mut pred = OpticalFlowPredictor::new(OpticalFlowPredictorType::Rotational, &cam);
        pred.update_inter_frame_rotation(r);

        let p_ref = Vector3::new(0.4, -0.1, 3.0);
        let kp = cam.project(&p_ref).unwrap();
        let expected = cam.project(&(r * p_ref)).unwrap();
        let out = pred.predict_flow(&[kp]);
        assert_relative_eq!(out[0].coords, expected.coords, epsilon = 1e-9);
    }

    #[test]
    fn test_unknown_numeric_type_is_rejected() {
        assert_eq!(OpticalFlowPredictorType::try_from(1), Ok(OpticalFlowPredictorType::Rotational));
        let err = OpticalFlowPredictorType::try_from(7).unwrap_err();
        assert_eq!(err.to_string(), "unknown optical flow predictor option: 7");
    }

    #[test]
    fn test_unknown_yaml_type_is_rejected() {
        let parsed: Result<OpticalFlowPredictorType, _> = serde_yaml::from_str("magic");
        assert!(parsed.is_err());
        let parsed: OpticalFlowPredictorType = serde_yaml::from_str("rotational").unwrap();
        assert_eq!(parsed, OpticalFlowPredictorType::Rotational);
    }
}
