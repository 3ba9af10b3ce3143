//! Constraint records handed to the pose-graph solver.

use nalgebra::Vector6;

use crate::geometry::SE3;
use crate::types::FrameId;

/// Diagonal Gaussian noise over the `[φ, t]` tangent of a pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoiseModel {
    pub sigmas: Vector6<f64>,
}

impl NoiseModel {
    pub fn from_sigmas(rotation_sigma: f64, translation_sigma: f64) -> Self {
        Self {
            sigmas: Vector6::new(
                rotation_sigma,
                rotation_sigma,
                rotation_sigma,
                translation_sigma,
                translation_sigma,
                translation_sigma,
            ),
        }
    }

    /// Same model with every sigma multiplied by `factor`.
    pub fn scaled(&self, factor: f64) -> Self {
        Self {
            sigmas: self.sigmas * factor,
        }
    }

    /// Divides each residual component by its sigma.
    pub fn whiten(&self, residual: &Vector6<f64>) -> Vector6<f64> {
        residual.component_div(&self.sigmas)
    }
}

/// Absolute odometry estimate of one keyframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OdometryFactor {
    pub cur_key: FrameId,
    pub w_pose_blkf: SE3,
    pub noise: NoiseModel,
}

/// Relative pose between a matched keyframe and the query keyframe.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopClosureFactor {
    pub ref_key: FrameId,
    pub cur_key: FrameId,
    pub ref_pose_cur: SE3,
    pub noise: NoiseModel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Factor {
    Odometry(OdometryFactor),
    LoopClosure(LoopClosureFactor),
}

/// Kind of between-factor stored in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EdgeType {
    Odometry,
    LoopClosure,
}

/// Factor as stored by the solver.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum GraphFactor {
    Prior {
        key: FrameId,
        pose: SE3,
        noise: NoiseModel,
    },
    Between {
        key_i: FrameId,
        key_j: FrameId,
        /// `pose_i⁻¹ · pose_j`
        measurement: SE3,
        noise: NoiseModel,
        edge_type: EdgeType,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_noise_whitening() {
        let noise = NoiseModel::from_sigmas(0.1, 0.5).scaled(2.0);
        let r = Vector6::new(0.2, 0.2, 0.2, 1.0, 1.0, 1.0);
        assert_relative_eq!(noise.whiten(&r), Vector6::repeat(1.0), epsilon = 1e-12);
    }
}
