//! Objects crossing the loop closure detector's boundary.

use std::collections::BTreeMap;

use crate::geometry::SE3;
use crate::loop_closure::factors::GraphFactor;
use crate::tracking::StereoFrame;
use crate::types::{FrameId, Timestamp};

/// One keyframe to process.
#[derive(Debug, Clone)]
pub struct LcdInputPayload {
    pub timestamp_kf: Timestamp,
    pub cur_kf_id: FrameId,
    pub stereo_frame: StereoFrame,
    /// Odometry estimate of the body pose in the world frame.
    pub w_pose_blkf: SE3,
}

impl LcdInputPayload {
    pub fn new(timestamp_kf: Timestamp, cur_kf_id: FrameId, stereo_frame: StereoFrame, w_pose_blkf: SE3) -> Self {
        Self {
            timestamp_kf,
            cur_kf_id,
            stereo_frame,
            w_pose_blkf,
        }
    }
}

/// Solver state after the latest factor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PoseGraphSnapshot {
    /// Optimized body pose per keyframe.
    pub values: BTreeMap<FrameId, SE3>,
    pub factors: Vec<GraphFactor>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LcdOutputPayload {
    pub is_loop_closure: bool,
    pub timestamp_kf: Timestamp,
    pub timestamp_query: Timestamp,
    pub timestamp_match: Timestamp,
    pub id_match: FrameId,
    pub id_recent: FrameId,
    /// `match_T_query` in the body frame.
    pub relative_pose: SE3,
    /// Correction from the odometry world frame to the optimized map,
    /// `optimal · odometry⁻¹` of the latest keyframe.
    pub w_pose_map: SE3,
    pub values: BTreeMap<FrameId, SE3>,
    pub factor_graph: Vec<GraphFactor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_output_is_empty() {
        let out = LcdOutputPayload::default();
        assert!(!out.is_loop_closure);
        assert_eq!(out.id_match, FrameId::new(0));
        assert_eq!(out.w_pose_map, SE3::identity());
        assert!(out.values.is_empty() && out.factor_graph.is_empty());
    }
}
