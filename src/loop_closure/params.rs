//! Loop closure detector configuration.

use anyhow::{bail, ensure, Result};
use serde::Deserialize;

use crate::geometry::RansacConfig;
use crate::loop_closure::pose_graph::PoseGraphConfig;
use crate::loop_closure::types::{GeomVerifOption, IslandScoring, PoseRecoveryOption};

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LcdParams {
    // Place recognition
    /// Normalize scores by the similarity to the previous keyframe.
    pub use_nss: bool,
    /// Minimum normalized score of a candidate.
    pub alpha: f64,
    /// Minimum similarity between the query and the previous keyframe.
    pub min_nss_factor: f64,
    pub max_db_results: usize,

    // Temporal consistency
    /// Consecutive consistent queries required before a match is accepted.
    pub min_temporal_matches: usize,
    /// Minimum id gap between query and match.
    pub dist_local: u64,
    pub max_nr_frames_between_queries: u64,
    pub max_nr_frames_between_islands: u64,

    // Islands
    pub min_matches_per_island: usize,
    pub max_intraisland_gap: u64,
    pub island_scoring: IslandScoring,

    // Geometric verification
    pub geom_check: GeomVerifOption,
    /// Minimum descriptor matches between query and candidate.
    pub min_correspondences: usize,
    pub lowe_ratio: f64,
    pub max_ransac_iterations_mono: usize,
    pub ransac_probability_mono: f64,
    pub ransac_threshold_mono: f64,
    pub ransac_inlier_threshold_mono: usize,

    // Pose recovery
    pub pose_recovery_option: PoseRecoveryOption,
    pub max_ransac_iterations_stereo: usize,
    pub ransac_probability_stereo: f64,
    /// Point distance threshold in meters.
    pub ransac_threshold_stereo: f64,
    pub ransac_inlier_threshold_stereo: usize,
    pub ransac_randomize: bool,
    pub ransac_seed: u64,

    // Factors
    pub odom_rot_sigma: f64,
    pub odom_trans_sigma: f64,
    pub loop_rot_sigma: f64,
    pub loop_trans_sigma: f64,

    pub pose_graph: PoseGraphConfig,
}

impl Default for LcdParams {
    fn default() -> Self {
        Self {
            use_nss: true,
            alpha: 0.1,
            min_nss_factor: 0.005,
            max_db_results: 50,
            min_temporal_matches: 3,
            dist_local: 20,
            max_nr_frames_between_queries: 2,
            max_nr_frames_between_islands: 3,
            min_matches_per_island: 1,
            max_intraisland_gap: 3,
            island_scoring: IslandScoring::Sum,
            geom_check: GeomVerifOption::Nister,
            min_correspondences: 12,
            lowe_ratio: 0.7,
            max_ransac_iterations_mono: 500,
            ransac_probability_mono: 0.99,
            ransac_threshold_mono: 1e-6,
            ransac_inlier_threshold_mono: 10,
            pose_recovery_option: PoseRecoveryOption::GivenRot,
            max_ransac_iterations_stereo: 500,
            ransac_probability_stereo: 0.995,
            ransac_threshold_stereo: 0.15,
            ransac_inlier_threshold_stereo: 5,
            ransac_randomize: false,
            ransac_seed: 0,
            odom_rot_sigma: 0.01,
            odom_trans_sigma: 0.1,
            loop_rot_sigma: 0.01,
            loop_trans_sigma: 0.1,
            pose_graph: PoseGraphConfig::default(),
        }
    }
}

impl LcdParams {
    pub fn validate(&self) -> Result<()> {
        if self.pose_recovery_option == PoseRecoveryOption::GivenRot && self.geom_check == GeomVerifOption::None {
            bail!("GIVEN_ROT pose recovery needs the rotation from NISTER geometric verification");
        }
        ensure!(self.alpha >= 0.0, "alpha must be non-negative");
        // Scores are divided by the NSS factor.
        ensure!(
            !self.use_nss || self.min_nss_factor > 0.0,
            "min_nss_factor must be positive when use_nss is set"
        );
        ensure!(self.max_db_results > 0, "max_db_results must be positive");
        ensure!(self.min_correspondences >= 8, "min_correspondences must be at least 8");
        ensure!(
            self.lowe_ratio > 0.0 && self.lowe_ratio <= 1.0,
            "lowe_ratio must be in (0, 1]"
        );
        ensure!(
            self.ransac_probability_mono > 0.0 && self.ransac_probability_mono < 1.0,
            "ransac_probability_mono must be in (0, 1)"
        );
        ensure!(
            self.ransac_probability_stereo > 0.0 && self.ransac_probability_stereo < 1.0,
            "ransac_probability_stereo must be in (0, 1)"
        );
        ensure!(
            self.ransac_threshold_mono > 0.0 && self.ransac_threshold_stereo > 0.0,
            "RANSAC thresholds must be positive"
        );
        ensure!(
            self.odom_rot_sigma > 0.0
                && self.odom_trans_sigma > 0.0
                && self.loop_rot_sigma > 0.0
                && self.loop_trans_sigma > 0.0,
            "factor sigmas must be positive"
        );
        Ok(())
    }

    pub(crate) fn mono_ransac_config(&self) -> RansacConfig {
        RansacConfig {
            max_iterations: self.max_ransac_iterations_mono,
            threshold: self.ransac_threshold_mono,
            probability: self.ransac_probability_mono,
            randomize: self.ransac_randomize,
            seed: self.ransac_seed,
        }
    }

    pub(crate) fn stereo_ransac_config(&self) -> RansacConfig {
        RansacConfig {
            max_iterations: self.max_ransac_iterations_stereo,
            threshold: self.ransac_threshold_stereo,
            probability: self.ransac_probability_stereo,
            randomize: self.ransac_randomize,
            seed: self.ransac_seed,
        }
    }
}
