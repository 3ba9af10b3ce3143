//! Tracker configuration.

use anyhow::{ensure, Result};
use serde::Deserialize;

use crate::geometry::RansacConfig;
use crate::tracking::flow_predictor::OpticalFlowPredictorType;
use crate::tracking::frame::StereoMatchingParams;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TrackerParams {
    // KLT
    /// Full window size in pixels.
    pub klt_win_size: usize,
    pub klt_max_iter: usize,
    pub klt_max_level: usize,
    pub klt_eps: f32,
    /// Features tracked for longer than this are dropped.
    pub max_feature_age: usize,

    // Detection
    pub max_features_per_frame: usize,
    /// FAST intensity threshold.
    pub fast_threshold: u8,
    /// Minimum pixel distance between features.
    pub min_distance: f64,

    // Outlier rejection
    /// Mono RANSAC threshold as `1 - cos(angle)`.
    pub ransac_threshold_mono: f64,
    /// Arun RANSAC threshold in meters.
    pub ransac_threshold_stereo: f64,
    /// Mahalanobis (chi-square, 3 dof) gate for stereo with given rotation.
    pub ransac_threshold_stereo_given_rotation: f64,
    pub ransac_max_iterations: usize,
    pub ransac_probability: f64,
    pub ransac_randomize: bool,
    pub ransac_seed: u64,
    pub min_nr_mono_inliers: usize,
    pub min_nr_stereo_inliers: usize,
    /// Median pixel disparity below which mono results are `LowDisparity`.
    pub disparity_threshold: f64,
    /// Pixel standard deviation of stereo measurements.
    pub stereo_pixel_sigma: f64,

    pub optical_flow_predictor_type: OpticalFlowPredictorType,
    pub stereo_matching: StereoMatchingParams,
}

impl Default for TrackerParams {
    fn default() -> Self {
        Self {
            klt_win_size: 21,
            klt_max_iter: 30,
            klt_max_level: 3,
            klt_eps: 0.01,
            max_feature_age: 25,
            max_features_per_frame: 400,
            fast_threshold: 20,
            min_distance: 10.0,
            ransac_threshold_mono: 1e-6,
            ransac_threshold_stereo: 0.1,
            ransac_threshold_stereo_given_rotation: 7.81,
            ransac_max_iterations: 100,
            ransac_probability: 0.995,
            ransac_randomize: false,
            ransac_seed: 0,
            min_nr_mono_inliers: 10,
            min_nr_stereo_inliers: 5,
            disparity_threshold: 0.5,
            stereo_pixel_sigma: 1.0,
            optical_flow_predictor_type: OpticalFlowPredictorType::default(),
            stereo_matching: StereoMatchingParams::default(),
        }
    }
}

impl TrackerParams {
    pub fn validate(&self) -> Result<()> {
        ensure!(self.klt_win_size >= 3, "klt_win_size must be at least 3");
        ensure!(self.klt_max_iter > 0, "klt_max_iter must be positive");
        ensure!(self.ransac_max_iterations > 0, "ransac_max_iterations must be positive");
        ensure!(
            self.ransac_probability > 0.0 && self.ransac_probability < 1.0,
            "ransac_probability must be in (0, 1)"
        );
        ensure!(self.ransac_threshold_mono > 0.0, "ransac_threshold_mono must be positive");
        ensure!(self.ransac_threshold_stereo > 0.0, "ransac_threshold_stereo must be positive");
        ensure!(self.stereo_pixel_sigma > 0.0, "stereo_pixel_sigma must be positive");
        ensure!(
            self.stereo_matching.min_depth > 0.0 && self.stereo_matching.min_depth < self.stereo_matching.max_depth,
            "stereo depth range is empty"
        );
        Ok(())
    }

    pub(crate) fn ransac_config(&self, threshold: f64) -> RansacConfig {
        RansacConfig {
            max_iterations: self.ransac_max_iterations,
            threshold,
            probability: self.ransac_probability,
            randomize: self.ransac_randomize,
            seed: self.ransac_seed,
        }
    }
}
