//! Tracker diagnostics.
//!
//! `DebugTrackerInfo` accumulates counts and timings for the frame being
//! processed; callers read it through `Tracker::debug_info` and reset it
//! with `Tracker::reset_debug_info`.

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DebugTrackerInfo {
    pub nr_detected_features: usize,
    pub nr_tracker_features: usize,

    pub nr_mono_inliers: usize,
    pub nr_mono_putatives: usize,
    pub nr_stereo_inliers: usize,
    pub nr_stereo_putatives: usize,
    pub mono_ransac_iters: usize,
    pub stereo_ransac_iters: usize,

    // Right keypoint status counts.
    pub nr_valid_rkp: usize,
    pub nr_no_left_rect_rkp: usize,
    pub nr_no_right_rect_rkp: usize,
    pub nr_no_depth_rkp: usize,
    pub nr_failed_arun_rkp: usize,

    pub timing: TimingStats,
}

/// Timing breakdown in milliseconds.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimingStats {
    pub feature_detection_ms: f64,
    pub feature_tracking_ms: f64,
    pub mono_rejection_ms: f64,
    pub stereo_rejection_ms: f64,
}

impl DebugTrackerInfo {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
