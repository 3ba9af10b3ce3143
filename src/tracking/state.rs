//! Tracking and keypoint status codes.

use std::fmt;

/// Outcome of one geometric outlier-rejection call.
///
/// Every value other than `Valid` is an expected result the caller branches
/// on, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    /// Enough inliers and enough parallax.
    Valid,
    /// Model found but the median pixel displacement is too small to trust
    /// the translation direction.
    LowDisparity,
    /// Model found but with fewer inliers than required.
    FewMatches,
    /// No model could be estimated (too few correspondences or degenerate).
    Invalid,
    /// The check was not run.
    Disabled,
}

impl TrackingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Valid => "VALID",
            Self::LowDisparity => "LOW_DISPARITY",
            Self::FewMatches => "FEW_MATCHES",
            Self::Invalid => "INVALID",
            Self::Disabled => "DISABLED",
        }
    }
}

impl Default for TrackingStatus {
    fn default() -> Self {
        Self::Disabled
    }
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of the right-image counterpart of a left keypoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeypointStatus {
    Valid,
    /// The left keypoint fell outside the rectified image.
    NoLeftRect,
    /// No acceptable match was found along the epipolar line.
    NoRightRect,
    /// Match found but disparity maps outside the usable depth range.
    NoDepth,
    /// Rejected by 3D-3D outlier rejection.
    FailedArun,
}

impl Default for KeypointStatus {
    fn default() -> Self {
        Self::NoRightRect
    }
}
