//! Loop closure status codes, configuration enums and per-query records.

use std::cmp::Ordering;
use std::fmt;

use serde::Deserialize;

use crate::geometry::SE3;
use crate::types::{FrameId, OptionError, Timestamp};

/// Outcome of one loop closure query. Declaration order is the order in
/// which the checks run; the first failing check determines the status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LcdStatus {
    LoopDetected,
    NoMatches,
    LowNssFactor,
    LowScore,
    NoGroups,
    FailedTemporalConstraint,
    FailedGeomVerification,
    FailedPoseRecovery,
}

impl LcdStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LoopDetected => "LOOP_DETECTED",
            Self::NoMatches => "NO_MATCHES",
            Self::LowNssFactor => "LOW_NSS_FACTOR",
            Self::LowScore => "LOW_SCORE",
            Self::NoGroups => "NO_GROUPS",
            Self::FailedTemporalConstraint => "FAILED_TEMPORAL_CONSTRAINT",
            Self::FailedGeomVerification => "FAILED_GEOM_VERIFICATION",
            Self::FailedPoseRecovery => "FAILED_POSE_RECOVERY",
        }
    }
}

impl fmt::Display for LcdStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 2D-2D check run on the candidate pair before pose recovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GeomVerifOption {
    /// Essential-matrix RANSAC over bearing vectors.
    Nister,
    /// Accept any pair with enough descriptor matches.
    None,
}

impl TryFrom<i32> for GeomVerifOption {
    type Error = OptionError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Nister),
            1 => Ok(Self::None),
            _ => Err(OptionError {
                option: "geometric verification",
                value,
            }),
        }
    }
}

/// How the relative pose of a verified pair is computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PoseRecoveryOption {
    /// 3-point RANSAC on stereo points with Arun's method.
    RansacArun,
    /// Rotation from geometric verification, translation from the stereo
    /// points.
    GivenRot,
}

impl TryFrom<i32> for PoseRecoveryOption {
    type Error = OptionError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::RansacArun),
            1 => Ok(Self::GivenRot),
            _ => Err(OptionError {
                option: "pose recovery",
                value,
            }),
        }
    }
}

/// Aggregate of member scores used as an island's score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IslandScoring {
    #[default]
    Sum,
    Mean,
    Max,
}

impl IslandScoring {
    pub fn aggregate(&self, scores: &[f64]) -> f64 {
        match self {
            Self::Sum => scores.iter().sum(),
            Self::Mean if scores.is_empty() => 0.0,
            Self::Mean => scores.iter().sum::<f64>() / scores.len() as f64,
            Self::Max => scores.iter().copied().fold(0.0, f64::max),
        }
    }
}

impl TryFrom<i32> for IslandScoring {
    type Error = OptionError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Sum),
            1 => Ok(Self::Mean),
            2 => Ok(Self::Max),
            _ => Err(OptionError {
                option: "island scoring",
                value,
            }),
        }
    }
}

/// A contiguous range of database frames that matched the query.
///
/// Islands compare by `island_score` only.
#[derive(Debug, Clone, Copy, Default)]
pub struct MatchIsland {
    pub start_id: FrameId,
    pub end_id: FrameId,
    pub island_score: f64,
    pub best_id: FrameId,
    pub best_score: f64,
}

impl MatchIsland {
    pub fn new(start_id: FrameId, end_id: FrameId) -> Self {
        Self::with_score(start_id, end_id, 0.0)
    }

    pub fn with_score(start_id: FrameId, end_id: FrameId, island_score: f64) -> Self {
        debug_assert!(end_id >= start_id);
        Self {
            start_id,
            end_id,
            island_score,
            best_id: FrameId::default(),
            best_score: 0.0,
        }
    }

    /// Number of frame ids spanned, `end_id - start_id + 1`.
    pub fn size(&self) -> u64 {
        self.end_id.0 - self.start_id.0 + 1
    }

    /// Whether the two id ranges overlap or are at most `margin` frames
    /// apart.
    pub fn is_near(&self, other: &MatchIsland, margin: u64) -> bool {
        self.start_id.0 <= other.end_id.0.saturating_add(margin)
            && other.start_id.0 <= self.end_id.0.saturating_add(margin)
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

impl PartialEq for MatchIsland {
    fn eq(&self, other: &Self) -> bool {
        self.island_score == other.island_score
    }
}

impl PartialOrd for MatchIsland {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        self.island_score.partial_cmp(&other.island_score)
    }
}

/// Outcome of one verification attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LoopResult {
    pub status: LcdStatus,
    pub query_id: FrameId,
    pub match_id: FrameId,
    /// `match_T_query` in the body frame; identity unless a loop was found.
    pub relative_pose: SE3,
}

impl LoopResult {
    pub fn failure(status: LcdStatus, query_id: FrameId, match_id: FrameId) -> Self {
        Self {
            status,
            query_id,
            match_id,
            relative_pose: SE3::identity(),
        }
    }

    pub fn is_loop(&self) -> bool {
        self.status == LcdStatus::LoopDetected
    }

    pub fn as_str(&self) -> &'static str {
        self.status.as_str()
    }
}

impl Default for LoopResult {
    fn default() -> Self {
        Self::failure(LcdStatus::NoMatches, FrameId::default(), FrameId::default())
    }
}

/// Diagnostics recorded for each query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LcdDebugInfo {
    pub timestamp: Timestamp,
    pub loop_result: LoopResult,

    pub mono_input_size: usize,
    pub mono_inliers: usize,
    pub mono_iter: usize,

    pub stereo_input_size: usize,
    pub stereo_inliers: usize,
    pub stereo_iter: usize,

    pub pgo_size: usize,
    pub pgo_lc_count: usize,
    pub pgo_lc_inliers: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_strings() {
        assert_eq!(LcdStatus::LoopDetected.to_string(), "LOOP_DETECTED");
        assert_eq!(LcdStatus::FailedTemporalConstraint.as_str(), "FAILED_TEMPORAL_CONSTRAINT");
        assert!(LcdStatus::NoMatches < LcdStatus::LowNssFactor);
        assert!(LcdStatus::FailedGeomVerification < LcdStatus::FailedPoseRecovery);
    }

    #[test]
    fn test_island_size_and_order() {
        let a = MatchIsland::with_score(FrameId::new(3), FrameId::new(7), 0.8);
        let b = MatchIsland::with_score(FrameId::new(20), FrameId::new(20), 0.95);
        assert_eq!(a.size(), 5);
        assert_eq!(b.size(), 1);
        assert!(a < b);
        assert!(b > a);
    }

    #[test]
    fn test_island_clear_and_near() {
        let mut a = MatchIsland::with_score(FrameId::new(10), FrameId::new(12), 1.0);
        let b = MatchIsland::new(FrameId::new(14), FrameId::new(15));
        assert!(a.is_near(&b, 2));
        assert!(!a.is_near(&b, 1));
        a.clear();
        assert_eq!(a.start_id, FrameId::new(0));
        assert_eq!(a.island_score, 0.0);
    }

    #[test]
    fn test_scoring_policies() {
        let scores = [0.2, 0.5, 0.3];
        assert!((IslandScoring::Sum.aggregate(&scores) - 1.0).abs() < 1e-12);
        assert!((IslandScoring::Mean.aggregate(&scores) - 1.0 / 3.0).abs() < 1e-12);
        assert!((IslandScoring::Max.aggregate(&scores) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_option_tags() {
        assert_eq!(GeomVerifOption::try_from(0), Ok(GeomVerifOption::Nister));
        assert_eq!(PoseRecoveryOption::try_from(1), Ok(PoseRecoveryOption::GivenRot));
        let err = IslandScoring::try_from(9).unwrap_err();
        assert_eq!(err.to_string(), "unknown island scoring option: 9");
        let parsed: PoseRecoveryOption = serde_yaml::from_str("RANSAC_ARUN").unwrap();
        assert_eq!(parsed, PoseRecoveryOption::RansacArun);
        assert!(serde_yaml::from_str::<GeomVerifOption>("SEVEN_POINT").is_err());
    }

    #[test]
    fn test_loop_result_default() {
        let r = LoopResult::default();
        assert!(!r.is_loop());
        assert_eq!(r.as_str(), "NO_MATCHES");
    }
}
