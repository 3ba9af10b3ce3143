//! Geometry utilities: SE3 transforms, RANSAC and the minimal solvers used
//! for outlier rejection.

pub mod absolute_orientation;
pub mod essential;
pub mod five_point;
pub mod ransac;
pub mod se3;
pub mod so3;
pub mod translation;

pub use absolute_orientation::{arun, PointCloudProblem};
pub use essential::{CentralRelativeProblem, TranslationOnlyProblem};
pub use five_point::essentials_from_five;
pub use ransac::{ransac, RansacConfig, RansacProblem, RansacResult};
pub use se3::SE3;
pub use translation::TranslationGivenRotationProblem;
