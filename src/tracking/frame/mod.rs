//! Frame-level data: camera model and stereo frames.

pub mod camera;
pub mod stereo;

pub use camera::CameraModel;
pub use stereo::{StereoFrame, StereoMatchingParams};
