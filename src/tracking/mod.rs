//! Front-end tracking: feature detection, KLT tracking between frames and
//! geometric outlier rejection (mono and stereo).

pub mod flow_predictor;
pub mod frame;
pub mod klt;
pub mod matching;
pub mod params;
pub mod result;
pub mod state;
pub mod tracker;
pub mod tracking_frame;

pub use flow_predictor::{OpticalFlowPredictor, OpticalFlowPredictorType};
pub use frame::{CameraModel, StereoFrame, StereoMatchingParams};
pub use params::TrackerParams;
pub use result::{DebugTrackerInfo, TimingStats};
pub use state::{KeypointStatus, TrackingStatus};
pub use tracker::{StatusPose, Tracker};
pub use tracking_frame::Frame;
