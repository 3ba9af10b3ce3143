//! Tracking `Frame` representation.
//!
//! A `Frame` is the per-image feature container the Tracker mutates: the
//! grayscale image, keypoints with their landmark association and age,
//! bearing vectors, and optional binary descriptors. All per-feature vectors
//! are parallel and indexed by feature index.

use anyhow::{ensure, Result};
use image::GrayImage;
use nalgebra::{Point2, Vector3};

use crate::tracking::frame::CameraModel;
use crate::tracking::matching::Descriptor;
use crate::types::{FrameId, LandmarkId, Timestamp};

#[derive(Debug, Clone)]
pub struct Frame {
    pub id: FrameId,
    pub timestamp: Timestamp,
    pub image: GrayImage,
    pub camera: CameraModel,
    pub is_keyframe: bool,

    pub keypoints: Vec<Point2<f64>>,
    /// Corner response at detection time.
    pub scores: Vec<f64>,
    /// `None` once a correspondence was rejected as an outlier.
    pub landmarks: Vec<Option<LandmarkId>>,
    /// Number of consecutive frames the feature has been tracked.
    pub landmarks_age: Vec<usize>,
    pub versors: Vec<Vector3<f64>>,
    /// Either empty or one descriptor per keypoint.
    pub descriptors: Vec<Descriptor>,
}

impl Frame {
    pub fn new(id: FrameId, timestamp: Timestamp, image: GrayImage, camera: CameraModel) -> Self {
        Self {
            id,
            timestamp,
            image,
            camera,
            is_keyframe: false,
            keypoints: Vec::new(),
            scores: Vec::new(),
            landmarks: Vec::new(),
            landmarks_age: Vec::new(),
            versors: Vec::new(),
            descriptors: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }

    /// Appends a feature, computing its bearing from the camera model.
    pub fn push_feature(&mut self, keypoint: Point2<f64>, landmark: Option<LandmarkId>, age: usize, score: f64) {
        self.versors.push(self.camera.bearing(&keypoint));
        self.keypoints.push(keypoint);
        self.landmarks.push(landmark);
        self.landmarks_age.push(age);
        self.scores.push(score);
    }

    /// Number of keypoints still associated with a landmark.
    pub fn active_features(&self) -> usize {
        self.landmarks.iter().filter(|l| l.is_some()).count()
    }

    pub fn has_descriptors(&self) -> bool {
        !self.descriptors.is_empty() && self.descriptors.len() == self.keypoints.len()
    }

    /// Checks that all per-feature vectors are parallel.
    pub fn check(&self) -> Result<()> {
        let n = self.keypoints.len();
        ensure!(
            self.scores.len() == n
                && self.landmarks.len() == n
                && self.landmarks_age.len() == n
                && self.versors.len() == n,
            "frame {} has inconsistent feature buffers ({} keypoints)",
            self.id,
            n
        );
        ensure!(
            self.descriptors.is_empty() || self.descriptors.len() == n,
            "frame {} has {} descriptors for {} keypoints",
            self.id,
            self.descriptors.len(),
            n
        );
        Ok(())
    }
}
