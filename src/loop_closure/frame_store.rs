//! Per-keyframe place recognition data and its append-only store.

use std::collections::{BTreeMap, HashMap};

use anyhow::{ensure, Result};
use nalgebra::{Point2, Vector3};

use crate::loop_closure::descriptor::BriefExtractor;
use crate::tracking::matching::Descriptor;
use crate::tracking::{KeypointStatus, StereoFrame};
use crate::types::{FrameId, Timestamp};

/// Immutable snapshot of a keyframe. Only keypoints with a valid stereo
/// point and a descriptor are kept, so all per-keypoint vectors are
/// parallel.
#[derive(Debug, Clone)]
pub struct LcdFrame {
    pub timestamp: Timestamp,
    /// Keyframe id; the key in the LCD store.
    pub id: FrameId,
    /// Front-end frame id of the keyframe.
    pub id_kf: FrameId,
    pub keypoints: Vec<Point2<f64>>,
    /// Points in the left camera frame.
    pub keypoints_3d: Vec<Vector3<f64>>,
    pub descriptors: Vec<Descriptor>,
    pub versors: Vec<Vector3<f64>>,
}

impl LcdFrame {
    /// Builds the snapshot from a stereo keyframe, computing BRIEF
    /// descriptors when the left frame carries none.
    pub fn from_stereo_frame(
        id: FrameId,
        id_kf: FrameId,
        timestamp: Timestamp,
        stereo_frame: &StereoFrame,
        extractor: &BriefExtractor,
    ) -> Self {
        let left = &stereo_frame.left;
        let candidates: Vec<usize> = (0..left.len())
            .filter(|&i| stereo_frame.right_keypoints_status.get(i) == Some(&KeypointStatus::Valid))
            .collect();

        let descriptors: Vec<Option<Descriptor>> = if left.has_descriptors() {
            candidates.iter().map(|&i| Some(left.descriptors[i])).collect()
        } else {
            let kps: Vec<_> = candidates.iter().map(|&i| left.keypoints[i]).collect();
            extractor.compute(&left.image, &kps)
        };

        let mut frame = Self {
            timestamp,
            id,
            id_kf,
            keypoints: Vec::with_capacity(candidates.len()),
            keypoints_3d: Vec::with_capacity(candidates.len()),
            descriptors: Vec::with_capacity(candidates.len()),
            versors: Vec::with_capacity(candidates.len()),
        };
        for (&i, desc) in candidates.iter().zip(descriptors) {
            let Some(desc) = desc else { continue };
            frame.keypoints.push(left.keypoints[i]);
            frame.keypoints_3d.push(stereo_frame.keypoints_3d[i]);
            frame.descriptors.push(desc);
            frame.versors.push(left.versors[i]);
        }
        frame
    }

    pub fn len(&self) -> usize {
        self.keypoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keypoints.is_empty()
    }
}

/// Append-only collection of `LcdFrame`s keyed by keyframe id.
#[derive(Debug, Default)]
pub struct LcdFrameStore {
    frames: BTreeMap<FrameId, LcdFrame>,
    timestamps: HashMap<FrameId, Timestamp>,
}

impl LcdFrameStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids must increase strictly.
    pub fn push(&mut self, frame: LcdFrame) -> Result<FrameId> {
        if let Some(latest) = self.latest_id() {
            ensure!(
                frame.id > latest,
                "LCD frame {} appended out of order (latest is {})",
                frame.id,
                latest
            );
        }
        let id = frame.id;
        self.timestamps.insert(id, frame.timestamp);
        self.frames.insert(id, frame);
        Ok(id)
    }

    pub fn get(&self, id: FrameId) -> Option<&LcdFrame> {
        self.frames.get(&id)
    }

    pub fn timestamp(&self, id: FrameId) -> Option<Timestamp> {
        self.timestamps.get(&id).copied()
    }

    pub fn latest_id(&self) -> Option<FrameId> {
        self.frames.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}
