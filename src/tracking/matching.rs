//! Correspondence search between frames.
//!
//! Temporal correspondences come from shared landmark ids (features carry
//! their id while tracked); descriptor matching is used where ids are not
//! shared, e.g. between a query keyframe and a loop candidate.

use std::collections::{HashMap, HashSet};

use nalgebra::distance;
use tracing::warn;

use crate::tracking::frame::StereoFrame;
use crate::tracking::tracking_frame::Frame;
use crate::tracking::KeypointStatus;

/// 256-bit binary descriptor.
pub type Descriptor = [u8; 32];

/// Max descriptor distance for acceptance.
pub const TH_HIGH: u32 = 100;
/// Default ratio test threshold (best / second best).
pub const NN_RATIO: f64 = 0.75;

/// `(ref_index, cur_index)` pair observing the same landmark.
pub type KeypointMatch = (usize, usize);

/// Number of differing bits between two descriptors.
#[inline]
pub fn descriptor_distance(a: &Descriptor, b: &Descriptor) -> u32 {
    a.iter().zip(b.iter()).map(|(x, y)| (x ^ y).count_ones()).sum()
}

/// Keypoints of `ref_frame` and `cur_frame` that observe the same landmark.
/// Keypoints without a landmark are ignored.
pub fn find_matching_keypoints(ref_frame: &Frame, cur_frame: &Frame) -> Vec<KeypointMatch> {
    let ref_index: HashMap<_, _> = ref_frame
        .landmarks
        .iter()
        .enumerate()
        .filter_map(|(i, lmk)| lmk.map(|id| (id, i)))
        .collect();

    cur_frame
        .landmarks
        .iter()
        .enumerate()
        .filter_map(|(i, lmk)| {
            let id = (*lmk)?;
            ref_index.get(&id).map(|&r| (r, i))
        })
        .collect()
}

/// As [`find_matching_keypoints`], restricted to pairs whose right-image
/// counterparts are valid in both stereo frames.
pub fn find_matching_stereo_keypoints(ref_frame: &StereoFrame, cur_frame: &StereoFrame) -> Vec<KeypointMatch> {
    let matches = find_matching_keypoints(&ref_frame.left, &cur_frame.left);
    filter_stereo_matches(ref_frame, cur_frame, &matches)
}

/// Keeps the matches whose right keypoints are valid in both frames.
pub fn filter_stereo_matches(
    ref_frame: &StereoFrame,
    cur_frame: &StereoFrame,
    matches: &[KeypointMatch],
) -> Vec<KeypointMatch> {
    matches
        .iter()
        .copied()
        .filter(|&(r, c)| {
            ref_frame.right_keypoints_status.get(r) == Some(&KeypointStatus::Valid)
                && cur_frame.right_keypoints_status.get(c) == Some(&KeypointStatus::Valid)
        })
        .collect()
}

/// Indices into `matches` that are not in `inliers`.
pub fn find_outliers(matches: &[KeypointMatch], inliers: &[usize]) -> Vec<usize> {
    let inlier_set: HashSet<usize> = inliers.iter().copied().collect();
    (0..matches.len()).filter(|i| !inlier_set.contains(i)).collect()
}

/// Median pixel displacement of the correspondences between two frames.
/// Returns 0 when the frames share no landmark.
pub fn compute_median_disparity(ref_frame: &Frame, cur_frame: &Frame) -> f64 {
    let matches = find_matching_keypoints(ref_frame, cur_frame);
    if matches.is_empty() {
        warn!("No matches for median disparity computation");
        return 0.0;
    }

    let mut disparities: Vec<f64> = matches
        .iter()
        .map(|&(r, c)| distance(&ref_frame.keypoints[r], &cur_frame.keypoints[c]))
        .collect();
    let mid = disparities.len() / 2;
    let (_, median, _) = disparities.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
    *median
}

/// Brute-force descriptor matching with Lowe's ratio test.
///
/// Returns `(query_index, train_index)` pairs; each query descriptor is
/// matched at most once.
pub fn match_descriptors(query: &[Descriptor], train: &[Descriptor], ratio: f64) -> Vec<KeypointMatch> {
    let mut matches = Vec::new();
    for (qi, q) in query.iter().enumerate() {
        let mut best_dist = u32::MAX;
        let mut second_dist = u32::MAX;
        let mut best_idx = None;

        for (ti, t) in train.iter().enumerate() {
            let dist = descriptor_distance(q, t);
            if dist < best_dist {
                second_dist = best_dist;
                best_dist = dist;
                best_idx = Some(ti);
            } else if dist < second_dist {
                second_dist = dist;
            }
        }

        if let Some(ti) = best_idx {
            if best_dist > TH_HIGH {
                continue;
            }
            if second_dist == u32::MAX || (best_dist as f64) < ratio * second_dist as f64 {
                matches.push((qi, ti));
            }
        }
    }
    matches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::frame::CameraModel;
    use crate::types::{FrameId, LandmarkId};
    use image::GrayImage;
    use nalgebra::Point2;

    fn frame_with(landmarks: &[Option<u64>], xs: &[f64]) -> Frame {
        let mut frame = Frame::new(FrameId::new(0), 0, GrayImage::new(8, 8), CameraModel::default());
        for (lmk, &x) in landmarks.iter().zip(xs) {
            frame.push_feature(Point2::new(x, 0.0), lmk.map(LandmarkId::new), 1, 0.0);
        }
        frame
    }

    #[test]
    fn test_descriptor_distance() {
        let a = [0u8; 32];
        let mut b = [0u8; 32];
        b[0] = 0b1011;
        b[31] = 0xFF;
        assert_eq!(descriptor_distance(&a, &b), 11);
        assert_eq!(descriptor_distance(&b, &b), 0);
    }

    #[test]
    fn test_find_matching_keypoints_by_landmark() {
        let ref_frame = frame_with(&[Some(1), Some(2), None, Some(4)], &[0.0; 4]);
        let cur_frame = frame_with(&[Some(4), Some(3), Some(1), None], &[0.0; 4]);
        let mut matches = find_matching_keypoints(&ref_frame, &cur_frame);
        matches.sort();
        assert_eq!(matches, vec![(0, 2), (3, 0)]);
    }

    #[test]
    fn test_find_outliers() {
        let matches = vec![(0, 0), (1, 1), (2, 2), (3, 3)];
        assert_eq!(find_outliers(&matches, &[0, 2]), vec![1, 3]);
        assert!(find_outliers(&matches, &[0, 1, 2, 3]).is_empty());
    }

    #[test]
    fn test_median_disparity() {
        let ref_frame = frame_with(&[Some(1), Some(2), Some(3)], &[0.0, 0.0, 0.0]);
        let cur_frame = frame_with(&[Some(1), Some(2), Some(3)], &[1.0, 5.0, 2.0]);
        assert_eq!(compute_median_disparity(&ref_frame, &cur_frame), 2.0);

        let unrelated = frame_with(&[Some(9)], &[0.0]);
        assert_eq!(compute_median_disparity(&ref_frame, &unrelated), 0.0);
    }

    #[test]
    fn test_match_descriptors_ratio_test() {
        let mut a = [0u8; 32];
        a[0] = 0xFF;
        let b = [0u8; 32];
        let mut c = [0u8; 32];
        c[5] = 0x0F;

        // `a` matches itself exactly, far from `b` and `c`.
        let matches = match_descriptors(&[a], &[b, a, c], 0.7);
        assert_eq!(matches, vec![(0, 1)]);

        // Two equally close candidates fail the ratio test.
        let matches = match_descriptors(&[b], &[a, a], 0.7);
        assert!(matches.is_empty());
    }
}
