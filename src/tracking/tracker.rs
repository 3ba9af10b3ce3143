//! Feature tracker: detection, KLT tracking and geometric outlier rejection.
//!
//! Frames are passed by mutable reference to each call and never retained.
//! Outlier rejection marks rejected correspondences in both frames by
//! dropping their landmark association, so later correspondence searches
//! only see verified matches.

use std::time::Instant;

use anyhow::{ensure, Result};
use image::{GrayImage, Luma};
use imageproc::corners::corners_fast9;
use imageproc::drawing::draw_filled_circle_mut;
use nalgebra::{Matrix3, Point2, Vector3};
use tracing::debug;

use crate::geometry::translation::fuse_translations;
use crate::geometry::{
    ransac, CentralRelativeProblem, PointCloudProblem, TranslationGivenRotationProblem, TranslationOnlyProblem, SE3,
};
use crate::tracking::flow_predictor::OpticalFlowPredictor;
use crate::tracking::frame::{CameraModel, StereoFrame};
use crate::tracking::klt::{KltTracker, TrackStatus};
use crate::tracking::matching::{
    compute_median_disparity, find_matching_keypoints, find_matching_stereo_keypoints, find_outliers, KeypointMatch,
};
use crate::tracking::params::TrackerParams;
use crate::tracking::result::DebugTrackerInfo;
use crate::tracking::tracking_frame::Frame;
use crate::tracking::{KeypointStatus, TrackingStatus};
use crate::types::LandmarkId;

/// Pose together with the status of the rejection that produced it.
pub type StatusPose = (TrackingStatus, SE3);

pub struct Tracker {
    params: TrackerParams,
    camera: CameraModel,
    optical_flow_predictor: OpticalFlowPredictor,
    klt: KltTracker,

    /// Detection mask; zero pixels never receive new features.
    cam_mask: Option<GrayImage>,

    /// Next landmark id handed out by feature detection.
    landmark_count: u64,

    debug_info: DebugTrackerInfo,
}

impl Tracker {
    pub fn new(params: TrackerParams, camera: CameraModel) -> Result<Self> {
        params.validate()?;
        let optical_flow_predictor = OpticalFlowPredictor::new(params.optical_flow_predictor_type, &camera);
        let klt = KltTracker::new(params.klt_win_size, params.klt_max_iter, params.klt_eps, params.klt_max_level);
        debug!(
            "Tracker created with {:?} optical flow predictor",
            optical_flow_predictor.kind()
        );

        Ok(Self {
            params,
            camera,
            optical_flow_predictor,
            klt,
            cam_mask: None,
            landmark_count: 0,
            debug_info: DebugTrackerInfo::default(),
        })
    }

    pub fn params(&self) -> &TrackerParams {
        &self.params
    }

    pub fn camera(&self) -> &CameraModel {
        &self.camera
    }

    pub fn landmark_count(&self) -> u64 {
        self.landmark_count
    }

    /// Restricts detection to the non-zero pixels of `mask`.
    pub fn set_cam_mask(&mut self, mask: GrayImage) {
        self.cam_mask = Some(mask);
    }

    pub fn debug_info(&self) -> &DebugTrackerInfo {
        &self.debug_info
    }

    pub fn reset_debug_info(&mut self) {
        self.debug_info.reset();
    }

    /// Rotation from the reference camera into the current camera, used by
    /// the rotational flow predictor.
    pub fn update_inter_frame_rotation(&mut self, cur_r_ref: Matrix3<f64>) {
        self.optical_flow_predictor.update_inter_frame_rotation(cur_r_ref);
    }

    /// Detects FAST corners in regions not already covered by tracked
    /// features and appends them to `frame` with fresh landmark ids.
    /// Returns the number of new features.
    pub fn feature_detection(&mut self, frame: &mut Frame) -> Result<usize> {
        let start = Instant::now();
        frame.check()?;

        let existing = frame.active_features();
        let needed = self.params.max_features_per_frame.saturating_sub(existing);
        if needed == 0 {
            self.debug_info.nr_detected_features = 0;
            return Ok(0);
        }

        let (w, h) = frame.image.dimensions();
        let mut mask = match &self.cam_mask {
            Some(m) => {
                ensure!(
                    m.dimensions() == (w, h),
                    "Camera mask is {:?} but frame {} is {:?}",
                    m.dimensions(),
                    frame.id,
                    (w, h)
                );
                m.clone()
            }
            None => GrayImage::from_pixel(w, h, Luma([255])),
        };
        let radius = self.params.min_distance.round() as i32;
        for (kp, lmk) in frame.keypoints.iter().zip(&frame.landmarks) {
            if lmk.is_some() {
                draw_filled_circle_mut(&mut mask, (kp.x.round() as i32, kp.y.round() as i32), radius, Luma([0]));
            }
        }

        let mut corners: Vec<_> = corners_fast9(&frame.image, self.params.fast_threshold)
            .into_iter()
            .filter(|c| mask.get_pixel(c.x, c.y)[0] != 0)
            .collect();
        corners.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let min_dist_sq = self.params.min_distance * self.params.min_distance;
        let mut selected: Vec<(Point2<f64>, f64)> = Vec::with_capacity(needed);
        for c in corners {
            if selected.len() >= needed {
                break;
            }
            let p = Point2::new(c.x as f64, c.y as f64);
            if selected.iter().all(|(q, _)| (p - q).norm_squared() >= min_dist_sq) {
                selected.push((p, c.score as f64));
            }
        }

        if !frame.descriptors.is_empty() {
            // Descriptors no longer cover every keypoint.
            frame.descriptors.clear();
        }
        for (p, score) in &selected {
            frame.push_feature(*p, Some(LandmarkId::new(self.landmark_count)), 1, *score);
            self.landmark_count += 1;
        }

        self.debug_info.nr_detected_features = selected.len();
        self.debug_info.timing.feature_detection_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Frame {}: detected {} new features ({} existing)",
            frame.id,
            selected.len(),
            existing
        );
        Ok(selected.len())
    }

    /// Tracks the live features of `ref_frame` into `cur_frame`.
    ///
    /// `cur_frame`'s feature set is replaced by the successfully tracked
    /// features, which keep their landmark id and age by one. Features
    /// that are lost, leave the image or exceed the maximum age are dropped.
    pub fn feature_tracking(&mut self, ref_frame: &Frame, cur_frame: &mut Frame) -> Result<()> {
        let start = Instant::now();
        ref_frame.check()?;

        let alive: Vec<usize> = (0..ref_frame.len())
            .filter(|&i| ref_frame.landmarks[i].is_some())
            .collect();
        let px_ref: Vec<Point2<f64>> = alive.iter().map(|&i| ref_frame.keypoints[i]).collect();
        let px_pred = self.optical_flow_predictor.predict_flow(&px_ref);

        let prev_pyr = self.klt.build_pyramid(&ref_frame.image);
        let cur_pyr = self.klt.build_pyramid(&cur_frame.image);
        let tracked = self.klt.track(&prev_pyr, &cur_pyr, &px_ref, &px_pred);

        cur_frame.keypoints.clear();
        cur_frame.scores.clear();
        cur_frame.landmarks.clear();
        cur_frame.landmarks_age.clear();
        cur_frame.versors.clear();
        cur_frame.descriptors.clear();

        for (&i, (pos, status)) in alive.iter().zip(tracked) {
            if status != TrackStatus::Tracked || ref_frame.landmarks_age[i] > self.params.max_feature_age {
                continue;
            }
            cur_frame.push_feature(
                pos,
                ref_frame.landmarks[i],
                ref_frame.landmarks_age[i] + 1,
                ref_frame.scores[i],
            );
        }

        self.debug_info.nr_tracker_features = cur_frame.len();
        self.debug_info.timing.feature_tracking_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Frame {} -> {}: tracked {}/{} features",
            ref_frame.id,
            cur_frame.id,
            cur_frame.len(),
            alive.len()
        );
        Ok(())
    }

    /// Relative pose `ref_T_cur` (unit translation) from 2D-2D
    /// correspondences, rejecting outliers with essential-matrix RANSAC.
    pub fn geometric_outlier_rejection_mono(&mut self, ref_frame: &mut Frame, cur_frame: &mut Frame) -> StatusPose {
        let start = Instant::now();
        let matches = find_matching_keypoints(ref_frame, cur_frame);
        let (f_ref, f_cur) = bearings(ref_frame, cur_frame, &matches);

        let problem = CentralRelativeProblem { f_ref: &f_ref, f_cur: &f_cur };
        let config = self.params.ransac_config(self.params.ransac_threshold_mono);
        let Some(result) = ransac(&problem, &config) else {
            debug!("Mono RANSAC found no model for {} putatives", matches.len());
            self.debug_info.nr_mono_putatives = matches.len();
            return (TrackingStatus::Invalid, SE3::identity());
        };

        Self::remove_outliers_mono(ref_frame, cur_frame, &matches, &result.inliers);
        let status = self.mono_status(ref_frame, cur_frame, result.inliers.len());

        self.debug_info.nr_mono_inliers = result.inliers.len();
        self.debug_info.nr_mono_putatives = matches.len();
        self.debug_info.mono_ransac_iters = result.iterations;
        self.debug_info.timing.mono_rejection_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Mono RANSAC: {}/{} inliers in {} iterations, status {}",
            result.inliers.len(),
            matches.len(),
            result.iterations,
            status
        );
        (status, result.model)
    }

    /// As [`Self::geometric_outlier_rejection_mono`] with the rotation
    /// `ref_R_cur` supplied externally; only the translation direction is
    /// estimated (2-point RANSAC).
    pub fn geometric_outlier_rejection_mono_given_rotation(
        &mut self,
        ref_frame: &mut Frame,
        cur_frame: &mut Frame,
        ref_r_cur: &Matrix3<f64>,
    ) -> StatusPose {
        let start = Instant::now();
        let matches = find_matching_keypoints(ref_frame, cur_frame);
        let (f_ref, f_cur) = bearings(ref_frame, cur_frame, &matches);

        let problem = TranslationOnlyProblem {
            rotation: *ref_r_cur,
            f_ref: &f_ref,
            f_cur: &f_cur,
        };
        let config = self.params.ransac_config(self.params.ransac_threshold_mono);
        let Some(result) = ransac(&problem, &config) else {
            debug!("2-point RANSAC found no model for {} putatives", matches.len());
            self.debug_info.nr_mono_putatives = matches.len();
            return (TrackingStatus::Invalid, SE3::identity());
        };

        Self::remove_outliers_mono(ref_frame, cur_frame, &matches, &result.inliers);
        let status = self.mono_status(ref_frame, cur_frame, result.inliers.len());

        self.debug_info.nr_mono_inliers = result.inliers.len();
        self.debug_info.nr_mono_putatives = matches.len();
        self.debug_info.mono_ransac_iters = result.iterations;
        self.debug_info.timing.mono_rejection_ms = start.elapsed().as_secs_f64() * 1000.0;
        (status, SE3::from_rt(ref_r_cur, &result.model))
    }

    /// Relative pose `ref_T_cur` from stereo 3D-3D correspondences with
    /// Arun RANSAC.
    pub fn geometric_outlier_rejection_stereo(
        &mut self,
        ref_frame: &mut StereoFrame,
        cur_frame: &mut StereoFrame,
    ) -> StatusPose {
        let start = Instant::now();
        let matches = find_matching_stereo_keypoints(ref_frame, cur_frame);
        let points_ref: Vec<_> = matches.iter().map(|&(r, _)| ref_frame.keypoints_3d[r]).collect();
        let points_cur: Vec<_> = matches.iter().map(|&(_, c)| cur_frame.keypoints_3d[c]).collect();

        let problem = PointCloudProblem {
            points_ref: &points_ref,
            points_cur: &points_cur,
        };
        let config = self.params.ransac_config(self.params.ransac_threshold_stereo);
        let Some(result) = ransac(&problem, &config) else {
            debug!("Stereo RANSAC found no model for {} putatives", matches.len());
            self.debug_info.nr_stereo_putatives = matches.len();
            return (TrackingStatus::Invalid, SE3::identity());
        };

        Self::remove_outliers_stereo(ref_frame, cur_frame, &matches, &result.inliers);
        let status = if result.inliers.len() < self.params.min_nr_stereo_inliers {
            TrackingStatus::FewMatches
        } else {
            TrackingStatus::Valid
        };

        self.debug_info.nr_stereo_inliers = result.inliers.len();
        self.debug_info.nr_stereo_putatives = matches.len();
        self.debug_info.stereo_ransac_iters = result.iterations;
        self.debug_info.timing.stereo_rejection_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "Stereo RANSAC: {}/{} inliers in {} iterations, status {}",
            result.inliers.len(),
            matches.len(),
            result.iterations,
            status
        );
        (status, result.model)
    }

    /// Stereo outlier rejection with the rotation `ref_R_cur` supplied
    /// externally. Each correspondence yields a translation hypothesis
    /// `p_ref - R p_cur` whose covariance comes from stereo noise
    /// propagation; hypotheses are gated by Mahalanobis distance and fused
    /// by information weighting. Also returns the 3x3 covariance of the
    /// fused translation.
    pub fn geometric_outlier_rejection_stereo_given_rotation(
        &mut self,
        ref_frame: &mut StereoFrame,
        cur_frame: &mut StereoFrame,
        ref_r_cur: &Matrix3<f64>,
    ) -> (StatusPose, Matrix3<f64>) {
        let start = Instant::now();
        let matches = find_matching_stereo_keypoints(ref_frame, cur_frame);
        let sigma2 = self.params.stereo_pixel_sigma * self.params.stereo_pixel_sigma;
        let stereo_pt_cov = Matrix3::identity() * sigma2;

        let mut hypotheses = Vec::with_capacity(matches.len());
        let mut information = Vec::with_capacity(matches.len());
        let mut usable = Vec::with_capacity(matches.len());
        for (k, &(r, c)) in matches.iter().enumerate() {
            let ref_pt = Self::get_point3_and_covariance(ref_frame, &self.camera, r, &stereo_pt_cov, None);
            let cur_pt = Self::get_point3_and_covariance(cur_frame, &self.camera, c, &stereo_pt_cov, Some(ref_r_cur));
            let (Some((p_ref, cov_ref)), Some((p_cur, cov_cur))) = (ref_pt, cur_pt) else {
                continue;
            };
            let Some(info) = (cov_ref + cov_cur).try_inverse() else {
                continue;
            };
            hypotheses.push(p_ref - p_cur);
            information.push(info);
            usable.push(k);
        }

        let problem = TranslationGivenRotationProblem {
            hypotheses: &hypotheses,
            information: &information,
        };
        let config = self.params.ransac_config(self.params.ransac_threshold_stereo_given_rotation);
        let fused = ransac(&problem, &config).and_then(|result| {
            fuse_translations(&hypotheses, &information, &result.inliers)
                .map(|(t, cov)| (t, cov, result.inliers, result.iterations))
        });
        let Some((translation, covariance, inliers, iterations)) = fused else {
            debug!("1-point stereo RANSAC found no model for {} putatives", matches.len());
            self.debug_info.nr_stereo_putatives = matches.len();
            return ((TrackingStatus::Invalid, SE3::identity()), Matrix3::zeros());
        };

        // Inlier indices refer to `usable`, which indexes `matches`.
        let match_inliers: Vec<usize> = inliers.iter().map(|&i| usable[i]).collect();
        Self::remove_outliers_stereo(ref_frame, cur_frame, &matches, &match_inliers);
        let status = if inliers.len() < self.params.min_nr_stereo_inliers {
            TrackingStatus::FewMatches
        } else {
            TrackingStatus::Valid
        };

        self.debug_info.nr_stereo_inliers = inliers.len();
        self.debug_info.nr_stereo_putatives = matches.len();
        self.debug_info.stereo_ransac_iters = iterations;
        self.debug_info.timing.stereo_rejection_ms = start.elapsed().as_secs_f64() * 1000.0;
        debug!(
            "1-point stereo RANSAC: {}/{} inliers, status {}",
            inliers.len(),
            matches.len(),
            status
        );
        ((status, SE3::from_rt(ref_r_cur, &translation)), covariance)
    }

    /// Drops the landmark association of every outlier correspondence in
    /// both frames. Applying the same inlier set twice is a no-op.
    pub fn remove_outliers_mono(
        ref_frame: &mut Frame,
        cur_frame: &mut Frame,
        matches: &[KeypointMatch],
        inliers: &[usize],
    ) {
        for i in find_outliers(matches, inliers) {
            let (r, c) = matches[i];
            ref_frame.landmarks[r] = None;
            cur_frame.landmarks[c] = None;
        }
    }

    /// As [`Self::remove_outliers_mono`], also flagging the right keypoints
    /// of the outliers as `FailedArun`.
    pub fn remove_outliers_stereo(
        ref_frame: &mut StereoFrame,
        cur_frame: &mut StereoFrame,
        matches: &[KeypointMatch],
        inliers: &[usize],
    ) {
        for i in find_outliers(matches, inliers) {
            let (r, c) = matches[i];
            ref_frame.left.landmarks[r] = None;
            cur_frame.left.landmarks[c] = None;
            ref_frame.right_keypoints_status[r] = KeypointStatus::FailedArun;
            cur_frame.right_keypoints_status[c] = KeypointStatus::FailedArun;
        }
    }

    /// Tallies right keypoint statuses into the debug info. Returns the
    /// number of valid ones.
    pub fn check_status_right_keypoints(&mut self, statuses: &[KeypointStatus]) -> usize {
        let info = &mut self.debug_info;
        info.nr_valid_rkp = 0;
        info.nr_no_left_rect_rkp = 0;
        info.nr_no_right_rect_rkp = 0;
        info.nr_no_depth_rkp = 0;
        info.nr_failed_arun_rkp = 0;
        for status in statuses {
            match status {
                KeypointStatus::Valid => info.nr_valid_rkp += 1,
                KeypointStatus::NoLeftRect => info.nr_no_left_rect_rkp += 1,
                KeypointStatus::NoRightRect => info.nr_no_right_rect_rkp += 1,
                KeypointStatus::NoDepth => info.nr_no_depth_rkp += 1,
                KeypointStatus::FailedArun => info.nr_failed_arun_rkp += 1,
            }
        }
        info.nr_valid_rkp
    }

    /// Back-projects stereo point `point_id` and propagates the pixel
    /// covariance `stereo_pt_cov` (over `u_left, u_right, v`) through the
    /// back-projection Jacobian: `Σ = J Σ_px Jᵀ`. With `rotation`, both the
    /// point and the covariance are rotated (`R p`, `R Σ Rᵀ`).
    ///
    /// `None` if the index is out of range or the disparity is not positive.
    pub fn get_point3_and_covariance(
        stereo_frame: &StereoFrame,
        camera: &CameraModel,
        point_id: usize,
        stereo_pt_cov: &Matrix3<f64>,
        rotation: Option<&Matrix3<f64>>,
    ) -> Option<(Vector3<f64>, Matrix3<f64>)> {
        let left = stereo_frame.left.keypoints.get(point_id)?;
        let right = stereo_frame.right_keypoints.get(point_id)?;

        let point = camera.backproject_stereo(left.x, right.x, left.y)?;
        let jac = camera.backproject_stereo_jacobian(left.x, right.x, left.y)?;
        let cov = jac * stereo_pt_cov * jac.transpose();

        Some(match rotation {
            Some(r) => (r * point, r * cov * r.transpose()),
            None => (point, cov),
        })
    }

    fn mono_status(&self, ref_frame: &Frame, cur_frame: &Frame, nr_inliers: usize) -> TrackingStatus {
        let mut status = TrackingStatus::Valid;
        if nr_inliers < self.params.min_nr_mono_inliers {
            status = TrackingStatus::FewMatches;
        }
        let median_disparity = compute_median_disparity(ref_frame, cur_frame);
        if median_disparity < self.params.disparity_threshold {
            status = TrackingStatus::LowDisparity;
        }
        status
    }
}

fn bearings(ref_frame: &Frame, cur_frame: &Frame, matches: &[KeypointMatch]) -> (Vec<Vector3<f64>>, Vec<Vector3<f64>>) {
    matches
        .iter()
        .map(|&(r, c)| (ref_frame.versors[r], cur_frame.versors[c]))
        .unzip()
}
