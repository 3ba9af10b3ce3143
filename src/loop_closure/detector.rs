//! Loop closure detector.
//!
//! Each keyframe runs through a fixed sequence of checks; the first one
//! that fails determines the [`LcdStatus`] of the query:
//!
//! 1. the place index returns candidates,
//! 2. the query is similar enough to the previous keyframe (NSS factor),
//! 3. the best normalized candidate score reaches `alpha`,
//! 4. candidates at least `dist_local` frames in the past form an island,
//! 5. the best island has been consistent over `min_temporal_matches`
//!    consecutive queries,
//! 6. descriptor matches pass 2D-2D geometric verification,
//! 7. a metric relative pose can be recovered from the stereo points.
//!
//! Every keyframe yields an odometry factor; verified loops add a loop
//! closure factor. Both go to the pose-graph solver, whose latest estimate
//! is returned in the output payload.

use anyhow::{ensure, Result};
use nalgebra::{Matrix3, Vector3};
use tracing::{debug, info, warn};

use crate::geometry::{ransac, CentralRelativeProblem, PointCloudProblem, SE3};
use crate::loop_closure::descriptor::BriefExtractor;
use crate::loop_closure::factors::{Factor, LoopClosureFactor, NoiseModel, OdometryFactor};
use crate::loop_closure::frame_store::{LcdFrame, LcdFrameStore};
use crate::loop_closure::islands::{compute_islands, select_best_island};
use crate::loop_closure::params::LcdParams;
use crate::loop_closure::payloads::{LcdInputPayload, LcdOutputPayload};
use crate::loop_closure::place_index::{BowDatabase, PlaceIndex, PlaceMatch, Vocabulary};
use crate::loop_closure::pose_graph::{PoseGraph, PoseGraphSolver};
use crate::loop_closure::types::{GeomVerifOption, LcdDebugInfo, LcdStatus, LoopResult, MatchIsland, PoseRecoveryOption};
use crate::tracking::matching::{match_descriptors, KeypointMatch};
use crate::types::FrameId;

/// Verified descriptor matches `(query, match)` and, with NISTER, the
/// rotation `match_R_query`.
struct Verification {
    matches: Vec<KeypointMatch>,
    rotation: Option<Matrix3<f64>>,
}

pub struct LoopClosureDetector {
    params: LcdParams,
    /// Extrinsic of the left camera in the body frame.
    body_t_cam: SE3,
    extractor: BriefExtractor,
    frames: LcdFrameStore,
    place_index: Box<dyn PlaceIndex>,
    pose_graph: Box<dyn PoseGraphSolver>,

    // Temporal consistency, carried across queries.
    temporal_entries: usize,
    latest_matched_island: Option<MatchIsland>,
    latest_query_id: Option<FrameId>,

    debug_info: LcdDebugInfo,
}

impl LoopClosureDetector {
    pub fn new(
        params: LcdParams,
        body_t_cam: SE3,
        place_index: Box<dyn PlaceIndex>,
        pose_graph: Box<dyn PoseGraphSolver>,
    ) -> Result<Self> {
        params.validate()?;
        info!(
            "Loop closure detector created ({:?} verification, {:?} pose recovery)",
            params.geom_check, params.pose_recovery_option
        );
        Ok(Self {
            params,
            body_t_cam,
            extractor: BriefExtractor::default(),
            frames: LcdFrameStore::new(),
            place_index,
            pose_graph,
            temporal_entries: 0,
            latest_matched_island: None,
            latest_query_id: None,
            debug_info: LcdDebugInfo::default(),
        })
    }

    /// Detector backed by a bag-of-words database and the LM pose graph.
    pub fn with_vocabulary(params: LcdParams, body_t_cam: SE3, vocabulary: Vocabulary) -> Result<Self> {
        let pose_graph = PoseGraph::new(params.pose_graph.clone());
        Self::new(params, body_t_cam, Box::new(BowDatabase::new(vocabulary)), Box::new(pose_graph))
    }

    pub fn params(&self) -> &LcdParams {
        &self.params
    }

    pub fn debug_info(&self) -> &LcdDebugInfo {
        &self.debug_info
    }

    pub fn frames(&self) -> &LcdFrameStore {
        &self.frames
    }

    /// Processes one keyframe. Keyframe ids must increase strictly.
    pub fn spin_once(&mut self, input: LcdInputPayload) -> Result<LcdOutputPayload> {
        if let Some(latest) = self.frames.latest_id() {
            ensure!(
                input.cur_kf_id > latest,
                "keyframe {} received after {}",
                input.cur_kf_id,
                latest
            );
        }

        let frame = LcdFrame::from_stereo_frame(
            input.cur_kf_id,
            input.stereo_frame.id,
            input.timestamp_kf,
            &input.stereo_frame,
            &self.extractor,
        );
        self.debug_info = LcdDebugInfo {
            timestamp: input.timestamp_kf,
            ..Default::default()
        };

        let result = self.detect_loop(&frame);
        self.place_index.add(frame.id, &frame.descriptors);
        self.frames.push(frame)?;

        let odom_noise = NoiseModel::from_sigmas(self.params.odom_rot_sigma, self.params.odom_trans_sigma);
        let mut snapshot = self.pose_graph.add_factor(Factor::Odometry(OdometryFactor {
            cur_key: input.cur_kf_id,
            w_pose_blkf: input.w_pose_blkf,
            noise: odom_noise,
        }))?;

        if result.is_loop() {
            let inliers = self.debug_info.stereo_inliers.max(1);
            let scale = (self.params.ransac_inlier_threshold_stereo as f64 / inliers as f64)
                .sqrt()
                .min(1.0);
            let noise = NoiseModel::from_sigmas(self.params.loop_rot_sigma, self.params.loop_trans_sigma).scaled(scale);
            snapshot = self.pose_graph.add_factor(Factor::LoopClosure(LoopClosureFactor {
                ref_key: result.match_id,
                cur_key: result.query_id,
                ref_pose_cur: result.relative_pose,
                noise,
            }))?;
            self.debug_info.pgo_lc_inliers = inliers;
            info!(
                "Loop detected: {} -> {} ({} stereo inliers)",
                result.query_id, result.match_id, inliers
            );
        }

        self.debug_info.loop_result = result;
        self.debug_info.pgo_size = self.pose_graph.size();
        self.debug_info.pgo_lc_count = self.pose_graph.loop_closure_count();

        let w_pose_map = self
            .pose_graph
            .estimate(input.cur_kf_id)
            .map(|optimal| optimal.compose(&input.w_pose_blkf.inverse()))
            .unwrap_or_default();

        let mut output = LcdOutputPayload {
            timestamp_kf: input.timestamp_kf,
            w_pose_map,
            values: snapshot.values,
            factor_graph: snapshot.factors,
            ..Default::default()
        };
        if result.is_loop() {
            output.is_loop_closure = true;
            output.timestamp_query = input.timestamp_kf;
            output.timestamp_match = self.frames.timestamp(result.match_id).unwrap_or_default();
            output.id_match = result.match_id;
            output.id_recent = result.query_id;
            output.relative_pose = result.relative_pose;
        }
        Ok(output)
    }

    /// Runs the check sequence for `frame` against the frames seen so far.
    fn detect_loop(&mut self, frame: &LcdFrame) -> LoopResult {
        let query_id = frame.id;
        let fail = |status: LcdStatus, match_id: FrameId| {
            debug!("Query {}: {}", query_id, status);
            LoopResult::failure(status, query_id, match_id)
        };

        let candidates = self.place_index.query(&frame.descriptors, self.params.max_db_results);
        let Some(&(top_id, _)) = candidates.first() else {
            return fail(LcdStatus::NoMatches, FrameId::default());
        };

        let nss_factor = if self.params.use_nss {
            match self.frames.latest_id() {
                Some(prev) => self.place_index.similarity(&frame.descriptors, prev).unwrap_or(0.0),
                None => 1.0,
            }
        } else {
            1.0
        };
        if self.params.use_nss && nss_factor < self.params.min_nss_factor {
            return fail(LcdStatus::LowNssFactor, top_id);
        }

        let normalized: Vec<PlaceMatch> = candidates
            .iter()
            .map(|&(id, score)| (id, score / nss_factor))
            .collect();
        let top_score = normalized.iter().map(|(_, s)| *s).fold(f64::MIN, f64::max);
        if top_score < self.params.alpha {
            return fail(LcdStatus::LowScore, top_id);
        }

        let above_alpha: Vec<PlaceMatch> = normalized
            .into_iter()
            .filter(|(_, s)| *s >= self.params.alpha)
            .collect();
        // Frames within dist_local of the query never form islands.
        let past: Vec<PlaceMatch> = above_alpha
            .iter()
            .copied()
            .filter(|(id, _)| query_id.gap_from(*id) >= self.params.dist_local)
            .collect();
        if past.is_empty() {
            self.reset_temporal_state();
            return fail(LcdStatus::FailedTemporalConstraint, top_id);
        }
        let islands = compute_islands(
            &past,
            self.params.max_intraisland_gap,
            self.params.min_matches_per_island,
            self.params.island_scoring,
        );
        let Some(island) = select_best_island(&islands) else {
            return fail(LcdStatus::NoGroups, top_id);
        };
        let match_id = island.best_id;
        debug!(
            "Query {}: best island [{}, {}] score {:.3}, best match {}",
            query_id, island.start_id, island.end_id, island.island_score, match_id
        );

        if !self.check_temporal_constraint(query_id, &island) {
            return fail(LcdStatus::FailedTemporalConstraint, match_id);
        }

        let Some(matched) = self.frames.get(match_id) else {
            warn!("Place index returned unknown frame {}", match_id);
            return fail(LcdStatus::FailedGeomVerification, match_id);
        };
        let Some(verification) = geometric_verification(&self.params, &mut self.debug_info, frame, matched) else {
            return fail(LcdStatus::FailedGeomVerification, match_id);
        };

        let Some(cam_pose) = recover_pose(&self.params, &mut self.debug_info, frame, matched, &verification) else {
            return fail(LcdStatus::FailedPoseRecovery, match_id);
        };

        // match_T_query between body frames.
        let relative_pose = self
            .body_t_cam
            .compose(&cam_pose)
            .compose(&self.body_t_cam.inverse());
        LoopResult {
            status: LcdStatus::LoopDetected,
            query_id,
            match_id,
            relative_pose,
        }
    }

    fn reset_temporal_state(&mut self) {
        self.temporal_entries = 0;
        self.latest_matched_island = None;
        self.latest_query_id = None;
    }

    /// Requires `min_temporal_matches` consecutive queries whose islands
    /// overlap. An inconsistent query restarts the count at one.
    fn check_temporal_constraint(&mut self, query_id: FrameId, island: &MatchIsland) -> bool {
        let consistent = match (self.latest_query_id, self.latest_matched_island) {
            (Some(last_query), Some(last_island)) => {
                query_id.gap_from(last_query) <= self.params.max_nr_frames_between_queries
                    && island.is_near(&last_island, self.params.max_nr_frames_between_islands)
            }
            _ => false,
        };
        self.temporal_entries = if consistent { self.temporal_entries + 1 } else { 1 };
        self.latest_matched_island = Some(*island);
        self.latest_query_id = Some(query_id);

        debug!(
            "Query {}: {} consecutive consistent matches",
            query_id, self.temporal_entries
        );
        self.temporal_entries >= self.params.min_temporal_matches
    }
}

fn geometric_verification(
    params: &LcdParams,
    debug_info: &mut LcdDebugInfo,
    query: &LcdFrame,
    matched: &LcdFrame,
) -> Option<Verification> {
    let matches = match_descriptors(&query.descriptors, &matched.descriptors, params.lowe_ratio);
    debug_info.mono_input_size = matches.len();
    if matches.len() < params.min_correspondences {
        debug!(
            "Query {}: {} descriptor matches with {}",
            query.id,
            matches.len(),
            matched.id
        );
        return None;
    }

    match params.geom_check {
        GeomVerifOption::None => Some(Verification { matches, rotation: None }),
        GeomVerifOption::Nister => {
            let f_ref: Vec<Vector3<f64>> = matches.iter().map(|&(_, m)| matched.versors[m]).collect();
            let f_cur: Vec<Vector3<f64>> = matches.iter().map(|&(q, _)| query.versors[q]).collect();
            let problem = CentralRelativeProblem {
                f_ref: &f_ref,
                f_cur: &f_cur,
            };
            let result = ransac(&problem, &params.mono_ransac_config())?;
            debug_info.mono_inliers = result.inliers.len();
            debug_info.mono_iter = result.iterations;
            if result.inliers.len() < params.ransac_inlier_threshold_mono {
                return None;
            }
            Some(Verification {
                matches: result.inliers.iter().map(|&i| matches[i]).collect(),
                rotation: Some(result.model.rotation_matrix()),
            })
        }
    }
}

/// `match_T_query` between the left cameras.
fn recover_pose(
    params: &LcdParams,
    debug_info: &mut LcdDebugInfo,
    query: &LcdFrame,
    matched: &LcdFrame,
    verification: &Verification,
) -> Option<SE3> {
    let points_ref: Vec<Vector3<f64>> = verification
        .matches
        .iter()
        .map(|&(_, m)| matched.keypoints_3d[m])
        .collect();
    let points_cur: Vec<Vector3<f64>> = verification
        .matches
        .iter()
        .map(|&(q, _)| query.keypoints_3d[q])
        .collect();
    debug_info.stereo_input_size = points_ref.len();

    match (params.pose_recovery_option, verification.rotation) {
        (PoseRecoveryOption::RansacArun, _) => {
            let problem = PointCloudProblem {
                points_ref: &points_ref,
                points_cur: &points_cur,
            };
            let result = ransac(&problem, &params.stereo_ransac_config())?;
            debug_info.stereo_inliers = result.inliers.len();
            debug_info.stereo_iter = result.iterations;
            (result.inliers.len() >= params.ransac_inlier_threshold_stereo).then_some(result.model)
        }
        (PoseRecoveryOption::GivenRot, Some(rotation)) => {
            let translation = translation_given_rotation(params, debug_info, &rotation, &points_ref, &points_cur)?;
            Some(SE3::from_rt(&rotation, &translation))
        }
        (PoseRecoveryOption::GivenRot, None) => None,
    }
}

/// Per-correspondence translations `p_ref - R p_cur`, gated around
/// their component-wise median and averaged.
fn translation_given_rotation(
    params: &LcdParams,
    debug_info: &mut LcdDebugInfo,
    rotation: &Matrix3<f64>,
    points_ref: &[Vector3<f64>],
    points_cur: &[Vector3<f64>],
) -> Option<Vector3<f64>> {
    let hypotheses: Vec<Vector3<f64>> = points_ref
        .iter()
        .zip(points_cur)
        .map(|(p_ref, p_cur)| p_ref - rotation * p_cur)
        .collect();
    if hypotheses.is_empty() {
        return None;
    }

    let median = Vector3::from_fn(|r, _| {
        let mut values: Vec<f64> = hypotheses.iter().map(|t| t[r]).collect();
        let mid = values.len() / 2;
        let (_, m, _) = values.select_nth_unstable_by(mid, |a, b| a.total_cmp(b));
        *m
    });
    let inliers: Vec<&Vector3<f64>> = hypotheses
        .iter()
        .filter(|t| (*t - median).norm() < params.ransac_threshold_stereo)
        .collect();

    debug_info.stereo_inliers = inliers.len();
    debug_info.stereo_iter = 1;
    if inliers.is_empty() || inliers.len() < params.ransac_inlier_threshold_stereo {
        return None;
    }
    Some(inliers.iter().copied().sum::<Vector3<f64>>() / inliers.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_closure::factors::{EdgeType, GraphFactor};
    use crate::tracking::matching::Descriptor;
    use crate::tracking::{CameraModel, Frame, StereoFrame, StereoMatchingParams};
    use crate::types::LandmarkId;
    use approx::assert_relative_eq;
    use image::GrayImage;
    use nalgebra::{Point2, UnitQuaternion};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::collections::HashMap;

    /// Place index returning fixed scores for frames that were added.
    struct MockIndex {
        scores: HashMap<FrameId, f64>,
        nss: f64,
        added: Vec<FrameId>,
    }

    impl MockIndex {
        fn boxed(scores: &[(u64, f64)], nss: f64) -> Box<dyn PlaceIndex> {
            Box::new(Self {
                scores: scores.iter().map(|&(id, s)| (FrameId::new(id), s)).collect(),
                nss,
                added: Vec::new(),
            })
        }
    }

    impl PlaceIndex for MockIndex {
        fn add(&mut self, id: FrameId, _descriptors: &[Descriptor]) {
            self.added.push(id);
        }

        fn query(&self, _descriptors: &[Descriptor], max_results: usize) -> Vec<PlaceMatch> {
            let mut results: Vec<PlaceMatch> = self
                .added
                .iter()
                .filter_map(|id| self.scores.get(id).map(|&s| (*id, s)))
                .collect();
            results.sort_by(|a, b| b.1.total_cmp(&a.1));
            results.truncate(max_results);
            results
        }

        fn similarity(&self, _descriptors: &[Descriptor], id: FrameId) -> Option<f64> {
            self.added.contains(&id).then_some(self.nss)
        }

        fn len(&self) -> usize {
            self.added.len()
        }
    }

    struct Scene {
        points: Vec<Vector3<f64>>,
        descriptors: Vec<Descriptor>,
    }

    fn scene(n: usize) -> Scene {
        scene_seeded(n, 42)
    }

    fn scene_seeded(n: usize, seed: u64) -> Scene {
        let mut rng = StdRng::seed_from_u64(seed);
        let points = (0..n)
            .map(|_| Vector3::new(rng.gen_range(-1.5..1.5), rng.gen_range(-1.0..1.0), rng.gen_range(2.0..5.0)))
            .collect();
        let descriptors = (0..n)
            .map(|_| {
                let mut d = [0u8; 32];
                rng.fill(&mut d[..]);
                d
            })
            .collect();
        Scene { points, descriptors }
    }

    fn camera() -> CameraModel {
        CameraModel::new(450.0, 450.0, 320.0, 240.0, 0.2)
    }

    /// Stereo keyframe observing `scene` from `cam_T_world`-transformed points.
    fn observe(id: u64, scene: &Scene, cam_from_scene: &SE3) -> StereoFrame {
        let cam = camera();
        let mut left = Frame::new(FrameId::new(id), id * 100, GrayImage::new(640, 480), cam);
        let mut right = Vec::new();
        for (i, p) in scene.points.iter().enumerate() {
            let p = cam_from_scene.transform_point(p);
            let px = Point2::new(cam.fx * p.x / p.z + cam.cx, cam.fy * p.y / p.z + cam.cy);
            left.push_feature(px, Some(LandmarkId::new(i as u64)), 1, 0.0);
            right.push(Some(Point2::new(px.x - cam.fx * cam.baseline / p.z, px.y)));
        }
        left.descriptors = scene.descriptors.clone();
        let mut frame = StereoFrame::new(left, None);
        frame.set_right_keypoints(&right, &StereoMatchingParams::default()).unwrap();
        frame
    }

    fn input(id: u64, frame: StereoFrame, w_pose: SE3) -> LcdInputPayload {
        LcdInputPayload::new(id * 100, FrameId::new(id), frame, w_pose)
    }

    /// `match_T_query` used by the synthetic revisits.
    fn revisit_pose() -> SE3 {
        SE3::from_quaternion(
            UnitQuaternion::from_euler_angles(0.02, 0.05, -0.01),
            Vector3::new(0.3, -0.05, 0.1),
        )
    }

    fn params() -> LcdParams {
        LcdParams {
            min_temporal_matches: 1,
            ..Default::default()
        }
    }

    fn detector(params: LcdParams, index: Box<dyn PlaceIndex>) -> LoopClosureDetector {
        LoopClosureDetector::new(params, SE3::identity(), index, Box::new(PoseGraph::default())).unwrap()
    }

    #[test]
    fn test_keyframe_200_closes_loop_with_frame_5() {
        let scene = scene(60);
        let truth = revisit_pose();
        let mut lcd = detector(params(), MockIndex::boxed(&[(5, 0.9)], 0.5));

        let first = lcd
            .spin_once(input(5, observe(5, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        assert!(!first.is_loop_closure);
        assert_eq!(lcd.debug_info().loop_result.status, LcdStatus::NoMatches);

        // Query camera sees the scene through query_T_match.
        let drifted = SE3::from_quaternion(UnitQuaternion::identity(), Vector3::new(0.5, 0.0, 0.0));
        let out = lcd
            .spin_once(input(200, observe(200, &scene, &truth.inverse()), drifted))
            .unwrap();

        let result = lcd.debug_info().loop_result;
        assert_eq!(result.status, LcdStatus::LoopDetected);
        assert_eq!(result.match_id, FrameId::new(5));
        assert!(out.is_loop_closure);
        assert_eq!(out.id_match, FrameId::new(5));
        assert_eq!(out.id_recent, FrameId::new(200));
        assert_eq!(out.timestamp_match, 500);
        assert_eq!(out.timestamp_query, 20_000);
        assert!(out.relative_pose.angular_distance(&truth) < 1e-6);
        assert_relative_eq!(out.relative_pose.translation, truth.translation, epsilon = 1e-6);

        assert_eq!(lcd.debug_info().mono_inliers, 60);
        assert_eq!(lcd.debug_info().stereo_inliers, 60);
        assert_eq!(lcd.debug_info().pgo_lc_count, 1);
        assert_eq!(out.values.len(), 2);
        assert!(out.factor_graph.iter().any(|f| matches!(
            f,
            GraphFactor::Between { edge_type: EdgeType::LoopClosure, .. }
        )));
    }

    #[test]
    fn test_revisit_after_corridor_with_bow_database() {
        let place_a = scene(60);
        let corridor_end = scene_seeded(40, 43);
        let segments: Vec<(u64, Scene)> = (1..18).map(|k| (10 * k, scene_seeded(40, 1000 + k))).collect();

        // Frames approaching the old place see the corridor and half of it.
        let approach = Scene {
            points: corridor_end.points.iter().chain(&place_a.points[..30]).copied().collect(),
            descriptors: corridor_end
                .descriptors
                .iter()
                .chain(&place_a.descriptors[..30])
                .copied()
                .collect(),
        };

        let mut words = place_a.descriptors.clone();
        words.extend(&corridor_end.descriptors);
        for (_, s) in &segments {
            words.extend(&s.descriptors);
        }
        let mut lcd = LoopClosureDetector::with_vocabulary(params(), SE3::identity(), Vocabulary::from_words(&words)).unwrap();

        lcd.spin_once(input(5, observe(5, &place_a, &SE3::identity()), SE3::identity()))
            .unwrap();
        for (id, segment) in &segments {
            lcd.spin_once(input(*id, observe(*id, segment, &SE3::identity()), SE3::identity()))
                .unwrap();
        }
        for id in 180..200u64 {
            let step = SE3::from_quaternion(UnitQuaternion::identity(), Vector3::new(0.01 * (id - 180) as f64, 0.0, 0.0));
            lcd.spin_once(input(id, observe(id, &approach, &step), SE3::identity()))
                .unwrap();
            let result = lcd.debug_info().loop_result;
            if result.is_loop() {
                assert_eq!(result.match_id, FrameId::new(5));
            }
        }

        let truth = revisit_pose();
        let out = lcd
            .spin_once(input(200, observe(200, &place_a, &truth.inverse()), SE3::identity()))
            .unwrap();
        let result = lcd.debug_info().loop_result;
        assert_eq!(result.status, LcdStatus::LoopDetected);
        assert_eq!(result.match_id, FrameId::new(5));
        assert!(out.is_loop_closure);
        assert!(out.relative_pose.angular_distance(&truth) < 1e-6);
        assert!(out.relative_pose.translation_distance(&truth) < 1e-6);
    }

    #[test]
    fn test_recent_frames_do_not_shadow_old_island() {
        let scene = scene(60);
        let truth = revisit_pose();
        // Recent frames 185..=199 outscore frame 5 as a group.
        let mut scores = vec![(5, 0.9)];
        scores.extend((185..200).map(|id| (id, 0.8)));
        let mut lcd = detector(params(), MockIndex::boxed(&scores, 0.5));

        lcd.spin_once(input(5, observe(5, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        for id in 185..200u64 {
            lcd.spin_once(input(id, observe(id, &scene, &truth.inverse()), SE3::identity()))
                .unwrap();
        }
        lcd.spin_once(input(200, observe(200, &scene, &truth.inverse()), SE3::identity()))
            .unwrap();

        let result = lcd.debug_info().loop_result;
        assert_eq!(result.status, LcdStatus::LoopDetected);
        assert_eq!(result.match_id, FrameId::new(5));
    }

    #[test]
    fn test_arun_pose_recovery() {
        let scene = scene(60);
        let truth = revisit_pose();
        let params = LcdParams {
            pose_recovery_option: PoseRecoveryOption::RansacArun,
            geom_check: GeomVerifOption::None,
            ..params()
        };
        let mut lcd = detector(params, MockIndex::boxed(&[(5, 0.9)], 0.5));
        lcd.spin_once(input(5, observe(5, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        let out = lcd
            .spin_once(input(200, observe(200, &scene, &truth.inverse()), SE3::identity()))
            .unwrap();

        assert!(out.is_loop_closure);
        assert!(out.relative_pose.angular_distance(&truth) < 1e-6);
        assert!(out.relative_pose.translation_distance(&truth) < 1e-6);
    }

    #[test]
    fn test_body_frame_relative_pose() {
        let scene = scene(60);
        let truth = revisit_pose();
        let body_t_cam = SE3::from_quaternion(
            UnitQuaternion::from_euler_angles(0.0, 0.0, 0.3),
            Vector3::new(0.1, 0.0, 0.05),
        );
        let mut lcd = LoopClosureDetector::new(
            params(),
            body_t_cam,
            MockIndex::boxed(&[(5, 0.9)], 0.5),
            Box::new(PoseGraph::default()),
        )
        .unwrap();
        lcd.spin_once(input(5, observe(5, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        let out = lcd
            .spin_once(input(200, observe(200, &scene, &truth.inverse()), SE3::identity()))
            .unwrap();

        let expected = body_t_cam.compose(&truth).compose(&body_t_cam.inverse());
        assert!(out.relative_pose.angular_distance(&expected) < 1e-6);
        assert!(out.relative_pose.translation_distance(&expected) < 1e-6);
    }

    #[test]
    fn test_no_candidates_is_no_matches() {
        let scene = scene(30);
        let params = LcdParams {
            alpha: 1e9,
            min_nss_factor: 1.0,
            ..params()
        };
        let mut lcd = detector(params, MockIndex::boxed(&[], 0.5));
        for id in [1, 2, 40] {
            lcd.spin_once(input(id, observe(id, &scene, &SE3::identity()), SE3::identity()))
                .unwrap();
            assert_eq!(lcd.debug_info().loop_result.status, LcdStatus::NoMatches);
        }
    }

    #[test]
    fn test_adjacent_match_fails_temporal_constraint() {
        let scene = scene(30);
        let params = LcdParams {
            min_temporal_matches: 3,
            ..Default::default()
        };
        let mut lcd = detector(params, MockIndex::boxed(&[(10, 0.9)], 0.5));
        lcd.spin_once(input(10, observe(10, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        let out = lcd
            .spin_once(input(11, observe(11, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();

        let result = lcd.debug_info().loop_result;
        assert_eq!(result.status, LcdStatus::FailedTemporalConstraint);
        assert_eq!(result.match_id, FrameId::new(10));
        assert!(!out.is_loop_closure);
    }

    #[test]
    fn test_temporal_debounce_needs_consecutive_queries() {
        let scene = scene(60);
        let truth = revisit_pose();
        let params = LcdParams {
            min_temporal_matches: 3,
            ..Default::default()
        };
        let mut lcd = detector(params, MockIndex::boxed(&[(0, 0.9)], 0.5));
        lcd.spin_once(input(0, observe(0, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();

        let mut statuses = Vec::new();
        for id in [30, 31, 32] {
            lcd.spin_once(input(id, observe(id, &scene, &truth.inverse()), SE3::identity()))
                .unwrap();
            statuses.push(lcd.debug_info().loop_result.status);
        }
        assert_eq!(
            statuses,
            vec![
                LcdStatus::FailedTemporalConstraint,
                LcdStatus::FailedTemporalConstraint,
                LcdStatus::LoopDetected
            ]
        );

        // A gap in the query sequence restarts the count.
        lcd.spin_once(input(40, observe(40, &scene, &truth.inverse()), SE3::identity()))
            .unwrap();
        assert_eq!(lcd.debug_info().loop_result.status, LcdStatus::FailedTemporalConstraint);
    }

    #[test]
    fn test_low_nss_and_low_score() {
        let scene = scene(30);
        let mut lcd = detector(params(), MockIndex::boxed(&[(1, 0.9)], 0.001));
        lcd.spin_once(input(1, observe(1, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        lcd.spin_once(input(50, observe(50, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        assert_eq!(lcd.debug_info().loop_result.status, LcdStatus::LowNssFactor);

        let mut lcd = detector(params(), MockIndex::boxed(&[(1, 0.01)], 0.5));
        lcd.spin_once(input(1, observe(1, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        lcd.spin_once(input(50, observe(50, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        assert_eq!(lcd.debug_info().loop_result.status, LcdStatus::LowScore);
    }

    #[test]
    fn test_small_island_is_no_groups() {
        let scene = scene(30);
        let params = LcdParams {
            min_matches_per_island: 2,
            ..params()
        };
        let mut lcd = detector(params, MockIndex::boxed(&[(1, 0.9)], 0.5));
        lcd.spin_once(input(1, observe(1, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        lcd.spin_once(input(50, observe(50, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        assert_eq!(lcd.debug_info().loop_result.status, LcdStatus::NoGroups);
    }

    #[test]
    fn test_unrelated_descriptors_fail_verification() {
        let scene_a = scene(30);
        let mut scene_b = scene(30);
        let mut rng = StdRng::seed_from_u64(7);
        for d in &mut scene_b.descriptors {
            rng.fill(&mut d[..]);
        }
        let mut lcd = detector(params(), MockIndex::boxed(&[(1, 0.9)], 0.5));
        lcd.spin_once(input(1, observe(1, &scene_a, &SE3::identity()), SE3::identity()))
            .unwrap();
        lcd.spin_once(input(50, observe(50, &scene_b, &SE3::identity()), SE3::identity()))
            .unwrap();
        assert_eq!(lcd.debug_info().loop_result.status, LcdStatus::FailedGeomVerification);
    }

    #[test]
    fn test_inconsistent_depth_fails_pose_recovery() {
        let scene = scene(60);
        let truth = revisit_pose();
        let mut lcd = detector(params(), MockIndex::boxed(&[(1, 0.9)], 0.5));
        lcd.spin_once(input(1, observe(1, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();

        // Same bearings, inconsistent metric depth.
        let mut query = observe(50, &scene, &truth.inverse());
        for p in &mut query.keypoints_3d {
            *p *= 1.5;
        }
        lcd.spin_once(input(50, query, SE3::identity())).unwrap();
        assert_eq!(lcd.debug_info().loop_result.status, LcdStatus::FailedPoseRecovery);
    }

    #[test]
    fn test_out_of_order_keyframe_is_rejected() {
        let scene = scene(20);
        let mut lcd = detector(params(), MockIndex::boxed(&[], 0.5));
        lcd.spin_once(input(5, observe(5, &scene, &SE3::identity()), SE3::identity()))
            .unwrap();
        assert!(lcd
            .spin_once(input(5, observe(5, &scene, &SE3::identity()), SE3::identity()))
            .is_err());
    }

    #[test]
    fn test_invalid_configuration() {
        let params = LcdParams {
            geom_check: GeomVerifOption::None,
            pose_recovery_option: PoseRecoveryOption::GivenRot,
            ..Default::default()
        };
        assert!(LoopClosureDetector::new(
            params,
            SE3::identity(),
            MockIndex::boxed(&[], 0.5),
            Box::new(PoseGraph::default())
        )
        .is_err());
    }
}
