//! Loop closure detection on its own thread.
//!
//! The worker drains keyframe payloads from a channel, runs the detector
//! and forwards one output payload per keyframe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::RwLock;

use crate::loop_closure::detector::LoopClosureDetector;
use crate::loop_closure::payloads::{LcdInputPayload, LcdOutputPayload};
use crate::loop_closure::types::LcdDebugInfo;

const RECV_TIMEOUT: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LcdStats {
    pub keyframes_processed: usize,
    pub loops_detected: usize,
    pub errors: usize,
}

/// State shared between the LCD thread and its owner.
#[derive(Default)]
pub struct LcdSharedState {
    shutdown_requested: AtomicBool,
    /// Debug info of the latest processed keyframe.
    pub debug_info: RwLock<LcdDebugInfo>,
    pub stats: RwLock<LcdStats>,
}

impl LcdSharedState {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn request_shutdown(&self) {
        self.shutdown_requested.store(true, Ordering::SeqCst);
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }
}

/// Runs `detector` until shutdown is requested or either channel end
/// disconnects.
pub fn run_lcd(
    mut detector: LoopClosureDetector,
    input: Receiver<LcdInputPayload>,
    output: Sender<LcdOutputPayload>,
    shared: Arc<LcdSharedState>,
) {
    tracing::info!("LCD thread started");

    while !shared.is_shutdown_requested() {
        let payload = match input.recv_timeout(RECV_TIMEOUT) {
            Ok(payload) => payload,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => {
                tracing::info!("LCD input channel disconnected");
                break;
            }
        };

        let kf_id = payload.cur_kf_id;
        let result = detector.spin_once(payload);
        *shared.debug_info.write() = detector.debug_info().clone();

        match result {
            Ok(out) => {
                {
                    let mut stats = shared.stats.write();
                    stats.keyframes_processed += 1;
                    if out.is_loop_closure {
                        stats.loops_detected += 1;
                    }
                }
                if output.send(out).is_err() {
                    tracing::info!("LCD output channel disconnected");
                    break;
                }
            }
            Err(e) => {
                shared.stats.write().errors += 1;
                tracing::warn!("LCD failed on keyframe {}: {:#}", kf_id, e);
            }
        }
    }

    let stats = *shared.stats.read();
    tracing::info!(
        "LCD thread exiting. Stats: processed={}, loops={}, errors={}",
        stats.keyframes_processed,
        stats.loops_detected,
        stats.errors
    );
}

/// Spawns the LCD thread.
pub fn spawn_lcd_worker(
    detector: LoopClosureDetector,
    input: Receiver<LcdInputPayload>,
    output: Sender<LcdOutputPayload>,
    shared: Arc<LcdSharedState>,
) -> thread::JoinHandle<()> {
    thread::spawn(move || run_lcd(detector, input, output, shared))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::SE3;
    use crate::loop_closure::params::LcdParams;
    use crate::loop_closure::place_index::Vocabulary;
    use crate::loop_closure::types::LcdStatus;
    use crate::tracking::{CameraModel, Frame, StereoFrame, StereoMatchingParams};
    use crate::types::{FrameId, LandmarkId};
    use crossbeam_channel::bounded;
    use image::GrayImage;
    use nalgebra::Point2;

    fn keyframe(id: u64) -> StereoFrame {
        let cam = CameraModel::new(450.0, 450.0, 320.0, 240.0, 0.2);
        let mut left = Frame::new(FrameId::new(id), id, GrayImage::new(640, 480), cam);
        let mut right = Vec::new();
        for i in 0..20u8 {
            let px = Point2::new(100.0 + 20.0 * i as f64, 200.0);
            left.push_feature(px, Some(LandmarkId::new(i as u64)), 1, 0.0);
            left.descriptors.push([i.wrapping_mul(37); 32]);
            right.push(Some(Point2::new(px.x - 30.0, px.y)));
        }
        let mut frame = StereoFrame::new(left, None);
        frame.set_right_keypoints(&right, &StereoMatchingParams::default()).unwrap();
        frame
    }

    #[test]
    fn test_worker_processes_keyframes_until_disconnect() {
        let words: Vec<_> = (0..20u8).map(|i| [i.wrapping_mul(37); 32]).collect();
        let detector =
            LoopClosureDetector::with_vocabulary(LcdParams::default(), SE3::identity(), Vocabulary::from_words(&words))
                .unwrap();

        let (in_tx, in_rx) = bounded(4);
        let (out_tx, out_rx) = bounded(4);
        let shared = LcdSharedState::new();
        let handle = spawn_lcd_worker(detector, in_rx, out_tx, shared.clone());

        for id in 0..3 {
            in_tx
                .send(LcdInputPayload::new(id * 10, FrameId::new(id), keyframe(id), SE3::identity()))
                .unwrap();
            let out = out_rx.recv_timeout(Duration::from_secs(5)).unwrap();
            assert_eq!(out.timestamp_kf, id * 10);
            assert!(!out.is_loop_closure);
        }
        drop(in_tx);
        handle.join().unwrap();

        assert_eq!(shared.stats.read().keyframes_processed, 3);
        assert_eq!(shared.stats.read().loops_detected, 0);
        // Frames 1 and 2 are too close to their matches.
        assert_ne!(shared.debug_info.read().loop_result.status, LcdStatus::LoopDetected);
    }

    #[test]
    fn test_shutdown_flag_stops_worker() {
        let detector = LoopClosureDetector::with_vocabulary(
            LcdParams::default(),
            SE3::identity(),
            Vocabulary::from_words(&[[0u8; 32]]),
        )
        .unwrap();
        let (_in_tx, in_rx) = bounded::<LcdInputPayload>(1);
        let (out_tx, _out_rx) = bounded(1);
        let shared = LcdSharedState::new();
        let handle = spawn_lcd_worker(detector, in_rx, out_tx, shared.clone());

        shared.request_shutdown();
        handle.join().unwrap();
        assert!(shared.is_shutdown_requested());
        assert_eq!(shared.stats.read().keyframes_processed, 0);
    }
}
