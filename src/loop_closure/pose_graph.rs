//! Pose graph over keyframe body poses.
//!
//! Odometry factors add a key and a between-factor from the previous
//! keyframe (the first key is anchored by a prior). Loop closure factors add
//! a between-factor between two existing keys and trigger a
//! Levenberg-Marquardt solve over the decoupled `[φ, t]` tangent of every
//! non-anchored pose.

use std::collections::{BTreeMap, HashMap};

use anyhow::{bail, ensure, Result};
use nalgebra::{DMatrix, DVector, Vector6};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::geometry::SE3;
use crate::loop_closure::factors::{EdgeType, Factor, GraphFactor, LoopClosureFactor, NoiseModel, OdometryFactor};
use crate::loop_closure::payloads::PoseGraphSnapshot;
use crate::types::FrameId;

/// Opaque optimizer consuming factors and exposing its latest estimate.
pub trait PoseGraphSolver: Send {
    fn add_factor(&mut self, factor: Factor) -> Result<PoseGraphSnapshot>;

    /// Optimized pose of `key`.
    fn estimate(&self, key: FrameId) -> Option<SE3>;

    /// Number of keys in the graph.
    fn size(&self) -> usize;

    fn loop_closure_count(&self) -> usize;
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PoseGraphConfig {
    pub max_iterations: usize,
    /// Convergence threshold on the relative step size.
    pub param_tolerance: f64,
    pub gradient_tolerance: f64,
}

impl Default for PoseGraphConfig {
    fn default() -> Self {
        Self {
            max_iterations: 20,
            param_tolerance: 1e-6,
            gradient_tolerance: 1e-6,
        }
    }
}

/// Summary of one LM solve.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SolveSummary {
    pub iterations: usize,
    pub initial_error: f64,
    pub final_error: f64,
}

struct Edge {
    i: usize,
    j: usize,
    measurement_inv: SE3,
    noise: NoiseModel,
}

pub struct PoseGraph {
    config: PoseGraphConfig,
    keys: Vec<FrameId>,
    key_index: HashMap<FrameId, usize>,
    /// Current estimate, parallel to `keys`.
    values: Vec<SE3>,
    /// Raw odometry of the latest key.
    last_odometry: Option<SE3>,
    factors: Vec<GraphFactor>,
    loop_closures: usize,
}

impl PoseGraph {
    pub fn new(config: PoseGraphConfig) -> Self {
        Self {
            config,
            keys: Vec::new(),
            key_index: HashMap::new(),
            values: Vec::new(),
            last_odometry: None,
            factors: Vec::new(),
            loop_closures: 0,
        }
    }

    fn add_odometry(&mut self, factor: &OdometryFactor) -> Result<()> {
        if let Some(&last) = self.keys.last() {
            ensure!(
                factor.cur_key > last,
                "odometry key {} does not follow {}",
                factor.cur_key,
                last
            );
        }

        let estimate = match (self.last_odometry, self.keys.last(), self.values.last()) {
            (Some(prev_odom), Some(&prev_key), Some(prev_value)) => {
                let measurement = prev_odom.inverse().compose(&factor.w_pose_blkf);
                self.factors.push(GraphFactor::Between {
                    key_i: prev_key,
                    key_j: factor.cur_key,
                    measurement,
                    noise: factor.noise,
                    edge_type: EdgeType::Odometry,
                });
                prev_value.compose(&measurement)
            }
            _ => {
                self.factors.push(GraphFactor::Prior {
                    key: factor.cur_key,
                    pose: factor.w_pose_blkf,
                    noise: factor.noise,
                });
                factor.w_pose_blkf
            }
        };

        self.key_index.insert(factor.cur_key, self.keys.len());
        self.keys.push(factor.cur_key);
        self.values.push(estimate);
        self.last_odometry = Some(factor.w_pose_blkf);
        Ok(())
    }

    fn add_loop_closure(&mut self, factor: &LoopClosureFactor) -> Result<()> {
        ensure!(factor.ref_key != factor.cur_key, "loop closure {} onto itself", factor.cur_key);
        for key in [factor.ref_key, factor.cur_key] {
            if !self.key_index.contains_key(&key) {
                bail!("loop closure references unknown key {}", key);
            }
        }
        self.factors.push(GraphFactor::Between {
            key_i: factor.ref_key,
            key_j: factor.cur_key,
            measurement: factor.ref_pose_cur,
            noise: factor.noise,
            edge_type: EdgeType::LoopClosure,
        });
        self.loop_closures += 1;

        if let Some(summary) = self.optimize() {
            debug!(
                "Pose graph: {} keys, error {:.4} -> {:.4} in {} iterations",
                self.keys.len(),
                summary.initial_error,
                summary.final_error,
                summary.iterations
            );
        }
        Ok(())
    }

    pub fn snapshot(&self) -> PoseGraphSnapshot {
        PoseGraphSnapshot {
            values: self.keys.iter().copied().zip(self.values.iter().copied()).collect::<BTreeMap<_, _>>(),
            factors: self.factors.clone(),
        }
    }

    /// Levenberg-Marquardt over all keys but the first, which stays fixed.
    pub fn optimize(&mut self) -> Option<SolveSummary> {
        let n_poses = self.keys.len();
        if n_poses < 2 {
            return None;
        }
        let edges = self.edges();
        let n_params = (n_poses - 1) * 6;

        let mut params = DVector::zeros(n_params);
        for (k, pose) in self.values.iter().enumerate().skip(1) {
            params.fixed_rows_mut::<6>((k - 1) * 6).copy_from(&pose.log());
        }
        let anchor = self.values[0];

        let initial_error = total_error(&params, &edges, &anchor);
        let mut current_error = initial_error;
        let mut lambda = 1e-3;
        let (lambda_up, lambda_down) = (10.0, 0.1);
        let (min_lambda, max_lambda) = (1e-10, 1e10);
        let mut iterations = 0;

        for iter in 0..self.config.max_iterations {
            iterations = iter + 1;
            let (residuals, jacobian) = residuals_and_jacobian(&params, &edges, &anchor);
            current_error = residuals.norm_squared();

            let gradient = jacobian.transpose() * &residuals;
            if gradient.norm() < self.config.gradient_tolerance {
                break;
            }
            let mut damped = jacobian.transpose() * &jacobian;
            for i in 0..n_params {
                damped[(i, i)] += lambda * damped[(i, i)].max(1e-6);
            }

            let Some(delta) = damped.lu().solve(&(-&gradient)) else {
                warn!("Pose graph normal equations are singular");
                break;
            };
            if delta.norm() < self.config.param_tolerance * (params.norm() + self.config.param_tolerance) {
                break;
            }

            let trial = &params + &delta;
            let trial_error = total_error(&trial, &edges, &anchor);
            if trial_error < current_error {
                params = trial;
                current_error = trial_error;
                lambda = (lambda * lambda_down).max(min_lambda);
            } else {
                lambda = (lambda * lambda_up).min(max_lambda);
            }
        }

        for k in 1..n_poses {
            self.values[k] = pose_at(&params, k, &anchor);
        }
        Some(SolveSummary {
            iterations,
            initial_error: initial_error.sqrt(),
            final_error: current_error.sqrt(),
        })
    }

    fn edges(&self) -> Vec<Edge> {
        self.factors
            .iter()
            .filter_map(|f| match f {
                GraphFactor::Between {
                    key_i,
                    key_j,
                    measurement,
                    noise,
                    ..
                } => Some(Edge {
                    i: *self.key_index.get(key_i)?,
                    j: *self.key_index.get(key_j)?,
                    measurement_inv: measurement.inverse(),
                    noise: *noise,
                }),
                GraphFactor::Prior { .. } => None,
            })
            .collect()
    }
}

impl Default for PoseGraph {
    fn default() -> Self {
        Self::new(PoseGraphConfig::default())
    }
}

impl PoseGraphSolver for PoseGraph {
    fn add_factor(&mut self, factor: Factor) -> Result<PoseGraphSnapshot> {
        match &factor {
            Factor::Odometry(odom) => self.add_odometry(odom)?,
            Factor::LoopClosure(lc) => self.add_loop_closure(lc)?,
        }
        Ok(self.snapshot())
    }

    fn estimate(&self, key: FrameId) -> Option<SE3> {
        self.key_index.get(&key).map(|&k| self.values[k])
    }

    fn size(&self) -> usize {
        self.keys.len()
    }

    fn loop_closure_count(&self) -> usize {
        self.loop_closures
    }
}

fn pose_at(params: &DVector<f64>, k: usize, anchor: &SE3) -> SE3 {
    if k == 0 {
        return *anchor;
    }
    SE3::exp(&params.fixed_rows::<6>((k - 1) * 6).into_owned())
}

fn edge_residual(edge: &Edge, pose_i: &SE3, pose_j: &SE3) -> Vector6<f64> {
    let predicted = pose_i.inverse().compose(pose_j);
    edge.noise.whiten(&edge.measurement_inv.compose(&predicted).log())
}

fn total_error(params: &DVector<f64>, edges: &[Edge], anchor: &SE3) -> f64 {
    edges
        .iter()
        .map(|e| edge_residual(e, &pose_at(params, e.i, anchor), &pose_at(params, e.j, anchor)).norm_squared())
        .sum()
}

/// Whitened residuals and their central-difference Jacobian.
fn residuals_and_jacobian(params: &DVector<f64>, edges: &[Edge], anchor: &SE3) -> (DVector<f64>, DMatrix<f64>) {
    const EPS: f64 = 1e-6;
    let mut residuals = DVector::zeros(edges.len() * 6);
    let mut jacobian = DMatrix::zeros(edges.len() * 6, params.len());

    for (e, edge) in edges.iter().enumerate() {
        let pose_i = pose_at(params, edge.i, anchor);
        let pose_j = pose_at(params, edge.j, anchor);
        residuals
            .fixed_rows_mut::<6>(e * 6)
            .copy_from(&edge_residual(edge, &pose_i, &pose_j));

        for (k, is_i) in [(edge.i, true), (edge.j, false)] {
            if k == 0 {
                continue;
            }
            let col = (k - 1) * 6;
            for p in 0..6 {
                let mut plus = params.clone();
                let mut minus = params.clone();
                plus[col + p] += EPS;
                minus[col + p] -= EPS;
                let (r_plus, r_minus) = if is_i {
                    (
                        edge_residual(edge, &pose_at(&plus, k, anchor), &pose_j),
                        edge_residual(edge, &pose_at(&minus, k, anchor), &pose_j),
                    )
                } else {
                    (
                        edge_residual(edge, &pose_i, &pose_at(&plus, k, anchor)),
                        edge_residual(edge, &pose_i, &pose_at(&minus, k, anchor)),
                    )
                };
                let d = (r_plus - r_minus) / (2.0 * EPS);
                for r in 0..6 {
                    jacobian[(e * 6 + r, col + p)] += d[r];
                }
            }
        }
    }
    (residuals, jacobian)
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{UnitQuaternion, Vector3};

    fn odom(key: u64, pose: SE3) -> Factor {
        Factor::Odometry(OdometryFactor {
            cur_key: FrameId::new(key),
            w_pose_blkf: pose,
            noise: NoiseModel::from_sigmas(0.01, 0.1),
        })
    }

    fn translation(x: f64, y: f64) -> SE3 {
        SE3::from_quaternion(UnitQuaternion::identity(), Vector3::new(x, y, 0.0))
    }

    #[test]
    fn test_odometry_chain_keeps_estimates() {
        let mut graph = PoseGraph::default();
        graph.add_factor(odom(0, translation(0.0, 0.0))).unwrap();
        graph.add_factor(odom(1, translation(1.0, 0.0))).unwrap();
        let snapshot = graph.add_factor(odom(2, translation(2.0, 0.0))).unwrap();

        assert_eq!(graph.size(), 3);
        assert_eq!(snapshot.factors.len(), 3);
        assert!(matches!(snapshot.factors[0], GraphFactor::Prior { .. }));
        assert!((snapshot.values[&FrameId::new(2)].translation.x - 2.0).abs() < 1e-12);
        assert!(graph.add_factor(odom(1, translation(3.0, 0.0))).is_err());
    }

    #[test]
    fn test_loop_closure_pulls_drifted_pose() {
        let mut graph = PoseGraph::default();
        // A square with drift: the last pose should coincide with the first.
        let poses = [(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.1, 0.1)];
        for (k, (x, y)) in poses.iter().enumerate() {
            graph.add_factor(odom(k as u64, translation(*x, *y))).unwrap();
        }
        let before = graph.estimate(FrameId::new(4)).unwrap();
        assert!((before.translation.x - 0.1).abs() < 1e-12);

        let snapshot = graph
            .add_factor(Factor::LoopClosure(LoopClosureFactor {
                ref_key: FrameId::new(0),
                cur_key: FrameId::new(4),
                ref_pose_cur: SE3::identity(),
                noise: NoiseModel::from_sigmas(0.001, 0.01),
            }))
            .unwrap();

        assert_eq!(graph.loop_closure_count(), 1);
        assert_eq!(snapshot.factors.len(), 6);
        let after = graph.estimate(FrameId::new(4)).unwrap();
        assert!(after.translation.norm() < before.translation.norm());
        assert!(after.translation.norm() < 0.02);
        // The anchor does not move.
        assert_eq!(graph.estimate(FrameId::new(0)), Some(translation(0.0, 0.0)));
    }

    #[test]
    fn test_loop_closure_requires_known_keys() {
        let mut graph = PoseGraph::default();
        graph.add_factor(odom(0, SE3::identity())).unwrap();
        let lc = LoopClosureFactor {
            ref_key: FrameId::new(0),
            cur_key: FrameId::new(7),
            ref_pose_cur: SE3::identity(),
            noise: NoiseModel::from_sigmas(0.01, 0.1),
        };
        assert!(graph.add_factor(Factor::LoopClosure(lc)).is_err());
    }
}
