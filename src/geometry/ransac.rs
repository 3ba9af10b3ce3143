//! Generic RANSAC driver with adaptive iteration count.
//!
//! Each geometric solver implements [`RansacProblem`]: a minimal-sample
//! model fit, a per-correspondence residual and an optional refit on the
//! final inlier set. The driver draws samples from a seeded `StdRng` unless
//! `randomize` is requested, so repeated runs on the same data agree.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Knobs shared by all RANSAC problems.
#[derive(Debug, Clone)]
pub struct RansacConfig {
    pub max_iterations: usize,
    /// Residual threshold; units depend on the problem.
    pub threshold: f64,
    /// Desired probability of drawing at least one outlier-free sample.
    pub probability: f64,
    /// Seed from OS entropy instead of `seed`.
    pub randomize: bool,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self {
            max_iterations: 100,
            threshold: 1e-6,
            probability: 0.995,
            randomize: false,
            seed: 0,
        }
    }
}

/// A robust estimation problem over `len()` correspondences.
pub trait RansacProblem {
    type Model: Clone;

    /// Number of correspondences in a minimal sample.
    fn sample_size(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fit candidate models to a minimal sample. May return several
    /// candidates (e.g. the four essential decompositions) or none for a
    /// degenerate sample.
    fn fit(&self, sample: &[usize]) -> Vec<Self::Model>;

    fn residual(&self, model: &Self::Model, index: usize) -> f64;

    /// Non-minimal refit on the consensus set. `None` keeps the sampled model.
    fn refine(&self, _model: &Self::Model, _inliers: &[usize]) -> Option<Self::Model> {
        None
    }
}

#[derive(Debug, Clone)]
pub struct RansacResult<M> {
    pub model: M,
    pub inliers: Vec<usize>,
    pub iterations: usize,
}

/// Runs RANSAC; `None` when there are too few correspondences or no sample
/// produced a model.
pub fn ransac<P: RansacProblem>(problem: &P, config: &RansacConfig) -> Option<RansacResult<P::Model>> {
    let n = problem.len();
    let k = problem.sample_size();
    if n < k || k == 0 {
        return None;
    }

    let mut rng = if config.randomize {
        StdRng::from_entropy()
    } else {
        StdRng::seed_from_u64(config.seed)
    };

    let mut best: Option<(P::Model, Vec<usize>)> = None;
    let mut max_iter = config.max_iterations;
    let mut iterations = 0;

    while iterations < max_iter {
        iterations += 1;
        let sample = index::sample(&mut rng, n, k).into_vec();

        for model in problem.fit(&sample) {
            let inliers = find_inliers(problem, &model, config.threshold);
            let best_count = best.as_ref().map_or(0, |(_, b)| b.len());
            if inliers.len() > best_count {
                let ratio = inliers.len() as f64 / n as f64;
                let needed = compute_adaptive_iterations(ratio, config.probability, k);
                max_iter = config.max_iterations.min(needed);
                best = Some((model, inliers));
            }
        }
    }

    let (mut model, mut inliers) = best?;

    if let Some(refined) = problem.refine(&model, &inliers) {
        let refined_inliers = find_inliers(problem, &refined, config.threshold);
        if refined_inliers.len() >= inliers.len() {
            model = refined;
            inliers = refined_inliers;
        }
    }

    Some(RansacResult {
        model,
        inliers,
        iterations,
    })
}

pub fn find_inliers<P: RansacProblem>(problem: &P, model: &P::Model, threshold: f64) -> Vec<usize> {
    (0..problem.len())
        .filter(|&i| problem.residual(model, i) < threshold)
        .collect()
}

/// Number of iterations needed to draw an all-inlier sample with the given
/// probability: `k = log(1 - p) / log(1 - w^n)`.
pub fn compute_adaptive_iterations(inlier_ratio: f64, probability: f64, sample_size: usize) -> usize {
    if inlier_ratio <= 0.0 {
        return usize::MAX;
    }
    if inlier_ratio >= 1.0 {
        return 1;
    }

    let w_n = inlier_ratio.powi(sample_size as i32);
    let log_denom = (1.0 - w_n).ln();

    if log_denom.abs() < 1e-10 {
        return usize::MAX;
    }

    let k = (1.0 - probability).ln() / log_denom;
    if !k.is_finite() {
        return usize::MAX;
    }
    (k.ceil() as usize).max(1)
}
