//! Relative pose from bearing correspondences via the essential matrix.
//!
//! Convention: for a relative pose `ref_T_cur = (R, t)`, corresponding
//! bearings satisfy `f_refᵀ E f_cur = 0` with `E = [t]× R`. Translation is
//! recovered up to scale and returned with unit norm.

use std::cmp::Ordering;

use nalgebra::{Matrix3, SMatrix, SVector, Vector3};

use super::five_point::{essentials_from_five, FIVE_POINT_SAMPLE};
use super::ransac::RansacProblem;
use super::so3::skew;
use super::translation::{translation_from_two_bearings, triangulate_depths};
use super::SE3;

/// Minimum number of correspondences for the linear solver.
pub const EIGHT_POINT_SAMPLE: usize = 8;

/// Linear (eight-point) essential matrix estimate from `n >= 8`
/// correspondences: the right null vector of the stacked epipolar rows.
pub fn essential_from_bearings(f_ref: &[Vector3<f64>], f_cur: &[Vector3<f64>]) -> Option<Matrix3<f64>> {
    if f_ref.len() < EIGHT_POINT_SAMPLE || f_ref.len() != f_cur.len() {
        return None;
    }

    let mut ata = SMatrix::<f64, 9, 9>::zeros();
    for (a, b) in f_ref.iter().zip(f_cur) {
        let mut row = SVector::<f64, 9>::zeros();
        for i in 0..3 {
            for j in 0..3 {
                row[3 * i + j] = a[i] * b[j];
            }
        }
        ata += row * row.transpose();
    }

    let eigen = ata.symmetric_eigen();
    let (min_idx, _) = eigen
        .eigenvalues
        .iter()
        .enumerate()
        .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))?;
    let v = eigen.eigenvectors.column(min_idx);
    Some(Matrix3::from_row_iterator(v.iter().copied()))
}

/// The four `(R, t)` candidates encoded by an essential matrix.
pub fn decompose_essential(essential: &Matrix3<f64>) -> Option<[(Matrix3<f64>, Vector3<f64>); 4]> {
    let svd = essential.svd(true, true);
    let mut u = svd.u?;
    let mut v_t = svd.v_t?;

    // Last column of U and last row of Vᵀ are sign-free since σ3 = 0.
    if u.determinant() < 0.0 {
        u.column_mut(2).neg_mut();
    }
    if v_t.determinant() < 0.0 {
        v_t.row_mut(2).neg_mut();
    }

    let w = Matrix3::new(0.0, -1.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0, 1.0);
    let r_a = u * w * v_t;
    let r_b = u * w.transpose() * v_t;
    let t: Vector3<f64> = u.column(2).into_owned();

    Some([(r_a, t), (r_b, t), (r_a, -t), (r_b, -t)])
}

/// Angular epipolar error `1 - cos(α)`, where α is the angle between
/// `f_ref` and the epipolar plane spanned by `t` and `R f_cur`.
/// Correspondences that triangulate behind either camera get the maximal
/// error of 1.
pub fn epipolar_error(rotation: &Matrix3<f64>, t: &Vector3<f64>, f_ref: &Vector3<f64>, f_cur: &Vector3<f64>) -> f64 {
    let rotated = rotation * f_cur;
    let normal = t.cross(&rotated);
    let norm = normal.norm();
    if norm < 1e-12 {
        return 0.0;
    }
    let sin_a = (f_ref.dot(&normal) / (norm * f_ref.norm())).abs().min(1.0);

    if let Some((d_ref, d_cur)) = triangulate_depths(f_ref, &rotated, t) {
        if d_ref < 0.0 || d_cur < 0.0 {
            return 1.0;
        }
    }
    1.0 - (1.0 - sin_a * sin_a).sqrt()
}

/// Picks the decomposition with the most correspondences in front of both
/// cameras.
pub fn select_by_cheirality(
    candidates: &[(Matrix3<f64>, Vector3<f64>); 4],
    f_ref: &[Vector3<f64>],
    f_cur: &[Vector3<f64>],
    indices: &[usize],
) -> (Matrix3<f64>, Vector3<f64>) {
    let count = |(r, t): &(Matrix3<f64>, Vector3<f64>)| {
        indices
            .iter()
            .filter(|&&i| {
                matches!(triangulate_depths(&f_ref[i], &(r * f_cur[i]), t),
                    Some((a, b)) if a > 0.0 && b > 0.0)
            })
            .count()
    };

    let mut best = candidates[0];
    let mut best_count = count(&candidates[0]);
    for cand in &candidates[1..] {
        let c = count(cand);
        if c > best_count {
            best = *cand;
            best_count = c;
        }
    }
    best
}

pub fn essential_from_pose(rotation: &Matrix3<f64>, t: &Vector3<f64>) -> Matrix3<f64> {
    skew(t) * rotation
}

/// Unconstrained relative pose between two bearing sets. Hypotheses come
/// from the five-point solver; the consensus set is refit with the linear
/// solver.
pub struct CentralRelativeProblem<'a> {
    pub f_ref: &'a [Vector3<f64>],
    pub f_cur: &'a [Vector3<f64>],
}

impl CentralRelativeProblem<'_> {
    fn solve(&self, indices: &[usize]) -> Option<SE3> {
        let a: Vec<_> = indices.iter().map(|&i| self.f_ref[i]).collect();
        let b: Vec<_> = indices.iter().map(|&i| self.f_cur[i]).collect();
        let essential = essential_from_bearings(&a, &b)?;
        let candidates = decompose_essential(&essential)?;
        let (r, t) = select_by_cheirality(&candidates, self.f_ref, self.f_cur, indices);
        Some(SE3::from_rt(&r, &t))
    }

    fn minimal(&self, sample: &[usize]) -> Vec<SE3> {
        let a: Vec<_> = sample.iter().map(|&i| self.f_ref[i]).collect();
        let b: Vec<_> = sample.iter().map(|&i| self.f_cur[i]).collect();
        essentials_from_five(&a, &b)
            .iter()
            .filter_map(decompose_essential)
            .map(|candidates| {
                let (r, t) = select_by_cheirality(&candidates, self.f_ref, self.f_cur, sample);
                SE3::from_rt(&r, &t)
            })
            .collect()
    }
}

impl RansacProblem for CentralRelativeProblem<'_> {
    type Model = SE3;

    fn sample_size(&self) -> usize {
        FIVE_POINT_SAMPLE
    }

    fn len(&self) -> usize {
        self.f_ref.len()
    }

    fn fit(&self, sample: &[usize]) -> Vec<SE3> {
        self.minimal(sample)
    }

    fn residual(&self, model: &SE3, index: usize) -> f64 {
        epipolar_error(&model.rotation_matrix(), &model.translation, &self.f_ref[index], &self.f_cur[index])
    }

    fn refine(&self, _model: &SE3, inliers: &[usize]) -> Option<SE3> {
        self.solve(inliers)
    }
}

/// Relative translation direction given `ref_R_cur`.
pub struct TranslationOnlyProblem<'a> {
    pub rotation: Matrix3<f64>,
    pub f_ref: &'a [Vector3<f64>],
    pub f_cur: &'a [Vector3<f64>],
}

impl RansacProblem for TranslationOnlyProblem<'_> {
    type Model = Vector3<f64>;

    fn sample_size(&self) -> usize {
        2
    }

    fn len(&self) -> usize {
        self.f_ref.len()
    }

    fn fit(&self, sample: &[usize]) -> Vec<Vector3<f64>> {
        translation_from_two_bearings(
            &self.rotation,
            [&self.f_ref[sample[0]], &self.f_ref[sample[1]]],
            [&self.f_cur[sample[0]], &self.f_cur[sample[1]]],
        )
        .into_iter()
        .collect()
    }

    fn residual(&self, t: &Vector3<f64>, index: usize) -> f64 {
        epipolar_error(&self.rotation, t, &self.f_ref[index], &self.f_cur[index])
    }

    fn refine(&self, t: &Vector3<f64>, inliers: &[usize]) -> Option<Vector3<f64>> {
        // t is the smallest right singular vector of the stacked constraints.
        let mut m = Matrix3::zeros();
        for &i in inliers {
            let c = (self.rotation * self.f_cur[i]).cross(&self.f_ref[i]);
            m += c * c.transpose();
        }
        let eigen = m.symmetric_eigen();
        let (min_idx, _) = eigen
            .eigenvalues
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))?;
        let mut refined: Vector3<f64> = eigen.eigenvectors.column(min_idx).normalize();
        if refined.dot(t) < 0.0 {
            refined = -refined;
        }
        Some(refined)
    }
}
