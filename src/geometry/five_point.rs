//! Minimal five-point essential matrix solver (Nistér / Stewénius).
//!
//! The essential matrix is written as `E = x E0 + y E1 + z E2 + E3` over
//! the four-dimensional null space of the five epipolar rows. The cubic
//! constraints `det(E) = 0` and `2 E Eᵀ E - tr(E Eᵀ) E = 0` are reduced
//! with Gauss-Jordan elimination to a 10x10 action matrix for `x`, whose
//! real eigenvectors hold the monomials `[x, y, z, 1]` in their last four
//! entries.

use std::cmp::Ordering;

use nalgebra::{Matrix3, SMatrix, SVector, Vector3, Vector4};

pub const FIVE_POINT_SAMPLE: usize = 5;

/// Polynomial in `x, y, z` of degree <= 3, coefficients in `MONOMIALS` order.
type Poly = SVector<f64, 20>;

/// Exponents of `(x, y, z)`. Cubic terms first, then the ten monomials the
/// action matrix acts on.
const MONOMIALS: [[u8; 3]; 20] = [
    [3, 0, 0],
    [2, 1, 0],
    [1, 2, 0],
    [0, 3, 0],
    [2, 0, 1],
    [1, 1, 1],
    [0, 2, 1],
    [1, 0, 2],
    [0, 1, 2],
    [0, 0, 3],
    [2, 0, 0],
    [1, 1, 0],
    [0, 2, 0],
    [1, 0, 1],
    [0, 1, 1],
    [0, 0, 2],
    [1, 0, 0],
    [0, 1, 0],
    [0, 0, 1],
    [0, 0, 0],
];

/// Index of the first of `x, y, z, 1` among the action monomials.
const LINEAR_OFFSET: usize = 6;

fn monomial_index(exp: [u8; 3]) -> Option<usize> {
    MONOMIALS.iter().position(|m| *m == exp)
}

/// `c[0] x + c[1] y + c[2] z + c[3]`.
fn linear(c: &Vector4<f64>) -> Poly {
    let mut p = Poly::zeros();
    p[16] = c[0];
    p[17] = c[1];
    p[18] = c[2];
    p[19] = c[3];
    p
}

/// Product of two polynomials. Terms above degree 3 never occur for the
/// constraints built here and are dropped.
fn mul(a: &Poly, b: &Poly) -> Poly {
    let mut out = Poly::zeros();
    for (i, &ca) in a.iter().enumerate() {
        if ca == 0.0 {
            continue;
        }
        for (j, &cb) in b.iter().enumerate() {
            if cb == 0.0 {
                continue;
            }
            let (ea, eb) = (MONOMIALS[i], MONOMIALS[j]);
            if let Some(k) = monomial_index([ea[0] + eb[0], ea[1] + eb[1], ea[2] + eb[2]]) {
                out[k] += ca * cb;
            }
        }
    }
    out
}

/// Four smallest right singular vectors of the stacked epipolar rows, as
/// the columns of a 9x4 matrix (entry `3i + j` is `E[(i, j)]`).
fn null_space_basis(f_ref: &[Vector3<f64>], f_cur: &[Vector3<f64>]) -> Option<SMatrix<f64, 9, 4>> {
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

    let eigen = ata.try_symmetric_eigen(1e-15, 1000)?;
    let mut order: Vec<usize> = (0..9).collect();
    order.sort_by(|&a, &b| {
        eigen.eigenvalues[a]
            .partial_cmp(&eigen.eigenvalues[b])
            .unwrap_or(Ordering::Equal)
    });

    // Degenerate configurations leave a null space larger than four.
    let largest = eigen.eigenvalues[order[8]].abs().max(f64::MIN_POSITIVE);
    if eigen.eigenvalues[order[4]].abs() < 1e-12 * largest {
        return None;
    }

    let mut basis = SMatrix::<f64, 9, 4>::zeros();
    for (col, &idx) in order.iter().take(4).enumerate() {
        basis.set_column(col, &eigen.eigenvectors.column(idx));
    }
    Some(basis)
}

/// The ten cubic constraints on `(x, y, z)`, one per row.
fn constraint_matrix(basis: &SMatrix<f64, 9, 4>) -> SMatrix<f64, 10, 20> {
    let e: Vec<Vec<Poly>> = (0..3)
        .map(|i| {
            (0..3)
                .map(|j| linear(&basis.row(3 * i + j).transpose()))
                .collect()
        })
        .collect();

    let det = mul(&e[0][0], &(mul(&e[1][1], &e[2][2]) - mul(&e[1][2], &e[2][1])))
        - mul(&e[0][1], &(mul(&e[1][0], &e[2][2]) - mul(&e[1][2], &e[2][0])))
        + mul(&e[0][2], &(mul(&e[1][0], &e[2][1]) - mul(&e[1][1], &e[2][0])));

    let mut eet = [[Poly::zeros(); 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            for k in 0..3 {
                eet[i][j] += mul(&e[i][k], &e[j][k]);
            }
        }
    }
    let trace = eet[0][0] + eet[1][1] + eet[2][2];

    let mut c = SMatrix::<f64, 10, 20>::zeros();
    c.set_row(0, &det.transpose());
    for i in 0..3 {
        for j in 0..3 {
            let mut p = -mul(&trace, &e[i][j]);
            for k in 0..3 {
                p += mul(&eet[i][k], &e[k][j]) * 2.0;
            }
            c.set_row(1 + 3 * i + j, &p.transpose());
        }
    }
    c
}

/// Action matrix of multiplication by `x` on
/// `[xx, xy, yy, xz, yz, zz, x, y, z, 1]`.
fn action_matrix(c: &SMatrix<f64, 10, 20>) -> Option<SMatrix<f64, 10, 10>> {
    let cubic = c.fixed_view::<10, 10>(0, 0).into_owned();
    let rest = c.fixed_view::<10, 10>(0, 10).into_owned();
    // cubic monomials = -m * action monomials
    let m = cubic.full_piv_lu().solve(&rest)?;

    let mut a = SMatrix::<f64, 10, 10>::zeros();
    // x * {xx, xy, yy, xz, yz, zz} = {xxx, xxy, xyy, xxz, xyz, xzz}
    for (row, cubic_row) in [(0, 0), (1, 1), (2, 2), (3, 4), (4, 5), (5, 7)] {
        a.set_row(row, &(-m.row(cubic_row)));
    }
    // x * {x, y, z, 1} = {xx, xy, xz, x}
    a[(6, 0)] = 1.0;
    a[(7, 1)] = 1.0;
    a[(8, 3)] = 1.0;
    a[(9, 6)] = 1.0;
    Some(a)
}

/// Up to ten essential matrices consistent with five bearing pairs, each
/// normalized to unit Frobenius norm and satisfying `f_refᵀ E f_cur = 0`.
/// Returns nothing for degenerate samples.
pub fn essentials_from_five(f_ref: &[Vector3<f64>], f_cur: &[Vector3<f64>]) -> Vec<Matrix3<f64>> {
    if f_ref.len() != FIVE_POINT_SAMPLE || f_cur.len() != FIVE_POINT_SAMPLE {
        return Vec::new();
    }
    let Some(basis) = null_space_basis(f_ref, f_cur) else {
        return Vec::new();
    };
    let Some(action) = action_matrix(&constraint_matrix(&basis)) else {
        return Vec::new();
    };

    let mut solutions = Vec::new();
    for lambda in action.complex_eigenvalues().iter() {
        if lambda.im.abs() > 1e-8 * lambda.re.abs().max(1.0) {
            continue;
        }
        let shifted = action - SMatrix::<f64, 10, 10>::identity() * lambda.re;
        let Some(svd) = shifted.try_svd(false, true, 1e-15, 1000) else {
            continue;
        };
        let Some(v_t) = svd.v_t else {
            continue;
        };
        let Some((min_idx, _)) = svd
            .singular_values
            .iter()
            .enumerate()
            .min_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(Ordering::Equal))
        else {
            continue;
        };

        let v = v_t.row(min_idx);
        let coeffs = Vector4::new(
            v[LINEAR_OFFSET],
            v[LINEAR_OFFSET + 1],
            v[LINEAR_OFFSET + 2],
            v[LINEAR_OFFSET + 3],
        );
        let e_vec = basis * coeffs;
        let norm = e_vec.norm();
        if !norm.is_finite() || norm < 1e-12 {
            continue;
        }
        solutions.push(Matrix3::from_row_iterator(e_vec.iter().map(|x| x / norm)));
    }
    solutions
}
