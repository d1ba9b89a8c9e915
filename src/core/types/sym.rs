//! Packed symmetric-matrix value types.
//!
//! Covariances are stored lower-triangular, row by row, so an NxN symmetric
//! matrix takes N(N+1)/2 slots. The packed index arithmetic lives only
//! here; callers address elements as (row, column) pairs.

use serde::{Deserialize, Serialize};

/// Packed index into a lower-triangular store, valid for any (i, j) order.
#[inline]
fn packed(i: usize, j: usize) -> usize {
    if j <= i {
        i * (i + 1) / 2 + j
    } else {
        j * (j + 1) / 2 + i
    }
}

/// 3x3 symmetric matrix in packed storage (6 elements).
///
/// Used for spatial covariance blocks and for the combined weight matrix
/// of the vertex update.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sym3 {
    d: [f64; 6],
}

impl Sym3 {
    /// All-zero matrix.
    #[inline]
    pub fn zero() -> Self {
        Self { d: [0.0; 6] }
    }

    /// Diagonal matrix from three variances.
    #[inline]
    pub fn diagonal(xx: f64, yy: f64, zz: f64) -> Self {
        Self {
            d: [xx, 0.0, yy, 0.0, 0.0, zz],
        }
    }

    /// Build from packed lower-triangular data.
    #[inline]
    pub fn from_packed(d: [f64; 6]) -> Self {
        Self { d }
    }

    /// Packed lower-triangular data.
    #[inline]
    pub fn as_packed(&self) -> &[f64; 6] {
        &self.d
    }

    /// Element (i, j); symmetric, so argument order does not matter.
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.d[packed(i, j)]
    }

    /// Set element (i, j).
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.d[packed(i, j)] = v;
    }

    /// Element-wise sum.
    #[inline]
    pub fn add(&self, other: &Sym3) -> Sym3 {
        let mut d = self.d;
        for (a, b) in d.iter_mut().zip(other.d.iter()) {
            *a += b;
        }
        Sym3 { d }
    }

    /// Element-wise difference.
    #[inline]
    pub fn sub(&self, other: &Sym3) -> Sym3 {
        let mut d = self.d;
        for (a, b) in d.iter_mut().zip(other.d.iter()) {
            *a -= b;
        }
        Sym3 { d }
    }

    /// Matrix-vector product.
    #[inline]
    pub fn mul_vec(&self, v: &[f64; 3]) -> [f64; 3] {
        [
            self.at(0, 0) * v[0] + self.at(0, 1) * v[1] + self.at(0, 2) * v[2],
            self.at(1, 0) * v[0] + self.at(1, 1) * v[1] + self.at(1, 2) * v[2],
            self.at(2, 0) * v[0] + self.at(2, 1) * v[1] + self.at(2, 2) * v[2],
        ]
    }

    /// Quadratic form v' * M * v.
    #[inline]
    pub fn quadratic_form(&self, v: &[f64; 3]) -> f64 {
        let mv = self.mul_vec(v);
        v[0] * mv[0] + v[1] * mv[1] + v[2] * mv[2]
    }

    /// Explicit cofactor inverse.
    ///
    /// Returns `None` when the determinant magnitude is below 1e-20; the
    /// vertex update treats that as a zero weight rather than failing.
    pub fn invert(&self) -> Option<Sym3> {
        let a = &self.d;
        let mut ai = [0.0; 6];
        ai[0] = a[2] * a[5] - a[4] * a[4];
        ai[1] = a[3] * a[4] - a[1] * a[5];
        ai[3] = a[1] * a[4] - a[2] * a[3];
        let det = a[0] * ai[0] + a[1] * ai[1] + a[3] * ai[3];
        if det.abs() <= 1.0e-20 {
            return None;
        }
        let det = 1.0 / det;
        ai[0] *= det;
        ai[1] *= det;
        ai[3] *= det;
        ai[2] = (a[0] * a[5] - a[3] * a[3]) * det;
        ai[4] = (a[1] * a[3] - a[0] * a[4]) * det;
        ai[5] = (a[0] * a[2] - a[1] * a[1]) * det;
        Some(Sym3 { d: ai })
    }
}

/// 8x8 symmetric covariance in packed storage (36 elements).
///
/// Rows 0..3 are position, 3..6 momentum, 6 energy, 7 the decay-length
/// parameter S. Row 7 carries the correlation of S with the rest of the
/// state; element (7,7) is the S variance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SymCov {
    d: [f64; 36],
}

impl Default for SymCov {
    fn default() -> Self {
        Self::zero()
    }
}

impl SymCov {
    /// All-zero covariance.
    #[inline]
    pub fn zero() -> Self {
        Self { d: [0.0; 36] }
    }

    /// Build from packed lower-triangular data.
    #[inline]
    pub fn from_packed(d: [f64; 36]) -> Self {
        Self { d }
    }

    /// Packed lower-triangular data.
    #[inline]
    pub fn as_packed(&self) -> &[f64; 36] {
        &self.d
    }

    /// Element (i, j); symmetric, so argument order does not matter.
    #[inline]
    pub fn at(&self, i: usize, j: usize) -> f64 {
        self.d[packed(i, j)]
    }

    /// Set element (i, j).
    #[inline]
    pub fn set(&mut self, i: usize, j: usize, v: f64) {
        self.d[packed(i, j)] = v;
    }

    /// Add to element (i, j).
    #[inline]
    pub fn add(&mut self, i: usize, j: usize, v: f64) {
        self.d[packed(i, j)] += v;
    }

    /// Upper-left 3x3 spatial block.
    #[inline]
    pub fn position_block(&self) -> Sym3 {
        Sym3::from_packed([self.d[0], self.d[1], self.d[2], self.d[3], self.d[4], self.d[5]])
    }

    /// Overwrite the upper-left 3x3 spatial block.
    #[inline]
    pub fn set_position_block(&mut self, b: &Sym3) {
        self.d[..6].copy_from_slice(b.as_packed());
    }

    /// Congruence transform J * C * J' for a full 8x8 Jacobian.
    ///
    /// Only the packed lower triangle of the result is computed.
    pub fn congruence(&self, j: &[[f64; 8]; 8]) -> SymCov {
        // A = C * J' first, full 8x8 scratch.
        let mut a = [[0.0; 8]; 8];
        for (i, row) in a.iter_mut().enumerate() {
            for (jc, slot) in row.iter_mut().enumerate() {
                let mut sum = 0.0;
                for k in 0..8 {
                    sum += self.at(i, k) * j[jc][k];
                }
                *slot = sum;
            }
        }
        let mut out = SymCov::zero();
        for i in 0..8 {
            for jc in 0..=i {
                let mut sum = 0.0;
                for k in 0..8 {
                    sum += j[i][k] * a[k][jc];
                }
                out.set(i, jc, sum);
            }
        }
        out
    }

    /// Congruence transform restricted to the 7x7 block (S row untouched).
    ///
    /// Used by the mass constraint, whose Jacobian does not involve S.
    pub fn congruence7(&mut self, j: &[[f64; 7]; 7]) {
        let mut a = [[0.0; 7]; 7];
        for (i, row) in a.iter_mut().enumerate() {
            for (jc, slot) in row.iter_mut().enumerate() {
                let mut sum = 0.0;
                for k in 0..7 {
                    sum += self.at(i, k) * j[jc][k];
                }
                *slot = sum;
            }
        }
        for i in 0..7 {
            for jc in 0..=i {
                let mut sum = 0.0;
                for k in 0..7 {
                    sum += j[i][k] * a[k][jc];
                }
                self.set(i, jc, sum);
            }
        }
    }
}
