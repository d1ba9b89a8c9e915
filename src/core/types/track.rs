//! Track-fit input adapter.

use serde::{Deserialize, Serialize};

/// State of a single fitted track as delivered by an upstream track fit.
///
/// Parameterization at a reference z plane: (x, y, dx/dz, dy/dz, q/p, z),
/// with q/p the signed inverse momentum in 1/GeV. The covariance covers the
/// first five parameters (z is the free coordinate) as a packed 5x5 lower
/// triangle:
///
/// ```text
///              (  0  .  .  .  . )
///              (  1  2  .  .  . )
/// cov matrix = (  3  4  5  .  . )
///              (  6  7  8  9  . )
///              ( 10 11 12 13 14 )
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrackState {
    /// x, y, dx/dz, dy/dz, q/p, z
    pub params: [f64; 6],
    /// Packed lower-triangular 5x5 covariance over (x, y, dx/dz, dy/dz, q/p)
    pub cov: [f64; 15],
    /// Mass hypothesis in GeV
    pub mass: f64,
    /// Signed charge in units of e
    pub charge: i32,
    /// Chi-squared of the track fit
    pub chi2: f64,
    /// Degrees of freedom of the track fit
    pub ndf: i32,
}

impl TrackState {
    /// Packed index into the 5x5 covariance, symmetric in (i, j).
    #[inline]
    pub(crate) fn cov_at(&self, i: usize, j: usize) -> f64 {
        let idx = if j <= i {
            i * (i + 1) / 2 + j
        } else {
            j * (j + 1) / 2 + i
        };
        self.cov[idx]
    }
}
