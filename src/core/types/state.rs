//! The particle state vector and its derived quantities.
//!
//! # State Representation
//!
//! - Parameters: {x, y, z, px, py, pz, E, S} with S = decay length / |p|
//! - Covariance: 8x8 symmetric, packed lower-triangular ([`SymCov`])
//! - Metadata: charge, chi2/NDF, linearization point, mass bookkeeping
//!
//! Derived quantities (momentum, mass, decay length, ...) come with a
//! first-order propagated uncertainty, sigma^2 = grad f * C * grad f'.
//! A degenerate request (denominator below the 1e-4 floor, or a
//! non-positive propagated variance) yields a sentinel sigma and a cleared
//! validity flag instead of an error; the `*_value` convenience forms turn
//! that flag into a [`StateError`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::sym::SymCov;
use super::track::TrackState;

/// Errors from derived-quantity accessors.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    /// The propagated variance was not positive or a denominator was
    /// below its floor.
    #[error("degenerate {0}: propagated uncertainty is not defined")]
    Degenerate(&'static str),
}

/// A derived quantity with its propagated 1-sigma uncertainty.
///
/// When `valid` is false the value is still the best available estimate
/// (possibly a documented sentinel, e.g. -sqrt(p^2 - E^2) for an unphysical
/// mass) and `sigma` holds a large sentinel uncertainty.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Measured {
    pub value: f64,
    pub sigma: f64,
    pub valid: bool,
}

impl Measured {
    #[inline]
    fn ok(value: f64, sigma: f64) -> Self {
        Self {
            value,
            sigma,
            valid: true,
        }
    }

    #[inline]
    fn degenerate(value: f64, sigma: f64) -> Self {
        Self {
            value,
            sigma,
            valid: false,
        }
    }
}

/// An 8-parameter particle state with covariance and fit metadata.
///
/// Created from a track fit ([`ParticleState::from_track`]), from Cartesian
/// parameters ([`ParticleState::from_cartesian`]), or by folding daughters
/// into a composite through [`crate::fit::Vertexer`]. NDF starts at -3 for
/// an empty composite; each daughter adds 2, each scalar constraint adds 1.
#[derive(Debug, Clone, PartialEq)]
pub struct ParticleState {
    /// {x, y, z, px, py, pz, E, S}
    pub(crate) par: [f64; 8],
    pub(crate) cov: SymCov,
    pub(crate) charge: i32,
    pub(crate) ndf: i32,
    pub(crate) chi2: f64,
    /// Path-length parameter traveled from the decay vertex.
    pub(crate) s_from_decay: f64,
    /// Errors along the trajectory refer to the production vertex.
    pub(crate) at_production_vertex: bool,
    /// Decay-vertex guess used to linearize the Kalman update.
    pub(crate) vtx_guess: [f64; 3],
    pub(crate) linearized: bool,
    /// Mass hypothesis; -1.0 means unconstrained.
    pub(crate) mass_hypo: f64,
    pub(crate) sum_daughter_mass: f64,
    pub(crate) id: i32,
    pub(crate) daughter_ids: Vec<i32>,
    pub(crate) pdg: i32,
}

impl Default for ParticleState {
    fn default() -> Self {
        Self::new()
    }
}

impl ParticleState {
    /// Empty composite, ready to receive daughters.
    pub fn new() -> Self {
        Self {
            par: [0.0; 8],
            cov: SymCov::zero(),
            charge: 0,
            ndf: -3,
            chi2: 0.0,
            s_from_decay: 0.0,
            at_production_vertex: false,
            vtx_guess: [0.0; 3],
            linearized: false,
            mass_hypo: -1.0,
            sum_daughter_mass: 0.0,
            id: -1,
            daughter_ids: Vec::new(),
            pdg: 0,
        }
    }

    /// Build from Cartesian position + momentum and a mass hypothesis.
    ///
    /// `cov` is the packed lower-triangular 6x6 covariance over
    /// (x, y, z, px, py, pz). The energy row is filled by linearizing
    /// E = sqrt(m^2 + p^2); the S row is zeroed with unit S variance.
    pub fn from_cartesian(params: [f64; 6], cov: [f64; 21], charge: i32, mass: f64) -> Self {
        let mut s = Self::new();
        s.par[..6].copy_from_slice(&params);

        // The packed 6x6 block occupies the first 21 slots of the packed 8x8.
        let mut packed = [0.0; 36];
        packed[..21].copy_from_slice(&cov);
        let mut c = SymCov::from_packed(packed);

        let p2 = params[3] * params[3] + params[4] * params[4] + params[5] * params[5];
        let energy = (mass * mass + p2).sqrt();
        s.par[6] = energy;
        s.par[7] = 0.0;
        s.charge = charge;
        s.ndf = 0;
        s.chi2 = 0.0;

        // dE/dp = p/E
        let e_inv = 1.0 / energy;
        let h = [
            params[3] * e_inv,
            params[4] * e_inv,
            params[5] * e_inv,
        ];
        for j in 0..6 {
            let mut sum = 0.0;
            for (k, hk) in h.iter().enumerate() {
                sum += hk * c.at(3 + k, j);
            }
            c.set(6, j, sum);
        }
        let mut e_var = 0.0;
        for (k, hk) in h.iter().enumerate() {
            for (l, hl) in h.iter().enumerate() {
                e_var += hk * hl * c.at(3 + k, 3 + l);
            }
        }
        c.set(6, 6, e_var);
        c.set(7, 7, 1.0);
        s.cov = c;

        s.sum_daughter_mass = mass;
        s.mass_hypo = mass;
        s
    }

    /// Convert a fitted track from the (x, y, dx/dz, dy/dz, q/p, z)
    /// parameterization into a Cartesian particle state.
    ///
    /// The Jacobian is applied explicitly: with a = dx/dz, b = dy/dz and
    /// pz = 1/(|q/p| sqrt(1 + a^2 + b^2)), the slope covariances map into
    /// momentum covariances through H = d(pz)/d(a, b, q/p).
    pub fn from_track(tr: &TrackState) -> Result<Self, StateError> {
        let a = tr.params[2];
        let b = tr.params[3];
        let qp = tr.params[4];
        if qp.abs() < 1.0e-10 {
            return Err(StateError::Degenerate("curvature"));
        }

        let c2 = 1.0 / (1.0 + a * a + b * b);
        let pq = 1.0 / qp;
        let p2 = pq * pq;
        let pz = (p2 * c2).sqrt();
        let px = a * pz;
        let py = b * pz;
        let h = [-px * c2, -py * c2, -pz * pq];

        let v = |i: usize, j: usize| tr.cov_at(i, j);
        let cxpz = h[0] * v(2, 0) + h[1] * v(3, 0) + h[2] * v(4, 0);
        let cypz = h[0] * v(2, 1) + h[1] * v(3, 1) + h[2] * v(4, 1);
        let capz = h[0] * v(2, 2) + h[1] * v(3, 2) + h[2] * v(4, 2);
        let cbpz = h[0] * v(3, 2) + h[1] * v(3, 3) + h[2] * v(4, 3);
        let cpzpz = h[0] * h[0] * v(2, 2)
            + h[1] * h[1] * v(3, 3)
            + h[2] * h[2] * v(4, 4)
            + 2.0 * (h[0] * h[1] * v(3, 2) + h[0] * h[2] * v(4, 2) + h[1] * h[2] * v(4, 3));

        let params = [tr.params[0], tr.params[1], tr.params[5], px, py, pz];
        let cov = [
            v(0, 0),
            v(1, 0),
            v(1, 1),
            0.0,
            0.0,
            0.0,
            v(2, 0) * pz + a * cxpz,
            v(2, 1) * pz + a * cypz,
            0.0,
            v(2, 2) * pz * pz + 2.0 * a * pz * capz + a * a * cpzpz,
            v(3, 0) * pz + b * cxpz,
            v(3, 1) * pz + b * cypz,
            0.0,
            v(3, 2) * pz * pz + a * pz * cbpz + b * pz * capz + a * b * cpzpz,
            v(3, 3) * pz * pz + 2.0 * b * pz * cbpz + b * b * cpzpz,
            cxpz,
            cypz,
            0.0,
            capz * pz + a * cpzpz,
            cbpz * pz + b * cpzpz,
            cpzpz,
        ];

        Ok(Self::from_cartesian(params, cov, tr.charge, tr.mass))
    }

    // Simple accessors

    #[inline]
    pub fn x(&self) -> f64 {
        self.par[0]
    }

    #[inline]
    pub fn y(&self) -> f64 {
        self.par[1]
    }

    #[inline]
    pub fn z(&self) -> f64 {
        self.par[2]
    }

    #[inline]
    pub fn px(&self) -> f64 {
        self.par[3]
    }

    #[inline]
    pub fn py(&self) -> f64 {
        self.par[4]
    }

    #[inline]
    pub fn pz(&self) -> f64 {
        self.par[5]
    }

    #[inline]
    pub fn energy(&self) -> f64 {
        self.par[6]
    }

    /// Decay-length parameter S = decay length / |p|.
    #[inline]
    pub fn s(&self) -> f64 {
        self.par[7]
    }

    #[inline]
    pub fn position(&self) -> [f64; 3] {
        [self.par[0], self.par[1], self.par[2]]
    }

    #[inline]
    pub fn momentum_vec(&self) -> [f64; 3] {
        [self.par[3], self.par[4], self.par[5]]
    }

    #[inline]
    pub fn parameters(&self) -> &[f64; 8] {
        &self.par
    }

    #[inline]
    pub fn covariance(&self) -> &SymCov {
        &self.cov
    }

    #[inline]
    pub fn charge(&self) -> i32 {
        self.charge
    }

    #[inline]
    pub fn chi2(&self) -> f64 {
        self.chi2
    }

    #[inline]
    pub fn ndf(&self) -> i32 {
        self.ndf
    }

    #[inline]
    pub fn mass_hypothesis(&self) -> f64 {
        self.mass_hypo
    }

    #[inline]
    pub fn at_production_vertex(&self) -> bool {
        self.at_production_vertex
    }

    #[inline]
    pub fn id(&self) -> i32 {
        self.id
    }

    pub fn set_id(&mut self, id: i32) {
        self.id = id;
    }

    #[inline]
    pub fn pdg(&self) -> i32 {
        self.pdg
    }

    pub fn set_pdg(&mut self, pdg: i32) {
        self.pdg = pdg;
    }

    /// Ids of the daughters this composite was built from.
    pub fn daughter_ids(&self) -> &[i32] {
        &self.daughter_ids
    }

    // Derived quantities with propagated uncertainties

    /// Momentum magnitude.
    pub fn momentum(&self) -> Measured {
        let [x, y, z] = self.momentum_vec();
        let p2 = x * x + y * y + z * z;
        let p = p2.sqrt();
        let c = &self.cov;
        let var = x * x * c.at(3, 3)
            + y * y * c.at(4, 4)
            + z * z * c.at(5, 5)
            + 2.0 * (x * y * c.at(4, 3) + x * z * c.at(5, 3) + y * z * c.at(5, 4));
        if var > 1.0e-16 && p > 1.0e-4 {
            Measured::ok(p, var.sqrt() / p)
        } else {
            Measured::degenerate(p, 1.0e8)
        }
    }

    /// Transverse momentum.
    pub fn pt(&self) -> Measured {
        let px = self.par[3];
        let py = self.par[4];
        let pt = (px * px + py * py).sqrt();
        let c = &self.cov;
        let var = px * px * c.at(3, 3) + py * py * c.at(4, 4) + 2.0 * px * py * c.at(4, 3);
        if var > 0.0 && pt > 1.0e-4 {
            Measured::ok(pt, var.sqrt() / pt)
        } else {
            Measured::degenerate(pt, 1.0e10)
        }
    }

    /// Azimuthal angle of the momentum.
    pub fn phi(&self) -> Measured {
        let px = self.par[3];
        let py = self.par[4];
        let pt2 = px * px + py * py;
        let phi = py.atan2(px);
        let c = &self.cov;
        let var = py * py * c.at(3, 3) + px * px * c.at(4, 4) - 2.0 * px * py * c.at(4, 3);
        if var > 0.0 && pt2 > 1.0e-4 {
            Measured::ok(phi, var.sqrt() / pt2)
        } else {
            Measured::degenerate(phi, 1.0e10)
        }
    }

    /// Transverse distance to the origin.
    pub fn r(&self) -> Measured {
        let x = self.par[0];
        let y = self.par[1];
        let r = (x * x + y * y).sqrt();
        let c = &self.cov;
        let var = x * x * c.at(0, 0) + y * y * c.at(1, 1) - 2.0 * x * y * c.at(1, 0);
        if var > 0.0 && r > 1.0e-4 {
            Measured::ok(r, var.sqrt() / r)
        } else {
            Measured::degenerate(r, 1.0e10)
        }
    }

    /// Invariant mass.
    ///
    /// An unphysical E^2 < p^2 state yields value = -sqrt(p^2 - E^2) with
    /// the sentinel uncertainty and a cleared validity flag.
    pub fn mass(&self) -> Measured {
        let [px, py, pz] = self.momentum_vec();
        let e = self.par[6];
        let c = &self.cov;
        // variance of m^2 / 2
        let s = px * px * c.at(3, 3)
            + py * py * c.at(4, 4)
            + pz * pz * c.at(5, 5)
            + e * e * c.at(6, 6)
            + 2.0
                * (px * py * c.at(4, 3) + pz * (px * c.at(5, 3) + py * c.at(5, 4))
                    - e * (px * c.at(6, 3) + py * c.at(6, 4) + pz * c.at(6, 5)));

        let m2 = e * e - px * px - py * py - pz * pz;
        if m2 < 0.0 {
            return Measured::degenerate(-(-m2).sqrt(), 1.0e20);
        }
        let m = m2.sqrt();
        if m > 1.0e-6 {
            if s >= 0.0 {
                return Measured::ok(m, s.sqrt() / m);
            }
        } else {
            // mass compatible with zero, no relative error defined
            return Measured::ok(m, 1.0e20);
        }
        Measured::degenerate(m, 1.0e20)
    }

    /// Decay length.
    pub fn decay_length(&self) -> Measured {
        let [x, y, z] = self.momentum_vec();
        let t = self.par[7];
        let p2 = x * x + y * y + z * z;
        let l = t * p2.sqrt();
        let c = &self.cov;
        if p2 > 1.0e-4 {
            let var = p2 * c.at(7, 7)
                + t * t / p2
                    * (x * x * c.at(3, 3)
                        + y * y * c.at(4, 4)
                        + z * z * c.at(5, 5)
                        + 2.0 * (x * y * c.at(4, 3) + x * z * c.at(5, 3) + y * z * c.at(5, 4)))
                + 2.0 * t * (x * c.at(7, 3) + y * c.at(7, 4) + z * c.at(7, 5));
            Measured::ok(l, var.abs().sqrt())
        } else {
            Measured::degenerate(l, 1.0e20)
        }
    }

    /// Decay length projected on the transverse plane.
    pub fn decay_length_xy(&self) -> Measured {
        let x = self.par[3];
        let y = self.par[4];
        let t = self.par[7];
        let pt2 = x * x + y * y;
        let l = t * pt2.sqrt();
        let c = &self.cov;
        if pt2 > 1.0e-4 {
            let var = pt2 * c.at(7, 7)
                + t * t / pt2 * (x * x * c.at(3, 3) + y * y * c.at(4, 4) + 2.0 * x * y * c.at(4, 3))
                + 2.0 * t * (x * c.at(7, 3) + y * c.at(7, 4));
            Measured::ok(l, var.abs().sqrt())
        } else {
            Measured::degenerate(l, 1.0e20)
        }
    }

    /// Proper lifetime times c, in cm.
    pub fn lifetime(&self) -> Measured {
        let m = self.mass();
        let [px, py, pz] = self.momentum_vec();
        let e = self.par[6];
        let t = self.par[7];
        let c = &self.cov;
        let ctm = -px * c.at(7, 3) - py * c.at(7, 4) - pz * c.at(7, 5) + e * c.at(7, 6);
        let tau = t * m.value;
        let var = m.value * m.value * c.at(7, 7) + 2.0 * t * ctm + t * t * m.sigma * m.sigma;
        if var > 0.0 {
            Measured::ok(tau, var.sqrt())
        } else {
            Measured::degenerate(tau, 1.0e20)
        }
    }

    // Plain-value convenience forms

    pub fn momentum_value(&self) -> Result<f64, StateError> {
        Self::checked(self.momentum(), "momentum")
    }

    pub fn pt_value(&self) -> Result<f64, StateError> {
        Self::checked(self.pt(), "pt")
    }

    pub fn phi_value(&self) -> Result<f64, StateError> {
        Self::checked(self.phi(), "phi")
    }

    pub fn r_value(&self) -> Result<f64, StateError> {
        Self::checked(self.r(), "r")
    }

    pub fn mass_value(&self) -> Result<f64, StateError> {
        Self::checked(self.mass(), "mass")
    }

    pub fn decay_length_value(&self) -> Result<f64, StateError> {
        Self::checked(self.decay_length(), "decay length")
    }

    pub fn decay_length_xy_value(&self) -> Result<f64, StateError> {
        Self::checked(self.decay_length_xy(), "decay length xy")
    }

    pub fn lifetime_value(&self) -> Result<f64, StateError> {
        Self::checked(self.lifetime(), "lifetime")
    }

    #[inline]
    fn checked(m: Measured, what: &'static str) -> Result<f64, StateError> {
        if m.valid {
            Ok(m.value)
        } else {
            Err(StateError::Degenerate(what))
        }
    }
}
