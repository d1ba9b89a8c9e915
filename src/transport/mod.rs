//! Trajectory propagation by the path-length parameter S.
//!
//! Transport is pure: it maps a state to new parameters and covariance
//! without touching the input. Neutral particles move on straight lines
//! with a closed-form shear update; charged particles follow a controlled
//! Taylor model of the field integrals along the step, exact for a uniform
//! field and a small bounded approximation for slowly varying fields over
//! the short segments that matter near a vertex.

pub mod path;

use crate::core::types::{ParticleState, SymCov};
use crate::field::{FieldProvider, CLIGHT};

/// Propagate by `ds`, dispatching on charge.
pub fn transport<F: FieldProvider>(
    state: &ParticleState,
    ds: f64,
    field: &F,
) -> ([f64; 8], SymCov) {
    if state.charge == 0 {
        transport_line(state, ds)
    } else {
        transport_field(state, ds, field)
    }
}

/// Straight-line propagation.
///
/// The Jacobian is a shear (position picks up ds * momentum), so the
/// covariance is updated by direct symmetric algebra instead of a generic
/// congruence product.
pub fn transport_line(state: &ParticleState, ds: f64) -> ([f64; 8], SymCov) {
    let p = &state.par;
    let par = [
        p[0] + ds * p[3],
        p[1] + ds * p[4],
        p[2] + ds * p[5],
        p[3],
        p[4],
        p[5],
        p[6],
        p[7],
    ];

    let c = &state.cov;
    let mut o = SymCov::zero();

    let c30 = c.at(3, 0) + ds * c.at(3, 3);
    let c41 = c.at(4, 1) + ds * c.at(4, 4);
    let c52 = c.at(5, 2) + ds * c.at(5, 5);
    let sc43 = ds * c.at(4, 3);
    let sc53 = ds * c.at(5, 3);
    let sc54 = ds * c.at(5, 4);

    o.set(0, 0, c.at(0, 0) + ds * (c.at(3, 0) + c30));
    o.set(1, 1, c.at(1, 1) + ds * (c.at(4, 1) + c41));
    o.set(2, 2, c.at(2, 2) + ds * (c.at(5, 2) + c52));
    o.set(3, 1, c.at(3, 1) + sc43);
    o.set(3, 2, c.at(3, 2) + sc53);
    o.set(4, 2, c.at(4, 2) + sc54);
    o.set(1, 0, c.at(1, 0) + ds * (c.at(4, 0) + o.at(3, 1)));
    o.set(2, 0, c.at(2, 0) + ds * (c.at(5, 0) + o.at(3, 2)));
    o.set(2, 1, c.at(2, 1) + ds * (c.at(5, 1) + o.at(4, 2)));
    o.set(3, 0, c30);
    o.set(3, 3, c.at(3, 3));
    o.set(4, 0, c.at(4, 0) + sc43);
    o.set(4, 1, c41);
    o.set(4, 3, c.at(4, 3));
    o.set(4, 4, c.at(4, 4));
    o.set(5, 0, c.at(5, 0) + sc53);
    o.set(5, 1, c.at(5, 1) + sc54);
    o.set(5, 2, c52);
    o.set(5, 3, c.at(5, 3));
    o.set(5, 4, c.at(5, 4));
    o.set(5, 5, c.at(5, 5));
    o.set(6, 0, c.at(6, 0) + ds * c.at(6, 3));
    o.set(6, 1, c.at(6, 1) + ds * c.at(6, 4));
    o.set(6, 2, c.at(6, 2) + ds * c.at(6, 5));
    o.set(6, 3, c.at(6, 3));
    o.set(6, 4, c.at(6, 4));
    o.set(6, 5, c.at(6, 5));
    o.set(6, 6, c.at(6, 6));
    o.set(7, 0, c.at(7, 0) + ds * c.at(7, 3));
    o.set(7, 1, c.at(7, 1) + ds * c.at(7, 4));
    o.set(7, 2, c.at(7, 2) + ds * c.at(7, 5));
    o.set(7, 3, c.at(7, 3));
    o.set(7, 4, c.at(7, 4));
    o.set(7, 5, c.at(7, 5));
    o.set(7, 6, c.at(7, 6));
    o.set(7, 7, c.at(7, 7));

    (par, o)
}

/// Field-integrated propagation for a charged particle.
///
/// The field along the segment is sampled at start, midpoint and end; the
/// samples combine into closed-form polynomial path-integral coefficients
/// (first and second order, plus the higher-order terms coupling the
/// bending coordinate to the others) that populate an 8x8 linear transport
/// Jacobian. The midpoint and endpoint are re-sampled once on the bent
/// trajectory before the final integrals.
pub fn transport_field<F: FieldProvider>(
    state: &ParticleState,
    ds: f64,
    field: &F,
) -> ([f64; 8], SymCov) {
    if state.charge == 0 {
        return transport_line(state, ds);
    }

    let c = state.charge as f64 * CLIGHT;
    let px = state.par[3];
    let py = state.par[4];
    let pz = state.par[5];

    // Field integrals along the segment.
    let p0 = state.position();
    let mut p2 = [p0[0] + px * ds, p0[1] + py * ds, p0[2] + pz * ds];
    let mut p1 = [
        0.5 * (p0[0] + p2[0]),
        0.5 * (p0[1] + p2[1]),
        0.5 * (p0[2] + p2[2]),
    ];

    // First-order correction: bend the sample points by the y-field
    // integral of the straight segment.
    {
        let f0 = field.field(&p0);
        let f1 = field.field(&p1);
        let f2 = field.field(&p2);
        let ssy1 = (7.0 * f0[1] + 6.0 * f1[1] - f2[1]) * c * ds * ds / 96.0;
        let ssy2 = (f0[1] + 2.0 * f1[1]) * c * ds * ds / 6.0;
        p1[0] -= ssy1 * pz;
        p1[2] += ssy1 * px;
        p2[0] -= ssy2 * pz;
        p2[2] += ssy2 * px;
    }

    let fld = [field.field(&p0), field.field(&p1), field.field(&p2)];

    let sx = c * (fld[0][0] + 4.0 * fld[1][0] + fld[2][0]) * ds / 6.0;
    let sy = c * (fld[0][1] + 4.0 * fld[1][1] + fld[2][1]) * ds / 6.0;
    let sz = c * (fld[0][2] + 4.0 * fld[1][2] + fld[2][2]) * ds / 6.0;

    let ssx = c * (fld[0][0] + 2.0 * fld[1][0]) * ds * ds / 6.0;
    let ssy = c * (fld[0][1] + 2.0 * fld[1][1]) * ds * ds / 6.0;
    let ssz = c * (fld[0][2] + 2.0 * fld[1][2]) * ds * ds / 6.0;

    // Cross-coupling integrals of By with Bz, with their integration
    // stencils (/360 and /2520).
    const C2: [[f64; 3]; 3] = [[5.0, -4.0, -1.0], [44.0, 80.0, -4.0], [11.0, 44.0, 5.0]];
    const CC2: [[f64; 3]; 3] = [[38.0, 8.0, -4.0], [148.0, 208.0, -20.0], [3.0, 36.0, 3.0]];
    let mut syz = 0.0;
    let mut ssyz = 0.0;
    for n in 0..3 {
        for m in 0..3 {
            syz += C2[n][m] * fld[n][1] * fld[m][2];
            ssyz += CC2[n][m] * fld[n][1] * fld[m][2];
        }
    }
    syz *= c * c * ds * ds / 360.0;
    ssyz *= c * c * ds * ds * ds / 2520.0;

    let mut syy = c * (fld[0][1] + 4.0 * fld[1][1] + fld[2][1]) * ds;
    let syyy = syy * syy * syy / 1296.0;
    syy = syy * syy / 72.0;

    let ssyy = (fld[0][1] * (38.0 * fld[0][1] + 156.0 * fld[1][1] - fld[2][1])
        + fld[1][1] * (208.0 * fld[1][1] + 16.0 * fld[2][1])
        + fld[2][1] * (3.0 * fld[2][1]))
        * ds
        * ds
        * ds
        * c
        * c
        / 2520.0;
    let ssyyy = (fld[0][1]
        * (fld[0][1] * (85.0 * fld[0][1] + 526.0 * fld[1][1] - 7.0 * fld[2][1])
            + fld[1][1] * (1376.0 * fld[1][1] + 84.0 * fld[2][1])
            + fld[2][1] * (19.0 * fld[2][1]))
        + fld[1][1]
            * (fld[1][1] * (1376.0 * fld[1][1] + 256.0 * fld[2][1])
                + fld[2][1] * (62.0 * fld[2][1]))
        + fld[2][1] * fld[2][1] * (3.0 * fld[2][1]))
        * ds
        * ds
        * ds
        * ds
        * c
        * c
        * c
        / 90720.0;

    let mut j = [[0.0; 8]; 8];
    j[0][0] = 1.0;
    j[0][3] = ds - ssyy;
    j[0][4] = ssx;
    j[0][5] = ssyyy - ssy;
    j[1][1] = 1.0;
    j[1][3] = -ssz;
    j[1][4] = ds;
    j[1][5] = ssx + ssyz;
    j[2][2] = 1.0;
    j[2][3] = ssy - ssyyy;
    j[2][4] = -ssx;
    j[2][5] = ds - ssyy;
    j[3][3] = 1.0 - syy;
    j[3][4] = sx;
    j[3][5] = syyy - sy;
    j[4][3] = -sz;
    j[4][4] = 1.0;
    j[4][5] = sx + syz;
    j[5][3] = sy - syyy;
    j[5][4] = -sx;
    j[5][5] = 1.0 - syy;
    j[6][6] = 1.0;
    j[7][7] = 1.0;

    let par = [
        state.par[0] + j[0][3] * px + j[0][4] * py + j[0][5] * pz,
        state.par[1] + j[1][3] * px + j[1][4] * py + j[1][5] * pz,
        state.par[2] + j[2][3] * px + j[2][4] * py + j[2][5] * pz,
        j[3][3] * px + j[3][4] * py + j[3][5] * pz,
        j[4][3] * px + j[4][4] * py + j[4][5] * pz,
        j[5][3] * px + j[5][4] * py + j[5][5] * pz,
        state.par[6],
        state.par[7],
    ];

    (par, state.cov.congruence(&j))
}

impl ParticleState {
    /// Transport this particle in place by the path-length parameter `ds`,
    /// accumulating the distance traveled from the decay vertex.
    pub fn transport_to_ds<F: FieldProvider>(&mut self, ds: f64, field: &F) {
        let (par, cov) = transport(self, ds, field);
        self.par = par;
        self.cov = cov;
        self.s_from_decay += ds;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::{UniformField, ZeroField};
    use approx::assert_relative_eq;

    fn neutral(pos: [f64; 3], mom: [f64; 3]) -> ParticleState {
        let mut cov = [0.0; 21];
        cov[0] = 1.0e-4;
        cov[2] = 1.0e-4;
        cov[5] = 1.0e-4;
        cov[9] = 1.0e-4;
        cov[14] = 1.0e-4;
        cov[20] = 1.0e-4;
        cov[6] = 2.0e-5; // x-px correlation, exercises the shear
        ParticleState::from_cartesian(
            [pos[0], pos[1], pos[2], mom[0], mom[1], mom[2]],
            cov,
            0,
            0.497,
        )
    }

    fn charged(pos: [f64; 3], mom: [f64; 3], q: i32) -> ParticleState {
        let mut cov = [0.0; 21];
        cov[0] = 1.0e-4;
        cov[2] = 1.0e-4;
        cov[5] = 1.0e-4;
        cov[9] = 1.0e-4;
        cov[14] = 1.0e-4;
        cov[20] = 1.0e-4;
        ParticleState::from_cartesian(
            [pos[0], pos[1], pos[2], mom[0], mom[1], mom[2]],
            cov,
            q,
            0.13957,
        )
    }

    #[test]
    fn test_line_transport_moves_position() {
        let p = neutral([1.0, 2.0, 3.0], [0.5, -0.5, 1.0]);
        let (par, _) = transport_line(&p, 2.0);
        assert_relative_eq!(par[0], 2.0);
        assert_relative_eq!(par[1], 1.0);
        assert_relative_eq!(par[2], 5.0);
        // momentum, energy, S untouched
        assert_relative_eq!(par[3], 0.5);
        assert_relative_eq!(par[6], p.energy());
    }

    #[test]
    fn test_line_transport_composes() {
        let p = neutral([0.1, -0.2, 0.0], [0.5, 0.0, 1.0]);
        for (ds1, ds2) in [(0.1, 0.9), (1.0, -0.4), (10.0, 3.5)] {
            let (par_a, cov_a) = transport_line(&p, ds1 + ds2);
            let mut q = p.clone();
            let (par1, cov1) = transport_line(&q, ds2);
            q.par = par1;
            q.cov = cov1;
            let (par_b, cov_b) = transport_line(&q, ds1);
            for i in 0..8 {
                assert_relative_eq!(par_a[i], par_b[i], epsilon = 1e-12);
            }
            for i in 0..8 {
                for j in 0..=i {
                    assert_relative_eq!(cov_a.at(i, j), cov_b.at(i, j), epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_field_zero_equivalence() {
        let p = charged([0.3, 0.1, -0.5], [0.2, 0.1, 1.5], 1);
        for ds in [0.1, 1.0, 10.0] {
            let (par_f, cov_f) = transport_field(&p, ds, &ZeroField);
            let (par_l, cov_l) = transport_line(&p, ds);
            for i in 0..8 {
                assert_relative_eq!(par_f[i], par_l[i], epsilon = 1e-12);
            }
            for i in 0..8 {
                for j in 0..=i {
                    assert_relative_eq!(cov_f.at(i, j), cov_l.at(i, j), epsilon = 1e-12);
                }
            }
        }
    }

    #[test]
    fn test_neutral_ignores_field() {
        let p = neutral([0.0, 0.0, 0.0], [0.5, 0.0, 1.0]);
        let field = UniformField::new(0.0, -5.0, 0.0);
        let (par_f, _) = transport(&p, 2.0, &field);
        let (par_l, _) = transport_line(&p, 2.0);
        for i in 0..8 {
            assert_relative_eq!(par_f[i], par_l[i]);
        }
    }

    #[test]
    fn test_uniform_field_preserves_momentum_magnitude() {
        // Bending is a rotation; |p| must be conserved to the order of the
        // Taylor model.
        let p = charged([0.0, 0.0, 0.0], [0.3, 0.05, 1.2], 1);
        let field = UniformField::new(0.0, -5.0, 0.0);
        let p_in = (0.3f64 * 0.3 + 0.05 * 0.05 + 1.2 * 1.2).sqrt();
        let (par, _) = transport_field(&p, 1.0, &field);
        let p_out = (par[3] * par[3] + par[4] * par[4] + par[5] * par[5]).sqrt();
        assert_relative_eq!(p_in, p_out, epsilon = 1e-6);
    }

    #[test]
    fn test_uniform_field_bends_in_xz() {
        // Field along -y bends the trajectory in the x-z plane and leaves
        // py untouched.
        let p = charged([0.0, 0.0, 0.0], [0.0, 0.1, 1.0], 1);
        let field = UniformField::new(0.0, -5.0, 0.0);
        let (par, _) = transport_field(&p, 5.0, &field);
        assert_relative_eq!(par[4], 0.1, epsilon = 1e-9);
        assert!(par[3].abs() > 1.0e-4, "px should pick up bending");
    }

    #[test]
    fn test_transport_to_ds_accumulates() {
        let mut p = neutral([0.0, 0.0, 0.0], [0.5, 0.0, 1.0]);
        p.transport_to_ds(1.5, &ZeroField);
        p.transport_to_ds(-0.5, &ZeroField);
        assert_relative_eq!(p.s_from_decay, 1.0);
        assert_relative_eq!(p.x(), 0.5);
    }

    #[test]
    fn test_zero_ds_is_identity() {
        let p = charged([1.0, 2.0, 3.0], [0.3, 0.2, 0.9], -1);
        let field = UniformField::new(0.0, -5.0, 0.0);
        let (par, cov) = transport_field(&p, 0.0, &field);
        for i in 0..8 {
            assert_relative_eq!(par[i], p.par[i], epsilon = 1e-15);
        }
        for i in 0..8 {
            for j in 0..=i {
                assert_relative_eq!(cov.at(i, j), p.cov.at(i, j), epsilon = 1e-15);
            }
        }
    }
}
