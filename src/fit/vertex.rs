//! Decay-length and production-vertex bookkeeping.
//!
//! The S parameter ties the fitted decay point to the production point. The
//! routines here move the particle between those two reference points,
//! re-express the S uncertainty as position/momentum uncertainty at the
//! chosen point, and fold an externally fitted production vertex into the
//! particle state.

use log::debug;

use crate::core::types::{ParticleState, Sym3};
use crate::field::{FieldProvider, CLIGHT};
use crate::fit::{VertexConstraint, Vertexer};
use crate::transport::path::ds_to_point;

impl<F: FieldProvider> Vertexer<'_, F> {
    /// Fold the S-parameter uncertainty into the position and momentum
    /// covariance at the current reference point.
    ///
    /// The trajectory derivative h = dr/dS is the momentum (negated toward
    /// the production side) and dp/dS = q B x p; the update is a rank-one
    /// congruence with the S row, applied in place along the triangle.
    pub fn convert(&self, state: &mut ParticleState, to_production: bool) {
        let fld = self.field().field(&state.position());
        let qc = state.charge as f64 * CLIGHT;

        let mut h = [0.0; 6];
        h[0] = state.par[3];
        h[1] = state.par[4];
        h[2] = state.par[5];
        if to_production {
            h[0] = -h[0];
            h[1] = -h[1];
            h[2] = -h[2];
        }
        h[3] = (h[1] * fld[2] - h[2] * fld[1]) * qc;
        h[4] = (h[2] * fld[0] - h[0] * fld[2]) * qc;
        h[5] = (h[0] * fld[1] - h[1] * fld[0]) * qc;

        let c = &mut state.cov;
        let s_var = c.at(7, 7);

        let mut t = c.at(7, 0) + h[0] * s_var;
        c.add(0, 0, h[0] * (t + c.at(7, 0)));
        c.set(7, 0, t);

        c.add(1, 0, h[1] * c.at(7, 0) + h[0] * c.at(7, 1));
        t = c.at(7, 1) + h[1] * s_var;
        c.add(1, 1, h[1] * (t + c.at(7, 1)));
        c.set(7, 1, t);

        c.add(2, 0, h[2] * c.at(7, 0) + h[0] * c.at(7, 2));
        c.add(2, 1, h[2] * c.at(7, 1) + h[1] * c.at(7, 2));
        t = c.at(7, 2) + h[2] * s_var;
        c.add(2, 2, h[2] * (t + c.at(7, 2)));
        c.set(7, 2, t);

        c.add(3, 0, h[3] * c.at(7, 0) + h[0] * c.at(7, 3));
        c.add(3, 1, h[3] * c.at(7, 1) + h[1] * c.at(7, 3));
        c.add(3, 2, h[3] * c.at(7, 2) + h[2] * c.at(7, 3));
        t = c.at(7, 3) + h[3] * s_var;
        c.add(3, 3, h[3] * (t + c.at(7, 3)));
        c.set(7, 3, t);

        c.add(4, 0, h[4] * c.at(7, 0) + h[0] * c.at(7, 4));
        c.add(4, 1, h[4] * c.at(7, 1) + h[1] * c.at(7, 4));
        c.add(4, 2, h[4] * c.at(7, 2) + h[2] * c.at(7, 4));
        c.add(4, 3, h[4] * c.at(7, 3) + h[3] * c.at(7, 4));
        t = c.at(7, 4) + h[4] * s_var;
        c.add(4, 4, h[4] * (t + c.at(7, 4)));
        c.set(7, 4, t);

        c.add(5, 0, h[5] * c.at(7, 0) + h[0] * c.at(7, 5));
        c.add(5, 1, h[5] * c.at(7, 1) + h[1] * c.at(7, 5));
        c.add(5, 2, h[5] * c.at(7, 2) + h[2] * c.at(7, 5));
        c.add(5, 3, h[5] * c.at(7, 3) + h[3] * c.at(7, 5));
        c.add(5, 4, h[5] * c.at(7, 4) + h[4] * c.at(7, 5));
        t = c.at(7, 5) + h[5] * s_var;
        c.add(5, 5, h[5] * (t + c.at(7, 5)));
        c.set(7, 5, t);

        let c76 = c.at(7, 6);
        c.add(6, 0, h[0] * c76);
        c.add(6, 1, h[1] * c76);
        c.add(6, 2, h[2] * c76);
        c.add(6, 3, h[3] * c76);
        c.add(6, 4, h[4] * c76);
        c.add(6, 5, h[5] * c76);
    }

    /// Move the particle to its decay vertex (S = 0).
    pub fn transport_to_decay_vertex(&self, state: &mut ParticleState) {
        if state.s_from_decay != 0.0 {
            let ds = -state.s_from_decay;
            state.transport_to_ds(ds, self.field());
        }
        if state.at_production_vertex {
            self.convert(state, false);
        }
        state.at_production_vertex = false;
    }

    /// Move the particle to its production vertex (S = -par[7] from decay).
    pub fn transport_to_production_vertex(&self, state: &mut ParticleState) {
        if state.s_from_decay != -state.par[7] {
            let ds = -state.s_from_decay - state.par[7];
            state.transport_to_ds(ds, self.field());
        }
        if !state.at_production_vertex {
            self.convert(state, true);
        }
        state.at_production_vertex = true;
    }

    /// Attach an externally fitted production vertex to a particle that was
    /// not part of that vertex fit.
    ///
    /// Transports to the closest approach of the vertex, opens the S
    /// variance, then smooths position/momentum/energy/S with the vertex as
    /// a position measurement. The chi-squared increment inverts (C - V);
    /// a vertex not fitted from this particle can make that difference
    /// indefinite, so its absolute value is taken. Two degrees of freedom
    /// are added either way.
    pub fn set_production_vertex(&self, state: &mut ParticleState, vtx: &VertexConstraint) {
        let m = vtx.position;
        let mv = vtx.cov;

        // cov.at(7,7) <= 0 marks a particle with no decay length allowed
        let no_s = state.cov.at(7, 7) <= 0.0;

        if no_s {
            self.transport_to_decay_vertex(state);
            state.par[7] = 0.0;
            for j in 0..8 {
                state.cov.set(7, j, 0.0);
            }
        } else {
            let ds = ds_to_point(state, &m, self.field());
            state.transport_to_ds(ds, self.field());
            state.par[7] = -state.s_from_decay;
            for j in 0..7 {
                state.cov.set(7, j, 0.0);
            }
            state.cov.set(7, 7, 0.1);
            self.convert(state, true);
        }

        let ai = state
            .cov
            .position_block()
            .invert()
            .unwrap_or_else(Sym3::zero);

        // gain rows for momentum, energy and S against the position block
        let mut mb = [[0.0; 3]; 5];
        for (r, row) in mb.iter_mut().enumerate() {
            for (col, slot) in row.iter_mut().enumerate() {
                *slot = state.cov.at(3 + r, 0) * ai.at(0, col)
                    + state.cov.at(3 + r, 1) * ai.at(1, col)
                    + state.cov.at(3 + r, 2) * ai.at(2, col);
            }
        }

        let z = [
            m[0] - state.par[0],
            m[1] - state.par[1],
            m[2] - state.par[2],
        ];

        match state.cov.position_block().sub(&mv).invert() {
            Some(w) => state.chi2 += w.quadratic_form(&z).abs(),
            None => debug!("production-vertex chi2 skipped: smoothing matrix singular"),
        }
        state.ndf += 2;

        state.par[0] = m[0];
        state.par[1] = m[1];
        state.par[2] = m[2];
        for (r, row) in mb.iter().enumerate() {
            state.par[3 + r] += row[0] * z[0] + row[1] * z[1] + row[2] * z[2];
        }

        state.cov.set_position_block(&mv);

        for r in 0..5 {
            let mut d = [0.0; 3];
            for (col, slot) in d.iter_mut().enumerate() {
                *slot = mb[r][0] * mv.at(0, col)
                    + mb[r][1] * mv.at(1, col)
                    + mb[r][2] * mv.at(2, col)
                    - state.cov.at(3 + r, col);
            }
            for (col, dv) in d.iter().enumerate() {
                state.cov.add(3 + r, col, *dv);
            }
            for r2 in 0..=r {
                state.cov.add(
                    3 + r,
                    3 + r2,
                    d[0] * mb[r2][0] + d[1] * mb[r2][1] + d[2] * mb[r2][2],
                );
            }
        }

        if no_s {
            state.par[7] = 0.0;
            for j in 0..8 {
                state.cov.set(7, j, 0.0);
            }
        } else {
            let s = state.par[7];
            state.transport_to_ds(s, self.field());
            self.convert(state, false);
        }

        state.s_from_decay = 0.0;
    }

    /// Constrain a resonance to zero decay length.
    ///
    /// Scalar Kalman update pinning S = 0, then the S row is removed from
    /// the covariance so later updates cannot reopen it.
    pub fn set_no_decay_length(&self, state: &mut ParticleState) {
        self.transport_to_decay_vertex(state);

        let zeta = -state.par[7];
        let s_var = state.cov.at(7, 7);
        if s_var > 1.0e-20 {
            let w = 1.0 / s_var;
            state.chi2 += zeta * zeta * w;
            state.ndf += 1;
            for i in 0..7 {
                let ki = state.cov.at(7, i) * w;
                state.par[i] += ki * zeta;
                for j in 0..=i {
                    state.cov.add(i, j, -(ki * state.cov.at(7, j)));
                }
            }
        }
        state.par[7] = 0.0;
        for j in 0..8 {
            state.cov.set(7, j, 0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SymCov;
    use crate::field::ZeroField;
    use approx::assert_relative_eq;

    fn composite() -> ParticleState {
        let mut cov = [0.0; 21];
        cov[0] = 1.0e-4;
        cov[2] = 1.0e-4;
        cov[5] = 1.0e-4;
        cov[9] = 1.0e-2;
        cov[14] = 1.0e-2;
        cov[20] = 1.0e-2;
        let mut s = ParticleState::from_cartesian(
            [0.1, -0.05, 2.0, 0.2, 0.1, 1.5],
            cov,
            0,
            0.497,
        );
        // give the S parameter a life of its own
        s.cov.set(7, 7, 0.04);
        s
    }

    #[test]
    fn test_convert_moves_s_variance_into_position() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        let mut s = composite();
        let xx_before = s.cov.at(0, 0);
        v.convert(&mut s, false);
        // x variance grows by px^2 * var(S) (plus cross terms, zero here)
        assert_relative_eq!(
            s.cov.at(0, 0),
            xx_before + 0.2 * 0.2 * 0.04,
            epsilon = 1e-12
        );
        assert_relative_eq!(s.cov.at(7, 0), 0.2 * 0.04, epsilon = 1e-12);
    }

    #[test]
    fn test_transport_to_decay_vertex_returns_home() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        let mut s = composite();
        let home = s.position();
        s.transport_to_ds(1.7, &field);
        v.transport_to_decay_vertex(&mut s);
        assert_relative_eq!(s.s_from_decay, 0.0);
        for k in 0..3 {
            assert_relative_eq!(s.position()[k], home[k], epsilon = 1e-12);
        }
    }

    #[test]
    fn test_set_production_vertex_moves_position() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        let mut s = composite();
        let ndf_before = s.ndf();
        let vtx = VertexConstraint::new(
            [0.0, 0.0, 0.0],
            Sym3::diagonal(1.0e-4, 1.0e-4, 1.0e-4),
        );
        v.set_production_vertex(&mut s, &vtx);
        assert_eq!(s.ndf(), ndf_before + 2);
        // par[7] now carries the decay length in S; transported back to the
        // decay vertex the position should be near the original decay point.
        assert!(s.par[7] != 0.0);
        assert_relative_eq!(s.s_from_decay, 0.0);
    }

    #[test]
    fn test_transport_between_vertices_round_trip() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        let mut s = composite();
        let vtx = VertexConstraint::new(
            [0.0, 0.0, 0.0],
            Sym3::diagonal(1.0e-4, 1.0e-4, 1.0e-4),
        );
        v.set_production_vertex(&mut s, &vtx);
        let decay = s.position();
        assert!(!s.at_production_vertex());

        v.transport_to_production_vertex(&mut s);
        assert!(s.at_production_vertex());
        for k in 0..3 {
            assert_relative_eq!(s.position()[k], vtx.position[k], epsilon = 1e-9);
        }

        v.transport_to_decay_vertex(&mut s);
        assert!(!s.at_production_vertex());
        assert_relative_eq!(s.s_from_decay, 0.0);
        for k in 0..3 {
            assert_relative_eq!(s.position()[k], decay[k], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_set_no_decay_length_zeroes_s() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        let mut s = composite();
        s.par[7] = 0.3;
        s.cov.set(7, 0, 1.0e-3);
        let ndf_before = s.ndf();
        v.set_no_decay_length(&mut s);
        assert_eq!(s.par[7], 0.0);
        assert_eq!(s.ndf(), ndf_before + 1);
        for j in 0..8 {
            assert_eq!(s.cov.at(7, j), 0.0);
        }
        assert!(s.chi2() > 0.0);
    }

    #[test]
    fn test_no_decay_length_without_s_freedom_is_noop_update() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        let mut s = composite();
        s.cov = SymCov::zero();
        s.par[7] = 0.3;
        let ndf_before = s.ndf();
        v.set_no_decay_length(&mut s);
        assert_eq!(s.ndf(), ndf_before);
        assert_eq!(s.par[7], 0.0);
    }
}
