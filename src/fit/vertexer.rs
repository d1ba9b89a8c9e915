//! Daughter combination: the sequential Kalman filter over particle states.

use log::{debug, warn};

use crate::core::types::{ParticleState, Sym3, SymCov};
use crate::field::{FieldProvider, CLIGHT};
use crate::fit::mass::{apply_mass_constraint, set_nonlinear_mass_constraint};
use crate::fit::{EnergyPolicy, FitError, VertexConstraint, Vertexer};
use crate::transport::path::{ds_to_particle, ds_to_point};
use crate::transport::transport;

/// Decay-length inflation added to a measurement transported to a guess
/// point, so the fit never over-trusts the longitudinal coordinate.
fn s_correction(part: &[f64; 8], xyz: &[f64; 3]) -> f64 {
    let d = [xyz[0] - part[0], xyz[1] - part[1], xyz[2] - part[2]];
    let p2 = part[3] * part[3] + part[4] * part[4] + part[5] * part[5];
    if p2 > 1.0e-4 {
        (0.1 + 10.0 * (d[0] * d[0] + d[1] * d[1] + d[2] * d[2]).sqrt()) / p2.sqrt()
    } else {
        1.0
    }
}

/// Cofactor inverse of the combined position weight.
///
/// A determinant at or below 1e-20 (including a negative one, which marks a
/// non-positive combined covariance) yields a zero weight: the daughter
/// then contributes nothing rather than corrupting the fit.
fn weight_inverse(s: &Sym3) -> Sym3 {
    let a = s.as_packed();
    let mut w = [0.0; 6];
    w[0] = a[2] * a[5] - a[4] * a[4];
    w[1] = a[3] * a[4] - a[1] * a[5];
    w[2] = a[0] * a[5] - a[3] * a[3];
    w[3] = a[1] * a[4] - a[2] * a[3];
    w[4] = a[1] * a[3] - a[0] * a[4];
    w[5] = a[0] * a[2] - a[1] * a[1];
    let det = a[0] * w[0] + a[1] * w[1] + a[3] * w[3];
    let scale = if det > 1.0e-20 {
        1.0 / det
    } else {
        warn!("daughter weight matrix degenerate (det {det:.3e}), zero weight applied");
        0.0
    };
    for v in w.iter_mut() {
        *v *= scale;
    }
    Sym3::from_packed(w)
}

/// One column triple of C * H' for the position-measurement model, H = [I3 0].
fn cht_columns(c: &SymCov) -> [[f64; 7]; 3] {
    let mut out = [[0.0; 7]; 3];
    for (col, slot) in out.iter_mut().enumerate() {
        for (i, v) in slot.iter_mut().enumerate() {
            *v = c.at(i, col);
        }
    }
    out
}

/// Kalman gain columns K = (C H') W for a 3-component position measurement.
fn gain_columns(cht: &[[f64; 7]; 3], w: &Sym3) -> [[f64; 7]; 3] {
    let mut k = [[0.0; 7]; 3];
    for (col, slot) in k.iter_mut().enumerate() {
        for (i, v) in slot.iter_mut().enumerate() {
            *v = cht[0][i] * w.at(0, col) + cht[1][i] * w.at(1, col) + cht[2][i] * w.at(2, col);
        }
    }
    k
}

impl<F: FieldProvider> Vertexer<'_, F> {
    /// Measure a particle at a guess point: transport to the closest
    /// approach and inflate the covariance along the trajectory.
    ///
    /// The inflation direction is the momentum scaled by the decay-length
    /// correction, crossed with qB for the bending components; without it a
    /// distant guess would pin the vertex to the transported point.
    pub fn measurement_at(&self, state: &ParticleState, xyz: &[f64; 3]) -> ([f64; 8], SymCov) {
        let b = self.field().field(xyz);
        let b = [b[0] * CLIGHT, b[1] * CLIGHT, b[2] * CLIGHT];

        let ds = ds_to_point(state, xyz, self.field());
        let (m, mut v) = transport(state, ds, self.field());

        let sigma_s = s_correction(&m, xyz);
        let q = state.charge() as f64;

        let mut h = [0.0; 6];
        h[0] = m[3] * sigma_s;
        h[1] = m[4] * sigma_s;
        h[2] = m[5] * sigma_s;
        h[3] = (h[1] * b[2] - h[2] * b[1]) * q;
        h[4] = (h[2] * b[0] - h[0] * b[2]) * q;
        h[5] = (h[0] * b[1] - h[1] * b[0]) * q;

        for i in 0..6 {
            for j in 0..=i {
                v.add(i, j, h[i] * h[j]);
            }
        }

        (m, v)
    }

    /// Fold one daughter into the parent state.
    ///
    /// An uninitialized parent (ndf < -1) absorbs the daughter wholesale;
    /// afterwards each daughter is a Kalman update of the common vertex.
    pub fn add_daughter(
        &self,
        parent: &mut ParticleState,
        daughter: &ParticleState,
    ) -> Result<(), FitError> {
        if parent.ndf < -1 {
            parent.ndf = -1;
            parent.charge = daughter.charge;
            parent.par[..7].copy_from_slice(&daughter.par[..7]);
            for i in 0..7 {
                for j in 0..=i {
                    parent.cov.set(i, j, daughter.cov.at(i, j));
                }
            }
            parent.s_from_decay = 0.0;
            parent.mass_hypo = daughter.mass_hypo;
            parent.sum_daughter_mass = daughter.sum_daughter_mass;
            return Ok(());
        }

        match self.config().policy {
            EnergyPolicy::FitWithMassConstraint => self.add_daughter_energy_fit(parent, daughter),
            other => return Err(FitError::UnsupportedPolicy(other)),
        }

        parent.sum_daughter_mass += daughter.sum_daughter_mass;
        parent.mass_hypo = -1.0;
        Ok(())
    }

    /// The filter update with energy as an independent parameter and mass
    /// hypotheses re-applied through the gain.
    fn add_daughter_energy_fit(&self, parent: &mut ParticleState, daughter: &ParticleState) {
        self.transport_to_decay_vertex(parent);

        let mut max_iter = 1;

        if !parent.linearized {
            if parent.ndf == -1 {
                // seed the vertex between the two trajectories
                let (ds, ds1) = ds_to_particle(parent, daughter, self.field());
                parent.transport_to_ds(ds, self.field());
                let (m, _) = transport(daughter, ds1, self.field());
                parent.vtx_guess = [
                    0.5 * (parent.par[0] + m[0]),
                    0.5 * (parent.par[1] + m[1]),
                    0.5 * (parent.par[2] + m[2]),
                ];
            } else {
                parent.vtx_guess = parent.position();
            }
            max_iter = 3;
        }

        for iter in 0..max_iter {
            // parent side: a bare first daughter is re-measured at the
            // guess, an accumulated parent is used as is
            let (mut ffp, mut ffc) = if parent.ndf == -1 {
                self.measurement_at(parent, &parent.vtx_guess)
            } else {
                (parent.par, parent.cov)
            };

            // daughter side: S freedom present means it can be re-measured
            let (m0, mv0) = if daughter.cov.at(7, 7) > 0.0 {
                self.measurement_at(daughter, &parent.vtx_guess)
            } else {
                (daughter.par, daughter.cov)
            };
            let mut m = m0;
            let mut mv = mv0;

            let w = weight_inverse(&ffc.position_block().add(&mv.position_block()));

            let zeta = [m[0] - ffp[0], m[1] - ffp[1], m[2] - ffp[2]];

            let cht = cht_columns(&ffc);
            let k = gain_columns(&cht, &w);

            if iter < max_iter - 1 {
                for (i, g) in parent.vtx_guess.iter_mut().enumerate() {
                    *g = ffp[i] + k[0][i] * zeta[0] + k[1][i] * zeta[1] + k[2][i] * zeta[2];
                }
                continue;
            }

            let vht = cht_columns(&mv);
            let km = gain_columns(&vht, &w);

            for i in 0..7 {
                ffp[i] += k[0][i] * zeta[0] + k[1][i] * zeta[1] + k[2][i] * zeta[2];
            }
            for i in 0..7 {
                m[i] -= km[0][i] * zeta[0] + km[1][i] * zeta[1] + km[2][i] * zeta[2];
            }

            for i in 0..7 {
                for j in 0..=i {
                    ffc.add(
                        i,
                        j,
                        -(k[0][i] * cht[0][j] + k[1][i] * cht[1][j] + k[2][i] * cht[2][j]),
                    );
                    mv.add(
                        i,
                        j,
                        -(km[0][i] * vht[0][j] + km[1][i] * vht[1][j] + km[2][i] * vht[2][j]),
                    );
                }
            }

            // parent-daughter cross covariance through the shared gain
            let mut mdf = [[0.0; 7]; 7];
            for (i, row) in mdf.iter_mut().enumerate() {
                for (j, v) in row.iter_mut().enumerate() {
                    *v = km[0][i] * cht[0][j] + km[1][i] * cht[1][j] + km[2][i] * cht[2][j];
                }
            }

            let mass_parent2 =
                ffp[6] * ffp[6] - (ffp[3] * ffp[3] + ffp[4] * ffp[4] + ffp[5] * ffp[5]);
            let mass_daughter2 = m[6] * m[6] - (m[3] * m[3] + m[4] * m[4] + m[5] * m[5]);
            let mass_parent = if mass_parent2 > 0.0 {
                mass_parent2.sqrt()
            } else {
                mass_parent2
            };
            let mass_daughter = if mass_daughter2 > 0.0 {
                mass_daughter2.sqrt()
            } else {
                mass_daughter2
            };

            let mut mj1 = [[0.0; 7]; 7];
            let mut mj2 = [[0.0; 7]; 7];

            if parent.mass_hypo > -0.5 {
                mj1 = apply_mass_constraint(&mut ffp, &mut ffc, parent.mass_hypo);
            } else if mass_parent < parent.sum_daughter_mass || ffp[6] < 0.0 {
                mj1 = apply_mass_constraint(&mut ffp, &mut ffc, parent.sum_daughter_mass);
            }

            if daughter.mass_hypo > -0.5 {
                mj2 = apply_mass_constraint(&mut m, &mut mv, daughter.mass_hypo);
            } else if mass_daughter < daughter.sum_daughter_mass || m[6] < 0.0 {
                mj2 = apply_mass_constraint(&mut m, &mut mv, daughter.sum_daughter_mass);
            }

            // sandwich the cross covariance through both constraint Jacobians
            let mut mdj = [[0.0; 7]; 7];
            for (i, row) in mdj.iter_mut().enumerate() {
                for (j, v) in row.iter_mut().enumerate() {
                    for l in 0..7 {
                        *v += mdf[i][l] * mj1[j][l];
                    }
                }
            }
            for (i, row) in mdf.iter_mut().enumerate() {
                for (j, v) in row.iter_mut().enumerate() {
                    *v = 0.0;
                    for l in 0..7 {
                        *v += mj2[i][l] * mdj[l][j];
                    }
                }
            }

            // momentum and energy summation
            for i in 3..7 {
                ffp[i] += m[i];
            }
            for i in 3..7 {
                for j in 3..=i {
                    ffc.add(i, j, mv.at(i, j));
                }
            }
            for i in 3..7 {
                for j in 0..3 {
                    ffc.add(i, j, mdf[i][j]);
                }
            }
            for i in 3..7 {
                for j in 3..=i {
                    ffc.add(i, j, mdf[i][j] + mdf[j][i]);
                }
            }

            parent.par[..7].copy_from_slice(&ffp[..7]);
            for i in 0..7 {
                for j in 0..=i {
                    parent.cov.set(i, j, ffc.at(i, j));
                }
            }

            parent.ndf += 2;
            parent.charge += daughter.charge;
            parent.s_from_decay = 0.0;
            parent.chi2 += w.quadratic_form(&zeta);
            debug!(
                "daughter folded in: chi2 {:.4}, ndf {}, vertex ({:.4}, {:.4}, {:.4})",
                parent.chi2, parent.ndf, parent.par[0], parent.par[1], parent.par[2]
            );
        }
    }

    /// Full reconstruction in one go: seed, iterate, constrain.
    ///
    /// The vertex guess is seeded at the closest approach of the first two
    /// daughters and the whole combination is repeated for the configured
    /// number of passes, each re-linearized around the previous estimate.
    /// `vertex_prior` acts as a positional constraint covariance; without
    /// it the fit starts from a wide prior scaled off the first daughter.
    pub fn construct(
        &self,
        daughters: &[&ParticleState],
        mass_hypothesis: Option<f64>,
        production_vertex: Option<&VertexConstraint>,
        vertex_prior: Option<&Sym3>,
    ) -> Result<ParticleState, FitError> {
        if daughters.len() < 2 {
            return Err(FitError::InsufficientDaughters(daughters.len()));
        }

        let mut p = ParticleState::new();

        let (ds, _) = ds_to_particle(daughters[0], daughters[1], self.field());
        let (seed, _) = transport(daughters[0], ds, self.field());
        p.vtx_guess = [seed[0], seed[1], seed[2]];
        p.linearized = true;

        let constraint_c = match vertex_prior {
            Some(c) => *c,
            None => Sym3::diagonal(
                100.0 * daughters[0].cov.at(0, 0),
                100.0 * daughters[0].cov.at(1, 1),
                100.0 * daughters[0].cov.at(2, 2),
            ),
        };

        let passes = self.config().passes.max(1);
        for pass in 0..passes {
            p.at_production_vertex = false;
            p.s_from_decay = 0.0;
            p.par = [
                p.vtx_guess[0],
                p.vtx_guess[1],
                p.vtx_guess[2],
                0.0,
                0.0,
                0.0,
                0.0,
                0.0,
            ];
            p.cov = SymCov::zero();
            p.cov.set_position_block(&constraint_c);
            p.cov.set(7, 7, 1.0);
            p.ndf = if vertex_prior.is_some() { 0 } else { -3 };
            p.chi2 = 0.0;
            p.charge = 0;
            p.sum_daughter_mass = 0.0;

            for d in daughters {
                self.add_daughter(&mut p, d)?;
            }
            if pass < passes - 1 {
                p.vtx_guess = p.position();
            }
        }
        p.linearized = false;

        if let Some(mass) = mass_hypothesis {
            set_nonlinear_mass_constraint(&mut p, mass);
        }
        if let Some(vtx) = production_vertex {
            self.set_production_vertex(&mut p, vtx);
        }

        p.daughter_ids = daughters
            .iter()
            .filter(|d| d.id >= 0)
            .map(|d| d.id)
            .collect();

        Ok(p)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ZeroField;
    use crate::fit::VertexerConfig;
    use approx::assert_relative_eq;

    fn track(pos: [f64; 3], mom: [f64; 3], mass: f64, charge: i32) -> ParticleState {
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
            charge,
            mass,
        )
    }

    #[test]
    fn test_s_correction_scales_with_distance() {
        let part = [0.0, 0.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0];
        let near = s_correction(&part, &[0.0, 0.0, 0.01]);
        let far = s_correction(&part, &[0.0, 0.0, 1.0]);
        assert!(far > near);
        assert_relative_eq!(near, 0.1 + 10.0 * 0.01, epsilon = 1e-12);
    }

    #[test]
    fn test_s_correction_momentum_floor() {
        let part = [0.0; 8];
        assert_relative_eq!(s_correction(&part, &[1.0, 0.0, 0.0]), 1.0);
    }

    #[test]
    fn test_weight_inverse_rejects_indefinite() {
        // negative-definite input must give a zero weight, not an inverse
        let w = weight_inverse(&Sym3::diagonal(-1.0, -1.0, -1.0));
        for i in 0..3 {
            for j in 0..3 {
                assert_eq!(w.at(i, j), 0.0);
            }
        }
    }

    #[test]
    fn test_first_daughter_is_copied() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        let d = track([0.1, 0.2, 0.3], [0.5, 0.0, 1.0], 0.13957, 1);
        let mut p = ParticleState::new();
        v.add_daughter(&mut p, &d).unwrap();
        assert_eq!(p.ndf(), -1);
        assert_eq!(p.charge(), 1);
        for i in 0..7 {
            assert_relative_eq!(p.par[i], d.par[i]);
        }
        assert_relative_eq!(p.mass_hypothesis(), 0.13957);
    }

    #[test]
    fn test_unsupported_policy_is_rejected() {
        let field = ZeroField;
        let cfg = VertexerConfig {
            policy: EnergyPolicy::FromMass,
            ..VertexerConfig::default()
        };
        let v = Vertexer::with_config(&field, cfg);
        let d1 = track([-0.5, 0.0, -1.0], [0.5, 0.0, 1.0], 0.13957, 1);
        let d2 = track([0.5, 0.0, -1.0], [-0.5, 0.0, 1.0], 0.13957, -1);
        let err = v.construct(&[&d1, &d2], None, None, None).unwrap_err();
        assert_eq!(err, FitError::UnsupportedPolicy(EnergyPolicy::FromMass));
    }

    #[test]
    fn test_construct_needs_two_daughters() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        let d = track([0.0, 0.0, 0.0], [0.5, 0.0, 1.0], 0.13957, 1);
        assert_eq!(
            v.construct(&[&d], None, None, None).unwrap_err(),
            FitError::InsufficientDaughters(1)
        );
    }

    #[test]
    fn test_construct_finds_crossing_vertex() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        // two pions crossing at the origin
        let d1 = track([-0.5, 0.0, -1.0], [0.5, 0.0, 1.0], 0.13957, 1);
        let d2 = track([0.5, 0.0, -1.0], [-0.5, 0.0, 1.0], 0.13957, -1);
        let p = v.construct(&[&d1, &d2], None, None, None).unwrap();
        for k in 0..3 {
            assert!(p.position()[k].abs() < 1.0e-3, "vertex axis {k} off");
        }
        assert_eq!(p.charge(), 0);
        assert_eq!(p.ndf(), 1);
        // momentum is the sum of the daughters
        assert_relative_eq!(p.px(), 0.0, epsilon = 1e-6);
        assert_relative_eq!(p.pz(), 2.0, epsilon = 1e-3);
    }

    #[test]
    fn test_construct_collects_daughter_ids() {
        let field = ZeroField;
        let v = Vertexer::new(&field);
        let mut d1 = track([-0.5, 0.0, -1.0], [0.5, 0.0, 1.0], 0.13957, 1);
        let mut d2 = track([0.5, 0.0, -1.0], [-0.5, 0.0, 1.0], 0.13957, -1);
        d1.set_id(7);
        d2.set_id(12);
        let p = v.construct(&[&d1, &d2], None, None, None).unwrap();
        assert_eq!(p.daughter_ids(), &[7, 12]);
    }
}
