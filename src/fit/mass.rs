//! Mass constraints.
//!
//! The nonlinear constraint forces the fitted (E, p) onto the mass shell
//! E^2 - p^2 = m^2 exactly, solving a scalar Lagrange-multiplier quartic by
//! Newton iteration and propagating the covariance through the constraint
//! Jacobian. The linear form is a single scalar Kalman update on the
//! residual m^2 - (E^2 - p^2), hard (sigma = 0) or soft (sigma > 0).

use log::warn;

use crate::core::types::{ParticleState, SymCov};

/// Force the state onto the mass shell for the given mass hypothesis.
///
/// Operates on raw parameters and covariance so the daughter-combination
/// step can run it on intermediate measurement vectors. Returns the 7x7
/// constraint Jacobian; the caller needs it to carry parent-daughter
/// correlations through the constraint.
pub fn apply_mass_constraint(par: &mut [f64; 8], cov: &mut SymCov, mass: f64) -> [[f64; 7]; 7] {
    let energy2 = par[6] * par[6];
    let p2 = par[3] * par[3] + par[4] * par[4] + par[5] * par[5];
    let mass2 = mass * mass;

    // f(lambda) = -m^2 lambda^4 + a lambda^2 + b lambda + c
    let a = energy2 - p2 + 2.0 * mass2;
    let b = -2.0 * (energy2 + p2);
    let c = energy2 - p2 - mass2;

    let mut lambda = 0.0;
    if b.abs() > 1.0e-10 {
        lambda = -c / b;
    }

    let d = 4.0 * energy2 * p2 - mass2 * (energy2 - p2 - 2.0 * mass2);
    if d >= 0.0 && a.abs() > 1.0e-10 {
        lambda = (energy2 + p2 - d.sqrt()) / a;
    }

    if par[6] < 0.0 {
        // negative energy needs a negative root, seed far below the poles
        lambda = -1.0e6;
    }

    for _ in 0..100 {
        let lambda2 = lambda * lambda;
        let lambda4 = lambda2 * lambda2;
        let lambda0 = lambda;

        let f = -mass2 * lambda4 + a * lambda2 + b * lambda + c;
        let df = -4.0 * mass2 * lambda2 * lambda + 2.0 * a * lambda + b;
        if df.abs() < 1.0e-10 {
            break;
        }
        lambda -= f / df;
        if (lambda0 - lambda).abs() < 1.0e-8 {
            break;
        }
    }

    let lpi = 1.0 / (1.0 + lambda);
    let lmi = 1.0 / (1.0 - lambda);
    let lp2i = lpi * lpi;
    let lm2i = lmi * lmi;

    let lambda2 = lambda * lambda;

    let dfl = -4.0 * mass2 * lambda2 * lambda + 2.0 * a * lambda + b;
    let dfx = [
        -2.0 * (1.0 + lambda) * (1.0 + lambda) * par[3],
        -2.0 * (1.0 + lambda) * (1.0 + lambda) * par[4],
        -2.0 * (1.0 + lambda) * (1.0 + lambda) * par[5],
        2.0 * (1.0 - lambda) * (1.0 - lambda) * par[6],
    ];
    let mut dlx = [1.0; 4];
    if dfl.abs() > 1.0e-10 {
        for i in 0..4 {
            dlx[i] = -dfx[i] / dfl;
        }
    }

    let dxx = [par[3] * lm2i, par[4] * lm2i, par[5] * lm2i, -par[6] * lp2i];

    let mut mj = [[0.0; 7]; 7];
    mj[0][0] = 1.0;
    mj[1][1] = 1.0;
    mj[2][2] = 1.0;

    for i in 3..7 {
        for j in 3..7 {
            mj[i][j] = dlx[j - 3] * dxx[i - 3];
        }
    }
    for (i, row) in mj.iter_mut().enumerate().take(6).skip(3) {
        row[i] += lmi;
    }
    mj[6][6] += lpi;

    cov.congruence7(&mj);

    par[3] *= lmi;
    par[4] *= lmi;
    par[5] *= lmi;
    par[6] *= lpi;

    mj
}

/// Nonlinear mass constraint on a fitted particle.
pub fn set_nonlinear_mass_constraint(state: &mut ParticleState, mass: f64) {
    apply_mass_constraint(&mut state.par, &mut state.cov, mass);
    state.mass_hypo = mass;
    state.sum_daughter_mass = mass;
}

/// Linear mass constraint, hard (`sigma_mass` = 0) or soft (> 0).
///
/// Single scalar Kalman update on zeta = m^2 - (E^2 - p^2); raises the
/// chi-squared and ndf like any other measurement. Skipped when the
/// propagated constraint variance is already below 1e-20, where the state
/// carries no mass freedom to constrain.
pub fn set_mass_constraint(state: &mut ParticleState, mass: f64, sigma_mass: f64) {
    state.mass_hypo = mass;
    state.sum_daughter_mass = mass;

    let m2 = mass * mass;
    let s2 = m2 * sigma_mass * sigma_mass;

    let p2 = state.par[3] * state.par[3] + state.par[4] * state.par[4] + state.par[5] * state.par[5];

    let mut mh = [0.0; 8];
    mh[3] = -2.0 * state.par[3];
    mh[4] = -2.0 * state.par[4];
    mh[5] = -2.0 * state.par[5];
    mh[6] = 2.0 * state.par[6];

    let zeta = m2 - (state.par[6] * state.par[6] - p2);

    let mut mcht = [0.0; 8];
    let mut s2_est = 0.0;
    for i in 0..8 {
        let mut sum = 0.0;
        for (j, hj) in mh.iter().enumerate() {
            sum += state.cov.at(i, j) * hj;
        }
        mcht[i] = sum;
        s2_est += mh[i] * sum;
    }

    if s2_est < 1.0e-20 {
        warn!("mass constraint skipped: propagated variance {s2_est:.3e} has no mass freedom");
        return;
    }

    let w2 = 1.0 / (s2 + s2_est);
    state.chi2 += zeta * zeta * w2;
    state.ndf += 1;
    for i in 0..8 {
        let ki = mcht[i] * w2;
        state.par[i] += ki * zeta;
        for j in 0..=i {
            state.cov.add(i, j, -(ki * mcht[j]));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn state(mom: [f64; 3], mass: f64, charge: i32) -> ParticleState {
        let mut cov = [0.0; 21];
        cov[0] = 1.0e-4;
        cov[2] = 1.0e-4;
        cov[5] = 1.0e-4;
        cov[9] = 1.0e-2;
        cov[14] = 1.0e-2;
        cov[20] = 1.0e-2;
        ParticleState::from_cartesian(
            [0.0, 0.0, 0.0, mom[0], mom[1], mom[2]],
            cov,
            charge,
            mass,
        )
    }

    #[test]
    fn test_nonlinear_constraint_pins_mass() {
        // Start away from the target shell and pull onto it.
        for target in [0.0, 0.000511, 0.10566, 10.0] {
            let mut s = state([0.3, 0.2, 1.1], 0.497, 0);
            // shift energy off-shell
            s.par[6] *= 1.05;
            set_nonlinear_mass_constraint(&mut s, target);
            let m2 = s.par[6] * s.par[6]
                - (s.par[3] * s.par[3] + s.par[4] * s.par[4] + s.par[5] * s.par[5]);
            assert_relative_eq!(m2.max(0.0).sqrt(), target, epsilon = 1e-6);
            assert_relative_eq!(s.mass_hypothesis(), target);
        }
    }

    #[test]
    fn test_nonlinear_constraint_on_shell_is_gentle() {
        // A state already on the shell should barely move.
        let mut s = state([0.3, 0.2, 1.1], 0.497, 0);
        let before = s.par;
        set_nonlinear_mass_constraint(&mut s, 0.497);
        for i in 3..7 {
            assert_relative_eq!(s.par[i], before[i], epsilon = 1e-9);
        }
    }

    #[test]
    fn test_linear_constraint_raises_ndf_and_chi2() {
        let mut s = state([0.3, 0.2, 1.1], 0.497, 0);
        // energy carries uncertainty of its own beyond the p-derived row
        s.cov.add(6, 6, 1.0e-2);
        s.par[6] *= 1.02;
        let ndf_before = s.ndf();
        set_mass_constraint(&mut s, 0.497, 0.0);
        assert_eq!(s.ndf(), ndf_before + 1);
        assert!(s.chi2() > 0.0);
        let m2 = s.par[6] * s.par[6]
            - (s.par[3] * s.par[3] + s.par[4] * s.par[4] + s.par[5] * s.par[5]);
        // Linear update lands near, not exactly on, the shell.
        assert!(m2 > 0.0);
        assert_relative_eq!(m2.sqrt(), 0.497, epsilon = 1e-2);
    }

    #[test]
    fn test_linear_constraint_skips_zero_variance() {
        let mut s = state([0.3, 0.2, 1.1], 0.497, 0);
        s.cov = SymCov::zero();
        let before = s.par;
        set_mass_constraint(&mut s, 0.3, 0.0);
        assert_eq!(s.par, before);
    }

    #[test]
    fn test_soft_constraint_moves_less_than_hard() {
        let mut hard = state([0.3, 0.2, 1.1], 0.497, 0);
        hard.cov.add(6, 6, 1.0e-2);
        hard.par[6] *= 1.02;
        let mut soft = hard.clone();
        set_mass_constraint(&mut hard, 0.497, 0.0);
        set_mass_constraint(&mut soft, 0.497, 0.5);
        let shell = |s: &ParticleState| {
            (s.par[6] * s.par[6]
                - (s.par[3] * s.par[3] + s.par[4] * s.par[4] + s.par[5] * s.par[5])
                - 0.497f64 * 0.497)
                .abs()
        };
        assert!(shell(&hard) < shell(&soft));
    }
}
