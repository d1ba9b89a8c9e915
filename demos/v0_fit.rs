//! Two-track V0 reconstruction demo.
//!
//! Builds a neutral composite from an opposite-charge pion pair crossing at
//! the origin, fits the decay vertex in a 5 kG dipole field and prints the
//! fitted vertex, invariant mass and fit quality.
//!
//! ```bash
//! cargo run --example v0_fit
//! RUST_LOG=debug cargo run --example v0_fit
//! ```

use bindu_fit::{ParticleState, UniformField, Vertexer};

const PION_MASS: f64 = 0.13957;

fn pion(pos: [f64; 3], mom: [f64; 3], charge: i32) -> ParticleState {
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
        PION_MASS,
    )
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let field = UniformField::new(0.0, -5.0, 0.0);
    let fitter = Vertexer::new(&field);

    let mut pi_plus = pion([-0.5, 0.0, -1.0], [0.5, 0.0, 1.0], 1);
    let mut pi_minus = pion([0.5, 0.0, -1.0], [-0.5, 0.0, 1.0], -1);
    pi_plus.set_id(0);
    pi_minus.set_id(1);

    log::info!("fitting V0 candidate from 2 tracks in By = -5 kG");

    let v0 = match fitter.construct(&[&pi_plus, &pi_minus], None, None, None) {
        Ok(p) => p,
        Err(e) => {
            log::error!("vertex fit failed: {e}");
            std::process::exit(1);
        }
    };

    let [x, y, z] = v0.position();
    let mass = v0.mass();
    let momentum = v0.momentum();

    log::info!("vertex: ({x:.4}, {y:.4}, {z:.4}) cm");
    log::info!(
        "mass: {:.5} +- {:.5} GeV (valid: {})",
        mass.value,
        mass.sigma,
        mass.valid
    );
    log::info!("momentum: {:.4} GeV, charge {}", momentum.value, v0.charge());
    log::info!(
        "chi2/ndf: {:.3}/{}, daughters {:?}",
        v0.chi2(),
        v0.ndf(),
        v0.daughter_ids()
    );
}
