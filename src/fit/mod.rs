//! Sequential Kalman vertex fitting.
//!
//! [`Vertexer`] folds daughter particle states into a composite particle at
//! their common decay vertex. Each daughter enters as a position measurement
//! of the vertex; the filter keeps the linearization point explicit and
//! re-applies each side's mass hypothesis through the Kalman gain, so energy
//! stays a fitted parameter instead of a derived one. Constraints (mass,
//! production vertex, zero decay length) are separate updates applied after
//! construction.

pub mod mass;
mod vertex;
mod vertexer;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::types::{ParticleState, StateError, Sym3};
use crate::field::FieldProvider;

/// Errors from the fitting layer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitError {
    /// A composite needs at least two daughters.
    #[error("construct needs at least 2 daughters, got {0}")]
    InsufficientDaughters(usize),
    /// The selected energy policy has no implementation in this fitter.
    #[error("energy policy {0:?} is not supported by the sequential fitter")]
    UnsupportedPolicy(EnergyPolicy),
    /// A derived quantity was degenerate.
    #[error(transparent)]
    State(#[from] StateError),
}

/// How the energy parameter is treated while adding daughters.
///
/// Only [`EnergyPolicy::FitWithMassConstraint`] is implemented: energy is
/// fitted as an independent parameter and each side's mass hypothesis is
/// folded back through the gain. The other policies are accepted in
/// configuration but rejected at fit time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnergyPolicy {
    /// Fit energy independently, re-applying mass hypotheses through the gain.
    #[default]
    FitWithMassConstraint,
    /// Fit energy independently without mass hypotheses.
    Fit,
    /// Derive energy from the momentum and the mass hypothesis.
    FromMass,
}

/// A fitted vertex used as an external constraint: position and its 3x3
/// covariance.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VertexConstraint {
    pub position: [f64; 3],
    pub cov: Sym3,
}

impl VertexConstraint {
    pub fn new(position: [f64; 3], cov: Sym3) -> Self {
        Self { position, cov }
    }
}

impl From<&ParticleState> for VertexConstraint {
    fn from(state: &ParticleState) -> Self {
        Self {
            position: state.position(),
            cov: state.covariance().position_block(),
        }
    }
}

/// Fitter configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct VertexerConfig {
    /// Energy treatment while combining daughters.
    pub policy: EnergyPolicy,
    /// Global passes of `construct`; each pass re-linearizes around the
    /// previous vertex estimate.
    pub passes: usize,
}

impl Default for VertexerConfig {
    fn default() -> Self {
        Self {
            policy: EnergyPolicy::default(),
            passes: 3,
        }
    }
}

/// The vertex-fit engine: configuration plus the injected field.
///
/// Holds no per-fit state; one `Vertexer` can serve any number of fits, on
/// any thread, as long as the field provider is shareable.
pub struct Vertexer<'f, F: FieldProvider> {
    field: &'f F,
    config: VertexerConfig,
}

impl<'f, F: FieldProvider> Vertexer<'f, F> {
    pub fn new(field: &'f F) -> Self {
        Self::with_config(field, VertexerConfig::default())
    }

    pub fn with_config(field: &'f F, config: VertexerConfig) -> Self {
        Self { field, config }
    }

    pub fn field(&self) -> &F {
        self.field
    }

    pub fn config(&self) -> &VertexerConfig {
        &self.config
    }
}
