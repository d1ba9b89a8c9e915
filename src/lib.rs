//! BinduFit - Kalman-filter decay-vertex and composite-particle reconstruction
//!
//! # Architecture
//!
//! The crate is organized into 4 logical layers:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │                     fit/                            │  ← Vertex fitting
//! │    (daughter combination, mass & vertex constraints)│
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                  transport/                         │  ← Trajectory model
//! │        (propagation, path-length solvers)           │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                    field/                           │  ← Field lookup
//! │              (injected field provider)              │
//! └─────────────────────────────────────────────────────┘
//!                          │
//! ┌─────────────────────────────────────────────────────┐
//! │                     core/                           │  ← Foundation
//! │          (state, covariance, track input)           │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! # Model
//!
//! A particle is an 8-parameter state {x, y, z, px, py, pz, E, S} with an
//! 8x8 symmetric covariance, where S is the decay length divided by the
//! momentum magnitude. Single tracks enter through [`TrackState`] (the
//! slope/curvature parameterization of an upstream track fit) or directly
//! in Cartesian form; composite particles are built by folding daughter
//! states into a common decay vertex with sequential linearized Kalman
//! updates ([`Vertexer`]).
//!
//! Units are cm, GeV and kG throughout. All arithmetic is `f64` on
//! fixed-size stack buffers; every iteration is bounded, so every
//! operation is bounded-time.

// ============================================================================
// Layer 1: Core foundation (no internal deps)
// ============================================================================
pub mod core;

// ============================================================================
// Layer 2: Magnetic-field lookup (depends on nothing; injected everywhere)
// ============================================================================
pub mod field;

// ============================================================================
// Layer 3: Trajectory model (depends on core, field)
// ============================================================================
pub mod transport;

// ============================================================================
// Layer 4: Vertex fitting (depends on all layers)
// ============================================================================
pub mod fit;

// ============================================================================
// Convenience re-exports (flat namespace for common use)
// ============================================================================

// Core types
pub use crate::core::types::{Measured, ParticleState, StateError, Sym3, SymCov, TrackState};

// Field providers
pub use crate::field::{FieldProvider, UniformField, ZeroField, CLIGHT};

// Transport
pub use crate::transport::path::{ds_to_particle, ds_to_particle_line, ds_to_point, ds_to_point_line};
pub use crate::transport::{transport, transport_field, transport_line};

// Fit
pub use crate::fit::mass::{apply_mass_constraint, set_mass_constraint, set_nonlinear_mass_constraint};
pub use crate::fit::{EnergyPolicy, FitError, VertexConstraint, Vertexer, VertexerConfig};
