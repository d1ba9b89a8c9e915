//! Value types for particle reconstruction.

mod state;
mod sym;
mod track;

pub use state::{Measured, ParticleState, StateError};
pub use sym::{Sym3, SymCov};
pub use track::TrackState;
