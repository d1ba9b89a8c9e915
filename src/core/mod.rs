//! Core foundation: particle state, covariance storage, track input.

pub mod types;
