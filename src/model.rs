//! Core abstraction between the ensemble sampler and the forward model.
//!
//! Provides the `LogDensity` trait, the only thing the sampler and the
//! worker pool know about the model they explore.

use crate::error::Result;

/// Log-probability of one walker position together with the diagnostics
/// reported alongside it.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    pub log_prob: f64,
    /// Auxiliary values written next to the parameters, empty for rejected
    /// positions.
    pub derived: Vec<f64>,
}

impl Evaluation {
    /// A position outside the support of the posterior.
    pub fn rejected() -> Self {
        Self {
            log_prob: f64::NEG_INFINITY,
            derived: Vec::new(),
        }
    }
}

/// Trait for posterior densities that can be explored by the ensemble sampler.
///
/// Evaluation must be a pure function of the position: implementations are
/// shared between threads and called concurrently, and the sampler relies on
/// identical positions giving identical results to stay reproducible across
/// execution modes.
///
/// A position outside the support returns [`Evaluation::rejected`]; an `Err`
/// stops the run.
pub trait LogDensity: Send + Sync + 'static {
    /// Number of coordinates of a walker position.
    fn dim(&self) -> usize;

    fn log_prob(&self, position: &[f64]) -> Result<Evaluation>;
}
