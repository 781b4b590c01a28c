//! Affine-invariant ensemble sampler.
//!
//! The ensemble is split into two halves. Each half is moved with the
//! stretch move of Goodman & Weare (2010) against the positions the other
//! half holds at that moment, and all proposals of a half are scored as one
//! batch by an [`Executor`]. Random numbers are only ever drawn here, on the
//! coordinating thread, so a run is reproducible for a given seed no matter
//! how the batches are evaluated.

use std::sync::Arc;
use std::time::{Duration, Instant};

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::model::{Evaluation, LogDensity};

/// Scores batches of walker positions.
pub trait Executor {
    /// Dimension of the positions this executor accepts.
    fn dim(&self) -> usize;

    /// Evaluate every position. Results are returned in input order.
    fn evaluate_batch(&mut self, positions: &[Vec<f64>]) -> Result<Vec<Evaluation>>;
}

/// Evaluates a batch on a dedicated rayon thread pool.
pub struct ThreadExecutor<D> {
    density: Arc<D>,
    pool: ThreadPool,
}

impl<D: LogDensity> ThreadExecutor<D> {
    pub fn new(density: Arc<D>, num_threads: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(num_threads.max(1))
            .thread_name(|i| format!("uvlens-eval-{}", i))
            .build()
            .map_err(|e| Error::WorkerPool(e.to_string()))?;
        debug!(threads = pool.current_num_threads(), "started evaluation threads");
        Ok(Self { density, pool })
    }
}

impl<D: LogDensity> Executor for ThreadExecutor<D> {
    fn dim(&self) -> usize {
        self.density.dim()
    }

    fn evaluate_batch(&mut self, positions: &[Vec<f64>]) -> Result<Vec<Evaluation>> {
        let density = &self.density;
        self.pool
            .install(|| positions.par_iter().map(|p| density.log_prob(p)).collect())
    }
}

/// The stretch move proposal.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StretchMove {
    /// Scale parameter, proposals stretch by a factor in `[1/a, a]`.
    pub a: f64,
}

impl Default for StretchMove {
    fn default() -> Self {
        Self { a: 2.0 }
    }
}

impl StretchMove {
    pub fn new(a: f64) -> Result<Self> {
        if !(a > 1.0) {
            return Err(Error::Config(format!(
                "stretch move scale must be > 1, got {}",
                a
            )));
        }
        Ok(Self { a })
    }

    /// Draw a stretch factor from `g(z) ∝ 1/sqrt(z)` on `[1/a, a]`.
    pub fn sample_z<R: Rng + ?Sized>(&self, rng: &mut R) -> f64 {
        let u: f64 = rng.random();
        ((self.a - 1.0) * u + 1.0).powi(2) / self.a
    }

    /// `min(1, z^(dim-1) exp(new - old))`, zero for a non-finite proposal.
    pub fn acceptance_probability(&self, z: f64, dim: usize, log_prob_old: f64, log_prob_new: f64) -> f64 {
        if !log_prob_new.is_finite() {
            return 0.0;
        }
        let log_ratio = (dim as f64 - 1.0) * z.ln() + (log_prob_new - log_prob_old);
        log_ratio.exp().min(1.0)
    }
}

/// Positions, scores and acceptance counters of all walkers.
#[derive(Debug, Clone, PartialEq)]
pub struct EnsembleState {
    pub positions: Vec<Vec<f64>>,
    pub log_probs: Vec<f64>,
    pub derived: Vec<Vec<f64>>,
    pub n_accepted: Vec<u64>,
    pub n_proposed: Vec<u64>,
}

impl EnsembleState {
    pub fn n_walkers(&self) -> usize {
        self.positions.len()
    }

    pub fn acceptance_fraction(&self) -> Vec<f64> {
        self.n_accepted
            .iter()
            .zip(&self.n_proposed)
            .map(|(&a, &p)| if p == 0 { 0. } else { a as f64 / p as f64 })
            .collect()
    }

    pub fn mean_acceptance_fraction(&self) -> f64 {
        let fractions = self.acceptance_fraction();
        if fractions.is_empty() {
            return 0.;
        }
        fractions.iter().sum::<f64>() / fractions.len() as f64
    }

    /// Mean over the walkers with a finite log-probability.
    pub fn mean_log_prob(&self) -> f64 {
        let finite: Vec<f64> = self
            .log_probs
            .iter()
            .copied()
            .filter(|lp| lp.is_finite())
            .collect();
        if finite.is_empty() {
            f64::NEG_INFINITY
        } else {
            finite.iter().sum::<f64>() / finite.len() as f64
        }
    }
}

/// Summary of one completed iteration.
#[derive(Debug, Clone, Copy)]
#[non_exhaustive]
pub struct Progress {
    /// Number of completed iterations, counting this one.
    pub iteration: u64,
    pub mean_acceptance: f64,
    pub mean_log_prob: f64,
    /// Time spent in this iteration.
    pub elapsed: Duration,
}

pub struct EnsembleSampler<E> {
    executor: E,
    stretch: StretchMove,
    rng: ChaCha8Rng,
    state: EnsembleState,
    iteration: u64,
}

impl<E: Executor> EnsembleSampler<E> {
    /// Score the starting positions and set up the ensemble.
    pub fn new(
        mut executor: E,
        stretch: StretchMove,
        seed: u64,
        positions: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let n = positions.len();
        if n < 2 || n % 2 != 0 {
            return Err(Error::Config(format!(
                "the ensemble needs an even number of at least 2 walkers, got {}",
                n
            )));
        }
        let dim = executor.dim();
        if let Some(bad) = positions.iter().find(|p| p.len() != dim) {
            return Err(Error::Config(format!(
                "walker has {} coordinates, the model {}",
                bad.len(),
                dim
            )));
        }
        if n < 2 * dim {
            warn!(
                walkers = n,
                dim, "fewer than two walkers per dimension, mixing will be poor"
            );
        }

        let evaluations = executor.evaluate_batch(&positions)?;
        let (log_probs, derived) = evaluations
            .into_iter()
            .map(|e| (e.log_prob, e.derived))
            .unzip();

        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        rng.set_stream(1);

        Ok(Self {
            executor,
            stretch,
            rng,
            state: EnsembleState {
                positions,
                log_probs,
                derived,
                n_accepted: vec![0; n],
                n_proposed: vec![0; n],
            },
            iteration: 0,
        })
    }

    pub fn state(&self) -> &EnsembleState {
        &self.state
    }

    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    pub fn into_executor(self) -> E {
        self.executor
    }

    /// Move both halves of the ensemble once.
    pub fn step(&mut self) -> Result<Progress> {
        let start = Instant::now();
        let n = self.state.n_walkers();
        let half = n / 2;
        self.update_group(0..half, half..n)?;
        self.update_group(half..n, 0..half)?;
        self.iteration += 1;

        Ok(Progress {
            iteration: self.iteration,
            mean_acceptance: self.state.mean_acceptance_fraction(),
            mean_log_prob: self.state.mean_log_prob(),
            elapsed: start.elapsed(),
        })
    }

    fn update_group(
        &mut self,
        active: std::ops::Range<usize>,
        complementary: std::ops::Range<usize>,
    ) -> Result<()> {
        let state = &mut self.state;
        let mut stretches = Vec::with_capacity(active.len());
        let proposals: Vec<Vec<f64>> = active
            .clone()
            .map(|i| {
                let z = self.stretch.sample_z(&mut self.rng);
                let j = self.rng.random_range(complementary.clone());
                stretches.push(z);
                state.positions[i]
                    .iter()
                    .zip(&state.positions[j])
                    .map(|(x, c)| c + z * (x - c))
                    .collect()
            })
            .collect();

        let evaluations = self.executor.evaluate_batch(&proposals)?;
        if evaluations.len() != proposals.len() {
            return Err(Error::WorkerPool(format!(
                "{} proposals but {} results",
                proposals.len(),
                evaluations.len()
            )));
        }

        let dim = self.executor.dim();
        for ((i, proposal), (z, evaluation)) in active
            .zip(proposals)
            .zip(stretches.into_iter().zip(evaluations))
        {
            let p = self.stretch.acceptance_probability(
                z,
                dim,
                state.log_probs[i],
                evaluation.log_prob,
            );
            state.n_proposed[i] += 1;
            if self.rng.random::<f64>() < p {
                state.positions[i] = proposal;
                state.log_probs[i] = evaluation.log_prob;
                state.derived[i] = evaluation.derived;
                state.n_accepted[i] += 1;
            }
        }
        Ok(())
    }
}
