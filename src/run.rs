//! Driving a complete fit: load, validate, seed, sample, checkpoint.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use tracing::{info, warn};

use crate::config::{Config, Parallelism};
use crate::csv_storage::{CsvConfig, PosteriorTable};
use crate::error::Error;
use crate::likelihood::LensLikelihood;
use crate::pool::WorkerPool;
use crate::sampler::{EnsembleSampler, Executor, StretchMove, ThreadExecutor};
use crate::visibility::ObservationSet;

/// A validated model bound to its data, ready to be sampled.
pub struct Fit {
    pub config: Config,
    pub likelihood: Arc<LensLikelihood>,
}

impl Fit {
    /// Load the visibilities and build the model. Every configuration error
    /// surfaces here, before anything is written.
    pub fn prepare(config: Config) -> Result<Self> {
        let observations = ObservationSet::load(&config.visibility_files, &config.weights)
            .context("Failed to load visibilities")?;
        let likelihood = LensLikelihood::from_config(&config, observations)
            .context("Failed to build the lens model")?;

        let registry = likelihood.registry();
        info!(
            parameters = registry.len(),
            derived = registry.derived_len(),
            regions = registry.regions().len(),
            visibilities = likelihood.observations().len(),
            method = ?config.likelihood,
            "model ready"
        );
        Ok(Self {
            config,
            likelihood: Arc::new(likelihood),
        })
    }

    fn checkpoint(&self) -> CsvConfig {
        let csv = CsvConfig::new(&self.config.output.path);
        match self.config.output.precision {
            Some(precision) => csv.with_precision(precision),
            None => csv,
        }
    }

    /// Sample for the configured number of iterations, rewriting the
    /// checkpoint after each one.
    pub fn run(self) -> Result<RunSummary> {
        let checkpoint = self.checkpoint();
        let registry = self.likelihood.registry();
        let sampler = &self.config.sampler;

        let prior = checkpoint.read().context("Failed to read the existing checkpoint")?;
        let (mut table, resumed) = match prior {
            Some(table) if table.len() >= 2 => {
                if table.columns() != registry.table_columns().as_slice() {
                    return Err(Error::checkpoint(
                        checkpoint.path(),
                        "columns do not match the configured model",
                    )
                    .into());
                }
                info!(
                    path = %checkpoint.path().display(),
                    rows = table.len(),
                    "resuming from checkpoint"
                );
                (table, true)
            }
            Some(table) => {
                warn!(
                    path = %checkpoint.path().display(),
                    rows = table.len(),
                    "checkpoint too short to resume from, starting over"
                );
                (PosteriorTable::new(registry.table_columns()), false)
            }
            None => (PosteriorTable::new(registry.table_columns()), false),
        };

        let mut rng = ChaCha8Rng::seed_from_u64(sampler.seed);
        let positions = registry
            .seed_walkers(sampler.nwalkers, resumed.then_some(&table), &mut rng)
            .context("Failed to place the initial walkers")?;

        let stretch = StretchMove::new(sampler.stretch_scale)?;
        info!(
            walkers = sampler.nwalkers,
            iterations = sampler.iterations,
            workers = sampler.parallelism.num_workers(),
            mode = ?sampler.parallelism,
            "sampling"
        );
        let mean_acceptance = match sampler.parallelism {
            Parallelism::Threads(n) => {
                let executor = ThreadExecutor::new(self.likelihood.clone(), n)?;
                self.sample(executor, stretch, positions, &mut table, &checkpoint)?
                    .1
            }
            Parallelism::Pool(n) => {
                let pool = WorkerPool::new(self.likelihood.clone(), n)?;
                let (pool, acceptance) =
                    self.sample(pool, stretch, positions, &mut table, &checkpoint)?;
                pool.shutdown()?;
                acceptance
            }
        };

        Ok(RunSummary {
            iterations: sampler.iterations,
            rows: table.len(),
            mean_acceptance,
            resumed,
            output: checkpoint.path().to_path_buf(),
        })
    }

    fn sample<E: Executor>(
        &self,
        executor: E,
        stretch: StretchMove,
        positions: Vec<Vec<f64>>,
        table: &mut PosteriorTable,
        checkpoint: &CsvConfig,
    ) -> Result<(E, f64)> {
        let settings = &self.config.sampler;
        let mut sampler = EnsembleSampler::new(executor, stretch, settings.seed, positions)
            .context("Failed to score the initial walkers")?;

        for _ in 0..settings.iterations {
            let progress = sampler.step().context("Sampling failed")?;
            let state = sampler.state();
            for ((log_prob, position), derived) in state
                .log_probs
                .iter()
                .zip(&state.positions)
                .zip(&state.derived)
            {
                table.append_sample(*log_prob, position, derived)?;
            }
            checkpoint
                .write(table)
                .with_context(|| format!("Failed to write {:?}", checkpoint.path()))?;
            info!(
                iteration = progress.iteration,
                acceptance = progress.mean_acceptance,
                lnprob = progress.mean_log_prob,
                elapsed_ms = progress.elapsed.as_millis() as u64,
                "iteration done"
            );
        }

        let acceptance = sampler.state().mean_acceptance_fraction();
        Ok((sampler.into_executor(), acceptance))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub iterations: u64,
    /// Rows in the checkpoint, including resumed ones.
    pub rows: usize,
    pub mean_acceptance: f64,
    pub resumed: bool,
    pub output: PathBuf,
}

/// Prepare and sample a fit described by `config`.
pub fn run(config: Config) -> Result<RunSummary> {
    Fit::prepare(config)?.run()
}
