use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while setting up or running a fit.
///
/// Everything except [`Error::Evaluation`] and [`Error::WorkerPool`] happens
/// before the first sampler iteration, so no checkpoint is touched.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or inconsistent region, lens or source declarations.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Unsupported visibility format '{tag}' in {path}")]
    UnsupportedFormat { tag: String, path: PathBuf },

    #[error("Malformed visibility data in {path}: {reason}")]
    MalformedData { path: PathBuf, reason: String },

    #[error("Unknown source morphology '{0}'")]
    UnknownMorphology(String),

    #[error("Could not use posterior checkpoint {path}: {reason}")]
    Checkpoint { path: PathBuf, reason: String },

    #[error("I/O error on {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An unexpected numerical fault inside the forward model.
    #[error("Likelihood evaluation failed: {0}")]
    Evaluation(String),

    #[error("Worker pool failure: {0}")]
    WorkerPool(String),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::MalformedData {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn checkpoint(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Error::Checkpoint {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
