//! Bayesian fitting of gravitationally lensed sources to interferometric
//! visibilities.
//!
//! A fit renders every sky region through its singular isothermal ellipsoid
//! lenses, Fourier samples the images at the observed `(u, v)` points and
//! explores the resulting posterior with an affine-invariant ensemble
//! sampler, checkpointing all walker states to CSV after every iteration.

pub(crate) mod config;
pub(crate) mod csv_storage;
pub(crate) mod error;
pub(crate) mod lens;
pub(crate) mod likelihood;
pub(crate) mod math;
pub(crate) mod model;
pub(crate) mod params;
pub(crate) mod pool;
pub(crate) mod predict;
pub(crate) mod render;
pub(crate) mod run;
pub(crate) mod sampler;
pub(crate) mod visibility;

pub use config::{
    Config, ImageConfig, LensConfig, OutputConfig, ParamSpec, Parallelism, RegionConfig,
    SamplerConfig, SourceConfig, WeightConfig,
};
pub use csv_storage::{CsvConfig, PosteriorTable};
pub use error::{Error, Result};
pub use lens::{GaussianSource, LightProfile, MassProfile, Morphology, SieLens, Source};
pub use likelihood::{LensLikelihood, LikelihoodMethod};
pub use model::{Evaluation, LogDensity};
pub use params::{
    Component, LensParam, ParamEntry, ParameterRegistry, RegionSlice, SourceParam, LENS_PARAMS,
    SOURCE_PARAMS,
};
pub use pool::{Request, WorkerPool};
pub use predict::{DirectFourier, VisibilityKernel};
pub use render::{Amplification, Image, RegionGeometry, RenderedRegion, WcsHeader, MAX_AMPLIFICATION};
pub use run::{run, Fit, RunSummary};
pub use sampler::{EnsembleSampler, EnsembleState, Executor, Progress, StretchMove, ThreadExecutor};
pub use visibility::{ObservationSet, PhaseCenter, SourceTable, Telescope, UvFile, UvHeader, Visibilities};
