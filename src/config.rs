//! Run configuration.
//!
//! A fit is described by a single TOML document that is parsed once at
//! startup into an immutable [`Config`] and then passed by reference to the
//! parameter registry, the renderer and the likelihood evaluator.
//!
//! ```toml
//! visibility_files = ["target.uvfits.json"]
//! likelihood = "chi-square"
//!
//! [image]
//! cdelt1 = -5.555555e-5
//!
//! [[regions]]
//! ra = 150.10
//! dec = 2.21
//! extent = 1.5
//! oversample = 2
//!
//! [[regions.lenses]]
//! EinsteinRadius = { bounds = [0.2, 2.0], init = [0.8, 1.0] }
//! DeltaRA = { bounds = [-0.5, 0.5], init = [-0.1, 0.1] }
//! DeltaDec = { bounds = [-0.5, 0.5], init = [-0.1, 0.1] }
//! AxialRatio = { bounds = [0.3, 1.0], init = [0.7, 0.9] }
//! PositionAngle = { bounds = [0.0, 180.0], init = [20.0, 60.0] }
//!
//! [[regions.sources]]
//! morphology = "gaussian"
//! IntrinsicFlux = { bounds = [0.1, 20.0], init = [2.0, 4.0] }
//! Size = { bounds = [0.01, 1.0], init = [0.1, 0.3] }
//! DeltaRA = { bounds = [-0.5, 0.5], init = [-0.1, 0.1] }
//! DeltaDec = { bounds = [-0.5, 0.5], init = [-0.1, 0.1] }
//! AxialRatio = { bounds = [0.2, 1.0], init = [0.5, 0.9] }
//! PositionAngle = { bounds = [0.0, 180.0], init = [0.0, 180.0] }
//! ```

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::likelihood::LikelihoodMethod;
use crate::params::{LensParam, SourceParam};

/// Bounds, initial range and optional link of one model parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    /// Hard prior bounds `[lower, upper]`.
    pub bounds: [f64; 2],
    /// Range `[lo, hi]` the walkers are drawn from at the start of a fresh run.
    pub init: [f64; 2],
    /// Name of another parameter this one is an offset from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fixed_to: Option<String>,
}

impl ParamSpec {
    pub fn new(bounds: [f64; 2], init: [f64; 2]) -> Self {
        Self {
            bounds,
            init,
            fixed_to: None,
        }
    }

    pub fn fixed_to(mut self, name: impl Into<String>) -> Self {
        self.fixed_to = Some(name.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LensConfig {
    #[serde(rename = "EinsteinRadius")]
    pub einstein_radius: ParamSpec,
    #[serde(rename = "DeltaRA")]
    pub delta_ra: ParamSpec,
    #[serde(rename = "DeltaDec")]
    pub delta_dec: ParamSpec,
    #[serde(rename = "AxialRatio")]
    pub axial_ratio: ParamSpec,
    #[serde(rename = "PositionAngle")]
    pub position_angle: ParamSpec,
}

impl LensConfig {
    pub fn spec(&self, kind: LensParam) -> &ParamSpec {
        match kind {
            LensParam::EinsteinRadius => &self.einstein_radius,
            LensParam::DeltaRa => &self.delta_ra,
            LensParam::DeltaDec => &self.delta_dec,
            LensParam::AxialRatio => &self.axial_ratio,
            LensParam::PositionAngle => &self.position_angle,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Light profile tag. Only `gaussian` is understood by the renderer.
    #[serde(default = "default_morphology")]
    pub morphology: String,
    #[serde(rename = "IntrinsicFlux")]
    pub intrinsic_flux: ParamSpec,
    #[serde(rename = "Size")]
    pub size: ParamSpec,
    #[serde(rename = "DeltaRA")]
    pub delta_ra: ParamSpec,
    #[serde(rename = "DeltaDec")]
    pub delta_dec: ParamSpec,
    #[serde(rename = "AxialRatio")]
    pub axial_ratio: ParamSpec,
    #[serde(rename = "PositionAngle")]
    pub position_angle: ParamSpec,
}

fn default_morphology() -> String {
    "gaussian".to_string()
}

impl SourceConfig {
    pub fn spec(&self, kind: SourceParam) -> &ParamSpec {
        match kind {
            SourceParam::IntrinsicFlux => &self.intrinsic_flux,
            SourceParam::Size => &self.size,
            SourceParam::DeltaRa => &self.delta_ra,
            SourceParam::DeltaDec => &self.delta_dec,
            SourceParam::AxialRatio => &self.axial_ratio,
            SourceParam::PositionAngle => &self.position_angle,
        }
    }
}

/// One sky patch that gets its own rendered image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionConfig {
    /// Centroid right ascension in degrees.
    pub ra: f64,
    /// Centroid declination in degrees.
    pub dec: f64,
    /// Half-width of the rendered patch in arcseconds.
    pub extent: f64,
    #[serde(default = "default_oversample")]
    pub oversample: usize,
    #[serde(default)]
    pub lenses: Vec<LensConfig>,
    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

fn default_oversample() -> usize {
    1
}

/// The part of the reference image header the model grid is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ImageConfig {
    /// Pixel increment along the first axis, in degrees.
    pub cdelt1: f64,
}

impl ImageConfig {
    /// Native cell size in arcseconds.
    pub fn cell_size(&self) -> f64 {
        (self.cdelt1 * 3600.).abs()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Parallelism {
    /// Evaluate walkers on a shared-memory thread pool of this size.
    Threads(usize),
    /// Dispatch evaluations to this many coordinator-driven workers.
    /// Workers are threads of this process rather than separate processes.
    Pool(usize),
}

impl Default for Parallelism {
    fn default() -> Self {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Parallelism::Threads(cores)
    }
}

impl Parallelism {
    pub fn num_workers(&self) -> usize {
        match *self {
            Parallelism::Threads(n) | Parallelism::Pool(n) => n.max(1),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub nwalkers: usize,
    pub iterations: u64,
    pub seed: u64,
    /// Scale parameter `a` of the stretch move.
    pub stretch_scale: f64,
    pub parallelism: Parallelism,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            nwalkers: 32,
            iterations: 10000,
            seed: 0,
            stretch_scale: 2.0,
            parallelism: Parallelism::default(),
        }
    }
}

/// Weight preprocessing applied to every visibility file as it is loaded,
/// in field order.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WeightConfig {
    /// Channel ranges `[start, end)` whose weights are set to zero.
    pub exclude_channels: Vec<[usize; 2]>,
    /// Replace the weights by the inverse variance of each visibility's
    /// spread across its unflagged channels.
    pub from_scatter: bool,
    /// Scale the weights so that `sum(w * (re^2 + im^2))` equals the number
    /// of real and imaginary values with positive weight.
    pub rescale: bool,
}

impl WeightConfig {
    pub fn is_identity(&self) -> bool {
        self.exclude_channels.is_empty() && !self.from_scatter && !self.rescale
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Checkpoint file, rewritten after every iteration.
    pub path: PathBuf,
    /// Decimal places written for floating point values. Unset writes the
    /// shortest text that reads back to the same value.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub precision: Option<usize>,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("posteriorpdf.csv"),
            precision: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    pub visibility_files: Vec<PathBuf>,
    #[serde(default)]
    pub weights: WeightConfig,
    #[serde(default)]
    pub likelihood: LikelihoodMethod,
    pub image: ImageConfig,
    pub regions: Vec<RegionConfig>,
    #[serde(default)]
    pub sampler: SamplerConfig,
    #[serde(default)]
    pub output: OutputConfig,
}

impl Config {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: Config = toml::from_str(text).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read a configuration file. Relative data and output paths are taken
    /// relative to the directory holding the file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let mut config = Self::from_toml_str(&text)?;
        if let Some(base) = path.parent() {
            config.rebase(base);
        }
        Ok(config)
    }

    fn rebase(&mut self, base: &Path) {
        for file in self.visibility_files.iter_mut() {
            if file.is_relative() {
                *file = base.join(&*file);
            }
        }
        if self.output.path.is_relative() {
            self.output.path = base.join(&self.output.path);
        }
    }

    fn validate(&self) -> Result<()> {
        if self.visibility_files.is_empty() {
            return Err(Error::Config("no visibility files given".into()));
        }
        if !(self.image.cell_size() > 0.) || !self.image.cdelt1.is_finite() {
            return Err(Error::Config(format!(
                "reference image cell size must be positive, got cdelt1 = {}",
                self.image.cdelt1
            )));
        }
        if let Some([start, end]) = self
            .weights
            .exclude_channels
            .iter()
            .find(|[start, end]| start >= end)
        {
            return Err(Error::Config(format!(
                "excluded channel range [{}, {}) is empty",
                start, end
            )));
        }
        if self.regions.is_empty() {
            return Err(Error::Config("at least one region is required".into()));
        }
        for (i, region) in self.regions.iter().enumerate() {
            if region.sources.is_empty() {
                return Err(Error::Config(format!("region {} declares no sources", i)));
            }
            if region.oversample == 0 {
                return Err(Error::Config(format!("region {} has oversample = 0", i)));
            }
            if !(region.extent > 0.) {
                return Err(Error::Config(format!(
                    "region {} needs a positive extent, got {}",
                    i, region.extent
                )));
            }
        }
        let sampler = &self.sampler;
        if sampler.nwalkers < 2 || sampler.nwalkers % 2 != 0 {
            return Err(Error::Config(format!(
                "the ensemble needs an even number of at least 2 walkers, got {}",
                sampler.nwalkers
            )));
        }
        if !(sampler.stretch_scale > 1.) {
            return Err(Error::Config(format!(
                "stretch scale must be > 1, got {}",
                sampler.stretch_scale
            )));
        }
        Ok(())
    }
}
