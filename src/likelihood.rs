//! Posterior of the lens model given the observed visibilities.

use num_complex::Complex64;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::math::{chi_square, log_variance_sum};
use crate::model::{Evaluation, LogDensity};
use crate::params::ParameterRegistry;
use crate::predict::{DirectFourier, VisibilityKernel};
use crate::render::RegionGeometry;
use crate::visibility::ObservationSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LikelihoodMethod {
    /// `-½ Σ χ²`
    #[default]
    #[serde(rename = "chi-square")]
    ChiSquare,
    /// `-½ Σ (χ² + ln(2π σ²))`
    #[serde(rename = "chi-square+normalization")]
    ChiSquareNormalized,
}

/// Everything needed to score a walker position. Immutable once built and
/// shared between all evaluating threads.
#[derive(Debug)]
pub struct LensLikelihood<K = DirectFourier> {
    registry: ParameterRegistry,
    regions: Vec<RegionGeometry>,
    observations: ObservationSet,
    method: LikelihoodMethod,
    kernel: K,
    normalization: f64,
}

impl LensLikelihood<DirectFourier> {
    /// Validate the model declared in `config` against already loaded data.
    pub fn from_config(config: &Config, observations: ObservationSet) -> Result<Self> {
        let registry = ParameterRegistry::from_config(&config.regions)?;
        let cell = config.image.cell_size();
        let regions = config
            .regions
            .iter()
            .map(|r| RegionGeometry::new(r, cell))
            .collect::<Result<Vec<_>>>()?;
        Self::new(registry, regions, observations, config.likelihood)
    }

    pub fn new(
        registry: ParameterRegistry,
        regions: Vec<RegionGeometry>,
        observations: ObservationSet,
        method: LikelihoodMethod,
    ) -> Result<Self> {
        Self::with_kernel(registry, regions, observations, method, DirectFourier)
    }
}

impl<K: VisibilityKernel> LensLikelihood<K> {
    pub fn with_kernel(
        registry: ParameterRegistry,
        regions: Vec<RegionGeometry>,
        observations: ObservationSet,
        method: LikelihoodMethod,
        kernel: K,
    ) -> Result<Self> {
        let layout = registry.regions();
        if layout.len() != regions.len()
            || !layout.iter().zip(&regions).all(|(s, g)| g.matches(s))
        {
            return Err(Error::Config(
                "region geometry does not match the parameter layout".into(),
            ));
        }
        if observations.is_empty() {
            return Err(Error::Config("no visibilities with positive weight".into()));
        }
        let normalization = log_variance_sum(observations.weight());
        Ok(Self {
            registry,
            regions,
            observations,
            method,
            kernel,
            normalization,
        })
    }

    pub fn registry(&self) -> &ParameterRegistry {
        &self.registry
    }

    pub fn regions(&self) -> &[RegionGeometry] {
        &self.regions
    }

    pub fn observations(&self) -> &ObservationSet {
        &self.observations
    }

    /// Model visibilities and derived magnifications for a resolved
    /// parameter vector.
    pub fn predict(&self, full: &[f64]) -> Result<(Vec<Complex64>, Vec<f64>)> {
        let mut model = vec![Complex64::new(0., 0.); self.observations.len()];
        let mut derived = Vec::with_capacity(self.registry.derived_len());
        for (slice, geometry) in self.registry.regions().iter().zip(&self.regions) {
            let rendered = geometry.render(&full[slice.range()])?;
            self.kernel.accumulate(
                &rendered.lensed,
                geometry.header(),
                &self.observations,
                &mut model,
            )?;
            if let Some(amplification) = rendered.amplification {
                amplification.extend_derived(&mut derived);
            }
        }
        Ok((model, derived))
    }

    pub fn evaluate(&self, position: &[f64]) -> Result<Evaluation> {
        if !self.registry.in_bounds(position) {
            return Ok(Evaluation::rejected());
        }
        let full = self.registry.expand(position);
        let (model, derived) = self.predict(&full)?;

        let obs = &self.observations;
        let chi2 = chi_square(obs.real(), obs.imag(), obs.weight(), &model);
        let log_prob = match self.method {
            LikelihoodMethod::ChiSquare => -0.5 * chi2,
            LikelihoodMethod::ChiSquareNormalized => -0.5 * (chi2 + self.normalization),
        };
        let log_prob = if log_prob.is_nan() {
            f64::NEG_INFINITY
        } else {
            log_prob
        };
        Ok(Evaluation { log_prob, derived })
    }
}

impl<K: VisibilityKernel + 'static> LogDensity for LensLikelihood<K> {
    fn dim(&self) -> usize {
        self.registry.len()
    }

    fn log_prob(&self, position: &[f64]) -> Result<Evaluation> {
        self.evaluate(position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LensConfig, ParamSpec, RegionConfig, SourceConfig};
    use crate::visibility::{PhaseCenter, Visibilities};
    use approx::assert_abs_diff_eq;
    use pretty_assertions::assert_eq;

    const CENTER: PhaseCenter = PhaseCenter { ra: 150., dec: 2. };

    fn spec(lo: f64, hi: f64) -> ParamSpec {
        ParamSpec::new([lo, hi], [lo, hi])
    }

    fn source() -> SourceConfig {
        SourceConfig {
            morphology: "gaussian".into(),
            intrinsic_flux: spec(0., 10.),
            size: spec(0.01, 2.),
            delta_ra: spec(-1., 1.),
            delta_dec: spec(-1., 1.),
            axial_ratio: spec(0.1, 1.),
            position_angle: spec(0., 180.),
        }
    }

    fn lens() -> LensConfig {
        LensConfig {
            einstein_radius: spec(0.1, 2.),
            delta_ra: spec(-1., 1.),
            delta_dec: spec(-1., 1.),
            axial_ratio: spec(0.2, 1.),
            position_angle: spec(0., 180.),
        }
    }

    fn build(
        regions: Vec<RegionConfig>,
        truth: &[f64],
        method: LikelihoodMethod,
    ) -> LensLikelihood {
        let registry = ParameterRegistry::from_config(&regions).unwrap();
        let geometry: Vec<RegionGeometry> = regions
            .iter()
            .map(|r| RegionGeometry::new(r, 0.1).unwrap())
            .collect();

        let n = 100;
        let u: Vec<f64> = (0..n).map(|k| 4e4 * (k as f64 * 0.7).cos()).collect();
        let v: Vec<f64> = (0..n).map(|k| 4e4 * (k as f64 * 0.7).sin()).collect();
        let blank = Visibilities {
            u: u.clone(),
            v: v.clone(),
            real: vec![0.; n],
            imag: vec![0.; n],
            weight: vec![1.; n],
        };
        let scratch = LensLikelihood::new(
            registry.clone(),
            geometry.clone(),
            ObservationSet::new(blank, CENTER).unwrap(),
            method,
        )
        .unwrap();
        let (model, _) = scratch.predict(&registry.expand(truth)).unwrap();

        let data = Visibilities {
            u,
            v,
            real: model.iter().map(|m| m.re).collect(),
            imag: model.iter().map(|m| m.im).collect(),
            weight: vec![1.; n],
        };
        LensLikelihood::new(
            registry,
            geometry,
            ObservationSet::new(data, CENTER).unwrap(),
            method,
        )
        .unwrap()
    }

    fn unlensed_region() -> RegionConfig {
        RegionConfig {
            ra: CENTER.ra,
            dec: CENTER.dec,
            extent: 1.5,
            oversample: 1,
            lenses: vec![],
            sources: vec![source()],
        }
    }

    const SOURCE: [f64; 6] = [1., 0.3, 0., 0., 1., 0.];

    #[test]
    fn perfect_model_scores_zero() {
        let likelihood = build(vec![unlensed_region()], &SOURCE, LikelihoodMethod::ChiSquare);
        let eval = likelihood.evaluate(&SOURCE).unwrap();
        assert_abs_diff_eq!(eval.log_prob, 0., epsilon = 1e-9);
        assert!(eval.derived.is_empty());

        let worse = likelihood.evaluate(&[1.2, 0.3, 0., 0., 1., 0.]).unwrap();
        assert!(worse.log_prob < -1e-3);
    }

    #[test]
    fn normalization_adds_variance_term() {
        let likelihood = build(
            vec![unlensed_region()],
            &SOURCE,
            LikelihoodMethod::ChiSquareNormalized,
        );
        let eval = likelihood.evaluate(&SOURCE).unwrap();
        let expected = -0.5 * 200. * (2. * std::f64::consts::PI).ln();
        assert_abs_diff_eq!(eval.log_prob, expected, epsilon = 1e-6);
    }

    #[test]
    fn out_of_bounds_is_rejected() {
        let likelihood = build(vec![unlensed_region()], &SOURCE, LikelihoodMethod::ChiSquare);
        assert_eq!(
            likelihood.evaluate(&[11., 0.3, 0., 0., 1., 0.]).unwrap(),
            Evaluation::rejected()
        );
        assert_eq!(
            likelihood.evaluate(&[1., f64::NAN, 0., 0., 1., 0.]).unwrap(),
            Evaluation::rejected()
        );
    }

    #[test]
    fn lensed_region_reports_derived_values() {
        let lensed = RegionConfig {
            lenses: vec![lens()],
            sources: vec![source(), source()],
            ..unlensed_region()
        };
        let truth = [
            1., 0.1, 0., 0.8, 20., // lens
            1., 0.2, 0.05, 0., 1., 0., // first source
            0.5, 0.3, -0.4, 0.2, 0.7, 45., // second source
        ];
        let likelihood = build(
            vec![unlensed_region(), lensed],
            &[SOURCE.as_slice(), &truth].concat(),
            LikelihoodMethod::ChiSquare,
        );
        assert_eq!(likelihood.dim(), 6 + 5 + 12);

        let position = [SOURCE.as_slice(), &truth].concat();
        let eval = likelihood.evaluate(&position).unwrap();
        assert_abs_diff_eq!(eval.log_prob, 0., epsilon = 1e-8);
        assert_eq!(eval.derived.len(), likelihood.registry().derived_len());
        assert_eq!(eval.derived.len(), 6);
        assert!(eval.derived.iter().all(|&mu| (0. ..=100.).contains(&mu)));
    }

    #[test]
    fn fixed_offset_moves_with_its_reference() {
        let region = |linked: bool| {
            let mut second = source();
            if linked {
                second.delta_ra = spec(0.1, 0.5).fixed_to("DeltaRA_Source0_Region0");
            }
            RegionConfig {
                sources: vec![source(), second],
                ..unlensed_region()
            }
        };
        let position = [1., 0.3, 0.1, 0., 1., 0., 0.5, 0.2, 0.3, 0.1, 1., 0.];
        let mut resolved = position;
        resolved[8] = 0.4;

        let linked = build(vec![region(true)], &position, LikelihoodMethod::ChiSquare);
        let free = build(vec![region(false)], &resolved, LikelihoodMethod::ChiSquare);
        assert_abs_diff_eq!(linked.evaluate(&position).unwrap().log_prob, 0., epsilon = 1e-9);

        let mut moved = position;
        moved[2] = -0.2;
        let mut moved_resolved = resolved;
        moved_resolved[2] = -0.2;
        moved_resolved[8] = 0.1;
        let a = linked.evaluate(&moved).unwrap().log_prob;
        let b = free.evaluate(&moved_resolved).unwrap().log_prob;
        assert!(a < -1e-3);
        assert_abs_diff_eq!(a, b, epsilon = 1e-9);

        let literal = linked.evaluate(&resolved).unwrap().log_prob;
        assert!(literal < -1e-3);
    }

    #[test]
    fn mismatched_geometry_rejected() {
        let regions = vec![unlensed_region()];
        let registry = ParameterRegistry::from_config(&regions).unwrap();
        let data = Visibilities {
            u: vec![1.],
            v: vec![1.],
            real: vec![0.],
            imag: vec![0.],
            weight: vec![1.],
        };
        let result = LensLikelihood::new(
            registry,
            vec![],
            ObservationSet::new(data, CENTER).unwrap(),
            LikelihoodMethod::ChiSquare,
        );
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
