//! Flat parameter layout of a multi-region lens model.
//!
//! The registry expands the region / lens / source declarations into one
//! ordered vector: regions in order, each region's lenses first and then its
//! sources, every component contributing its parameters in the fixed kind
//! order below. All name lookups happen here, once, when the registry is
//! built; evaluation only ever sees indices.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use rand::Rng;
use rand_distr::{Distribution, Uniform};
use tracing::debug;

use crate::config::{ParamSpec, RegionConfig};
use crate::csv_storage::PosteriorTable;
use crate::error::{Error, Result};

/// Number of free parameters per lens.
pub const LENS_PARAMS: usize = 5;
/// Number of free parameters per source.
pub const SOURCE_PARAMS: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LensParam {
    EinsteinRadius,
    DeltaRa,
    DeltaDec,
    AxialRatio,
    PositionAngle,
}

impl LensParam {
    pub const ALL: [LensParam; LENS_PARAMS] = [
        LensParam::EinsteinRadius,
        LensParam::DeltaRa,
        LensParam::DeltaDec,
        LensParam::AxialRatio,
        LensParam::PositionAngle,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            LensParam::EinsteinRadius => "EinsteinRadius",
            LensParam::DeltaRa => "DeltaRA",
            LensParam::DeltaDec => "DeltaDec",
            LensParam::AxialRatio => "AxialRatio",
            LensParam::PositionAngle => "PositionAngle",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceParam {
    IntrinsicFlux,
    Size,
    DeltaRa,
    DeltaDec,
    AxialRatio,
    PositionAngle,
}

impl SourceParam {
    pub const ALL: [SourceParam; SOURCE_PARAMS] = [
        SourceParam::IntrinsicFlux,
        SourceParam::Size,
        SourceParam::DeltaRa,
        SourceParam::DeltaDec,
        SourceParam::AxialRatio,
        SourceParam::PositionAngle,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            SourceParam::IntrinsicFlux => "IntrinsicFlux",
            SourceParam::Size => "Size",
            SourceParam::DeltaRa => "DeltaRA",
            SourceParam::DeltaDec => "DeltaDec",
            SourceParam::AxialRatio => "AxialRatio",
            SourceParam::PositionAngle => "PositionAngle",
        }
    }
}

/// Which model component a parameter belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Component {
    Lens { index: usize, kind: LensParam },
    Source { index: usize, kind: SourceParam },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParamEntry {
    pub name: String,
    pub region: usize,
    pub component: Component,
    pub lower: f64,
    pub upper: f64,
    pub init_lo: f64,
    pub init_hi: f64,
    /// Index of the parameter this one is an offset from.
    pub fixed_to: Option<usize>,
}

impl fmt::Display for ParamEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} in [{}, {}], init [{}, {}]",
            self.name, self.lower, self.upper, self.init_lo, self.init_hi
        )
    }
}

/// The contiguous slice of the parameter vector owned by one region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegionSlice {
    pub offset: usize,
    pub nlens: usize,
    pub nsource: usize,
}

impl RegionSlice {
    pub fn width(&self) -> usize {
        LENS_PARAMS * self.nlens + SOURCE_PARAMS * self.nsource
    }

    pub fn range(&self) -> std::ops::Range<usize> {
        self.offset..self.offset + self.width()
    }

    /// Number of derived magnification values this region reports.
    pub fn derived_len(&self) -> usize {
        if self.nlens > 0 {
            2 * self.nsource + 2
        } else {
            0
        }
    }
}

#[derive(Debug, Clone)]
pub struct ParameterRegistry {
    entries: Vec<ParamEntry>,
    index: HashMap<String, usize>,
    lower: Vec<f64>,
    upper: Vec<f64>,
    regions: Vec<RegionSlice>,
}

pub fn lens_param_name(kind: LensParam, lens: usize, region: usize) -> String {
    format!("{}_Lens{}_Region{}", kind.name(), lens, region)
}

pub fn source_param_name(kind: SourceParam, source: usize, region: usize) -> String {
    format!("{}_Source{}_Region{}", kind.name(), source, region)
}

fn check_spec(name: &str, spec: &ParamSpec) -> Result<()> {
    let [lower, upper] = spec.bounds;
    let [lo, hi] = spec.init;
    if !(lower.is_finite() && upper.is_finite() && lo.is_finite() && hi.is_finite()) {
        return Err(Error::Config(format!("{}: bounds must be finite", name)));
    }
    if lower > upper {
        return Err(Error::Config(format!(
            "{}: lower bound {} exceeds upper bound {}",
            name, lower, upper
        )));
    }
    if lo > hi {
        return Err(Error::Config(format!(
            "{}: initial range [{}, {}] is reversed",
            name, lo, hi
        )));
    }
    Ok(())
}

/// The SIE profile needs `b > 0` and `0 < q <= 1` over the whole resolved range.
fn check_lens_support(entry: &ParamEntry, lower: f64, upper: f64) -> Result<()> {
    let valid = match entry.component {
        Component::Lens {
            kind: LensParam::EinsteinRadius,
            ..
        } => lower > 0.,
        Component::Lens {
            kind: LensParam::AxialRatio,
            ..
        } => lower > 0. && upper <= 1.,
        _ => true,
    };
    if valid {
        Ok(())
    } else {
        let support = match entry.component {
            Component::Lens {
                kind: LensParam::EinsteinRadius,
                ..
            } => "(0, inf)",
            _ => "(0, 1]",
        };
        Err(Error::Config(format!(
            "{} may take values in [{}, {}], outside {}",
            entry.name, lower, upper, support
        )))
    }
}

impl ParameterRegistry {
    pub fn from_config(regions: &[RegionConfig]) -> Result<Self> {
        let mut entries = Vec::new();
        let mut references = Vec::new();
        let mut slices = Vec::with_capacity(regions.len());

        for (r, region) in regions.iter().enumerate() {
            let offset = entries.len();
            let lenses = region.lenses.iter().enumerate().flat_map(|(i, lens)| {
                LensParam::ALL.into_iter().map(move |kind| {
                    (
                        lens_param_name(kind, i, r),
                        Component::Lens { index: i, kind },
                        lens.spec(kind),
                    )
                })
            });
            let sources = region.sources.iter().enumerate().flat_map(|(i, source)| {
                SourceParam::ALL.into_iter().map(move |kind| {
                    (
                        source_param_name(kind, i, r),
                        Component::Source { index: i, kind },
                        source.spec(kind),
                    )
                })
            });

            for (name, component, spec) in lenses.chain(sources) {
                check_spec(&name, spec)?;
                references.push(spec.fixed_to.clone());
                entries.push(ParamEntry {
                    name,
                    region: r,
                    component,
                    lower: spec.bounds[0],
                    upper: spec.bounds[1],
                    init_lo: spec.init[0],
                    init_hi: spec.init[1],
                    fixed_to: None,
                });
            }

            slices.push(RegionSlice {
                offset,
                nlens: region.lenses.len(),
                nsource: region.sources.len(),
            });
        }

        let mut index = HashMap::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            if index.insert(entry.name.clone(), i).is_some() {
                return Err(Error::Config(format!("duplicate parameter {}", entry.name)));
            }
        }

        for (i, reference) in references.iter().enumerate() {
            let Some(target) = reference else {
                continue;
            };
            let Some(&j) = index.get(target.as_str()) else {
                return Err(Error::Config(format!(
                    "{} is fixed to unknown parameter '{}'",
                    entries[i].name, target
                )));
            };
            if j == i {
                return Err(Error::Config(format!(
                    "{} is fixed to itself",
                    entries[i].name
                )));
            }
            entries[i].fixed_to = Some(j);
        }

        // Substitution is a single pass, so a reference must point at a free parameter.
        for entry in entries.iter() {
            if let Some(j) = entry.fixed_to {
                if let Some(k) = entries[j].fixed_to {
                    return Err(Error::Config(format!(
                        "{} is fixed to {}, which is itself fixed to {}",
                        entry.name, entries[j].name, entries[k].name
                    )));
                }
            }
        }

        for entry in entries.iter() {
            let (mut lower, mut upper) = (entry.lower, entry.upper);
            if let Some(j) = entry.fixed_to {
                lower += entries[j].lower;
                upper += entries[j].upper;
            }
            check_lens_support(entry, lower, upper)?;
        }

        let lower = entries.iter().map(|e| e.lower).collect();
        let upper = entries.iter().map(|e| e.upper).collect();

        debug!(
            parameters = entries.len(),
            regions = slices.len(),
            fixed = entries.iter().filter(|e| e.fixed_to.is_some()).count(),
            "built parameter registry"
        );

        Ok(Self {
            entries,
            index,
            lower,
            upper,
            regions: slices,
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[ParamEntry] {
        &self.entries
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.name.as_str())
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.index.get(name).copied()
    }

    pub fn lower(&self) -> &[f64] {
        &self.lower
    }

    pub fn upper(&self) -> &[f64] {
        &self.upper
    }

    pub fn regions(&self) -> &[RegionSlice] {
        &self.regions
    }

    /// Resolved fixed-reference map, `None` for free parameters.
    pub fn fixed_map(&self) -> Vec<Option<usize>> {
        self.entries.iter().map(|e| e.fixed_to).collect()
    }

    /// Whether every coordinate is a number inside its bounds.
    pub fn in_bounds(&self, position: &[f64]) -> bool {
        position.len() == self.len()
            && position
                .iter()
                .zip(self.lower.iter().zip(self.upper.iter()))
                .all(|(&v, (&lo, &hi))| !v.is_nan() && v >= lo && v <= hi)
    }

    /// Apply the fixed-parameter offsets to a walker position.
    ///
    /// A fixed parameter's value is its own coordinate plus the coordinate of
    /// the parameter it references.
    pub fn expand(&self, position: &[f64]) -> Vec<f64> {
        let mut out = position.to_vec();
        for (i, entry) in self.entries.iter().enumerate() {
            if let Some(j) = entry.fixed_to {
                out[i] = position[i] + position[j];
            }
        }
        out
    }

    /// Column names of the derived magnification values, in the order the
    /// likelihood reports them.
    pub fn derived_names(&self) -> Vec<String> {
        let mut names = Vec::new();
        for (r, region) in self.regions.iter().enumerate() {
            if region.nlens == 0 {
                continue;
            }
            for s in 0..region.nsource {
                names.push(format!("mu_tot.Source{}.Region{}", s, r));
                names.push(format!("mu_aper.Source{}.Region{}", s, r));
            }
            names.push(format!("mu_tot.Region{}", r));
            names.push(format!("mu_aper.Region{}", r));
        }
        names
    }

    pub fn derived_len(&self) -> usize {
        self.regions.iter().map(|r| r.derived_len()).sum()
    }

    /// Full column schema of a posterior table for this layout.
    pub fn table_columns(&self) -> Vec<String> {
        std::iter::once("lnprob".to_string())
            .chain(self.names().map(str::to_string))
            .chain(self.derived_names())
            .collect()
    }

    /// Draw `nwalkers` positions uniformly from the initial ranges.
    pub fn sample_initial<R: Rng + ?Sized>(
        &self,
        nwalkers: usize,
        rng: &mut R,
    ) -> Result<Vec<Vec<f64>>> {
        let dists: Vec<Uniform<f64>> = self
            .entries
            .iter()
            .map(|e| {
                Uniform::new_inclusive(e.init_lo, e.init_hi)
                    .map_err(|err| Error::Config(format!("{}: {}", e.name, err)))
            })
            .collect::<Result<_>>()?;

        Ok((0..nwalkers)
            .map(|_| dists.iter().map(|d| d.sample(rng)).collect())
            .collect())
    }

    /// Take walker positions from the last `nwalkers` rows of a posterior table.
    pub fn positions_from_table(
        &self,
        table: &PosteriorTable,
        nwalkers: usize,
    ) -> Result<Vec<Vec<f64>>> {
        let columns = table.columns();
        let found = columns.iter().skip(1).take(self.len());
        if columns.len() < self.len() + 1 || !found.clone().eq(self.names()) {
            return Err(Error::Config(format!(
                "posterior table columns {:?} do not match the model parameters",
                columns
            )));
        }
        if table.len() < nwalkers {
            return Err(Error::checkpoint(
                table.source().unwrap_or(Path::new("posterior table")),
                format!(
                    "holds {} rows, fewer than the {} walkers to resume",
                    table.len(),
                    nwalkers
                ),
            ));
        }
        Ok(table
            .tail(nwalkers)
            .into_iter()
            .map(|row| row[1..=self.len()].to_vec())
            .collect())
    }

    /// Mirror out-of-bounds coordinates back across the violated bound.
    ///
    /// Applied once per coordinate, upper bound first.
    pub fn reflect_into_bounds(&self, position: &mut [f64]) {
        for ((v, &lo), &hi) in position.iter_mut().zip(&self.lower).zip(&self.upper) {
            if *v > hi {
                *v = 2. * hi - *v;
            }
            if *v < lo {
                *v = 2. * lo - *v;
            }
        }
    }

    /// Starting positions of the ensemble.
    ///
    /// A prior posterior table with at least two rows takes precedence over
    /// the initial ranges.
    pub fn seed_walkers<R: Rng + ?Sized>(
        &self,
        nwalkers: usize,
        prior: Option<&PosteriorTable>,
        rng: &mut R,
    ) -> Result<Vec<Vec<f64>>> {
        let mut positions = match prior {
            Some(table) if table.len() >= 2 => self.positions_from_table(table, nwalkers)?,
            _ => self.sample_initial(nwalkers, rng)?,
        };
        for position in positions.iter_mut() {
            self.reflect_into_bounds(position);
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LensConfig, SourceConfig};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    fn spec(lo: f64, hi: f64) -> ParamSpec {
        ParamSpec::new([lo, hi], [lo, hi])
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

    fn source() -> SourceConfig {
        SourceConfig {
            morphology: "gaussian".into(),
            intrinsic_flux: spec(0., 10.),
            size: spec(0.01, 1.),
            delta_ra: spec(-1., 1.),
            delta_dec: spec(-1., 1.),
            axial_ratio: spec(0.2, 1.),
            position_angle: spec(0., 180.),
        }
    }

    fn region(nlens: usize, nsource: usize) -> RegionConfig {
        RegionConfig {
            ra: 10.,
            dec: 20.,
            extent: 1.,
            oversample: 1,
            lenses: (0..nlens).map(|_| lens()).collect(),
            sources: (0..nsource).map(|_| source()).collect(),
        }
    }

    #[test]
    fn two_region_layout() {
        let registry = ParameterRegistry::from_config(&[region(1, 2), region(0, 1)]).unwrap();
        assert_eq!(registry.len(), 5 + 12 + 6);

        let names: Vec<&str> = registry.names().collect();
        assert_eq!(names[0], "EinsteinRadius_Lens0_Region0");
        assert_eq!(names[4], "PositionAngle_Lens0_Region0");
        assert_eq!(names[5], "IntrinsicFlux_Source0_Region0");
        assert_eq!(names[11], "IntrinsicFlux_Source1_Region0");
        assert_eq!(names[17], "IntrinsicFlux_Source0_Region1");
        assert_eq!(names[22], "PositionAngle_Source0_Region1");

        let regions = registry.regions();
        assert_eq!(regions[0].range(), 0..17);
        assert_eq!(regions[1].range(), 17..23);
        assert_eq!(registry.index_of("DeltaDec_Source0_Region1"), Some(20));
    }

    #[test]
    fn derived_columns_only_for_lensed_regions() {
        let registry =
            ParameterRegistry::from_config(&[region(0, 1), region(2, 2), region(0, 3)]).unwrap();
        assert_eq!(
            registry.derived_names(),
            vec![
                "mu_tot.Source0.Region1",
                "mu_aper.Source0.Region1",
                "mu_tot.Source1.Region1",
                "mu_aper.Source1.Region1",
                "mu_tot.Region1",
                "mu_aper.Region1",
            ]
        );
        assert_eq!(registry.derived_len(), 6);
        let columns = registry.table_columns();
        assert_eq!(columns[0], "lnprob");
        assert_eq!(columns.len(), 1 + registry.len() + 6);
    }

    #[test]
    fn fixed_reference_is_an_offset() {
        let mut config = region(1, 1);
        config.sources[0].delta_ra = ParamSpec::new([0., 0.], [0., 0.]).fixed_to("DeltaRA_Lens0_Region0");
        config.sources[0].delta_dec =
            ParamSpec::new([-0.1, 0.1], [0., 0.]).fixed_to("DeltaDec_Lens0_Region0");
        let registry = ParameterRegistry::from_config(&[config]).unwrap();

        let fixed = registry.fixed_map();
        assert_eq!(fixed[7], Some(1));
        assert_eq!(fixed[8], Some(2));
        assert_eq!(fixed.iter().filter(|f| f.is_some()).count(), 2);

        let mut position = vec![1., 0.3, -0.2, 0.8, 40., 2., 0.2, 0., 0.05, 0.9, 10.];
        let expanded = registry.expand(&position);
        assert_eq!(expanded[7], 0.3);
        assert!((expanded[8] - -0.15).abs() < 1e-15);
        position[7] = 0.;
        assert_eq!(registry.expand(&position)[..7], position[..7]);
    }

    #[test]
    fn lens_bounds_must_stay_in_support() {
        let mut config = region(1, 1);
        config.lenses[0].einstein_radius = spec(-2., 2.);
        let err = ParameterRegistry::from_config(&[config]).unwrap_err();
        assert!(matches!(&err, Error::Config(m) if m.contains("EinsteinRadius_Lens0_Region0")));

        let mut config = region(1, 1);
        config.lenses[0].einstein_radius = spec(0., 2.);
        assert!(ParameterRegistry::from_config(&[config]).is_err());

        let mut config = region(1, 1);
        config.lenses[0].axial_ratio = spec(0., 1.);
        assert!(ParameterRegistry::from_config(&[config]).is_err());

        let mut config = region(1, 1);
        config.lenses[0].axial_ratio = spec(0.2, 3.);
        let err = ParameterRegistry::from_config(&[config]).unwrap_err();
        assert!(matches!(&err, Error::Config(m) if m.contains("AxialRatio_Lens0_Region0")));

        let mut config = region(2, 1);
        config.lenses[1].axial_ratio =
            ParamSpec::new([0., 0.], [0., 0.]).fixed_to("AxialRatio_Lens0_Region0");
        assert!(ParameterRegistry::from_config(&[config.clone()]).is_ok());
        config.lenses[1].axial_ratio =
            ParamSpec::new([0., 0.5], [0., 0.]).fixed_to("AxialRatio_Lens0_Region0");
        assert!(ParameterRegistry::from_config(&[config]).is_err());

        let mut config = region(0, 1);
        config.sources[0].axial_ratio = spec(0.2, 3.);
        assert!(ParameterRegistry::from_config(&[config]).is_ok());
    }

    #[test]
    fn chained_reference_rejected() {
        let mut config = region(1, 1);
        config.lenses[0].delta_dec = spec(-1., 1.).fixed_to("DeltaRA_Lens0_Region0");
        config.sources[0].delta_dec = spec(-1., 1.).fixed_to("DeltaDec_Lens0_Region0");
        let err = ParameterRegistry::from_config(&[config]).unwrap_err();
        assert!(matches!(err, Error::Config(_)), "{}", err);
    }

    #[test]
    fn unknown_or_self_reference_rejected() {
        let mut config = region(0, 1);
        config.sources[0].size = spec(0., 1.).fixed_to("Size_Source3_Region0");
        assert!(matches!(
            ParameterRegistry::from_config(&[config]),
            Err(Error::Config(_))
        ));

        let mut config = region(0, 1);
        config.sources[0].size = spec(0., 1.).fixed_to("Size_Source0_Region0");
        assert!(matches!(
            ParameterRegistry::from_config(&[config]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn reversed_bounds_rejected() {
        let mut config = region(0, 1);
        config.sources[0].size = ParamSpec::new([1., 0.], [0.5, 0.5]);
        assert!(matches!(
            ParameterRegistry::from_config(&[config]),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn bounds_check_rejects_nan() {
        let registry = ParameterRegistry::from_config(&[region(0, 1)]).unwrap();
        let mut position = vec![1., 0.1, 0., 0., 0.5, 10.];
        assert!(registry.in_bounds(&position));
        position[2] = f64::NAN;
        assert!(!registry.in_bounds(&position));
        position[2] = 1.0000001;
        assert!(!registry.in_bounds(&position));
    }

    #[test]
    fn initial_positions_within_init_ranges() {
        let mut config = region(1, 1);
        config.lenses[0].einstein_radius = ParamSpec::new([0.1, 2.], [0.5, 0.6]);
        config.sources[0].axial_ratio = ParamSpec::new([0.2, 1.], [0.7, 0.7]);
        let registry = ParameterRegistry::from_config(&[config]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        let positions = registry.seed_walkers(32, None, &mut rng).unwrap();
        assert_eq!(positions.len(), 32);
        for position in positions {
            assert_eq!(position.len(), registry.len());
            assert!((0.5..=0.6).contains(&position[0]));
            assert_eq!(position[9], 0.7);
            assert!(registry.in_bounds(&position));
        }
    }

    #[test]
    fn resume_takes_table_tail() {
        let registry = ParameterRegistry::from_config(&[region(0, 1)]).unwrap();
        let mut table = PosteriorTable::new(registry.table_columns());
        for i in 0..10 {
            let x = i as f64;
            table
                .append_row(&[-x, x, 0.1, 0., 0., 0.5, 10.])
                .unwrap();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let positions = registry.seed_walkers(4, Some(&table), &mut rng).unwrap();
        let fluxes: Vec<f64> = positions.iter().map(|p| p[0]).collect();
        assert_eq!(fluxes, vec![6., 7., 8., 9.]);
        assert_eq!(positions[0], vec![6., 0.1, 0., 0., 0.5, 10.]);

        assert!(matches!(
            registry.seed_walkers(11, Some(&table), &mut rng),
            Err(Error::Checkpoint { .. })
        ));
    }

    #[test]
    fn single_row_table_is_not_resumed() {
        let registry = ParameterRegistry::from_config(&[region(0, 1)]).unwrap();
        let mut table = PosteriorTable::new(registry.table_columns());
        table.append_row(&[0., 99., 0.1, 0., 0., 0.5, 10.]).unwrap();
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        let positions = registry.seed_walkers(4, Some(&table), &mut rng).unwrap();
        assert!(positions.iter().all(|p| p[0] <= 10.));
    }

    #[test]
    fn mismatched_table_schema_rejected() {
        let registry = ParameterRegistry::from_config(&[region(0, 1)]).unwrap();
        let mut columns = registry.table_columns();
        columns.swap(1, 2);
        let mut table = PosteriorTable::new(columns);
        for _ in 0..4 {
            table.append_row(&[0., 1., 0.1, 0., 0., 0.5, 10.]).unwrap();
        }
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert!(matches!(
            registry.seed_walkers(4, Some(&table), &mut rng),
            Err(Error::Config(_))
        ));
    }

    proptest! {
        #[test]
        fn reflection_lands_inside(
            lo in -10f64..10.,
            width in 0.5f64..10.,
            excess in 0f64..0.5,
            above in any::<bool>(),
        ) {
            let hi = lo + width;
            let mut config = region(0, 1);
            config.sources[0].size = ParamSpec::new([lo, hi], [lo, hi]);
            let registry = ParameterRegistry::from_config(&[config]).unwrap();

            let bound = if above { hi } else { lo };
            let v = if above { hi + excess } else { lo - excess };
            let mut position = vec![1., v, 0., 0., 0.5, 10.];
            registry.reflect_into_bounds(&mut position);

            let reflected = position[1];
            prop_assert!(reflected >= lo - 1e-12 && reflected <= hi + 1e-12);
            prop_assert!(((reflected - bound).abs() - (v - bound).abs()).abs() < 1e-9);
            prop_assert!(registry.in_bounds(&[1., reflected.clamp(lo, hi), 0., 0., 0.5, 10.]));
        }
    }
}
