//! Ray-traced surface brightness images of one region.

use crate::config::RegionConfig;
use crate::error::{Error, Result};
use crate::lens::{LightProfile, MassProfile, Morphology, SieLens, Source};
use crate::params::{RegionSlice, LENS_PARAMS, SOURCE_PARAMS};

/// Amplification ratios are clipped to this value.
pub const MAX_AMPLIFICATION: f64 = 100.;

/// Sky projection of a region image, `RA---SIN` / `DEC--SIN`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WcsHeader {
    pub naxis1: usize,
    pub naxis2: usize,
    pub crpix1: f64,
    pub crpix2: f64,
    /// Degrees per pixel, negative so x grows toward increasing RA.
    pub cdelt1: f64,
    pub cdelt2: f64,
    pub crval1: f64,
    pub crval2: f64,
}

impl WcsHeader {
    /// Offset of pixel column `i` (zero based) from the reference position, in arcsec.
    pub fn x_offset(&self, i: usize) -> f64 {
        (i as f64 + 1. - self.crpix1) * self.cdelt1 * 3600.
    }

    /// Offset of pixel row `j` (zero based) from the reference position, in arcsec.
    pub fn y_offset(&self, j: usize) -> f64 {
        (j as f64 + 1. - self.crpix2) * self.cdelt2 * 3600.
    }

    pub fn pixel_area(&self) -> f64 {
        (self.cdelt1 * self.cdelt2).abs() * 3600. * 3600.
    }
}

/// Row-major image, `ny` rows of `nx` pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    pub nx: usize,
    pub ny: usize,
    pub data: Vec<f64>,
}

impl Image {
    pub fn zeros(nx: usize, ny: usize) -> Self {
        Self {
            nx,
            ny,
            data: vec![0.; nx * ny],
        }
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[j * self.nx + i]
    }

    pub fn rows(&self) -> std::slice::ChunksExact<'_, f64> {
        self.data.chunks_exact(self.nx)
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    /// Sum of the pixels where `mask` is non-zero.
    pub fn masked_sum(&self, mask: &Image) -> f64 {
        self.data
            .iter()
            .zip(&mask.data)
            .filter(|(_, &m)| m != 0.)
            .map(|(&v, _)| v)
            .sum()
    }
}

fn clip_amplification(ratio: f64) -> f64 {
    if ratio.is_nan() {
        MAX_AMPLIFICATION
    } else {
        ratio.min(MAX_AMPLIFICATION)
    }
}

/// Magnification diagnostics of a lensed region.
#[derive(Debug, Clone, PartialEq)]
pub struct Amplification {
    pub source_total: Vec<f64>,
    pub source_aperture: Vec<f64>,
    pub total: f64,
    pub aperture: f64,
}

impl Amplification {
    /// Append in reporting order: all source totals, all source apertures,
    /// then the region total and aperture values.
    pub fn extend_derived(&self, out: &mut Vec<f64>) {
        out.extend_from_slice(&self.source_total);
        out.extend_from_slice(&self.source_aperture);
        out.push(self.total);
        out.push(self.aperture);
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedRegion {
    pub unlensed: Image,
    pub lensed: Image,
    pub unlensed_aperture: Image,
    pub lensed_aperture: Image,
    /// `None` for regions without lenses.
    pub amplification: Option<Amplification>,
}

/// Fixed geometry of one region: its grid, projection and component layout.
#[derive(Debug, Clone)]
pub struct RegionGeometry {
    header: WcsHeader,
    x: Vec<f64>,
    y: Vec<f64>,
    nlens: usize,
    morphologies: Vec<Morphology>,
}

impl RegionGeometry {
    /// Lay out the grid of a region for a reference image of `cell_size` arcsec.
    pub fn new(region: &RegionConfig, cell_size: f64) -> Result<Self> {
        let morphologies = region
            .sources
            .iter()
            .map(|s| s.morphology.parse())
            .collect::<Result<Vec<Morphology>>>()?;

        let native = (2. * region.extent / cell_size).round();
        if !(native >= 1.) {
            return Err(Error::Config(format!(
                "region at ({}, {}) is smaller than one {} arcsec cell",
                region.ra, region.dec, cell_size
            )));
        }
        let n = region.oversample * native as usize;
        let crpix = (n / 2 + 1) as f64;
        let cdelt = cell_size / 3600. / region.oversample as f64;

        let header = WcsHeader {
            naxis1: n,
            naxis2: n,
            crpix1: crpix,
            crpix2: crpix,
            cdelt1: -cdelt,
            cdelt2: cdelt,
            crval1: region.ra,
            crval2: region.dec,
        };
        Ok(Self::with_header(header, region.lenses.len(), morphologies))
    }

    pub fn with_header(header: WcsHeader, nlens: usize, morphologies: Vec<Morphology>) -> Self {
        let x = (0..header.naxis1).map(|i| header.x_offset(i)).collect();
        let y = (0..header.naxis2).map(|j| header.y_offset(j)).collect();
        Self {
            header,
            x,
            y,
            nlens,
            morphologies,
        }
    }

    pub fn header(&self) -> &WcsHeader {
        &self.header
    }

    pub fn nsource(&self) -> usize {
        self.morphologies.len()
    }

    /// Number of parameters this region consumes.
    pub fn width(&self) -> usize {
        LENS_PARAMS * self.nlens + SOURCE_PARAMS * self.nsource()
    }

    pub fn matches(&self, slice: &RegionSlice) -> bool {
        slice.nlens == self.nlens && slice.nsource == self.nsource()
    }

    /// Render the region from its slice of the resolved parameter vector.
    pub fn render(&self, params: &[f64]) -> Result<RenderedRegion> {
        if params.len() != self.width() {
            return Err(Error::Evaluation(format!(
                "region expects {} parameters, got {}",
                self.width(),
                params.len()
            )));
        }
        let (lens_params, source_params) = params.split_at(LENS_PARAMS * self.nlens);
        let lenses: Vec<SieLens> = lens_params
            .chunks_exact(LENS_PARAMS)
            .map(SieLens::from_params)
            .collect();
        let origin = lenses.first().map_or((0., 0.), |l| (l.x, l.y));
        let sources: Vec<Source> = source_params
            .chunks_exact(SOURCE_PARAMS)
            .zip(&self.morphologies)
            .map(|(p, &m)| Source::new(m, p, origin))
            .collect();

        let (nx, ny) = (self.header.naxis1, self.header.naxis2);
        let area = self.header.pixel_area();
        let mut unlensed = Image::zeros(nx, ny);
        let mut lensed = Image::zeros(nx, ny);
        let mut unlensed_aperture = Image::zeros(nx, ny);
        let mut lensed_aperture = Image::zeros(nx, ny);

        let ns = sources.len();
        let mut total_u = vec![0.; ns];
        let mut total_l = vec![0.; ns];
        let mut aper_u = vec![0.; ns];
        let mut aper_l = vec![0.; ns];

        for (j, &y) in self.y.iter().enumerate() {
            for (i, &x) in self.x.iter().enumerate() {
                let (bx, by) = lenses.iter().fold((x, y), |(bx, by), lens| {
                    let (ax, ay) = lens.deflection(x, y);
                    (bx - ax, by - ay)
                });
                let p = j * nx + i;
                for (s, source) in sources.iter().enumerate() {
                    let u = source.pixel_flux(x, y, area);
                    let l = source.pixel_flux(bx, by, area);
                    unlensed.data[p] += u;
                    lensed.data[p] += l;
                    total_u[s] += u;
                    total_l[s] += l;
                    if source.in_aperture(x, y) {
                        unlensed_aperture.data[p] += u;
                        aper_u[s] += u;
                    }
                    if source.in_aperture(bx, by) {
                        lensed_aperture.data[p] += l;
                        aper_l[s] += l;
                    }
                }
            }
        }

        let amplification = (!lenses.is_empty()).then(|| {
            let ratios = |num: &[f64], den: &[f64]| -> Vec<f64> {
                num.iter()
                    .zip(den)
                    .map(|(n, d)| clip_amplification(n / d))
                    .collect()
            };
            Amplification {
                source_total: ratios(&total_l, &total_u),
                source_aperture: ratios(&aper_l, &aper_u),
                total: clip_amplification(lensed.sum() / unlensed.sum()),
                aperture: clip_amplification(
                    lensed.masked_sum(&lensed_aperture) / unlensed.masked_sum(&unlensed_aperture),
                ),
            }
        });

        Ok(RenderedRegion {
            unlensed,
            lensed,
            unlensed_aperture,
            lensed_aperture,
            amplification,
        })
    }
}
