//! Loading interferometric visibilities.
//!
//! Input files are JSON renditions of single-source uvfits files: the
//! primary header keywords needed to compute spatial frequencies, the
//! baseline coordinates in seconds, and the `(real, imag, weight)` data cube
//! flattened in row-major order.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::WeightConfig;
use crate::error::{Error, Result};

/// Pointing center of an observation, degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhaseCenter {
    pub ra: f64,
    pub dec: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Telescope {
    /// Cube axes `[nvis, nspw, nfreq, npol]`, phase center from the source table.
    Alma,
    /// Cube axes `[nvis, nfreq, npol]`, phase center from the primary header.
    Pdbi,
}

impl Telescope {
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "ALMA" => Some(Telescope::Alma),
            "PdBI" => Some(Telescope::Pdbi),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvHeader {
    #[serde(rename = "TELESCOP")]
    pub telescope: String,
    #[serde(rename = "CRVAL4")]
    pub crval4: f64,
    #[serde(rename = "CDELT4")]
    pub cdelt4: f64,
    #[serde(rename = "CRPIX4")]
    pub crpix4: f64,
    #[serde(rename = "OBSRA", default, skip_serializing_if = "Option::is_none")]
    pub obsra: Option<f64>,
    #[serde(rename = "OBSDEC", default, skip_serializing_if = "Option::is_none")]
    pub obsdec: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceTable {
    #[serde(rename = "RAEPO")]
    pub raepo: Vec<f64>,
    #[serde(rename = "DECEPO")]
    pub decepo: Vec<f64>,
}

/// Decoded content of one visibility file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UvFile {
    pub header: UvHeader,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_table: Option<SourceTable>,
    /// Frequency offset of each spectral window from `CRVAL4`, Hz.
    #[serde(rename = "IF_FREQ", default)]
    pub if_freq: Vec<f64>,
    /// Baseline coordinates in seconds.
    #[serde(rename = "UU")]
    pub uu: Vec<f64>,
    #[serde(rename = "VV")]
    pub vv: Vec<f64>,
    /// Data cube axes without the trailing `(real, imag, weight)` axis.
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

/// Flat visibility columns plus the phase center they are referenced to.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Visibilities {
    pub u: Vec<f64>,
    pub v: Vec<f64>,
    pub real: Vec<f64>,
    pub imag: Vec<f64>,
    pub weight: Vec<f64>,
}

impl Visibilities {
    pub fn len(&self) -> usize {
        self.u.len()
    }

    pub fn is_empty(&self) -> bool {
        self.u.is_empty()
    }

    fn with_capacity(n: usize) -> Self {
        Self {
            u: Vec::with_capacity(n),
            v: Vec::with_capacity(n),
            real: Vec::with_capacity(n),
            imag: Vec::with_capacity(n),
            weight: Vec::with_capacity(n),
        }
    }

    fn push(&mut self, u: f64, v: f64, real: f64, imag: f64, weight: f64) {
        self.u.push(u);
        self.v.push(v);
        self.real.push(real);
        self.imag.push(imag);
        self.weight.push(weight);
    }

    fn append(&mut self, other: Visibilities) {
        self.u.extend(other.u);
        self.v.extend(other.v);
        self.real.extend(other.real);
        self.imag.extend(other.imag);
        self.weight.extend(other.weight);
    }

    /// Drop every point whose weight is not strictly positive.
    pub fn retain_positive_weights(&mut self) {
        let keep: Vec<bool> = self.weight.iter().map(|&w| w > 0.).collect();
        for column in [
            &mut self.u,
            &mut self.v,
            &mut self.real,
            &mut self.imag,
            &mut self.weight,
        ] {
            let mut flags = keep.iter();
            column.retain(|_| flags.next().copied().unwrap_or(false));
        }
    }
}

impl UvFile {
    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| Error::io(path, e))?;
        serde_json::from_reader(BufReader::new(file))
            .map_err(|e| Error::malformed(path, e.to_string()))
    }

    pub fn telescope(&self, path: &Path) -> Result<Telescope> {
        Telescope::from_tag(&self.header.telescope).ok_or_else(|| Error::UnsupportedFormat {
            tag: self.header.telescope.clone(),
            path: path.to_path_buf(),
        })
    }

    pub fn phase_center(&self, path: &Path) -> Result<PhaseCenter> {
        let center = match self.telescope(path)? {
            Telescope::Alma => self.source_table.as_ref().and_then(|t| {
                Some(PhaseCenter {
                    ra: *t.raepo.first()?,
                    dec: *t.decepo.first()?,
                })
            }),
            Telescope::Pdbi => match (self.header.obsra, self.header.obsdec) {
                (Some(ra), Some(dec)) => Some(PhaseCenter { ra, dec }),
                _ => None,
            },
        };
        center.ok_or_else(|| Error::malformed(path, "no phase center"))
    }

    /// Axis lengths of the data cube, checked against the data it holds.
    fn cube(&self, path: &Path) -> Result<(Telescope, Cube)> {
        let telescope = self.telescope(path)?;
        let (nvis, nspw, nfreq, npol) = match (telescope, self.shape.as_slice()) {
            (Telescope::Alma, &[nvis, nspw, nfreq, npol]) => (nvis, nspw, nfreq, npol),
            (Telescope::Pdbi, &[nvis, nfreq, npol]) => (nvis, 1, nfreq, npol),
            (_, shape) => {
                return Err(Error::malformed(
                    path,
                    format!("unexpected data cube shape {:?} for {:?}", shape, telescope),
                ))
            }
        };
        if nvis == 0 || nspw == 0 || nfreq == 0 || npol == 0 {
            return Err(Error::malformed(path, format!("empty axis in {:?}", self.shape)));
        }
        if self.uu.len() != nvis || self.vv.len() != nvis {
            return Err(Error::malformed(
                path,
                format!(
                    "{} visibilities but {} UU and {} VV values",
                    nvis,
                    self.uu.len(),
                    self.vv.len()
                ),
            ));
        }
        let cells = nvis * nspw * nfreq * npol;
        if self.data.len() != 3 * cells {
            return Err(Error::malformed(
                path,
                format!("data holds {} values, expected {}", self.data.len(), 3 * cells),
            ));
        }
        Ok((
            telescope,
            Cube {
                nvis,
                nspw,
                nfreq,
                npol,
            },
        ))
    }

    /// Spatial frequencies in wavelengths and the data columns, one entry per
    /// `(vis, spw, channel, polarization)` cell.
    pub fn decode(&self, path: &Path) -> Result<Visibilities> {
        let (telescope, cube) = self.cube(path)?;
        let Cube {
            nspw, nfreq, npol, ..
        } = cube;
        let cells = cube.cells();

        let header = &self.header;
        let window_freqs: Vec<f64> = if telescope == Telescope::Alma && nspw > 1 {
            if self.if_freq.len() < nspw {
                return Err(Error::malformed(
                    path,
                    format!("{} spectral windows but {} IF frequencies", nspw, self.if_freq.len()),
                ));
            }
            self.if_freq[..nspw]
                .iter()
                .map(|offset| header.crval4 + offset)
                .collect()
        } else {
            vec![header.crval4]
        };
        let channel_freq = |window: f64, k: usize| {
            if nfreq > 1 {
                (k as f64 - header.crpix4 + 1.) * header.cdelt4 + window
            } else {
                window
            }
        };

        let mut out = Visibilities::with_capacity(cells);
        let mut cell = self.data.chunks_exact(3);
        for (uu, vv) in self.uu.iter().zip(&self.vv) {
            for &window in &window_freqs {
                for k in 0..nfreq {
                    let freq = channel_freq(window, k);
                    for _ in 0..npol {
                        let Some(&[re, im, w]) = cell.next() else {
                            return Err(Error::malformed(path, "truncated data cube"));
                        };
                        out.push(uu * freq, vv * freq, re, im, w);
                    }
                }
            }
        }
        Ok(out)
    }

    /// Apply the configured weight preprocessing in place.
    pub fn preprocess_weights(&mut self, path: &Path, weights: &WeightConfig) -> Result<()> {
        if weights.is_identity() {
            return Ok(());
        }
        let (_, cube) = self.cube(path)?;
        if !weights.exclude_channels.is_empty() {
            self.exclude_channels(cube, &weights.exclude_channels);
        }
        if weights.from_scatter {
            let kept = self.weights_from_scatter(cube);
            debug!(path = %path.display(), kept, "weights estimated from channel scatter");
        }
        if weights.rescale {
            match self.rescale_weights() {
                Some(scale) => info!(path = %path.display(), scale, "rescaled weights"),
                None => warn!(path = %path.display(), "no weighted signal, weights left unscaled"),
            }
        }
        Ok(())
    }

    /// Zero the weights of every channel in the half-open ranges, in all
    /// spectral windows. Ranges past the last channel are clipped.
    fn exclude_channels(&mut self, cube: Cube, ranges: &[[usize; 2]]) {
        for vis in 0..cube.nvis {
            for spw in 0..cube.nspw {
                for &[start, end] in ranges {
                    for chan in start.min(cube.nfreq)..end.min(cube.nfreq) {
                        for pol in 0..cube.npol {
                            self.data[3 * cube.cell(vis, spw, chan, pol) + 2] = 0.;
                        }
                    }
                }
            }
        }
    }

    /// Replace the weights of each `(vis, spw, pol)` spectrum by
    /// `1 / rms^2`, with `rms` the mean of the population standard deviations
    /// of the real and imaginary parts over channels with positive weight.
    /// Spectra with fewer than three such channels, or no spread, get zero
    /// weight. Returns the number of spectra that kept a weight.
    fn weights_from_scatter(&mut self, cube: Cube) -> usize {
        let mut kept = 0;
        let mut good = Vec::with_capacity(cube.nfreq);
        for vis in 0..cube.nvis {
            for spw in 0..cube.nspw {
                for pol in 0..cube.npol {
                    good.clear();
                    good.extend(
                        (0..cube.nfreq)
                            .map(|chan| 3 * cube.cell(vis, spw, chan, pol))
                            .filter(|&at| self.data[at + 2] > 0.),
                    );
                    let weight = if good.len() > 2 {
                        let rms = (std_dev(good.iter().map(|&at| self.data[at]))
                            + std_dev(good.iter().map(|&at| self.data[at + 1])))
                            / 2.;
                        let weight = 1. / (rms * rms);
                        if weight.is_finite() {
                            weight
                        } else {
                            0.
                        }
                    } else {
                        0.
                    };
                    if weight > 0. {
                        kept += 1;
                    }
                    for chan in 0..cube.nfreq {
                        let at = 3 * cube.cell(vis, spw, chan, pol) + 2;
                        self.data[at] = if self.data[at] > 0. { weight } else { 0. };
                    }
                }
            }
        }
        kept
    }

    /// Scale all weights so that `sum(w * (re^2 + im^2)) = 2 N` over the `N`
    /// cells with positive weight. Returns the factor applied, or `None` when
    /// there is nothing to normalize against.
    fn rescale_weights(&mut self) -> Option<f64> {
        let (count, power) = self
            .data
            .chunks_exact(3)
            .filter(|cell| cell[2] > 0.)
            .fold((0usize, 0.), |(n, sum), cell| {
                (n + 1, sum + cell[2] * (cell[0] * cell[0] + cell[1] * cell[1]))
            });
        let scale = (2 * count) as f64 / power;
        if count == 0 || !scale.is_finite() || scale <= 0. {
            return None;
        }
        for cell in self.data.chunks_exact_mut(3) {
            cell[2] *= scale;
        }
        Some(scale)
    }
}

/// Axis lengths of a visibility data cube, one implicit window for PdBI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Cube {
    nvis: usize,
    nspw: usize,
    nfreq: usize,
    npol: usize,
}

impl Cube {
    fn cells(&self) -> usize {
        self.nvis * self.nspw * self.nfreq * self.npol
    }

    /// Row-major index of a cell, without the trailing value axis.
    fn cell(&self, vis: usize, spw: usize, chan: usize, pol: usize) -> usize {
        ((vis * self.nspw + spw) * self.nfreq + chan) * self.npol + pol
    }
}

fn std_dev(values: impl Iterator<Item = f64> + Clone) -> f64 {
    let n = values.clone().count() as f64;
    let mean = values.clone().sum::<f64>() / n;
    (values.map(|v| (v - mean) * (v - mean)).sum::<f64>() / n).sqrt()
}

/// All visibilities a fit is compared against.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationSet {
    data: Visibilities,
    phase_center: PhaseCenter,
    file_centers: Vec<PhaseCenter>,
}

impl ObservationSet {
    /// Build from columns already in memory. Non-positive weights are dropped.
    pub fn new(mut data: Visibilities, phase_center: PhaseCenter) -> Result<Self> {
        let n = data.len();
        if [&data.v, &data.real, &data.imag, &data.weight]
            .iter()
            .any(|c| c.len() != n)
        {
            return Err(Error::malformed(
                PathBuf::from("<memory>"),
                "visibility columns differ in length",
            ));
        }
        data.retain_positive_weights();
        Ok(Self {
            data,
            phase_center,
            file_centers: vec![phase_center],
        })
    }

    /// Load and concatenate files in order, preprocessing the weights of
    /// each file first.
    ///
    /// The phase center of the first file is used for the whole set.
    pub fn load<P: AsRef<Path>>(files: &[P], weights: &WeightConfig) -> Result<Self> {
        let mut data = Visibilities::default();
        let mut centers = Vec::with_capacity(files.len());
        for path in files {
            let path = path.as_ref();
            let mut file = UvFile::read(path)?;
            file.preprocess_weights(path, weights)?;
            let center = file.phase_center(path)?;
            let decoded = file.decode(path)?;
            info!(
                path = %path.display(),
                telescope = %file.header.telescope,
                points = decoded.len(),
                "loaded visibilities"
            );
            if centers.first().is_some_and(|first| *first != center) {
                debug!(
                    path = %path.display(),
                    ra = center.ra,
                    dec = center.dec,
                    "phase center differs from the first file, using the first"
                );
            }
            centers.push(center);
            data.append(decoded);
        }
        let Some(&phase_center) = centers.first() else {
            return Err(Error::Config("no visibility files given".into()));
        };

        let total = data.len();
        let mut set = Self::new(data, phase_center)?;
        set.file_centers = centers;
        info!(
            points = set.len(),
            dropped = total - set.len(),
            "observation set ready"
        );
        Ok(set)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Phase center all model visibilities are referenced to.
    pub fn phase_center(&self) -> PhaseCenter {
        self.phase_center
    }

    /// Phase center of every loaded file, in load order.
    pub fn file_phase_centers(&self) -> &[PhaseCenter] {
        &self.file_centers
    }

    pub fn u(&self) -> &[f64] {
        &self.data.u
    }

    pub fn v(&self) -> &[f64] {
        &self.data.v
    }

    pub fn real(&self) -> &[f64] {
        &self.data.real
    }

    pub fn imag(&self) -> &[f64] {
        &self.data.imag
    }

    pub fn weight(&self) -> &[f64] {
        &self.data.weight
    }
}
