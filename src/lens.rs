//! Mass and light profiles evaluated on the image-plane grid.
//!
//! All positions are offsets in arcseconds, angles are in degrees measured
//! counter-clockwise from the +x axis.

use std::f64::consts::PI;
use std::str::FromStr;

use crate::error::Error;

/// Ratio between the FWHM and the standard deviation of a Gaussian.
const FWHM_PER_SIGMA: f64 = 2.354_820_045_030_949_4;

/// Below this ellipticity the SIE deflection uses its circular limit.
const CIRCULAR_LIMIT: f64 = 1e-3;

/// Anything that bends light rays.
pub trait MassProfile {
    /// Deflection angle at image-plane position `(x, y)`.
    fn deflection(&self, x: f64, y: f64) -> (f64, f64);
}

/// A surface brightness distribution in the source plane.
pub trait LightProfile {
    /// Flux falling into a pixel of `pixel_area` square arcseconds centered on `(x, y)`.
    fn pixel_flux(&self, x: f64, y: f64, pixel_area: f64) -> f64;

    /// Whether `(x, y)` lies inside the aperture used for magnification estimates.
    fn in_aperture(&self, x: f64, y: f64) -> bool;
}

/// Rotate `(x, y)` around `(x0, y0)` into a frame at angle `phi` (radians).
#[inline]
fn rotate(x: f64, y: f64, x0: f64, y0: f64, phi: f64) -> (f64, f64) {
    let (sin, cos) = phi.sin_cos();
    let (dx, dy) = (x - x0, y - y0);
    (dx * cos + dy * sin, dy * cos - dx * sin)
}

/// Singular isothermal ellipsoid, defined for `einstein_radius > 0` and
/// `0 < axial_ratio <= 1`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SieLens {
    pub einstein_radius: f64,
    pub x: f64,
    pub y: f64,
    pub axial_ratio: f64,
    pub position_angle: f64,
}

impl SieLens {
    pub fn from_params(params: &[f64]) -> Self {
        Self {
            einstein_radius: params[0],
            x: params[1],
            y: params[2],
            axial_ratio: params[3],
            position_angle: params[4],
        }
    }
}

impl MassProfile for SieLens {
    fn deflection(&self, x: f64, y: f64) -> (f64, f64) {
        let (b, q) = (self.einstein_radius, self.axial_ratio);
        let phi = self.position_angle.to_radians();
        let (xs, ys) = rotate(x, y, self.x, self.y, phi);

        let r = (q * xs * xs + ys * ys / q).sqrt();
        let r = if r == 0. { 1. } else { r };
        let f = (1. / q - q).sqrt();

        let (ax, ay) = if f >= CIRCULAR_LIMIT {
            (
                b / f * (f * xs / r).atan(),
                b / f * (f * ys / r).atanh(),
            )
        } else {
            (b * xs / r, b * ys / r)
        };

        let (sin, cos) = phi.sin_cos();
        (ax * cos - ay * sin, ay * cos + ax * sin)
    }
}

/// Elliptical Gaussian light profile.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianSource {
    pub flux: f64,
    /// Full width at half maximum along the major axis, arcsec.
    pub size: f64,
    pub x: f64,
    pub y: f64,
    pub axial_ratio: f64,
    pub position_angle: f64,
}

impl GaussianSource {
    /// Build from the six source parameters, with the position offset from `origin`.
    pub fn from_params(params: &[f64], origin: (f64, f64)) -> Self {
        Self {
            flux: params[0],
            size: params[1],
            x: origin.0 + params[2],
            y: origin.1 + params[3],
            axial_ratio: params[4],
            position_angle: params[5],
        }
    }

    pub fn sigma(&self) -> f64 {
        self.size / FWHM_PER_SIGMA
    }

    /// Squared elliptical radius in units of sigma.
    fn radius_sq(&self, x: f64, y: f64) -> f64 {
        let q = self.axial_ratio;
        let (xr, yr) = rotate(x, y, self.x, self.y, self.position_angle.to_radians());
        let sigma = self.sigma();
        (q * xr * xr + yr * yr / q) / (sigma * sigma)
    }
}

impl LightProfile for GaussianSource {
    fn pixel_flux(&self, x: f64, y: f64, pixel_area: f64) -> f64 {
        let sigma = self.sigma();
        let peak = self.flux * pixel_area / (2. * PI * sigma * sigma);
        peak * (-0.5 * self.radius_sq(x, y)).exp()
    }

    fn in_aperture(&self, x: f64, y: f64) -> bool {
        self.radius_sq(x, y) <= 4.
    }
}

/// Recognised light profile tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Morphology {
    Gaussian,
}

impl FromStr for Morphology {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "gaussian" => Ok(Morphology::Gaussian),
            _ => Err(Error::UnknownMorphology(s.to_string())),
        }
    }
}

/// A source with its morphology resolved.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Source {
    Gaussian(GaussianSource),
}

impl Source {
    pub fn new(morphology: Morphology, params: &[f64], origin: (f64, f64)) -> Self {
        match morphology {
            Morphology::Gaussian => Source::Gaussian(GaussianSource::from_params(params, origin)),
        }
    }
}

impl LightProfile for Source {
    #[inline]
    fn pixel_flux(&self, x: f64, y: f64, pixel_area: f64) -> f64 {
        match self {
            Source::Gaussian(g) => g.pixel_flux(x, y, pixel_area),
        }
    }

    #[inline]
    fn in_aperture(&self, x: f64, y: f64) -> bool {
        match self {
            Source::Gaussian(g) => g.in_aperture(x, y),
        }
    }
}
