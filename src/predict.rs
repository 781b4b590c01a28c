//! Model visibilities from rendered images.

use std::f64::consts::PI;

use num_complex::Complex64;

use crate::error::{Error, Result};
use crate::math::weighted_sums;
use crate::render::{Image, WcsHeader};
use crate::visibility::ObservationSet;

const ARCSEC: f64 = PI / 180. / 3600.;

/// Fourier samples a sky image at the observed spatial frequencies.
pub trait VisibilityKernel: Send + Sync {
    /// Add the visibilities of `image`, projected with `header`, at every
    /// point of `observations` to `out`.
    fn accumulate(
        &self,
        image: &Image,
        header: &WcsHeader,
        observations: &ObservationSet,
        out: &mut [Complex64],
    ) -> Result<()>;
}

/// Exact direct Fourier transform.
///
/// `V(u, v) = Σ I exp(-2πi (u l + v m))` with `(l, m)` the pixel offsets from
/// the phase center in radians. The phase factorises into one phasor per
/// column and one per row, so each point costs one pass over the non-empty
/// rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct DirectFourier;

impl VisibilityKernel for DirectFourier {
    fn accumulate(
        &self,
        image: &Image,
        header: &WcsHeader,
        observations: &ObservationSet,
        out: &mut [Complex64],
    ) -> Result<()> {
        if out.len() != observations.len() {
            return Err(Error::Evaluation(format!(
                "output holds {} visibilities, observations {}",
                out.len(),
                observations.len()
            )));
        }
        if image.nx != header.naxis1 || image.ny != header.naxis2 {
            return Err(Error::Evaluation(format!(
                "image is {}x{} but its header says {}x{}",
                image.nx, image.ny, header.naxis1, header.naxis2
            )));
        }

        let center = observations.phase_center();
        let dra = (header.crval1 - center.ra).to_radians() * center.dec.to_radians().cos();
        let ddec = (header.crval2 - center.dec).to_radians();
        let l: Vec<f64> = (0..image.nx)
            .map(|i| header.x_offset(i) * ARCSEC + dra)
            .collect();
        let m: Vec<f64> = (0..image.ny)
            .map(|j| header.y_offset(j) * ARCSEC + ddec)
            .collect();

        let rows: Vec<(f64, &[f64])> = image
            .rows()
            .zip(&m)
            .filter(|(row, _)| row.iter().any(|&p| p != 0.))
            .map(|(row, &m)| (m, row))
            .collect();
        if rows.is_empty() {
            return Ok(());
        }

        let mut col_re = vec![0.; image.nx];
        let mut col_im = vec![0.; image.nx];
        for ((&u, &v), vis) in observations
            .u()
            .iter()
            .zip(observations.v())
            .zip(out.iter_mut())
        {
            for ((re, im), &l) in col_re.iter_mut().zip(col_im.iter_mut()).zip(&l) {
                let (sin, cos) = (-2. * PI * u * l).sin_cos();
                *re = cos;
                *im = sin;
            }
            let mut sum = Complex64::new(0., 0.);
            for &(m, row) in &rows {
                let (a, b) = weighted_sums(row, &col_re, &col_im);
                sum += Complex64::cis(-2. * PI * v * m) * Complex64::new(a, b);
            }
            *vis += sum;
        }
        Ok(())
    }
}
