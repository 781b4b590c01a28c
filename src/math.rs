use itertools::izip;
use multiversion::multiversion;
use num_complex::Complex64;

const LANES: usize = 4;

/// Returns `(Σ values·a, Σ values·b)`.
#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn weighted_sums(values: &[f64], a: &[f64], b: &[f64]) -> (f64, f64) {
    let n = values.len();
    assert!(a.len() == n);
    assert!(b.len() == n);

    let head = n - n % LANES;
    let mut acc_a = [0f64; LANES];
    let mut acc_b = [0f64; LANES];

    izip!(
        values[..head].chunks_exact(LANES),
        a[..head].chunks_exact(LANES),
        b[..head].chunks_exact(LANES),
    )
    .for_each(|(v, a, b)| {
        for k in 0..LANES {
            acc_a[k] += v[k] * a[k];
            acc_b[k] += v[k] * b[k];
        }
    });

    let mut sum_a: f64 = acc_a.iter().sum();
    let mut sum_b: f64 = acc_b.iter().sum();
    izip!(&values[head..], &a[head..], &b[head..]).for_each(|(v, a, b)| {
        sum_a += v * a;
        sum_b += v * b;
    });
    (sum_a, sum_b)
}

/// Weighted squared residuals of the real and imaginary parts.
#[multiversion(targets("x86_64+avx+avx2+fma", "arm+neon"))]
pub(crate) fn chi_square(real: &[f64], imag: &[f64], weight: &[f64], model: &[Complex64]) -> f64 {
    let n = real.len();
    assert!(imag.len() == n);
    assert!(weight.len() == n);
    assert!(model.len() == n);

    izip!(real, imag, weight, model)
        .map(|(re, im, w, m)| {
            let dr = re - m.re;
            let di = im - m.im;
            w * (dr * dr + di * di)
        })
        .sum()
}

/// `Σ ln(2π / w)` counted once for the real and once for the imaginary part.
pub(crate) fn log_variance_sum(weight: &[f64]) -> f64 {
    let two_pi = 2. * std::f64::consts::PI;
    weight.iter().map(|w| 2. * (two_pi / w).ln()).sum()
}
