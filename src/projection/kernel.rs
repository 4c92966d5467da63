//! Instrumental profile integrated over wavelength bins.
use std::f64::consts::SQRT_2;

use scilib::math::basic::erf;

use crate::constants::PROFILE_NSIGMA;

/// Call `f(k, frac)` for every bin `k` receiving a share `frac` of a Gaussian
/// profile centred on `centre` with standard deviation `sigma`.
///
/// `edges` holds the `n + 1` bin edges of `n` bins, strictly increasing. The
/// profile is truncated at [`PROFILE_NSIGMA`]; a zero `sigma` puts the whole
/// profile into the bin containing `centre`. Nothing is reported for a profile
/// that falls outside the grid.
pub(crate) fn for_each_bin_fraction<F>(edges: &[f64], centre: f64, sigma: f64, mut f: F)
where
    F: FnMut(usize, f64),
{
    let nbins = edges.len() - 1;

    if sigma <= 0.0 {
        if centre < edges[0] || centre >= edges[nbins] {
            return;
        }
        let k = edges.partition_point(|e| *e <= centre) - 1;
        f(k, 1.0);
        return;
    }

    let lo = centre - PROFILE_NSIGMA * sigma;
    let hi = centre + PROFILE_NSIGMA * sigma;
    if hi <= edges[0] || lo >= edges[nbins] {
        return;
    }

    let k_start = edges.partition_point(|e| *e <= lo).saturating_sub(1);
    let k_end = edges.partition_point(|e| *e < hi).min(nbins);

    let scale = 1.0 / (SQRT_2 * sigma);
    let mut cdf_lo = erf((edges[k_start] - centre) * scale);
    for k in k_start..k_end {
        let cdf_hi = erf((edges[k + 1] - centre) * scale);
        let frac = 0.5 * (cdf_hi - cdf_lo);
        if frac > 0.0 {
            f(k, frac);
        }
        cdf_lo = cdf_hi;
    }
}

#[cfg(test)]
mod kernel_test {
    use super::*;
    use approx::assert_relative_eq;

    fn edges(n: usize) -> Vec<f64> {
        (0..=n).map(|i| 100.0 + i as f64).collect()
    }

    #[test]
    fn test_fractions_sum_to_one() {
        let e = edges(40);
        let mut total = 0.0;
        let mut bins = vec![];
        for_each_bin_fraction(&e, 120.3, 1.7, |k, frac| {
            total += frac;
            bins.push(k);
        });
        assert_relative_eq!(total, 1.0, epsilon = 5e-6);
        assert!(bins.contains(&20));
        assert!(bins.windows(2).all(|w| w[1] == w[0] + 1));
    }

    #[test]
    fn test_symmetric_profile() {
        let e = edges(10);
        let mut frac = [0.0; 10];
        for_each_bin_fraction(&e, 105.0, 0.8, |k, f| frac[k] = f);
        assert_relative_eq!(frac[4], frac[5], epsilon = 1e-6);
        assert_relative_eq!(frac[3], frac[6], epsilon = 1e-6);
        assert!(frac[4] > frac[3]);
    }

    #[test]
    fn test_delta_profile() {
        let e = edges(10);
        let mut hits = vec![];
        for_each_bin_fraction(&e, 103.5, 0.0, |k, f| hits.push((k, f)));
        assert_eq!(hits, vec![(3, 1.0)]);

        hits.clear();
        for_each_bin_fraction(&e, 111.0, 0.0, |k, f| hits.push((k, f)));
        assert!(hits.is_empty());
    }

    #[test]
    fn test_profile_off_grid() {
        let e = edges(10);
        let mut called = false;
        for_each_bin_fraction(&e, 50.0, 1.0, |_, _| called = true);
        assert!(!called);
    }
}
