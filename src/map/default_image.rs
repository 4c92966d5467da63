//! Default ("prior") images for the entropy functional.
//!
//! The entropy `S = Σ (f − m − f ln(f/m))` is measured relative to a default
//! image `m`. The default is rebuilt from the current image at the start of
//! every MEM step: either flat at the image mean, or the image blurred by a
//! Gaussian, which favours maps that are smooth on that scale rather than flat.
use serde::{Deserialize, Serialize};

use crate::constants::{KmPerSec, EFAC, PROFILE_NSIGMA};
use crate::doppler_errors::DopplerError;
use crate::map::image::Dimensions;

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DefaultImage {
    /// Every pixel set to the mean of the image.
    #[default]
    Uniform,
    /// Gaussian blur in the Vx-Vy plane, FWHM in km/s.
    Gauss2d { fwhm_xy: KmPerSec },
    /// Gaussian blur in Vx-Vy and along Vz, FWHMs in km/s. Stacked images only.
    Gauss3d { fwhm_xy: KmPerSec, fwhm_z: KmPerSec },
}

impl DefaultImage {
    pub(crate) fn validate(&self, dims: &Dimensions) -> Result<(), DopplerError> {
        let check = |name: &str, v: f64| {
            if v.is_finite() && v >= 0.0 {
                Ok(())
            } else {
                Err(DopplerError::InvalidImage(format!(
                    "default {name} must be finite and >= 0, got {v}"
                )))
            }
        };
        match *self {
            DefaultImage::Uniform => Ok(()),
            DefaultImage::Gauss2d { fwhm_xy } => check("fwhm_xy", fwhm_xy),
            DefaultImage::Gauss3d { fwhm_xy, fwhm_z } => {
                if !dims.is_stacked() {
                    return Err(DopplerError::InvalidImage(
                        "a 3D Gaussian default needs a stacked image".into(),
                    ));
                }
                check("fwhm_xy", fwhm_xy)?;
                check("fwhm_z", fwhm_z)
            }
        }
    }

    /// Compute the default for `image` into `out`.
    ///
    /// Arguments
    /// -----------------
    /// * `image`: current intensities, laid out as described in [`crate::map::image`].
    /// * `dims`: grid shape of the image.
    /// * `vxy`: pixel size in Vx-Vy, km/s.
    /// * `out`: destination, same length as `image`.
    pub fn compute(&self, image: &[f64], dims: &Dimensions, vxy: KmPerSec, out: &mut [f64]) {
        match *self {
            DefaultImage::Uniform => {
                let mean = image.iter().sum::<f64>() / image.len() as f64;
                out.fill(mean);
            }
            DefaultImage::Gauss2d { fwhm_xy } => {
                out.copy_from_slice(image);
                let sigma = fwhm_xy / vxy / EFAC;
                blur_axis(out, dims, Axis::X, sigma);
                blur_axis(out, dims, Axis::Y, sigma);
            }
            DefaultImage::Gauss3d { fwhm_xy, fwhm_z } => {
                out.copy_from_slice(image);
                let sigma = fwhm_xy / vxy / EFAC;
                blur_axis(out, dims, Axis::X, sigma);
                blur_axis(out, dims, Axis::Y, sigma);
                if let Some(vz) = dims.layer_velocity() {
                    blur_axis(out, dims, Axis::Z, fwhm_z / vz / EFAC);
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Axis {
    X,
    Y,
    Z,
}

/// Truncated, unnormalised Gaussian kernel for a sigma in pixels.
fn kernel(sigma: f64) -> Vec<f64> {
    let half = (PROFILE_NSIGMA * sigma).ceil() as usize;
    (0..=2 * half)
        .map(|k| {
            let d = k as f64 - half as f64;
            (-0.5 * (d / sigma).powi(2)).exp()
        })
        .collect()
}

/// Blur `data` in place along one axis.
///
/// The kernel is renormalised over the part that falls inside the grid, so
/// edge pixels are not darkened and positive images stay positive.
fn blur_axis(data: &mut [f64], dims: &Dimensions, axis: Axis, sigma: f64) {
    if !(sigma > 0.0) {
        return;
    }
    let (nx, ny, nz) = (dims.nx(), dims.ny(), dims.nz());
    let (len, stride) = match axis {
        Axis::X => (nx, 1),
        Axis::Y => (ny, nx),
        Axis::Z => (nz, nx * ny),
    };
    if len < 2 {
        return;
    }

    let kern = kernel(sigma);
    let half = (kern.len() / 2) as isize;

    // starting offsets of every 1D line along the axis
    let starts: Vec<usize> = match axis {
        Axis::X => (0..ny * nz).map(|l| l * nx).collect(),
        Axis::Y => (0..nz)
            .flat_map(|iz| (0..nx).map(move |ix| iz * nx * ny + ix))
            .collect(),
        Axis::Z => (0..nx * ny).collect(),
    };

    let mut line = vec![0.0; len];
    for start in starts {
        for (i, v) in line.iter_mut().enumerate() {
            *v = data[start + i * stride];
        }
        for i in 0..len as isize {
            let lo = (i - half).max(0);
            let hi = (i + half).min(len as isize - 1);
            let mut sum = 0.0;
            let mut norm = 0.0;
            for j in lo..=hi {
                let w = kern[(j - i + half) as usize];
                sum += w * line[j as usize];
                norm += w;
            }
            data[start + i as usize * stride] = sum / norm;
        }
    }
}

#[cfg(test)]
mod default_image_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_uniform_default_is_mean() {
        let dims = Dimensions::Flat { nx: 2, ny: 2 };
        let mut out = vec![0.0; 4];
        DefaultImage::Uniform.compute(&[1.0, 2.0, 3.0, 6.0], &dims, 10.0, &mut out);
        assert_eq!(out, vec![3.0; 4]);
    }

    #[test]
    fn test_gauss2d_preserves_flat_and_positivity() {
        let dims = Dimensions::Flat { nx: 9, ny: 7 };
        let flat = vec![2.5; 63];
        let mut out = vec![0.0; 63];
        let def = DefaultImage::Gauss2d { fwhm_xy: 300.0 };
        def.compute(&flat, &dims, 100.0, &mut out);
        for v in &out {
            assert_relative_eq!(*v, 2.5, epsilon = 1e-12);
        }

        let mut spike = vec![1e-3; 63];
        spike[31] = 10.0;
        def.compute(&spike, &dims, 100.0, &mut out);
        assert!(out.iter().all(|v| *v > 0.0));
        assert!(out[31] < 10.0);
        assert!(out[30] > 1e-3 && out[32] > 1e-3);
        // blurring is symmetric about the spike
        assert_relative_eq!(out[30], out[32], epsilon = 1e-12);
    }

    #[test]
    fn test_gauss3d_blurs_layers() {
        let dims = Dimensions::Stacked {
            nx: 3,
            ny: 3,
            nz: 5,
            vz: 100.0,
        };
        let mut data = vec![1.0; 45];
        for v in &mut data[18..27] {
            *v = 5.0;
        }
        let mut out = vec![0.0; 45];
        let def = DefaultImage::Gauss3d {
            fwhm_xy: 0.0,
            fwhm_z: 200.0,
        };
        def.compute(&data, &dims, 50.0, &mut out);
        assert!(out[22] < 5.0);
        assert!(out[13] > 1.0);
        assert_relative_eq!(out[13], out[31], epsilon = 1e-12);

        assert!(def.validate(&Dimensions::Flat { nx: 3, ny: 3 }).is_err());
    }
}
