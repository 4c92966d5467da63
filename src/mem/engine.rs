//! # One maximum entropy step
//!
//! [`MemEngine`] owns everything one MEM iteration needs: the projection
//! operator, the observed fluxes with their inverse-variance weights, and the
//! default-image prescription of every image of the map.
//!
//! ## Step
//!
//! 1. Project the current image, form residuals and the reduced χ²
//!    `C = (1/N) Σ w (d − Af)²`, `N` the number of unmasked points.
//! 2. Compute the default image `m`, the entropy gradient `∇S = −ln(f/m)`
//!    and the χ² gradient `∇C = −(2/N) Aᵀ W (d − Af)`.
//! 3. Build up to three search directions in the entropy metric:
//!    `f∇S`, `f∇C` and `f·H(f∇S/|∇S| − f∇C/|∇C|)`, `H` the χ² Hessian.
//! 4. Solve the quadratic subspace problem for the step hitting this
//!    iteration's χ² aim within the distance bound `|δf|²_metric ≤ rmax² Σf`.
//! 5. Clamp every pixel into `[f·max(1 − rmax, floor), f·(1 + rmax)]`.
//!
//! A step that starts at or below the aim with a negligible `∇C` is a null
//! step: the data are already fitted and the image is left as it is.
//!
//! The image is only written once every check has passed: on error it is
//! left as it was.
use std::ops::Range;

use itertools::izip;
use log::{debug, trace};
use nalgebra::{DMatrix, DVector};

use super::entropy::{entropy_and_gradient, lift_zero_pixels};
use super::subspace::QuadraticModel;
use crate::constants::{PIXEL_FLOOR_FRACTION, ZERO_PIXEL_LIFT};
use crate::dataset::Dataset;
use crate::doppler_errors::DopplerError;
use crate::map::{DefaultImage, Dimensions, Map};
use crate::projection::Projector;

/// Directions whose metric norm² is below this fraction of Σf are negligible.
const NEGLIGIBLE_DIRECTION: f64 = 1e-20;

/// Initial Lagrange multiplier.
const ALPHA_START: f64 = 1.0;

#[derive(Debug, Clone)]
struct ImagePrior {
    range: Range<usize>,
    dims: Dimensions,
    vxy: f64,
    default: DefaultImage,
}

/// Diagnostics of one MEM step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StepReport {
    /// Reduced χ² before the step
    pub chi2_before: f64,
    /// Reduced χ² of the updated image
    pub chi2_after: f64,
    /// Reduced χ² predicted by the quadratic model
    pub chi2_predicted: f64,
    /// Entropy of the image before the step
    pub entropy: f64,
    /// Lagrange multiplier retained for the step
    pub alpha: f64,
    /// ½|∇S/|∇S| − ∇C/|∇C||² in the entropy metric; zero at the MEM solution
    pub test: f64,
    /// |∇S| in the entropy metric
    pub grad_entropy: f64,
    /// |∇C| in the entropy metric
    pub grad_chi2: f64,
    /// Number of search directions used
    pub directions: usize,
    /// True when no direction was significant and the image was left unchanged
    pub null_step: bool,
}

/// Stateful MEM stepper for one map layout and one dataset.
#[derive(Debug, Clone)]
pub struct MemEngine {
    projector: Projector,
    observed: Vec<f64>,
    /// 1/ferr² for valid points, 0 for masked ones
    weights: Vec<f64>,
    ndata: usize,
    priors: Vec<ImagePrior>,
    alpha: f64,
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

impl MemEngine {
    /// Validate `map` against `data` and precompute the projection.
    ///
    /// Return
    /// ----------
    /// * The engine, or a structural [`DopplerError`] when the inputs are malformed.
    pub fn new(map: &Map, data: &Dataset) -> Result<Self, DopplerError> {
        let projector = Projector::new(map, data)?;

        let mut observed = Vec::with_capacity(projector.nflux());
        let mut weights = Vec::with_capacity(projector.nflux());
        for spectrum in data.spectra() {
            observed.extend_from_slice(&spectrum.flux);
            weights.extend(
                spectrum
                    .ferr
                    .iter()
                    .map(|e| if *e > 0.0 { 1.0 / (e * e) } else { 0.0 }),
            );
        }

        let priors = map
            .images()
            .iter()
            .enumerate()
            .map(|(i, image)| {
                let range = projector
                    .image_range(i)
                    .ok_or_else(|| DopplerError::InvalidMap(format!("no image with index {i}")))?;
                Ok(ImagePrior {
                    range,
                    dims: *image.dims(),
                    vxy: image.vxy(),
                    default: *image.default_image(),
                })
            })
            .collect::<Result<Vec<_>, DopplerError>>()?;

        Ok(MemEngine {
            projector,
            observed,
            weights,
            ndata: data.valid_points(),
            priors,
            alpha: ALPHA_START,
        })
    }

    pub fn projector(&self) -> &Projector {
        &self.projector
    }

    /// Number of unmasked data points, the χ² normalisation.
    pub fn ndata(&self) -> usize {
        self.ndata
    }

    /// Multiplier the next step's search starts from.
    pub fn alpha(&self) -> f64 {
        self.alpha
    }

    fn residuals(&self, x: &[f64]) -> Result<(Vec<f64>, f64), DopplerError> {
        let predicted = self.projector.project(x)?;
        let residual: Vec<f64> = self
            .observed
            .iter()
            .zip(&predicted)
            .map(|(d, p)| d - p)
            .collect();
        let chi2 = izip!(&self.weights, &residual)
            .map(|(w, r)| w * r * r)
            .sum::<f64>()
            / self.ndata as f64;
        Ok((residual, chi2))
    }

    /// Reduced χ² of the image-space vector `x`.
    pub fn chi_squared(&self, x: &[f64]) -> Result<f64, DopplerError> {
        self.residuals(x).map(|(_, chi2)| chi2)
    }

    /// Default image of every image block of `f`.
    fn default_images(&self, f: &[f64]) -> Vec<f64> {
        let mut m = vec![0.0; f.len()];
        for prior in &self.priors {
            let range = prior.range.clone();
            prior
                .default
                .compute(&f[range.clone()], &prior.dims, prior.vxy, &mut m[range]);
        }
        m
    }

    /// `(2/N) Aᵀ W A v` for an image-space `v` whose projection is `av`.
    fn curvature_times(&self, av: &[f64]) -> Result<Vec<f64>, DopplerError> {
        let norm = 2.0 / self.ndata as f64;
        let weighted: Vec<f64> = izip!(&self.weights, av).map(|(w, a)| norm * w * a).collect();
        self.projector.back_project(&weighted)
    }

    /// Lift exact zeros to a small fraction of each image's mean.
    fn lifted(&self, x: &[f64]) -> Vec<f64> {
        let mut f = x.to_vec();
        for prior in &self.priors {
            let lifted = lift_zero_pixels(&mut f[prior.range.clone()], ZERO_PIXEL_LIFT);
            if lifted > 0 {
                trace!("lifted {lifted} zero pixels");
            }
        }
        f
    }

    /// Perform one MEM step on the image-space vector `x`.
    ///
    /// Arguments
    /// -----------------
    /// * `x`: every image of the map, concatenated; non-negative.
    /// * `caim`: reduced χ² to aim for.
    /// * `rmax`: largest fractional change of any pixel.
    ///
    /// Return
    /// ----------
    /// * A [`StepReport`]. On error `x` is unchanged.
    ///
    /// Errors
    /// ----------
    /// * [`DopplerError::ShapeMismatch`] if `x` has the wrong length,
    /// * [`DopplerError::InvalidImage`] if `x` holds negative or non-finite values,
    /// * [`DopplerError::NonFiniteGradient`] when a gradient is not finite,
    /// * [`DopplerError::MultiplierSearch`] when the χ² aim cannot be met.
    pub fn step(&mut self, x: &mut [f64], caim: f64, rmax: f64) -> Result<StepReport, DopplerError> {
        let npix = self.projector.npix();
        if x.len() != npix {
            return Err(DopplerError::ShapeMismatch {
                context: "image vector",
                expected: npix,
                found: x.len(),
            });
        }
        if !x.iter().all(|v| v.is_finite() && *v >= 0.0) {
            return Err(DopplerError::InvalidImage(
                "pixels must be finite and >= 0".into(),
            ));
        }

        let f = self.lifted(x);
        let total: f64 = f.iter().sum();

        let (residual, chi2) = self.residuals(&f)?;

        let m = self.default_images(&f);
        let mut grad_s = vec![0.0; npix];
        let entropy = entropy_and_gradient(&f, &m, &mut grad_s);

        let ninv2 = -2.0 / self.ndata as f64;
        let weighted: Vec<f64> = izip!(&self.weights, &residual)
            .map(|(w, r)| ninv2 * w * r)
            .collect();
        let grad_c = self.projector.back_project(&weighted)?;

        if !grad_s.iter().all(|g| g.is_finite()) {
            return Err(DopplerError::NonFiniteGradient("entropy"));
        }
        if !grad_c.iter().all(|g| g.is_finite()) {
            return Err(DopplerError::NonFiniteGradient("chi**2"));
        }

        // metric norms: |g|² = Σ f g²
        let norm_s = izip!(&f, &grad_s).map(|(fi, g)| fi * g * g).sum::<f64>().sqrt();
        let norm_c = izip!(&f, &grad_c).map(|(fi, g)| fi * g * g).sum::<f64>().sqrt();
        let test = if norm_s > 0.0 && norm_c > 0.0 {
            0.5 * izip!(&f, &grad_s, &grad_c)
                .map(|(fi, gs, gc)| {
                    let d = gs / norm_s - gc / norm_c;
                    fi * d * d
                })
                .sum::<f64>()
        } else {
            0.0
        };

        let significant = |norm2: f64| norm2 > NEGLIGIBLE_DIRECTION * total;
        let null_step = |directions: usize| StepReport {
            chi2_before: chi2,
            chi2_after: chi2,
            chi2_predicted: chi2,
            entropy,
            alpha: self.alpha,
            test,
            grad_entropy: norm_s,
            grad_chi2: norm_c,
            directions,
            null_step: true,
        };

        // the data are already fitted at or below the aim
        if chi2 <= caim && !significant(norm_c * norm_c) {
            debug!("chi**2 = {chi2:.6} already at or below the aim {caim}, null step");
            return Ok(null_step(0));
        }

        let mut directions: Vec<Vec<f64>> = Vec::with_capacity(3);
        let mut projected: Vec<Vec<f64>> = Vec::with_capacity(3);
        // A·(e/|g|), signed so that entropy and χ² pull in opposite senses
        let mut mixed = vec![0.0; self.projector.nflux()];

        for (grad, norm, sign) in [(&grad_s, norm_s, 1.0), (&grad_c, norm_c, -1.0)] {
            if !significant(norm * norm) {
                continue;
            }
            let e: Vec<f64> = izip!(&f, grad).map(|(fi, g)| fi * g).collect();
            let ae = self.projector.project(&e)?;
            for (acc, a) in mixed.iter_mut().zip(&ae) {
                *acc += sign * a / norm;
            }
            directions.push(e);
            projected.push(ae);
        }

        if directions.is_empty() {
            debug!("negligible search directions, null step at chi**2 = {chi2:.6}");
            return Ok(null_step(0));
        }

        let curvature = self.curvature_times(&mixed)?;
        let e3: Vec<f64> = izip!(&f, &curvature).map(|(fi, h)| fi * h).collect();
        let e3_norm2: f64 = izip!(&f, &e3).map(|(fi, e)| e * e / fi).sum();
        if e3.iter().all(|v| v.is_finite()) && significant(e3_norm2) {
            projected.push(self.projector.project(&e3)?);
            directions.push(e3);
        }

        let n = directions.len();
        let chi2_norm = 2.0 / self.ndata as f64;
        let s_vec = DVector::from_fn(n, |i, _| dot(&grad_s, &directions[i]));
        let c_vec = DVector::from_fn(n, |i, _| dot(&grad_c, &directions[i]));
        let g_mat = DMatrix::from_fn(n, n, |i, j| {
            izip!(&directions[i], &directions[j], &f)
                .map(|(a, b, fi)| a * b / fi)
                .sum::<f64>()
        });
        let m_mat = DMatrix::from_fn(n, n, |i, j| {
            chi2_norm
                * izip!(&self.weights, &projected[i], &projected[j])
                    .map(|(w, a, b)| w * a * b)
                    .sum::<f64>()
        });

        let Some(model) = QuadraticModel::new(s_vec, c_vec, g_mat, m_mat) else {
            debug!("degenerate search subspace, null step at chi**2 = {chi2:.6}");
            return Ok(null_step(n));
        };

        let l0sq = rmax * rmax * total;
        let sub = model.solve(chi2, caim, l0sq, self.alpha)?;

        let lower = (1.0 - rmax).max(PIXEL_FLOOR_FRACTION);
        let upper = 1.0 + rmax;
        let mut updated = f.clone();
        for (i, e) in directions.iter().enumerate() {
            let coeff = sub.coeffs[i];
            for (u, ei) in updated.iter_mut().zip(e) {
                *u += coeff * ei;
            }
        }
        for (u, fi) in updated.iter_mut().zip(&f) {
            *u = u.clamp(fi * lower, fi * upper);
        }
        if !updated.iter().all(|v| v.is_finite()) {
            return Err(DopplerError::NonFiniteGradient("image update"));
        }

        let chi2_after = self.chi_squared(&updated)?;
        x.copy_from_slice(&updated);
        if sub.alpha > 0.0 {
            self.alpha = sub.alpha;
        }

        trace!(
            "step: chi2 {chi2:.6} -> {chi2_after:.6} (model {:.6}, min {:.6}), alpha = {:e}",
            sub.chi2_predicted,
            sub.chi2_min,
            sub.alpha
        );

        Ok(StepReport {
            chi2_before: chi2,
            chi2_after,
            chi2_predicted: sub.chi2_predicted,
            entropy,
            alpha: sub.alpha,
            test,
            grad_entropy: norm_s,
            grad_chi2: norm_c,
            directions: n,
            null_step: false,
        })
    }
}
