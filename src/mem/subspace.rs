//! Quadratic models of entropy and χ² on the few-direction search subspace,
//! and the search for the Lagrange multiplier α that hits the χ² aim.
//!
//! With `n` search directions `e_i` the step is `δf = Σ x_i e_i`, and to
//! second order
//!
//! ```text
//! S(x) = S0 + s·x − ½ xᵀ g x
//! C(x) = C0 + c·x + ½ xᵀ M x
//! ```
//!
//! where `g` is the entropy metric restricted to the subspace and `M` the
//! χ² curvature. Both are diagonalised simultaneously: `g` is whitened from
//! its eigen-decomposition, then `M` is diagonalised in the whitened basis.
//! In those coordinates `z` the models separate:
//!
//! ```text
//! S(z) = S0 + Σ s_j z_j − ½ Σ z_j²
//! C(z) = C0 + Σ c_j z_j + ½ Σ γ_j z_j²
//! ```
//!
//! and maximising `αS − C` under the distance bound `|z|² ≤ l0²` gives
//! `z_j = (α s_j − c_j) / (α + γ_j + P)` with `P ≥ 0` the distance penalty.
use nalgebra::{DMatrix, DVector, SymmetricEigen};

use crate::doppler_errors::DopplerError;

/// Eigenvalues of the metric below this fraction of the largest are dropped.
const METRIC_EIGEN_FLOOR: f64 = 1e-12;
/// Fraction of the distance to the minimum χ² attempted in one step.
const AIM_FRACTION: f64 = 2.0 / 3.0;
/// Decades tried on each side of the previous α before giving up.
const MAX_BRACKET_TRIALS: usize = 60;
const MAX_BISECTIONS: usize = 200;
const PENALTY_BISECTIONS: usize = 100;

/// Outcome of the subspace search.
#[derive(Debug, Clone)]
pub(crate) struct SubspaceStep {
    /// Coefficients of the step on the original search directions
    pub coeffs: DVector<f64>,
    pub alpha: f64,
    /// χ² predicted by the quadratic model
    pub chi2_predicted: f64,
    /// Lowest χ² reachable within the distance bound
    pub chi2_min: f64,
}

#[derive(Debug, Clone)]
pub(crate) struct QuadraticModel {
    /// Maps `z` back onto the original directions
    basis: DMatrix<f64>,
    s: DVector<f64>,
    c: DVector<f64>,
    gamma: DVector<f64>,
}

impl QuadraticModel {
    /// Diagonalise the subspace models.
    ///
    /// Arguments
    /// -----------------
    /// * `s`, `c`: entropy and χ² gradients along each direction.
    /// * `g`: metric of the directions (symmetric, positive semi-definite).
    /// * `m`: χ² curvature of the directions (symmetric, positive semi-definite).
    ///
    /// Return
    /// ----------
    /// * `None` when the directions span nothing (all metric eigenvalues negligible).
    pub fn new(
        s: DVector<f64>,
        c: DVector<f64>,
        g: DMatrix<f64>,
        m: DMatrix<f64>,
    ) -> Option<Self> {
        let eig_g = SymmetricEigen::new(g);
        let lmax = eig_g.eigenvalues.max();
        if !(lmax > 0.0) {
            return None;
        }

        let kept: Vec<usize> = (0..eig_g.eigenvalues.len())
            .filter(|&i| eig_g.eigenvalues[i] > METRIC_EIGEN_FLOOR * lmax)
            .collect();
        let n = s.len();
        let mut whiten = DMatrix::<f64>::zeros(n, kept.len());
        for (col, &i) in kept.iter().enumerate() {
            let scale = 1.0 / eig_g.eigenvalues[i].sqrt();
            whiten.set_column(col, &(eig_g.eigenvectors.column(i) * scale));
        }

        let m_white = whiten.transpose() * m * &whiten;
        // symmetrise away rounding before the second decomposition
        let m_white = (&m_white + m_white.transpose()) * 0.5;
        let eig_m = SymmetricEigen::new(m_white);

        let basis = whiten * &eig_m.eigenvectors;
        let s = basis.transpose() * s;
        let c = basis.transpose() * c;
        let gamma = eig_m.eigenvalues.map(|v| v.max(0.0));

        Some(QuadraticModel { basis, s, c, gamma })
    }

    fn z_at(&self, alpha: f64, penalty: f64) -> DVector<f64> {
        DVector::from_fn(self.s.len(), |j, _| {
            let num = alpha * self.s[j] - self.c[j];
            let den = alpha + self.gamma[j] + penalty;
            if num == 0.0 {
                0.0
            } else {
                num / den
            }
        })
    }

    /// Step maximising `αS − C` within `|z|² ≤ l0sq`.
    fn constrained_z(&self, alpha: f64, l0sq: f64) -> DVector<f64> {
        let free = self.z_at(alpha, 0.0);
        if free.iter().all(|z| z.is_finite()) && free.norm_squared() <= l0sq {
            return free;
        }

        // |z(P)| ≤ |α s − c| / P, so this P always satisfies the bound
        let numer = DVector::from_fn(self.s.len(), |j, _| alpha * self.s[j] - self.c[j]);
        let mut lo = 0.0;
        let mut hi = (numer.norm_squared() / l0sq).sqrt();
        for _ in 0..PENALTY_BISECTIONS {
            let mid = 0.5 * (lo + hi);
            if mid <= lo || mid >= hi {
                break;
            }
            let z = self.z_at(alpha, mid);
            if z.iter().all(|v| v.is_finite()) && z.norm_squared() <= l0sq {
                hi = mid;
            } else {
                lo = mid;
            }
        }
        self.z_at(alpha, hi)
    }

    fn chi2_change(&self, z: &DVector<f64>) -> f64 {
        z.iter()
            .enumerate()
            .map(|(j, zj)| self.c[j] * zj + 0.5 * self.gamma[j] * zj * zj)
            .sum()
    }

    /// Find α so that the model χ² meets this step's aim.
    ///
    /// The aim is `max(caim, C0 − ⅔(C0 − Cmin))`, where `Cmin` is the lowest
    /// model χ² within the distance bound. The search expands decade by
    /// decade from `alpha_start` until the aim is bracketed, then bisects in
    /// log α.
    ///
    /// Return
    /// ----------
    /// * The step, or [`DopplerError::MultiplierSearch`] when χ² has to fall
    ///   but cannot, or when no α meets the aim.
    pub fn solve(
        &self,
        chi2: f64,
        caim: f64,
        l0sq: f64,
        alpha_start: f64,
    ) -> Result<SubspaceStep, DopplerError> {
        let predict = |alpha: f64| -> Result<(DVector<f64>, f64), DopplerError> {
            let z = self.constrained_z(alpha, l0sq);
            let c = chi2 + self.chi2_change(&z);
            if !c.is_finite() {
                return Err(DopplerError::MultiplierSearch(format!(
                    "model chi**2 is not finite at alpha = {alpha:e}"
                )));
            }
            Ok((z, c))
        };

        let (z0, chi2_min) = predict(0.0)?;
        if chi2 > caim && chi2_min >= chi2 {
            return Err(DopplerError::MultiplierSearch(format!(
                "chi**2 = {chi2:.6} must fall towards {caim} but the search subspace has no descent"
            )));
        }
        let aim = caim.max(chi2 - AIM_FRACTION * (chi2 - chi2_min));

        let finish = |alpha: f64, z: DVector<f64>, chi2_predicted: f64| SubspaceStep {
            coeffs: &self.basis * z,
            alpha,
            chi2_predicted,
            chi2_min,
        };

        if chi2_min >= aim {
            return Ok(finish(0.0, z0, chi2_min));
        }

        let start = if alpha_start.is_finite() && alpha_start > 0.0 {
            alpha_start
        } else {
            1.0
        };
        let (_, c_start) = predict(start)?;
        let (mut lo, mut hi) = (start, start);

        if c_start < aim {
            // χ² still below the aim: more entropy is affordable
            for trial in 0..MAX_BRACKET_TRIALS {
                lo = hi;
                hi *= 10.0;
                let (z, c) = predict(hi)?;
                if c >= aim {
                    break;
                }
                if trial + 1 == MAX_BRACKET_TRIALS {
                    // entropy-dominated for every α tried: take the largest
                    return Ok(finish(hi, z, c));
                }
            }
        } else {
            let mut found = false;
            for _ in 0..MAX_BRACKET_TRIALS {
                hi = lo;
                lo /= 10.0;
                let (_, c) = predict(lo)?;
                if c < aim {
                    found = true;
                    break;
                }
            }
            if !found {
                return Err(DopplerError::MultiplierSearch(format!(
                    "no alpha down to {lo:e} brings chi**2 below {aim:.6}"
                )));
            }
        }

        let tolerance = 1e-10 * aim.abs().max(f64::MIN_POSITIVE);
        let (mut z_best, mut c_best) = predict(lo)?;
        let mut alpha = lo;
        for _ in 0..MAX_BISECTIONS {
            let mid = (lo * hi).sqrt();
            if mid <= lo || mid >= hi {
                break;
            }
            let (z, c) = predict(mid)?;
            let hit = (c - aim).abs() <= tolerance;
            if c < aim {
                lo = mid;
            } else {
                hi = mid;
            }
            if c < aim || hit {
                alpha = mid;
                z_best = z;
                c_best = c;
            }
            if hit {
                break;
            }
        }

        Ok(finish(alpha, z_best, c_best))
    }
}

#[cfg(test)]
mod subspace_test {
    use super::*;
    use approx::assert_relative_eq;

    fn model() -> QuadraticModel {
        let s = DVector::from_vec(vec![1.0, -0.5]);
        let c = DVector::from_vec(vec![-2.0, -1.0]);
        let g = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.0]);
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        QuadraticModel::new(s, c, g, m).unwrap()
    }

    #[test]
    fn test_basis_diagonalises_both_models() {
        let g = DMatrix::from_row_slice(2, 2, &[2.0, 0.3, 0.3, 1.0]);
        let m = DMatrix::from_row_slice(2, 2, &[4.0, 1.0, 1.0, 3.0]);
        let q = model();
        let gg = q.basis.transpose() * g * &q.basis;
        let mm = q.basis.transpose() * m * &q.basis;
        assert_relative_eq!(gg, DMatrix::identity(2, 2), epsilon = 1e-12);
        assert_relative_eq!(mm[(0, 1)], 0.0, epsilon = 1e-12);
        assert_relative_eq!(mm[(0, 0)], q.gamma[0], epsilon = 1e-12);
    }

    #[test]
    fn test_distance_bound() {
        let q = model();
        for alpha in [0.0, 0.1, 1.0, 100.0] {
            let z = q.constrained_z(alpha, 0.01);
            assert!(z.norm_squared() <= 0.01 * (1.0 + 1e-12));
        }
    }

    #[test]
    fn test_aim_is_met() {
        let q = model();
        let chi2 = 10.0;
        let step = q.solve(chi2, 1.0, 100.0, 1.0).unwrap();
        let aim = 1.0_f64.max(chi2 - AIM_FRACTION * (chi2 - step.chi2_min));
        assert!(step.chi2_min < chi2);
        assert_relative_eq!(step.chi2_predicted, aim, max_relative = 1e-8);
        assert!(step.alpha > 0.0);
    }

    #[test]
    fn test_no_descent_is_an_error() {
        // χ² gradient zero and flat: nothing lowers χ²
        let s = DVector::from_vec(vec![1.0]);
        let c = DVector::from_vec(vec![0.0]);
        let g = DMatrix::from_row_slice(1, 1, &[1.0]);
        let m = DMatrix::from_row_slice(1, 1, &[0.0]);
        let q = QuadraticModel::new(s, c, g, m).unwrap();
        let err = q.solve(5.0, 1.0, 1.0, 1.0).unwrap_err();
        assert!(matches!(err, DopplerError::MultiplierSearch(_)));
    }

    #[test]
    fn test_degenerate_directions() {
        let s = DVector::from_vec(vec![0.0, 0.0]);
        let g = DMatrix::zeros(2, 2);
        assert!(QuadraticModel::new(s.clone(), s, g.clone(), g).is_none());
    }
}
