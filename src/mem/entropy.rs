//! Skilling–Bryan entropy.
//!
//! ```text
//! S(f) = Σ (f − m − f ln(f/m))        ∂S/∂f = −ln(f/m)        −∂²S/∂f² = 1/f
//! ```
//!
//! `S ≤ 0` with equality iff `f = m`. The negative Hessian `diag(1/f)` is the
//! metric in which MEM steps are measured.

/// Entropy of `f` relative to the default `m`; writes `∂S/∂f` into `grad`.
///
/// Both `f` and `m` must be strictly positive.
pub fn entropy_and_gradient(f: &[f64], m: &[f64], grad: &mut [f64]) -> f64 {
    let mut s = 0.0;
    for ((fi, mi), gi) in f.iter().zip(m).zip(grad.iter_mut()) {
        let log_ratio = (fi / mi).ln();
        *gi = -log_ratio;
        s += fi - mi - fi * log_ratio;
    }
    s
}

/// Lift exact zeros of `f` to `lift × mean(f)` (or `lift` if the image is blank).
///
/// Return
/// ----------
/// * The number of pixels changed.
pub fn lift_zero_pixels(f: &mut [f64], lift: f64) -> usize {
    let mean = f.iter().sum::<f64>() / f.len() as f64;
    let floor = if mean > 0.0 { lift * mean } else { lift };
    let mut count = 0;
    for v in f.iter_mut().filter(|v| **v <= 0.0) {
        *v = floor;
        count += 1;
    }
    count
}

#[cfg(test)]
mod entropy_test {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_entropy_maximum_at_default() {
        let m = vec![2.0; 5];
        let mut grad = vec![1.0; 5];
        let s = entropy_and_gradient(&m, &m, &mut grad);
        assert_eq!(s, 0.0);
        assert!(grad.iter().all(|g| *g == 0.0));

        let f = vec![1.0, 2.0, 3.0, 2.5, 1.5];
        let s = entropy_and_gradient(&f, &m, &mut grad);
        assert!(s < 0.0);
        assert_relative_eq!(grad[0], 2.0_f64.ln(), epsilon = 1e-14);
        assert_relative_eq!(grad[2], -(1.5_f64).ln(), epsilon = 1e-14);
    }

    #[test]
    fn test_gradient_matches_finite_difference() {
        let f = vec![0.3, 1.7, 0.9];
        let m = vec![1.0, 1.2, 0.8];
        let mut grad = vec![0.0; 3];
        let s0 = entropy_and_gradient(&f, &m, &mut grad);

        let h = 1e-7;
        for i in 0..3 {
            let mut fp = f.clone();
            fp[i] += h;
            let mut scratch = vec![0.0; 3];
            let s1 = entropy_and_gradient(&fp, &m, &mut scratch);
            assert_relative_eq!((s1 - s0) / h, grad[i], epsilon = 1e-5);
        }
    }

    #[test]
    fn test_lift_zero_pixels() {
        let mut f = vec![0.0, 2.0, 0.0, 2.0];
        assert_eq!(lift_zero_pixels(&mut f, 1e-6), 2);
        assert_eq!(f, vec![1e-6, 2.0, 1e-6, 2.0]);

        let mut blank = vec![0.0; 3];
        lift_zero_pixels(&mut blank, 1e-6);
        assert_eq!(blank, vec![1e-6; 3]);
    }
}
