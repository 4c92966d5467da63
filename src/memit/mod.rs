//! # MEM iteration controller
//!
//! Runs [`MemEngine`] steps on a [`Map`] until the reduced χ² reaches its
//! target and stops moving, the iteration budget runs out, the caller
//! cancels, or χ² keeps rising above the target.
//!
//! ## Stopping rules
//!
//! After every step, with `C` the χ² of the updated map:
//!
//! * **Converged** – `|C − caim| ≤ chi2_tolerance · caim` and the fractional
//!   χ² change of the step is below `tlim`.
//! * **Diverged** – `C > caim · (1 + chi2_tolerance)` and `C` rose over the
//!   step, for `diverge_run` consecutive steps.
//! * **ExhaustedIterations** – `niter` steps done, or `should_cancel()`
//!   returned true between two steps.
//!
//! Numerical failures inside a step end the run with
//! [`DopplerError::IterationFailed`]; the map then holds the last image that
//! passed every check.
//!
//! ## Example
//!
//! ```rust,no_run
//! use doppler::mem::MemitParams;
//! use doppler::memit::{memit, MemitStatus};
//! use doppler::storage::{load_data, load_map, StorageConfig};
//!
//! let store = StorageConfig::default();
//! let mut map = load_map(&store, "start").unwrap();
//! let data = load_data(&store, "spectra").unwrap();
//! let params = MemitParams::builder().niter(100).build().unwrap();
//!
//! let outcome = memit(&mut map, &data, &params).unwrap();
//! assert_eq!(outcome.status, MemitStatus::Converged);
//! ```
use log::{debug, info, warn};

use crate::dataset::Dataset;
use crate::doppler_errors::DopplerError;
use crate::map::Map;
use crate::mem::engine::{MemEngine, StepReport};
use crate::mem::MemitParams;

#[cfg(feature = "progress")]
pub mod progress_bar;

/// How a MEM run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemitStatus {
    Converged,
    ExhaustedIterations { cancelled: bool },
    Diverged,
}

/// Diagnostics of one iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IterationRecord {
    /// 1-based iteration number
    pub iteration: usize,
    /// Reduced χ² after the iteration
    pub chi2: f64,
    /// Entropy before the iteration
    pub entropy: f64,
    pub test: f64,
    pub alpha: f64,
}

impl From<(usize, &StepReport)> for IterationRecord {
    fn from((iteration, report): (usize, &StepReport)) -> Self {
        IterationRecord {
            iteration,
            chi2: report.chi2_after,
            entropy: report.entropy,
            test: report.test,
            alpha: report.alpha,
        }
    }
}

/// Result of a MEM run.
#[derive(Debug, Clone, PartialEq)]
pub struct MemitOutcome {
    pub status: MemitStatus,
    /// Number of steps taken
    pub iterations: usize,
    /// Reduced χ² of the final map
    pub chi2: f64,
    pub history: Vec<IterationRecord>,
}

/// Fractional χ² change of one step.
fn fractional_change(before: f64, after: f64) -> f64 {
    if before > 0.0 {
        (after - before).abs() / before
    } else {
        (after - before).abs()
    }
}

/// Iterate `map` towards the maximum entropy solution at `params.caim`.
///
/// Equivalent to [`memit_with_cancel`] with a closure that never cancels.
pub fn memit(
    map: &mut Map,
    data: &Dataset,
    params: &MemitParams,
) -> Result<MemitOutcome, DopplerError> {
    memit_with_cancel(map, data, params, || false)
}

/// Iterate `map` towards the maximum entropy solution, polling
/// `should_cancel()` before every iteration.
///
/// Arguments
/// -----------------
/// * `map`: starting images, overwritten in place.
/// * `data`: spectra to fit.
/// * `params`: run configuration, see [`MemitParams`].
/// * `should_cancel`: returning `true` stops the run before the next step.
///
/// Return
/// ----------
/// * A [`MemitOutcome`] with the stop reason and per-iteration history.
///
/// Errors
/// ----------
/// * Structural errors from validating `map` and `data`, before any step,
/// * [`DopplerError::IterationFailed`] wrapping the numerical error of a step.
pub fn memit_with_cancel<F>(
    map: &mut Map,
    data: &Dataset,
    params: &MemitParams,
    should_cancel: F,
) -> Result<MemitOutcome, DopplerError>
where
    F: FnMut() -> bool,
{
    let mut engine = MemEngine::new(map, data)?;
    let x = map.flatten();
    let chi2 = engine.chi_squared(&x)?;

    info!(
        "memit: {} pixels, {} data points, initial chi**2 = {chi2:.6}, aim = {}",
        x.len(),
        engine.ndata(),
        params.caim
    );

    iterate(map, x, chi2, params, should_cancel, |x| {
        engine.step(x, params.caim, params.rmax)
    })
}

/// The iteration loop of [`memit_with_cancel`], with the step supplied by `step`.
///
/// `x` is the flattened map and `chi2` its reduced χ²; the map is rewritten
/// from `x` when the loop ends, and also when a step fails.
fn iterate<F, S>(
    map: &mut Map,
    mut x: Vec<f64>,
    mut chi2: f64,
    params: &MemitParams,
    mut should_cancel: F,
    mut step: S,
) -> Result<MemitOutcome, DopplerError>
where
    F: FnMut() -> bool,
    S: FnMut(&mut [f64]) -> Result<StepReport, DopplerError>,
{
    #[cfg(feature = "progress")]
    let mut progress = progress_bar::MemitProgress::new(params.niter);

    let mut history = Vec::with_capacity(params.niter);
    let mut rising = 0;
    let mut status = MemitStatus::ExhaustedIterations { cancelled: false };
    let upper = params.caim * (1.0 + params.chi2_tolerance);

    for iteration in 1..=params.niter {
        if should_cancel() {
            info!("memit: cancelled before iteration {iteration}");
            status = MemitStatus::ExhaustedIterations { cancelled: true };
            break;
        }

        let report = match step(x.as_mut_slice()) {
            Ok(report) => report,
            Err(source) => {
                map.scatter(&x);
                #[cfg(feature = "progress")]
                progress.finish();
                warn!("memit: iteration {iteration} failed: {source}");
                return Err(DopplerError::IterationFailed {
                    iteration,
                    source: Box::new(source),
                });
            }
        };

        history.push(IterationRecord::from((iteration, &report)));
        chi2 = report.chi2_after;
        let change = fractional_change(report.chi2_before, chi2);

        debug!(
            "it {iteration:4}: chi**2 = {chi2:.6}, S = {:.5e}, test = {:.3e}, alpha = {:.3e}",
            report.entropy, report.test, report.alpha
        );
        #[cfg(feature = "progress")]
        progress.iteration(chi2);

        if (chi2 - params.caim).abs() <= params.chi2_tolerance * params.caim
            && change < params.tlim
        {
            status = MemitStatus::Converged;
            break;
        }

        if chi2 > upper && chi2 > report.chi2_before {
            rising += 1;
        } else {
            rising = 0;
        }
        if rising >= params.diverge_run {
            warn!("memit: chi**2 rose above the target for {rising} consecutive iterations");
            status = MemitStatus::Diverged;
            break;
        }
    }

    #[cfg(feature = "progress")]
    progress.finish();

    map.scatter(&x);
    let iterations = history.len();
    map.header.history.push(format!(
        "memit: {iterations} iterations, caim = {}, rmax = {}, chi**2 = {chi2:.6}, {status:?}",
        params.caim, params.rmax
    ));
    info!("memit: {status:?} after {iterations} iterations, chi**2 = {chi2:.6}");

    Ok(MemitOutcome {
        status,
        iterations,
        chi2,
        history,
    })
}
