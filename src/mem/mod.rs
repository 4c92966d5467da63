//! # Maximum entropy iteration parameters
//!
//! This module defines the [`MemitParams`] configuration struct and its
//! builder, which control how the MEM iterations of
//! [`memit`](crate::memit::memit) approach the target χ² and when they stop.
//!
//! ## Parameters
//!
//! - `niter` – maximum number of outer iterations,
//! - `caim` – reduced χ² to aim for,
//! - `tlim` – fractional χ² change below which a run at the target counts as converged,
//! - `rmax` – largest fractional change any pixel may make in one iteration,
//! - `chi2_tolerance` – relative distance from `caim` accepted as "at the target",
//! - `diverge_run` – number of consecutive χ² increases above the target that ends a run.
//!
//! ## Example
//!
//! ```rust
//! use doppler::mem::MemitParams;
//!
//! let params = MemitParams::builder()
//!     .niter(200)
//!     .caim(1.0)
//!     .rmax(0.2)
//!     .build()
//!     .unwrap();
//! assert_eq!(params.tlim, 1.0e-4);
//! ```
//!
//! ## See also
//!
//! * [`crate::mem::engine::MemEngine`] – one MEM step.
//! * [`crate::memit::memit`] – the iteration controller consuming these parameters.
use std::cmp::Ordering::Greater;
use std::fmt;

use crate::doppler_errors::DopplerError;

pub mod engine;
pub mod entropy;
mod subspace;

/// Configuration of a MEM run.
///
/// Defaults
/// -----------------
/// * `niter`: 50
/// * `caim`: 1.0
/// * `tlim`: 1.0e-4
/// * `rmax`: 0.2
/// * `chi2_tolerance`: 0.005
/// * `diverge_run`: 5
///
/// Notes & Validation
/// -----------------
/// * `niter ≥ 1`, `diverge_run ≥ 1`.
/// * `caim`, `tlim`, `rmax`, `chi2_tolerance` must be finite and `> 0`.
#[derive(Debug, Clone, PartialEq)]
pub struct MemitParams {
    pub niter: usize,
    pub caim: f64,
    pub tlim: f64,
    pub rmax: f64,
    /// Relative tolerance on `caim` used by the convergence and divergence tests.
    pub chi2_tolerance: f64,
    /// Consecutive χ² increases above the target after which the run is declared diverged.
    pub diverge_run: usize,
}

impl MemitParams {
    /// Equivalent to [`MemitParams::default()`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Fluent builder starting from the defaults.
    pub fn builder() -> MemitParamsBuilder {
        MemitParamsBuilder::new()
    }
}

impl Default for MemitParams {
    fn default() -> Self {
        MemitParams {
            niter: 50,
            caim: 1.0,
            tlim: 1.0e-4,
            rmax: 0.2,
            chi2_tolerance: 0.005,
            diverge_run: 5,
        }
    }
}

/// Builder for [`MemitParams`], with validation.
#[derive(Debug, Clone)]
pub struct MemitParamsBuilder {
    params: MemitParams,
}

impl Default for MemitParamsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl MemitParamsBuilder {
    pub fn new() -> Self {
        Self {
            params: MemitParams::default(),
        }
    }

    pub fn niter(mut self, v: usize) -> Self {
        self.params.niter = v;
        self
    }
    pub fn caim(mut self, v: f64) -> Self {
        self.params.caim = v;
        self
    }
    pub fn tlim(mut self, v: f64) -> Self {
        self.params.tlim = v;
        self
    }
    pub fn rmax(mut self, v: f64) -> Self {
        self.params.rmax = v;
        self
    }
    pub fn chi2_tolerance(mut self, v: f64) -> Self {
        self.params.chi2_tolerance = v;
        self
    }
    pub fn diverge_run(mut self, v: usize) -> Self {
        self.params.diverge_run = v;
        self
    }

    /// Return true iff x > 0.0, finite and comparable (i.e., not NaN).
    #[inline]
    fn gt0(x: f64) -> bool {
        x.is_finite() && x.partial_cmp(&0.0) == Some(Greater)
    }

    /// Finalize the builder.
    ///
    /// Return
    /// ----------
    /// * `Ok(MemitParams)` if every value is valid,
    /// * `Err(DopplerError::InvalidParameter)` naming the first offending value otherwise.
    pub fn build(self) -> Result<MemitParams, DopplerError> {
        let p = &self.params;

        if p.niter == 0 {
            return Err(DopplerError::InvalidParameter(
                "niter must be >= 1".into(),
            ));
        }
        if p.diverge_run == 0 {
            return Err(DopplerError::InvalidParameter(
                "diverge_run must be >= 1".into(),
            ));
        }
        for (name, value) in [
            ("caim", p.caim),
            ("tlim", p.tlim),
            ("rmax", p.rmax),
            ("chi2_tolerance", p.chi2_tolerance),
        ] {
            if !Self::gt0(value) {
                return Err(DopplerError::InvalidParameter(format!(
                    "{name} must be > 0, got {value}"
                )));
            }
        }

        Ok(self.params)
    }
}

impl fmt::Display for MemitParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            writeln!(f, "MEM iteration parameters")?;
            writeln!(f, "------------------------")?;
            writeln!(f, "  niter          = {:<12} # maximum iterations", self.niter)?;
            writeln!(f, "  caim           = {:<12.4} # target reduced chi**2", self.caim)?;
            writeln!(f, "  tlim           = {:<12.1e} # fractional chi**2 change to stop", self.tlim)?;
            writeln!(f, "  rmax           = {:<12.3} # maximum fractional pixel change", self.rmax)?;
            writeln!(f, "  chi2_tolerance = {:<12.1e} # relative tolerance on caim", self.chi2_tolerance)?;
            write!(f, "  diverge_run    = {:<12} # rises above caim before giving up", self.diverge_run)
        } else {
            write!(
                f,
                "MemitParams(niter={}, caim={}, tlim={:e}, rmax={}, chi2_tolerance={:e}, diverge_run={})",
                self.niter, self.caim, self.tlim, self.rmax, self.chi2_tolerance, self.diverge_run
            )
        }
    }
}
