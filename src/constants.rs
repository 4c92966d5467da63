//! # Constants and type definitions for doppler
//!
//! Physical constants, conversion factors and the unit aliases shared by the
//! image model, the projection operator and the MEM engine.
//!
//! ## Overview
//!
//! - Speed of light and the Gaussian FWHM → sigma factor
//! - Numerical floors used to keep the entropy well defined
//! - Unit type aliases used across the crate

// -------------------------------------------------------------------------------------------------
// Physical constants and unit conversions
// -------------------------------------------------------------------------------------------------

/// 2π, useful for trigonometric conversions
pub const DPI: f64 = 2. * std::f64::consts::PI;

/// Speed of light in km/s
pub const VLIGHT: f64 = 2.99792458e5;

/// FWHM of a Gaussian divided by its standard deviation, 2·sqrt(2·ln 2)
pub const EFAC: f64 = 2.354_820_045_030_949_3;

/// Half-width, in standard deviations, beyond which the instrumental profile is truncated
pub const PROFILE_NSIGMA: f64 = 5.0;

// -------------------------------------------------------------------------------------------------
// Numerical floors
// -------------------------------------------------------------------------------------------------

/// Fraction of the image mean given to pixels that are exactly zero before iterating
pub const ZERO_PIXEL_LIFT: f64 = 1e-6;

/// Smallest fraction of its value a pixel may keep in one step when `rmax >= 1`
pub const PIXEL_FLOOR_FRACTION: f64 = 1e-3;

// -------------------------------------------------------------------------------------------------
// Type aliases
// -------------------------------------------------------------------------------------------------

/// Velocity in km/s
pub type KmPerSec = f64;
/// Wavelength, in whatever unit the map and the data agree on (nm by convention)
pub type Nanometer = f64;
/// Orbital phase, periodic with period 1
pub type Phase = f64;
