//! # Velocity-space images
//!
//! An [`Image`] is one velocity-space map component: a 2D grid of square
//! pixels in (Vx, Vy), or a stack of such grids spaced in Vz, tagged with the
//! spectral line (or lines) it emits in.
//!
//! ## Layout
//!
//! Pixels are stored row-major with `ix` fastest, then `iy`, then `iz`:
//!
//! ```text
//! index = (iz * ny + iy) * nx + ix
//! ```
//!
//! Pixel centres are symmetric about zero velocity, so the pixel `(ix, iy, iz)`
//! sits at
//!
//! ```text
//! vx = vxy * (ix - (nx - 1) / 2)
//! vy = vxy * (iy - (ny - 1) / 2)
//! vz = vz  * (iz - (nz - 1) / 2)
//! ```
//!
//! ## Lines
//!
//! The same spatial map can stand for several transitions (e.g. a Balmer
//! series). Each [`Line`] then carries its own scale factor; a single-line
//! image carries none.
use serde::{Deserialize, Serialize};

use crate::constants::{KmPerSec, Nanometer};
use crate::doppler_errors::DopplerError;
use crate::map::default_image::DefaultImage;

/// One spectral line modelled by an [`Image`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Line {
    /// Rest wavelength of the transition
    pub wavelength: Nanometer,
    /// Systemic velocity of the line, km/s
    pub gamma: KmPerSec,
    /// Scale factor, present iff the image models more than one line
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl Line {
    /// A line of a single-line image (no scale factor).
    pub fn new(wavelength: Nanometer, gamma: KmPerSec) -> Self {
        Line {
            wavelength,
            gamma,
            scale: None,
        }
    }

    /// A line of a multi-line image.
    pub fn scaled(wavelength: Nanometer, gamma: KmPerSec, scale: f64) -> Self {
        Line {
            wavelength,
            gamma,
            scale: Some(scale),
        }
    }

    /// The factor applied to the image when projecting this line.
    #[inline]
    pub fn effective_scale(&self) -> f64 {
        self.scale.unwrap_or(1.0)
    }
}

/// Grid shape of an [`Image`].
///
/// The layer velocity only exists for stacked (3D) images, so it lives in the
/// variant rather than in an optional field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Dimensions {
    Flat {
        nx: usize,
        ny: usize,
    },
    Stacked {
        nx: usize,
        ny: usize,
        nz: usize,
        /// Velocity spacing between layers, km/s
        vz: KmPerSec,
    },
}

impl Dimensions {
    pub fn nx(&self) -> usize {
        match *self {
            Dimensions::Flat { nx, .. } | Dimensions::Stacked { nx, .. } => nx,
        }
    }

    pub fn ny(&self) -> usize {
        match *self {
            Dimensions::Flat { ny, .. } | Dimensions::Stacked { ny, .. } => ny,
        }
    }

    /// Number of layers; 1 for a flat image.
    pub fn nz(&self) -> usize {
        match *self {
            Dimensions::Flat { .. } => 1,
            Dimensions::Stacked { nz, .. } => nz,
        }
    }

    pub fn layer_velocity(&self) -> Option<KmPerSec> {
        match *self {
            Dimensions::Flat { .. } => None,
            Dimensions::Stacked { vz, .. } => Some(vz),
        }
    }

    pub fn is_stacked(&self) -> bool {
        matches!(self, Dimensions::Stacked { .. })
    }

    /// Total number of pixels.
    pub fn npix(&self) -> usize {
        self.nx() * self.ny() * self.nz()
    }
}

/// One velocity-space map component.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Image {
    dims: Dimensions,
    vxy: KmPerSec,
    lines: Vec<Line>,
    #[serde(default)]
    default: DefaultImage,
    data: Vec<f64>,
}

impl Image {
    /// Build and validate an image.
    ///
    /// Arguments
    /// -----------------
    /// * `data`: pixel intensities, `dims.npix()` values in `(iz, iy, ix)` order.
    /// * `dims`: grid shape (and layer velocity for stacked images).
    /// * `vxy`: pixel size in the Vx-Vy plane, km/s.
    /// * `lines`: the line or lines this image emits in.
    ///
    /// Return
    /// ----------
    /// * The image with a uniform default, or [`DopplerError::InvalidImage`].
    pub fn new(
        data: Vec<f64>,
        dims: Dimensions,
        vxy: KmPerSec,
        lines: Vec<Line>,
    ) -> Result<Self, DopplerError> {
        let image = Image {
            dims,
            vxy,
            lines,
            default: DefaultImage::Uniform,
            data,
        };
        image.validate()?;
        Ok(image)
    }

    /// Replace the default image model used by the entropy.
    pub fn with_default(mut self, default: DefaultImage) -> Result<Self, DopplerError> {
        self.default = default;
        self.validate()?;
        Ok(self)
    }

    /// Check every structural invariant of the image.
    ///
    /// Used after deserialisation, where the constructor is bypassed.
    pub fn validate(&self) -> Result<(), DopplerError> {
        let invalid = |msg: String| Err(DopplerError::InvalidImage(msg));

        if self.dims.nx() == 0 || self.dims.ny() == 0 || self.dims.nz() == 0 {
            return invalid("every image dimension must be at least 1".into());
        }
        if !(self.vxy.is_finite() && self.vxy > 0.0) {
            return invalid(format!("vxy must be > 0, got {}", self.vxy));
        }
        if let Some(vz) = self.dims.layer_velocity() {
            if !(vz.is_finite() && vz > 0.0) {
                return invalid(format!("vz must be > 0, got {vz}"));
            }
        }
        if self.data.len() != self.dims.npix() {
            return Err(DopplerError::ShapeMismatch {
                context: "image data",
                expected: self.dims.npix(),
                found: self.data.len(),
            });
        }

        if self.lines.is_empty() {
            return invalid("an image needs at least one line".into());
        }
        let multi = self.lines.len() > 1;
        for (i, line) in self.lines.iter().enumerate() {
            if !(line.wavelength.is_finite() && line.wavelength > 0.0) {
                return invalid(format!(
                    "line {i}: wavelength must be > 0, got {}",
                    line.wavelength
                ));
            }
            if !line.gamma.is_finite() {
                return invalid(format!("line {i}: gamma is not finite"));
            }
            match (multi, line.scale) {
                (true, None) => {
                    return invalid(format!(
                        "line {i}: scale factors are required when an image has several lines"
                    ))
                }
                (false, Some(_)) => {
                    return invalid("a single-line image must not carry a scale factor".into())
                }
                (true, Some(s)) if !s.is_finite() => {
                    return invalid(format!("line {i}: scale factor is not finite"))
                }
                _ => {}
            }
        }

        if let Some((i, v)) = self
            .data
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
        {
            return invalid(format!("pixel {i} must be finite and >= 0, got {v}"));
        }

        self.default.validate(&self.dims)
    }

    pub fn dims(&self) -> &Dimensions {
        &self.dims
    }

    pub fn vxy(&self) -> KmPerSec {
        self.vxy
    }

    pub fn lines(&self) -> &[Line] {
        &self.lines
    }

    pub fn default_image(&self) -> &DefaultImage {
        &self.default
    }

    pub fn data(&self) -> &[f64] {
        &self.data
    }

    /// Mutable access to the intensities. The slice length pins the shape.
    pub fn data_mut(&mut self) -> &mut [f64] {
        &mut self.data
    }

    /// Velocity-space area (2D) or volume (3D) of one pixel.
    pub fn pixel_measure(&self) -> f64 {
        self.vxy * self.vxy * self.dims.layer_velocity().unwrap_or(1.0)
    }

    /// Velocity coordinates of the pixel centres along x, y and z.
    ///
    /// Return
    /// ----------
    /// * `(vx, vy, vz)` with `nx`, `ny` and `nz` entries; `vz` is `[0.0]` for a flat image.
    pub fn axis_velocities(&self) -> (Vec<KmPerSec>, Vec<KmPerSec>, Vec<KmPerSec>) {
        let centred = |n: usize, step: f64| -> Vec<f64> {
            let mid = (n as f64 - 1.0) / 2.0;
            (0..n).map(|i| step * (i as f64 - mid)).collect()
        };
        let vx = centred(self.dims.nx(), self.vxy);
        let vy = centred(self.dims.ny(), self.vxy);
        let vz = match self.dims.layer_velocity() {
            Some(vz) => centred(self.dims.nz(), vz),
            None => vec![0.0],
        };
        (vx, vy, vz)
    }
}
