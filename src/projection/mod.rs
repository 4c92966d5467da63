//! # Projection operator
//!
//! Maps velocity-space images to predicted line profiles (forward projection)
//! and distributes spectral residuals back onto the images (back-projection,
//! the exact transpose of the forward projection).
//!
//! ## Model
//!
//! A pixel at `(vx, vy, vz)` observed at orbital phase `φ` has radial velocity
//!
//! ```text
//! v = γ − vx·cos 2πφ + vy·sin 2πφ + vz
//! ```
//!
//! and is seen at `λ = λ0 (1 + v/c)` for every line `(λ0, γ, scale)` of its
//! image. Its intensity, times the line scale and the pixel's velocity-space
//! measure, is spread over the wavelength bins by a Gaussian of the
//! spectrum's FWHM and divided by each bin's velocity width, so predicted
//! spectra are flux per unit velocity. A spectrum with a finite exposure is
//! the mean of `nsub` projections across the exposure.
//!
//! ## Layout
//!
//! Both directions work on flat vectors:
//!
//! * image space: the pixels of every image of the map, concatenated in image order,
//! * data space: the flux points of every spectrum, concatenated in spectrum order.
//!
//! ## Parallelism
//!
//! Forward projection runs one spectrum per task; back-projection runs one
//! image row per task. Each task owns a disjoint output region, so there is
//! no shared mutable state. The weights come from a single routine used by
//! both directions, which is what makes them exact transposes.
//!
//! ## See also
//! ------------
//! * [`crate::mem::engine::MemEngine`] – the main consumer of both directions.
//! * [`crate::dataset::Spectrum::bin_edges`] – how bin edges are derived.
use std::ops::Range;

use rayon::prelude::*;

use crate::constants::{KmPerSec, Nanometer, DPI, EFAC, PROFILE_NSIGMA, VLIGHT};
use crate::dataset::Dataset;
use crate::doppler_errors::DopplerError;
use crate::map::{Line, Map};

mod kernel;

use kernel::for_each_bin_fraction;

/// Geometry of one image of the map.
#[derive(Debug, Clone)]
struct ImageBlock {
    offset: usize,
    nx: usize,
    ny: usize,
    vx: Vec<KmPerSec>,
    vy: Vec<KmPerSec>,
    vz: Vec<KmPerSec>,
    measure: f64,
    lines: Vec<Line>,
}

impl ImageBlock {
    fn npix(&self) -> usize {
        self.nx * self.ny * self.vz.len()
    }

    /// Largest |radial velocity| any pixel can reach, ignoring gamma.
    fn max_speed(&self) -> KmPerSec {
        let vmax = |v: &[f64]| v.iter().fold(0.0_f64, |m, x| m.max(x.abs()));
        vmax(&self.vx).hypot(vmax(&self.vy)) + vmax(&self.vz)
    }
}

/// Geometry of one spectrum.
#[derive(Debug, Clone)]
struct SpectrumGeometry {
    offset: usize,
    edges: Vec<Nanometer>,
    widths: Vec<Nanometer>,
    /// (cos 2πφ, sin 2πφ) of every sub-phase
    trig: Vec<(f64, f64)>,
    fwhm: KmPerSec,
}

impl SpectrumGeometry {
    fn nbins(&self) -> usize {
        self.widths.len()
    }
}

/// Precomputed forward/adjoint operator between a map layout and a dataset layout.
///
/// Only the geometry is kept: the operator applies to any image-space vector
/// of the right length, not just to the map it was built from.
#[derive(Debug, Clone)]
pub struct Projector {
    blocks: Vec<ImageBlock>,
    spectra: Vec<SpectrumGeometry>,
    npix: usize,
    nflux: usize,
}

impl Projector {
    /// Validate `map` and `data` and precompute the projection geometry.
    ///
    /// Return
    /// ----------
    /// * The operator, or a structural [`DopplerError`] when either input is
    ///   malformed or when no line of the map can reach any spectrum.
    pub fn new(map: &Map, data: &Dataset) -> Result<Self, DopplerError> {
        map.validate()?;
        data.validate()?;

        let mut blocks = Vec::with_capacity(map.images().len());
        let mut offset = 0;
        for image in map.images() {
            let (vx, vy, vz) = image.axis_velocities();
            blocks.push(ImageBlock {
                offset,
                nx: image.dims().nx(),
                ny: image.dims().ny(),
                vx,
                vy,
                vz,
                measure: image.pixel_measure(),
                lines: image.lines().to_vec(),
            });
            offset += image.dims().npix();
        }
        let npix = offset;

        let mut spectra = Vec::with_capacity(data.len());
        let mut offset = 0;
        for (index, spectrum) in data.spectra().iter().enumerate() {
            let edges = spectrum
                .bin_edges()
                .ok_or_else(|| DopplerError::InvalidSpectrum {
                    index,
                    reason: "at least two wavelength bins are needed".into(),
                })?;
            let widths = edges.windows(2).map(|e| e[1] - e[0]).collect();
            let trig = spectrum
                .sub_phases()
                .into_iter()
                .map(|phi| ((DPI * phi).cos(), (DPI * phi).sin()))
                .collect();
            spectra.push(SpectrumGeometry {
                offset,
                edges,
                widths,
                trig,
                fwhm: spectrum.fwhm,
            });
            offset += spectrum.flux.len();
        }
        let nflux = offset;

        let projector = Projector {
            blocks,
            spectra,
            npix,
            nflux,
        };
        if !projector.any_overlap() {
            return Err(DopplerError::NoOverlap);
        }
        Ok(projector)
    }

    /// Length of image-space vectors.
    pub fn npix(&self) -> usize {
        self.npix
    }

    /// Length of data-space vectors.
    pub fn nflux(&self) -> usize {
        self.nflux
    }

    pub fn nspectra(&self) -> usize {
        self.spectra.len()
    }

    /// Index range of spectrum `index` within a data-space vector, `None` past the last spectrum.
    pub fn spectrum_range(&self, index: usize) -> Option<Range<usize>> {
        self.spectra
            .get(index)
            .map(|geom| geom.offset..geom.offset + geom.nbins())
    }

    /// Index range of image `index` within an image-space vector, `None` past the last image.
    pub fn image_range(&self, index: usize) -> Option<Range<usize>> {
        self.blocks
            .get(index)
            .map(|block| block.offset..block.offset + block.npix())
    }

    fn any_overlap(&self) -> bool {
        self.blocks.iter().any(|block| {
            let vmax = block.max_speed();
            block.lines.iter().any(|line| {
                self.spectra.iter().any(|geom| {
                    let pad = PROFILE_NSIGMA * geom.fwhm / EFAC;
                    let lo = line.wavelength * (1.0 + (line.gamma - vmax - pad) / VLIGHT);
                    let hi = line.wavelength * (1.0 + (line.gamma + vmax + pad) / VLIGHT);
                    hi >= geom.edges[0] && lo <= geom.edges[geom.nbins()]
                })
            })
        })
    }

    /// Report every `(bin, weight)` through which one pixel feeds one spectrum.
    ///
    /// This is the single source of weights for both directions.
    #[inline]
    fn pixel_weights<F>(
        block: &ImageBlock,
        geom: &SpectrumGeometry,
        (vx, vy, vz): (f64, f64, f64),
        mut f: F,
    ) where
        F: FnMut(usize, f64),
    {
        let per_sub = block.measure / geom.trig.len() as f64;
        for line in &block.lines {
            let lambda0 = line.wavelength;
            let sigma = lambda0 * geom.fwhm / EFAC / VLIGHT;
            // frac / Δv_k = frac * λ0 / (c · Δλ_k)
            let factor = line.effective_scale() * per_sub * lambda0 / VLIGHT;
            for &(cosp, sinp) in &geom.trig {
                let v = line.gamma - vx * cosp + vy * sinp + vz;
                let centre = lambda0 * (1.0 + v / VLIGHT);
                for_each_bin_fraction(&geom.edges, centre, sigma, |k, frac| {
                    f(k, factor * frac / geom.widths[k]);
                });
            }
        }
    }

    /// Forward projection of `x` onto one spectrum's bins.
    fn project_into(&self, x: &[f64], geom: &SpectrumGeometry) -> Vec<f64> {
        let mut out = vec![0.0; geom.nbins()];
        for block in &self.blocks {
            let mut pix = block.offset;
            for &vz in &block.vz {
                for &vy in &block.vy {
                    for &vx in &block.vx {
                        let value = x[pix];
                        pix += 1;
                        if value == 0.0 {
                            continue;
                        }
                        Self::pixel_weights(block, geom, (vx, vy, vz), |k, w| {
                            out[k] += w * value;
                        });
                    }
                }
            }
        }
        out
    }

    /// Accumulate the transpose of the projection onto `out` (image space).
    ///
    /// `residuals` pairs each spectrum geometry with its slice of a data-space vector.
    fn back_project_into(&self, residuals: &[(&SpectrumGeometry, &[f64])], out: &mut [f64]) {
        for block in &self.blocks {
            let region = &mut out[block.offset..block.offset + block.npix()];
            region
                .par_chunks_mut(block.nx)
                .enumerate()
                .for_each(|(row, chunk)| {
                    let vz = block.vz[row / block.ny];
                    let vy = block.vy[row % block.ny];
                    for (g, &vx) in chunk.iter_mut().zip(&block.vx) {
                        let mut acc = 0.0;
                        for (geom, r) in residuals {
                            Self::pixel_weights(block, geom, (vx, vy, vz), |k, w| {
                                acc += w * r[k];
                            });
                        }
                        *g += acc;
                    }
                });
        }
    }

    fn check_len(context: &'static str, expected: usize, found: usize) -> Result<(), DopplerError> {
        if expected != found {
            return Err(DopplerError::ShapeMismatch {
                context,
                expected,
                found,
            });
        }
        Ok(())
    }

    /// Predicted spectrum at the phase(s) of spectrum `index`.
    ///
    /// Arguments
    /// -----------------
    /// * `x`: image-space vector of length [`Projector::npix`].
    /// * `index`: spectrum index in the dataset.
    ///
    /// Return
    /// ----------
    /// * One flux per wavelength bin of the spectrum.
    pub fn project_spectrum(&self, x: &[f64], index: usize) -> Result<Vec<f64>, DopplerError> {
        Self::check_len("image vector", self.npix, x.len())?;
        let geom = self.spectrum_geometry(index)?;
        Ok(self.project_into(x, geom))
    }

    /// Transpose of [`Projector::project_spectrum`].
    ///
    /// Arguments
    /// -----------------
    /// * `residual`: one value per wavelength bin of spectrum `index`.
    /// * `index`: spectrum index in the dataset.
    ///
    /// Return
    /// ----------
    /// * An image-space vector of length [`Projector::npix`].
    pub fn back_project_spectrum(
        &self,
        residual: &[f64],
        index: usize,
    ) -> Result<Vec<f64>, DopplerError> {
        let geom = self.spectrum_geometry(index)?;
        Self::check_len("spectrum residual", geom.nbins(), residual.len())?;
        let mut out = vec![0.0; self.npix];
        self.back_project_into(&[(geom, residual)], &mut out);
        Ok(out)
    }

    /// Forward projection onto every spectrum, concatenated in spectrum order.
    pub fn project(&self, x: &[f64]) -> Result<Vec<f64>, DopplerError> {
        Self::check_len("image vector", self.npix, x.len())?;
        let per_spectrum: Vec<Vec<f64>> = self
            .spectra
            .par_iter()
            .map(|geom| self.project_into(x, geom))
            .collect();
        Ok(per_spectrum.concat())
    }

    /// Transpose of [`Projector::project`].
    pub fn back_project(&self, residual: &[f64]) -> Result<Vec<f64>, DopplerError> {
        Self::check_len("data vector", self.nflux, residual.len())?;
        let pairs: Vec<(&SpectrumGeometry, &[f64])> = self
            .spectra
            .iter()
            .map(|geom| (geom, &residual[geom.offset..geom.offset + geom.nbins()]))
            .collect();
        let mut out = vec![0.0; self.npix];
        self.back_project_into(&pairs, &mut out);
        Ok(out)
    }

    fn spectrum_geometry(&self, index: usize) -> Result<&SpectrumGeometry, DopplerError> {
        self.spectra
            .get(index)
            .ok_or_else(|| DopplerError::InvalidDataset(format!("no spectrum with index {index}")))
    }
}

/// Predicted spectra of `map` for every spectrum of `data`, concatenated.
///
/// Convenience wrapper building a one-off [`Projector`].
pub fn project_map(map: &Map, data: &Dataset) -> Result<Vec<f64>, DopplerError> {
    let projector = Projector::new(map, data)?;
    projector.project(&map.flatten())
}
