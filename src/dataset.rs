//! # Observed spectra
//!
//! A [`Dataset`] is the set of phase-resolved line profiles a map is fitted
//! to. Each [`Spectrum`] holds fluxes on wavelength bins, their 1-sigma
//! uncertainties, the instrumental resolution and the orbital phase (with an
//! optional exposure length, over which the projection is smeared).
//!
//! Points with `ferr <= 0` are masked: they are kept in the arrays, so every
//! spectrum keeps its wavelength grid, but carry no weight in the fit.
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::constants::{KmPerSec, Nanometer, Phase};
use crate::doppler_errors::DopplerError;

fn one() -> usize {
    1
}

/// One phase-resolved spectrum.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spectrum {
    /// Orbital phase at mid-exposure
    pub phase: Phase,
    /// Exposure length in phase units
    #[serde(default)]
    pub exposure: Phase,
    /// Number of sub-phases used to smear the projection over the exposure
    #[serde(default = "one")]
    pub nsub: usize,
    /// Instrumental FWHM, km/s
    pub fwhm: KmPerSec,
    /// Bin centres, strictly increasing
    pub wave: Vec<Nanometer>,
    pub flux: Vec<f64>,
    pub ferr: Vec<f64>,
}

impl Spectrum {
    /// Build an instantaneous spectrum (no exposure smearing).
    pub fn new(
        phase: Phase,
        wave: Vec<Nanometer>,
        flux: Vec<f64>,
        ferr: Vec<f64>,
        fwhm: KmPerSec,
    ) -> Result<Self, DopplerError> {
        let spectrum = Spectrum {
            phase,
            exposure: 0.0,
            nsub: 1,
            fwhm,
            wave,
            flux,
            ferr,
        };
        spectrum.validate(0)?;
        Ok(spectrum)
    }

    /// Smear the projection over `exposure` (phase units) with `nsub` sub-phases.
    pub fn with_exposure(mut self, exposure: Phase, nsub: usize) -> Result<Self, DopplerError> {
        self.exposure = exposure;
        self.nsub = nsub;
        self.validate(0)?;
        Ok(self)
    }

    /// Check the structural invariants; `index` is only used in the error.
    pub fn validate(&self, index: usize) -> Result<(), DopplerError> {
        let invalid = |reason: String| Err(DopplerError::InvalidSpectrum { index, reason });

        let n = self.wave.len();
        if n < 2 {
            return invalid(format!("need at least 2 wavelength bins, got {n}"));
        }
        if self.flux.len() != n || self.ferr.len() != n {
            return invalid(format!(
                "wave, flux and ferr lengths differ ({n}, {}, {})",
                self.flux.len(),
                self.ferr.len()
            ));
        }
        if !self.phase.is_finite() {
            return invalid("phase is not finite".into());
        }
        if !(self.exposure.is_finite() && self.exposure >= 0.0) {
            return invalid(format!("exposure must be >= 0, got {}", self.exposure));
        }
        if self.nsub == 0 {
            return invalid("nsub must be at least 1".into());
        }
        if !(self.fwhm.is_finite() && self.fwhm >= 0.0) {
            return invalid(format!("fwhm must be >= 0, got {}", self.fwhm));
        }
        if !self.wave.iter().all(|w| w.is_finite() && *w > 0.0) {
            return invalid("wavelengths must be finite and > 0".into());
        }
        if self.wave.windows(2).any(|w| w[1] <= w[0]) {
            return invalid("wavelengths must be strictly increasing".into());
        }
        if !self.flux.iter().all(|f| f.is_finite()) {
            return invalid("flux contains non-finite values".into());
        }
        if !self.ferr.iter().all(|e| e.is_finite()) {
            return invalid("ferr contains non-finite values".into());
        }
        Ok(())
    }

    /// Bin edges: midpoints between centres, extended by half a bin at each end.
    ///
    /// Return
    /// ----------
    /// * `wave.len() + 1` edges, or `None` with fewer than two bins.
    pub fn bin_edges(&self) -> Option<Vec<Nanometer>> {
        let [w0, w1, ..] = self.wave.as_slice() else {
            return None;
        };
        let [.., wm, wn] = self.wave.as_slice() else {
            return None;
        };
        let mut edges = Vec::with_capacity(self.wave.len() + 1);
        edges.push(w0 - (w1 - w0) / 2.0);
        edges.extend(self.wave.windows(2).map(|p| (p[0] + p[1]) / 2.0));
        edges.push(wn + (wn - wm) / 2.0);
        Some(edges)
    }

    /// Phases sampled across the exposure, evenly spaced and centred on `phase`.
    pub fn sub_phases(&self) -> Vec<Phase> {
        let n = self.nsub as f64;
        (0..self.nsub)
            .map(|j| self.phase + self.exposure * ((j as f64 + 0.5) / n - 0.5))
            .collect()
    }

    /// Number of points that carry weight in the fit.
    pub fn valid_points(&self) -> usize {
        self.ferr.iter().filter(|e| **e > 0.0).count()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    /// Free-form provenance records
    #[serde(default)]
    pub cards: BTreeMap<String, String>,
    spectra: Vec<Spectrum>,
}

impl Dataset {
    pub fn new(spectra: Vec<Spectrum>) -> Result<Self, DopplerError> {
        let data = Dataset {
            cards: BTreeMap::new(),
            spectra,
        };
        data.validate()?;
        Ok(data)
    }

    pub fn validate(&self) -> Result<(), DopplerError> {
        if self.spectra.is_empty() {
            return Err(DopplerError::InvalidDataset(
                "a dataset needs at least one spectrum".into(),
            ));
        }
        for (i, spectrum) in self.spectra.iter().enumerate() {
            spectrum.validate(i)?;
        }
        if self.valid_points() == 0 {
            return Err(DopplerError::InvalidDataset(
                "every point is masked (ferr <= 0)".into(),
            ));
        }
        Ok(())
    }

    pub fn spectra(&self) -> &[Spectrum] {
        &self.spectra
    }

    pub fn spectra_mut(&mut self) -> &mut [Spectrum] {
        &mut self.spectra
    }

    pub fn len(&self) -> usize {
        self.spectra.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spectra.is_empty()
    }

    /// Total number of flux points, masked or not.
    pub fn total_points(&self) -> usize {
        self.spectra.iter().map(|s| s.flux.len()).sum()
    }

    pub fn valid_points(&self) -> usize {
        self.spectra.iter().map(Spectrum::valid_points).sum()
    }
}

#[cfg(test)]
mod dataset_test {
    use super::*;
    use approx::assert_relative_eq;

    fn spectrum(phase: f64) -> Spectrum {
        Spectrum::new(
            phase,
            vec![486.0, 486.1, 486.2, 486.3],
            vec![0.0; 4],
            vec![1.0, 1.0, -1.0, 1.0],
            50.0,
        )
        .unwrap()
    }

    #[test]
    fn test_bin_edges() {
        let edges = spectrum(0.0).bin_edges().unwrap();
        let expected = [485.95, 486.05, 486.15, 486.25, 486.35];
        assert_eq!(edges.len(), 5);
        for (e, x) in edges.iter().zip(expected) {
            assert_relative_eq!(*e, x, epsilon = 1e-9);
        }

        // fields are public, so a spectrum can bypass validation
        let mut lone = spectrum(0.0);
        lone.wave.truncate(1);
        assert_eq!(lone.bin_edges(), None);
        lone.wave.clear();
        assert_eq!(lone.bin_edges(), None);
    }

    #[test]
    fn test_sub_phases() {
        let s = spectrum(0.25).with_exposure(0.1, 4).unwrap();
        let phases = s.sub_phases();
        let expected = [0.2125, 0.2375, 0.2625, 0.2875];
        for (p, x) in phases.iter().zip(expected) {
            assert_relative_eq!(*p, x, epsilon = 1e-12);
        }
        assert_eq!(spectrum(0.3).sub_phases(), vec![0.3]);
    }

    #[test]
    fn test_masked_points() {
        let data = Dataset::new(vec![spectrum(0.0), spectrum(0.5)]).unwrap();
        assert_eq!(data.total_points(), 8);
        assert_eq!(data.valid_points(), 6);
    }

    #[test]
    fn test_invalid_spectra() {
        let err = Spectrum::new(0.0, vec![486.0, 486.1], vec![0.0], vec![1.0, 1.0], 0.0)
            .unwrap_err();
        assert!(matches!(err, DopplerError::InvalidSpectrum { index: 0, .. }));

        assert!(Spectrum::new(0.0, vec![486.1, 486.0], vec![0.0; 2], vec![1.0; 2], 0.0).is_err());
        assert!(Spectrum::new(0.0, vec![-1.0, 486.0], vec![0.0; 2], vec![1.0; 2], 0.0).is_err());
        assert!(Spectrum::new(0.0, vec![486.0, 486.1], vec![0.0; 2], vec![1.0; 2], -3.0).is_err());
        assert!(spectrum(0.0).with_exposure(0.1, 0).is_err());

        let err = Dataset::new(vec![]).unwrap_err();
        assert!(matches!(err, DopplerError::InvalidDataset(_)));
    }
}
