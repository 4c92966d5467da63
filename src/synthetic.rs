//! Forward-modelled datasets.
//!
//! [`synthesize`] replaces the fluxes of a template dataset by the
//! projection of a map; [`synthesize_with_noise`] then adds Gaussian noise
//! of each point's `ferr`. Phases, wavelength grids, resolution, exposure
//! and masking all come from the template.
use rand::Rng;
use rand_distr::{Distribution, Normal};

use crate::dataset::Dataset;
use crate::doppler_errors::DopplerError;
use crate::map::Map;
use crate::projection::project_map;

/// Noise-free spectra of `map` on the layout of `template`.
pub fn synthesize(map: &Map, template: &Dataset) -> Result<Dataset, DopplerError> {
    let flux = project_map(map, template)?;
    let mut data = template.clone();
    let mut offset = 0;
    for spectrum in data.spectra_mut() {
        let n = spectrum.flux.len();
        spectrum.flux.copy_from_slice(&flux[offset..offset + n]);
        offset += n;
    }
    Ok(data)
}

/// Spectra of `map` on the layout of `template`, with `N(0, ferr)` noise
/// added to every unmasked point.
pub fn synthesize_with_noise<R: Rng>(
    map: &Map,
    template: &Dataset,
    rng: &mut R,
) -> Result<Dataset, DopplerError> {
    let mut data = synthesize(map, template)?;
    for spectrum in data.spectra_mut() {
        for (f, &e) in spectrum.flux.iter_mut().zip(&spectrum.ferr) {
            if e > 0.0 {
                *f += Normal::new(0.0, e)?.sample(rng);
            }
        }
    }
    Ok(data)
}
