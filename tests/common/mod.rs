#![allow(dead_code)]

use doppler::constants::VLIGHT;
use doppler::dataset::{Dataset, Spectrum};
use doppler::map::{Dimensions, Image, Line, Map, MapHeader};

pub const HBETA: f64 = 486.2;

/// Square flat image: `inside` within `radius` km/s of the origin, `outside` beyond.
pub fn disk_image(n: usize, vxy: f64, radius: f64, inside: f64, outside: f64) -> Vec<f64> {
    let mid = (n as f64 - 1.0) / 2.0;
    let mut pixels = Vec::with_capacity(n * n);
    for iy in 0..n {
        for ix in 0..n {
            let vx = vxy * (ix as f64 - mid);
            let vy = vxy * (iy as f64 - mid);
            pixels.push(if vx.hypot(vy) < radius { inside } else { outside });
        }
    }
    pixels
}

pub fn single_image_map(pixels: Vec<f64>, n: usize, vxy: f64, gamma: f64) -> Map {
    let image = Image::new(
        pixels,
        Dimensions::Flat { nx: n, ny: n },
        vxy,
        vec![Line::new(HBETA, gamma)],
    )
    .unwrap();
    Map::new(MapHeader::default(), vec![image]).unwrap()
}

/// Wavelengths of `nbins` bins, uniform in velocity over `±vmax` around `centre` km/s.
pub fn velocity_grid(lambda0: f64, centre: f64, vmax: f64, nbins: usize) -> Vec<f64> {
    (0..nbins)
        .map(|i| {
            let v = centre - vmax + 2.0 * vmax * (i as f64 + 0.5) / nbins as f64;
            lambda0 * (1.0 + v / VLIGHT)
        })
        .collect()
}

/// Evenly phased spectra on a common grid, zero flux, uniform uncertainties.
pub fn template(nspec: usize, wave: &[f64], ferr: f64, fwhm: f64) -> Dataset {
    let spectra = (0..nspec)
        .map(|i| {
            Spectrum::new(
                i as f64 / nspec as f64,
                wave.to_vec(),
                vec![0.0; wave.len()],
                vec![ferr; wave.len()],
                fwhm,
            )
            .unwrap()
        })
        .collect();
    Dataset::new(spectra).unwrap()
}

pub fn flux_of(data: &Dataset) -> Vec<f64> {
    data.spectra().iter().flat_map(|s| s.flux.iter().copied()).collect()
}

/// Replace every uncertainty of `data` by `ferr`.
pub fn with_ferr(mut data: Dataset, ferr: f64) -> Dataset {
    for s in data.spectra_mut() {
        s.ferr.iter_mut().for_each(|e| *e = ferr);
    }
    data
}
