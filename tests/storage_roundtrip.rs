use camino::Utf8PathBuf;
use doppler::dataset::{Dataset, Spectrum};
use doppler::doppler_errors::DopplerError;
use doppler::map::{DefaultImage, Dimensions, Image, Line, Map, MapHeader};
use doppler::storage::{load_data, load_map, save_data, save_map, StorageConfig};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

mod common;
use common::*;

fn store() -> (tempfile::TempDir, StorageConfig) {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    (dir, StorageConfig::new(root))
}

fn two_image_map(rng: &mut StdRng) -> Map {
    let flat = Image::new(
        (0..36).map(|_| rng.random::<f64>()).collect(),
        Dimensions::Flat { nx: 6, ny: 6 },
        75.3,
        vec![Line::scaled(486.2, 12.5, 1.0), Line::scaled(434.05, 12.5, 0.61)],
    )
    .unwrap()
    .with_default(DefaultImage::Gauss2d { fwhm_xy: 150.0 })
    .unwrap();
    let stacked = Image::new(
        (0..4 * 4 * 3).map(|_| rng.random::<f64>() * 1e-3).collect(),
        Dimensions::Stacked { nx: 4, ny: 4, nz: 3, vz: 120.0 },
        110.0,
        vec![Line::new(468.6, -30.0)],
    )
    .unwrap()
    .with_default(DefaultImage::Gauss3d { fwhm_xy: 200.0, fwhm_z: 240.0 })
    .unwrap();

    let mut header = MapHeader::default();
    header.object = Some("U Gem".into());
    header.cards.insert("TELESCOP".into(), "WHT".into());
    header.history.push("created by storage test".into());
    Map::new(header, vec![flat, stacked]).unwrap()
}

#[test]
fn map_round_trip_is_exact() {
    let (_dir, store) = store();
    let mut rng = StdRng::seed_from_u64(3);
    let map = two_image_map(&mut rng);

    let path = save_map(&store, "imap", &map).unwrap();
    assert!(path.as_str().ends_with("imap.json"));
    let back = load_map(&store, "imap").unwrap();
    assert_eq!(back, map);

    let again = save_map(&store, "imap2", &back).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();
    let second = std::fs::read_to_string(&again).unwrap();
    assert_eq!(first, second);
}

#[test]
fn dataset_round_trip_is_exact() {
    let (_dir, store) = store();
    let mut rng = StdRng::seed_from_u64(11);
    let wave = velocity_grid(HBETA, 0.0, 1000.0, 25);
    let spectra = (0..4)
        .map(|i| {
            let mut ferr: Vec<f64> = (0..25).map(|_| 0.1 + rng.random::<f64>()).collect();
            ferr[i] = -1.0;
            Spectrum::new(
                0.137 * i as f64,
                wave.clone(),
                (0..25).map(|_| rng.random::<f64>() - 0.2).collect(),
                ferr,
                85.0,
            )
            .unwrap()
            .with_exposure(0.02, 5)
            .unwrap()
        })
        .collect();
    let mut data = Dataset::new(spectra).unwrap();
    data.cards.insert("RUN".into(), "1234".into());

    save_data(&store, "spectra.dat", &data).unwrap();
    let back = load_data(&store, "spectra.dat").unwrap();
    assert_eq!(back, data);
    assert_eq!(back.valid_points(), 4 * 24);
}

#[test]
fn loading_validates_structure() {
    let (_dir, store) = store();
    // a single-line image carrying a scale factor
    let doc = r#"{
        "images": [{
            "dims": {"kind": "flat", "nx": 2, "ny": 1},
            "vxy": 50.0,
            "lines": [{"wavelength": 486.2, "gamma": 0.0, "scale": 2.0}],
            "data": [1.0, 2.0]
        }]
    }"#;
    std::fs::write(store.resolve("bad"), doc).unwrap();
    let err = load_map(&store, "bad").unwrap_err();
    assert!(matches!(err, DopplerError::InvalidMap(_)));
    assert!(err.is_structural());
}
