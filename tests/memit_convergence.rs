use approx::assert_relative_eq;
use doppler::mem::MemitParams;
use doppler::memit::{memit, memit_with_cancel, MemitStatus};
use doppler::synthetic::synthesize;

mod common;
use common::*;

#[test]
fn flat_disk_converges_to_target() {
    let n = 24;
    let vxy = 80.0;
    let truth = single_image_map(disk_image(n, vxy, 600.0, 1.0, 0.1), n, vxy, 50.0);
    let wave = velocity_grid(HBETA, 50.0, 1300.0, 64);
    let clean = synthesize(&truth, &template(16, &wave, 1.0, 80.0)).unwrap();

    let peak = flux_of(&clean).into_iter().fold(0.0, f64::max);
    let data = with_ferr(clean, 0.02 * peak);

    let mut map = single_image_map(vec![0.5; n * n], n, vxy, 50.0);
    let params = MemitParams::builder()
        .niter(200)
        .caim(1.0)
        .tlim(1e-3)
        .chi2_tolerance(0.01)
        .build()
        .unwrap();

    let outcome = memit(&mut map, &data, &params).unwrap();
    assert_eq!(outcome.status, MemitStatus::Converged);
    assert!(outcome.iterations <= 200);
    assert_relative_eq!(outcome.chi2, 1.0, max_relative = 0.01);
    assert_eq!(outcome.history.len(), outcome.iterations);
    assert!(outcome.history[0].chi2 > 1.0);

    // the reconstruction is brighter inside the disk than outside
    let mask = disk_image(n, vxy, 600.0, 1.0, 0.0);
    let pixels = map.images()[0].data();
    let mean_where = |inside: bool| {
        let sel: Vec<f64> = pixels
            .iter()
            .zip(&mask)
            .filter(|(_, m)| (**m > 0.5) == inside)
            .map(|(p, _)| *p)
            .collect();
        sel.iter().sum::<f64>() / sel.len() as f64
    };
    assert!(mean_where(true) > 2.0 * mean_where(false));
    assert!(pixels.iter().all(|p| *p > 0.0));
    assert_eq!(map.header.history.len(), 1);
}

#[test]
fn each_iteration_respects_rmax() {
    let n = 16;
    let vxy = 100.0;
    let truth = single_image_map(disk_image(n, vxy, 500.0, 1.0, 0.05), n, vxy, 0.0);
    let wave = velocity_grid(HBETA, 0.0, 1200.0, 48);
    let clean = synthesize(&truth, &template(10, &wave, 1.0, 100.0)).unwrap();
    let peak = flux_of(&clean).into_iter().fold(0.0, f64::max);
    let data = with_ferr(clean, 0.05 * peak);

    let rmax = 0.1;
    let params = MemitParams::builder().niter(1).rmax(rmax).build().unwrap();
    let mut map = single_image_map(vec![0.3; n * n], n, vxy, 0.0);
    for _ in 0..6 {
        let before = map.images()[0].data().to_vec();
        memit(&mut map, &data, &params).unwrap();
        for (new, old) in map.images()[0].data().iter().zip(&before) {
            assert!(*new > 0.0);
            assert!((new - old).abs() <= rmax * old * (1.0 + 1e-12));
        }
    }
}

#[test]
fn cancellation_stops_between_iterations() {
    let n = 12;
    let vxy = 100.0;
    let truth = single_image_map(disk_image(n, vxy, 400.0, 1.0, 0.1), n, vxy, 0.0);
    let wave = velocity_grid(HBETA, 0.0, 1000.0, 40);
    let clean = synthesize(&truth, &template(8, &wave, 1.0, 100.0)).unwrap();
    let data = with_ferr(clean, 0.01);

    let mut map = single_image_map(vec![0.5; n * n], n, vxy, 0.0);
    let mut calls = 0;
    let outcome = memit_with_cancel(&mut map, &data, &MemitParams::default(), || {
        calls += 1;
        calls == 4
    })
    .unwrap();

    assert_eq!(outcome.status, MemitStatus::ExhaustedIterations { cancelled: true });
    assert_eq!(outcome.iterations, 3);
    assert_eq!(outcome.history.len(), 3);
}

#[test]
fn exhausted_iterations_without_cancellation() {
    let n = 12;
    let vxy = 100.0;
    let truth = single_image_map(disk_image(n, vxy, 400.0, 1.0, 0.1), n, vxy, 0.0);
    let wave = velocity_grid(HBETA, 0.0, 1000.0, 40);
    let clean = synthesize(&truth, &template(8, &wave, 1.0, 100.0)).unwrap();
    let data = with_ferr(clean, 1e-3);

    let mut map = single_image_map(vec![0.5; n * n], n, vxy, 0.0);
    let params = MemitParams::builder().niter(2).build().unwrap();
    let outcome = memit(&mut map, &data, &params).unwrap();
    assert_eq!(outcome.status, MemitStatus::ExhaustedIterations { cancelled: false });
    assert_eq!(outcome.iterations, 2);
}
