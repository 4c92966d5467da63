use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use doppler::constants::VLIGHT;
use doppler::dataset::{Dataset, Spectrum};
use doppler::map::{Dimensions, Image, Line, Map, MapHeader};
use doppler::projection::Projector;

/// Random n×n Hβ map with 40 km/s pixels.
fn make_map(rng: &mut StdRng, n: usize) -> Map {
    let image = Image::new(
        (0..n * n).map(|_| rng.random::<f64>()).collect(),
        Dimensions::Flat { nx: n, ny: n },
        40.0,
        vec![Line::new(486.2, 50.0)],
    )
    .unwrap();
    Map::new(MapHeader::default(), vec![image]).unwrap()
}

fn make_data(nspec: usize, nbins: usize) -> Dataset {
    let wave: Vec<f64> = (0..nbins)
        .map(|i| 486.2 * (1.0 + (-2000.0 + 4000.0 * (i as f64 + 0.5) / nbins as f64) / VLIGHT))
        .collect();
    let spectra = (0..nspec)
        .map(|i| {
            Spectrum::new(i as f64 / nspec as f64, wave.clone(), vec![0.0; nbins], vec![1.0; nbins], 60.0)
                .unwrap()
        })
        .collect();
    Dataset::new(spectra).unwrap()
}

fn bench_projection(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(0xD0991E);
    let data = make_data(20, 120);
    let mut group = c.benchmark_group("projection");

    for n in [32usize, 64, 128] {
        let map = make_map(&mut rng, n);
        let projector = Projector::new(&map, &data).unwrap();
        let x: Vec<f64> = map.images()[0].data().to_vec();
        let r: Vec<f64> = (0..projector.nflux()).map(|_| rng.random::<f64>() - 0.5).collect();

        group.bench_with_input(BenchmarkId::new("forward", n), &x, |b, x| {
            b.iter(|| black_box(projector.project(black_box(x)).unwrap()))
        });
        group.bench_with_input(BenchmarkId::new("adjoint", n), &r, |b, r| {
            b.iter(|| black_box(projector.back_project(black_box(r)).unwrap()))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_projection);
criterion_main!(benches);
