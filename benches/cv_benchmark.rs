use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use gspcr::{cv_gspcr, Dataset, FitMeasure, GspcrConfig, MixedPca, VariableType};
use ndarray::{Array1, Array2};
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use rand_distr::{Distribution, Normal};

// Latent-factor data: the first tenth of the predictors carry the signal.
fn generate_data(n_samples: usize, n_features: usize) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(42);
    let normal = Normal::new(0.0, 1.0).unwrap();
    let z = Array1::from_shape_fn(n_samples, |_| normal.sample(&mut rng));
    let n_signal = (n_features / 10).max(1);
    let x = Array2::from_shape_fn((n_samples, n_features), |(i, j)| {
        let noise = normal.sample(&mut rng);
        if j < n_signal {
            z[i] + noise
        } else {
            noise
        }
    });
    let y = z.mapv(|v| v + normal.sample(&mut rng));
    Dataset::continuous(y, x).unwrap()
}

fn bench_cv_gspcr(c: &mut Criterion) {
    let mut group = c.benchmark_group("cv_gspcr");
    group.sample_size(10);

    for &(n_samples, n_features) in [(100, 50), (200, 200), (100, 500)].iter() {
        let data = generate_data(n_samples, n_features);
        let config = GspcrConfig {
            fit_measure: FitMeasure::Bic,
            n_thresholds: 10,
            components: vec![1, 2, 3, 4, 5],
            n_folds: 5,
            ..GspcrConfig::default()
        };
        group.throughput(Throughput::Elements((n_samples * n_features) as u64));
        group.bench_with_input(
            BenchmarkId::new("bic_5fold", format!("{}x{}", n_samples, n_features)),
            &data,
            |b, data| b.iter(|| cv_gspcr(data, &config).unwrap()),
        );
    }
    group.finish();
}

fn bench_mixed_pca_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("MixedPca_fit");

    for &(n_samples, n_features) in [(100, 50), (500, 100), (100, 200)].iter() {
        let data = generate_data(n_samples, n_features);
        let types = vec![VariableType::Continuous; n_features];
        group.throughput(Throughput::Elements((n_samples * n_features) as u64));
        group.bench_with_input(
            BenchmarkId::new("fit", format!("{}x{}", n_samples, n_features)),
            &data,
            |b, data| b.iter(|| MixedPca::default().fit(data.x(), 5, &types).unwrap()),
        );
    }
    group.finish();
}

criterion_group!(benches, bench_cv_gspcr, bench_mixed_pca_fit);
criterion_main!(benches);
