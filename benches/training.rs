use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use modelhub::training::{CapabilityRegistry, NoopObserver};
use polars::prelude::*;
use rand::prelude::*;
use rand_chacha::ChaCha8Rng;

fn create_classification_data(n_rows: usize, n_features: usize) -> (DataFrame, Series) {
    let mut rng = ChaCha8Rng::seed_from_u64(42);

    let series: Vec<Series> = (0..n_features)
        .map(|i| {
            let values: Vec<f64> = (0..n_rows).map(|_| rng.gen::<f64>() * 10.0).collect();
            Series::new(format!("feature_{}", i).into(), values)
        })
        .collect();

    // Class from the sum of the first two features
    let target: Vec<&str> = (0..n_rows)
        .map(|i| {
            let sum: f64 = series[..2]
                .iter()
                .map(|s| s.f64().unwrap().get(i).unwrap_or(0.0))
                .sum();
            if sum > 10.0 { "high" } else { "low" }
        })
        .collect();

    (DataFrame::new(series).unwrap(), Series::new("target".into(), target))
}

fn bench_training(c: &mut Criterion) {
    let registry = CapabilityRegistry::builtin();
    let mut group = c.benchmark_group("training");
    group.sample_size(10); // Fewer samples for training benchmarks

    for n_rows in [1000, 5000].iter() {
        let (features, target) = create_classification_data(*n_rows, 10);

        for model_type in ["LogisticRegression", "DecisionTree", "RandomForest"] {
            group.bench_with_input(
                BenchmarkId::new(model_type, n_rows),
                &(&features, &target),
                |b, (features, target)| {
                    b.iter(|| {
                        let mut unit = registry.create_unit(model_type, None).unwrap();
                        unit.train(black_box(features), black_box(target), &NoopObserver).unwrap()
                    })
                },
            );
        }
    }

    group.finish();
}

fn bench_prediction(c: &mut Criterion) {
    let registry = CapabilityRegistry::builtin();
    let mut group = c.benchmark_group("prediction");

    // Train once
    let (train_x, train_y) = create_classification_data(5000, 10);
    let mut unit = registry.create_unit("RandomForest", None).unwrap();
    unit.train(&train_x, &train_y, &NoopObserver).unwrap();

    for n_rows in [100, 1000, 10000].iter() {
        let (test_x, _) = create_classification_data(*n_rows, 10);

        group.bench_with_input(BenchmarkId::new("predict", n_rows), &test_x, |b, df| {
            b.iter(|| unit.predict(black_box(df)).unwrap())
        });
    }

    group.finish();
}

criterion_group!(benches, bench_training, bench_prediction);
criterion_main!(benches);
