use criterion::{criterion_group, criterion_main, Criterion};
use popmix::prelude::*;
use std::hint::black_box;

fn example_likelihood(n_ids: usize) -> HierarchicalLogLikelihood<LogLikelihood<OneCompartmentModel>> {
    let times: Vec<f64> = vec![0.5, 1.0, 2.0, 4.0, 8.0];
    let individuals = (0..n_ids)
        .map(|i| {
            let scale = 1.0 + 0.01 * i as f64;
            let values = times.iter().map(|t| scale * 5.0 * (-0.5 * t).exp()).collect();
            LogLikelihood::new(
                OneCompartmentModel::new(),
                vec![ResidualErrorModel::Combined],
                Observations::single(times.clone(), values).unwrap(),
            )
            .unwrap()
        })
        .collect();
    let population_models: Vec<PopulationModel> = vec![
        PooledModel::new(1).unwrap().into(),
        GaussianModel::new(1, false).unwrap().into(),
        LogNormalModel::new(1, false).unwrap().into(),
        PooledModel::new(2).unwrap().into(),
    ];
    HierarchicalLogLikelihood::new(individuals, population_models).unwrap()
}

fn parameters(n_ids: usize) -> Vec<f64> {
    let mut parameters = vec![10.0];
    parameters.extend((0..n_ids).map(|i| (i % 5) as f64 * 0.2 - 0.4));
    parameters.extend([0.5, 0.1]);
    parameters.extend((0..n_ids).map(|i| (i % 3) as f64 * 0.3 - 0.3));
    parameters.extend([0.7, 0.2, 0.1, 0.05]);
    parameters
}

fn criterion_benchmark(c: &mut Criterion) {
    let log_likelihood = example_likelihood(100);
    let parameters = parameters(100);
    c.bench_function("evaluate 100 ids", |b| {
        b.iter(|| log_likelihood.evaluate(black_box(&parameters)).unwrap())
    });
    c.bench_function("evaluate_s1 100 ids", |b| {
        b.iter(|| log_likelihood.evaluate_s1(black_box(&parameters)).unwrap())
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
