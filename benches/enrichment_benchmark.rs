// Cost of permutation-based enrichment testing as the number of null draws grows.
//
// Every draw shuffles the feature scores once and recomputes all set statistics,
// so runtime should scale linearly in the number of permutations.

use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use mofa::enrichment::{
    EnrichmentMethod, EnrichmentOptions, FeatureSetMatrix, ViewLoadings, run_enrichment_analysis,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

const FEATURES: usize = 2_000;
const SETS: usize = 200;
const SET_SIZE: usize = 40;
const PERMUTATION_COUNTS: [usize; 3] = [100, 500, 1_000];

fn setup(seed: u64) -> (Vec<String>, Array2<f64>, FeatureSetMatrix) {
    let mut rng = StdRng::seed_from_u64(seed);
    let names: Vec<String> = (0..FEATURES).map(|i| format!("gene{i}")).collect();
    let weights = Array2::from_shape_fn((FEATURES, 1), |_| rng.sample::<f64, _>(StandardNormal));
    let lists: Vec<(String, Vec<String>)> = (0..SETS)
        .map(|s| {
            let members = index::sample(&mut rng, FEATURES, SET_SIZE)
                .into_iter()
                .map(|i| names[i].clone())
                .collect();
            (format!("set{s}"), members)
        })
        .collect();
    let sets = FeatureSetMatrix::from_member_lists(lists).expect("benchmark sets are valid");
    (names, weights, sets)
}

fn benchmark_permutation(c: &mut Criterion) {
    let (names, weights, sets) = setup(0x5EED);
    let loadings = ViewLoadings::new(&names, weights.view()).expect("benchmark loadings are valid");

    let mut group = c.benchmark_group("enrichment_permutation");
    group.sample_size(10);
    for &n_permutations in &PERMUTATION_COUNTS {
        let options = EnrichmentOptions {
            method: EnrichmentMethod::Permutation,
            n_permutations,
            ..EnrichmentOptions::default()
        };
        group.throughput(Throughput::Elements((n_permutations * SETS) as u64));
        group.bench_with_input(
            BenchmarkId::new("permutations", n_permutations),
            &options,
            |b, options| {
                b.iter(|| {
                    let result = run_enrichment_analysis(&loadings, &sets, &[0], black_box(options))
                        .expect("enrichment runs");
                    black_box(result);
                });
            },
        );
    }

    let parametric = EnrichmentOptions::default();
    group.bench_function("parametric", |b| {
        b.iter(|| {
            let result = run_enrichment_analysis(&loadings, &sets, &[0], black_box(&parametric))
                .expect("enrichment runs");
            black_box(result);
        });
    });
    group.finish();
}

criterion_group!(enrichment_benchmark, benchmark_permutation);
criterion_main!(enrichment_benchmark);
