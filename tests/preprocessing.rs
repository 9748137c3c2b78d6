use approx::assert_abs_diff_eq;
use mofa::model::{NoiseFamily, ObservedMatrix, View};
use mofa::predict::{PredictionScale, impute, predict};
use mofa::preprocess::{Covariates, mask_at_random, regress_covariates};
use mofa::simulate::SimulationBuilder;
use mofa::{ModelError, ModelStore};
use ndarray::{Array1, Array2};

fn batch_covariate(n: usize) -> Covariates {
    Covariates::from_vector(Array1::from_shape_fn(n, |j| Some((j % 4) as f64 - 1.5)))
}

fn batchy_store() -> ModelStore {
    let data = Array2::from_shape_fn((8, 24), |(i, j)| {
        if (i + j) % 11 == 0 {
            None
        } else {
            Some(((i * 5 + j * 7) % 13) as f64 + 2.0 * ((j % 4) as f64 - 1.5))
        }
    });
    let view = View::with_generated_names("rna", NoiseFamily::Continuous, ObservedMatrix::new(data))
        .unwrap();
    ModelStore::with_generated_samples(vec![view]).unwrap()
}

#[test]
fn regressing_twice_is_idempotent() {
    let mut store = batchy_store();
    let covariate = batch_covariate(24);
    regress_covariates(&mut store, &["rna"], &covariate, 5).unwrap();
    let once = store.view("rna").unwrap().data().clone();
    regress_covariates(&mut store, &["rna"], &covariate, 5).unwrap();
    let twice = store.view("rna").unwrap().data();

    assert_eq!(once.observed_mask(), twice.observed_mask());
    for (a, b) in once.values().iter().zip(twice.values().iter()) {
        if let (Some(a), Some(b)) = (a, b) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-9);
        }
    }
}

#[test]
fn sparse_features_are_left_bit_for_bit() {
    let mut values = Array2::from_elem((2, 24), None);
    for j in 0..24 {
        values[(0, j)] = Some(j as f64 * 0.5);
    }
    for (j, v) in [(1, 0.3), (5, -1.7), (9, 2.25), (20, 8.0)] {
        values[(1, j)] = Some(v);
    }
    let view = View::with_generated_names(
        "rna",
        NoiseFamily::Continuous,
        ObservedMatrix::new(values.clone()),
    )
    .unwrap();
    let mut store = ModelStore::with_generated_samples(vec![view]).unwrap();
    let summary = regress_covariates(&mut store, &["rna"], &batch_covariate(24), 5).unwrap();
    assert_eq!((summary[0].regressed, summary[0].skipped), (1, 1));

    let after = store.view("rna").unwrap().data();
    for j in 0..24 {
        assert_eq!(
            after.get(1, j).map(f64::to_bits),
            values[(1, j)].map(f64::to_bits)
        );
    }
}

#[test]
fn trained_stores_refuse_preprocessing() {
    let mut store = SimulationBuilder::new(24, 2)
        .with_view("rna", NoiseFamily::Continuous, 6)
        .build()
        .unwrap()
        .into_trained()
        .unwrap();
    assert!(matches!(
        mask_at_random(&mut store, "rna", 0.1, 1),
        Err(mofa::preprocess::MaskingError::Model(ModelError::AlreadyTrained))
    ));
    assert!(matches!(
        regress_covariates(&mut store, &["rna"], &batch_covariate(24), 5),
        Err(mofa::preprocess::CovariateError::Model(ModelError::AlreadyTrained))
    ));
}

#[test]
fn masked_entries_are_recovered_by_imputation() {
    let sim = SimulationBuilder::new(40, 2)
        .with_view("rna", NoiseFamily::Continuous, 25)
        .with_view("mutations", NoiseFamily::Binary, 10)
        .with_view("reads", NoiseFamily::Count, 10)
        .with_noise_precision(100.0)
        .seed(21)
        .build()
        .unwrap();
    let truth = sim.truth.clone();
    let mut store = sim.store;
    let complete = store.view("rna").unwrap().data().clone();
    let masked = mask_at_random(&mut store, "rna", 0.2, 5).unwrap();
    assert_eq!(masked, 200);
    store.attach_training(truth).unwrap();

    let imputed = impute(&store).unwrap();
    let rna = imputed.get("rna").unwrap();
    let gappy = store.view("rna").unwrap().data();
    for ((r, c), entry) in gappy.values().indexed_iter() {
        match entry {
            Some(v) => assert_eq!(rna[(r, c)], *v),
            None => {
                let original = complete.get(r, c).unwrap();
                // noise standard deviation is 0.1
                assert!((rna[(r, c)] - original).abs() < 0.6);
            }
        }
    }

    let probabilities = predict(&store, "mutations", &[0, 1], PredictionScale::Response).unwrap();
    assert!(probabilities.iter().all(|&p| p > 0.0 && p < 1.0));
    let rates = predict(&store, "reads", &[0, 1], PredictionScale::Response).unwrap();
    assert!(rates.iter().all(|&r| r > 0.0));
}
