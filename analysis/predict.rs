//! # Prediction and imputation
//!
//! Reconstructs view matrices from the low-rank factor/weight product and maps
//! the linear predictor through each view's inverse link. Imputation keeps
//! every observed value and only fills the gaps.

use crate::model::{
    FactorMatrix, ModelError, ModelStore, NoiseFamily, WeightMatrix, validate_factor_subset,
};
use ndarray::{Array2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Scale on which predictions are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredictionScale {
    /// The linear predictor itself.
    Link,
    /// The mean response: identity, logistic or exponential inverse link.
    #[default]
    Response,
    /// The mean response rounded into the data domain (0/1 for binary, integers for counts).
    InRange,
}

/// Computes `eta = W[:, subset] . Z[:, subset]^T`, shape `[n_features, n_samples]`.
pub fn linear_predictor(
    weights: &WeightMatrix,
    factors: &FactorMatrix,
    subset: &[usize],
) -> Result<Array2<f64>, ModelError> {
    validate_factor_subset(subset, factors.n_factors())?;
    if weights.n_factors() != factors.n_factors() {
        return Err(ModelError::ShapeMismatch {
            what: "Weight matrix".to_string(),
            expected: (weights.n_features(), factors.n_factors()),
            found: (weights.n_features(), weights.n_factors()),
        });
    }
    let w = weights.values().select(Axis(1), subset);
    let z = factors.values().select(Axis(1), subset);
    Ok(w.dot(&z.t()))
}

/// Maps a linear predictor onto the requested scale for a noise family.
pub fn apply_scale(mut eta: Array2<f64>, family: NoiseFamily, scale: PredictionScale) -> Array2<f64> {
    let link = family.link();
    match scale {
        PredictionScale::Link => {}
        PredictionScale::Response => eta.mapv_inplace(|e| link.inverse(e)),
        PredictionScale::InRange => eta.mapv_inplace(|e| family.in_range(link.inverse(e))),
    }
    eta
}

/// Predicts the named view from a subset of factors, shape `[n_features, n_samples]`.
pub fn predict(
    store: &ModelStore,
    view: &str,
    factors: &[usize],
    scale: PredictionScale,
) -> Result<Array2<f64>, ModelError> {
    let target = store.view(view)?;
    let z = store.factors()?;
    let w = store.weights(view)?;
    let eta = linear_predictor(w, z, factors)?;
    Ok(apply_scale(eta, target.family(), scale))
}

/// Options for [`impute_with`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImputeOptions {
    /// Views to impute; `None` means every view.
    #[serde(default)]
    pub views: Option<Vec<String>>,
    /// Factors used for the reconstruction; `None` means all factors.
    #[serde(default)]
    pub factors: Option<Vec<usize>>,
    #[serde(default)]
    pub scale: PredictionScale,
}

/// One imputed view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImputedView {
    pub name: String,
    pub values: Array2<f64>,
    /// Number of entries filled in from the reconstruction.
    pub n_imputed: usize,
}

/// Reconstructed matrices, one per imputed view. Independent of the store's data.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImputedData {
    pub views: Vec<ImputedView>,
}

impl ImputedData {
    pub fn get(&self, name: &str) -> Option<&Array2<f64>> {
        self.views.iter().find(|v| v.name == name).map(|v| &v.values)
    }
}

/// Imputes every view using all factors on the response scale.
pub fn impute(store: &ModelStore) -> Result<ImputedData, ModelError> {
    impute_with(store, &ImputeOptions::default())
}

/// Fills missing entries with model predictions; observed entries are copied untouched.
pub fn impute_with(store: &ModelStore, options: &ImputeOptions) -> Result<ImputedData, ModelError> {
    let names: Vec<String> = match &options.views {
        Some(views) => {
            for name in views {
                store.view(name)?;
            }
            views.clone()
        }
        None => store.view_names().into_iter().map(str::to_string).collect(),
    };
    let factors = match &options.factors {
        Some(subset) => subset.clone(),
        None => store.all_factors()?,
    };
    validate_factor_subset(&factors, store.factors()?.n_factors())?;

    let views = names
        .par_iter()
        .map(|name| {
            let view = store.view(name)?;
            let prediction = predict(store, name, &factors, options.scale)?;
            let n_imputed = view.data().n_missing();
            log::debug!("Imputing {n_imputed} missing entries of view '{name}'");
            Ok(ImputedView {
                name: name.clone(),
                values: view.data().fill_missing(prediction.view()),
                n_imputed,
            })
        })
        .collect::<Result<Vec<_>, ModelError>>()?;

    log::info!(
        "Imputed {} entries across {} views",
        views.iter().map(|v| v.n_imputed).sum::<usize>(),
        views.len()
    );
    Ok(ImputedData { views })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ObservedMatrix, TrainingOutput, TrainingStats, View};
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn trained_store(family: NoiseFamily, data: ObservedMatrix) -> ModelStore {
        let view = View::with_generated_names("v", family, data).unwrap();
        let mut store = ModelStore::with_generated_samples(vec![view]).unwrap();
        store
            .attach_training(TrainingOutput {
                factors: FactorMatrix::new(array![[1.0, 0.0], [0.0, 1.0], [2.0, -1.0]]).unwrap(),
                weights: vec![WeightMatrix::new(array![[0.5, 1.0], [-1.0, 2.0]]).unwrap()],
                stats: TrainingStats {
                    iterations: 1,
                    elbo: 0.0,
                },
                intercept_factor: None,
            })
            .unwrap();
        store
    }

    fn observed() -> ObservedMatrix {
        ObservedMatrix::new(array![
            [Some(0.4), None, Some(0.1)],
            [None, Some(2.2), Some(-4.1)]
        ])
    }

    #[test]
    fn continuous_prediction_is_the_linear_predictor() {
        let store = trained_store(NoiseFamily::Continuous, observed());
        let p = predict(&store, "v", &[0, 1], PredictionScale::Response).unwrap();
        // column j = W . z_j
        let expected = array![[0.5, 1.0, 0.0], [-1.0, 2.0, -4.0]];
        for (a, b) in p.iter().zip(expected.iter()) {
            assert_abs_diff_eq!(*a, *b, epsilon = 1e-12);
        }
        let only_first = predict(&store, "v", &[0], PredictionScale::Response).unwrap();
        assert_abs_diff_eq!(only_first[(0, 2)], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn binary_and_count_predictions_respect_their_domains() {
        let data = ObservedMatrix::from_dense(Array2::zeros((2, 3)).view());
        let binary = trained_store(NoiseFamily::Binary, data.clone());
        let p = predict(&binary, "v", &[0, 1], PredictionScale::Response).unwrap();
        assert!(p.iter().all(|&v| v > 0.0 && v < 1.0));
        assert_abs_diff_eq!(p[(0, 2)], 0.5, epsilon = 1e-12);

        let count = trained_store(NoiseFamily::Count, data);
        let r = predict(&count, "v", &[0, 1], PredictionScale::Response).unwrap();
        assert!(r.iter().all(|&v| v > 0.0));
        assert_abs_diff_eq!(r[(1, 1)], 2.0_f64.exp(), epsilon = 1e-12);

        let rounded = predict(&binary, "v", &[0, 1], PredictionScale::InRange).unwrap();
        assert!(rounded.iter().all(|&v| v == 0.0 || v == 1.0));
        let link = predict(&count, "v", &[0, 1], PredictionScale::Link).unwrap();
        assert_abs_diff_eq!(link[(1, 2)], -4.0, epsilon = 1e-12);
    }

    #[test]
    fn imputation_only_fills_missing_entries() {
        let store = trained_store(NoiseFamily::Continuous, observed());
        let imputed = impute(&store).unwrap();
        let v = imputed.get("v").unwrap();
        assert_eq!(v[(0, 0)], 0.4);
        assert_eq!(v[(0, 2)], 0.1);
        assert_eq!(v[(1, 1)], 2.2);
        assert_abs_diff_eq!(v[(0, 1)], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(v[(1, 0)], -1.0, epsilon = 1e-12);
        assert_eq!(imputed.views[0].n_imputed, 2);
        // the store keeps its gaps
        assert_eq!(store.view("v").unwrap().data().n_missing(), 2);
    }

    #[test]
    fn imputing_fully_observed_data_is_the_identity() {
        let dense = array![[3.0, -1.0, 0.25], [7.5, 0.0, 1.0]];
        let store = trained_store(NoiseFamily::Continuous, ObservedMatrix::from_dense(dense.view()));
        let imputed = impute(&store).unwrap();
        assert_eq!(imputed.get("v").unwrap(), &dense);
    }

    #[test]
    fn invalid_requests_fail_before_any_work() {
        let store = trained_store(NoiseFamily::Continuous, observed());
        assert!(matches!(
            predict(&store, "missing", &[0], PredictionScale::Response),
            Err(ModelError::UnknownView(_))
        ));
        assert!(matches!(
            predict(&store, "v", &[], PredictionScale::Response),
            Err(ModelError::EmptyFactorSubset)
        ));
        let options = ImputeOptions {
            factors: Some(vec![]),
            ..ImputeOptions::default()
        };
        assert!(matches!(
            impute_with(&store, &options),
            Err(ModelError::EmptyFactorSubset)
        ));
    }

    #[test]
    fn untrained_models_cannot_predict() {
        let view = View::with_generated_names("v", NoiseFamily::Continuous, observed()).unwrap();
        let store = ModelStore::with_generated_samples(vec![view]).unwrap();
        assert!(matches!(
            predict(&store, "v", &[0], PredictionScale::Response),
            Err(ModelError::NotTrained)
        ));
    }
}
