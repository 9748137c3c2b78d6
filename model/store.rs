//! # Model Data Store
//!
//! Holds the artifacts of one multi-view factor model: the views with their
//! noise families, the shared factor matrix and the per-view weight matrices
//! returned by the trainer, plus training status and statistics.
//!
//! The store owns the invariants every engine relies on: all views share the
//! same sample axis, view names are unique and, once trained, every weight
//! matrix has one row per feature of its view and exactly `K` columns.

use super::likelihood::NoiseFamily;
use super::matrix::ObservedMatrix;
use super::trainer::{Trainer, TrainingConfig, TrainingOutput};
use ahash::AHashSet;
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// A comprehensive error type for store access and shape validation.
#[derive(Error, Debug)]
pub enum ModelError {
    #[error("View '{0}' does not exist in this model.")]
    UnknownView(String),
    #[error("The factor subset is empty; at least one factor must be requested.")]
    EmptyFactorSubset,
    #[error("Factor index {index} is out of range for a model with {factors} factors.")]
    FactorOutOfRange { index: usize, factors: usize },
    #[error("Factor index {0} was requested more than once.")]
    DuplicateFactor(usize),
    #[error("View '{view}' has {found} samples, but the model has {expected}.")]
    SampleMismatch {
        view: String,
        expected: usize,
        found: usize,
    },
    #[error("View name '{0}' is used more than once.")]
    DuplicateView(String),
    #[error("Sample name '{0}' is used more than once.")]
    DuplicateSample(String),
    #[error("Feature name '{feature}' appears more than once in view '{view}'.")]
    DuplicateFeature { view: String, feature: String },
    #[error("{what} has shape {found:?}, but {expected:?} was expected.")]
    ShapeMismatch {
        what: String,
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("{0} contains non-finite values.")]
    NonFinite(String),
    #[error("The model has not been trained yet; factors and weights are unavailable.")]
    NotTrained,
    #[error("The model is already trained; raw view data can no longer be modified.")]
    AlreadyTrained,
    #[error("The training configuration assigns '{configured}' to view '{view}', which is tagged '{tagged}'.")]
    LikelihoodMismatch {
        view: String,
        configured: NoiseFamily,
        tagged: NoiseFamily,
    },
    #[error("The trainer failed: {0}")]
    Trainer(Box<dyn std::error::Error + Send + Sync + 'static>),
}

/// One omics data matrix: features are rows, samples are columns.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct View {
    name: String,
    family: NoiseFamily,
    feature_names: Vec<String>,
    data: ObservedMatrix,
}

impl View {
    pub fn new(
        name: impl Into<String>,
        family: NoiseFamily,
        feature_names: Vec<String>,
        data: ObservedMatrix,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        if feature_names.len() != data.nrows() {
            return Err(ModelError::ShapeMismatch {
                what: format!("Feature names of view '{name}'"),
                expected: (data.nrows(), 1),
                found: (feature_names.len(), 1),
            });
        }
        let mut seen = AHashSet::with_capacity(feature_names.len());
        for feature in &feature_names {
            if !seen.insert(feature.as_str()) {
                return Err(ModelError::DuplicateFeature {
                    view: name,
                    feature: feature.clone(),
                });
            }
        }
        if data.values().iter().flatten().any(|v| !v.is_finite()) {
            return Err(ModelError::NonFinite(format!("Data of view '{name}'")));
        }
        Ok(Self {
            name,
            family,
            feature_names,
            data,
        })
    }

    /// Creates a view whose features are called `{name}_feature{i}` (1-based).
    pub fn with_generated_names(
        name: impl Into<String>,
        family: NoiseFamily,
        data: ObservedMatrix,
    ) -> Result<Self, ModelError> {
        let name = name.into();
        let feature_names = (1..=data.nrows())
            .map(|i| format!("{name}_feature{i}"))
            .collect();
        Self::new(name, family, feature_names, data)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn family(&self) -> NoiseFamily {
        self.family
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn data(&self) -> &ObservedMatrix {
        &self.data
    }

    pub fn n_features(&self) -> usize {
        self.data.nrows()
    }

    pub fn n_samples(&self) -> usize {
        self.data.ncols()
    }
}

fn check_finite(values: ArrayView2<f64>, what: &str) -> Result<(), ModelError> {
    if values.iter().any(|v| !v.is_finite()) {
        return Err(ModelError::NonFinite(what.to_string()));
    }
    Ok(())
}

/// Per-sample factor scores, shape `[n_samples, n_factors]`. Always fully observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactorMatrix(Array2<f64>);

impl FactorMatrix {
    pub fn new(values: Array2<f64>) -> Result<Self, ModelError> {
        check_finite(values.view(), "Factor matrix")?;
        Ok(Self(values))
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }

    pub fn n_samples(&self) -> usize {
        self.0.nrows()
    }

    pub fn n_factors(&self) -> usize {
        self.0.ncols()
    }
}

/// Per-view feature loadings, shape `[n_features, n_factors]`. Always fully observed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeightMatrix(Array2<f64>);

impl WeightMatrix {
    pub fn new(values: Array2<f64>) -> Result<Self, ModelError> {
        check_finite(values.view(), "Weight matrix")?;
        Ok(Self(values))
    }

    pub fn values(&self) -> ArrayView2<'_, f64> {
        self.0.view()
    }

    pub fn n_features(&self) -> usize {
        self.0.nrows()
    }

    pub fn n_factors(&self) -> usize {
        self.0.ncols()
    }
}

/// Dimensionality of a model: `M` views, `N` samples, `K` factors and `D_v` features per view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub views: usize,
    pub samples: usize,
    /// Zero while the model is untrained.
    pub factors: usize,
    pub features: Vec<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrainingStatus {
    Untrained,
    Trained,
}

/// Summary statistics reported by the trainer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingStats {
    pub iterations: usize,
    /// Final value of the evidence lower bound.
    pub elbo: f64,
}

/// Factor and weight point estimates written once by the trainer.
#[derive(Debug, Clone)]
struct Expectations {
    factors: FactorMatrix,
    weights: Vec<WeightMatrix>,
}

/// The top-level container for one multi-view factor model.
#[derive(Debug, Clone)]
pub struct ModelStore {
    sample_names: Vec<String>,
    views: Vec<View>,
    expectations: Option<Expectations>,
    intercept_factor: Option<usize>,
    training_stats: Option<TrainingStats>,
}

impl ModelStore {
    /// Builds an untrained store, validating that every view shares the sample axis.
    pub fn new(sample_names: Vec<String>, views: Vec<View>) -> Result<Self, ModelError> {
        let n_samples = sample_names.len();
        let mut seen_samples = AHashSet::with_capacity(n_samples);
        if let Some(duplicate) = sample_names.iter().find(|s| !seen_samples.insert(s.as_str())) {
            return Err(ModelError::DuplicateSample(duplicate.clone()));
        }
        let mut names = AHashSet::with_capacity(views.len());
        for view in &views {
            if !names.insert(view.name()) {
                return Err(ModelError::DuplicateView(view.name().to_string()));
            }
            if view.n_samples() != n_samples {
                return Err(ModelError::SampleMismatch {
                    view: view.name().to_string(),
                    expected: n_samples,
                    found: view.n_samples(),
                });
            }
        }
        Ok(Self {
            sample_names,
            views,
            expectations: None,
            intercept_factor: None,
            training_stats: None,
        })
    }

    /// Builds a store with generated sample names `sample{i}` (1-based).
    pub fn with_generated_samples(views: Vec<View>) -> Result<Self, ModelError> {
        let n_samples = views.first().map_or(0, View::n_samples);
        let sample_names = (1..=n_samples).map(|i| format!("sample{i}")).collect();
        Self::new(sample_names, views)
    }

    pub fn sample_names(&self) -> &[String] {
        &self.sample_names
    }

    pub fn n_samples(&self) -> usize {
        self.sample_names.len()
    }

    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn view_names(&self) -> Vec<&str> {
        self.views.iter().map(View::name).collect()
    }

    pub fn view_index(&self, name: &str) -> Result<usize, ModelError> {
        self.views
            .iter()
            .position(|v| v.name() == name)
            .ok_or_else(|| ModelError::UnknownView(name.to_string()))
    }

    pub fn view(&self, name: &str) -> Result<&View, ModelError> {
        Ok(&self.views[self.view_index(name)?])
    }

    pub fn status(&self) -> TrainingStatus {
        if self.expectations.is_some() {
            TrainingStatus::Trained
        } else {
            TrainingStatus::Untrained
        }
    }

    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            views: self.views.len(),
            samples: self.n_samples(),
            factors: self
                .expectations
                .as_ref()
                .map_or(0, |e| e.factors.n_factors()),
            features: self.views.iter().map(View::n_features).collect(),
        }
    }

    pub fn factors(&self) -> Result<&FactorMatrix, ModelError> {
        self.expectations
            .as_ref()
            .map(|e| &e.factors)
            .ok_or(ModelError::NotTrained)
    }

    pub fn weights(&self, view: &str) -> Result<&WeightMatrix, ModelError> {
        let index = self.view_index(view)?;
        self.expectations
            .as_ref()
            .map(|e| &e.weights[index])
            .ok_or(ModelError::NotTrained)
    }

    /// All weight matrices, in view order.
    pub fn all_weights(&self) -> Result<&[WeightMatrix], ModelError> {
        self.expectations
            .as_ref()
            .map(|e| e.weights.as_slice())
            .ok_or(ModelError::NotTrained)
    }

    pub fn training_stats(&self) -> Option<&TrainingStats> {
        self.training_stats.as_ref()
    }

    /// Index of the constant factor that carries feature means, if the trainer learned one.
    pub fn intercept_factor(&self) -> Option<usize> {
        self.intercept_factor
    }

    /// All factor indices `0..K`.
    pub fn all_factors(&self) -> Result<Vec<usize>, ModelError> {
        Ok((0..self.factors()?.n_factors()).collect())
    }

    /// Display names `Factor1..FactorK`, with the intercept factor called `intercept`.
    pub fn factor_names(&self) -> Vec<String> {
        let k = self.dimensions().factors;
        (0..k)
            .map(|i| {
                if Some(i) == self.intercept_factor {
                    "intercept".to_string()
                } else {
                    format!("Factor{}", i + 1)
                }
            })
            .collect()
    }

    /// Mutable access to raw view data, only allowed before training.
    pub(crate) fn view_data_mut(&mut self, name: &str) -> Result<&mut ObservedMatrix, ModelError> {
        if self.status() == TrainingStatus::Trained {
            return Err(ModelError::AlreadyTrained);
        }
        let index = self.view_index(name)?;
        Ok(&mut self.views[index].data)
    }

    /// Validates trainer output against the views and stores it.
    pub fn attach_training(&mut self, output: TrainingOutput) -> Result<(), ModelError> {
        let TrainingOutput {
            factors,
            weights,
            stats,
            intercept_factor,
        } = output;

        let k = factors.n_factors();
        if factors.n_samples() != self.n_samples() {
            return Err(ModelError::ShapeMismatch {
                what: "Factor matrix".to_string(),
                expected: (self.n_samples(), k),
                found: (factors.n_samples(), k),
            });
        }
        if weights.len() != self.views.len() {
            return Err(ModelError::ShapeMismatch {
                what: "Weight matrix list".to_string(),
                expected: (self.views.len(), 1),
                found: (weights.len(), 1),
            });
        }
        for (view, w) in self.views.iter().zip(&weights) {
            if w.n_features() != view.n_features() || w.n_factors() != k {
                return Err(ModelError::ShapeMismatch {
                    what: format!("Weight matrix of view '{}'", view.name()),
                    expected: (view.n_features(), k),
                    found: (w.n_features(), w.n_factors()),
                });
            }
        }
        if let Some(index) = intercept_factor {
            if index >= k {
                return Err(ModelError::FactorOutOfRange { index, factors: k });
            }
        }

        log::info!(
            "Attached trained model: {} views, {} samples, {} factors",
            self.views.len(),
            self.n_samples(),
            k
        );
        self.expectations = Some(Expectations { factors, weights });
        self.intercept_factor = intercept_factor;
        self.training_stats = Some(stats);
        Ok(())
    }

    /// Runs an external trainer on the current views and attaches its output.
    pub fn train_with<T: Trainer>(
        &mut self,
        trainer: &T,
        config: &TrainingConfig,
    ) -> Result<(), ModelError> {
        if self.status() == TrainingStatus::Trained {
            return Err(ModelError::AlreadyTrained);
        }
        if !config.likelihoods.is_empty() {
            if config.likelihoods.len() != self.views.len() {
                return Err(ModelError::ShapeMismatch {
                    what: "Likelihood assignment".to_string(),
                    expected: (self.views.len(), 1),
                    found: (config.likelihoods.len(), 1),
                });
            }
            for (view, &configured) in self.views.iter().zip(&config.likelihoods) {
                if view.family() != configured {
                    return Err(ModelError::LikelihoodMismatch {
                        view: view.name().to_string(),
                        configured,
                        tagged: view.family(),
                    });
                }
            }
        }
        let output = trainer
            .train(&self.views, config)
            .map_err(|e| ModelError::Trainer(Box::new(e)))?;
        self.attach_training(output)
    }
}

/// Checks that a factor subset is non-empty, in range and free of repeats.
pub fn validate_factor_subset(subset: &[usize], n_factors: usize) -> Result<(), ModelError> {
    if subset.is_empty() {
        return Err(ModelError::EmptyFactorSubset);
    }
    let mut seen = AHashSet::with_capacity(subset.len());
    for &index in subset {
        if index >= n_factors {
            return Err(ModelError::FactorOutOfRange {
                index,
                factors: n_factors,
            });
        }
        if !seen.insert(index) {
            return Err(ModelError::DuplicateFactor(index));
        }
    }
    Ok(())
}
