use super::likelihood::NoiseFamily;
use super::store::{FactorMatrix, TrainingStats, View, WeightMatrix};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Options handed to a trainer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Requested number of factors.
    pub factors: usize,
    /// Per-view likelihood assignment. Empty means "use the views' own tags".
    #[serde(default)]
    pub likelihoods: Vec<NoiseFamily>,
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub seed: u64,
    /// Learn feature means as an additional constant factor.
    #[serde(default)]
    pub learn_intercept: bool,
}

fn default_tolerance() -> f64 {
    0.01
}

fn default_max_iterations() -> usize {
    5_000
}

impl TrainingConfig {
    pub fn new(factors: usize) -> Self {
        Self {
            factors,
            likelihoods: Vec::new(),
            tolerance: default_tolerance(),
            max_iterations: default_max_iterations(),
            seed: 0,
            learn_intercept: false,
        }
    }
}

/// Everything a trainer hands back.
#[derive(Debug, Clone)]
pub struct TrainingOutput {
    pub factors: FactorMatrix,
    /// One weight matrix per view, in view order.
    pub weights: Vec<WeightMatrix>,
    pub stats: TrainingStats,
    pub intercept_factor: Option<usize>,
}

/// Capability boundary to whatever produces factor and weight estimates.
///
/// The crate never fits models itself; any optimiser (or a loader of
/// precomputed artifacts) can stand behind this trait.
pub trait Trainer {
    type Error: std::error::Error + Send + Sync + 'static;

    fn train(&self, views: &[View], config: &TrainingConfig) -> Result<TrainingOutput, Self::Error>;
}

#[derive(Debug, Error)]
pub enum PrecomputedError {
    #[error("Precomputed artifacts have {found} factors, but {requested} were requested.")]
    FactorCountMismatch { requested: usize, found: usize },
}

/// A trainer that simply returns artifacts computed elsewhere.
#[derive(Debug, Clone)]
pub struct PrecomputedTrainer {
    output: TrainingOutput,
}

impl PrecomputedTrainer {
    pub fn new(output: TrainingOutput) -> Self {
        Self { output }
    }
}

impl Trainer for PrecomputedTrainer {
    type Error = PrecomputedError;

    fn train(&self, views: &[View], config: &TrainingConfig) -> Result<TrainingOutput, Self::Error> {
        let found = self.output.factors.n_factors();
        if found != config.factors {
            return Err(PrecomputedError::FactorCountMismatch {
                requested: config.factors,
                found,
            });
        }
        log::debug!(
            "Serving precomputed artifacts for {} views ({} factors)",
            views.len(),
            found
        );
        Ok(self.output.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ModelError, ModelStore, ObservedMatrix, TrainingStatus};
    use ndarray::Array2;

    fn store_and_output() -> (ModelStore, TrainingOutput) {
        let view = View::with_generated_names(
            "rna",
            NoiseFamily::Continuous,
            ObservedMatrix::from_dense(Array2::from_elem((3, 4), 1.0).view()),
        )
        .unwrap();
        let store = ModelStore::with_generated_samples(vec![view]).unwrap();
        let output = TrainingOutput {
            factors: FactorMatrix::new(Array2::zeros((4, 2))).unwrap(),
            weights: vec![WeightMatrix::new(Array2::zeros((3, 2))).unwrap()],
            stats: TrainingStats {
                iterations: 40,
                elbo: -120.0,
            },
            intercept_factor: None,
        };
        (store, output)
    }

    #[test]
    fn precomputed_trainer_attaches_its_artifacts() {
        let (mut store, output) = store_and_output();
        let trainer = PrecomputedTrainer::new(output);
        store.train_with(&trainer, &TrainingConfig::new(2)).unwrap();
        assert_eq!(store.status(), TrainingStatus::Trained);
        assert_eq!(store.dimensions().factors, 2);
    }

    #[test]
    fn trainer_failures_surface_through_the_store() {
        let (mut store, output) = store_and_output();
        let trainer = PrecomputedTrainer::new(output);
        let err = store
            .train_with(&trainer, &TrainingConfig::new(5))
            .unwrap_err();
        assert!(matches!(err, ModelError::Trainer(_)));
        assert_eq!(store.status(), TrainingStatus::Untrained);
    }

    #[test]
    fn likelihood_assignment_must_match_view_tags() {
        let (mut store, output) = store_and_output();
        let trainer = PrecomputedTrainer::new(output);
        let mut config = TrainingConfig::new(2);
        config.likelihoods = vec![NoiseFamily::Count];
        assert!(matches!(
            store.train_with(&trainer, &config),
            Err(ModelError::LikelihoodMismatch { .. })
        ));
    }

    #[test]
    fn training_config_reads_from_toml_with_defaults() {
        let config: TrainingConfig =
            toml::from_str("factors = 10\nlikelihoods = [\"continuous\", \"binary\"]\n").unwrap();
        assert_eq!(config.factors, 10);
        assert_eq!(
            config.likelihoods,
            vec![NoiseFamily::Continuous, NoiseFamily::Binary]
        );
        assert_eq!(config.max_iterations, 5_000);
        assert!(!config.learn_intercept);
    }
}
