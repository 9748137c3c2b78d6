#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]
pub mod predict;
pub mod simulate;
pub mod variance;

#[path = "../model/mod.rs"]
pub mod model;

#[path = "../preprocess/mod.rs"]
pub mod preprocess;

// Feature-set enrichment of factor loadings
#[path = "../enrichment/mod.rs"]
pub mod enrichment;

pub use model::{
    Dimensions, FactorMatrix, ModelError, ModelStore, NoiseFamily, ObservedMatrix, TrainingStatus,
    View, WeightMatrix,
};
pub use predict::{ImputeOptions, ImputedData, PredictionScale, impute, impute_with, predict};
pub use variance::{
    VarianceExplained, calculate_variance_explained, variance_explained,
    variance_explained_per_feature,
};
pub use simulate::{SimulatedModel, SimulationBuilder, SimulationError};
pub use enrichment::{
    EnrichmentError, EnrichmentMethod, EnrichmentOptions, EnrichmentResult, FeatureSetMatrix,
    ViewLoadings, run_enrichment_analysis, run_enrichment_analysis_with_progress,
};
