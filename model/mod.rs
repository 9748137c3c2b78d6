pub mod likelihood;
pub mod matrix;
pub mod store;
pub mod trainer;

pub use likelihood::{LinkFunction, NoiseFamily};
pub use matrix::ObservedMatrix;
pub use store::{
    Dimensions, FactorMatrix, ModelError, ModelStore, TrainingStats, TrainingStatus, View,
    WeightMatrix, validate_factor_subset,
};
pub use trainer::{PrecomputedTrainer, Trainer, TrainingConfig, TrainingOutput};
