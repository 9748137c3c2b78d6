//! Synthetic multi-view data with known factors and weights.
//!
//! Used by tests, benchmarks and the CLI to produce stores whose generating
//! parameters are known exactly.

use crate::model::{
    FactorMatrix, ModelError, ModelStore, NoiseFamily, ObservedMatrix, TrainingOutput,
    TrainingStats, View, WeightMatrix,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal, Poisson, StandardNormal};
use thiserror::Error;

/// Largest Poisson rate drawn from; keeps extreme linear predictors sampleable.
const MAX_POISSON_RATE: f64 = 1.0e6;

#[derive(Error, Debug)]
pub enum SimulationError {
    #[error("At least one view must be requested.")]
    NoViews,
    #[error("At least one sample and one factor are required.")]
    EmptyDimensions,
    #[error("{what} must lie in [0, 1], but was {value}.")]
    InvalidFraction { what: &'static str, value: f64 },
    #[error("Noise precision must be positive and finite, but was {0}.")]
    InvalidPrecision(f64),
    #[error("View '{view}' activates factor {factor}, but only {factors} factors are simulated.")]
    ActiveFactorOutOfRange {
        view: String,
        factor: usize,
        factors: usize,
    },
    #[error("Could not sample simulated data: {0}")]
    Distribution(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// One simulated view.
#[derive(Clone, Debug)]
struct ViewPlan {
    name: String,
    family: NoiseFamily,
    features: usize,
    /// Factors with non-zero weights; `None` means all.
    active: Option<Vec<usize>>,
}

/// An untrained store together with the parameters that generated its data.
#[derive(Clone, Debug)]
pub struct SimulatedModel {
    pub store: ModelStore,
    pub truth: TrainingOutput,
}

impl SimulatedModel {
    /// Attaches the generating parameters to the store, as if a perfect trainer had run.
    pub fn into_trained(self) -> Result<ModelStore, ModelError> {
        let SimulatedModel { mut store, truth } = self;
        store.attach_training(truth)?;
        Ok(store)
    }
}

/// Builder for synthetic multi-view data.
pub struct SimulationBuilder {
    n_samples: usize,
    n_factors: usize,
    views: Vec<ViewPlan>,
    noise_precision: f64,
    missing_fraction: f64,
    missing_sample_fraction: f64,
    seed: u64,
}

impl SimulationBuilder {
    /// Create a new builder with no views, unit noise precision and no missing data.
    pub fn new(n_samples: usize, n_factors: usize) -> Self {
        Self {
            n_samples,
            n_factors,
            views: Vec::new(),
            noise_precision: 1.0,
            missing_fraction: 0.0,
            missing_sample_fraction: 0.0,
            seed: 42,
        }
    }

    /// Add a view loaded on every factor.
    pub fn with_view(mut self, name: impl Into<String>, family: NoiseFamily, features: usize) -> Self {
        self.views.push(ViewPlan {
            name: name.into(),
            family,
            features,
            active: None,
        });
        self
    }

    /// Add a view whose weights are zero outside `active`.
    pub fn with_view_on(
        mut self,
        name: impl Into<String>,
        family: NoiseFamily,
        features: usize,
        active: &[usize],
    ) -> Self {
        self.views.push(ViewPlan {
            name: name.into(),
            family,
            features,
            active: Some(active.to_vec()),
        });
        self
    }

    /// Precision of the Gaussian noise added to continuous views.
    pub fn with_noise_precision(mut self, tau: f64) -> Self {
        self.noise_precision = tau;
        self
    }

    /// Fraction of entries hidden independently at random.
    pub fn with_missing_fraction(mut self, fraction: f64) -> Self {
        self.missing_fraction = fraction;
        self
    }

    /// Fraction of samples whose whole column is hidden, drawn per view.
    pub fn with_missing_samples(mut self, fraction: f64) -> Self {
        self.missing_sample_fraction = fraction;
        self
    }

    /// Set the random seed for reproducibility.
    pub fn seed(mut self, s: u64) -> Self {
        self.seed = s;
        self
    }

    fn validate(&self) -> Result<(), SimulationError> {
        if self.views.is_empty() {
            return Err(SimulationError::NoViews);
        }
        if self.n_samples == 0 || self.n_factors == 0 {
            return Err(SimulationError::EmptyDimensions);
        }
        for (what, value) in [
            ("Missing fraction", self.missing_fraction),
            ("Missing sample fraction", self.missing_sample_fraction),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(SimulationError::InvalidFraction { what, value });
            }
        }
        if !(self.noise_precision.is_finite() && self.noise_precision > 0.0) {
            return Err(SimulationError::InvalidPrecision(self.noise_precision));
        }
        for plan in &self.views {
            if let Some(active) = &plan.active {
                if let Some(&factor) = active.iter().find(|&&k| k >= self.n_factors) {
                    return Err(SimulationError::ActiveFactorOutOfRange {
                        view: plan.name.clone(),
                        factor,
                        factors: self.n_factors,
                    });
                }
            }
        }
        Ok(())
    }

    /// Draws factors, weights and data.
    ///
    /// `Z ~ N(0, 1)`, `W ~ N(0, 1)` on active factors, and per family:
    /// continuous `eta + N(0, 1/tau)`, binary `Bernoulli(sigmoid(eta))`,
    /// count `Poisson(exp(eta))`.
    pub fn build(self) -> Result<SimulatedModel, SimulationError> {
        self.validate()?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let n = self.n_samples;
        let k = self.n_factors;

        let z = Array2::from_shape_fn((n, k), |_| rng.sample::<f64, _>(StandardNormal));
        let noise = Normal::new(0.0, self.noise_precision.recip().sqrt())
            .map_err(|e| SimulationError::Distribution(e.to_string()))?;

        let mut views = Vec::with_capacity(self.views.len());
        let mut weights = Vec::with_capacity(self.views.len());
        for plan in &self.views {
            let w = Array2::from_shape_fn((plan.features, k), |(_, factor)| {
                let active = plan.active.as_ref().is_none_or(|a| a.contains(&factor));
                if active {
                    rng.sample::<f64, _>(StandardNormal)
                } else {
                    0.0
                }
            });
            let eta = w.dot(&z.t());
            let link = plan.family.link();

            let mut values = Array2::from_elem(eta.dim(), None);
            for ((row, col), &e) in eta.indexed_iter() {
                let y = match plan.family {
                    NoiseFamily::Continuous => e + noise.sample(&mut rng),
                    NoiseFamily::Binary => {
                        if rng.gen_bool(link.inverse(e)) {
                            1.0
                        } else {
                            0.0
                        }
                    }
                    NoiseFamily::Count => {
                        let rate = link.inverse(e).min(MAX_POISSON_RATE);
                        Poisson::new(rate)
                            .map_err(|err| SimulationError::Distribution(err.to_string()))?
                            .sample(&mut rng)
                    }
                };
                values[(row, col)] = Some(y);
            }

            if self.missing_sample_fraction > 0.0 {
                for col in 0..n {
                    if rng.gen_bool(self.missing_sample_fraction) {
                        values.column_mut(col).fill(None);
                    }
                }
            }
            if self.missing_fraction > 0.0 {
                for entry in values.iter_mut() {
                    if rng.gen_bool(self.missing_fraction) {
                        *entry = None;
                    }
                }
            }

            let data = ObservedMatrix::new(values);
            log::debug!(
                "Simulated view '{}' ({}): {} features, {} missing entries",
                plan.name,
                plan.family,
                plan.features,
                data.n_missing()
            );
            views.push(View::with_generated_names(&plan.name, plan.family, data)?);
            weights.push(WeightMatrix::new(w)?);
        }

        let store = ModelStore::with_generated_samples(views)?;
        let truth = TrainingOutput {
            factors: FactorMatrix::new(z)?,
            weights,
            stats: TrainingStats {
                iterations: 0,
                elbo: 0.0,
            },
            intercept_factor: None,
        };
        log::info!(
            "Simulated {} views over {} samples with {} factors",
            self.views.len(),
            n,
            k
        );
        Ok(SimulatedModel { store, truth })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{TrainingStatus, View};

    #[test]
    fn dimensions_and_families_follow_the_builder() {
        let sim = SimulationBuilder::new(25, 3)
            .with_view("rna", NoiseFamily::Continuous, 12)
            .with_view("mut", NoiseFamily::Binary, 7)
            .with_view("atac", NoiseFamily::Count, 5)
            .build()
            .unwrap();
        let dims = sim.store.dimensions();
        assert_eq!(dims.samples, 25);
        assert_eq!(dims.features, vec![12, 7, 5]);
        assert_eq!(sim.store.status(), TrainingStatus::Untrained);
        assert_eq!(sim.truth.factors.n_factors(), 3);

        let binary: &View = sim.store.view("mut").unwrap();
        assert!(binary
            .data()
            .values()
            .iter()
            .flatten()
            .all(|&v| v == 0.0 || v == 1.0));
        let counts = sim.store.view("atac").unwrap();
        assert!(counts
            .data()
            .values()
            .iter()
            .flatten()
            .all(|&v| v >= 0.0 && v.fract() == 0.0));
    }

    #[test]
    fn inactive_factors_get_zero_weights() {
        let sim = SimulationBuilder::new(10, 3)
            .with_view_on("rna", NoiseFamily::Continuous, 6, &[1])
            .build()
            .unwrap();
        let w = sim.truth.weights[0].values();
        assert!(w.column(0).iter().all(|&v| v == 0.0));
        assert!(w.column(2).iter().all(|&v| v == 0.0));
        assert!(w.column(1).iter().any(|&v| v != 0.0));
    }

    #[test]
    fn same_seed_same_data() {
        let build = |seed| {
            SimulationBuilder::new(8, 2)
                .with_view("rna", NoiseFamily::Continuous, 4)
                .with_missing_fraction(0.2)
                .seed(seed)
                .build()
                .unwrap()
        };
        let a = build(3);
        let b = build(3);
        let c = build(4);
        assert_eq!(a.store.view("rna").unwrap().data(), b.store.view("rna").unwrap().data());
        assert_ne!(a.store.view("rna").unwrap().data(), c.store.view("rna").unwrap().data());
    }

    #[test]
    fn missing_samples_clear_whole_columns() {
        let sim = SimulationBuilder::new(40, 2)
            .with_view("rna", NoiseFamily::Continuous, 5)
            .with_missing_samples(0.5)
            .seed(9)
            .build()
            .unwrap();
        let data = sim.store.view("rna").unwrap().data();
        for col in 0..data.ncols() {
            let missing = (0..data.nrows()).filter(|&r| data.get(r, col).is_none()).count();
            assert!(missing == 0 || missing == data.nrows());
        }
        assert!(data.n_missing() > 0);
    }

    #[test]
    fn invalid_settings_are_rejected() {
        assert!(matches!(
            SimulationBuilder::new(10, 2).build(),
            Err(SimulationError::NoViews)
        ));
        assert!(matches!(
            SimulationBuilder::new(10, 2)
                .with_view("rna", NoiseFamily::Continuous, 3)
                .with_missing_fraction(1.5)
                .build(),
            Err(SimulationError::InvalidFraction { .. })
        ));
        assert!(matches!(
            SimulationBuilder::new(10, 2)
                .with_view_on("rna", NoiseFamily::Continuous, 3, &[2])
                .build(),
            Err(SimulationError::ActiveFactorOutOfRange { factor: 2, .. })
        ));
        assert!(matches!(
            SimulationBuilder::new(10, 2)
                .with_view("rna", NoiseFamily::Continuous, 3)
                .with_noise_precision(0.0)
                .build(),
            Err(SimulationError::InvalidPrecision(_))
        ));
    }

    #[test]
    fn the_truth_attaches_to_its_own_store() {
        let store = SimulationBuilder::new(12, 2)
            .with_view("rna", NoiseFamily::Continuous, 4)
            .build()
            .unwrap()
            .into_trained()
            .unwrap();
        assert_eq!(store.status(), TrainingStatus::Trained);
    }
}
