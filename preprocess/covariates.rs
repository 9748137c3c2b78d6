use crate::model::{ModelError, ModelStore, TrainingStatus};
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use ndarray_linalg::LeastSquaresSvd;
use thiserror::Error;

/// Minimum number of usable samples per feature when the caller does not choose one.
pub const DEFAULT_MIN_OBSERVATIONS: usize = 10;

#[derive(Error, Debug)]
pub enum CovariateError {
    #[error("Invalid covariate input: {0}")]
    InvalidCovariateShape(String),
    #[error("min_observations must be at least 1.")]
    InvalidMinObservations,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("Least-squares solve failed for feature '{feature}' of view '{view}': {source}")]
    Linalg {
        view: String,
        feature: String,
        #[source]
        source: ndarray_linalg::error::LinalgError,
    },
}

/// Sample-level covariates, shape `[n_samples, n_covariates]`, possibly with gaps.
#[derive(Debug, Clone)]
pub struct Covariates {
    values: Array2<Option<f64>>,
}

impl Covariates {
    /// A single covariate given as one value per sample.
    pub fn from_vector(values: Array1<Option<f64>>) -> Self {
        Self {
            values: values.insert_axis(Axis(1)),
        }
    }

    pub fn from_matrix(values: Array2<Option<f64>>) -> Self {
        Self { values }
    }

    pub fn n_samples(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_covariates(&self) -> usize {
        self.values.ncols()
    }

    fn sample_is_complete(&self, sample: usize) -> bool {
        self.values.row(sample).iter().all(Option::is_some)
    }
}

/// Outcome of regressing covariates out of one view.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegressionSummary {
    pub view: String,
    /// Features replaced by their residuals.
    pub regressed: usize,
    /// Features left untouched because too few samples were usable.
    pub skipped: usize,
}

/// Residualized values for one feature, or `None` if it must stay untouched.
type RowOutcome = Option<Vec<Option<f64>>>;

/// Removes a linear covariate effect from every feature of the named views.
///
/// Each feature is fitted independently by ordinary least squares with an
/// intercept, using only samples where both the feature and every covariate
/// are observed. Features with fewer than `min_observations` usable samples,
/// or no more usable samples than coefficients, are left exactly as they
/// were. Otherwise observed entries become residuals; observed entries whose
/// covariates are missing have no fitted value and become missing.
///
/// All inputs are validated before any view is modified.
pub fn regress_covariates(
    store: &mut ModelStore,
    views: &[&str],
    covariates: &Covariates,
    min_observations: usize,
) -> Result<Vec<RegressionSummary>, CovariateError> {
    // --- 1. Validate Inputs ---
    if store.status() == TrainingStatus::Trained {
        return Err(ModelError::AlreadyTrained.into());
    }
    if min_observations == 0 {
        return Err(CovariateError::InvalidMinObservations);
    }
    if covariates.n_samples() != store.n_samples() {
        return Err(CovariateError::InvalidCovariateShape(format!(
            "covariates have {} rows, but the model has {} samples",
            covariates.n_samples(),
            store.n_samples()
        )));
    }
    if covariates.n_covariates() == 0 {
        return Err(CovariateError::InvalidCovariateShape(
            "at least one covariate column is required".to_string(),
        ));
    }
    for &name in views {
        if store.view(name).is_err() {
            return Err(CovariateError::InvalidCovariateShape(format!(
                "view '{name}' does not exist"
            )));
        }
    }

    // --- 2. Fit every feature without touching the data ---
    let complete: Vec<bool> = (0..covariates.n_samples())
        .map(|j| covariates.sample_is_complete(j))
        .collect();
    let n_coefficients = covariates.n_covariates() + 1;
    let threshold = min_observations.max(n_coefficients + 1);

    let mut planned = Vec::with_capacity(views.len());
    for &name in views {
        let view = store.view(name)?;
        let outcomes: Vec<RowOutcome> = view
            .data()
            .values()
            .axis_iter(Axis(0))
            .into_par_iter()
            .enumerate()
            .map(|(row_index, row)| {
                residualize_row(row, covariates.values.view(), &complete, threshold).map_err(
                    |source| CovariateError::Linalg {
                        view: name.to_string(),
                        feature: view.feature_names()[row_index].clone(),
                        source,
                    },
                )
            })
            .collect::<Result<_, _>>()?;
        planned.push((name, outcomes));
    }

    // --- 3. Write residuals back ---
    let mut summaries = Vec::with_capacity(planned.len());
    for (name, outcomes) in planned {
        let data = store.view_data_mut(name)?;
        let mut values = data.values_mut();
        let mut regressed = 0usize;
        let mut skipped = 0usize;
        for (mut row, outcome) in values.axis_iter_mut(Axis(0)).zip(outcomes) {
            match outcome {
                Some(residuals) => {
                    regressed += 1;
                    for (slot, residual) in row.iter_mut().zip(residuals) {
                        *slot = residual;
                    }
                }
                None => skipped += 1,
            }
        }
        log::info!(
            "Regressed {} covariate(s) out of view '{}': {} features residualized, {} skipped (fewer than {} usable samples)",
            covariates.n_covariates(),
            name,
            regressed,
            skipped,
            threshold
        );
        summaries.push(RegressionSummary {
            view: name.to_string(),
            regressed,
            skipped,
        });
    }
    Ok(summaries)
}

/// Fits one feature on the covariates and returns its residualized values.
fn residualize_row(
    row: ArrayView1<Option<f64>>,
    covariates: ArrayView2<Option<f64>>,
    complete: &[bool],
    threshold: usize,
) -> Result<RowOutcome, ndarray_linalg::error::LinalgError> {
    let usable: Vec<usize> = row
        .iter()
        .enumerate()
        .filter(|(j, v)| v.is_some() && complete[*j])
        .map(|(j, _)| j)
        .collect();
    if usable.len() < threshold {
        return Ok(None);
    }

    let n_coefficients = covariates.ncols() + 1;
    let design = Array2::from_shape_fn((usable.len(), n_coefficients), |(i, c)| {
        if c == 0 {
            1.0
        } else {
            covariates[(usable[i], c - 1)].unwrap_or(0.0)
        }
    });
    let response: Array1<f64> = usable.iter().map(|&j| row[j].unwrap_or(0.0)).collect();
    let fit = design.least_squares(&response)?;
    let fitted = design.dot(&fit.solution);

    let mut residuals: Vec<Option<f64>> = vec![None; row.len()];
    for (i, &j) in usable.iter().enumerate() {
        residuals[j] = Some(response[i] - fitted[i]);
    }
    Ok(Some(residuals))
}
