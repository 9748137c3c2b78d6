//! # Variance decomposition
//!
//! Reports, for every requested factor and every view, the coefficient of
//! determination of the single-factor reconstruction, and per view the R² of
//! the joint reconstruction. Only observed entries enter any sum.
//!
//! Binary and count views are decomposed on the linear-predictor scale: the
//! observed values are replaced by their working response around the
//! full-model linear predictor (see [`NoiseFamily::variance_scale`]), because
//! sums of squares of raw 0/1 or count data do not decompose meaningfully.

use crate::model::{
    FactorMatrix, ModelError, ModelStore, NoiseFamily, ObservedMatrix, View, WeightMatrix,
    validate_factor_subset,
};
use crate::predict::linear_predictor;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Total sums of squares below this are treated as zero-variance views.
pub const VARIANCE_EPSILON: f64 = 1.0e-12;

/// Result of [`calculate_variance_explained`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarianceExplained {
    pub view_names: Vec<String>,
    /// Factor indices, one per row of `per_factor`.
    pub factors: Vec<usize>,
    /// R² of each single factor in each view, shape `[n_factors, n_views]`.
    pub per_factor: Array2<f64>,
    /// R² of the requested factors jointly, one entry per view.
    pub total: Array1<f64>,
}

impl VarianceExplained {
    pub fn for_view(&self, view: &str) -> Option<(Array1<f64>, f64)> {
        let index = self.view_names.iter().position(|v| v == view)?;
        Some((self.per_factor.column(index).to_owned(), self.total[index]))
    }
}

/// Variance decomposition of a trained store over a subset of factors.
pub fn calculate_variance_explained(
    store: &ModelStore,
    factors: &[usize],
) -> Result<VarianceExplained, ModelError> {
    variance_explained(
        store.factors()?,
        store.all_weights()?,
        store.views(),
        factors,
        store.intercept_factor(),
    )
}

/// Variance decomposition from raw artifacts.
///
/// When `intercept` names a constant factor carrying feature means, it is
/// added to every reconstruction; the per-factor R² then measures what each
/// factor explains on top of the means.
pub fn variance_explained(
    factors: &FactorMatrix,
    weights: &[WeightMatrix],
    views: &[View],
    subset: &[usize],
    intercept: Option<usize>,
) -> Result<VarianceExplained, ModelError> {
    // --- 1. Validate Inputs ---
    let k = factors.n_factors();
    validate_factor_subset(subset, k)?;
    if let Some(index) = intercept {
        if index >= k {
            return Err(ModelError::FactorOutOfRange { index, factors: k });
        }
    }
    if weights.len() != views.len() {
        return Err(ModelError::ShapeMismatch {
            what: "Weight matrix list".to_string(),
            expected: (views.len(), 1),
            found: (weights.len(), 1),
        });
    }
    for (view, w) in views.iter().zip(weights) {
        if w.n_features() != view.n_features() || w.n_factors() != k {
            return Err(ModelError::ShapeMismatch {
                what: format!("Weight matrix of view '{}'", view.name()),
                expected: (view.n_features(), k),
                found: (w.n_features(), w.n_factors()),
            });
        }
        if view.n_samples() != factors.n_samples() {
            return Err(ModelError::SampleMismatch {
                view: view.name().to_string(),
                expected: factors.n_samples(),
                found: view.n_samples(),
            });
        }
    }

    // --- 2. Decompose each view independently ---
    let all: Vec<usize> = (0..k).collect();
    let per_view: Vec<(Vec<f64>, f64)> = views
        .par_iter()
        .zip(weights.par_iter())
        .map(|(view, w)| decompose_view(view, w, factors, &all, subset, intercept))
        .collect::<Result<_, _>>()?;

    let mut per_factor = Array2::zeros((subset.len(), views.len()));
    let mut total = Array1::zeros(views.len());
    for (m, (by_factor, joint)) in per_view.into_iter().enumerate() {
        for (row, r2) in by_factor.into_iter().enumerate() {
            per_factor[(row, m)] = r2;
        }
        total[m] = joint;
    }

    Ok(VarianceExplained {
        view_names: views.iter().map(|v| v.name().to_string()).collect(),
        factors: subset.to_vec(),
        per_factor,
        total,
    })
}

/// Adds the intercept factor to a set of factor columns, if it is not already there.
fn with_intercept(columns: &[usize], intercept: Option<usize>) -> Vec<usize> {
    let mut out = columns.to_vec();
    if let Some(index) = intercept {
        if !out.contains(&index) {
            out.push(index);
        }
    }
    out
}

fn decompose_view(
    view: &View,
    weights: &WeightMatrix,
    factors: &FactorMatrix,
    all: &[usize],
    subset: &[usize],
    intercept: Option<usize>,
) -> Result<(Vec<f64>, f64), ModelError> {
    let target = variance_target(view, weights, factors, all)?;
    let ss_total = target.centered_sum_of_squares();
    if ss_total < VARIANCE_EPSILON {
        log::debug!(
            "View '{}' has zero observed variance; reporting R² = 0",
            view.name()
        );
        return Ok((vec![0.0; subset.len()], 0.0));
    }

    let r2_of = |columns: &[usize]| -> Result<f64, ModelError> {
        let reconstruction = linear_predictor(weights, factors, columns)?;
        Ok(coefficient_of_determination(
            &target,
            reconstruction.view(),
            ss_total,
        ))
    };

    let by_factor = subset
        .par_iter()
        .map(|&factor| r2_of(&with_intercept(&[factor], intercept)))
        .collect::<Result<Vec<_>, _>>()?;
    let joint = r2_of(&with_intercept(subset, intercept))?;

    log::debug!(
        "View '{}' ({}): total R² = {:.4}",
        view.name(),
        view.family(),
        joint
    );
    Ok((by_factor, joint))
}

/// Observed data on the scale the decomposition is measured on.
fn variance_target(
    view: &View,
    weights: &WeightMatrix,
    factors: &FactorMatrix,
    all: &[usize],
) -> Result<ObservedMatrix, ModelError> {
    let family = view.family();
    if family == NoiseFamily::Continuous {
        return Ok(view.data().clone());
    }
    let eta = linear_predictor(weights, factors, all)?;
    Ok(view
        .data()
        .map_observed_indexed(|position, y| family.variance_scale(y, eta[position])))
}

/// `1 - SS_resid / SS_total`, clipped to `[0, 1]`.
fn coefficient_of_determination(
    target: &ObservedMatrix,
    reconstruction: ArrayView2<f64>,
    ss_total: f64,
) -> f64 {
    let ss_resid = target.residual_sum_of_squares(reconstruction);
    (1.0 - ss_resid / ss_total).clamp(0.0, 1.0)
}

/// Per-feature R² of the joint reconstruction of one view, shape `[n_features]`.
///
/// Features with zero observed variance report 0.
pub fn variance_explained_per_feature(
    store: &ModelStore,
    view: &str,
    factors: &[usize],
) -> Result<Array1<f64>, ModelError> {
    let target_view = store.view(view)?;
    let z = store.factors()?;
    let w = store.weights(view)?;
    let all = store.all_factors()?;
    validate_factor_subset(factors, z.n_factors())?;

    let target = variance_target(target_view, w, z, &all)?;
    let columns = with_intercept(factors, store.intercept_factor());
    let reconstruction = linear_predictor(w, z, &columns)?;

    let r2 = target
        .values()
        .axis_iter(Axis(0))
        .zip(reconstruction.axis_iter(Axis(0)))
        .map(|(row, predicted)| {
            let single = ObservedMatrix::new(row.insert_axis(Axis(0)).to_owned());
            let ss_total = single.centered_sum_of_squares();
            if ss_total < VARIANCE_EPSILON {
                0.0
            } else {
                coefficient_of_determination(&single, predicted.insert_axis(Axis(0)), ss_total)
            }
        })
        .collect::<Vec<_>>();
    Ok(Array1::from(r2))
}
