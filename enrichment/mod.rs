//! # Feature-set enrichment of factor loadings
//!
//! Tests, per factor, whether the features of a predefined set carry more
//! extreme loadings than the remaining features of the view. Sets are aligned
//! to the view by feature name; features without annotation are not tested.

pub mod fdr;
pub mod feature_sets;
pub mod permutation;
pub mod progress;
pub mod statistics;

pub use fdr::PValueAdjustment;
pub use feature_sets::FeatureSetMatrix;
pub use progress::{NoopPermutationProgress, PermutationProgressObserver};
pub use statistics::{GlobalStatistic, LocalStatistic};

use crate::model::{ModelError, ModelStore, ObservedMatrix, validate_factor_subset};
use ndarray::{Array2, ArrayView2};
use permutation::PermutationTest;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statistics::ScoreSummary;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("No feature of the view appears in the feature-set matrix.")]
    EmptyOverlap,
    #[error(
        "Unknown enrichment method '{0}'. Expected 'parametric', 'cor.adj.parametric' or 'permutation'."
    )]
    InvalidMethod(String),
    #[error("The permutation test needs at least one permutation, but {0} were requested.")]
    NonPositivePermutationCount(usize),
    #[error("Significance level must lie in (0, 1], but was {0}.")]
    InvalidAlpha(f64),
    #[error("Permutation batch size must be at least 1.")]
    InvalidBatchSize,
    #[error("Minimum set size must be at least 1.")]
    InvalidMinSetSize,
    #[error("The correlation-adjusted test needs the view's data, but none was supplied.")]
    MissingFeatureData,
    #[error("Feature-set matrix has shape {found:?}, but its names imply {expected:?}.")]
    FeatureSetShape {
        expected: (usize, usize),
        found: (usize, usize),
    },
    #[error("Feature-set membership must be 0 or 1, but entry ({set}, {feature}) is {value}.")]
    NonBinaryMembership {
        set: usize,
        feature: usize,
        value: f64,
    },
    #[error("Feature set '{0}' is defined twice.")]
    DuplicateSet(String),
    #[error("Feature '{0}' appears twice in the feature-set matrix.")]
    DuplicateSetFeature(String),
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// How set statistics are turned into p-values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum EnrichmentMethod {
    /// Normal approximation of the standardized set statistic.
    #[default]
    Parametric,
    /// Normal approximation after deflating the statistic by inter-feature correlation.
    CorrelationAdjusted,
    /// Empirical null from permuting scores across features.
    Permutation,
}

impl EnrichmentMethod {
    pub fn describe(self) -> &'static str {
        match self {
            Self::Parametric => "parametric",
            Self::CorrelationAdjusted => "cor.adj.parametric",
            Self::Permutation => "permutation",
        }
    }
}

impl fmt::Display for EnrichmentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

impl FromStr for EnrichmentMethod {
    type Err = EnrichmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "parametric" => Ok(Self::Parametric),
            "cor.adj.parametric" | "correlation-adjusted" => Ok(Self::CorrelationAdjusted),
            "permutation" => Ok(Self::Permutation),
            other => Err(EnrichmentError::InvalidMethod(other.to_string())),
        }
    }
}

impl TryFrom<String> for EnrichmentMethod {
    type Error = EnrichmentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EnrichmentMethod> for String {
    fn from(method: EnrichmentMethod) -> Self {
        method.describe().to_string()
    }
}

/// Options for [`run_enrichment_analysis`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EnrichmentOptions {
    /// Significance level applied to adjusted p-values.
    pub alpha: f64,
    pub method: EnrichmentMethod,
    pub n_permutations: usize,
    pub local_statistic: LocalStatistic,
    pub global_statistic: GlobalStatistic,
    pub adjustment: PValueAdjustment,
    /// Sets with fewer aligned members are not tested.
    pub min_set_size: usize,
    pub seed: u64,
    /// Permutations evaluated between two progress reports.
    pub batch_size: usize,
}

impl Default for EnrichmentOptions {
    fn default() -> Self {
        Self {
            alpha: 0.1,
            method: EnrichmentMethod::Parametric,
            n_permutations: 1000,
            local_statistic: LocalStatistic::Loading,
            global_statistic: GlobalStatistic::MeanDiff,
            adjustment: PValueAdjustment::BenjaminiHochberg,
            min_set_size: 10,
            seed: 42,
            batch_size: 100,
        }
    }
}

impl EnrichmentOptions {
    pub fn validate(&self) -> Result<(), EnrichmentError> {
        if !(self.alpha > 0.0 && self.alpha <= 1.0) {
            return Err(EnrichmentError::InvalidAlpha(self.alpha));
        }
        if self.method == EnrichmentMethod::Permutation {
            if self.n_permutations < 1 {
                return Err(EnrichmentError::NonPositivePermutationCount(
                    self.n_permutations,
                ));
            }
            if self.batch_size < 1 {
                return Err(EnrichmentError::InvalidBatchSize);
            }
        }
        if self.min_set_size < 1 {
            return Err(EnrichmentError::InvalidMinSetSize);
        }
        Ok(())
    }
}

/// One view's loadings, as consumed by the enrichment test.
#[derive(Debug, Clone, Copy)]
pub struct ViewLoadings<'a> {
    feature_names: &'a [String],
    /// Shape `[n_features, n_factors]`.
    weights: ArrayView2<'a, f64>,
    data: Option<&'a ObservedMatrix>,
}

impl<'a> ViewLoadings<'a> {
    pub fn new(
        feature_names: &'a [String],
        weights: ArrayView2<'a, f64>,
    ) -> Result<Self, EnrichmentError> {
        if weights.nrows() != feature_names.len() {
            return Err(ModelError::ShapeMismatch {
                what: "Loading matrix".to_string(),
                expected: (feature_names.len(), weights.ncols()),
                found: weights.dim(),
            }
            .into());
        }
        Ok(Self {
            feature_names,
            weights,
            data: None,
        })
    }

    /// Attaches the view's data, shape `[n_features, n_samples]`.
    pub fn with_data(mut self, data: &'a ObservedMatrix) -> Result<Self, EnrichmentError> {
        if data.nrows() != self.feature_names.len() {
            return Err(ModelError::ShapeMismatch {
                what: "Feature data".to_string(),
                expected: (self.feature_names.len(), data.ncols()),
                found: data.dim(),
            }
            .into());
        }
        self.data = Some(data);
        Ok(self)
    }

    /// Loadings and data of a view in a trained store.
    pub fn from_store(store: &'a ModelStore, view: &str) -> Result<Self, EnrichmentError> {
        let target = store.view(view)?;
        let weights = store.weights(view)?;
        Self::new(target.feature_names(), weights.values())?.with_data(target.data())
    }

    pub fn n_factors(&self) -> usize {
        self.weights.ncols()
    }
}

/// Outcome of one enrichment run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnrichmentResult {
    pub method: EnrichmentMethod,
    pub alpha: f64,
    /// Tested factor indices; one column per factor in every matrix below.
    pub factors: Vec<usize>,
    /// Aligned features, in view order.
    pub feature_names: Vec<String>,
    /// Local statistic of every aligned feature, shape `[n_features, n_factors]`.
    pub feature_statistics: Array2<f64>,
    /// Tested sets; one row per set in the matrices below.
    pub set_names: Vec<String>,
    /// Number of aligned members of each tested set.
    pub set_sizes: Vec<usize>,
    pub statistics: Array2<f64>,
    pub p_values: Array2<f64>,
    pub adjusted_p_values: Array2<f64>,
}

/// One (set, factor) row of an [`EnrichmentResult`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EnrichmentRecord<'a> {
    pub set: &'a str,
    pub factor: usize,
    pub size: usize,
    pub statistic: f64,
    pub p_value: f64,
    pub adjusted_p_value: f64,
    pub significant: bool,
}

impl EnrichmentResult {
    fn column(&self, factor: usize) -> Option<usize> {
        self.factors.iter().position(|&k| k == factor)
    }

    /// Sets whose adjusted p-value is at most `alpha` for a factor, most significant first.
    pub fn significant_sets(&self, factor: usize) -> Vec<&str> {
        let Some(column) = self.column(factor) else {
            return Vec::new();
        };
        let adjusted = self.adjusted_p_values.column(column);
        let mut hits: Vec<usize> = (0..self.set_names.len())
            .filter(|&s| adjusted[s] <= self.alpha)
            .collect();
        hits.sort_by(|&a, &b| adjusted[a].total_cmp(&adjusted[b]));
        hits.into_iter().map(|s| self.set_names[s].as_str()).collect()
    }

    /// Number of significant sets per tested factor.
    pub fn n_significant(&self) -> Vec<usize> {
        self.adjusted_p_values
            .columns()
            .into_iter()
            .map(|column| column.iter().filter(|&&p| p <= self.alpha).count())
            .collect()
    }

    /// All (set, factor) results in set-major order.
    pub fn records(&self) -> Vec<EnrichmentRecord<'_>> {
        let mut out = Vec::with_capacity(self.set_names.len() * self.factors.len());
        for (s, name) in self.set_names.iter().enumerate() {
            for (c, &factor) in self.factors.iter().enumerate() {
                let adjusted = self.adjusted_p_values[(s, c)];
                out.push(EnrichmentRecord {
                    set: name,
                    factor,
                    size: self.set_sizes[s],
                    statistic: self.statistics[(s, c)],
                    p_value: self.p_values[(s, c)],
                    adjusted_p_value: adjusted,
                    significant: adjusted <= self.alpha,
                });
            }
        }
        out
    }
}

/// Per-factor test output before assembly.
struct FactorOutcome {
    local: Vec<f64>,
    scores: Vec<f64>,
    statistics: Vec<f64>,
    p_values: Vec<f64>,
}

/// Runs the enrichment test without progress reporting.
pub fn run_enrichment_analysis(
    loadings: &ViewLoadings,
    feature_sets: &FeatureSetMatrix,
    factors: &[usize],
    options: &EnrichmentOptions,
) -> Result<EnrichmentResult, EnrichmentError> {
    run_enrichment_analysis_with_progress(
        loadings,
        feature_sets,
        factors,
        options,
        &mut NoopPermutationProgress,
    )
}

/// Runs the enrichment test, reporting permutation progress to `observer`.
pub fn run_enrichment_analysis_with_progress(
    loadings: &ViewLoadings,
    feature_sets: &FeatureSetMatrix,
    factors: &[usize],
    options: &EnrichmentOptions,
    observer: &mut dyn PermutationProgressObserver,
) -> Result<EnrichmentResult, EnrichmentError> {
    // --- 1. Validate Inputs ---
    options.validate()?;
    validate_factor_subset(factors, loadings.n_factors())?;
    let data = match (options.method, loadings.data) {
        (EnrichmentMethod::CorrelationAdjusted, None) => {
            return Err(EnrichmentError::MissingFeatureData);
        }
        (_, data) => data,
    };
    let alignment = feature_sets.align(loadings.feature_names)?;
    let n = alignment.view_rows.len();

    // --- 2. Select the testable sets ---
    let mut set_names = Vec::new();
    let mut members: Vec<Vec<usize>> = Vec::new();
    for (s, name) in feature_sets.set_names().iter().enumerate() {
        let aligned = feature_sets.aligned_members(s, &alignment);
        if aligned.len() < options.min_set_size || aligned.len() >= n {
            log::debug!(
                "Dropping feature set '{}': {} of {} aligned features are members",
                name,
                aligned.len(),
                n
            );
            continue;
        }
        set_names.push(name.clone());
        members.push(aligned);
    }
    if members.is_empty() {
        log::warn!(
            "No feature set has between {} and {} aligned members; nothing to test",
            options.min_set_size,
            n.saturating_sub(1)
        );
    }

    // Correlation deflation depends on the data only, not on the factor.
    let deflation: Vec<f64> = match (options.method, data) {
        (EnrichmentMethod::CorrelationAdjusted, Some(data)) => members
            .par_iter()
            .map(|set| {
                let rows: Vec<usize> = set.iter().map(|&i| alignment.view_rows[i]).collect();
                statistics::variance_inflation(data.values(), &rows).sqrt()
            })
            .collect(),
        _ => vec![1.0; members.len()],
    };

    // --- 3. Test every factor ---
    let test_factor = |factor: usize| -> FactorOutcome {
        let column = loadings.weights.column(factor);
        let local: Vec<f64> = alignment
            .view_rows
            .iter()
            .map(|&row| options.local_statistic.apply(column[row]))
            .collect();
        let scores = statistics::scores(&local, options.global_statistic);
        let summary = ScoreSummary::of(&scores);
        let statistics: Vec<f64> = members
            .iter()
            .zip(&deflation)
            .map(|(set, &scale)| summary.set_statistic(&scores, set) / scale)
            .collect();
        let p_values = statistics
            .iter()
            .map(|&z| statistics::two_sided_p_value(z))
            .collect();
        FactorOutcome {
            local,
            scores,
            statistics,
            p_values,
        }
    };

    let outcomes: Vec<FactorOutcome> = match options.method {
        EnrichmentMethod::Permutation => factors
            .iter()
            .map(|&factor| {
                let mut outcome = test_factor(factor);
                let test = PermutationTest {
                    scores: &outcome.scores,
                    summary: ScoreSummary::of(&outcome.scores),
                    sets: &members,
                    observed: &outcome.statistics,
                    factor,
                    seed: options.seed,
                };
                let p_values =
                    test.p_values(options.n_permutations, options.batch_size, &mut *observer);
                outcome.p_values = p_values;
                outcome
            })
            .collect(),
        EnrichmentMethod::Parametric | EnrichmentMethod::CorrelationAdjusted => {
            factors.par_iter().map(|&factor| test_factor(factor)).collect()
        }
    };

    // --- 4. Assemble ---
    let n_sets = members.len();
    let mut feature_statistics = Array2::zeros((n, factors.len()));
    let mut statistics = Array2::zeros((n_sets, factors.len()));
    let mut p_values = Array2::zeros((n_sets, factors.len()));
    let mut adjusted_p_values = Array2::zeros((n_sets, factors.len()));
    for (c, outcome) in outcomes.into_iter().enumerate() {
        let adjusted = options.adjustment.adjust(&outcome.p_values);
        for (i, v) in outcome.local.into_iter().enumerate() {
            feature_statistics[(i, c)] = v;
        }
        for s in 0..n_sets {
            statistics[(s, c)] = outcome.statistics[s];
            p_values[(s, c)] = outcome.p_values[s];
            adjusted_p_values[(s, c)] = adjusted[s];
        }
    }

    let result = EnrichmentResult {
        method: options.method,
        alpha: options.alpha,
        factors: factors.to_vec(),
        feature_names: alignment
            .view_rows
            .iter()
            .map(|&row| loadings.feature_names[row].clone())
            .collect(),
        feature_statistics,
        set_sizes: members.iter().map(Vec::len).collect(),
        set_names,
        statistics,
        p_values,
        adjusted_p_values,
    };
    log::info!(
        "Tested {} feature sets over {} aligned features for {} factor(s) ({}, {} adjustment): {} significant at alpha = {}",
        n_sets,
        n,
        factors.len(),
        options.method,
        options.adjustment,
        result.n_significant().iter().sum::<usize>(),
        options.alpha
    );
    Ok(result)
}
