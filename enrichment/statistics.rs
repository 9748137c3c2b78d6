//! Feature-level and set-level statistics for enrichment testing.

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use statrs::function::erf::erfc;
use std::f64::consts::SQRT_2;

/// Denominators below this are treated as zero variance.
const VARIANCE_FLOOR: f64 = 1.0e-12;

/// Transformation of a feature's loading into its local statistic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LocalStatistic {
    /// The signed loading itself.
    #[default]
    Loading,
    Abs,
    Squared,
}

impl LocalStatistic {
    pub fn apply(self, loading: f64) -> f64 {
        match self {
            Self::Loading => loading,
            Self::Abs => loading.abs(),
            Self::Squared => loading * loading,
        }
    }
}

/// Comparison of in-set against out-of-set local statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GlobalStatistic {
    /// Standardized difference of means.
    #[default]
    #[serde(rename = "mean.diff", alias = "mean_diff")]
    MeanDiff,
    /// Wilcoxon rank-sum.
    #[serde(rename = "rank.sum", alias = "rank_sum")]
    RankSum,
}

/// Location and spread of one factor's scores across all tested features.
///
/// Both are invariant under permutation of the scores, so one summary serves
/// the observed statistic and every null draw.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScoreSummary {
    n: usize,
    mean: f64,
    /// Population variance, `sum((s - mean)^2) / n`.
    variance: f64,
}

impl ScoreSummary {
    pub(crate) fn of(scores: &[f64]) -> Self {
        let n = scores.len();
        let mean = scores.iter().sum::<f64>() / n as f64;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n as f64;
        Self { n, mean, variance }
    }

    /// Standardized in-set score sum under sampling `members.len()` features without replacement.
    pub(crate) fn set_statistic(&self, scores: &[f64], members: &[usize]) -> f64 {
        let m = members.len();
        if m == 0 || m >= self.n {
            return 0.0;
        }
        let (n, m) = (self.n as f64, m as f64);
        let spread = m * self.variance * (n - m) / (n - 1.0);
        if spread < VARIANCE_FLOOR {
            return 0.0;
        }
        let sum: f64 = members.iter().map(|&i| scores[i]).sum();
        (sum - m * self.mean) / spread.sqrt()
    }
}

/// Scores the global statistic is computed on.
pub(crate) fn scores(local: &[f64], global: GlobalStatistic) -> Vec<f64> {
    match global {
        GlobalStatistic::MeanDiff => local.to_vec(),
        GlobalStatistic::RankSum => average_ranks(local),
    }
}

/// 1-based ranks with ties sharing the average of their positions.
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        // positions start+1 ..= end share their mean
        let shared = (start + 1 + end) as f64 / 2.0;
        for &index in &order[start..end] {
            ranks[index] = shared;
        }
        start = end;
    }
    ranks
}

/// Two-sided normal tail probability of a z statistic.
pub fn two_sided_p_value(z: f64) -> f64 {
    erfc(z.abs() / SQRT_2).clamp(0.0, 1.0)
}

/// Variance inflation of a set sum caused by inter-feature correlation.
///
/// Correlations are pairwise complete: each pair of member rows is centred and
/// scaled over the samples both observe. Pairs with fewer than two shared
/// samples or no variance are left out of the mean.
/// `VIF = 1 + (m - 1) * mean pairwise correlation`, floored just above zero so
/// strongly anti-correlated sets stay finite.
pub(crate) fn variance_inflation(data: ArrayView2<Option<f64>>, rows: &[usize]) -> f64 {
    let m = rows.len();
    if m < 2 {
        return 1.0;
    }
    let (sum, pairs) = rows
        .iter()
        .enumerate()
        .flat_map(|(a, &first)| rows[a + 1..].iter().map(move |&second| (first, second)))
        .filter_map(|(first, second)| pairwise_correlation(data.row(first), data.row(second)))
        .fold((0.0, 0usize), |(sum, pairs), r| (sum + r, pairs + 1));
    if pairs == 0 {
        return 1.0;
    }
    let mean_correlation = sum / pairs as f64;
    (1.0 + (m - 1) as f64 * mean_correlation).max(f64::EPSILON)
}

/// Pearson correlation over the samples both rows observe.
fn pairwise_correlation(a: ArrayView1<Option<f64>>, b: ArrayView1<Option<f64>>) -> Option<f64> {
    let joint: Vec<(f64, f64)> = a
        .iter()
        .zip(b.iter())
        .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
        .collect();
    if joint.len() < 2 {
        return None;
    }
    let n = joint.len() as f64;
    let mean_a = joint.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_b = joint.iter().map(|p| p.1).sum::<f64>() / n;
    let (cross, squares_a, squares_b) =
        joint
            .iter()
            .fold((0.0, 0.0, 0.0), |(cross, sa, sb), &(x, y)| {
                let (dx, dy) = (x - mean_a, y - mean_b);
                (cross + dx * dy, sa + dx * dx, sb + dy * dy)
            });
    let scale = (squares_a * squares_b).sqrt();
    (scale >= VARIANCE_FLOOR).then(|| (cross / scale).clamp(-1.0, 1.0))
}
