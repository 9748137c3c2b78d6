use ndarray::{Array1, Array2, ArrayView1, ArrayView2, ArrayViewMut2, Axis, Zip};
use serde::{Deserialize, Serialize};

/// A dense matrix in which any entry may be unobserved.
///
/// Missingness is carried by `Option<f64>`: there is no sentinel number that
/// stands in for "not measured", so a zero is always a real zero. Every
/// reduction on this type only visits observed entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedMatrix {
    values: Array2<Option<f64>>,
}

impl ObservedMatrix {
    pub fn new(values: Array2<Option<f64>>) -> Self {
        Self { values }
    }

    /// Wraps a fully observed dense matrix.
    pub fn from_dense(values: ArrayView2<f64>) -> Self {
        Self {
            values: values.mapv(Some),
        }
    }

    /// Builds a matrix from a dense array, treating every `NaN` as missing.
    ///
    /// This is a convenience for callers whose upstream format uses `NaN`;
    /// once converted, `NaN` never appears inside the matrix.
    pub fn from_nan_encoded(values: ArrayView2<f64>) -> Self {
        Self {
            values: values.mapv(|v| if v.is_nan() { None } else { Some(v) }),
        }
    }

    pub fn nrows(&self) -> usize {
        self.values.nrows()
    }

    pub fn ncols(&self) -> usize {
        self.values.ncols()
    }

    pub fn dim(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn get(&self, row: usize, col: usize) -> Option<f64> {
        self.values[(row, col)]
    }

    pub fn set(&mut self, row: usize, col: usize, value: Option<f64>) {
        self.values[(row, col)] = value;
    }

    pub fn values(&self) -> ArrayView2<'_, Option<f64>> {
        self.values.view()
    }

    pub(crate) fn values_mut(&mut self) -> ArrayViewMut2<'_, Option<f64>> {
        self.values.view_mut()
    }

    pub fn row(&self, row: usize) -> ArrayView1<'_, Option<f64>> {
        self.values.row(row)
    }

    pub fn n_observed(&self) -> usize {
        self.values.iter().filter(|v| v.is_some()).count()
    }

    pub fn n_missing(&self) -> usize {
        self.values.len() - self.n_observed()
    }

    pub fn is_fully_observed(&self) -> bool {
        self.values.iter().all(Option::is_some)
    }

    /// Boolean mask, `true` where the entry was observed.
    pub fn observed_mask(&self) -> Array2<bool> {
        self.values.mapv(|v| v.is_some())
    }

    /// Sum over observed entries.
    pub fn observed_sum(&self) -> f64 {
        self.values.iter().flatten().sum()
    }

    /// Mean of each row over its observed entries; `None` for rows with no observations.
    pub fn row_means(&self) -> Array1<Option<f64>> {
        self.values
            .axis_iter(Axis(0))
            .map(observed_mean)
            .collect::<Vec<_>>()
            .into()
    }

    /// Applies `f` to every observed entry, keeping missing entries missing.
    pub fn map_observed<F>(&self, f: F) -> Self
    where
        F: Fn(f64) -> f64,
    {
        Self {
            values: self.values.mapv(|v| v.map(&f)),
        }
    }

    /// Like [`map_observed`](Self::map_observed) but also receives the entry's position.
    pub fn map_observed_indexed<F>(&self, f: F) -> Self
    where
        F: Fn((usize, usize), f64) -> f64,
    {
        let mut values = self.values.clone();
        for ((row, col), entry) in values.indexed_iter_mut() {
            if let Some(v) = entry {
                *v = f((row, col), *v);
            }
        }
        Self { values }
    }

    /// Sum of squared deviations of every observed entry from its row's observed mean.
    pub fn centered_sum_of_squares(&self) -> f64 {
        self.values
            .axis_iter(Axis(0))
            .map(|row| match observed_mean(row) {
                Some(mean) => row.iter().flatten().map(|&v| (v - mean).powi(2)).sum(),
                None => 0.0,
            })
            .sum()
    }

    /// Sum of squared differences between observed entries and a dense reference
    /// of the same shape. Entries that are missing here never contribute.
    pub fn residual_sum_of_squares(&self, reference: ArrayView2<f64>) -> f64 {
        assert_eq!(
            self.values.dim(),
            reference.dim(),
            "ObservedMatrix::residual_sum_of_squares: shape mismatch"
        );
        Zip::from(&self.values)
            .and(reference)
            .fold(0.0, |acc, observed, &predicted| match observed {
                Some(v) => acc + (v - predicted).powi(2),
                None => acc,
            })
    }

    /// Dense copy where observed entries are kept and missing ones come from `fill`.
    pub fn fill_missing(&self, fill: ArrayView2<f64>) -> Array2<f64> {
        assert_eq!(
            self.values.dim(),
            fill.dim(),
            "ObservedMatrix::fill_missing: shape mismatch"
        );
        let mut out = fill.to_owned();
        Zip::from(&mut out)
            .and(&self.values)
            .for_each(|slot, observed| {
                if let Some(v) = observed {
                    *slot = *v;
                }
            });
        out
    }
}

/// Mean of the observed entries of a vector.
pub fn observed_mean(values: ArrayView1<Option<f64>>) -> Option<f64> {
    let (sum, count) = values
        .iter()
        .flatten()
        .fold((0.0, 0usize), |(sum, count), &v| (sum + v, count + 1));
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}
