use super::EnrichmentError;
use ahash::{AHashMap, AHashSet};
use ndarray::{Array2, ArrayView2};

/// Binary membership of features in named sets, shape `[n_sets, n_features]`.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSetMatrix {
    set_names: Vec<String>,
    feature_names: Vec<String>,
    membership: Array2<bool>,
}

/// Features shared by a view and a set matrix, in the view's order.
#[derive(Debug, Clone)]
pub(crate) struct Alignment {
    /// Row of each shared feature in the view.
    pub(crate) view_rows: Vec<usize>,
    /// Column of each shared feature in the set matrix.
    pub(crate) set_columns: Vec<usize>,
}

impl FeatureSetMatrix {
    pub fn new(
        set_names: Vec<String>,
        feature_names: Vec<String>,
        membership: Array2<bool>,
    ) -> Result<Self, EnrichmentError> {
        let expected = (set_names.len(), feature_names.len());
        if membership.dim() != expected {
            return Err(EnrichmentError::FeatureSetShape {
                expected,
                found: membership.dim(),
            });
        }
        let mut seen = AHashSet::with_capacity(set_names.len());
        for name in &set_names {
            if !seen.insert(name.as_str()) {
                return Err(EnrichmentError::DuplicateSet(name.clone()));
            }
        }
        let mut seen = AHashSet::with_capacity(feature_names.len());
        for name in &feature_names {
            if !seen.insert(name.as_str()) {
                return Err(EnrichmentError::DuplicateSetFeature(name.clone()));
            }
        }
        Ok(Self {
            set_names,
            feature_names,
            membership,
        })
    }

    /// Builds the matrix from a numeric indicator whose entries must be exactly 0 or 1.
    pub fn from_indicator(
        set_names: Vec<String>,
        feature_names: Vec<String>,
        indicator: ArrayView2<f64>,
    ) -> Result<Self, EnrichmentError> {
        if let Some(((set, feature), &value)) = indicator
            .indexed_iter()
            .find(|(_, v)| **v != 0.0 && **v != 1.0)
        {
            return Err(EnrichmentError::NonBinaryMembership {
                set,
                feature,
                value,
            });
        }
        Self::new(set_names, feature_names, indicator.mapv(|v| v == 1.0))
    }

    /// Builds the matrix from member lists; the feature universe is the union of all members.
    pub fn from_member_lists<I, S>(sets: I) -> Result<Self, EnrichmentError>
    where
        I: IntoIterator<Item = (String, Vec<S>)>,
        S: Into<String>,
    {
        let mut set_names = Vec::new();
        let mut members: Vec<Vec<usize>> = Vec::new();
        let mut feature_names: Vec<String> = Vec::new();
        let mut index: AHashMap<String, usize> = AHashMap::new();
        for (name, features) in sets {
            let mut columns = Vec::with_capacity(features.len());
            for feature in features {
                let feature = feature.into();
                let next = feature_names.len();
                let column = *index.entry(feature.clone()).or_insert(next);
                if column == next {
                    feature_names.push(feature);
                }
                columns.push(column);
            }
            set_names.push(name);
            members.push(columns);
        }
        let mut membership = Array2::from_elem((set_names.len(), feature_names.len()), false);
        for (row, columns) in members.iter().enumerate() {
            for &column in columns {
                membership[(row, column)] = true;
            }
        }
        Self::new(set_names, feature_names, membership)
    }

    pub fn set_names(&self) -> &[String] {
        &self.set_names
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn membership(&self) -> ArrayView2<'_, bool> {
        self.membership.view()
    }

    pub fn n_sets(&self) -> usize {
        self.set_names.len()
    }

    pub fn set_size(&self, set: usize) -> usize {
        self.membership.row(set).iter().filter(|&&m| m).count()
    }

    /// Intersects the set features with a view's features, keeping the view's order.
    pub(crate) fn align(&self, view_features: &[String]) -> Result<Alignment, EnrichmentError> {
        let columns: AHashMap<&str, usize> = self
            .feature_names
            .iter()
            .enumerate()
            .map(|(column, name)| (name.as_str(), column))
            .collect();
        let (view_rows, set_columns): (Vec<usize>, Vec<usize>) = view_features
            .iter()
            .enumerate()
            .filter_map(|(row, name)| columns.get(name.as_str()).map(|&column| (row, column)))
            .unzip();
        if view_rows.is_empty() {
            return Err(EnrichmentError::EmptyOverlap);
        }
        log::debug!(
            "{} of {} view features are annotated in the feature sets",
            view_rows.len(),
            view_features.len()
        );
        Ok(Alignment {
            view_rows,
            set_columns,
        })
    }

    /// Positions within `alignment` of the members of one set.
    pub(crate) fn aligned_members(&self, set: usize, alignment: &Alignment) -> Vec<usize> {
        let row = self.membership.row(set);
        alignment
            .set_columns
            .iter()
            .enumerate()
            .filter(|&(_, &column)| row[column])
            .map(|(position, _)| position)
            .collect()
    }
}
