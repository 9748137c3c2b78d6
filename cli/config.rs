use crate::io::{CliError, LabeledMatrix, read_labeled_matrix};
use itertools::Itertools;
use mofa::enrichment::EnrichmentOptions;
use mofa::model::{
    FactorMatrix, ModelStore, NoiseFamily, ObservedMatrix, TrainingOutput, TrainingStats, View,
    WeightMatrix,
};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Locations of a trained model's artifacts and data.
///
/// Relative paths are resolved against the directory holding the configuration file.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AnalysisConfig {
    /// Factor matrix TSV, samples by factors.
    #[serde(default)]
    pub factors: Option<PathBuf>,
    /// 1-based index of a constant factor carrying feature means.
    #[serde(default)]
    pub intercept_factor: Option<usize>,
    pub views: Vec<ViewConfig>,
    #[serde(default)]
    pub enrichment: Option<EnrichmentOptions>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ViewConfig {
    pub name: String,
    #[serde(default = "default_likelihood")]
    pub likelihood: NoiseFamily,
    /// Data TSV, features by samples.
    pub data: PathBuf,
    /// Weight TSV, features by factors.
    #[serde(default)]
    pub weights: Option<PathBuf>,
}

fn default_likelihood() -> NoiseFamily {
    NoiseFamily::Continuous
}

impl AnalysisConfig {
    pub fn from_path(path: &Path) -> Result<Self, CliError> {
        let text = fs::read_to_string(path).map_err(|source| CliError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config: AnalysisConfig = toml::from_str(&text).map_err(|source| CliError::Config {
            path: path.to_path_buf(),
            source,
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        if let Some(factors) = config.factors.as_mut() {
            *factors = base.join(&*factors);
        }
        for view in &mut config.views {
            view.data = base.join(&view.data);
            if let Some(weights) = view.weights.as_mut() {
                *weights = base.join(&*weights);
            }
        }
        if config.views.is_empty() {
            return Err(CliError::Inconsistent(format!(
                "'{}' lists no views",
                path.display()
            )));
        }
        Ok(config)
    }

    /// Reads every view's data into an untrained store.
    pub fn load_untrained(&self) -> Result<ModelStore, CliError> {
        let mut samples: Option<Vec<String>> = None;
        let mut views = Vec::with_capacity(self.views.len());
        for entry in &self.views {
            let LabeledMatrix {
                row_names,
                column_names,
                values,
            } = read_labeled_matrix(&entry.data)?;
            if let Some(expected) = &samples {
                if *expected != column_names {
                    return Err(CliError::Inconsistent(format!(
                        "view '{}' has samples [{}], but earlier views have [{}]",
                        entry.name,
                        column_names.iter().join(", "),
                        expected.iter().join(", ")
                    )));
                }
            } else {
                samples = Some(column_names);
            }
            views.push(View::new(
                entry.name.clone(),
                entry.likelihood,
                row_names,
                ObservedMatrix::new(values),
            )?);
        }
        let samples = samples.unwrap_or_default();
        let store = ModelStore::new(samples, views)?;
        log::info!(
            "Loaded views {} over {} samples",
            store.view_names().iter().join(", "),
            store.n_samples()
        );
        Ok(store)
    }

    /// Reads data, factors and weights into a trained store.
    pub fn load_trained(&self) -> Result<ModelStore, CliError> {
        let mut store = self.load_untrained()?;
        let factors_path = self.factors.as_ref().ok_or_else(|| {
            CliError::Inconsistent("the configuration has no 'factors' entry".to_string())
        })?;
        let factor_table = read_labeled_matrix(factors_path)?;
        if factor_table.row_names != store.sample_names() {
            return Err(CliError::Inconsistent(format!(
                "samples of '{}' do not match the data files",
                factors_path.display()
            )));
        }
        let n_factors = factor_table.column_names.len();
        let factors = FactorMatrix::new(factor_table.into_dense(factors_path)?)?;

        let mut weights = Vec::with_capacity(self.views.len());
        for entry in &self.views {
            let path = entry.weights.as_ref().ok_or_else(|| {
                CliError::Inconsistent(format!("view '{}' has no 'weights' entry", entry.name))
            })?;
            let table = read_labeled_matrix(path)?;
            let view = store.view(&entry.name)?;
            if table.row_names != view.feature_names() {
                return Err(CliError::Inconsistent(format!(
                    "features of '{}' do not match view '{}'",
                    path.display(),
                    entry.name
                )));
            }
            if table.column_names.len() != n_factors {
                return Err(CliError::Inconsistent(format!(
                    "'{}' has {} factors, but the factor matrix has {}",
                    path.display(),
                    table.column_names.len(),
                    n_factors
                )));
            }
            weights.push(WeightMatrix::new(table.into_dense(path)?)?);
        }

        let intercept_factor = match self.intercept_factor {
            Some(0) => return Err(CliError::ZeroFactorIndex),
            Some(index) => Some(index - 1),
            None => None,
        };
        store.attach_training(TrainingOutput {
            factors,
            weights,
            stats: TrainingStats {
                iterations: 0,
                elbo: 0.0,
            },
            intercept_factor,
        })?;
        Ok(store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mofa::model::TrainingStatus;

    fn write(dir: &Path, name: &str, content: &str) {
        fs::write(dir.join(name), content).unwrap();
    }

    #[test]
    fn a_trained_store_is_assembled_from_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "config.toml",
            "factors = \"z.tsv\"\n\n[[views]]\nname = \"rna\"\nlikelihood = \"gaussian\"\ndata = \"rna.tsv\"\nweights = \"w.tsv\"\n\n[enrichment]\nmethod = \"permutation\"\n",
        );
        write(dir.path(), "rna.tsv", "feature\ts1\ts2\ng1\t1\tNA\ng2\t0.5\t2\n");
        write(dir.path(), "z.tsv", "sample\tFactor1\ns1\t1\ns2\t-1\n");
        write(dir.path(), "w.tsv", "feature\tFactor1\ng1\t0.5\ng2\t2\n");

        let config = AnalysisConfig::from_path(&dir.path().join("config.toml")).unwrap();
        assert_eq!(config.views[0].likelihood, NoiseFamily::Continuous);
        assert!(config.enrichment.is_some());
        let store = config.load_trained().unwrap();
        assert_eq!(store.status(), TrainingStatus::Trained);
        assert_eq!(store.sample_names(), ["s1".to_string(), "s2".to_string()]);
        assert_eq!(store.view("rna").unwrap().data().n_missing(), 1);
    }

    #[test]
    fn mismatched_features_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        write(
            dir.path(),
            "config.toml",
            "factors = \"z.tsv\"\n[[views]]\nname = \"rna\"\ndata = \"rna.tsv\"\nweights = \"w.tsv\"\n",
        );
        write(dir.path(), "rna.tsv", "feature\ts1\ts2\ng1\t1\t2\n");
        write(dir.path(), "z.tsv", "sample\tFactor1\ns1\t1\ns2\t-1\n");
        write(dir.path(), "w.tsv", "feature\tFactor1\nother\t0.5\n");
        let config = AnalysisConfig::from_path(&dir.path().join("config.toml")).unwrap();
        assert!(matches!(config.load_trained(), Err(CliError::Inconsistent(_))));
    }
}
