use mofa::enrichment::EnrichmentError;
use mofa::model::ModelError;
use mofa::preprocess::CovariateError;
use ndarray::{Array2, ArrayView2};
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("Could not access '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Malformed TSV '{path}': {source}")]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("Could not parse configuration '{path}': {source}")]
    Config {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("'{path}', row '{row}', column '{column}': '{value}' is not a number.")]
    Parse {
        path: PathBuf,
        row: String,
        column: String,
        value: String,
    },
    #[error("'{path}' has no data rows.")]
    Empty { path: PathBuf },
    #[error("{0}")]
    Inconsistent(String),
    #[error("Factor indices are 1-based, but 0 was given.")]
    ZeroFactorIndex,
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Covariate(#[from] CovariateError),
    #[error(transparent)]
    Enrichment(#[from] EnrichmentError),
}

/// A TSV table with row labels in its first column and column labels in its header.
#[derive(Debug, Clone)]
pub struct LabeledMatrix {
    pub row_names: Vec<String>,
    pub column_names: Vec<String>,
    pub values: Array2<Option<f64>>,
}

impl LabeledMatrix {
    /// Dense values; any missing entry is an error naming its position.
    pub fn into_dense(self, path: &Path) -> Result<Array2<f64>, CliError> {
        if let Some(((r, c), _)) = self.values.indexed_iter().find(|(_, v)| v.is_none()) {
            return Err(CliError::Parse {
                path: path.to_path_buf(),
                row: self.row_names[r].clone(),
                column: self.column_names[c].clone(),
                value: "NA".to_string(),
            });
        }
        Ok(self.values.mapv(|v| v.unwrap_or(f64::NAN)))
    }
}

fn tsv_reader(path: &Path) -> Result<csv::Reader<File>, CliError> {
    csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(true)
        .from_path(path)
        .map_err(|source| CliError::Csv {
            path: path.to_path_buf(),
            source,
        })
}

/// Parses one cell; `NA`, `NaN` and empty cells are missing.
fn parse_cell(cell: &str) -> Result<Option<f64>, String> {
    let trimmed = cell.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("na") || trimmed.eq_ignore_ascii_case("nan")
    {
        return Ok(None);
    }
    trimmed
        .parse::<f64>()
        .map(|v| if v.is_nan() { None } else { Some(v) })
        .map_err(|_| trimmed.to_string())
}

pub fn read_labeled_matrix(path: &Path) -> Result<LabeledMatrix, CliError> {
    let mut reader = tsv_reader(path)?;
    let csv_error = |source| CliError::Csv {
        path: path.to_path_buf(),
        source,
    };
    let header = reader.headers().map_err(csv_error)?.clone();
    let column_names: Vec<String> = header.iter().skip(1).map(str::to_string).collect();

    let mut row_names = Vec::new();
    let mut flat = Vec::new();
    for record in reader.records() {
        let record = record.map_err(csv_error)?;
        let row = record.get(0).unwrap_or_default().to_string();
        for (column, cell) in column_names.iter().zip(record.iter().skip(1)) {
            let value = parse_cell(cell).map_err(|value| CliError::Parse {
                path: path.to_path_buf(),
                row: row.clone(),
                column: column.clone(),
                value,
            })?;
            flat.push(value);
        }
        row_names.push(row);
    }
    if row_names.is_empty() {
        return Err(CliError::Empty {
            path: path.to_path_buf(),
        });
    }
    let values = Array2::from_shape_vec((row_names.len(), column_names.len()), flat).map_err(
        |e| CliError::Inconsistent(format!("'{}' is not rectangular: {e}", path.display())),
    )?;
    log::debug!(
        "Read {} x {} table from '{}'",
        row_names.len(),
        column_names.len(),
        path.display()
    );
    Ok(LabeledMatrix {
        row_names,
        column_names,
        values,
    })
}

/// Reads feature sets in long format: one `set<TAB>feature` pair per line after a header.
pub fn read_member_lists(path: &Path) -> Result<Vec<(String, Vec<String>)>, CliError> {
    let mut reader = tsv_reader(path)?;
    let mut sets: Vec<(String, Vec<String>)> = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|source| CliError::Csv {
            path: path.to_path_buf(),
            source,
        })?;
        let (Some(set), Some(feature)) = (record.get(0), record.get(1)) else {
            return Err(CliError::Inconsistent(format!(
                "'{}' needs a set and a feature column",
                path.display()
            )));
        };
        match sets.iter_mut().find(|(name, _)| name == set) {
            Some((_, members)) => members.push(feature.to_string()),
            None => sets.push((set.to_string(), vec![feature.to_string()])),
        }
    }
    if sets.is_empty() {
        return Err(CliError::Empty {
            path: path.to_path_buf(),
        });
    }
    Ok(sets)
}

/// Writes a labeled table to `output`, or to stdout when no path is given.
pub fn write_table(
    output: Option<&Path>,
    corner: &str,
    row_names: &[String],
    column_names: &[String],
    values: ArrayView2<f64>,
) -> Result<(), CliError> {
    let target = output.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("-"));
    let io_error = |source| CliError::Io {
        path: target.clone(),
        source,
    };
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path).map_err(io_error)?),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(sink);
    let csv_error = |source| CliError::Csv {
        path: target.clone(),
        source,
    };

    let mut header = Vec::with_capacity(column_names.len() + 1);
    header.push(corner.to_string());
    header.extend(column_names.iter().cloned());
    writer.write_record(&header).map_err(csv_error)?;
    for (name, row) in row_names.iter().zip(values.rows()) {
        let mut record = Vec::with_capacity(row.len() + 1);
        record.push(name.clone());
        record.extend(row.iter().map(f64::to_string));
        writer.write_record(&record).map_err(csv_error)?;
    }
    writer.flush().map_err(io_error)?;
    Ok(())
}

/// Writes pre-formatted records under a header.
pub fn write_records(
    output: Option<&Path>,
    header: &[&str],
    records: impl IntoIterator<Item = Vec<String>>,
) -> Result<(), CliError> {
    let target = output.map(Path::to_path_buf).unwrap_or_else(|| PathBuf::from("-"));
    let sink: Box<dyn Write> = match output {
        Some(path) => Box::new(File::create(path).map_err(|source| CliError::Io {
            path: target.clone(),
            source,
        })?),
        None => Box::new(io::stdout().lock()),
    };
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_writer(sink);
    let csv_error = |source| CliError::Csv {
        path: target.clone(),
        source,
    };
    writer.write_record(header).map_err(csv_error)?;
    for record in records {
        writer.write_record(&record).map_err(csv_error)?;
    }
    writer.flush().map_err(|source| CliError::Io {
        path: target.clone(),
        source,
    })?;
    Ok(())
}
