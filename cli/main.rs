#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

mod config;
mod io;

use ahash::AHashMap;
use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use itertools::Itertools;
use mofa::enrichment::{
    EnrichmentMethod, EnrichmentOptions, FeatureSetMatrix, PermutationProgressObserver,
    ViewLoadings, run_enrichment_analysis_with_progress,
};
use mofa::model::ModelStore;
use mofa::predict::{ImputeOptions, PredictionScale, impute_with, predict};
use mofa::preprocess::{Covariates, DEFAULT_MIN_OBSERVATIONS, regress_covariates};
use mofa::variance::{calculate_variance_explained, variance_explained_per_feature};
use ndarray::Array2;
use std::fs;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::process;

use crate::config::AnalysisConfig;
use crate::io::{CliError, read_labeled_matrix, read_member_lists, write_records, write_table};

#[derive(Parser)]
#[command(
    name = "mofa",
    about = "Post-hoc analysis of trained multi-view factor models",
    long_about = "Variance decomposition, prediction, imputation, covariate regression and \
                 feature-set enrichment for factor models whose factors and weights were \
                 estimated elsewhere."
)]
struct Cli {
    /// Default log filter when RUST_LOG is unset (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Decompose the variance of every view by factor
    #[command(about = "Per-factor and total R² of every view (outputs: TSV)")]
    Variance(VarianceArgs),

    /// Reconstruct one view from a subset of factors
    #[command(about = "Predict a view from the factor model (outputs: TSV)")]
    Predict(PredictArgs),

    /// Fill missing entries with model predictions
    #[command(about = "Impute missing data (outputs: <view>_imputed.tsv)")]
    Impute(ImputeArgs),

    /// Test feature sets for enrichment among a view's loadings
    #[command(about = "Feature-set enrichment of factor loadings (outputs: TSV)")]
    Enrich(EnrichArgs),

    /// Regress sample covariates out of raw view data
    #[command(about = "Regress covariates out of views (outputs: <view>_regressed.tsv)")]
    Regress(RegressArgs),
}

#[derive(Clone, Copy, ValueEnum)]
enum ScaleCli {
    Link,
    Response,
    InRange,
}

impl From<ScaleCli> for PredictionScale {
    fn from(scale: ScaleCli) -> Self {
        match scale {
            ScaleCli::Link => PredictionScale::Link,
            ScaleCli::Response => PredictionScale::Response,
            ScaleCli::InRange => PredictionScale::InRange,
        }
    }
}

#[derive(Args)]
struct VarianceArgs {
    /// Analysis configuration TOML
    config: PathBuf,

    /// 1-based factor indices, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    factors: Vec<usize>,

    /// Output TSV (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,

    /// Also write per-feature R² tables (<view>_per_feature.tsv) into this directory
    #[arg(long, value_name = "DIR")]
    per_feature: Option<PathBuf>,
}

#[derive(Args)]
struct PredictArgs {
    /// Analysis configuration TOML
    config: PathBuf,

    /// View to predict
    #[arg(long)]
    view: String,

    /// 1-based factor indices, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    factors: Vec<usize>,

    #[arg(long, value_enum, default_value_t = ScaleCli::Response)]
    scale: ScaleCli,

    /// Output TSV (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct ImputeArgs {
    /// Analysis configuration TOML
    config: PathBuf,

    /// Views to impute, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    views: Vec<String>,

    /// 1-based factor indices, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    factors: Vec<usize>,

    #[arg(long, value_enum, default_value_t = ScaleCli::Response)]
    scale: ScaleCli,

    /// Directory for the imputed tables
    #[arg(long)]
    output_dir: PathBuf,
}

#[derive(Args)]
struct EnrichArgs {
    /// Analysis configuration TOML
    config: PathBuf,

    /// View whose loadings are tested
    #[arg(long)]
    view: String,

    /// Feature sets in long format: a header, then one `set<TAB>feature` per line
    #[arg(long)]
    feature_sets: PathBuf,

    /// 1-based factor indices, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    factors: Vec<usize>,

    /// parametric, cor.adj.parametric or permutation (overrides the configuration)
    #[arg(long)]
    method: Option<String>,

    /// Number of permutations (overrides the configuration)
    #[arg(long)]
    n_permutations: Option<usize>,

    /// Significance level for adjusted p-values (overrides the configuration)
    #[arg(long)]
    alpha: Option<f64>,

    /// Output TSV (default: stdout)
    #[arg(long)]
    output: Option<PathBuf>,
}

#[derive(Args)]
struct RegressArgs {
    /// Analysis configuration TOML
    config: PathBuf,

    /// Covariate TSV: a header, then one sample per row with one column per covariate
    #[arg(long)]
    covariates: PathBuf,

    /// Views to regress, comma separated (default: all)
    #[arg(long, value_delimiter = ',')]
    views: Vec<String>,

    /// Features with fewer usable samples are left untouched
    #[arg(long, default_value_t = DEFAULT_MIN_OBSERVATIONS)]
    min_observations: usize,

    /// Directory for the regressed tables
    #[arg(long)]
    output_dir: PathBuf,
}

fn main() {
    let cli = Cli::parse();
    let Cli { log_level, command } = cli;

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level))
        .format_timestamp_micros()
        .init();

    let result = match command {
        Some(Commands::Variance(args)) => run_variance(args),
        Some(Commands::Predict(args)) => run_predict(args),
        Some(Commands::Impute(args)) => run_impute(args),
        Some(Commands::Enrich(args)) => run_enrich(args),
        Some(Commands::Regress(args)) => run_regress(args),
        None => Cli::command().print_help().map_err(|source| CliError::Io {
            path: PathBuf::from("-"),
            source,
        }),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

/// Converts 1-based factor arguments to indices; an empty list means all factors.
fn factor_indices(store: &ModelStore, factors: &[usize]) -> Result<Vec<usize>, CliError> {
    if factors.is_empty() {
        return Ok(store.all_factors()?);
    }
    factors
        .iter()
        .map(|&k| k.checked_sub(1).ok_or(CliError::ZeroFactorIndex))
        .collect()
}

fn format_cell(value: Option<f64>) -> String {
    value.map_or_else(|| "NA".to_string(), |v| v.to_string())
}

fn run_variance(args: VarianceArgs) -> Result<(), CliError> {
    let store = AnalysisConfig::from_path(&args.config)?.load_trained()?;
    let factors = factor_indices(&store, &args.factors)?;
    let result = calculate_variance_explained(&store, &factors)?;

    let names = store.factor_names();
    let mut row_names: Vec<String> = factors.iter().map(|&k| names[k].clone()).collect();
    row_names.push("total".to_string());
    let mut table = Array2::zeros((factors.len() + 1, result.view_names.len()));
    table
        .slice_mut(ndarray::s![..factors.len(), ..])
        .assign(&result.per_factor);
    table.row_mut(factors.len()).assign(&result.total);

    write_table(
        args.output.as_deref(),
        "factor",
        &row_names,
        &result.view_names,
        table.view(),
    )?;

    if let Some(dir) = &args.per_feature {
        fs::create_dir_all(dir).map_err(|source| CliError::Io {
            path: dir.clone(),
            source,
        })?;
        let column = ["r2".to_string()];
        for view in store.views() {
            let r2 = variance_explained_per_feature(&store, view.name(), &factors)?;
            let path = dir.join(format!("{}_per_feature.tsv", view.name()));
            write_table(
                Some(&path),
                "feature",
                view.feature_names(),
                &column,
                r2.view().insert_axis(ndarray::Axis(1)),
            )?;
            log::info!("Wrote per-feature R² for view '{}' to {}", view.name(), path.display());
        }
    }
    Ok(())
}

fn run_predict(args: PredictArgs) -> Result<(), CliError> {
    let store = AnalysisConfig::from_path(&args.config)?.load_trained()?;
    let factors = factor_indices(&store, &args.factors)?;
    let prediction = predict(&store, &args.view, &factors, args.scale.into())?;
    let view = store.view(&args.view)?;
    write_table(
        args.output.as_deref(),
        "feature",
        view.feature_names(),
        store.sample_names(),
        prediction.view(),
    )
}

fn run_impute(args: ImputeArgs) -> Result<(), CliError> {
    let store = AnalysisConfig::from_path(&args.config)?.load_trained()?;
    let factors = factor_indices(&store, &args.factors)?;
    let options = ImputeOptions {
        views: (!args.views.is_empty()).then(|| args.views.clone()),
        factors: Some(factors),
        scale: args.scale.into(),
    };
    let imputed = impute_with(&store, &options)?;

    fs::create_dir_all(&args.output_dir).map_err(|source| CliError::Io {
        path: args.output_dir.clone(),
        source,
    })?;
    for view in &imputed.views {
        let path = args.output_dir.join(format!("{}_imputed.tsv", view.name));
        write_table(
            Some(&path),
            "feature",
            store.view(&view.name)?.feature_names(),
            store.sample_names(),
            view.values.view(),
        )?;
        log::info!(
            "Wrote '{}' ({} entries imputed)",
            path.display(),
            view.n_imputed
        );
    }
    Ok(())
}

/// Draws one progress bar per permuted factor.
#[derive(Default)]
struct BarProgress {
    bar: Option<ProgressBar>,
}

impl PermutationProgressObserver for BarProgress {
    fn on_factor_start(&mut self, factor: usize, total_permutations: usize) {
        self.bar = Some(create_progress_bar(
            total_permutations as u64,
            &format!("Permuting loadings of Factor{}", factor + 1),
        ));
    }

    fn on_permutations_advance(&mut self, _: usize, completed_permutations: usize) {
        if let Some(bar) = &self.bar {
            bar.set_position(completed_permutations as u64);
        }
    }

    fn on_factor_finish(&mut self, factor: usize) {
        if let Some(bar) = self.bar.take() {
            bar.finish_with_message(format!("Factor{} done", factor + 1));
        }
    }
}

fn create_progress_bar(len: u64, message: &str) -> ProgressBar {
    let draw_target = if std::io::stderr().is_terminal() {
        ProgressDrawTarget::stderr_with_hz(20)
    } else {
        ProgressDrawTarget::hidden()
    };

    let pb = ProgressBar::with_draw_target(Some(len), draw_target);
    if let Ok(style) = ProgressStyle::with_template(
        "\n> [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
    ) {
        pb.set_style(style.progress_chars("█▉▊▋▌▍▎▏  "));
    }
    pb.set_message(message.to_string());

    pb
}

fn run_enrich(args: EnrichArgs) -> Result<(), CliError> {
    let config = AnalysisConfig::from_path(&args.config)?;
    let store = config.load_trained()?;
    let factors = factor_indices(&store, &args.factors)?;

    let mut options = config.enrichment.clone().unwrap_or_default();
    if let Some(method) = &args.method {
        options.method = method.parse::<EnrichmentMethod>()?;
    }
    if let Some(n) = args.n_permutations {
        options.n_permutations = n;
    }
    if let Some(alpha) = args.alpha {
        options.alpha = alpha;
    }

    let sets = FeatureSetMatrix::from_member_lists(read_member_lists(&args.feature_sets)?)?;
    let loadings = ViewLoadings::from_store(&store, &args.view)?;
    let mut progress = BarProgress::default();
    let result =
        run_enrichment_analysis_with_progress(&loadings, &sets, &factors, &options, &mut progress)?;

    let names = store.factor_names();
    for &factor in &factors {
        let hits = result.significant_sets(factor);
        if !hits.is_empty() {
            log::info!("{}: {}", names[factor], hits.iter().join(", "));
        }
    }
    write_enrichment(args.output.as_deref(), &result, &names, &options)
}

fn write_enrichment(
    output: Option<&Path>,
    result: &mofa::enrichment::EnrichmentResult,
    factor_names: &[String],
    options: &EnrichmentOptions,
) -> Result<(), CliError> {
    let records = result.records().into_iter().map(|r| {
        vec![
            r.set.to_string(),
            factor_names[r.factor].clone(),
            r.size.to_string(),
            r.statistic.to_string(),
            r.p_value.to_string(),
            r.adjusted_p_value.to_string(),
            r.significant.to_string(),
        ]
    });
    log::debug!(
        "Writing enrichment results ({}, {} adjustment)",
        options.method,
        options.adjustment
    );
    write_records(
        output,
        &[
            "set",
            "factor",
            "size",
            "statistic",
            "p_value",
            "adjusted_p_value",
            "significant",
        ],
        records,
    )
}

fn run_regress(args: RegressArgs) -> Result<(), CliError> {
    let mut store = AnalysisConfig::from_path(&args.config)?.load_untrained()?;
    let table = read_labeled_matrix(&args.covariates)?;

    // Reorder covariate rows to the model's sample order.
    let mut rows: AHashMap<&str, usize> = AHashMap::with_capacity(table.row_names.len());
    for (i, name) in table.row_names.iter().enumerate() {
        if rows.insert(name.as_str(), i).is_some() {
            return Err(CliError::Inconsistent(format!(
                "sample '{name}' appears more than once in '{}'",
                args.covariates.display()
            )));
        }
    }
    let order: Vec<usize> = store
        .sample_names()
        .iter()
        .map(|sample| {
            rows.get(sample.as_str()).copied().ok_or_else(|| {
                CliError::Inconsistent(format!(
                    "sample '{sample}' is missing from '{}'",
                    args.covariates.display()
                ))
            })
        })
        .collect::<Result<_, _>>()?;
    let values = Array2::from_shape_fn((order.len(), table.column_names.len()), |(i, c)| {
        table.values[(order[i], c)]
    });

    let views: Vec<String> = if args.views.is_empty() {
        store.view_names().into_iter().map(str::to_string).collect()
    } else {
        args.views.clone()
    };
    let view_refs: Vec<&str> = views.iter().map(String::as_str).collect();
    regress_covariates(
        &mut store,
        &view_refs,
        &Covariates::from_matrix(values),
        args.min_observations,
    )?;

    fs::create_dir_all(&args.output_dir).map_err(|source| CliError::Io {
        path: args.output_dir.clone(),
        source,
    })?;
    let mut header = vec!["feature".to_string()];
    header.extend(store.sample_names().iter().cloned());
    let header: Vec<&str> = header.iter().map(String::as_str).collect();
    for name in &view_refs {
        let view = store.view(name)?;
        let path = args.output_dir.join(format!("{name}_regressed.tsv"));
        let data = view.data().values();
        let records = view
            .feature_names()
            .iter()
            .zip(data.rows())
            .map(|(feature, row)| {
                std::iter::once(feature.clone())
                    .chain(row.iter().map(|&v| format_cell(v)))
                    .collect::<Vec<String>>()
            });
        write_records(Some(&path), &header, records)?;
        log::info!("Wrote '{}'", path.display());
    }
    Ok(())
}
