use crate::model::matrix::observed_mean;
use crate::model::{ModelError, ModelStore};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::index;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum MaskingError {
    #[error("Masking fraction must lie in [0, 1], but was {0}.")]
    InvalidFraction(f64),
    #[error("Cannot mask {requested} samples in a model with only {available}.")]
    TooManySamples { requested: usize, available: usize },
    #[error(transparent)]
    Model(#[from] ModelError),
}

/// Hides a random fraction of the observed entries of a view.
///
/// Used to benchmark imputation: masked entries can later be compared with
/// the model's reconstruction. Returns the number of entries masked.
pub fn mask_at_random(
    store: &mut ModelStore,
    view: &str,
    fraction: f64,
    seed: u64,
) -> Result<usize, MaskingError> {
    if !(0.0..=1.0).contains(&fraction) {
        return Err(MaskingError::InvalidFraction(fraction));
    }
    let data = store.view_data_mut(view)?;
    let observed: Vec<(usize, usize)> = data
        .values()
        .indexed_iter()
        .filter(|(_, v)| v.is_some())
        .map(|(position, _)| position)
        .collect();
    let amount = (fraction * observed.len() as f64).round() as usize;
    let mut rng = StdRng::seed_from_u64(seed);
    for i in index::sample(&mut rng, observed.len(), amount) {
        let (row, col) = observed[i];
        data.set(row, col, None);
    }
    log::info!(
        "Masked {amount} of {} observed entries in view '{view}'",
        observed.len()
    );
    Ok(amount)
}

/// Hides every entry of `n_samples` randomly chosen samples in a view,
/// simulating samples for which the whole assay is missing.
/// Returns the masked sample indices in ascending order.
pub fn mask_samples(
    store: &mut ModelStore,
    view: &str,
    n_samples: usize,
    seed: u64,
) -> Result<Vec<usize>, MaskingError> {
    let available = store.n_samples();
    if n_samples > available {
        return Err(MaskingError::TooManySamples {
            requested: n_samples,
            available,
        });
    }
    let data = store.view_data_mut(view)?;
    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples = index::sample(&mut rng, available, n_samples).into_vec();
    samples.sort_unstable();
    for &col in &samples {
        for row in 0..data.nrows() {
            data.set(row, col, None);
        }
    }
    log::info!("Masked {n_samples} whole samples in view '{view}'");
    Ok(samples)
}

/// Subtracts each feature's observed mean from its observed entries.
pub fn center_features(store: &mut ModelStore, views: &[&str]) -> Result<(), MaskingError> {
    for &name in views {
        store.view(name)?;
    }
    for &name in views {
        let data = store.view_data_mut(name)?;
        for row in 0..data.nrows() {
            if let Some(mean) = observed_mean(data.row(row)) {
                for col in 0..data.ncols() {
                    if let Some(v) = data.get(row, col) {
                        data.set(row, col, Some(v - mean));
                    }
                }
            }
        }
        log::debug!("Centered features of view '{name}'");
    }
    Ok(())
}
