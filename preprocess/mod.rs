//! Pre-training transforms of raw view data.
//!
//! Everything in here mutates view matrices in place and therefore refuses to
//! run once the store holds trained factors and weights.

pub mod covariates;
pub mod masking;

pub use covariates::{
    CovariateError, Covariates, DEFAULT_MIN_OBSERVATIONS, RegressionSummary, regress_covariates,
};
pub use masking::{MaskingError, center_features, mask_at_random, mask_samples};
