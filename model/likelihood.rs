use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Clamp applied to the linear predictor before exponentiation.
const ETA_CLAMP: f64 = 700.0;
/// Epsilon for clamping probabilities away from exactly 0 or 1.
const PROB_EPS: f64 = 1e-8;
/// Floor for the derivative of the mean with respect to the linear predictor.
const MIN_WEIGHT: f64 = 1e-6;

/// Noise model attached to one view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NoiseFamily {
    /// Gaussian observations.
    #[serde(alias = "gaussian")]
    Continuous,
    /// Bernoulli observations (0/1).
    #[serde(alias = "bernoulli")]
    Binary,
    /// Poisson observations (non-negative counts).
    #[serde(alias = "poisson")]
    Count,
}

/// Defines the link function, connecting the linear predictor to the mean response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LinkFunction {
    /// The identity link, for continuous outcomes.
    Identity,
    /// The logit link, for binary outcomes.
    /// Maps probabilities (0, 1) to the real line (-inf, +inf).
    Logit,
    /// The log link, for count outcomes. Maps rates (0, inf) to the real line.
    Log,
}

impl NoiseFamily {
    pub const ALL: [NoiseFamily; 3] = [Self::Continuous, Self::Binary, Self::Count];

    /// The single dispatch point from noise family to link function.
    pub fn link(self) -> LinkFunction {
        match self {
            Self::Continuous => LinkFunction::Identity,
            Self::Binary => LinkFunction::Logit,
            Self::Count => LinkFunction::Log,
        }
    }

    pub fn describe(self) -> &'static str {
        match self {
            Self::Continuous => "continuous",
            Self::Binary => "binary",
            Self::Count => "count",
        }
    }

    /// Maps an observation onto the linear-predictor scale, on which variance is decomposed.
    ///
    /// Continuous data are used as-is. For binary and count data this is the
    /// IRLS working response `z = eta + (y - mu) / (d mu / d eta)` evaluated at
    /// the model's own linear predictor, so data equal to the fitted mean map
    /// exactly onto `eta`.
    pub fn variance_scale(self, observed: f64, eta: f64) -> f64 {
        match self {
            Self::Continuous => observed,
            Self::Binary | Self::Count => self.link().working_response(observed, eta),
        }
    }

    /// Rounds a response-scale prediction into the data domain of this family.
    pub fn in_range(self, response: f64) -> f64 {
        match self {
            Self::Continuous => response,
            Self::Binary => {
                if response >= 0.5 {
                    1.0
                } else {
                    0.0
                }
            }
            Self::Count => response.round().max(0.0),
        }
    }
}

impl fmt::Display for NoiseFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

/// Error returned when a likelihood name is not recognised.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Unknown likelihood '{0}'. Expected one of: continuous (gaussian), binary (bernoulli), count (poisson).")]
pub struct UnknownLikelihood(pub String);

impl FromStr for NoiseFamily {
    type Err = UnknownLikelihood;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "continuous" | "gaussian" => Ok(Self::Continuous),
            "binary" | "bernoulli" => Ok(Self::Binary),
            "count" | "poisson" => Ok(Self::Count),
            other => Err(UnknownLikelihood(other.to_string())),
        }
    }
}

impl LinkFunction {
    /// Applies the inverse link, mapping a linear predictor to the mean response.
    pub fn inverse(self, eta: f64) -> f64 {
        match self {
            Self::Identity => eta,
            Self::Logit => {
                // Clamp eta to prevent numerical overflow in exp()
                let e = eta.clamp(-ETA_CLAMP, ETA_CLAMP);
                let p = 1.0 / (1.0 + f64::exp(-e));
                p.clamp(PROB_EPS, 1.0 - PROB_EPS)
            }
            Self::Log => eta.clamp(-ETA_CLAMP, ETA_CLAMP).exp(),
        }
    }

    /// Derivative of the mean with respect to the linear predictor, floored away from zero.
    pub fn mean_derivative(self, eta: f64) -> f64 {
        match self {
            Self::Identity => 1.0,
            Self::Logit => {
                let mu = self.inverse(eta);
                (mu * (1.0 - mu)).max(MIN_WEIGHT)
            }
            Self::Log => self.inverse(eta).max(MIN_WEIGHT),
        }
    }

    /// IRLS working response for observation `y` at linear predictor `eta`.
    pub fn working_response(self, y: f64, eta: f64) -> f64 {
        match self {
            Self::Identity => y,
            Self::Logit | Self::Log => {
                let mu = self.inverse(eta);
                eta.clamp(-ETA_CLAMP, ETA_CLAMP) + (y - mu) / self.mean_derivative(eta)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn binary_predictions_stay_strictly_inside_unit_interval() {
        for eta in [-1.0e6, -800.0, -40.0, -1.0, 0.0, 1.0, 40.0, 800.0, 1.0e6] {
            let p = LinkFunction::Logit.inverse(eta);
            assert!(p > 0.0 && p < 1.0, "eta={eta} gave p={p}");
        }
    }

    #[test]
    fn count_predictions_stay_strictly_positive() {
        for eta in [-1.0e6, -700.0, -5.0, 0.0, 3.0] {
            let r = LinkFunction::Log.inverse(eta);
            assert!(r > 0.0 && r.is_finite(), "eta={eta} gave rate={r}");
        }
    }

    #[test]
    fn working_response_recovers_eta_at_the_mean() {
        for family in [NoiseFamily::Binary, NoiseFamily::Count] {
            for eta in [-2.5, -0.3, 0.0, 0.7, 1.9] {
                let mu = family.link().inverse(eta);
                assert_abs_diff_eq!(family.variance_scale(mu, eta), eta, epsilon = 1e-12);
            }
        }
        assert_eq!(NoiseFamily::Continuous.variance_scale(3.5, -100.0), 3.5);
    }

    #[test]
    fn likelihood_names_parse_with_aliases() {
        assert_eq!("gaussian".parse::<NoiseFamily>(), Ok(NoiseFamily::Continuous));
        assert_eq!("Bernoulli".parse::<NoiseFamily>(), Ok(NoiseFamily::Binary));
        assert_eq!("poisson".parse::<NoiseFamily>(), Ok(NoiseFamily::Count));
        assert!("warp".parse::<NoiseFamily>().is_err());
        for family in NoiseFamily::ALL {
            assert_eq!(family.describe().parse::<NoiseFamily>(), Ok(family));
        }
    }

    #[test]
    fn in_range_rounds_into_data_domain() {
        assert_eq!(NoiseFamily::Binary.in_range(0.73), 1.0);
        assert_eq!(NoiseFamily::Binary.in_range(0.2), 0.0);
        assert_eq!(NoiseFamily::Count.in_range(2.4), 2.0);
        assert_eq!(NoiseFamily::Continuous.in_range(-1.25), -1.25);
    }
}
