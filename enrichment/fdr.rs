//! Multiple-testing adjustment of p-values.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Correction applied across the sets tested for one factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PValueAdjustment {
    /// Benjamini-Hochberg false discovery rate.
    #[default]
    #[serde(rename = "BH", alias = "bh", alias = "fdr")]
    BenjaminiHochberg,
    /// Benjamini-Yekutieli false discovery rate, valid under arbitrary dependence.
    #[serde(rename = "BY", alias = "by")]
    BenjaminiYekutieli,
    #[serde(rename = "bonferroni")]
    Bonferroni,
    #[serde(rename = "holm")]
    Holm,
    #[serde(rename = "none")]
    None,
}

impl PValueAdjustment {
    pub fn describe(self) -> &'static str {
        match self {
            Self::BenjaminiHochberg => "BH",
            Self::BenjaminiYekutieli => "BY",
            Self::Bonferroni => "bonferroni",
            Self::Holm => "holm",
            Self::None => "none",
        }
    }

    /// Adjusted p-values in the input order, capped at 1.
    pub fn adjust(self, p_values: &[f64]) -> Vec<f64> {
        let n = p_values.len();
        if n == 0 {
            return Vec::new();
        }
        let total = n as f64;
        match self {
            Self::None => p_values.to_vec(),
            Self::Bonferroni => p_values.iter().map(|&p| (p * total).min(1.0)).collect(),
            Self::BenjaminiHochberg => step_up(p_values, 1.0),
            Self::BenjaminiYekutieli => {
                let harmonic: f64 = (1..=n).map(|i| 1.0 / i as f64).sum();
                step_up(p_values, harmonic)
            }
            Self::Holm => {
                let order = ascending_order(p_values);
                let mut adjusted = vec![0.0; n];
                let mut running = 0.0_f64;
                for (rank, &index) in order.iter().enumerate() {
                    let scaled = ((total - rank as f64) * p_values[index]).min(1.0);
                    running = running.max(scaled);
                    adjusted[index] = running;
                }
                adjusted
            }
        }
    }
}

/// Indices that sort `values` ascending.
fn ascending_order(values: &[f64]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&a, &b| values[a].total_cmp(&values[b]));
    order
}

/// Benjamini-Hochberg step-up with an extra dependence factor.
fn step_up(p_values: &[f64], dependence: f64) -> Vec<f64> {
    let n = p_values.len();
    let total = n as f64;
    let order = ascending_order(p_values);
    let mut adjusted = vec![0.0; n];
    let mut running = 1.0_f64;
    for (rank, &index) in order.iter().enumerate().rev() {
        let scaled = p_values[index] * total * dependence / (rank + 1) as f64;
        running = running.min(scaled).min(1.0);
        adjusted[index] = running;
    }
    adjusted
}

impl fmt::Display for PValueAdjustment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.describe())
    }
}

impl FromStr for PValueAdjustment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "bh" | "fdr" => Ok(Self::BenjaminiHochberg),
            "by" => Ok(Self::BenjaminiYekutieli),
            "bonferroni" => Ok(Self::Bonferroni),
            "holm" => Ok(Self::Holm),
            "none" => Ok(Self::None),
            other => Err(format!("unknown p-value adjustment '{other}'")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    const P: [f64; 5] = [0.01, 0.04, 0.03, 0.005, 0.5];

    #[test]
    fn benjamini_hochberg_matches_hand_computation() {
        let adjusted = PValueAdjustment::BenjaminiHochberg.adjust(&P);
        // sorted: 0.005, 0.01, 0.03, 0.04, 0.5 -> 0.025, 0.025, 0.05, 0.05, 0.5
        let expected = [0.025, 0.05, 0.05, 0.025, 0.5];
        for (a, b) in adjusted.iter().zip(expected) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn holm_is_monotone_in_the_raw_order() {
        let adjusted = PValueAdjustment::Holm.adjust(&P);
        // sorted: 5*0.005, 4*0.01, 3*0.03, 2*0.04, 1*0.5 with running max
        let expected = [0.04, 0.09, 0.09, 0.025, 0.5];
        for (a, b) in adjusted.iter().zip(expected) {
            assert_abs_diff_eq!(*a, b, epsilon = 1e-12);
        }
    }

    #[test]
    fn by_is_more_conservative_than_bh_and_everything_caps_at_one() {
        let bh = PValueAdjustment::BenjaminiHochberg.adjust(&P);
        let by = PValueAdjustment::BenjaminiYekutieli.adjust(&P);
        assert!(bh.iter().zip(&by).all(|(a, b)| b >= a));
        let bonferroni = PValueAdjustment::Bonferroni.adjust(&P);
        assert_eq!(bonferroni[4], 1.0);
        assert!(by.iter().all(|&p| p <= 1.0));
        assert_eq!(PValueAdjustment::None.adjust(&P), P.to_vec());
        assert!(PValueAdjustment::Holm.adjust(&[]).is_empty());
    }

    #[test]
    fn parses_from_text() {
        assert_eq!("BH".parse(), Ok(PValueAdjustment::BenjaminiHochberg));
        assert_eq!("holm".parse(), Ok(PValueAdjustment::Holm));
        assert!("sidak".parse::<PValueAdjustment>().is_err());
    }
}
