use super::progress::PermutationProgressObserver;
use super::statistics::ScoreSummary;
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

/// Tolerance when comparing null statistics with the observed one.
const TIE_TOLERANCE: f64 = 1.0e-10;

fn splitmix64(state: u64) -> u64 {
    let mut z = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Seed of null draw `draw` for factor `factor`, independent of scheduling.
pub(crate) fn draw_seed(seed: u64, factor: usize, draw: usize) -> u64 {
    splitmix64(splitmix64(splitmix64(seed) ^ factor as u64) ^ draw as u64)
}

/// Everything a batch of null draws needs for one factor.
pub(crate) struct PermutationTest<'a> {
    pub(crate) scores: &'a [f64],
    pub(crate) summary: ScoreSummary,
    pub(crate) sets: &'a [Vec<usize>],
    pub(crate) observed: &'a [f64],
    pub(crate) factor: usize,
    pub(crate) seed: u64,
}

impl PermutationTest<'_> {
    /// Number of sets whose null statistic reaches the observed one in one draw.
    fn draw(&self, draw: usize) -> Vec<u64> {
        let mut rng = StdRng::seed_from_u64(draw_seed(self.seed, self.factor, draw));
        let mut permuted = self.scores.to_vec();
        permuted.shuffle(&mut rng);
        self.sets
            .iter()
            .zip(self.observed)
            .map(|(members, &observed)| {
                let null = self.summary.set_statistic(&permuted, members);
                u64::from(null.abs() >= observed.abs() - TIE_TOLERANCE)
            })
            .collect()
    }

    /// Permutation p-values, `(1 + exceedances) / (1 + n_permutations)`.
    ///
    /// Draws are evaluated in parallel, `batch_size` at a time; the observer
    /// hears about each completed batch.
    pub(crate) fn p_values(
        &self,
        n_permutations: usize,
        batch_size: usize,
        observer: &mut dyn PermutationProgressObserver,
    ) -> Vec<f64> {
        let n_sets = self.sets.len();
        let mut exceedances = vec![0u64; n_sets];
        observer.on_factor_start(self.factor, n_permutations);

        let mut completed = 0;
        while completed < n_permutations {
            let end = (completed + batch_size).min(n_permutations);
            let batch = (completed..end)
                .into_par_iter()
                .map(|draw| self.draw(draw))
                .reduce(
                    || vec![0u64; n_sets],
                    |mut acc, counts| {
                        for (a, c) in acc.iter_mut().zip(counts) {
                            *a += c;
                        }
                        acc
                    },
                );
            for (total, count) in exceedances.iter_mut().zip(batch) {
                *total += count;
            }
            completed = end;
            observer.on_permutations_advance(self.factor, completed);
        }

        observer.on_factor_finish(self.factor);
        let denominator = (n_permutations + 1) as f64;
        exceedances
            .into_iter()
            .map(|count| (count + 1) as f64 / denominator)
            .collect()
    }
}
