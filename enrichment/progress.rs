/// Observer for reporting incremental progress of permutation testing.
///
/// Called from the driving thread only, once per completed batch of draws.
pub trait PermutationProgressObserver {
    fn on_factor_start(&mut self, factor: usize, total_permutations: usize) {
        let _ = (factor, total_permutations);
    }
    fn on_permutations_advance(&mut self, factor: usize, completed_permutations: usize) {
        let _ = (factor, completed_permutations);
    }
    fn on_factor_finish(&mut self, factor: usize) {
        let _ = factor;
    }
}

#[derive(Default)]
pub struct NoopPermutationProgress;

impl PermutationProgressObserver for NoopPermutationProgress {}
