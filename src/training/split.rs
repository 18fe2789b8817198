//! Seeded shuffled train/test split

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{Result, ServiceError};

/// Share of rows held out for evaluation
pub const TEST_FRACTION: f64 = 0.2;
/// Seed used for every training split
pub const SPLIT_SEED: u64 = 42;

/// Shuffle `0..n_samples` and cut it into (train, test) index sets.
///
/// The test set gets `ceil(n * test_fraction)` rows, at least one, and the
/// train set is never empty.
pub fn train_test_split(n_samples: usize, test_fraction: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    if n_samples < 2 {
        return Err(ServiceError::invalid(format!(
            "Need at least 2 rows to split into train and test sets, got {}",
            n_samples
        )));
    }

    let n_test = ((n_samples as f64 * test_fraction).ceil() as usize).clamp(1, n_samples - 1);

    let mut indices: Vec<usize> = (0..n_samples).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let train = indices.split_off(n_test);
    Ok((train, indices))
}
