//! Assignment of observations to cross-validation folds.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use crate::error::GspcrError;

/// Fold id for every observation.
///
/// With a single fold there is no held-out data: training and test rows are
/// both the full sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FoldAssignment {
    fold_of: Vec<usize>,
    n_folds: usize,
}

/// Randomly partitions `n_obs` observations into `n_folds` balanced folds.
///
/// Indices are shuffled with a `ChaCha8Rng` seeded from `seed` and dealt out
/// round-robin, so fold sizes are `floor(n/k)` or `ceil(n/k)`.
///
/// # Errors
/// Returns an error if `n_folds` is zero or larger than `n_obs`.
pub fn make_folds(n_obs: usize, n_folds: usize, seed: u64) -> Result<FoldAssignment, GspcrError> {
    if n_folds == 0 {
        return Err(GspcrError::config("n_folds must be at least 1"));
    }
    if n_folds > n_obs {
        return Err(GspcrError::config(format!(
            "cannot split {} observations into {} folds",
            n_obs, n_folds
        )));
    }
    let mut fold_of = vec![0usize; n_obs];
    if n_folds > 1 {
        let mut order: Vec<usize> = (0..n_obs).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        order.shuffle(&mut rng);
        for (position, &obs) in order.iter().enumerate() {
            fold_of[obs] = position % n_folds;
        }
    }
    Ok(FoldAssignment { fold_of, n_folds })
}

impl FoldAssignment {
    pub fn n_folds(&self) -> usize {
        self.n_folds
    }

    pub fn n_obs(&self) -> usize {
        self.fold_of.len()
    }

    /// Whether held-out evaluation is disabled (single fold).
    pub fn is_no_cv(&self) -> bool {
        self.n_folds == 1
    }

    /// Fold id (0-based) of every observation.
    pub fn fold_of(&self) -> &[usize] {
        &self.fold_of
    }

    pub fn fold_sizes(&self) -> Vec<usize> {
        let mut sizes = vec![0usize; self.n_folds];
        for &f in &self.fold_of {
            sizes[f] += 1;
        }
        sizes
    }

    /// Rows used to fit models for fold `fold`.
    pub fn train_indices(&self, fold: usize) -> Vec<usize> {
        if self.is_no_cv() {
            return (0..self.n_obs()).collect();
        }
        self.fold_of
            .iter()
            .enumerate()
            .filter(|&(_, &f)| f != fold)
            .map(|(i, _)| i)
            .collect()
    }

    /// Rows on which fold `fold` is scored.
    pub fn test_indices(&self, fold: usize) -> Vec<usize> {
        self.fold_of
            .iter()
            .enumerate()
            .filter(|&(_, &f)| f == fold)
            .map(|(i, _)| i)
            .collect()
    }
}
