//! Sample partitioning. Randomness is always an explicit seed, never ambient state,
//! so two runs in the same process cannot interfere with each other.

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::error::{PipelineError, PipelineResult};

/// Row indices of a train/validation partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitIndices {
    pub train: Vec<usize>,
    pub validation: Vec<usize>,
}

/// Seeded permutation split: the first `floor(train_ratio * n)` permuted indices
/// train, the rest validate. Same `(n, train_ratio, seed)` gives the same partition.
pub fn train_validation_split(
    n_samples: usize,
    train_ratio: f64,
    seed: u64,
) -> PipelineResult<SplitIndices> {
    if !(train_ratio > 0.0 && train_ratio <= 1.0) {
        return Err(PipelineError::InvalidConfig(format!(
            "train_ratio must lie in (0, 1], got {train_ratio}"
        )));
    }
    let mut permutation: Vec<usize> = (0..n_samples).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    permutation.shuffle(&mut rng);

    let n_train = (train_ratio * n_samples as f64).floor() as usize;
    let validation = permutation.split_off(n_train);
    Ok(SplitIndices {
        train: permutation,
        validation,
    })
}

/// One cross-validation fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fold {
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// Contiguous, unshuffled k-fold partition. The first `n % k` folds hold one
/// extra test sample.
pub fn k_fold(n_samples: usize, k: usize) -> PipelineResult<Vec<Fold>> {
    if k < 2 {
        return Err(PipelineError::InvalidConfig(format!(
            "cross validation needs at least 2 folds, got {k}"
        )));
    }
    if n_samples < k {
        return Err(PipelineError::InsufficientSamples {
            found: n_samples,
            required: k,
        });
    }
    let base = n_samples / k;
    let remainder = n_samples % k;
    let mut folds = Vec::with_capacity(k);
    let mut start = 0;
    for fold_idx in 0..k {
        let size = base + usize::from(fold_idx < remainder);
        let stop = start + size;
        let test: Vec<usize> = (start..stop).collect();
        let train: Vec<usize> = (0..start).chain(stop..n_samples).collect();
        folds.push(Fold { train, test });
        start = stop;
    }
    Ok(folds)
}
