//! Deterministic random splitting of dataset handles
//!
//! Partitions are disjoint views over the parent's records. The permutation comes
//! from a ChaCha8 generator, so a given seed yields the same partitions on every
//! platform and run.

use rand::prelude::*;
use rand_chacha::ChaCha8Rng;
use tracing::debug;

use crate::dataset::handle::FundusDataset;
use crate::utils::error::{FundusError, Result};

/// Seed used for train/validation splitting
pub const SPLIT_SEED: u64 = 42;

/// Randomly partition `dataset` into handles of the given `lengths`.
///
/// Partition `i` gets the id `<parent id>_split_<i>`. The lengths must add up to the
/// dataset length.
pub fn random_split(
    dataset: &FundusDataset,
    lengths: &[usize],
    seed: u64,
) -> Result<Vec<FundusDataset>> {
    let total: usize = lengths.iter().sum();
    if total != dataset.len() {
        return Err(FundusError::InvalidInput(format!(
            "split lengths {:?} sum to {} but dataset '{}' has {} samples",
            lengths,
            total,
            dataset.id(),
            dataset.len()
        )));
    }

    let mut order: Vec<usize> = (0..dataset.len()).collect();
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    order.shuffle(&mut rng);

    let mut partitions = Vec::with_capacity(lengths.len());
    let mut offset = 0;
    for (i, &len) in lengths.iter().enumerate() {
        let id = format!("{}_split_{}", dataset.id(), i);
        partitions.push(dataset.subset(&order[offset..offset + len], id)?);
        offset += len;
    }

    debug!(
        "Split '{}' ({} samples) into {:?} with seed {}",
        dataset.id(),
        dataset.len(),
        lengths,
        seed
    );

    Ok(partitions)
}
