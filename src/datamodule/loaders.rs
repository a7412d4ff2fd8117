//! Batch loader descriptors
//!
//! A [`BatchLoader`] pairs a dataset handle with the loading policy chosen by the data
//! module. Nothing is spawned until [`BatchLoader::build`] turns it into a Burn
//! `DataLoader`.

use std::sync::Arc;

use burn::data::dataloader::{DataLoader, DataLoaderBuilder};
use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::dataset::{FundusBatch, FundusBatcher, FundusDataset};

/// Loading policy for one dataset handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    pub num_workers: usize,
    /// Keep worker threads alive between epochs
    pub persistent_workers: bool,
    pub pin_memory: bool,
    /// Seed for shuffling
    pub seed: u64,
}

/// A dataset handle plus its loading policy
#[derive(Debug, Clone)]
pub struct BatchLoader {
    dataset: FundusDataset,
    config: LoaderConfig,
}

impl BatchLoader {
    pub fn new(dataset: FundusDataset, config: LoaderConfig) -> Self {
        Self { dataset, config }
    }

    pub fn dataset(&self) -> &FundusDataset {
        &self.dataset
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Number of batches per epoch (the last one may be short)
    pub fn num_batches(&self) -> usize {
        self.dataset.len().div_ceil(self.config.batch_size.max(1))
    }

    /// Materialize a Burn data loader on `device`.
    ///
    /// Burn keeps no persistent worker pool or pinned host buffers, so those two
    /// fields only describe the requested policy.
    pub fn build<B: Backend>(&self, device: B::Device) -> Arc<dyn DataLoader<B, FundusBatch<B>>> {
        let mut builder = DataLoaderBuilder::new(FundusBatcher::new())
            .batch_size(self.config.batch_size.max(1))
            .set_device(device);
        if self.config.shuffle {
            builder = builder.shuffle(self.config.seed);
        }
        if self.config.num_workers > 0 {
            builder = builder.num_workers(self.config.num_workers);
        }
        builder.build(self.dataset.clone())
    }
}
