//! Dataset module for fundus image data
//!
//! This module provides functionality for:
//! - Dataset handles over shared sample records (`handle`)
//! - Deterministic random splitting (`split`)
//! - Discovering datasets on disk (`loader`)
//! - Burn `Dataset`/`Batcher` integration (`burn_dataset`)
//! - Augmentation presets (`augmentation`)

pub mod augmentation;
pub mod burn_dataset;
pub mod handle;
pub mod loader;
pub mod split;

// Re-export main types for convenience
pub use burn_dataset::{FundusBatch, FundusBatcher, FundusItem};
pub use handle::{FundusDataset, FundusRecord};
pub use loader::{DatasetSource, ImageFolderSource, SegmentationFolderSource, StaticSource};
pub use split::{random_split, SPLIT_SEED};

/// Either one value or an ordered collection of them.
///
/// Used wherever a single dataset handle and a list of handles (multi-dataset
/// evaluation) must be treated uniformly.
#[derive(Debug, Clone, PartialEq)]
pub enum OneOrMany<T> {
    Single(T),
    Many(Vec<T>),
}

impl<T> OneOrMany<T> {
    pub fn iter(&self) -> std::slice::Iter<'_, T> {
        match self {
            OneOrMany::Single(item) => std::slice::from_ref(item).iter(),
            OneOrMany::Many(items) => items.iter(),
        }
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, T> {
        match self {
            OneOrMany::Single(item) => std::slice::from_mut(item).iter_mut(),
            OneOrMany::Many(items) => items.iter_mut(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            OneOrMany::Single(_) => 1,
            OneOrMany::Many(items) => items.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_many(&self) -> bool {
        matches!(self, OneOrMany::Many(_))
    }

    pub fn as_single(&self) -> Option<&T> {
        match self {
            OneOrMany::Single(item) => Some(item),
            OneOrMany::Many(_) => None,
        }
    }

    pub fn map<U, F: FnMut(T) -> U>(self, mut f: F) -> OneOrMany<U> {
        match self {
            OneOrMany::Single(item) => OneOrMany::Single(f(item)),
            OneOrMany::Many(items) => OneOrMany::Many(items.into_iter().map(f).collect()),
        }
    }
}

impl<T> From<T> for OneOrMany<T> {
    fn from(item: T) -> Self {
        OneOrMany::Single(item)
    }
}

impl<T> From<Vec<T>> for OneOrMany<T> {
    fn from(items: Vec<T>) -> Self {
        OneOrMany::Many(items)
    }
}
