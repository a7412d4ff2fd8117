//! Dataset handles
//!
//! A [`FundusDataset`] is a view (a list of record positions) over a shared,
//! immutable record table. Splitting a handle produces new views over the same
//! table, so partitions share records and the optional sample cache.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use image::{GrayImage, ImageReader, RgbImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::transforms::{Compose, Sample};
use crate::utils::error::{FundusError, Result, ResultExt};

/// One sample on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundusRecord {
    /// Path to the fundus image
    pub image: PathBuf,
    /// Class index (classification)
    pub label: Option<usize>,
    /// Path to a per-pixel class mask (segmentation)
    pub mask: Option<PathBuf>,
    /// Path to a region-of-interest mask
    pub roi: Option<PathBuf>,
}

impl FundusRecord {
    pub fn classification<P: Into<PathBuf>>(image: P, label: usize) -> Self {
        Self {
            image: image.into(),
            label: Some(label),
            mask: None,
            roi: None,
        }
    }

    pub fn segmentation<P: Into<PathBuf>, M: Into<PathBuf>>(image: P, mask: M) -> Self {
        Self {
            image: image.into(),
            label: None,
            mask: Some(mask.into()),
            roi: None,
        }
    }

    pub fn with_roi<P: Into<PathBuf>>(mut self, roi: P) -> Self {
        self.roi = Some(roi.into());
        self
    }

    /// Decode image, mask and roi from disk
    pub fn load(&self) -> Result<Sample> {
        let mut sample = Sample::new(load_rgb(&self.image)?);
        if let Some(mask) = &self.mask {
            sample = sample.with_mask(load_gray(mask)?);
        }
        if let Some(roi) = &self.roi {
            sample = sample.with_roi(load_gray(roi)?);
        }
        Ok(sample)
    }
}

fn load_rgb(path: &Path) -> Result<RgbImage> {
    let img = ImageReader::open(path)
        .map_err(|e| FundusError::ImageLoadError(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| FundusError::ImageLoadError(path.to_path_buf(), e.to_string()))?;
    Ok(img.to_rgb8())
}

fn load_gray(path: &Path) -> Result<GrayImage> {
    let img = ImageReader::open(path)
        .map_err(|e| FundusError::ImageLoadError(path.to_path_buf(), e.to_string()))?
        .decode()
        .map_err(|e| FundusError::ImageLoadError(path.to_path_buf(), e.to_string()))?;
    Ok(img.to_luma8())
}

type SampleCache = Arc<RwLock<HashMap<usize, Sample>>>;

/// Handle over a set of fundus samples
#[derive(Clone)]
pub struct FundusDataset {
    id: String,
    tag: String,
    records: Arc<Vec<FundusRecord>>,
    /// Positions into `records` visible through this handle
    view: Vec<usize>,
    class_names: Vec<String>,
    classes_filter: Option<Vec<usize>>,
    return_tag: bool,
    return_indices: bool,
    return_roi: bool,
    pre_cache: Compose,
    post_cache: Compose,
    cache: Option<SampleCache>,
}

impl std::fmt::Debug for FundusDataset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FundusDataset")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("len", &self.view.len())
            .field("classes_filter", &self.classes_filter)
            .field("return_tag", &self.return_tag)
            .field("return_indices", &self.return_indices)
            .field("cached", &self.cache.is_some())
            .finish()
    }
}

impl FundusDataset {
    /// Create a handle over `records`; the tag defaults to the id
    pub fn new<S: Into<String>>(id: S, records: Vec<FundusRecord>) -> Self {
        let id = id.into();
        let view = (0..records.len()).collect();
        Self {
            tag: id.clone(),
            id,
            records: Arc::new(records),
            view,
            class_names: Vec::new(),
            classes_filter: None,
            return_tag: false,
            return_indices: false,
            return_roi: false,
            pre_cache: Compose::default(),
            post_cache: Compose::default(),
            cache: None,
        }
    }

    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = class_names;
        self
    }

    pub fn with_tag<S: Into<String>>(mut self, tag: S) -> Self {
        self.tag = tag.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn set_id<S: Into<String>>(&mut self, id: S) {
        self.id = id.into();
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn class_names(&self) -> &[String] {
        &self.class_names
    }

    pub fn classes_filter(&self) -> Option<&[usize]> {
        self.classes_filter.as_deref()
    }

    pub fn return_tag(&self) -> bool {
        self.return_tag
    }

    pub fn set_return_tag(&mut self, value: bool) {
        self.return_tag = value;
    }

    pub fn return_indices(&self) -> bool {
        self.return_indices
    }

    pub fn set_return_indices(&mut self, value: bool) {
        self.return_indices = value;
    }

    pub fn return_roi(&self) -> bool {
        self.return_roi
    }

    pub fn set_return_roi(&mut self, value: bool) {
        self.return_roi = value;
    }

    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }

    /// Turn per-record memoization of the pre-cache stage on or off
    pub fn set_cache(&mut self, enabled: bool) {
        match (enabled, self.cache.is_some()) {
            (true, false) => self.cache = Some(Arc::new(RwLock::new(HashMap::new()))),
            (false, true) => self.cache = None,
            _ => {}
        }
    }

    /// Number of memoized samples
    pub fn cached_len(&self) -> usize {
        self.cache
            .as_ref()
            .and_then(|c| c.read().ok().map(|c| c.len()))
            .unwrap_or(0)
    }

    pub fn pre_cache_transforms(&self) -> &Compose {
        &self.pre_cache
    }

    pub fn post_cache_transforms(&self) -> &Compose {
        &self.post_cache
    }

    /// Replace both pipeline stages; memoized samples are dropped
    pub fn set_transforms(&mut self, pre_cache: Compose, post_cache: Compose) {
        if self.pre_cache != pre_cache {
            if let Some(cache) = &self.cache {
                if let Ok(mut cache) = cache.write() {
                    cache.clear();
                }
            }
        }
        self.pre_cache = pre_cache;
        self.post_cache = post_cache;
    }

    /// Records visible through this handle, in order
    pub fn records(&self) -> impl Iterator<Item = &FundusRecord> + '_ {
        self.view.iter().map(move |&i| &self.records[i])
    }

    pub fn record(&self, position: usize) -> Option<&FundusRecord> {
        self.view.get(position).map(|&i| &self.records[i])
    }

    fn is_classification(&self) -> bool {
        self.records().any(|r| r.label.is_some())
    }

    /// Number of classes, honouring an active class filter
    pub fn num_classes(&self) -> usize {
        if let Some(filter) = &self.classes_filter {
            return filter.len();
        }
        if !self.class_names.is_empty() {
            return self.class_names.len();
        }
        self.records
            .iter()
            .filter_map(|r| r.label)
            .max()
            .map(|m| m + 1)
            .unwrap_or(0)
    }

    /// Label of the sample at `position`, remapped through the class filter
    pub fn label(&self, position: usize) -> Option<usize> {
        let raw = self.record(position)?.label?;
        match &self.classes_filter {
            Some(filter) => filter.iter().position(|&c| c == raw),
            None => Some(raw),
        }
    }

    /// Keep only samples of the given classes.
    ///
    /// Labels are remapped to their position in `classes`. Records without a label
    /// (segmentation) are unaffected.
    pub fn filter_classes(&mut self, classes: &[usize]) {
        let records = Arc::clone(&self.records);
        let before = self.view.len();
        self.view
            .retain(|&i| records[i].label.map_or(true, |l| classes.contains(&l)));
        self.classes_filter = Some(classes.to_vec());
        debug!(
            "Dataset '{}': class filter {:?} kept {}/{} samples",
            self.id,
            classes,
            self.view.len(),
            before
        );
    }

    /// Per-class sample counts (classification) or pixel counts (segmentation)
    pub fn get_class_count(&self) -> Result<Vec<usize>> {
        if self.is_classification() {
            let mut counts = vec![0usize; self.num_classes()];
            for position in 0..self.len() {
                if let Some(label) = self.label(position) {
                    if label >= counts.len() {
                        counts.resize(label + 1, 0);
                    }
                    counts[label] += 1;
                }
            }
            return Ok(counts);
        }

        let masks: Vec<&Path> = self.records().filter_map(|r| r.mask.as_deref()).collect();
        if masks.is_empty() {
            return Err(FundusError::Dataset(format!(
                "Dataset '{}' has neither labels nor masks to count",
                self.id
            )));
        }

        let histogram = masks
            .par_iter()
            .map(|path| -> Result<Vec<usize>> {
                let mask = load_gray(path)?;
                let mut hist = vec![0usize; 256];
                for p in mask.pixels() {
                    hist[p[0] as usize] += 1;
                }
                Ok(hist)
            })
            .try_reduce(
                || vec![0usize; 256],
                |mut a, b| {
                    for (x, y) in a.iter_mut().zip(b) {
                        *x += y;
                    }
                    Ok(a)
                },
            )?;

        if let Some(filter) = &self.classes_filter {
            return Ok(filter
                .iter()
                .map(|&c| histogram.get(c).copied().unwrap_or(0))
                .collect());
        }

        let used = histogram
            .iter()
            .rposition(|&n| n > 0)
            .map(|i| i + 1)
            .unwrap_or(0);
        let mut counts = histogram;
        counts.resize(used.max(self.num_classes()), 0);
        Ok(counts)
    }

    /// New handle over `positions` of this one, sharing records and cache
    pub(crate) fn subset(&self, positions: &[usize], id: String) -> Result<Self> {
        let view = positions
            .iter()
            .map(|&p| {
                self.view.get(p).copied().with_context(|| {
                    format!(
                        "position {} out of range for dataset '{}' of length {}",
                        p,
                        self.id,
                        self.view.len()
                    )
                })
            })
            .collect::<Result<Vec<_>>>()?;
        let mut subset = self.clone();
        subset.id = id;
        subset.view = view;
        Ok(subset)
    }

    fn prepared(&self, record_index: usize) -> Result<Sample> {
        let mut rng = rand::thread_rng();
        let raw = self.records[record_index].load()?;
        self.pre_cache.apply(raw, &mut rng)
    }

    /// Load the sample at `position` and run both pipeline stages
    pub fn load_sample(&self, position: usize) -> Result<Sample> {
        let record_index = *self.view.get(position).with_context(|| {
            format!(
                "index {} out of range for dataset '{}' of length {}",
                position,
                self.id,
                self.view.len()
            )
        })?;

        let sample = match &self.cache {
            Some(cache) => {
                let hit = cache
                    .read()
                    .map_err(|_| FundusError::Dataset("sample cache lock poisoned".to_string()))?
                    .get(&record_index)
                    .cloned();
                match hit {
                    Some(sample) => sample,
                    None => {
                        let sample = self.prepared(record_index)?;
                        cache
                            .write()
                            .map_err(|_| {
                                FundusError::Dataset("sample cache lock poisoned".to_string())
                            })?
                            .insert(record_index, sample.clone());
                        sample
                    }
                }
            }
            None => self.prepared(record_index)?,
        };

        let mut rng = rand::thread_rng();
        self.post_cache.apply(sample, &mut rng)
    }
}
