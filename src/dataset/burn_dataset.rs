//! Burn Dataset Integration
//!
//! Implements Burn's `Dataset` trait for [`FundusDataset`] and a `Batcher` that
//! stacks [`FundusItem`]s into tensors.
//!
//! Items are produced lazily: each `get` loads the sample from disk (or the cache)
//! and runs the handle's transform pipelines.

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use tracing::warn;

use crate::dataset::handle::FundusDataset;
use crate::transforms::Sample;
use crate::utils::error::Result;

/// A single transformed sample ready for Burn
#[derive(Clone, Debug)]
pub struct FundusItem {
    /// Image data as flattened CHW float array
    pub image: Vec<f32>,
    /// `[channels, height, width]`
    pub shape: [usize; 3],
    pub label: Option<usize>,
    /// Per-pixel class ids, `height * width` values
    pub mask: Option<Vec<i64>>,
    /// Region of interest, 1.0 inside and 0.0 outside
    pub roi: Option<Vec<f32>>,
    /// Position of the sample within its dataset
    pub index: Option<usize>,
    pub tag: Option<String>,
}

impl FundusItem {
    fn from_sample(sample: Sample, label: Option<usize>) -> Self {
        let chw = sample.chw();
        Self {
            image: chw.data,
            shape: chw.shape,
            label,
            mask: sample
                .mask
                .map(|m| m.into_raw().into_iter().map(i64::from).collect()),
            roi: sample.roi.map(|r| {
                r.into_raw()
                    .into_iter()
                    .map(|v| if v > 0 { 1.0 } else { 0.0 })
                    .collect()
            }),
            index: None,
            tag: None,
        }
    }
}

impl FundusDataset {
    /// Load and transform the item at `index`, attaching the outputs enabled by the
    /// handle's flags
    pub fn item(&self, index: usize) -> Result<FundusItem> {
        let sample = self.load_sample(index)?;
        let mut item = FundusItem::from_sample(sample, self.label(index));
        if !self.return_roi() {
            item.roi = None;
        }
        if self.return_indices() {
            item.index = Some(index);
        }
        if self.return_tag() {
            item.tag = Some(self.tag().to_string());
        }
        Ok(item)
    }
}

impl Dataset<FundusItem> for FundusDataset {
    fn get(&self, index: usize) -> Option<FundusItem> {
        match self.item(index) {
            Ok(item) => Some(item),
            Err(e) => {
                warn!("Dataset '{}': skipping item {}: {}", self.id(), index, e);
                None
            }
        }
    }

    fn len(&self) -> usize {
        FundusDataset::len(self)
    }
}

/// Batch of fundus samples
#[derive(Clone, Debug)]
pub struct FundusBatch<B: Backend> {
    /// Images [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,
    /// Class labels [batch_size], when every item has one
    pub labels: Option<Tensor<B, 1, Int>>,
    /// Segmentation masks [batch_size, height, width]
    pub masks: Option<Tensor<B, 3, Int>>,
    /// Region-of-interest masks [batch_size, height, width]
    pub rois: Option<Tensor<B, 3>>,
    /// Sample positions [batch_size]
    pub indices: Option<Tensor<B, 1, Int>>,
    pub tags: Option<Vec<String>>,
}

/// Stacks [`FundusItem`]s into a [`FundusBatch`]
#[derive(Clone, Debug, Default)]
pub struct FundusBatcher;

impl FundusBatcher {
    pub fn new() -> Self {
        Self
    }
}

/// `Some` only when every item provides the field
fn all_some<T, U>(items: &[T], field: impl Fn(&T) -> Option<U>) -> Option<Vec<U>> {
    items.iter().map(field).collect()
}

impl<B: Backend> Batcher<B, FundusItem, FundusBatch<B>> for FundusBatcher {
    fn batch(&self, items: Vec<FundusItem>, device: &B::Device) -> FundusBatch<B> {
        let batch_size = items.len();
        let [channels, height, width] = items.first().map(|i| i.shape).unwrap_or([3, 0, 0]);

        let images_data: Vec<f32> = items
            .iter()
            .flat_map(|item| item.image.iter().copied())
            .collect();
        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, channels, height, width]),
            device,
        );

        let labels = all_some(&items, |i| i.label.map(|l| l as i64)).map(|labels| {
            Tensor::<B, 1, Int>::from_data(TensorData::new(labels, [batch_size]), device)
        });

        let masks = all_some(&items, |i| i.mask.clone()).map(|masks| {
            let data: Vec<i64> = masks.into_iter().flatten().collect();
            Tensor::<B, 3, Int>::from_data(
                TensorData::new(data, [batch_size, height, width]),
                device,
            )
        });

        let rois = all_some(&items, |i| i.roi.clone()).map(|rois| {
            let data: Vec<f32> = rois.into_iter().flatten().collect();
            Tensor::<B, 3>::from_floats(TensorData::new(data, [batch_size, height, width]), device)
        });

        let indices = all_some(&items, |i| i.index.map(|x| x as i64)).map(|indices| {
            Tensor::<B, 1, Int>::from_data(TensorData::new(indices, [batch_size]), device)
        });

        let tags = all_some(&items, |i| i.tag.clone());

        FundusBatch {
            images,
            labels,
            masks,
            rois,
            indices,
            tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::handle::FundusRecord;
    use crate::transforms::{Compose, TransformOp};
    use burn::backend::NdArray;
    use image::{GrayImage, ImageBuffer, Luma, Rgb, RgbImage};
    use std::path::Path;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn item(label: Option<usize>, index: Option<usize>) -> FundusItem {
        FundusItem {
            image: vec![0.5; 3 * 2 * 2],
            shape: [3, 2, 2],
            label,
            mask: Some(vec![0, 1, 1, 0]),
            roi: None,
            index,
            tag: Some("idrid".to_string()),
        }
    }

    fn write_pair(dir: &Path, name: &str) -> FundusRecord {
        let img: RgbImage = ImageBuffer::from_pixel(8, 4, Rgb([255, 128, 0]));
        let mask: GrayImage = ImageBuffer::from_fn(8, 4, |x, _| Luma([(x % 3) as u8]));
        let img_path = dir.join(format!("{}.png", name));
        let mask_path = dir.join(format!("{}_mask.png", name));
        img.save(&img_path).unwrap();
        mask.save(&mask_path).unwrap();
        FundusRecord::segmentation(img_path, mask_path)
    }

    #[test]
    fn test_batch_shapes() {
        let batcher = FundusBatcher::new();
        let device = Default::default();
        let batch: FundusBatch<TestBackend> = batcher.batch(
            vec![item(Some(1), Some(0)), item(Some(0), Some(1))],
            &device,
        );
        assert_eq!(batch.images.dims(), [2, 3, 2, 2]);
        assert_eq!(batch.labels.unwrap().dims(), [2]);
        assert_eq!(batch.masks.unwrap().dims(), [2, 2, 2]);
        assert!(batch.rois.is_none());
        assert_eq!(batch.indices.unwrap().dims(), [2]);
        assert_eq!(batch.tags.unwrap(), vec!["idrid", "idrid"]);
    }

    #[test]
    fn test_partial_labels_are_dropped() {
        let batcher = FundusBatcher::new();
        let device = Default::default();
        let batch: FundusBatch<TestBackend> =
            batcher.batch(vec![item(Some(1), None), item(None, None)], &device);
        assert!(batch.labels.is_none());
        assert!(batch.indices.is_none());
    }

    #[test]
    fn test_dataset_get_honours_flags() {
        let dir = TempDir::new().unwrap();
        let mut ds = FundusDataset::new(
            "drive",
            vec![write_pair(dir.path(), "a"), write_pair(dir.path(), "b")],
        );
        ds.set_transforms(
            Compose::new(vec![
                TransformOp::LongestMaxSize { max_size: 4 },
                TransformOp::PadIfNeeded {
                    min_height: 4,
                    min_width: 4,
                },
            ]),
            Compose::new(vec![TransformOp::ToTensor]),
        );

        let plain = Dataset::get(&ds, 1).unwrap();
        assert_eq!(plain.shape, [3, 4, 4]);
        assert_eq!(plain.mask.as_ref().unwrap().len(), 16);
        assert!(plain.label.is_none());
        assert!(plain.index.is_none());
        assert!(plain.tag.is_none());

        ds.set_return_indices(true);
        ds.set_return_tag(true);
        let flagged = Dataset::get(&ds, 1).unwrap();
        assert_eq!(flagged.index, Some(1));
        assert_eq!(flagged.tag.as_deref(), Some("drive"));

        assert!(Dataset::get(&ds, 2).is_none());
        assert_eq!(Dataset::len(&ds), 2);
    }

    #[test]
    fn test_missing_file_yields_none() {
        let ds = FundusDataset::new(
            "broken",
            vec![FundusRecord::classification("/does/not/exist.png", 0)],
        );
        assert!(Dataset::get(&ds, 0).is_none());
    }
}
