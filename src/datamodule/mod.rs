//! Fundus data module
//!
//! [`FundusDataModule`] binds a [`DatasetSource`], the transform descriptors and the
//! Burn data loaders into a lifecycle driven by a training loop:
//!
//! 1. `new` resolves batch sizes, worker counts and image size.
//! 2. `setup` / `setup_all` build the dataset handles, carve out a validation set
//!    and apply the class filter.
//! 3. `finalize_composition` attaches transform pipelines for the task.
//! 4. `train_dataloader` / `val_dataloader` / `test_dataloader` hand out loaders.

pub mod loaders;
pub mod task;
pub mod weighting;

use burn::prelude::*;
use tracing::{debug, info};

use crate::config::{AcceleratorInfo, DataModuleConfig, DatasetParams, ValidSize};
use crate::dataset::augmentation::AugmentationConfig;
use crate::dataset::{random_split, DatasetSource, FundusDataset, OneOrMany, SPLIT_SEED};
use crate::transforms::ops::DEFAULT_AUTOCROP_THRESHOLD;
use crate::transforms::{Compose, TransformOp};
use crate::utils::error::{FundusError, Result, ResultExt, Split};

pub use loaders::{BatchLoader, LoaderConfig};
pub use task::FundusTask;
pub use weighting::{class_weighting, ClassWeighting};

/// Lifecycle stage passed to [`FundusDataModule::setup`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fit,
    Validate,
    Test,
}

/// Data loading orchestration for fundus datasets
#[derive(Debug, Clone)]
pub struct FundusDataModule {
    config: DataModuleConfig,
    task: FundusTask,
    /// `(height, width)`
    img_size: (u32, u32),
    valid_size: Option<ValidSize>,
    /// Per-device batch size
    batch_size: usize,
    eval_batch_size: usize,
    num_workers: usize,
    persistent_workers: bool,
    train_shuffle: bool,
    dataset_params: DatasetParams,
    pub(crate) train: Option<FundusDataset>,
    pub(crate) val: Option<FundusDataset>,
    pub(crate) test: Option<OneOrMany<FundusDataset>>,
}

fn rename_split(dataset: &mut FundusDataset, marker: &str, replacement: &str) {
    let renamed = match dataset.id().strip_suffix(marker) {
        Some(base) => format!("{}{}", base, replacement),
        None => dataset.id().replace(marker, replacement),
    };
    dataset.set_id(renamed);
}

impl FundusDataModule {
    /// Resolve the configuration against the available hardware.
    ///
    /// No dataset is created here.
    pub fn new(
        config: DataModuleConfig,
        accelerators: AcceleratorInfo,
        task: FundusTask,
    ) -> Result<Self> {
        config.validate()?;

        let img_size = config.img_size.to_pair();
        let devices = accelerators.device_count.max(1);
        let batch_size = (config.batch_size / devices).max(1);
        let eval_batch_size = config.eval_batch_size.unwrap_or(config.batch_size);
        let num_workers = config.num_workers.resolve(&accelerators);
        let valid_size = config.valid_size.filter(|v| v.is_enabled());

        let mut dataset_params = config.dataset_params.clone();
        dataset_params.use_cache = config.use_cache;

        debug!(
            "Data module: img_size={:?} batch_size={} (global {} over {} device(s)) eval_batch_size={} num_workers={} valid_size={:?}",
            img_size,
            batch_size,
            config.batch_size,
            accelerators.device_count,
            eval_batch_size,
            num_workers,
            valid_size
        );

        Ok(Self {
            persistent_workers: config.persistent_workers,
            config,
            task,
            img_size,
            valid_size,
            batch_size,
            eval_batch_size,
            num_workers,
            train_shuffle: true,
            dataset_params,
            train: None,
            val: None,
            test: None,
        })
    }

    pub fn config(&self) -> &DataModuleConfig {
        &self.config
    }

    pub fn task(&self) -> FundusTask {
        self.task
    }

    /// `(height, width)`
    pub fn img_size(&self) -> (u32, u32) {
        self.img_size
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn eval_batch_size(&self) -> usize {
        self.eval_batch_size
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    /// Configured validation size; an absolute count once the split has happened
    pub fn valid_size(&self) -> Option<ValidSize> {
        self.valid_size
    }

    pub fn persistent_workers(&self) -> bool {
        self.persistent_workers
    }

    pub fn train_shuffle(&self) -> bool {
        self.train_shuffle
    }

    pub fn set_train_shuffle(&mut self, shuffle: bool) {
        self.train_shuffle = shuffle;
    }

    pub fn dataset_params(&self) -> &DatasetParams {
        &self.dataset_params
    }

    pub fn train(&self) -> Option<&FundusDataset> {
        self.train.as_ref()
    }

    pub fn val(&self) -> Option<&FundusDataset> {
        self.val.as_ref()
    }

    pub fn test(&self) -> Option<&OneOrMany<FundusDataset>> {
        self.test.as_ref()
    }

    /// Every existing handle: train, validation, then each test handle
    pub(crate) fn handles_mut(&mut self) -> impl Iterator<Item = &mut FundusDataset> + '_ {
        self.train
            .iter_mut()
            .chain(self.val.iter_mut())
            .chain(self.test.iter_mut().flat_map(|t| t.iter_mut()))
    }

    /// Validation and test handles
    pub(crate) fn eval_handles_mut(&mut self) -> impl Iterator<Item = &mut FundusDataset> + '_ {
        self.val
            .iter_mut()
            .chain(self.test.iter_mut().flat_map(|t| t.iter_mut()))
    }

    fn adopt(&self, mut dataset: FundusDataset) -> FundusDataset {
        if self.dataset_params.use_cache {
            dataset.set_cache(true);
        }
        dataset
    }

    /// Build the handles needed for `stage` through `source`.
    ///
    /// Existing handles are kept.
    pub fn setup<S: DatasetSource + ?Sized>(&mut self, stage: Stage, source: &S) -> Result<()> {
        match stage {
            Stage::Fit | Stage::Validate => {
                if self.train.is_none() {
                    self.train = source
                        .train(&self.dataset_params)?
                        .map(|ds| self.adopt(ds));
                }
                if self.val.is_none() {
                    self.val = source
                        .validation(&self.dataset_params)?
                        .map(|ds| self.adopt(ds));
                }
                if self.train.is_some() {
                    self.create_valid_set()?;
                }
            }
            Stage::Test => {
                if self.test.is_none() {
                    self.test = source
                        .test(&self.dataset_params)?
                        .map(|sets| sets.map(|ds| self.adopt(ds)));
                }
            }
        }
        self.set_classes_filter();
        Ok(())
    }

    /// Run every stage, then attach the transform pipelines
    pub fn setup_all<S: DatasetSource + ?Sized>(&mut self, source: &S) -> Result<&mut Self> {
        self.setup(Stage::Fit, source)?;
        self.setup(Stage::Validate, source)?;
        self.setup(Stage::Test, source)?;
        self.finalize_composition();
        Ok(self)
    }

    /// Carve a validation set out of the training set.
    ///
    /// Does nothing when a validation set already exists or no size is configured.
    pub fn create_valid_set(&mut self) -> Result<()> {
        if self.val.is_some() {
            return Ok(());
        }
        let Some(valid_size) = self.valid_size else {
            return Ok(());
        };
        let train = self.train.as_ref().ok_or(FundusError::NotSetUp(Split::Train))?;

        let total = train.len();
        let n_val = valid_size.resolve(total);
        if n_val > total {
            return Err(FundusError::InvalidSplit {
                requested: n_val,
                available: total,
            });
        }

        let mut parts = random_split(train, &[total - n_val, n_val], SPLIT_SEED)?.into_iter();
        let mut new_train = parts.next().context("split produced no train partition")?;
        let mut new_val = parts.next().context("split produced no validation partition")?;
        rename_split(&mut new_train, "_split_0", "_split_train");
        rename_split(&mut new_val, "_split_1", "_split_val");

        info!(
            "Validation split: {} train / {} valid ('{}', '{}')",
            new_train.len(),
            new_val.len(),
            new_train.id(),
            new_val.id()
        );

        self.train = Some(new_train);
        self.val = Some(new_val);
        self.valid_size = Some(ValidSize::Count(n_val));
        Ok(())
    }

    /// Per-class counts over the training set
    pub fn class_count(&self) -> Result<Vec<usize>> {
        self.train
            .as_ref()
            .ok_or(FundusError::NotSetUp(Split::Train))?
            .get_class_count()
    }

    /// Loss weights from the training class histogram
    pub fn class_weights(&self) -> Result<Vec<f32>> {
        self.class_weights_with(ClassWeighting::default())
    }

    pub fn class_weights_with(&self, mode: ClassWeighting) -> Result<Vec<f32>> {
        Ok(class_weighting(&self.class_count()?, mode))
    }

    pub fn class_weights_tensor<B: Backend>(&self, device: &B::Device) -> Result<Tensor<B, 1>> {
        let weights = self.class_weights()?;
        let len = weights.len();
        Ok(Tensor::<B, 1>::from_floats(TensorData::new(weights, [len]), device))
    }

    /// Resize the longest side then zero-pad to exactly `img_size`
    pub fn img_size_ops(&self) -> Compose {
        let (h, w) = self.img_size;
        Compose::new(vec![
            TransformOp::LongestMaxSize { max_size: h.min(w) },
            TransformOp::PadIfNeeded {
                min_height: h,
                min_width: w,
            },
        ])
        .with_roi_target()
    }

    pub fn normalize_and_cast_op(&self) -> Compose {
        let (mean, std) = self.config.normalization.mean_std();
        Compose::new(vec![TransformOp::Normalize { mean, std }, TransformOp::ToTensor])
    }

    /// `None` when auto-crop is disabled
    pub fn autocrop_op(&self) -> Option<Compose> {
        if self.config.skip_autocrop {
            return None;
        }
        Some(
            Compose::new(vec![TransformOp::AutoCrop {
                threshold: DEFAULT_AUTOCROP_THRESHOLD,
                precise: self.config.precise_autocrop,
            }])
            .with_roi_target(),
        )
    }

    /// Training-time augmentation for the configured preset
    pub fn augmentation_ops(&self) -> Compose {
        AugmentationConfig::for_type(self.config.data_augmentation_type).to_compose()
    }

    pub fn train_dataloader(&self) -> Result<BatchLoader> {
        let train = self.train.as_ref().ok_or(FundusError::NotSetUp(Split::Train))?;
        Ok(BatchLoader::new(
            train.clone(),
            LoaderConfig {
                batch_size: self.batch_size,
                shuffle: self.train_shuffle,
                num_workers: self.num_workers,
                persistent_workers: self.persistent_workers && self.num_workers > 0,
                pin_memory: true,
                seed: self.config.shuffle_seed,
            },
        ))
    }

    /// Validation loader; `shuffle` and `persistent_workers` are usually `true`
    pub fn val_dataloader(&self, shuffle: bool, persistent_workers: bool) -> Result<BatchLoader> {
        let val = self.val.as_ref().ok_or(FundusError::NotSetUp(Split::Validation))?;
        Ok(BatchLoader::new(
            val.clone(),
            LoaderConfig {
                batch_size: self.batch_size,
                shuffle,
                num_workers: self.num_workers,
                persistent_workers: self.persistent_workers
                    && persistent_workers
                    && self.num_workers > 0,
                pin_memory: true,
                seed: self.config.shuffle_seed,
            },
        ))
    }

    /// One loader per test handle.
    ///
    /// A single test set gets non-persistent workers; a list of test sets gets
    /// persistent ones.
    pub fn test_dataloader(&self, shuffle: bool) -> Result<OneOrMany<BatchLoader>> {
        let test = self.test.as_ref().ok_or(FundusError::NotSetUp(Split::Test))?;
        let persistent_workers = test.is_many();
        let config = LoaderConfig {
            batch_size: self.eval_batch_size,
            shuffle,
            num_workers: self.num_workers,
            persistent_workers,
            pin_memory: true,
            seed: self.config.shuffle_seed,
        };
        Ok(test.clone().map(|ds| BatchLoader::new(ds, config)))
    }

    /// Set the tag-return flag on every existing handle
    pub fn return_tag(&mut self, value: bool) {
        for ds in self.handles_mut() {
            ds.set_return_tag(value);
        }
    }

    /// Forward the configured class filter to every existing handle
    pub fn set_classes_filter(&mut self) {
        let Some(filter) = self.dataset_params.classes_filter.clone() else {
            return;
        };
        for ds in self.handles_mut() {
            ds.filter_classes(&filter);
        }
    }

    /// Attach transform pipelines according to the task
    pub fn finalize_composition(&mut self) {
        let task = self.task;
        task.finalize_composition(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{DAType, NumWorkers};
    use crate::dataset::{FundusRecord, StaticSource};
    use burn::backend::NdArray;
    use image::{ImageBuffer, Rgb, RgbImage};
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use tempfile::TempDir;

    fn labeled(id: &str, labels: &[usize]) -> FundusDataset {
        let records = labels
            .iter()
            .enumerate()
            .map(|(i, &l)| FundusRecord::classification(format!("{}_{}.png", id, i), l))
            .collect();
        FundusDataset::new(id, records)
    }

    fn source(n_train: usize) -> StaticSource {
        let labels: Vec<usize> = (0..n_train).map(|i| i % 3).collect();
        StaticSource {
            train: Some(labeled("eyepacs", &labels)),
            validation: None,
            test: Some(OneOrMany::Single(labeled("idrid", &[0, 1, 2]))),
        }
    }

    fn multi_test_source() -> StaticSource {
        StaticSource {
            train: Some(labeled("eyepacs", &[0, 1, 2, 0, 1, 2])),
            validation: None,
            test: Some(OneOrMany::Many(vec![
                labeled("idrid", &[0, 1]),
                labeled("messidor", &[2, 2]),
                labeled("aptos", &[1]),
            ])),
        }
    }

    fn module(config: DataModuleConfig) -> FundusDataModule {
        FundusDataModule::new(config, AcceleratorInfo::new(1, 8), FundusTask::Classification)
            .unwrap()
    }

    #[test]
    fn test_batch_size_divided_across_devices() {
        let cases = [(32, 4, 8), (32, 3, 10), (2, 4, 1), (16, 0, 16), (1, 1, 1)];
        for (batch, devices, expected) in cases {
            let dm = FundusDataModule::new(
                DataModuleConfig::new(512, batch),
                AcceleratorInfo::new(devices, 8),
                FundusTask::Classification,
            )
            .unwrap();
            assert_eq!(dm.batch_size(), expected, "batch {} on {} devices", batch, devices);
            assert_eq!(dm.eval_batch_size(), batch);
        }
    }

    #[test]
    fn test_auto_workers() {
        let config = DataModuleConfig::new(512, 8).with_num_workers(NumWorkers::Auto);
        let dm = FundusDataModule::new(
            config.clone(),
            AcceleratorInfo::new(2, 16),
            FundusTask::Classification,
        )
        .unwrap();
        assert_eq!(dm.num_workers(), 8);

        let dm = FundusDataModule::new(config, AcceleratorInfo::cpu_only(6), FundusTask::default())
            .unwrap();
        assert_eq!(dm.num_workers(), 6);
    }

    #[test]
    fn test_new_resolves_config() {
        let config = DataModuleConfig::new((512, 768), 8)
            .with_eval_batch_size(2)
            .with_cache(true);
        let dm = module(config);
        assert_eq!(dm.img_size(), (512, 768));
        assert_eq!(dm.eval_batch_size(), 2);
        assert!(dm.dataset_params().use_cache);
        assert!(dm.train().is_none() && dm.val().is_none() && dm.test().is_none());
        assert!(dm.train_shuffle());

        assert!(FundusDataModule::new(
            DataModuleConfig::new(512, 0),
            AcceleratorInfo::cpu_only(1),
            FundusTask::Classification
        )
        .is_err());
    }

    #[test]
    fn test_fraction_split() {
        crate::utils::logging::init_test_logging();
        let config = DataModuleConfig::new(64, 4).with_valid_size(ValidSize::Fraction(0.25));
        let mut dm = module(config);
        dm.setup(Stage::Fit, &source(10)).unwrap();

        let train = dm.train().unwrap();
        let val = dm.val().unwrap();
        assert_eq!(val.len(), 2);
        assert_eq!(train.len(), 8);
        assert_eq!(train.id(), "eyepacs_split_train");
        assert_eq!(val.id(), "eyepacs_split_val");
        assert_eq!(dm.valid_size(), Some(ValidSize::Count(2)));
    }

    #[test]
    fn test_count_split_and_idempotence() {
        let config = DataModuleConfig::new(64, 4).with_valid_size(ValidSize::Count(3));
        let mut dm = module(config);
        dm.setup(Stage::Fit, &source(12)).unwrap();
        let first: Vec<_> = dm.val().unwrap().records().cloned().collect();

        dm.create_valid_set().unwrap();
        dm.setup(Stage::Validate, &source(12)).unwrap();
        let second: Vec<_> = dm.val().unwrap().records().cloned().collect();
        assert_eq!(first, second);
        assert_eq!(dm.train().unwrap().len(), 9);
        assert_eq!(dm.train().unwrap().id(), "eyepacs_split_train");
    }

    #[test]
    fn test_split_is_reproducible() {
        let config = DataModuleConfig::new(64, 4).with_valid_size(ValidSize::Fraction(0.3));
        let mut a = module(config.clone());
        let mut b = module(config);
        a.setup(Stage::Fit, &source(20)).unwrap();
        b.setup(Stage::Fit, &source(20)).unwrap();
        let va: Vec<_> = a.val().unwrap().records().cloned().collect();
        let vb: Vec<_> = b.val().unwrap().records().cloned().collect();
        assert_eq!(va, vb);
    }

    #[test]
    fn test_no_split_without_valid_size() {
        let mut dm = module(DataModuleConfig::new(64, 4).with_valid_size(ValidSize::Count(0)));
        dm.setup(Stage::Fit, &source(10)).unwrap();
        assert!(dm.val().is_none());
        assert_eq!(dm.train().unwrap().len(), 10);
        assert!(matches!(
            dm.val_dataloader(true, true),
            Err(FundusError::NotSetUp(Split::Validation))
        ));
    }

    #[test]
    fn test_explicit_validation_is_kept() {
        let mut src = source(10);
        src.validation = Some(labeled("eyepacs_val", &[0, 1]));
        let mut dm = module(DataModuleConfig::new(64, 4).with_valid_size(ValidSize::Count(5)));
        dm.setup(Stage::Fit, &src).unwrap();
        assert_eq!(dm.val().unwrap().id(), "eyepacs_val");
        assert_eq!(dm.train().unwrap().len(), 10);
    }

    #[test]
    fn test_oversized_split_fails_without_side_effects() {
        let mut dm = module(DataModuleConfig::new(64, 4).with_valid_size(ValidSize::Count(50)));
        let result = dm.setup(Stage::Fit, &source(10));
        assert!(matches!(
            result,
            Err(FundusError::InvalidSplit {
                requested: 50,
                available: 10
            })
        ));
        assert!(dm.val().is_none());
        assert_eq!(dm.train().unwrap().id(), "eyepacs");
    }

    #[test]
    fn test_access_before_setup_fails() {
        let dm = module(DataModuleConfig::new(64, 4));
        assert_eq!(
            dm.train_dataloader().unwrap_err().to_string(),
            "Train dataset is not created yet."
        );
        assert_eq!(
            dm.val_dataloader(true, true).unwrap_err().to_string(),
            "Valid dataset is not created yet."
        );
        assert_eq!(
            dm.test_dataloader(false).unwrap_err().to_string(),
            "Test dataset is not created yet."
        );
        assert!(matches!(
            dm.class_weights(),
            Err(FundusError::NotSetUp(Split::Train))
        ));
        assert!(matches!(
            dm.class_count(),
            Err(FundusError::NotSetUp(Split::Train))
        ));
        assert!(dm.train().is_none() && dm.val().is_none() && dm.test().is_none());
    }

    #[test]
    fn test_class_weights_match_counts() {
        let mut dm = module(DataModuleConfig::new(64, 4));
        dm.setup(Stage::Fit, &source(9)).unwrap();
        let counts = dm.class_count().unwrap();
        let weights = dm.class_weights().unwrap();
        assert_eq!(counts, vec![3, 3, 3]);
        assert_eq!(weights.len(), counts.len());
        assert_eq!(weights.len(), dm.train().unwrap().num_classes());

        let tensor = dm
            .class_weights_tensor::<NdArray>(&Default::default())
            .unwrap();
        assert_eq!(tensor.dims(), [3]);
    }

    #[test]
    fn test_class_filter_applied_to_every_handle() {
        let config = DataModuleConfig::new(64, 4)
            .with_valid_size(ValidSize::Count(3))
            .with_classes_filter(vec![2, 0]);
        let mut dm = module(config);
        dm.setup_all(&multi_test_source()).unwrap();

        assert_eq!(dm.class_count().unwrap().len(), 2);
        for ds in dm.test().unwrap().iter() {
            assert_eq!(ds.classes_filter(), Some(&[2, 0][..]));
        }
        let kept: usize = dm.test().unwrap().iter().map(|d| d.len()).sum();
        assert_eq!(kept, 3);
        assert_eq!(dm.val().unwrap().classes_filter(), Some(&[2, 0][..]));
    }

    #[test]
    fn test_return_tag_reaches_all_test_handles() {
        let mut dm = module(DataModuleConfig::new(64, 4).with_valid_size(ValidSize::Count(2)));
        dm.setup_all(&multi_test_source()).unwrap();
        dm.return_tag(true);
        assert!(dm.train().unwrap().return_tag());
        assert!(dm.val().unwrap().return_tag());
        assert_eq!(dm.test().unwrap().len(), 3);
        assert!(dm.test().unwrap().iter().all(|d| d.return_tag()));

        let mut single = module(DataModuleConfig::new(64, 4));
        single.setup_all(&source(6)).unwrap();
        single.return_tag(true);
        assert!(single.test().unwrap().as_single().unwrap().return_tag());
    }

    #[test]
    fn test_finalize_marks_test_indices() {
        let mut dm = module(DataModuleConfig::new(64, 4));
        dm.setup_all(&multi_test_source()).unwrap();
        assert!(dm.test().unwrap().iter().all(|d| d.return_indices()));
        assert!(!dm.train().unwrap().return_indices());
        assert!(!dm.train().unwrap().pre_cache_transforms().is_empty());
    }

    #[test]
    fn test_loader_policies() {
        let config = DataModuleConfig::new(64, 8)
            .with_num_workers(NumWorkers::Fixed(4))
            .with_eval_batch_size(3)
            .with_valid_size(ValidSize::Count(2));
        let mut dm = FundusDataModule::new(
            config,
            AcceleratorInfo::new(2, 8),
            FundusTask::Classification,
        )
        .unwrap();
        dm.setup_all(&source(10)).unwrap();

        let train = dm.train_dataloader().unwrap();
        assert_eq!(train.config().batch_size, 4);
        assert!(train.config().shuffle);
        assert!(train.config().persistent_workers);
        assert!(train.config().pin_memory);

        let val = dm.val_dataloader(false, false).unwrap();
        assert!(!val.config().shuffle);
        assert!(!val.config().persistent_workers);
        assert!(dm.val_dataloader(true, true).unwrap().config().persistent_workers);

        let test = dm.test_dataloader(false).unwrap();
        let single = test.as_single().unwrap();
        assert_eq!(single.config().batch_size, 3);
        assert!(!single.config().shuffle);
        assert!(!single.config().persistent_workers);
    }

    #[test]
    fn test_multi_test_loaders_are_persistent() {
        let mut dm = module(DataModuleConfig::new(64, 4));
        dm.setup_all(&multi_test_source()).unwrap();
        let loaders = dm.test_dataloader(false).unwrap();
        assert_eq!(loaders.len(), 3);
        assert!(loaders.iter().all(|l| l.config().persistent_workers));
    }

    #[test]
    fn test_zero_workers_disable_persistence() {
        let config = DataModuleConfig::new(64, 4)
            .with_num_workers(NumWorkers::Fixed(0))
            .with_valid_size(ValidSize::Count(2));
        let mut dm = module(config);
        dm.setup(Stage::Fit, &source(6)).unwrap();
        assert!(!dm.train_dataloader().unwrap().config().persistent_workers);
        assert!(!dm.val_dataloader(true, true).unwrap().config().persistent_workers);
    }

    #[test]
    fn test_img_size_ops_output_shape() {
        let dm = module(DataModuleConfig::new((48, 64), 4));
        let ops = dm.img_size_ops();
        assert!(ops.mirrors_roi());
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for (w, h) in [(100, 30), (30, 100), (64, 48), (10, 10)] {
            let img: RgbImage = ImageBuffer::from_pixel(w, h, Rgb([100, 100, 100]));
            let roi = image::GrayImage::from_pixel(w, h, image::Luma([255]));
            let sample = crate::transforms::Sample::new(img).with_roi(roi);
            let out = ops.apply(sample, &mut rng).unwrap();
            assert_eq!(out.image.dimensions(), (64, 48));
            assert_eq!(out.roi.unwrap().dimensions(), (64, 48));
        }
    }

    #[test]
    fn test_img_size_ops_keeps_roi_aligned() {
        let dm = module(DataModuleConfig::new((48, 64), 4));
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for (w, h) in [(100, 30), (30, 100), (37, 53)] {
            let (bx, by, bw, bh) = (w / 4, h / 4, w / 2, h / 2);
            let inside = |x: u32, y: u32| x >= bx && x < bx + bw && y >= by && y < by + bh;
            let img: RgbImage = ImageBuffer::from_fn(w, h, |x, y| {
                if inside(x, y) {
                    Rgb([250, 250, 250])
                } else {
                    Rgb([0, 0, 0])
                }
            });
            let roi = image::GrayImage::from_fn(w, h, |x, y| {
                image::Luma([if inside(x, y) { 255 } else { 0 }])
            });
            let sample = crate::transforms::Sample::new(img).with_roi(roi);
            let out = dm.img_size_ops().apply(sample, &mut rng).unwrap();

            let crate::transforms::ImageData::U8(img) = &out.image else {
                panic!("resize and pad keep 8-bit images");
            };
            let roi = out.roi.unwrap();
            let mut bright = 0;
            for (x, y, p) in img.enumerate_pixels() {
                if p[0] > 240 {
                    bright += 1;
                    assert!(
                        roi.get_pixel(x, y)[0] > 0,
                        "bright pixel ({}, {}) outside roi for {}x{} input",
                        x,
                        y,
                        w,
                        h
                    );
                }
            }
            assert!(bright > 0);
        }
    }

    #[test]
    fn test_full_fraction_moves_everything_to_validation() {
        let config = DataModuleConfig::new(64, 4).with_valid_size(ValidSize::Fraction(1.0));
        let mut dm = module(config);
        dm.setup(Stage::Fit, &source(10)).unwrap();
        assert_eq!(dm.val().unwrap().len(), 10);
        assert!(dm.train().unwrap().is_empty());
        assert_eq!(dm.valid_size(), Some(ValidSize::Count(10)));
    }

    #[test]
    fn test_descriptor_contents() {
        let mut config = DataModuleConfig::new(32, 4).with_augmentation(DAType::Light);
        config.skip_autocrop = true;
        let dm = module(config);
        assert!(dm.autocrop_op().is_none());
        let norm = dm.normalize_and_cast_op();
        assert!(matches!(norm.ops()[1], TransformOp::ToTensor));
        assert_eq!(dm.augmentation_ops().ops().len(), 1);

        let dm = module(DataModuleConfig::new(32, 4));
        assert!(dm.autocrop_op().is_some());
        assert!(dm.augmentation_ops().is_empty());
    }

    #[test]
    fn test_end_to_end_batches() {
        crate::utils::logging::init_test_logging();
        let dir = TempDir::new().unwrap();
        for (class, n) in [("normal", 3), ("glaucoma", 2)] {
            let class_dir = dir.path().join("train").join(class);
            std::fs::create_dir_all(&class_dir).unwrap();
            for i in 0..n {
                let img: RgbImage = ImageBuffer::from_fn(40, 30, |x, y| {
                    if (10..30).contains(&x) && (5..25).contains(&y) {
                        Rgb([180, 90, 40])
                    } else {
                        Rgb([0, 0, 0])
                    }
                });
                img.save(class_dir.join(format!("{}.png", i))).unwrap();
            }
        }
        let source = crate::dataset::ImageFolderSource::new(dir.path().join("train"))
            .with_test(dir.path().join("train"));

        let config = DataModuleConfig::new(16, 2)
            .with_valid_size(ValidSize::Count(1))
            .with_num_workers(NumWorkers::Fixed(0))
            .with_cache(true);
        let mut dm = FundusDataModule::new(
            config,
            AcceleratorInfo::cpu_only(1),
            FundusTask::Segmentation,
        )
        .unwrap();
        dm.setup_all(&source).unwrap();
        assert_eq!(dm.class_count().unwrap().iter().sum::<usize>(), 4);

        let loader = dm.test_dataloader(false).unwrap();
        let loader = loader.as_single().unwrap().build::<NdArray>(Default::default());
        let batches: Vec<_> = loader.iter().collect();
        assert_eq!(batches.len(), 3);
        let first = &batches[0];
        assert_eq!(first.images.dims(), [2, 3, 16, 16]);
        assert_eq!(first.indices.as_ref().unwrap().dims(), [2]);
        assert_eq!(first.rois.as_ref().unwrap().dims(), [2, 16, 16]);
        assert!(first.labels.is_some());
    }
}
