//! # Fundus DataModule
//!
//! Data loading for fundus (retinal) image classification and segmentation with the
//! Burn framework.
//!
//! ## Features
//!
//! - **Lifecycle**: configure once, build datasets lazily in `setup`, hand out loaders
//! - **Deterministic validation split** seeded with 42
//! - **Transform descriptors**: auto-crop, resize + pad to a fixed size, normalization
//! - **Class statistics**: per-class counts and loss weights from the training set
//! - **Burn integration**: `Dataset`, `Batcher` and `DataLoaderBuilder` wiring
//!
//! ## Modules
//!
//! - `config`: Data module configuration and hardware facts
//! - `dataset`: Dataset handles, splitting, folder discovery, Burn integration
//! - `transforms`: Declarative image transform pipelines
//! - `datamodule`: The data module, loader descriptors, task variants, class weighting
//! - `utils`: Logging and error handling
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fundus_datamodule::{
//!     AcceleratorInfo, DataModuleConfig, FundusDataModule, FundusTask, ImageFolderSource,
//!     ValidSize,
//! };
//!
//! let config = DataModuleConfig::new(512, 32).with_valid_size(ValidSize::Fraction(0.1));
//! let mut dm = FundusDataModule::new(config, AcceleratorInfo::detect(), FundusTask::Classification)?;
//! dm.setup_all(&ImageFolderSource::new("data/eyepacs/train").with_test("data/idrid"))?;
//!
//! let weights = dm.class_weights()?;
//! let train = dm.train_dataloader()?.build::<MyBackend>(device);
//! ```

pub mod config;
pub mod datamodule;
pub mod dataset;
pub mod transforms;
pub mod utils;

// Re-export commonly used items for convenience
pub use config::{
    AcceleratorInfo, DAType, DataModuleConfig, DatasetParams, ImgSize, Normalization,
    NumWorkers, ValidSize,
};
pub use datamodule::{
    class_weighting, BatchLoader, ClassWeighting, FundusDataModule, FundusTask, LoaderConfig,
    Stage,
};
pub use dataset::{
    DatasetSource, FundusBatch, FundusBatcher, FundusDataset, FundusItem, FundusRecord,
    ImageFolderSource, OneOrMany, SegmentationFolderSource, StaticSource,
};
pub use transforms::{Compose, Sample, TransformOp};
pub use utils::error::{FundusError, Result, Split};
