//! Dataset discovery
//!
//! A [`DatasetSource`] knows how to build the train, validation and test handles for
//! one dataset. The data module calls it lazily from `setup`.
//!
//! Two on-disk layouts are supported out of the box:
//!
//! ```text
//! classification/            segmentation/
//! ├── normal/                ├── images/
//! │   ├── img_001.png        │   ├── 001.png
//! │   └── ...                │   └── ...
//! ├── glaucoma/              ├── masks/
//! │   └── ...                │   └── 001.png
//! └── ...                    └── roi/          (optional)
//!                                └── 001.png
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::DatasetParams;
use crate::dataset::handle::{FundusDataset, FundusRecord};
use crate::dataset::OneOrMany;
use crate::utils::error::{FundusError, Result};
use crate::utils::format_number;

const IMAGE_EXTENSIONS: [&str; 6] = ["jpg", "jpeg", "png", "bmp", "tif", "tiff"];

/// Builds dataset handles for each partition
pub trait DatasetSource {
    fn train(&self, params: &DatasetParams) -> Result<Option<FundusDataset>>;

    /// Explicit validation set; when absent one is split off the training set
    fn validation(&self, _params: &DatasetParams) -> Result<Option<FundusDataset>> {
        Ok(None)
    }

    fn test(&self, params: &DatasetParams) -> Result<Option<OneOrMany<FundusDataset>>>;
}

/// Source over handles that were built elsewhere
#[derive(Debug, Clone, Default)]
pub struct StaticSource {
    pub train: Option<FundusDataset>,
    pub validation: Option<FundusDataset>,
    pub test: Option<OneOrMany<FundusDataset>>,
}

impl DatasetSource for StaticSource {
    fn train(&self, _params: &DatasetParams) -> Result<Option<FundusDataset>> {
        Ok(self.train.clone())
    }

    fn validation(&self, _params: &DatasetParams) -> Result<Option<FundusDataset>> {
        Ok(self.validation.clone())
    }

    fn test(&self, _params: &DatasetParams) -> Result<Option<OneOrMany<FundusDataset>>> {
        Ok(self.test.clone())
    }
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_lowercase();
            IMAGE_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Image files directly inside `dir`, sorted by path
fn list_images(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| is_image(p))
        .collect();
    files.sort();
    files
}

fn dataset_id(root: &Path) -> String {
    root.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| root.to_string_lossy().to_string())
}

fn ensure_dir(path: &Path) -> Result<()> {
    if !path.is_dir() {
        return Err(FundusError::PathNotFound(path.to_path_buf()));
    }
    Ok(())
}

fn collect_tests(
    roots: &[PathBuf],
    scan: impl Fn(&Path) -> Result<FundusDataset>,
) -> Result<Option<OneOrMany<FundusDataset>>> {
    match roots {
        [] => Ok(None),
        [root] => Ok(Some(OneOrMany::Single(scan(root)?))),
        _ => {
            let sets = roots
                .iter()
                .map(|r| scan(r))
                .collect::<Result<Vec<_>>>()?;
            Ok(Some(OneOrMany::Many(sets)))
        }
    }
}

/// Classification dataset laid out as `root/<class_name>/<image>`
#[derive(Debug, Clone, Default)]
pub struct ImageFolderSource {
    pub train_root: Option<PathBuf>,
    pub validation_root: Option<PathBuf>,
    pub test_roots: Vec<PathBuf>,
}

impl ImageFolderSource {
    pub fn new<P: Into<PathBuf>>(train_root: P) -> Self {
        Self {
            train_root: Some(train_root.into()),
            ..Default::default()
        }
    }

    pub fn with_validation<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.validation_root = Some(root.into());
        self
    }

    /// Add a test root; more than one gives a multi-dataset test set
    pub fn with_test<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.test_roots.push(root.into());
        self
    }

    /// Scan one class-per-directory tree. Classes are indexed in name order.
    pub fn scan<P: AsRef<Path>>(root: P) -> Result<FundusDataset> {
        let root = root.as_ref();
        info!("Loading fundus classification dataset from: {:?}", root);
        ensure_dir(root)?;

        let mut class_names: Vec<String> = WalkDir::new(root)
            .min_depth(1)
            .max_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().is_dir())
            .map(|e| e.file_name().to_string_lossy().to_string())
            .collect();
        class_names.sort();

        let mut records = Vec::new();
        for (label, class_name) in class_names.iter().enumerate() {
            let images = list_images(&root.join(class_name));
            debug!(
                "Class '{}' (label {}): {} samples",
                class_name,
                label,
                images.len()
            );
            records.extend(
                images
                    .into_iter()
                    .map(|path| FundusRecord::classification(path, label)),
            );
        }

        info!(
            "Found {} classes and {} samples",
            class_names.len(),
            format_number(records.len())
        );

        Ok(FundusDataset::new(dataset_id(root), records).with_class_names(class_names))
    }
}

impl DatasetSource for ImageFolderSource {
    fn train(&self, _params: &DatasetParams) -> Result<Option<FundusDataset>> {
        self.train_root.as_deref().map(Self::scan).transpose()
    }

    fn validation(&self, _params: &DatasetParams) -> Result<Option<FundusDataset>> {
        self.validation_root.as_deref().map(Self::scan).transpose()
    }

    fn test(&self, _params: &DatasetParams) -> Result<Option<OneOrMany<FundusDataset>>> {
        collect_tests(&self.test_roots, |root| Self::scan(root))
    }
}

/// Segmentation dataset laid out as `root/images`, `root/masks` and optional `root/roi`,
/// paired by file stem
#[derive(Debug, Clone, Default)]
pub struct SegmentationFolderSource {
    pub train_root: Option<PathBuf>,
    pub validation_root: Option<PathBuf>,
    pub test_roots: Vec<PathBuf>,
    /// Names of the mask class ids, index = pixel value
    pub class_names: Vec<String>,
}

impl SegmentationFolderSource {
    pub fn new<P: Into<PathBuf>>(train_root: P) -> Self {
        Self {
            train_root: Some(train_root.into()),
            ..Default::default()
        }
    }

    pub fn with_validation<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.validation_root = Some(root.into());
        self
    }

    pub fn with_test<P: Into<PathBuf>>(mut self, root: P) -> Self {
        self.test_roots.push(root.into());
        self
    }

    pub fn with_class_names(mut self, class_names: Vec<String>) -> Self {
        self.class_names = class_names;
        self
    }

    fn by_stem(dir: &Path) -> HashMap<String, PathBuf> {
        list_images(dir)
            .into_iter()
            .filter_map(|p| {
                let stem = p.file_stem()?.to_string_lossy().to_string();
                Some((stem, p))
            })
            .collect()
    }

    /// Scan one images/masks(/roi) tree. Images without a mask are skipped.
    pub fn scan<P: AsRef<Path>>(root: P, class_names: &[String]) -> Result<FundusDataset> {
        let root = root.as_ref();
        info!("Loading fundus segmentation dataset from: {:?}", root);
        let image_dir = root.join("images");
        let mask_dir = root.join("masks");
        ensure_dir(&image_dir)?;
        ensure_dir(&mask_dir)?;

        let masks = Self::by_stem(&mask_dir);
        let rois = Self::by_stem(&root.join("roi"));

        let mut records = Vec::new();
        let mut skipped = 0;
        for image in list_images(&image_dir) {
            let Some(stem) = image.file_stem().map(|s| s.to_string_lossy().to_string()) else {
                continue;
            };
            let Some(mask) = masks.get(&stem) else {
                skipped += 1;
                continue;
            };
            let mut record = FundusRecord::segmentation(image, mask.clone());
            if let Some(roi) = rois.get(&stem) {
                record = record.with_roi(roi.clone());
            }
            records.push(record);
        }

        if skipped > 0 {
            warn!("Skipped {} images without a matching mask", skipped);
        }
        info!(
            "Found {} image/mask pairs ({} with roi)",
            format_number(records.len()),
            records.iter().filter(|r| r.roi.is_some()).count()
        );

        Ok(FundusDataset::new(dataset_id(root), records).with_class_names(class_names.to_vec()))
    }
}

impl DatasetSource for SegmentationFolderSource {
    fn train(&self, _params: &DatasetParams) -> Result<Option<FundusDataset>> {
        self.train_root
            .as_deref()
            .map(|root| Self::scan(root, &self.class_names))
            .transpose()
    }

    fn validation(&self, _params: &DatasetParams) -> Result<Option<FundusDataset>> {
        self.validation_root
            .as_deref()
            .map(|root| Self::scan(root, &self.class_names))
            .transpose()
    }

    fn test(&self, _params: &DatasetParams) -> Result<Option<OneOrMany<FundusDataset>>> {
        collect_tests(&self.test_roots, |root| Self::scan(root, &self.class_names))
    }
}
