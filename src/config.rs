//! Data Module Configuration
//!
//! Defines the configuration accepted by [`FundusDataModule`](crate::FundusDataModule):
//! image size, batch sizes, worker count, augmentation mode, caching and auto-crop
//! switches, plus the free-form parameters forwarded to dataset construction.
//!
//! Hardware facts (accelerator and CPU counts) are not read from process-global state
//! by the data module. They are passed in as an [`AcceleratorInfo`] value so the batch
//! arithmetic can be exercised under any simulated device layout.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::utils::error::{FundusError, Result};

/// Target image size, either square or an explicit `[height, width]` pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ImgSize {
    Square(u32),
    Pair([u32; 2]),
}

impl ImgSize {
    /// Normalize to a `(height, width)` pair
    pub fn to_pair(self) -> (u32, u32) {
        match self {
            ImgSize::Square(s) => (s, s),
            ImgSize::Pair([h, w]) => (h, w),
        }
    }
}

impl From<u32> for ImgSize {
    fn from(size: u32) -> Self {
        ImgSize::Square(size)
    }
}

impl From<(u32, u32)> for ImgSize {
    fn from((h, w): (u32, u32)) -> Self {
        ImgSize::Pair([h, w])
    }
}

/// Size of the validation partition carved out of the training set
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ValidSize {
    /// Absolute number of samples
    Count(usize),
    /// Fraction of the training set length, truncated towards zero
    Fraction(f64),
}

impl ValidSize {
    /// Resolve to an absolute sample count for a training set of `total` samples
    pub fn resolve(self, total: usize) -> usize {
        match self {
            ValidSize::Count(n) => n,
            ValidSize::Fraction(f) => (total as f64 * f) as usize,
        }
    }

    /// Whether this size requests any validation samples at all
    pub fn is_enabled(self) -> bool {
        match self {
            ValidSize::Count(n) => n > 0,
            ValidSize::Fraction(f) => f > 0.0,
        }
    }
}

/// Number of background loader workers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawNumWorkers", into = "RawNumWorkers")]
pub enum NumWorkers {
    Fixed(usize),
    /// CPU count divided by accelerator count
    Auto,
}

impl Default for NumWorkers {
    fn default() -> Self {
        NumWorkers::Fixed(4)
    }
}

impl NumWorkers {
    /// Resolve to a concrete worker count
    pub fn resolve(self, accelerators: &AcceleratorInfo) -> usize {
        match self {
            NumWorkers::Fixed(n) => n,
            NumWorkers::Auto => accelerators.cpu_count / accelerators.device_count.max(1),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawNumWorkers {
    Count(usize),
    Keyword(String),
}

impl TryFrom<RawNumWorkers> for NumWorkers {
    type Error = String;

    fn try_from(raw: RawNumWorkers) -> std::result::Result<Self, Self::Error> {
        match raw {
            RawNumWorkers::Count(n) => Ok(NumWorkers::Fixed(n)),
            RawNumWorkers::Keyword(k) if k.eq_ignore_ascii_case("auto") => Ok(NumWorkers::Auto),
            RawNumWorkers::Keyword(k) => Err(format!("invalid num_workers value '{}'", k)),
        }
    }
}

impl From<NumWorkers> for RawNumWorkers {
    fn from(workers: NumWorkers) -> Self {
        match workers {
            NumWorkers::Fixed(n) => RawNumWorkers::Count(n),
            NumWorkers::Auto => RawNumWorkers::Keyword("auto".to_string()),
        }
    }
}

/// Data augmentation preset applied to the training set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DAType {
    #[default]
    None,
    Light,
    Medium,
    Heavy,
}

impl std::fmt::Display for DAType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DAType::None => write!(f, "none"),
            DAType::Light => write!(f, "light"),
            DAType::Medium => write!(f, "medium"),
            DAType::Heavy => write!(f, "heavy"),
        }
    }
}

/// ImageNet channel means [R, G, B]
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
/// ImageNet channel standard deviations [R, G, B]
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// Per-channel normalization parameters lookup
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Normalization {
    #[default]
    ImageNet,
    /// Only rescale to [0, 1]
    Unit,
    Custom { mean: [f32; 3], std: [f32; 3] },
}

impl Normalization {
    /// Resolve to `(mean, std)` in the [0, 1] pixel range
    pub fn mean_std(&self) -> ([f32; 3], [f32; 3]) {
        match self {
            Normalization::ImageNet => (IMAGENET_MEAN, IMAGENET_STD),
            Normalization::Unit => ([0.0; 3], [1.0; 3]),
            Normalization::Custom { mean, std } => (*mean, *std),
        }
    }
}

/// Hardware facts used to size batches and worker pools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    /// Number of visible accelerators (0 on CPU-only hosts)
    pub device_count: usize,
    /// Number of logical CPUs
    pub cpu_count: usize,
}

impl AcceleratorInfo {
    pub fn new(device_count: usize, cpu_count: usize) -> Self {
        Self {
            device_count,
            cpu_count,
        }
    }

    /// CPU-only host with the given CPU count
    pub fn cpu_only(cpu_count: usize) -> Self {
        Self::new(0, cpu_count)
    }

    /// Inspect the current host
    pub fn detect() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self::new(detect_device_count(), cpu_count)
    }
}

/// Count visible NVIDIA devices.
///
/// `CUDA_VISIBLE_DEVICES` takes precedence; otherwise `/dev/nvidiaN` nodes are counted.
fn detect_device_count() -> usize {
    if let Ok(visible) = std::env::var("CUDA_VISIBLE_DEVICES") {
        return visible
            .split(',')
            .map(str::trim)
            .filter(|d| !d.is_empty() && *d != "-1")
            .count();
    }

    #[cfg(target_os = "linux")]
    {
        std::fs::read_dir("/dev")
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| {
                        e.file_name()
                            .to_str()
                            .and_then(|name| name.strip_prefix("nvidia"))
                            .map(|rest| !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit()))
                            .unwrap_or(false)
                    })
                    .count()
            })
            .unwrap_or(0)
    }

    #[cfg(not(target_os = "linux"))]
    {
        0
    }
}

/// Free-form parameters forwarded to dataset construction
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DatasetParams {
    /// Memoize loaded and resized samples
    #[serde(default)]
    pub use_cache: bool,
    /// Keep only these class indices (classification)
    #[serde(default)]
    pub classes_filter: Option<Vec<usize>>,
    /// Anything else a dataset source understands
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl DatasetParams {
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.extra.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.extra.get(key).and_then(|v| v.as_bool())
    }
}

/// Complete data module configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataModuleConfig {
    pub img_size: ImgSize,
    /// Global batch size, divided across accelerators
    pub batch_size: usize,
    #[serde(default)]
    pub valid_size: Option<ValidSize>,
    #[serde(default)]
    pub num_workers: NumWorkers,
    #[serde(default)]
    pub use_cache: bool,
    #[serde(default = "default_true")]
    pub persistent_workers: bool,
    #[serde(default)]
    pub precise_autocrop: bool,
    /// Defaults to the (undivided) `batch_size`
    #[serde(default)]
    pub eval_batch_size: Option<usize>,
    #[serde(default)]
    pub data_augmentation_type: DAType,
    #[serde(default)]
    pub skip_autocrop: bool,
    #[serde(default)]
    pub normalization: Normalization,
    /// Seed for loader shuffling
    #[serde(default = "default_shuffle_seed")]
    pub shuffle_seed: u64,
    #[serde(default)]
    pub dataset_params: DatasetParams,
}

fn default_true() -> bool {
    true
}

fn default_shuffle_seed() -> u64 {
    42
}

impl DataModuleConfig {
    /// Minimal configuration; everything else takes its default
    pub fn new(img_size: impl Into<ImgSize>, batch_size: usize) -> Self {
        Self {
            img_size: img_size.into(),
            batch_size,
            valid_size: None,
            num_workers: NumWorkers::default(),
            use_cache: false,
            persistent_workers: true,
            precise_autocrop: false,
            eval_batch_size: None,
            data_augmentation_type: DAType::None,
            skip_autocrop: false,
            normalization: Normalization::default(),
            shuffle_seed: default_shuffle_seed(),
            dataset_params: DatasetParams::default(),
        }
    }

    pub fn with_valid_size(mut self, valid_size: ValidSize) -> Self {
        self.valid_size = Some(valid_size);
        self
    }

    pub fn with_num_workers(mut self, num_workers: NumWorkers) -> Self {
        self.num_workers = num_workers;
        self
    }

    pub fn with_eval_batch_size(mut self, eval_batch_size: usize) -> Self {
        self.eval_batch_size = Some(eval_batch_size);
        self
    }

    pub fn with_augmentation(mut self, da_type: DAType) -> Self {
        self.data_augmentation_type = da_type;
        self
    }

    pub fn with_cache(mut self, use_cache: bool) -> Self {
        self.use_cache = use_cache;
        self
    }

    pub fn with_classes_filter(mut self, classes: Vec<usize>) -> Self {
        self.dataset_params.classes_filter = Some(classes);
        self
    }

    /// Check value ranges that serde cannot express
    pub fn validate(&self) -> Result<()> {
        let (h, w) = self.img_size.to_pair();
        if h == 0 || w == 0 {
            return Err(FundusError::Config(format!(
                "img_size must be non-zero, got {}x{}",
                h, w
            )));
        }
        if self.batch_size == 0 {
            return Err(FundusError::Config("batch_size must be at least 1".to_string()));
        }
        if self.eval_batch_size == Some(0) {
            return Err(FundusError::Config(
                "eval_batch_size must be at least 1".to_string(),
            ));
        }
        if let Some(ValidSize::Fraction(f)) = self.valid_size {
            if !(0.0..=1.0).contains(&f) {
                return Err(FundusError::Config(format!(
                    "valid_size fraction must be in [0, 1], got {}",
                    f
                )));
            }
        }
        let (_, std) = self.normalization.mean_std();
        if std.iter().any(|s| *s <= 0.0) {
            return Err(FundusError::Config(
                "normalization std must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(FundusError::PathNotFound(path.to_path_buf()));
        }
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }
}
