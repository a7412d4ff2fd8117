//! Data augmentation presets
//!
//! Augmentations only ever run on the training set. Validation and test sets are
//! evaluated clean.
//!
//! Presets are limited to geometric flips, which are applied in lockstep to the
//! image, mask and roi so segmentation targets stay aligned.

use serde::{Deserialize, Serialize};

use crate::config::DAType;
use crate::transforms::{Compose, TransformOp};

/// Flip probabilities of an augmentation preset
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AugmentationConfig {
    /// Probability of applying horizontal flip (0.0 - 1.0)
    pub horizontal_flip_prob: f32,
    /// Probability of applying vertical flip (0.0 - 1.0)
    pub vertical_flip_prob: f32,
}

impl Default for AugmentationConfig {
    fn default() -> Self {
        Self::medium()
    }
}

impl AugmentationConfig {
    pub fn light() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.0,
        }
    }

    pub fn medium() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.2,
        }
    }

    pub fn heavy() -> Self {
        Self {
            horizontal_flip_prob: 0.5,
            vertical_flip_prob: 0.5,
        }
    }

    /// Disable all augmentations (for validation/inference)
    pub fn none() -> Self {
        Self {
            horizontal_flip_prob: 0.0,
            vertical_flip_prob: 0.0,
        }
    }

    pub fn for_type(da_type: DAType) -> Self {
        match da_type {
            DAType::None => Self::none(),
            DAType::Light => Self::light(),
            DAType::Medium => Self::medium(),
            DAType::Heavy => Self::heavy(),
        }
    }

    /// Pipeline for this preset; steps with zero probability are left out
    pub fn to_compose(&self) -> Compose {
        let mut ops = Vec::new();
        if self.horizontal_flip_prob > 0.0 {
            ops.push(TransformOp::HorizontalFlip {
                p: self.horizontal_flip_prob,
            });
        }
        if self.vertical_flip_prob > 0.0 {
            ops.push(TransformOp::VerticalFlip {
                p: self.vertical_flip_prob,
            });
        }
        Compose::new(ops).with_roi_target()
    }
}
