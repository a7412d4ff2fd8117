//! Task variants
//!
//! The task decides how the data module's transform descriptors are attached to
//! the dataset handles once they exist.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::datamodule::FundusDataModule;
use crate::transforms::Compose;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FundusTask {
    /// Image-level labels
    #[default]
    Classification,
    /// Per-pixel masks; items also carry the roi
    Segmentation,
}

impl FundusTask {
    /// Final hook run by `setup_all` after every partition exists
    pub fn finalize_composition(self, dm: &mut FundusDataModule) {
        mark_test_indices(dm);

        let mut pre_cache = Vec::new();
        if let Some(autocrop) = dm.autocrop_op() {
            pre_cache.push(autocrop);
        }
        pre_cache.push(dm.img_size_ops());
        let pre_cache = Compose::chain(pre_cache);

        let eval_post = dm.normalize_and_cast_op();
        let train_post = Compose::chain([dm.augmentation_ops(), eval_post.clone()]);
        let emit_roi = matches!(self, FundusTask::Segmentation);

        if let Some(train) = dm.train.as_mut() {
            train.set_transforms(pre_cache.clone(), train_post);
        }
        for ds in dm.eval_handles_mut() {
            ds.set_transforms(pre_cache.clone(), eval_post.clone());
        }
        for ds in dm.handles_mut() {
            ds.set_return_roi(emit_roi);
        }

        debug!(
            "{:?} pipelines attached: pre-cache {:?}, post-cache {:?}",
            self,
            pre_cache.ops().iter().map(|op| op.name()).collect::<Vec<_>>(),
            eval_post.ops().iter().map(|op| op.name()).collect::<Vec<_>>()
        );
    }
}

/// Shared by every task: test items report their position
pub(crate) fn mark_test_indices(dm: &mut FundusDataModule) {
    if let Some(test) = dm.test.as_mut() {
        for ds in test.iter_mut() {
            ds.set_return_indices(true);
        }
    }
}
