//! Declarative image transform pipelines
//!
//! A [`Compose`] is an ordered list of [`TransformOp`]s. Building one has no side
//! effects; nothing happens until [`Compose::apply`] is called on a [`Sample`].
//!
//! Geometric operations (crop, resize, pad, flip) are applied in lockstep to the image,
//! the segmentation mask and, when registered as an additional target, the
//! region-of-interest mask. Masks always use nearest-neighbour interpolation so class
//! ids survive resizing.

pub mod ops;

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Pixel, Rgb32FImage, RgbImage};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::utils::error::{FundusError, Result};

pub use ops::TransformOp;

/// Pixel storage of a sample image.
///
/// Images stay 8-bit until a `Normalize` step turns them into floats.
#[derive(Debug, Clone, PartialEq)]
pub enum ImageData {
    U8(RgbImage),
    F32(Rgb32FImage),
}

impl ImageData {
    pub fn dimensions(&self) -> (u32, u32) {
        match self {
            ImageData::U8(img) => img.dimensions(),
            ImageData::F32(img) => img.dimensions(),
        }
    }

    pub fn width(&self) -> u32 {
        self.dimensions().0
    }

    pub fn height(&self) -> u32 {
        self.dimensions().1
    }

    pub(crate) fn resize(&self, width: u32, height: u32) -> Self {
        match self {
            ImageData::U8(img) => {
                ImageData::U8(imageops::resize(img, width, height, FilterType::Triangle))
            }
            ImageData::F32(img) => {
                ImageData::F32(imageops::resize(img, width, height, FilterType::Triangle))
            }
        }
    }

    pub(crate) fn pad(&self, width: u32, height: u32, left: u32, top: u32) -> Self {
        match self {
            ImageData::U8(img) => ImageData::U8(pad_buffer(img, width, height, left, top)),
            ImageData::F32(img) => ImageData::F32(pad_buffer(img, width, height, left, top)),
        }
    }

    pub(crate) fn crop(&self, x: u32, y: u32, width: u32, height: u32) -> Self {
        match self {
            ImageData::U8(img) => {
                ImageData::U8(imageops::crop_imm(img, x, y, width, height).to_image())
            }
            ImageData::F32(img) => {
                ImageData::F32(imageops::crop_imm(img, x, y, width, height).to_image())
            }
        }
    }

    pub(crate) fn flip_horizontal(&self) -> Self {
        match self {
            ImageData::U8(img) => ImageData::U8(imageops::flip_horizontal(img)),
            ImageData::F32(img) => ImageData::F32(imageops::flip_horizontal(img)),
        }
    }

    pub(crate) fn flip_vertical(&self) -> Self {
        match self {
            ImageData::U8(img) => ImageData::U8(imageops::flip_vertical(img)),
            ImageData::F32(img) => ImageData::F32(imageops::flip_vertical(img)),
        }
    }

    /// Pixel values in [0, 1]
    pub(crate) fn to_unit_f32(&self) -> Rgb32FImage {
        match self {
            ImageData::U8(img) => ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
                let p = img.get_pixel(x, y);
                image::Rgb([
                    p[0] as f32 / 255.0,
                    p[1] as f32 / 255.0,
                    p[2] as f32 / 255.0,
                ])
            }),
            ImageData::F32(img) => img.clone(),
        }
    }
}

/// Copy `img` onto a zero-filled canvas of `width` x `height` at (`left`, `top`)
pub(crate) fn pad_buffer<P>(
    img: &ImageBuffer<P, Vec<P::Subpixel>>,
    width: u32,
    height: u32,
    left: u32,
    top: u32,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
{
    let mut canvas = ImageBuffer::new(width, height);
    imageops::replace(&mut canvas, img, left as i64, top as i64);
    canvas
}

/// Image in CHW layout, produced by `ToTensor`
#[derive(Debug, Clone, PartialEq)]
pub struct ChwTensor {
    pub data: Vec<f32>,
    /// `[channels, height, width]`
    pub shape: [usize; 3],
}

/// A sample flowing through a transform pipeline
#[derive(Debug, Clone)]
pub struct Sample {
    pub image: ImageData,
    /// Segmentation mask holding one class id per pixel
    pub mask: Option<GrayImage>,
    /// Region-of-interest mask (non-zero inside the fundus disc)
    pub roi: Option<GrayImage>,
    /// Set once `ToTensor` has run
    pub tensor: Option<ChwTensor>,
}

impl Sample {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: ImageData::U8(image),
            mask: None,
            roi: None,
            tensor: None,
        }
    }

    pub fn with_mask(mut self, mask: GrayImage) -> Self {
        self.mask = Some(mask);
        self
    }

    pub fn with_roi(mut self, roi: GrayImage) -> Self {
        self.roi = Some(roi);
        self
    }

    /// The image in CHW layout, from `ToTensor` output or computed on the fly
    pub fn chw(&self) -> ChwTensor {
        match &self.tensor {
            Some(t) => t.clone(),
            None => ops::to_chw(&self.image),
        }
    }
}

/// Ordered, declarative transform pipeline
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Compose {
    ops: Vec<TransformOp>,
    /// Apply geometric operations to the roi mask as well
    roi_as_mask: bool,
}

impl Compose {
    pub fn new(ops: Vec<TransformOp>) -> Self {
        Self {
            ops,
            roi_as_mask: false,
        }
    }

    /// Register the roi mask as an additional mask target
    pub fn with_roi_target(mut self) -> Self {
        self.roi_as_mask = true;
        self
    }

    /// Concatenate pipelines in order; the roi is mirrored if any part mirrors it
    pub fn chain<I: IntoIterator<Item = Compose>>(parts: I) -> Self {
        let mut composed = Compose::default();
        for part in parts {
            composed.roi_as_mask |= part.roi_as_mask;
            composed.ops.extend(part.ops);
        }
        composed
    }

    pub fn ops(&self) -> &[TransformOp] {
        &self.ops
    }

    pub fn mirrors_roi(&self) -> bool {
        self.roi_as_mask
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Whether any step draws random numbers
    pub fn is_random(&self) -> bool {
        self.ops.iter().any(TransformOp::is_random)
    }

    /// Run every step on `sample` in order
    pub fn apply<R: Rng + ?Sized>(&self, mut sample: Sample, rng: &mut R) -> Result<Sample> {
        for op in &self.ops {
            if sample.tensor.is_some() {
                return Err(FundusError::InvalidInput(format!(
                    "{} cannot run after ToTensor",
                    op.name()
                )));
            }
            sample = op.apply(sample, self.roi_as_mask, rng)?;
        }
        Ok(sample)
    }
}
