//! Individual transform operations

use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::{ChwTensor, ImageData, Sample};
use crate::utils::error::{FundusError, Result};

/// Pixel intensity separating the fundus disc from the dark border
pub const DEFAULT_AUTOCROP_THRESHOLD: u8 = 15;

/// Fraction of a row/column that must be foreground for precise auto-crop
const PRECISE_MIN_FOREGROUND: f32 = 0.01;

/// A single step of a [`Compose`](super::Compose) pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum TransformOp {
    /// Crop the dark border around the fundus disc.
    ///
    /// Derives an roi mask from the foreground when the sample has none.
    AutoCrop { threshold: u8, precise: bool },
    /// Rescale so the longest side equals `max_size`, keeping the aspect ratio
    LongestMaxSize { max_size: u32 },
    /// Zero-pad (centred) up to at least `min_height` x `min_width`
    PadIfNeeded { min_height: u32, min_width: u32 },
    HorizontalFlip { p: f32 },
    VerticalFlip { p: f32 },
    /// `(x / 255 - mean) / std` per channel
    Normalize { mean: [f32; 3], std: [f32; 3] },
    /// Convert the image to CHW layout
    ToTensor,
}

impl TransformOp {
    pub fn name(&self) -> &'static str {
        match self {
            TransformOp::AutoCrop { .. } => "AutoCrop",
            TransformOp::LongestMaxSize { .. } => "LongestMaxSize",
            TransformOp::PadIfNeeded { .. } => "PadIfNeeded",
            TransformOp::HorizontalFlip { .. } => "HorizontalFlip",
            TransformOp::VerticalFlip { .. } => "VerticalFlip",
            TransformOp::Normalize { .. } => "Normalize",
            TransformOp::ToTensor => "ToTensor",
        }
    }

    pub fn is_random(&self) -> bool {
        matches!(
            self,
            TransformOp::HorizontalFlip { .. } | TransformOp::VerticalFlip { .. }
        )
    }

    pub(crate) fn apply<R: Rng + ?Sized>(
        &self,
        sample: Sample,
        roi_as_mask: bool,
        rng: &mut R,
    ) -> Result<Sample> {
        match self {
            TransformOp::AutoCrop { threshold, precise } => {
                Ok(autocrop(sample, *threshold, *precise, roi_as_mask))
            }
            TransformOp::LongestMaxSize { max_size } => {
                longest_max_size(sample, *max_size, roi_as_mask)
            }
            TransformOp::PadIfNeeded {
                min_height,
                min_width,
            } => Ok(pad_if_needed(sample, *min_height, *min_width, roi_as_mask)),
            TransformOp::HorizontalFlip { p } => {
                if rng.gen::<f32>() < *p {
                    Ok(map_geometry(
                        sample,
                        roi_as_mask,
                        ImageData::flip_horizontal,
                        |m| imageops::flip_horizontal(m),
                    ))
                } else {
                    Ok(sample)
                }
            }
            TransformOp::VerticalFlip { p } => {
                if rng.gen::<f32>() < *p {
                    Ok(map_geometry(
                        sample,
                        roi_as_mask,
                        ImageData::flip_vertical,
                        |m| imageops::flip_vertical(m),
                    ))
                } else {
                    Ok(sample)
                }
            }
            TransformOp::Normalize { mean, std } => normalize(sample, mean, std),
            TransformOp::ToTensor => {
                let tensor = to_chw(&sample.image);
                Ok(Sample {
                    tensor: Some(tensor),
                    ..sample
                })
            }
        }
    }
}

/// Apply the same geometric change to the image, the mask and (optionally) the roi
fn map_geometry<F, G>(sample: Sample, roi_as_mask: bool, on_image: F, on_mask: G) -> Sample
where
    F: Fn(&ImageData) -> ImageData,
    G: Fn(&GrayImage) -> GrayImage,
{
    let image = on_image(&sample.image);
    let mask = sample.mask.as_ref().map(&on_mask);
    let roi = if roi_as_mask {
        sample.roi.as_ref().map(&on_mask)
    } else {
        sample.roi
    };
    Sample {
        image,
        mask,
        roi,
        tensor: sample.tensor,
    }
}

fn longest_max_size(sample: Sample, max_size: u32, roi_as_mask: bool) -> Result<Sample> {
    if max_size == 0 {
        return Err(FundusError::InvalidInput(
            "LongestMaxSize requires max_size > 0".to_string(),
        ));
    }
    let (width, height) = sample.image.dimensions();
    let longest = width.max(height);
    if longest == max_size || longest == 0 {
        return Ok(sample);
    }
    let scale = max_size as f64 / longest as f64;
    let new_w = ((width as f64 * scale).round() as u32).max(1);
    let new_h = ((height as f64 * scale).round() as u32).max(1);

    Ok(map_geometry(
        sample,
        roi_as_mask,
        |img| img.resize(new_w, new_h),
        |m| imageops::resize(m, new_w, new_h, FilterType::Nearest),
    ))
}

fn pad_if_needed(sample: Sample, min_height: u32, min_width: u32, roi_as_mask: bool) -> Sample {
    let (width, height) = sample.image.dimensions();
    if width >= min_width && height >= min_height {
        return sample;
    }
    let new_w = width.max(min_width);
    let new_h = height.max(min_height);
    let left = (new_w - width) / 2;
    let top = (new_h - height) / 2;

    map_geometry(
        sample,
        roi_as_mask,
        |img| img.pad(new_w, new_h, left, top),
        |m| super::pad_buffer(m, new_w, new_h, left, top),
    )
}

fn normalize(sample: Sample, mean: &[f32; 3], std: &[f32; 3]) -> Result<Sample> {
    if std.iter().any(|s| *s == 0.0) {
        return Err(FundusError::InvalidInput(
            "Normalize std must be non-zero".to_string(),
        ));
    }
    let mut pixels = sample.image.to_unit_f32();
    for pixel in pixels.pixels_mut() {
        for c in 0..3 {
            pixel[c] = (pixel[c] - mean[c]) / std[c];
        }
    }
    Ok(Sample {
        image: ImageData::F32(pixels),
        ..sample
    })
}

/// CHW layout; 8-bit images keep their raw 0-255 values
pub(crate) fn to_chw(image: &ImageData) -> ChwTensor {
    let (width, height) = image.dimensions();
    let (w, h) = (width as usize, height as usize);
    let mut data = vec![0.0f32; 3 * h * w];

    match image {
        ImageData::U8(img) => {
            for (x, y, pixel) in img.enumerate_pixels() {
                let offset = y as usize * w + x as usize;
                for c in 0..3 {
                    data[c * h * w + offset] = pixel[c] as f32;
                }
            }
        }
        ImageData::F32(img) => {
            for (x, y, pixel) in img.enumerate_pixels() {
                let offset = y as usize * w + x as usize;
                for c in 0..3 {
                    data[c * h * w + offset] = pixel[c];
                }
            }
        }
    }

    ChwTensor {
        data,
        shape: [3, h, w],
    }
}

/// Foreground map: a pixel is foreground when any channel exceeds `threshold`
fn foreground(image: &ImageData, threshold: u8) -> GrayImage {
    match image {
        ImageData::U8(img) => ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
            let p = img.get_pixel(x, y);
            let fg = p.0.iter().any(|v| *v > threshold);
            Luma([if fg { 255 } else { 0 }])
        }),
        ImageData::F32(img) => {
            let t = threshold as f32 / 255.0;
            ImageBuffer::from_fn(img.width(), img.height(), |x, y| {
                let p = img.get_pixel(x, y);
                let fg = p.0.iter().any(|v| *v > t);
                Luma([if fg { 255 } else { 0 }])
            })
        }
    }
}

/// Bounding box `(x, y, width, height)` of the foreground, if any
fn foreground_bounds(fg: &GrayImage, precise: bool) -> Option<(u32, u32, u32, u32)> {
    let (width, height) = fg.dimensions();
    let mut row_counts = vec![0u32; height as usize];
    let mut col_counts = vec![0u32; width as usize];
    for (x, y, p) in fg.enumerate_pixels() {
        if p[0] > 0 {
            row_counts[y as usize] += 1;
            col_counts[x as usize] += 1;
        }
    }

    let (min_row, min_col) = if precise {
        (
            ((width as f32 * PRECISE_MIN_FOREGROUND).ceil() as u32).max(1),
            ((height as f32 * PRECISE_MIN_FOREGROUND).ceil() as u32).max(1),
        )
    } else {
        (1, 1)
    };

    let top = row_counts.iter().position(|c| *c >= min_row)? as u32;
    let bottom = row_counts.iter().rposition(|c| *c >= min_row)? as u32;
    let left = col_counts.iter().position(|c| *c >= min_col)? as u32;
    let right = col_counts.iter().rposition(|c| *c >= min_col)? as u32;

    Some((left, top, right - left + 1, bottom - top + 1))
}

fn autocrop(mut sample: Sample, threshold: u8, precise: bool, roi_as_mask: bool) -> Sample {
    let fg = foreground(&sample.image, threshold);
    let Some((x, y, w, h)) = foreground_bounds(&fg, precise) else {
        return sample;
    };

    if sample.roi.is_none() {
        sample.roi = Some(fg);
        let cropped = map_geometry(
            sample,
            true,
            |img| img.crop(x, y, w, h),
            |m| imageops::crop_imm(m, x, y, w, h).to_image(),
        );
        return cropped;
    }

    map_geometry(
        sample,
        roi_as_mask,
        |img| img.crop(x, y, w, h),
        |m| imageops::crop_imm(m, x, y, w, h).to_image(),
    )
}
