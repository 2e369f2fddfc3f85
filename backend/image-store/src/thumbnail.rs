//! Thumbnail engine - renders derived variants from original images
//!
//! Pipeline: cheap nearest-neighbour halving while the source is more than twice
//! the box, optional centre crop to the box's aspect ratio, Lanczos3 resample,
//! JPEG encode. Output is a pure function of (bytes, box, fit, quality).
//!
//! Use `render_async` from async code; it runs on the blocking thread pool.

use crate::error::{Result, StoreError};
use crate::models::VariantSpec;
use bytes::Bytes;
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageOutputFormat};
use std::io::Cursor;
use tracing::debug;

/// Default JPEG quality for derived variants
pub const DEFAULT_QUALITY: u8 = 75;

/// Encoded thumbnail plus its final dimensions
#[derive(Debug, Clone)]
pub struct Thumbnail {
    pub data: Bytes,
    pub width: u32,
    pub height: u32,
}

/// Stateless renderer parameterised only by encode quality
#[derive(Debug, Clone, Copy)]
pub struct ThumbnailEngine {
    quality: u8,
}

impl Default for ThumbnailEngine {
    fn default() -> Self {
        Self::new(DEFAULT_QUALITY)
    }
}

impl ThumbnailEngine {
    pub fn new(quality: u8) -> Self {
        Self {
            quality: quality.clamp(1, 100),
        }
    }

    pub fn quality(&self) -> u8 {
        self.quality
    }

    /// Decode `original` and render it into `spec`'s box (blocking)
    pub fn render(&self, original: &[u8], spec: &VariantSpec) -> Result<Thumbnail> {
        let img = image::load_from_memory(original)
            .map_err(|e| StoreError::Encode(format!("Failed to decode image: {e}")))?;
        self.resize(img, spec)
    }

    /// Render on the blocking pool so the async runtime keeps serving
    pub async fn render_async(self, original: Bytes, spec: VariantSpec) -> Result<Thumbnail> {
        tokio::task::spawn_blocking(move || self.render(&original, &spec))
            .await
            .map_err(|e| StoreError::Encode(format!("Thumbnail task failed: {e}")))?
    }

    /// Downsample, optionally crop, resample and encode an already decoded image
    pub fn resize(&self, img: DynamicImage, spec: &VariantSpec) -> Result<Thumbnail> {
        let (orig_w, orig_h) = img.dimensions();
        let (box_w, box_h) = (spec.width, spec.height);

        let mut img = pre_downsample(img, box_w, box_h);
        if spec.fit {
            img = center_crop(img, box_w, box_h);
        }

        let (cur_w, cur_h) = img.dimensions();
        let (new_w, new_h) = if spec.fit {
            (box_w, box_h)
        } else {
            bounded_dimensions(cur_w, cur_h, box_w, box_h)
        };
        if (new_w, new_h) != (cur_w, cur_h) {
            img = img.resize_exact(new_w, new_h, FilterType::Lanczos3);
        }

        let data = encode_jpeg(&img, self.quality)?;

        debug!(
            original_width = orig_w,
            original_height = orig_h,
            width = new_w,
            height = new_h,
            fit = spec.fit,
            size = data.len(),
            "Thumbnail rendered"
        );

        Ok(Thumbnail {
            data,
            width: new_w,
            height: new_h,
        })
    }
}

/// Halve (nearest neighbour) while the image exceeds twice the box in both axes
fn pre_downsample(img: DynamicImage, box_w: u32, box_h: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let mut factor: u32 = 1;
    while w / factor > box_w.saturating_mul(2) && h / factor > box_h.saturating_mul(2) {
        factor *= 2;
    }
    if factor == 1 {
        return img;
    }
    img.resize_exact((w / factor).max(1), (h / factor).max(1), FilterType::Nearest)
}

/// Crop the longer axis around the centre so the aspect ratio matches the box
fn center_crop(img: DynamicImage, box_w: u32, box_h: u32) -> DynamicImage {
    let (w, h) = img.dimensions();
    let w_ratio = w as f64 / box_w as f64;
    let h_ratio = h as f64 / box_h as f64;

    if h_ratio > w_ratio {
        let half = box_h as f64 * w_ratio / 2.0;
        let y1 = (h as f64 / 2.0 - half).max(0.0) as u32;
        let y2 = ((h as f64 / 2.0 + half) as u32).min(h);
        img.crop_imm(0, y1, w, (y2 - y1).max(1))
    } else if w_ratio > h_ratio {
        let half = box_w as f64 * h_ratio / 2.0;
        let x1 = (w as f64 / 2.0 - half).max(0.0) as u32;
        let x2 = ((w as f64 / 2.0 + half) as u32).min(w);
        img.crop_imm(x1, 0, (x2 - x1).max(1), h)
    } else {
        img
    }
}

/// Largest size within the box that keeps the aspect ratio; never upscales
fn bounded_dimensions(width: u32, height: u32, box_w: u32, box_h: u32) -> (u32, u32) {
    let (mut w, mut h) = (width as f64, height as f64);
    if w > box_w as f64 {
        h = (h * box_w as f64 / w).round().max(1.0);
        w = box_w as f64;
    }
    if h > box_h as f64 {
        w = (w * box_h as f64 / h).round().max(1.0);
        h = box_h as f64;
    }
    (w as u32, h as u32)
}

fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Bytes> {
    // JPEG has no alpha channel
    let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_to(&mut Cursor::new(&mut buf), ImageOutputFormat::Jpeg(quality))
        .map_err(|e| StoreError::Encode(format!("Failed to encode JPEG: {e}")))?;
    Ok(Bytes::from(buf))
}
