//! Image preprocessing for the inference service.
//!
//! Every image is fitted into a fixed canvas before it is sent: the aspect
//! ratio is preserved, the decoded source is subsampled so large inputs are
//! not scaled from full resolution, the result is area-averaged down to the
//! target box and centered on a transparent canvas.

use std::io::Cursor;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use image::{DynamicImage, ImageError, ImageFormat, ImageReader, Rgba, RgbaImage, imageops};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EmbeddingError, Result};

/// Canvas and size limits used when preparing images.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImagePreprocessingSpec {
    /// Canvas width sent to the service.
    pub width: u32,

    /// Canvas height sent to the service.
    pub height: u32,

    /// Largest accepted source width.
    pub max_width: u32,

    /// Largest accepted source height.
    pub max_height: u32,

    /// Output container format, as a file extension (`png`, `jpg`, ...).
    pub format: String,
}

impl Default for ImagePreprocessingSpec {
    fn default() -> Self {
        Self {
            width: 224,
            height: 224,
            max_width: 3000,
            max_height: 2000,
            format: "png".to_string(),
        }
    }
}

impl ImagePreprocessingSpec {
    /// Size of the box the source is scaled into, preserving aspect ratio.
    ///
    /// Never returns a zero dimension, even for extreme aspect ratios.
    pub fn target_size(&self, width: u32, height: u32) -> (u32, u32) {
        let aspect_ratio = width as f32 / height as f32;
        let (target_width, target_height) = if aspect_ratio > 1.0 {
            (self.width, (self.width as f32 / aspect_ratio) as u32)
        } else {
            ((self.height as f32 * aspect_ratio) as u32, self.height)
        };
        (target_width.max(1), target_height.max(1))
    }

    /// Check the source dimensions against the configured limits.
    pub fn check_size(&self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 || width > self.max_width || height > self.max_height {
            return Err(EmbeddingError::ImageDecode(format!(
                "invalid image size: {width}x{height}"
            )));
        }
        Ok(())
    }

    fn output_format(&self) -> Result<ImageFormat> {
        ImageFormat::from_extension(self.format.trim()).ok_or_else(|| {
            EmbeddingError::ImageIo(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                format!("unsupported image format: {}", self.format),
            ))
        })
    }
}

/// Integer subsampling factors for scaling `source` down to `target`.
pub fn subsampling(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    (
        (source.0 / target.0).max(1),
        (source.1 / target.1).max(1),
    )
}

/// Prepare raw image bytes and return the base64 payload for the service.
pub fn encode_image(bytes: &[u8], spec: &ImagePreprocessingSpec) -> Result<String> {
    let (width, height) = open(bytes)?.into_dimensions().map_err(map_image_error)?;
    spec.check_size(width, height)?;

    let target = spec.target_size(width, height);
    let (step_x, step_y) = subsampling((width, height), target);
    debug!(
        "image: {width}x{height}, target: {}x{}, subsampling: {step_x}x{step_y}",
        target.0, target.1
    );

    // The decoders have no subsampled read, so the source is decoded at full
    // resolution. Memory is bounded by `max_width` x `max_height`, checked
    // from the header above.
    let source = open(bytes)?.decode().map_err(map_image_error)?.to_rgba8();
    let sampled = subsample(&source, step_x, step_y);
    let scaled = area_average(&sampled, target.0, target.1);

    let mut canvas = RgbaImage::new(spec.width, spec.height);
    let x = (i64::from(spec.width) - i64::from(target.0)) / 2;
    let y = (i64::from(spec.height) - i64::from(target.1)) / 2;
    imageops::replace(&mut canvas, &scaled, x, y);

    let format = spec.output_format()?;
    let canvas = match format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
        _ => DynamicImage::ImageRgba8(canvas),
    };

    let mut out = Cursor::new(Vec::new());
    canvas.write_to(&mut out, format).map_err(|err| match err {
        ImageError::IoError(err) => EmbeddingError::ImageIo(err),
        other => EmbeddingError::ImageIo(std::io::Error::other(other)),
    })?;

    Ok(STANDARD.encode(out.into_inner()))
}

fn open(bytes: &[u8]) -> Result<ImageReader<Cursor<&[u8]>>> {
    let reader = ImageReader::new(Cursor::new(bytes)).with_guessed_format()?;
    if reader.format().is_none() {
        return Err(EmbeddingError::ImageDecode("no image".to_string()));
    }
    Ok(reader)
}

fn map_image_error(err: ImageError) -> EmbeddingError {
    match err {
        ImageError::IoError(err) => EmbeddingError::ImageIo(err),
        other => EmbeddingError::ImageDecode(other.to_string()),
    }
}

/// Keep every `step_x`-th column and `step_y`-th row, starting at the origin.
fn subsample(source: &RgbaImage, step_x: u32, step_y: u32) -> RgbaImage {
    if step_x == 1 && step_y == 1 {
        return source.clone();
    }
    let width = source.width().div_ceil(step_x);
    let height = source.height().div_ceil(step_y);
    RgbaImage::from_fn(width, height, |x, y| *source.get_pixel(x * step_x, y * step_y))
}

/// Box-filter resize: each output pixel is the area-weighted mean of the
/// source pixels it covers.
fn area_average(source: &RgbaImage, width: u32, height: u32) -> RgbaImage {
    let columns = coverage(source.width(), width);
    let rows = coverage(source.height(), height);

    let mut out = RgbaImage::new(width, height);
    for (y, row) in rows.iter().enumerate() {
        for (x, column) in columns.iter().enumerate() {
            let mut sum = [0f32; 4];
            let mut total = 0f32;
            for &(sy, wy) in row {
                for &(sx, wx) in column {
                    let weight = wx * wy;
                    let pixel = source.get_pixel(sx, sy);
                    for (acc, channel) in sum.iter_mut().zip(pixel.0) {
                        *acc += f32::from(channel) * weight;
                    }
                    total += weight;
                }
            }
            let pixel = sum.map(|v| (v / total).round().clamp(0.0, 255.0) as u8);
            out.put_pixel(x as u32, y as u32, Rgba(pixel));
        }
    }
    out
}

/// For each destination index, the source indices it overlaps and the
/// overlap length.
fn coverage(source: u32, destination: u32) -> Vec<Vec<(u32, f32)>> {
    let scale = source as f32 / destination as f32;
    (0..destination)
        .map(|d| {
            let start = d as f32 * scale;
            let end = start + scale;
            let mut spans = Vec::new();
            let mut s = start.floor() as u32;
            while s < source && (s as f32) < end {
                let overlap = end.min(s as f32 + 1.0) - start.max(s as f32);
                if overlap > 0.0 {
                    spans.push((s, overlap));
                }
                s += 1;
            }
            if spans.is_empty() {
                spans.push((s.min(source - 1), 1.0));
            }
            spans
        })
        .collect()
}
