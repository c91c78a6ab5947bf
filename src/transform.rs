//! Transformer - one source image in, one encoded buffer per variant out
//!
//! Pure: nothing here touches the processed tree. The Optimize stage owns all writes.
//!
//! Alpha: WebP variants carry alpha only when the source actually uses it,
//! since libwebp drops an all-opaque alpha plane. PNG variants keep the
//! source's alpha channel whenever it has one, opaque or not.

use std::io::Cursor;
use std::path::Path;

use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use image::{DynamicImage, GenericImageView, ImageReader};
use thiserror::Error;

use crate::profiles::{TransformProfile, VariantFormat, VariantSpec};

#[derive(Debug, Error)]
pub enum TransformError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Image codec error: {0}")]
    Codec(#[from] image::ImageError),

    #[error("Encoding variant {key} failed: {message}")]
    Encode { key: String, message: String },

    #[error("VariantSizeExceeded: variant {key} is {width}x{height}, ceiling is {max}px")]
    VariantSizeExceeded {
        key: String,
        width: u32,
        height: u32,
        max: u32,
    },
}

/// One encoded rendition, still in memory.
#[derive(Debug, Clone)]
pub struct VariantResult {
    pub key: String,
    pub format: VariantFormat,
    pub width: u32,
    pub height: u32,
    pub has_alpha: bool,
    pub data: Vec<u8>,
}

/// Decode a source file, sniffing the format from its bytes rather than its extension.
pub fn decode_source(path: &Path) -> Result<DynamicImage, TransformError> {
    Ok(ImageReader::open(path)?.with_guessed_format()?.decode()?)
}

/// True when the image carries an alpha channel that is actually used.
///
/// Encoders may drop a channel whose every sample is opaque, so a fully
/// opaque RGBA source counts as having no alpha.
pub fn source_has_alpha(img: &DynamicImage) -> bool {
    if !img.color().has_alpha() {
        return false;
    }
    img.to_rgba8().pixels().any(|p| p.0[3] != u8::MAX)
}

/// Dimensions that fit `width`x`height` inside a `max`x`max` box, aspect ratio preserved.
pub fn fit_within(width: u32, height: u32, max: u32, forbid_enlarge: bool) -> (u32, u32) {
    let longest = width.max(height);
    if longest == 0 || (forbid_enlarge && longest <= max) {
        return (width, height);
    }
    let scale = max as f64 / longest as f64;
    let w = ((width as f64 * scale).round() as u32).clamp(1, max);
    let h = ((height as f64 * scale).round() as u32).clamp(1, max);
    (w, h)
}

/// Transform the image at `input_path` into every variant of `profile`.
pub fn transform(
    input_path: &Path,
    profile: &TransformProfile,
) -> Result<Vec<VariantResult>, TransformError> {
    let img = decode_source(input_path)?;
    transform_image(&img, profile)
}

pub fn transform_image(
    img: &DynamicImage,
    profile: &TransformProfile,
) -> Result<Vec<VariantResult>, TransformError> {
    // 8-bit sRGB; RGBA only when alpha is in use, except PNG keeps any alpha channel.
    let (normalized, png_source) = if source_has_alpha(img) {
        (DynamicImage::ImageRgba8(img.to_rgba8()), None)
    } else if img.color().has_alpha() {
        (
            DynamicImage::ImageRgb8(img.to_rgb8()),
            Some(DynamicImage::ImageRgba8(img.to_rgba8())),
        )
    } else {
        (DynamicImage::ImageRgb8(img.to_rgb8()), None)
    };

    profile
        .variants
        .iter()
        .map(|spec| {
            let source = match (spec.format, &png_source) {
                (VariantFormat::Png, Some(rgba)) => rgba,
                _ => &normalized,
            };
            render_variant(source, spec, profile)
        })
        .collect()
}

fn render_variant(
    img: &DynamicImage,
    spec: &VariantSpec,
    profile: &TransformProfile,
) -> Result<VariantResult, TransformError> {
    let (src_w, src_h) = img.dimensions();
    let (w, h) = fit_within(src_w, src_h, spec.max_size_px, profile.forbid_enlarge);
    let resized = if (w, h) == (src_w, src_h) {
        img.clone()
    } else {
        img.resize_exact(w, h, FilterType::Lanczos3)
    };

    // Re-encoding from raw pixels never carries EXIF/ICC/XMP across.
    let data = match spec.format {
        VariantFormat::Webp => encode_webp(&resized, spec, profile.webp_quality)?,
        VariantFormat::Png => encode_png(&resized, profile.png_compression_level)?,
    };

    // The encoder's output is authoritative, not the resize request.
    let (width, height, has_alpha) = probe(&data)?;
    check_ceiling(spec, width, height)?;

    Ok(VariantResult {
        key: spec.key.clone(),
        format: spec.format,
        width,
        height,
        has_alpha,
        data,
    })
}

/// Hard ceiling on encoded output: neither edge may exceed the variant's `maxSizePx`.
pub fn check_ceiling(spec: &VariantSpec, width: u32, height: u32) -> Result<(), TransformError> {
    if width > spec.max_size_px || height > spec.max_size_px {
        return Err(TransformError::VariantSizeExceeded {
            key: spec.key.clone(),
            width,
            height,
            max: spec.max_size_px,
        });
    }
    Ok(())
}

fn encode_webp(img: &DynamicImage, spec: &VariantSpec, quality: u8) -> Result<Vec<u8>, TransformError> {
    let encode_err = |message: String| TransformError::Encode {
        key: spec.key.clone(),
        message,
    };
    let encoder = webp::Encoder::from_image(img).map_err(|e| encode_err(e.to_string()))?;
    // `Encoder::encode` unwraps libwebp's status; go through the fallible path.
    let memory = encoder
        .encode_simple(false, quality as f32)
        .map_err(|e| encode_err(format!("{e:?}")))?;
    Ok(memory.to_vec())
}

fn encode_png(img: &DynamicImage, level: u8) -> Result<Vec<u8>, TransformError> {
    let compression = match level {
        0..=2 => CompressionType::Fast,
        3..=6 => CompressionType::Default,
        _ => CompressionType::Best,
    };
    let mut buf = Vec::new();
    let encoder = PngEncoder::new_with_quality(&mut buf, compression, PngFilter::Adaptive);
    img.write_with_encoder(encoder)?;
    Ok(buf)
}

/// Width, height and alpha presence of an encoded buffer.
pub fn probe(data: &[u8]) -> Result<(u32, u32, bool), TransformError> {
    let img = ImageReader::new(Cursor::new(data))
        .with_guessed_format()?
        .decode()?;
    Ok((img.width(), img.height(), img.color().has_alpha()))
}
