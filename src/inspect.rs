//! Variant Inspector - size, dimensions and content hash of processed files
//!
//! Always read from disk. Manifests must describe what is there now, not
//! what a receipt claims was written.

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::hashing::sha256_file;
use crate::pack::normalize_input_ref;
use crate::profiles::{TransformProfile, VariantFormat, VariantSpec};

#[cfg(feature = "test-hooks")]
use std::sync::atomic::{AtomicU32, Ordering};

#[cfg(feature = "test-hooks")]
static INSPECTION_CALL_COUNT: AtomicU32 = AtomicU32::new(0);

#[cfg(feature = "test-hooks")]
pub fn get_inspection_call_count() -> u32 {
    INSPECTION_CALL_COUNT.load(Ordering::SeqCst)
}

#[cfg(feature = "test-hooks")]
pub fn reset_inspection_call_count() {
    INSPECTION_CALL_COUNT.store(0, Ordering::SeqCst);
}

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("Processed folder missing for inputRef {input_ref:?} (sticker {sticker_id}): {path}")]
    MissingFolder {
        sticker_id: String,
        input_ref: String,
        path: String,
    },

    #[error("MissingVariant: sticker {sticker_id} has no {variant} variant at {path}")]
    MissingVariant {
        sticker_id: String,
        variant: String,
        path: String,
    },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot read dimensions of {path}: {source}")]
    Dimensions {
        path: String,
        #[source]
        source: image::ImageError,
    },
}

/// Facts about one processed variant file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VariantInfo {
    pub format: VariantFormat,
    pub mime: String,
    /// Relative to the processed root, forward slashes.
    pub path: String,
    pub sha256: String,
    pub bytes: u64,
    pub width: u32,
    pub height: u32,
}

/// One inspected variant, keyed by its VariantSpec key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectedVariant {
    pub key: String,
    pub file_name: String,
    pub local_path: PathBuf,
    pub info: VariantInfo,
}

pub fn processed_folder(processed_root: &Path, input_ref: &str) -> PathBuf {
    processed_root.join(normalize_input_ref(input_ref))
}

/// Inspect every variant `profile` requires for one sticker, in profile order.
pub fn inspect_sticker(
    processed_root: &Path,
    sticker_id: &str,
    input_ref: &str,
    profile: &TransformProfile,
) -> Result<Vec<InspectedVariant>, InspectError> {
    let folder = processed_folder(processed_root, input_ref);
    if !folder.is_dir() {
        return Err(InspectError::MissingFolder {
            sticker_id: sticker_id.to_string(),
            input_ref: input_ref.to_string(),
            path: folder.display().to_string(),
        });
    }

    profile
        .variants
        .iter()
        .map(|spec| inspect_variant(processed_root, sticker_id, input_ref, spec))
        .collect()
}

pub fn inspect_variant(
    processed_root: &Path,
    sticker_id: &str,
    input_ref: &str,
    spec: &VariantSpec,
) -> Result<InspectedVariant, InspectError> {
    #[cfg(feature = "test-hooks")]
    INSPECTION_CALL_COUNT.fetch_add(1, Ordering::SeqCst);

    let file_name = spec.file_name();
    let rel = format!("{}/{}", normalize_input_ref(input_ref), file_name);
    let local_path = processed_root.join(&rel);
    let display = local_path.display().to_string();

    let meta = match fs::metadata(&local_path) {
        Ok(meta) if meta.is_file() => meta,
        Ok(_) => {
            return Err(InspectError::MissingVariant {
                sticker_id: sticker_id.to_string(),
                variant: spec.key.clone(),
                path: display,
            })
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(InspectError::MissingVariant {
                sticker_id: sticker_id.to_string(),
                variant: spec.key.clone(),
                path: display,
            })
        }
        Err(source) => return Err(InspectError::Io { path: display, source }),
    };

    let (width, height) = image::image_dimensions(&local_path).map_err(|source| InspectError::Dimensions {
        path: display.clone(),
        source,
    })?;
    let sha256 = sha256_file(&local_path).map_err(|source| InspectError::Io {
        path: display.clone(),
        source,
    })?;

    Ok(InspectedVariant {
        key: spec.key.clone(),
        file_name,
        local_path,
        info: VariantInfo {
            format: spec.format,
            mime: spec.format.mime().to_string(),
            path: rel,
            sha256,
            bytes: meta.len(),
            width,
            height,
        },
    })
}
