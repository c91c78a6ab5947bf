//! Optimize Stage - staged images in, processed variant folders out
//!
//! Per-file isolation: one bad file is counted and reported, the batch goes
//! on unless `fail_fast` is set. Same bytes plus same profile always produce
//! the same processed tree, so re-runs only rewrite what changed.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::{DirEntry, WalkDir};

use crate::hashing::sha256_file;
use crate::layout::RECEIPT_FILE;
use crate::profiles::{TransformProfile, VariantFormat};
use crate::transform::{decode_source, source_has_alpha, transform_image, TransformError, VariantResult};
use crate::validation::{AssetOutput, Validator, ViolationSeverity};
use crate::ENGINE_VERSION;

pub const RECEIPT_SCHEMA_VERSION: u32 = 1;

/// Extensions picked up from the staged tree, compared case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "gif"];

#[derive(Debug, Error)]
pub enum OptimizeError {
    #[error("Required directory not found: {0}")]
    MissingDir(String),

    #[error("Cannot read staged tree: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{path}: {source}")]
    Transform {
        path: String,
        #[source]
        source: TransformError,
    },

    #[error("{path}: validation failed: {summary}")]
    Validation { path: String, summary: String },

    #[error("{path}: output folder {folder} already produced by {other}")]
    OutputCollision {
        path: String,
        folder: String,
        other: String,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    pub staged_root: PathBuf,
    pub processed_root: PathBuf,
    pub dry_run: bool,
    pub fail_fast: bool,
}

/// Diagnostic breadcrumb written next to the variants. Nothing downstream reads it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Receipt {
    pub schema_version: u32,
    pub source: String,
    pub source_sha256: String,
    pub source_width: u32,
    pub source_height: u32,
    pub source_has_alpha: bool,
    pub profile: ReceiptProfile,
    pub variants: Vec<ReceiptVariant>,
    pub generated_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptProfile {
    pub name: String,
    pub version: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiptVariant {
    pub key: String,
    pub format: VariantFormat,
    pub file: String,
    pub width: u32,
    pub height: u32,
    pub bytes: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileFailure {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeReport {
    pub dry_run: bool,
    pub succeeded: usize,
    pub failed: usize,
    pub files_written: usize,
    pub files_unchanged: usize,
    /// Set when `fail_fast` stopped the walk early.
    pub aborted: bool,
    pub failures: Vec<FileFailure>,
}

impl OptimizeReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

struct FileOutcome {
    written: usize,
    unchanged: usize,
}

pub struct OptimizeStage {
    profile: TransformProfile,
    validator: Validator,
    options: OptimizeOptions,
}

impl OptimizeStage {
    pub fn new(profile: TransformProfile, options: OptimizeOptions) -> Self {
        Self {
            profile,
            validator: Validator::new(),
            options,
        }
    }

    pub fn run(&self) -> Result<OptimizeReport, OptimizeError> {
        let staged = &self.options.staged_root;
        if !staged.is_dir() {
            return Err(OptimizeError::MissingDir(staged.display().to_string()));
        }

        let mut report = OptimizeReport {
            dry_run: self.options.dry_run,
            ..Default::default()
        };
        let mut claimed: HashMap<PathBuf, String> = HashMap::new();

        for entry in staged_images(staged) {
            let result = entry.map_err(OptimizeError::from).and_then(|path| {
                let rel = path.strip_prefix(staged).unwrap_or(&path).to_path_buf();
                let rel_display = rel.to_string_lossy().replace('\\', "/");
                let folder = rel.with_extension("");

                if let Some(other) = claimed.get(&folder) {
                    return Err(OptimizeError::OutputCollision {
                        path: rel_display,
                        folder: folder.to_string_lossy().replace('\\', "/"),
                        other: other.clone(),
                    });
                }
                claimed.insert(folder.clone(), rel_display.clone());

                let outcome = self.process_file(&path, &rel_display, &self.options.processed_root.join(&folder))?;
                Ok((rel_display, outcome))
            });

            match result {
                Ok((rel, outcome)) => {
                    info!(file = %rel, written = outcome.written, unchanged = outcome.unchanged, "optimized");
                    report.succeeded += 1;
                    report.files_written += outcome.written;
                    report.files_unchanged += outcome.unchanged;
                }
                Err(e) => {
                    warn!(error = %e, "file failed");
                    report.failed += 1;
                    report.failures.push(FileFailure {
                        path: failure_path(&e),
                        error: e.to_string(),
                    });
                    if self.options.fail_fast {
                        report.aborted = true;
                        break;
                    }
                }
            }
        }

        Ok(report)
    }

    fn process_file(&self, path: &Path, rel: &str, out_dir: &Path) -> Result<FileOutcome, OptimizeError> {
        let transform_err = |source| OptimizeError::Transform {
            path: rel.to_string(),
            source,
        };

        let img = decode_source(path).map_err(transform_err)?;
        let has_alpha = source_has_alpha(&img);
        let variants = transform_image(&img, &self.profile).map_err(transform_err)?;

        let output = AssetOutput {
            source_width: img.width(),
            source_height: img.height(),
            source_has_alpha: has_alpha,
            variants: &variants,
        };
        let validation = self.validator.validate(&output, &self.profile);
        for v in validation.violations.iter().filter(|v| v.severity == ViolationSeverity::Info) {
            debug!(file = %rel, rule = %v.rule, variant = ?v.variant, "{}", v.message);
        }
        if !validation.valid {
            return Err(OptimizeError::Validation {
                path: rel.to_string(),
                summary: validation.error_summary(),
            });
        }

        let receipt = Receipt {
            schema_version: RECEIPT_SCHEMA_VERSION,
            source: rel.to_string(),
            source_sha256: sha256_file(path).map_err(|source| OptimizeError::Io {
                path: rel.to_string(),
                source,
            })?,
            source_width: img.width(),
            source_height: img.height(),
            source_has_alpha: has_alpha,
            profile: ReceiptProfile {
                name: self.profile.name.clone(),
                version: self.profile.version,
            },
            variants: variants.iter().map(receipt_variant).collect(),
            generated_by: format!("stickerforge-core {ENGINE_VERSION}"),
        };

        if self.options.dry_run {
            debug!(file = %rel, folder = %out_dir.display(), "dry run, nothing written");
            return Ok(FileOutcome {
                written: 0,
                unchanged: 0,
            });
        }

        self.write_outputs(out_dir, &variants, &receipt)
    }

    fn write_outputs(
        &self,
        out_dir: &Path,
        variants: &[VariantResult],
        receipt: &Receipt,
    ) -> Result<FileOutcome, OptimizeError> {
        let io_err = |p: &Path| {
            let path = p.display().to_string();
            move |source: std::io::Error| OptimizeError::Io { path, source }
        };

        fs::create_dir_all(out_dir).map_err(io_err(out_dir))?;

        let mut receipt_json = serde_json::to_vec_pretty(receipt)?;
        receipt_json.push(b'\n');

        let files = variants
            .iter()
            .map(|v| (out_dir.join(variant_file(v)), v.data.as_slice()))
            .chain(std::iter::once((out_dir.join(RECEIPT_FILE), receipt_json.as_slice())));

        let mut outcome = FileOutcome {
            written: 0,
            unchanged: 0,
        };
        for (path, bytes) in files {
            if write_if_changed(&path, bytes).map_err(io_err(&path))? {
                outcome.written += 1;
            } else {
                debug!(path = %path.display(), "unchanged");
                outcome.unchanged += 1;
            }
        }
        Ok(outcome)
    }
}

fn variant_file(v: &VariantResult) -> String {
    format!("{}.{}", v.key, v.format.extension())
}

fn receipt_variant(v: &VariantResult) -> ReceiptVariant {
    ReceiptVariant {
        key: v.key.clone(),
        format: v.format,
        file: variant_file(v),
        width: v.width,
        height: v.height,
        bytes: v.data.len() as u64,
    }
}

fn failure_path(e: &OptimizeError) -> String {
    match e {
        OptimizeError::Io { path, .. }
        | OptimizeError::Transform { path, .. }
        | OptimizeError::Validation { path, .. }
        | OptimizeError::OutputCollision { path, .. } => path.clone(),
        OptimizeError::Walk(w) => w.path().map(|p| p.display().to_string()).unwrap_or_default(),
        OptimizeError::MissingDir(p) => p.clone(),
        OptimizeError::Serialization(_) => String::new(),
    }
}

/// Returns false when `path` already holds exactly `bytes`.
///
/// Changed files are replaced by rename, never truncated in place: staged
/// upload batches may hardlink the old inode and must keep its bytes.
pub fn write_if_changed(path: &Path, bytes: &[u8]) -> std::io::Result<bool> {
    if let Ok(existing) = fs::read(path) {
        if existing == bytes {
            return Ok(false);
        }
    }
    let mut partial = path.as_os_str().to_owned();
    partial.push(".partial");
    fs::write(&partial, bytes)?;
    fs::rename(&partial, path)?;
    Ok(true)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.file_name().to_str().map_or(false, |s| s.starts_with('.'))
}

fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map_or(false, |e| IMAGE_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(e)))
}

/// Lazy depth-first walk of every recognized image under `root`, in file-name order.
pub fn staged_images(root: &Path) -> impl Iterator<Item = Result<PathBuf, walkdir::Error>> {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !is_hidden(e))
        .filter_map(|entry| match entry {
            Ok(e) if e.file_type().is_file() && is_image(e.path()) => Some(Ok(e.into_path())),
            Ok(_) => None,
            Err(err) => Some(Err(err)),
        })
}
