//! Manifest Stage - processed tree + pack index in, batch artifacts out
//!
//! build -> (unless dry run) lock, stage, write plan, write manifest.
//! Building is a function of on-disk content only; see [`crate::batch`].

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::batch::{compute_batch_id, HashTriple};
use crate::hashing::CanonicalError;
use crate::inspect::{inspect_sticker, InspectError};
use crate::layout::{AssetLayout, LayoutError};
use crate::manifest::{
    build_manifest, build_upload_plan, GeneratedManifest, InspectedSticker, StagedFile, UploadPlan,
};
use crate::pack::{load_pack_index, LoadedPack, PackError};
use crate::profiles::ProfileRegistry;
use crate::staging::{stage_files, BatchLock, StagingError, StagingReport};

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error(transparent)]
    Layout(#[from] LayoutError),

    #[error("Pack {pack}: {source}")]
    Pack {
        pack: String,
        #[source]
        source: PackError,
    },

    #[error("Sticker {sticker_id} uses unknown profile {profile:?}")]
    UnknownProfile { sticker_id: String, profile: String },

    #[error(transparent)]
    Inspect(#[from] InspectError),

    #[error("Batch identity: {0}")]
    Canonical(#[from] CanonicalError),

    #[error(transparent)]
    Staging(#[from] StagingError),

    #[error("IO error writing {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

#[derive(Debug, Clone)]
pub struct CatalogOptions {
    pub layout: AssetLayout,
    pub object_prefix_base: String,
    pub dry_run: bool,
}

/// Everything one manifest run produces, before any of it touches disk.
#[derive(Debug, Clone)]
pub struct BuiltBatch {
    pub pack: LoadedPack,
    pub batch_id: String,
    pub manifest: GeneratedManifest,
    pub plan: UploadPlan,
    pub files: Vec<StagedFile>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PackOutcome {
    pub pack: String,
    pub pack_id: String,
    pub batch_id: String,
    pub stickers: usize,
    pub objects: usize,
    pub manifest_path: String,
    pub upload_plan_path: String,
    pub dry_run: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging: Option<StagingReport>,
    /// An identical manifest from an earlier run was left in place.
    pub manifest_reused: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct PackFailure {
    pub pack: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogReport {
    pub succeeded: usize,
    pub failed: usize,
    pub packs: Vec<PackOutcome>,
    pub failures: Vec<PackFailure>,
}

impl CatalogReport {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

pub struct CatalogStage {
    registry: ProfileRegistry,
    options: CatalogOptions,
}

impl CatalogStage {
    pub fn new(registry: ProfileRegistry, options: CatalogOptions) -> Self {
        Self { registry, options }
    }

    pub fn layout(&self) -> &AssetLayout {
        &self.options.layout
    }

    /// Load, validate and inspect one pack and derive all its artifacts in memory.
    pub fn build(&self, pack_path: &Path, created_at: DateTime<Utc>) -> Result<BuiltBatch, CatalogError> {
        let layout = &self.options.layout;
        let pack = load_pack_index(pack_path).map_err(|source| CatalogError::Pack {
            pack: layout.display_relative(pack_path),
            source,
        })?;
        let index = &pack.index;

        let mut stickers = Vec::with_capacity(index.stickers.len());
        for entry in &index.stickers {
            let profile_name = index.effective_profile(entry);
            let profile = self.registry.get(profile_name).ok_or_else(|| CatalogError::UnknownProfile {
                sticker_id: entry.sticker_id.clone(),
                profile: profile_name.to_string(),
            })?;

            let variants = inspect_sticker(&layout.processed, &entry.sticker_id, &entry.input_ref, profile)?;
            debug!(sticker = %entry.sticker_id, variants = variants.len(), "inspected");

            stickers.push(InspectedSticker {
                sticker_id: entry.sticker_id.clone(),
                name: entry.name.clone(),
                description: entry.description.clone(),
                input_ref: entry.input_ref.clone(),
                tags: index.effective_tags(entry),
                profile: profile.name.clone(),
                profile_version: profile.version,
                variants,
            });
        }

        let triples: Vec<HashTriple> = stickers
            .iter()
            .flat_map(|s| {
                s.variants
                    .iter()
                    .map(|v| HashTriple::new(&s.sticker_id, &v.key, &v.info.sha256))
            })
            .collect();
        let batch_id = compute_batch_id(&pack.document, &triples)?;

        let manifest = build_manifest(layout, &pack, &stickers, &batch_id, created_at);
        let (plan, files) = build_upload_plan(
            layout,
            &index.pack.pack_id,
            &stickers,
            &batch_id,
            &self.options.object_prefix_base,
            created_at,
        );

        Ok(BuiltBatch {
            pack,
            batch_id,
            manifest,
            plan,
            files,
        })
    }

    /// Build one pack and, unless dry-running, stage and write its artifacts.
    pub fn run_pack(&self, pack_path: &Path) -> Result<PackOutcome, CatalogError> {
        let layout = &self.options.layout;
        let built = self.build(pack_path, Utc::now())?;
        let manifest_path = layout.manifest_path(&built.batch_id);
        let plan_path = layout.upload_plan_path(&built.batch_id);

        let mut outcome = PackOutcome {
            pack: layout.display_relative(pack_path),
            pack_id: built.pack.index.pack.pack_id.clone(),
            batch_id: built.batch_id.clone(),
            stickers: built.manifest.stickers.len(),
            objects: built.plan.objects.len(),
            manifest_path: layout.display_relative(&manifest_path),
            upload_plan_path: layout.display_relative(&plan_path),
            dry_run: self.options.dry_run,
            staging: None,
            manifest_reused: false,
        };

        if self.options.dry_run {
            info!(
                pack = %outcome.pack,
                batch_id = %outcome.batch_id,
                objects = outcome.objects,
                "dry run, would write {} and stage {} files",
                outcome.manifest_path,
                built.files.len()
            );
            return Ok(outcome);
        }

        {
            let _lock = BatchLock::acquire(&layout.batch_dir(&built.batch_id))?;
            outcome.staging = Some(stage_files(&built.files)?);
            write_artifact(&plan_path, &built.plan)?;
        }

        fs::create_dir_all(&layout.generated).map_err(|source| CatalogError::Io {
            path: layout.generated.display().to_string(),
            source,
        })?;
        outcome.manifest_reused = !write_artifact(&manifest_path, &built.manifest)?;

        info!(
            pack = %outcome.pack,
            batch_id = %outcome.batch_id,
            stickers = outcome.stickers,
            objects = outcome.objects,
            reused = outcome.manifest_reused,
            "manifest written"
        );
        Ok(outcome)
    }

    /// Every `*.source.json` in the packs directory; one failing pack does not stop the rest.
    pub fn run_all(&self) -> Result<CatalogReport, CatalogError> {
        let packs = self.options.layout.pack_files()?;
        if packs.is_empty() {
            warn!(dir = %self.options.layout.packs.display(), "no packs found");
        }

        let mut report = CatalogReport::default();
        for path in packs {
            match self.run_pack(&path) {
                Ok(outcome) => {
                    report.succeeded += 1;
                    report.packs.push(outcome);
                }
                Err(e) => {
                    warn!(pack = %path.display(), error = %e, "pack failed");
                    report.failed += 1;
                    report.failures.push(PackFailure {
                        pack: self.options.layout.display_relative(&path),
                        error: e.to_string(),
                    });
                }
            }
        }
        Ok(report)
    }

    /// A single pack; failure is the whole invocation's failure.
    pub fn run_single(&self, pack_path: &Path) -> CatalogReport {
        let mut report = CatalogReport::default();
        match self.run_pack(pack_path) {
            Ok(outcome) => {
                report.succeeded = 1;
                report.packs.push(outcome);
            }
            Err(e) => {
                warn!(pack = %pack_path.display(), error = %e, "pack failed");
                report.failed = 1;
                report.failures.push(PackFailure {
                    pack: self.options.layout.display_relative(pack_path),
                    error: e.to_string(),
                });
            }
        }
        report
    }
}

/// Write `value` as pretty JSON unless the file already matches it apart from `createdAt`.
/// Returns whether anything was written.
fn write_artifact<T: Serialize>(path: &Path, value: &T) -> Result<bool, CatalogError> {
    let fresh = serde_json::to_value(value)?;
    if let Some(existing) = fs::read(path)
        .ok()
        .and_then(|bytes| serde_json::from_slice::<Value>(&bytes).ok())
    {
        if without_created_at(existing) == without_created_at(fresh.clone()) {
            debug!(path = %path.display(), "identical artifact already present");
            return Ok(false);
        }
    }

    let mut json = serde_json::to_vec_pretty(&fresh)?;
    json.push(b'\n');
    let mut partial = PathBuf::from(path).into_os_string();
    partial.push(".partial");
    let io_err = |source| CatalogError::Io {
        path: path.display().to_string(),
        source,
    };
    fs::write(&partial, json).map_err(io_err)?;
    fs::rename(&partial, path).map_err(io_err)?;
    Ok(true)
}

fn without_created_at(mut v: Value) -> Value {
    if let Some(obj) = v.as_object_mut() {
        obj.remove("createdAt");
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_write_artifact_ignores_created_at() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.json");
        assert!(write_artifact(&path, &json!({"createdAt": "t1", "x": 1})).unwrap());
        assert!(!write_artifact(&path, &json!({"createdAt": "t2", "x": 1})).unwrap());
        assert!(write_artifact(&path, &json!({"createdAt": "t3", "x": 2})).unwrap());

        let stored: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(stored["x"], 2);
    }

    #[test]
    fn test_run_all_requires_packs_dir() {
        let dir = tempfile::tempdir().unwrap();
        let stage = CatalogStage::new(
            ProfileRegistry::default(),
            CatalogOptions {
                layout: AssetLayout::new(dir.path()),
                object_prefix_base: "stickers".into(),
                dry_run: true,
            },
        );
        assert!(matches!(stage.run_all(), Err(CatalogError::Layout(_))));
    }
}
