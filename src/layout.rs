//! On-disk layout
//!
//! Every stage receives an explicit [`AssetLayout`]. Walking upward from the
//! working directory is only a convenience for the CLI's defaults.

use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// `package.json` names that mark the repository root.
pub const KNOWN_PROJECT_NAMES: &[&str] = &["stickerforge", "stickerforge-web"];

pub const PACK_SUFFIX: &str = ".source.json";
pub const RECEIPT_FILE: &str = "_receipt.json";
pub const UPLOAD_PLAN_FILE: &str = "_upload.json";

#[derive(Debug, Error)]
pub enum LayoutError {
    #[error("Repo root not found: no package.json named one of {names:?} above {start}")]
    RootNotFound { start: String, names: Vec<String> },

    #[error("Required directory not found: {0}")]
    MissingDir(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetLayout {
    pub root: PathBuf,
    pub staged: PathBuf,
    pub processed: PathBuf,
    pub packs: PathBuf,
    pub generated: PathBuf,
    pub uploads: PathBuf,
}

impl AssetLayout {
    /// Standard `data/assets/...` tree under `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let assets = root.join("data").join("assets");
        Self {
            staged: assets.join("staged"),
            processed: assets.join("processed"),
            packs: assets.join("manifests").join("packs"),
            generated: assets.join("manifests").join("generated"),
            uploads: assets.join("uploads"),
            root,
        }
    }

    pub fn manifest_path(&self, batch_id: &str) -> PathBuf {
        self.generated.join(format!("manifest.{batch_id}.json"))
    }

    pub fn batch_dir(&self, batch_id: &str) -> PathBuf {
        self.uploads.join(batch_id)
    }

    pub fn upload_plan_path(&self, batch_id: &str) -> PathBuf {
        self.batch_dir(batch_id).join(UPLOAD_PLAN_FILE)
    }

    /// Every `*.source.json` in the packs directory, sorted by name.
    pub fn pack_files(&self) -> Result<Vec<PathBuf>, LayoutError> {
        if !self.packs.is_dir() {
            return Err(LayoutError::MissingDir(self.packs.display().to_string()));
        }
        let mut packs = vec![];
        for entry in fs::read_dir(&self.packs)? {
            let path = entry?.path();
            let is_pack = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.ends_with(PACK_SUFFIX));
            if is_pack && path.is_file() {
                packs.push(path);
            }
        }
        packs.sort();
        Ok(packs)
    }

    /// `path` relative to the repo root with forward slashes, or as-is when outside it.
    pub fn display_relative(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.root).unwrap_or(path);
        rel.to_string_lossy().replace('\\', "/")
    }
}

#[derive(Deserialize)]
struct PackageJson {
    #[serde(default)]
    name: Option<String>,
}

/// Walk upward from `start` to the first directory whose `package.json` names a known project.
pub fn discover_repo_root(start: &Path, names: &[&str]) -> Result<PathBuf, LayoutError> {
    for dir in start.ancestors() {
        let candidate = dir.join("package.json");
        let Ok(content) = fs::read_to_string(&candidate) else {
            continue;
        };
        // An unparseable package.json is someone else's problem; keep walking.
        let Ok(pkg) = serde_json::from_str::<PackageJson>(&content) else {
            continue;
        };
        if pkg.name.as_deref().map_or(false, |n| names.contains(&n)) {
            tracing::debug!(root = %dir.display(), "discovered repo root");
            return Ok(dir.to_path_buf());
        }
    }
    Err(LayoutError::RootNotFound {
        start: start.display().to_string(),
        names: names.iter().map(|s| s.to_string()).collect(),
    })
}
