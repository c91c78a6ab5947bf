//! Upload Staging - materialize the content-addressed batch directory
//!
//! The batch directory is write-once: a second run of the same batch may
//! find its files already there and accepts them only when the bytes hash
//! to what the manifest recorded. A `.lock` file keeps two concurrent runs
//! from staging the same batch at once.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use crate::hashing::sha256_file;
use crate::manifest::StagedFile;

pub const LOCK_FILE: &str = ".lock";

#[derive(Debug, Error)]
pub enum StagingError {
    #[error("Batch is being staged by another run (pid {holder}), remove {path} if that run is gone")]
    Locked { path: String, holder: String },

    #[error("IO error staging {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("StagingConflict: {path} exists with sha256 {actual}, expected {expected}")]
    Conflict {
        path: String,
        expected: String,
        actual: String,
    },
}

fn io_err(path: &Path) -> impl FnOnce(std::io::Error) -> StagingError {
    let path = path.display().to_string();
    move |source| StagingError::Io { path, source }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageMethod {
    Hardlink,
    Copy,
    Existing,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StagingReport {
    pub linked: usize,
    pub copied: usize,
    pub existing: usize,
}

/// Exclusive claim on a batch directory, released on drop.
#[derive(Debug)]
pub struct BatchLock {
    path: PathBuf,
}

impl BatchLock {
    pub fn acquire(batch_dir: &Path) -> Result<Self, StagingError> {
        fs::create_dir_all(batch_dir).map_err(io_err(batch_dir))?;
        let path = batch_dir.join(LOCK_FILE);
        let mut file = match OpenOptions::new().write(true).create_new(true).open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                let holder = fs::read_to_string(&path)
                    .map(|s| s.trim().to_string())
                    .ok()
                    .filter(|s| !s.is_empty())
                    .unwrap_or_else(|| "unknown".to_string());
                return Err(StagingError::Locked {
                    path: path.display().to_string(),
                    holder,
                });
            }
            Err(e) => return Err(io_err(&path)(e)),
        };
        // pid lets an operator clear a stale lock by hand
        let _ = writeln!(file, "{}", std::process::id());
        Ok(Self { path })
    }
}

impl Drop for BatchLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            tracing::warn!(path = %self.path.display(), error = %e, "could not release batch lock");
        }
        // remove_dir only succeeds on an empty batch directory
        if let Some(dir) = self.path.parent() {
            let _ = fs::remove_dir(dir);
        }
    }
}

/// Hardlink `file.source` to `file.destination`, copying when linking is impossible.
pub fn stage_file(file: &StagedFile) -> Result<StageMethod, StagingError> {
    if let Some(parent) = file.destination.parent() {
        fs::create_dir_all(parent).map_err(io_err(parent))?;
    }

    match fs::hard_link(&file.source, &file.destination) {
        Ok(()) => Ok(StageMethod::Hardlink),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            verify_existing(file)?;
            Ok(StageMethod::Existing)
        }
        Err(e) => {
            // EXDEV and friends: fall back to a byte copy, which surfaces real IO errors itself.
            debug!(source = %file.source.display(), error = %e, "hardlink failed, copying");
            copy_file(file)?;
            Ok(StageMethod::Copy)
        }
    }
}

fn verify_existing(file: &StagedFile) -> Result<(), StagingError> {
    let actual = sha256_file(&file.destination).map_err(io_err(&file.destination))?;
    if actual != file.sha256 {
        return Err(StagingError::Conflict {
            path: file.destination.display().to_string(),
            expected: file.sha256.clone(),
            actual,
        });
    }
    debug!(path = %file.destination.display(), "already staged");
    Ok(())
}

fn copy_file(file: &StagedFile) -> Result<(), StagingError> {
    let mut partial = file.destination.clone().into_os_string();
    partial.push(".partial");
    let partial = PathBuf::from(partial);

    fs::copy(&file.source, &partial).map_err(io_err(&file.source))?;
    fs::rename(&partial, &file.destination).map_err(io_err(&file.destination))
}

/// Stage every file of one batch. Callers hold the batch's [`BatchLock`].
pub fn stage_files(files: &[StagedFile]) -> Result<StagingReport, StagingError> {
    let mut report = StagingReport::default();
    for file in files {
        match stage_file(file)? {
            StageMethod::Hardlink => report.linked += 1,
            StageMethod::Copy => report.copied += 1,
            StageMethod::Existing => report.existing += 1,
        }
    }
    Ok(report)
}
