//! Pack Index - authored catalog descriptor
//!
//! Loading is purely structural. Whether an entry's processed folder exists
//! is the Variant Inspector's concern.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fs;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

use crate::profiles::DEFAULT_PROFILE;

pub const SUPPORTED_SCHEMA_VERSIONS: &[u64] = &[1];

#[derive(Debug, Error)]
pub enum PackError {
    #[error("IO error reading {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid JSON in {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported schemaVersion: {0}")]
    UnsupportedSchemaVersion(String),

    #[error("Schema violation: {0}")]
    Schema(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Pack has no stickers")]
    EmptyStickers,

    #[error("DuplicateKey: {field} {value:?} appears more than once")]
    DuplicateKey { field: &'static str, value: String },

    #[error("Sticker {sticker_id:?} is invalid: {reason}")]
    InvalidEntry { sticker_id: String, reason: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackIndex {
    pub schema_version: u64,
    pub pack: PackMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub defaults: Option<PackDefaults>,
    pub stickers: Vec<StickerEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackMeta {
    pub pack_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackDefaults {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StickerEntry {
    pub sticker_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_ref: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
}

/// A validated pack index together with the document it was parsed from.
///
/// The raw document, not the typed view, feeds batch identity so that every
/// authored byte of metadata participates.
#[derive(Debug, Clone)]
pub struct LoadedPack {
    pub path: PathBuf,
    pub index: PackIndex,
    pub document: Value,
}

impl PackIndex {
    /// Pack-level profile, falling back to the built-in sticker profile.
    pub fn default_profile(&self) -> &str {
        self.defaults
            .as_ref()
            .and_then(|d| d.profile.as_deref())
            .unwrap_or(DEFAULT_PROFILE)
    }

    /// Entry override, else pack default.
    pub fn effective_profile<'a>(&'a self, entry: &'a StickerEntry) -> &'a str {
        entry.profile.as_deref().unwrap_or_else(|| self.default_profile())
    }

    pub fn default_tags(&self) -> Vec<String> {
        self.defaults
            .as_ref()
            .and_then(|d| d.tags.clone())
            .unwrap_or_default()
    }

    pub fn effective_tags(&self, entry: &StickerEntry) -> Vec<String> {
        entry.tags.clone().unwrap_or_else(|| self.default_tags())
    }
}

pub fn load_pack_index(path: &Path) -> Result<LoadedPack, PackError> {
    let content = fs::read_to_string(path).map_err(|source| PackError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let document: Value = serde_json::from_str(&content).map_err(|source| PackError::Json {
        path: path.display().to_string(),
        source,
    })?;
    let index = parse_pack_document(&document)?;
    Ok(LoadedPack {
        path: path.to_path_buf(),
        index,
        document,
    })
}

/// Parse and validate an already-decoded descriptor.
pub fn parse_pack_document(document: &Value) -> Result<PackIndex, PackError> {
    match document.get("schemaVersion") {
        None => return Err(PackError::MissingField("schemaVersion")),
        Some(v) if !v.as_u64().map_or(false, |n| SUPPORTED_SCHEMA_VERSIONS.contains(&n)) => {
            return Err(PackError::UnsupportedSchemaVersion(v.to_string()));
        }
        Some(_) => {}
    }

    let index: PackIndex =
        serde_json::from_value(document.clone()).map_err(|e| PackError::Schema(e.to_string()))?;
    validate_pack_index(&index)?;
    Ok(index)
}

pub fn validate_pack_index(index: &PackIndex) -> Result<(), PackError> {
    if index.pack.pack_id.trim().is_empty() {
        return Err(PackError::MissingField("pack.packId"));
    }
    if index.pack.name.trim().is_empty() {
        return Err(PackError::MissingField("pack.name"));
    }
    if index.stickers.is_empty() {
        return Err(PackError::EmptyStickers);
    }

    let mut sticker_ids = HashSet::new();
    let mut input_refs = HashSet::new();

    for entry in &index.stickers {
        check_entry(entry)?;

        if !sticker_ids.insert(entry.sticker_id.as_str()) {
            return Err(PackError::DuplicateKey {
                field: "stickerId",
                value: entry.sticker_id.clone(),
            });
        }
        if !input_refs.insert(normalize_input_ref(&entry.input_ref)) {
            return Err(PackError::DuplicateKey {
                field: "inputRef",
                value: entry.input_ref.clone(),
            });
        }
    }
    Ok(())
}

fn check_entry(entry: &StickerEntry) -> Result<(), PackError> {
    let invalid = |reason: &str| PackError::InvalidEntry {
        sticker_id: entry.sticker_id.clone(),
        reason: reason.to_string(),
    };

    let id = &entry.sticker_id;
    if id.is_empty() || id == "." || id == ".." || id.contains(['/', '\\']) {
        return Err(invalid("stickerId must be a single path segment"));
    }
    if entry.name.trim().is_empty() {
        return Err(invalid("name must not be empty"));
    }

    let input_ref = Path::new(&entry.input_ref);
    if entry.input_ref.trim().is_empty() {
        return Err(invalid("inputRef must not be empty"));
    }
    if input_ref
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
    {
        return Err(invalid("inputRef must be relative and must not contain '..'"));
    }
    Ok(())
}

/// `./cats//happy/` and `cats/happy` name the same folder.
pub fn normalize_input_ref(input_ref: &str) -> String {
    input_ref
        .split(['/', '\\'])
        .filter(|s| !s.is_empty() && *s != ".")
        .collect::<Vec<_>>()
        .join("/")
}
