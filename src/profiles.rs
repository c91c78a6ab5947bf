//! Transform Profiles - Variant Contracts
//!
//! A profile names every rendition a processed asset must carry.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::ENGINE_VERSION;

pub type ProfileName = String;

/// Name of the built-in profile used when neither a sticker nor its pack names one.
pub const DEFAULT_PROFILE: &str = "sticker";

/// Largest edge libwebp will encode.
pub const WEBP_MAX_DIMENSION: u32 = 16383;

#[derive(Debug, Error)]
pub enum ProfileError {
    #[error("IO error reading profile {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid profile {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Profile {0} is invalid: {1}")]
    Invalid(String, String),

    #[error("Profile {name} requires engine >= {required}, current is {current}")]
    EngineVersionMismatch {
        name: String,
        required: String,
        current: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransformProfile {
    pub name: ProfileName,
    pub version: u32,
    pub variants: Vec<VariantSpec>,
    #[serde(default = "default_webp_quality")]
    pub webp_quality: u8,
    #[serde(default = "default_png_compression")]
    pub png_compression_level: u8,
    #[serde(default = "default_true")]
    pub forbid_enlarge: bool,
    #[serde(default = "default_true")]
    pub strip_metadata: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engine_min_version: Option<String>,
}

fn default_true() -> bool { true }
fn default_webp_quality() -> u8 { 82 }
fn default_png_compression() -> u8 { 9 }

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VariantSpec {
    pub key: String,
    pub max_size_px: u32,
    pub format: VariantFormat,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum VariantFormat {
    Webp,
    Png,
}

impl VariantFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            VariantFormat::Webp => "webp",
            VariantFormat::Png => "png",
        }
    }

    pub fn mime(&self) -> &'static str {
        match self {
            VariantFormat::Webp => "image/webp",
            VariantFormat::Png => "image/png",
        }
    }
}

impl VariantSpec {
    pub fn new(key: &str, max_size_px: u32, format: VariantFormat) -> Self {
        Self {
            key: key.to_string(),
            max_size_px,
            format,
        }
    }

    /// File name of this variant inside a processed asset folder, e.g. `thumb.webp`.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.key, self.format.extension())
    }
}

impl TransformProfile {
    /// The built-in sticker profile.
    pub fn sticker() -> Self {
        Self {
            name: DEFAULT_PROFILE.to_string(),
            version: 1,
            variants: vec![
                VariantSpec::new("thumb", 128, VariantFormat::Webp),
                VariantSpec::new("small", 256, VariantFormat::Webp),
                VariantSpec::new("medium", 512, VariantFormat::Webp),
                VariantSpec::new("full", 1024, VariantFormat::Png),
            ],
            webp_quality: default_webp_quality(),
            png_compression_level: default_png_compression(),
            forbid_enlarge: true,
            strip_metadata: true,
            engine_min_version: None,
        }
    }

    pub fn variant(&self, key: &str) -> Option<&VariantSpec> {
        self.variants.iter().find(|v| v.key == key)
    }

    /// Structural checks applied to every profile entering a registry.
    pub fn check(&self) -> Result<(), ProfileError> {
        let invalid = |msg: String| ProfileError::Invalid(self.name.clone(), msg);

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".into()));
        }
        if self.variants.is_empty() {
            return Err(invalid("at least one variant is required".into()));
        }
        if self.webp_quality > 100 {
            return Err(invalid(format!("webpQuality {} is above 100", self.webp_quality)));
        }
        if self.png_compression_level > 9 {
            return Err(invalid(format!(
                "pngCompressionLevel {} is above 9",
                self.png_compression_level
            )));
        }

        let mut seen = std::collections::HashSet::new();
        for spec in &self.variants {
            if spec.key.is_empty() || spec.key.contains(['/', '\\', '.']) {
                return Err(invalid(format!("variant key {:?} is not a plain name", spec.key)));
            }
            if spec.max_size_px == 0 {
                return Err(invalid(format!("variant {} has maxSizePx 0", spec.key)));
            }
            if spec.format == VariantFormat::Webp && spec.max_size_px > WEBP_MAX_DIMENSION {
                return Err(invalid(format!(
                    "webp variant {} has maxSizePx {}, libwebp allows at most {}",
                    spec.key, spec.max_size_px, WEBP_MAX_DIMENSION
                )));
            }
            if !seen.insert(spec.key.as_str()) {
                return Err(invalid(format!("variant key {} is repeated", spec.key)));
            }
        }

        self.check_engine_version()
    }

    fn check_engine_version(&self) -> Result<(), ProfileError> {
        let Some(min) = &self.engine_min_version else {
            return Ok(());
        };
        let engine_ver = semver::Version::parse(ENGINE_VERSION)
            .map_err(|_| ProfileError::Invalid(self.name.clone(), "invalid engine version".into()))?;
        let min_ver = semver::Version::parse(min)
            .map_err(|_| ProfileError::Invalid(self.name.clone(), format!("invalid engineMinVersion {min}")))?;

        if engine_ver < min_ver {
            return Err(ProfileError::EngineVersionMismatch {
                name: self.name.clone(),
                required: min.clone(),
                current: ENGINE_VERSION.to_string(),
            });
        }
        Ok(())
    }
}

/// Profile registry - built-ins plus any profiles loaded from disk
#[derive(Debug, Clone)]
pub struct ProfileRegistry {
    profiles: BTreeMap<ProfileName, TransformProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self { profiles: BTreeMap::new() }
    }

    /// Built-in profiles overlaid with every `*.json` profile found in `dir`.
    pub fn load_from_dir(dir: &Path) -> Result<Self, ProfileError> {
        let mut registry = Self::default();
        if !dir.exists() {
            return Ok(registry);
        }

        let io_err = |source| ProfileError::Io {
            path: dir.display().to_string(),
            source,
        };
        let mut paths: Vec<_> = fs::read_dir(dir)
            .map_err(io_err)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(io_err)?
            .into_iter()
            .map(|e| e.path())
            .filter(|p| p.extension().map_or(false, |e| e == "json"))
            .collect();
        paths.sort();

        for path in paths {
            let content = fs::read_to_string(&path).map_err(|source| ProfileError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let profile: TransformProfile =
                serde_json::from_str(&content).map_err(|source| ProfileError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            tracing::debug!(profile = %profile.name, path = %path.display(), "loaded profile");
            registry.register(profile)?;
        }
        Ok(registry)
    }

    pub fn get(&self, name: &str) -> Option<&TransformProfile> {
        self.profiles.get(name)
    }

    pub fn list(&self) -> Vec<&TransformProfile> {
        self.profiles.values().collect()
    }

    pub fn register(&mut self, profile: TransformProfile) -> Result<(), ProfileError> {
        profile.check()?;
        self.profiles.insert(profile.name.clone(), profile);
        Ok(())
    }
}

impl Default for ProfileRegistry {
    fn default() -> Self {
        let sticker = TransformProfile::sticker();
        let mut profiles = BTreeMap::new();
        profiles.insert(sticker.name.clone(), sticker);
        Self { profiles }
    }
}
