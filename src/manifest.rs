//! Generated Manifest and Upload Plan
//!
//! Pure assembly. Everything here is a function of the pack, the inspected
//! variants, the batch id and the creation time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::inspect::{InspectedVariant, VariantInfo};
use crate::layout::AssetLayout;
use crate::pack::LoadedPack;

pub const MANIFEST_SCHEMA_VERSION: u32 = 1;
pub const DEFAULT_OBJECT_PREFIX_BASE: &str = "stickers";
/// Staged objects live under a batch-specific prefix and never change in place.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedManifest {
    pub schema_version: u32,
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub source: ManifestSource,
    pub pack: PackSummary,
    pub stickers: Vec<ManifestSticker>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSource {
    pub pack_index: String,
    pub processed_root: String,
    pub default_profile: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PackSummary {
    pub pack_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub is_active: bool,
    pub tags: Vec<String>,
    pub sticker_count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ManifestSticker {
    pub sticker_id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_ref: String,
    pub tags: Vec<String>,
    pub assets: StickerAssets,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StickerAssets {
    pub profile: String,
    pub profile_version: u32,
    pub variants: Vec<ManifestVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ManifestVariant {
    pub key: String,
    #[serde(flatten)]
    pub info: VariantInfo,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadPlan {
    pub batch_id: String,
    pub created_at: DateTime<Utc>,
    pub processed_root: String,
    pub uploads_root: String,
    pub object_prefix: String,
    pub objects: Vec<UploadObject>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UploadObject {
    pub sticker_id: String,
    pub variant_key: String,
    pub local_path: String,
    pub sha256: String,
    pub bytes: u64,
    pub mime: String,
    pub object_key: String,
    pub cache_control: String,
}

/// A sticker entry resolved against its profile and the processed tree.
#[derive(Debug, Clone)]
pub struct InspectedSticker {
    pub sticker_id: String,
    pub name: String,
    pub description: Option<String>,
    pub input_ref: String,
    pub tags: Vec<String>,
    pub profile: String,
    pub profile_version: u32,
    pub variants: Vec<InspectedVariant>,
}

/// One file to materialize in the batch directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StagedFile {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub sha256: String,
}

/// `<base>/<packId>/<batchId>`, tolerating stray slashes and an empty base.
pub fn object_prefix(base: &str, pack_id: &str, batch_id: &str) -> String {
    [base.trim_matches('/'), pack_id, batch_id]
        .iter()
        .filter(|s| !s.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join("/")
}

pub fn staged_file_path(layout: &AssetLayout, batch_id: &str, sticker_id: &str, file_name: &str) -> PathBuf {
    layout
        .batch_dir(batch_id)
        .join("files")
        .join(sticker_id)
        .join(file_name)
}

pub fn build_manifest(
    layout: &AssetLayout,
    pack: &LoadedPack,
    stickers: &[InspectedSticker],
    batch_id: &str,
    created_at: DateTime<Utc>,
) -> GeneratedManifest {
    let index = &pack.index;
    GeneratedManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        batch_id: batch_id.to_string(),
        created_at,
        source: ManifestSource {
            pack_index: layout.display_relative(&pack.path),
            processed_root: layout.display_relative(&layout.processed),
            default_profile: index.default_profile().to_string(),
        },
        pack: PackSummary {
            pack_id: index.pack.pack_id.clone(),
            name: index.pack.name.clone(),
            description: index.pack.description.clone(),
            is_active: index.pack.is_active,
            tags: index.default_tags(),
            sticker_count: stickers.len(),
        },
        stickers: stickers
            .iter()
            .map(|s| ManifestSticker {
                sticker_id: s.sticker_id.clone(),
                name: s.name.clone(),
                description: s.description.clone(),
                input_ref: s.input_ref.clone(),
                tags: s.tags.clone(),
                assets: StickerAssets {
                    profile: s.profile.clone(),
                    profile_version: s.profile_version,
                    variants: s
                        .variants
                        .iter()
                        .map(|v| ManifestVariant {
                            key: v.key.clone(),
                            info: v.info.clone(),
                        })
                        .collect(),
                },
            })
            .collect(),
    }
}

/// Upload plan plus the list of files staging has to materialize for it.
pub fn build_upload_plan(
    layout: &AssetLayout,
    pack_id: &str,
    stickers: &[InspectedSticker],
    batch_id: &str,
    object_prefix_base: &str,
    created_at: DateTime<Utc>,
) -> (UploadPlan, Vec<StagedFile>) {
    let prefix = object_prefix(object_prefix_base, pack_id, batch_id);
    let mut objects = vec![];
    let mut files = vec![];

    for sticker in stickers {
        for variant in &sticker.variants {
            let destination = staged_file_path(layout, batch_id, &sticker.sticker_id, &variant.file_name);
            objects.push(UploadObject {
                sticker_id: sticker.sticker_id.clone(),
                variant_key: variant.key.clone(),
                local_path: layout.display_relative(&destination),
                sha256: variant.info.sha256.clone(),
                bytes: variant.info.bytes,
                mime: variant.info.mime.clone(),
                object_key: format!("{}/{}/{}", prefix, sticker.sticker_id, variant.file_name),
                cache_control: IMMUTABLE_CACHE_CONTROL.to_string(),
            });
            files.push(StagedFile {
                source: variant.local_path.clone(),
                destination,
                sha256: variant.info.sha256.clone(),
            });
        }
    }

    let plan = UploadPlan {
        batch_id: batch_id.to_string(),
        created_at,
        processed_root: layout.display_relative(&layout.processed),
        uploads_root: layout.display_relative(&layout.uploads),
        object_prefix: prefix,
        objects,
    };
    (plan, files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::profiles::VariantFormat;

    fn sticker() -> InspectedSticker {
        InspectedSticker {
            sticker_id: "happy".into(),
            name: "Happy".into(),
            description: None,
            input_ref: "cats/happy".into(),
            tags: vec!["cat".into()],
            profile: "sticker".into(),
            profile_version: 1,
            variants: vec![InspectedVariant {
                key: "thumb".into(),
                file_name: "thumb.webp".into(),
                local_path: PathBuf::from("/repo/data/assets/processed/cats/happy/thumb.webp"),
                info: VariantInfo {
                    format: VariantFormat::Webp,
                    mime: "image/webp".into(),
                    path: "cats/happy/thumb.webp".into(),
                    sha256: "ab".repeat(32),
                    bytes: 420,
                    width: 128,
                    height: 96,
                },
            }],
        }
    }

    #[test]
    fn test_object_prefix() {
        assert_eq!(object_prefix("stickers", "cats", "b_0"), "stickers/cats/b_0");
        assert_eq!(object_prefix("/cdn/stickers/", "cats", "b_0"), "cdn/stickers/cats/b_0");
        assert_eq!(object_prefix("", "cats", "b_0"), "cats/b_0");
    }

    #[test]
    fn test_upload_plan_keys_and_paths() {
        let layout = AssetLayout::new("/repo");
        let (plan, files) = build_upload_plan(
            &layout,
            "cats",
            &[sticker()],
            "b_0123456789ab",
            DEFAULT_OBJECT_PREFIX_BASE,
            Utc::now(),
        );
        let obj = &plan.objects[0];
        assert_eq!(obj.object_key, "stickers/cats/b_0123456789ab/happy/thumb.webp");
        assert_eq!(
            obj.local_path,
            "data/assets/uploads/b_0123456789ab/files/happy/thumb.webp"
        );
        assert_eq!(obj.cache_control, IMMUTABLE_CACHE_CONTROL);
        assert_eq!(plan.uploads_root, "data/assets/uploads");
        assert_eq!(
            files[0].destination,
            PathBuf::from("/repo/data/assets/uploads/b_0123456789ab/files/happy/thumb.webp")
        );
    }

    #[test]
    fn test_manifest_variant_is_flat() {
        let v = &sticker().variants[0];
        let json = serde_json::to_value(ManifestVariant {
            key: v.key.clone(),
            info: v.info.clone(),
        })
        .unwrap();
        assert_eq!(json["key"], "thumb");
        assert_eq!(json["sha256"], v.info.sha256.as_str());
        assert_eq!(json["format"], "webp");
    }
}
