//! StickerForge Core - sticker asset optimizer and catalog compiler
//!
//! Two one-shot batch stages sharing one on-disk layout:
//! 1. Optimize: staged images -> processed variant folders
//! 2. Manifest: pack index + processed tree -> batch id, manifest, upload plan
//!
//! The manifest stage is a pure function of on-disk content: same pack
//! descriptor and same processed bytes give the same batch id.

pub mod profiles;
pub mod transform;
pub mod validation;
pub mod optimize;
pub mod pack;
pub mod inspect;
pub mod hashing;
pub mod batch;
pub mod manifest;
pub mod staging;
pub mod catalog;
pub mod layout;

pub use profiles::{ProfileRegistry, TransformProfile, VariantFormat, VariantSpec};
pub use transform::{transform, TransformError, VariantResult};
pub use validation::{ValidationResult, ValidationRule, ValidationViolation, ViolationSeverity};
pub use optimize::{OptimizeOptions, OptimizeReport, OptimizeStage};
pub use pack::{load_pack_index, LoadedPack, PackError, PackIndex};
pub use inspect::{InspectError, VariantInfo};
pub use hashing::{canonical_json, sha256_file, sha256_hex, CanonicalError};
pub use batch::{compute_batch_id, HashTriple};
pub use manifest::{GeneratedManifest, UploadObject, UploadPlan};
pub use catalog::{CatalogError, CatalogOptions, CatalogReport, CatalogStage};
pub use layout::{discover_repo_root, AssetLayout};

pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");
