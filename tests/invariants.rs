//! Contract Invariant Tests
//!
//! These tests verify the pipeline's non-negotiable guarantees end to end.

use std::fs;
use std::path::Path;

use chrono::{TimeZone, Utc};
use image::{Rgb, RgbImage, Rgba, RgbaImage};
use serde_json::json;

use stickerforge_core::{
    catalog::{CatalogError, CatalogOptions, CatalogStage},
    hashing::{canonical_json, CanonicalError},
    inspect::InspectError,
    layout::{AssetLayout, RECEIPT_FILE},
    optimize::{OptimizeOptions, OptimizeStage, Receipt},
    pack::{parse_pack_document, PackError},
    profiles::{ProfileRegistry, TransformProfile, VariantFormat},
    transform::transform,
};

fn opaque_png(path: &Path, w: u32, h: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbImage::from_fn(w, h, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]))
        .save(path)
        .unwrap();
}

fn translucent_png(path: &Path, w: u32, h: u32) {
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    RgbaImage::from_fn(w, h, |x, _| Rgba([250, 120, 0, if x < w / 2 { 0 } else { 255 }]))
        .save(path)
        .unwrap();
}

fn optimize(layout: &AssetLayout, dry_run: bool, fail_fast: bool) -> stickerforge_core::OptimizeReport {
    OptimizeStage::new(
        TransformProfile::sticker(),
        OptimizeOptions {
            staged_root: layout.staged.clone(),
            processed_root: layout.processed.clone(),
            dry_run,
            fail_fast,
        },
    )
    .run()
    .unwrap()
}

fn catalog(layout: &AssetLayout, dry_run: bool) -> CatalogStage {
    CatalogStage::new(
        ProfileRegistry::default(),
        CatalogOptions {
            layout: layout.clone(),
            object_prefix_base: "stickers".to_string(),
            dry_run,
        },
    )
}

fn pack_doc() -> serde_json::Value {
    json!({
        "schemaVersion": 1,
        "pack": {"packId": "cats", "name": "Cats", "description": "Feline feelings", "isActive": true},
        "defaults": {"tags": ["cat"]},
        "stickers": [
            {"stickerId": "happy", "name": "Happy", "inputRef": "cats/happy"},
            {"stickerId": "sad", "name": "Sad", "inputRef": "cats/sad", "tags": ["blue"]}
        ]
    })
}

fn write_pack(layout: &AssetLayout, doc: &serde_json::Value) -> std::path::PathBuf {
    fs::create_dir_all(&layout.packs).unwrap();
    let path = layout.packs.join("cats.source.json");
    fs::write(&path, serde_json::to_vec_pretty(doc).unwrap()).unwrap();
    path
}

/// A repo with two optimized stickers and an authored pack.
fn fixture() -> (tempfile::TempDir, AssetLayout, std::path::PathBuf) {
    let dir = tempfile::tempdir().unwrap();
    let layout = AssetLayout::new(dir.path());
    opaque_png(&layout.staged.join("cats/happy.png"), 300, 200);
    translucent_png(&layout.staged.join("cats/sad.png"), 160, 160);

    let report = optimize(&layout, false, false);
    assert!(report.is_success(), "{:?}", report.failures);
    let pack = write_pack(&layout, &pack_doc());
    (dir, layout, pack)
}

#[test]
fn invariant_resize_ceiling() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("big.png");
    opaque_png(&src, 2000, 2000);

    let variants = transform(&src, &TransformProfile::sticker()).unwrap();
    let thumb = variants.iter().find(|v| v.key == "thumb").unwrap();
    let full = variants.iter().find(|v| v.key == "full").unwrap();

    assert!(thumb.width.max(thumb.height) <= 128);
    assert_eq!(full.format, VariantFormat::Png);
    assert!(full.width.max(full.height) <= 1024);
    assert!(variants.iter().all(|v| !v.has_alpha));
}

#[test]
fn invariant_never_enlarged() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("tiny.png");
    opaque_png(&src, 90, 60);

    for v in transform(&src, &TransformProfile::sticker()).unwrap() {
        assert!(v.width <= 90 && v.height <= 60, "{} grew to {}x{}", v.key, v.width, v.height);
    }
}

#[test]
fn invariant_alpha_preserved() {
    let dir = tempfile::tempdir().unwrap();
    let src = dir.path().join("alpha.png");
    translucent_png(&src, 600, 300);

    let variants = transform(&src, &TransformProfile::sticker()).unwrap();
    assert_eq!(variants.len(), 4);
    assert!(variants.iter().all(|v| v.has_alpha));
}

#[test]
fn invariant_optimize_writes_variants_and_receipt() {
    let (_dir, layout, _) = fixture();
    let folder = layout.processed.join("cats/sad");
    for file in ["thumb.webp", "small.webp", "medium.webp", "full.png", RECEIPT_FILE] {
        assert!(folder.join(file).is_file(), "missing {file}");
    }

    let receipt: Receipt = serde_json::from_slice(&fs::read(folder.join(RECEIPT_FILE)).unwrap()).unwrap();
    assert_eq!(receipt.source, "cats/sad.png");
    assert!(receipt.source_has_alpha);
    assert_eq!(receipt.profile.name, "sticker");
    assert_eq!(receipt.variants.len(), 4);
}

#[test]
fn invariant_optimize_is_idempotent() {
    let (_dir, layout, _) = fixture();
    let before = fs::read(layout.processed.join("cats/happy/thumb.webp")).unwrap();

    let again = optimize(&layout, false, false);
    assert_eq!(again.files_written, 0);
    assert_eq!(again.files_unchanged, 10);
    assert_eq!(fs::read(layout.processed.join("cats/happy/thumb.webp")).unwrap(), before);
}

#[test]
fn invariant_optimize_isolates_failures() {
    let dir = tempfile::tempdir().unwrap();
    let layout = AssetLayout::new(dir.path());
    fs::create_dir_all(&layout.staged).unwrap();
    fs::write(layout.staged.join("a_broken.png"), b"not an image").unwrap();
    opaque_png(&layout.staged.join("b_good.png"), 64, 64);

    let report = optimize(&layout, false, false);
    assert_eq!(report.failed, 1);
    assert_eq!(report.succeeded, 1);
    assert!(!report.is_success());
    assert_eq!(report.failures[0].path, "a_broken.png");
    assert!(layout.processed.join("b_good/thumb.webp").is_file());

    let fast = optimize(&layout, false, true);
    assert!(fast.aborted);
    assert_eq!(fast.succeeded, 0);
}

#[test]
fn invariant_optimize_dry_run_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let layout = AssetLayout::new(dir.path());
    opaque_png(&layout.staged.join("x.png"), 64, 64);

    let report = optimize(&layout, true, false);
    assert!(report.is_success());
    assert_eq!(report.succeeded, 1);
    assert!(!layout.processed.exists());
}

#[test]
fn invariant_batch_id_deterministic() {
    let (_dir, layout, pack) = fixture();
    let stage = catalog(&layout, true);

    let t1 = Utc.with_ymd_and_hms(2026, 1, 1, 0, 0, 0).unwrap();
    let t2 = Utc.with_ymd_and_hms(2026, 6, 1, 12, 30, 0).unwrap();
    let a = stage.build(&pack, t1).unwrap();
    let b = stage.build(&pack, t2).unwrap();

    assert_eq!(a.batch_id, b.batch_id);
    assert!(a.batch_id.starts_with("b_") && a.batch_id.len() == 14);

    let mut b_manifest = b.manifest.clone();
    b_manifest.created_at = a.manifest.created_at;
    assert_eq!(a.manifest, b_manifest);

    let keys = |plan: &stickerforge_core::UploadPlan| {
        plan.objects.iter().map(|o| o.object_key.clone()).collect::<Vec<_>>()
    };
    assert_eq!(keys(&a.plan), keys(&b.plan));
    assert_eq!(a.plan.objects.len(), 8);
    assert!(a.plan.objects[0]
        .object_key
        .starts_with(&format!("stickers/cats/{}/happy/", a.batch_id)));
}

#[test]
fn invariant_batch_id_sensitive_to_bytes() {
    let (_dir, layout, pack) = fixture();
    let stage = catalog(&layout, true);
    let before = stage.build(&pack, Utc::now()).unwrap().batch_id;

    let target = layout.processed.join("cats/sad/full.png");
    let mut bytes = fs::read(&target).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&target, bytes).unwrap();

    let after = stage.build(&pack, Utc::now()).unwrap().batch_id;
    assert_ne!(before, after);
}

#[test]
fn invariant_batch_id_sensitive_to_tags() {
    let (_dir, layout, pack) = fixture();
    let stage = catalog(&layout, true);
    let before = stage.build(&pack, Utc::now()).unwrap().batch_id;

    let mut doc = pack_doc();
    doc["stickers"][0]["tags"] = json!(["grin"]);
    write_pack(&layout, &doc);

    let after = stage.build(&pack, Utc::now()).unwrap().batch_id;
    assert_ne!(before, after);
}

#[test]
fn invariant_canonical_json_deterministic() {
    let c1 = canonical_json(&json!({"b": 1, "a": 2})).unwrap();
    let c2 = canonical_json(&json!({"a": 2, "b": 1})).unwrap();
    assert_eq!(c1, c2);

    let mut deep = json!(0);
    for _ in 0..200 {
        deep = json!({ "n": deep });
    }
    assert!(matches!(canonical_json(&deep), Err(CanonicalError::Cycle(_))));
}

#[test]
fn invariant_duplicate_sticker_id_before_fs() {
    let mut doc = pack_doc();
    doc["stickers"][1]["stickerId"] = json!("happy");

    let err = parse_pack_document(&doc).unwrap_err();
    assert!(matches!(err, PackError::DuplicateKey { field: "stickerId", .. }));

    // No processed tree exists at all; the duplicate still wins.
    let dir = tempfile::tempdir().unwrap();
    let layout = AssetLayout::new(dir.path());
    let pack = write_pack(&layout, &doc);
    let err = catalog(&layout, true).build(&pack, Utc::now()).unwrap_err();
    assert!(matches!(
        err,
        CatalogError::Pack {
            source: PackError::DuplicateKey { .. },
            ..
        }
    ));
}

#[test]
fn invariant_missing_processed_folder() {
    let (_dir, layout, _) = fixture();
    let mut doc = pack_doc();
    doc["stickers"][1]["inputRef"] = json!("cats/ghost");
    let pack = write_pack(&layout, &doc);

    let err = catalog(&layout, false).run_pack(&pack).unwrap_err();
    assert!(matches!(err, CatalogError::Inspect(InspectError::MissingFolder { .. })));
    let msg = err.to_string();
    assert!(msg.contains("Processed folder missing"));
    assert!(msg.contains("cats/ghost"));
}

#[test]
fn invariant_unknown_profile_fails_pack() {
    let (_dir, layout, _) = fixture();
    let mut doc = pack_doc();
    doc["stickers"][0]["profile"] = json!("poster");
    let pack = write_pack(&layout, &doc);

    let err = catalog(&layout, true).build(&pack, Utc::now()).unwrap_err();
    assert!(matches!(err, CatalogError::UnknownProfile { .. }));
}

#[test]
fn invariant_staging_idempotent() {
    let (_dir, layout, pack) = fixture();
    let stage = catalog(&layout, false);

    let first = stage.run_pack(&pack).unwrap();
    let staging = first.staging.clone().unwrap();
    assert_eq!(staging.linked + staging.copied, 8);
    assert!(!first.manifest_reused);

    let second = stage.run_pack(&pack).unwrap();
    assert_eq!(second.batch_id, first.batch_id);
    assert_eq!(second.staging.unwrap().existing, 8);
    assert!(second.manifest_reused);

    let batch_dir = layout.batch_dir(&first.batch_id);
    assert!(batch_dir.join("files/happy/thumb.webp").is_file());
    assert!(layout.upload_plan_path(&first.batch_id).is_file());
    assert!(layout.manifest_path(&first.batch_id).is_file());
    assert!(!batch_dir.join(".lock").exists());
}

#[test]
fn invariant_manifest_dry_run_writes_nothing() {
    let (_dir, layout, _) = fixture();
    let report = catalog(&layout, true).run_all().unwrap();

    assert!(report.is_success());
    assert_eq!(report.packs.len(), 1);
    assert!(report.packs[0].staging.is_none());
    assert!(!layout.uploads.exists());
    assert!(!layout.generated.exists());
}

#[test]
fn invariant_run_all_isolates_pack_failures() {
    let (_dir, layout, _) = fixture();
    fs::write(layout.packs.join("broken.source.json"), b"{ nope").unwrap();

    let report = catalog(&layout, false).run_all().unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert!(report.failures[0].pack.ends_with("broken.source.json"));
}
