#[path = "../src/backup.rs"]
mod backup;

use std::fs::File;
use std::io::{Read, Write};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

fn sqlite_bytes(body: &[u8]) -> Vec<u8> {
    let mut bytes = b"SQLite format 3\0".to_vec();
    bytes.extend_from_slice(body);
    bytes
}

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

#[test]
fn zip_export_and_import_roundtrip() {
    let workspace = temp_dir("schoold-backup-src");
    let workspace2 = temp_dir("schoold-backup-dst");
    let out_dir = temp_dir("schoold-backup-out");

    let bytes = sqlite_bytes(b"sqlite-test-payload");
    std::fs::write(workspace.join("schoold.sqlite3"), &bytes).expect("write source db");

    let bundle_path = out_dir.join("workspace.zip");
    let export = backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");
    assert_eq!(export.bundle_format, backup::BUNDLE_FORMAT_V1);
    assert_eq!(export.entry_count, 2);
    assert_eq!(export.db_sha256, backup::sha256_hex(&bytes));

    let f = File::open(&bundle_path).expect("open bundle");
    let mut archive = zip::ZipArchive::new(f).expect("open zip archive");
    let mut manifest = String::new();
    archive
        .by_name("manifest.json")
        .expect("manifest entry")
        .read_to_string(&mut manifest)
        .expect("read manifest");
    let manifest: serde_json::Value = serde_json::from_str(&manifest).expect("manifest json");
    assert_eq!(manifest["format"], backup::BUNDLE_FORMAT_V1);
    assert_eq!(manifest["dbSha256"], serde_json::json!(export.db_sha256));
    archive
        .by_name("db/schoold.sqlite3")
        .expect("database entry in bundle");

    let import = backup::import_workspace_bundle(&bundle_path, &workspace2).expect("import bundle");
    assert_eq!(import.bundle_format_detected, backup::BUNDLE_FORMAT_V1);
    let restored = std::fs::read(workspace2.join("schoold.sqlite3")).expect("read restored db");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(workspace2);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn bare_sqlite_import_is_supported() {
    let out_dir = temp_dir("schoold-backup-bare");
    let workspace = temp_dir("schoold-backup-bare-dst");

    let plain = out_dir.join("copy.sqlite3");
    let bytes = sqlite_bytes(b"plain-sqlite-copy");
    std::fs::write(&plain, &bytes).expect("write sqlite file");

    let import = backup::import_workspace_bundle(&plain, &workspace).expect("import sqlite");
    assert_eq!(import.bundle_format_detected, "sqlite3");
    let restored = std::fs::read(workspace.join("schoold.sqlite3")).expect("read restored sqlite");
    assert_eq!(restored, bytes);

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn tampered_bundle_is_rejected() {
    let workspace = temp_dir("schoold-backup-tamper-src");
    let dst = temp_dir("schoold-backup-tamper-dst");
    let out_dir = temp_dir("schoold-backup-tamper-out");
    std::fs::write(workspace.join("schoold.sqlite3"), b"original").expect("write db");
    let bundle_path = out_dir.join("good.zip");
    backup::export_workspace_bundle(&workspace, &bundle_path).expect("export bundle");

    // Rebuild the archive with the same manifest but different database bytes.
    let mut manifest = String::new();
    {
        let mut archive =
            zip::ZipArchive::new(File::open(&bundle_path).expect("open")).expect("zip");
        archive
            .by_name("manifest.json")
            .expect("manifest")
            .read_to_string(&mut manifest)
            .expect("read manifest");
    }
    let forged = out_dir.join("forged.zip");
    let mut zw = zip::ZipWriter::new(File::create(&forged).expect("create forged"));
    let opts = zip::write::FileOptions::default();
    zw.start_file("manifest.json", opts).expect("manifest entry");
    zw.write_all(manifest.as_bytes()).expect("write manifest");
    zw.start_file("db/schoold.sqlite3", opts).expect("db entry");
    zw.write_all(b"tampered").expect("write db");
    zw.finish().expect("finish zip");

    assert!(backup::import_workspace_bundle(&forged, &dst).is_err());
    assert!(!dst.join("schoold.sqlite3").exists());

    let _ = std::fs::remove_dir_all(workspace);
    let _ = std::fs::remove_dir_all(dst);
    let _ = std::fs::remove_dir_all(out_dir);
}

#[test]
fn non_sqlite_file_leaves_workspace_untouched() {
    let out_dir = temp_dir("schoold-backup-text");
    let workspace = temp_dir("schoold-backup-text-dst");
    let live = sqlite_bytes(b"live-database");
    std::fs::write(workspace.join("schoold.sqlite3"), &live).expect("write live db");

    let notes = out_dir.join("notes.txt");
    std::fs::write(&notes, b"this is not a database").expect("write notes");

    let e = backup::import_workspace_bundle(&notes, &workspace).expect_err("text import rejected");
    assert!(format!("{e:#}").contains("not a SQLite database"));
    let kept = std::fs::read(workspace.join("schoold.sqlite3")).expect("read live db");
    assert_eq!(kept, live);
    assert!(!workspace.join("schoold.sqlite3.importing").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn replaced_database_can_be_rolled_back() {
    let out_dir = temp_dir("schoold-backup-rollback");
    let workspace = temp_dir("schoold-backup-rollback-dst");
    let live = sqlite_bytes(b"live-database");
    std::fs::write(workspace.join("schoold.sqlite3"), &live).expect("write live db");
    let incoming = out_dir.join("incoming.sqlite3");
    std::fs::write(&incoming, sqlite_bytes(b"incoming")).expect("write incoming");

    backup::import_workspace_bundle(&incoming, &workspace).expect("import sqlite");
    assert!(workspace.join("schoold.sqlite3.previous").is_file());

    backup::rollback_import(&workspace).expect("rollback");
    let restored = std::fs::read(workspace.join("schoold.sqlite3")).expect("read db");
    assert_eq!(restored, live);
    assert!(!workspace.join("schoold.sqlite3.previous").exists());

    let _ = std::fs::remove_dir_all(out_dir);
    let _ = std::fs::remove_dir_all(workspace);
}
