use std::fs;
use std::path::Path;

use fireball::{canonicalize_or_current, infer_project_name, parse_address, sha256_file};
use tempfile::tempdir;

#[test]
fn canonicalize_or_current_resolves_existing_absolute_path() {
    let tmp = tempdir().expect("tempdir");
    let subdir = tmp.path().join("nested");
    fs::create_dir_all(&subdir).expect("create nested");

    let result = canonicalize_or_current(subdir.to_str().expect("utf8")).expect("canonicalize");
    assert_eq!(result, subdir.canonicalize().expect("canonicalize subdir"));
}

#[test]
fn canonicalize_or_current_keeps_missing_paths() {
    let result = canonicalize_or_current("does-not-exist-yet").expect("canonicalize");
    assert!(result.is_absolute());
    assert!(result.ends_with("does-not-exist-yet"));
}

#[test]
fn infer_project_name_uses_last_path_component() {
    assert_eq!(infer_project_name(Path::new("/tmp/project-root")), "project-root");
    assert_eq!(infer_project_name(Path::new("/")), "unnamed-project");
}

#[test]
fn parse_address_accepts_hex_and_decimal() {
    assert_eq!(parse_address("0x1000").unwrap(), 0x1000);
    assert_eq!(parse_address("0X1f").unwrap(), 0x1f);
    assert_eq!(parse_address("4096").unwrap(), 4096);
    assert_eq!(parse_address("0x40_1000").unwrap(), 0x401000);
    assert_eq!(parse_address("0xffffffffffffffff").unwrap(), u64::MAX);
}

#[test]
fn parse_address_rejects_garbage() {
    let err = parse_address("main").unwrap_err();
    assert!(err.to_string().contains("Invalid address"));
    assert!(parse_address("0x").is_err());
    assert!(parse_address("-1").is_err());
}

#[test]
fn sha256_file_matches_known_digest() {
    let tmp = tempdir().expect("tempdir");
    let path = tmp.path().join("blob");
    fs::write(&path, b"abc").expect("write");
    assert_eq!(
        sha256_file(&path).expect("hash"),
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
    );
}
