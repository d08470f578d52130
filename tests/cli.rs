//! Command-line behaviour: arguments, exit codes and dependency checks.

mod common;

use assert_cmd::Command;
use common::EpubFixture;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

fn cli() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ebook2pdf"));
    cmd.env_remove("CHROME_PATH").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help() {
    cli()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("--mode"))
        .stdout(predicate::str::contains("--check-deps"));
}

#[test]
fn test_input_is_required() {
    cli().assert().failure().code(2);
}

#[test]
#[cfg(target_os = "linux")]
fn test_check_deps_names_missing_chromium() {
    let empty = TempDir::new().unwrap();
    cli()
        .arg("--check-deps")
        .env("PATH", empty.path())
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("chromium: not found"));
}

#[test]
#[cfg(unix)]
fn test_check_deps_succeeds_with_chromium() {
    use std::os::unix::fs::PermissionsExt;

    let bin = TempDir::new().unwrap();
    let chromium = bin.path().join("chromium");
    fs::write(&chromium, "#!/bin/sh\n").unwrap();
    fs::set_permissions(&chromium, fs::Permissions::from_mode(0o755)).unwrap();

    cli()
        .arg("--check-deps")
        .env("PATH", bin.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("chromium: found at"))
        .stdout(predicate::str::contains("lopdf"));
}

#[test]
fn test_unsupported_extension_fails() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("notes.txt");
    fs::write(&input, "hello").unwrap();

    cli()
        .arg(&input)
        .args(["--mode", "plain-text"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("Unsupported file format"));
}

#[test]
fn test_plain_text_conversion() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("story.epub");
    EpubFixture::new("Story")
        .chapter("<p>Once upon a time.</p>")
        .chapter("<p>The end.</p>")
        .write(&input);

    cli()
        .arg(&input)
        .args(["-m", "plain-text"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Pages:    2"))
        .stdout(predicate::str::contains("Images:   0"));

    // default output path sits next to the input
    assert!(dir.path().join("story.pdf").exists());
}

#[test]
fn test_verbose_overrides_rust_log() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("story.epub");
    EpubFixture::new("Story")
        .chapter("<p>Once upon a time.</p>")
        .write(&input);

    cli()
        .arg(&input)
        .args(["-m", "plain-text", "-v"])
        .env("RUST_LOG", "warn")
        .assert()
        .success()
        .stdout(predicate::str::contains("Section 1 ("));

    // without -v the environment filter wins
    cli()
        .arg(&input)
        .args(["-m", "plain-text"])
        .env("RUST_LOG", "warn")
        .assert()
        .success()
        .stdout(predicate::str::contains("Section 1 (").not());
}

#[test]
fn test_layout_requires_fixed_layout_mode() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("story.epub");
    EpubFixture::new("Story").chapter("<p>text</p>").write(&input);

    cli()
        .arg(&input)
        .args(["--mode", "plain-text", "--layout", "SinglePage"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("--layout"));

    assert!(!dir.path().join("story.pdf").exists());
}
