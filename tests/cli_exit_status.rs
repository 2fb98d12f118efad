//! Exit status of the `pepatch` binary.

mod common;

use common::*;
use pepatch::error::{EXIT_USAGE, FAILURE_EXIT_BASE};
use std::fs;
use std::path::Path;
use std::process::Command;

const ORIGINAL: &str = "1122334455667788";
const PATCHED: &str = "AABBCCDDEEFF0011";

fn pepatch(file: &Path, extra: &[&str]) -> i32 {
    let output = Command::new(env!("CARGO_BIN_EXE_pepatch"))
        .arg("--no-sign")
        .arg("--no-backup")
        .arg(file)
        .args(extra)
        .env("RUST_LOG", "off")
        .output()
        .expect("run pepatch");
    output.status.code().expect("exit code")
}

#[test]
fn test_patch_count_and_failure_do_not_collide() {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = PeBuilder::pe32plus();
    for i in 0..5 {
        builder = builder.word(0x200 + i * 8, 0x1122334455667788);
    }
    let image = builder.write_to(dir.path(), "five.exe");
    let not_pe = dir.path().join("plain.bin");
    fs::write(&not_pe, vec![0u8; 256]).unwrap();

    let success = pepatch(&image, &[ORIGINAL, PATCHED]);
    let failure = pepatch(&not_pe, &[ORIGINAL, PATCHED]);

    assert_eq!(success, 5);
    assert_eq!(failure, FAILURE_EXIT_BASE + 4);
    assert_ne!(success, failure);
}

#[test]
fn test_configuration_error_is_in_failure_band() {
    let dir = tempfile::tempdir().unwrap();
    let image = PeBuilder::pe32plus()
        .word(0x200, 0x1122334455667788)
        .word(0x208, 0x1122334455667788)
        .word(0x210, 0x1122334455667788)
        .write_to(dir.path(), "three.exe");

    let odd = pepatch(&image, &[ORIGINAL]);
    let success = pepatch(&image, &[ORIGINAL, PATCHED]);

    assert_eq!(odd, FAILURE_EXIT_BASE + 2);
    assert_eq!(success, 3);
}

#[test]
fn test_usage_error_is_not_a_patch_count() {
    let dir = tempfile::tempdir().unwrap();
    let image = PeBuilder::pe32plus().write_to(dir.path(), "any.exe");

    let code = pepatch(&image, &["--no-such-flag"]);

    assert_eq!(code, EXIT_USAGE);
}

#[test]
fn test_noop_exits_zero() {
    let dir = tempfile::tempdir().unwrap();
    let image = PeBuilder::pe32plus().write_to(dir.path(), "clean.exe");

    assert_eq!(pepatch(&image, &[ORIGINAL, PATCHED]), 0);
}
