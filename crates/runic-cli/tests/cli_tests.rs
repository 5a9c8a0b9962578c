use std::fs;
use std::path::Path;
use std::process::{Command, Output};

use tempfile::TempDir;

/// Sets up a rule directory and a target file, then runs the binary.
fn run_runic(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_runic"))
        .args(args)
        .output()
        .expect("failed to run the runic binary")
}

fn write_fixture(dir: &Path, name: &str, contents: &str) -> String {
    let path = dir.join(name);
    fs::write(&path, contents).expect("failed to write fixture");
    path.display().to_string()
}

const GIF_RULES: &str = "\
# GIF image signatures
0 string GIF8 GIF image data
>4 string 7a \\b, version 8%s
";

#[test]
fn test_identify_gif() {
    let dir = TempDir::new().unwrap();
    let magdir = dir.path().join("magic");
    fs::create_dir(&magdir).unwrap();
    write_fixture(&magdir, "images", GIF_RULES);
    let target = write_fixture(dir.path(), "pic.gif", "GIF87a-and-so-on");

    let output = run_runic(&["identify", &magdir.display().to_string(), &target]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert_eq!(stdout.trim_end(), format!("{target}: GIF image data, version 8%s"));
}

#[test]
fn test_identify_unknown_target() {
    let dir = TempDir::new().unwrap();
    let rules = write_fixture(dir.path(), "magic", GIF_RULES);
    let target = write_fixture(dir.path(), "notes.txt", "just some text");

    let output = run_runic(&["identify", &rules, &target]);
    assert!(output.status.success());
    let stdout = String::from_utf8(output.stdout).unwrap();
    assert!(stdout.contains("(unknown)"));
}

#[test]
fn test_identify_missing_target_fails() {
    let dir = TempDir::new().unwrap();
    let rules = write_fixture(dir.path(), "magic", GIF_RULES);

    let output = run_runic(&["identify", &rules, "no-such-file"]);
    assert!(!output.status.success());
    let stderr = String::from_utf8(output.stderr).unwrap();
    assert!(stderr.contains("runic:"));
}

#[test]
fn test_strict_mode_rejects_bad_rules() {
    let dir = TempDir::new().unwrap();
    let rules = write_fixture(dir.path(), "magic", "0 gibberish x nope\n");
    let target = write_fixture(dir.path(), "pic.gif", "GIF87a");

    let lenient = run_runic(&["identify", &rules, &target]);
    assert!(lenient.status.success());

    let strict = run_runic(&["identify", "--strict", &rules, &target]);
    assert!(!strict.status.success());
}

#[test]
fn test_compile_produces_source() {
    let dir = TempDir::new().unwrap();
    let rules = write_fixture(dir.path(), "magic", GIF_RULES);
    let out = dir.path().join("generated.rs");

    let output = run_runic(&[
        "compile",
        &rules,
        "-o",
        &out.display().to_string(),
        "--comments",
    ]);
    assert!(output.status.success());

    let generated = fs::read_to_string(&out).unwrap();
    assert!(generated.starts_with("// Code generated by runic"));
    assert!(generated.contains("pub fn Identify(r: &SliceReader, po: i64) -> Vec<String> {"));
    assert!(generated.contains("// 0 string GIF8 GIF image data"));
}
