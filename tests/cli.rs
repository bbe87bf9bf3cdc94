use serde_json::Value as Json;
use std::path::{Path, PathBuf};
use std::process::Command;
use tempfile::TempDir;

const SUM: &str = r#"
name = "sum"
slots = 3
constants = [{ int = 1 }]

[[instructions]]
op = "add"
dst = "r2"
lhs = "r0"
rhs = "k0"

[[inputs]]
slot = "r0"
value = { int = 41 }
"#;

const OVERFLOW: &str = r#"
name = "overflow"
slots = 2
constants = [{ int = 1 }]

[[instructions]]
op = "add"
dst = "r1"
lhs = "r0"
rhs = "k0"

[[inputs]]
slot = "r0"
value = { int = 2147483647 }
"#;

const REMAINDER: &str = r#"
name = "remainder"
slots = 3

[[instructions]]
op = "mod"
dst = "r2"
lhs = "r0"
rhs = "r1"

[[inputs]]
slot = "r0"
value = { int = 17 }

[[inputs]]
slot = "r1"
value = { int = 5 }
"#;

const CONCAT: &str = r#"
name = "concat"
slots = 2
constants = [{ string = "b" }]

[[instructions]]
op = "add"
dst = "r1"
lhs = "r0"
rhs = "k0"

[[inputs]]
slot = "r0"
value = { string = "a" }
"#;

fn write(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).unwrap();
    path
}

fn arithjit(args: &[&str], listing: &Path) -> (String, String, bool) {
    let output = Command::new(env!("CARGO_BIN_EXE_arithjit"))
        .args(args)
        .arg(listing)
        .output()
        .expect("failed to execute arithjit");
    (
        String::from_utf8_lossy(&output.stdout).to_string(),
        String::from_utf8_lossy(&output.stderr).to_string(),
        output.status.success(),
    )
}

fn json(args: &[&str], listing: &Path) -> Json {
    let (stdout, stderr, success) = arithjit(args, listing);
    assert!(success, "arithjit should succeed, stderr:\n{}", stderr);
    serde_json::from_str(&stdout).unwrap_or_else(|e| panic!("bad json ({}):\n{}", e, stdout))
}

#[test]
fn test_run_fast_path() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "sum.toml", SUM);
    let report = json(&["run", "--format", "json"], &listing);
    assert_eq!(report["method"], "sum");
    assert_eq!(report["slots"][2], "42");
    assert_eq!(report["calls"].as_array().unwrap().len(), 0);
    assert_eq!(report["counters"].as_array().unwrap().len(), 0);
}

#[test]
fn test_run_overflow_takes_slow_path() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "overflow.toml", OVERFLOW);
    let report = json(&["run", "--format", "json"], &listing);
    assert_eq!(report["slots"][1], "2147483648");
    let calls = report["calls"].as_array().unwrap();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0]["op"], "add");
    assert_eq!(calls[0]["bytecode_offset"], 0);
    assert_eq!(report["counters"][0]["slow_case"], 1);

    let report = json(&["run", "--format", "json", "--no-profiling"], &listing);
    assert_eq!(report["slots"][1], "2147483648");
    assert_eq!(report["counters"].as_array().unwrap().len(), 0);
}

#[test]
fn test_run_string_concatenation() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "concat.toml", CONCAT);
    let report = json(&["run", "--format", "json"], &listing);
    assert_eq!(report["slots"][1], "\"ab\"");
}

#[test]
fn test_run_human_output() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "remainder.toml", REMAINDER);
    let (stdout, stderr, success) = arithjit(&["run"], &listing);
    assert!(success, "stderr:\n{}", stderr);
    assert!(stdout.starts_with("method remainder"));
    assert!(stdout.contains("r2 = 2"));
}

#[test]
fn test_compile_reports_sites() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "remainder.toml", REMAINDER);
    let config = write(&dir, "jit.toml", "[capabilities]\ninteger_divide = true\n");

    let report = json(
        &["compile", "--format", "json", "--config", config.to_str().unwrap()],
        &listing,
    );
    assert_eq!(report["method"], "remainder");
    assert_eq!(report["instructions"][0]["opcode"], "mod");
    assert_eq!(report["instructions"][0]["sites"], 5);
    assert_eq!(report["slow_cases"], 5);

    let report = json(&["compile", "--format", "json", "--no-integer-divide"], &listing);
    assert_eq!(report["instructions"][0]["sites"], 0);
    assert_eq!(report["slow_cases"], 0);
    assert_eq!(report["runtime_calls"], 1);
}

#[cfg(feature = "x86_64")]
#[test]
fn test_compile_reports_native_code() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "overflow.toml", OVERFLOW);
    let report = json(&["compile", "--format", "json", "--hex"], &listing);
    let native = &report["x86_64"];
    let size = native["code_size"].as_u64().unwrap();
    assert!(size > 0);
    assert_eq!(native["hex"].as_str().unwrap().len() as u64, size * 2);
    assert_eq!(
        native["call_sites"].as_array().unwrap().len() as u64,
        report["runtime_calls"].as_u64().unwrap()
    );
    assert_eq!(native["bytecode_offsets"].as_array().unwrap().len(), 2);
}

#[test]
fn test_config_file_overrides_capabilities() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "remainder.toml", REMAINDER);
    let config = write(&dir, "jit.toml", "[capabilities]\ninteger_divide = false\n");
    let report = json(
        &["compile", "--format", "json", "--config", config.to_str().unwrap()],
        &listing,
    );
    assert_eq!(report["slow_cases"], 0);
}

#[test]
fn test_shapes_lists_every_instruction() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "sum.toml", SUM);
    let (stdout, stderr, success) = arithjit(&["shapes"], &listing);
    assert!(success, "stderr:\n{}", stderr);
    assert_eq!(stdout.lines().count(), 1);
    assert!(stdout.contains("add"));
}

#[test]
fn test_missing_listing_fails() {
    let dir = TempDir::new().unwrap();
    let (_, stderr, success) = arithjit(&["compile"], &dir.path().join("absent.toml"));
    assert!(!success);
    assert!(stderr.contains("failed to read"));
}

#[test]
fn test_malformed_listing_fails() {
    let dir = TempDir::new().unwrap();
    let listing = write(&dir, "bad.toml", "[[instructions]]\nop = \"frobnicate\"\n");
    let (_, stderr, success) = arithjit(&["run"], &listing);
    assert!(!success);
    assert!(stderr.contains("failed to parse method listing"));
}

#[test]
fn test_input_outside_frame_fails() {
    let dir = TempDir::new().unwrap();
    let listing = write(
        &dir,
        "outside.toml",
        "slots = 1\n\n[[inputs]]\nslot = \"r4\"\nvalue = { int = 1 }\n",
    );
    let (_, stderr, success) = arithjit(&["run"], &listing);
    assert!(!success);
    assert!(stderr.contains("outside the frame"));
}
