//! CLI tests for `gym validate`, `gym check` and `gym snapshot`.
//!
//! Spawns the gym binary and verifies exit codes and output.

use std::fs;
use std::process::Command;

use gym::exit_codes;
use gym::test_support::TestProject;

fn gym() -> Command {
    Command::new(env!("CARGO_BIN_EXE_gym"))
}

#[test]
fn check_passing_expectations_exits_ok() {
    let project = TestProject::new(&[
        ("README.md", "# Demo\n\nUsage: run it\n"),
        ("config.json", "{\"debug\": false}\n"),
    ])
    .expect("project");
    let exp = tempfile::NamedTempFile::new().expect("tempfile").into_temp_path();
    fs::write(
        &exp,
        r#"[
            {"type": "file", "path": "README.md", "content_contains": ["Usage"]},
            {"type": "syntax", "path": "config.json"}
        ]"#,
    )
    .expect("write expectations");

    let output = gym()
        .args(["check", "--dir"])
        .arg(project.path())
        .arg("--expectations")
        .arg(&exp)
        .output()
        .expect("gym check");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("[+] file README.md"), "{stdout}");
    assert!(stdout.contains("2/2 passed"), "{stdout}");
}

#[test]
fn check_with_failures_exits_failed() {
    let project = TestProject::new(&[("README.md", "# Demo\n")]).expect("project");
    let exp = tempfile::NamedTempFile::new().expect("tempfile").into_temp_path();
    fs::write(
        &exp,
        r#"[{"type": "file", "path": "README.md", "content_contains": ["Usage"]}]"#,
    )
    .expect("write expectations");

    let output = gym()
        .args(["check", "--json", "--dir"])
        .arg(project.path())
        .arg("--expectations")
        .arg(&exp)
        .output()
        .expect("gym check");

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stdout = String::from_utf8_lossy(&output.stdout);
    let line: serde_json::Value =
        serde_json::from_str(stdout.lines().next().expect("one line")).expect("json line");
    assert_eq!(line["passed"], serde_json::json!(false));
    assert_eq!(line["message"], "Missing: 'Usage' in README.md");
}

#[test]
fn validate_rejects_malformed_expectations() {
    let exp = tempfile::NamedTempFile::new().expect("tempfile").into_temp_path();
    fs::write(&exp, r#"[{"type": "command", "command": []}]"#).expect("write");

    let output = gym().arg("validate").arg(&exp).output().expect("gym validate");

    assert_eq!(output.status.code(), Some(exit_codes::INVALID));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("schema validation failed"), "{stderr}");
}

#[test]
fn snapshot_lists_tracked_files() {
    let project = TestProject::new(&[("b.txt", "b"), ("a/x.txt", "x"), (".env", "hidden")])
        .expect("project");

    let output = gym()
        .args(["snapshot", "--dir"])
        .arg(project.path())
        .output()
        .expect("gym snapshot");

    assert_eq!(output.status.code(), Some(exit_codes::OK));
    let paths: Vec<String> = String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(|line| {
            let value: serde_json::Value = serde_json::from_str(line).expect("json");
            value["path"].as_str().expect("path").to_string()
        })
        .collect();
    assert_eq!(paths, vec!["a/x.txt", "b.txt"]);
}
