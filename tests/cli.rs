//! The `spa-actions` binary.
#![cfg(feature = "serde")]

use std::fs;
use std::process::Command;

const MODEL: &str = r#"{
    "label": "cli",
    "seed": 3,
    "modules": [
        { "kind": "buffer", "name": "state", "dimensions": 16 },
        { "kind": "buffer", "name": "motor", "dimensions": 16 }
    ],
    "cortical": { "actions": ["motor = state * LEFT"] },
    "selection": {
        "actions": [
            "dot(state, A) --> state = B",
            "dot(state, B) --> state = A"
        ]
    }
}"#;

#[test]
fn stdout_is_a_json_document() {
    let path = std::env::temp_dir().join(format!("spa-actions-cli-{}.json", std::process::id()));
    fs::write(&path, MODEL).unwrap();
    let out = Command::new(env!("CARGO_BIN_EXE_spa-actions"))
        .arg(&path)
        .env("RUST_LOG", "info")
        .output()
        .unwrap();
    fs::remove_file(&path).ok();

    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));
    let doc: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(doc["label"], "cli");
    assert!(doc["connections"].as_array().is_some_and(|c| !c.is_empty()));
    assert!(String::from_utf8_lossy(&out.stderr).contains("compiled model"));
}

#[test]
fn parse_prints_the_syntax_tree() {
    let out = Command::new(env!("CARGO_BIN_EXE_spa-actions"))
        .args(["--parse", "dot(state, A) --> state = B"])
        .output()
        .unwrap();
    assert!(out.status.success());
    let doc: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(doc["effects"][0]["sink"], "state");
}
