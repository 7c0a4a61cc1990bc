//! Tests for plugin discovery from disk

use std::path::Path;
use std::sync::Arc;

use kestrel_types::RuntimeKind;
use serde_json::json;
use tempfile::TempDir;

use super::fixtures::{FakeLauncher, make_runtime};
use crate::Error;
use crate::plugin::{DiscoveredPlugin, MANIFEST_FILENAME, discover_plugins};

fn write_manifest(root: &Path, dir: &str, manifest: &serde_json::Value) {
    let path = root.join(dir);
    std::fs::create_dir_all(&path).unwrap();
    std::fs::write(path.join(MANIFEST_FILENAME), manifest.to_string()).unwrap();
}

fn manifest(id: &str, runtime: &str) -> serde_json::Value {
    json!({
        "id": id,
        "name": id,
        "runtime": runtime,
        "entry": "main.py",
        "triggerKeywords": [id],
    })
}

#[test]
fn test_discovers_host_plugins_sorted_by_directory() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "zeta", &manifest("zeta", "python"));
    write_manifest(temp.path(), "alpha", &manifest("alpha", "nodejs"));

    let found = discover_plugins(temp.path()).unwrap();
    let ids: Vec<&str> = found.iter().map(|p| p.metadata.id.as_str()).collect();
    assert_eq!(ids, ["alpha", "zeta"]);
    assert_eq!(found[0].metadata.runtime, RuntimeKind::Nodejs);
    assert_eq!(found[0].directory, temp.path().join("alpha"));
}

#[test]
fn test_skips_what_cannot_be_hosted() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "good", &manifest("good", "python"));
    write_manifest(temp.path(), "native", &manifest("native", "native"));
    write_manifest(
        temp.path(),
        "elsewhere",
        &json!({"id": "elsewhere", "name": "x", "runtime": "python", "supportedOs": ["plan9"]}),
    );
    write_manifest(temp.path(), "blank", &json!({"id": " ", "name": "x", "runtime": "python"}));
    std::fs::create_dir_all(temp.path().join("no-manifest")).unwrap();
    std::fs::create_dir_all(temp.path().join("broken")).unwrap();
    std::fs::write(temp.path().join("broken").join(MANIFEST_FILENAME), "{ nope").unwrap();
    std::fs::write(temp.path().join("stray.json"), "{}").unwrap();

    let found = discover_plugins(temp.path()).unwrap();
    let ids: Vec<&str> = found.iter().map(|p| p.metadata.id.as_str()).collect();
    assert_eq!(ids, ["good"]);
}

#[test]
fn test_supported_os_matching() {
    let temp = TempDir::new().unwrap();
    let os = match std::env::consts::OS {
        "macos" => "darwin",
        other => other,
    };
    write_manifest(
        temp.path(),
        "here",
        &json!({"id": "here", "name": "x", "runtime": "python", "supportedOs": [os.to_uppercase()]}),
    );

    let plugin = DiscoveredPlugin::load(temp.path().join("here")).unwrap();
    assert!(plugin.supports_current_os());
}

#[test]
fn test_load_reports_missing_and_invalid_manifests() {
    let temp = TempDir::new().unwrap();
    let err = DiscoveredPlugin::load(temp.path().join("missing")).unwrap_err();
    assert!(matches!(err, Error::Plugin(msg) if msg.contains(MANIFEST_FILENAME)));

    std::fs::create_dir_all(temp.path().join("bad")).unwrap();
    std::fs::write(temp.path().join("bad").join(MANIFEST_FILENAME), "[]").unwrap();
    let err = DiscoveredPlugin::load(temp.path().join("bad")).unwrap_err();
    assert!(matches!(err, Error::Plugin(msg) if msg.contains("Failed to parse")));
}

#[test]
fn test_unreadable_root_is_an_error() {
    let temp = TempDir::new().unwrap();
    assert!(matches!(
        discover_plugins(&temp.path().join("absent")),
        Err(Error::Io(_))
    ));
}

#[tokio::test]
async fn test_runtime_loads_plugins_dir() {
    let temp = TempDir::new().unwrap();
    write_manifest(temp.path(), "notes", &manifest("notes", "python"));
    write_manifest(temp.path(), "todo", &manifest("todo", "python"));
    write_manifest(temp.path(), "todo-copy", &manifest("todo", "python"));

    let launcher = FakeLauncher::new();
    let (runtime, _rx, _) = make_runtime(Arc::clone(&launcher));
    let loaded = runtime.load_plugins_dir(temp.path()).await.unwrap();

    // the duplicate id is skipped, not fatal
    assert_eq!(loaded, 2);
    let registry = runtime.registry();
    assert!(registry.get("notes").unwrap().is_host_backed());
    assert!(registry.get("todo").is_some());
    assert_eq!(runtime.host_snapshots().len(), 1);
}
