//! Autosave and reload tests.
//!
//! Changes made through the API must reach disk through the autosave loop and
//! survive a store being recreated from the same data directory.

mod common;

use std::sync::Arc;
use std::time::Duration;

use kanvas_core::{AutosaveConfig, ProjectStore};
use kanvas_server::{spawn_autosave_task, ProviderClient};
use reqwest::Client;
use serde_json::{json, Value};

use common::server::OWNER;
use common::TestServer;

fn fast_autosave() -> AutosaveConfig {
    AutosaveConfig {
        debounce: Duration::from_millis(20),
        max_delay: Duration::from_millis(200),
    }
}

fn document(elements: Value, last_modified: u64) -> Value {
    json!({
        "project_id": "ignored",
        "owner_id": "ignored",
        "elements": elements,
        "last_modified": last_modified
    })
}

fn image(id: &str) -> Value {
    json!({
        "type": "image",
        "id": id,
        "transform": {"x": 0.0, "y": 0.0, "width": 64.0, "height": 64.0},
        "src": "https://cdn.example/tile.png"
    })
}

#[tokio::test]
async fn test_saved_project_survives_restart() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ProjectStore::with_data_dir(dir.path()).expect("store");
    let provider = ProviderClient::new("http://127.0.0.1:9", None).expect("provider");
    let server = TestServer::start(store, Arc::new(provider), None, fast_autosave()).await;
    let client = Client::new();

    client
        .put(server.url("/api/projects/keep-me"))
        .header(OWNER, "alice")
        .json(&document(
            json!([image("3c1f2b9a-7e64-4d1b-8f61-0a1b2c3d4e01")]),
            42,
        ))
        .send()
        .await
        .expect("save");
    server.shutdown().await;

    // Simulated restart
    let reloaded = ProjectStore::with_data_dir(dir.path()).expect("store");
    let loaded = reloaded.load_all().expect("load");
    assert_eq!(loaded, vec!["keep-me".to_string()]);
    let doc = reloaded.document("keep-me").expect("document");
    assert_eq!(doc.owner_id, "alice");
    assert_eq!(doc.elements.len(), 1);
    assert_eq!(doc.last_modified, 42);
}

#[tokio::test]
async fn test_undo_is_autosaved() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ProjectStore::with_data_dir(dir.path()).expect("store");
    let provider = ProviderClient::new("http://127.0.0.1:9", None).expect("provider");
    let server = TestServer::start(store.clone(), Arc::new(provider), None, fast_autosave()).await;
    let autosave = spawn_autosave_task(store.clone(), server.state().autosave.clone());
    let client = Client::new();
    let url = server.url("/api/projects/undo-me");

    client
        .put(&url)
        .header(OWNER, "alice")
        .json(&document(json!([]), 10))
        .send()
        .await
        .expect("create");
    client
        .put(&url)
        .header(OWNER, "alice")
        .json(&document(
            json!([image("3c1f2b9a-7e64-4d1b-8f61-0a1b2c3d4e02")]),
            20,
        ))
        .send()
        .await
        .expect("update");

    client
        .post(format!("{url}/undo"))
        .header(OWNER, "alice")
        .send()
        .await
        .expect("undo");

    // Wait for the debounce window to pass and the loop to write
    let mut saved = false;
    for _ in 0..100 {
        tokio::time::sleep(Duration::from_millis(20)).await;
        if !server.state().autosave.is_pending("undo-me") {
            saved = true;
            break;
        }
    }
    assert!(saved, "autosave never ran");

    autosave.abort();
    server.shutdown().await;

    let reloaded = ProjectStore::with_data_dir(dir.path()).expect("store");
    reloaded.load_all().expect("load");
    let doc = reloaded.document("undo-me").expect("document");
    assert!(doc.elements.is_empty());
}

#[tokio::test]
async fn test_deleted_project_is_removed_from_disk() {
    let dir = tempfile::tempdir().expect("tempdir");
    let store = ProjectStore::with_data_dir(dir.path()).expect("store");
    let provider = ProviderClient::new("http://127.0.0.1:9", None).expect("provider");
    let server = TestServer::start(store, Arc::new(provider), None, fast_autosave()).await;
    let client = Client::new();
    let url = server.url("/api/projects/drop-me");

    client
        .put(&url)
        .header(OWNER, "alice")
        .json(&document(json!([]), 5))
        .send()
        .await
        .expect("save");
    assert!(dir.path().join("drop-me.json").exists());

    client
        .delete(&url)
        .header(OWNER, "alice")
        .send()
        .await
        .expect("delete");
    assert!(!dir.path().join("drop-me.json").exists());

    server.shutdown().await;
}
