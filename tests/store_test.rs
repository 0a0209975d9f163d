// Copyright 2025 Lablup Inc. and Jeongkyu Shin
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use bdeploy::model::{Node, TaskDefinition};
use bdeploy::store::{NodeStore, TaskPatch, TaskStore};
use tempfile::TempDir;

fn node(id: &str, name: &str) -> Node {
    Node {
        id: id.into(),
        name: name.into(),
        host: "10.0.0.1".into(),
        port: 22,
        username: "root".into(),
        ..Default::default()
    }
}

#[test]
fn test_persistence_keeps_count_and_order() {
    let dir = TempDir::new().unwrap();
    let names: Vec<String> = (0..8).map(|i| format!("host-{i}")).collect();

    {
        let store = NodeStore::open(dir.path()).unwrap();
        for (i, name) in names.iter().enumerate() {
            store.add(node(&format!("n{i}"), name)).unwrap();
        }
    }

    let reopened = NodeStore::open(dir.path()).unwrap();
    let listed: Vec<String> = reopened
        .list()
        .unwrap()
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(listed, names);
}

#[test]
fn test_save_writes_whole_collection_atomically() {
    let dir = TempDir::new().unwrap();
    let store = NodeStore::open(dir.path()).unwrap();

    for i in 0..3 {
        store.add(node(&format!("n{i}"), "h")).unwrap();
    }

    // The on-disk file is always a complete, parseable collection and
    // the temp file never survives a save.
    let raw = std::fs::read(dir.path().join("nodes.json")).unwrap();
    let parsed: serde_json::Value = serde_json::from_slice(&raw).unwrap();
    assert_eq!(parsed["nodes"].as_array().unwrap().len(), 3);
    assert!(parsed.get("updatedAt").is_some());
    assert!(!dir.path().join("nodes.json.tmp").exists());
}

#[test]
fn test_interrupted_write_leaves_prior_collection() {
    let dir = TempDir::new().unwrap();
    {
        let store = NodeStore::open(dir.path()).unwrap();
        store.add(node("n1", "keeper")).unwrap();
    }

    // Simulate a crash that left a torn temp file behind: the real file
    // must still load untouched.
    std::fs::write(dir.path().join("nodes.json.tmp"), b"{\"nodes\": [tor").unwrap();

    let reopened = NodeStore::open(dir.path()).unwrap();
    let listed = reopened.list().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].name, "keeper");
}

#[test]
fn test_field_merge_update_scenario() {
    let dir = TempDir::new().unwrap();
    let store = TaskStore::open(dir.path()).unwrap();

    store
        .add_task(TaskDefinition {
            id: "t".into(),
            name: "A".into(),
            svn_resource_id: "r1".into(),
            master_server_id: "m1".into(),
            remote_path: "/tmp/x".into(),
            progress: 10,
            ..Default::default()
        })
        .unwrap();
    let before = store.get_task("t").unwrap();

    std::thread::sleep(std::time::Duration::from_millis(1100));
    store
        .update_task(
            "t",
            TaskPatch {
                name: Some("B".into()),
                ..Default::default()
            },
        )
        .unwrap();

    let after = store.get_task("t").unwrap();
    assert_eq!(after.name, "B");
    assert_eq!(after.progress, 10);
    assert_eq!(after.remote_path, "/tmp/x");
    assert_eq!(after.svn_resource_id, before.svn_resource_id);
    assert_eq!(after.master_server_id, before.master_server_id);
    assert_eq!(after.created_at, before.created_at);
    assert_ne!(after.updated_at, before.updated_at);
}
