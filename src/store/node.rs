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

use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use uuid::Uuid;

use crate::model::{Node, NodeCollection};

use super::{write_atomic, StoreError};

const FILE_NAME: &str = "nodes.json";

/// Durable store of managed hosts (`nodes.json`).
pub struct NodeStore {
    file_path: PathBuf,
    nodes: RwLock<Vec<Node>>,
}

impl NodeStore {
    /// Open (or initialize) the store under `data_dir`. Legacy records
    /// lacking an id are assigned one and the repair is persisted.
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let file_path = data_dir.join(FILE_NAME);

        let mut nodes = load_collection(&file_path)?;
        let mut repaired = false;
        for node in &mut nodes {
            if node.id.is_empty() {
                node.id = Uuid::new_v4().to_string();
                repaired = true;
            }
        }

        let store = Self {
            file_path,
            nodes: RwLock::new(nodes),
        };
        if repaired {
            let guard = store
                .nodes
                .read()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            store.save(&guard)?;
        }
        Ok(store)
    }

    pub fn add(&self, mut node: Node) -> Result<Node, StoreError> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        if node.id.is_empty() {
            node.id = Uuid::new_v4().to_string();
        }
        if nodes.iter().any(|n| n.id == node.id) {
            return Err(StoreError::Exists("node"));
        }

        nodes.push(node.clone());
        self.save(&nodes)?;
        Ok(node)
    }

    pub fn update(&self, node: Node) -> Result<(), StoreError> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        match nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => {
                *existing = node;
                self.save(&nodes)
            }
            None => Err(StoreError::NotFound("node")),
        }
    }

    /// Delete by id, preserving the relative order of the survivors.
    pub fn delete(&self, node_id: &str) -> Result<(), StoreError> {
        let mut nodes = self
            .nodes
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        let before = nodes.len();
        nodes.retain(|n| n.id != node_id);
        if nodes.len() == before {
            return Err(StoreError::NotFound("node"));
        }
        self.save(&nodes)
    }

    pub fn get(&self, node_id: &str) -> Result<Node, StoreError> {
        self.nodes
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .iter()
            .find(|n| n.id == node_id)
            .cloned()
            .ok_or(StoreError::NotFound("node"))
    }

    pub fn list(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self
            .nodes
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .clone())
    }

    pub fn master(&self) -> Result<Option<Node>, StoreError> {
        Ok(self
            .nodes
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .iter()
            .find(|n| n.is_master)
            .cloned())
    }

    pub fn slaves(&self) -> Result<Vec<Node>, StoreError> {
        Ok(self
            .nodes
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .iter()
            .filter(|n| !n.is_master)
            .cloned()
            .collect())
    }

    fn save(&self, nodes: &[Node]) -> Result<(), StoreError> {
        let collection = NodeCollection {
            nodes: nodes.to_vec(),
            updated_at: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&collection)?;
        write_atomic(&self.file_path, &data)?;
        Ok(())
    }
}

fn load_collection(file_path: &Path) -> Result<Vec<Node>, StoreError> {
    if !file_path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read(file_path)?;
    let collection: NodeCollection = serde_json::from_slice(&data)?;
    Ok(collection.nodes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::AuthMethod;
    use tempfile::TempDir;

    fn node(id: &str, name: &str) -> Node {
        Node {
            id: id.into(),
            name: name.into(),
            host: "10.0.0.1".into(),
            port: 22,
            username: "root".into(),
            auth_method: AuthMethod::Password,
            ..Default::default()
        }
    }

    #[test]
    fn test_add_and_reopen_preserves_order() {
        let dir = TempDir::new().unwrap();
        {
            let store = NodeStore::open(dir.path()).unwrap();
            for i in 0..5 {
                store.add(node(&format!("n{i}"), &format!("host-{i}"))).unwrap();
            }
        }

        let reopened = NodeStore::open(dir.path()).unwrap();
        let ids: Vec<_> = reopened.list().unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(ids, vec!["n0", "n1", "n2", "n3", "n4"]);
    }

    #[test]
    fn test_duplicate_id_is_rejected_before_write() {
        let dir = TempDir::new().unwrap();
        let store = NodeStore::open(dir.path()).unwrap();

        store.add(node("n1", "a")).unwrap();
        let err = store.add(node("n1", "b")).unwrap_err();
        assert!(matches!(err, StoreError::Exists("node")));
        assert_eq!(store.get("n1").unwrap().name, "a");
    }

    #[test]
    fn test_unknown_id_update_delete() {
        let dir = TempDir::new().unwrap();
        let store = NodeStore::open(dir.path()).unwrap();

        assert!(matches!(
            store.update(node("missing", "x")).unwrap_err(),
            StoreError::NotFound("node")
        ));
        assert!(matches!(
            store.delete("missing").unwrap_err(),
            StoreError::NotFound("node")
        ));
    }

    #[test]
    fn test_empty_id_gets_assigned() {
        let dir = TempDir::new().unwrap();
        let store = NodeStore::open(dir.path()).unwrap();

        let added = store.add(node("", "anon")).unwrap();
        assert!(!added.id.is_empty());
        assert_eq!(store.get(&added.id).unwrap().name, "anon");
    }

    #[test]
    fn test_save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let store = NodeStore::open(dir.path()).unwrap();
        store.add(node("n1", "a")).unwrap();

        assert!(dir.path().join("nodes.json").exists());
        assert!(!dir.path().join("nodes.json.tmp").exists());
    }

    #[test]
    fn test_master_and_slave_selectors() {
        let dir = TempDir::new().unwrap();
        let store = NodeStore::open(dir.path()).unwrap();

        let mut m = node("m", "master");
        m.is_master = true;
        store.add(m).unwrap();
        store.add(node("s1", "slave-1")).unwrap();
        store.add(node("s2", "slave-2")).unwrap();

        assert_eq!(store.master().unwrap().unwrap().id, "m");
        let slaves: Vec<_> = store.slaves().unwrap().into_iter().map(|n| n.id).collect();
        assert_eq!(slaves, vec!["s1", "s2"]);
    }

    #[test]
    fn test_missing_id_repair_is_persisted() {
        let dir = TempDir::new().unwrap();
        let raw = serde_json::json!({
            "nodes": [{"name": "legacy", "host": "10.0.0.9", "port": 22}],
            "updatedAt": "2024-01-01T00:00:00Z"
        });
        fs::write(dir.path().join("nodes.json"), raw.to_string()).unwrap();

        let store = NodeStore::open(dir.path()).unwrap();
        let id = store.list().unwrap()[0].id.clone();
        assert!(!id.is_empty());

        // Repair must already be on disk.
        let reopened = NodeStore::open(dir.path()).unwrap();
        assert_eq!(reopened.list().unwrap()[0].id, id);
    }
}
