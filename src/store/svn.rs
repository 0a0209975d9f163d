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

use crate::model::{SvnResource, SvnResourceCollection};

use super::{now_minute_string, write_atomic, StoreError};

const FILE_NAME: &str = "svn-resources.json";

/// The symbolic head marker stored on resources that follow the
/// repository head.
pub const HEAD_REVISION: &str = "HEAD";

/// Durable store of VCS resource references (`svn-resources.json`).
pub struct SvnResourceStore {
    file_path: PathBuf,
    resources: RwLock<Vec<SvnResource>>,
}

impl SvnResourceStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let file_path = data_dir.join(FILE_NAME);

        let mut resources = load_collection(&file_path)?;
        let mut repaired = false;
        for resource in &mut resources {
            repaired |= apply_defaults(resource);
        }

        let store = Self {
            file_path,
            resources: RwLock::new(resources),
        };
        if repaired {
            let guard = store
                .resources
                .read()
                .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;
            store.save(&guard)?;
        }
        Ok(store)
    }

    pub fn add(&self, mut resource: SvnResource) -> Result<SvnResource, StoreError> {
        let mut resources = self
            .resources
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        if resource.id.is_empty() {
            resource.id = Uuid::new_v4().to_string();
        }
        apply_defaults(&mut resource);

        if resources.iter().any(|r| r.id == resource.id) {
            return Err(StoreError::Exists("svn resource"));
        }

        resources.push(resource.clone());
        self.save(&resources)?;
        Ok(resource)
    }

    /// Update in place. Blank revision/status/lastChecked keep the stored
    /// values.
    pub fn update(&self, mut resource: SvnResource) -> Result<(), StoreError> {
        let mut resources = self
            .resources
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        match resources.iter_mut().find(|r| r.id == resource.id) {
            Some(existing) => {
                if resource.revision.is_empty() {
                    resource.revision = existing.revision.clone();
                }
                if resource.last_checked.is_empty() {
                    resource.last_checked = now_minute_string();
                }
                *existing = resource;
                self.save(&resources)
            }
            None => Err(StoreError::NotFound("svn resource")),
        }
    }

    pub fn delete(&self, resource_id: &str) -> Result<(), StoreError> {
        let mut resources = self
            .resources
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?;

        let before = resources.len();
        resources.retain(|r| r.id != resource_id);
        if resources.len() == before {
            return Err(StoreError::NotFound("svn resource"));
        }
        self.save(&resources)
    }

    pub fn get(&self, resource_id: &str) -> Result<SvnResource, StoreError> {
        self.resources
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .iter()
            .find(|r| r.id == resource_id)
            .cloned()
            .ok_or(StoreError::NotFound("svn resource"))
    }

    pub fn list(&self) -> Result<Vec<SvnResource>, StoreError> {
        Ok(self
            .resources
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))?
            .clone())
    }

    fn save(&self, resources: &[SvnResource]) -> Result<(), StoreError> {
        let collection = SvnResourceCollection {
            resources: resources.to_vec(),
            updated_at: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&collection)?;
        write_atomic(&self.file_path, &data)?;
        Ok(())
    }
}

fn apply_defaults(resource: &mut SvnResource) -> bool {
    let mut changed = false;
    if resource.revision.is_empty() {
        resource.revision = HEAD_REVISION.to_string();
        changed = true;
    }
    if resource.last_checked.is_empty() {
        resource.last_checked = now_minute_string();
        changed = true;
    }
    changed
}

fn load_collection(file_path: &Path) -> Result<Vec<SvnResource>, StoreError> {
    if !file_path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read(file_path)?;
    let collection: SvnResourceCollection = serde_json::from_slice(&data)?;
    Ok(collection.resources)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::SvnResourceType;
    use tempfile::TempDir;

    fn resource(id: &str, url: &str) -> SvnResource {
        SvnResource {
            id: id.into(),
            url: url.into(),
            name: "app".into(),
            kind: SvnResourceType::Folder,
            ..Default::default()
        }
    }

    #[test]
    fn test_add_applies_defaults() {
        let dir = TempDir::new().unwrap();
        let store = SvnResourceStore::open(dir.path()).unwrap();

        let added = store.add(resource("", "svn://x/app")).unwrap();
        assert!(!added.id.is_empty());
        assert_eq!(added.revision, "HEAD");
        assert!(!added.last_checked.is_empty());
    }

    #[test]
    fn test_update_keeps_revision_when_blank() {
        let dir = TempDir::new().unwrap();
        let store = SvnResourceStore::open(dir.path()).unwrap();

        let mut added = store.add(resource("r1", "svn://x/app")).unwrap();
        added.revision = "42".into();
        store.update(added.clone()).unwrap();

        added.revision = String::new();
        store.update(added).unwrap();
        assert_eq!(store.get("r1").unwrap().revision, "42");
    }

    #[test]
    fn test_error_taxonomy() {
        let dir = TempDir::new().unwrap();
        let store = SvnResourceStore::open(dir.path()).unwrap();

        store.add(resource("r1", "svn://x/app")).unwrap();
        assert!(matches!(
            store.add(resource("r1", "svn://x/other")).unwrap_err(),
            StoreError::Exists(_)
        ));
        assert!(matches!(
            store.delete("nope").unwrap_err(),
            StoreError::NotFound(_)
        ));
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let store = SvnResourceStore::open(dir.path()).unwrap();
            store.add(resource("r1", "svn://x/app")).unwrap();
        }
        let reopened = SvnResourceStore::open(dir.path()).unwrap();
        assert_eq!(reopened.get("r1").unwrap().url, "svn://x/app");
    }
}
