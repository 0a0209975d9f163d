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

//! Unified task store: plans, templates and run history share one file.
//!
//! New tasks, templates and runs are prepended so the most recent entry
//! lists first. Deleting a task cascades to its runs. Updates are
//! field-merging through [`TaskPatch`]: absent fields keep the stored
//! value, `updatedAt` is always stamped.

use chrono::Utc;
use rand::RngCore;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use crate::model::{TaskCollection, TaskDefinition, TaskRun, TaskStatus, TaskTemplate};

use super::{now_string, write_atomic, StoreError};

const FILE_NAME: &str = "tasks.json";

/// Optional-field update for a task. `None` means "keep the stored value".
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub name: Option<String>,
    pub svn_resource_id: Option<String>,
    pub master_server_id: Option<String>,
    pub slave_server_ids: Option<Vec<String>>,
    pub remote_path: Option<String>,
    pub slave_remote_path: Option<String>,
    pub slave_remote_paths: Option<HashMap<String, String>>,
    pub commands: Option<Vec<String>>,
    pub status: Option<TaskStatus>,
    pub progress: Option<i32>,
    pub last_run_at: Option<String>,
    pub template_id: Option<String>,
}

struct Inner {
    tasks: Vec<TaskDefinition>,
    templates: Vec<TaskTemplate>,
    runs: Vec<TaskRun>,
}

/// Durable store backing `tasks.json`.
pub struct TaskStore {
    file_path: PathBuf,
    inner: RwLock<Inner>,
}

impl TaskStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        fs::create_dir_all(data_dir)?;
        let file_path = data_dir.join(FILE_NAME);

        let collection = load_collection(&file_path)?;
        Ok(Self {
            file_path,
            inner: RwLock::new(Inner {
                tasks: collection.tasks,
                templates: collection.templates,
                runs: collection.runs,
            }),
        })
    }

    fn read_inner(&self) -> Result<std::sync::RwLockReadGuard<'_, Inner>, StoreError> {
        self.inner
            .read()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    fn write_inner(&self) -> Result<std::sync::RwLockWriteGuard<'_, Inner>, StoreError> {
        self.inner
            .write()
            .map_err(|e| StoreError::LockPoisoned(e.to_string()))
    }

    // ===== tasks =====

    pub fn list_tasks(&self) -> Result<Vec<TaskDefinition>, StoreError> {
        Ok(self.read_inner()?.tasks.clone())
    }

    pub fn get_task(&self, task_id: &str) -> Result<TaskDefinition, StoreError> {
        self.read_inner()?
            .tasks
            .iter()
            .find(|t| t.id == task_id)
            .cloned()
            .ok_or(StoreError::NotFound("task"))
    }

    pub fn add_task(&self, mut task: TaskDefinition) -> Result<TaskDefinition, StoreError> {
        let mut inner = self.write_inner()?;

        if task.id.is_empty() {
            task.id = new_id("task");
        }
        if inner.tasks.iter().any(|t| t.id == task.id) {
            return Err(StoreError::Exists("task"));
        }

        if task.created_at.is_empty() {
            task.created_at = now_string();
        }
        task.updated_at = now_string();

        inner.tasks.insert(0, task.clone());
        self.save(&inner)?;
        Ok(task)
    }

    /// Field-merging update; see [`TaskPatch`].
    pub fn update_task(&self, task_id: &str, patch: TaskPatch) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;

        let task = inner
            .tasks
            .iter_mut()
            .find(|t| t.id == task_id)
            .ok_or(StoreError::NotFound("task"))?;

        if let Some(name) = patch.name {
            task.name = name;
        }
        if let Some(id) = patch.svn_resource_id {
            task.svn_resource_id = id;
        }
        if let Some(id) = patch.master_server_id {
            task.master_server_id = id;
        }
        if let Some(ids) = patch.slave_server_ids {
            task.slave_server_ids = ids;
        }
        if let Some(path) = patch.remote_path {
            task.remote_path = path;
        }
        if let Some(path) = patch.slave_remote_path {
            task.slave_remote_path = path;
        }
        if let Some(paths) = patch.slave_remote_paths {
            task.slave_remote_paths = paths;
        }
        if let Some(commands) = patch.commands {
            task.commands = commands;
        }
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(progress) = patch.progress {
            task.progress = progress;
        }
        if let Some(at) = patch.last_run_at {
            task.last_run_at = at;
        }
        if let Some(id) = patch.template_id {
            task.template_id = id;
        }
        if task.created_at.is_empty() {
            task.created_at = now_string();
        }
        task.updated_at = now_string();

        self.save(&inner)
    }

    /// Narrow state update used by the pipeline; also stamps `lastRunAt`.
    pub fn update_task_state(
        &self,
        task_id: &str,
        status: TaskStatus,
        progress: i32,
    ) -> Result<(), StoreError> {
        self.update_task(
            task_id,
            TaskPatch {
                status: Some(status),
                progress: Some(progress),
                last_run_at: Some(now_string()),
                ..Default::default()
            },
        )
    }

    /// Delete a task and purge all of its runs.
    pub fn delete_task(&self, task_id: &str) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;

        let before = inner.tasks.len();
        inner.tasks.retain(|t| t.id != task_id);
        if inner.tasks.len() == before {
            return Err(StoreError::NotFound("task"));
        }

        inner.runs.retain(|r| r.task_id != task_id);
        self.save(&inner)
    }

    // ===== templates =====

    pub fn list_templates(&self) -> Result<Vec<TaskTemplate>, StoreError> {
        Ok(self.read_inner()?.templates.clone())
    }

    pub fn add_template(&self, mut tpl: TaskTemplate) -> Result<TaskTemplate, StoreError> {
        let mut inner = self.write_inner()?;

        if tpl.id.is_empty() {
            tpl.id = new_id("tpl");
        }
        if inner.templates.iter().any(|t| t.id == tpl.id) {
            return Err(StoreError::Exists("template"));
        }

        if tpl.created_at.is_empty() {
            tpl.created_at = now_string();
        }
        tpl.updated_at = now_string();

        inner.templates.insert(0, tpl.clone());
        self.save(&inner)?;
        Ok(tpl)
    }

    pub fn update_template(&self, tpl: TaskTemplate) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;

        let existing = inner
            .templates
            .iter_mut()
            .find(|t| t.id == tpl.id)
            .ok_or(StoreError::NotFound("template"))?;

        if !tpl.name.is_empty() {
            existing.name = tpl.name;
        }
        if !tpl.svn_resource_id.is_empty() {
            existing.svn_resource_id = tpl.svn_resource_id;
        }
        if !tpl.master_server_id.is_empty() {
            existing.master_server_id = tpl.master_server_id;
        }
        if !tpl.slave_server_ids.is_empty() {
            existing.slave_server_ids = tpl.slave_server_ids;
        }
        if !tpl.remote_path.is_empty() {
            existing.remote_path = tpl.remote_path;
        }
        if !tpl.slave_remote_path.is_empty() {
            existing.slave_remote_path = tpl.slave_remote_path;
        }
        if !tpl.slave_remote_paths.is_empty() {
            existing.slave_remote_paths = tpl.slave_remote_paths;
        }
        if !tpl.commands.is_empty() {
            existing.commands = tpl.commands;
        }
        if !tpl.source_task_id.is_empty() {
            existing.source_task_id = tpl.source_task_id;
        }
        if existing.created_at.is_empty() {
            existing.created_at = now_string();
        }
        existing.updated_at = now_string();

        self.save(&inner)
    }

    pub fn delete_template(&self, template_id: &str) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;

        let before = inner.templates.len();
        inner.templates.retain(|t| t.id != template_id);
        if inner.templates.len() == before {
            return Err(StoreError::NotFound("template"));
        }
        self.save(&inner)
    }

    // ===== runs =====

    /// Create a run record in its initial state (idle, no logs).
    pub fn create_run(&self, task_id: &str, task_name: &str) -> Result<TaskRun, StoreError> {
        let mut inner = self.write_inner()?;

        let run = TaskRun {
            id: new_id("run"),
            task_id: task_id.to_string(),
            task_name: task_name.to_string(),
            status: TaskStatus::Idle,
            progress: 0,
            started_at: now_string(),
            finished_at: String::new(),
            logs: Vec::new(),
        };

        inner.runs.insert(0, run.clone());
        self.save(&inner)?;
        Ok(run)
    }

    /// Append a log line and advance status/progress. `finishedAt` is set
    /// exactly once, on the first transition to a terminal status.
    pub fn append_run_log(
        &self,
        run_id: &str,
        status: TaskStatus,
        progress: i32,
        log_line: &str,
    ) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;

        let run = inner
            .runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or(StoreError::NotFound("run"))?;

        run.status = status;
        if progress >= 0 {
            run.progress = progress;
        }
        if !log_line.is_empty() {
            run.logs.push(log_line.to_string());
        }
        if status.is_terminal() && run.finished_at.is_empty() {
            run.finished_at = now_string();
        }

        self.save(&inner)
    }

    pub fn list_runs(&self) -> Result<Vec<TaskRun>, StoreError> {
        Ok(self.read_inner()?.runs.clone())
    }

    pub fn list_runs_by_task(&self, task_id: &str) -> Result<Vec<TaskRun>, StoreError> {
        Ok(self
            .read_inner()?
            .runs
            .iter()
            .filter(|r| r.task_id == task_id)
            .cloned()
            .collect())
    }

    pub fn get_run(&self, run_id: &str) -> Result<TaskRun, StoreError> {
        self.read_inner()?
            .runs
            .iter()
            .find(|r| r.id == run_id)
            .cloned()
            .ok_or(StoreError::NotFound("run"))
    }

    pub fn delete_run(&self, run_id: &str) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;

        let before = inner.runs.len();
        inner.runs.retain(|r| r.id != run_id);
        if inner.runs.len() == before {
            return Err(StoreError::NotFound("run"));
        }
        self.save(&inner)
    }

    pub fn delete_runs_by_task(&self, task_id: &str) -> Result<(), StoreError> {
        let mut inner = self.write_inner()?;
        inner.runs.retain(|r| r.task_id != task_id);
        self.save(&inner)
    }

    fn save(&self, inner: &Inner) -> Result<(), StoreError> {
        let collection = TaskCollection {
            tasks: inner.tasks.clone(),
            templates: inner.templates.clone(),
            runs: inner.runs.clone(),
            updated_at: Utc::now(),
        };
        let data = serde_json::to_vec_pretty(&collection)?;
        write_atomic(&self.file_path, &data)?;
        Ok(())
    }
}

fn new_id(prefix: &str) -> String {
    let mut buf = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut buf);
    format!("{prefix}-{}", hex::encode(buf))
}

fn load_collection(file_path: &Path) -> Result<TaskCollection, StoreError> {
    if !file_path.exists() {
        return Ok(TaskCollection::default());
    }
    let data = fs::read(file_path)?;
    Ok(serde_json::from_slice(&data)?)
}
