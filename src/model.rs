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

//! Domain records shared across the stores, the prober and the pipeline.
//!
//! Secrets are never part of these records: passwords, key passphrases and
//! VCS passwords live only in the [`crate::vault::Vault`], addressed by
//! composite account keys.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// Transfer protocol tag carried on a node. Informational only; the
/// transport always speaks SFTP over SSH.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Protocol {
    #[default]
    #[serde(rename = "SFTP")]
    Sftp,
    #[serde(rename = "SCP")]
    Scp,
    #[serde(rename = "FTP")]
    Ftp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Protocol::Sftp => "SFTP",
            Protocol::Scp => "SCP",
            Protocol::Ftp => "FTP",
        };
        f.write_str(s)
    }
}

/// How the transport authenticates against a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthMethod {
    #[default]
    Password,
    Key,
    Agent,
}

/// A managed host.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Unique id, assigned on insert when empty.
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub is_master: bool,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
    #[serde(default)]
    pub auth_method: AuthMethod,
    /// Private key path, only meaningful with [`AuthMethod::Key`].
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub key_path: String,
}

impl Node {
    /// Effective SSH username; blank falls back to `root`.
    pub fn effective_username(&self) -> &str {
        if self.username.trim().is_empty() {
            "root"
        } else {
            &self.username
        }
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}:{}", self.effective_username(), self.host, self.port)
    }
}

/// Connection state produced by the prober. Ephemeral, never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Disconnected,
    Testing,
    Error,
}

/// Result of a connectivity probe.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeStatus {
    /// Handshake latency in milliseconds; 0 when the probe failed.
    pub latency: i64,
    pub last_checked: String,
    pub status: ConnectionStatus,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub error_msg: String,
}

/// Persisted node collection (`nodes.json`).
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct NodeCollection {
    #[serde(default)]
    pub nodes: Vec<Node>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Whether a VCS resource exports as a single file or a directory tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SvnResourceType {
    File,
    #[default]
    Folder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SvnResourceStatus {
    #[default]
    Online,
    Error,
    Syncing,
}

/// A named remote artifact reference on the VCS server.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SvnResource {
    #[serde(default)]
    pub id: String,
    pub url: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: SvnResourceType,
    /// Pinned revision; `HEAD` means follow the repository head.
    #[serde(default)]
    pub revision: String,
    #[serde(default)]
    pub status: SvnResourceStatus,
    #[serde(default)]
    pub last_checked: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub size: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub username: String,
}

/// Persisted resource collection (`svn-resources.json`).
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SvnResourceCollection {
    #[serde(default)]
    pub resources: Vec<SvnResource>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Outcome of a VCS connectivity check.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SvnTestResult {
    pub ok: bool,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub revision: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub message: String,
    pub duration_ms: i64,
    pub checked_at: String,
}

/// Pipeline state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    #[default]
    Idle,
    Downloading,
    Uploading,
    Syncing,
    Executing,
    Success,
    Failed,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Idle => "IDLE",
            TaskStatus::Downloading => "DOWNLOADING",
            TaskStatus::Uploading => "UPLOADING",
            TaskStatus::Syncing => "SYNCING",
            TaskStatus::Executing => "EXECUTING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// A deployment plan. Configuration and state only, never credentials.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinition {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub svn_resource_id: String,
    pub master_server_id: String,
    #[serde(default)]
    pub slave_server_ids: Vec<String>,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slave_remote_path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub slave_remote_paths: HashMap<String, String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_run_at: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub template_id: String,
}

/// Immutable snapshot of a plan for re-use.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskTemplate {
    #[serde(default)]
    pub id: String,
    pub name: String,
    pub svn_resource_id: String,
    pub master_server_id: String,
    #[serde(default)]
    pub slave_server_ids: Vec<String>,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slave_remote_path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub slave_remote_paths: HashMap<String, String>,
    #[serde(default)]
    pub commands: Vec<String>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub source_task_id: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
}

/// One execution instance of a task.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: String,
    pub task_id: String,
    pub task_name: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub progress: i32,
    #[serde(default)]
    pub started_at: String,
    /// Set exactly once, on the first transition to a terminal status.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub finished_at: String,
    #[serde(default)]
    pub logs: Vec<String>,
}

/// Persisted task collection (`tasks.json`): tasks, templates and runs
/// share one file.
#[derive(Debug, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskCollection {
    #[serde(default)]
    pub tasks: Vec<TaskDefinition>,
    #[serde(default)]
    pub templates: Vec<TaskTemplate>,
    #[serde(default)]
    pub runs: Vec<TaskRun>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

/// Request to launch one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TaskRunRequest {
    pub task_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub task_name: String,
    pub svn_resource_id: String,
    pub master_server_id: String,
    #[serde(default)]
    pub slave_server_ids: Vec<String>,
    #[serde(default)]
    pub remote_path: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub slave_remote_path: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub slave_remote_paths: HashMap<String, String>,
    #[serde(default)]
    pub commands: Vec<String>,
}

impl TaskRunRequest {
    /// Build a run request from a stored plan.
    pub fn from_task(task: &TaskDefinition) -> Self {
        Self {
            task_id: task.id.clone(),
            task_name: task.name.clone(),
            svn_resource_id: task.svn_resource_id.clone(),
            master_server_id: task.master_server_id.clone(),
            slave_server_ids: task.slave_server_ids.clone(),
            remote_path: task.remote_path.clone(),
            slave_remote_path: task.slave_remote_path.clone(),
            slave_remote_paths: task.slave_remote_paths.clone(),
            commands: task.commands.clone(),
        }
    }
}

/// Progress event streamed to the front-end sink while a run executes.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    pub task_id: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub run_id: String,
    pub status: TaskStatus,
    pub progress: i32,
    pub log: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_method_wire_names() {
        assert_eq!(serde_json::to_string(&AuthMethod::Password).unwrap(), "\"password\"");
        assert_eq!(serde_json::to_string(&AuthMethod::Key).unwrap(), "\"key\"");
        assert_eq!(serde_json::to_string(&AuthMethod::Agent).unwrap(), "\"agent\"");
    }

    #[test]
    fn test_task_status_wire_names() {
        assert_eq!(serde_json::to_string(&TaskStatus::Downloading).unwrap(), "\"DOWNLOADING\"");
        assert_eq!(serde_json::to_string(&TaskStatus::Success).unwrap(), "\"SUCCESS\"");
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Syncing.is_terminal());
    }

    #[test]
    fn test_node_effective_username() {
        let mut node = Node {
            username: "  ".into(),
            ..Default::default()
        };
        assert_eq!(node.effective_username(), "root");
        node.username = "deploy".into();
        assert_eq!(node.effective_username(), "deploy");
    }

    #[test]
    fn test_node_json_shape() {
        let node = Node {
            id: "n1".into(),
            name: "web-1".into(),
            host: "10.0.0.2".into(),
            port: 22,
            is_master: true,
            username: "root".into(),
            auth_method: AuthMethod::Key,
            key_path: "/root/.ssh/id_ed25519".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&node).unwrap();
        assert_eq!(json["isMaster"], true);
        assert_eq!(json["authMethod"], "key");
        assert_eq!(json["keyPath"], "/root/.ssh/id_ed25519");
        assert_eq!(json["protocol"], "SFTP");
    }
}
