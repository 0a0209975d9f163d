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

//! End-to-end pipeline tests against scripted transport and VCS mocks.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tokio::sync::mpsc;

use bdeploy::model::{
    AuthMethod, Node, SvnResource, SvnResourceType, TaskDefinition, TaskEvent, TaskRunRequest,
    TaskStatus,
};
use bdeploy::pipeline::bootstrap::{self, HELPER_REMOTE_PATH};
use bdeploy::pipeline::{ChannelSink, PipelineEngine};
use bdeploy::ssh::{DialTarget, Dialer, Error, RemoteSession};
use bdeploy::store::{NodeStore, SvnResourceStore, TaskStore};
use bdeploy::svn::VcsClient;
use bdeploy::syncd;
use bdeploy::vault::Vault;

// ===== scripted remote side =====

#[derive(Default)]
struct RemoteLog {
    commands: Vec<String>,
    /// (kind, remote path); kind is "path" or "bytes".
    uploads: Vec<(String, String)>,
}

#[derive(Clone)]
struct ScriptedRemote {
    log: Arc<Mutex<RemoteLog>>,
    /// What `<helper> --version` prints; `None` makes the probe fail.
    helper_version: Option<String>,
    has_timeout: bool,
}

impl ScriptedRemote {
    fn new(helper_version: Option<&str>) -> Self {
        Self {
            log: Arc::new(Mutex::new(RemoteLog::default())),
            helper_version: helper_version.map(str::to_string),
            has_timeout: true,
        }
    }

    fn commands(&self) -> Vec<String> {
        self.log.lock().unwrap().commands.clone()
    }

    fn uploads(&self) -> Vec<(String, String)> {
        self.log.lock().unwrap().uploads.clone()
    }
}

#[async_trait]
impl RemoteSession for ScriptedRemote {
    async fn exec(&self, command: &str) -> Result<String, Error> {
        self.log.lock().unwrap().commands.push(command.to_string());

        if command == "uname -s" {
            return Ok("Linux\n".into());
        }
        if command == "uname -m" {
            return Ok("x86_64\n".into());
        }
        if command.ends_with(" --version") {
            return match &self.helper_version {
                Some(version) => Ok(format!("{version}\n")),
                None => Err(Error::CommandFailed("No such file or directory".into())),
            };
        }
        if command == "command -v timeout" {
            return if self.has_timeout {
                Ok("/usr/bin/timeout\n".into())
            } else {
                Err(Error::CommandFailed(String::new()))
            };
        }
        if command.starts_with("df -k") {
            return Ok("87654K/102400K(15% used)\n".into());
        }
        // chmod, rm, the payload invocation and user commands all succeed.
        Ok(String::new())
    }

    async fn upload_path(&self, local: &Path, remote: &str) -> Result<(), Error> {
        assert!(local.exists(), "upload source {local:?} does not exist");
        self.log
            .lock()
            .unwrap()
            .uploads
            .push(("path".into(), remote.to_string()));
        Ok(())
    }

    async fn upload_bytes(&self, _data: &[u8], remote: &str) -> Result<(), Error> {
        self.log
            .lock()
            .unwrap()
            .uploads
            .push(("bytes".into(), remote.to_string()));
        Ok(())
    }

    async fn close(&self) {}
}

struct ScriptedDialer {
    remote: ScriptedRemote,
}

#[async_trait]
impl Dialer for ScriptedDialer {
    async fn dial(&self, _target: &DialTarget) -> Result<Box<dyn RemoteSession>, Error> {
        Ok(Box::new(self.remote.clone()))
    }
}

// ===== scripted VCS =====

struct ScriptedVcs;

#[async_trait]
impl VcsClient for ScriptedVcs {
    async fn info(&self, _url: &str, _username: &str, _password: &str) -> Result<String> {
        Ok("42".into())
    }

    async fn export(
        &self,
        _url: &str,
        _username: &str,
        _password: &str,
        _revision: &str,
        dest: &Path,
    ) -> Result<()> {
        tokio::fs::create_dir_all(dest).await?;
        tokio::fs::write(dest.join("artifact.txt"), b"payload").await?;
        Ok(())
    }

    async fn cat_to_file(
        &self,
        _url: &str,
        _username: &str,
        _password: &str,
        _revision: &str,
        dest: &Path,
    ) -> Result<()> {
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(dest, b"payload").await?;
        Ok(())
    }

    async fn check_available(&self) -> Result<()> {
        Ok(())
    }
}

// ===== fixture =====

struct Fixture {
    engine: Arc<PipelineEngine>,
    events: mpsc::UnboundedReceiver<TaskEvent>,
    remote: ScriptedRemote,
    _data_dir: TempDir,
}

/// Two nodes (master `m`, password slave `s1`), a folder resource `r` and
/// task `t` with one command, as in the standard deploy fixture.
fn fixture(remote: ScriptedRemote, store_slave_password: bool) -> Fixture {
    let data_dir = TempDir::new().unwrap();

    let nodes = Arc::new(NodeStore::open(data_dir.path()).unwrap());
    nodes
        .add(Node {
            id: "m".into(),
            name: "master".into(),
            host: "10.0.0.1".into(),
            port: 22,
            is_master: true,
            username: "root".into(),
            auth_method: AuthMethod::Password,
            ..Default::default()
        })
        .unwrap();
    nodes
        .add(Node {
            id: "s1".into(),
            name: "slave-1".into(),
            host: "10.0.0.2".into(),
            port: 22,
            username: "root".into(),
            auth_method: AuthMethod::Password,
            ..Default::default()
        })
        .unwrap();

    let resources = Arc::new(SvnResourceStore::open(data_dir.path()).unwrap());
    resources
        .add(SvnResource {
            id: "r".into(),
            url: "svn://x/app".into(),
            name: "app".into(),
            kind: SvnResourceType::Folder,
            ..Default::default()
        })
        .unwrap();

    let tasks = Arc::new(TaskStore::open(data_dir.path()).unwrap());
    tasks
        .add_task(TaskDefinition {
            id: "t".into(),
            name: "deploy app".into(),
            svn_resource_id: "r".into(),
            master_server_id: "m".into(),
            slave_server_ids: vec!["s1".into()],
            remote_path: "/tmp/app".into(),
            commands: vec!["echo ok".into()],
            ..Default::default()
        })
        .unwrap();

    let vault = Arc::new(Vault::portable(data_dir.path()).unwrap());
    vault.set_password("m", "root", "pw-master").unwrap();
    if store_slave_password {
        vault.set_password("s1", "root", "pw").unwrap();
    }

    let (sink, events) = ChannelSink::new();
    let engine = PipelineEngine::new(
        nodes,
        resources,
        tasks,
        vault,
        Arc::new(ScriptedVcs),
        Arc::new(ScriptedDialer {
            remote: remote.clone(),
        }),
        Arc::new(sink),
        data_dir.path().to_path_buf(),
    );

    Fixture {
        engine,
        events,
        remote,
        _data_dir: data_dir,
    }
}

fn request() -> TaskRunRequest {
    TaskRunRequest {
        task_id: "t".into(),
        svn_resource_id: "r".into(),
        master_server_id: "m".into(),
        slave_server_ids: vec!["s1".into()],
        remote_path: "/tmp/app".into(),
        commands: vec!["echo ok".into()],
        ..Default::default()
    }
}

async fn run_and_collect(fixture: &mut Fixture, req: TaskRunRequest) -> Vec<TaskEvent> {
    let handle = fixture.engine.execute_task(req).unwrap();
    handle.await.unwrap();

    let mut events = Vec::new();
    while let Ok(event) = fixture.events.try_recv() {
        events.push(event);
    }
    events
}

// ===== tests =====

#[tokio::test]
async fn test_happy_path_event_ladder() {
    let remote = ScriptedRemote::new(Some(syncd::VERSION));
    let mut fixture = fixture(remote, true);

    let events = run_and_collect(&mut fixture, request()).await;

    let observed: Vec<(TaskStatus, i32)> =
        events.iter().map(|e| (e.status, e.progress)).collect();
    let expected = vec![
        (TaskStatus::Downloading, 5),
        (TaskStatus::Downloading, 15),
        (TaskStatus::Downloading, 30),
        (TaskStatus::Uploading, 45),
        (TaskStatus::Uploading, 55),
        (TaskStatus::Syncing, 65),
        (TaskStatus::Syncing, 68),
        // diagnostic burst: 8 log lines climbing 69..=74
        (TaskStatus::Syncing, 69),
        (TaskStatus::Syncing, 70),
        (TaskStatus::Syncing, 71),
        (TaskStatus::Syncing, 72),
        (TaskStatus::Syncing, 73),
        (TaskStatus::Syncing, 74),
        (TaskStatus::Syncing, 74),
        (TaskStatus::Syncing, 74),
        (TaskStatus::Syncing, 75),
        (TaskStatus::Syncing, 77),
        (TaskStatus::Executing, 85),
        (TaskStatus::Success, 100),
    ];
    assert_eq!(observed, expected);

    // The run record reached its terminal state with a full log.
    let runs = fixture.engine.tasks().list_runs().unwrap();
    let run = &runs[0];
    assert_eq!(run.status, TaskStatus::Success);
    assert_eq!(run.progress, 100);
    assert!(!run.finished_at.is_empty());
    assert_eq!(run.logs.len(), events.len());

    // Every log line carries the timestamp prefix.
    for event in &events {
        assert!(event.log.starts_with('['), "{}", event.log);
    }
}

#[tokio::test]
async fn test_progress_is_monotonic_with_single_terminal() {
    let remote = ScriptedRemote::new(Some(syncd::VERSION));
    let mut fixture = fixture(remote, true);

    let events = run_and_collect(&mut fixture, request()).await;

    assert!(events.first().unwrap().progress >= 5);
    for pair in events.windows(2) {
        assert!(
            pair[1].progress >= pair[0].progress,
            "progress regressed: {} -> {}",
            pair[0].progress,
            pair[1].progress
        );
    }
    assert_eq!(events.iter().filter(|e| e.progress == 100).count(), 1);

    // Status sequence is a prefix walk of the stage order.
    let order = [
        TaskStatus::Downloading,
        TaskStatus::Uploading,
        TaskStatus::Syncing,
        TaskStatus::Executing,
        TaskStatus::Success,
    ];
    let mut stage = 0;
    for event in &events {
        let position = order.iter().position(|s| *s == event.status).unwrap();
        assert!(position >= stage, "status went backwards");
        stage = position;
    }
}

#[tokio::test]
async fn test_missing_slave_password_fails_during_sync() {
    let remote = ScriptedRemote::new(Some(syncd::VERSION));
    let mut fixture = fixture(remote, false);

    let events = run_and_collect(&mut fixture, request()).await;

    let last = events.last().unwrap();
    assert_eq!(last.status, TaskStatus::Failed);
    assert_eq!(last.progress, 65);
    assert!(last.log.contains("未找到从机"), "{}", last.log);
    assert!(last.log.contains("[错误]"), "{}", last.log);

    // Failure is terminal: nothing is emitted after the failed event.
    let failed_at = events
        .iter()
        .position(|e| e.status == TaskStatus::Failed)
        .unwrap();
    assert_eq!(failed_at, events.len() - 1);

    let runs = fixture.engine.tasks().list_runs().unwrap();
    let run = &runs[0];
    assert_eq!(run.status, TaskStatus::Failed);
    assert!(!run.finished_at.is_empty());
}

#[tokio::test]
async fn test_helper_upload_skipped_on_version_match() {
    let remote = ScriptedRemote::new(Some(syncd::VERSION));
    let mut fixture = fixture(remote.clone(), true);

    let events = run_and_collect(&mut fixture, request()).await;
    assert_eq!(events.last().unwrap().status, TaskStatus::Success);

    // Only the artifact went over SFTP; the helper path never saw a
    // transfer session.
    let uploads = remote.uploads();
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0], ("path".to_string(), "/tmp/app".to_string()));
    assert!(uploads.iter().all(|(_, remote)| remote != HELPER_REMOTE_PATH));

    // The helper still ran (wrapped in the remote timeout utility) and
    // was cleaned up afterwards.
    let commands = remote.commands();
    assert!(commands
        .iter()
        .any(|c| c.starts_with("timeout 120s") && c.contains("--payload")));
    assert!(commands
        .iter()
        .any(|c| c == &format!("rm -f {HELPER_REMOTE_PATH}")));
    assert!(commands.iter().any(|c| c == "echo ok"));
}

#[tokio::test]
async fn test_missing_resource_fails_immediately() {
    let remote = ScriptedRemote::new(Some(syncd::VERSION));
    let mut fixture = fixture(remote, true);

    let mut req = request();
    req.svn_resource_id = "missing".into();
    let events = run_and_collect(&mut fixture, req).await;

    assert_eq!(events.len(), 2);
    assert_eq!(events[1].status, TaskStatus::Failed);
    assert_eq!(events[1].progress, 5);
    assert!(events[1].log.contains("未找到 SVN 资源"));
}

#[tokio::test]
async fn test_non_password_slave_fails_sync() {
    let remote = ScriptedRemote::new(Some(syncd::VERSION));
    let mut fixture = fixture(remote, true);

    let mut slave = fixture.engine.nodes().get("s1").unwrap();
    slave.auth_method = AuthMethod::Key;
    slave.key_path = "/root/.ssh/id_ed25519".into();
    fixture.engine.nodes().update(slave).unwrap();

    let events = run_and_collect(&mut fixture, request()).await;

    let last = events.last().unwrap();
    assert_eq!(last.status, TaskStatus::Failed);
    assert!(last.log.contains("仅支持密码认证"), "{}", last.log);
}

#[tokio::test]
async fn test_blank_task_id_is_rejected_upfront() {
    let remote = ScriptedRemote::new(Some(syncd::VERSION));
    let fixture = fixture(remote, true);

    let mut req = request();
    req.task_id = "  ".into();
    assert!(fixture.engine.execute_task(req).is_err());
}

// ===== helper bootstrap =====

const FAKE_HELPER: &[u8] = b"#!/bin/sh\nexit 0\n";

#[tokio::test]
async fn test_bootstrap_reuploads_on_version_mismatch() {
    let remote = ScriptedRemote::new(Some("0.9.9"));

    let deployment = bootstrap::ensure_helper(&remote, HELPER_REMOTE_PATH, |_, _| FAKE_HELPER)
        .await
        .unwrap();

    assert!(deployment.updated);
    assert_eq!(deployment.os, "linux");
    assert_eq!(deployment.arch, "amd64");
    assert_eq!(deployment.size, FAKE_HELPER.len());
    assert_eq!(deployment.crc32, format!("{:08x}", crc32fast::hash(FAKE_HELPER)));

    let uploads = remote.uploads();
    assert_eq!(uploads, vec![("bytes".to_string(), HELPER_REMOTE_PATH.to_string())]);
    assert!(remote
        .commands()
        .iter()
        .any(|c| c == &format!("chmod +x {HELPER_REMOTE_PATH}")));
}

#[tokio::test]
async fn test_bootstrap_reuploads_when_probe_fails() {
    let remote = ScriptedRemote::new(None);

    let deployment = bootstrap::ensure_helper(&remote, HELPER_REMOTE_PATH, |_, _| FAKE_HELPER)
        .await
        .unwrap();

    assert!(deployment.updated);
    assert_eq!(remote.uploads().len(), 1);
}

#[tokio::test]
async fn test_bootstrap_skips_on_version_match() {
    let remote = ScriptedRemote::new(Some(syncd::VERSION));

    let deployment = bootstrap::ensure_helper(&remote, HELPER_REMOTE_PATH, |_, _| FAKE_HELPER)
        .await
        .unwrap();

    assert!(!deployment.updated);
    assert_eq!(deployment.size, 0);
    assert!(deployment.crc32.is_empty());
    assert!(remote.uploads().is_empty());
}

#[tokio::test]
async fn test_bootstrap_rejects_empty_binary() {
    let remote = ScriptedRemote::new(Some("0.9.9"));

    let err = bootstrap::ensure_helper(&remote, HELPER_REMOTE_PATH, |_, _| &[][..])
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not embedded"));
    assert!(remote.uploads().is_empty());
}

// ===== payload plumbing =====

#[tokio::test]
async fn test_fanout_payload_carries_slave_credentials() {
    let remote = ScriptedRemote::new(Some(syncd::VERSION));
    let mut fixture = fixture(remote.clone(), true);

    let events = run_and_collect(&mut fixture, request()).await;
    assert_eq!(events.last().unwrap().status, TaskStatus::Success);

    let commands = remote.commands();
    let invocation = commands
        .iter()
        .find(|c| c.contains("--payload"))
        .expect("helper invocation missing");

    let b64 = invocation.split_whitespace().last().unwrap();
    let payload = syncd::SyncPayload::decode(b64).unwrap();

    assert_eq!(payload.version, syncd::VERSION);
    assert_eq!(payload.source_path, "/tmp/app");
    assert_eq!(payload.remote_path, "/tmp/app");
    assert_eq!(payload.slaves.len(), 1);
    assert_eq!(payload.slaves[0].id, "s1");
    assert_eq!(payload.slaves[0].host, "10.0.0.2");
    assert_eq!(payload.slaves[0].user, "root");
    assert_eq!(payload.slaves[0].password, "pw");
    assert_eq!(payload.slaves[0].remote_path, "/tmp/app");
}
