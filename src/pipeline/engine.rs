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

//! The pipeline engine.
//!
//! `execute_task` enqueues a Run record, spawns a worker task and returns
//! immediately; the worker owns the run, drives the
//! download → upload → sync → execute state machine and streams every
//! transition to the event sink while mirroring it into the task store.
//! All collaborators (stores, vault, VCS client, dialer, sink) are
//! injected handles.

use anyhow::{anyhow, bail, Context, Result};
use chrono::Local;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use crate::model::{
    AuthMethod, Node, SvnResource, SvnResourceStatus, SvnResourceType, SvnTestResult, TaskEvent,
    TaskRunRequest, TaskStatus,
};
use crate::ssh::{AuthSpec, DialTarget, Dialer, RemoteSession, SshDialer};
use crate::store::{NodeStore, SvnResourceStore, TaskStore};
use crate::svn::{SvnClient, VcsClient};
use crate::syncd::{embedded, SyncPayload, SyncTarget};
use crate::utils::shell_quote;
use crate::vault::Vault;

use super::bootstrap::{self, HELPER_REMOTE_PATH};
use super::events::EventSink;

/// Default staging directory on the master and the slaves.
pub const DEFAULT_REMOTE_PATH: &str = "/tmp/bdeploy";

const CACHE_DIR: &str = "svn-cache";

/// Per-slave share of the remote `timeout` wrapper budget.
const SYNC_TIMEOUT_PER_SLAVE_SECS: u64 = 120;

pub struct PipelineEngine {
    nodes: Arc<NodeStore>,
    resources: Arc<SvnResourceStore>,
    tasks: Arc<TaskStore>,
    vault: Arc<Vault>,
    vcs: Arc<dyn VcsClient>,
    dialer: Arc<dyn Dialer>,
    sink: Arc<dyn EventSink>,
    data_dir: PathBuf,
}

impl PipelineEngine {
    /// Dependency-injecting constructor. Production code normally goes
    /// through [`PipelineEngine::open`].
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        nodes: Arc<NodeStore>,
        resources: Arc<SvnResourceStore>,
        tasks: Arc<TaskStore>,
        vault: Arc<Vault>,
        vcs: Arc<dyn VcsClient>,
        dialer: Arc<dyn Dialer>,
        sink: Arc<dyn EventSink>,
        data_dir: PathBuf,
    ) -> Arc<Self> {
        Arc::new(Self {
            nodes,
            resources,
            tasks,
            vault,
            vcs,
            dialer,
            sink,
            data_dir,
        })
    }

    /// Open all stores under `data_dir` and wire up the production stack.
    pub fn open(data_dir: &Path, sink: Arc<dyn EventSink>) -> Result<Arc<Self>> {
        let nodes = Arc::new(NodeStore::open(data_dir)?);
        let resources = Arc::new(SvnResourceStore::open(data_dir)?);
        let tasks = Arc::new(TaskStore::open(data_dir)?);
        let vault = Arc::new(Vault::portable(data_dir)?);

        Ok(Self::new(
            nodes,
            resources,
            tasks,
            vault,
            Arc::new(SvnClient::default()),
            Arc::new(SshDialer),
            sink,
            data_dir.to_path_buf(),
        ))
    }

    pub fn nodes(&self) -> &Arc<NodeStore> {
        &self.nodes
    }

    pub fn resources(&self) -> &Arc<SvnResourceStore> {
        &self.resources
    }

    pub fn tasks(&self) -> &Arc<TaskStore> {
        &self.tasks
    }

    pub fn vault(&self) -> &Arc<Vault> {
        &self.vault
    }

    /// Kick off a run in the background and return immediately.
    pub fn execute_task(self: &Arc<Self>, req: TaskRunRequest) -> Result<tokio::task::JoinHandle<()>> {
        if req.task_id.trim().is_empty() {
            bail!("taskId is required");
        }

        let engine = Arc::clone(self);
        Ok(tokio::spawn(async move {
            engine.run_task(req).await;
        }))
    }

    async fn run_task(self: Arc<Self>, req: TaskRunRequest) {
        let mut task_name = req.task_name.clone();
        if task_name.is_empty() {
            if let Ok(task) = self.tasks.get_task(&req.task_id) {
                task_name = task.name;
            }
        }
        if task_name.is_empty() {
            task_name = req.task_id.clone();
        }

        let run_id = self
            .tasks
            .create_run(&req.task_id, &task_name)
            .map(|run| run.id)
            .unwrap_or_default();

        let emit = |status: TaskStatus, progress: i32, log: &str| {
            self.emit(&req.task_id, &run_id, status, progress, log);
        };

        emit(TaskStatus::Downloading, 5, "[信息] 启动自动化分发流水线...");

        // ----- downloading -----

        let resource = match self.resources.get(&req.svn_resource_id) {
            Ok(resource) => resource,
            Err(_) => {
                emit(TaskStatus::Failed, 5, "[错误] 未找到 SVN 资源，任务终止。");
                return;
            }
        };

        let cache_dir = self.data_dir.join(CACHE_DIR).join(&req.svn_resource_id);
        emit(
            TaskStatus::Downloading,
            15,
            "正在建立 SVN 连接，准备拉取最新内容 (HEAD) ...",
        );

        let svn_password = self.stored_svn_password(&resource);

        if let Err(e) = std::fs::create_dir_all(&cache_dir) {
            emit(TaskStatus::Failed, 15, &format!("[错误] 创建缓存目录失败：{e}"));
            return;
        }

        let is_file = resource.kind == SvnResourceType::File;
        let base_name = artifact_base_name(&resource.url, is_file);
        let export_dest = export_destination(&cache_dir, &base_name);

        let fetched = if is_file {
            self.vcs
                .cat_to_file(&resource.url, &resource.username, &svn_password, "", &export_dest)
                .await
        } else {
            self.vcs
                .export(&resource.url, &resource.username, &svn_password, "", &export_dest)
                .await
        };
        if let Err(e) = fetched {
            emit(TaskStatus::Failed, 15, &format!("[错误] SVN 检出失败：{e}"));
            return;
        }
        emit(
            TaskStatus::Downloading,
            30,
            &format!("SVN 资源检出完成。缓存路径: {}", export_dest.display()),
        );

        // ----- uploading -----

        let master = match self.nodes.get(&req.master_server_id) {
            Ok(master) => master,
            Err(_) => {
                emit(TaskStatus::Failed, 30, "[错误] 未找到主控节点，任务终止。");
                return;
            }
        };

        let mut remote_target = non_blank(&req.remote_path, DEFAULT_REMOTE_PATH);
        if is_file {
            remote_target = join_remote(&remote_target, &base_name);
        }

        emit(
            TaskStatus::Uploading,
            45,
            &format!(
                "正在通过 {} 上传资源至主控机: {remote_target}",
                master.protocol
            ),
        );
        if let Err(e) = self.upload_to_node(&master, &export_dest, &remote_target).await {
            emit(TaskStatus::Failed, 45, &format!("[错误] 上传至主控机失败：{e}"));
            return;
        }
        emit(
            TaskStatus::Uploading,
            55,
            &format!("主控机资源上传完成：{remote_target}"),
        );

        // ----- syncing -----

        let slave_base = {
            let base = non_blank(&req.slave_remote_path, &req.remote_path);
            non_blank(&base, DEFAULT_REMOTE_PATH)
        };

        emit(
            TaskStatus::Syncing,
            65,
            &format!("主控机开始同步 {} 台从机...", req.slave_server_ids.len()),
        );
        emit(
            TaskStatus::Syncing,
            68,
            &format!("准备主控机临时同步服务 {HELPER_REMOTE_PATH}（自动校验版本，必要时覆盖上传）"),
        );

        let sync_result = self
            .sync_from_master(
                &master,
                &req.slave_server_ids,
                &remote_target,
                &slave_base,
                &req.slave_remote_paths,
                is_file,
                &base_name,
            )
            .await;
        let sync_logs = match sync_result {
            Ok(logs) => logs,
            Err(e) => {
                let mut msg = e.to_string();
                if msg.to_lowercase().contains("permission denied") {
                    msg.push_str("（请检查从机目标目录权限，或改用可写目录如 /tmp）");
                }
                if msg.starts_with("从机同步失败：") {
                    emit(TaskStatus::Failed, 65, &format!("[错误] {msg}"));
                } else {
                    emit(TaskStatus::Failed, 65, &format!("[错误] 从机同步失败：{msg}"));
                }
                return;
            }
        };

        // The diagnostic burst climbs 69..=74; extra lines stay pinned at
        // the top so progress never regresses.
        for (i, line) in sync_logs.iter().enumerate() {
            let progress = std::cmp::min(69 + i as i32, 74);
            emit(TaskStatus::Syncing, progress, line);
        }
        emit(
            TaskStatus::Syncing,
            75,
            &format!("临时同步服务执行完成，已清理 {HELPER_REMOTE_PATH}"),
        );
        emit(TaskStatus::Syncing, 77, "主控机同步从机完成。");

        // ----- executing -----

        emit(TaskStatus::Executing, 85, "正在启动远程自定义脚本执行序列...");
        if let Err(e) = self
            .execute_commands_on_nodes(&req.commands, &req.master_server_id, &req.slave_server_ids)
            .await
        {
            emit(TaskStatus::Failed, 85, &format!("[错误] 远程脚本执行失败：{e}"));
            return;
        }

        emit(
            TaskStatus::Success,
            100,
            "✓ 任务执行成功。所有节点已同步至最新状态。",
        );
    }

    fn emit(&self, task_id: &str, run_id: &str, status: TaskStatus, progress: i32, log: &str) {
        let line = format!("[{}] {log}", Local::now().format("%Y-%m-%d %H:%M:%S"));

        self.sink.emit(TaskEvent {
            task_id: task_id.to_string(),
            run_id: run_id.to_string(),
            status,
            progress,
            log: line.clone(),
        });

        let _ = self.tasks.update_task_state(task_id, status, progress);
        if !run_id.is_empty() {
            let _ = self.tasks.append_run_log(run_id, status, progress, &line);
        }
    }

    fn stored_svn_password(&self, resource: &SvnResource) -> String {
        if resource.username.is_empty() {
            return String::new();
        }
        self.vault
            .get_svn_password(&resource.id, &resource.username)
            .map(|p| p.to_string())
            .unwrap_or_default()
    }

    /// Transport client selection for a node, shared by upload, sync and
    /// execute: key and agent nodes authenticate with vault-held material,
    /// password nodes require a stored password.
    async fn dial_node(&self, node: &Node) -> Result<Box<dyn RemoteSession>> {
        let username = node.effective_username().to_string();

        let auth = match node.auth_method {
            AuthMethod::Key => AuthSpec::KeyFile {
                key_path: node.key_path.clone().into(),
                passphrase: self.vault.get_key_passphrase(&node.id).ok(),
            },
            AuthMethod::Agent => AuthSpec::Agent,
            AuthMethod::Password => {
                let password = self
                    .vault
                    .get_password(&node.id, &username)
                    .map_err(|_| anyhow!("missing password for node {}", node.name))?;
                if password.trim().is_empty() {
                    bail!("missing password for node {}", node.name);
                }
                AuthSpec::Password(password)
            }
        };

        let session = self
            .dialer
            .dial(&DialTarget {
                host: node.host.clone(),
                port: node.port,
                username,
                auth,
            })
            .await?;
        Ok(session)
    }

    async fn upload_to_node(&self, node: &Node, local: &Path, remote_path: &str) -> Result<()> {
        let session = self.dial_node(node).await?;
        let remote = non_blank(remote_path, DEFAULT_REMOTE_PATH);
        let result = session.upload_path(local, &remote).await;
        session.close().await;
        Ok(result?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn sync_from_master(
        &self,
        master: &Node,
        slave_ids: &[String],
        remote_path: &str,
        slave_remote_path: &str,
        slave_remote_paths: &HashMap<String, String>,
        is_file: bool,
        base_name: &str,
    ) -> Result<Vec<String>> {
        if slave_ids.is_empty() {
            return Ok(Vec::new());
        }

        let session = self.dial_node(master).await?;

        let deployment = match bootstrap::ensure_helper(
            session.as_ref(),
            HELPER_REMOTE_PATH,
            embedded::binary_for,
        )
        .await
        {
            Ok(deployment) => deployment,
            Err(e) => {
                session.close().await;
                return Err(anyhow!("部署同步服务失败：{e}"));
            }
        };

        let result = self
            .run_fanout(
                session.as_ref(),
                &deployment,
                slave_ids,
                remote_path,
                slave_remote_path,
                slave_remote_paths,
                is_file,
                base_name,
            )
            .await;

        // Best-effort cleanup regardless of the fan-out outcome.
        let _ = session
            .exec(&format!("rm -f {}", shell_quote(HELPER_REMOTE_PATH)))
            .await;
        session.close().await;

        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_fanout(
        &self,
        session: &dyn RemoteSession,
        deployment: &bootstrap::HelperDeployment,
        slave_ids: &[String],
        remote_path: &str,
        slave_remote_path: &str,
        slave_remote_paths: &HashMap<String, String>,
        is_file: bool,
        base_name: &str,
    ) -> Result<Vec<String>> {
        let mut logs = Vec::with_capacity(16);
        logs.push(format!("同步服务路径：{HELPER_REMOTE_PATH}"));
        logs.push(format!(
            "主控机系统检测：{}/{}",
            deployment.os, deployment.arch
        ));
        if deployment.updated {
            logs.push(format!(
                "同步服务已更新：{HELPER_REMOTE_PATH} (version={}, arch={})",
                embedded::VERSION,
                deployment.arch
            ));
        } else {
            logs.push(format!(
                "同步服务已就绪：{HELPER_REMOTE_PATH} (version={}, arch={})",
                embedded::VERSION,
                deployment.arch
            ));
        }
        if deployment.size > 0 && !deployment.crc32.is_empty() {
            logs.push(format!(
                "同步服务校验：size={}B crc32={}",
                deployment.size, deployment.crc32
            ));
        }

        if let Ok(output) = session
            .exec("df -k /tmp | tail -n +2 | awk '{print $4\"K\"\"/\"$2\"K\"\"(\"$5\" used)\"}'")
            .await
        {
            let info = output.trim();
            if !info.is_empty() {
                logs.push(format!("/tmp 磁盘占用：{info}"));
            }
        }

        let src = non_blank(remote_path, DEFAULT_REMOTE_PATH);

        let mut dest = non_blank(slave_remote_path, remote_path);
        dest = non_blank(&dest, DEFAULT_REMOTE_PATH);
        if is_file && !base_name.is_empty() {
            dest = join_remote(&dest, base_name);
        }

        let mut slaves = Vec::with_capacity(slave_ids.len());
        let mut slave_names = Vec::with_capacity(slave_ids.len());

        for slave_id in slave_ids {
            let slave = self.nodes.get(slave_id).context("从机同步失败：未找到从机节点")?;
            let user = slave.effective_username().to_string();

            if slave.auth_method != AuthMethod::Password {
                bail!(
                    "从机同步失败：主控机同步服务仅支持密码认证，从机 {} 请改为密码认证或改用客户端直传模式",
                    slave.name
                );
            }

            let password = self
                .vault
                .get_password(&slave.id, &user)
                .map(|p| p.to_string())
                .unwrap_or_default();
            if password.trim().is_empty() {
                bail!("从机同步失败：未找到从机 {} 的密码，请先保存密码", slave.name);
            }

            let mut slave_dest = dest.clone();
            if let Some(custom) = slave_remote_paths.get(slave_id) {
                if !custom.trim().is_empty() {
                    slave_dest = if is_file && !base_name.is_empty() {
                        join_remote(custom, base_name)
                    } else {
                        custom.clone()
                    };
                }
            }

            slave_names.push(if slave.name.trim().is_empty() {
                slave.host.clone()
            } else {
                slave.name.clone()
            });
            slaves.push(SyncTarget {
                id: slave.id,
                name: slave.name,
                host: slave.host,
                port: slave.port,
                user,
                password,
                remote_path: slave_dest,
            });
        }

        slave_names.sort();
        logs.push(format!("同步目标从机：{}", slave_names.join(", ")));

        let payload = SyncPayload {
            version: embedded::VERSION.to_string(),
            checksum: if deployment.crc32.is_empty() {
                None
            } else {
                Some(deployment.crc32.clone())
            },
            binary_size: if deployment.size > 0 {
                Some(deployment.size as u64)
            } else {
                None
            },
            source_path: src,
            remote_path: dest,
            slaves,
        };

        let payload_b64 = payload.encode()?;
        let timeout_secs = SYNC_TIMEOUT_PER_SLAVE_SECS * payload.slaves.len() as u64;

        let mut cmd = format!(
            "{} --payload {}",
            shell_quote(HELPER_REMOTE_PATH),
            shell_quote(&payload_b64)
        );
        if session.exec("command -v timeout").await.is_ok() {
            cmd = format!("timeout {timeout_secs}s {cmd}");
        } else {
            logs.push("注意：主控机未安装 timeout，无法设置同步超时保护".to_string());
        }

        logs.push(format!(
            "同步执行开始：{}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));

        if let Err(e) = session.exec(&cmd).await {
            let msg = match e {
                crate::ssh::Error::CommandFailed(output) => output,
                other => other.to_string(),
            };
            bail!("从机同步失败：{msg}");
        }

        logs.push(format!(
            "同步执行结束：{}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
        logs.push(format!(
            "同步耗时预估：{timeout_secs}s（按 {} 台从机计算）",
            payload.slaves.len()
        ));

        Ok(logs)
    }

    async fn execute_commands_on_nodes(
        &self,
        commands: &[String],
        master_id: &str,
        slave_ids: &[String],
    ) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }

        let mut ids = Vec::with_capacity(1 + slave_ids.len());
        ids.push(master_id.to_string());
        ids.extend(slave_ids.iter().cloned());

        for id in &ids {
            let node = self.nodes.get(id)?;
            let session = self.dial_node(&node).await?;

            for command in commands {
                if command.trim().is_empty() {
                    continue;
                }
                if let Err(e) = session.exec(command).await {
                    session.close().await;
                    return Err(e.into());
                }
            }
            session.close().await;
        }

        Ok(())
    }

    // ===== resource maintenance =====

    /// Re-query the resource revision and stamp status/lastChecked.
    pub async fn refresh_resource(&self, resource_id: &str) -> Result<SvnResource> {
        let mut resource = self.resources.get(resource_id)?;
        let password = self.stored_svn_password(&resource);

        match self.vcs.info(&resource.url, &resource.username, &password).await {
            Ok(revision) => {
                resource.revision = revision;
                resource.status = SvnResourceStatus::Online;
            }
            Err(_) => {
                resource.status = SvnResourceStatus::Error;
            }
        }
        resource.last_checked = String::new();
        self.resources.update(resource.clone())?;
        self.resources.get(resource_id).map_err(Into::into)
    }

    /// Export a resource into the local cache (or `target_dir`), returning
    /// the export destination.
    pub async fn checkout_resource(
        &self,
        resource_id: &str,
        target_dir: Option<&Path>,
    ) -> Result<PathBuf> {
        let mut resource = self.resources.get(resource_id)?;
        let password = self.stored_svn_password(&resource);

        let cache_dir = match target_dir {
            Some(dir) => dir.to_path_buf(),
            None => self.data_dir.join(CACHE_DIR).join(resource_id),
        };
        std::fs::create_dir_all(&cache_dir)?;

        let is_file = resource.kind == SvnResourceType::File;
        let base_name = artifact_base_name(&resource.url, is_file);
        let export_dest = export_destination(&cache_dir, &base_name);

        resource.status = SvnResourceStatus::Syncing;
        resource.last_checked = String::new();
        let _ = self.resources.update(resource.clone());

        let fetched = if is_file {
            self.vcs
                .cat_to_file(&resource.url, &resource.username, &password, "", &export_dest)
                .await
        } else {
            self.vcs
                .export(&resource.url, &resource.username, &password, "", &export_dest)
                .await
        };

        resource.status = if fetched.is_ok() {
            SvnResourceStatus::Online
        } else {
            SvnResourceStatus::Error
        };
        resource.last_checked = String::new();
        let _ = self.resources.update(resource);

        fetched?;
        Ok(export_dest)
    }

    /// Probe the VCS server, preferring a stored password when none is
    /// supplied. Never mutates the resource record.
    pub async fn test_vcs(
        &self,
        url: &str,
        username: &str,
        password: &str,
        resource_id: &str,
    ) -> SvnTestResult {
        let mut password = password.to_string();
        if password.is_empty() && !resource_id.is_empty() && !username.is_empty() {
            if let Ok(stored) = self.vault.get_svn_password(resource_id, username) {
                password = stored.to_string();
            }
        }

        let start = Instant::now();
        let outcome = self.vcs.info(url, username, &password).await;
        let duration_ms = start.elapsed().as_millis() as i64;
        let checked_at = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();

        match outcome {
            Ok(revision) => SvnTestResult {
                ok: true,
                revision,
                message: "SVN 连接正常".to_string(),
                duration_ms,
                checked_at,
            },
            Err(e) => SvnTestResult {
                ok: false,
                revision: String::new(),
                message: e.to_string(),
                duration_ms,
                checked_at,
            },
        }
    }
}

/// Final URL segment after stripping trailing slashes. File resources get
/// the `package.bin` fallback when the URL has no usable tail.
fn artifact_base_name(url: &str, is_file: bool) -> String {
    let trimmed = url.trim_end_matches('/');
    let base = trimmed.rsplit('/').next().unwrap_or("").to_string();

    if is_file && (base.is_empty() || base == "." || base == "/") {
        return "package.bin".to_string();
    }
    base
}

/// Local path the VCS fetch lands in: `<cache>/<basename>` when the URL
/// has a non-trivial tail, the cache dir itself otherwise.
fn export_destination(cache_dir: &Path, base_name: &str) -> PathBuf {
    if base_name.is_empty() || base_name == "." || base_name == "/" {
        cache_dir.to_path_buf()
    } else {
        cache_dir.join(base_name)
    }
}

fn non_blank(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}

/// Join with forward slashes regardless of the local OS separator.
fn join_remote(dir: &str, name: &str) -> String {
    let dir = dir.trim_end_matches('/');
    if dir.is_empty() {
        format!("/{name}")
    } else {
        format!("{dir}/{name}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_artifact_base_name() {
        assert_eq!(artifact_base_name("svn://x/app", false), "app");
        assert_eq!(artifact_base_name("svn://x/app/", false), "app");
        assert_eq!(artifact_base_name("svn://x/pkg.tar.gz", true), "pkg.tar.gz");
        assert_eq!(artifact_base_name("", true), "package.bin");
    }

    #[test]
    fn test_join_remote_is_slash_normalised() {
        assert_eq!(join_remote("/tmp/bdeploy", "pkg.bin"), "/tmp/bdeploy/pkg.bin");
        assert_eq!(join_remote("/tmp/bdeploy/", "pkg.bin"), "/tmp/bdeploy/pkg.bin");
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank("  ", "/tmp/bdeploy"), "/tmp/bdeploy");
        assert_eq!(non_blank("/srv/app", "/tmp/bdeploy"), "/srv/app");
    }
}
