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

//! Auth-aware connectivity probing.
//!
//! A probe dials the node with whatever credentials apply (vault-stored
//! ones win for password auth), runs a trivial command, and reports the
//! measured latency or a categorized error message.

use chrono::Local;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::model::{AuthMethod, ConnectionStatus, Node, NodeStatus};
use crate::vault::Vault;

use super::client::AuthSpec;
use super::session::{DialTarget, Dialer};

/// The command used to verify a session actually executes.
const PROBE_COMMAND: &str = "echo 'ping'";

pub struct Prober {
    dialer: Arc<dyn Dialer>,
    vault: Arc<Vault>,
}

impl Prober {
    pub fn new(dialer: Arc<dyn Dialer>, vault: Arc<Vault>) -> Self {
        Self { dialer, vault }
    }

    /// Probe one node, resolving credentials through the vault.
    ///
    /// For password auth a stored password for (node id, node username)
    /// is preferred over the supplied arguments.
    pub async fn test(&self, node: &Node, username: &str, password: &str) -> NodeStatus {
        let target = match self.resolve_target(node, username, password) {
            Ok(target) => target,
            Err(msg) => return error_status(msg),
        };
        self.probe(target).await
    }

    /// Probe with caller-supplied credentials, never consulting the vault.
    /// Used when validating credentials before they are saved.
    pub async fn test_with_credentials(
        &self,
        node: &Node,
        username: &str,
        password: &str,
        key_passphrase: &str,
    ) -> NodeStatus {
        let auth = match node.auth_method {
            AuthMethod::Key => {
                if node.key_path.is_empty() {
                    return error_status("密钥认证模式但未提供密钥路径".to_string());
                }
                AuthSpec::KeyFile {
                    key_path: node.key_path.clone().into(),
                    passphrase: if key_passphrase.is_empty() {
                        None
                    } else {
                        Some(key_passphrase.to_string().into())
                    },
                }
            }
            AuthMethod::Agent => AuthSpec::Agent,
            AuthMethod::Password => AuthSpec::Password(password.to_string().into()),
        };

        self.probe(DialTarget {
            host: node.host.clone(),
            port: node.port,
            username: username.to_string(),
            auth,
        })
        .await
    }

    /// Probe a set of nodes concurrently, one task per node.
    /// Node sets are small; the fan-out is deliberately unbounded.
    pub async fn batch_test(
        self: &Arc<Self>,
        nodes: &[Node],
        username: &str,
        password: &str,
    ) -> HashMap<String, NodeStatus> {
        let tasks: Vec<_> = nodes
            .iter()
            .map(|node| {
                let prober = Arc::clone(self);
                let node = node.clone();
                let username = username.to_string();
                let password = password.to_string();
                tokio::spawn(async move {
                    let status = prober.test(&node, &username, &password).await;
                    (node.id, status)
                })
            })
            .collect();

        let mut results = HashMap::new();
        for joined in join_all(tasks).await {
            match joined {
                Ok((id, status)) => {
                    results.insert(id, status);
                }
                Err(e) => tracing::error!("probe task failed: {e}"),
            }
        }
        results
    }

    fn resolve_target(
        &self,
        node: &Node,
        username: &str,
        password: &str,
    ) -> Result<DialTarget, String> {
        match node.auth_method {
            AuthMethod::Key => {
                if node.key_path.is_empty() {
                    return Err("密钥认证模式但未提供密钥路径".to_string());
                }
                let passphrase = self.vault.get_key_passphrase(&node.id).ok();
                // The probe uses the node's username field as stored; the
                // root default belongs to the pipeline's transport factory.
                Ok(DialTarget {
                    host: node.host.clone(),
                    port: node.port,
                    username: node.username.clone(),
                    auth: AuthSpec::KeyFile {
                        key_path: node.key_path.clone().into(),
                        passphrase,
                    },
                })
            }
            AuthMethod::Agent => Ok(DialTarget {
                host: node.host.clone(),
                port: node.port,
                username: node.username.clone(),
                auth: AuthSpec::Agent,
            }),
            AuthMethod::Password => {
                let mut actual_username = username.to_string();
                let mut actual_password = password.to_string().into();

                if !node.id.is_empty() && !node.username.is_empty() {
                    if let Ok(stored) = self.vault.get_password(&node.id, &node.username) {
                        actual_username = node.username.clone();
                        actual_password = stored;
                    }
                }

                Ok(DialTarget {
                    host: node.host.clone(),
                    port: node.port,
                    username: actual_username,
                    auth: AuthSpec::Password(actual_password),
                })
            }
        }
    }

    async fn probe(&self, target: DialTarget) -> NodeStatus {
        let start = Instant::now();

        let session = match self.dialer.dial(&target).await {
            Ok(session) => session,
            Err(e) => return error_status(format!("连接失败: {e}")),
        };

        // Latency covers dial plus handshake.
        let latency = start.elapsed().as_millis() as i64;

        if let Err(e) = session.exec(PROBE_COMMAND).await {
            session.close().await;
            return error_status(format!("命令执行失败: {e}"));
        }
        session.close().await;

        NodeStatus {
            latency,
            last_checked: now_string(),
            status: ConnectionStatus::Connected,
            error_msg: String::new(),
        }
    }
}

fn error_status(msg: String) -> NodeStatus {
    NodeStatus {
        latency: 0,
        last_checked: now_string(),
        status: ConnectionStatus::Error,
        error_msg: msg,
    }
}

fn now_string() -> String {
    Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
