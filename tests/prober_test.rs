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

use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use bdeploy::model::{AuthMethod, ConnectionStatus, Node};
use bdeploy::ssh::{DialTarget, Dialer, Error, Prober, RemoteSession};
use bdeploy::vault::Vault;

struct MockSession {
    fail_exec: bool,
}

#[async_trait]
impl RemoteSession for MockSession {
    async fn exec(&self, _command: &str) -> Result<String, Error> {
        if self.fail_exec {
            Err(Error::CommandFailed("shell unavailable".into()))
        } else {
            Ok("ping\n".into())
        }
    }

    async fn upload_path(&self, _local: &Path, _remote: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn upload_bytes(&self, _data: &[u8], _remote: &str) -> Result<(), Error> {
        Ok(())
    }

    async fn close(&self) {}
}

struct MockDialer {
    accept_delay: Duration,
    fail_connect: bool,
    fail_exec: bool,
}

#[async_trait]
impl Dialer for MockDialer {
    async fn dial(&self, _target: &DialTarget) -> Result<Box<dyn RemoteSession>, Error> {
        tokio::time::sleep(self.accept_delay).await;
        if self.fail_connect {
            return Err(Error::ConnectTimeout);
        }
        Ok(Box::new(MockSession {
            fail_exec: self.fail_exec,
        }))
    }
}

fn prober(dir: &TempDir, dialer: MockDialer) -> Arc<Prober> {
    let vault = Arc::new(Vault::portable(dir.path()).unwrap());
    Arc::new(Prober::new(Arc::new(dialer), vault))
}

fn password_node(id: &str) -> Node {
    Node {
        id: id.into(),
        name: format!("node-{id}"),
        host: "10.0.0.10".into(),
        port: 22,
        username: "root".into(),
        auth_method: AuthMethod::Password,
        ..Default::default()
    }
}

#[tokio::test]
async fn test_connected_with_measured_latency() {
    let dir = TempDir::new().unwrap();
    let prober = prober(
        &dir,
        MockDialer {
            accept_delay: Duration::from_millis(30),
            fail_connect: false,
            fail_exec: false,
        },
    );

    let status = prober.test(&password_node("n1"), "root", "pw").await;

    assert_eq!(status.status, ConnectionStatus::Connected);
    assert!(status.latency >= 30, "latency was {}", status.latency);
    assert!(status.latency < 5_000);
    assert!(status.error_msg.is_empty());
}

#[tokio::test]
async fn test_connect_failure_is_wrapped() {
    let dir = TempDir::new().unwrap();
    let prober = prober(
        &dir,
        MockDialer {
            accept_delay: Duration::ZERO,
            fail_connect: true,
            fail_exec: false,
        },
    );

    let status = prober.test(&password_node("n1"), "root", "pw").await;

    assert_eq!(status.status, ConnectionStatus::Error);
    assert_eq!(status.latency, 0);
    assert!(status.error_msg.starts_with("连接失败:"), "{}", status.error_msg);
}

#[tokio::test]
async fn test_exec_failure_is_wrapped() {
    let dir = TempDir::new().unwrap();
    let prober = prober(
        &dir,
        MockDialer {
            accept_delay: Duration::ZERO,
            fail_connect: false,
            fail_exec: true,
        },
    );

    let status = prober.test(&password_node("n1"), "root", "pw").await;

    assert_eq!(status.status, ConnectionStatus::Error);
    assert!(
        status.error_msg.starts_with("命令执行失败:"),
        "{}",
        status.error_msg
    );
}

#[tokio::test]
async fn test_key_auth_requires_key_path() {
    let dir = TempDir::new().unwrap();
    let prober = prober(
        &dir,
        MockDialer {
            accept_delay: Duration::ZERO,
            fail_connect: false,
            fail_exec: false,
        },
    );

    let mut node = password_node("n1");
    node.auth_method = AuthMethod::Key;
    node.key_path = String::new();

    let status = prober.test(&node, "", "").await;
    assert_eq!(status.status, ConnectionStatus::Error);
    assert!(!status.error_msg.is_empty());
}

#[tokio::test]
async fn test_batch_test_covers_every_node() {
    let dir = TempDir::new().unwrap();
    let prober = prober(
        &dir,
        MockDialer {
            accept_delay: Duration::from_millis(5),
            fail_connect: false,
            fail_exec: false,
        },
    );

    let nodes: Vec<Node> = (0..4).map(|i| password_node(&format!("n{i}"))).collect();
    let results = prober.batch_test(&nodes, "root", "pw").await;

    assert_eq!(results.len(), 4);
    for node in &nodes {
        assert_eq!(
            results.get(&node.id).unwrap().status,
            ConnectionStatus::Connected
        );
    }
}
