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

//! The dial seam between the pipeline/prober and the concrete SSH stack.
//!
//! The engine and the prober only ever see [`Dialer`] and
//! [`RemoteSession`]; tests substitute scripted implementations.

use async_trait::async_trait;
use std::path::Path;

use super::client::{AuthSpec, SshClient};
use super::error::Error;
use super::transfer;

/// Where and how to connect.
#[derive(Debug, Clone)]
pub struct DialTarget {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub auth: AuthSpec,
}

/// An established connection to one host.
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Run a command; returns the combined output, or
    /// [`Error::CommandFailed`] carrying it when the exit status is
    /// non-zero.
    async fn exec(&self, command: &str) -> Result<String, Error>;

    /// Upload a local file or directory tree.
    async fn upload_path(&self, local: &Path, remote_path: &str) -> Result<(), Error>;

    /// Upload in-memory bytes.
    async fn upload_bytes(&self, data: &[u8], remote_path: &str) -> Result<(), Error>;

    /// Release the connection.
    async fn close(&self);
}

/// Connection factory.
#[async_trait]
pub trait Dialer: Send + Sync {
    async fn dial(&self, target: &DialTarget) -> Result<Box<dyn RemoteSession>, Error>;
}

/// The production dialer: russh client per connection, SFTP sessions
/// opened on demand over it.
#[derive(Debug, Default)]
pub struct SshDialer;

#[async_trait]
impl Dialer for SshDialer {
    async fn dial(&self, target: &DialTarget) -> Result<Box<dyn RemoteSession>, Error> {
        let mut client = SshClient::with_auth(&target.username, target.auth.clone());
        client.connect(&target.host, target.port).await?;
        Ok(Box::new(SshSession { client }))
    }
}

struct SshSession {
    client: SshClient,
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &str) -> Result<String, Error> {
        self.client.exec_combined(command).await
    }

    async fn upload_path(&self, local: &Path, remote_path: &str) -> Result<(), Error> {
        let sftp = self.client.open_sftp().await?;
        transfer::upload_path(&sftp, local, remote_path).await
    }

    async fn upload_bytes(&self, data: &[u8], remote_path: &str) -> Result<(), Error> {
        let sftp = self.client.open_sftp().await?;
        transfer::upload_bytes(&sftp, data, remote_path).await
    }

    async fn close(&self) {
        self.client.disconnect().await;
    }
}
