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

//! High-level SSH client built on russh.
//!
//! A client is constructed with an [`AuthSpec`] bundle, dialed with a
//! bounded timeout, and then used to execute commands or open SFTP
//! sessions multiplexed over the one connection. The remote host key is
//! accepted unconditionally; this tool assumes a trusted network (see the
//! project design notes).

use russh::client::{Config, Handle, Handler, Msg};
use russh::{Channel, ChannelMsg};
use russh_sftp::client::SftpSession;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use zeroize::Zeroizing;

use super::error::Error;

/// TCP dial + handshake budget.
pub const DIAL_TIMEOUT: Duration = Duration::from_secs(10);

/// Authentication bundle chosen at construction.
#[derive(Debug, Clone)]
pub enum AuthSpec {
    Password(Zeroizing<String>),
    KeyFile {
        key_path: PathBuf,
        passphrase: Option<Zeroizing<String>>,
    },
    Agent,
}

/// Output of one remote command.
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: u32,
}

impl CommandResult {
    /// stdout followed by stderr, the way a terminal would interleave a
    /// short-lived command.
    pub fn combined(&self) -> String {
        let mut out = self.stdout.clone();
        out.push_str(&self.stderr);
        out
    }
}

/// An SSH connection to a remote host.
pub struct SshClient {
    username: String,
    auth: AuthSpec,
    handle: Option<Arc<Handle<AcceptingHandler>>>,
}

impl SshClient {
    pub fn with_password(username: &str, password: &str) -> Self {
        Self {
            username: username.to_string(),
            auth: AuthSpec::Password(Zeroizing::new(password.to_string())),
            handle: None,
        }
    }

    pub fn with_key_file(username: &str, key_path: &str, passphrase: Option<&str>) -> Self {
        Self {
            username: username.to_string(),
            auth: AuthSpec::KeyFile {
                key_path: PathBuf::from(key_path),
                passphrase: passphrase
                    .filter(|p| !p.is_empty())
                    .map(|p| Zeroizing::new(p.to_string())),
            },
            handle: None,
        }
    }

    pub fn with_agent(username: &str) -> Self {
        Self {
            username: username.to_string(),
            auth: AuthSpec::Agent,
            handle: None,
        }
    }

    pub fn with_auth(username: &str, auth: AuthSpec) -> Self {
        Self {
            username: username.to_string(),
            auth,
            handle: None,
        }
    }

    /// Dial `host:port` and complete handshake plus authentication.
    pub async fn connect(&mut self, host: &str, port: u16) -> Result<(), Error> {
        let config = Arc::new(Config::default());
        let handler = AcceptingHandler;

        let connect = russh::client::connect(config, (host, port), handler);
        let mut handle = match tokio::time::timeout(DIAL_TIMEOUT, connect).await {
            Ok(res) => res?,
            Err(_) => return Err(Error::ConnectTimeout),
        };

        authenticate(&mut handle, &self.username, &self.auth).await?;
        self.handle = Some(Arc::new(handle));
        Ok(())
    }

    fn handle(&self) -> Result<&Arc<Handle<AcceptingHandler>>, Error> {
        self.handle.as_ref().ok_or(Error::NotConnected)
    }

    async fn open_channel(&self) -> Result<Channel<Msg>, Error> {
        self.handle()?
            .channel_open_session()
            .await
            .map_err(Error::Ssh)
    }

    /// Run a command in a fresh session, collecting stdout, stderr and the
    /// remote exit status. Every invocation is a new shell context.
    pub async fn execute(&self, command: &str) -> Result<CommandResult, Error> {
        let mut channel = self.open_channel().await?;
        channel.exec(true, command).await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status: Option<u32> = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } => {
                    if ext == 1 {
                        stderr.extend_from_slice(data);
                    }
                }
                // The exit status can arrive before trailing data; keep
                // draining until the channel closes.
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        match exit_status {
            Some(code) => Ok(CommandResult {
                stdout: String::from_utf8_lossy(&stdout).to_string(),
                stderr: String::from_utf8_lossy(&stderr).to_string(),
                exit_status: code,
            }),
            None => Err(Error::CommandDidntExit),
        }
    }

    /// Like [`execute`](Self::execute) but collapses the result into the
    /// combined output, failing when the remote exit status is non-zero.
    /// The error carries the combined output so callers can surface it.
    pub async fn exec_combined(&self, command: &str) -> Result<String, Error> {
        let result = self.execute(command).await?;
        let combined = result.combined();
        if result.exit_status != 0 {
            let msg = combined.trim().to_string();
            return Err(Error::CommandFailed(if msg.is_empty() {
                format!("exit status {}", result.exit_status)
            } else {
                msg
            }));
        }
        Ok(combined)
    }

    /// Open an SFTP session multiplexed over this connection.
    pub async fn open_sftp(&self) -> Result<SftpSession, Error> {
        let channel = self.open_channel().await?;
        channel.request_subsystem(true, "sftp").await?;
        Ok(SftpSession::new(channel.into_stream()).await?)
    }

    /// Release the connection. Safe to call on a never-connected client.
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
        }
    }

    /// Disconnect without consuming the client state. Used where only a
    /// shared reference is available; a no-op when never connected.
    pub async fn disconnect(&self) {
        if let Some(handle) = &self.handle {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "")
                .await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }
}

async fn authenticate(
    handle: &mut Handle<AcceptingHandler>,
    username: &str,
    auth: &AuthSpec,
) -> Result<(), Error> {
    match auth {
        AuthSpec::Password(password) => {
            let result = handle.authenticate_password(username, &***password).await?;
            if !result.success() {
                return Err(Error::PasswordWrong);
            }
        }
        AuthSpec::KeyFile { key_path, passphrase } => {
            let key = russh::keys::load_secret_key(
                key_path,
                passphrase.as_ref().map(|p| &***p),
            )
            .map_err(Error::KeyInvalid)?;
            let result = handle
                .authenticate_publickey(
                    username,
                    russh::keys::PrivateKeyWithHashAlg::new(
                        Arc::new(key),
                        handle.best_supported_rsa_hash().await?.flatten(),
                    ),
                )
                .await?;
            if !result.success() {
                return Err(Error::KeyAuthFailed);
            }
        }
        AuthSpec::Agent => {
            let mut agent = russh::keys::agent::client::AgentClient::connect_env()
                .await
                .map_err(|_| Error::AgentConnectionFailed)?;

            let identities = agent
                .request_identities()
                .await
                .map_err(|_| Error::AgentConnectionFailed)?;
            if identities.is_empty() {
                return Err(Error::AgentNoIdentities);
            }

            let mut authenticated = false;
            for identity in identities {
                let result = handle
                    .authenticate_publickey_with(
                        username,
                        identity,
                        handle.best_supported_rsa_hash().await?.flatten(),
                        &mut agent,
                    )
                    .await;
                if let Ok(auth_result) = result {
                    if auth_result.success() {
                        authenticated = true;
                        break;
                    }
                }
            }
            if !authenticated {
                return Err(Error::AgentAuthFailed);
            }
        }
    }
    Ok(())
}

/// Handler that accepts any server key. Host-key pinning is an explicit
/// non-goal of this tool.
#[derive(Debug, Clone)]
pub struct AcceptingHandler;

impl Handler for AcceptingHandler {
    type Error = Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Write raw bytes to a remote SFTP file handle, flushing and shutting
/// down the write side so the server observes a complete file.
pub(crate) async fn finish_remote_write(
    file: &mut russh_sftp::client::fs::File,
    data: &[u8],
) -> Result<(), Error> {
    file.write_all(data).await.map_err(Error::Io)?;
    file.flush().await.map_err(Error::Io)?;
    file.shutdown().await.map_err(Error::Io)?;
    Ok(())
}
