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

//! SVN CLI wrapper.
//!
//! Every operation shells out to the system `svn` with non-interactive
//! flags, bounded by a wall-clock timeout that kills the subprocess. The
//! pipeline consumes this through the [`VcsClient`] trait so tests can
//! substitute a scripted implementation.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Default per-subprocess timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

const SVN_BIN: &str = "svn";

/// The operations the pipeline needs from a version-control server.
/// Empty username/password/revision mean "omit the flag".
#[async_trait]
pub trait VcsClient: Send + Sync {
    /// Resolve the current revision of `url`.
    async fn info(&self, url: &str, username: &str, password: &str) -> Result<String>;

    /// Export `url` (a directory tree) into `dest`.
    async fn export(
        &self,
        url: &str,
        username: &str,
        password: &str,
        revision: &str,
        dest: &Path,
    ) -> Result<()>;

    /// Stream a single file at `url` into a freshly created `dest` file.
    async fn cat_to_file(
        &self,
        url: &str,
        username: &str,
        password: &str,
        revision: &str,
        dest: &Path,
    ) -> Result<()>;

    /// Probe whether the CLI binary is usable at all.
    async fn check_available(&self) -> Result<()>;
}

pub struct SvnClient {
    timeout: Duration,
}

impl SvnClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    async fn run_capture(&self, op: &str, args: Vec<String>) -> Result<String> {
        let mut cmd = Command::new(SVN_BIN);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, cmd.output())
            .await
            .map_err(|_| anyhow!("svn {op} timed out after {:?}", self.timeout))?
            .with_context(|| format!("failed to run {SVN_BIN}"))?;

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            let msg = combined.trim();
            if msg.is_empty() {
                bail!("svn {op} failed: {}", output.status);
            }
            bail!("svn {op} failed: {msg}");
        }

        Ok(combined)
    }
}

impl Default for SvnClient {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

#[async_trait]
impl VcsClient for SvnClient {
    async fn info(&self, url: &str, username: &str, password: &str) -> Result<String> {
        if url.trim().is_empty() {
            bail!("svn url is empty");
        }

        let mut args = vec![
            "info".to_string(),
            "--show-item".to_string(),
            "revision".to_string(),
        ];
        args.extend(common_flags());
        args.extend(credential_flags(username, password));
        args.push(url.to_string());

        let output = self.run_capture("info", args).await?;
        let revision = output.trim().to_string();
        if revision.is_empty() {
            bail!("svn info returned empty revision");
        }
        Ok(revision)
    }

    async fn export(
        &self,
        url: &str,
        username: &str,
        password: &str,
        revision: &str,
        dest: &Path,
    ) -> Result<()> {
        if url.trim().is_empty() {
            bail!("svn url is empty");
        }
        if dest.as_os_str().is_empty() {
            bail!("export destination is empty");
        }

        let mut args = vec!["export".to_string()];
        args.extend(common_flags());
        args.push("--force".to_string());
        args.extend(revision_flags(revision));
        args.extend(credential_flags(username, password));
        args.push(url.to_string());
        args.push(dest.to_string_lossy().to_string());

        self.run_capture("export", args).await.map(|_| ())
    }

    async fn cat_to_file(
        &self,
        url: &str,
        username: &str,
        password: &str,
        revision: &str,
        dest: &Path,
    ) -> Result<()> {
        if url.trim().is_empty() {
            bail!("svn url is empty");
        }
        if dest.as_os_str().is_empty() {
            bail!("export destination is empty");
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let dest_file = std::fs::File::create(dest)
            .with_context(|| format!("cannot create {}", dest.display()))?;

        let mut args = vec!["cat".to_string()];
        args.extend(common_flags());
        args.extend(revision_flags(revision));
        args.extend(credential_flags(username, password));
        args.push(url.to_string());

        let mut cmd = Command::new(SVN_BIN);
        cmd.args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(dest_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().with_context(|| format!("failed to run {SVN_BIN}"))?;
        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| anyhow!("svn cat timed out after {:?}", self.timeout))??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let msg = stderr.trim();
            if msg.is_empty() {
                bail!("svn cat failed: {}", output.status);
            }
            bail!("svn cat failed: {msg}");
        }

        Ok(())
    }

    async fn check_available(&self) -> Result<()> {
        let status = Command::new(SVN_BIN)
            .arg("--version")
            .arg("--quiet")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await;

        match status {
            Ok(status) if status.success() => Ok(()),
            _ => bail!("svn client not found"),
        }
    }
}

fn common_flags() -> Vec<String> {
    vec![
        "--non-interactive".to_string(),
        "--no-auth-cache".to_string(),
        "--trust-server-cert".to_string(),
    ]
}

fn credential_flags(username: &str, password: &str) -> Vec<String> {
    let mut flags = Vec::new();
    if !username.trim().is_empty() {
        flags.push("--username".to_string());
        flags.push(username.to_string());
    }
    if !password.trim().is_empty() {
        flags.push("--password".to_string());
        flags.push(password.to_string());
    }
    flags
}

fn revision_flags(revision: &str) -> Vec<String> {
    match normalize_revision(revision) {
        Some(rev) => vec!["--revision".to_string(), rev],
        None => Vec::new(),
    }
}

/// Revision `0`, `HEAD` and blank all mean "follow the head": the flag is
/// omitted entirely.
fn normalize_revision(revision: &str) -> Option<String> {
    let rev = revision.trim();
    if rev.is_empty() || rev == "0" || rev.eq_ignore_ascii_case("HEAD") {
        None
    } else {
        Some(rev.to_string())
    }
}
