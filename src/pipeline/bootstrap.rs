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

//! Helper bootstrap: make sure the sync helper is present on the master
//! at the expected version before a fan-out.
//!
//! The remote platform is detected with `uname`; only
//! {linux, darwin} × {amd64, arm64} are supported. A matching remote
//! `--version` skips the upload entirely.

use anyhow::{bail, Result};

use crate::ssh::RemoteSession;
use crate::syncd::embedded::{self, HelperArch, HelperOs};
use crate::utils::shell_quote;

/// Helper location on the master. Treated as mutually exclusive across
/// concurrent runs targeting the same master; callers serialise such runs.
pub const HELPER_REMOTE_PATH: &str = "/tmp/bdeploy-syncd";

/// What the bootstrap did, for the run log.
#[derive(Debug, Clone)]
pub struct HelperDeployment {
    pub os: String,
    pub arch: String,
    /// False when the remote helper already reported the expected version.
    pub updated: bool,
    /// Uploaded byte count; 0 when the upload was skipped.
    pub size: usize,
    /// CRC32 of the uploaded bytes, 8 hex digits; empty when skipped.
    pub crc32: String,
}

/// Ensure the helper at `remote_path` matches the embedded version,
/// uploading and `chmod +x`-ing it when it does not.
///
/// `binary_for` is the pure (os, arch) → blob selector; production code
/// passes [`embedded::binary_for`].
pub async fn ensure_helper<F>(
    session: &dyn RemoteSession,
    remote_path: &str,
    binary_for: F,
) -> Result<HelperDeployment>
where
    F: FnOnce(HelperOs, HelperArch) -> &'static [u8],
{
    // uname failures leave the defaults in place, matching the lenient
    // detection the tool has always shipped with.
    let mut os = HelperOs::Linux;
    let mut os_label = "unknown".to_string();
    if let Ok(output) = session.exec("uname -s").await {
        os_label = output.trim().to_lowercase();
        os = match HelperOs::from_uname(&os_label) {
            Some(os) => os,
            None => bail!("主控机系统暂不支持同步服务：仅支持 Linux/macOS"),
        };
    }

    let mut arch = HelperArch::Amd64;
    if let Ok(output) = session.exec("uname -m").await {
        let raw = output.trim().to_lowercase();
        arch = match HelperArch::from_uname(&raw) {
            Some(arch) => arch,
            None => bail!("主控机架构暂不支持同步服务：仅支持 amd64/arm64"),
        };
    }

    if let Ok(output) = session.exec(&format!("{remote_path} --version")).await {
        if output.trim() == embedded::VERSION {
            return Ok(HelperDeployment {
                os: os_label,
                arch: arch.as_str().to_string(),
                updated: false,
                size: 0,
                crc32: String::new(),
            });
        }
    }

    let binary = binary_for(os, arch);
    if binary.is_empty() {
        bail!("syncd binary not embedded");
    }

    session.upload_bytes(binary, remote_path).await?;
    session
        .exec(&format!("chmod +x {}", shell_quote(remote_path)))
        .await
        .map_err(|e| anyhow::anyhow!("chmod syncd failed: {e}"))?;

    Ok(HelperDeployment {
        os: os_label,
        arch: arch.as_str().to_string(),
        updated: true,
        size: binary.len(),
        crc32: format!("{:08x}", crc32fast::hash(binary)),
    })
}
