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

//! Fan-out job driver for the helper binary.
//!
//! Runs on the master host: consumes the decoded payload, connects to
//! each slave with password auth and uploads the staged path. Slaves are
//! processed sequentially; the first failure terminates the run with the
//! documented exit code. Success prints nothing.

use std::path::Path;

use crate::ssh::{transfer, SshClient};

use super::payload::SyncPayload;

/// Exit codes of the helper program.
pub mod exit_code {
    pub const OK: i32 = 0;
    /// Bad usage or malformed payload.
    pub const USAGE: i32 = 2;
    /// A slave is missing its password.
    pub const MISSING_PASSWORD: i32 = 3;
    /// Dial or session setup failed.
    pub const CONNECT_FAILED: i32 = 4;
    /// The upload itself failed.
    pub const UPLOAD_FAILED: i32 = 5;
}

/// Decode and execute a fan-out payload, returning the process exit code.
/// Diagnostics go to stderr.
pub async fn run(payload_b64: &str) -> i32 {
    let payload = match SyncPayload::decode(payload_b64) {
        Ok(payload) => payload,
        Err(msg) => {
            eprintln!("{msg}");
            return exit_code::USAGE;
        }
    };

    if payload.source_path.is_empty() {
        eprintln!("missing sourcePath");
        return exit_code::USAGE;
    }
    if payload.slaves.is_empty() {
        eprintln!("no slaves provided");
        return exit_code::USAGE;
    }

    for slave in &payload.slaves {
        let user = if slave.user.trim().is_empty() {
            "root"
        } else {
            &slave.user
        };

        if slave.password.trim().is_empty() {
            eprintln!("missing password for slave {}", slave.name);
            return exit_code::MISSING_PASSWORD;
        }

        let target_path = if slave.remote_path.trim().is_empty() {
            &payload.remote_path
        } else {
            &slave.remote_path
        };

        let mut client = SshClient::with_password(user, &slave.password);
        if let Err(e) = client.connect(&slave.host, slave.port).await {
            eprintln!("connect slave {} failed: {e}", slave.name);
            return exit_code::CONNECT_FAILED;
        }

        let sftp = match client.open_sftp().await {
            Ok(sftp) => sftp,
            Err(e) => {
                client.close().await;
                eprintln!("create sftp for {} failed: {e}", slave.name);
                return exit_code::CONNECT_FAILED;
            }
        };

        if let Err(e) = transfer::upload_path(&sftp, Path::new(&payload.source_path), target_path).await
        {
            client.close().await;
            eprintln!("upload to slave {} failed: {e}", slave.name);
            return exit_code::UPLOAD_FAILED;
        }

        client.close().await;
    }

    exit_code::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::syncd::payload::SyncTarget;

    #[tokio::test]
    async fn test_malformed_payload_exits_2() {
        assert_eq!(run("@@@ not base64 @@@").await, exit_code::USAGE);
    }

    #[tokio::test]
    async fn test_missing_source_path_exits_2() {
        let payload = SyncPayload {
            version: "1.0.0".into(),
            remote_path: "/tmp/bdeploy".into(),
            slaves: vec![SyncTarget::default()],
            ..Default::default()
        };
        assert_eq!(run(&payload.encode().unwrap()).await, exit_code::USAGE);
    }

    #[tokio::test]
    async fn test_empty_slave_list_exits_2() {
        let payload = SyncPayload {
            version: "1.0.0".into(),
            source_path: "/tmp/bdeploy/app".into(),
            remote_path: "/tmp/bdeploy".into(),
            slaves: vec![],
            ..Default::default()
        };
        assert_eq!(run(&payload.encode().unwrap()).await, exit_code::USAGE);
    }

    #[tokio::test]
    async fn test_missing_password_exits_3() {
        let payload = SyncPayload {
            version: "1.0.0".into(),
            source_path: "/tmp/bdeploy/app".into(),
            remote_path: "/tmp/bdeploy".into(),
            slaves: vec![SyncTarget {
                id: "s1".into(),
                name: "slave-1".into(),
                host: "10.0.0.2".into(),
                port: 22,
                user: "root".into(),
                password: "   ".into(),
                remote_path: String::new(),
            }],
            ..Default::default()
        };
        assert_eq!(
            run(&payload.encode().unwrap()).await,
            exit_code::MISSING_PASSWORD
        );
    }
}
