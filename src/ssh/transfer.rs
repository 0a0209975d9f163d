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

//! Recursive SFTP upload.
//!
//! Shared by the orchestrator (staging onto the master) and the sync
//! helper (fan-out to slaves). Remote paths are always slash-separated,
//! whatever the local OS uses.

use russh_sftp::client::SftpSession;
use russh_sftp::protocol::OpenFlags;
use std::path::Path;

use super::client::finish_remote_write;
use super::error::Error;

/// Upload a local file or directory tree to `remote_path`.
///
/// A file lands at exactly `remote_path` (parent directories are created);
/// a directory is mirrored under it, depth-first.
pub async fn upload_path(sftp: &SftpSession, local: &Path, remote_path: &str) -> Result<(), Error> {
    let metadata = tokio::fs::metadata(local).await?;
    if metadata.is_dir() {
        upload_dir(sftp, local, remote_path).await
    } else {
        upload_file(sftp, local, remote_path).await
    }
}

/// Upload in-memory bytes to `remote_path`, creating parent directories.
pub async fn upload_bytes(sftp: &SftpSession, data: &[u8], remote_path: &str) -> Result<(), Error> {
    if let Some(parent) = parent_dir(remote_path) {
        create_dir_all(sftp, parent).await;
    }

    let mut file = sftp
        .open_with_flags(
            remote_path,
            OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
        )
        .await?;
    finish_remote_write(&mut file, data).await
}

async fn upload_file(sftp: &SftpSession, local: &Path, remote_path: &str) -> Result<(), Error> {
    let contents = tokio::fs::read(local).await?;
    upload_bytes(sftp, &contents, remote_path).await
}

async fn upload_dir(sftp: &SftpSession, local: &Path, remote_dir: &str) -> Result<(), Error> {
    create_dir_all(sftp, remote_dir).await;
    upload_dir_recursive(sftp, local, remote_dir).await
}

fn upload_dir_recursive<'a>(
    sftp: &'a SftpSession,
    local_dir: &'a Path,
    remote_dir: &'a str,
) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<(), Error>> + Send + 'a>> {
    Box::pin(async move {
        let mut entries = tokio::fs::read_dir(local_dir).await?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            let remote_path = format!("{}/{}", remote_dir, name.to_string_lossy());

            let metadata = entry.metadata().await?;
            if metadata.is_dir() {
                // Existing directories are fine.
                let _ = sftp.create_dir(&remote_path).await;
                upload_dir_recursive(sftp, &path, &remote_path).await?;
            } else if metadata.is_file() {
                let contents = tokio::fs::read(&path).await?;
                let mut file = sftp
                    .open_with_flags(
                        &remote_path,
                        OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::WRITE,
                    )
                    .await?;
                finish_remote_write(&mut file, &contents).await?;
            }
        }

        Ok(())
    })
}

/// Create a remote directory and all its ancestors. Errors from already
/// existing components are ignored, like a `mkdir -p`.
pub async fn create_dir_all(sftp: &SftpSession, remote_dir: &str) {
    let mut prefix = String::new();
    for component in remote_dir.split('/') {
        if component.is_empty() {
            continue;
        }
        if !prefix.is_empty() || remote_dir.starts_with('/') {
            prefix.push('/');
        }
        prefix.push_str(component);
        let _ = sftp.create_dir(&prefix).await;
    }
}

fn parent_dir(remote_path: &str) -> Option<&str> {
    match remote_path.rsplit_once('/') {
        Some((parent, _)) if !parent.is_empty() => Some(parent),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parent_dir() {
        assert_eq!(parent_dir("/tmp/app/pkg.bin"), Some("/tmp/app"));
        assert_eq!(parent_dir("/pkg.bin"), None);
        assert_eq!(parent_dir("pkg.bin"), None);
    }
}
