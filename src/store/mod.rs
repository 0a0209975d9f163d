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

//! File-backed JSON object stores for nodes, VCS resources and tasks.
//!
//! Every store keeps its whole collection in memory behind an `RwLock`
//! and persists with an atomic write (marshal → `<path>.tmp` → rename),
//! so a crash mid-write leaves either the old file or the new one, never
//! a torn state. Records missing an id on load are repaired and the
//! repair is persisted before the store is handed out.

mod node;
mod svn;
mod task;

pub use node::NodeStore;
pub use svn::SvnResourceStore;
pub use task::{TaskPatch, TaskStore};

use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error taxonomy shared by the stores.
#[derive(Debug)]
pub enum StoreError {
    /// Unknown id on update/delete/get.
    NotFound(&'static str),
    /// Duplicate id on insert.
    Exists(&'static str),
    /// The store lock was poisoned by a panicking holder.
    LockPoisoned(String),
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::NotFound(what) => write!(f, "{what} not found"),
            StoreError::Exists(what) => write!(f, "{what} already exists"),
            StoreError::LockPoisoned(msg) => write!(f, "store lock poisoned: {msg}"),
            StoreError::Io(e) => write!(f, "IO error: {e}"),
            StoreError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StoreError::Io(e) => Some(e),
            StoreError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(e: io::Error) -> Self {
        StoreError::Io(e)
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Json(e)
    }
}

/// Write `data` to `path` via a temp file and rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)
}

/// Timestamp format used on task/run records.
pub(crate) fn now_string() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M:%S").to_string()
}

/// Timestamp format used on resource `lastChecked` fields.
pub(crate) fn now_minute_string() -> String {
    chrono::Local::now().format("%Y-%m-%d %H:%M").to_string()
}
