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

use anyhow::{Context, Result};
use directories::BaseDirs;
use std::path::PathBuf;

/// Resolve the data directory.
///
/// A `data/` directory next to the executable wins (portable mode);
/// otherwise `~/.bdeploy` is used.
pub fn default_data_dir() -> Result<PathBuf> {
    if let Ok(exe) = std::env::current_exe() {
        if let Some(exe_dir) = exe.parent() {
            let portable = exe_dir.join("data");
            if portable.is_dir() {
                return Ok(portable);
            }
        }
    }

    let base = BaseDirs::new().context("cannot resolve home directory")?;
    Ok(base.home_dir().join(".bdeploy"))
}
