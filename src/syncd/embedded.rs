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

//! Embedded helper binaries, one per supported (os, arch) pair.
//!
//! The blobs are bundled at build time from `assets/syncd/` (see
//! `build.rs`); a variant missing from the build tree embeds as an empty
//! blob, which [`binary_for`] surfaces and the bootstrap turns into a
//! typed error instead of pushing a zero-byte helper.

/// Version of the helper protocol. The bootstrap compares the remote
/// `--version` output against this constant to decide whether to re-push.
pub const VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperOs {
    Linux,
    Darwin,
}

impl HelperOs {
    /// Map trimmed, lowercased `uname -s` output.
    pub fn from_uname(s: &str) -> Option<Self> {
        match s {
            "linux" => Some(HelperOs::Linux),
            "darwin" => Some(HelperOs::Darwin),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HelperOs::Linux => "linux",
            HelperOs::Darwin => "darwin",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HelperArch {
    Amd64,
    Arm64,
}

impl HelperArch {
    /// Map trimmed, lowercased `uname -m` output.
    pub fn from_uname(s: &str) -> Option<Self> {
        match s {
            "x86_64" | "amd64" => Some(HelperArch::Amd64),
            "aarch64" | "arm64" => Some(HelperArch::Arm64),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            HelperArch::Amd64 => "amd64",
            HelperArch::Arm64 => "arm64",
        }
    }
}

static LINUX_AMD64: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/syncd_linux_amd64"));
static LINUX_ARM64: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/syncd_linux_arm64"));
static DARWIN_AMD64: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/syncd_darwin_amd64"));
static DARWIN_ARM64: &[u8] = include_bytes!(concat!(env!("OUT_DIR"), "/syncd_darwin_arm64"));

/// Pure selector from platform pair to embedded blob. May be empty when
/// the variant was not bundled; callers must treat that as an error.
pub fn binary_for(os: HelperOs, arch: HelperArch) -> &'static [u8] {
    match (os, arch) {
        (HelperOs::Linux, HelperArch::Amd64) => LINUX_AMD64,
        (HelperOs::Linux, HelperArch::Arm64) => LINUX_ARM64,
        (HelperOs::Darwin, HelperArch::Amd64) => DARWIN_AMD64,
        (HelperOs::Darwin, HelperArch::Arm64) => DARWIN_ARM64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_uname_mapping() {
        assert_eq!(HelperOs::from_uname("linux"), Some(HelperOs::Linux));
        assert_eq!(HelperOs::from_uname("darwin"), Some(HelperOs::Darwin));
        assert_eq!(HelperOs::from_uname("freebsd"), None);

        assert_eq!(HelperArch::from_uname("x86_64"), Some(HelperArch::Amd64));
        assert_eq!(HelperArch::from_uname("amd64"), Some(HelperArch::Amd64));
        assert_eq!(HelperArch::from_uname("aarch64"), Some(HelperArch::Arm64));
        assert_eq!(HelperArch::from_uname("arm64"), Some(HelperArch::Arm64));
        assert_eq!(HelperArch::from_uname("riscv64"), None);
    }
}
