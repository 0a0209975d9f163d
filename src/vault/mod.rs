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

//! Secret vault: sealed storage of per-host passwords, key passphrases and
//! VCS passwords.
//!
//! Two backends are selected at construction: **portable** keeps sealed
//! records in `credentials.json` under the data directory; **keychain**
//! hands them to the OS credential service (macOS only). Either way the
//! secret is sealed with the installation key before it reaches the
//! backend, so the backend never sees plaintext.

mod crypto;
#[cfg(target_os = "macos")]
mod keychain;

pub use crypto::SecretCipher;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use zeroize::Zeroizing;

/// Service name used for keychain entries.
pub const SERVICE_NAME: &str = "bdeploy";

const CREDENTIALS_FILE: &str = "credentials.json";

const PASSWORD_PREFIX: &str = "ssh-password";
const PASSPHRASE_PREFIX: &str = "ssh-key-passphrase";
const SVN_PASSWORD_PREFIX: &str = "svn-password";

/// Vault failure modes.
#[derive(Debug)]
pub enum VaultError {
    /// Sealed value shorter than a nonce.
    CipherTextTooShort,
    /// `key.txt` does not decode to a 32-byte key.
    InvalidKeyFormat,
    /// No secret stored under the account key.
    NotFound(String),
    /// AEAD or encoding failure.
    Crypto(String),
    /// The vault lock was poisoned by a panicking holder.
    LockPoisoned(String),
    /// Backend unavailable on this platform.
    Unsupported(&'static str),
    Io(io::Error),
    Json(serde_json::Error),
}

impl fmt::Display for VaultError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VaultError::CipherTextTooShort => write!(f, "cipherText too short"),
            VaultError::InvalidKeyFormat => write!(f, "invalid key format"),
            VaultError::NotFound(account) => write!(f, "no secret stored for {account}"),
            VaultError::Crypto(msg) => write!(f, "crypto failure: {msg}"),
            VaultError::LockPoisoned(msg) => write!(f, "vault lock poisoned: {msg}"),
            VaultError::Unsupported(msg) => write!(f, "{msg}"),
            VaultError::Io(e) => write!(f, "IO error: {e}"),
            VaultError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl std::error::Error for VaultError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            VaultError::Io(e) => Some(e),
            VaultError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for VaultError {
    fn from(e: io::Error) -> Self {
        VaultError::Io(e)
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(e: serde_json::Error) -> Self {
        VaultError::Json(e)
    }
}

/// One record of the portable credentials file.
#[derive(Debug, Serialize, Deserialize)]
struct CredEntry {
    account: String,
    /// Sealed secret, hex encoded.
    secret: String,
}

enum Backend {
    Portable {
        file_path: PathBuf,
        lock: RwLock<()>,
    },
    #[cfg(target_os = "macos")]
    Keychain,
}

/// The secret store. See module docs.
pub struct Vault {
    cipher: SecretCipher,
    backend: Backend,
}

impl Vault {
    /// Portable vault: sealed records in `<data_dir>/credentials.json`.
    pub fn portable(data_dir: &Path) -> Result<Self, VaultError> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            cipher: SecretCipher::load_or_create(data_dir)?,
            backend: Backend::Portable {
                file_path: data_dir.join(CREDENTIALS_FILE),
                lock: RwLock::new(()),
            },
        })
    }

    /// Keychain vault: sealed records in the OS credential service.
    /// The installation key still lives under `data_dir`.
    #[cfg(target_os = "macos")]
    pub fn keychain(data_dir: &Path) -> Result<Self, VaultError> {
        fs::create_dir_all(data_dir)?;
        Ok(Self {
            cipher: SecretCipher::load_or_create(data_dir)?,
            backend: Backend::Keychain,
        })
    }

    #[cfg(not(target_os = "macos"))]
    pub fn keychain(_data_dir: &Path) -> Result<Self, VaultError> {
        Err(VaultError::Unsupported(
            "keychain backend is only available on macOS; use portable mode",
        ))
    }

    // ===== SSH passwords =====

    pub fn set_password(&self, node_id: &str, username: &str, password: &str) -> Result<(), VaultError> {
        self.set(&password_account(node_id, username), password)
    }

    pub fn get_password(&self, node_id: &str, username: &str) -> Result<Zeroizing<String>, VaultError> {
        self.get(&password_account(node_id, username))
    }

    pub fn delete_password(&self, node_id: &str, username: &str) -> Result<(), VaultError> {
        self.delete(&password_account(node_id, username))
    }

    pub fn has_password(&self, node_id: &str, username: &str) -> bool {
        self.get_password(node_id, username).is_ok()
    }

    // ===== SSH key passphrases =====

    pub fn set_key_passphrase(&self, node_id: &str, passphrase: &str) -> Result<(), VaultError> {
        self.set(&passphrase_account(node_id), passphrase)
    }

    pub fn get_key_passphrase(&self, node_id: &str) -> Result<Zeroizing<String>, VaultError> {
        self.get(&passphrase_account(node_id))
    }

    pub fn delete_key_passphrase(&self, node_id: &str) -> Result<(), VaultError> {
        self.delete(&passphrase_account(node_id))
    }

    pub fn has_key_passphrase(&self, node_id: &str) -> bool {
        self.get_key_passphrase(node_id).is_ok()
    }

    // ===== VCS passwords =====

    pub fn set_svn_password(&self, resource_id: &str, username: &str, password: &str) -> Result<(), VaultError> {
        self.set(&svn_password_account(resource_id, username), password)
    }

    pub fn get_svn_password(&self, resource_id: &str, username: &str) -> Result<Zeroizing<String>, VaultError> {
        self.get(&svn_password_account(resource_id, username))
    }

    pub fn delete_svn_password(&self, resource_id: &str, username: &str) -> Result<(), VaultError> {
        self.delete(&svn_password_account(resource_id, username))
    }

    pub fn has_svn_password(&self, resource_id: &str, username: &str) -> bool {
        self.get_svn_password(resource_id, username).is_ok()
    }

    /// Best-effort sweep of every secret kind attached to a node.
    /// Missing entries are not errors.
    pub fn delete_all(&self, node_id: &str, username: &str) {
        let _ = self.delete_password(node_id, username);
        let _ = self.delete_key_passphrase(node_id);
    }

    // ===== backend plumbing =====

    fn set(&self, account: &str, secret: &str) -> Result<(), VaultError> {
        let sealed = self.cipher.seal(secret)?;

        match &self.backend {
            Backend::Portable { file_path, lock } => {
                let _guard = lock
                    .write()
                    .map_err(|e| VaultError::LockPoisoned(e.to_string()))?;
                let mut entries = load_entries(file_path)?;
                match entries.iter_mut().find(|e| e.account == account) {
                    Some(entry) => entry.secret = sealed,
                    None => entries.push(CredEntry {
                        account: account.to_string(),
                        secret: sealed,
                    }),
                }
                save_entries(file_path, &entries)
            }
            #[cfg(target_os = "macos")]
            Backend::Keychain => keychain::set(account, &sealed),
        }
    }

    fn get(&self, account: &str) -> Result<Zeroizing<String>, VaultError> {
        let sealed = match &self.backend {
            Backend::Portable { file_path, lock } => {
                let _guard = lock
                    .read()
                    .map_err(|e| VaultError::LockPoisoned(e.to_string()))?;
                load_entries(file_path)?
                    .into_iter()
                    .find(|e| e.account == account)
                    .map(|e| e.secret)
                    .ok_or_else(|| VaultError::NotFound(account.to_string()))?
            }
            #[cfg(target_os = "macos")]
            Backend::Keychain => keychain::get(account)?,
        };

        self.cipher.open(&sealed)
    }

    fn delete(&self, account: &str) -> Result<(), VaultError> {
        match &self.backend {
            Backend::Portable { file_path, lock } => {
                let _guard = lock
                    .write()
                    .map_err(|e| VaultError::LockPoisoned(e.to_string()))?;
                let mut entries = load_entries(file_path)?;
                entries.retain(|e| e.account != account);
                save_entries(file_path, &entries)
            }
            #[cfg(target_os = "macos")]
            Backend::Keychain => keychain::delete(account),
        }
    }
}

fn password_account(node_id: &str, username: &str) -> String {
    format!("{PASSWORD_PREFIX}-{node_id}-{username}")
}

fn passphrase_account(node_id: &str) -> String {
    format!("{PASSPHRASE_PREFIX}-{node_id}")
}

fn svn_password_account(resource_id: &str, username: &str) -> String {
    format!("{SVN_PASSWORD_PREFIX}-{resource_id}-{username}")
}

fn load_entries(path: &Path) -> Result<Vec<CredEntry>, VaultError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let data = fs::read(path)?;
    Ok(serde_json::from_slice(&data)?)
}

fn save_entries(path: &Path, entries: &[CredEntry]) -> Result<(), VaultError> {
    let data = serde_json::to_vec_pretty(entries)?;

    // Atomic replace; the credentials file stays owner-only.
    let tmp = PathBuf::from(format!("{}.tmp", path.display()));
    fs::write(&tmp, &data)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(&tmp, fs::Permissions::from_mode(0o600))?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
