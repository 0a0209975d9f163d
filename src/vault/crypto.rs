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

//! At-rest sealing of secrets with a per-installation AES-256-GCM key.
//!
//! The key lives in `key.txt` under the data directory, hex-encoded with
//! owner-only permissions. Sealed values are `hex(nonce ‖ ciphertext ‖ tag)`
//! with a fresh random nonce per message.

use aes_gcm::{
    aead::{Aead, KeyInit, OsRng},
    Aes256Gcm, Nonce,
};
use rand::RngCore;
use std::fs;
use std::path::Path;
use zeroize::Zeroizing;

use super::VaultError;

const KEY_FILE: &str = "key.txt";
const NONCE_LEN: usize = 12;

/// Seals and opens vault secrets with the installation key.
pub struct SecretCipher {
    cipher: Aes256Gcm,
}

impl SecretCipher {
    /// Load the key from `<data_dir>/key.txt`, generating and persisting a
    /// fresh one (mode 0600) when absent.
    pub fn load_or_create(data_dir: &Path) -> Result<Self, VaultError> {
        let key_path = data_dir.join(KEY_FILE);

        let key: Zeroizing<[u8; 32]> = if key_path.exists() {
            let hex_key = fs::read_to_string(&key_path)?;
            let raw = hex::decode(hex_key.trim()).map_err(|_| VaultError::InvalidKeyFormat)?;
            let raw: [u8; 32] = raw.try_into().map_err(|_| VaultError::InvalidKeyFormat)?;
            Zeroizing::new(raw)
        } else {
            let mut raw = [0u8; 32];
            OsRng.fill_bytes(&mut raw);
            fs::create_dir_all(data_dir)?;
            fs::write(&key_path, hex::encode(raw))?;
            restrict_permissions(&key_path)?;
            Zeroizing::new(raw)
        };

        Ok(Self {
            cipher: Aes256Gcm::new((&*key).into()),
        })
    }

    /// Encrypt a plaintext secret to its stored hex form.
    pub fn seal(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| VaultError::Crypto(e.to_string()))?;

        let mut sealed = nonce_bytes.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }

    /// Decrypt a stored hex form back to the plaintext secret.
    pub fn open(&self, sealed_hex: &str) -> Result<Zeroizing<String>, VaultError> {
        let sealed = hex::decode(sealed_hex).map_err(|_| VaultError::InvalidKeyFormat)?;
        if sealed.len() < NONCE_LEN {
            return Err(VaultError::CipherTextTooShort);
        }

        let (nonce_bytes, ciphertext) = sealed.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| VaultError::Crypto(e.to_string()))?;

        String::from_utf8(plaintext)
            .map(Zeroizing::new)
            .map_err(|e| VaultError::Crypto(e.to_string()))
    }
}

fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}
