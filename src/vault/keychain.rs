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

//! macOS Keychain backend for the vault.
//!
//! Entries are generic passwords under the fixed service name; the stored
//! value is the sealed hex form, never plaintext.

use security_framework::passwords::{
    delete_generic_password, get_generic_password, set_generic_password,
};
use zeroize::Zeroizing;

use super::{VaultError, SERVICE_NAME};

pub(super) fn set(account: &str, sealed: &str) -> Result<(), VaultError> {
    set_generic_password(SERVICE_NAME, account, sealed.as_bytes())
        .map_err(|e| VaultError::Crypto(format!("keychain write failed: {e}")))
}

pub(super) fn get(account: &str) -> Result<String, VaultError> {
    let raw = get_generic_password(SERVICE_NAME, account)
        .map_err(|_| VaultError::NotFound(account.to_string()))?;
    let raw = Zeroizing::new(raw);
    String::from_utf8(raw.to_vec()).map_err(|e| VaultError::Crypto(e.to_string()))
}

pub(super) fn delete(account: &str) -> Result<(), VaultError> {
    delete_generic_password(SERVICE_NAME, account)
        .map_err(|_| VaultError::NotFound(account.to_string()))
}
