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

use std::fmt;
use std::io;

/// Error type for transport operations.
#[derive(Debug)]
pub enum Error {
    /// IO error
    Io(io::Error),
    /// SSH error from russh
    Ssh(russh::Error),
    /// SFTP error from russh-sftp
    Sftp(russh_sftp::client::error::Error),
    /// Address did not resolve
    AddressInvalid(io::Error),
    /// TCP dial or handshake exceeded the dial timeout
    ConnectTimeout,
    /// Password rejected
    PasswordWrong,
    /// Key authentication failed
    KeyAuthFailed,
    /// Private key unreadable or malformed
    KeyInvalid(russh::keys::Error),
    /// Could not reach the authentication agent socket
    AgentConnectionFailed,
    /// Agent holds no identities
    AgentNoIdentities,
    /// Agent identities were all rejected
    AgentAuthFailed,
    /// Operation attempted before `connect`
    NotConnected,
    /// Channel closed without reporting an exit status
    CommandDidntExit,
    /// Remote command exited non-zero; carries the combined output
    CommandFailed(String),
    /// Other error
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "IO error: {e}"),
            Error::Ssh(e) => write!(f, "SSH error: {e}"),
            Error::Sftp(e) => write!(f, "SFTP error: {e:?}"),
            Error::AddressInvalid(e) => write!(f, "Invalid address: {e}"),
            Error::ConnectTimeout => write!(f, "Connection timed out"),
            Error::PasswordWrong => write!(f, "Wrong password"),
            Error::KeyAuthFailed => write!(f, "Key authentication failed"),
            Error::KeyInvalid(e) => write!(f, "Invalid key: {e}"),
            Error::AgentConnectionFailed => write!(f, "Could not connect to SSH agent"),
            Error::AgentNoIdentities => write!(f, "No identities available in SSH agent"),
            Error::AgentAuthFailed => write!(f, "SSH agent authentication failed"),
            Error::NotConnected => write!(f, "not connected"),
            Error::CommandDidntExit => write!(f, "Command exited without an exit status"),
            Error::CommandFailed(msg) => write!(f, "execute command failed: {msg}"),
            Error::Other(msg) => write!(f, "{msg}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) | Error::AddressInvalid(e) => Some(e),
            Error::Ssh(e) => Some(e),
            Error::KeyInvalid(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

impl From<russh::Error> for Error {
    fn from(e: russh::Error) -> Self {
        Error::Ssh(e)
    }
}

impl From<russh_sftp::client::error::Error> for Error {
    fn from(e: russh_sftp::client::error::Error) -> Self {
        Error::Sftp(e)
    }
}
