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

//! SSH transport: connection and command execution over russh, SFTP file
//! transfer, the dial seam used by the pipeline, and the connectivity
//! prober.
//!
//! # Features
//! * Password, private-key and agent authentication
//! * Execute commands and collect output with the remote exit status
//! * Recursive SFTP upload shared by the orchestrator and the sync helper
//! * Auth-aware health probing with latency measurement

pub mod client;
pub mod error;
pub mod prober;
pub mod session;
pub mod transfer;

pub use client::{AuthSpec, CommandResult, SshClient};
pub use error::Error;
pub use prober::Prober;
pub use session::{DialTarget, Dialer, RemoteSession, SshDialer};
