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

//! Fan-out payload wire format: standard base64 of a JSON document,
//! passed to the helper as `--payload <b64>`.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

/// One slave target of the fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncTarget {
    pub id: String,
    pub name: String,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub remote_path: String,
}

/// The job the master-side helper executes.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SyncPayload {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub binary_size: Option<u64>,
    pub source_path: String,
    pub remote_path: String,
    pub slaves: Vec<SyncTarget>,
}

impl SyncPayload {
    /// Encode to the command-line form.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        Ok(BASE64.encode(serde_json::to_vec(self)?))
    }

    /// Decode the command-line form.
    pub fn decode(b64: &str) -> Result<Self, String> {
        let raw = BASE64
            .decode(b64.trim())
            .map_err(|e| format!("decode payload failed: {e}"))?;
        serde_json::from_slice(&raw).map_err(|e| format!("parse payload failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_decode_round_trip() {
        let payload = SyncPayload {
            version: "1.0.0".into(),
            checksum: Some("0a1b2c3d".into()),
            binary_size: Some(1024),
            source_path: "/tmp/bdeploy/app".into(),
            remote_path: "/tmp/bdeploy".into(),
            slaves: vec![SyncTarget {
                id: "s1".into(),
                name: "slave-1".into(),
                host: "10.0.0.2".into(),
                port: 22,
                user: "root".into(),
                password: "pw".into(),
                remote_path: "/srv/app".into(),
            }],
        };

        let decoded = SyncPayload::decode(&payload.encode().unwrap()).unwrap();
        assert_eq!(decoded.version, "1.0.0");
        assert_eq!(decoded.slaves.len(), 1);
        assert_eq!(decoded.slaves[0].remote_path, "/srv/app");
    }

    #[test]
    fn test_wire_field_names_are_camel_case() {
        let payload = SyncPayload {
            version: "1.0.0".into(),
            source_path: "/a".into(),
            remote_path: "/b".into(),
            ..Default::default()
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("sourcePath").is_some());
        assert!(json.get("remotePath").is_some());
        // Optional metadata is omitted entirely when unset.
        assert!(json.get("checksum").is_none());
        assert!(json.get("binarySize").is_none());
    }

    #[test]
    fn test_malformed_payload_is_rejected() {
        assert!(SyncPayload::decode("not-base64!!!").is_err());

        let not_json = BASE64.encode(b"hello");
        assert!(SyncPayload::decode(&not_json).is_err());
    }
}
