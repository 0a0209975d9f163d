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

//! Event sink seam between the engine and the front-end.
//!
//! The engine is the single producer for a run; the sink is expected to
//! preserve emission order. [`ChannelSink`] is the standard
//! implementation: an unbounded queue drained by the UI task.

use tokio::sync::mpsc;

use crate::model::TaskEvent;

/// Channel name the front-end subscribes to.
pub const TASK_EVENT_CHANNEL: &str = "task:event";

/// Write-only event sink, from the engine's perspective.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: TaskEvent);
}

/// Single-producer queue sink.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<TaskEvent>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<TaskEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl EventSink for ChannelSink {
    fn emit(&self, event: TaskEvent) {
        // The receiver going away just means nobody is watching anymore.
        let _ = self.tx.send(event);
    }
}
