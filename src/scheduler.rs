// Copyright 2025 Google LLC
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

//! Frame-callback scheduling.
//!
//! A surface's callback is armed by its commit and fired — once, with the
//! presentation timestamp — when the renderer reports the frame on screen.
//! All callbacks armed for a tick fire in one pass with equal timestamps.

use crate::prelude::*;
use crate::protocol::interfaces::wl_callback;
use crate::protocol::wire::MessageBuilder;
use crate::server::WayhostState;
use crate::surface::SurfaceId;

#[derive(Debug, Default)]
pub struct FrameScheduler {
    armed: Vec<SurfaceId>,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arm(&mut self, key: SurfaceId) {
        if !self.armed.contains(&key) {
            self.armed.push(key);
        }
    }

    pub fn disarm(&mut self, key: SurfaceId) {
        self.armed.retain(|k| *k != key);
    }

    /// Whether a presentation tick would do any work. When this is false the
    /// loop does not need renderer wake-ups at all.
    pub fn has_pending(&self) -> bool {
        !self.armed.is_empty()
    }

    fn take_armed(&mut self) -> Vec<SurfaceId> {
        std::mem::take(&mut self.armed)
    }
}

/// Fulfills every armed callback for one presentation tick.
pub fn fire_frame_callbacks(state: &mut WayhostState, tick_ms: u32) {
    let armed = state.scheduler.take_armed();
    if armed.is_empty() {
        return;
    }
    debug!("firing {} frame callbacks at {}ms", armed.len(), tick_ms);
    for key in armed {
        let Some(surface) = state.surfaces.get_mut(&key) else {
            continue;
        };
        let Some(callback) = surface.frame_callback.take() else {
            continue;
        };
        let client_id = surface.client;
        if let Some(client) = state.clients.get_mut(&client_id) {
            client.send(
                MessageBuilder::new(callback, wl_callback::EV_DONE)
                    .uint(tick_ms)
                    .build(),
            );
            // One-shot: the resource dies with the fire.
            client.remove(callback);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arm_is_idempotent() {
        let mut scheduler = FrameScheduler::new();
        scheduler.arm(SurfaceId(1));
        scheduler.arm(SurfaceId(1));
        scheduler.arm(SurfaceId(2));
        assert_eq!(scheduler.take_armed(), vec![SurfaceId(1), SurfaceId(2)]);
        assert!(!scheduler.has_pending());
    }

    #[test]
    fn disarm_removes_surface() {
        let mut scheduler = FrameScheduler::new();
        scheduler.arm(SurfaceId(1));
        scheduler.arm(SurfaceId(2));
        scheduler.disarm(SurfaceId(1));
        assert_eq!(scheduler.take_armed(), vec![SurfaceId(2)]);
    }
}
