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

//! The renderer seam.
//!
//! The dispatch thread publishes immutable scene snapshots over a bounded
//! queue; the renderer answers with `Retired` (it stopped reading a buffer,
//! unblocking `wl_buffer.release`) and `Presented` (a frame hit the display,
//! unblocking frame callbacks). The renderer never touches live protocol
//! state.

use std::collections::HashSet;
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use crate::prelude::*;
use crate::protocol::geometry::Point;
use crate::protocol::geometry::Rectangle;
use crate::server::WayhostState;
use crate::shm::BufferId;
use crate::shm::BufferSource;
use crate::shm::DmabufPlane;
use crate::shm::PoolMemory;
use crate::shm::ShmFormat;
use crate::surface::SurfaceId;
use crate::surface::Transform;

/// How many unconsumed snapshots may queue before frames are dropped.
const SCENE_QUEUE_DEPTH: usize = 4;

#[derive(Debug, Clone)]
pub enum SceneBuffer {
    Shm {
        memory: Arc<PoolMemory>,
        offset: i32,
        width: i32,
        height: i32,
        stride: i32,
        format: ShmFormat,
    },
    Dmabuf {
        planes: Arc<Vec<DmabufPlane>>,
        format: u32,
        flags: u32,
        width: i32,
        height: i32,
    },
}

#[derive(Debug, Clone)]
pub struct SceneSurface {
    pub surface: SurfaceId,
    pub buffer: BufferId,
    pub content: SceneBuffer,
    pub scale: i32,
    pub transform: Transform,
    pub damage: Vec<Rectangle<i32>>,
    /// Position within the window tree plus the derived size.
    pub geometry: Rectangle<i32>,
}

#[derive(Debug, Clone, Default)]
pub struct SceneSnapshot {
    pub serial: u64,
    pub surfaces: Vec<SceneSurface>,
}

#[derive(Debug)]
pub enum RenderCommand {
    Present(SceneSnapshot),
    Shutdown,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RendererEvent {
    /// The renderer no longer reads this buffer.
    Retired(BufferId),
    /// A frame reached the display at this timestamp.
    Presented(u32),
}

/// Dispatch-side handle to the renderer queue.
#[derive(Debug, Clone)]
pub struct RendererLink {
    commands: crossbeam_channel::Sender<RenderCommand>,
}

impl RendererLink {
    /// A link plus the receiving end, for whoever runs the renderer.
    pub fn channel() -> (Self, crossbeam_channel::Receiver<RenderCommand>) {
        let (commands, rx) = crossbeam_channel::bounded(SCENE_QUEUE_DEPTH);
        (Self { commands }, rx)
    }

    /// Queue-full and renderer-gone are both recoverable: the frame is
    /// dropped and a later commit publishes a fresh snapshot.
    pub fn present(&self, snapshot: SceneSnapshot) {
        match self.commands.try_send(RenderCommand::Present(snapshot)) {
            Ok(()) => {},
            Err(crossbeam_channel::TrySendError::Full(_)) => {
                debug!("renderer queue full, dropping frame");
            },
            Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                debug!("renderer gone, dropping frame");
            },
        }
    }

    pub fn shutdown(&self) {
        let _ = self.commands.try_send(RenderCommand::Shutdown);
    }
}

/// Builds the immutable snapshot for the current applied state: every
/// mapped toplevel's tree, bottom-up. Surfaces with no applied buffer
/// produce nothing.
pub fn build_scene(state: &mut WayhostState) -> SceneSnapshot {
    state.scene_serial += 1;
    let mut surfaces = Vec::new();
    let mut roots: Vec<SurfaceId> = state
        .toplevels
        .values()
        .filter(|t| t.has_native_window)
        .map(|t| t.surface)
        .collect();
    roots.extend(state.popups.values().map(|p| p.surface));
    for root in roots {
        collect_tree(state, root, Point { x: 0, y: 0 }, &mut surfaces);
    }
    SceneSnapshot {
        serial: state.scene_serial,
        surfaces,
    }
}

fn collect_tree(
    state: &WayhostState,
    key: SurfaceId,
    origin: Point<i32>,
    out: &mut Vec<SceneSurface>,
) {
    let Some(surface) = state.surfaces.get(&key) else {
        return;
    };
    if let Some(buffer_id) = surface.applied.buffer
        && let Some(record) = state.buffers.get(&buffer_id)
    {
        let content = match &record.source {
            BufferSource::Shm(spec) => SceneBuffer::Shm {
                memory: spec.memory.clone(),
                offset: spec.offset,
                width: spec.width,
                height: spec.height,
                stride: spec.stride,
                format: spec.format,
            },
            BufferSource::Dmabuf {
                planes,
                format,
                flags,
            } => SceneBuffer::Dmabuf {
                planes: planes.clone(),
                format: *format,
                flags: *flags,
                width: record.size.w,
                height: record.size.h,
            },
        };
        out.push(SceneSurface {
            surface: key,
            buffer: buffer_id,
            content,
            scale: surface.applied.scale,
            transform: surface.applied.transform,
            damage: surface.applied.damage.clone(),
            geometry: Rectangle {
                loc: origin,
                size: surface.applied.size,
            },
        });
    }
    for child in &surface.children {
        let offset = state
            .surfaces
            .get(child)
            .and_then(|c| c.role.as_ref())
            .and_then(|r| r.as_subsurface())
            .map(|s| s.position)
            .unwrap_or_default();
        collect_tree(
            state,
            *child,
            Point {
                x: origin.x + offset.x,
                y: origin.y + offset.y,
            },
            out,
        );
    }
}

/// A renderer that draws nothing: it retires every buffer as soon as a
/// snapshot stops referencing it and reports presentation immediately.
/// Default for headless runs; also what the end-to-end tests talk to.
pub fn spawn_headless(
    commands: crossbeam_channel::Receiver<RenderCommand>,
    events: calloop::channel::Sender<RendererEvent>,
) -> thread::JoinHandle<()> {
    thread::Builder::new()
        .name("wayhost-renderer".into())
        .spawn(move || {
            let start = Instant::now();
            let mut referenced: HashSet<BufferId> = HashSet::new();
            while let Ok(command) = commands.recv() {
                match command {
                    RenderCommand::Present(snapshot) => {
                        let now: HashSet<BufferId> =
                            snapshot.surfaces.iter().map(|s| s.buffer).collect();
                        for buffer in referenced.difference(&now) {
                            if events.send(RendererEvent::Retired(*buffer)).is_err() {
                                return;
                            }
                        }
                        referenced = now;
                        let tick = crate::utils::timestamp_ms(start);
                        if events.send(RendererEvent::Presented(tick)).is_err() {
                            return;
                        }
                    },
                    RenderCommand::Shutdown => return,
                }
            }
        })
        .expect("spawning renderer thread")
}
