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

//! Surfaces and their double-buffered state.
//!
//! Requests accumulate into a surface's *pending* bundle; `commit` promotes
//! pending to *applied* atomically. Subsurfaces add a parent link, a stacking
//! order, and the sync/desync commit modes.

use enum_as_inner::EnumAsInner;
use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

use crate::prelude::*;
use crate::protocol::Interface;
use crate::protocol::ObjectId;
use crate::protocol::ProtocolError;
use crate::protocol::SubcompositorError;
use crate::protocol::SurfaceError;
use crate::protocol::ViewportError;
use crate::protocol::geometry::Point;
use crate::protocol::geometry::Rectangle;
use crate::protocol::geometry::Size;
use crate::protocol::interfaces::wl_compositor;
use crate::protocol::interfaces::wl_region;
use crate::protocol::interfaces::wl_subcompositor;
use crate::protocol::interfaces::wl_subsurface;
use crate::protocol::interfaces::wl_surface;
use crate::protocol::interfaces::wp_viewport;
use crate::protocol::interfaces::wp_viewporter;
use crate::protocol::wire::ArgReader;
use crate::server::WayhostState;
use crate::server::client::ClientId;
use crate::server::client::Resource;
use crate::server::client::ResourceKind;
use crate::shm::BufferId;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct SurfaceId(pub u64);

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct RegionId(pub u64);

/// wl_output.transform values.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum Transform {
    #[default]
    Normal = 0,
    _90 = 1,
    _180 = 2,
    _270 = 3,
    Flipped = 4,
    Flipped90 = 5,
    Flipped180 = 6,
    Flipped270 = 7,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum RegionOp {
    Add,
    Subtract,
}

#[derive(Debug, Default, Clone, Eq, PartialEq)]
pub struct Region {
    pub rects: Vec<(RegionOp, Rectangle<i32>)>,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum BufferAssignment {
    Attach(BufferId),
    Remove,
}

/// Double-buffered viewport (wp_viewport) parameters.
#[derive(Debug, Default, Copy, Clone, PartialEq)]
pub struct ViewportSource {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

/// Accumulated-but-not-applied state. `None` fields were not touched since
/// the last commit and inherit the applied value.
#[derive(Debug, Default)]
pub struct PendingState {
    pub buffer: Option<BufferAssignment>,
    pub scale: Option<i32>,
    pub transform: Option<Transform>,
    pub damage: Vec<Rectangle<i32>>,
    pub opaque_region: Option<Option<Region>>,
    pub input_region: Option<Option<Region>>,
    pub viewport_src: Option<Option<ViewportSource>>,
    pub viewport_dst: Option<Option<Size<i32>>>,
}

impl PendingState {
    /// Folds `newer` on top of self; used when a sync subsurface commits
    /// repeatedly into its cache.
    fn merge(&mut self, newer: PendingState) {
        if newer.buffer.is_some() {
            self.buffer = newer.buffer;
        }
        if newer.scale.is_some() {
            self.scale = newer.scale;
        }
        if newer.transform.is_some() {
            self.transform = newer.transform;
        }
        self.damage.extend(newer.damage);
        if newer.opaque_region.is_some() {
            self.opaque_region = newer.opaque_region;
        }
        if newer.input_region.is_some() {
            self.input_region = newer.input_region;
        }
        if newer.viewport_src.is_some() {
            self.viewport_src = newer.viewport_src;
        }
        if newer.viewport_dst.is_some() {
            self.viewport_dst = newer.viewport_dst;
        }
    }

    fn is_empty(&self) -> bool {
        self.buffer.is_none()
            && self.scale.is_none()
            && self.transform.is_none()
            && self.damage.is_empty()
            && self.opaque_region.is_none()
            && self.input_region.is_none()
            && self.viewport_src.is_none()
            && self.viewport_dst.is_none()
    }
}

/// The state the renderer sees.
#[derive(Debug)]
pub struct AppliedState {
    pub buffer: Option<BufferId>,
    pub scale: i32,
    pub transform: Transform,
    pub damage: Vec<Rectangle<i32>>,
    pub opaque_region: Option<Region>,
    pub input_region: Option<Region>,
    pub viewport_src: Option<ViewportSource>,
    pub viewport_dst: Option<Size<i32>>,
    /// Derived per the buffer/scale/viewport rules; (0,0) while unmapped.
    pub size: Size<i32>,
}

impl Default for AppliedState {
    fn default() -> Self {
        Self {
            buffer: None,
            scale: 1,
            transform: Transform::Normal,
            damage: Vec::new(),
            opaque_region: None,
            input_region: None,
            viewport_src: None,
            viewport_dst: None,
            size: Size::default(),
        }
    }
}

#[derive(Debug)]
pub struct SubsurfaceState {
    pub parent: SurfaceId,
    pub position: Point<i32>,
    pub pending_position: Option<Point<i32>>,
    pub sync: bool,
    /// State cached by commits while in sync mode, applied when the parent
    /// commits.
    pub cached: Option<PendingState>,
}

#[derive(Debug, EnumAsInner)]
pub enum Role {
    Cursor { hotspot: Point<i32> },
    Subsurface(SubsurfaceState),
    Toplevel(crate::xdg_shell::ToplevelId),
    Popup(crate::xdg_shell::PopupId),
}

impl Role {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Cursor { .. } => "cursor",
            Self::Subsurface(_) => "wl_subsurface",
            Self::Toplevel(_) => "xdg_toplevel",
            Self::Popup(_) => "xdg_popup",
        }
    }
}

#[derive(Debug)]
pub struct Surface {
    pub client: ClientId,
    pub id: ObjectId,
    pub key: SurfaceId,
    pub pending: PendingState,
    pub applied: AppliedState,
    pub role: Option<Role>,
    pub xdg: Option<crate::xdg_shell::XdgSurfaceId>,
    pub has_viewport: bool,
    /// At most one; a newer `frame` request replaces (and silently destroys)
    /// the previous callback.
    pub frame_callback: Option<ObjectId>,
    /// Subsurfaces stacked above this surface, bottom-most first.
    pub children: Vec<SurfaceId>,
    /// Whether the first commit carrying a buffer has happened.
    pub mapped: bool,
}

impl Surface {
    pub fn new(client: ClientId, id: ObjectId, key: SurfaceId) -> Self {
        Self {
            client,
            id,
            key,
            pending: PendingState::default(),
            applied: AppliedState::default(),
            role: None,
            xdg: None,
            has_viewport: false,
            frame_callback: None,
            children: Vec::new(),
            mapped: false,
        }
    }

    pub fn set_role(&mut self, role: Role, object: ObjectId) -> Result<(), ProtocolError> {
        if let Some(existing) = &self.role {
            return Err(ProtocolError::new(
                object,
                crate::protocol::WmBaseError::Role,
                format!("surface already has the {} role", existing.name()),
            ));
        }
        self.role = Some(role);
        Ok(())
    }
}

/// wl_compositor requests.
pub fn compositor_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_compositor::CREATE_SURFACE => {
            let id = args.new_id()?;
            let key = SurfaceId(state.ids.next());
            state.client_mut(client_id)?.create(
                id,
                Interface::WlSurface,
                resource.version,
                ResourceKind::Surface(key),
            )?;
            state.surfaces.insert(key, Surface::new(client_id, id, key));
            Ok(())
        },
        wl_compositor::CREATE_REGION => {
            let id = args.new_id()?;
            let key = RegionId(state.ids.next());
            state.client_mut(client_id)?.create(
                id,
                Interface::WlRegion,
                resource.version,
                ResourceKind::Region(key),
            )?;
            state.regions.insert(key, Region::default());
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_compositor opcode {opcode}"),
        )),
    }
}

/// wl_region requests.
pub fn region_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    region_id: RegionId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_region::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        wl_region::ADD | wl_region::SUBTRACT => {
            let x = args.int()?;
            let y = args.int()?;
            let w = args.int()?;
            let h = args.int()?;
            let op = if opcode == wl_region::ADD {
                RegionOp::Add
            } else {
                RegionOp::Subtract
            };
            if let Some(region) = state.regions.get_mut(&region_id) {
                region.rects.push((op, Rectangle::new(x, y, w, h)));
            }
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_region opcode {opcode}"),
        )),
    }
}

/// wl_surface requests.
pub fn surface_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: SurfaceId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_surface::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        wl_surface::ATTACH => {
            let buffer = args.object()?;
            let _x = args.int()?;
            let _y = args.int()?;
            let assignment = if buffer.is_null() {
                BufferAssignment::Remove
            } else {
                let buffer_res = state.client_mut(client_id)?.resource(buffer)?;
                let Some(&buffer_id) = buffer_res.kind.as_buffer() else {
                    return Err(ProtocolError::invalid_object(buffer));
                };
                BufferAssignment::Attach(buffer_id)
            };
            if let Some(surface) = state.surfaces.get_mut(&key) {
                surface.pending.buffer = Some(assignment);
            }
            Ok(())
        },
        wl_surface::DAMAGE | wl_surface::DAMAGE_BUFFER => {
            let x = args.int()?;
            let y = args.int()?;
            let w = args.int()?;
            let h = args.int()?;
            if let Some(surface) = state.surfaces.get_mut(&key)
                && w > 0
                && h > 0
            {
                surface.pending.damage.push(Rectangle::new(x, y, w, h));
            }
            Ok(())
        },
        wl_surface::FRAME => {
            let callback = args.new_id()?;
            replace_frame_callback(state, client_id, resource.version, key, callback)
        },
        wl_surface::SET_OPAQUE_REGION | wl_surface::SET_INPUT_REGION => {
            let region = args.object()?;
            let value = if region.is_null() {
                None
            } else {
                let region_res = state.client_mut(client_id)?.resource(region)?;
                let Some(&region_id) = region_res.kind.as_region() else {
                    return Err(ProtocolError::invalid_object(region));
                };
                state.regions.get(&region_id).cloned()
            };
            if let Some(surface) = state.surfaces.get_mut(&key) {
                if opcode == wl_surface::SET_OPAQUE_REGION {
                    surface.pending.opaque_region = Some(value);
                } else {
                    surface.pending.input_region = Some(value);
                }
            }
            Ok(())
        },
        wl_surface::COMMIT => commit_surface(state, client_id, resource.id, key),
        wl_surface::SET_BUFFER_TRANSFORM => {
            let raw = args.int()?;
            let transform = Transform::try_from(raw as u32).map_err(|_| {
                ProtocolError::new(
                    resource.id,
                    SurfaceError::InvalidTransform,
                    format!("transform {raw}"),
                )
            })?;
            if let Some(surface) = state.surfaces.get_mut(&key) {
                surface.pending.transform = Some(transform);
            }
            Ok(())
        },
        wl_surface::SET_BUFFER_SCALE => {
            let scale = args.int()?;
            if let Some(surface) = state.surfaces.get_mut(&key) {
                surface.pending.scale = Some(scale);
            }
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_surface opcode {opcode}"),
        )),
    }
}

fn replace_frame_callback(
    state: &mut WayhostState,
    client_id: ClientId,
    version: u32,
    key: SurfaceId,
    callback: ObjectId,
) -> Result<(), ProtocolError> {
    let replaced = {
        let Some(surface) = state.surfaces.get_mut(&key) else {
            return Ok(());
        };
        surface.frame_callback.replace(callback)
    };
    if let Some(old) = replaced {
        // The superseded callback dies without firing, and any armed state
        // belongs to the commit the new callback has not made yet.
        state.scheduler.disarm(key);
        state.client_mut(client_id)?.remove(old);
    }
    state.client_mut(client_id)?.create(
        callback,
        Interface::WlCallback,
        version.min(Interface::WlCallback.max_version()),
        ResourceKind::FrameCallback(key),
    )
}

/// wl_subcompositor requests.
pub fn subcompositor_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_subcompositor::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        wl_subcompositor::GET_SUBSURFACE => {
            let id = args.new_id()?;
            let surface = args.object()?;
            let parent = args.object()?;
            get_subsurface(state, client_id, resource, id, surface, parent)
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_subcompositor opcode {opcode}"),
        )),
    }
}

fn get_subsurface(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    id: ObjectId,
    surface: ObjectId,
    parent: ObjectId,
) -> Result<(), ProtocolError> {
    let client = state.client_mut(client_id)?;
    let surface_res = client.resource(surface)?;
    let parent_res = client.resource(parent)?;
    let Some(&surface_key) = surface_res.kind.as_surface() else {
        return Err(ProtocolError::new(
            resource.id,
            SubcompositorError::BadSurface,
            "subsurface target is not a wl_surface",
        ));
    };
    let Some(&parent_key) = parent_res.kind.as_surface() else {
        return Err(ProtocolError::new(
            resource.id,
            SubcompositorError::BadParent,
            "subsurface parent is not a wl_surface",
        ));
    };
    if surface_key == parent_key || is_ancestor(state, surface_key, parent_key) {
        return Err(ProtocolError::new(
            resource.id,
            SubcompositorError::BadParent,
            "subsurface parent loop",
        ));
    }

    {
        let surface = state
            .surfaces
            .get_mut(&surface_key)
            .ok_or_else(|| ProtocolError::invalid_object(surface))?;
        surface.set_role(
            Role::Subsurface(SubsurfaceState {
                parent: parent_key,
                position: Point::default(),
                pending_position: None,
                sync: true,
                cached: None,
            }),
            resource.id,
        )?;
    }
    if let Some(parent_surface) = state.surfaces.get_mut(&parent_key) {
        parent_surface.children.push(surface_key);
    }
    state.client_mut(client_id)?.create(
        id,
        Interface::WlSubsurface,
        resource.version,
        ResourceKind::Subsurface(surface_key),
    )
}

/// True if `candidate` is an ancestor of `of`.
fn is_ancestor(state: &WayhostState, candidate: SurfaceId, of: SurfaceId) -> bool {
    let mut cursor = of;
    let mut hops = 0;
    while let Some(surface) = state.surfaces.get(&cursor) {
        let Some(Role::Subsurface(sub)) = &surface.role else {
            return false;
        };
        if sub.parent == candidate {
            return true;
        }
        cursor = sub.parent;
        hops += 1;
        if hops > 64 {
            return false;
        }
    }
    false
}

/// wl_subsurface requests.
pub fn subsurface_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: SurfaceId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_subsurface::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        wl_subsurface::SET_POSITION => {
            let x = args.int()?;
            let y = args.int()?;
            if let Some(sub) = subsurface_state_mut(state, key) {
                sub.pending_position = Some(Point { x, y });
            }
            Ok(())
        },
        wl_subsurface::PLACE_ABOVE | wl_subsurface::PLACE_BELOW => {
            let sibling = args.object()?;
            let sibling_res = state.client_mut(client_id)?.resource(sibling)?;
            let Some(&sibling_key) = sibling_res.kind.as_surface() else {
                return Err(ProtocolError::new(
                    resource.id,
                    SubcompositorError::BadSurface,
                    "stacking target is not a wl_surface",
                ));
            };
            restack(
                state,
                resource.id,
                key,
                sibling_key,
                opcode == wl_subsurface::PLACE_ABOVE,
            )
        },
        wl_subsurface::SET_SYNC => {
            if let Some(sub) = subsurface_state_mut(state, key) {
                sub.sync = true;
            }
            Ok(())
        },
        wl_subsurface::SET_DESYNC => {
            let cached = match subsurface_state_mut(state, key) {
                Some(sub) => {
                    sub.sync = false;
                    sub.cached.take()
                },
                None => None,
            };
            // Leaving sync mode applies whatever was cached.
            if let Some(cached) = cached {
                if let Some(surface) = state.surfaces.get_mut(&key) {
                    let newer = std::mem::take(&mut surface.pending);
                    surface.pending = cached;
                    surface.pending.merge(newer);
                }
                apply_committed_state(state, key);
            }
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_subsurface opcode {opcode}"),
        )),
    }
}

fn subsurface_state_mut(state: &mut WayhostState, key: SurfaceId) -> Option<&mut SubsurfaceState> {
    state
        .surfaces
        .get_mut(&key)
        .and_then(|s| s.role.as_mut())
        .and_then(|r| r.as_subsurface_mut())
}

fn restack(
    state: &mut WayhostState,
    object: ObjectId,
    key: SurfaceId,
    sibling: SurfaceId,
    above: bool,
) -> Result<(), ProtocolError> {
    let Some(parent_key) = subsurface_state_mut(state, key).map(|s| s.parent) else {
        return Ok(());
    };
    let Some(parent) = state.surfaces.get_mut(&parent_key) else {
        return Ok(());
    };
    let Some(from) = parent.children.iter().position(|c| *c == key) else {
        return Ok(());
    };

    if sibling == parent_key {
        // Relative to the parent surface itself: above means bottom-most of
        // the children stack, below is not representable and pins to bottom.
        parent.children.remove(from);
        parent.children.insert(0, key);
        return Ok(());
    }
    if !parent.children.contains(&sibling) {
        return Err(ProtocolError::new(
            object,
            SubcompositorError::BadSurface,
            "stacking target is not a sibling",
        ));
    }
    parent.children.remove(from);
    let anchor = parent
        .children
        .iter()
        .position(|c| *c == sibling)
        .unwrap_or(0);
    let to = if above { anchor + 1 } else { anchor };
    parent.children.insert(to, key);
    Ok(())
}

/// wp_viewporter requests.
pub fn viewporter_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wp_viewporter::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        wp_viewporter::GET_VIEWPORT => {
            let id = args.new_id()?;
            let surface = args.object()?;
            let surface_res = state.client_mut(client_id)?.resource(surface)?;
            let Some(&key) = surface_res.kind.as_surface() else {
                return Err(ProtocolError::invalid_object(surface));
            };
            let Some(target) = state.surfaces.get_mut(&key) else {
                return Err(ProtocolError::invalid_object(surface));
            };
            if target.has_viewport {
                return Err(ProtocolError::new(
                    resource.id,
                    crate::protocol::ViewporterError::ViewportExists,
                    "surface already has a viewport",
                ));
            }
            state.client_mut(client_id)?.create(
                id,
                Interface::WpViewport,
                resource.version,
                ResourceKind::Viewport(key),
            )?;
            if let Some(target) = state.surfaces.get_mut(&key) {
                target.has_viewport = true;
            }
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wp_viewporter opcode {opcode}"),
        )),
    }
}

/// wp_viewport requests.
pub fn viewport_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: SurfaceId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wp_viewport::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        wp_viewport::SET_SOURCE => {
            let x = args.fixed()?.to_f64();
            let y = args.fixed()?.to_f64();
            let w = args.fixed()?.to_f64();
            let h = args.fixed()?.to_f64();
            let unset = x == -1.0 && y == -1.0 && w == -1.0 && h == -1.0;
            if !unset && (x < 0.0 || y < 0.0 || w <= 0.0 || h <= 0.0) {
                return Err(ProtocolError::new(
                    resource.id,
                    ViewportError::BadValue,
                    format!("bad source rectangle {w}x{h}@{x},{y}"),
                ));
            }
            if let Some(surface) = state.surfaces.get_mut(&key) {
                surface.pending.viewport_src = Some(if unset {
                    None
                } else {
                    Some(ViewportSource { x, y, w, h })
                });
            }
            Ok(())
        },
        wp_viewport::SET_DESTINATION => {
            let w = args.int()?;
            let h = args.int()?;
            let unset = w == -1 && h == -1;
            if !unset && (w <= 0 || h <= 0) {
                return Err(ProtocolError::new(
                    resource.id,
                    ViewportError::BadValue,
                    format!("bad destination size {w}x{h}"),
                ));
            }
            if let Some(surface) = state.surfaces.get_mut(&key) {
                surface.pending.viewport_dst =
                    Some(if unset { None } else { Some(Size { w, h }) });
            }
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wp_viewport opcode {opcode}"),
        )),
    }
}

/// `wl_surface.commit`.
///
/// Sync subsurfaces cache; everything else applies immediately, then applies
/// any sync children's caches, re-derives sizes, and hands the tree to the
/// renderer.
pub fn commit_surface(
    state: &mut WayhostState,
    client_id: ClientId,
    object: ObjectId,
    key: SurfaceId,
) -> Result<(), ProtocolError> {
    precommit_checks(state, object, key)?;

    let nothing_pending;
    let sync_mode;
    {
        let Some(surface) = state.surfaces.get_mut(&key) else {
            return Ok(());
        };
        nothing_pending = surface.pending.is_empty() && surface.frame_callback.is_none();
        sync_mode = matches!(&surface.role, Some(Role::Subsurface(sub)) if sub.sync);
    }

    if sync_mode {
        let surface = state.surfaces.get_mut(&key).unwrap();
        let pending = std::mem::take(&mut surface.pending);
        let Some(Role::Subsurface(sub)) = &mut surface.role else {
            return Ok(());
        };
        match &mut sub.cached {
            Some(cached) => cached.merge(pending),
            None => sub.cached = Some(pending),
        }
        return Ok(());
    }

    apply_committed_state(state, key);
    let children_applied = apply_sync_children(state, key);
    crate::xdg_shell::surface_committed(state, client_id, key)?;

    // An empty commit must not wake anyone: no release can have been queued
    // and no new frame content exists, so skip the renderer publish too.
    if !nothing_pending || children_applied {
        state.publish_scene();
    }
    Ok(())
}

fn precommit_checks(
    state: &WayhostState,
    object: ObjectId,
    key: SurfaceId,
) -> Result<(), ProtocolError> {
    let Some(surface) = state.surfaces.get(&key) else {
        return Ok(());
    };
    let attaching = matches!(surface.pending.buffer, Some(BufferAssignment::Attach(_)));
    if attaching && surface.role.is_none() && surface.xdg.is_none() {
        return Err(ProtocolError::new(
            object,
            SurfaceError::DefunctRoleObject,
            "buffer committed to a surface with no role",
        ));
    }
    crate::xdg_shell::precommit_checks(state, object, surface)
}

/// Promotes pending state to applied for one surface.
pub fn apply_committed_state(state: &mut WayhostState, key: SurfaceId) {
    let (old_buffer, new_buffer);
    {
        let Some(surface) = state.surfaces.get_mut(&key) else {
            return;
        };
        let pending = std::mem::take(&mut surface.pending);
        old_buffer = surface.applied.buffer;
        new_buffer = match pending.buffer {
            Some(BufferAssignment::Attach(b)) => Some(b),
            Some(BufferAssignment::Remove) => None,
            None => old_buffer,
        };
        surface.applied.buffer = new_buffer;
        if let Some(scale) = pending.scale {
            // Out-of-range scales are clamped rather than fatal.
            surface.applied.scale = scale.max(1);
        }
        if let Some(transform) = pending.transform {
            surface.applied.transform = transform;
        }
        surface.applied.damage = pending.damage;
        if let Some(region) = pending.opaque_region {
            surface.applied.opaque_region = region;
        }
        if let Some(region) = pending.input_region {
            surface.applied.input_region = region;
        }
        if let Some(src) = pending.viewport_src {
            surface.applied.viewport_src = src;
        }
        if let Some(dst) = pending.viewport_dst {
            surface.applied.viewport_dst = dst;
        }
        if let Some(Role::Subsurface(sub)) = &mut surface.role
            && let Some(position) = sub.pending_position.take()
        {
            sub.position = position;
        }
        if new_buffer.is_some() {
            surface.mapped = true;
        }

        if surface.frame_callback.is_some() {
            state.scheduler.arm(key);
        }
    }

    // Buffer hand-over bookkeeping: the incoming buffer becomes held, the
    // replaced one waits for the renderer to retire it before release.
    if let Some(b) = new_buffer
        && let Some(record) = state.buffers.get_mut(&b)
    {
        record.held_by = Some(key);
        record.awaiting_retire = false;
    }
    if old_buffer != new_buffer
        && let Some(old) = old_buffer
        && let Some(record) = state.buffers.get_mut(&old)
    {
        if record.held_by == Some(key) {
            record.held_by = None;
            record.awaiting_retire = true;
        }
    }

    recompute_size(state, key);
}

/// Applies the cached state of every sync child, recursively. Returns
/// whether anything was applied.
fn apply_sync_children(state: &mut WayhostState, key: SurfaceId) -> bool {
    let children = match state.surfaces.get(&key) {
        Some(surface) => surface.children.clone(),
        None => return false,
    };
    let mut applied_any = false;
    for child in children {
        let cached = {
            let Some(surface) = state.surfaces.get_mut(&child) else {
                continue;
            };
            let Some(Role::Subsurface(sub)) = &mut surface.role else {
                continue;
            };
            if !sub.sync {
                continue;
            }
            sub.cached.take()
        };
        if let Some(cached) = cached {
            let surface = state.surfaces.get_mut(&child).unwrap();
            debug_assert!(surface.pending.is_empty());
            surface.pending = cached;
            apply_committed_state(state, child);
            applied_any = true;
        }
        applied_any |= apply_sync_children(state, child);
    }
    applied_any
}

/// Derives the applied size: viewport destination wins, then viewport
/// source, then buffer size divided by scale (each dimension at least 1).
fn recompute_size(state: &mut WayhostState, key: SurfaceId) {
    let buffer_size = state
        .surfaces
        .get(&key)
        .and_then(|s| s.applied.buffer)
        .and_then(|b| state.buffers.get(&b))
        .map(|record| record.size);
    let Some(surface) = state.surfaces.get_mut(&key) else {
        return;
    };
    surface.applied.size = if let Some(dst) = surface.applied.viewport_dst {
        dst
    } else if let Some(src) = surface.applied.viewport_src {
        Size {
            w: (src.w.round() as i32).max(1),
            h: (src.h.round() as i32).max(1),
        }
    } else if let Some(size) = buffer_size {
        let scale = surface.applied.scale.max(1);
        Size {
            w: (size.w / scale).max(1),
            h: (size.h / scale).max(1),
        }
    } else {
        Size::default()
    };
}

/// Drops every reference to a destroyed buffer so no commit can read freed
/// memory. Applied references vanish without a release; the buffer is gone.
pub fn sweep_buffer_references(state: &mut WayhostState, buffer: BufferId) {
    for surface in state.surfaces.values_mut() {
        if surface.pending.buffer == Some(BufferAssignment::Attach(buffer)) {
            surface.pending.buffer = Some(BufferAssignment::Remove);
        }
        if let Some(Role::Subsurface(sub)) = &mut surface.role
            && let Some(cached) = &mut sub.cached
            && cached.buffer == Some(BufferAssignment::Attach(buffer))
        {
            cached.buffer = Some(BufferAssignment::Remove);
        }
        if surface.applied.buffer == Some(buffer) {
            surface.applied.buffer = None;
        }
    }
}

/// Domain cleanup when a surface resource dies.
pub fn surface_destroyed(state: &mut WayhostState, key: SurfaceId) {
    let Some(surface) = state.surfaces.remove(&key) else {
        return;
    };
    // Unlink from the tree both ways.
    if let Some(Role::Subsurface(sub)) = &surface.role
        && let Some(parent) = state.surfaces.get_mut(&sub.parent)
    {
        parent.children.retain(|c| *c != key);
    }
    for child in &surface.children {
        if let Some(child_surface) = state.surfaces.get_mut(child)
            && matches!(&child_surface.role, Some(Role::Subsurface(_)))
        {
            // Orphaned subsurfaces keep their state but leave the tree.
            child_surface.role = None;
        }
    }
    if let Some(buffer) = surface.applied.buffer
        && let Some(record) = state.buffers.get_mut(&buffer)
        && record.held_by == Some(key)
    {
        record.held_by = None;
        record.awaiting_retire = true;
    }
    if let Some(callback) = surface.frame_callback
        && let Some(client) = state.clients.get_mut(&surface.client)
    {
        client.remove(callback);
    }
    state.scheduler.disarm(key);
    state.seat.surface_destroyed(key);
    crate::xdg_shell::surface_gone(state, key);
}

/// Domain cleanup when a wl_subsurface resource dies: the role ends and the
/// surface leaves the tree, but the wl_surface itself lives on.
pub fn subsurface_resource_destroyed(state: &mut WayhostState, key: SurfaceId) {
    let parent = {
        let Some(surface) = state.surfaces.get_mut(&key) else {
            return;
        };
        match &surface.role {
            Some(Role::Subsurface(sub)) => {
                let parent = sub.parent;
                surface.role = None;
                Some(parent)
            },
            _ => None,
        }
    };
    if let Some(parent) = parent
        && let Some(parent_surface) = state.surfaces.get_mut(&parent)
    {
        parent_surface.children.retain(|c| *c != key);
    }
}

/// Domain cleanup when a viewport resource dies: double-buffered viewport
/// state reverts to unset.
pub fn viewport_destroyed(state: &mut WayhostState, key: SurfaceId) {
    if let Some(surface) = state.surfaces.get_mut(&key) {
        surface.has_viewport = false;
        surface.pending.viewport_src = Some(None);
        surface.pending.viewport_dst = Some(None);
    }
}
