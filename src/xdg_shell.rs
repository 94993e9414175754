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

//! The xdg-shell window machine: `xdg_wm_base`, `xdg_surface`, toplevels,
//! popups, and the configure/ack handshake that gates every state change.
//!
//! The handshake discipline: any server-side state proposal is a role
//! configure event followed by `xdg_surface.configure(serial)`; nothing takes
//! effect until the client acks a serial and commits.

use std::collections::VecDeque;
use std::time::Instant;

use crate::decoration::DecorationMode;
use crate::prelude::*;
use crate::protocol::Interface;
use crate::protocol::ObjectId;
use crate::protocol::PositionerError;
use crate::protocol::ProtocolError;
use crate::protocol::WmBaseError;
use crate::protocol::XdgSurfaceError;
use crate::protocol::geometry::Point;
use crate::protocol::geometry::Rectangle;
use crate::protocol::geometry::Size;
use crate::protocol::interfaces::xdg_popup;
use crate::protocol::interfaces::xdg_positioner;
use crate::protocol::interfaces::xdg_surface;
use crate::protocol::interfaces::xdg_toplevel;
use crate::protocol::interfaces::xdg_wm_base;
use crate::protocol::wire::ArgReader;
use crate::protocol::wire::MessageBuilder;
use crate::server::WayhostState;
use crate::server::client::ClientId;
use crate::server::client::Resource;
use crate::server::client::ResourceKind;
use crate::surface::Role;
use crate::surface::Surface;
use crate::surface::SurfaceId;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct XdgSurfaceId(pub u64);

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct ToplevelId(pub u64);

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct PopupId(pub u64);

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct PositionerId(pub u64);

/// xdg_toplevel.state values.
mod state_value {
    pub const MAXIMIZED: u32 = 1;
    pub const FULLSCREEN: u32 = 2;
    pub const RESIZING: u32 = 3;
    pub const ACTIVATED: u32 = 4;
    pub const TILED_LEFT: u32 = 5;
    pub const TILED_RIGHT: u32 = 6;
    pub const TILED_TOP: u32 = 7;
    pub const TILED_BOTTOM: u32 = 8;
}

/// The window-state set sent in every toplevel configure.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct WindowStates {
    pub maximized: bool,
    pub fullscreen: bool,
    pub resizing: bool,
    pub activated: bool,
    pub tiled_left: bool,
    pub tiled_right: bool,
    pub tiled_top: bool,
    pub tiled_bottom: bool,
}

impl WindowStates {
    /// Wire encoding: an array of u32 state values.
    pub fn to_wire(self) -> Vec<u8> {
        let mut values = Vec::new();
        if self.maximized {
            values.push(state_value::MAXIMIZED);
        }
        if self.fullscreen {
            values.push(state_value::FULLSCREEN);
        }
        if self.resizing {
            values.push(state_value::RESIZING);
        }
        if self.activated {
            values.push(state_value::ACTIVATED);
        }
        if self.tiled_left {
            values.push(state_value::TILED_LEFT);
        }
        if self.tiled_right {
            values.push(state_value::TILED_RIGHT);
        }
        if self.tiled_top {
            values.push(state_value::TILED_TOP);
        }
        if self.tiled_bottom {
            values.push(state_value::TILED_BOTTOM);
        }
        values.iter().flat_map(|v| v.to_ne_bytes()).collect()
    }
}

/// Anchor / gravity values share an encoding.
mod edge {
    pub const TOP: u32 = 1;
    pub const BOTTOM: u32 = 2;
    pub const LEFT: u32 = 3;
    pub const RIGHT: u32 = 4;
    pub const TOP_LEFT: u32 = 5;
    pub const BOTTOM_LEFT: u32 = 6;
    pub const TOP_RIGHT: u32 = 7;
    pub const BOTTOM_RIGHT: u32 = 8;
}

mod constraint {
    pub const SLIDE_X: u32 = 1;
    pub const SLIDE_Y: u32 = 2;
    pub const FLIP_X: u32 = 4;
    pub const FLIP_Y: u32 = 8;
}

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Positioner {
    pub size: Size<i32>,
    pub anchor_rect: Option<Rectangle<i32>>,
    pub anchor: u32,
    pub gravity: u32,
    pub constraint_adjustment: u32,
    pub offset: Point<i32>,
    pub reactive: bool,
    pub parent_size: Option<Size<i32>>,
    pub parent_configure: Option<u32>,
}

impl Positioner {
    pub fn is_complete(&self) -> bool {
        self.size.w > 0 && self.size.h > 0 && self.anchor_rect.is_some()
    }

    fn anchor_point(&self, rect: Rectangle<i32>) -> Point<i32> {
        let cx = rect.loc.x + rect.size.w / 2;
        let cy = rect.loc.y + rect.size.h / 2;
        match self.anchor {
            edge::TOP => Point { x: cx, y: rect.loc.y },
            edge::BOTTOM => Point { x: cx, y: rect.bottom() },
            edge::LEFT => Point { x: rect.loc.x, y: cy },
            edge::RIGHT => Point { x: rect.right(), y: cy },
            edge::TOP_LEFT => rect.loc,
            edge::BOTTOM_LEFT => Point { x: rect.loc.x, y: rect.bottom() },
            edge::TOP_RIGHT => Point { x: rect.right(), y: rect.loc.y },
            edge::BOTTOM_RIGHT => Point { x: rect.right(), y: rect.bottom() },
            _ => Point { x: cx, y: cy },
        }
    }

    fn place(&self, anchor: Point<i32>, gravity: u32) -> Rectangle<i32> {
        let Size { w, h } = self.size;
        let x = match gravity {
            edge::LEFT | edge::TOP_LEFT | edge::BOTTOM_LEFT => anchor.x - w,
            edge::RIGHT | edge::TOP_RIGHT | edge::BOTTOM_RIGHT => anchor.x,
            _ => anchor.x - w / 2,
        };
        let y = match gravity {
            edge::TOP | edge::TOP_LEFT | edge::TOP_RIGHT => anchor.y - h,
            edge::BOTTOM | edge::BOTTOM_LEFT | edge::BOTTOM_RIGHT => anchor.y,
            _ => anchor.y - h / 2,
        };
        Rectangle::new(x, y, w, h)
    }

    fn flip_anchor(anchor: u32, horizontal: bool) -> u32 {
        match (anchor, horizontal) {
            (edge::LEFT, true) => edge::RIGHT,
            (edge::RIGHT, true) => edge::LEFT,
            (edge::TOP_LEFT, true) => edge::TOP_RIGHT,
            (edge::TOP_RIGHT, true) => edge::TOP_LEFT,
            (edge::BOTTOM_LEFT, true) => edge::BOTTOM_RIGHT,
            (edge::BOTTOM_RIGHT, true) => edge::BOTTOM_LEFT,
            (edge::TOP, false) => edge::BOTTOM,
            (edge::BOTTOM, false) => edge::TOP,
            (edge::TOP_LEFT, false) => edge::BOTTOM_LEFT,
            (edge::BOTTOM_LEFT, false) => edge::TOP_LEFT,
            (edge::TOP_RIGHT, false) => edge::BOTTOM_RIGHT,
            (edge::BOTTOM_RIGHT, false) => edge::TOP_RIGHT,
            (a, _) => a,
        }
    }

    fn resolve(&self, anchor_rect: Rectangle<i32>) -> Rectangle<i32> {
        let mut rect = self.place(self.anchor_point(anchor_rect), self.gravity);
        rect.loc.x += self.offset.x;
        rect.loc.y += self.offset.y;
        rect
    }

    /// Resolves the popup rectangle in parent-local coordinates, applying
    /// flip then slide adjustments against `bounds` (the parent extent, when
    /// known). A flip that is still constrained reverts to the unflipped
    /// placement.
    pub fn solve(&self, bounds: Option<Rectangle<i32>>) -> Rectangle<i32> {
        let anchor_rect = self.anchor_rect.unwrap_or_default();
        let mut rect = self.resolve(anchor_rect);

        let Some(bounds) = bounds else {
            return rect;
        };

        if self.constraint_adjustment & constraint::FLIP_X != 0
            && (rect.loc.x < bounds.loc.x || rect.right() > bounds.right())
        {
            let flipped = Positioner {
                anchor: Self::flip_anchor(self.anchor, true),
                gravity: Self::flip_anchor(self.gravity, true),
                offset: Point {
                    x: -self.offset.x,
                    y: self.offset.y,
                },
                ..*self
            }
            .resolve(anchor_rect);
            if flipped.loc.x >= bounds.loc.x && flipped.right() <= bounds.right() {
                rect.loc.x = flipped.loc.x;
            }
        }
        if self.constraint_adjustment & constraint::FLIP_Y != 0
            && (rect.loc.y < bounds.loc.y || rect.bottom() > bounds.bottom())
        {
            let flipped = Positioner {
                anchor: Self::flip_anchor(self.anchor, false),
                gravity: Self::flip_anchor(self.gravity, false),
                offset: Point {
                    x: self.offset.x,
                    y: -self.offset.y,
                },
                ..*self
            }
            .resolve(anchor_rect);
            if flipped.loc.y >= bounds.loc.y && flipped.bottom() <= bounds.bottom() {
                rect.loc.y = flipped.loc.y;
            }
        }

        let slid = rect.slide_into(&bounds);
        if self.constraint_adjustment & constraint::SLIDE_X != 0 {
            rect.loc.x = slid.loc.x;
        }
        if self.constraint_adjustment & constraint::SLIDE_Y != 0 {
            rect.loc.y = slid.loc.y;
        }
        rect
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum XdgRole {
    Toplevel(ToplevelId),
    Popup(PopupId),
}

/// Pairs a wl_surface with its shell role and tracks the configure
/// handshake.
#[derive(Debug)]
pub struct XdgSurface {
    pub client: ClientId,
    pub id: ObjectId,
    pub surface: SurfaceId,
    pub role: Option<XdgRole>,
    pub last_sent_serial: u32,
    /// Serials sent and not yet acked, oldest first.
    pub outstanding: VecDeque<u32>,
    pub last_acked: Option<u32>,
    pub configured: bool,
    pub window_geometry: Option<Rectangle<i32>>,
    /// When the oldest outstanding configure was sent, for the watchdog.
    pub oldest_unacked_at: Option<Instant>,
}

impl XdgSurface {
    fn new(client: ClientId, id: ObjectId, surface: SurfaceId) -> Self {
        Self {
            client,
            id,
            surface,
            role: None,
            last_sent_serial: 0,
            outstanding: VecDeque::new(),
            last_acked: None,
            configured: false,
            window_geometry: None,
            oldest_unacked_at: None,
        }
    }
}

#[derive(Debug)]
pub struct Toplevel {
    pub client: ClientId,
    pub id: ObjectId,
    pub xdg_surface: XdgSurfaceId,
    pub surface: SurfaceId,
    pub version: u32,
    pub title: Option<String>,
    pub app_id: Option<String>,
    pub states: WindowStates,
    pub min_size: Size<i32>,
    pub max_size: Size<i32>,
    /// Last size we proposed; (0,0) means the client chooses.
    pub size: Size<i32>,
    pub decoration: Option<ObjectId>,
    pub decoration_mode: DecorationMode,
    pub has_native_window: bool,
}

#[derive(Debug)]
pub struct Popup {
    pub client: ClientId,
    pub id: ObjectId,
    pub xdg_surface: XdgSurfaceId,
    pub surface: SurfaceId,
    pub parent: XdgSurfaceId,
    pub positioner: Positioner,
    pub position: Rectangle<i32>,
    pub grabbed: bool,
}

/// xdg_wm_base requests.
pub fn wm_base_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        xdg_wm_base::DESTROY => {
            let defunct = state
                .xdg_surfaces
                .values()
                .any(|x| x.client == client_id);
            if defunct {
                return Err(ProtocolError::new(
                    resource.id,
                    WmBaseError::DefunctSurfaces,
                    "xdg_wm_base destroyed with xdg_surfaces alive",
                ));
            }
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        xdg_wm_base::CREATE_POSITIONER => {
            let id = args.new_id()?;
            let key = PositionerId(state.ids.next());
            state.positioners.insert(key, Positioner::default());
            state.client_mut(client_id)?.create(
                id,
                Interface::XdgPositioner,
                resource.version,
                ResourceKind::Positioner(key),
            )
        },
        xdg_wm_base::GET_XDG_SURFACE => {
            let id = args.new_id()?;
            let surface = args.object()?;
            get_xdg_surface(state, client_id, resource, id, surface)
        },
        xdg_wm_base::PONG => {
            let serial = args.uint()?;
            if state.pings.remove(&client_id).is_none() {
                trace!("{client_id}: pong {serial} with no outstanding ping");
            }
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("xdg_wm_base opcode {opcode}"),
        )),
    }
}

fn get_xdg_surface(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    id: ObjectId,
    surface: ObjectId,
) -> Result<(), ProtocolError> {
    let surface_res = state.client_mut(client_id)?.resource(surface)?;
    let Some(&surface_key) = surface_res.kind.as_surface() else {
        return Err(ProtocolError::invalid_object(surface));
    };
    {
        let target = state
            .surfaces
            .get_mut(&surface_key)
            .ok_or_else(|| ProtocolError::invalid_object(surface))?;
        if target.xdg.is_some() || target.role.is_some() {
            return Err(ProtocolError::new(
                resource.id,
                WmBaseError::Role,
                "surface already has a shell role",
            ));
        }
        if target.applied.buffer.is_some() || target.pending.buffer.is_some() {
            return Err(ProtocolError::new(
                resource.id,
                WmBaseError::InvalidSurfaceState,
                "surface already has a buffer at get_xdg_surface time",
            ));
        }
    }
    let key = XdgSurfaceId(state.ids.next());
    state.client_mut(client_id)?.create(
        id,
        Interface::XdgSurface,
        resource.version,
        ResourceKind::XdgSurface(key),
    )?;
    state
        .xdg_surfaces
        .insert(key, XdgSurface::new(client_id, id, surface_key));
    if let Some(surface) = state.surfaces.get_mut(&surface_key) {
        surface.xdg = Some(key);
    }
    Ok(())
}

/// xdg_positioner requests.
pub fn positioner_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: PositionerId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    let invalid = |message: &str| -> ProtocolError {
        ProtocolError::new(resource.id, PositionerError::InvalidInput, message)
    };
    match opcode {
        xdg_positioner::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            return Ok(());
        },
        _ => {},
    }
    let Some(positioner) = state.positioners.get_mut(&key) else {
        return Err(ProtocolError::invalid_object(resource.id));
    };
    match opcode {
        xdg_positioner::SET_SIZE => {
            let w = args.int()?;
            let h = args.int()?;
            if w <= 0 || h <= 0 {
                return Err(invalid("positioner size must be positive"));
            }
            positioner.size = Size { w, h };
        },
        xdg_positioner::SET_ANCHOR_RECT => {
            let x = args.int()?;
            let y = args.int()?;
            let w = args.int()?;
            let h = args.int()?;
            if w < 0 || h < 0 {
                return Err(invalid("anchor rect size must be non-negative"));
            }
            positioner.anchor_rect = Some(Rectangle::new(x, y, w, h));
        },
        xdg_positioner::SET_ANCHOR => {
            positioner.anchor = args.uint()?;
        },
        xdg_positioner::SET_GRAVITY => {
            positioner.gravity = args.uint()?;
        },
        xdg_positioner::SET_CONSTRAINT_ADJUSTMENT => {
            positioner.constraint_adjustment = args.uint()?;
        },
        xdg_positioner::SET_OFFSET => {
            let x = args.int()?;
            let y = args.int()?;
            positioner.offset = Point { x, y };
        },
        xdg_positioner::SET_REACTIVE => {
            positioner.reactive = true;
        },
        xdg_positioner::SET_PARENT_SIZE => {
            let w = args.int()?;
            let h = args.int()?;
            positioner.parent_size = Some(Size { w, h });
        },
        xdg_positioner::SET_PARENT_CONFIGURE => {
            positioner.parent_configure = Some(args.uint()?);
        },
        _ => {
            return Err(ProtocolError::invalid_method(
                resource.id,
                format!("xdg_positioner opcode {opcode}"),
            ));
        },
    }
    Ok(())
}

/// xdg_surface requests.
pub fn xdg_surface_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: XdgSurfaceId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        xdg_surface::DESTROY => {
            let has_role = state
                .xdg_surfaces
                .get(&key)
                .is_some_and(|x| x.role.is_some());
            if has_role {
                return Err(ProtocolError::new(
                    resource.id,
                    XdgSurfaceError::DefunctRoleObject,
                    "xdg_surface destroyed before its role object",
                ));
            }
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        xdg_surface::GET_TOPLEVEL => {
            let id = args.new_id()?;
            get_toplevel(state, client_id, resource, key, id)
        },
        xdg_surface::GET_POPUP => {
            let id = args.new_id()?;
            let parent = args.object()?;
            let positioner = args.object()?;
            get_popup(state, client_id, resource, key, id, parent, positioner)
        },
        xdg_surface::SET_WINDOW_GEOMETRY => {
            let x = args.int()?;
            let y = args.int()?;
            let w = args.int()?;
            let h = args.int()?;
            if w <= 0 || h <= 0 {
                return Err(ProtocolError::new(
                    resource.id,
                    XdgSurfaceError::InvalidSize,
                    format!("window geometry {w}x{h} must be positive"),
                ));
            }
            if let Some(xdg) = state.xdg_surfaces.get_mut(&key) {
                xdg.window_geometry = Some(Rectangle::new(x, y, w, h));
            }
            Ok(())
        },
        xdg_surface::ACK_CONFIGURE => {
            let serial = args.uint()?;
            ack_configure(state, resource, key, serial)
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("xdg_surface opcode {opcode}"),
        )),
    }
}

fn ack_configure(
    state: &mut WayhostState,
    resource: Resource,
    key: XdgSurfaceId,
    serial: u32,
) -> Result<(), ProtocolError> {
    let Some(xdg) = state.xdg_surfaces.get_mut(&key) else {
        return Ok(());
    };
    // A repeat of the last acked serial is a no-op, not an error.
    if xdg.last_acked == Some(serial) {
        return Ok(());
    }
    if !xdg.outstanding.contains(&serial) {
        return Err(ProtocolError::new(
            resource.id,
            XdgSurfaceError::InvalidSerial,
            format!("ack of serial {serial} which was never sent"),
        ));
    }
    while let Some(front) = xdg.outstanding.front().copied() {
        xdg.outstanding.pop_front();
        if front == serial {
            break;
        }
    }
    xdg.last_acked = Some(serial);
    xdg.configured = true;
    xdg.oldest_unacked_at = if xdg.outstanding.is_empty() {
        None
    } else {
        xdg.oldest_unacked_at
    };
    Ok(())
}

/// Sends `xdg_surface.configure` with a fresh serial. Every role-level
/// configure ends by calling this.
pub fn send_xdg_configure(state: &mut WayhostState, key: XdgSurfaceId) {
    let Some(xdg) = state.xdg_surfaces.get_mut(&key) else {
        return;
    };
    xdg.last_sent_serial = xdg.last_sent_serial.wrapping_add(1);
    let serial = xdg.last_sent_serial;
    xdg.outstanding.push_back(serial);
    if xdg.oldest_unacked_at.is_none() {
        xdg.oldest_unacked_at = Some(Instant::now());
    }
    let (client_id, object) = (xdg.client, xdg.id);
    if let Some(client) = state.clients.get_mut(&client_id) {
        client.send(
            MessageBuilder::new(object, xdg_surface::EV_CONFIGURE)
                .uint(serial)
                .build(),
        );
    }
}

fn get_toplevel(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: XdgSurfaceId,
    id: ObjectId,
) -> Result<(), ProtocolError> {
    let surface_key = {
        let Some(xdg) = state.xdg_surfaces.get(&key) else {
            return Err(ProtocolError::invalid_object(resource.id));
        };
        if xdg.role.is_some() {
            return Err(ProtocolError::new(
                resource.id,
                WmBaseError::Role,
                "xdg_surface already has a role",
            ));
        }
        xdg.surface
    };

    let toplevel_id = ToplevelId(state.ids.next());
    state.client_mut(client_id)?.create(
        id,
        Interface::XdgToplevel,
        resource.version,
        ResourceKind::Toplevel(toplevel_id),
    )?;
    {
        let surface = state
            .surfaces
            .get_mut(&surface_key)
            .ok_or_else(|| ProtocolError::invalid_object(resource.id))?;
        surface.set_role(Role::Toplevel(toplevel_id), resource.id)?;
    }

    let force_ssd = state.config.force_server_side_decorations;
    let decoration_mode = if force_ssd {
        DecorationMode::Server
    } else {
        DecorationMode::Client
    };
    // CSD clients pick their own size; for forced SSD we suggest one so the
    // host window has a sane initial extent.
    let initial_size = if force_ssd {
        Size { w: 1024, h: 768 }
    } else {
        Size { w: 0, h: 0 }
    };
    let states = WindowStates {
        activated: true,
        ..WindowStates::default()
    };

    state.toplevels.insert(
        toplevel_id,
        Toplevel {
            client: client_id,
            id,
            xdg_surface: key,
            surface: surface_key,
            version: resource.version,
            title: None,
            app_id: None,
            states,
            min_size: Size::default(),
            max_size: Size::default(),
            size: initial_size,
            decoration: None,
            decoration_mode,
            has_native_window: false,
        },
    );
    if let Some(xdg) = state.xdg_surfaces.get_mut(&key) {
        xdg.role = Some(XdgRole::Toplevel(toplevel_id));
    }

    // Initial handshake: bounds (v4+), role configure, then the serial the
    // client must ack before attaching its first buffer.
    if resource.version >= xdg_toplevel::CONFIGURE_BOUNDS_SINCE_VERSION {
        let client = state.client_mut(client_id)?;
        client.send(
            MessageBuilder::new(id, xdg_toplevel::EV_CONFIGURE_BOUNDS)
                .int(0)
                .int(0)
                .build(),
        );
    }
    send_toplevel_configure(state, toplevel_id);
    Ok(())
}

/// Emits `toplevel.configure(size, states)` + `xdg_surface.configure`.
pub fn send_toplevel_configure(state: &mut WayhostState, toplevel_id: ToplevelId) {
    let Some(toplevel) = state.toplevels.get(&toplevel_id) else {
        return;
    };
    let (client_id, object, xdg_key) = (toplevel.client, toplevel.id, toplevel.xdg_surface);
    let size = toplevel.size;
    let states = toplevel.states.to_wire();
    if let Some(client) = state.clients.get_mut(&client_id) {
        client.send(
            MessageBuilder::new(object, xdg_toplevel::EV_CONFIGURE)
                .int(size.w)
                .int(size.h)
                .array(&states)
                .build(),
        );
    }
    send_xdg_configure(state, xdg_key);
}

/// xdg_toplevel requests.
pub fn toplevel_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    toplevel_id: ToplevelId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        xdg_toplevel::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        xdg_toplevel::SET_PARENT => {
            let _parent = args.object()?;
            Ok(())
        },
        xdg_toplevel::SET_TITLE => {
            let title = args.string()?;
            if let Some(toplevel) = state.toplevels.get_mut(&toplevel_id) {
                toplevel.title = Some(title.clone());
                if toplevel.has_native_window {
                    state.platform.set_title(toplevel_id, &title);
                }
            }
            Ok(())
        },
        xdg_toplevel::SET_APP_ID => {
            let app_id = args.string()?;
            if let Some(toplevel) = state.toplevels.get_mut(&toplevel_id) {
                toplevel.app_id = Some(app_id);
            }
            Ok(())
        },
        xdg_toplevel::SHOW_WINDOW_MENU => {
            let _seat = args.object()?;
            let serial = args.uint()?;
            let _x = args.int()?;
            let _y = args.int()?;
            if !state.seat.serial_is_recent(serial) {
                debug!("show_window_menu with stale serial {serial}, ignoring");
            }
            Ok(())
        },
        xdg_toplevel::MOVE => {
            let _seat = args.object()?;
            let serial = args.uint()?;
            if state.seat.serial_is_recent(serial) {
                debug!("interactive move for toplevel {toplevel_id:?} handed to the host");
            } else {
                debug!("move with stale serial {serial}, ignoring");
            }
            Ok(())
        },
        xdg_toplevel::RESIZE => {
            let _seat = args.object()?;
            let serial = args.uint()?;
            let _edges = args.uint()?;
            if state.seat.serial_is_recent(serial) {
                set_window_state(state, toplevel_id, |s| s.resizing = true, None);
            } else {
                debug!("resize with stale serial {serial}, ignoring");
            }
            Ok(())
        },
        xdg_toplevel::SET_MAX_SIZE | xdg_toplevel::SET_MIN_SIZE => {
            let w = args.int()?;
            let h = args.int()?;
            if w < 0 || h < 0 {
                return Err(ProtocolError::new(
                    resource.id,
                    crate::protocol::ToplevelError::InvalidSize,
                    format!("negative size bound {w}x{h}"),
                ));
            }
            if let Some(toplevel) = state.toplevels.get_mut(&toplevel_id) {
                if opcode == xdg_toplevel::SET_MAX_SIZE {
                    toplevel.max_size = Size { w, h };
                } else {
                    toplevel.min_size = Size { w, h };
                }
            }
            Ok(())
        },
        xdg_toplevel::SET_MAXIMIZED => {
            let size = state.output_workarea_size();
            set_window_state(state, toplevel_id, |s| s.maximized = true, Some(size));
            Ok(())
        },
        xdg_toplevel::UNSET_MAXIMIZED => {
            set_window_state(
                state,
                toplevel_id,
                |s| s.maximized = false,
                Some(Size::default()),
            );
            Ok(())
        },
        xdg_toplevel::SET_FULLSCREEN => {
            let _output = args.object()?;
            let size = state.output_workarea_size();
            set_window_state(state, toplevel_id, |s| s.fullscreen = true, Some(size));
            Ok(())
        },
        xdg_toplevel::UNSET_FULLSCREEN => {
            set_window_state(
                state,
                toplevel_id,
                |s| s.fullscreen = false,
                Some(Size::default()),
            );
            Ok(())
        },
        xdg_toplevel::SET_MINIMIZED => {
            debug!("minimize for toplevel {toplevel_id:?} handed to the host");
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("xdg_toplevel opcode {opcode}"),
        )),
    }
}

/// Applies a window-state mutation and emits the configure pair.
fn set_window_state(
    state: &mut WayhostState,
    toplevel_id: ToplevelId,
    mutate: impl FnOnce(&mut WindowStates),
    size: Option<Size<i32>>,
) {
    {
        let Some(toplevel) = state.toplevels.get_mut(&toplevel_id) else {
            return;
        };
        mutate(&mut toplevel.states);
        if let Some(size) = size {
            toplevel.size = size;
        }
    }
    send_toplevel_configure(state, toplevel_id);
}

fn get_popup(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: XdgSurfaceId,
    id: ObjectId,
    parent: ObjectId,
    positioner: ObjectId,
) -> Result<(), ProtocolError> {
    let surface_key = {
        let Some(xdg) = state.xdg_surfaces.get(&key) else {
            return Err(ProtocolError::invalid_object(resource.id));
        };
        if xdg.role.is_some() {
            return Err(ProtocolError::new(
                resource.id,
                WmBaseError::Role,
                "xdg_surface already has a role",
            ));
        }
        xdg.surface
    };

    if parent.is_null() {
        return Err(ProtocolError::new(
            resource.id,
            WmBaseError::InvalidPopupParent,
            "popup without a parent",
        ));
    }
    let parent_res = state.client_mut(client_id)?.resource(parent)?;
    let Some(&parent_key) = parent_res.kind.as_xdg_surface() else {
        return Err(ProtocolError::new(
            resource.id,
            WmBaseError::InvalidPopupParent,
            "popup parent is not an xdg_surface",
        ));
    };

    let positioner_res = state.client_mut(client_id)?.resource(positioner)?;
    let Some(&positioner_key) = positioner_res.kind.as_positioner() else {
        return Err(ProtocolError::invalid_object(positioner));
    };
    let positioner = state
        .positioners
        .get(&positioner_key)
        .copied()
        .ok_or_else(|| ProtocolError::invalid_object(positioner))?;
    if !positioner.is_complete() {
        return Err(ProtocolError::new(
            resource.id,
            WmBaseError::InvalidPositioner,
            "positioner lacks a size or anchor rect",
        ));
    }

    // Constrain against the parent's window geometry when it has one.
    let bounds = state
        .xdg_surfaces
        .get(&parent_key)
        .and_then(|p| p.window_geometry)
        .or_else(|| {
            positioner
                .parent_size
                .map(|s| Rectangle::new(0, 0, s.w, s.h))
        });
    let position = positioner.solve(bounds);

    let popup_id = PopupId(state.ids.next());
    state.client_mut(client_id)?.create(
        id,
        Interface::XdgPopup,
        resource.version,
        ResourceKind::Popup(popup_id),
    )?;
    {
        let surface = state
            .surfaces
            .get_mut(&surface_key)
            .ok_or_else(|| ProtocolError::invalid_object(resource.id))?;
        surface.set_role(Role::Popup(popup_id), resource.id)?;
    }
    state.popups.insert(
        popup_id,
        Popup {
            client: client_id,
            id,
            xdg_surface: key,
            surface: surface_key,
            parent: parent_key,
            positioner,
            position,
            grabbed: false,
        },
    );
    if let Some(xdg) = state.xdg_surfaces.get_mut(&key) {
        xdg.role = Some(XdgRole::Popup(popup_id));
    }

    if let Some(client) = state.clients.get_mut(&client_id) {
        client.send(
            MessageBuilder::new(id, xdg_popup::EV_CONFIGURE)
                .int(position.loc.x)
                .int(position.loc.y)
                .int(position.size.w)
                .int(position.size.h)
                .build(),
        );
    }
    send_xdg_configure(state, key);
    Ok(())
}

/// xdg_popup requests.
pub fn popup_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    popup_id: PopupId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        xdg_popup::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        xdg_popup::GRAB => {
            let _seat = args.object()?;
            let serial = args.uint()?;
            if !state.seat.serial_is_recent(serial) {
                // A grab without a valid recent input serial must dismiss.
                dismiss_popup(state, popup_id);
                return Ok(());
            }
            if let Some(popup) = state.popups.get_mut(&popup_id) {
                popup.grabbed = true;
            }
            Ok(())
        },
        xdg_popup::REPOSITION => {
            let positioner = args.object()?;
            let token = args.uint()?;
            let positioner_res = state.client_mut(client_id)?.resource(positioner)?;
            let Some(&positioner_key) = positioner_res.kind.as_positioner() else {
                return Err(ProtocolError::invalid_object(positioner));
            };
            let Some(positioner) = state.positioners.get(&positioner_key).copied() else {
                return Err(ProtocolError::invalid_object(positioner));
            };
            let (parent_key, xdg_key) = match state.popups.get(&popup_id) {
                Some(p) => (p.parent, p.xdg_surface),
                None => return Ok(()),
            };
            let bounds = state
                .xdg_surfaces
                .get(&parent_key)
                .and_then(|p| p.window_geometry);
            let position = positioner.solve(bounds);
            if let Some(popup) = state.popups.get_mut(&popup_id) {
                popup.positioner = positioner;
                popup.position = position;
            }
            if let Some(client) = state.clients.get_mut(&client_id) {
                client.send(
                    MessageBuilder::new(resource.id, xdg_popup::EV_REPOSITIONED)
                        .uint(token)
                        .build(),
                );
                client.send(
                    MessageBuilder::new(resource.id, xdg_popup::EV_CONFIGURE)
                        .int(position.loc.x)
                        .int(position.loc.y)
                        .int(position.size.w)
                        .int(position.size.h)
                        .build(),
                );
            }
            send_xdg_configure(state, xdg_key);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("xdg_popup opcode {opcode}"),
        )),
    }
}

/// Tells the client to tear the popup down.
pub fn dismiss_popup(state: &mut WayhostState, popup_id: PopupId) {
    let Some(popup) = state.popups.get(&popup_id) else {
        return;
    };
    let (client_id, object) = (popup.client, popup.id);
    if let Some(client) = state.clients.get_mut(&client_id) {
        client.send(MessageBuilder::new(object, xdg_popup::EV_POPUP_DONE).build());
    }
}

/// Server-initiated close (host close button, shutdown).
pub fn request_close(state: &mut WayhostState, toplevel_id: ToplevelId) {
    let Some(toplevel) = state.toplevels.get(&toplevel_id) else {
        return;
    };
    let (client_id, object) = (toplevel.client, toplevel.id);
    if let Some(client) = state.clients.get_mut(&client_id) {
        client.send(MessageBuilder::new(object, xdg_toplevel::EV_CLOSE).build());
    }
}

/// Host reports the native window was resized; propose the new size.
pub fn host_resized(state: &mut WayhostState, toplevel_id: ToplevelId, size: Size<i32>) {
    {
        let Some(toplevel) = state.toplevels.get_mut(&toplevel_id) else {
            return;
        };
        toplevel.size = size;
    }
    send_toplevel_configure(state, toplevel_id);
}

/// Host focus moved between native windows.
pub fn host_focus_changed(state: &mut WayhostState, focused: Option<ToplevelId>) {
    let previously: Vec<ToplevelId> = state
        .toplevels
        .iter()
        .filter(|(id, t)| t.states.activated && Some(**id) != focused)
        .map(|(id, _)| *id)
        .collect();
    for id in previously {
        set_window_state(state, id, |s| s.activated = false, None);
    }
    let focus_surface = focused.and_then(|id| {
        let toplevel = state.toplevels.get_mut(&id)?;
        toplevel.states.activated = true;
        Some((id, toplevel.surface))
    });
    if let Some((id, surface)) = focus_surface {
        send_toplevel_configure(state, id);
        crate::seat::set_keyboard_focus(state, Some(surface));
    } else {
        crate::seat::set_keyboard_focus(state, None);
    }
}

/// Commit-time validation for shell surfaces.
pub fn precommit_checks(
    state: &WayhostState,
    object: ObjectId,
    surface: &Surface,
) -> Result<(), ProtocolError> {
    let Some(xdg_key) = surface.xdg else {
        return Ok(());
    };
    let attaching = matches!(
        surface.pending.buffer,
        Some(crate::surface::BufferAssignment::Attach(_))
    );
    if !attaching {
        return Ok(());
    }
    let Some(xdg) = state.xdg_surfaces.get(&xdg_key) else {
        return Ok(());
    };
    if xdg.role.is_none() {
        return Err(ProtocolError::new(
            xdg.id,
            XdgSurfaceError::NotConstructed,
            "buffer attached to an xdg_surface with no role",
        ));
    }
    if !xdg.configured {
        return Err(ProtocolError::new(
            xdg.id,
            XdgSurfaceError::UnconfiguredBuffer,
            "buffer attached before the initial configure was acked",
        ));
    }
    Ok(())
}

/// Post-commit hook: maps/unmaps native windows and keeps host-side size in
/// sync with the applied state.
pub fn surface_committed(
    state: &mut WayhostState,
    _client_id: ClientId,
    key: SurfaceId,
) -> Result<(), ProtocolError> {
    let (toplevel_id, mapped, size) = {
        let Some(surface) = state.surfaces.get(&key) else {
            return Ok(());
        };
        let Some(Role::Toplevel(toplevel_id)) = surface.role else {
            return Ok(());
        };
        let size = surface
            .xdg
            .and_then(|xdg| state.xdg_surfaces.get(&xdg))
            .and_then(|x| x.window_geometry)
            .map(|g| g.size)
            .unwrap_or(surface.applied.size);
        (toplevel_id, surface.applied.buffer.is_some(), size)
    };

    enum HostAction {
        Map { ssd: bool, title: Option<String> },
        Resize,
        Nothing,
    }
    let action = {
        let Some(toplevel) = state.toplevels.get_mut(&toplevel_id) else {
            return Ok(());
        };
        if mapped && !toplevel.has_native_window {
            toplevel.has_native_window = true;
            toplevel.size = size;
            HostAction::Map {
                ssd: toplevel.decoration_mode == DecorationMode::Server,
                title: toplevel.title.clone(),
            }
        } else if mapped && toplevel.has_native_window && toplevel.size != size && size.w > 0 {
            toplevel.size = size;
            HostAction::Resize
        } else {
            HostAction::Nothing
        }
    };
    match action {
        HostAction::Map { ssd, title } => {
            state
                .platform
                .create_native_window(toplevel_id, size.w, size.h, ssd);
            if let Some(title) = title {
                state.platform.set_title(toplevel_id, &title);
            }
            crate::output::send_surface_enter(state, key);
            crate::seat::set_keyboard_focus(state, Some(key));
        },
        HostAction::Resize => {
            state.platform.set_size(toplevel_id, size.w, size.h);
        },
        HostAction::Nothing => {},
    }
    Ok(())
}

/// The wl_surface underneath a shell surface died.
pub fn surface_gone(state: &mut WayhostState, key: SurfaceId) {
    let toplevels: Vec<ToplevelId> = state
        .toplevels
        .iter()
        .filter(|(_, t)| t.surface == key)
        .map(|(id, _)| *id)
        .collect();
    for toplevel_id in toplevels {
        if let Some(toplevel) = state.toplevels.get_mut(&toplevel_id)
            && toplevel.has_native_window
        {
            toplevel.has_native_window = false;
            state.platform.destroy_native_window(toplevel_id);
        }
    }
}

/// Domain cleanup for xdg_surface resources.
pub fn xdg_surface_destroyed(state: &mut WayhostState, key: XdgSurfaceId) {
    if let Some(xdg) = state.xdg_surfaces.remove(&key)
        && let Some(surface) = state.surfaces.get_mut(&xdg.surface)
    {
        surface.xdg = None;
    }
}

/// Domain cleanup for toplevel resources.
pub fn toplevel_destroyed(state: &mut WayhostState, toplevel_id: ToplevelId) {
    let Some(toplevel) = state.toplevels.remove(&toplevel_id) else {
        return;
    };
    if toplevel.has_native_window {
        state.platform.destroy_native_window(toplevel_id);
    }
    if let Some(surface) = state.surfaces.get_mut(&toplevel.surface) {
        surface.role = None;
        surface.mapped = false;
    }
    if let Some(xdg) = state.xdg_surfaces.get_mut(&toplevel.xdg_surface) {
        xdg.role = None;
        xdg.configured = false;
    }
    // Decoration objects outlive their toplevel only as inert husks.
    crate::decoration::toplevel_gone(state, toplevel_id);
    crate::seat::focus_surface_gone(state, toplevel.surface);
}

/// Domain cleanup for popup resources.
pub fn popup_destroyed(state: &mut WayhostState, popup_id: PopupId) {
    let Some(popup) = state.popups.remove(&popup_id) else {
        return;
    };
    if let Some(surface) = state.surfaces.get_mut(&popup.surface) {
        surface.role = None;
    }
    if let Some(xdg) = state.xdg_surfaces.get_mut(&popup.xdg_surface) {
        xdg.role = None;
        xdg.configured = false;
    }
}

/// Domain cleanup for positioner resources.
pub fn positioner_destroyed(state: &mut WayhostState, key: PositionerId) {
    state.positioners.remove(&key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn window_states_wire_encoding() {
        let states = WindowStates {
            activated: true,
            maximized: true,
            ..WindowStates::default()
        };
        let wire = states.to_wire();
        assert_eq!(wire.len(), 8);
        let first = u32::from_ne_bytes(wire[0..4].try_into().unwrap());
        let second = u32::from_ne_bytes(wire[4..8].try_into().unwrap());
        assert_eq!(first, state_value::MAXIMIZED);
        assert_eq!(second, state_value::ACTIVATED);
    }

    #[test]
    fn empty_states_encode_to_empty_array() {
        assert!(WindowStates::default().to_wire().is_empty());
    }

    fn base_positioner() -> Positioner {
        Positioner {
            size: Size { w: 100, h: 50 },
            anchor_rect: Some(Rectangle::new(10, 10, 20, 20)),
            ..Positioner::default()
        }
    }

    #[test]
    fn positioner_incomplete_without_anchor_rect() {
        let positioner = Positioner {
            size: Size { w: 10, h: 10 },
            ..Positioner::default()
        };
        assert!(!positioner.is_complete());
        assert!(base_positioner().is_complete());
    }

    #[test]
    fn positioner_bottom_right_extends_down_right() {
        let positioner = Positioner {
            anchor: edge::BOTTOM_RIGHT,
            gravity: edge::BOTTOM_RIGHT,
            ..base_positioner()
        };
        let rect = positioner.solve(None);
        assert_eq!(rect, Rectangle::new(30, 30, 100, 50));
    }

    #[test]
    fn positioner_top_left_extends_up_left() {
        let positioner = Positioner {
            anchor: edge::TOP_LEFT,
            gravity: edge::TOP_LEFT,
            ..base_positioner()
        };
        let rect = positioner.solve(None);
        assert_eq!(rect, Rectangle::new(-90, -40, 100, 50));
    }

    #[test]
    fn positioner_offset_applies() {
        let positioner = Positioner {
            anchor: edge::BOTTOM_RIGHT,
            gravity: edge::BOTTOM_RIGHT,
            offset: Point { x: 5, y: -3 },
            ..base_positioner()
        };
        let rect = positioner.solve(None);
        assert_eq!(rect.loc, Point { x: 35, y: 27 });
    }

    #[test]
    fn positioner_slides_into_bounds() {
        let positioner = Positioner {
            anchor: edge::BOTTOM_RIGHT,
            gravity: edge::BOTTOM_RIGHT,
            constraint_adjustment: constraint::SLIDE_X | constraint::SLIDE_Y,
            ..base_positioner()
        };
        let rect = positioner.solve(Some(Rectangle::new(0, 0, 100, 60)));
        assert_eq!(rect, Rectangle::new(0, 10, 100, 50));
    }

    #[test]
    fn positioner_flip_y_inverts_direction() {
        // Anchored at the bottom and growing down past the parent's bottom
        // edge: flipping re-anchors at the top and grows up.
        let positioner = Positioner {
            size: Size { w: 10, h: 30 },
            anchor_rect: Some(Rectangle::new(0, 20, 10, 10)),
            anchor: edge::BOTTOM,
            gravity: edge::BOTTOM,
            constraint_adjustment: constraint::FLIP_Y,
            ..Positioner::default()
        };
        let rect = positioner.solve(Some(Rectangle::new(0, -20, 100, 50)));
        assert_eq!(rect.loc.y, -10);
    }

    #[test]
    fn positioner_flip_reverts_when_still_constrained() {
        let positioner = Positioner {
            size: Size { w: 10, h: 30 },
            anchor_rect: Some(Rectangle::new(0, 20, 10, 10)),
            anchor: edge::BOTTOM,
            gravity: edge::BOTTOM,
            constraint_adjustment: constraint::FLIP_Y,
            ..Positioner::default()
        };
        // Bounds too small in both directions: the original placement wins.
        let rect = positioner.solve(Some(Rectangle::new(0, 0, 100, 40)));
        assert_eq!(rect.loc.y, 30);
    }
}
