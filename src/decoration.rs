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

//! Decoration-mode negotiation (zxdg_decoration_manager_v1).
//!
//! Policy: with `force_server_side_decorations` on, the server always
//! configures SSD regardless of what the client asks for; otherwise the
//! client's request is honored, and a client that never asks gets CSD. Every
//! mode decision is a `decoration.configure(mode)` followed by a fresh
//! `xdg_surface.configure` so the client can ack the pair atomically.

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

use crate::prelude::*;
use crate::protocol::DecorationError;
use crate::protocol::Interface;
use crate::protocol::ProtocolError;
use crate::protocol::interfaces::zxdg_decoration_manager_v1;
use crate::protocol::interfaces::zxdg_toplevel_decoration_v1;
use crate::protocol::wire::ArgReader;
use crate::protocol::wire::MessageBuilder;
use crate::server::WayhostState;
use crate::server::client::ClientId;
use crate::server::client::Resource;
use crate::server::client::ResourceKind;
use crate::xdg_shell::ToplevelId;

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum DecorationMode {
    Client = 1,
    Server = 2,
}

/// zxdg_decoration_manager_v1 requests.
pub fn manager_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        zxdg_decoration_manager_v1::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        zxdg_decoration_manager_v1::GET_TOPLEVEL_DECORATION => {
            let id = args.new_id()?;
            let toplevel = args.object()?;
            let toplevel_res = state.client_mut(client_id)?.resource(toplevel)?;
            let Some(&toplevel_id) = toplevel_res.kind.as_toplevel() else {
                return Err(ProtocolError::invalid_object(toplevel));
            };
            {
                let Some(toplevel) = state.toplevels.get_mut(&toplevel_id) else {
                    return Err(ProtocolError::invalid_object(toplevel));
                };
                if toplevel.decoration.is_some() {
                    return Err(ProtocolError::new(
                        resource.id,
                        DecorationError::AlreadyConstructed,
                        "toplevel already has a decoration object",
                    ));
                }
                toplevel.decoration = Some(id);
            }
            state.client_mut(client_id)?.create(
                id,
                Interface::ZxdgToplevelDecorationV1,
                resource.version,
                ResourceKind::Decoration(toplevel_id),
            )?;
            // Tell the client where negotiation starts from.
            let mode = state
                .toplevels
                .get(&toplevel_id)
                .map(|t| t.decoration_mode)
                .unwrap_or(DecorationMode::Client);
            configure(state, toplevel_id, mode);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("zxdg_decoration_manager_v1 opcode {opcode}"),
        )),
    }
}

/// zxdg_toplevel_decoration_v1 requests.
pub fn decoration_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    toplevel_id: ToplevelId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        zxdg_toplevel_decoration_v1::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        zxdg_toplevel_decoration_v1::SET_MODE => {
            let raw = args.uint()?;
            let requested = DecorationMode::try_from(raw).map_err(|_| {
                ProtocolError::invalid_method(resource.id, format!("decoration mode {raw}"))
            })?;
            if state.toplevels.get(&toplevel_id).is_none() {
                return Err(ProtocolError::new(
                    resource.id,
                    DecorationError::Orphaned,
                    "decoration object outlived its toplevel",
                ));
            }
            let mode = if state.config.force_server_side_decorations {
                DecorationMode::Server
            } else {
                requested
            };
            debug!("{client_id}: decoration request {requested:?}, configuring {mode:?}");
            apply_mode(state, toplevel_id, mode);
            Ok(())
        },
        zxdg_toplevel_decoration_v1::UNSET_MODE => {
            if state.toplevels.get(&toplevel_id).is_none() {
                return Err(ProtocolError::new(
                    resource.id,
                    DecorationError::Orphaned,
                    "decoration object outlived its toplevel",
                ));
            }
            // Compositor preference: forced SSD, otherwise CSD.
            let mode = if state.config.force_server_side_decorations {
                DecorationMode::Server
            } else {
                DecorationMode::Client
            };
            apply_mode(state, toplevel_id, mode);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("zxdg_toplevel_decoration_v1 opcode {opcode}"),
        )),
    }
}

fn apply_mode(state: &mut WayhostState, toplevel_id: ToplevelId, mode: DecorationMode) {
    if let Some(toplevel) = state.toplevels.get_mut(&toplevel_id) {
        toplevel.decoration_mode = mode;
    }
    configure(state, toplevel_id, mode);
}

/// `decoration.configure(mode)` followed by `xdg_surface.configure`.
fn configure(state: &mut WayhostState, toplevel_id: ToplevelId, mode: DecorationMode) {
    let Some(toplevel) = state.toplevels.get(&toplevel_id) else {
        return;
    };
    let Some(decoration) = toplevel.decoration else {
        return;
    };
    let (client_id, xdg_key) = (toplevel.client, toplevel.xdg_surface);
    if let Some(client) = state.clients.get_mut(&client_id) {
        client.send(
            MessageBuilder::new(decoration, zxdg_toplevel_decoration_v1::EV_CONFIGURE)
                .uint(mode.into())
                .build(),
        );
    }
    crate::xdg_shell::send_xdg_configure(state, xdg_key);
}

/// The toplevel under a decoration object died; the object stays bound but
/// inert, and later requests on it raise `orphaned`.
pub fn toplevel_gone(_state: &mut WayhostState, _toplevel_id: ToplevelId) {}

/// Domain cleanup when the decoration object itself dies.
pub fn decoration_destroyed(state: &mut WayhostState, toplevel_id: ToplevelId) {
    if let Some(toplevel) = state.toplevels.get_mut(&toplevel_id) {
        toplevel.decoration = None;
    }
}
