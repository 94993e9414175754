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

//! wl_output: host display metadata advertised to clients.

use num_enum::IntoPrimitive;

use crate::prelude::*;
use crate::protocol::ObjectId;
use crate::protocol::ProtocolError;
use crate::protocol::geometry::Point;
use crate::protocol::geometry::Size;
use crate::protocol::interfaces::wl_output;
use crate::protocol::wire::MessageBuilder;
use crate::server::WayhostState;
use crate::server::client::Client;
use crate::server::client::ClientId;
use crate::server::client::Resource;
use crate::surface::Transform;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct OutputId(pub u32);

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum Subpixel {
    Unknown = 0,
    None = 1,
    HorizontalRgb = 2,
    HorizontalBgr = 3,
    VerticalRgb = 4,
    VerticalBgr = 5,
}

mod mode_flag {
    pub const CURRENT: u32 = 1;
    pub const PREFERRED: u32 = 2;
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct OutputInfo {
    pub make: String,
    pub model: String,
    pub location: Point<i32>,
    pub physical_size: Size<i32>,
    pub subpixel: Subpixel,
    pub transform: Transform,
    pub scale_factor: i32,
    pub mode: Size<i32>,
    pub refresh_mhz: i32,
}

impl OutputInfo {
    /// A sane single-display default until the host reports real metadata.
    pub fn fallback() -> Self {
        Self {
            make: "wayhost".to_string(),
            model: "virtual".to_string(),
            location: Point::default(),
            physical_size: Size { w: 520, h: 320 },
            subpixel: Subpixel::Unknown,
            transform: Transform::Normal,
            scale_factor: 1,
            mode: Size { w: 1920, h: 1080 },
            refresh_mhz: 60_000,
        }
    }
}

#[derive(Debug)]
pub struct Output {
    pub id: OutputId,
    pub info: OutputInfo,
    pub global_name: u32,
}

/// The full geometry/mode/scale/done burst, sent at bind and after updates.
pub fn send_output_info(client: &mut Client, object: ObjectId, version: u32, info: &OutputInfo) {
    client.send(
        MessageBuilder::new(object, wl_output::EV_GEOMETRY)
            .int(info.location.x)
            .int(info.location.y)
            .int(info.physical_size.w)
            .int(info.physical_size.h)
            .int(u32::from(info.subpixel) as i32)
            .string(&info.make)
            .string(&info.model)
            .int(u32::from(info.transform) as i32)
            .build(),
    );
    client.send(
        MessageBuilder::new(object, wl_output::EV_MODE)
            .uint(mode_flag::CURRENT | mode_flag::PREFERRED)
            .int(info.mode.w)
            .int(info.mode.h)
            .int(info.refresh_mhz)
            .build(),
    );
    if version >= wl_output::SCALE_SINCE_VERSION {
        client.send(
            MessageBuilder::new(object, wl_output::EV_SCALE)
                .int(info.scale_factor)
                .build(),
        );
    }
    if version >= wl_output::DONE_SINCE_VERSION {
        client.send(MessageBuilder::new(object, wl_output::EV_DONE).build());
    }
}

/// wl_output requests.
pub fn output_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_output::RELEASE if resource.version >= wl_output::RELEASE_SINCE_VERSION => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_output opcode {opcode}"),
        )),
    }
}

/// Tells a newly mapped surface which outputs it is visible on, one
/// `wl_surface.enter` per output binding the owning client holds.
pub fn send_surface_enter(state: &mut WayhostState, key: crate::surface::SurfaceId) {
    let Some((client_id, surface_obj)) = state.surfaces.get(&key).map(|s| (s.client, s.id))
    else {
        return;
    };
    let bindings = {
        let Some(client) = state.clients.get(&client_id) else {
            return;
        };
        client.resources_where(|r| matches!(r.kind, crate::server::client::ResourceKind::Output(_)))
    };
    if let Some(client) = state.clients.get_mut(&client_id) {
        for binding in bindings {
            client.send(
                MessageBuilder::new(surface_obj, crate::protocol::interfaces::wl_surface::EV_ENTER)
                    .object(binding.id)
                    .build(),
            );
        }
    }
}

/// Host reports new metadata for an output; rebroadcast to every binding.
pub fn update_output(state: &mut WayhostState, id: OutputId, info: OutputInfo) {
    let Some(output) = state.outputs.get_mut(&id) else {
        return;
    };
    output.info = info.clone();
    let client_ids: Vec<ClientId> = state.clients.keys().copied().collect();
    for client_id in client_ids {
        let bindings = {
            let Some(client) = state.clients.get(&client_id) else {
                continue;
            };
            client.resources_where(|r| r.kind == crate::server::client::ResourceKind::Output(id))
        };
        let Some(client) = state.clients.get_mut(&client_id) else {
            continue;
        };
        for binding in bindings {
            send_output_info(client, binding.id, binding.version, &info);
        }
    }
    debug!("output {id:?} updated to {}x{}", info.mode.w, info.mode.h);
}
