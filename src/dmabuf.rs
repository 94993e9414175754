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

//! zwp_linux_dmabuf_v1: GPU-side buffers described by fds the core never
//! reads.
//!
//! The params object is a single-use accumulator of 1–4 planes; realizing it
//! produces an opaque wl_buffer carrying only descriptors. v4 clients learn
//! the format set through a feedback object whose format table travels as an
//! fd.

use std::sync::Arc;

use crate::prelude::*;
use crate::protocol::DmabufParamsError;
use crate::protocol::Interface;
use crate::protocol::ObjectId;
use crate::protocol::ProtocolError;
use crate::protocol::geometry::Size;
use crate::protocol::interfaces::zwp_linux_buffer_params_v1;
use crate::protocol::interfaces::zwp_linux_dmabuf_feedback_v1;
use crate::protocol::interfaces::zwp_linux_dmabuf_v1;
use crate::protocol::wire::ArgReader;
use crate::protocol::wire::MessageBuilder;
use crate::server::WayhostState;
use crate::server::client::Client;
use crate::server::client::ClientId;
use crate::server::client::Resource;
use crate::server::client::ResourceKind;
use crate::shm::BufferId;
use crate::shm::BufferRecord;
use crate::shm::BufferSource;
use crate::shm::DmabufPlane;
use crate::shm::MAX_BUFFERS_PER_CLIENT;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct ParamsId(pub u64);

/// drm-fourcc codes for the formats the renderer accepts.
pub mod fourcc {
    pub const ARGB8888: u32 = 0x3432_5241; // 'AR24'
    pub const XRGB8888: u32 = 0x3432_5258; // 'XR24'
}

pub const MODIFIER_LINEAR: u64 = 0;

pub const SUPPORTED_FORMATS: [u32; 2] = [fourcc::ARGB8888, fourcc::XRGB8888];

const MAX_PLANES: u32 = 4;

#[derive(Debug)]
pub struct DmabufParams {
    pub client: ClientId,
    pub id: ObjectId,
    planes: Vec<DmabufPlane>,
    used: bool,
}

/// Pre-v4 format advertisement, sent at bind.
pub fn send_formats(client: &mut Client, dmabuf: ObjectId, version: u32) {
    for format in SUPPORTED_FORMATS {
        client.send(
            MessageBuilder::new(dmabuf, zwp_linux_dmabuf_v1::EV_FORMAT)
                .uint(format)
                .build(),
        );
        if version >= zwp_linux_dmabuf_v1::MODIFIER_SINCE_VERSION {
            client.send(
                MessageBuilder::new(dmabuf, zwp_linux_dmabuf_v1::EV_MODIFIER)
                    .uint(format)
                    .uint((MODIFIER_LINEAR >> 32) as u32)
                    .uint(MODIFIER_LINEAR as u32)
                    .build(),
            );
        }
    }
}

/// zwp_linux_dmabuf_v1 requests.
pub fn dmabuf_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        zwp_linux_dmabuf_v1::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        zwp_linux_dmabuf_v1::CREATE_PARAMS => {
            let id = args.new_id()?;
            let key = ParamsId(state.ids.next());
            state.client_mut(client_id)?.create(
                id,
                Interface::ZwpLinuxBufferParamsV1,
                resource.version,
                ResourceKind::DmabufParams(key),
            )?;
            state.dmabuf_params.insert(
                key,
                DmabufParams {
                    client: client_id,
                    id,
                    planes: Vec::new(),
                    used: false,
                },
            );
            Ok(())
        },
        zwp_linux_dmabuf_v1::GET_DEFAULT_FEEDBACK | zwp_linux_dmabuf_v1::GET_SURFACE_FEEDBACK
            if resource.version >= zwp_linux_dmabuf_v1::FEEDBACK_SINCE_VERSION =>
        {
            let id = args.new_id()?;
            if opcode == zwp_linux_dmabuf_v1::GET_SURFACE_FEEDBACK {
                let _surface = args.object()?;
            }
            state.client_mut(client_id)?.create(
                id,
                Interface::ZwpLinuxDmabufFeedbackV1,
                resource.version,
                ResourceKind::DmabufFeedback,
            )?;
            send_feedback(state, client_id, id)
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("zwp_linux_dmabuf_v1 opcode {opcode}"),
        )),
    }
}

/// The v4 feedback burst: format table fd, main device, one tranche.
fn send_feedback(
    state: &mut WayhostState,
    client_id: ClientId,
    feedback: ObjectId,
) -> Result<(), ProtocolError> {
    // 16 bytes per entry: u32 format, 4 bytes padding, u64 modifier.
    let mut table = Vec::with_capacity(SUPPORTED_FORMATS.len() * 16);
    for format in SUPPORTED_FORMATS {
        table.extend_from_slice(&format.to_ne_bytes());
        table.extend_from_slice(&[0u8; 4]);
        table.extend_from_slice(&MODIFIER_LINEAR.to_ne_bytes());
    }
    let table_fd = crate::utils::anon_file("wayhost-dmabuf-formats", &table).map_err(|e| {
        ProtocolError::implementation(feedback, format!("format table setup failed: {e:#}"))
    })?;

    // No DRM render node on the hosts this runs on; a zero dev_t tells
    // clients to allocate wherever and let the renderer import.
    let main_device = 0u64.to_ne_bytes();
    let tranche_indices: Vec<u8> = (0..SUPPORTED_FORMATS.len() as u16)
        .flat_map(|i| i.to_ne_bytes())
        .collect();

    let client = state.client_mut(client_id)?;
    client.send(
        MessageBuilder::new(feedback, zwp_linux_dmabuf_feedback_v1::EV_FORMAT_TABLE)
            .fd(table_fd)
            .uint(table.len() as u32)
            .build(),
    );
    client.send(
        MessageBuilder::new(feedback, zwp_linux_dmabuf_feedback_v1::EV_MAIN_DEVICE)
            .array(&main_device)
            .build(),
    );
    client.send(
        MessageBuilder::new(
            feedback,
            zwp_linux_dmabuf_feedback_v1::EV_TRANCHE_TARGET_DEVICE,
        )
        .array(&main_device)
        .build(),
    );
    client.send(
        MessageBuilder::new(feedback, zwp_linux_dmabuf_feedback_v1::EV_TRANCHE_FORMATS)
            .array(&tranche_indices)
            .build(),
    );
    client.send(
        MessageBuilder::new(feedback, zwp_linux_dmabuf_feedback_v1::EV_TRANCHE_FLAGS)
            .uint(0)
            .build(),
    );
    client.send(
        MessageBuilder::new(feedback, zwp_linux_dmabuf_feedback_v1::EV_TRANCHE_DONE).build(),
    );
    client.send(MessageBuilder::new(feedback, zwp_linux_dmabuf_feedback_v1::EV_DONE).build());
    Ok(())
}

/// zwp_linux_buffer_params_v1 requests.
pub fn params_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: ParamsId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        zwp_linux_buffer_params_v1::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        zwp_linux_buffer_params_v1::ADD => {
            let fd = args.fd()?;
            let plane_idx = args.uint()?;
            let offset = args.uint()?;
            let stride = args.uint()?;
            let modifier_hi = args.uint()?;
            let modifier_lo = args.uint()?;
            let Some(params) = state.dmabuf_params.get_mut(&key) else {
                return Err(ProtocolError::invalid_object(resource.id));
            };
            if params.used {
                return Err(ProtocolError::new(
                    resource.id,
                    DmabufParamsError::AlreadyUsed,
                    "params object was already used to create a buffer",
                ));
            }
            if plane_idx >= MAX_PLANES {
                return Err(ProtocolError::new(
                    resource.id,
                    DmabufParamsError::PlaneIdx,
                    format!("plane index {plane_idx} out of range"),
                ));
            }
            if params.planes.iter().any(|p| p.plane_idx == plane_idx) {
                return Err(ProtocolError::new(
                    resource.id,
                    DmabufParamsError::PlaneSet,
                    format!("plane {plane_idx} already set"),
                ));
            }
            params.planes.push(DmabufPlane {
                fd,
                plane_idx,
                offset,
                stride,
                modifier: (u64::from(modifier_hi) << 32) | u64::from(modifier_lo),
            });
            Ok(())
        },
        zwp_linux_buffer_params_v1::CREATE => {
            let width = args.int()?;
            let height = args.int()?;
            let format = args.uint()?;
            let flags = args.uint()?;
            let buffer = realize(state, client_id, resource, key, width, height, format, flags)?;
            // The async variant announces the buffer under a server id.
            let created = state.client_mut(client_id).and_then(|client| {
                client.create_server(Interface::WlBuffer, 1, ResourceKind::Buffer(buffer))
            });
            let id = match created {
                Ok(id) => id,
                Err(e) => {
                    state.buffers.remove(&buffer);
                    return Err(e);
                },
            };
            if let Some(record) = state.buffers.get_mut(&buffer) {
                record.id = id;
            }
            let client = state.client_mut(client_id)?;
            client.live_buffers += 1;
            client.send(
                MessageBuilder::new(resource.id, zwp_linux_buffer_params_v1::EV_CREATED)
                    .object(id)
                    .build(),
            );
            Ok(())
        },
        zwp_linux_buffer_params_v1::CREATE_IMMED => {
            let id = args.new_id()?;
            let width = args.int()?;
            let height = args.int()?;
            let format = args.uint()?;
            let flags = args.uint()?;
            let buffer = realize(state, client_id, resource, key, width, height, format, flags)?;
            if let Some(record) = state.buffers.get_mut(&buffer) {
                record.id = id;
            }
            let created =
                state
                    .client_mut(client_id)?
                    .create(id, Interface::WlBuffer, 1, ResourceKind::Buffer(buffer));
            if let Err(e) = created {
                state.buffers.remove(&buffer);
                return Err(e);
            }
            state.client_mut(client_id)?.live_buffers += 1;
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("zwp_linux_buffer_params_v1 opcode {opcode}"),
        )),
    }
}

/// Consumes the accumulator into a buffer record.
#[allow(clippy::too_many_arguments)]
fn realize(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: ParamsId,
    width: i32,
    height: i32,
    format: u32,
    flags: u32,
) -> Result<BufferId, ProtocolError> {
    {
        let Some(params) = state.dmabuf_params.get(&key) else {
            return Err(ProtocolError::invalid_object(resource.id));
        };
        if params.used {
            return Err(ProtocolError::new(
                resource.id,
                DmabufParamsError::AlreadyUsed,
                "params object was already used to create a buffer",
            ));
        }
        if params.planes.is_empty() {
            return Err(ProtocolError::new(
                resource.id,
                DmabufParamsError::Incomplete,
                "no planes added",
            ));
        }
        if width <= 0 || height <= 0 {
            return Err(ProtocolError::new(
                resource.id,
                DmabufParamsError::InvalidDimensions,
                format!("bad dimensions {width}x{height}"),
            ));
        }
        if !SUPPORTED_FORMATS.contains(&format) {
            return Err(ProtocolError::new(
                resource.id,
                DmabufParamsError::InvalidFormat,
                format!("unsupported format {format:#x}"),
            ));
        }
    }
    if state.client_mut(client_id)?.live_buffers >= MAX_BUFFERS_PER_CLIENT {
        return Err(ProtocolError::no_memory(format!(
            "{client_id} exceeded {MAX_BUFFERS_PER_CLIENT} live buffers"
        )));
    }

    let params = state.dmabuf_params.get_mut(&key).unwrap();
    params.used = true;
    let planes = std::mem::take(&mut params.planes);

    let buffer_id = BufferId(state.ids.next());
    state.buffers.insert(
        buffer_id,
        BufferRecord {
            client: client_id,
            // Placeholder until the caller binds the wl_buffer id.
            id: ObjectId(0),
            source: BufferSource::Dmabuf {
                planes: Arc::new(planes),
                format,
                flags,
            },
            size: Size {
                w: width,
                h: height,
            },
            pool: None,
            held_by: None,
            awaiting_retire: false,
        },
    );
    Ok(buffer_id)
}

/// zwp_linux_dmabuf_feedback_v1 requests.
pub fn feedback_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
) -> Result<(), ProtocolError> {
    match opcode {
        zwp_linux_dmabuf_feedback_v1::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("zwp_linux_dmabuf_feedback_v1 opcode {opcode}"),
        )),
    }
}

/// Domain cleanup for params objects.
pub fn params_destroyed(state: &mut WayhostState, key: ParamsId) {
    state.dmabuf_params.remove(&key);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fourcc_values() {
        assert_eq!(&fourcc::ARGB8888.to_le_bytes(), b"AR24");
        assert_eq!(&fourcc::XRGB8888.to_le_bytes(), b"XR24");
    }

    #[test]
    fn format_table_layout() {
        // Mirrors the feedback format-table entry: 16 bytes per format.
        let mut table = Vec::new();
        for format in SUPPORTED_FORMATS {
            table.extend_from_slice(&format.to_ne_bytes());
            table.extend_from_slice(&[0u8; 4]);
            table.extend_from_slice(&MODIFIER_LINEAR.to_ne_bytes());
        }
        assert_eq!(table.len(), SUPPORTED_FORMATS.len() * 16);
    }
}
