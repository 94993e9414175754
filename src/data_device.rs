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

//! wl_data_device_manager: selection transfer between clients.
//!
//! A selection is a data source plus its mime-type list. Setting one is
//! gated on a recent input serial; the offer is replayed to whichever client
//! owns keyboard focus. Transfer itself is fd plumbing: the receiving
//! client's `receive` forwards its pipe fd to the source client's `send`.

use std::collections::HashMap;

use crate::prelude::*;
use crate::protocol::DataOfferError;
use crate::protocol::Interface;
use crate::protocol::ObjectId;
use crate::protocol::ProtocolError;
use crate::protocol::interfaces::wl_data_device;
use crate::protocol::interfaces::wl_data_device_manager;
use crate::protocol::interfaces::wl_data_offer;
use crate::protocol::interfaces::wl_data_source;
use crate::protocol::wire::ArgReader;
use crate::protocol::wire::MessageBuilder;
use crate::server::WayhostState;
use crate::server::client::ClientId;
use crate::server::client::Resource;
use crate::server::client::ResourceKind;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct DataSourceId(pub u64);

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct DataOfferId(pub u64);

#[derive(Debug)]
pub struct DataSource {
    pub client: ClientId,
    pub id: ObjectId,
    pub mime_types: Vec<String>,
    pub dnd_actions: u32,
    /// Once used for a selection or drag the source may not be reused.
    pub used: bool,
}

#[derive(Debug)]
pub struct DataOffer {
    pub client: ClientId,
    pub id: ObjectId,
    pub source: DataSourceId,
}

#[derive(Debug, Default)]
pub struct DataDeviceState {
    pub sources: HashMap<DataSourceId, DataSource>,
    pub offers: HashMap<DataOfferId, DataOffer>,
    pub selection: Option<DataSourceId>,
    /// wl_data_device resources per client.
    pub devices: HashMap<ClientId, Vec<ObjectId>>,
}

/// wl_data_device_manager requests.
pub fn manager_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_data_device_manager::CREATE_DATA_SOURCE => {
            let id = args.new_id()?;
            let key = DataSourceId(state.ids.next());
            state.client_mut(client_id)?.create(
                id,
                Interface::WlDataSource,
                resource.version,
                ResourceKind::DataSource(key),
            )?;
            state.data.sources.insert(
                key,
                DataSource {
                    client: client_id,
                    id,
                    mime_types: Vec::new(),
                    dnd_actions: 0,
                    used: false,
                },
            );
            Ok(())
        },
        wl_data_device_manager::GET_DATA_DEVICE => {
            let id = args.new_id()?;
            let _seat = args.object()?;
            state.client_mut(client_id)?.create(
                id,
                Interface::WlDataDevice,
                resource.version,
                ResourceKind::DataDevice,
            )?;
            state.data.devices.entry(client_id).or_default().push(id);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_data_device_manager opcode {opcode}"),
        )),
    }
}

/// wl_data_source requests.
pub fn source_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: DataSourceId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_data_source::OFFER => {
            let mime = args.string()?;
            if let Some(source) = state.data.sources.get_mut(&key) {
                source.mime_types.push(mime);
            }
            Ok(())
        },
        wl_data_source::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        wl_data_source::SET_ACTIONS => {
            let actions = args.uint()?;
            if let Some(source) = state.data.sources.get_mut(&key) {
                source.dnd_actions = actions;
            }
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_data_source opcode {opcode}"),
        )),
    }
}

/// wl_data_device requests.
pub fn device_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_data_device::START_DRAG => {
            let source = args.object()?;
            let _origin = args.object()?;
            let _icon = args.object()?;
            let serial = args.uint()?;
            if !state.seat.serial_is_recent(serial) {
                debug!("{client_id}: start_drag with stale serial {serial}, ignoring");
                return Ok(());
            }
            // Drag-and-drop rides on host gestures this server does not own;
            // cancel the source so the client can clean up.
            if !source.is_null()
                && let Ok(source_res) = state.client_mut(client_id)?.resource(source)
                && source_res.kind.as_data_source().is_some()
                && let Some(client) = state.clients.get_mut(&client_id)
            {
                client.send(
                    MessageBuilder::new(source, wl_data_source::EV_CANCELLED).build(),
                );
            }
            Ok(())
        },
        wl_data_device::SET_SELECTION => {
            let source = args.object()?;
            let serial = args.uint()?;
            if !state.seat.serial_is_recent(serial) {
                debug!("{client_id}: set_selection with stale serial {serial}, ignoring");
                return Ok(());
            }
            set_selection(state, client_id, resource, source)
        },
        wl_data_device::RELEASE => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_data_device opcode {opcode}"),
        )),
    }
}

fn set_selection(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    source: ObjectId,
) -> Result<(), ProtocolError> {
    let new = if source.is_null() {
        None
    } else {
        let source_res = state.client_mut(client_id)?.resource(source)?;
        let Some(&source_key) = source_res.kind.as_data_source() else {
            return Err(ProtocolError::invalid_object(source));
        };
        let Some(record) = state.data.sources.get_mut(&source_key) else {
            return Err(ProtocolError::invalid_object(source));
        };
        if record.used {
            return Err(ProtocolError::new(
                resource.id,
                crate::protocol::DataDeviceError::UsedSource,
                "data source was already used",
            ));
        }
        record.used = true;
        Some(source_key)
    };

    let old = std::mem::replace(&mut state.data.selection, new);
    if let Some(old_key) = old
        && old != new
        && let Some(old_source) = state.data.sources.get(&old_key)
    {
        let (owner, object) = (old_source.client, old_source.id);
        if let Some(client) = state.clients.get_mut(&owner) {
            client.send(MessageBuilder::new(object, wl_data_source::EV_CANCELLED).build());
        }
    }

    // Replay the new selection to the focus owner right away.
    let focus_client = state
        .seat
        .keyboard_focus
        .and_then(|key| state.surfaces.get(&key))
        .map(|s| s.client);
    if let Some(focus_client) = focus_client {
        send_selection_to_focus(state, focus_client);
    }
    Ok(())
}

/// wl_data_offer requests.
pub fn offer_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    key: DataOfferId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_data_offer::ACCEPT => {
            let _serial = args.uint()?;
            let _mime = args.string_or_null()?;
            Ok(())
        },
        wl_data_offer::RECEIVE => {
            let mime = args.string()?;
            let fd = args.fd()?;
            // Forward the pipe to the source owner; it writes, the receiver
            // reads, and the server never sees the payload.
            let source_key = match state.data.offers.get(&key) {
                Some(offer) => offer.source,
                None => return Ok(()),
            };
            let Some(source) = state.data.sources.get(&source_key) else {
                return Ok(());
            };
            let (owner, object) = (source.client, source.id);
            if let Some(client) = state.clients.get_mut(&owner) {
                client.send(
                    MessageBuilder::new(object, wl_data_source::EV_SEND)
                        .string(&mime)
                        .fd(fd)
                        .build(),
                );
            }
            Ok(())
        },
        wl_data_offer::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        wl_data_offer::FINISH => Err(ProtocolError::new(
            resource.id,
            DataOfferError::InvalidFinish,
            "finish on a selection offer",
        )),
        wl_data_offer::SET_ACTIONS => {
            let _actions = args.uint()?;
            let _preferred = args.uint()?;
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_data_offer opcode {opcode}"),
        )),
    }
}

/// Introduces the current selection to `client_id` (the keyboard-focus
/// owner): a fresh data_offer with its mime types, then `selection`.
pub fn send_selection_to_focus(state: &mut WayhostState, client_id: ClientId) {
    let devices = match state.data.devices.get(&client_id) {
        Some(devices) if !devices.is_empty() => devices.clone(),
        _ => return,
    };

    let Some(selection_key) = state.data.selection else {
        for device in devices {
            if let Some(client) = state.clients.get_mut(&client_id) {
                client.send(
                    MessageBuilder::new(device, wl_data_device::EV_SELECTION)
                        .object(ObjectId(0))
                        .build(),
                );
            }
        }
        return;
    };
    let mime_types = match state.data.sources.get(&selection_key) {
        Some(source) => source.mime_types.clone(),
        None => return,
    };

    for device in devices {
        let offer_key = DataOfferId(state.ids.next());
        let offer_id = {
            let Ok(client) = state.client_mut(client_id) else {
                return;
            };
            match client.create_server(
                Interface::WlDataOffer,
                Interface::WlDataOffer.max_version(),
                ResourceKind::DataOffer(offer_key),
            ) {
                Ok(id) => id,
                Err(e) => {
                    warn!("failed to allocate data offer: {e}");
                    return;
                },
            }
        };
        state.data.offers.insert(
            offer_key,
            DataOffer {
                client: client_id,
                id: offer_id,
                source: selection_key,
            },
        );
        if let Some(client) = state.clients.get_mut(&client_id) {
            client.send(
                MessageBuilder::new(device, wl_data_device::EV_DATA_OFFER)
                    .object(offer_id)
                    .build(),
            );
            for mime in &mime_types {
                client.send(
                    MessageBuilder::new(offer_id, wl_data_offer::EV_OFFER)
                        .string(mime)
                        .build(),
                );
            }
            client.send(
                MessageBuilder::new(device, wl_data_device::EV_SELECTION)
                    .object(offer_id)
                    .build(),
            );
        }
    }
}

/// Domain cleanup for data sources.
pub fn source_destroyed(state: &mut WayhostState, key: DataSourceId) {
    state.data.sources.remove(&key);
    if state.data.selection == Some(key) {
        state.data.selection = None;
        let focus_client = state
            .seat
            .keyboard_focus
            .and_then(|surface| state.surfaces.get(&surface))
            .map(|s| s.client);
        if let Some(focus_client) = focus_client {
            send_selection_to_focus(state, focus_client);
        }
    }
}

/// Domain cleanup for data offers.
pub fn offer_destroyed(state: &mut WayhostState, key: DataOfferId) {
    state.data.offers.remove(&key);
}

/// Domain cleanup for data devices.
pub fn device_destroyed(state: &mut WayhostState, client_id: ClientId, id: ObjectId) {
    if let Some(devices) = state.data.devices.get_mut(&client_id) {
        devices.retain(|d| *d != id);
    }
}
