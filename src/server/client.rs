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

//! Per-client object table.
//!
//! Every live resource is a row here; the row's [`ResourceKind`] is a typed
//! handle into the domain stores owned by the display state. Lookups can
//! therefore never yield a stale pointer: destroying a resource removes the
//! row, and the handle it carried dies with it.

use std::collections::HashMap;

use enum_as_inner::EnumAsInner;

use crate::data_device::DataOfferId;
use crate::data_device::DataSourceId;
use crate::dmabuf::ParamsId;
use crate::output::OutputId;
use crate::prelude::*;
use crate::protocol::Interface;
use crate::protocol::ObjectId;
use crate::protocol::ProtocolError;
use crate::protocol::interfaces::wl_display;
use crate::protocol::wire::MessageBuilder;
use crate::protocol::wire::WireMessage;
use crate::shm::BufferId;
use crate::shm::PoolId;
use crate::surface::RegionId;
use crate::surface::SurfaceId;
use crate::transport::Connection;
use crate::xdg_shell::PopupId;
use crate::xdg_shell::PositionerId;
use crate::xdg_shell::ToplevelId;
use crate::xdg_shell::XdgSurfaceId;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ClientId(pub u32);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// What a resource *is*, as a handle into the display-owned domain stores.
#[derive(Debug, Copy, Clone, Eq, PartialEq, EnumAsInner)]
pub enum ResourceKind {
    Registry,
    Compositor,
    Subcompositor,
    Shm,
    ShmPool(PoolId),
    Buffer(BufferId),
    Surface(SurfaceId),
    Subsurface(SurfaceId),
    Region(RegionId),
    Seat,
    Pointer,
    Keyboard,
    Touch,
    Output(OutputId),
    DataDeviceManager,
    DataSource(DataSourceId),
    DataDevice,
    DataOffer(DataOfferId),
    WmBase,
    Positioner(PositionerId),
    XdgSurface(XdgSurfaceId),
    Toplevel(ToplevelId),
    Popup(PopupId),
    DecorationManager,
    Decoration(ToplevelId),
    DmabufManager,
    DmabufParams(ParamsId),
    DmabufFeedback,
    Viewporter,
    Viewport(SurfaceId),
    FrameCallback(SurfaceId),
}

#[derive(Debug, Copy, Clone)]
pub struct Resource {
    pub id: ObjectId,
    pub interface: Interface,
    pub version: u32,
    pub kind: ResourceKind,
    created_seq: u64,
}

#[derive(Debug)]
pub struct Client {
    pub id: ClientId,
    pub conn: Connection,
    objects: HashMap<u32, Resource>,
    next_seq: u64,
    next_server_id: u32,
    /// Registry bindings, for global add/remove broadcasts.
    pub registries: Vec<ObjectId>,
    /// Live wl_buffer count, bounded per client.
    pub live_buffers: u32,
}

impl Client {
    pub fn new(id: ClientId, conn: Connection) -> Self {
        Self {
            id,
            conn,
            objects: HashMap::new(),
            next_seq: 0,
            next_server_id: ObjectId::SERVER_RANGE_START,
            registries: Vec::new(),
            live_buffers: 0,
        }
    }

    pub fn send(&mut self, msg: WireMessage) {
        self.conn.queue(msg);
    }

    /// Registers a client-allocated object id.
    ///
    /// Fails if the id is already live or lies in the server's allocation
    /// range; both are client bugs and fatal.
    pub fn create(
        &mut self,
        id: ObjectId,
        interface: Interface,
        version: u32,
        kind: ResourceKind,
    ) -> Result<(), ProtocolError> {
        if id.is_null() || id.is_server_allocated() {
            return Err(ProtocolError::invalid_object(id));
        }
        self.insert(id, interface, version, kind)
    }

    /// Registers a resource under a fresh server-allocated id.
    pub fn create_server(
        &mut self,
        interface: Interface,
        version: u32,
        kind: ResourceKind,
    ) -> Result<ObjectId, ProtocolError> {
        let id = ObjectId(self.next_server_id);
        self.next_server_id = self.next_server_id.wrapping_add(1).max(ObjectId::SERVER_RANGE_START);
        self.insert(id, interface, version, kind)?;
        Ok(id)
    }

    fn insert(
        &mut self,
        id: ObjectId,
        interface: Interface,
        version: u32,
        kind: ResourceKind,
    ) -> Result<(), ProtocolError> {
        if self.objects.contains_key(&id.0) {
            return Err(ProtocolError::invalid_object(id));
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.objects.insert(
            id.0,
            Resource {
                id,
                interface,
                version,
                kind,
                created_seq: seq,
            },
        );
        Ok(())
    }

    pub fn lookup(&self, id: ObjectId) -> Option<&Resource> {
        self.objects.get(&id.0)
    }

    /// A lookup that a live protocol message depends on.
    pub fn resource(&self, id: ObjectId) -> Result<Resource, ProtocolError> {
        self.objects
            .get(&id.0)
            .copied()
            .ok_or_else(|| ProtocolError::invalid_object(id))
    }

    /// Removes the row and acks the id back to the client so it may recycle
    /// it. Returns the removed resource for domain cleanup; `None` if the
    /// slot was already gone (idempotent).
    pub fn remove(&mut self, id: ObjectId) -> Option<Resource> {
        let res = self.objects.remove(&id.0)?;
        if !id.is_server_allocated() {
            self.send(
                MessageBuilder::new(ObjectId::DISPLAY, wl_display::EV_DELETE_ID)
                    .uint(id.0)
                    .build(),
            );
        }
        Some(res)
    }

    /// Drains the whole table in reverse creation order, so children drop
    /// before the parents that spawned them.
    pub fn drain_reverse_creation(&mut self) -> Vec<Resource> {
        let mut all: Vec<Resource> = self.objects.drain().map(|(_, r)| r).collect();
        all.sort_by(|a, b| b.created_seq.cmp(&a.created_seq));
        all
    }

    pub fn live_object_count(&self) -> usize {
        self.objects.len()
    }

    /// Resources of one kind predicate, for sweeps.
    pub fn resources_where(&self, mut pred: impl FnMut(&Resource) -> bool) -> Vec<Resource> {
        let mut out: Vec<Resource> = self.objects.values().filter(|r| pred(r)).copied().collect();
        out.sort_by_key(|r| r.created_seq);
        out
    }
}

#[cfg(test)]
mod tests {
    use std::os::unix::net::UnixStream;

    use super::*;

    fn client() -> (Client, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        (
            Client::new(ClientId(1), Connection::new(ours.into()).unwrap()),
            theirs,
        )
    }

    #[test]
    fn create_rejects_duplicate_ids() {
        let (mut client, _peer) = client();
        client
            .create(ObjectId(4), Interface::WlSurface, 4, ResourceKind::Compositor)
            .unwrap();
        assert!(
            client
                .create(ObjectId(4), Interface::WlSurface, 4, ResourceKind::Compositor)
                .is_err()
        );
    }

    #[test]
    fn create_rejects_server_range_ids() {
        let (mut client, _peer) = client();
        assert!(
            client
                .create(
                    ObjectId(ObjectId::SERVER_RANGE_START),
                    Interface::WlSurface,
                    1,
                    ResourceKind::Compositor,
                )
                .is_err()
        );
    }

    #[test]
    fn server_ids_have_high_bit_set_and_are_unique() {
        let (mut client, _peer) = client();
        let a = client
            .create_server(Interface::WlDataOffer, 3, ResourceKind::DataDeviceManager)
            .unwrap();
        let b = client
            .create_server(Interface::WlDataOffer, 3, ResourceKind::DataDeviceManager)
            .unwrap();
        assert!(a.is_server_allocated());
        assert!(b.is_server_allocated());
        assert_ne!(a, b);
    }

    #[test]
    fn remove_is_idempotent() {
        let (mut client, _peer) = client();
        client
            .create(ObjectId(9), Interface::WlRegion, 1, ResourceKind::Compositor)
            .unwrap();
        assert!(client.remove(ObjectId(9)).is_some());
        assert!(client.remove(ObjectId(9)).is_none());
    }

    #[test]
    fn id_not_reused_while_live() {
        let (mut client, _peer) = client();
        client
            .create(ObjectId(7), Interface::WlRegion, 1, ResourceKind::Compositor)
            .unwrap();
        assert!(
            client
                .create(ObjectId(7), Interface::WlBuffer, 1, ResourceKind::Compositor)
                .is_err()
        );
        client.remove(ObjectId(7));
        client
            .create(ObjectId(7), Interface::WlBuffer, 1, ResourceKind::Compositor)
            .unwrap();
    }

    #[test]
    fn teardown_order_is_reverse_creation() {
        let (mut client, _peer) = client();
        for i in 2..6 {
            client
                .create(ObjectId(i), Interface::WlRegion, 1, ResourceKind::Compositor)
                .unwrap();
        }
        let drained = client.drain_reverse_creation();
        let ids: Vec<u32> = drained.iter().map(|r| r.id.0).collect();
        assert_eq!(ids, vec![5, 4, 3, 2]);
        assert_eq!(client.live_object_count(), 0);
    }
}
