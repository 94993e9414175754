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

//! The process-wide set of advertised globals.
//!
//! Globals are numbered in announce order. Removing one broadcasts
//! `global_remove`, but bindings made before the removal stay valid.

use std::collections::BTreeMap;

use crate::output::OutputId;
use crate::prelude::*;
use crate::protocol::Interface;
use crate::protocol::ObjectId;
use crate::protocol::interfaces::wl_registry;
use crate::protocol::wire::MessageBuilder;
use crate::server::client::Client;

/// Which bind handler a global routes to.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum GlobalKind {
    Compositor,
    Subcompositor,
    Shm,
    Seat,
    Output(OutputId),
    DataDeviceManager,
    WmBase,
    DecorationManager,
    Dmabuf,
    Viewporter,
}

#[derive(Debug, Copy, Clone)]
pub struct Global {
    pub name: u32,
    pub interface: Interface,
    pub version: u32,
    pub kind: GlobalKind,
}

#[derive(Debug, Default)]
pub struct GlobalRegistry {
    globals: BTreeMap<u32, Global>,
    next_name: u32,
}

impl GlobalRegistry {
    pub fn new() -> Self {
        Self {
            globals: BTreeMap::new(),
            next_name: 1,
        }
    }

    pub fn add(&mut self, interface: Interface, kind: GlobalKind) -> u32 {
        let name = self.next_name;
        self.next_name += 1;
        self.globals.insert(
            name,
            Global {
                name,
                interface,
                version: interface.max_version(),
                kind,
            },
        );
        name
    }

    pub fn remove(&mut self, name: u32) -> Option<Global> {
        self.globals.remove(&name)
    }

    pub fn get(&self, name: u32) -> Option<Global> {
        self.globals.get(&name).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Global> {
        self.globals.values()
    }

    /// Enumerates every global to a freshly bound registry.
    pub fn announce(&self, client: &mut Client, registry: ObjectId) {
        for global in self.globals.values() {
            trace!(
                "{}: announcing {} v{} as name {}",
                client.id,
                global.interface.name(),
                global.version,
                global.name
            );
            client.send(
                MessageBuilder::new(registry, wl_registry::EV_GLOBAL)
                    .uint(global.name)
                    .string(global.interface.name())
                    .uint(global.version)
                    .build(),
            );
        }
    }

    /// Broadcasts removal of `name` to one client's registries.
    pub fn announce_removal(client: &mut Client, name: u32) {
        for registry in client.registries.clone() {
            client.send(
                MessageBuilder::new(registry, wl_registry::EV_GLOBAL_REMOVE)
                    .uint(name)
                    .build(),
            );
        }
    }
}

/// Version negotiation: the bound version is clamped at what we advertise.
pub fn negotiate_version(global: &Global, requested: u32) -> u32 {
    requested.min(global.version).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_are_sequential_and_stable_across_removal() {
        let mut registry = GlobalRegistry::new();
        let a = registry.add(Interface::WlCompositor, GlobalKind::Compositor);
        let b = registry.add(Interface::WlShm, GlobalKind::Shm);
        assert_eq!((a, b), (1, 2));

        registry.remove(a);
        assert!(registry.get(a).is_none());
        assert!(registry.get(b).is_some());

        let c = registry.add(Interface::WlSeat, GlobalKind::Seat);
        assert_eq!(c, 3);
    }

    #[test]
    fn version_clamps_to_advertised() {
        let global = Global {
            name: 1,
            interface: Interface::WlSeat,
            version: 7,
            kind: GlobalKind::Seat,
        };
        assert_eq!(negotiate_version(&global, 9), 7);
        assert_eq!(negotiate_version(&global, 3), 3);
        assert_eq!(negotiate_version(&global, 0), 1);
    }
}
