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

//! The display: every piece of protocol state, owned by one value on one
//! thread.
//!
//! The engine itself is a plain state machine — bytes in, state change,
//! events out — with no opinion about how it is driven. [`run`] wraps it in
//! a calloop loop whose only wake-ups are client sockets, the listeners,
//! platform input, renderer signals, and a watchdog timer; tests drive the
//! same entry points directly.

use std::collections::HashMap;
use std::fs;
use std::fs::File;
use std::io::ErrorKind;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixListener;
use std::path::Path;
use std::time::Duration;
use std::time::Instant;

use calloop::EventLoop;
use calloop::Interest;
use calloop::Mode;
use calloop::PostAction;
use calloop::channel::Event as CalloopChannelEvent;
use calloop::generic::Generic;
use calloop::timer::TimeoutAction;
use calloop::timer::Timer;
use nix::fcntl::Flock;
use nix::fcntl::FlockArg;
use nix::sys::stat;
use nix::sys::stat::Mode as StatMode;

use crate::config::WayhostConfig;
use crate::data_device;
use crate::data_device::DataDeviceState;
use crate::decoration;
use crate::dmabuf;
use crate::dmabuf::DmabufParams;
use crate::dmabuf::ParamsId;
use crate::output;
use crate::output::Output;
use crate::output::OutputId;
use crate::output::OutputInfo;
use crate::platform::PlatformEvent;
use crate::platform::PlatformHost;
use crate::prelude::*;
use crate::protocol::Interface;
use crate::protocol::ObjectId;
use crate::protocol::ProtocolError;
use crate::protocol::geometry::Size;
use crate::protocol::interfaces::wl_callback;
use crate::protocol::interfaces::wl_display;
use crate::protocol::interfaces::wl_registry;
use crate::protocol::interfaces::xdg_wm_base;
use crate::protocol::wire::ArgReader;
use crate::protocol::wire::MessageBuilder;
use crate::protocol::wire::MessageHeader;
use crate::renderer;
use crate::renderer::RendererEvent;
use crate::renderer::RendererLink;
use crate::scheduler;
use crate::scheduler::FrameScheduler;
use crate::seat;
use crate::seat::Seat;
use crate::shm;
use crate::shm::BufferId;
use crate::shm::BufferRecord;
use crate::shm::PoolId;
use crate::shm::ShmPool;
use crate::surface;
use crate::surface::Region;
use crate::surface::RegionId;
use crate::surface::Surface;
use crate::surface::SurfaceId;
use crate::transport::Connection;
use crate::transport::ReadStatus;
use crate::transport::STALL_TIMEOUT;
use crate::xdg_shell;
use crate::xdg_shell::Popup;
use crate::xdg_shell::PopupId;
use crate::xdg_shell::Positioner;
use crate::xdg_shell::PositionerId;
use crate::xdg_shell::Toplevel;
use crate::xdg_shell::ToplevelId;
use crate::xdg_shell::XdgSurface;
use crate::xdg_shell::XdgSurfaceId;

pub mod client;
pub mod globals;

use client::Client;
use client::ClientId;
use client::Resource;
use client::ResourceKind;
use globals::GlobalKind;
use globals::GlobalRegistry;

pub type Clients = HashMap<ClientId, Client>;

/// Unacked configures older than this are logged by the watchdog.
const CONFIGURE_ACK_DEADLINE: Duration = Duration::from_secs(10);
/// Outstanding pings older than this mark a client unresponsive.
const PING_DEADLINE: Duration = Duration::from_secs(10);
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(2);

/// Allocator for the stable u64 keys behind every domain store.
#[derive(Debug, Default)]
pub struct Ids {
    next: u64,
}

impl Ids {
    pub fn next(&mut self) -> u64 {
        self.next += 1;
        self.next
    }
}

/// All protocol and window state, owned by the dispatch thread.
pub struct WayhostState {
    pub config: WayhostConfig,
    pub globals: GlobalRegistry,
    pub clients: Clients,
    pub surfaces: HashMap<SurfaceId, Surface>,
    pub regions: HashMap<RegionId, Region>,
    pub pools: HashMap<PoolId, ShmPool>,
    pub buffers: HashMap<BufferId, BufferRecord>,
    pub dmabuf_params: HashMap<ParamsId, DmabufParams>,
    pub xdg_surfaces: HashMap<XdgSurfaceId, XdgSurface>,
    pub toplevels: HashMap<ToplevelId, Toplevel>,
    pub popups: HashMap<PopupId, Popup>,
    pub positioners: HashMap<PositionerId, Positioner>,
    pub outputs: HashMap<OutputId, Output>,
    pub data: DataDeviceState,
    pub seat: Seat,
    pub scheduler: FrameScheduler,
    pub renderer: RendererLink,
    pub platform: Box<dyn PlatformHost>,
    pub ids: Ids,
    pub scene_serial: u64,
    /// Outstanding xdg_wm_base pings per client.
    pub pings: HashMap<ClientId, (u32, Instant)>,
    pub start_time: Instant,
    next_client_id: u32,
}

impl WayhostState {
    pub fn new(
        config: WayhostConfig,
        renderer: RendererLink,
        platform: Box<dyn PlatformHost>,
    ) -> Result<Self> {
        let mut globals = GlobalRegistry::new();
        globals.add(Interface::WlCompositor, GlobalKind::Compositor);
        globals.add(Interface::WlSubcompositor, GlobalKind::Subcompositor);
        globals.add(Interface::WlShm, GlobalKind::Shm);
        globals.add(Interface::WlSeat, GlobalKind::Seat);
        let output_id = OutputId(1);
        globals.add(Interface::WlOutput, GlobalKind::Output(output_id));
        globals.add(Interface::WlDataDeviceManager, GlobalKind::DataDeviceManager);
        globals.add(Interface::XdgWmBase, GlobalKind::WmBase);
        globals.add(
            Interface::ZxdgDecorationManagerV1,
            GlobalKind::DecorationManager,
        );
        globals.add(Interface::ZwpLinuxDmabufV1, GlobalKind::Dmabuf);
        globals.add(Interface::WpViewporter, GlobalKind::Viewporter);

        let output_global = globals
            .iter()
            .find(|g| g.kind == GlobalKind::Output(output_id))
            .map(|g| g.name)
            .unwrap_or(0);
        let mut outputs = HashMap::new();
        outputs.insert(
            output_id,
            Output {
                id: output_id,
                info: OutputInfo::fallback(),
                global_name: output_global,
            },
        );

        Ok(Self {
            config,
            globals,
            clients: HashMap::new(),
            surfaces: HashMap::new(),
            regions: HashMap::new(),
            pools: HashMap::new(),
            buffers: HashMap::new(),
            dmabuf_params: HashMap::new(),
            xdg_surfaces: HashMap::new(),
            toplevels: HashMap::new(),
            popups: HashMap::new(),
            positioners: HashMap::new(),
            outputs,
            data: DataDeviceState::default(),
            seat: Seat::new().location(loc!())?,
            scheduler: FrameScheduler::new(),
            renderer,
            platform,
            ids: Ids::default(),
            scene_serial: 0,
            pings: HashMap::new(),
            start_time: Instant::now(),
            next_client_id: 1,
        })
    }

    pub fn client_mut(&mut self, id: ClientId) -> Result<&mut Client, ProtocolError> {
        self.clients
            .get_mut(&id)
            .ok_or_else(|| ProtocolError::implementation(ObjectId::DISPLAY, format!("{id} gone")))
    }

    /// The size proposed for maximize/fullscreen transitions.
    pub fn output_workarea_size(&self) -> Size<i32> {
        self.outputs
            .values()
            .next()
            .map(|o| o.info.mode)
            .unwrap_or_default()
    }

    /// Admits a connection, enforcing the single-client policy at accept
    /// time: a refused peer sees an immediate close, never a half-alive
    /// display.
    pub fn accept_client(&mut self, socket: OwnedFd) -> Option<ClientId> {
        if !self.config.multiple_clients && !self.clients.is_empty() {
            warn!("refusing connection: multiple_clients is disabled");
            return None;
        }
        let conn = match Connection::new(socket) {
            Ok(conn) => conn,
            Err(e) => {
                warn!("failed to set up client connection: {e:?}");
                return None;
            },
        };
        let id = ClientId(self.next_client_id);
        self.next_client_id += 1;
        self.clients.insert(id, Client::new(id, conn));
        info!("{id}: connected");
        Some(id)
    }

    /// Drains and dispatches everything readable on one client socket.
    /// Returns false once the client is gone.
    pub fn handle_client_readable(&mut self, client_id: ClientId) -> bool {
        let status = match self.clients.get_mut(&client_id) {
            Some(client) => match client.conn.read() {
                Ok(status) => status,
                Err(e) => {
                    warn!("{client_id}: read failed: {e:?}");
                    self.teardown_client(client_id, "read error");
                    return false;
                },
            },
            None => return false,
        };

        loop {
            let next = match self.clients.get_mut(&client_id) {
                Some(client) => client.conn.next_message(),
                None => return false,
            };
            match next {
                Ok(Some((header, args))) => {
                    if let Err(e) = self.dispatch_message(client_id, header, &args) {
                        self.post_protocol_error(client_id, e);
                        return false;
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    self.post_protocol_error(client_id, e);
                    return false;
                },
            }
        }

        if status == ReadStatus::Eof {
            self.teardown_client(client_id, "peer closed the connection");
            return false;
        }
        self.flush_clients();
        true
    }

    /// Decodes and routes a single request.
    pub fn dispatch_message(
        &mut self,
        client_id: ClientId,
        header: MessageHeader,
        args: &[u8],
    ) -> Result<(), ProtocolError> {
        // The fd queue rides along with the byte stream; hand it to the
        // reader for the duration of this message.
        let mut fds = match self.clients.get_mut(&client_id) {
            Some(client) => std::mem::take(client.conn.incoming_fds()),
            None => return Ok(()),
        };
        let mut reader = ArgReader::new(header.object, args, &mut fds);

        let result = if header.object == ObjectId::DISPLAY {
            self.display_request(client_id, header.opcode, &mut reader)
        } else {
            match self.clients.get(&client_id) {
                Some(client) => match client.resource(header.object) {
                    Ok(resource) => self.route(client_id, resource, header.opcode, &mut reader),
                    Err(e) => Err(e),
                },
                None => Ok(()),
            }
        };

        drop(reader);
        if let Some(client) = self.clients.get_mut(&client_id) {
            let queue = client.conn.incoming_fds();
            while let Some(fd) = fds.pop_front() {
                queue.push_back(fd);
            }
        }
        result
    }

    fn display_request(
        &mut self,
        client_id: ClientId,
        opcode: u16,
        args: &mut ArgReader,
    ) -> Result<(), ProtocolError> {
        match opcode {
            wl_display::SYNC => {
                let callback = args.new_id()?;
                let serial = self.seat.current_serial();
                let client = self.client_mut(client_id)?;
                client.send(
                    MessageBuilder::new(callback, wl_callback::EV_DONE)
                        .uint(serial)
                        .build(),
                );
                client.send(
                    MessageBuilder::new(ObjectId::DISPLAY, wl_display::EV_DELETE_ID)
                        .uint(callback.0)
                        .build(),
                );
                Ok(())
            },
            wl_display::GET_REGISTRY => {
                let id = args.new_id()?;
                let client = self.client_mut(client_id)?;
                client.create(id, Interface::WlRegistry, 1, ResourceKind::Registry)?;
                client.registries.push(id);
                self.globals.announce(self.clients.get_mut(&client_id).ok_or_else(
                    || ProtocolError::implementation(ObjectId::DISPLAY, "client vanished"),
                )?, id);
                Ok(())
            },
            _ => Err(ProtocolError::invalid_method(
                ObjectId::DISPLAY,
                format!("wl_display opcode {opcode}"),
            )),
        }
    }

    fn registry_request(
        &mut self,
        client_id: ClientId,
        resource: Resource,
        opcode: u16,
        args: &mut ArgReader,
    ) -> Result<(), ProtocolError> {
        match opcode {
            wl_registry::BIND => {
                let name = args.uint()?;
                let interface_name = args.string()?;
                let version = args.uint()?;
                let id = args.new_id()?;
                let Some(global) = self.globals.get(name) else {
                    return Err(ProtocolError::invalid_method(
                        resource.id,
                        format!("bind to unknown global {name}"),
                    ));
                };
                if interface_name != global.interface.name() {
                    return Err(ProtocolError::invalid_method(
                        resource.id,
                        format!(
                            "bind of global {name} as {interface_name}, which is {}",
                            global.interface.name()
                        ),
                    ));
                }
                let version = globals::negotiate_version(&global, version);
                self.bind_global(client_id, global.kind, global.interface, version, id)
            },
            _ => Err(ProtocolError::invalid_method(
                resource.id,
                format!("wl_registry opcode {opcode}"),
            )),
        }
    }

    fn bind_global(
        &mut self,
        client_id: ClientId,
        kind: GlobalKind,
        interface: Interface,
        version: u32,
        id: ObjectId,
    ) -> Result<(), ProtocolError> {
        debug!("{client_id}: binding {} v{version} as {id}", interface.name());
        let resource_kind = match kind {
            GlobalKind::Compositor => ResourceKind::Compositor,
            GlobalKind::Subcompositor => ResourceKind::Subcompositor,
            GlobalKind::Shm => ResourceKind::Shm,
            GlobalKind::Seat => ResourceKind::Seat,
            GlobalKind::Output(output_id) => ResourceKind::Output(output_id),
            GlobalKind::DataDeviceManager => ResourceKind::DataDeviceManager,
            GlobalKind::WmBase => ResourceKind::WmBase,
            GlobalKind::DecorationManager => ResourceKind::DecorationManager,
            GlobalKind::Dmabuf => ResourceKind::DmabufManager,
            GlobalKind::Viewporter => ResourceKind::Viewporter,
        };
        self.client_mut(client_id)?
            .create(id, interface, version, resource_kind)?;

        // Interfaces with bind-time announcements.
        match kind {
            GlobalKind::Shm => {
                shm::send_formats(self.client_mut(client_id)?, id);
            },
            GlobalKind::Seat => {
                seat::send_seat_hello(self.client_mut(client_id)?, id, version);
            },
            GlobalKind::Output(output_id) => {
                let info = match self.outputs.get(&output_id) {
                    Some(output) => output.info.clone(),
                    None => OutputInfo::fallback(),
                };
                output::send_output_info(self.client_mut(client_id)?, id, version, &info);
            },
            GlobalKind::Dmabuf => {
                if version < crate::protocol::interfaces::zwp_linux_dmabuf_v1::FEEDBACK_SINCE_VERSION
                {
                    dmabuf::send_formats(self.client_mut(client_id)?, id, version);
                }
            },
            _ => {},
        }
        Ok(())
    }

    fn route(
        &mut self,
        client_id: ClientId,
        resource: Resource,
        opcode: u16,
        args: &mut ArgReader,
    ) -> Result<(), ProtocolError> {
        match resource.kind {
            ResourceKind::Registry => self.registry_request(client_id, resource, opcode, args),
            ResourceKind::Compositor => {
                surface::compositor_request(self, client_id, resource, opcode, args)
            },
            ResourceKind::Subcompositor => {
                surface::subcompositor_request(self, client_id, resource, opcode, args)
            },
            ResourceKind::Shm => shm::shm_request(self, client_id, resource, opcode, args),
            ResourceKind::ShmPool(pool) => {
                shm::pool_request(self, client_id, resource, pool, opcode, args)
            },
            ResourceKind::Buffer(_) => shm::buffer_request(self, client_id, resource, opcode),
            ResourceKind::Surface(key) => {
                surface::surface_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::Subsurface(key) => {
                surface::subsurface_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::Region(region) => {
                surface::region_request(self, client_id, resource, region, opcode, args)
            },
            ResourceKind::Seat => seat::seat_request(self, client_id, resource, opcode, args),
            ResourceKind::Pointer => {
                seat::pointer_request(self, client_id, resource, opcode, args)
            },
            ResourceKind::Keyboard => seat::keyboard_request(self, client_id, resource, opcode),
            ResourceKind::Touch => seat::touch_request(self, client_id, resource, opcode),
            ResourceKind::Output(_) => output::output_request(self, client_id, resource, opcode),
            ResourceKind::DataDeviceManager => {
                data_device::manager_request(self, client_id, resource, opcode, args)
            },
            ResourceKind::DataSource(key) => {
                data_device::source_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::DataDevice => {
                data_device::device_request(self, client_id, resource, opcode, args)
            },
            ResourceKind::DataOffer(key) => {
                data_device::offer_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::WmBase => {
                xdg_shell::wm_base_request(self, client_id, resource, opcode, args)
            },
            ResourceKind::Positioner(key) => {
                xdg_shell::positioner_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::XdgSurface(key) => {
                xdg_shell::xdg_surface_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::Toplevel(key) => {
                xdg_shell::toplevel_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::Popup(key) => {
                xdg_shell::popup_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::DecorationManager => {
                decoration::manager_request(self, client_id, resource, opcode, args)
            },
            ResourceKind::Decoration(toplevel) => {
                decoration::decoration_request(self, client_id, resource, toplevel, opcode, args)
            },
            ResourceKind::DmabufManager => {
                dmabuf::dmabuf_request(self, client_id, resource, opcode, args)
            },
            ResourceKind::DmabufParams(key) => {
                dmabuf::params_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::DmabufFeedback => {
                dmabuf::feedback_request(self, client_id, resource, opcode)
            },
            ResourceKind::Viewporter => {
                surface::viewporter_request(self, client_id, resource, opcode, args)
            },
            ResourceKind::Viewport(key) => {
                surface::viewport_request(self, client_id, resource, key, opcode, args)
            },
            ResourceKind::FrameCallback(_) => Err(ProtocolError::invalid_method(
                resource.id,
                "wl_callback has no requests",
            )),
        }
    }

    /// Destroys one resource: table row out (with its `delete_id` ack), then
    /// the domain cleanup for whatever the row pointed at. The removal-first
    /// order is what makes every destructor run exactly once.
    pub fn destroy_resource(&mut self, client_id: ClientId, id: ObjectId) -> Option<Resource> {
        let resource = self.clients.get_mut(&client_id)?.remove(id)?;
        self.domain_cleanup(client_id, &resource);
        Some(resource)
    }

    fn domain_cleanup(&mut self, client_id: ClientId, resource: &Resource) {
        match resource.kind {
            ResourceKind::Registry => {
                if let Some(client) = self.clients.get_mut(&client_id) {
                    client.registries.retain(|r| *r != resource.id);
                }
            },
            ResourceKind::ShmPool(pool) => shm::pool_destroyed(self, pool),
            ResourceKind::Buffer(buffer) => shm::buffer_destroyed(self, buffer),
            ResourceKind::Surface(key) => surface::surface_destroyed(self, key),
            ResourceKind::Subsurface(key) => surface::subsurface_resource_destroyed(self, key),
            ResourceKind::Region(region) => {
                self.regions.remove(&region);
            },
            ResourceKind::Pointer | ResourceKind::Keyboard | ResourceKind::Touch => {
                seat::sub_object_destroyed(self, client_id, resource.id);
            },
            ResourceKind::DataSource(key) => data_device::source_destroyed(self, key),
            ResourceKind::DataDevice => {
                data_device::device_destroyed(self, client_id, resource.id);
            },
            ResourceKind::DataOffer(key) => data_device::offer_destroyed(self, key),
            ResourceKind::Positioner(key) => xdg_shell::positioner_destroyed(self, key),
            ResourceKind::XdgSurface(key) => xdg_shell::xdg_surface_destroyed(self, key),
            ResourceKind::Toplevel(key) => xdg_shell::toplevel_destroyed(self, key),
            ResourceKind::Popup(key) => xdg_shell::popup_destroyed(self, key),
            ResourceKind::Decoration(toplevel) => {
                decoration::decoration_destroyed(self, toplevel);
            },
            ResourceKind::DmabufParams(key) => dmabuf::params_destroyed(self, key),
            ResourceKind::Viewport(key) => surface::viewport_destroyed(self, key),
            ResourceKind::FrameCallback(key) => {
                if let Some(surface) = self.surfaces.get_mut(&key)
                    && surface.frame_callback == Some(resource.id)
                {
                    surface.frame_callback = None;
                    self.scheduler.disarm(key);
                }
            },
            ResourceKind::Compositor
            | ResourceKind::Subcompositor
            | ResourceKind::Shm
            | ResourceKind::Seat
            | ResourceKind::Output(_)
            | ResourceKind::DataDeviceManager
            | ResourceKind::WmBase
            | ResourceKind::DecorationManager
            | ResourceKind::DmabufManager
            | ResourceKind::DmabufFeedback
            | ResourceKind::Viewporter => {},
        }
    }

    /// Wire error, best-effort flush, then teardown. Only the offending
    /// client is affected.
    pub fn post_protocol_error(&mut self, client_id: ClientId, error: ProtocolError) {
        warn!("{client_id}: {error}");
        if let Some(client) = self.clients.get_mut(&client_id) {
            client.send(
                MessageBuilder::new(ObjectId::DISPLAY, wl_display::EV_ERROR)
                    .object(error.object)
                    .uint(error.code)
                    .string(&error.message)
                    .build(),
            );
            client.conn.flush().debug(loc!()).ok();
        }
        self.teardown_client(client_id, "protocol error");
    }

    /// Full client teardown: resources destroyed in reverse creation order,
    /// every destructor exactly once, then the seat and scene catch up.
    pub fn teardown_client(&mut self, client_id: ClientId, reason: &str) {
        let Some(mut client) = self.clients.remove(&client_id) else {
            return;
        };
        info!("{client_id}: tearing down ({reason})");
        let resources = client.drain_reverse_creation();
        drop(client);
        for resource in &resources {
            self.domain_cleanup(client_id, resource);
        }
        self.seat.client_gone(client_id);
        self.data.devices.remove(&client_id);
        self.pings.remove(&client_id);
        self.publish_scene();
    }

    /// Ships the applied surface tree to the renderer.
    pub fn publish_scene(&mut self) {
        let snapshot = renderer::build_scene(self);
        self.renderer.present(snapshot);
    }

    pub fn handle_renderer_event(&mut self, event: RendererEvent) {
        match event {
            RendererEvent::Retired(buffer) => {
                // The renderer stopped reading; the replaced buffer may now
                // be released to its owner, exactly once.
                if let Some(record) = self.buffers.get_mut(&buffer)
                    && record.awaiting_retire
                    && record.held_by.is_none()
                {
                    record.send_release(&mut self.clients);
                }
                self.flush_clients();
            },
            RendererEvent::Presented(tick_ms) => {
                if self.scheduler.has_pending() {
                    scheduler::fire_frame_callbacks(self, tick_ms);
                    self.flush_clients();
                }
            },
        }
    }

    pub fn handle_platform_event(&mut self, event: PlatformEvent) {
        match event {
            PlatformEvent::PointerMotion {
                toplevel,
                position,
                time_ms,
            } => {
                if let Some(surface) = self.toplevel_surface(toplevel) {
                    seat::pointer_motion(self, surface, position, time_ms);
                }
            },
            PlatformEvent::PointerButton {
                button,
                pressed,
                time_ms,
            } => seat::pointer_button(self, button, pressed, time_ms),
            PlatformEvent::PointerAxis {
                horizontal,
                vertical,
                time_ms,
            } => seat::pointer_axis(self, horizontal, vertical, time_ms),
            PlatformEvent::Key {
                keycode,
                pressed,
                time_ms,
            } => seat::keyboard_key(self, keycode, pressed, time_ms),
            PlatformEvent::Modifiers(modifiers) => seat::update_modifiers(self, modifiers),
            PlatformEvent::TouchDown {
                toplevel,
                touch_id,
                position,
                time_ms,
            } => {
                if let Some(surface) = self.toplevel_surface(toplevel) {
                    seat::touch_down(self, surface, touch_id, position, time_ms);
                }
            },
            PlatformEvent::TouchUp {
                toplevel,
                touch_id,
                time_ms,
            } => {
                if let Some(surface) = self.toplevel_surface(toplevel) {
                    seat::touch_up(self, surface, touch_id, time_ms);
                }
            },
            PlatformEvent::TouchMotion {
                toplevel,
                touch_id,
                position,
                time_ms,
            } => {
                if let Some(surface) = self.toplevel_surface(toplevel) {
                    seat::touch_motion(self, surface, touch_id, position, time_ms);
                }
            },
            PlatformEvent::FocusChanged { toplevel } => {
                xdg_shell::host_focus_changed(self, toplevel);
            },
            PlatformEvent::WindowResized { toplevel, size } => {
                xdg_shell::host_resized(self, toplevel, size);
            },
            PlatformEvent::WindowCloseRequested { toplevel } => {
                xdg_shell::request_close(self, toplevel);
            },
            PlatformEvent::OutputChanged { output: id, info } => {
                output::update_output(self, id, info);
            },
        }
        self.flush_clients();
    }

    fn toplevel_surface(&self, toplevel: ToplevelId) -> Option<SurfaceId> {
        self.toplevels.get(&toplevel).map(|t| t.surface)
    }

    /// Flushes every client's queue; slow readers past the stall deadline
    /// are disconnected with NO_MEMORY.
    pub fn flush_clients(&mut self) {
        let now = Instant::now();
        let mut dead: Vec<(ClientId, &'static str)> = Vec::new();
        for (id, client) in self.clients.iter_mut() {
            if client.conn.flush().is_err() {
                dead.push((*id, "write error"));
                continue;
            }
            if let Some(stalled) = client.conn.stalled_for(now)
                && stalled > STALL_TIMEOUT
            {
                dead.push((*id, "write stall"));
            }
        }
        for (id, reason) in dead {
            if reason == "write stall" {
                self.post_protocol_error(id, ProtocolError::no_memory("client stopped reading"));
            } else {
                self.teardown_client(id, reason);
            }
        }
    }

    /// Periodic health pass: configure-ack aging (diagnostic only) and
    /// xdg_wm_base ping liveness.
    pub fn check_watchdogs(&mut self) {
        let now = Instant::now();
        for xdg in self.xdg_surfaces.values_mut() {
            if let Some(sent_at) = xdg.oldest_unacked_at
                && now.duration_since(sent_at) > CONFIGURE_ACK_DEADLINE
            {
                warn!(
                    "{}: configure serial {} unacked for {:?}",
                    xdg.client,
                    xdg.outstanding.front().copied().unwrap_or(0),
                    now.duration_since(sent_at)
                );
                // Re-arm so the log line repeats at deadline cadence, not
                // every watchdog tick.
                xdg.oldest_unacked_at = Some(now);
            }
        }

        let stale: Vec<ClientId> = self
            .pings
            .iter()
            .filter(|(_, (_, sent))| now.duration_since(*sent) > PING_DEADLINE)
            .map(|(id, _)| *id)
            .collect();
        for client_id in stale {
            warn!("{client_id}: xdg_wm_base ping unanswered, client is unresponsive");
            self.pings.remove(&client_id);
        }

        // One outstanding ping per wm_base-bound client.
        let candidates: Vec<(ClientId, ObjectId)> = self
            .clients
            .iter()
            .filter(|(id, _)| !self.pings.contains_key(id))
            .filter_map(|(id, client)| {
                client
                    .resources_where(|r| r.interface == Interface::XdgWmBase)
                    .first()
                    .map(|r| (*id, r.id))
            })
            .collect();
        for (client_id, wm_base) in candidates {
            let serial = self.seat.next_serial();
            if let Some(client) = self.clients.get_mut(&client_id) {
                client.send(
                    MessageBuilder::new(wm_base, xdg_wm_base::EV_PING)
                        .uint(serial)
                        .build(),
                );
                self.pings.insert(client_id, (serial, now));
            }
        }
        self.flush_clients();
    }
}

fn bind_listening_socket(path: &Path) -> Result<UnixListener> {
    if path.try_exists().location(loc!())? {
        fs::remove_file(path).location(loc!())?;
    }
    let old_umask = stat::umask(StatMode::S_IXUSR | StatMode::S_IRWXG | StatMode::S_IRWXO);
    let listener = UnixListener::bind(path).location(loc!())?;
    stat::umask(old_umask);
    listener.set_nonblocking(true).location(loc!())?;
    Ok(listener)
}

/// The `<socket>.lock` guard against a second server on the same name.
fn acquire_lock(path: &Path) -> Result<Flock<File>> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).location(loc!())?;
    }
    let file = File::options()
        .create(true)
        .read(true)
        .write(true)
        .truncate(false)
        .open(path)
        .with_context(loc!(), || format!("opening lock file {path:?}"))?;
    match Flock::lock(file, FlockArg::LockExclusiveNonblock) {
        Ok(lock) => Ok(lock),
        Err((_, e)) => bail!(
            "another server already owns {path:?} ({e}); is one running on this display name?"
        ),
    }
}

/// Runs the display until the loop is interrupted.
///
/// Wake-up sources, per the concurrency contract: client sockets, the
/// listeners, the platform input channel, renderer signals, and the
/// watchdog timer. Between wake-ups the engine runs to quiescence.
pub fn run(
    config: WayhostConfig,
    platform: Box<dyn PlatformHost>,
    platform_events: calloop::channel::Channel<PlatformEvent>,
) -> Result<()> {
    let socket_path = config.socket_path();
    let _lock = acquire_lock(&config.lock_path()).location(loc!())?;
    let listener = bind_listening_socket(&socket_path).location(loc!())?;
    info!(
        "listening on {socket_path:?}; export WAYLAND_DISPLAY={}",
        config.wayland_display
    );

    let tcp_listener = match config.tcp_listen_port {
        Some(port) => {
            warn!("TCP listener enabled on port {port}: this path has no authentication");
            let listener = std::net::TcpListener::bind(("127.0.0.1", port)).location(loc!())?;
            listener.set_nonblocking(true).location(loc!())?;
            Some(listener)
        },
        None => None,
    };

    let (renderer_link, render_commands) = RendererLink::channel();
    let (renderer_tx, renderer_channel) = calloop::channel::channel();
    let _renderer_thread = renderer::spawn_headless(render_commands, renderer_tx);

    let mut state = WayhostState::new(config, renderer_link, platform).location(loc!())?;

    let mut event_loop = EventLoop::<WayhostState>::try_new().location(loc!())?;
    let handle = event_loop.handle();

    let accept_handle = handle.clone();
    handle
        .insert_source(
            Generic::new(listener, Interest::READ, Mode::Level),
            move |_, listener, state| {
                accept_loop(state, &accept_handle, || {
                    listener.accept().map(|(stream, _)| stream.into())
                });
                Ok(PostAction::Continue)
            },
        )
        .map_err(|e| anyhow!("insert_source(listener) failed: {e:?}"))?;

    if let Some(tcp) = tcp_listener {
        let accept_handle = handle.clone();
        handle
            .insert_source(
                Generic::new(tcp, Interest::READ, Mode::Level),
                move |_, tcp, state| {
                    accept_loop(state, &accept_handle, || {
                        tcp.accept().map(|(stream, _)| stream.into())
                    });
                    Ok(PostAction::Continue)
                },
            )
            .map_err(|e| anyhow!("insert_source(tcp listener) failed: {e:?}"))?;
    }

    handle
        .insert_source(renderer_channel, |event, _, state| {
            if let CalloopChannelEvent::Msg(event) = event {
                state.handle_renderer_event(event);
            }
        })
        .map_err(|e| anyhow!("insert_source(renderer) failed: {e:?}"))?;

    handle
        .insert_source(platform_events, |event, _, state| {
            if let CalloopChannelEvent::Msg(event) = event {
                state.handle_platform_event(event);
            }
        })
        .map_err(|e| anyhow!("insert_source(platform) failed: {e:?}"))?;

    handle
        .insert_source(
            Timer::from_duration(WATCHDOG_INTERVAL),
            move |_, _, state| {
                state.check_watchdogs();
                TimeoutAction::ToDuration(WATCHDOG_INTERVAL)
            },
        )
        .map_err(|e| anyhow!("insert_source(watchdog) failed: {e:?}"))?;

    event_loop
        .run(None, &mut state, |state| {
            state.flush_clients();
        })
        .location(loc!())?;
    Ok(())
}

fn accept_loop(
    state: &mut WayhostState,
    handle: &calloop::LoopHandle<'static, WayhostState>,
    mut accept: impl FnMut() -> std::io::Result<OwnedFd>,
) {
    loop {
        match accept() {
            Ok(socket) => {
                register_client(state, handle, socket);
            },
            Err(e) if e.kind() == ErrorKind::WouldBlock => break,
            Err(e) => {
                warn!("accept failed: {e}");
                break;
            },
        }
    }
}

fn register_client(
    state: &mut WayhostState,
    handle: &calloop::LoopHandle<'static, WayhostState>,
    socket: OwnedFd,
) {
    let Some(client_id) = state.accept_client(socket) else {
        return;
    };
    // The source watches a dup so teardown elsewhere can close the real
    // socket; the dup then reports HUP and the source removes itself.
    let watch_fd = match state
        .clients
        .get(&client_id)
        .map(|c| c.conn.socket().try_clone())
    {
        Some(Ok(fd)) => fd,
        _ => {
            state.teardown_client(client_id, "fd dup failed");
            return;
        },
    };
    let result = handle.insert_source(
        Generic::new(watch_fd, Interest::READ, Mode::Level),
        move |_, _, state| {
            Ok(if state.handle_client_readable(client_id) {
                PostAction::Continue
            } else {
                PostAction::Remove
            })
        },
    );
    if let Err(e) = result {
        warn!("failed to register {client_id}: {e:?}");
        state.teardown_client(client_id, "loop registration failed");
    }
}
