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

//! End-to-end protocol scenarios: raw request bytes in over a socketpair,
//! decoded events out, with the headless renderer loop driven by hand.

use std::collections::VecDeque;
use std::fs::File;
use std::io::ErrorKind;
use std::io::IoSlice;
use std::io::Read;
use std::io::Write;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::Mutex;

use nix::sys::socket::ControlMessage;
use nix::sys::socket::MsgFlags;
use nix::sys::socket::sendmsg;

use wayhost::config::WayhostConfig;
use wayhost::platform::PlatformCall;
use wayhost::platform::PlatformEvent;
use wayhost::platform::RecordingPlatform;
use wayhost::protocol::DisplayError;
use wayhost::protocol::ObjectId;
use wayhost::protocol::ShmError;
use wayhost::protocol::geometry::Point;
use wayhost::protocol::interfaces::wl_buffer;
use wayhost::protocol::interfaces::wl_callback;
use wayhost::protocol::interfaces::wl_compositor;
use wayhost::protocol::interfaces::wl_display;
use wayhost::protocol::interfaces::wl_pointer;
use wayhost::protocol::interfaces::wl_registry;
use wayhost::protocol::interfaces::wl_seat;
use wayhost::protocol::interfaces::wl_shm;
use wayhost::protocol::interfaces::wl_shm_pool;
use wayhost::protocol::interfaces::wl_surface;
use wayhost::protocol::interfaces::xdg_surface;
use wayhost::protocol::interfaces::xdg_toplevel;
use wayhost::protocol::interfaces::xdg_wm_base;
use wayhost::protocol::interfaces::zxdg_decoration_manager_v1;
use wayhost::protocol::interfaces::zxdg_toplevel_decoration_v1;
use wayhost::protocol::wire::HEADER_SIZE;
use wayhost::protocol::wire::MessageBuilder;
use wayhost::protocol::wire::MessageHeader;
use wayhost::renderer::RenderCommand;
use wayhost::renderer::RendererEvent;
use wayhost::renderer::RendererLink;
use wayhost::renderer::SceneBuffer;
use wayhost::server::WayhostState;
use wayhost::server::client::ClientId;
use wayhost::server::client::ResourceKind;
use wayhost::shm::BufferId;

/// One decoded server event.
#[derive(Debug, Clone)]
struct Event {
    object: ObjectId,
    opcode: u16,
    args: Vec<u8>,
}

impl Event {
    fn uint(&self, index: usize) -> u32 {
        u32::from_ne_bytes(self.args[index * 4..index * 4 + 4].try_into().unwrap())
    }

    fn int(&self, index: usize) -> i32 {
        self.uint(index) as i32
    }
}

struct Peer {
    id: ClientId,
    sock: UnixStream,
    pending: VecDeque<Event>,
    inbuf: Vec<u8>,
}

struct Harness {
    state: WayhostState,
    render_rx: crossbeam_channel::Receiver<RenderCommand>,
    platform_calls: Arc<Mutex<Vec<PlatformCall>>>,
}

impl Harness {
    fn new() -> Self {
        Self::with_config(WayhostConfig::default())
    }

    fn with_config(config: WayhostConfig) -> Self {
        let (link, render_rx) = RendererLink::channel();
        let (platform, platform_calls) = RecordingPlatform::new();
        let state = WayhostState::new(config, link, Box::new(platform)).unwrap();
        Self {
            state,
            render_rx,
            platform_calls,
        }
    }

    fn connect(&mut self) -> Peer {
        let (ours, theirs) = UnixStream::pair().unwrap();
        theirs.set_nonblocking(true).unwrap();
        let id = self.state.accept_client(ours.into()).unwrap();
        Peer {
            id,
            sock: theirs,
            pending: VecDeque::new(),
            inbuf: Vec::new(),
        }
    }

    /// Writes request bytes and runs the dispatch turn.
    fn send(&mut self, peer: &mut Peer, msg: wayhost::protocol::wire::WireMessage) {
        peer.sock.write_all(&msg.bytes).unwrap();
        self.state.handle_client_readable(peer.id);
    }

    /// Like send, but carries an fd as ancillary data.
    fn send_with_fd(
        &mut self,
        peer: &mut Peer,
        msg: wayhost::protocol::wire::WireMessage,
        fd: &OwnedFd,
    ) {
        let raw = [fd.as_raw_fd()];
        let iov = [IoSlice::new(&msg.bytes)];
        let cmsg = [ControlMessage::ScmRights(&raw)];
        sendmsg::<()>(
            peer.sock.as_raw_fd(),
            &iov,
            &cmsg,
            MsgFlags::empty(),
            None,
        )
        .unwrap();
        self.state.handle_client_readable(peer.id);
    }

    /// Drains and decodes everything the server has queued for this peer.
    fn events(&mut self, peer: &mut Peer) -> Vec<Event> {
        self.state.flush_clients();
        let mut buf = [0u8; 4096];
        loop {
            match peer.sock.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => peer.inbuf.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => panic!("peer read failed: {e}"),
            }
        }
        let mut events = Vec::new();
        while let Some(header) = MessageHeader::parse(&peer.inbuf) {
            let len = usize::from(header.len);
            if peer.inbuf.len() < len {
                break;
            }
            events.push(Event {
                object: header.object,
                opcode: header.opcode,
                args: peer.inbuf[HEADER_SIZE..len].to_vec(),
            });
            peer.inbuf.drain(..len);
        }
        peer.pending.extend(events);
        std::mem::take(&mut peer.pending).into()
    }

    fn platform_calls(&self) -> Vec<PlatformCall> {
        self.platform_calls.lock().unwrap().clone()
    }

    fn drain_presents(&mut self) -> Vec<RenderCommand> {
        self.render_rx.try_iter().collect()
    }

    /// The global name advertised for an interface.
    fn global_name(&self, interface: &str) -> u32 {
        self.state
            .globals
            .iter()
            .find(|g| g.interface.name() == interface)
            .unwrap_or_else(|| panic!("no global {interface}"))
            .name
    }

    /// The engine-side buffer key behind a client's wl_buffer id.
    fn buffer_key(&self, peer: &Peer, id: u32) -> BufferId {
        let client = self.state.clients.get(&peer.id).unwrap();
        match client.lookup(ObjectId(id)).unwrap().kind {
            ResourceKind::Buffer(key) => key,
            other => panic!("object {id} is {other:?}, not a buffer"),
        }
    }
}

/// An anonymous fd of `size` zero bytes, standing in for a client shm pool.
fn shm_fd(size: u64) -> OwnedFd {
    let fd = tempfile_fd();
    let file = File::from(fd);
    file.set_len(size).unwrap();
    file.into()
}

fn tempfile_fd() -> OwnedFd {
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let path = std::env::temp_dir().join(format!("wayhost-scenario-{}-{n}", std::process::id()));
    let file = File::options()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path)
        .unwrap();
    std::fs::remove_file(&path).unwrap();
    file.into()
}

// Client-side request builders. Object ids are chosen by each test.

fn get_registry(id: u32) -> wayhost::protocol::wire::WireMessage {
    MessageBuilder::new(ObjectId::DISPLAY, wl_display::GET_REGISTRY)
        .uint(id)
        .build()
}

fn bind(registry: u32, name: u32, interface: &str, version: u32, id: u32) -> wayhost::protocol::wire::WireMessage {
    MessageBuilder::new(ObjectId(registry), wl_registry::BIND)
        .uint(name)
        .string(interface)
        .uint(version)
        .uint(id)
        .build()
}

/// Standard preamble: registry, compositor v4, xdg_wm_base v4, wl_shm.
/// Object ids: 2 registry, 3 compositor, 4 wm_base, 5 shm.
fn bind_core(harness: &mut Harness, peer: &mut Peer) {
    harness.send(peer, get_registry(2));
    let compositor = harness.global_name("wl_compositor");
    let wm_base = harness.global_name("xdg_wm_base");
    let shm = harness.global_name("wl_shm");
    harness.send(peer, bind(2, compositor, "wl_compositor", 4, 3));
    harness.send(peer, bind(2, wm_base, "xdg_wm_base", 4, 4));
    harness.send(peer, bind(2, shm, "wl_shm", 1, 5));
}

/// Surface 6, xdg_surface 7, toplevel 8; acks the initial configure and
/// returns its serial.
fn map_toplevel(harness: &mut Harness, peer: &mut Peer) -> u32 {
    harness.send(
        peer,
        MessageBuilder::new(ObjectId(3), wl_compositor::CREATE_SURFACE)
            .uint(6)
            .build(),
    );
    harness.send(
        peer,
        MessageBuilder::new(ObjectId(4), xdg_wm_base::GET_XDG_SURFACE)
            .uint(7)
            .uint(6)
            .build(),
    );
    harness.send(
        peer,
        MessageBuilder::new(ObjectId(7), xdg_surface::GET_TOPLEVEL)
            .uint(8)
            .build(),
    );
    let events = harness.events(peer);
    let configure = events
        .iter()
        .find(|e| e.object == ObjectId(7) && e.opcode == xdg_surface::EV_CONFIGURE)
        .expect("initial xdg_surface.configure");
    let serial = configure.uint(0);
    harness.send(
        peer,
        MessageBuilder::new(ObjectId(7), xdg_surface::ACK_CONFIGURE)
            .uint(serial)
            .build(),
    );
    serial
}

/// Pool `pool_id` of `size` bytes plus one buffer `buffer_id`.
#[allow(clippy::too_many_arguments)]
fn create_pool_and_buffer(
    harness: &mut Harness,
    peer: &mut Peer,
    pool_id: u32,
    size: i32,
    buffer_id: u32,
    width: i32,
    height: i32,
    stride: i32,
) {
    let fd = shm_fd(size as u64);
    harness.send_with_fd(
        peer,
        MessageBuilder::new(ObjectId(5), wl_shm::CREATE_POOL)
            .uint(pool_id)
            .int(size)
            .build(),
        &fd,
    );
    harness.send(
        peer,
        MessageBuilder::new(ObjectId(pool_id), wl_shm_pool::CREATE_BUFFER)
            .uint(buffer_id)
            .int(0)
            .int(width)
            .int(height)
            .int(stride)
            .uint(0) // argb8888
            .build(),
    );
}

fn attach_damage_commit(harness: &mut Harness, peer: &mut Peer, surface: u32, buffer: u32) {
    harness.send(
        peer,
        MessageBuilder::new(ObjectId(surface), wl_surface::ATTACH)
            .uint(buffer)
            .int(0)
            .int(0)
            .build(),
    );
    harness.send(
        peer,
        MessageBuilder::new(ObjectId(surface), wl_surface::DAMAGE)
            .int(0)
            .int(0)
            .int(i32::MAX)
            .int(i32::MAX)
            .build(),
    );
    harness.send(
        peer,
        MessageBuilder::new(ObjectId(surface), wl_surface::COMMIT).build(),
    );
}

#[test]
fn s1_happy_path_toplevel() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);
    harness.drain_presents();

    create_pool_and_buffer(&mut harness, &mut peer, 9, 640 * 480 * 4, 10, 640, 480, 640 * 4);
    attach_damage_commit(&mut harness, &mut peer, 6, 10);

    // Native window at the buffer size, CSD.
    assert!(harness.platform_calls().iter().any(|c| matches!(
        c,
        PlatformCall::CreateWindow {
            width: 640,
            height: 480,
            server_side_decorations: false,
            ..
        }
    )));

    // Exactly one present with one 640x480 surface.
    let presents = harness.drain_presents();
    assert_eq!(presents.len(), 1);
    let RenderCommand::Present(snapshot) = &presents[0] else {
        panic!("expected a present");
    };
    assert_eq!(snapshot.surfaces.len(), 1);
    assert_eq!(snapshot.surfaces[0].geometry.size.w, 640);
    assert_eq!(snapshot.surfaces[0].geometry.size.h, 480);

    // No release before the renderer retires anything.
    let premature: Vec<_> = harness
        .events(&mut peer)
        .into_iter()
        .filter(|e| e.object == ObjectId(10) && e.opcode == wl_buffer::EV_RELEASE)
        .collect();
    assert!(premature.is_empty());

    // Second buffer replaces the first; after the retire ack the first one
    // is released, exactly once.
    let first_key = harness.buffer_key(&peer, 10);
    create_pool_and_buffer(&mut harness, &mut peer, 11, 640 * 480 * 4, 12, 640, 480, 640 * 4);
    attach_damage_commit(&mut harness, &mut peer, 6, 12);
    assert_eq!(harness.drain_presents().len(), 1);

    harness
        .state
        .handle_renderer_event(RendererEvent::Retired(first_key));
    let releases: Vec<_> = harness
        .events(&mut peer)
        .into_iter()
        .filter(|e| e.object == ObjectId(10) && e.opcode == wl_buffer::EV_RELEASE)
        .collect();
    assert_eq!(releases.len(), 1);

    // A second retire for the same buffer must not double-release.
    harness
        .state
        .handle_renderer_event(RendererEvent::Retired(first_key));
    let releases: Vec<_> = harness
        .events(&mut peer)
        .into_iter()
        .filter(|e| e.opcode == wl_buffer::EV_RELEASE)
        .collect();
    assert!(releases.is_empty());
}

#[test]
fn s2_csd_default_initial_configure() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);

    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(3), wl_compositor::CREATE_SURFACE)
            .uint(6)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(4), xdg_wm_base::GET_XDG_SURFACE)
            .uint(7)
            .uint(6)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(7), xdg_surface::GET_TOPLEVEL)
            .uint(8)
            .build(),
    );

    let events = harness.events(&mut peer);
    // v4 handshake order: configure_bounds, toplevel.configure, then the
    // serial.
    let bounds = events
        .iter()
        .position(|e| e.object == ObjectId(8) && e.opcode == xdg_toplevel::EV_CONFIGURE_BOUNDS)
        .expect("configure_bounds");
    let configure = events
        .iter()
        .position(|e| e.object == ObjectId(8) && e.opcode == xdg_toplevel::EV_CONFIGURE)
        .expect("toplevel.configure");
    let serial = events
        .iter()
        .position(|e| e.object == ObjectId(7) && e.opcode == xdg_surface::EV_CONFIGURE)
        .expect("xdg_surface.configure");
    assert!(bounds < configure && configure < serial);

    let configure = &events[configure];
    assert_eq!(configure.int(0), 0, "CSD initial width must be 0");
    assert_eq!(configure.int(1), 0, "CSD initial height must be 0");
    // states array: length prefix then u32 values; activated only.
    let states_len = configure.uint(2) as usize;
    assert_eq!(states_len, 4);
    assert_eq!(configure.uint(3), 4, "activated");

    assert_eq!(events[serial].uint(0), 1, "initial serial is 1");
}

#[test]
fn s3_force_ssd_overrides_client_request() {
    let mut harness = Harness::with_config(WayhostConfig {
        force_server_side_decorations: true,
        ..WayhostConfig::default()
    });
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);

    let decoration_manager = harness.global_name("zxdg_decoration_manager_v1");
    harness.send(
        &mut peer,
        bind(2, decoration_manager, "zxdg_decoration_manager_v1", 1, 9),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(9), zxdg_decoration_manager_v1::GET_TOPLEVEL_DECORATION)
            .uint(10)
            .uint(8)
            .build(),
    );
    harness.events(&mut peer);

    // Client asks for CSD; forced SSD answers with server-side followed by a
    // fresh xdg_surface.configure.
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(10), zxdg_toplevel_decoration_v1::SET_MODE)
            .uint(1) // client-side
            .build(),
    );
    let events = harness.events(&mut peer);
    let mode = events
        .iter()
        .position(|e| e.object == ObjectId(10) && e.opcode == zxdg_toplevel_decoration_v1::EV_CONFIGURE)
        .expect("decoration.configure");
    assert_eq!(events[mode].uint(0), 2, "server-side wins");
    let configure = events
        .iter()
        .position(|e| e.object == ObjectId(7) && e.opcode == xdg_surface::EV_CONFIGURE)
        .expect("follow-up xdg_surface.configure");
    assert!(mode < configure);
    let serial = events[configure].uint(0);

    // The ack is accepted and provokes nothing further.
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(7), xdg_surface::ACK_CONFIGURE)
            .uint(serial)
            .build(),
    );
    let quiet: Vec<_> = harness
        .events(&mut peer)
        .into_iter()
        .filter(|e| e.object == ObjectId(10))
        .collect();
    assert!(quiet.is_empty());
    assert!(harness.state.clients.contains_key(&peer.id));
}

#[test]
fn s4_pool_outlives_pool_resource() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);
    harness.drain_presents();

    // 4096-byte pool, one 32x32x4 buffer, then destroy the pool resource.
    create_pool_and_buffer(&mut harness, &mut peer, 9, 4096, 10, 32, 32, 128);
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(9), wl_shm_pool::DESTROY).build(),
    );
    attach_damage_commit(&mut harness, &mut peer, 6, 10);

    let presents = harness.drain_presents();
    assert_eq!(presents.len(), 1);
    let RenderCommand::Present(snapshot) = &presents[0] else {
        panic!("expected a present");
    };
    let SceneBuffer::Shm { memory, .. } = &snapshot.surfaces[0].content else {
        panic!("expected an shm buffer");
    };
    // The mapping is still readable even though the pool resource is gone.
    memory.with_slice(0, 4096, |s| assert_eq!(s.len(), 4096)).unwrap();

    // Replace and release; the old buffer then dies cleanly.
    let first_key = harness.buffer_key(&peer, 10);
    create_pool_and_buffer(&mut harness, &mut peer, 11, 4096, 12, 32, 32, 128);
    attach_damage_commit(&mut harness, &mut peer, 6, 12);
    harness
        .state
        .handle_renderer_event(RendererEvent::Retired(first_key));
    let releases: Vec<_> = harness
        .events(&mut peer)
        .into_iter()
        .filter(|e| e.object == ObjectId(10) && e.opcode == wl_buffer::EV_RELEASE)
        .collect();
    assert_eq!(releases.len(), 1);
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(10), wl_buffer::DESTROY).build(),
    );
    assert!(!harness.state.buffers.contains_key(&first_key));
}

#[test]
fn s5_invalid_stride_disconnects_only_offender() {
    let mut harness = Harness::new();
    let mut bystander = harness.connect();
    let mut offender = harness.connect();
    bind_core(&mut harness, &mut bystander);
    bind_core(&mut harness, &mut offender);

    let fd = shm_fd(4096);
    harness.send_with_fd(
        &mut offender,
        MessageBuilder::new(ObjectId(5), wl_shm::CREATE_POOL)
            .uint(9)
            .int(4096)
            .build(),
        &fd,
    );
    // stride=10 < width*4.
    harness.send(
        &mut offender,
        MessageBuilder::new(ObjectId(9), wl_shm_pool::CREATE_BUFFER)
            .uint(10)
            .int(0)
            .int(100)
            .int(10)
            .int(10)
            .uint(0)
            .build(),
    );

    let events = harness.events(&mut offender);
    let error = events
        .iter()
        .find(|e| e.object == ObjectId::DISPLAY && e.opcode == wl_display::EV_ERROR)
        .expect("display.error");
    // args: object id, code, message.
    assert_eq!(error.uint(0), 9);
    assert_eq!(error.uint(1), u32::from(ShmError::InvalidStride));
    assert!(!harness.state.clients.contains_key(&offender.id));
    assert!(harness.state.clients.contains_key(&bystander.id));
}

#[test]
fn s6_pointer_button_dedup() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);

    let seat = harness.global_name("wl_seat");
    harness.send(&mut peer, bind(2, seat, "wl_seat", 7, 9));
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(9), wl_seat::GET_POINTER)
            .uint(10)
            .build(),
    );

    // Map the window so the toplevel routes input.
    create_pool_and_buffer(&mut harness, &mut peer, 11, 64 * 64 * 4, 12, 64, 64, 256);
    attach_damage_commit(&mut harness, &mut peer, 6, 12);
    let toplevel_id = *harness.state.toplevels.keys().next().unwrap();
    harness.state.handle_platform_event(PlatformEvent::PointerMotion {
        toplevel: toplevel_id,
        position: Point { x: 5.0, y: 5.0 },
        time_ms: 1,
    });
    harness.events(&mut peer);

    // Two presses without a release, then one release, then a stray one.
    for (pressed, time) in [(true, 2), (true, 3), (false, 4), (false, 5)] {
        harness.state.handle_platform_event(PlatformEvent::PointerButton {
            button: 272,
            pressed,
            time_ms: time,
        });
    }

    let buttons: Vec<Event> = harness
        .events(&mut peer)
        .into_iter()
        .filter(|e| e.object == ObjectId(10) && e.opcode == wl_pointer::EV_BUTTON)
        .collect();
    assert_eq!(buttons.len(), 2);
    // button args: serial, time, button, state.
    assert_eq!(buttons[0].uint(3), 1, "press first");
    assert_eq!(buttons[1].uint(3), 0, "then release");
    assert!(buttons[0].uint(0) < buttons[1].uint(0), "serials increase");
}

#[test]
fn s7_frame_callback_coalescing() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);

    // A second toplevel on the same client: surface 20, xdg 21, toplevel 22.
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(3), wl_compositor::CREATE_SURFACE)
            .uint(20)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(4), xdg_wm_base::GET_XDG_SURFACE)
            .uint(21)
            .uint(20)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(21), xdg_surface::GET_TOPLEVEL)
            .uint(22)
            .build(),
    );
    let events = harness.events(&mut peer);
    let serial = events
        .iter()
        .filter(|e| e.object == ObjectId(21) && e.opcode == xdg_surface::EV_CONFIGURE)
        .next_back()
        .unwrap()
        .uint(0);
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(21), xdg_surface::ACK_CONFIGURE)
            .uint(serial)
            .build(),
    );

    create_pool_and_buffer(&mut harness, &mut peer, 30, 64 * 64 * 4, 31, 64, 64, 256);
    create_pool_and_buffer(&mut harness, &mut peer, 32, 64 * 64 * 4, 33, 64, 64, 256);

    for (surface, callback, buffer) in [(6u32, 40u32, 31u32), (20, 41, 33)] {
        harness.send(
            &mut peer,
            MessageBuilder::new(ObjectId(surface), wl_surface::FRAME)
                .uint(callback)
                .build(),
        );
        attach_damage_commit(&mut harness, &mut peer, surface, buffer);
    }
    harness.events(&mut peer);

    harness
        .state
        .handle_renderer_event(RendererEvent::Presented(777));
    let events = harness.events(&mut peer);
    let dones: Vec<&Event> = events
        .iter()
        .filter(|e| e.opcode == wl_callback::EV_DONE && (e.object == ObjectId(40) || e.object == ObjectId(41)))
        .collect();
    assert_eq!(dones.len(), 2, "both callbacks fire in one pass");
    assert_eq!(dones[0].uint(0), 777);
    assert_eq!(dones[1].uint(0), 777, "timestamps are equal");

    // Both callback resources are gone afterwards.
    let client = harness.state.clients.get(&peer.id).unwrap();
    assert!(client.lookup(ObjectId(40)).is_none());
    assert!(client.lookup(ObjectId(41)).is_none());

    // With nothing pending, another tick fires nothing.
    harness
        .state
        .handle_renderer_event(RendererEvent::Presented(778));
    let events = harness.events(&mut peer);
    assert!(events.iter().all(|e| e.opcode != wl_callback::EV_DONE));
}

#[test]
fn empty_commit_produces_no_events() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);
    harness.events(&mut peer);
    harness.drain_presents();

    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(6), wl_surface::COMMIT).build(),
    );
    assert!(harness.events(&mut peer).is_empty());
    assert!(harness.drain_presents().is_empty());
}

#[test]
fn double_ack_is_a_noop_but_unknown_serial_is_fatal() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    let serial = map_toplevel(&mut harness, &mut peer);

    // Acking the same serial again is accepted.
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(7), xdg_surface::ACK_CONFIGURE)
            .uint(serial)
            .build(),
    );
    assert!(harness.state.clients.contains_key(&peer.id));

    // Acking a serial that was never sent is fatal.
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(7), xdg_surface::ACK_CONFIGURE)
            .uint(serial + 100)
            .build(),
    );
    assert!(!harness.state.clients.contains_key(&peer.id));
}

#[test]
fn destroying_a_dead_object_is_an_error_not_a_crash() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);

    create_pool_and_buffer(&mut harness, &mut peer, 9, 4096, 10, 32, 32, 128);
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(10), wl_buffer::DESTROY).build(),
    );
    // delete_id lets the client know id 10 is free.
    let events = harness.events(&mut peer);
    assert!(events.iter().any(|e| {
        e.object == ObjectId::DISPLAY && e.opcode == wl_display::EV_DELETE_ID && e.uint(0) == 10
    }));

    // A second destroy of the same id names a dead object.
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(10), wl_buffer::DESTROY).build(),
    );
    let events = harness.events(&mut peer);
    let error = events
        .iter()
        .find(|e| e.object == ObjectId::DISPLAY && e.opcode == wl_display::EV_ERROR)
        .expect("display.error");
    assert_eq!(error.uint(1), u32::from(DisplayError::InvalidObject));
    assert!(!harness.state.clients.contains_key(&peer.id));
}

#[test]
fn client_teardown_destroys_everything_exactly_once() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);
    create_pool_and_buffer(&mut harness, &mut peer, 9, 4096, 10, 32, 32, 128);
    attach_damage_commit(&mut harness, &mut peer, 6, 10);
    assert!(!harness.state.surfaces.is_empty());
    assert!(!harness.state.buffers.is_empty());

    // EOF from the peer side.
    drop(peer.sock);
    harness.state.handle_client_readable(peer.id);

    assert!(harness.state.clients.is_empty());
    assert!(harness.state.surfaces.is_empty());
    assert!(harness.state.buffers.is_empty());
    assert!(harness.state.pools.is_empty());
    assert!(harness.state.toplevels.is_empty());
    assert!(harness.state.xdg_surfaces.is_empty());
    // The native window went away with the toplevel.
    assert!(harness
        .platform_calls()
        .iter()
        .any(|c| matches!(c, PlatformCall::DestroyWindow { .. })));
}

#[test]
fn unconfigured_buffer_commit_is_fatal() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);

    // Toplevel created but the initial configure is never acked.
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(3), wl_compositor::CREATE_SURFACE)
            .uint(6)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(4), xdg_wm_base::GET_XDG_SURFACE)
            .uint(7)
            .uint(6)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(7), xdg_surface::GET_TOPLEVEL)
            .uint(8)
            .build(),
    );
    create_pool_and_buffer(&mut harness, &mut peer, 9, 4096, 10, 32, 32, 128);
    attach_damage_commit(&mut harness, &mut peer, 6, 10);
    assert!(!harness.state.clients.contains_key(&peer.id));
}

#[test]
fn frame_request_replaces_previous_callback_silently() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);
    harness.events(&mut peer);

    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(6), wl_surface::FRAME).uint(40).build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(6), wl_surface::FRAME).uint(41).build(),
    );
    create_pool_and_buffer(&mut harness, &mut peer, 9, 4096, 10, 32, 32, 128);
    attach_damage_commit(&mut harness, &mut peer, 6, 10);
    harness
        .state
        .handle_renderer_event(RendererEvent::Presented(99));

    let events = harness.events(&mut peer);
    // 40 was replaced: it gets delete_id but never done.
    assert!(events.iter().any(|e| {
        e.object == ObjectId::DISPLAY && e.opcode == wl_display::EV_DELETE_ID && e.uint(0) == 40
    }));
    assert!(!events
        .iter()
        .any(|e| e.object == ObjectId(40) && e.opcode == wl_callback::EV_DONE));
    assert!(events
        .iter()
        .any(|e| e.object == ObjectId(41) && e.opcode == wl_callback::EV_DONE));
}

#[test]
fn subsurface_sync_defers_until_parent_commit() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);

    create_pool_and_buffer(&mut harness, &mut peer, 9, 64 * 64 * 4, 10, 64, 64, 256);
    attach_damage_commit(&mut harness, &mut peer, 6, 10);
    harness.drain_presents();

    // Child surface 14, wl_subsurface 15, buffer 16 (from pool 13).
    let subcompositor = harness.global_name("wl_subcompositor");
    harness.send(&mut peer, bind(2, subcompositor, "wl_subcompositor", 1, 12));
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(3), wl_compositor::CREATE_SURFACE)
            .uint(14)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(12), wayhost::protocol::interfaces::wl_subcompositor::GET_SUBSURFACE)
            .uint(15)
            .uint(14)
            .uint(6)
            .build(),
    );
    create_pool_and_buffer(&mut harness, &mut peer, 13, 64 * 64 * 4, 16, 64, 64, 256);

    // Sync mode (the default): the child commit caches and publishes
    // nothing.
    attach_damage_commit(&mut harness, &mut peer, 14, 16);
    assert!(harness.drain_presents().is_empty());

    // The parent commit applies the cache and the child appears.
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(6), wl_surface::COMMIT).build(),
    );
    let presents = harness.drain_presents();
    assert_eq!(presents.len(), 1);
    let RenderCommand::Present(snapshot) = &presents[0] else {
        panic!("expected a present");
    };
    assert_eq!(snapshot.surfaces.len(), 2, "parent and child both render");

    // Desync: a child commit now takes effect immediately.
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(15), wayhost::protocol::interfaces::wl_subsurface::SET_DESYNC)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(14), wl_surface::DAMAGE)
            .int(0)
            .int(0)
            .int(8)
            .int(8)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(14), wl_surface::COMMIT).build(),
    );
    assert_eq!(harness.drain_presents().len(), 1);
}

#[test]
fn viewport_destination_overrides_buffer_size() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);
    map_toplevel(&mut harness, &mut peer);

    let viewporter = harness.global_name("wp_viewporter");
    harness.send(&mut peer, bind(2, viewporter, "wp_viewporter", 1, 9));
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(9), wayhost::protocol::interfaces::wp_viewporter::GET_VIEWPORT)
            .uint(10)
            .uint(6)
            .build(),
    );
    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(10), wayhost::protocol::interfaces::wp_viewport::SET_DESTINATION)
            .int(320)
            .int(240)
            .build(),
    );
    create_pool_and_buffer(&mut harness, &mut peer, 11, 64 * 64 * 4, 12, 64, 64, 256);
    attach_damage_commit(&mut harness, &mut peer, 6, 12);

    let presents = harness.drain_presents();
    let RenderCommand::Present(snapshot) = presents.last().unwrap() else {
        panic!("expected a present");
    };
    assert_eq!(snapshot.surfaces[0].geometry.size.w, 320);
    assert_eq!(snapshot.surfaces[0].geometry.size.h, 240);
}

#[test]
fn seat_keymap_and_capabilities_on_bind() {
    let mut harness = Harness::new();
    let mut peer = harness.connect();
    bind_core(&mut harness, &mut peer);

    let seat = harness.global_name("wl_seat");
    harness.send(&mut peer, bind(2, seat, "wl_seat", 7, 9));
    let events = harness.events(&mut peer);
    let caps = events
        .iter()
        .find(|e| e.object == ObjectId(9) && e.opcode == wl_seat::EV_CAPABILITIES)
        .expect("capabilities");
    assert_eq!(caps.uint(0), 1 | 2 | 4);

    harness.send(
        &mut peer,
        MessageBuilder::new(ObjectId(9), wl_seat::GET_KEYBOARD)
            .uint(10)
            .build(),
    );
    let events = harness.events(&mut peer);
    let keymap = events
        .iter()
        .find(|e| e.object == ObjectId(10) && e.opcode == 0)
        .expect("keymap event");
    assert_eq!(keymap.uint(0), 1, "xkb_v1 format");
    assert!(keymap.uint(1) > 0, "keymap has a size");
}
