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

//! Seat state and input routing: pointer/keyboard/touch sub-objects, focus
//! tracking, the serial allocator, keymap distribution, and the pressed-
//! button bookkeeping that shields clients from host-side event glitches.

use std::collections::HashMap;
use std::collections::HashSet;
use std::os::fd::OwnedFd;

use num_enum::IntoPrimitive;

use crate::prelude::*;
use crate::protocol::Interface;
use crate::protocol::ObjectId;
use crate::protocol::PointerError;
use crate::protocol::ProtocolError;
use crate::protocol::geometry::Point;
use crate::protocol::interfaces::wl_keyboard;
use crate::protocol::interfaces::wl_pointer;
use crate::protocol::interfaces::wl_seat;
use crate::protocol::interfaces::wl_touch;
use crate::protocol::wire::ArgReader;
use crate::protocol::wire::Fixed;
use crate::protocol::wire::MessageBuilder;
use crate::server::WayhostState;
use crate::server::client::Client;
use crate::server::client::ClientId;
use crate::server::client::Resource;
use crate::server::client::ResourceKind;
use crate::surface::Role;
use crate::surface::SurfaceId;

/// How far behind the current counter a client-presented serial may be.
pub const SERIAL_WINDOW: u32 = 4096;

pub mod capability {
    pub const POINTER: u32 = 1;
    pub const KEYBOARD: u32 = 2;
    pub const TOUCH: u32 = 4;
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum ButtonState {
    Released = 0,
    Pressed = 1,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum KeyState {
    Released = 0,
    Pressed = 1,
}

/// Lowest button code tracked in the pressed bitmap (BTN_LEFT).
const BUTTON_BASE: u32 = 0x110;

// A static pc105/us keymap; enough for Linux clients to translate our evdev
// keycodes. Compiled clients feed this straight to xkbcommon.
const KEYMAP_TEXT: &str = "xkb_keymap {\n\
    \x20 xkb_keycodes  { include \"evdev+aliases(qwerty)\" };\n\
    \x20 xkb_types     { include \"complete\" };\n\
    \x20 xkb_compat    { include \"complete\" };\n\
    \x20 xkb_symbols   { include \"pc+us\" };\n\
    \x20 xkb_geometry  { include \"pc(pc105)\" };\n\
};\n";

#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct ModifierState {
    pub depressed: u32,
    pub latched: u32,
    pub locked: u32,
    pub group: u32,
}

/// Per-client seat sub-objects and button state.
#[derive(Debug, Default)]
struct SeatClient {
    pointer: Option<(ObjectId, u32)>,
    keyboard: Option<(ObjectId, u32)>,
    touch: Option<(ObjectId, u32)>,
    pressed_buttons: u32,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct CursorImage {
    pub surface: SurfaceId,
    pub hotspot: Point<i32>,
}

#[derive(Debug)]
pub struct Seat {
    serial: u32,
    clients: HashMap<ClientId, SeatClient>,
    pub keyboard_focus: Option<SurfaceId>,
    pub pointer_focus: Option<SurfaceId>,
    pub modifiers: ModifierState,
    pub cursor: Option<CursorImage>,
    pressed_keys: HashSet<u32>,
    keymap_fd: OwnedFd,
    keymap_size: u32,
}

impl Seat {
    pub fn new() -> Result<Self> {
        // One NUL-terminated copy in an anonymous file; every get_keyboard
        // duplicates the fd.
        let mut bytes = KEYMAP_TEXT.as_bytes().to_vec();
        bytes.push(0);
        let keymap_fd = crate::utils::anon_file("wayhost-keymap", &bytes).location(loc!())?;
        Ok(Self {
            serial: 0,
            clients: HashMap::new(),
            keyboard_focus: None,
            pointer_focus: None,
            modifiers: ModifierState::default(),
            cursor: None,
            pressed_keys: HashSet::new(),
            keymap_fd,
            keymap_size: bytes.len() as u32,
        })
    }

    /// Strictly increasing; every emitted input event burns one.
    pub fn next_serial(&mut self) -> u32 {
        self.serial = self.serial.wrapping_add(1);
        self.serial
    }

    pub fn current_serial(&self) -> u32 {
        self.serial
    }

    /// Accepts any serial the seat handed out within the grace window.
    pub fn serial_is_recent(&self, serial: u32) -> bool {
        let distance = self.serial.wrapping_sub(serial);
        distance < SERIAL_WINDOW
    }

    pub fn pressed_button_count(&self, client: ClientId) -> u32 {
        self.clients
            .get(&client)
            .map(|c| c.pressed_buttons.count_ones())
            .unwrap_or(0)
    }

    pub fn surface_destroyed(&mut self, key: SurfaceId) {
        if self.keyboard_focus == Some(key) {
            self.keyboard_focus = None;
        }
        if self.pointer_focus == Some(key) {
            self.pointer_focus = None;
        }
        if self.cursor.map(|c| c.surface) == Some(key) {
            self.cursor = None;
        }
    }

    pub fn client_gone(&mut self, client: ClientId) {
        self.clients.remove(&client);
    }

    fn entry(&mut self, client: ClientId) -> &mut SeatClient {
        self.clients.entry(client).or_default()
    }
}

/// Capabilities + name, sent on every bind.
pub fn send_seat_hello(client: &mut Client, seat: ObjectId, version: u32) {
    client.send(
        MessageBuilder::new(seat, wl_seat::EV_CAPABILITIES)
            .uint(capability::POINTER | capability::KEYBOARD | capability::TOUCH)
            .build(),
    );
    if version >= wl_seat::NAME_SINCE_VERSION {
        client.send(
            MessageBuilder::new(seat, wl_seat::EV_NAME)
                .string("default")
                .build(),
        );
    }
}

/// wl_seat requests.
pub fn seat_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_seat::GET_POINTER => {
            let id = args.new_id()?;
            if state.seat.entry(client_id).pointer.is_some() {
                return Err(ProtocolError::invalid_method(
                    resource.id,
                    "client already has a wl_pointer for this seat",
                ));
            }
            state.client_mut(client_id)?.create(
                id,
                Interface::WlPointer,
                resource.version,
                ResourceKind::Pointer,
            )?;
            state.seat.entry(client_id).pointer = Some((id, resource.version));
            Ok(())
        },
        wl_seat::GET_KEYBOARD => {
            let id = args.new_id()?;
            if state.seat.entry(client_id).keyboard.is_some() {
                return Err(ProtocolError::invalid_method(
                    resource.id,
                    "client already has a wl_keyboard for this seat",
                ));
            }
            state.client_mut(client_id)?.create(
                id,
                Interface::WlKeyboard,
                resource.version,
                ResourceKind::Keyboard,
            )?;
            state.seat.entry(client_id).keyboard = Some((id, resource.version));
            send_keymap(state, client_id, id, resource.version)
        },
        wl_seat::GET_TOUCH => {
            let id = args.new_id()?;
            if state.seat.entry(client_id).touch.is_some() {
                return Err(ProtocolError::invalid_method(
                    resource.id,
                    "client already has a wl_touch for this seat",
                ));
            }
            state.client_mut(client_id)?.create(
                id,
                Interface::WlTouch,
                resource.version,
                ResourceKind::Touch,
            )?;
            state.seat.entry(client_id).touch = Some((id, resource.version));
            Ok(())
        },
        wl_seat::RELEASE => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_seat opcode {opcode}"),
        )),
    }
}

fn send_keymap(
    state: &mut WayhostState,
    client_id: ClientId,
    keyboard: ObjectId,
    version: u32,
) -> Result<(), ProtocolError> {
    let fd = state.seat.keymap_fd.try_clone().map_err(|e| {
        ProtocolError::implementation(keyboard, format!("keymap fd dup failed: {e}"))
    })?;
    let size = state.seat.keymap_size;
    let serial = state.seat.next_serial();
    let modifiers = state.seat.modifiers;
    let client = state.client_mut(client_id)?;
    client.send(
        MessageBuilder::new(keyboard, wl_keyboard::EV_KEYMAP)
            .uint(1) // xkb_v1
            .fd(fd)
            .uint(size)
            .build(),
    );
    if version >= wl_keyboard::REPEAT_INFO_SINCE_VERSION {
        client.send(
            MessageBuilder::new(keyboard, wl_keyboard::EV_REPEAT_INFO)
                .int(25)
                .int(400)
                .build(),
        );
    }
    // The current modifier state follows the keymap so the client never
    // interprets keys against stale modifiers.
    client.send(
        MessageBuilder::new(keyboard, wl_keyboard::EV_MODIFIERS)
            .uint(serial)
            .uint(modifiers.depressed)
            .uint(modifiers.latched)
            .uint(modifiers.locked)
            .uint(modifiers.group)
            .build(),
    );
    Ok(())
}

/// wl_pointer requests.
pub fn pointer_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_pointer::SET_CURSOR => {
            let serial = args.uint()?;
            let surface = args.object()?;
            let hotspot_x = args.int()?;
            let hotspot_y = args.int()?;
            if !state.seat.serial_is_recent(serial) {
                debug!("{client_id}: set_cursor with stale serial {serial}, ignoring");
                return Ok(());
            }
            if surface.is_null() {
                state.seat.cursor = None;
                return Ok(());
            }
            let surface_res = state.client_mut(client_id)?.resource(surface)?;
            let Some(&key) = surface_res.kind.as_surface() else {
                return Err(ProtocolError::invalid_object(surface));
            };
            let Some(target) = state.surfaces.get_mut(&key) else {
                return Err(ProtocolError::invalid_object(surface));
            };
            let hotspot = Point {
                x: hotspot_x,
                y: hotspot_y,
            };
            match &mut target.role {
                None => {
                    target.role = Some(Role::Cursor { hotspot });
                },
                Some(Role::Cursor {
                    hotspot: existing, ..
                }) => {
                    *existing = hotspot;
                },
                Some(other) => {
                    return Err(ProtocolError::new(
                        resource.id,
                        PointerError::Role,
                        format!("cursor surface already has the {} role", other.name()),
                    ));
                },
            }
            state.seat.cursor = Some(CursorImage {
                surface: key,
                hotspot,
            });
            Ok(())
        },
        wl_pointer::RELEASE => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_pointer opcode {opcode}"),
        )),
    }
}

/// wl_keyboard / wl_touch requests (release only).
pub fn keyboard_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_keyboard::RELEASE => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_keyboard opcode {opcode}"),
        )),
    }
}

pub fn touch_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_touch::RELEASE => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_touch opcode {opcode}"),
        )),
    }
}

/// Clears sub-object bookkeeping when one dies.
pub fn sub_object_destroyed(state: &mut WayhostState, client_id: ClientId, id: ObjectId) {
    let entry = state.seat.entry(client_id);
    if entry.pointer.map(|(p, _)| p) == Some(id) {
        entry.pointer = None;
    }
    if entry.keyboard.map(|(k, _)| k) == Some(id) {
        entry.keyboard = None;
    }
    if entry.touch.map(|(t, _)| t) == Some(id) {
        entry.touch = None;
    }
}

fn surface_client(state: &WayhostState, key: SurfaceId) -> Option<(ClientId, ObjectId)> {
    state.surfaces.get(&key).map(|s| (s.client, s.id))
}

fn pointer_of(state: &mut WayhostState, client: ClientId) -> Option<(ObjectId, u32)> {
    state.seat.clients.get(&client).and_then(|c| c.pointer)
}

fn keyboard_of(state: &mut WayhostState, client: ClientId) -> Option<(ObjectId, u32)> {
    state.seat.clients.get(&client).and_then(|c| c.keyboard)
}

fn touch_of(state: &mut WayhostState, client: ClientId) -> Option<(ObjectId, u32)> {
    state.seat.clients.get(&client).and_then(|c| c.touch)
}

fn send_pointer_frame(state: &mut WayhostState, client_id: ClientId) {
    if let Some((pointer, version)) = pointer_of(state, client_id)
        && version >= wl_pointer::FRAME_SINCE_VERSION
        && let Some(client) = state.clients.get_mut(&client_id)
    {
        client.send(MessageBuilder::new(pointer, wl_pointer::EV_FRAME).build());
    }
}

/// Moves pointer focus, emitting leave then enter with fresh serials.
pub fn set_pointer_focus(
    state: &mut WayhostState,
    target: Option<SurfaceId>,
    position: Point<f64>,
) {
    if state.seat.pointer_focus == target {
        return;
    }
    if let Some(old) = state.seat.pointer_focus
        && let Some((client_id, surface_obj)) = surface_client(state, old)
    {
        // All held buttons count as released once the pointer leaves.
        state.seat.entry(client_id).pressed_buttons = 0;
        let serial = state.seat.next_serial();
        if let Some((pointer, _)) = pointer_of(state, client_id)
            && let Some(client) = state.clients.get_mut(&client_id)
        {
            client.send(
                MessageBuilder::new(pointer, wl_pointer::EV_LEAVE)
                    .uint(serial)
                    .object(surface_obj)
                    .build(),
            );
        }
        send_pointer_frame(state, client_id);
    }
    state.seat.pointer_focus = target;
    if let Some(new) = target
        && let Some((client_id, surface_obj)) = surface_client(state, new)
    {
        let serial = state.seat.next_serial();
        if let Some((pointer, _)) = pointer_of(state, client_id)
            && let Some(client) = state.clients.get_mut(&client_id)
        {
            client.send(
                MessageBuilder::new(pointer, wl_pointer::EV_ENTER)
                    .uint(serial)
                    .object(surface_obj)
                    .fixed(Fixed::from_f64(position.x))
                    .fixed(Fixed::from_f64(position.y))
                    .build(),
            );
        }
        send_pointer_frame(state, client_id);
    }
}

pub fn pointer_motion(
    state: &mut WayhostState,
    surface: SurfaceId,
    position: Point<f64>,
    time_ms: u32,
) {
    set_pointer_focus(state, Some(surface), position);
    let Some((client_id, _)) = surface_client(state, surface) else {
        return;
    };
    if let Some((pointer, _)) = pointer_of(state, client_id)
        && let Some(client) = state.clients.get_mut(&client_id)
    {
        client.send(
            MessageBuilder::new(pointer, wl_pointer::EV_MOTION)
                .uint(time_ms)
                .fixed(Fixed::from_f64(position.x))
                .fixed(Fixed::from_f64(position.y))
                .build(),
        );
        send_pointer_frame(state, client_id);
    }
}

/// Button press/release with per-client de-dup: a second press of a held
/// button and a release of an unheld button are silently dropped.
pub fn pointer_button(state: &mut WayhostState, button: u32, pressed: bool, time_ms: u32) {
    let Some(focus) = state.seat.pointer_focus else {
        debug!("button {button} with no pointer focus, dropping");
        return;
    };
    let Some((client_id, _)) = surface_client(state, focus) else {
        return;
    };

    if let Some(bit) = button.checked_sub(BUTTON_BASE).filter(|b| *b < 32) {
        let mask = 1u32 << bit;
        let entry = state.seat.entry(client_id);
        if pressed {
            if entry.pressed_buttons & mask != 0 {
                debug!("duplicate press of button {button}, dropping");
                return;
            }
            entry.pressed_buttons |= mask;
        } else {
            if entry.pressed_buttons & mask == 0 {
                debug!("release of unpressed button {button}, dropping");
                return;
            }
            entry.pressed_buttons &= !mask;
        }
    }

    let serial = state.seat.next_serial();
    let button_state = if pressed {
        ButtonState::Pressed
    } else {
        ButtonState::Released
    };
    if let Some((pointer, _)) = pointer_of(state, client_id)
        && let Some(client) = state.clients.get_mut(&client_id)
    {
        client.send(
            MessageBuilder::new(pointer, wl_pointer::EV_BUTTON)
                .uint(serial)
                .uint(time_ms)
                .uint(button)
                .uint(button_state.into())
                .build(),
        );
        send_pointer_frame(state, client_id);
    }
}

pub fn pointer_axis(state: &mut WayhostState, horizontal: f64, vertical: f64, time_ms: u32) {
    let Some(focus) = state.seat.pointer_focus else {
        return;
    };
    let Some((client_id, _)) = surface_client(state, focus) else {
        return;
    };
    // Burn a serial even though wl_pointer.axis carries none; every emitted
    // input event advances the seat counter.
    let _ = state.seat.next_serial();
    if let Some((pointer, _)) = pointer_of(state, client_id)
        && let Some(client) = state.clients.get_mut(&client_id)
    {
        if vertical != 0.0 {
            client.send(
                MessageBuilder::new(pointer, wl_pointer::EV_AXIS)
                    .uint(time_ms)
                    .uint(0) // vertical_scroll
                    .fixed(Fixed::from_f64(vertical))
                    .build(),
            );
        }
        if horizontal != 0.0 {
            client.send(
                MessageBuilder::new(pointer, wl_pointer::EV_AXIS)
                    .uint(time_ms)
                    .uint(1) // horizontal_scroll
                    .fixed(Fixed::from_f64(horizontal))
                    .build(),
            );
        }
        send_pointer_frame(state, client_id);
    }
}

/// Moves keyboard focus: leave(old) then enter(new), and the new owner gets
/// the modifier state refreshed.
pub fn set_keyboard_focus(state: &mut WayhostState, target: Option<SurfaceId>) {
    if state.seat.keyboard_focus == target {
        return;
    }
    if let Some(old) = state.seat.keyboard_focus
        && let Some((client_id, surface_obj)) = surface_client(state, old)
    {
        let serial = state.seat.next_serial();
        if let Some((keyboard, _)) = keyboard_of(state, client_id)
            && let Some(client) = state.clients.get_mut(&client_id)
        {
            client.send(
                MessageBuilder::new(keyboard, wl_keyboard::EV_LEAVE)
                    .uint(serial)
                    .object(surface_obj)
                    .build(),
            );
        }
    }
    state.seat.keyboard_focus = target;
    if let Some(new) = target
        && let Some((client_id, surface_obj)) = surface_client(state, new)
    {
        let serial = state.seat.next_serial();
        let modifiers = state.seat.modifiers;
        if let Some((keyboard, _)) = keyboard_of(state, client_id)
            && let Some(client) = state.clients.get_mut(&client_id)
        {
            client.send(
                MessageBuilder::new(keyboard, wl_keyboard::EV_ENTER)
                    .uint(serial)
                    .object(surface_obj)
                    .array(&[])
                    .build(),
            );
            let serial = state.seat.next_serial();
            if let Some(client) = state.clients.get_mut(&client_id) {
                client.send(
                    MessageBuilder::new(keyboard, wl_keyboard::EV_MODIFIERS)
                        .uint(serial)
                        .uint(modifiers.depressed)
                        .uint(modifiers.latched)
                        .uint(modifiers.locked)
                        .uint(modifiers.group)
                        .build(),
                );
            }
        }
        crate::data_device::send_selection_to_focus(state, client_id);
    }
}

pub fn keyboard_key(state: &mut WayhostState, keycode: u32, pressed: bool, time_ms: u32) {
    let Some(focus) = state.seat.keyboard_focus else {
        debug!("key {keycode} with no keyboard focus, dropping");
        return;
    };
    if pressed {
        if !state.seat.pressed_keys.insert(keycode) {
            debug!("duplicate press of key {keycode}, dropping");
            return;
        }
    } else if !state.seat.pressed_keys.remove(&keycode) {
        debug!("release of unpressed key {keycode}, dropping");
        return;
    }
    let Some((client_id, _)) = surface_client(state, focus) else {
        return;
    };
    let serial = state.seat.next_serial();
    let key_state = if pressed {
        KeyState::Pressed
    } else {
        KeyState::Released
    };
    if let Some((keyboard, _)) = keyboard_of(state, client_id)
        && let Some(client) = state.clients.get_mut(&client_id)
    {
        client.send(
            MessageBuilder::new(keyboard, wl_keyboard::EV_KEY)
                .uint(serial)
                .uint(time_ms)
                .uint(keycode)
                .uint(key_state.into())
                .build(),
        );
    }
}

/// Host-side xkb state changed; forward to the focus owner.
pub fn update_modifiers(state: &mut WayhostState, modifiers: ModifierState) {
    if state.seat.modifiers == modifiers {
        return;
    }
    state.seat.modifiers = modifiers;
    let Some(focus) = state.seat.keyboard_focus else {
        return;
    };
    let Some((client_id, _)) = surface_client(state, focus) else {
        return;
    };
    let serial = state.seat.next_serial();
    if let Some((keyboard, _)) = keyboard_of(state, client_id)
        && let Some(client) = state.clients.get_mut(&client_id)
    {
        client.send(
            MessageBuilder::new(keyboard, wl_keyboard::EV_MODIFIERS)
                .uint(serial)
                .uint(modifiers.depressed)
                .uint(modifiers.latched)
                .uint(modifiers.locked)
                .uint(modifiers.group)
                .build(),
        );
    }
}

pub fn touch_down(
    state: &mut WayhostState,
    surface: SurfaceId,
    touch_id: i32,
    position: Point<f64>,
    time_ms: u32,
) {
    let Some((client_id, surface_obj)) = surface_client(state, surface) else {
        return;
    };
    let serial = state.seat.next_serial();
    if let Some((touch, _)) = touch_of(state, client_id)
        && let Some(client) = state.clients.get_mut(&client_id)
    {
        client.send(
            MessageBuilder::new(touch, wl_touch::EV_DOWN)
                .uint(serial)
                .uint(time_ms)
                .object(surface_obj)
                .int(touch_id)
                .fixed(Fixed::from_f64(position.x))
                .fixed(Fixed::from_f64(position.y))
                .build(),
        );
        client.send(MessageBuilder::new(touch, wl_touch::EV_FRAME).build());
    }
}

pub fn touch_up(state: &mut WayhostState, surface: SurfaceId, touch_id: i32, time_ms: u32) {
    let Some((client_id, _)) = surface_client(state, surface) else {
        return;
    };
    let serial = state.seat.next_serial();
    if let Some((touch, _)) = touch_of(state, client_id)
        && let Some(client) = state.clients.get_mut(&client_id)
    {
        client.send(
            MessageBuilder::new(touch, wl_touch::EV_UP)
                .uint(serial)
                .uint(time_ms)
                .int(touch_id)
                .build(),
        );
        client.send(MessageBuilder::new(touch, wl_touch::EV_FRAME).build());
    }
}

pub fn touch_motion(
    state: &mut WayhostState,
    surface: SurfaceId,
    touch_id: i32,
    position: Point<f64>,
    time_ms: u32,
) {
    let Some((client_id, _)) = surface_client(state, surface) else {
        return;
    };
    let _ = state.seat.next_serial();
    if let Some((touch, _)) = touch_of(state, client_id)
        && let Some(client) = state.clients.get_mut(&client_id)
    {
        client.send(
            MessageBuilder::new(touch, wl_touch::EV_MOTION)
                .uint(time_ms)
                .int(touch_id)
                .fixed(Fixed::from_f64(position.x))
                .fixed(Fixed::from_f64(position.y))
                .build(),
        );
        client.send(MessageBuilder::new(touch, wl_touch::EV_FRAME).build());
    }
}

/// A focused surface disappeared out from under the seat.
pub fn focus_surface_gone(state: &mut WayhostState, key: SurfaceId) {
    state.seat.surface_destroyed(key);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bare_seat() -> Seat {
        Seat::new().unwrap()
    }

    #[test]
    fn serials_strictly_increase() {
        let mut seat = bare_seat();
        let a = seat.next_serial();
        let b = seat.next_serial();
        let c = seat.next_serial();
        assert!(a < b && b < c);
    }

    #[test]
    fn serial_window_accepts_recent_rejects_stale() {
        let mut seat = bare_seat();
        for _ in 0..10_000 {
            seat.next_serial();
        }
        let current = seat.current_serial();
        assert!(seat.serial_is_recent(current));
        assert!(seat.serial_is_recent(current - SERIAL_WINDOW + 1));
        assert!(!seat.serial_is_recent(current - SERIAL_WINDOW));
        assert!(!seat.serial_is_recent(1));
    }

    #[test]
    fn serial_window_handles_wraparound() {
        let mut seat = bare_seat();
        seat.serial = u32::MAX - 2;
        seat.next_serial();
        seat.next_serial(); // wrapped to 0
        assert!(seat.serial_is_recent(u32::MAX - 1));
        assert!(seat.serial_is_recent(0));
    }

    #[test]
    fn keymap_is_nul_terminated() {
        let seat = bare_seat();
        assert_eq!(seat.keymap_size as usize, KEYMAP_TEXT.len() + 1);
    }

    #[test]
    fn focus_cleared_when_surface_dies() {
        let mut seat = bare_seat();
        seat.keyboard_focus = Some(SurfaceId(5));
        seat.pointer_focus = Some(SurfaceId(5));
        seat.surface_destroyed(SurfaceId(5));
        assert_eq!(seat.keyboard_focus, None);
        assert_eq!(seat.pointer_focus, None);
    }
}
