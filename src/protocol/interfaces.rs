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

//! Opcode tables for every interface we dispatch or emit.
//!
//! Request opcodes index the client→server direction, event opcodes the
//! server→client direction. Values follow the published protocol XML.

pub mod wl_display {
    pub const SYNC: u16 = 0;
    pub const GET_REGISTRY: u16 = 1;

    pub const EV_ERROR: u16 = 0;
    pub const EV_DELETE_ID: u16 = 1;
}

pub mod wl_registry {
    pub const BIND: u16 = 0;

    pub const EV_GLOBAL: u16 = 0;
    pub const EV_GLOBAL_REMOVE: u16 = 1;
}

pub mod wl_callback {
    pub const EV_DONE: u16 = 0;
}

pub mod wl_compositor {
    pub const CREATE_SURFACE: u16 = 0;
    pub const CREATE_REGION: u16 = 1;
}

pub mod wl_shm {
    pub const CREATE_POOL: u16 = 0;

    pub const EV_FORMAT: u16 = 0;
}

pub mod wl_shm_pool {
    pub const CREATE_BUFFER: u16 = 0;
    pub const DESTROY: u16 = 1;
    pub const RESIZE: u16 = 2;
}

pub mod wl_buffer {
    pub const DESTROY: u16 = 0;

    pub const EV_RELEASE: u16 = 0;
}

pub mod wl_surface {
    pub const DESTROY: u16 = 0;
    pub const ATTACH: u16 = 1;
    pub const DAMAGE: u16 = 2;
    pub const FRAME: u16 = 3;
    pub const SET_OPAQUE_REGION: u16 = 4;
    pub const SET_INPUT_REGION: u16 = 5;
    pub const COMMIT: u16 = 6;
    pub const SET_BUFFER_TRANSFORM: u16 = 7;
    pub const SET_BUFFER_SCALE: u16 = 8;
    pub const DAMAGE_BUFFER: u16 = 9;

    pub const EV_ENTER: u16 = 0;
    pub const EV_LEAVE: u16 = 1;
}

pub mod wl_region {
    pub const DESTROY: u16 = 0;
    pub const ADD: u16 = 1;
    pub const SUBTRACT: u16 = 2;
}

pub mod wl_subcompositor {
    pub const DESTROY: u16 = 0;
    pub const GET_SUBSURFACE: u16 = 1;
}

pub mod wl_subsurface {
    pub const DESTROY: u16 = 0;
    pub const SET_POSITION: u16 = 1;
    pub const PLACE_ABOVE: u16 = 2;
    pub const PLACE_BELOW: u16 = 3;
    pub const SET_SYNC: u16 = 4;
    pub const SET_DESYNC: u16 = 5;
}

pub mod wl_seat {
    pub const GET_POINTER: u16 = 0;
    pub const GET_KEYBOARD: u16 = 1;
    pub const GET_TOUCH: u16 = 2;
    pub const RELEASE: u16 = 3;

    pub const EV_CAPABILITIES: u16 = 0;
    pub const EV_NAME: u16 = 1;

    pub const NAME_SINCE_VERSION: u32 = 2;
}

pub mod wl_pointer {
    pub const SET_CURSOR: u16 = 0;
    pub const RELEASE: u16 = 1;

    pub const EV_ENTER: u16 = 0;
    pub const EV_LEAVE: u16 = 1;
    pub const EV_MOTION: u16 = 2;
    pub const EV_BUTTON: u16 = 3;
    pub const EV_AXIS: u16 = 4;
    pub const EV_FRAME: u16 = 5;
    pub const EV_AXIS_SOURCE: u16 = 6;
    pub const EV_AXIS_STOP: u16 = 7;
    pub const EV_AXIS_DISCRETE: u16 = 8;

    pub const FRAME_SINCE_VERSION: u32 = 5;
}

pub mod wl_keyboard {
    pub const RELEASE: u16 = 0;

    pub const EV_KEYMAP: u16 = 0;
    pub const EV_ENTER: u16 = 1;
    pub const EV_LEAVE: u16 = 2;
    pub const EV_KEY: u16 = 3;
    pub const EV_MODIFIERS: u16 = 4;
    pub const EV_REPEAT_INFO: u16 = 5;

    pub const REPEAT_INFO_SINCE_VERSION: u32 = 4;
}

pub mod wl_touch {
    pub const RELEASE: u16 = 0;

    pub const EV_DOWN: u16 = 0;
    pub const EV_UP: u16 = 1;
    pub const EV_MOTION: u16 = 2;
    pub const EV_FRAME: u16 = 3;
    pub const EV_CANCEL: u16 = 4;
}

pub mod wl_output {
    pub const RELEASE: u16 = 0;

    pub const EV_GEOMETRY: u16 = 0;
    pub const EV_MODE: u16 = 1;
    pub const EV_DONE: u16 = 2;
    pub const EV_SCALE: u16 = 3;

    pub const DONE_SINCE_VERSION: u32 = 2;
    pub const SCALE_SINCE_VERSION: u32 = 2;
    pub const RELEASE_SINCE_VERSION: u32 = 3;
}

pub mod wl_data_device_manager {
    pub const CREATE_DATA_SOURCE: u16 = 0;
    pub const GET_DATA_DEVICE: u16 = 1;
}

pub mod wl_data_source {
    pub const OFFER: u16 = 0;
    pub const DESTROY: u16 = 1;
    pub const SET_ACTIONS: u16 = 2;

    pub const EV_TARGET: u16 = 0;
    pub const EV_SEND: u16 = 1;
    pub const EV_CANCELLED: u16 = 2;
}

pub mod wl_data_device {
    pub const START_DRAG: u16 = 0;
    pub const SET_SELECTION: u16 = 1;
    pub const RELEASE: u16 = 2;

    pub const EV_DATA_OFFER: u16 = 0;
    pub const EV_ENTER: u16 = 1;
    pub const EV_LEAVE: u16 = 2;
    pub const EV_MOTION: u16 = 3;
    pub const EV_DROP: u16 = 4;
    pub const EV_SELECTION: u16 = 5;
}

pub mod wl_data_offer {
    pub const ACCEPT: u16 = 0;
    pub const RECEIVE: u16 = 1;
    pub const DESTROY: u16 = 2;
    pub const FINISH: u16 = 3;
    pub const SET_ACTIONS: u16 = 4;

    pub const EV_OFFER: u16 = 0;
}

pub mod xdg_wm_base {
    pub const DESTROY: u16 = 0;
    pub const CREATE_POSITIONER: u16 = 1;
    pub const GET_XDG_SURFACE: u16 = 2;
    pub const PONG: u16 = 3;

    pub const EV_PING: u16 = 0;
}

pub mod xdg_positioner {
    pub const DESTROY: u16 = 0;
    pub const SET_SIZE: u16 = 1;
    pub const SET_ANCHOR_RECT: u16 = 2;
    pub const SET_ANCHOR: u16 = 3;
    pub const SET_GRAVITY: u16 = 4;
    pub const SET_CONSTRAINT_ADJUSTMENT: u16 = 5;
    pub const SET_OFFSET: u16 = 6;
    pub const SET_REACTIVE: u16 = 7;
    pub const SET_PARENT_SIZE: u16 = 8;
    pub const SET_PARENT_CONFIGURE: u16 = 9;
}

pub mod xdg_surface {
    pub const DESTROY: u16 = 0;
    pub const GET_TOPLEVEL: u16 = 1;
    pub const GET_POPUP: u16 = 2;
    pub const SET_WINDOW_GEOMETRY: u16 = 3;
    pub const ACK_CONFIGURE: u16 = 4;

    pub const EV_CONFIGURE: u16 = 0;
}

pub mod xdg_toplevel {
    pub const DESTROY: u16 = 0;
    pub const SET_PARENT: u16 = 1;
    pub const SET_TITLE: u16 = 2;
    pub const SET_APP_ID: u16 = 3;
    pub const SHOW_WINDOW_MENU: u16 = 4;
    pub const MOVE: u16 = 5;
    pub const RESIZE: u16 = 6;
    pub const SET_MAX_SIZE: u16 = 7;
    pub const SET_MIN_SIZE: u16 = 8;
    pub const SET_MAXIMIZED: u16 = 9;
    pub const UNSET_MAXIMIZED: u16 = 10;
    pub const SET_FULLSCREEN: u16 = 11;
    pub const UNSET_FULLSCREEN: u16 = 12;
    pub const SET_MINIMIZED: u16 = 13;

    pub const EV_CONFIGURE: u16 = 0;
    pub const EV_CLOSE: u16 = 1;
    pub const EV_CONFIGURE_BOUNDS: u16 = 2;

    pub const CONFIGURE_BOUNDS_SINCE_VERSION: u32 = 4;
}

pub mod xdg_popup {
    pub const DESTROY: u16 = 0;
    pub const GRAB: u16 = 1;
    pub const REPOSITION: u16 = 2;

    pub const EV_CONFIGURE: u16 = 0;
    pub const EV_POPUP_DONE: u16 = 1;
    pub const EV_REPOSITIONED: u16 = 2;

    pub const REPOSITION_SINCE_VERSION: u32 = 3;
}

pub mod zxdg_decoration_manager_v1 {
    pub const DESTROY: u16 = 0;
    pub const GET_TOPLEVEL_DECORATION: u16 = 1;
}

pub mod zxdg_toplevel_decoration_v1 {
    pub const DESTROY: u16 = 0;
    pub const SET_MODE: u16 = 1;
    pub const UNSET_MODE: u16 = 2;

    pub const EV_CONFIGURE: u16 = 0;
}

pub mod zwp_linux_dmabuf_v1 {
    pub const DESTROY: u16 = 0;
    pub const CREATE_PARAMS: u16 = 1;
    pub const GET_DEFAULT_FEEDBACK: u16 = 2;
    pub const GET_SURFACE_FEEDBACK: u16 = 3;

    pub const EV_FORMAT: u16 = 0;
    pub const EV_MODIFIER: u16 = 1;

    pub const MODIFIER_SINCE_VERSION: u32 = 3;
    pub const FEEDBACK_SINCE_VERSION: u32 = 4;
}

pub mod zwp_linux_buffer_params_v1 {
    pub const DESTROY: u16 = 0;
    pub const ADD: u16 = 1;
    pub const CREATE: u16 = 2;
    pub const CREATE_IMMED: u16 = 3;

    pub const EV_CREATED: u16 = 0;
    pub const EV_FAILED: u16 = 1;
}

pub mod zwp_linux_dmabuf_feedback_v1 {
    pub const DESTROY: u16 = 0;

    pub const EV_DONE: u16 = 0;
    pub const EV_FORMAT_TABLE: u16 = 1;
    pub const EV_MAIN_DEVICE: u16 = 2;
    pub const EV_TRANCHE_DONE: u16 = 3;
    pub const EV_TRANCHE_TARGET_DEVICE: u16 = 4;
    pub const EV_TRANCHE_FORMATS: u16 = 5;
    pub const EV_TRANCHE_FLAGS: u16 = 6;
}

pub mod wp_viewporter {
    pub const DESTROY: u16 = 0;
    pub const GET_VIEWPORT: u16 = 1;
}

pub mod wp_viewport {
    pub const DESTROY: u16 = 0;
    pub const SET_SOURCE: u16 = 1;
    pub const SET_DESTINATION: u16 = 2;
}
