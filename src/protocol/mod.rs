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

//! Protocol-level vocabulary: object ids, interface descriptors, and the
//! typed error values that turn into `wl_display.error` events.

use std::fmt;

use num_enum::IntoPrimitive;

pub mod geometry;
pub mod interfaces;
pub mod wire;

/// A wire-level object id, unique within one client connection.
///
/// The id space is partitioned: ids with the high bit clear are allocated by
/// the client, ids with the high bit set by the server.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct ObjectId(pub u32);

impl ObjectId {
    /// `wl_display` itself, implicitly bound on every connection.
    pub const DISPLAY: ObjectId = ObjectId(1);

    pub const SERVER_RANGE_START: u32 = 0x8000_0000;

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    pub fn is_server_allocated(self) -> bool {
        self.0 >= Self::SERVER_RANGE_START
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Every interface this server can host a resource for.
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub enum Interface {
    WlDisplay,
    WlRegistry,
    WlCallback,
    WlCompositor,
    WlSubcompositor,
    WlShm,
    WlShmPool,
    WlBuffer,
    WlSurface,
    WlSubsurface,
    WlRegion,
    WlSeat,
    WlPointer,
    WlKeyboard,
    WlTouch,
    WlOutput,
    WlDataDeviceManager,
    WlDataSource,
    WlDataDevice,
    WlDataOffer,
    XdgWmBase,
    XdgPositioner,
    XdgSurface,
    XdgToplevel,
    XdgPopup,
    ZxdgDecorationManagerV1,
    ZxdgToplevelDecorationV1,
    ZwpLinuxDmabufV1,
    ZwpLinuxBufferParamsV1,
    ZwpLinuxDmabufFeedbackV1,
    WpViewporter,
    WpViewport,
}

impl Interface {
    pub fn name(self) -> &'static str {
        match self {
            Self::WlDisplay => "wl_display",
            Self::WlRegistry => "wl_registry",
            Self::WlCallback => "wl_callback",
            Self::WlCompositor => "wl_compositor",
            Self::WlSubcompositor => "wl_subcompositor",
            Self::WlShm => "wl_shm",
            Self::WlShmPool => "wl_shm_pool",
            Self::WlBuffer => "wl_buffer",
            Self::WlSurface => "wl_surface",
            Self::WlSubsurface => "wl_subsurface",
            Self::WlRegion => "wl_region",
            Self::WlSeat => "wl_seat",
            Self::WlPointer => "wl_pointer",
            Self::WlKeyboard => "wl_keyboard",
            Self::WlTouch => "wl_touch",
            Self::WlOutput => "wl_output",
            Self::WlDataDeviceManager => "wl_data_device_manager",
            Self::WlDataSource => "wl_data_source",
            Self::WlDataDevice => "wl_data_device",
            Self::WlDataOffer => "wl_data_offer",
            Self::XdgWmBase => "xdg_wm_base",
            Self::XdgPositioner => "xdg_positioner",
            Self::XdgSurface => "xdg_surface",
            Self::XdgToplevel => "xdg_toplevel",
            Self::XdgPopup => "xdg_popup",
            Self::ZxdgDecorationManagerV1 => "zxdg_decoration_manager_v1",
            Self::ZxdgToplevelDecorationV1 => "zxdg_toplevel_decoration_v1",
            Self::ZwpLinuxDmabufV1 => "zwp_linux_dmabuf_v1",
            Self::ZwpLinuxBufferParamsV1 => "zwp_linux_buffer_params_v1",
            Self::ZwpLinuxDmabufFeedbackV1 => "zwp_linux_dmabuf_feedback_v1",
            Self::WpViewporter => "wp_viewporter",
            Self::WpViewport => "wp_viewport",
        }
    }

    /// Highest version this implementation supports for the interface.
    pub fn max_version(self) -> u32 {
        match self {
            Self::WlDisplay => 1,
            Self::WlRegistry => 1,
            Self::WlCallback => 1,
            Self::WlCompositor => 4,
            Self::WlSubcompositor => 1,
            Self::WlShm => 1,
            Self::WlShmPool => 1,
            Self::WlBuffer => 1,
            Self::WlSurface => 4,
            Self::WlSubsurface => 1,
            Self::WlRegion => 1,
            Self::WlSeat => 7,
            Self::WlPointer => 7,
            Self::WlKeyboard => 7,
            Self::WlTouch => 7,
            Self::WlOutput => 3,
            Self::WlDataDeviceManager => 3,
            Self::WlDataSource => 3,
            Self::WlDataDevice => 3,
            Self::WlDataOffer => 3,
            Self::XdgWmBase => 4,
            Self::XdgPositioner => 4,
            Self::XdgSurface => 4,
            Self::XdgToplevel => 4,
            Self::XdgPopup => 4,
            Self::ZxdgDecorationManagerV1 => 1,
            Self::ZxdgToplevelDecorationV1 => 1,
            Self::ZwpLinuxDmabufV1 => 4,
            Self::ZwpLinuxBufferParamsV1 => 4,
            Self::ZwpLinuxDmabufFeedbackV1 => 4,
            Self::WpViewporter => 2,
            Self::WpViewport => 2,
        }
    }
}

/// A fatal protocol violation attributed to one object.
///
/// Turned into a `wl_display.error` event followed by disconnection of the
/// offending client. Other clients are unaffected.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ProtocolError {
    pub object: ObjectId,
    pub code: u32,
    pub message: String,
}

impl ProtocolError {
    pub fn new(object: ObjectId, code: impl Into<u32>, message: impl Into<String>) -> Self {
        Self {
            object,
            code: code.into(),
            message: message.into(),
        }
    }

    /// An id that does not name a live object.
    pub fn invalid_object(id: ObjectId) -> Self {
        Self::new(
            ObjectId::DISPLAY,
            DisplayError::InvalidObject,
            format!("invalid object {id}"),
        )
    }

    /// An opcode the target interface does not define, or malformed args.
    pub fn invalid_method(object: ObjectId, detail: impl fmt::Display) -> Self {
        Self::new(
            ObjectId::DISPLAY,
            DisplayError::InvalidMethod,
            format!("object {object}: {detail}"),
        )
    }

    pub fn no_memory(detail: impl fmt::Display) -> Self {
        Self::new(ObjectId::DISPLAY, DisplayError::NoMemory, detail.to_string())
    }

    /// Server-side inconsistency surfaced to the client; always a bug.
    pub fn implementation(object: ObjectId, detail: impl fmt::Display) -> Self {
        Self::new(
            ObjectId::DISPLAY,
            DisplayError::Implementation,
            format!("object {object}: {detail}"),
        )
    }
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "protocol error on object {} (code {}): {}",
            self.object, self.code, self.message
        )
    }
}

impl std::error::Error for ProtocolError {}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum DisplayError {
    InvalidObject = 0,
    InvalidMethod = 1,
    NoMemory = 2,
    Implementation = 3,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum ShmError {
    InvalidFormat = 0,
    InvalidStride = 1,
    InvalidFd = 2,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum SurfaceError {
    InvalidScale = 0,
    InvalidTransform = 1,
    InvalidSize = 2,
    InvalidOffset = 3,
    DefunctRoleObject = 4,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum SubcompositorError {
    BadSurface = 0,
    BadParent = 1,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum SeatError {
    MissingCapability = 0,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum PointerError {
    Role = 0,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum DataDeviceError {
    Role = 0,
    UsedSource = 1,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum DataOfferError {
    InvalidFinish = 0,
    InvalidActionMask = 1,
    InvalidAction = 2,
    InvalidOffer = 3,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum PositionerError {
    InvalidInput = 0,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum WmBaseError {
    Role = 0,
    DefunctSurfaces = 1,
    NotTheTopmostPopup = 2,
    InvalidPopupParent = 3,
    InvalidSurfaceState = 4,
    InvalidPositioner = 5,
    Unresponsive = 6,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum XdgSurfaceError {
    NotConstructed = 1,
    AlreadyConstructed = 2,
    UnconfiguredBuffer = 3,
    InvalidSerial = 4,
    InvalidSize = 5,
    DefunctRoleObject = 6,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum ToplevelError {
    InvalidResizeEdge = 0,
    InvalidParent = 1,
    InvalidSize = 2,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum PopupError {
    InvalidGrab = 0,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum DecorationError {
    UnconfiguredBuffer = 0,
    AlreadyConstructed = 1,
    Orphaned = 2,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum DmabufParamsError {
    AlreadyUsed = 0,
    PlaneIdx = 1,
    PlaneSet = 2,
    Incomplete = 3,
    InvalidFormat = 4,
    InvalidDimensions = 5,
    OutOfBounds = 6,
    InvalidWlBuffer = 7,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum ViewporterError {
    ViewportExists = 0,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq, IntoPrimitive)]
#[repr(u32)]
pub enum ViewportError {
    BadValue = 0,
    BadSize = 1,
    OutOfBuffer = 2,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_space_partition() {
        assert!(!ObjectId(1).is_server_allocated());
        assert!(!ObjectId(0x7fff_ffff).is_server_allocated());
        assert!(ObjectId(0x8000_0000).is_server_allocated());
        assert!(ObjectId(u32::MAX).is_server_allocated());
    }

    #[test]
    fn error_codes_match_wire_values() {
        assert_eq!(u32::from(DisplayError::NoMemory), 2);
        assert_eq!(u32::from(ShmError::InvalidStride), 1);
        assert_eq!(u32::from(XdgSurfaceError::InvalidSerial), 4);
        assert_eq!(u32::from(DmabufParamsError::AlreadyUsed), 0);
    }
}
