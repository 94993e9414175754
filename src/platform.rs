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

//! The host-platform seam.
//!
//! The engine drives native windows through [`PlatformHost`] calls made on
//! the dispatch thread; the platform feeds input and window events back
//! through the loop channel as [`PlatformEvent`]s. The core never learns
//! what the host actually is.

use std::sync::Arc;
use std::sync::Mutex;

use crate::output::OutputId;
use crate::output::OutputInfo;
use crate::prelude::*;
use crate::protocol::geometry::Point;
use crate::protocol::geometry::Size;
use crate::seat::ModifierState;
use crate::xdg_shell::ToplevelId;

pub trait PlatformHost: Send {
    fn create_native_window(
        &mut self,
        toplevel: ToplevelId,
        width: i32,
        height: i32,
        server_side_decorations: bool,
    );
    fn destroy_native_window(&mut self, toplevel: ToplevelId);
    fn set_title(&mut self, toplevel: ToplevelId, title: &str);
    fn set_size(&mut self, toplevel: ToplevelId, width: i32, height: i32);
}

/// Input and window events injected by the host.
#[derive(Debug, Clone, PartialEq)]
pub enum PlatformEvent {
    PointerMotion {
        toplevel: ToplevelId,
        position: Point<f64>,
        time_ms: u32,
    },
    PointerButton {
        button: u32,
        pressed: bool,
        time_ms: u32,
    },
    PointerAxis {
        horizontal: f64,
        vertical: f64,
        time_ms: u32,
    },
    Key {
        keycode: u32,
        pressed: bool,
        time_ms: u32,
    },
    Modifiers(ModifierState),
    TouchDown {
        toplevel: ToplevelId,
        touch_id: i32,
        position: Point<f64>,
        time_ms: u32,
    },
    TouchUp {
        toplevel: ToplevelId,
        touch_id: i32,
        time_ms: u32,
    },
    TouchMotion {
        toplevel: ToplevelId,
        touch_id: i32,
        position: Point<f64>,
        time_ms: u32,
    },
    FocusChanged {
        toplevel: Option<ToplevelId>,
    },
    WindowResized {
        toplevel: ToplevelId,
        size: Size<i32>,
    },
    WindowCloseRequested {
        toplevel: ToplevelId,
    },
    OutputChanged {
        output: OutputId,
        info: OutputInfo,
    },
}

/// A host that manages no windows. Used headless and under test.
#[derive(Debug, Default)]
pub struct NullPlatform;

impl PlatformHost for NullPlatform {
    fn create_native_window(
        &mut self,
        toplevel: ToplevelId,
        width: i32,
        height: i32,
        server_side_decorations: bool,
    ) {
        debug!(
            "native window for {toplevel:?}: {width}x{height}, ssd={server_side_decorations}"
        );
    }

    fn destroy_native_window(&mut self, toplevel: ToplevelId) {
        debug!("destroying native window for {toplevel:?}");
    }

    fn set_title(&mut self, toplevel: ToplevelId, title: &str) {
        trace!("title for {toplevel:?}: {title:?}");
    }

    fn set_size(&mut self, toplevel: ToplevelId, width: i32, height: i32) {
        trace!("size for {toplevel:?}: {width}x{height}");
    }
}

/// Every call a [`RecordingPlatform`] has observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlatformCall {
    CreateWindow {
        toplevel: ToplevelId,
        width: i32,
        height: i32,
        server_side_decorations: bool,
    },
    DestroyWindow {
        toplevel: ToplevelId,
    },
    SetTitle {
        toplevel: ToplevelId,
        title: String,
    },
    SetSize {
        toplevel: ToplevelId,
        width: i32,
        height: i32,
    },
}

/// Records host calls for assertions; the test keeps a clone of the log.
#[derive(Debug, Default)]
pub struct RecordingPlatform {
    pub calls: Arc<Mutex<Vec<PlatformCall>>>,
}

impl RecordingPlatform {
    pub fn new() -> (Self, Arc<Mutex<Vec<PlatformCall>>>) {
        let calls = Arc::new(Mutex::new(Vec::new()));
        (
            Self {
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl PlatformHost for RecordingPlatform {
    fn create_native_window(
        &mut self,
        toplevel: ToplevelId,
        width: i32,
        height: i32,
        server_side_decorations: bool,
    ) {
        self.calls.lock().unwrap().push(PlatformCall::CreateWindow {
            toplevel,
            width,
            height,
            server_side_decorations,
        });
    }

    fn destroy_native_window(&mut self, toplevel: ToplevelId) {
        self.calls
            .lock()
            .unwrap()
            .push(PlatformCall::DestroyWindow { toplevel });
    }

    fn set_title(&mut self, toplevel: ToplevelId, title: &str) {
        self.calls.lock().unwrap().push(PlatformCall::SetTitle {
            toplevel,
            title: title.to_string(),
        });
    }

    fn set_size(&mut self, toplevel: ToplevelId, width: i32, height: i32) {
        self.calls.lock().unwrap().push(PlatformCall::SetSize {
            toplevel,
            width,
            height,
        });
    }
}
