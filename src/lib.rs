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

pub mod config;
pub mod data_device;
pub mod decoration;
pub mod dmabuf;
pub mod output;
pub mod platform;
pub mod prelude;
pub mod protocol;
pub mod renderer;
pub mod scheduler;
pub mod seat;
pub mod server;
pub mod shm;
pub mod surface;
pub mod transport;
pub mod utils;
pub mod xdg_shell;
