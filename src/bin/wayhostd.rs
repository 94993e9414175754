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

use std::path::PathBuf;

use clap::Parser;
use wayhost::config;
use wayhost::config::SerializableLevel;
use wayhost::config::WayhostConfig;
use wayhost::platform::NullPlatform;
use wayhost::platform::PlatformEvent;
use wayhost::prelude::*;
use wayhost::server;
use wayhost::utils;

/// A Wayland display server hosted on a foreign window system. CLI flags
/// override the config file.
#[derive(Parser, Debug)]
#[command(name = "wayhostd")]
struct Args {
    /// Path to the config file. Defaults to
    /// $XDG_CONFIG_HOME/wayhost/wayhostd.ron.
    #[arg(long)]
    config_file: Option<PathBuf>,

    /// Print a config file with default values to stdout and exit.
    #[arg(long)]
    print_default_config_and_exit: bool,

    /// Socket name under the runtime dir; exported as WAYLAND_DISPLAY.
    #[arg(long)]
    wayland_display: Option<String>,

    /// Directory for the socket and lock file; defaults to
    /// $XDG_RUNTIME_DIR.
    #[arg(long)]
    socket_dir: Option<PathBuf>,

    /// Also listen on 127.0.0.1:<port>. No authentication; trusted
    /// networks only.
    #[arg(long)]
    tcp_listen_port: Option<u16>,

    /// Configure server-side decorations regardless of client preference.
    #[arg(long)]
    force_server_side_decorations: Option<bool>,

    /// Accept more than one concurrent client.
    #[arg(long)]
    multiple_clients: Option<bool>,

    #[arg(long)]
    stderr_log_level: Option<SerializableLevel>,

    #[arg(long)]
    log_file: Option<PathBuf>,

    #[arg(long)]
    file_log_level: Option<SerializableLevel>,
}

fn load_config(args: &Args) -> Result<WayhostConfig> {
    let config_path = args
        .config_file
        .clone()
        .unwrap_or_else(|| config::default_config_file("wayhostd"));
    let mut config: WayhostConfig =
        config::maybe_read_ron_file(&config_path)?.unwrap_or_default();

    if let Some(display) = &args.wayland_display {
        config.wayland_display = display.clone();
    }
    if let Some(dir) = &args.socket_dir {
        config.socket_dir = Some(dir.clone());
    }
    if let Some(port) = args.tcp_listen_port {
        config.tcp_listen_port = Some(port);
    }
    if let Some(force) = args.force_server_side_decorations {
        config.force_server_side_decorations = force;
    }
    if let Some(multiple) = args.multiple_clients {
        config.multiple_clients = multiple;
    }
    if let Some(level) = &args.stderr_log_level {
        config.stderr_log_level = level.clone();
    }
    if let Some(path) = &args.log_file {
        config.log_file = Some(path.clone());
    }
    if let Some(level) = &args.file_log_level {
        config.file_log_level = level.clone();
    }
    Ok(config)
}

fn main() -> Result<()> {
    let args = Args::parse();
    if args.print_default_config_and_exit {
        config::print_default_config_and_exit::<WayhostConfig>();
    }

    let config = load_config(&args).location(loc!())?;
    utils::configure_tracing(
        config.stderr_log_level.0,
        config.log_file.clone(),
        config.file_log_level.0,
    )
    .location(loc!())?;
    utils::exit_on_thread_panic();
    info!("running config: {config:#?}");

    // The host platform feeds input through this channel. The headless
    // default has no input source, so the sender just stays parked here.
    let (_platform_tx, platform_rx) = calloop::channel::channel::<PlatformEvent>();

    server::run(config, Box::new(NullPlatform), platform_rx).location(loc!())
}
