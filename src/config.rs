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

use std::env;
use std::path::Path;
use std::path::PathBuf;
use std::str::FromStr;

use ron::Options;
use ron::extensions::Extensions;
use serde::Deserialize;
use serde::Serialize;
use serde_derive::Deserialize as DeriveDeserialize;
use serde_derive::Serialize as DeriveSerialize;
use tracing::Level;
use tracing::metadata::ParseLevelError;

use crate::prelude::*;

fn fallback_config_parent_dir() -> Result<PathBuf> {
    Ok(Path::join(
        &home::home_dir().ok_or(anyhow!("unable to determine home dir"))?,
        ".config",
    ))
}

pub fn default_config_file_dir() -> PathBuf {
    Path::join(
        &env::var("XDG_CONFIG_HOME")
            .log(loc!())
            .ok()
            .map(Into::into)
            .or(fallback_config_parent_dir().log(loc!()).ok())
            .unwrap_or_else(|| "/etc".into()),
        "wayhost",
    )
}

pub fn default_config_file(name: &str) -> PathBuf {
    Path::join(&default_config_file_dir(), format!("{name}.ron"))
}

pub fn default_wayland_display() -> String {
    "wayland-0".to_string()
}

/// Where the listening socket and its lock file live.
pub fn default_socket_dir() -> PathBuf {
    env::var_os("XDG_RUNTIME_DIR")
        .map(Into::into)
        .unwrap_or_else(|| Path::join(&env::temp_dir(), whoami::username()))
}

pub fn maybe_read_ron_file<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<Option<T>> {
    if !path.exists() {
        eprintln!("config file does not exist at {path:?}");
        return Ok(None);
    }

    let config_str = std::fs::read_to_string(path)
        .with_context(loc!(), || format!("unable to read config file {path:?}"))?;
    let config: T = Options::default()
        .with_default_extension(Extensions::IMPLICIT_SOME)
        .from_str(&config_str)
        .with_context(loc!(), || format!("error parsing config file {path:?}"))?;
    Ok(Some(config))
}

pub fn print_default_config_and_exit<T: Serialize + Default>() -> ! {
    println!(
        "{}",
        ron::ser::to_string_pretty::<T>(&Default::default(), ron::ser::PrettyConfig::default())
            .expect("default config must be serializable")
    );
    std::process::exit(0);
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SerializableLevel(pub Level);

impl FromStr for SerializableLevel {
    type Err = ParseLevelError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Level::from_str(s)?))
    }
}

impl Serialize for SerializableLevel {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.0.as_str())
    }
}

impl<'de> Deserialize<'de> for SerializableLevel {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self(Level::from_str(&s).map_err(serde::de::Error::custom)?))
    }
}

/// Everything the server reads at startup. File values load first, CLI
/// flags override.
#[derive(Clone, Debug, PartialEq, DeriveSerialize, DeriveDeserialize)]
#[serde(default)]
pub struct WayhostConfig {
    /// Socket name under the runtime dir; exported as WAYLAND_DISPLAY.
    pub wayland_display: String,
    /// Override for $XDG_RUNTIME_DIR.
    pub socket_dir: Option<PathBuf>,
    /// TCP listener. No authentication exists on this path; leave it off
    /// unless the network is trusted end to end.
    pub tcp_listen_port: Option<u16>,
    /// Configure server-side decorations regardless of client preference.
    pub force_server_side_decorations: bool,
    /// Refuse a second concurrent client at accept time when false.
    pub multiple_clients: bool,
    pub stderr_log_level: SerializableLevel,
    pub log_file: Option<PathBuf>,
    pub file_log_level: SerializableLevel,
}

impl Default for WayhostConfig {
    fn default() -> Self {
        Self {
            wayland_display: default_wayland_display(),
            socket_dir: None,
            tcp_listen_port: None,
            force_server_side_decorations: false,
            multiple_clients: true,
            stderr_log_level: SerializableLevel(Level::INFO),
            log_file: None,
            file_log_level: SerializableLevel(Level::DEBUG),
        }
    }
}

impl WayhostConfig {
    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(default_socket_dir)
    }

    pub fn socket_path(&self) -> PathBuf {
        Path::join(&self.socket_dir(), &self.wayland_display)
    }

    pub fn lock_path(&self) -> PathBuf {
        Path::join(
            &self.socket_dir(),
            format!("{}.lock", self.wayland_display),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_round_trips_through_ron() {
        let config = WayhostConfig::default();
        let text = ron::ser::to_string(&config).unwrap();
        let parsed: WayhostConfig = Options::default()
            .with_default_extension(Extensions::IMPLICIT_SOME)
            .from_str(&text)
            .unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn socket_paths_derive_from_display_name() {
        let config = WayhostConfig {
            wayland_display: "wayland-5".into(),
            socket_dir: Some(PathBuf::from("/run/user/1000")),
            ..WayhostConfig::default()
        };
        assert_eq!(config.socket_path(), PathBuf::from("/run/user/1000/wayland-5"));
        assert_eq!(
            config.lock_path(),
            PathBuf::from("/run/user/1000/wayland-5.lock")
        );
    }
}
