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

use std::backtrace::Backtrace;
use std::env;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::fs::File;
use std::fs::OpenOptions;
use std::io;
use std::io::Write;
use std::os::fd::OwnedFd;
use std::panic;
use std::path::Path;
use std::process;
use std::sync::Mutex;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use anyhow::Context;
use tracing::Level;
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::fmt::writer::MakeWriterExt;
use tracing_subscriber::prelude::*;

use crate::prelude::*;

// https://stackoverflow.com/questions/38088067/equivalent-of-func-or-function-in-rust
#[macro_export]
macro_rules! fname {
    () => {{
        fn f() {}
        fn type_name_of<T>(_: T) -> &'static str {
            std::any::type_name::<T>()
        }
        type_name_of(f).strip_suffix("::f").unwrap()
    }};
}
pub use fname;

pub struct Location {
    pub fname: &'static str,
    pub file: &'static str,
    pub line: u32,
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} at {}:{}", self.fname, self.file, self.line)
    }
}

#[macro_export]
macro_rules! loc {
    () => {
        Location {
            fname: fname!(),
            file: file!(),
            line: line!(),
        }
    };
}
pub use loc;

pub trait LocationContextExt<R, T, E>: Context<T, E> {
    fn with_context<C, F>(self, loc: Location, context: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C;

    fn context<C>(self, loc: Location, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static;

    fn location(self, loc: Location) -> Result<T>;
}

impl<R, T, E> LocationContextExt<R, T, E> for R
where
    R: Context<T, E>,
{
    fn with_context<C, F>(self, loc: Location, context: F) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
        F: FnOnce() -> C,
    {
        Context::with_context(self, || format!("{}: {}", loc, context()))
    }

    fn context<C>(self, loc: Location, context: C) -> Result<T>
    where
        C: Display + Send + Sync + 'static,
    {
        LocationContextExt::with_context(self, loc, || context)
    }

    fn location(self, loc: Location) -> Result<T> {
        Context::with_context(self, || loc)
    }
}

/// Log a Result and then return it. Useful in cases such as
/// `foo.try_into().log(loc!()).ok()`.
pub trait LogExt<T, E>: Context<T, E> {
    fn debug(self, loc: Location) -> Result<T>;
    fn warn(self, loc: Location) -> Result<T>;
    fn log(self, loc: Location) -> Result<T>;
}

impl<R, T, E> LogExt<T, E> for R
where
    R: Context<T, E>,
{
    fn debug(self, loc: Location) -> Result<T> {
        let res = self.location(loc);
        if let Err(e) = &res {
            debug!("{e:?}");
        }
        res
    }

    fn warn(self, loc: Location) -> Result<T> {
        let res = self.location(loc);
        if let Err(e) = &res {
            warn!("{e:?}");
        }
        res
    }

    fn log(self, loc: Location) -> Result<T> {
        let res = self.location(loc);
        if let Err(e) = &res {
            error!("{e:?}");
        }
        res
    }
}

/// Like ?, but for functions which return ().
#[macro_export]
macro_rules! log_and_return {
    ($expression:expr) => {
        match $expression {
            Ok(val) => val,
            Err(e) => {
                error!("{e:?}");
                return;
            },
        }
    };
}
pub use log_and_return;

/// Like log_and_return, but continues instead of returns.
#[macro_export]
macro_rules! log_and_continue {
    ($expression:expr) => {
        match $expression {
            Ok(val) => val,
            Err(e) => {
                error!("{e:?}");
                continue;
            },
        }
    };
}
pub use log_and_continue;

pub fn configure_tracing<P: AsRef<Path>>(
    stderr_log_level: Level,
    path: Option<P>,
    file_log_level: Level,
) -> Result<()> {
    let mut layers = Vec::new();

    let layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr.with_max_level(stderr_log_level))
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::NEW | FmtSpan::CLOSE);

    if let Some(path) = path {
        let log_file = File::create(path).location(loc!())?;
        let log_file_writer = Mutex::new(log_file).with_max_level(file_log_level);
        let layer = layer.map_writer(|w| w.and(log_file_writer));
        layers.push(layer.boxed());
    } else {
        layers.push(layer.boxed());
    };

    tracing_subscriber::registry().with(layers).init();
    Ok(())
}

pub fn exit_on_thread_panic() {
    let orig_hook = panic::take_hook();
    panic::set_hook(Box::new(move |panic_info| {
        let backtrace = Backtrace::capture();
        error!("panic!:\n{panic_info}\n{backtrace}");
        orig_hook(panic_info);
        process::exit(1);
    }));
}

static ANON_FILE_COUNTER: AtomicU64 = AtomicU64::new(0);

/// An unlinked temp file pre-filled with `contents`, for payloads that cross
/// the wire as fds (keymaps, format tables). Create-then-unlink so nothing
/// lingers on disk; the fd keeps the inode alive.
pub fn anon_file(tag: &str, contents: &[u8]) -> Result<OwnedFd> {
    let n = ANON_FILE_COUNTER.fetch_add(1, Ordering::Relaxed);
    let path = env::temp_dir().join(format!("{tag}-{}-{n}", process::id()));
    let file = OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(&path);
    let mut file = LocationContextExt::with_context(file, loc!(), || format!("creating {path:?}"))?;
    fs::remove_file(&path).location(loc!())?;
    file.write_all(contents).location(loc!())?;
    Ok(file.into())
}

/// Milliseconds since `start`, truncated into the protocol's u32 timestamp
/// space.
pub fn timestamp_ms(start: std::time::Instant) -> u32 {
    start.elapsed().as_millis() as u32
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Read;
    use std::io::Seek;
    use std::io::SeekFrom;

    use super::*;

    #[test]
    fn anon_file_contents_readable_through_fd() {
        let fd = anon_file("wayhost-test", b"hello").unwrap();
        let mut file = File::from(fd);
        file.seek(SeekFrom::Start(0)).unwrap();
        let mut out = String::new();
        file.read_to_string(&mut out).unwrap();
        assert_eq!(out, "hello");
    }
}
