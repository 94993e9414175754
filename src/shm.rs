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

//! Shared-memory pools and the buffer store.
//!
//! A pool's mapping must outlive the pool *resource*: clients routinely
//! create a pool, carve buffers out of it, and destroy the pool while the
//! buffers are still attached to surfaces. The mapping is therefore owned by
//! an [`Arc<PoolMemory>`] pinned by every derived buffer; destroying the pool
//! resource closes the fd and drops one reference, nothing more.

use std::ffi::c_void;
use std::num::NonZeroUsize;
use std::os::fd::AsFd;
use std::os::fd::OwnedFd;
use std::ptr::NonNull;
use std::sync::Arc;
use std::sync::Mutex;

use num_enum::IntoPrimitive;
use num_enum::TryFromPrimitive;

use nix::sys::mman;

use crate::prelude::*;
use crate::protocol::Interface;
use crate::protocol::ObjectId;
use crate::protocol::ProtocolError;
use crate::protocol::ShmError;
use crate::protocol::geometry::Size;
use crate::protocol::interfaces::wl_buffer;
use crate::protocol::interfaces::wl_shm;
use crate::protocol::interfaces::wl_shm_pool;
use crate::protocol::wire::ArgReader;
use crate::protocol::wire::MessageBuilder;
use crate::server::WayhostState;
use crate::server::client::ClientId;
use crate::server::client::Resource;
use crate::server::client::ResourceKind;

/// Documented upper bound on a single pool's size.
pub const MAX_POOL_BYTES: usize = 256 << 20;
/// Documented upper bound on live wl_buffers per client.
pub const MAX_BUFFERS_PER_CLIENT: u32 = 1024;

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct PoolId(pub u64);

#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq)]
pub struct BufferId(pub u64);

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u32)]
pub enum ShmFormat {
    Argb8888 = 0,
    Xrgb8888 = 1,
}

impl ShmFormat {
    pub fn bytes_per_pixel(self) -> i32 {
        match self {
            Self::Argb8888 | Self::Xrgb8888 => 4,
        }
    }

    pub fn advertised() -> [ShmFormat; 2] {
        [Self::Argb8888, Self::Xrgb8888]
    }
}

#[derive(Debug)]
struct MappedRegion {
    ptr: NonNull<c_void>,
    len: usize,
}

// SAFETY: the pointer names a MAP_SHARED region that stays valid until we
// munmap it in Drop; access is serialized by the mutex in PoolMemory.
unsafe impl Send for MappedRegion {}

impl Drop for MappedRegion {
    fn drop(&mut self) {
        if let Some(len) = NonZeroUsize::new(self.len) {
            // SAFETY: ptr/len are exactly what mmap returned.
            let _ = unsafe { mman::munmap(self.ptr, len.get()) };
        }
    }
}

/// A client's mmap'd pool, shared between the pool resource, every derived
/// buffer, and scene snapshots handed to the renderer.
#[derive(Debug)]
pub struct PoolMemory {
    region: Mutex<MappedRegion>,
}

impl PoolMemory {
    pub fn map(fd: &OwnedFd, size: usize) -> Result<Self> {
        let len = NonZeroUsize::new(size).ok_or_else(|| anyhow!("zero-sized pool"))?;
        // SAFETY: mapping a client-supplied fd read/write; the region is
        // accessed only through bounds-checked with_slice.
        let ptr = unsafe {
            mman::mmap(
                None,
                len,
                mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE,
                mman::MapFlags::MAP_SHARED,
                fd.as_fd(),
                0,
            )
            .location(loc!())?
        };
        Ok(Self {
            region: Mutex::new(MappedRegion {
                ptr,
                len: len.get(),
            }),
        })
    }

    /// Replaces the mapping after a pool resize. Existing buffers observe the
    /// new mapping on their next read.
    pub fn remap(&self, fd: &OwnedFd, size: usize) -> Result<()> {
        let len = NonZeroUsize::new(size).ok_or_else(|| anyhow!("zero-sized pool"))?;
        // SAFETY: as in map.
        let ptr = unsafe {
            mman::mmap(
                None,
                len,
                mman::ProtFlags::PROT_READ | mman::ProtFlags::PROT_WRITE,
                mman::MapFlags::MAP_SHARED,
                fd.as_fd(),
                0,
            )
            .location(loc!())?
        };
        let mut region = self.region.lock().unwrap();
        *region = MappedRegion {
            ptr,
            len: len.get(),
        };
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.region.lock().unwrap().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs `f` over a bounds-checked view of the mapping.
    pub fn with_slice<R>(
        &self,
        offset: usize,
        len: usize,
        f: impl FnOnce(&[u8]) -> R,
    ) -> Result<R> {
        let region = self.region.lock().unwrap();
        if offset.checked_add(len).is_none_or(|end| end > region.len) {
            bail!("read of {len}@{offset} beyond pool of {}", region.len);
        }
        // SAFETY: bounds checked above; the region stays mapped while the
        // lock is held. The client may race writes into the shared mapping,
        // which can tear pixels but never touches memory safety for u8 reads.
        let slice =
            unsafe { std::slice::from_raw_parts(region.ptr.as_ptr().cast::<u8>().add(offset), len) };
        Ok(f(slice))
    }
}

/// The pool resource's own state. Dropping this closes the fd; the mapping
/// lives on in `memory` until the last buffer goes away.
#[derive(Debug)]
pub struct ShmPool {
    pub client: ClientId,
    pub memory: Arc<PoolMemory>,
    pub fd: OwnedFd,
    pub size: usize,
    pub buffers: Vec<BufferId>,
}

/// Geometry of an SHM buffer within its pool.
#[derive(Debug, Clone)]
pub struct ShmBufferSpec {
    pub memory: Arc<PoolMemory>,
    pub offset: i32,
    pub width: i32,
    pub height: i32,
    pub stride: i32,
    pub format: ShmFormat,
}

impl ShmBufferSpec {
    pub fn byte_len(&self) -> usize {
        (self.height * self.stride) as usize
    }
}

/// One plane of a dmabuf buffer.
#[derive(Debug)]
pub struct DmabufPlane {
    pub fd: OwnedFd,
    pub plane_idx: u32,
    pub offset: u32,
    pub stride: u32,
    pub modifier: u64,
}

#[derive(Debug, Clone)]
pub enum BufferSource {
    Shm(ShmBufferSpec),
    /// Opaque GPU-side storage; the core records descriptors only.
    Dmabuf {
        planes: Arc<Vec<DmabufPlane>>,
        format: u32,
        flags: u32,
    },
}

/// A wl_buffer, SHM- or dmabuf-backed.
#[derive(Debug)]
pub struct BufferRecord {
    pub client: ClientId,
    pub id: ObjectId,
    pub source: BufferSource,
    pub size: Size<i32>,
    /// Pool this buffer was carved from, for resize bookkeeping.
    pub pool: Option<PoolId>,
    /// Set while some surface's applied state references the buffer; a
    /// release must be sent exactly once when it stops being current.
    pub held_by: Option<crate::surface::SurfaceId>,
    /// Replaced and waiting for the renderer's retire ack.
    pub awaiting_retire: bool,
}

impl BufferRecord {
    /// Sends `wl_buffer.release`, guarded against double-send.
    pub fn send_release(&mut self, state_clients: &mut crate::server::Clients) {
        if let Some(client) = state_clients.get_mut(&self.client) {
            client.send(MessageBuilder::new(self.id, wl_buffer::EV_RELEASE).build());
        }
        self.awaiting_retire = false;
    }
}

/// wl_shm requests.
pub fn shm_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_shm::CREATE_POOL => {
            let id = args.new_id()?;
            let fd = args.fd()?;
            let size = args.int()?;
            create_pool(state, client_id, resource, id, fd, size)
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_shm opcode {opcode}"),
        )),
    }
}

fn create_pool(
    state: &mut WayhostState,
    client_id: ClientId,
    shm: Resource,
    id: ObjectId,
    fd: OwnedFd,
    size: i32,
) -> Result<(), ProtocolError> {
    if size <= 0 {
        return Err(ProtocolError::new(
            shm.id,
            ShmError::InvalidStride,
            format!("pool size {size} is not positive"),
        ));
    }
    if size as usize > MAX_POOL_BYTES {
        return Err(ProtocolError::new(
            shm.id,
            ShmError::InvalidFd,
            format!("pool size {size} exceeds the {MAX_POOL_BYTES} byte limit"),
        ));
    }
    let memory = PoolMemory::map(&fd, size as usize).map_err(|e| {
        ProtocolError::new(shm.id, ShmError::InvalidFd, format!("mmap failed: {e:#}"))
    })?;

    let pool_id = PoolId(state.ids.next());
    state.client_mut(client_id)?.create(
        id,
        Interface::WlShmPool,
        shm.version,
        ResourceKind::ShmPool(pool_id),
    )?;
    state.pools.insert(
        pool_id,
        ShmPool {
            client: client_id,
            memory: Arc::new(memory),
            fd,
            size: size as usize,
            buffers: Vec::new(),
        },
    );
    Ok(())
}

/// wl_shm_pool requests.
pub fn pool_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    pool_id: PoolId,
    opcode: u16,
    args: &mut ArgReader,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_shm_pool::CREATE_BUFFER => {
            let id = args.new_id()?;
            let offset = args.int()?;
            let width = args.int()?;
            let height = args.int()?;
            let stride = args.int()?;
            let format = args.uint()?;
            create_buffer(
                state, client_id, resource, pool_id, id, offset, width, height, stride, format,
            )
        },
        wl_shm_pool::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        wl_shm_pool::RESIZE => {
            let size = args.int()?;
            resize_pool(state, resource, pool_id, size)
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_shm_pool opcode {opcode}"),
        )),
    }
}

#[allow(clippy::too_many_arguments)]
fn create_buffer(
    state: &mut WayhostState,
    client_id: ClientId,
    pool_res: Resource,
    pool_id: PoolId,
    id: ObjectId,
    offset: i32,
    width: i32,
    height: i32,
    stride: i32,
    format: u32,
) -> Result<(), ProtocolError> {
    let format = ShmFormat::try_from(format).map_err(|_| {
        ProtocolError::new(
            pool_res.id,
            ShmError::InvalidFormat,
            format!("unknown format {format:#x}"),
        )
    })?;
    let pool = state
        .pools
        .get(&pool_id)
        .ok_or_else(|| ProtocolError::invalid_object(pool_res.id))?;

    let invalid = |message: String| -> ProtocolError {
        ProtocolError::new(pool_res.id, ShmError::InvalidStride, message)
    };
    if width <= 0 || height <= 0 || offset < 0 {
        return Err(invalid(format!("bad buffer geometry {width}x{height}@{offset}")));
    }
    let min_stride = width
        .checked_mul(format.bytes_per_pixel())
        .ok_or_else(|| invalid("stride overflow".into()))?;
    if stride < min_stride {
        return Err(invalid(format!(
            "stride {stride} below minimum {min_stride} for width {width}"
        )));
    }
    let end = i64::from(offset) + i64::from(height) * i64::from(stride);
    if end > pool.size as i64 {
        return Err(invalid(format!(
            "buffer extends to {end}, beyond pool of {}",
            pool.size
        )));
    }

    {
        let client = state.client_mut(client_id)?;
        if client.live_buffers >= MAX_BUFFERS_PER_CLIENT {
            return Err(ProtocolError::no_memory(format!(
                "{client_id} exceeded {MAX_BUFFERS_PER_CLIENT} live buffers"
            )));
        }
    }

    let buffer_id = BufferId(state.ids.next());
    let memory = state.pools.get(&pool_id).unwrap().memory.clone();
    let client = state.client_mut(client_id)?;
    client.create(id, Interface::WlBuffer, 1, ResourceKind::Buffer(buffer_id))?;
    client.live_buffers += 1;
    state.buffers.insert(
        buffer_id,
        BufferRecord {
            client: client_id,
            id,
            source: BufferSource::Shm(ShmBufferSpec {
                memory,
                offset,
                width,
                height,
                stride,
                format,
            }),
            size: Size {
                w: width,
                h: height,
            },
            pool: Some(pool_id),
            held_by: None,
            awaiting_retire: false,
        },
    );
    if let Some(pool) = state.pools.get_mut(&pool_id) {
        pool.buffers.push(buffer_id);
    }
    Ok(())
}

fn resize_pool(
    state: &mut WayhostState,
    resource: Resource,
    pool_id: PoolId,
    size: i32,
) -> Result<(), ProtocolError> {
    if size <= 0 || size as usize > MAX_POOL_BYTES {
        return Err(ProtocolError::new(
            resource.id,
            ShmError::InvalidFd,
            format!("bad pool size {size}"),
        ));
    }
    let Some(pool) = state.pools.get(&pool_id) else {
        return Err(ProtocolError::invalid_object(resource.id));
    };

    // Refuse any resize that would truncate an outstanding buffer.
    for buffer_id in &pool.buffers {
        let Some(buffer) = state.buffers.get(buffer_id) else {
            continue;
        };
        if let BufferSource::Shm(spec) = &buffer.source {
            let end = i64::from(spec.offset) + i64::from(spec.height) * i64::from(spec.stride);
            if end > i64::from(size) {
                return Err(ProtocolError::new(
                    resource.id,
                    ShmError::InvalidStride,
                    format!("resize to {size} would truncate buffer {}", buffer.id),
                ));
            }
        }
    }

    pool.memory.remap(&pool.fd, size as usize).map_err(|e| {
        ProtocolError::new(
            resource.id,
            ShmError::InvalidFd,
            format!("remap failed: {e:#}"),
        )
    })?;
    state.pools.get_mut(&pool_id).unwrap().size = size as usize;
    Ok(())
}

/// wl_buffer requests.
pub fn buffer_request(
    state: &mut WayhostState,
    client_id: ClientId,
    resource: Resource,
    opcode: u16,
) -> Result<(), ProtocolError> {
    match opcode {
        wl_buffer::DESTROY => {
            state.destroy_resource(client_id, resource.id);
            Ok(())
        },
        _ => Err(ProtocolError::invalid_method(
            resource.id,
            format!("wl_buffer opcode {opcode}"),
        )),
    }
}

/// Domain cleanup when a pool resource dies. The mapping survives through
/// the buffers' Arcs; only the fd closes here.
pub fn pool_destroyed(state: &mut WayhostState, pool_id: PoolId) {
    if state.pools.remove(&pool_id).is_none() {
        debug!("pool {pool_id:?} already gone");
    }
}

/// Domain cleanup when a buffer dies: every surface reference is dropped so
/// no later commit can read freed memory.
pub fn buffer_destroyed(state: &mut WayhostState, buffer_id: BufferId) {
    let Some(record) = state.buffers.remove(&buffer_id) else {
        return;
    };
    if let Some(pool_id) = record.pool
        && let Some(pool) = state.pools.get_mut(&pool_id)
    {
        pool.buffers.retain(|b| *b != buffer_id);
    }
    if let Some(client) = state.clients.get_mut(&record.client) {
        client.live_buffers = client.live_buffers.saturating_sub(1);
    }
    crate::surface::sweep_buffer_references(state, buffer_id);
}

/// Announces the supported formats on bind, as the protocol requires.
pub fn send_formats(client: &mut crate::server::client::Client, shm: ObjectId) {
    for format in ShmFormat::advertised() {
        client.send(
            MessageBuilder::new(shm, wl_shm::EV_FORMAT)
                .uint(format.into())
                .build(),
        );
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::fs::File;
    use std::os::fd::OwnedFd;

    /// An anonymous file of `size` zero bytes, standing in for a client's
    /// sealed shm fd.
    pub fn shm_fd(size: u64) -> OwnedFd {
        let fd = crate::utils::anon_file("wayhost-shm-test", b"").unwrap();
        let file = File::from(fd);
        file.set_len(size).unwrap();
        file.into()
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;

    use super::test_support::shm_fd;
    use super::*;

    #[test]
    fn pool_memory_maps_and_bounds_checks() {
        let fd = shm_fd(4096);
        let memory = PoolMemory::map(&fd, 4096).unwrap();
        assert_eq!(memory.len(), 4096);
        memory.with_slice(0, 4096, |s| assert_eq!(s.len(), 4096)).unwrap();
        memory.with_slice(4092, 4, |_| ()).unwrap();
        assert!(memory.with_slice(4093, 4, |_| ()).is_err());
        assert!(memory.with_slice(usize::MAX, 2, |_| ()).is_err());
    }

    #[test]
    fn mapping_outlives_original_handle() {
        let fd = shm_fd(4096);
        let memory = Arc::new(PoolMemory::map(&fd, 4096).unwrap());
        let held = memory.clone();
        drop(fd);
        drop(memory);
        held.with_slice(0, 16, |s| assert_eq!(s[0], 0)).unwrap();
    }

    #[test]
    fn remap_grows_the_view() {
        let fd = shm_fd(4096);
        let memory = PoolMemory::map(&fd, 4096).unwrap();
        let file = File::from(fd.try_clone().unwrap());
        file.set_len(8192).unwrap();
        memory.remap(&fd, 8192).unwrap();
        assert_eq!(memory.len(), 8192);
        memory.with_slice(8000, 100, |_| ()).unwrap();
    }

    #[test]
    fn format_bpp() {
        assert_eq!(ShmFormat::Argb8888.bytes_per_pixel(), 4);
        assert_eq!(ShmFormat::try_from(1u32).unwrap(), ShmFormat::Xrgb8888);
        assert!(ShmFormat::try_from(0x3432_3142u32).is_err());
    }
}
