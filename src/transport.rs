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

//! One client connection: nonblocking reads with ancillary-fd capture,
//! message framing, and a write queue with watermark-based backpressure.
//!
//! Incoming fds are duplicated into [`OwnedFd`]s by the kernel at receive
//! time and queued in arrival order; argument decoding pops them in the same
//! order. Outgoing fds stay owned by the queue until the kernel accepts the
//! first byte of their message.

use std::collections::VecDeque;
use std::io::IoSlice;
use std::io::IoSliceMut;
use std::os::fd::AsFd;
use std::os::fd::AsRawFd;
use std::os::fd::OwnedFd;
use std::time::Duration;
use std::time::Instant;

use nix::errno::Errno;
use nix::fcntl::FcntlArg;
use nix::fcntl::OFlag;
use nix::fcntl::fcntl;
use nix::sys::socket::ControlMessage;
use nix::sys::socket::ControlMessageOwned;
use nix::sys::socket::MsgFlags;
use nix::sys::socket::recvmsg;
use nix::sys::socket::sendmsg;

use crate::prelude::*;
use crate::protocol::ProtocolError;
use crate::protocol::wire::HEADER_SIZE;
use crate::protocol::wire::MAX_FDS_PER_MESSAGE;
use crate::protocol::wire::MessageHeader;
use crate::protocol::wire::WireMessage;

/// Queued outbound bytes beyond which the connection counts as stalled.
pub const WRITE_WATERMARK: usize = 256 * 1024;
/// How long a connection may stay over the watermark before it is torn down
/// with `NO_MEMORY`.
pub const STALL_TIMEOUT: Duration = Duration::from_secs(5);

const READ_CHUNK: usize = 4096;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ReadStatus {
    /// More data may arrive later.
    Open,
    /// Peer closed its end.
    Eof,
}

#[derive(Debug)]
struct OutMessage {
    bytes: Vec<u8>,
    fds: Vec<OwnedFd>,
}

#[derive(Debug)]
pub struct Connection {
    socket: OwnedFd,
    inbuf: Vec<u8>,
    in_fds: VecDeque<OwnedFd>,
    out: VecDeque<OutMessage>,
    front_written: usize,
    queued_bytes: usize,
    stalled_since: Option<Instant>,
}

impl Connection {
    pub fn new(socket: OwnedFd) -> Result<Self> {
        fcntl(socket.as_fd(), FcntlArg::F_SETFL(OFlag::O_NONBLOCK)).location(loc!())?;
        Ok(Self {
            socket,
            inbuf: Vec::new(),
            in_fds: VecDeque::new(),
            out: VecDeque::new(),
            front_written: 0,
            queued_bytes: 0,
            stalled_since: None,
        })
    }

    pub fn socket(&self) -> &OwnedFd {
        &self.socket
    }

    /// Drains the socket into the input buffer and fd queue.
    pub fn read(&mut self) -> Result<ReadStatus> {
        let mut buf = [0u8; READ_CHUNK];
        loop {
            let mut cmsg_buf = nix::cmsg_space!([std::os::fd::RawFd; MAX_FDS_PER_MESSAGE]);
            let mut iov = [IoSliceMut::new(&mut buf)];
            let res = recvmsg::<()>(
                self.socket.as_raw_fd(),
                &mut iov,
                Some(&mut cmsg_buf),
                MsgFlags::MSG_CMSG_CLOEXEC,
            );
            match res {
                Ok(msg) => {
                    for cmsg in msg.cmsgs().location(loc!())? {
                        if let ControlMessageOwned::ScmRights(fds) = cmsg {
                            for fd in fds {
                                // SAFETY: the kernel just handed us this
                                // descriptor; nothing else owns it.
                                self.in_fds
                                    .push_back(unsafe { OwnedFd::from_raw_fd_checked(fd) });
                            }
                        }
                    }
                    let n = msg.bytes;
                    if n == 0 {
                        return Ok(ReadStatus::Eof);
                    }
                    self.inbuf.extend_from_slice(&buf[..n]);
                    if n < READ_CHUNK {
                        return Ok(ReadStatus::Open);
                    }
                },
                Err(Errno::EAGAIN) => return Ok(ReadStatus::Open),
                Err(Errno::EINTR) => continue,
                Err(Errno::ECONNRESET) => return Ok(ReadStatus::Eof),
                Err(e) => return Err(e).location(loc!()),
            }
        }
    }

    /// Pops the next complete message off the input buffer.
    pub fn next_message(&mut self) -> Result<Option<(MessageHeader, Vec<u8>)>, ProtocolError> {
        let Some(header) = MessageHeader::parse(&self.inbuf) else {
            return Ok(None);
        };
        header.validate()?;
        let len = usize::from(header.len);
        if self.inbuf.len() < len {
            return Ok(None);
        }
        let args = self.inbuf[HEADER_SIZE..len].to_vec();
        self.inbuf.drain(..len);
        Ok(Some((header, args)))
    }

    pub fn incoming_fds(&mut self) -> &mut VecDeque<OwnedFd> {
        &mut self.in_fds
    }

    pub fn queue(&mut self, msg: WireMessage) {
        self.queued_bytes += msg.bytes.len();
        self.out.push_back(OutMessage {
            bytes: msg.bytes,
            fds: msg.fds,
        });
        if self.queued_bytes > WRITE_WATERMARK && self.stalled_since.is_none() {
            self.stalled_since = Some(Instant::now());
        }
    }

    /// Writes queued messages until the socket would block.
    pub fn flush(&mut self) -> Result<()> {
        while let Some(front) = self.out.front_mut() {
            let raw_fds: Vec<std::os::fd::RawFd> =
                front.fds.iter().map(|fd| fd.as_raw_fd()).collect();
            let cmsgs = if raw_fds.is_empty() {
                Vec::new()
            } else {
                vec![ControlMessage::ScmRights(&raw_fds)]
            };
            let iov = [IoSlice::new(&front.bytes[self.front_written..])];
            match sendmsg::<()>(
                self.socket.as_raw_fd(),
                &iov,
                &cmsgs,
                MsgFlags::MSG_DONTWAIT | MsgFlags::MSG_NOSIGNAL,
                None,
            ) {
                Ok(n) => {
                    // The kernel took the ancillary payload with the first
                    // byte; drop our references now that they are delivered.
                    front.fds.clear();
                    self.front_written += n;
                    self.queued_bytes -= n;
                    if self.front_written == front.bytes.len() {
                        self.out.pop_front();
                        self.front_written = 0;
                    }
                },
                Err(Errno::EAGAIN) => break,
                Err(Errno::EINTR) => continue,
                Err(e) => return Err(e).location(loc!()),
            }
        }
        if self.queued_bytes <= WRITE_WATERMARK {
            self.stalled_since = None;
        }
        Ok(())
    }

    pub fn has_pending_writes(&self) -> bool {
        !self.out.is_empty()
    }

    pub fn over_watermark(&self) -> bool {
        self.queued_bytes > WRITE_WATERMARK
    }

    /// How long the connection has been over the write watermark, if it is.
    pub fn stalled_for(&self, now: Instant) -> Option<Duration> {
        self.stalled_since.map(|since| now.duration_since(since))
    }
}

/// `OwnedFd::from_raw_fd` spelled so the -1 sentinel can never sneak in.
trait FromRawFdChecked {
    /// # Safety
    /// `fd` must be an open descriptor owned by the caller.
    unsafe fn from_raw_fd_checked(fd: std::os::fd::RawFd) -> OwnedFd;
}

impl FromRawFdChecked for OwnedFd {
    unsafe fn from_raw_fd_checked(fd: std::os::fd::RawFd) -> OwnedFd {
        assert!(fd >= 0);
        // SAFETY: forwarded from caller.
        unsafe { <OwnedFd as std::os::fd::FromRawFd>::from_raw_fd(fd) }
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    use crate::protocol::ObjectId;
    use crate::protocol::wire::MessageBuilder;

    use super::*;

    fn pair() -> (Connection, UnixStream) {
        let (ours, theirs) = UnixStream::pair().unwrap();
        (Connection::new(ours.into()).unwrap(), theirs)
    }

    #[test]
    fn queue_and_flush_delivers_bytes() {
        let (mut conn, mut peer) = pair();
        conn.queue(MessageBuilder::new(ObjectId(1), 0).uint(0xdead_beef).build());
        conn.flush().unwrap();
        assert!(!conn.has_pending_writes());

        let mut buf = [0u8; 12];
        peer.read_exact(&mut buf).unwrap();
        let header = MessageHeader::parse(&buf).unwrap();
        assert_eq!(header.object, ObjectId(1));
        assert_eq!(header.len, 12);
    }

    #[test]
    fn reads_framed_messages() {
        let (mut conn, mut peer) = pair();
        let msg = MessageBuilder::new(ObjectId(3), 2).uint(1).uint(2).build();
        peer.write_all(&msg.bytes).unwrap();

        assert_eq!(conn.read().unwrap(), ReadStatus::Open);
        let (header, args) = conn.next_message().unwrap().unwrap();
        assert_eq!(header.object, ObjectId(3));
        assert_eq!(header.opcode, 2);
        assert_eq!(args.len(), 8);
        assert!(conn.next_message().unwrap().is_none());
    }

    #[test]
    fn partial_message_waits_for_more_bytes() {
        let (mut conn, mut peer) = pair();
        let msg = MessageBuilder::new(ObjectId(3), 2).uint(1).uint(2).build();
        peer.write_all(&msg.bytes[..10]).unwrap();
        conn.read().unwrap();
        assert!(conn.next_message().unwrap().is_none());

        peer.write_all(&msg.bytes[10..]).unwrap();
        conn.read().unwrap();
        assert!(conn.next_message().unwrap().is_some());
    }

    #[test]
    fn malformed_length_is_a_protocol_error() {
        let (mut conn, mut peer) = pair();
        // Header declaring a 6-byte message.
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&1u32.to_ne_bytes());
        bytes.extend_from_slice(&((6u32 << 16) | 0).to_ne_bytes());
        peer.write_all(&bytes).unwrap();
        conn.read().unwrap();
        assert!(conn.next_message().is_err());
    }

    #[test]
    fn eof_reported() {
        let (mut conn, peer) = pair();
        drop(peer);
        assert_eq!(conn.read().unwrap(), ReadStatus::Eof);
    }

    #[test]
    fn fd_passing_round_trip() {
        let (mut a, theirs) = pair();
        let mut b = Connection::new(theirs.into()).unwrap();

        let payload = crate::utils::anon_file("wayhost-transport-test", b"x").unwrap();
        let msg = MessageBuilder::new(ObjectId(2), 0).uint(7).fd(payload).build();
        a.queue(msg);
        a.flush().unwrap();

        b.read().unwrap();
        let (header, _args) = b.next_message().unwrap().unwrap();
        assert_eq!(header.object, ObjectId(2));
        assert_eq!(b.incoming_fds().len(), 1);
    }

    #[test]
    fn watermark_accounting() {
        let (mut conn, _peer) = pair();
        assert!(!conn.over_watermark());
        let payload = vec![0u8; 1024];
        while !conn.over_watermark() {
            conn.queue(MessageBuilder::new(ObjectId(1), 0).array(&payload).build());
        }
        assert!(conn.stalled_for(Instant::now()).is_some());
    }
}
