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

//! Wire marshalling: the canonical message framing (`u32 object id, u16
//! opcode, u16 length`) and typed argument encoding/decoding.
//!
//! Multi-byte values are native-endian; both peers live on the same machine.
//! Strings carry an explicit length including the NUL terminator; strings and
//! arrays are padded to 4 bytes. File descriptors travel out of band via
//! `SCM_RIGHTS` and are consumed from the connection's fd queue in argument
//! order.

use std::collections::VecDeque;
use std::mem;
use std::os::fd::OwnedFd;

use static_assertions::const_assert;

use crate::protocol::ObjectId;
use crate::protocol::ProtocolError;

pub const HEADER_SIZE: usize = 8;
/// Largest message either peer may send, header included.
pub const MAX_MESSAGE_SIZE: usize = 4096;
/// Ancillary-data budget per message.
pub const MAX_FDS_PER_MESSAGE: usize = 28;

const_assert!(mem::size_of::<usize>() >= mem::size_of::<u32>());

/// Signed 24.8 fixed-point value.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Fixed(pub i32);

impl Fixed {
    pub fn from_int(v: i32) -> Self {
        Self(v << 8)
    }

    pub fn from_f64(v: f64) -> Self {
        Self((v * 256.0) as i32)
    }

    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / 256.0
    }

    pub fn to_int(self) -> i32 {
        self.0 >> 8
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct MessageHeader {
    pub object: ObjectId,
    pub opcode: u16,
    pub len: u16,
}

impl MessageHeader {
    pub fn parse(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < HEADER_SIZE {
            return None;
        }
        let object = u32::from_ne_bytes(bytes[0..4].try_into().unwrap());
        let opcode_len = u32::from_ne_bytes(bytes[4..8].try_into().unwrap());
        Some(Self {
            object: ObjectId(object),
            opcode: (opcode_len & 0xffff) as u16,
            len: (opcode_len >> 16) as u16,
        })
    }

    /// Structural sanity independent of any object table.
    pub fn validate(&self) -> Result<(), ProtocolError> {
        let len = usize::from(self.len);
        if len < HEADER_SIZE || len % 4 != 0 || len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::invalid_method(
                self.object,
                format!("malformed message length {len}"),
            ));
        }
        if self.object.is_null() {
            return Err(ProtocolError::invalid_object(self.object));
        }
        Ok(())
    }

    fn encode(object: ObjectId, opcode: u16, len: u16) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(&object.0.to_ne_bytes());
        out[4..8].copy_from_slice(&((u32::from(len) << 16) | u32::from(opcode)).to_ne_bytes());
        out
    }
}

fn padding(len: usize) -> usize {
    (4 - len % 4) % 4
}

/// Typed reader over one message's argument bytes.
///
/// Every accessor fails with an `invalid_method` protocol error naming the
/// sender, so handlers can decode with plain `?`.
pub struct ArgReader<'a> {
    sender: ObjectId,
    buf: &'a [u8],
    pos: usize,
    fds: &'a mut VecDeque<OwnedFd>,
}

impl<'a> ArgReader<'a> {
    pub fn new(sender: ObjectId, buf: &'a [u8], fds: &'a mut VecDeque<OwnedFd>) -> Self {
        Self {
            sender,
            buf,
            pos: 0,
            fds,
        }
    }

    fn short(&self) -> ProtocolError {
        ProtocolError::invalid_method(self.sender, "message too short for its arguments")
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], ProtocolError> {
        if self.pos + n > self.buf.len() {
            return Err(self.short());
        }
        let out = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn uint(&mut self) -> Result<u32, ProtocolError> {
        Ok(u32::from_ne_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn int(&mut self) -> Result<i32, ProtocolError> {
        Ok(self.uint()? as i32)
    }

    pub fn fixed(&mut self) -> Result<Fixed, ProtocolError> {
        Ok(Fixed(self.int()?))
    }

    /// An object argument; 0 encodes a null object.
    pub fn object(&mut self) -> Result<ObjectId, ProtocolError> {
        Ok(ObjectId(self.uint()?))
    }

    /// A new_id argument; must be non-null.
    pub fn new_id(&mut self) -> Result<ObjectId, ProtocolError> {
        let id = ObjectId(self.uint()?);
        if id.is_null() {
            return Err(ProtocolError::invalid_method(self.sender, "null new_id"));
        }
        Ok(id)
    }

    pub fn string(&mut self) -> Result<String, ProtocolError> {
        self.string_or_null()?
            .ok_or_else(|| ProtocolError::invalid_method(self.sender, "unexpected null string"))
    }

    pub fn string_or_null(&mut self) -> Result<Option<String>, ProtocolError> {
        let len = self.uint()? as usize;
        if len == 0 {
            return Ok(None);
        }
        let raw = self.take(len + padding(len))?;
        // len includes the NUL terminator.
        let Some(text) = raw.get(..len - 1) else {
            return Err(self.short());
        };
        let s = String::from_utf8(text.to_vec())
            .map_err(|_| ProtocolError::invalid_method(self.sender, "string is not UTF-8"))?;
        Ok(Some(s))
    }

    pub fn array(&mut self) -> Result<Vec<u8>, ProtocolError> {
        let len = self.uint()? as usize;
        let raw = self.take(len + padding(len))?;
        Ok(raw[..len].to_vec())
    }

    pub fn fd(&mut self) -> Result<OwnedFd, ProtocolError> {
        self.fds.pop_front().ok_or_else(|| {
            ProtocolError::invalid_method(self.sender, "message missing a file descriptor")
        })
    }

    /// Rejects trailing garbage after the declared arguments.
    pub fn finish(self) -> Result<(), ProtocolError> {
        if self.pos != self.buf.len() {
            return Err(ProtocolError::invalid_method(
                self.sender,
                "trailing bytes after arguments",
            ));
        }
        Ok(())
    }
}

/// A fully marshalled message plus the fds that ride along with it.
#[derive(Debug)]
pub struct WireMessage {
    pub bytes: Vec<u8>,
    pub fds: Vec<OwnedFd>,
}

/// Builder for outbound events.
#[derive(Debug)]
pub struct MessageBuilder {
    object: ObjectId,
    opcode: u16,
    args: Vec<u8>,
    fds: Vec<OwnedFd>,
}

impl MessageBuilder {
    pub fn new(object: ObjectId, opcode: u16) -> Self {
        Self {
            object,
            opcode,
            args: Vec::new(),
            fds: Vec::new(),
        }
    }

    pub fn uint(mut self, v: u32) -> Self {
        self.args.extend_from_slice(&v.to_ne_bytes());
        self
    }

    pub fn int(self, v: i32) -> Self {
        self.uint(v as u32)
    }

    pub fn fixed(self, v: Fixed) -> Self {
        self.int(v.0)
    }

    pub fn object(self, id: ObjectId) -> Self {
        self.uint(id.0)
    }

    pub fn string(mut self, s: &str) -> Self {
        let len = s.len() + 1;
        self.args.extend_from_slice(&(len as u32).to_ne_bytes());
        self.args.extend_from_slice(s.as_bytes());
        self.args.push(0);
        self.args.extend(std::iter::repeat_n(0, padding(len)));
        self
    }

    pub fn string_or_null(self, s: Option<&str>) -> Self {
        match s {
            Some(s) => self.string(s),
            None => self.uint(0),
        }
    }

    pub fn array(mut self, bytes: &[u8]) -> Self {
        self.args
            .extend_from_slice(&(bytes.len() as u32).to_ne_bytes());
        self.args.extend_from_slice(bytes);
        self.args.extend(std::iter::repeat_n(0, padding(bytes.len())));
        self
    }

    pub fn fd(mut self, fd: OwnedFd) -> Self {
        self.fds.push(fd);
        self
    }

    /// # Panics
    /// If the message exceeds [`MAX_MESSAGE_SIZE`] or carries more than
    /// [`MAX_FDS_PER_MESSAGE`] fds; both are engine bugs, not runtime
    /// conditions.
    pub fn build(self) -> WireMessage {
        let len = HEADER_SIZE + self.args.len();
        assert!(len <= MAX_MESSAGE_SIZE, "oversized event ({len} bytes)");
        assert!(self.fds.len() <= MAX_FDS_PER_MESSAGE);
        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(&MessageHeader::encode(self.object, self.opcode, len as u16));
        bytes.extend_from_slice(&self.args);
        WireMessage {
            bytes,
            fds: self.fds,
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn read_args(msg: &WireMessage) -> (MessageHeader, Vec<u8>) {
        let header = MessageHeader::parse(&msg.bytes).unwrap();
        header.validate().unwrap();
        assert_eq!(usize::from(header.len), msg.bytes.len());
        (header, msg.bytes[HEADER_SIZE..].to_vec())
    }

    #[test]
    fn header_round_trip() {
        let msg = MessageBuilder::new(ObjectId(7), 3).uint(42).build();
        let (header, args) = read_args(&msg);
        assert_eq!(header.object, ObjectId(7));
        assert_eq!(header.opcode, 3);
        assert_eq!(header.len, 12);
        assert_eq!(args.len(), 4);
    }

    #[test]
    fn validate_rejects_bad_lengths() {
        for len in [0u16, 4, 10, (MAX_MESSAGE_SIZE + 4) as u16] {
            let header = MessageHeader {
                object: ObjectId(1),
                opcode: 0,
                len,
            };
            assert!(header.validate().is_err(), "len {len} should be rejected");
        }
    }

    #[test]
    fn validate_rejects_null_sender() {
        let header = MessageHeader {
            object: ObjectId(0),
            opcode: 0,
            len: 8,
        };
        assert!(header.validate().is_err());
    }

    #[test]
    fn string_padding_and_nul() {
        let msg = MessageBuilder::new(ObjectId(1), 0).string("abc").build();
        // 4 len + 3 chars + NUL = aligned, no pad.
        assert_eq!(msg.bytes.len(), HEADER_SIZE + 8);
        let (_, args) = read_args(&msg);
        let mut fds = VecDeque::new();
        let mut reader = ArgReader::new(ObjectId(1), &args, &mut fds);
        assert_eq!(reader.string().unwrap(), "abc");
        reader.finish().unwrap();
    }

    #[test]
    fn null_string_encodes_as_zero() {
        let msg = MessageBuilder::new(ObjectId(1), 0).string_or_null(None).build();
        let (_, args) = read_args(&msg);
        let mut fds = VecDeque::new();
        let mut reader = ArgReader::new(ObjectId(1), &args, &mut fds);
        assert_eq!(reader.string_or_null().unwrap(), None);
        reader.finish().unwrap();
    }

    #[test]
    fn trailing_bytes_rejected() {
        let msg = MessageBuilder::new(ObjectId(1), 0).uint(1).uint(2).build();
        let (_, args) = read_args(&msg);
        let mut fds = VecDeque::new();
        let mut reader = ArgReader::new(ObjectId(1), &args, &mut fds);
        reader.uint().unwrap();
        assert!(reader.finish().is_err());
    }

    #[test]
    fn missing_fd_is_an_error() {
        let mut fds = VecDeque::new();
        let mut reader = ArgReader::new(ObjectId(1), &[], &mut fds);
        assert!(reader.fd().is_err());
    }

    #[test]
    fn fixed_conversions() {
        assert_eq!(Fixed::from_int(5).to_int(), 5);
        assert_eq!(Fixed::from_int(-3).to_int(), -3);
        assert_eq!(Fixed::from_f64(1.5).to_f64(), 1.5);
        assert_eq!(Fixed::from_f64(0.25).0, 64);
    }

    proptest! {
        #[test]
        fn int_string_array_round_trip(
            a in any::<i32>(),
            s in "[ -~]{0,64}",
            arr in proptest::collection::vec(any::<u8>(), 0..64),
        ) {
            let msg = MessageBuilder::new(ObjectId(3), 1)
                .int(a)
                .string(&s)
                .array(&arr)
                .build();
            prop_assert_eq!(msg.bytes.len() % 4, 0);
            let (_, args) = read_args(&msg);
            let mut fds = VecDeque::new();
            let mut reader = ArgReader::new(ObjectId(3), &args, &mut fds);
            prop_assert_eq!(reader.int().unwrap(), a);
            prop_assert_eq!(reader.string().unwrap(), s);
            prop_assert_eq!(reader.array().unwrap(), arr);
            reader.finish().unwrap();
        }

        #[test]
        fn fixed_f64_round_trip(v in -8_000_000.0f64..8_000_000.0) {
            let fixed = Fixed::from_f64(v);
            prop_assert!((fixed.to_f64() - v).abs() < (1.0 / 256.0) + 1e-9);
        }
    }
}
