// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! RFC 6455 frame layer. Client-to-server frames must be masked; frames we
//! emit are unmasked with FIN set. The decoder enforces the message size
//! budget at header time, before any payload is buffered, tracking the
//! running length of the fragmented message in progress.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::Error;
use crate::protocol::CloseCode;

/// Largest possible frame header: 2 fixed bytes, 8 extended-length bytes,
/// 4 mask bytes.
pub const MAX_HEADER_SIZE: usize = 14;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl Opcode {
    fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            0x0 => Some(Self::Continuation),
            0x1 => Some(Self::Text),
            0x2 => Some(Self::Binary),
            0x8 => Some(Self::Close),
            0x9 => Some(Self::Ping),
            0xA => Some(Self::Pong),
            _ => None,
        }
    }

    fn bits(self) -> u8 {
        match self {
            Self::Continuation => 0x0,
            Self::Text => 0x1,
            Self::Binary => 0x2,
            Self::Close => 0x8,
            Self::Ping => 0x9,
            Self::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, Self::Close | Self::Ping | Self::Pong)
    }
}

/// A single decoded (already unmasked) or to-be-encoded frame.
#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub rsv1: bool,
    pub opcode: Opcode,
    pub payload: Bytes,
}

impl Frame {
    /// Binary data frame, FIN set.
    pub fn binary(payload: Bytes) -> Self {
        Self { fin: true, rsv1: false, opcode: Opcode::Binary, payload }
    }

    /// Binary data frame carrying a per-message-deflate payload (RSV1 set).
    pub fn compressed(payload: Bytes) -> Self {
        Self { fin: true, rsv1: true, opcode: Opcode::Binary, payload }
    }

    pub fn ping() -> Self {
        Self { fin: true, rsv1: false, opcode: Opcode::Ping, payload: Bytes::new() }
    }

    pub fn pong(payload: Bytes) -> Self {
        Self { fin: true, rsv1: false, opcode: Opcode::Pong, payload }
    }

    pub fn close(code: CloseCode) -> Self {
        Self {
            fin: true,
            rsv1: false,
            opcode: Opcode::Close,
            payload: Bytes::copy_from_slice(&code.code().to_be_bytes()),
        }
    }
}

/// Frame codec for one session. `message_size_limit <= 0` means unlimited.
pub struct FrameCodec {
    message_size_limit: i64,
    assembled: u64,
}

impl FrameCodec {
    pub fn new(message_size_limit: i64) -> Self {
        Self { message_size_limit, assembled: 0 }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>, Error> {
        if src.len() < 2 {
            return Ok(None);
        }

        let b0 = src[0];
        let b1 = src[1];

        let fin = b0 & 0x80 != 0;
        let rsv1 = b0 & 0x40 != 0;
        if b0 & 0x30 != 0 {
            return Err(Error::Protocol("reserved bits rsv2/rsv3 set"));
        }
        let opcode =
            Opcode::from_bits(b0 & 0x0F).ok_or(Error::Protocol("unknown opcode"))?;

        // Every client-to-server frame must be masked, control frames
        // included.
        if b1 & 0x80 == 0 {
            return Err(Error::Protocol("unmasked client frame"));
        }

        let ext = match b1 & 0x7F {
            126 => 2,
            127 => 8,
            _ => 0,
        };
        if src.len() < 2 + ext {
            return Ok(None);
        }

        let len: u64 = match ext {
            0 => (b1 & 0x7F) as u64,
            2 => u16::from_be_bytes([src[2], src[3]]) as u64,
            _ => u64::from_be_bytes([
                src[2], src[3], src[4], src[5], src[6], src[7], src[8], src[9],
            ]),
        };

        if opcode.is_control() {
            if !fin {
                return Err(Error::Protocol("fragmented control frame"));
            }
            if len > 125 {
                return Err(Error::Protocol("oversized control frame"));
            }
        } else if self.message_size_limit > 0
            && self.assembled + len > self.message_size_limit as u64
        {
            // Budget enforced against the announced length so an oversized
            // message is rejected before its payload is buffered.
            return Err(Error::FrameTooLarge);
        }

        let len =
            usize::try_from(len).map_err(|_| Error::Protocol("frame length overflow"))?;
        let header_len = 2 + ext + 4;
        let total = header_len + len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let mask = [src[2 + ext], src[3 + ext], src[4 + ext], src[5 + ext]];
        src.advance(header_len);
        let mut payload = src.split_to(len);
        for (i, byte) in payload.iter_mut().enumerate() {
            *byte ^= mask[i % 4];
        }

        if !opcode.is_control() {
            if fin {
                self.assembled = 0;
            } else {
                self.assembled += len as u64;
            }
        }

        Ok(Some(Frame { fin, rsv1, opcode, payload: payload.freeze() }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = Error;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Error> {
        dst.reserve(MAX_HEADER_SIZE + frame.payload.len());
        dst.put_u8(
            (frame.fin as u8) << 7 | (frame.rsv1 as u8) << 6 | frame.opcode.bits(),
        );

        let len = frame.payload.len();
        if len < 126 {
            dst.put_u8(len as u8);
        } else if len <= u16::MAX as usize {
            dst.put_u8(126);
            dst.put_u16(len as u16);
        } else {
            dst.put_u8(127);
            dst.put_u64(len as u64);
        }
        dst.extend_from_slice(&frame.payload);
        Ok(())
    }
}

#[cfg(test)]
#[path = "frame_tests.rs"]
mod tests;
