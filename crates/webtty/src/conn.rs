// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Message layer on top of the frame codec: fragment assembly with inline
//! control-frame handling on the read side, framing plus optional
//! compression on the write side.
//!
//! The write half lives behind one async mutex per session; every writer
//! (output frames, pongs, pings, the close frame) goes through it, so a data
//! frame can never interleave with a control frame. Compression happens
//! under the same lock, which keeps the deflater single-threaded.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::Mutex;
use tokio_util::codec::Framed;

use crate::codec::deflate::{DeflateParams, Deflater, Inflater};
use crate::codec::frame::{Frame, FrameCodec, Opcode};
use crate::error::{Error, Result};
use crate::protocol::CloseCode;
use crate::transport::BoxedSessionStream;

/// Smallest read buffer the handshake layer will provision.
pub const MIN_BUFFER_SIZE: usize = 512;

type FramedStream = Framed<BoxedSessionStream, FrameCodec>;

/// Write side of a session, shared by the read loop (pongs), the write loop
/// (output), the keepalive ticker (pings), and cleanup (the close frame).
pub type SharedWriter = Arc<Mutex<WriteHalf>>;

/// Split a transport into the session's read and write halves. When
/// `compression` is present the inflater and deflater are created once here
/// and live for the whole session.
pub fn split(
    stream: BoxedSessionStream,
    message_size_limit: i64,
    compression: Option<(DeflateParams, i32)>,
    buffer_size: usize,
) -> (ReadHalf, SharedWriter) {
    let framed = Framed::with_capacity(
        stream,
        FrameCodec::new(message_size_limit),
        buffer_size.max(MIN_BUFFER_SIZE),
    );
    let (sink, stream) = framed.split();

    let (inflater, deflater) = match compression {
        Some((params, level)) => {
            (Some(Inflater::new(params)), Some(Deflater::new(level, params)))
        }
        None => (None, None),
    };

    let writer = Arc::new(Mutex::new(WriteHalf { sink, deflater }));
    (ReadHalf { stream, inflater }, writer)
}

pub struct WriteHalf {
    sink: SplitSink<FramedStream, Frame>,
    deflater: Option<Deflater>,
}

impl WriteHalf {
    /// Send one application message as a binary frame, compressed with RSV1
    /// set when permessage-deflate was negotiated.
    pub async fn write_message(&mut self, payload: &[u8]) -> Result<()> {
        let frame = match self.deflater.as_mut() {
            Some(deflater) => Frame::compressed(Bytes::from(deflater.compress(payload)?)),
            None => Frame::binary(Bytes::copy_from_slice(payload)),
        };
        self.sink.send(frame).await
    }

    pub async fn write_ping(&mut self) -> Result<()> {
        self.sink.send(Frame::ping()).await
    }

    pub async fn write_pong(&mut self, payload: Bytes) -> Result<()> {
        self.sink.send(Frame::pong(payload)).await
    }

    pub async fn write_close(&mut self, code: CloseCode) -> Result<()> {
        self.sink.send(Frame::close(code)).await
    }

    pub async fn shutdown(&mut self) -> Result<()> {
        self.sink.close().await
    }
}

pub struct ReadHalf {
    stream: SplitStream<FramedStream>,
    inflater: Option<Inflater>,
}

impl ReadHalf {
    /// Assemble the next application message.
    ///
    /// Control frames are handled inline without being surfaced: a ping is
    /// answered with a pong carrying the same payload (under the write
    /// lock), a pong is discarded, and a close frame ends the read side with
    /// [`Error::PeerClosed`]. RSV1 is taken from the first fragment; when
    /// set and compression was negotiated, the assembled payload is inflated
    /// before being returned.
    pub async fn next_message(&mut self, writer: &SharedWriter) -> Result<BytesMut> {
        let mut message = BytesMut::new();
        let mut compressed = false;
        let mut first = true;

        loop {
            let frame = match self.stream.next().await {
                None => return Err(Error::PeerClosed),
                Some(frame) => frame?,
            };

            match frame.opcode {
                Opcode::Ping => writer.lock().await.write_pong(frame.payload).await?,
                Opcode::Pong => {}
                Opcode::Close => return Err(Error::PeerClosed),
                Opcode::Text | Opcode::Binary | Opcode::Continuation => {
                    if first {
                        compressed = frame.rsv1;
                        first = false;
                    }
                    message.extend_from_slice(&frame.payload);
                    if frame.fin {
                        if compressed {
                            if let Some(inflater) = self.inflater.as_mut() {
                                let inflated = inflater.decompress(&message)?;
                                return Ok(BytesMut::from(&inflated[..]));
                            }
                        }
                        return Ok(message);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "conn_tests.rs"]
mod tests;
