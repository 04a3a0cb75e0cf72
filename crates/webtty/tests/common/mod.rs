// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Reusable test harness for session integration tests.
//!
//! Drives a session over an in-memory duplex transport, speaking raw
//! RFC 6455 client frames (masked) and parsing the server's unmasked
//! frames. Compression helpers mirror what a permessage-deflate capable
//! browser would do on its side of the wire.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress};
use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};
use webtty::{DeflateParams, Handler};

pub const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

pub const OP_CONTINUATION: u8 = 0x0;
pub const OP_BINARY: u8 = 0x2;
pub const OP_CLOSE: u8 = 0x8;
pub const OP_PING: u8 = 0x9;
pub const OP_PONG: u8 = 0xA;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

// ── Client-side frame building ──────────────────────────────────────

/// Build one masked client frame.
pub fn frame_bytes(fin: bool, rsv1: bool, opcode: u8, payload: &[u8]) -> Vec<u8> {
    let mask = [0x37u8, 0xfa, 0x21, 0x3d];
    let mut out = Vec::with_capacity(payload.len() + 14);
    out.push((fin as u8) << 7 | (rsv1 as u8) << 6 | opcode);
    if payload.len() < 126 {
        out.push(0x80 | payload.len() as u8);
    } else if payload.len() <= u16::MAX as usize {
        out.push(0x80 | 126);
        out.extend_from_slice(&(payload.len() as u16).to_be_bytes());
    } else {
        out.push(0x80 | 127);
        out.extend_from_slice(&(payload.len() as u64).to_be_bytes());
    }
    out.extend_from_slice(&mask);
    out.extend(payload.iter().enumerate().map(|(i, b)| b ^ mask[i % 4]));
    out
}

// ── Client-side compression ─────────────────────────────────────────

pub fn client_compressor() -> Compress {
    Compress::new(Compression::new(6), false)
}

pub fn client_decompressor() -> Decompress {
    Decompress::new(false)
}

/// Compress a message payload the way a permessage-deflate sender does:
/// sync flush, trailing four bytes stripped.
pub fn compress_message(raw: &mut Compress, input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() + 64);
    let mut consumed = 0usize;
    loop {
        out.reserve(4096);
        let before = raw.total_in();
        raw.compress_vec(&input[consumed..], &mut out, FlushCompress::Sync).unwrap();
        consumed += (raw.total_in() - before) as usize;
        if consumed == input.len() && out.len() < out.capacity() {
            break;
        }
    }
    assert!(out.ends_with(&DEFLATE_TAIL), "sync flush must end with the empty-block tail");
    out.truncate(out.len() - DEFLATE_TAIL.len());
    out
}

/// Inflate a received message payload (tail re-appended first).
pub fn decompress_message(raw: &mut Decompress, input: &[u8]) -> Vec<u8> {
    let mut data = input.to_vec();
    data.extend_from_slice(&DEFLATE_TAIL);
    let mut out = Vec::with_capacity(data.len() * 4 + 256);
    let mut consumed = 0usize;
    loop {
        out.reserve(4096);
        let before = raw.total_in();
        raw.decompress_vec(&data[consumed..], &mut out, FlushDecompress::None).unwrap();
        consumed += (raw.total_in() - before) as usize;
        if consumed == data.len() && out.len() < out.capacity() {
            break;
        }
    }
    out
}

// ── Server frame parsing ────────────────────────────────────────────

#[derive(Debug)]
pub enum ServerEvent {
    /// Data frame payload with its RSV1 flag.
    Message { rsv1: bool, payload: Vec<u8> },
    Ping(Vec<u8>),
    Pong(Vec<u8>),
    Close(u16),
}

// ── TestClient ──────────────────────────────────────────────────────

/// The browser side of one in-memory session.
pub struct TestClient {
    stream: DuplexStream,
}

impl TestClient {
    /// Attach a session to a fresh duplex pipe and return the client side.
    pub fn attach(
        handler: &Arc<Handler>,
        deflate: Option<DeflateParams>,
    ) -> (Self, tokio::task::JoinHandle<()>) {
        let (client, server) = tokio::io::duplex(1 << 16);
        let task = handler.attach(Box::new(server), deflate);
        (Self { stream: client }, task)
    }

    pub async fn send_raw(&mut self, bytes: &[u8]) {
        self.stream.write_all(bytes).await.expect("client write failed");
    }

    pub async fn send_frame(&mut self, fin: bool, rsv1: bool, opcode: u8, payload: &[u8]) {
        self.send_raw(&frame_bytes(fin, rsv1, opcode, payload)).await;
    }

    /// Send one application message as a single binary frame.
    pub async fn send_message(&mut self, payload: &[u8]) {
        self.send_frame(true, false, OP_BINARY, payload).await;
    }

    /// Send a tagged message: `[tag] + body`.
    pub async fn send_tagged(&mut self, tag: u8, body: &[u8]) {
        let mut payload = Vec::with_capacity(1 + body.len());
        payload.push(tag);
        payload.extend_from_slice(body);
        self.send_message(&payload).await;
    }

    pub async fn send_close(&mut self) {
        self.send_frame(true, false, OP_CLOSE, &1000u16.to_be_bytes()).await;
    }

    /// Read the next server frame, failing the test after a timeout.
    pub async fn recv_event(&mut self) -> ServerEvent {
        tokio::time::timeout(RECV_TIMEOUT, self.read_frame())
            .await
            .expect("timed out waiting for a server frame")
    }

    /// Read the next data-frame payload, skipping control frames. Panics on
    /// close.
    pub async fn recv_message(&mut self) -> (bool, Vec<u8>) {
        loop {
            match self.recv_event().await {
                ServerEvent::Message { rsv1, payload } => return (rsv1, payload),
                ServerEvent::Ping(_) | ServerEvent::Pong(_) => continue,
                ServerEvent::Close(code) => panic!("unexpected close frame (code {code})"),
            }
        }
    }

    /// Collect data messages until the server's close frame; returns the
    /// messages and the close code.
    pub async fn recv_until_close(&mut self) -> (Vec<(bool, Vec<u8>)>, u16) {
        let mut messages = Vec::new();
        loop {
            match self.recv_event().await {
                ServerEvent::Message { rsv1, payload } => messages.push((rsv1, payload)),
                ServerEvent::Ping(_) | ServerEvent::Pong(_) => continue,
                ServerEvent::Close(code) => return (messages, code),
            }
        }
    }

    /// Assert that nothing arrives for `window`; returns the event that
    /// broke the silence, if any. Control frames count as silence here.
    pub async fn expect_silence(&mut self, window: Duration) -> Option<ServerEvent> {
        loop {
            let mut b0 = [0u8; 1];
            match tokio::time::timeout(window, self.stream.read_exact(&mut b0)).await {
                Err(_) => return None,
                Ok(read) => {
                    read.expect("server closed during silence window");
                    match self.finish_frame(b0[0]).await {
                        ServerEvent::Ping(_) | ServerEvent::Pong(_) => continue,
                        event => return Some(event),
                    }
                }
            }
        }
    }

    async fn read_frame(&mut self) -> ServerEvent {
        let mut b0 = [0u8; 1];
        self.stream.read_exact(&mut b0).await.expect("server closed the transport");
        self.finish_frame(b0[0]).await
    }

    async fn finish_frame(&mut self, b0: u8) -> ServerEvent {
        let mut b1 = [0u8; 1];
        self.stream.read_exact(&mut b1).await.unwrap();
        assert_eq!(b1[0] & 0x80, 0, "server frames must be unmasked");

        let len = match b1[0] & 0x7F {
            126 => {
                let mut ext = [0u8; 2];
                self.stream.read_exact(&mut ext).await.unwrap();
                u16::from_be_bytes(ext) as usize
            }
            127 => {
                let mut ext = [0u8; 8];
                self.stream.read_exact(&mut ext).await.unwrap();
                u64::from_be_bytes(ext) as usize
            }
            n => n as usize,
        };
        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.unwrap();

        let rsv1 = b0 & 0x40 != 0;
        match b0 & 0x0F {
            OP_PING => ServerEvent::Ping(payload),
            OP_PONG => ServerEvent::Pong(payload),
            OP_CLOSE => {
                let code = if payload.len() >= 2 {
                    u16::from_be_bytes([payload[0], payload[1]])
                } else {
                    1005
                };
                ServerEvent::Close(code)
            }
            _ => ServerEvent::Message { rsv1, payload },
        }
    }
}

// ── Misc helpers ────────────────────────────────────────────────────

pub fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// The session-start message for the given token and size.
pub fn session_start(token: &str, columns: u16, rows: u16) -> Vec<u8> {
    format!(r#"{{"AuthToken":"{token}","columns":{columns},"rows":{rows}}}"#).into_bytes()
}
