// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! permessage-deflate (RFC 7692) message transforms.
//!
//! Both transforms keep one flate2 stream for the session's lifetime and
//! reset it between messages instead of reallocating. With context takeover
//! the stream state is carried across messages, so the DEFLATE sliding
//! window (at most 32768 bytes) acts as the retained dictionary; with
//! no-context-takeover the stream is reset per message. On the write side
//! the output is sync-flushed and the trailing `00 00 FF FF` is stripped; on
//! the read side the same four bytes are appended before inflating.

use flate2::{Compress, Compression, Decompress, FlushCompress, FlushDecompress, Status};

use crate::error::Error;

/// The empty-block marker a sync flush leaves at the end of the stream.
pub const DEFLATE_TAIL: [u8; 4] = [0x00, 0x00, 0xFF, 0xFF];

const OUTPUT_CHUNK: usize = 4096;

/// Parameters negotiated for the permessage-deflate extension.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeflateParams {
    pub server_no_context_takeover: bool,
    pub client_no_context_takeover: bool,
}

/// Map a requested compression level onto flate2's range. Levels 1..=9 are
/// honored; everything else (including 0, which means no-compression in the
/// wire option table) falls back to the library default.
fn compression_level(level: i32) -> Compression {
    match level {
        1..=9 => Compression::new(level as u32),
        _ => Compression::default(),
    }
}

/// Server-to-client message compressor.
pub struct Deflater {
    raw: Compress,
    reset_per_message: bool,
}

impl Deflater {
    pub fn new(level: i32, params: DeflateParams) -> Self {
        Self {
            raw: Compress::new(compression_level(level), false),
            reset_per_message: params.server_no_context_takeover,
        }
    }

    /// Compress one message payload. The returned bytes carry RSV1 on the
    /// wire; the caller frames them.
    pub fn compress(&mut self, input: &[u8]) -> Result<Vec<u8>, Error> {
        if self.reset_per_message {
            self.raw.reset();
        }

        let mut out = Vec::with_capacity(input.len() / 2 + 64);
        let mut consumed = 0usize;
        loop {
            out.reserve(OUTPUT_CHUNK);
            let before = self.raw.total_in();
            let status = self
                .raw
                .compress_vec(&input[consumed..], &mut out, FlushCompress::Sync)
                .map_err(|e| Error::Deflate(e.to_string()))?;
            consumed += (self.raw.total_in() - before) as usize;
            if consumed == input.len() && out.len() < out.capacity() {
                break;
            }
            if status == Status::StreamEnd {
                break;
            }
        }

        if !out.ends_with(&DEFLATE_TAIL) {
            return Err(Error::Deflate("sync flush missing empty-block tail".into()));
        }
        out.truncate(out.len() - DEFLATE_TAIL.len());
        Ok(out)
    }
}

/// Client-to-server message decompressor.
pub struct Inflater {
    raw: Decompress,
    reset_per_message: bool,
}

impl Inflater {
    pub fn new(params: DeflateParams) -> Self {
        Self {
            raw: Decompress::new(false),
            reset_per_message: params.client_no_context_takeover,
        }
    }

    /// Inflate one assembled message that arrived with RSV1 set.
    pub fn decompress(&mut self, input: &[u8]) -> Result<Vec<u8>, Error> {
        if self.reset_per_message {
            self.raw.reset(false);
        }

        let mut out = Vec::with_capacity(input.len().saturating_mul(2).max(256));
        let mut ended = self.run(input, &mut out)?;
        if !ended {
            ended = self.run(&DEFLATE_TAIL, &mut out)?;
        }
        if ended {
            // The peer terminated its stream with a final block; the next
            // message starts a fresh stream regardless of takeover mode.
            self.raw.reset(false);
        }
        Ok(out)
    }

    /// Feed `input` through the inflater, growing `out` as needed. Returns
    /// true when the DEFLATE stream ended; remaining input is dropped.
    fn run(&mut self, input: &[u8], out: &mut Vec<u8>) -> Result<bool, Error> {
        let mut consumed = 0usize;
        loop {
            out.reserve(OUTPUT_CHUNK);
            let before = self.raw.total_in();
            let status = self
                .raw
                .decompress_vec(&input[consumed..], out, FlushDecompress::None)
                .map_err(|e| Error::Deflate(e.to_string()))?;
            consumed += (self.raw.total_in() - before) as usize;

            match status {
                Status::StreamEnd => return Ok(true),
                _ if consumed == input.len() && out.len() < out.capacity() => {
                    return Ok(false)
                }
                Status::BufError if out.len() < out.capacity() => return Ok(false),
                _ => {}
            }
        }
    }
}

#[cfg(test)]
#[path = "deflate_tests.rs"]
mod tests;
