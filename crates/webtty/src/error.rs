// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::fmt;
use std::io;

/// Errors surfaced by the frame codec, the compression layer, and the
/// session daemon. Everything a session hits ends up funneled into cleanup,
/// which maps the error onto a close code.
#[derive(Debug)]
pub enum Error {
    /// The peer violated the WebSocket protocol (unmasked client frame,
    /// reserved bits, malformed header).
    Protocol(&'static str),
    /// An assembled message would exceed the configured size limit.
    FrameTooLarge,
    /// The peer sent a close frame or the transport reached EOF.
    PeerClosed,
    /// Transport or PTY I/O failure.
    Io(io::Error),
    /// DEFLATE stream corruption on the compression layer.
    Deflate(String),
    /// Malformed JSON in a resize or session-start message.
    Json(serde_json::Error),
    /// The token authority returned no command for the presented token.
    Denied,
    /// The child process could not be spawned on a PTY.
    Spawn(io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Protocol(what) => write!(f, "protocol violation: {what}"),
            Self::FrameTooLarge => f.write_str("message exceeds size limit"),
            Self::PeerClosed => f.write_str("peer closed the connection"),
            Self::Io(err) => write!(f, "i/o error: {err}"),
            Self::Deflate(what) => write!(f, "deflate error: {what}"),
            Self::Json(err) => write!(f, "invalid json payload: {err}"),
            Self::Denied => f.write_str("token rejected by the authority"),
            Self::Spawn(err) => write!(f, "failed to spawn child on pty: {err}"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(err) | Self::Spawn(err) => Some(err),
            Self::Json(err) => Some(err),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
