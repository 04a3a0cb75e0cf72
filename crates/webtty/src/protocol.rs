// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! ttyd wire protocol: one-byte message tags and the JSON payloads attached
//! to some of them. Every application message travels as a WebSocket binary
//! frame whose first payload byte is the tag.

use serde::Deserialize;

// ---------------------------------------------------------------------------
// Client -> Server tags
// ---------------------------------------------------------------------------

/// Raw keystrokes for the PTY.
pub const INPUT: u8 = b'0';
/// Set the PTY window size; payload is JSON `{columns, rows}`.
pub const RESIZE_TERMINAL: u8 = b'1';
/// Stop forwarding process output.
pub const PAUSE: u8 = b'2';
/// Resume forwarding process output.
pub const RESUME: u8 = b'3';
/// Session start; the leading `{` is part of the JSON object.
pub const JSON_DATA: u8 = b'{';

// ---------------------------------------------------------------------------
// Server -> Client tags
// ---------------------------------------------------------------------------

/// Bytes read from the PTY.
pub const OUTPUT: u8 = b'0';
/// Window title string.
pub const SET_WINDOW_TITLE: u8 = b'1';
/// Client options as a JSON object.
pub const SET_PREFERENCE: u8 = b'2';

// ---------------------------------------------------------------------------
// Close codes
// ---------------------------------------------------------------------------

/// RFC 6455 close codes used by the session daemon.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseCode {
    Normal,
    ProtocolError,
    PolicyViolation,
    MessageTooBig,
    InternalServerError,
}

impl CloseCode {
    pub fn code(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::ProtocolError => 1002,
            Self::PolicyViolation => 1008,
            Self::MessageTooBig => 1009,
            Self::InternalServerError => 1011,
        }
    }

    pub fn from_code(code: u16) -> Option<Self> {
        match code {
            1000 => Some(Self::Normal),
            1002 => Some(Self::ProtocolError),
            1008 => Some(Self::PolicyViolation),
            1009 => Some(Self::MessageTooBig),
            1011 => Some(Self::InternalServerError),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// JSON payloads
// ---------------------------------------------------------------------------

/// Payload of a RESIZE_TERMINAL message.
#[derive(Debug, Clone, Copy, Deserialize)]
pub struct ResizeRequest {
    pub columns: u16,
    pub rows: u16,
}

/// Payload of the JSON_DATA session-start message. The ttyd browser client
/// sends the token under `AuthToken`; columns and rows are optional and
/// default to zero, which leaves the winsize to the terminal defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStart {
    #[serde(rename = "AuthToken", default)]
    pub auth_token: String,
    #[serde(default)]
    pub columns: u16,
    #[serde(default)]
    pub rows: u16,
}

#[cfg(test)]
#[path = "protocol_tests.rs"]
mod tests;
