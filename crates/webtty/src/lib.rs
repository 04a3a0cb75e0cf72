// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Server-side bridge between the ttyd browser terminal client and a local
//! child process attached to a PTY.
//!
//! A single upgraded connection (HTTP/1.1 Upgrade or HTTP/2 extended
//! CONNECT) carries WebSocket binary frames in both directions: terminal
//! output to the client, keystrokes and control messages to the PTY, plus
//! window title, client preferences, and resize metadata. The optional
//! `permessage-deflate` extension is supported in all four context-takeover
//! combinations.

pub mod auth;
pub mod codec;
pub mod conn;
pub mod error;
pub mod handler;
pub mod protocol;
pub mod pty;
pub mod session;
pub mod transport;
pub mod upgrade;

pub use auth::{
    serve_token, BasicAuthTokenHandler, ProxyHeaderTokenHandler, TokenHandler,
    UnprotectedTokenHandler,
};
pub use codec::deflate::DeflateParams;
pub use error::{Error, Result};
pub use handler::{CompressionMode, Handler, Options};
pub use protocol::CloseCode;
pub use pty::SpawnCommand;
