// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Byte-stream transports a session runs on: an upgraded HTTP/1.1
//! connection, an HTTP/2 extended-CONNECT exchange, or (in tests) an
//! in-memory duplex pipe.

pub mod h2;

use tokio::io::{AsyncRead, AsyncWrite};

pub use h2::H2Stream;

/// Anything a session can speak frames over.
pub trait SessionStream: AsyncRead + AsyncWrite + Send + Unpin {}

impl<T: AsyncRead + AsyncWrite + Send + Unpin> SessionStream for T {}

/// Boxed transport handed from the upgrader to the session daemon.
pub type BoxedSessionStream = Box<dyn SessionStream>;
