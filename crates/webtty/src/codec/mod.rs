// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket frame codec and permessage-deflate compression.

pub mod deflate;
pub mod frame;

pub use deflate::{DeflateParams, Deflater, Inflater};
pub use frame::{Frame, FrameCodec, Opcode, MAX_HEADER_SIZE};
