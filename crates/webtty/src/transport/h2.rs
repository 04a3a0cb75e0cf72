// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP/2 extended-CONNECT byte stream.
//!
//! Reads come from the request body's data stream; writes go through a
//! channel that backs the streaming response body, so every write the
//! session performs reaches the peer as its own DATA frame with no
//! additional buffering layer in between.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::body::{Body, BodyDataStream};
use bytes::{Bytes, BytesMut};
use futures_util::{Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::PollSender;

/// Duplex adapter over one extended-CONNECT exchange.
pub struct H2Stream {
    body: BodyDataStream,
    leftover: BytesMut,
    tx: PollSender<Bytes>,
    local_addr: Option<SocketAddr>,
    remote_addr: Option<SocketAddr>,
}

impl H2Stream {
    /// Wrap the CONNECT request body and return the adapter together with
    /// the streaming body to attach to the 200 response.
    pub fn new(
        request_body: Body,
        local_addr: Option<SocketAddr>,
        remote_addr: Option<SocketAddr>,
    ) -> (Self, Body) {
        let (tx, rx) = mpsc::channel::<Bytes>(1);
        let response_body =
            Body::from_stream(ReceiverStream::new(rx).map(Ok::<_, std::convert::Infallible>));
        let stream = Self {
            body: request_body.into_data_stream(),
            leftover: BytesMut::new(),
            tx: PollSender::new(tx),
            local_addr,
            remote_addr,
        };
        (stream, response_body)
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }
}

impl AsyncRead for H2Stream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        loop {
            if !self.leftover.is_empty() {
                let n = self.leftover.len().min(buf.remaining());
                let chunk = self.leftover.split_to(n);
                buf.put_slice(&chunk);
                return Poll::Ready(Ok(()));
            }

            match ready!(Pin::new(&mut self.body).poll_next(cx)) {
                Some(Ok(data)) => self.leftover.extend_from_slice(&data),
                Some(Err(err)) => {
                    return Poll::Ready(Err(io::Error::new(io::ErrorKind::Other, err)))
                }
                // Body finished: peer half-closed its side.
                None => return Poll::Ready(Ok(())),
            }
        }
    }
}

impl AsyncWrite for H2Stream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if ready!(self.tx.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        if self.tx.send_item(Bytes::copy_from_slice(buf)).is_err() {
            return Poll::Ready(Err(io::ErrorKind::BrokenPipe.into()));
        }
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Each accepted write is already one DATA frame on the response.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        self.tx.close();
        Poll::Ready(Ok(()))
    }
}

#[cfg(test)]
#[path = "h2_tests.rs"]
mod tests;
