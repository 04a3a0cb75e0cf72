// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Public construction surface: the per-route [`Handler`] with its option
//! table, the upgrade entry point, and an `attach` escape hatch for
//! transports upgraded by other means.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::Response;
use hyper_util::rt::TokioIo;
use tracing::debug;

use crate::auth::{TokenHandler, UnprotectedTokenHandler};
use crate::codec::deflate::DeflateParams;
use crate::conn;
use crate::pty::SpawnCommand;
use crate::session::{Daemon, SessionConfig, WRITE_BUFFER_SIZE};
use crate::transport::BoxedSessionStream;
use crate::upgrade::{self, Accepted, PendingTransport};

/// Whether and how permessage-deflate is offered to clients.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CompressionMode {
    /// Never negotiate compression.
    #[default]
    Disabled,
    /// Accept compression, retaining the sliding window across messages in
    /// both directions unless the client asks otherwise.
    ContextTakeover,
    /// Accept compression, resetting both directions per message.
    NoContextTakeover,
    /// Accept compression with explicit parameters.
    Custom(DeflateParams),
}

impl CompressionMode {
    fn requested(self) -> Option<DeflateParams> {
        match self {
            Self::Disabled => None,
            Self::ContextTakeover => Some(DeflateParams::default()),
            Self::NoContextTakeover => Some(DeflateParams {
                server_no_context_takeover: true,
                client_no_context_takeover: true,
            }),
            Self::Custom(params) => Some(params),
        }
    }
}

/// Handler options. Defaults: read-only sessions, no compression, message
/// size limit 4096, default window title, no keepalive.
#[derive(Debug, Clone)]
pub struct Options {
    writable: bool,
    compression: CompressionMode,
    compression_level: i32,
    client_options: Option<serde_json::Map<String, serde_json::Value>>,
    message_size_limit: i64,
    title: Option<String>,
    ping_interval: Option<Duration>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            writable: false,
            compression: CompressionMode::Disabled,
            compression_level: 0,
            client_options: None,
            message_size_limit: 4096,
            title: None,
            ping_interval: None,
        }
    }
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Forward client INPUT messages to the PTY.
    pub fn writable(mut self, writable: bool) -> Self {
        self.writable = writable;
        self
    }

    pub fn compression(mut self, mode: CompressionMode) -> Self {
        self.compression = mode;
        self
    }

    /// DEFLATE level for negotiated sessions; out-of-range values and 0 use
    /// the library default.
    pub fn compression_level(mut self, level: i32) -> Self {
        self.compression_level = level;
        self
    }

    /// Options sent to the client in the initial SET_PREFERENCE message.
    pub fn client_options(
        mut self,
        options: serde_json::Map<String, serde_json::Value>,
    ) -> Self {
        self.client_options = Some(options);
        self
    }

    /// Maximum assembled message size in bytes; zero or negative disables
    /// the limit.
    pub fn message_size_limit(mut self, limit: i64) -> Self {
        self.message_size_limit = limit;
        self
    }

    /// Window title; defaults to `"<argv joined by space> (<hostname>)"`.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Emit a ping frame at this cadence; a zero duration disables it.
    pub fn ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval = if interval.is_zero() { None } else { Some(interval) };
        self
    }
}

/// Handles each ttyd session on an incoming route.
pub struct Handler {
    command: SpawnCommand,
    token_handler: Arc<dyn TokenHandler>,
    options: Options,
}

impl Handler {
    /// Handler over a fixed command with no authentication.
    pub fn new(command: SpawnCommand, options: Options) -> Self {
        let token_handler = Arc::new(UnprotectedTokenHandler::new(command.clone()));
        Self { command, token_handler, options }
    }

    /// Handler with a custom token authority. `command` still seeds the
    /// default window title; the authority decides what actually runs.
    pub fn with_token_handler(
        command: SpawnCommand,
        token_handler: Arc<dyn TokenHandler>,
        options: Options,
    ) -> Self {
        Self { command, token_handler, options }
    }

    pub fn token_handler(&self) -> &Arc<dyn TokenHandler> {
        &self.token_handler
    }

    /// Upgrade the request (HTTP/1.1 Upgrade or HTTP/2 extended CONNECT) and
    /// serve the ttyd protocol on the resulting transport.
    pub async fn serve(self: Arc<Self>, req: Request) -> Response<Body> {
        let Accepted { response, transport, deflate } =
            match upgrade::upgrade(req, self.options.compression.requested()) {
                Ok(accepted) => accepted,
                Err(response) => return response,
            };

        match transport {
            PendingTransport::H2(stream) => {
                let stream: BoxedSessionStream = stream;
                self.attach(stream, deflate);
            }
            PendingTransport::H1(on_upgrade) => {
                let handler = Arc::clone(&self);
                tokio::spawn(async move {
                    match on_upgrade.await {
                        Ok(upgraded) => {
                            handler
                                .run_session(Box::new(TokioIo::new(upgraded)), deflate)
                                .await;
                        }
                        Err(err) => debug!(error = %err, "websocket upgrade failed"),
                    }
                });
            }
        }
        response
    }

    /// Serve the ttyd protocol on a transport upgraded through other means.
    /// `deflate` carries the extension parameters if permessage-deflate was
    /// negotiated during that handshake.
    pub fn attach(
        self: &Arc<Self>,
        stream: BoxedSessionStream,
        deflate: Option<DeflateParams>,
    ) -> tokio::task::JoinHandle<()> {
        let handler = Arc::clone(self);
        tokio::spawn(async move { handler.run_session(stream, deflate).await })
    }

    async fn run_session(self: Arc<Self>, stream: BoxedSessionStream, deflate: Option<DeflateParams>) {
        let compression = deflate.map(|params| (params, self.options.compression_level));
        let (reader, writer) = conn::split(
            stream,
            self.options.message_size_limit,
            compression,
            WRITE_BUFFER_SIZE,
        );

        let title = match &self.options.title {
            Some(title) => title.clone(),
            None => format!("{} ({})", self.command.command_line(), hostname()),
        };

        let daemon = Daemon::new(
            reader,
            writer,
            Arc::clone(&self.token_handler),
            SessionConfig {
                writable: self.options.writable,
                client_options: self.options.client_options.clone(),
                title,
                ping_interval: self.options.ping_interval,
            },
        );
        daemon.run().await;
    }
}

fn hostname() -> String {
    nix::unistd::gethostname()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}
