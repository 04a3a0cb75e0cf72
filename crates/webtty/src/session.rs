// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The ttyd protocol daemon for one upgraded connection.
//!
//! Each session runs up to three tasks: the read loop (owns the inflater and
//! the assembly buffer), the write loop started after a successful spawn
//! (owns the output scratch buffer), and an optional keepalive ticker. All
//! of them funnel failures into [`cleanup`], which is guarded by a
//! compare-and-set on the failure flag so the close frame is written and the
//! child reaped exactly once.

use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::auth::TokenHandler;
use crate::codec::frame::MAX_HEADER_SIZE;
use crate::conn::{ReadHalf, SharedWriter};
use crate::error::{Error, Result};
use crate::protocol::{self, CloseCode, ResizeRequest, SessionStart};
use crate::pty::PtyProcess;

/// Write buffer provisioned per session; one PTY read plus the OUTPUT tag
/// and a frame header must fit.
pub(crate) const WRITE_BUFFER_SIZE: usize = 8192;
const OUTPUT_CHUNK: usize = WRITE_BUFFER_SIZE - MAX_HEADER_SIZE;

/// Per-session settings resolved by the handler facade.
pub(crate) struct SessionConfig {
    pub writable: bool,
    pub client_options: Option<serde_json::Map<String, serde_json::Value>>,
    pub title: String,
    pub ping_interval: Option<Duration>,
}

/// Where the session is in its lifecycle; drives the close code chosen by
/// cleanup.
#[derive(Clone)]
enum Lifecycle {
    AwaitingToken,
    Denied,
    SpawnFailed,
    Running(Arc<PtyProcess>),
}

struct Shared {
    writer: SharedWriter,
    paused: AtomicBool,
    failed: AtomicBool,
    close_override: AtomicU16,
    lifecycle: StdMutex<Lifecycle>,
    shutdown: CancellationToken,
}

impl Shared {
    fn pty(&self) -> Option<Arc<PtyProcess>> {
        match &*self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) {
            Lifecycle::Running(pty) => Some(Arc::clone(pty)),
            _ => None,
        }
    }

    fn set_lifecycle(&self, state: Lifecycle) {
        *self.lifecycle.lock().unwrap_or_else(|e| e.into_inner()) = state;
    }

    fn set_close_override(&self, code: CloseCode) {
        self.close_override.store(code.code(), Ordering::Release);
    }
}

pub(crate) struct Daemon {
    shared: Arc<Shared>,
    reader: ReadHalf,
    token_handler: Arc<dyn TokenHandler>,
    config: SessionConfig,
    resume_tx: mpsc::Sender<()>,
    resume_rx: Option<mpsc::Receiver<()>>,
}

impl Daemon {
    pub(crate) fn new(
        reader: ReadHalf,
        writer: SharedWriter,
        token_handler: Arc<dyn TokenHandler>,
        config: SessionConfig,
    ) -> Self {
        // Single-slot resume rendezvous: RESUME enqueues best-effort, the
        // write loop drains, dropping the sender at read-loop exit unblocks.
        let (resume_tx, resume_rx) = mpsc::channel(1);
        Self {
            shared: Arc::new(Shared {
                writer,
                paused: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                close_override: AtomicU16::new(0),
                lifecycle: StdMutex::new(Lifecycle::AwaitingToken),
                shutdown: CancellationToken::new(),
            }),
            reader,
            token_handler,
            config,
            resume_tx,
            resume_rx: Some(resume_rx),
        }
    }

    /// Drive the session to completion. Consumes the daemon; returns once
    /// cleanup has run.
    pub(crate) async fn run(mut self) {
        if let Some(interval) = self.config.ping_interval {
            if !interval.is_zero() {
                tokio::spawn(keepalive(Arc::clone(&self.shared), interval));
            }
        }

        if let Err(err) = self.read_loop().await {
            match err {
                Error::FrameTooLarge => {
                    self.shared.set_close_override(CloseCode::MessageTooBig)
                }
                Error::Protocol(_) => {
                    self.shared.set_close_override(CloseCode::ProtocolError)
                }
                _ => {}
            }
            debug!(error = %err, "session read loop ended");
        }

        // Closing the resume slot unblocks a paused write loop.
        drop(self.resume_tx);
        cleanup(&self.shared).await;
    }

    /// The two mandatory server messages, emitted before any reading starts
    /// and therefore before any OUTPUT frame.
    async fn init_write(&mut self) -> Result<()> {
        let mut buf = Vec::with_capacity(OUTPUT_CHUNK);
        buf.push(protocol::SET_WINDOW_TITLE);
        buf.extend_from_slice(self.config.title.as_bytes());
        self.shared.writer.lock().await.write_message(&buf).await?;

        buf.clear();
        buf.push(protocol::SET_PREFERENCE);
        match &self.config.client_options {
            Some(options) if !options.is_empty() => serde_json::to_writer(&mut buf, options)?,
            _ => buf.extend_from_slice(b"{}"),
        }
        self.shared.writer.lock().await.write_message(&buf).await
    }

    async fn read_loop(&mut self) -> Result<()> {
        self.init_write().await?;

        while !self.shared.failed.load(Ordering::Acquire) {
            // Cleanup may run first on another task (child exit, keepalive
            // failure); it cancels the token so a reader parked here does
            // not outlive the session.
            let msg = tokio::select! {
                _ = self.shared.shutdown.cancelled() => return Ok(()),
                msg = self.reader.next_message(&self.shared.writer) => msg?,
            };
            if msg.is_empty() {
                continue;
            }

            let tag = msg[0];
            let pty = self.shared.pty();

            // Before the spawn only JSON_DATA is meaningful; after it, a
            // second JSON_DATA is not. Everything out of order is dropped.
            if (tag == protocol::JSON_DATA) == pty.is_some() {
                continue;
            }

            match tag {
                protocol::INPUT => {
                    if self.config.writable {
                        if let Some(pty) = &pty {
                            pty.write_all(&msg[1..]).await?;
                        }
                    }
                }
                protocol::RESIZE_TERMINAL => {
                    let rr: ResizeRequest = serde_json::from_slice(&msg[1..])?;
                    if let Some(pty) = &pty {
                        pty.resize(rr.columns, rr.rows)?;
                    }
                }
                protocol::PAUSE => self.shared.paused.store(true, Ordering::Release),
                protocol::RESUME => {
                    self.shared.paused.store(false, Ordering::Release);
                    let _ = self.resume_tx.try_send(());
                }
                protocol::JSON_DATA => self.start_session(&msg)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Handle the session-start message: resolve the token to a command,
    /// spawn it on a PTY of the requested size, start the write loop.
    fn start_session(&mut self, msg: &[u8]) -> Result<()> {
        let start: SessionStart = serde_json::from_slice(msg)?;

        let Some(command) = self.token_handler.get_command(&start.auth_token) else {
            self.shared.set_lifecycle(Lifecycle::Denied);
            return Err(Error::Denied);
        };

        debug!(
            command = %command.command_line(),
            columns = start.columns,
            rows = start.rows,
            "spawning session child"
        );

        let pty = match PtyProcess::spawn(&command, start.columns, start.rows) {
            Ok(pty) => Arc::new(pty),
            Err(err) => {
                self.shared.set_lifecycle(Lifecycle::SpawnFailed);
                return Err(Error::Spawn(err));
            }
        };
        self.shared.set_lifecycle(Lifecycle::Running(Arc::clone(&pty)));

        if let Some(resume_rx) = self.resume_rx.take() {
            tokio::spawn(write_loop(Arc::clone(&self.shared), pty, resume_rx));
        }
        Ok(())
    }
}

/// Forward PTY output to the client, one frame per read, honoring pause.
async fn write_loop(
    shared: Arc<Shared>,
    pty: Arc<PtyProcess>,
    mut resume_rx: mpsc::Receiver<()>,
) {
    let mut buf = vec![0u8; OUTPUT_CHUNK];
    buf[0] = protocol::OUTPUT;

    'session: while !shared.failed.load(Ordering::Acquire) {
        let n = match pty.read_chunk(&mut buf[1..]).await {
            Ok(0) => break,
            Ok(n) => n,
            // EIO from the master means the child side is gone.
            Err(e) if e.raw_os_error() == Some(nix::libc::EIO) => break,
            Err(_) => break,
        };

        // Hold the chunk while paused; a RESUME (or cleanup closing the
        // slot) releases it. Stale wake-ups are drained by re-checking the
        // flag.
        while shared.paused.load(Ordering::Acquire) {
            if resume_rx.recv().await.is_none() {
                break 'session;
            }
        }

        if shared.writer.lock().await.write_message(&buf[..1 + n]).await.is_err() {
            break;
        }
    }

    cleanup(&shared).await;
}

/// Periodic ping under the write lock; a failed tick tears the session down.
async fn keepalive(shared: Arc<Shared>, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // interval fires immediately; the first ping should wait one period
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = shared.shutdown.cancelled() => return,
            _ = ticker.tick() => {
                if shared.writer.lock().await.write_ping().await.is_err() {
                    cleanup(&shared).await;
                    return;
                }
            }
        }
    }
}

/// Idempotent teardown; safe to call from any session task. The first
/// caller wins the CAS and performs the whole sequence, later callers
/// no-op.
async fn cleanup(shared: &Arc<Shared>) {
    if shared
        .failed
        .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
        .is_err()
    {
        return;
    }
    shared.shutdown.cancel();

    let lifecycle = shared.lifecycle.lock().unwrap_or_else(|e| e.into_inner()).clone();
    let mut code = match lifecycle {
        Lifecycle::Running(pty) => {
            pty.hangup();
            match pty.reap().await {
                Ok(status) if status.success() => CloseCode::Normal,
                Ok(status) => {
                    debug!(code = ?status.code, signal = ?status.signal, "child exited unclean");
                    CloseCode::InternalServerError
                }
                Err(err) => {
                    debug!(error = %err, "child reap failed");
                    CloseCode::InternalServerError
                }
            }
        }
        Lifecycle::Denied => CloseCode::PolicyViolation,
        Lifecycle::SpawnFailed => CloseCode::InternalServerError,
        Lifecycle::AwaitingToken => CloseCode::Normal,
    };
    if let Some(explicit) = CloseCode::from_code(shared.close_override.load(Ordering::Acquire)) {
        code = explicit;
    }

    let mut writer = shared.writer.lock().await;
    if let Err(err) = writer.write_close(code).await {
        debug!(error = %err, "close frame not delivered");
    }
    let _ = writer.shutdown().await;
}
