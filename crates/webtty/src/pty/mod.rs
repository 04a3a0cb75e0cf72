// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PTY session: spawn the resolved command on a fresh pseudo-terminal of the
//! requested size, expose non-blocking reads and writes on the master, and
//! reap the child exactly once.

pub mod nbio;

use std::ffi::CString;
use std::io;
use std::os::fd::AsRawFd;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use nix::libc;
use nix::pty::{forkpty, ForkptyResult, Winsize};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{execvp, setgid, setuid, ForkResult, Gid, Pid, Uid};
use tokio::io::unix::AsyncFd;

use self::nbio::{io_err, set_nonblocking, PtyFd};

/// Resolved child-process descriptor handed over by the token authority.
/// Credentials are opaque to the core: the CLI resolves them before the
/// descriptor reaches a session.
#[derive(Debug, Clone)]
pub struct SpawnCommand {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub cwd: Option<PathBuf>,
    pub uid: Option<u32>,
    pub gid: Option<u32>,
}

impl SpawnCommand {
    /// `argv` must have at least one element (the program to run).
    pub fn new<I, S>(argv: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            argv: argv.into_iter().map(Into::into).collect(),
            env: Vec::new(),
            cwd: None,
            uid: None,
            gid: None,
        }
    }

    /// The argv joined by spaces, as shown in the default window title.
    pub fn command_line(&self) -> String {
        self.argv.join(" ")
    }
}

/// How the child exited.
#[derive(Debug, Clone, Copy)]
pub struct ExitStatus {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitStatus {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

/// A child process attached to a PTY master configured for non-blocking I/O.
#[derive(Debug)]
pub struct PtyProcess {
    master: AsyncFd<PtyFd>,
    child: Pid,
    reaped: AtomicBool,
}

impl PtyProcess {
    /// Spawn `command` on a new PTY with the given initial window size.
    // forkpty requires unsafe: post-fork child is partially initialized
    #[allow(unsafe_code)]
    pub fn spawn(command: &SpawnCommand, cols: u16, rows: u16) -> io::Result<Self> {
        if command.argv.is_empty() {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty argv"));
        }

        let winsize = Winsize {
            ws_col: cols,
            ws_row: rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: forkpty is unsafe because the child is in a
        // partially-initialized state after fork. The child branch only
        // performs exec-safe setup and never returns into the runtime.
        let result = unsafe { forkpty(&winsize, None) }.map_err(io_err)?;
        let ForkptyResult { master, fork_result } = result;

        match fork_result {
            ForkResult::Child => {
                exec_child(command);
            }
            ForkResult::Parent { child } => {
                set_nonblocking(&master)?;
                let master = AsyncFd::new(PtyFd(master))?;
                Ok(Self { master, child, reaped: AtomicBool::new(false) })
            }
        }
    }

    /// Read a chunk of process output from the master.
    pub async fn read_chunk(&self, buf: &mut [u8]) -> io::Result<usize> {
        loop {
            let mut guard = self.master.readable().await?;
            match guard.try_io(|inner| {
                nix::unistd::read(inner.get_ref().as_raw_fd(), buf).map_err(io_err)
            }) {
                Ok(result) => return result,
                Err(_would_block) => continue,
            }
        }
    }

    /// Write client input to the master.
    pub async fn write_all(&self, data: &[u8]) -> io::Result<()> {
        let mut offset = 0;
        while offset < data.len() {
            let mut guard = self.master.writable().await?;
            match guard.try_io(|inner| {
                nix::unistd::write(inner.get_ref(), &data[offset..]).map_err(io_err)
            }) {
                Ok(Ok(n)) => offset += n,
                Ok(Err(e)) => return Err(e),
                Err(_would_block) => continue,
            }
        }
        Ok(())
    }

    /// Apply a new window size, then reassert non-blocking mode (resize
    /// clears it on some platforms).
    // TIOCSWINSZ ioctl requires unsafe for the libc::ioctl call
    #[allow(unsafe_code)]
    pub fn resize(&self, cols: u16, rows: u16) -> io::Result<()> {
        let ws = Winsize {
            ws_col: cols,
            ws_row: rows,
            ws_xpixel: 0,
            ws_ypixel: 0,
        };

        // SAFETY: TIOCSWINSZ is a well-defined ioctl that sets the window
        // size on the PTY master fd. The Winsize struct is properly
        // initialized.
        let ret = unsafe { libc::ioctl(self.master.as_raw_fd(), libc::TIOCSWINSZ, &ws) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        set_nonblocking(self.master.get_ref())
    }

    pub fn child_pid(&self) -> i32 {
        self.child.as_raw()
    }

    /// Ask the child to go away, the same signal it would receive when the
    /// master side of its controlling terminal disappears.
    pub fn hangup(&self) {
        let _ = kill(self.child, Signal::SIGHUP);
    }

    /// Reap the child with one blocking wait on a blocking thread.
    pub async fn reap(&self) -> io::Result<ExitStatus> {
        self.reaped.store(true, Ordering::Release);
        let pid = self.child;
        tokio::task::spawn_blocking(move || wait_for_exit(pid))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?
    }
}

impl Drop for PtyProcess {
    fn drop(&mut self) {
        if self.reaped.load(Ordering::Acquire) {
            return;
        }
        // Best-effort shutdown for sessions torn down before cleanup ran:
        // SIGHUP, then SIGKILL.
        let _ = kill(self.child, Signal::SIGHUP);
        std::thread::sleep(std::time::Duration::from_millis(50));
        let _ = kill(self.child, Signal::SIGKILL);
        let _ = waitpid(self.child, Some(WaitPidFlag::WNOHANG));
    }
}

/// Child-side setup between fork and exec. Never returns.
fn exec_child(command: &SpawnCommand) -> ! {
    std::env::set_var("TERM", "xterm-256color");
    for (key, value) in &command.env {
        std::env::set_var(key, value);
    }

    if let Some(cwd) = &command.cwd {
        if std::env::set_current_dir(cwd).is_err() {
            eprintln!("webtty: failed to chdir to {}", cwd.display());
            std::process::exit(127);
        }
    }

    // Group first: dropping the user id first would lose the right to
    // change groups.
    if let Some(gid) = command.gid {
        if setgid(Gid::from_raw(gid)).is_err() {
            eprintln!("webtty: setgid({gid}) failed");
            std::process::exit(127);
        }
    }
    if let Some(uid) = command.uid {
        if setuid(Uid::from_raw(uid)).is_err() {
            eprintln!("webtty: setuid({uid}) failed");
            std::process::exit(127);
        }
    }

    let c_args: Vec<CString> = match command
        .argv
        .iter()
        .map(|s| CString::new(s.as_bytes()))
        .collect::<Result<_, _>>()
    {
        Ok(args) => args,
        Err(_) => {
            eprintln!("webtty: invalid command argument");
            std::process::exit(127);
        }
    };

    let _ = execvp(&c_args[0], &c_args);
    eprintln!("webtty: exec failed: {}", io::Error::last_os_error());
    std::process::exit(127);
}

/// Block until the child exits and convert to our `ExitStatus`.
fn wait_for_exit(pid: Pid) -> io::Result<ExitStatus> {
    loop {
        match waitpid(pid, None) {
            Ok(WaitStatus::Exited(_, code)) => {
                return Ok(ExitStatus { code: Some(code), signal: None });
            }
            Ok(WaitStatus::Signaled(_, sig, _)) => {
                return Ok(ExitStatus { code: None, signal: Some(sig as i32) });
            }
            Ok(_) => continue,
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(io_err(e)),
        }
    }
}
