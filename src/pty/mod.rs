//! PTY (pseudoterminal) allocation and lifecycle management
//!
//! This module opens master/slave pairs, forks a child onto the slave side,
//! and hands the caller a [`PtyHandle`] that owns the master descriptor and
//! the child's process id until it is closed.

pub mod allocator;
pub mod backend;
pub mod command;
pub mod handle;
pub mod modes;
pub mod platform;
pub mod stream;

#[cfg(test)]
pub(crate) mod testing;

use std::cell::Cell;
use std::io;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::libc;
use nix::unistd::Pid;

pub use backend::{native, Backend, BackendKind, ExecImage, ForkOutcome};
pub use command::{exec_in_pty, normalize_argv, PtyCommand};
pub use handle::{ExitStatus, Liveness, PtyHandle};
pub use modes::{ControlChar, TerminalModes};
pub use stream::{PtyInput, PtyOutput, POLL_INTERVAL_MS, WRITE_CHUNK};

/// Which adapter operation hit a stream fault
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamOp {
    Read,
    Write,
    Flush,
}

impl std::fmt::Display for StreamOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            StreamOp::Read => "read",
            StreamOp::Write => "write",
            StreamOp::Flush => "flush",
        })
    }
}

/// Error type for PTY operations
#[derive(Debug, thiserror::Error)]
pub enum PtyError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to open PTY master: {0}")]
    OpenMaster(#[source] nix::Error),

    #[error("Failed to grant PTY access: {0}")]
    GrantPty(#[source] nix::Error),

    #[error("Failed to unlock PTY: {0}")]
    UnlockPty(#[source] nix::Error),

    #[error("Failed to get PTY slave name: {0}")]
    SlaveName(#[source] nix::Error),

    #[error("Failed to open PTY slave: {0}")]
    OpenSlave(#[source] nix::Error),

    #[error("Failed to push line discipline modules: {0}")]
    LineDiscipline(#[source] nix::Error),

    #[error("Failed to fork: {0}")]
    Fork(#[source] nix::Error),

    #[error("Failed to set flags for PTY master: {0}")]
    SetBlocking(#[source] nix::Error),

    #[error("PTY already closed")]
    Closed,

    #[error("I/O {op} failed: {source}")]
    Stream {
        op: StreamOp,
        #[source]
        source: nix::Error,
    },

    #[error("Failed to close PTY: {0}")]
    Close(#[source] nix::Error),

    #[error("Failed to get window size: {0}")]
    GetWindowSize(#[source] nix::Error),

    #[error("Failed to set window size: {0}")]
    SetWindowSize(#[source] nix::Error),

    #[error("Failed to wait for child: {0}")]
    Wait(#[source] nix::Error),

    #[error("Failed to signal child: {0}")]
    Signal(#[source] nix::Error),
}

impl PtyError {
    /// True for failures of the allocation protocol
    pub fn is_allocation(&self) -> bool {
        matches!(
            self,
            PtyError::OpenMaster(_)
                | PtyError::GrantPty(_)
                | PtyError::UnlockPty(_)
                | PtyError::SlaveName(_)
                | PtyError::OpenSlave(_)
                | PtyError::LineDiscipline(_)
                | PtyError::Fork(_)
                | PtyError::SetBlocking(_)
        )
    }

    /// The native error code carried by this error, if any
    pub fn errno(&self) -> Option<i32> {
        match self {
            PtyError::InvalidArgument(_) | PtyError::Closed => None,
            PtyError::OpenMaster(e)
            | PtyError::GrantPty(e)
            | PtyError::UnlockPty(e)
            | PtyError::SlaveName(e)
            | PtyError::OpenSlave(e)
            | PtyError::LineDiscipline(e)
            | PtyError::Fork(e)
            | PtyError::SetBlocking(e)
            | PtyError::Stream { source: e, .. }
            | PtyError::Close(e)
            | PtyError::GetWindowSize(e)
            | PtyError::SetWindowSize(e)
            | PtyError::Wait(e)
            | PtyError::Signal(e) => Some(*e as i32),
        }
    }
}

impl From<PtyError> for io::Error {
    fn from(err: PtyError) -> Self {
        let kind = match err {
            PtyError::Closed => io::ErrorKind::NotConnected,
            PtyError::Stream { .. } => io::ErrorKind::BrokenPipe,
            PtyError::InvalidArgument(_) => io::ErrorKind::InvalidInput,
            _ => io::ErrorKind::Other,
        };
        io::Error::new(kind, err)
    }
}

/// Result type for PTY operations
pub type PtyResult<T> = Result<T, PtyError>;

thread_local! {
    static LAST_ERROR: Cell<i32> = const { Cell::new(0) };
}

/// Remember `err` as the calling thread's most recent native failure
pub(crate) fn record(err: Errno) -> Errno {
    LAST_ERROR.with(|last| last.set(err as i32));
    err
}

/// The most recent native error code recorded on this thread, or 0
pub fn last_error_code() -> i32 {
    LAST_ERROR.with(Cell::get)
}

/// Window size for PTY
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize)]
pub struct WindowSize {
    pub rows: u16,
    pub cols: u16,
    #[serde(default)]
    pub pixel_width: u16,
    #[serde(default)]
    pub pixel_height: u16,
}

impl WindowSize {
    /// Create a new window size with just rows and columns
    pub fn new(cols: u16, rows: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width: 0,
            pixel_height: 0,
        }
    }

    /// Create a new window size with pixel dimensions
    pub fn with_pixels(cols: u16, rows: u16, pixel_width: u16, pixel_height: u16) -> Self {
        Self {
            rows,
            cols,
            pixel_width,
            pixel_height,
        }
    }
}

impl Default for WindowSize {
    fn default() -> Self {
        Self::new(80, 24)
    }
}

impl From<WindowSize> for libc::winsize {
    fn from(ws: WindowSize) -> Self {
        libc::winsize {
            ws_row: ws.rows,
            ws_col: ws.cols,
            ws_xpixel: ws.pixel_width,
            ws_ypixel: ws.pixel_height,
        }
    }
}

impl From<libc::winsize> for WindowSize {
    fn from(ws: libc::winsize) -> Self {
        Self {
            rows: ws.ws_row,
            cols: ws.ws_col,
            pixel_width: ws.ws_xpixel,
            pixel_height: ws.ws_ypixel,
        }
    }
}

/// Send signal number `sig` to `pid`
pub fn signal(pid: Pid, sig: i32) -> PtyResult<()> {
    native()
        .signal(pid, sig)
        .map_err(|e| PtyError::Signal(record(e)))
}

/// Best-effort check whether `pid` (a child of this process) is still running
///
/// Reaps the process if it has exited. Probe failures report `false`; use
/// [`PtyHandle::child_liveness`] when that distinction matters.
///
/// Do not call this on a pid that a live [`PtyHandle`] owns. The exit status
/// it reaps is lost to the handle, whose [`PtyHandle::wait_for`] then reports
/// [`ExitStatus::NoChild`]. Use [`PtyHandle::is_child_alive`] there; it keeps
/// the status.
pub fn is_process_alive(pid: Pid) -> bool {
    matches!(handle::probe(native().as_ref(), pid), Liveness::Running)
}

/// Read the window size of any terminal descriptor
pub fn window_size_of(fd: RawFd) -> PtyResult<WindowSize> {
    native()
        .get_window_size(fd)
        .map_err(|e| PtyError::GetWindowSize(record(e)))
}

/// Set the window size of any terminal descriptor
pub fn set_window_size_of(fd: RawFd, size: WindowSize) -> PtyResult<()> {
    native()
        .apply_window_size(fd, size)
        .map_err(|e| PtyError::SetWindowSize(record(e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_size_default() {
        let ws = WindowSize::default();
        assert_eq!(ws.rows, 24);
        assert_eq!(ws.cols, 80);
    }

    #[test]
    fn test_window_size_to_libc() {
        let ws = WindowSize::with_pixels(100, 30, 800, 600);
        let libc_ws: libc::winsize = ws.into();
        assert_eq!(libc_ws.ws_row, 30);
        assert_eq!(libc_ws.ws_col, 100);
        assert_eq!(libc_ws.ws_xpixel, 800);
        assert_eq!(libc_ws.ws_ypixel, 600);
        assert_eq!(WindowSize::from(libc_ws), ws);
    }

    #[test]
    fn test_errno_and_classification() {
        let err = PtyError::UnlockPty(Errno::EACCES);
        assert!(err.is_allocation());
        assert_eq!(err.errno(), Some(libc::EACCES));

        assert!(!PtyError::Closed.is_allocation());
        assert_eq!(PtyError::Closed.errno(), None);
        assert_eq!(PtyError::InvalidArgument("x".into()).errno(), None);
    }

    #[test]
    fn test_io_error_kinds() {
        let closed: io::Error = PtyError::Closed.into();
        assert_eq!(closed.kind(), io::ErrorKind::NotConnected);

        let fault: io::Error = PtyError::Stream {
            op: StreamOp::Write,
            source: Errno::EBADF,
        }
        .into();
        assert_eq!(fault.kind(), io::ErrorKind::BrokenPipe);
    }

    #[test]
    fn test_last_error_code_is_per_thread() {
        record(Errno::EPERM);
        assert_eq!(last_error_code(), libc::EPERM);

        let other = std::thread::spawn(last_error_code).join().unwrap();
        assert_eq!(other, 0);
    }
}
