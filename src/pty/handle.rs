//! The PTY resource object
//!
//! A [`PtyHandle`] owns the master descriptor and the child pid from the
//! moment the allocator returns until [`PtyHandle::close`] runs. Both live in
//! one atomic cell so a close racing with another close (or with a reader on
//! another thread) sees either the whole pair or neither half.

use std::fmt;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::libc;
use nix::sys::wait::{WaitPidFlag, WaitStatus};
use nix::unistd::Pid;
use tracing::{debug, trace, warn};

use super::backend::Backend;
use super::stream::{PtyInput, PtyOutput};
use super::{record, PtyError, PtyResult, WindowSize};

/// How many times close polls for the killed child before giving up
const REAP_ATTEMPTS: u32 = 10;
const REAP_INTERVAL: Duration = Duration::from_millis(10);

/// fd and pid packed into one word; all ones means closed
#[derive(Debug)]
pub(crate) struct StateCell(AtomicU64);

impl StateCell {
    const CLOSED: u64 = u64::MAX;

    pub(crate) fn new(fd: RawFd, pid: Pid) -> Self {
        Self(AtomicU64::new(Self::pack(fd, pid)))
    }

    fn pack(fd: RawFd, pid: Pid) -> u64 {
        (u64::from(fd as u32) << 32) | u64::from(pid.as_raw() as u32)
    }

    fn unpack(bits: u64) -> Option<(RawFd, Pid)> {
        let fd = (bits >> 32) as u32 as i32;
        let pid = bits as u32 as i32;
        (fd >= 0).then_some((fd, Pid::from_raw(pid)))
    }

    pub(crate) fn load(&self) -> Option<(RawFd, Pid)> {
        Self::unpack(self.0.load(Ordering::Acquire))
    }

    /// Mark the cell closed, returning what it held if it was open
    pub(crate) fn take(&self) -> Option<(RawFd, Pid)> {
        Self::unpack(self.0.swap(Self::CLOSED, Ordering::AcqRel))
    }
}

/// How a child process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitStatus {
    /// Exited normally with this code
    Exited(i32),
    /// Killed by this signal number
    Signaled(i32),
    /// No child to wait for (closed without reaping)
    NoChild,
}

impl ExitStatus {
    /// Shell-style integer status: the exit code, 128 + signal, or -1
    pub fn code(self) -> i32 {
        match self {
            ExitStatus::Exited(code) => code,
            ExitStatus::Signaled(sig) => 128 + sig,
            ExitStatus::NoChild => -1,
        }
    }

    pub fn success(self) -> bool {
        self == ExitStatus::Exited(0)
    }

    fn from_wait(status: WaitStatus) -> Option<Self> {
        match status {
            WaitStatus::Exited(_, code) => Some(ExitStatus::Exited(code)),
            WaitStatus::Signaled(_, sig, _) => Some(ExitStatus::Signaled(sig as i32)),
            _ => None,
        }
    }
}

impl fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitStatus::Exited(code) => write!(f, "exit code {}", code),
            ExitStatus::Signaled(sig) => write!(f, "killed by signal {}", sig),
            ExitStatus::NoChild => f.write_str("no child"),
        }
    }
}

/// Result of a non-blocking liveness probe
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Running,
    Exited(ExitStatus),
    /// The probe itself failed; the child's state is not known
    Unknown(Errno),
}

/// Non-blocking `waitpid` on `pid`, reaping it if it has exited
pub(crate) fn probe(backend: &dyn Backend, pid: Pid) -> Liveness {
    match backend.wait_for(pid, Some(WaitPidFlag::WNOHANG)) {
        Ok(status) => match ExitStatus::from_wait(status) {
            Some(exit) => Liveness::Exited(exit),
            // StillAlive, stopped or continued
            None => Liveness::Running,
        },
        Err(e) => Liveness::Unknown(record(e)),
    }
}

pub(crate) struct Shared {
    backend: Arc<dyn Backend>,
    state: StateCell,
    exit: OnceLock<ExitStatus>,
    input: OnceLock<PtyInput>,
    output: OnceLock<PtyOutput>,
}

impl Shared {
    pub(crate) fn backend(&self) -> &dyn Backend {
        self.backend.as_ref()
    }

    pub(crate) fn master_fd(&self) -> Option<RawFd> {
        self.state.load().map(|(fd, _)| fd)
    }

    pub(crate) fn close(&self, terminate_child: bool) -> PtyResult<()> {
        let Some((fd, pid)) = self.state.take() else {
            return Ok(());
        };

        // Unblocks readers and writers parked on this descriptor.
        if let Err(e) = self.backend.set_nonblocking(fd, true) {
            warn!(fd, error = %record(e), "Failed to make PTY master non-blocking before close");
        }

        if terminate_child && self.exit.get().is_none() {
            self.terminate(pid);
        }

        let result = self
            .backend
            .close(fd)
            .map_err(|e| PtyError::Close(record(e)));

        // Cached adapters hold only a Weak and own nothing; their next call
        // sees the closed state.

        debug!(fd, pid = pid.as_raw(), ok = result.is_ok(), "Closed PTY");
        result
    }

    /// Close after a stream fault; the fault is what gets reported
    pub(crate) fn force_close(&self) {
        if let Err(e) = self.close(true) {
            warn!(error = %e, "Failed to close PTY after stream fault");
        }
    }

    fn terminate(&self, pid: Pid) {
        match probe(self.backend.as_ref(), pid) {
            Liveness::Running => {},
            Liveness::Exited(status) => {
                let _ = self.exit.set(status);
                return;
            },
            Liveness::Unknown(e) => {
                debug!(pid = pid.as_raw(), error = %e, "Liveness probe failed, not signalling child");
                return;
            },
        }

        if let Err(e) = self.backend.signal(pid, libc::SIGKILL) {
            warn!(pid = pid.as_raw(), error = %record(e), "Failed to kill PTY child");
            return;
        }

        for _ in 0..REAP_ATTEMPTS {
            match probe(self.backend.as_ref(), pid) {
                Liveness::Running => thread::sleep(REAP_INTERVAL),
                Liveness::Exited(status) => {
                    let _ = self.exit.set(status);
                    trace!(pid = pid.as_raw(), %status, "Reaped PTY child");
                    return;
                },
                Liveness::Unknown(_) => return,
            }
        }
        debug!(pid = pid.as_raw(), "PTY child not reaped after SIGKILL");
    }
}

impl Drop for Shared {
    fn drop(&mut self) {
        if let Err(e) = self.close(true) {
            warn!(error = %e, "Failed to close PTY on drop");
        }
    }
}

/// A running child attached to a PTY, and the master side of that PTY
///
/// Dropping the handle closes it and kills the child.
pub struct PtyHandle {
    shared: Arc<Shared>,
}

impl PtyHandle {
    /// Take ownership of an open master descriptor and a forked child
    pub(crate) fn from_parts(backend: Arc<dyn Backend>, master: RawFd, pid: Pid) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                state: StateCell::new(master, pid),
                exit: OnceLock::new(),
                input: OnceLock::new(),
                output: OnceLock::new(),
            }),
        }
    }

    fn open_state(&self) -> PtyResult<(RawFd, Pid)> {
        self.shared.state.load().ok_or(PtyError::Closed)
    }

    pub fn is_closed(&self) -> bool {
        self.shared.state.load().is_none()
    }

    /// The master descriptor, while open
    pub fn master_fd(&self) -> Option<RawFd> {
        self.shared.master_fd()
    }

    /// The child's pid, while open
    pub fn child_pid(&self) -> Option<Pid> {
        self.shared.state.load().map(|(_, pid)| pid)
    }

    /// Reader over the master side. Built once and cached.
    pub fn input_stream(&self) -> PtyResult<&PtyInput> {
        self.open_state()?;
        Ok(self
            .shared
            .input
            .get_or_init(|| PtyInput::new(Arc::downgrade(&self.shared))))
    }

    /// Writer over the master side. Built once and cached.
    pub fn output_stream(&self) -> PtyResult<&PtyOutput> {
        self.open_state()?;
        Ok(self
            .shared
            .output
            .get_or_init(|| PtyOutput::new(Arc::downgrade(&self.shared))))
    }

    pub fn window_size(&self) -> PtyResult<WindowSize> {
        let (fd, _) = self.open_state()?;
        self.shared
            .backend
            .get_window_size(fd)
            .map_err(|e| PtyError::GetWindowSize(record(e)))
    }

    /// Resize the terminal; the child receives SIGWINCH
    pub fn set_window_size(&self, size: WindowSize) -> PtyResult<()> {
        let (fd, _) = self.open_state()?;
        self.shared
            .backend
            .apply_window_size(fd, size)
            .map_err(|e| PtyError::SetWindowSize(record(e)))
    }

    /// Best-effort: `true` only when a probe positively saw the child running
    pub fn is_child_alive(&self) -> bool {
        matches!(self.child_liveness(), Liveness::Running)
    }

    pub fn child_liveness(&self) -> Liveness {
        if let Some(status) = self.shared.exit.get() {
            return Liveness::Exited(*status);
        }
        let Some((_, pid)) = self.shared.state.load() else {
            return Liveness::Exited(ExitStatus::NoChild);
        };
        match probe(self.shared.backend.as_ref(), pid) {
            Liveness::Exited(status) => Liveness::Exited(*self.shared.exit.get_or_init(|| status)),
            other => other,
        }
    }

    /// Block until the child exits
    ///
    /// Returns [`ExitStatus::NoChild`] when the handle was closed before the
    /// child was reaped.
    pub fn wait_for(&self) -> PtyResult<ExitStatus> {
        if let Some(status) = self.shared.exit.get() {
            return Ok(*status);
        }
        let Some((_, pid)) = self.shared.state.load() else {
            return Ok(ExitStatus::NoChild);
        };

        loop {
            match self.shared.backend.wait_for(pid, None) {
                Ok(status) => {
                    if let Some(exit) = ExitStatus::from_wait(status) {
                        return Ok(*self.shared.exit.get_or_init(|| exit));
                    }
                },
                Err(Errno::EINTR) => {},
                // Reaped by a concurrent close or probe
                Err(Errno::ECHILD) => {
                    return Ok(self
                        .shared
                        .exit
                        .get()
                        .copied()
                        .unwrap_or(ExitStatus::NoChild));
                },
                Err(e) => return Err(PtyError::Wait(record(e))),
            }
        }
    }

    /// Send signal number `sig` to the child
    pub fn send_signal(&self, sig: i32) -> PtyResult<()> {
        let (_, pid) = self.open_state()?;
        if self.shared.exit.get().is_some() {
            // The pid may already belong to someone else.
            return Err(PtyError::Signal(record(Errno::ESRCH)));
        }
        self.shared
            .backend
            .signal(pid, sig)
            .map_err(|e| PtyError::Signal(record(e)))
    }

    /// Close the master descriptor, optionally killing the child first
    ///
    /// Idempotent: only the first call (across all threads) does any work.
    pub fn close(&self, terminate_child: bool) -> PtyResult<()> {
        self.shared.close(terminate_child)
    }
}

impl fmt::Debug for PtyHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PtyHandle")
            .field("master_fd", &self.master_fd())
            .field("child_pid", &self.child_pid())
            .field("exit", &self.shared.exit.get())
            .finish()
    }
}
