//! Scripted in-memory backend for unit tests

use std::collections::{HashMap, VecDeque};
use std::ffi::{CStr, CString};
use std::os::fd::RawFd;
use std::sync::Mutex;
use std::thread;
use std::time::Duration;

use nix::errno::Errno;
use nix::libc;
use nix::poll::PollFlags;
use nix::sys::signal::Signal;
use nix::sys::wait::{WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

use super::backend::{Backend, BackendKind, ExecImage, ForkOutcome};
use super::modes::TerminalModes;
use super::WindowSize;

pub(crate) const MASTER_FD: RawFd = 100;
pub(crate) const SLAVE_FD: RawFd = 101;
pub(crate) const CHILD_PID: i32 = 4242;

/// A backend operation that can be scripted to fail
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) enum Step {
    AllocateMaster,
    Grant,
    Unlock,
    SlavePath,
    OpenSlave,
    LineDiscipline,
    Fork,
    Read,
    Write,
    Available,
    Drain,
    Poll,
    SetNonblocking,
    Signal,
    Wait,
    Close,
}

#[derive(Debug, Clone, Copy)]
enum Child {
    Running,
    Finished(WaitStatus),
    Reaped,
}

#[derive(Debug)]
struct State {
    failures: HashMap<Step, Errno>,
    empty_slave_path: bool,
    calls: Vec<&'static str>,
    closed: Vec<RawFd>,
    signals: Vec<i32>,
    child: Child,
    input: VecDeque<u8>,
    written: Vec<u8>,
    write_sizes: Vec<usize>,
    write_limit: Option<usize>,
    nonblocking: bool,
    stalled: bool,
    window: WindowSize,
}

#[derive(Debug)]
pub(crate) struct FakeBackend {
    state: Mutex<State>,
}

impl FakeBackend {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(State {
                failures: HashMap::new(),
                empty_slave_path: false,
                calls: Vec::new(),
                closed: Vec::new(),
                signals: Vec::new(),
                child: Child::Running,
                input: VecDeque::new(),
                written: Vec::new(),
                write_sizes: Vec::new(),
                write_limit: None,
                nonblocking: false,
                stalled: false,
                window: WindowSize::default(),
            }),
        }
    }

    pub(crate) fn failing(step: Step, errno: Errno) -> Self {
        let fake = Self::new();
        fake.fail(step, errno);
        fake
    }

    pub(crate) fn fail(&self, step: Step, errno: Errno) {
        self.lock().failures.insert(step, errno);
    }

    pub(crate) fn with_empty_slave_path(self) -> Self {
        self.lock().empty_slave_path = true;
        self
    }

    /// Accept at most `limit` bytes per write call
    pub(crate) fn with_write_limit(self, limit: usize) -> Self {
        self.lock().write_limit = Some(limit);
        self
    }

    /// Never report the descriptor ready, as if the child sat idle
    pub(crate) fn stalled(self) -> Self {
        self.lock().stalled = true;
        self
    }

    pub(crate) fn with_input(self, bytes: &[u8]) -> Self {
        self.lock().input.extend(bytes);
        self
    }

    /// Make the child look like it already exited with `code`
    pub(crate) fn exit_child(&self, code: i32) {
        self.lock().child = Child::Finished(WaitStatus::Exited(Pid::from_raw(CHILD_PID), code));
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.lock().calls.clone()
    }

    pub(crate) fn closed(&self) -> Vec<RawFd> {
        self.lock().closed.clone()
    }

    pub(crate) fn signals(&self) -> Vec<i32> {
        self.lock().signals.clone()
    }

    pub(crate) fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    pub(crate) fn write_sizes(&self) -> Vec<usize> {
        self.lock().write_sizes.clone()
    }

    pub(crate) fn is_nonblocking(&self) -> bool {
        self.lock().nonblocking
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn enter(&self, step: Step, call: &'static str) -> Result<std::sync::MutexGuard<'_, State>, Errno> {
        let mut state = self.lock();
        state.calls.push(call);
        match state.failures.get(&step) {
            Some(errno) => Err(*errno),
            None => Ok(state),
        }
    }
}

impl Backend for FakeBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::Linux
    }

    fn default_modes(&self) -> TerminalModes {
        TerminalModes::raw()
    }

    fn allocate_master(&self) -> Result<RawFd, Errno> {
        self.enter(Step::AllocateMaster, "allocate_master")?;
        Ok(MASTER_FD)
    }

    fn grant_access(&self, _fd: RawFd) -> Result<(), Errno> {
        self.enter(Step::Grant, "grant_access").map(drop)
    }

    fn unlock(&self, _fd: RawFd) -> Result<(), Errno> {
        self.enter(Step::Unlock, "unlock").map(drop)
    }

    fn slave_path(&self, _fd: RawFd) -> Result<CString, Errno> {
        let state = self.enter(Step::SlavePath, "slave_path")?;
        if state.empty_slave_path {
            return Ok(CString::default());
        }
        Ok(CString::new("/dev/pts/fake").unwrap())
    }

    fn open_slave(&self, _path: &CStr) -> Result<RawFd, Errno> {
        self.enter(Step::OpenSlave, "open_slave")?;
        Ok(SLAVE_FD)
    }

    fn attach_line_discipline(&self, _fd: RawFd) -> Result<(), Errno> {
        self.enter(Step::LineDiscipline, "attach_line_discipline")
            .map(drop)
    }

    unsafe fn fork(&self) -> Result<ForkOutcome, Errno> {
        self.enter(Step::Fork, "fork")?;
        Ok(ForkOutcome::Parent(Pid::from_raw(CHILD_PID)))
    }

    fn new_session(&self) -> Result<(), Errno> {
        unreachable!("the fake never runs a child branch")
    }

    fn set_controlling_terminal(&self, _fd: RawFd) -> Result<(), Errno> {
        unreachable!("the fake never runs a child branch")
    }

    fn apply_terminal_modes(&self, _fd: RawFd, _modes: &TerminalModes) -> Result<(), Errno> {
        unreachable!("the fake never runs a child branch")
    }

    fn apply_window_size(&self, _fd: RawFd, size: WindowSize) -> Result<(), Errno> {
        self.lock().window = size;
        Ok(())
    }

    fn get_window_size(&self, _fd: RawFd) -> Result<WindowSize, Errno> {
        Ok(self.lock().window)
    }

    fn duplicate_onto_standard_streams(&self, _fd: RawFd) -> Result<(), Errno> {
        unreachable!("the fake never runs a child branch")
    }

    fn replace_process_image(&self, _image: &ExecImage) -> Errno {
        unreachable!("the fake never runs a child branch")
    }

    fn wait_for(&self, pid: Pid, options: Option<WaitPidFlag>) -> Result<WaitStatus, Errno> {
        let mut state = self.enter(Step::Wait, "wait_for")?;
        let nohang = options.is_some_and(|o| o.contains(WaitPidFlag::WNOHANG));
        let child = state.child;
        match child {
            Child::Running if nohang => Ok(WaitStatus::StillAlive),
            Child::Running => {
                state.child = Child::Reaped;
                Ok(WaitStatus::Exited(pid, 0))
            },
            Child::Finished(status) => {
                state.child = Child::Reaped;
                Ok(status)
            },
            Child::Reaped => Err(Errno::ECHILD),
        }
    }

    fn signal(&self, pid: Pid, sig: i32) -> Result<(), Errno> {
        let mut state = self.enter(Step::Signal, "signal")?;
        state.signals.push(sig);
        if sig == libc::SIGKILL {
            if let Child::Running = state.child {
                state.child = Child::Finished(WaitStatus::Signaled(pid, Signal::SIGKILL, false));
            }
        }
        Ok(())
    }

    fn close(&self, fd: RawFd) -> Result<(), Errno> {
        let mut state = self.enter(Step::Close, "close")?;
        state.closed.push(fd);
        Ok(())
    }

    fn read(&self, _fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
        let mut state = self.enter(Step::Read, "read")?;
        let n = buf.len().min(state.input.len());
        for (slot, byte) in buf.iter_mut().zip(state.input.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }

    fn write(&self, _fd: RawFd, buf: &[u8]) -> Result<usize, Errno> {
        let mut state = self.enter(Step::Write, "write")?;
        state.write_sizes.push(buf.len());
        let n = state.write_limit.map_or(buf.len(), |limit| buf.len().min(limit));
        state.written.extend_from_slice(&buf[..n]);
        Ok(n)
    }

    fn available(&self, _fd: RawFd) -> Result<usize, Errno> {
        let state = self.enter(Step::Available, "available")?;
        Ok(state.input.len())
    }

    // Not recorded in `calls`; an idle reader polls many times.
    fn poll(&self, _fd: RawFd, _events: PollFlags, timeout_ms: u16) -> Result<bool, Errno> {
        let stalled = {
            let state = self.lock();
            if let Some(errno) = state.failures.get(&Step::Poll) {
                return Err(*errno);
            }
            state.stalled && state.input.is_empty()
        };
        if stalled {
            thread::sleep(Duration::from_millis(u64::from(timeout_ms.min(5))));
        }
        Ok(!stalled)
    }

    fn drain(&self, _fd: RawFd) -> Result<(), Errno> {
        self.enter(Step::Drain, "drain").map(drop)
    }

    fn set_nonblocking(&self, _fd: RawFd, nonblocking: bool) -> Result<(), Errno> {
        let mut state = self.enter(Step::SetNonblocking, "set_nonblocking")?;
        state.nonblocking = nonblocking;
        Ok(())
    }
}
