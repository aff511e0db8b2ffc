//! Platform backend capability set
//!
//! Each OS family implements [`Backend`]. The POSIX calls every family shares
//! are default methods here; the per-platform files in [`super::platform`]
//! override the steps whose constants or behaviour differ.
//!
//! # References
//!
//! - posix_openpt(3), grantpt(3), unlockpt(3), ptsname(3)
//! - tty_ioctl(4): https://man7.org/linux/man-pages/man4/tty_ioctl.4.html

use std::ffi::{CStr, CString};
use std::os::fd::{BorrowedFd, IntoRawFd, RawFd};
use std::ptr;
use std::sync::{Arc, OnceLock};

use nix::errno::Errno;
use nix::fcntl::{fcntl, open, FcntlArg, FdFlag, OFlag};
use nix::libc::{self, c_char};
use nix::poll::{poll, PollFd, PollFlags};
use nix::pty::posix_openpt;
use nix::sys::signal::{kill, Signal};
use nix::sys::stat::Mode;
use nix::sys::termios::{self, SetArg};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{self, dup2, setsid, ForkResult, Pid};

use super::modes::TerminalModes;
use super::WindowSize;

/// OS family a backend implements
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Linux,
    Apple,
    Bsd,
    Solarish,
}

/// Result of [`Backend::fork`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkOutcome {
    /// Running in the parent process; carries the child's pid
    Parent(Pid),
    /// Running in the copy. Must end in exec or `_exit`, never return.
    Child,
}

/// Everything `execve` needs, prepared before fork so the child never allocates
///
/// The pointer arrays point into the heap buffers of the owned `CString`s,
/// which are never touched after construction.
pub struct ExecImage {
    command: CString,
    argv: Vec<CString>,
    env: Option<Vec<CString>>,
    argv_ptrs: Vec<*const c_char>,
    env_ptrs: Option<Vec<*const c_char>>,
}

impl ExecImage {
    /// `argv` must already start with the program name. With `env` of `None`
    /// the child inherits this process's environment.
    pub fn new(command: CString, argv: Vec<CString>, env: Option<Vec<CString>>) -> Self {
        let argv_ptrs = null_terminated(&argv);
        let env_ptrs = env.as_deref().map(null_terminated);
        Self {
            command,
            argv,
            env,
            argv_ptrs,
            env_ptrs,
        }
    }

    pub fn command(&self) -> &CStr {
        &self.command
    }

    pub fn argv(&self) -> &[CString] {
        &self.argv
    }

    pub fn env(&self) -> Option<&[CString]> {
        self.env.as_deref()
    }
}

fn null_terminated(strings: &[CString]) -> Vec<*const c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(ptr::null()))
        .collect()
}

/// Raw PTY and process operations for one OS family
///
/// Every method reports failure as the native [`Errno`]; mapping to
/// [`super::PtyError`] happens in the allocator and handle.
pub trait Backend: Send + Sync {
    fn kind(&self) -> BackendKind;

    /// Terminal modes used when the caller supplies none
    fn default_modes(&self) -> TerminalModes {
        TerminalModes::sane()
    }

    /// Open a new master descriptor (close-on-exec)
    fn allocate_master(&self) -> Result<RawFd, Errno> {
        let master = posix_openpt(OFlag::O_RDWR | OFlag::O_NOCTTY)?;
        let fd = master.into_raw_fd();
        if let Err(e) = fcntl(fd, FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC)) {
            let _ = unistd::close(fd);
            return Err(e);
        }
        Ok(fd)
    }

    // nix's grantpt/unlockpt take a `PtyMaster`, which owns the descriptor;
    // the backend works on raw descriptors so it calls libc directly.
    fn grant_access(&self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: grantpt only inspects the descriptor
        Errno::result(unsafe { libc::grantpt(fd) }).map(drop)
    }

    fn unlock(&self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: unlockpt only inspects the descriptor
        Errno::result(unsafe { libc::unlockpt(fd) }).map(drop)
    }

    /// Path of the slave device belonging to master `fd`
    fn slave_path(&self, fd: RawFd) -> Result<CString, Errno>;

    /// Open the slave device read/write without making it the controlling tty
    fn open_slave(&self, path: &CStr) -> Result<RawFd, Errno> {
        open(
            path,
            OFlag::O_RDWR | OFlag::O_NOCTTY | OFlag::O_CLOEXEC,
            Mode::empty(),
        )
    }

    /// Push STREAMS modules onto the slave where the platform needs them
    fn attach_line_discipline(&self, _fd: RawFd) -> Result<(), Errno> {
        Ok(())
    }

    /// Fork the calling process
    ///
    /// # Safety
    /// In a multi-threaded parent the child may only call async-signal-safe
    /// functions until it execs. Callers must handle [`ForkOutcome::Child`]
    /// by exec'ing or calling `_exit`.
    unsafe fn fork(&self) -> Result<ForkOutcome, Errno> {
        match unistd::fork()? {
            ForkResult::Parent { child } => Ok(ForkOutcome::Parent(child)),
            ForkResult::Child => Ok(ForkOutcome::Child),
        }
    }

    /// Start a new session in the calling (child) process
    fn new_session(&self) -> Result<(), Errno> {
        setsid().map(drop)
    }

    /// Make `fd` the controlling terminal of the calling session leader
    fn set_controlling_terminal(&self, fd: RawFd) -> Result<(), Errno>;

    fn apply_terminal_modes(&self, fd: RawFd, modes: &TerminalModes) -> Result<(), Errno> {
        // SAFETY: the caller keeps `fd` open for the duration of the call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut current = termios::tcgetattr(borrowed)?;
        modes.apply_to(&mut current);
        termios::tcsetattr(borrowed, SetArg::TCSANOW, &current)
    }

    fn apply_window_size(&self, fd: RawFd, size: WindowSize) -> Result<(), Errno>;

    fn get_window_size(&self, fd: RawFd) -> Result<WindowSize, Errno>;

    /// Make `fd` the calling process's stdin, stdout and stderr
    fn duplicate_onto_standard_streams(&self, fd: RawFd) -> Result<(), Errno> {
        dup2(fd, libc::STDIN_FILENO)?;
        dup2(fd, libc::STDOUT_FILENO)?;
        dup2(fd, libc::STDERR_FILENO)?;
        Ok(())
    }

    /// Replace the process image; only returns on failure
    fn replace_process_image(&self, image: &ExecImage) -> Errno {
        // SAFETY: both pointer arrays are null-terminated and point into
        // CStrings owned by `image`
        unsafe {
            match &image.env_ptrs {
                Some(envp) => {
                    libc::execve(image.command.as_ptr(), image.argv_ptrs.as_ptr(), envp.as_ptr())
                },
                None => libc::execv(image.command.as_ptr(), image.argv_ptrs.as_ptr()),
            };
        }
        Errno::last()
    }

    fn wait_for(&self, pid: Pid, options: Option<WaitPidFlag>) -> Result<WaitStatus, Errno> {
        waitpid(pid, options)
    }

    fn signal(&self, pid: Pid, sig: i32) -> Result<(), Errno> {
        kill(pid, Signal::try_from(sig)?)
    }

    fn close(&self, fd: RawFd) -> Result<(), Errno> {
        unistd::close(fd)
    }

    fn read(&self, fd: RawFd, buf: &mut [u8]) -> Result<usize, Errno> {
        unistd::read(fd, buf)
    }

    fn write(&self, fd: RawFd, buf: &[u8]) -> Result<usize, Errno> {
        // SAFETY: the caller keeps `fd` open for the duration of the call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        unistd::write(borrowed, buf)
    }

    /// Wait up to `timeout_ms` for any of `events` (or a hang-up) on `fd`
    ///
    /// Returns false if the timeout expired.
    fn poll(&self, fd: RawFd, events: PollFlags, timeout_ms: u16) -> Result<bool, Errno> {
        // SAFETY: the caller keeps `fd` open for the duration of the call
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        let mut fds = [PollFd::new(borrowed, events)];
        let n = poll(&mut fds, timeout_ms)?;
        Ok(n > 0 && fds[0].revents().is_some_and(|r| !r.is_empty()))
    }

    /// Number of bytes waiting to be read from `fd`
    fn available(&self, fd: RawFd) -> Result<usize, Errno> {
        let mut pending: libc::c_int = 0;
        // SAFETY: FIONREAD writes a single c_int
        Errno::result(unsafe { libc::ioctl(fd, libc::FIONREAD as _, &mut pending) })?;
        Ok(pending.max(0) as usize)
    }

    /// Block until everything written to `fd` has been transmitted
    fn drain(&self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: the caller keeps `fd` open for the duration of the call
        termios::tcdrain(unsafe { BorrowedFd::borrow_raw(fd) })
    }

    fn set_nonblocking(&self, fd: RawFd, nonblocking: bool) -> Result<(), Errno> {
        let flags = OFlag::from_bits_truncate(fcntl(fd, FcntlArg::F_GETFL)?);
        let new_flags = if nonblocking {
            flags | OFlag::O_NONBLOCK
        } else {
            flags & !OFlag::O_NONBLOCK
        };
        fcntl(fd, FcntlArg::F_SETFL(new_flags)).map(drop)
    }
}

/// TIOCSWINSZ-style ioctl shared by the platform backends
pub(crate) fn ioctl_set_winsize(
    fd: RawFd,
    request: libc::c_ulong,
    size: WindowSize,
) -> Result<(), Errno> {
    let ws: libc::winsize = size.into();
    // SAFETY: the request takes a pointer to a winsize
    Errno::result(unsafe { libc::ioctl(fd, request as _, &ws) }).map(drop)
}

/// TIOCGWINSZ-style ioctl shared by the platform backends
pub(crate) fn ioctl_get_winsize(fd: RawFd, request: libc::c_ulong) -> Result<WindowSize, Errno> {
    let mut ws = libc::winsize {
        ws_row: 0,
        ws_col: 0,
        ws_xpixel: 0,
        ws_ypixel: 0,
    };
    // SAFETY: the request fills in a winsize
    Errno::result(unsafe { libc::ioctl(fd, request as _, &mut ws) })?;
    Ok(WindowSize::from(ws))
}

/// The backend for the host OS, chosen once per process
pub fn native() -> Arc<dyn Backend> {
    static NATIVE: OnceLock<Arc<dyn Backend>> = OnceLock::new();
    NATIVE
        .get_or_init(|| Arc::new(super::platform::Native))
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cstrings(items: &[&str]) -> Vec<CString> {
        items.iter().map(|s| CString::new(*s).unwrap()).collect()
    }

    #[test]
    fn test_exec_image_pointer_arrays() {
        let image = ExecImage::new(
            CString::new("/bin/echo").unwrap(),
            cstrings(&["/bin/echo", "hello"]),
            Some(cstrings(&["A=1"])),
        );
        assert_eq!(image.argv_ptrs.len(), 3);
        assert!(image.argv_ptrs[2].is_null());
        assert_eq!(image.argv_ptrs[1], image.argv()[1].as_ptr());

        let envp = image.env_ptrs.as_ref().unwrap();
        assert_eq!(envp.len(), 2);
        assert!(envp[1].is_null());
    }

    #[test]
    fn test_exec_image_inherits_env_by_default() {
        let image = ExecImage::new(
            CString::new("/bin/true").unwrap(),
            cstrings(&["/bin/true"]),
            None,
        );
        assert!(image.env().is_none());
        assert!(image.env_ptrs.is_none());
    }

    #[test]
    fn test_native_is_shared() {
        let a = native();
        let b = native();
        assert!(Arc::ptr_eq(&a, &b));
        #[cfg(target_os = "linux")]
        assert_eq!(a.kind(), BackendKind::Linux);
    }

    #[test]
    fn test_native_master_and_slave() {
        let backend = native();
        let master = backend.allocate_master().expect("allocate master");
        backend.grant_access(master).expect("grant");
        backend.unlock(master).expect("unlock");
        let path = backend.slave_path(master).expect("slave path");
        assert!(!path.as_bytes().is_empty());

        let slave = backend.open_slave(&path).expect("open slave");
        backend
            .apply_window_size(slave, WindowSize::new(100, 30))
            .expect("set size");
        assert_eq!(
            backend.get_window_size(master).expect("get size"),
            WindowSize::new(100, 30)
        );

        backend.close(slave).unwrap();
        backend.close(master).unwrap();
    }

    #[test]
    fn test_native_poll_and_io() {
        let backend = native();
        let master = backend.allocate_master().expect("allocate master");
        backend.grant_access(master).expect("grant");
        backend.unlock(master).expect("unlock");
        let slave = backend
            .open_slave(&backend.slave_path(master).expect("slave path"))
            .expect("open slave");
        backend
            .apply_terminal_modes(slave, &TerminalModes::raw())
            .expect("raw modes");

        // Nothing written yet: the wait times out.
        assert!(!backend.poll(master, PollFlags::POLLIN, 10).unwrap());
        assert!(backend.poll(master, PollFlags::POLLOUT, 10).unwrap());

        assert_eq!(backend.write(slave, b"ping").unwrap(), 4);
        assert!(backend.poll(master, PollFlags::POLLIN, 1000).unwrap());
        let mut buf = [0u8; 16];
        let n = backend.read(master, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");

        backend.close(slave).unwrap();
        backend.close(master).unwrap();
    }
}
