//! Linux and Android backend
//!
//! Uses /dev/ptmx through posix_openpt(3). grantpt is a no-op on modern glibc
//! but is still called; unlockpt is required before the slave can be opened.

use std::ffi::CString;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::libc;

use crate::pty::backend::{ioctl_get_winsize, ioctl_set_winsize, Backend, BackendKind};
use crate::pty::WindowSize;

/// Longest slave path ptsname_r may produce ("/dev/pts/NNNN...")
const SLAVE_NAME_MAX: usize = 128;

#[derive(Debug, Default, Clone, Copy)]
pub struct Linux;

impl Backend for Linux {
    fn kind(&self) -> BackendKind {
        BackendKind::Linux
    }

    fn slave_path(&self, fd: RawFd) -> Result<CString, Errno> {
        let mut buf = [0 as libc::c_char; SLAVE_NAME_MAX];
        // SAFETY: buf is writable for its whole length
        let rc = unsafe { libc::ptsname_r(fd, buf.as_mut_ptr(), buf.len()) };
        if rc != 0 {
            return Err(Errno::from_raw(rc));
        }
        let len = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
        if len == 0 {
            return Err(Errno::ENOTTY);
        }
        let bytes = buf[..len].iter().map(|&c| c as u8).collect::<Vec<u8>>();
        CString::new(bytes).map_err(|_| Errno::EINVAL)
    }

    fn set_controlling_terminal(&self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: TIOCSCTTY takes an int argument
        Errno::result(unsafe { libc::ioctl(fd, libc::TIOCSCTTY as _, 0) }).map(drop)
    }

    fn apply_window_size(&self, fd: RawFd, size: WindowSize) -> Result<(), Errno> {
        ioctl_set_winsize(fd, libc::TIOCSWINSZ as _, size)
    }

    fn get_window_size(&self, fd: RawFd) -> Result<WindowSize, Errno> {
        ioctl_get_winsize(fd, libc::TIOCGWINSZ as _)
    }
}
