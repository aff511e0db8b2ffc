//! macOS and iOS backend

use std::ffi::CString;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::libc;

use super::locked_ptsname;
use crate::pty::backend::{ioctl_get_winsize, ioctl_set_winsize, Backend, BackendKind};
use crate::pty::WindowSize;

/// _IO('t', 97); the libc crate exports TIOCSCTTY only for the BSDs, not Apple targets
const TIOCSCTTY: libc::c_ulong = 0x2000_7461;

#[derive(Debug, Default, Clone, Copy)]
pub struct Apple;

impl Backend for Apple {
    fn kind(&self) -> BackendKind {
        BackendKind::Apple
    }

    fn slave_path(&self, fd: RawFd) -> Result<CString, Errno> {
        locked_ptsname(fd)
    }

    fn set_controlling_terminal(&self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: TIOCSCTTY takes no argument on Darwin
        Errno::result(unsafe { libc::ioctl(fd, TIOCSCTTY as _, 0) }).map(drop)
    }

    fn apply_window_size(&self, fd: RawFd, size: WindowSize) -> Result<(), Errno> {
        ioctl_set_winsize(fd, libc::TIOCSWINSZ as _, size)
    }

    fn get_window_size(&self, fd: RawFd) -> Result<WindowSize, Errno> {
        ioctl_get_winsize(fd, libc::TIOCGWINSZ as _)
    }
}
