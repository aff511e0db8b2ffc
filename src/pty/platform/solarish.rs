//! Solaris and illumos backend
//!
//! The slave is a bare STREAMS device until the terminal emulation modules
//! are pushed onto it, and the tty ioctls use the SVR4 `'T'` numbering.

use std::ffi::{CStr, CString};
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::libc;

use super::locked_ptsname;
use crate::pty::backend::{ioctl_get_winsize, ioctl_set_winsize, Backend, BackendKind};
use crate::pty::WindowSize;

const TIOC: libc::c_int = (b'T' as libc::c_int) << 8;
const TIOCGWINSZ: libc::c_int = TIOC | 104;
const TIOCSWINSZ: libc::c_int = TIOC | 103;
const TIOCSCTTY: libc::c_int = TIOC | 132;

const STR: libc::c_int = (b'S' as libc::c_int) << 8;
const I_PUSH: libc::c_int = STR | 0o2;

/// Modules pushed onto every slave, in order
const LINE_DISCIPLINE: [&CStr; 3] = [c"ptem", c"ldterm", c"ttcompat"];

#[derive(Debug, Default, Clone, Copy)]
pub struct Solarish;

impl Backend for Solarish {
    fn kind(&self) -> BackendKind {
        BackendKind::Solarish
    }

    fn slave_path(&self, fd: RawFd) -> Result<CString, Errno> {
        locked_ptsname(fd)
    }

    fn attach_line_discipline(&self, fd: RawFd) -> Result<(), Errno> {
        for module in LINE_DISCIPLINE {
            // SAFETY: I_PUSH takes a NUL-terminated module name
            Errno::result(unsafe { libc::ioctl(fd, I_PUSH as _, module.as_ptr()) })?;
        }
        Ok(())
    }

    fn set_controlling_terminal(&self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: TIOCSCTTY takes no argument
        Errno::result(unsafe { libc::ioctl(fd, TIOCSCTTY as _, 0) }).map(drop)
    }

    fn apply_window_size(&self, fd: RawFd, size: WindowSize) -> Result<(), Errno> {
        ioctl_set_winsize(fd, TIOCSWINSZ as _, size)
    }

    fn get_window_size(&self, fd: RawFd) -> Result<WindowSize, Errno> {
        ioctl_get_winsize(fd, TIOCGWINSZ as _)
    }
}
