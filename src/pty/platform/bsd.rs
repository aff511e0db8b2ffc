//! FreeBSD, DragonFly, OpenBSD and NetBSD backend
//!
//! posix_openpt hands back a master whose slave is already owned by the
//! caller and unlocked, so grant and unlock are skipped.

use std::ffi::CString;
use std::os::fd::RawFd;

use nix::errno::Errno;
use nix::libc;

use super::locked_ptsname;
use crate::pty::backend::{ioctl_get_winsize, ioctl_set_winsize, Backend, BackendKind};
use crate::pty::WindowSize;

#[derive(Debug, Default, Clone, Copy)]
pub struct Bsd;

impl Backend for Bsd {
    fn kind(&self) -> BackendKind {
        BackendKind::Bsd
    }

    fn grant_access(&self, _fd: RawFd) -> Result<(), Errno> {
        Ok(())
    }

    fn unlock(&self, _fd: RawFd) -> Result<(), Errno> {
        Ok(())
    }

    fn slave_path(&self, fd: RawFd) -> Result<CString, Errno> {
        locked_ptsname(fd)
    }

    fn set_controlling_terminal(&self, fd: RawFd) -> Result<(), Errno> {
        // SAFETY: TIOCSCTTY takes no argument on the BSDs
        Errno::result(unsafe { libc::ioctl(fd, libc::TIOCSCTTY as _, 0) }).map(drop)
    }

    fn apply_window_size(&self, fd: RawFd, size: WindowSize) -> Result<(), Errno> {
        ioctl_set_winsize(fd, libc::TIOCSWINSZ as _, size)
    }

    fn get_window_size(&self, fd: RawFd) -> Result<WindowSize, Errno> {
        ioctl_get_winsize(fd, libc::TIOCGWINSZ as _)
    }
}
