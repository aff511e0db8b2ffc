//! Per-OS backends
//!
//! Exactly one of these modules is compiled in and exported as `Native`.
//! They differ only in ioctl constants, slave name lookup, and which
//! allocation steps are no-ops.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod linux;
#[cfg(any(target_os = "linux", target_os = "android"))]
pub use linux::Linux as Native;

#[cfg(any(target_os = "macos", target_os = "ios"))]
mod apple;
#[cfg(any(target_os = "macos", target_os = "ios"))]
pub use apple::Apple as Native;

#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
))]
mod bsd;
#[cfg(any(
    target_os = "freebsd",
    target_os = "dragonfly",
    target_os = "openbsd",
    target_os = "netbsd"
))]
pub use bsd::Bsd as Native;

#[cfg(any(target_os = "solaris", target_os = "illumos"))]
mod solarish;
#[cfg(any(target_os = "solaris", target_os = "illumos"))]
pub use solarish::Solarish as Native;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
use std::ffi::{CStr, CString};
#[cfg(not(any(target_os = "linux", target_os = "android")))]
use std::os::fd::RawFd;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
use std::sync::Mutex;

#[cfg(not(any(target_os = "linux", target_os = "android")))]
use nix::errno::Errno;
#[cfg(not(any(target_os = "linux", target_os = "android")))]
use nix::libc;

/// ptsname(3) behind a process-wide lock, for platforms without ptsname_r
#[cfg(not(any(target_os = "linux", target_os = "android")))]
pub(crate) fn locked_ptsname(fd: RawFd) -> Result<CString, Errno> {
    static PTSNAME_LOCK: Mutex<()> = Mutex::new(());

    let _guard = PTSNAME_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    // SAFETY: the static buffer returned by ptsname is copied out while the
    // lock is held
    let name = unsafe { libc::ptsname(fd) };
    if name.is_null() {
        return Err(Errno::last());
    }
    let name = unsafe { CStr::from_ptr(name) };
    if name.to_bytes().is_empty() {
        return Err(Errno::ENOTTY);
    }
    Ok(name.to_owned())
}
