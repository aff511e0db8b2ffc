//! The PTY allocation protocol
//!
//! Opens a master/slave pair, forks, and sets the child up on the slave.
//! Every failure before the fork releases exactly the descriptors opened so
//! far, slave before master.

use std::os::fd::RawFd;
use std::sync::Arc;

use nix::errno::Errno;
use nix::libc;
use tracing::{debug, trace, warn};

use super::backend::{Backend, ExecImage, ForkOutcome};
use super::handle::PtyHandle;
use super::modes::TerminalModes;
use super::{record, PtyError, PtyResult, WindowSize};

/// Child exit code when terminal setup fails before exec
pub const CHILD_SETUP_FAILED: i32 = 1;
/// Child exit code when exec itself fails
pub const CHILD_EXEC_FAILED: i32 = 127;

/// Run `image` on a fresh PTY
///
/// `modes` of `None` uses the backend's defaults; `size` of `None` leaves the
/// slave's window size alone.
pub fn allocate(
    backend: Arc<dyn Backend>,
    image: &ExecImage,
    modes: Option<&TerminalModes>,
    size: Option<WindowSize>,
) -> PtyResult<PtyHandle> {
    let master = backend
        .allocate_master()
        .map_err(|e| PtyError::OpenMaster(record(e)))?;
    trace!(master, "Allocated PTY master");

    let slave = match open_slave_side(backend.as_ref(), master) {
        Ok(slave) => slave,
        Err(err) => {
            release(backend.as_ref(), &[master]);
            return Err(err);
        },
    };

    if let Err(e) = backend.attach_line_discipline(slave) {
        let err = PtyError::LineDiscipline(record(e));
        release(backend.as_ref(), &[slave, master]);
        return Err(err);
    }

    let default_modes;
    let modes = match modes {
        Some(modes) => modes,
        None => {
            default_modes = backend.default_modes();
            &default_modes
        },
    };

    // SAFETY: the child arm goes straight into `run_child`, which never
    // returns and only makes async-signal-safe calls.
    match unsafe { backend.fork() } {
        Err(e) => {
            let err = PtyError::Fork(record(e));
            release(backend.as_ref(), &[slave, master]);
            Err(err)
        },
        Ok(ForkOutcome::Child) => run_child(backend.as_ref(), master, slave, image, modes, size),
        Ok(ForkOutcome::Parent(pid)) => {
            if let Err(e) = backend.close(slave) {
                warn!(slave, error = %record(e), "Failed to close PTY slave in parent");
            }
            debug!(
                master,
                pid = pid.as_raw(),
                command = ?image.command(),
                "Spawned child on PTY"
            );
            Ok(PtyHandle::from_parts(backend, master, pid))
        },
    }
}

/// Grant, unlock, resolve and open the slave belonging to `master`
fn open_slave_side(backend: &dyn Backend, master: RawFd) -> PtyResult<RawFd> {
    backend
        .grant_access(master)
        .map_err(|e| PtyError::GrantPty(record(e)))?;
    backend
        .unlock(master)
        .map_err(|e| PtyError::UnlockPty(record(e)))?;

    let path = backend
        .slave_path(master)
        .map_err(|e| PtyError::SlaveName(record(e)))?;
    if path.as_bytes().is_empty() {
        return Err(PtyError::SlaveName(record(Errno::ENOTTY)));
    }

    let slave = backend
        .open_slave(&path)
        .map_err(|e| PtyError::OpenSlave(record(e)))?;
    trace!(slave, path = ?path, "Opened PTY slave");
    Ok(slave)
}

fn release(backend: &dyn Backend, fds: &[RawFd]) {
    for &fd in fds {
        if let Err(e) = backend.close(fd) {
            trace!(fd, error = %e, "Failed to release descriptor after allocation failure");
        }
    }
}

/// The forked child's whole life: set up the slave as its terminal, exec
fn run_child(
    backend: &dyn Backend,
    master: RawFd,
    slave: RawFd,
    image: &ExecImage,
    modes: &TerminalModes,
    size: Option<WindowSize>,
) -> ! {
    if prepare_child(backend, master, slave, modes, size).is_err() {
        // SAFETY: _exit skips atexit handlers and destructors owned by the parent
        unsafe { libc::_exit(CHILD_SETUP_FAILED) }
    }
    let _ = backend.replace_process_image(image);
    // SAFETY: as above
    unsafe { libc::_exit(CHILD_EXEC_FAILED) }
}

fn prepare_child(
    backend: &dyn Backend,
    master: RawFd,
    slave: RawFd,
    modes: &TerminalModes,
    size: Option<WindowSize>,
) -> Result<(), Errno> {
    backend.new_session()?;
    // Not fatal: the child still gets a working terminal on 0/1/2.
    let _ = backend.set_controlling_terminal(slave);
    backend.apply_terminal_modes(slave, modes)?;
    if let Some(size) = size {
        backend.apply_window_size(slave, size)?;
    }
    backend.duplicate_onto_standard_streams(slave)?;
    let _ = backend.close(master);
    if slave > libc::STDERR_FILENO {
        let _ = backend.close(slave);
    }
    Ok(())
}
