//! Byte stream adapters over the master descriptor
//!
//! Neither adapter owns the descriptor. They reach it through the handle's
//! shared state, check that it is still open on every call, and close the
//! handle when the descriptor fails underneath them.
//!
//! A thread parked inside read(2) or write(2) does not notice the descriptor
//! being closed by another thread, so both adapters wait for readiness in
//! bounded [`poll`](nix::poll::poll) rounds and re-check the handle between
//! them. Closing the handle therefore ends a blocked call within
//! [`POLL_INTERVAL_MS`], whether or not the child is still running.

use std::io::{self, Read, Write};
use std::os::fd::RawFd;
use std::sync::{Arc, Weak};

use nix::errno::Errno;
use nix::poll::PollFlags;

use super::handle::Shared;
use super::{record, PtyError, PtyResult, StreamOp};

/// Largest slice handed to a single backend write
pub const WRITE_CHUNK: usize = 2048;

/// Longest single readiness wait
pub const POLL_INTERVAL_MS: u16 = 100;

fn open(shared: &Weak<Shared>) -> PtyResult<(Arc<Shared>, RawFd)> {
    let shared = shared.upgrade().ok_or(PtyError::Closed)?;
    let fd = shared.master_fd().ok_or(PtyError::Closed)?;
    Ok((shared, fd))
}

/// Wait until the descriptor is ready for `events`
fn wait_ready(
    weak: &Weak<Shared>,
    events: PollFlags,
    op: StreamOp,
) -> io::Result<(Arc<Shared>, RawFd)> {
    loop {
        let (shared, fd) = open(weak)?;
        match shared.backend().poll(fd, events, POLL_INTERVAL_MS) {
            Ok(true) => return Ok((shared, fd)),
            Ok(false) | Err(Errno::EINTR) => {},
            Err(e) => return Err(fault(&shared, op, e)),
        }
    }
}

fn fault(shared: &Shared, op: StreamOp, errno: Errno) -> io::Error {
    shared.force_close();
    PtyError::Stream {
        op,
        source: record(errno),
    }
    .into()
}

/// Reads what the child writes to its terminal
pub struct PtyInput {
    shared: Weak<Shared>,
}

impl PtyInput {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    /// Bytes ready to be read without blocking
    ///
    /// A failed query closes the handle and reports end of stream.
    pub fn available(&self) -> io::Result<usize> {
        let (shared, fd) = open(&self.shared)?;
        shared.backend().available(fd).map_err(|e| {
            shared.force_close();
            io::Error::new(io::ErrorKind::UnexpectedEof, PtyError::Stream {
                op: StreamOp::Read,
                source: record(e),
            })
        })
    }

    /// Close the owning handle (and kill the child)
    pub fn close(&self) -> PtyResult<()> {
        let (shared, _) = open(&self.shared)?;
        shared.close(true)
    }
}

impl Read for &PtyInput {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if buf.is_empty() {
            open(&self.shared)?;
            return Ok(0);
        }
        let (shared, fd) = wait_ready(&self.shared, PollFlags::POLLIN, StreamOp::Read)?;
        match shared.backend().read(fd, buf) {
            Ok(n) => Ok(n),
            // Closed between the wait and the read
            Err(_) if shared.master_fd().is_none() => Err(PtyError::Closed.into()),
            // Linux reports a hung-up slave as EIO rather than EOF.
            Err(Errno::EIO) => Ok(0),
            Err(Errno::EINTR) => Err(io::ErrorKind::Interrupted.into()),
            Err(Errno::EAGAIN) => Err(io::ErrorKind::WouldBlock.into()),
            Err(e) => Err(fault(&shared, StreamOp::Read, e)),
        }
    }
}

impl std::fmt::Debug for PtyInput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyInput").finish_non_exhaustive()
    }
}

/// Writes to the child's terminal
pub struct PtyOutput {
    shared: Weak<Shared>,
}

impl PtyOutput {
    pub(crate) fn new(shared: Weak<Shared>) -> Self {
        Self { shared }
    }

    /// Close the owning handle (and kill the child)
    pub fn close(&self) -> PtyResult<()> {
        let (shared, _) = open(&self.shared)?;
        shared.close(true)
    }
}

impl Write for &PtyOutput {
    /// Sends all of `buf`, however many backend calls that takes
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        open(&self.shared)?;
        let mut sent = 0;
        while sent < buf.len() {
            let (shared, fd) = wait_ready(&self.shared, PollFlags::POLLOUT, StreamOp::Write)?;
            let end = buf.len().min(sent + WRITE_CHUNK);
            match shared.backend().write(fd, &buf[sent..end]) {
                Ok(0) => return Err(fault(&shared, StreamOp::Write, Errno::EIO)),
                Ok(n) => sent += n,
                Err(_) if shared.master_fd().is_none() => return Err(PtyError::Closed.into()),
                Err(Errno::EINTR | Errno::EAGAIN) => {},
                Err(e) => return Err(fault(&shared, StreamOp::Write, e)),
            }
        }
        Ok(sent)
    }

    /// Waits until the slave side has taken everything written so far
    fn flush(&mut self) -> io::Result<()> {
        let (shared, fd) = open(&self.shared)?;
        shared
            .backend()
            .drain(fd)
            .map_err(|e| fault(&shared, StreamOp::Flush, e))
    }
}

impl std::fmt::Debug for PtyOutput {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PtyOutput").finish_non_exhaustive()
    }
}
