//! ptykit: run interactive programs on a pseudoterminal
//!
//! The crate opens a PTY master/slave pair, forks a child onto the slave
//! side as its controlling terminal, and hands back a [`PtyHandle`] that owns
//! the master descriptor and the child's pid. The handle provides blocking
//! byte streams, window size control, liveness checks and an idempotent,
//! thread-safe close.
//!
//! - `pty`: allocation protocol, handle, stream adapters, platform backends
//! - `config`: file/env/CLI configuration for the `ptykit-run` binary
//! - `consts`: host signal numbers and wait options
//!
//! ```no_run
//! use std::io::Read;
//!
//! let handle = ptykit::exec_in_pty("/bin/echo", Some(&["/bin/echo", "hello"]))?;
//! let mut output = Vec::new();
//! handle.input_stream()?.read_to_end(&mut output)?;
//! assert_eq!(handle.wait_for()?.code(), 0);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

#![cfg(unix)]

pub mod config;
pub mod consts;
pub mod pty;

pub use pty::{
    exec_in_pty, last_error_code, ExitStatus, Liveness, PtyCommand, PtyError, PtyHandle,
    PtyResult, TerminalModes, WindowSize,
};
