//! Signal numbers and wait options of the host ABI

use nix::libc;

pub const SIGHUP: i32 = libc::SIGHUP;
pub const SIGINT: i32 = libc::SIGINT;
pub const SIGQUIT: i32 = libc::SIGQUIT;
pub const SIGILL: i32 = libc::SIGILL;
pub const SIGABRT: i32 = libc::SIGABRT;
pub const SIGFPE: i32 = libc::SIGFPE;
pub const SIGKILL: i32 = libc::SIGKILL;
pub const SIGSEGV: i32 = libc::SIGSEGV;
pub const SIGPIPE: i32 = libc::SIGPIPE;
pub const SIGALRM: i32 = libc::SIGALRM;
pub const SIGTERM: i32 = libc::SIGTERM;

/// Return immediately if no child has changed state
pub const WNOHANG: i32 = libc::WNOHANG;
/// Also report stopped children
pub const WUNTRACED: i32 = libc::WUNTRACED;
