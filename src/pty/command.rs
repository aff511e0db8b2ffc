//! Running a command on a new PTY
//!
//! [`PtyCommand`] collects what the child needs, validates it, turns it into
//! an [`ExecImage`] and drives the allocator. [`exec_in_pty`] is the short
//! form for the common case.

use std::collections::BTreeMap;
use std::env;
use std::ffi::{CString, OsStr, OsString};
use std::os::unix::ffi::{OsStrExt, OsStringExt};
use std::sync::Arc;

use super::allocator;
use super::backend::{native, Backend, ExecImage};
use super::modes::TerminalModes;
use super::{record, PtyError, PtyHandle, PtyResult, WindowSize};

/// Make sure `argv` starts with `command`
///
/// No argv gives `[command]`; an argv whose first element is something else
/// gets `command` prepended.
pub fn normalize_argv<S: AsRef<OsStr>>(command: &OsStr, argv: Option<&[S]>) -> Vec<OsString> {
    match argv {
        None => vec![command.to_os_string()],
        Some(argv) if argv.first().map(AsRef::as_ref) == Some(command) => {
            argv.iter().map(|a| a.as_ref().to_os_string()).collect()
        },
        Some(argv) => std::iter::once(command)
            .chain(argv.iter().map(AsRef::as_ref))
            .map(OsStr::to_os_string)
            .collect(),
    }
}

fn c_string(value: &OsStr, what: &str) -> PtyResult<CString> {
    CString::new(value.as_bytes())
        .map_err(|_| PtyError::InvalidArgument(format!("{} contains a NUL byte", what)))
}

/// Builder for a child process attached to a PTY
#[derive(Debug, Clone)]
pub struct PtyCommand {
    program: OsString,
    argv: Option<Vec<OsString>>,
    env: BTreeMap<OsString, OsString>,
    inherit_env: bool,
    modes: Option<TerminalModes>,
    size: Option<WindowSize>,
}

impl PtyCommand {
    /// `program` is passed to exec as given; it is not looked up on `PATH`
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            argv: None,
            env: BTreeMap::new(),
            inherit_env: true,
            modes: None,
            size: None,
        }
    }

    /// Full argument vector. Prefixed with the program unless it already
    /// starts with it.
    pub fn argv<I, S>(&mut self, argv: I) -> &mut Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.argv = Some(argv.into_iter().map(|a| a.as_ref().to_os_string()).collect());
        self
    }

    /// Append one argument after the program name
    pub fn arg(&mut self, arg: impl AsRef<OsStr>) -> &mut Self {
        self.argv
            .get_or_insert_with(Vec::new)
            .push(arg.as_ref().to_os_string());
        self
    }

    pub fn env(&mut self, key: impl AsRef<OsStr>, value: impl AsRef<OsStr>) -> &mut Self {
        self.env
            .insert(key.as_ref().to_os_string(), value.as_ref().to_os_string());
        self
    }

    /// Start the child with only the variables set through [`Self::env`]
    pub fn env_clear(&mut self) -> &mut Self {
        self.env.clear();
        self.inherit_env = false;
        self
    }

    /// Whether the child starts from this process's environment (default on)
    pub fn inherit_env(&mut self, inherit: bool) -> &mut Self {
        self.inherit_env = inherit;
        self
    }

    pub fn terminal_modes(&mut self, modes: TerminalModes) -> &mut Self {
        self.modes = Some(modes);
        self
    }

    pub fn window_size(&mut self, size: WindowSize) -> &mut Self {
        self.size = Some(size);
        self
    }

    pub fn get_program(&self) -> &OsStr {
        &self.program
    }

    /// The argument vector the child will see
    pub fn get_argv(&self) -> Vec<OsString> {
        normalize_argv(&self.program, self.argv.as_deref())
    }

    /// Spawn on the native backend
    pub fn spawn(&self) -> PtyResult<PtyHandle> {
        self.spawn_with(native())
    }

    pub fn spawn_with(&self, backend: Arc<dyn Backend>) -> PtyResult<PtyHandle> {
        let image = self.exec_image()?;
        let modes = self
            .modes
            .clone()
            .unwrap_or_else(|| backend.default_modes());

        let handle = allocator::allocate(backend.clone(), &image, Some(&modes), self.size)?;

        // The master may have inherited O_NONBLOCK; readers expect to block.
        if let Some(fd) = handle.master_fd() {
            if let Err(e) = backend.set_nonblocking(fd, false) {
                let _ = handle.close(true);
                return Err(PtyError::SetBlocking(record(e)));
            }
        }
        Ok(handle)
    }

    /// Validate everything and convert it to C strings
    fn exec_image(&self) -> PtyResult<ExecImage> {
        if self.program.is_empty() {
            return Err(PtyError::InvalidArgument("command is empty".into()));
        }
        let command = c_string(&self.program, "command")?;
        let argv = self
            .get_argv()
            .iter()
            .map(|arg| c_string(arg, "argument"))
            .collect::<PtyResult<Vec<_>>>()?;
        Ok(ExecImage::new(command, argv, self.environment()?))
    }

    /// `None` means inherit unchanged
    fn environment(&self) -> PtyResult<Option<Vec<CString>>> {
        for key in self.env.keys() {
            if key.is_empty() || key.as_bytes().contains(&b'=') {
                return Err(PtyError::InvalidArgument(format!(
                    "invalid environment variable name {:?}",
                    key
                )));
            }
        }
        if self.inherit_env && self.env.is_empty() {
            return Ok(None);
        }

        let mut merged = BTreeMap::new();
        if self.inherit_env {
            merged.extend(env::vars_os());
        }
        merged.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        merged
            .into_iter()
            .map(|(key, value)| {
                let mut entry = key.into_vec();
                entry.push(b'=');
                entry.extend(value.into_vec());
                c_string(OsStr::from_bytes(&entry), "environment variable")
            })
            .collect::<PtyResult<Vec<_>>>()
            .map(Some)
    }
}

/// Run `command` on a new PTY with inherited environment and default modes
pub fn exec_in_pty(command: impl AsRef<OsStr>, argv: Option<&[&str]>) -> PtyResult<PtyHandle> {
    let mut cmd = PtyCommand::new(command);
    if let Some(argv) = argv {
        cmd.argv(argv);
    }
    cmd.spawn()
}
