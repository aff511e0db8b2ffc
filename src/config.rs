//! Configuration for `ptykit-run`
//!
//! Precedence, highest first: command line, environment, config file,
//! defaults. The file lives at `<config dir>/ptykit/config.toml` unless a
//! path is given explicitly.
//!
//! ```toml
//! command = "/bin/bash"
//! args = ["-l"]
//! inherit_env = true
//! modes = "sane"
//!
//! [env]
//! TERM = "xterm-256color"
//!
//! [window]
//! rows = 40
//! cols = 120
//! ```

use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, warn};

use crate::pty::{PtyCommand, TerminalModes, WindowSize};

/// Overrides the configured command
pub const COMMAND_ENV: &str = "PTYKIT_COMMAND";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config error in '{field}': {message}")]
    Invalid { field: &'static str, message: String },
}

/// Terminal mode preset for the child
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModePreset {
    #[default]
    Sane,
    Raw,
}

impl ModePreset {
    pub fn modes(self) -> TerminalModes {
        match self {
            ModePreset::Sane => TerminalModes::sane(),
            ModePreset::Raw => TerminalModes::raw(),
        }
    }
}

/// Values given on the command line; `None` leaves the configured value
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub command: Option<String>,
    pub args: Vec<String>,
    pub rows: Option<u16>,
    pub cols: Option<u16>,
    pub raw: bool,
    pub env: Vec<(String, String)>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Program to run; the user's shell when unset
    pub command: Option<String>,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub inherit_env: bool,
    /// Initial size; the host terminal's size when unset
    pub window: Option<WindowSize>,
    pub modes: ModePreset,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            env: BTreeMap::new(),
            inherit_env: true,
            window: None,
            modes: ModePreset::Sane,
        }
    }
}

impl RunConfig {
    /// Load with full precedence and validate the result
    ///
    /// A missing file at the default location is not an error; an explicit
    /// `path` that cannot be read is.
    pub fn load(path: Option<&Path>, overrides: &Overrides) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::load_from_file(path)?,
            None => match Self::default_config_path() {
                Some(path) if path.exists() => Self::load_from_file(&path)?,
                _ => Self::default(),
            },
        };

        config.apply_env_vars();
        config.apply_overrides(overrides);
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config");
        Ok(config)
    }

    pub fn default_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("ptykit").join("config.toml"))
    }

    fn apply_env_vars(&mut self) {
        if let Ok(command) = env::var(COMMAND_ENV) {
            if command.is_empty() {
                warn!("{} is set but empty, ignoring", COMMAND_ENV);
            } else {
                self.command = Some(command);
            }
        }
    }

    fn apply_overrides(&mut self, overrides: &Overrides) {
        if let Some(command) = &overrides.command {
            self.command = Some(command.clone());
            self.args = overrides.args.clone();
        }
        if overrides.rows.is_some() || overrides.cols.is_some() {
            let current = self.window.unwrap_or_default();
            self.window = Some(WindowSize::new(
                overrides.cols.unwrap_or(current.cols),
                overrides.rows.unwrap_or(current.rows),
            ));
        }
        if overrides.raw {
            self.modes = ModePreset::Raw;
        }
        for (key, value) in &overrides.env {
            self.env.insert(key.clone(), value.clone());
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(command) = &self.command {
            if command.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field: "command",
                    message: "command must not be empty".to_string(),
                });
            }
        }
        if let Some(window) = self.window {
            if window.rows == 0 || window.cols == 0 {
                return Err(ConfigError::Invalid {
                    field: "window",
                    message: format!(
                        "window must be at least 1x1, got {}x{}",
                        window.cols, window.rows
                    ),
                });
            }
        }
        for key in self.env.keys() {
            if key.is_empty() || key.contains('=') {
                return Err(ConfigError::Invalid {
                    field: "env",
                    message: format!("invalid variable name '{}'", key),
                });
            }
        }
        Ok(())
    }

    /// The program to run: the configured command, else `$SHELL`, else `/bin/sh`
    pub fn program(&self) -> String {
        self.command
            .clone()
            .or_else(|| env::var("SHELL").ok().filter(|s| !s.is_empty()))
            .unwrap_or_else(|| "/bin/sh".to_string())
    }

    /// Build the command this configuration describes
    pub fn to_command(&self) -> PtyCommand {
        let program = self.program();
        let mut command = PtyCommand::new(&program);
        command.argv(std::iter::once(&program).chain(&self.args));
        if !self.inherit_env {
            command.env_clear();
        }
        for (key, value) in &self.env {
            command.env(key, value);
        }
        command.terminal_modes(self.modes.modes());
        if let Some(window) = self.window {
            command.window_size(window);
        }
        command
    }
}

#[cfg(test)]
mod tests {
    use std::ffi::OsString;
    use std::io::Write;

    use super::*;

    fn write_config(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = RunConfig::default();
        assert!(config.inherit_env);
        assert_eq!(config.modes, ModePreset::Sane);
        assert!(config.window.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let file = write_config(
            r#"
command = "/bin/bash"
args = ["-l"]
inherit_env = false
modes = "raw"

[env]
TERM = "xterm-256color"

[window]
rows = 40
cols = 120
"#,
        );
        let config = RunConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.command.as_deref(), Some("/bin/bash"));
        assert_eq!(config.args, vec!["-l"]);
        assert!(!config.inherit_env);
        assert_eq!(config.modes, ModePreset::Raw);
        assert_eq!(config.env.get("TERM").map(String::as_str), Some("xterm-256color"));
        assert_eq!(config.window, Some(WindowSize::new(120, 40)));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let file = write_config("command = \"/bin/zsh\"\n");
        let config = RunConfig::load_from_file(file.path()).unwrap();
        assert!(config.inherit_env);
        assert!(config.args.is_empty());
        assert_eq!(config.modes, ModePreset::Sane);
    }

    #[test]
    fn test_parse_error_names_file() {
        let file = write_config("command = [");
        let err = RunConfig::load_from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn test_unknown_mode_rejected() {
        let file = write_config("modes = \"cooked\"\n");
        assert!(RunConfig::load_from_file(file.path()).is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = RunConfig::load(Some(dir.path().join("nope.toml").as_path()), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_overrides_win() {
        let file = write_config(
            r#"
command = "/bin/bash"
args = ["-l"]

[window]
rows = 40
cols = 120
"#,
        );
        let overrides = Overrides {
            command: Some("/bin/echo".into()),
            args: vec!["hi".into()],
            rows: Some(10),
            cols: None,
            raw: true,
            env: vec![("A".into(), "1".into())],
        };
        let config = RunConfig::load(Some(file.path()), &overrides).unwrap();
        assert_eq!(config.command.as_deref(), Some("/bin/echo"));
        assert_eq!(config.args, vec!["hi"]);
        assert_eq!(config.window, Some(WindowSize::new(120, 10)));
        assert_eq!(config.modes, ModePreset::Raw);
        assert_eq!(config.env.get("A").map(String::as_str), Some("1"));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let config = RunConfig {
            command: Some("  ".into()),
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "command", .. })
        ));

        let config = RunConfig {
            window: Some(WindowSize::new(0, 24)),
            ..RunConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "window", .. })
        ));

        let mut config = RunConfig::default();
        config.env.insert("A=B".into(), "x".into());
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "env", .. })
        ));
    }

    #[test]
    fn test_to_command() {
        let config = RunConfig {
            command: Some("/bin/echo".into()),
            args: vec!["hello".into()],
            ..RunConfig::default()
        };
        let command = config.to_command();
        assert_eq!(command.get_program(), "/bin/echo");
        assert_eq!(
            command.get_argv(),
            vec![OsString::from("/bin/echo"), OsString::from("hello")]
        );
    }
}
