//! ptykit-run - run a command on a new PTY and relay I/O
//!
//! The host terminal is put into raw mode so keystrokes reach the child
//! untouched; it is restored when the child exits.

use std::io::{self, IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::thread;

use clap::Parser;
use nix::libc;
use nix::sys::termios::{self, InputFlags, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use ptykit::config::{Overrides, RunConfig};
use ptykit::pty::{window_size_of, ControlChar, PtyHandle};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// CLI arguments for ptykit-run
#[derive(Parser, Debug)]
#[command(name = "ptykit-run")]
#[command(version)]
#[command(about = "Run a command on a new pseudoterminal and relay its I/O", long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Terminal rows (default: host terminal size)
    #[arg(long, value_name = "ROWS")]
    rows: Option<u16>,

    /// Terminal columns (default: host terminal size)
    #[arg(long, value_name = "COLS")]
    cols: Option<u16>,

    /// Start the child with raw terminal modes
    #[arg(long)]
    raw: bool,

    /// Extra environment variable for the child
    #[arg(short, long = "env", value_name = "KEY=VALUE", value_parser = parse_env)]
    env: Vec<(String, String)>,

    /// Command and arguments (default: configured command or $SHELL)
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "COMMAND")]
    command: Vec<String>,
}

fn parse_env(value: &str) -> Result<(String, String), String> {
    match value.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got '{}'", value)),
    }
}

impl Cli {
    fn overrides(&self) -> Overrides {
        let mut command = self.command.iter();
        Overrides {
            command: command.next().cloned(),
            args: command.cloned().collect(),
            rows: self.rows,
            cols: self.cols,
            raw: self.raw,
            env: self.env.clone(),
        }
    }
}

fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = match RunConfig::load(cli.config.as_deref(), &cli.overrides()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(2);
        },
    };

    let interactive = io::stdin().is_terminal();
    if config.window.is_none() && interactive {
        match window_size_of(libc::STDIN_FILENO) {
            Ok(size) if size.rows > 0 && size.cols > 0 => config.window = Some(size),
            Ok(_) => {},
            Err(e) => tracing::debug!("Could not read host terminal size: {}", e),
        }
    }

    let command = config.to_command();
    tracing::info!(
        "Starting {:?} ({})",
        command.get_argv(),
        config
            .window
            .map(|w| format!("{}x{}", w.cols, w.rows))
            .unwrap_or_else(|| "default size".into())
    );

    let handle = match command.spawn() {
        Ok(handle) => Arc::new(handle),
        Err(e) => {
            eprintln!("Failed to spawn PTY: {}", e);
            return ExitCode::FAILURE;
        },
    };
    tracing::debug!("PTY spawned, child PID: {:?}", handle.child_pid());

    let raw_guard = if interactive {
        match RawModeGuard::new() {
            Ok(guard) => Some(guard),
            Err(e) => {
                tracing::warn!("Failed to put host terminal into raw mode: {}", e);
                None
            },
        }
    } else {
        None
    };

    let eof_char = config.modes.modes().control_char(ControlChar::EndOfFile);
    let writer = Arc::clone(&handle);
    thread::spawn(move || forward_stdin(&writer, eof_char));

    if let Err(e) = relay_output(&handle) {
        tracing::debug!("Output relay ended: {}", e);
    }

    let status = handle.wait_for();
    drop(raw_guard);

    match status {
        Ok(status) => {
            tracing::debug!("Child finished: {}", status);
            ExitCode::from((status.code() & 0xff) as u8)
        },
        Err(e) => {
            eprintln!("Failed to wait for child: {}", e);
            ExitCode::FAILURE
        },
    }
}

/// Copy stdin to the PTY until stdin ends or the PTY goes away
fn forward_stdin(handle: &PtyHandle, eof_char: Option<u8>) {
    let Ok(mut output) = handle.output_stream() else {
        return;
    };
    let mut stdin = io::stdin();
    let mut buf = [0u8; 1024];

    loop {
        match stdin.read(&mut buf) {
            Ok(0) => {
                // Piped input ran out; let a canonical-mode child see EOF.
                if let Some(eof) = eof_char {
                    let _ = output.write_all(&[eof]);
                }
                break;
            },
            Ok(n) => {
                if output.write_all(&buf[..n]).is_err() {
                    break;
                }
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(_) => break,
        }
    }
}

/// Copy PTY output to stdout until EOF
fn relay_output(handle: &PtyHandle) -> io::Result<()> {
    let mut input = handle.input_stream()?;
    let mut stdout = io::stdout();
    let mut buf = [0u8; 4096];

    loop {
        match input.read(&mut buf) {
            Ok(0) => return Ok(()),
            Ok(n) => {
                stdout.write_all(&buf[..n])?;
                stdout.flush()?;
            },
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {},
            Err(e) => return Err(e),
        }
    }
}

/// RAII guard for raw host terminal mode
struct RawModeGuard {
    original: Termios,
}

impl RawModeGuard {
    fn new() -> io::Result<Self> {
        let original = termios::tcgetattr(io::stdin()).map_err(io::Error::from)?;

        let mut raw = original.clone();
        raw.local_flags.remove(
            LocalFlags::ICANON | LocalFlags::ECHO | LocalFlags::ISIG | LocalFlags::IEXTEN,
        );
        raw.input_flags.remove(InputFlags::ICRNL | InputFlags::IXON);
        raw.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        raw.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &raw).map_err(io::Error::from)?;
        Ok(Self { original })
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = termios::tcsetattr(io::stdin(), SetArg::TCSANOW, &self.original);
    }
}
