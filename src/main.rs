//! targetsh - storage target administration shell
//!
//! With a command on the command line, runs it once and exits with a
//! nonzero status if it failed. Without one, reads commands from stdin
//! until `exit` or end of input.

use anyhow::Context;
use clap::Parser as ClapParser;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use targetsh::{
    backend::{Backend, MemoryBackend},
    config::{self, ShellPrefs},
    console::Console,
    persist::RestoreOutcome,
    shell::Shell,
};

/// targetsh - storage target administration shell
///
/// Save, restore and clear the target configuration and inspect open
/// initiator sessions.
#[derive(ClapParser, Debug)]
#[command(name = "targetsh", version, about, long_about = None)]
struct Cli {
    /// Preferences file (defaults to ~/.targetsh/prefs.toml)
    #[arg(long, env = "TARGETSH_PREFS")]
    prefs: Option<PathBuf>,

    /// Snapshot file to preload the in-memory backend from (defaults to the
    /// preferred save file when running as root)
    #[arg(long)]
    seed: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(short, long)]
    verbose: bool,

    /// Never color output
    #[arg(long)]
    no_color: bool,

    /// Command to run instead of starting the interactive shell
    #[arg(trailing_var_arg = true)]
    command: Vec<String>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let prefs = match cli.prefs.clone().or_else(config::default_prefs_path) {
        Some(path) => ShellPrefs::load_or_default(&path)?,
        None => ShellPrefs::default(),
    };

    let privileged = is_root();
    tracing::debug!(privileged, "starting");

    let mut shell =
        Shell::new(MemoryBackend::new(), privileged).with_save_file(prefs.save_file.clone());

    // Saves go to the preferred save file, so a privileged shell starts from
    // what it holds.
    let seed = match &cli.seed {
        Some(path) => Some(path.clone()),
        None if shell.is_privileged() => Some(shell.save_file()),
        None => None,
    };
    if let Some(path) = seed {
        preload(&mut shell, &path)?;
    }

    let mut console = Console::stdout(prefs.color && !cli.no_color);

    if !cli.command.is_empty() {
        let line = cli.command.join(" ");
        let ok = run_line(&mut shell, &mut console, &line)?.is_some();
        if !ok {
            std::process::exit(1);
        }
        return Ok(());
    }

    run_interactive(&mut shell, &mut console, prefs.auto_save_on_exit)
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "targetsh=debug" } else { "targetsh=warn" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| default.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

fn preload<B: Backend>(shell: &mut Shell<B>, path: &Path) -> anyhow::Result<()> {
    let outcome = shell
        .preload(path)
        .with_context(|| format!("loading configuration from {}", path.display()))?;
    match outcome {
        RestoreOutcome::NotFound(path) => {
            tracing::debug!(path = %path.display(), "no saved configuration, starting empty");
        }
        RestoreOutcome::Restored { path, errors } if errors > 0 => {
            tracing::warn!(errors, path = %path.display(), "configuration loaded with recoverable errors");
        }
        RestoreOutcome::Restored { .. } => {}
    }
    Ok(())
}

/// Run one line and print its outcome. Returns `Some(exit)` on success and
/// `None` if the command failed.
fn run_line<B: Backend, W: std::io::Write>(
    shell: &mut Shell<B>,
    console: &mut Console<W>,
    line: &str,
) -> anyhow::Result<Option<bool>> {
    match shell.execute_line(line) {
        Ok(Some(reply)) => {
            console.print_reply(&reply)?;
            Ok(Some(reply.exit))
        }
        Ok(None) => Ok(Some(false)),
        Err(e) => {
            tracing::debug!(error = ?e, "command failed");
            console.print_error(&e)?;
            Ok(None)
        }
    }
}

fn run_interactive<B: Backend, W: std::io::Write>(
    shell: &mut Shell<B>,
    console: &mut Console<W>,
    auto_save_on_exit: bool,
) -> anyhow::Result<()> {
    let stdin = std::io::stdin();
    let mut lines = stdin.lock().lines();

    loop {
        console.prompt("/")?;
        let Some(line) = lines.next() else {
            break;
        };
        let line = line.context("reading command")?;
        if run_line(shell, console, &line)? == Some(true) {
            break;
        }
    }

    match shell.on_exit(auto_save_on_exit) {
        Ok(Some(reply)) => console.print_reply(&reply)?,
        Ok(None) => {}
        Err(e) => console.print_error(&e)?,
    }
    Ok(())
}
