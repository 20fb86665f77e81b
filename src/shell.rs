//! The root node of the shell: command dispatch, privilege checks, and the
//! status line every command reports.

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::backend::{Backend, BackendError};
use crate::command::{parse_line, CommandError, RootCommand, COMMANDS};
use crate::persist::{self, PersistError, RestoreOutcome, DEFAULT_SAVE_FILE};
use crate::sessions::{render_sessions, InspectError, SessionAction};
use crate::tree::Tree;

#[derive(Error, Debug)]
pub enum ShellError {
    #[error("This privileged command is disabled: you are not root.")]
    NotRoot,

    #[error(transparent)]
    Validation(CommandError),

    /// A sid filter that matched no open session.
    #[error(transparent)]
    SessionNotFound(InspectError),

    #[error("no such path: {0}")]
    NoSuchPath(String),

    #[error(transparent)]
    Persist(#[from] PersistError),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

impl From<InspectError> for ShellError {
    fn from(err: InspectError) -> Self {
        if matches!(err, InspectError::NotFound(_)) {
            ShellError::SessionNotFound(err)
        } else {
            ShellError::Validation(CommandError::Inspect(err))
        }
    }
}

impl From<CommandError> for ShellError {
    fn from(err: CommandError) -> Self {
        match err {
            CommandError::Inspect(inner) => inner.into(),
            other => ShellError::Validation(other),
        }
    }
}

/// Severity of a command's final status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Info(String),
    Warning(String),
}

/// Everything a command prints, minus errors.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reply {
    /// Body lines, printed before the status line.
    pub lines: Vec<String>,
    pub status: Option<Status>,
    /// Set by `exit`.
    pub exit: bool,
}

impl Reply {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            status: Some(Status::Info(message.into())),
            ..Default::default()
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            status: Some(Status::Warning(message.into())),
            ..Default::default()
        }
    }

    pub fn lines(lines: Vec<String>) -> Self {
        Self {
            lines,
            ..Default::default()
        }
    }
}

/// Root of the command tree, bound to one backend.
pub struct Shell<B: Backend> {
    backend: B,
    tree: Tree,
    privileged: bool,
    save_file: String,
}

impl<B: Backend> Shell<B> {
    /// Create the root node and build the initial tree.
    pub fn new(backend: B, privileged: bool) -> Self {
        let mut tree = Tree::new();
        tree.refresh(&backend);
        Self {
            backend,
            tree,
            privileged,
            save_file: DEFAULT_SAVE_FILE.to_string(),
        }
    }

    /// Use `path` when `saveconfig`/`restoreconfig` get no file.
    pub fn with_save_file(mut self, path: impl Into<String>) -> Self {
        self.save_file = path.into();
        self
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn is_privileged(&self) -> bool {
        self.privileged
    }

    /// The preferred save file, with `~` expanded.
    pub fn save_file(&self) -> PathBuf {
        self.resolve_save_file(None)
    }

    fn assert_root(&self) -> Result<(), ShellError> {
        if self.privileged {
            Ok(())
        } else {
            Err(ShellError::NotRoot)
        }
    }

    fn resolve_save_file(&self, savefile: Option<&str>) -> PathBuf {
        persist::expand_path(savefile.unwrap_or(&self.save_file))
    }

    /// Parse and run one input line. Blank lines produce no reply.
    pub fn execute_line(&mut self, line: &str) -> Result<Option<Reply>, ShellError> {
        match parse_line(line)? {
            Some(command) => self.execute(command).map(Some),
            None => Ok(None),
        }
    }

    pub fn execute(&mut self, command: RootCommand) -> Result<Reply, ShellError> {
        tracing::debug!(?command, "executing");
        match command {
            RootCommand::SaveConfig { savefile } => self.saveconfig(savefile.as_deref()),
            RootCommand::RestoreConfig {
                savefile,
                clear_existing,
            } => self.restoreconfig(savefile.as_deref(), clear_existing),
            RootCommand::ClearConfig { confirm } => self.clearconfig(confirm),
            RootCommand::Version => Ok(self.version()),
            RootCommand::Sessions { action, sid } => self.sessions(action, sid),
            RootCommand::Refresh => {
                self.refresh();
                Ok(Reply::info("Refreshed configuration tree"))
            }
            RootCommand::Status => Ok(Reply::info(format!(
                "Status for /: {}",
                self.tree.root().summary
            ))),
            RootCommand::Ls { path, depth } => self.ls(path.as_deref(), depth),
            RootCommand::Help => Ok(help()),
            RootCommand::Exit => Ok(Reply {
                exit: true,
                ..Default::default()
            }),
        }
    }

    /// Load the configuration stored at `path` into an empty backend, so that
    /// later saves to the same file carry it forward instead of replacing it
    /// with an empty one. A missing file leaves the backend empty.
    pub fn preload(&mut self, path: &Path) -> Result<RestoreOutcome, ShellError> {
        let outcome = persist::restore_config(&self.backend, path, false)?;
        if let RestoreOutcome::Restored { errors, .. } = &outcome {
            tracing::debug!(path = %path.display(), errors, "configuration preloaded");
            self.refresh();
        }
        Ok(outcome)
    }

    /// Rebuild the tree from the backend.
    pub fn refresh(&mut self) {
        self.tree.refresh(&self.backend);
    }

    pub fn saveconfig(&mut self, savefile: Option<&str>) -> Result<Reply, ShellError> {
        self.assert_root()?;
        let path = self.resolve_save_file(savefile);

        let outcome = persist::save_config(&self.backend, &path)?;

        let mut reply = Reply::info(format!("Configuration saved to {}", outcome.path.display()));
        if let Some(backup) = &outcome.backup {
            let name = backup
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| backup.display().to_string());
            reply.lines.push(format!(
                "Existing file {} backed up to {name}",
                outcome.path.display()
            ));
        }
        Ok(reply)
    }

    pub fn restoreconfig(
        &mut self,
        savefile: Option<&str>,
        clear_existing: bool,
    ) -> Result<Reply, ShellError> {
        self.assert_root()?;
        let path = self.resolve_save_file(savefile);

        let reply = match persist::restore_config(&self.backend, &path, clear_existing)? {
            RestoreOutcome::NotFound(path) => {
                return Ok(Reply::info(format!("Restore file {} not found", path.display())));
            }
            RestoreOutcome::Restored { errors, .. } if errors > 0 => Reply::warning(format!(
                "Configuration restored, {errors} recoverable errors"
            )),
            RestoreOutcome::Restored { path, .. } => {
                Reply::info(format!("Configuration restored from {}", path.display()))
            }
        };

        self.refresh();
        Ok(reply)
    }

    pub fn clearconfig(&mut self, confirm: bool) -> Result<Reply, ShellError> {
        self.assert_root()?;
        self.backend.clear_existing(confirm)?;
        tracing::info!("configuration cleared");
        self.refresh();
        Ok(Reply::info("All configuration cleared"))
    }

    pub fn version(&self) -> Reply {
        Reply::info(format!("targetsh version {}", env!("CARGO_PKG_VERSION")))
    }

    pub fn sessions(&self, action: SessionAction, sid: Option<i64>) -> Result<Reply, ShellError> {
        let lines = render_sessions(&self.backend, action, sid, self.privileged)?;
        Ok(Reply::lines(lines))
    }

    pub fn ls(&self, path: Option<&str>, depth: Option<usize>) -> Result<Reply, ShellError> {
        let path = path.unwrap_or("/");
        self.tree
            .render(path, depth)
            .map(Reply::lines)
            .ok_or_else(|| ShellError::NoSuchPath(path.to_string()))
    }

    /// Save on the way out when `auto_save` is set and the caller may save.
    pub fn on_exit(&mut self, auto_save: bool) -> Result<Option<Reply>, ShellError> {
        if !auto_save || !self.privileged {
            return Ok(None);
        }
        self.saveconfig(None).map(Some)
    }
}

fn help() -> Reply {
    let width = COMMANDS.iter().map(|(name, _, _)| name.len()).max().unwrap_or(0);
    Reply::lines(
        COMMANDS
            .iter()
            .map(|(name, params, about)| {
                let params = params
                    .iter()
                    .map(|p| format!("[{p}]"))
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("{name:<width$}  {about} {params}").trim_end().to_string()
            })
            .collect(),
    )
}
