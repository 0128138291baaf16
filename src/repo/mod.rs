//! Working-copy sessions.
//!
//! [`GitKit`] owns a process runner and the configuration (including the
//! transport credential); [`Repo`] borrows both for one working copy and
//! exposes the typed git commands plus the three session entry points built
//! on them:
//!
//! - [`Repo::check_ready`] - decide whether the copy is usable, resetting it if not
//! - [`Repo::update`] - bring the copy to a revision, rebuilding the branch on failure
//! - [`Repo::find_origin`] - earliest commit introducing each path's current content
//!
//! Operations on one working copy are strictly sequential and nothing here
//! locks; callers serialize sessions against the same directory.

mod commands;
mod parse;
mod provenance;
mod ready;
mod update;

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::Config;
use crate::runner::{CommandSpec, ExecError, ExecOptions, ProcessRunner, SystemRunner};
use crate::types::{Credential, ParseError};

pub use provenance::{Origin, ProvenanceEntry, ProvenanceMap};
pub use ready::{CopyState, Readiness, check_ready, inspect, reset};
pub use update::UpdateOutcome;

/// Errors returned by working-copy operations.
#[derive(Error, Debug)]
pub enum GitError {
    /// A transport operation was requested with no credential configured.
    #[error("no credential configured (set an ssh key)")]
    MissingCredential,
    /// The working copy directory is missing or inaccessible.
    #[error("working copy not found: {}", .0.display())]
    Directory(PathBuf),
    /// A git command failed.
    #[error(transparent)]
    Command(ExecError),
    /// Captured output exceeded the configured cap.
    #[error("content exceeds the {limit} byte capture limit")]
    ContentTooLarge { limit: usize },
    /// The working copy could not be deleted and recreated.
    #[error("failed to reset {}: {source}", path.display())]
    Reset {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    /// Invalid inputs were provided.
    #[error("invalid input: {0}")]
    InvalidInput(String),
    /// Output parsing or unexpected git data.
    #[error("failed to parse git output: {0}")]
    Parse(String),
    /// git could not be started or its output could not be read.
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
}

impl GitError {
    /// Whether the update protocol may answer this failure with its fix path.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Command(_))
    }
}

impl From<ExecError> for GitError {
    fn from(err: ExecError) -> Self {
        match err {
            ExecError::Directory(path) => Self::Directory(path),
            ExecError::OutputTooLarge { limit, .. } => Self::ContentTooLarge { limit },
            ExecError::Spawn { command, source } => Self::Spawn { command, source },
            other => Self::Command(other),
        }
    }
}

impl From<ParseError> for GitError {
    fn from(err: ParseError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Entry point holding the runner and configuration shared by every session.
pub struct GitKit<R = SystemRunner> {
    runner: R,
    config: Config,
}

impl GitKit<SystemRunner> {
    /// A kit that spawns the system git.
    pub fn new(config: Config) -> Self {
        Self::with_runner(SystemRunner::new(), config)
    }
}

impl<R: ProcessRunner> GitKit<R> {
    pub fn with_runner(runner: R, config: Config) -> Self {
        Self { runner, config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.config.credential()
    }

    /// Replace the credential used by every later session from this kit.
    pub fn set_credential(&mut self, credential: Credential) {
        self.config.set_credential(credential);
    }

    pub fn runner(&self) -> &R {
        &self.runner
    }

    /// Open a session on the working copy at `path`. The path need not exist.
    pub fn repo(&self, path: impl Into<PathBuf>) -> Repo<'_, R> {
        Repo {
            path: path.into(),
            runner: &self.runner,
            config: &self.config,
        }
    }

    /// `git version`, trimmed.
    pub fn git_version(&self) -> Result<String, GitError> {
        let spec = CommandSpec::new(self.config.git_program()).arg("version");
        let out = self
            .runner
            .execute(&spec, &ExecOptions::new().ignore_stderr())?;
        Ok(String::from_utf8_lossy(&out).trim().to_string())
    }
}

/// One working copy, borrowed from a [`GitKit`].
pub struct Repo<'a, R> {
    path: PathBuf,
    runner: &'a R,
    config: &'a Config,
}

impl<'a, R: ProcessRunner> Repo<'a, R> {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn config(&self) -> &'a Config {
        self.config
    }

    /// A git invocation with hooks disabled.
    fn git(&self) -> CommandSpec {
        CommandSpec::new(self.config.git_program()).args(["-c", "core.hooksPath="])
    }

    /// Local command in the working copy. git reports progress on stderr, so
    /// success is judged on exit status alone.
    fn local(&self) -> ExecOptions {
        ExecOptions::new().cwd(&self.path).ignore_stderr()
    }

    /// Local command whose stdout is capped.
    fn capped(&self) -> ExecOptions {
        self.local().max_output(self.config.max_output_bytes())
    }

    /// Command that talks to the remote with the given credential.
    fn transport(&self, credential: &Credential) -> ExecOptions {
        self.local().credential(Some(credential))
    }

    fn require_credential(&self) -> Result<&'a Credential, GitError> {
        self.config.credential().ok_or(GitError::MissingCredential)
    }

    fn run_raw<I, S>(&self, args: I, opts: &ExecOptions) -> Result<Vec<u8>, GitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Ok(self.runner.execute(&self.git().args(args), opts)?)
    }

    fn run<I, S>(&self, args: I, opts: &ExecOptions) -> Result<String, GitError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let out = self.run_raw(args, opts)?;
        Ok(String::from_utf8_lossy(&out).into_owned())
    }
}
