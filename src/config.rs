//! Runtime configuration.
//!
//! A [`Config`] is built once (defaults, then environment, then command-line
//! overrides) and handed to [`crate::repo::GitKit`]. It is the only place the
//! transport credential lives; there is no process-wide credential state.

use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::paths::StatePaths;
use crate::types::{Credential, validate_ref};

/// Capture cap for tree listings and content fetches (20 MiB).
pub const DEFAULT_MAX_OUTPUT: usize = 20 * 1024 * 1024;

/// Branch the update fix path parks on while it rebuilds the target branch.
pub const DEFAULT_SCRATCH_BRANCH: &str = "gitkit-scratch";

pub const ENV_SSH_KEY: &str = "GITKIT_SSH_KEY";
pub const ENV_MAX_OUTPUT: &str = "GITKIT_MAX_OUTPUT";
pub const ENV_GIT: &str = "GITKIT_GIT";
pub const ENV_STATE_DIR: &str = "GITKIT_STATE_DIR";

/// Errors returned while assembling configuration.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    InvalidValue { name: &'static str, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    credential: Option<Credential>,
    max_output_bytes: usize,
    git_program: String,
    scratch_branch: String,
    state_dir: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            credential: None,
            max_output_bytes: DEFAULT_MAX_OUTPUT,
            git_program: "git".into(),
            scratch_branch: DEFAULT_SCRATCH_BRANCH.into(),
            state_dir: StatePaths::default().root().to_path_buf(),
        }
    }
}

impl Config {
    /// Defaults overridden by `GITKIT_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(key) = lookup(ENV_SSH_KEY).filter(|v| !v.is_empty()) {
            config.credential = Some(Credential::SshKey(PathBuf::from(key)));
        }
        if let Some(raw) = lookup(ENV_MAX_OUTPUT) {
            config.max_output_bytes = parse_size(ENV_MAX_OUTPUT, &raw)?;
        }
        if let Some(git) = lookup(ENV_GIT).filter(|v| !v.is_empty()) {
            config.git_program = git;
        }
        if let Some(dir) = lookup(ENV_STATE_DIR).filter(|v| !v.is_empty()) {
            config.state_dir = PathBuf::from(dir);
        }

        Ok(config)
    }

    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Replace the credential. Later calls win.
    pub fn set_credential(&mut self, credential: Credential) {
        self.credential = Some(credential);
    }

    pub fn with_credential(mut self, credential: Credential) -> Self {
        self.set_credential(credential);
        self
    }

    pub fn max_output_bytes(&self) -> usize {
        self.max_output_bytes
    }

    pub fn with_max_output(mut self, limit: usize) -> Self {
        self.max_output_bytes = limit;
        self
    }

    pub fn git_program(&self) -> &str {
        &self.git_program
    }

    pub fn with_git_program(mut self, program: impl Into<String>) -> Self {
        self.git_program = program.into();
        self
    }

    pub fn scratch_branch(&self) -> &str {
        &self.scratch_branch
    }

    pub fn with_scratch_branch(mut self, branch: impl Into<String>) -> Result<Self, ConfigError> {
        let branch = branch.into();
        if validate_ref(&branch).is_err() {
            return Err(ConfigError::InvalidValue {
                name: "scratch branch",
                value: branch,
            });
        }
        self.scratch_branch = branch;
        Ok(self)
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    pub fn with_state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.state_dir = dir.into();
        self
    }
}

/// Parse a byte count, accepting an optional `k`/`m`/`g` suffix (binary units).
pub fn parse_size(name: &'static str, raw: &str) -> Result<usize, ConfigError> {
    let invalid = || ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
    };
    let trimmed = raw.trim().to_ascii_lowercase();
    let (digits, shift) = match trimmed.chars().last() {
        Some('k') => (&trimmed[..trimmed.len() - 1], 10),
        Some('m') => (&trimmed[..trimmed.len() - 1], 20),
        Some('g') => (&trimmed[..trimmed.len() - 1], 30),
        _ => (trimmed.as_str(), 0),
    };
    let value: usize = digits.parse().map_err(|_| invalid())?;
    if value == 0 {
        return Err(invalid());
    }
    value.checked_mul(1usize << shift).ok_or_else(invalid)
}
