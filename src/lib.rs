//! Keep local git working copies in sync with a remote and trace each file's
//! current content back to the commit that introduced it.
//!
//! All repository access goes through a [`runner::ProcessRunner`] that spawns
//! the git executable; see [`repo::GitKit`] for the entry point.

pub mod config;
pub mod lock;
pub mod paths;
pub mod repo;
pub mod runner;
pub mod types;

#[cfg(test)]
mod test_support;

pub use config::Config;
pub use repo::{
    GitError, GitKit, Origin, ProvenanceEntry, ProvenanceMap, Readiness, Repo, UpdateOutcome,
};
pub use runner::{CommandSpec, ExecError, ExecOptions, ProcessRunner, SystemRunner};
pub use types::{Credential, GitPath, ObjectId, ObjectKind, Signature};
