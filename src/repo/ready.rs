//! Readiness check for a working copy.
//!
//! A copy is usable only when its `.git` directory holds a `HEAD` and a
//! `config` naming the expected remote. Anything else that is present gets
//! wiped and recreated empty, with one exception: an empty directory is left
//! alone and reported as [`Readiness::NeedsClone`].

use std::fs;
use std::io;
use std::path::Path;

use super::{GitError, ProcessRunner, Repo};

const METADATA_DIR: &str = ".git";
const CONFIG_FILE: &str = "config";
const HEAD_FILE: &str = "HEAD";

/// What is on disk at a working-copy path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CopyState {
    Absent,
    PresentEmpty,
    /// Files but no `.git`.
    PresentNoMetadata,
    PresentValid,
    /// Not a directory, unreadable, or `.git` incomplete or pointing elsewhere.
    PresentCorrupt,
}

/// Result of [`check_ready`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    /// Usable as is; nothing was touched.
    Ready,
    /// The path was (re)created empty. Clone into it before use.
    Reset,
    /// The path is an empty directory. Clone into it before use.
    NeedsClone,
}

impl Readiness {
    pub fn is_ready(self) -> bool {
        self == Self::Ready
    }
}

/// Classify the working copy at `path` without modifying anything.
pub fn inspect(path: &Path, expected_remote: &str) -> CopyState {
    let meta = match fs::symlink_metadata(path) {
        Ok(meta) => meta,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return CopyState::Absent,
        Err(_) => return CopyState::PresentCorrupt,
    };
    if !meta.is_dir() {
        return CopyState::PresentCorrupt;
    }

    let mut entries = match fs::read_dir(path) {
        Ok(entries) => entries,
        Err(_) => return CopyState::PresentCorrupt,
    };

    let metadata_dir = path.join(METADATA_DIR);
    if fs::symlink_metadata(&metadata_dir).is_err() {
        return if entries.next().is_none() {
            CopyState::PresentEmpty
        } else {
            CopyState::PresentNoMetadata
        };
    }
    if !metadata_dir.is_dir() {
        return CopyState::PresentCorrupt;
    }

    let config = match fs::read(metadata_dir.join(CONFIG_FILE)) {
        Ok(bytes) => bytes,
        Err(_) => return CopyState::PresentCorrupt,
    };
    let names_remote = String::from_utf8_lossy(&config).contains(expected_remote);
    let has_head = metadata_dir.join(HEAD_FILE).is_file();

    if names_remote && has_head {
        CopyState::PresentValid
    } else {
        CopyState::PresentCorrupt
    }
}

/// Decide whether the copy at `path` can be used for `expected_remote`,
/// resetting it when it cannot.
pub fn check_ready(path: &Path, expected_remote: &str) -> Result<Readiness, GitError> {
    if expected_remote.is_empty() {
        return Err(GitError::InvalidInput("expected remote cannot be empty".into()));
    }

    let state = inspect(path, expected_remote);
    log::debug!("working copy {} is {:?}", path.display(), state);

    match state {
        CopyState::PresentValid => Ok(Readiness::Ready),
        CopyState::PresentEmpty => Ok(Readiness::NeedsClone),
        CopyState::Absent | CopyState::PresentNoMetadata | CopyState::PresentCorrupt => {
            if state != CopyState::Absent {
                log::info!("discarding unusable working copy at {}", path.display());
            }
            reset(path)?;
            Ok(Readiness::Reset)
        }
    }
}

/// Delete whatever is at `path` and leave an empty directory in its place.
pub fn reset(path: &Path) -> Result<(), GitError> {
    let fail = |source: io::Error| GitError::Reset {
        path: path.to_path_buf(),
        source,
    };

    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path).map_err(fail)?,
        Ok(_) => fs::remove_file(path).map_err(fail)?,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(fail(e)),
    }

    fs::create_dir_all(path).map_err(fail)
}

impl<R: ProcessRunner> Repo<'_, R> {
    /// [`check_ready`] for this working copy.
    pub fn check_ready(&self, expected_remote: &str) -> Result<Readiness, GitError> {
        check_ready(self.path(), expected_remote)
    }

    /// [`reset`] for this working copy.
    pub fn reset(&self) -> Result<(), GitError> {
        reset(self.path())
    }
}
