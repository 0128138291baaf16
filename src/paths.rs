//! State directory path management
//!
//! gitkit keeps nothing inside a working copy it does not own. Lock files live
//! under a separate state root:
//!
//! ```text
//! ~/.cache/gitkit/
//! └── locks/
//!     └── <sanitized absolute working-copy path>.lock
//! ```

use std::path::{Component, Path, PathBuf};

/// Manages the filesystem paths of the gitkit state directory
#[derive(Debug, Clone)]
pub struct StatePaths {
    root: PathBuf,
}

impl StatePaths {
    /// Creates a new StatePaths with the specified root directory
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Returns the root state directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Returns the locks directory path: `{root}/locks`
    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    /// Returns the lock file guarding one working copy.
    ///
    /// The working copy path is made absolute (without touching the
    /// filesystem, since the copy may not exist yet) and flattened into a
    /// single file name.
    pub fn lock_path(&self, working_copy: &Path) -> PathBuf {
        let absolute =
            std::path::absolute(working_copy).unwrap_or_else(|_| working_copy.to_path_buf());
        self.locks_dir()
            .join(format!("{}.lock", lock_name(&absolute)))
    }
}

impl Default for StatePaths {
    /// Creates a StatePaths using the system cache directory + "gitkit"
    ///
    /// Uses `dirs::cache_dir()` which resolves to:
    /// - Linux: `~/.cache`
    /// - macOS: `~/Library/Caches`
    /// - Windows: `C:\Users\<user>\AppData\Local`
    fn default() -> Self {
        let cache_dir = dirs::cache_dir().unwrap_or_else(|| PathBuf::from(".cache"));
        Self::new(cache_dir.join("gitkit"))
    }
}

fn lock_name(path: &Path) -> String {
    let parts: Vec<String> = path
        .components()
        .filter_map(|c| match c {
            Component::Normal(part) => Some(
                part.to_string_lossy()
                    .chars()
                    .map(|c| {
                        if c.is_ascii_alphanumeric() || c == '-' || c == '.' {
                            c
                        } else {
                            '_'
                        }
                    })
                    .collect(),
            ),
            _ => None,
        })
        .collect();

    if parts.is_empty() {
        "root".to_string()
    } else {
        parts.join("__")
    }
}
