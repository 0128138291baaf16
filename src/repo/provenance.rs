//! Content provenance.
//!
//! For every path in the tree at a reference revision, find the oldest commit
//! (in `rev-list --all` order, reversed) whose tree holds the same blob at the
//! same path. The walk visits every commit, oldest first, even once all paths
//! are settled, and the first match for a path is final: content that
//! disappears and comes back later still credits the earliest commit.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::{GitPath, ObjectId, TreeEntry, validate_ref};

use super::{GitError, ProcessRunner, Repo};

/// Where a path's reference content first appeared.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Origin {
    pub commit: ObjectId,
    /// Position of `commit` in the oldest-first walk, starting at 0.
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProvenanceEntry {
    hash: ObjectId,
    origin: Option<Origin>,
}

impl ProvenanceEntry {
    /// Content hash of the path at the reference revision.
    pub fn hash(&self) -> &ObjectId {
        &self.hash
    }

    /// `None` when no commit in history holds the reference content.
    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }
}

/// Result of [`Repo::find_origin`]: path -> reference hash and origin.
///
/// Keyed by the raw path bytes, one entry per path at the reference.
/// Read-only once returned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProvenanceMap {
    entries: BTreeMap<GitPath, ProvenanceEntry>,
}

impl ProvenanceMap {
    pub fn get(&self, path: impl AsRef<[u8]>) -> Option<&ProvenanceEntry> {
        self.entries.get(path.as_ref())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in path order.
    pub fn iter(&self) -> impl Iterator<Item = (&GitPath, &ProvenanceEntry)> {
        self.entries.iter()
    }

    /// Paths whose reference content never appears in history.
    pub fn unresolved(&self) -> impl Iterator<Item = &GitPath> {
        self.iter()
            .filter(|(_, entry)| entry.origin.is_none())
            .map(|(path, _)| path)
    }
}

/// Mutable state of one resolution. Only [`OriginWalk::visit`] writes, and
/// only into unset origins.
#[derive(Debug)]
struct OriginWalk {
    entries: BTreeMap<GitPath, ProvenanceEntry>,
    visited: usize,
}

impl OriginWalk {
    fn new(reference: Vec<TreeEntry>) -> Self {
        let entries = reference
            .into_iter()
            .map(|entry| {
                (
                    entry.path,
                    ProvenanceEntry {
                        hash: entry.id,
                        origin: None,
                    },
                )
            })
            .collect();
        Self {
            entries,
            visited: 0,
        }
    }

    /// Record `commit` (at walk position `index`) as the origin of every
    /// unsettled path whose content in `tree` matches the reference.
    /// Returns how many paths it settled.
    fn visit(&mut self, commit: &ObjectId, index: usize, tree: &[TreeEntry]) -> usize {
        debug_assert_eq!(index, self.visited, "commits must be visited in walk order");
        self.visited += 1;

        let mut settled = 0;
        for row in tree {
            let Some(entry) = self.entries.get_mut(row.path.as_bytes()) else {
                continue;
            };
            if entry.origin.is_none() && entry.hash == row.id {
                entry.origin = Some(Origin {
                    commit: commit.clone(),
                    index,
                });
                settled += 1;
            }
        }
        settled
    }

    fn finish(self) -> ProvenanceMap {
        ProvenanceMap {
            entries: self.entries,
        }
    }
}

impl<R: ProcessRunner> Repo<'_, R> {
    /// Find, for each path at `reference`, the earliest commit holding the
    /// same content.
    ///
    /// Issues one tree listing for the reference, one history listing, then
    /// one tree listing per commit. Any failure aborts the whole resolution.
    pub fn find_origin(&self, reference: &str) -> Result<ProvenanceMap, GitError> {
        validate_ref(reference)?;

        let mut walk = OriginWalk::new(self.tree(reference)?);

        let mut history = self.history()?;
        history.reverse();
        log::info!(
            "resolving origins of {} paths across {} commits in {}",
            walk.entries.len(),
            history.len(),
            self.path().display()
        );

        let mut settled = 0;
        for (index, commit) in history.iter().enumerate() {
            let tree = self.tree(commit.as_str())?;
            settled += walk.visit(commit, index, &tree);
        }

        let map = walk.finish();
        log::debug!("{} of {} paths have an origin", settled, map.len());
        Ok(map)
    }
}
