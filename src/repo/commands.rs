//! Typed git commands against one working copy.
//!
//! Each method validates its inputs, issues exactly the git invocations it
//! documents, and parses the output into crate types. Transport commands
//! (`clone`, `push`, and `ls-remote` when a key is set) carry the credential.

use std::path::Path;

use crate::runner::{ExecError, ExecOptions};
use crate::types::{
    DiffEntry, ObjectId, ObjectKind, ParseError, Signature, TreeEntry, validate_ref,
};

use super::{GitError, ProcessRunner, Repo, parse};

/// Remotes are URLs or paths, so `..` is allowed; flags and control
/// characters are not.
fn validate_remote(remote: &str) -> Result<(), GitError> {
    if remote.is_empty() {
        return Err(ParseError::Empty.into());
    }
    if remote.starts_with('-') {
        return Err(ParseError::InvalidStart('-').into());
    }
    if let Some(c) = remote.chars().find(|c| c.is_control()) {
        return Err(ParseError::InvalidCharacter(c).into());
    }
    Ok(())
}

fn path_arg(path: &Path) -> Result<String, GitError> {
    path.to_str()
        .map(str::to_string)
        .ok_or_else(|| GitError::InvalidInput(format!("{} is not valid UTF-8", path.display())))
}

impl<R: ProcessRunner> Repo<'_, R> {
    /// Clone `remote` into the working copy, which must exist and be empty.
    pub fn clone(&self, remote: &str) -> Result<(), GitError> {
        let credential = self.require_credential()?;
        validate_remote(remote)?;

        log::info!("cloning {} into {}", remote, self.path().display());
        self.run(["clone", "-q", "--", remote, "."], &self.transport(credential))?;
        Ok(())
    }

    /// Stage everything and commit it.
    pub fn commit(&self, message: &str, author: Option<&Signature>) -> Result<(), GitError> {
        if message.trim().is_empty() {
            return Err(GitError::InvalidInput("commit message cannot be empty".into()));
        }

        self.run(["add", "-A", "."], &self.local())?;

        let mut args: Vec<String> = Vec::new();
        if let Some(author) = author {
            args.extend(["-c".into(), format!("user.name={}", author.name)]);
            args.extend(["-c".into(), format!("user.email={}", author.email)]);
        }
        args.extend(["commit", "-q", "-m"].map(String::from));
        args.push(message.to_string());
        self.run(args, &self.local())?;
        Ok(())
    }

    /// Push the current branch to its upstream.
    pub fn push(&self) -> Result<(), GitError> {
        let credential = self.require_credential()?;
        self.run(["push"], &self.transport(credential))?;
        Ok(())
    }

    /// Write `file` (relative to the working copy) into the object store.
    pub fn hash_object(&self, file: &Path) -> Result<ObjectId, GitError> {
        let file = path_arg(file)?;
        let out = self.run(["hash-object", "-w", "--", file.as_str()], &self.local())?;
        parse::first_id(&out)?
            .ok_or_else(|| GitError::Parse("hash-object printed nothing".into()))
    }

    /// Type of the object `id` names; [`ObjectKind::Unknown`] when git
    /// cannot resolve it.
    pub fn object_type(&self, id: &str) -> ObjectKind {
        if validate_ref(id).is_err() {
            return ObjectKind::Unknown;
        }
        match self.run(["cat-file", "-t", id], &self.local()) {
            Ok(out) => out.parse().unwrap_or(ObjectKind::Unknown),
            Err(err) => {
                log::debug!("cat-file -t {} failed: {}", id, err);
                ObjectKind::Unknown
            }
        }
    }

    /// Resolve `rev` locally, falling back to `origin/<rev>` for branches
    /// that only exist as remote-tracking refs.
    pub fn local_hash(&self, rev: &str) -> Result<ObjectId, GitError> {
        validate_ref(rev)?;
        let out = match self.run(["rev-parse", "--verify", rev], &self.local()) {
            Ok(out) => out,
            Err(err) if err.is_recoverable() => {
                log::debug!("{} not found locally, trying origin/{}", rev, rev);
                let remote_rev = format!("origin/{}", rev);
                self.run(["rev-parse", "--verify", remote_rev.as_str()], &self.local())?
            }
            Err(err) => return Err(err),
        };
        parse::first_id(&out)?.ok_or_else(|| GitError::Parse("rev-parse printed nothing".into()))
    }

    /// Id `rev` points at on the remote, or `None` if the remote has no
    /// such ref.
    pub fn remote_hash(&self, rev: &str) -> Result<Option<ObjectId>, GitError> {
        validate_ref(rev)?;
        let opts = self.local().credential(self.config().credential());
        let out = self.run(["ls-remote", "origin", rev], &opts)?;
        parse::first_id(&out)
    }

    /// Recursive tree listing at `rev`.
    pub fn tree(&self, rev: &str) -> Result<Vec<TreeEntry>, GitError> {
        validate_ref(rev)?;
        let out = self.run_raw(["ls-tree", "-r", "-z", "--full-tree", rev], &self.capped())?;
        parse::tree_listing(&out)
    }

    /// Files changed by the commit `rev` relative to its first parent
    /// (everything, for a root commit).
    pub fn diff_tree(&self, rev: &str) -> Result<Vec<DiffEntry>, GitError> {
        validate_ref(rev)?;
        let out = self.run_raw(
            ["diff-tree", "-r", "-z", "--root", "--no-commit-id", rev],
            &self.capped(),
        )?;
        parse::diff_listing(&out)
    }

    /// Every commit reachable from any ref, newest first.
    pub fn history(&self) -> Result<Vec<ObjectId>, GitError> {
        let out = self.run(["rev-list", "--all"], &self.local())?;
        parse::id_list(&out)
    }

    /// Commits reachable from any ref that touch `path`, newest first.
    pub fn file_history(&self, path: &Path) -> Result<Vec<ObjectId>, GitError> {
        let path = path_arg(path)?;
        let out = self.run(["rev-list", "--all", "--", path.as_str()], &self.local())?;
        parse::id_list(&out)
    }

    /// Best common ancestor of `a` and `b`, `None` when they share no history.
    pub fn merge_base(&self, a: &str, b: &str) -> Result<Option<ObjectId>, GitError> {
        validate_ref(a)?;
        validate_ref(b)?;
        match self.run(["merge-base", a, b], &self.local()) {
            Ok(out) => parse::first_id(&out),
            // merge-base exits 1 with no output when there is no common ancestor.
            Err(GitError::Command(ExecError::Command {
                status: Some(1),
                ref stderr,
                ..
            })) if stderr.is_empty() => Ok(None),
            Err(err) => Err(err),
        }
    }

    /// Raw content of object `id`, subject to the output cap.
    pub fn blob_content(&self, id: &str) -> Result<Vec<u8>, GitError> {
        validate_ref(id)?;
        // Diagnostics fail the fetch.
        let opts = ExecOptions::new()
            .cwd(self.path())
            .max_output(self.config().max_output_bytes());
        self.run_raw(["cat-file", "-p", id], &opts)
    }

    /// Move the current branch to `rev`, discarding local changes.
    pub fn reset_hard(&self, rev: &str) -> Result<(), GitError> {
        validate_ref(rev)?;
        self.run(["reset", "-q", "--hard", rev], &self.local())?;
        Ok(())
    }
}
