//! Parsers for the plumbing output gitkit consumes.

use crate::types::{DiffEntry, GitPath, ObjectId, ObjectKind, TreeEntry};

use super::GitError;

fn parse_id(raw: &str) -> Result<ObjectId, GitError> {
    raw.parse()
        .map_err(|e| GitError::Parse(format!("bad object id {:?}: {}", raw, e)))
}

fn utf8_field<'a>(raw: &'a [u8], what: &str) -> Result<&'a str, GitError> {
    std::str::from_utf8(raw).map_err(|_| {
        GitError::Parse(format!("{} is not UTF-8: {:?}", what, String::from_utf8_lossy(raw)))
    })
}

/// `ls-tree -r -z`: `<mode> SP <type> SP <id> TAB <path> NUL`, repeated.
///
/// Paths are taken as raw bytes.
pub(super) fn tree_listing(out: &[u8]) -> Result<Vec<TreeEntry>, GitError> {
    out.split(|b| *b == 0)
        .filter(|record| !record.trim_ascii().is_empty())
        .map(|record| {
            let tab = record.iter().position(|b| *b == b'\t').ok_or_else(|| {
                GitError::Parse(format!(
                    "tree row without path: {:?}",
                    String::from_utf8_lossy(record)
                ))
            })?;
            let (meta, path) = (&record[..tab], &record[tab + 1..]);
            let meta = utf8_field(meta, "tree row")?;
            let mut fields = meta.split_whitespace();
            match (fields.next(), fields.next(), fields.next(), fields.next()) {
                (Some(mode), Some(kind), Some(id), None) => Ok(TreeEntry {
                    mode: mode.to_string(),
                    kind: kind.parse().unwrap_or(ObjectKind::Unknown),
                    id: parse_id(id)?,
                    path: GitPath::from(path),
                }),
                _ => Err(GitError::Parse(format!("malformed tree row: {:?}", meta))),
            }
        })
        .collect()
}

/// `diff-tree -r -z --no-commit-id`:
/// `:<old mode> SP <new mode> SP <old id> SP <new id> SP <status> NUL <path> NUL`.
pub(super) fn diff_listing(out: &[u8]) -> Result<Vec<DiffEntry>, GitError> {
    let mut fields = out.split(|b| *b == 0).filter(|f| !f.is_empty());
    let mut entries = Vec::new();

    while let Some(meta) = fields.next() {
        let meta = utf8_field(meta, "diff row")?.trim_start_matches('\n');
        let Some(meta) = meta.strip_prefix(':') else {
            return Err(GitError::Parse(format!("unexpected diff row: {:?}", meta)));
        };
        let parts: Vec<&str> = meta.split_whitespace().collect();
        let [old_mode, new_mode, old_id, new_id, status] = parts[..] else {
            return Err(GitError::Parse(format!("malformed diff row: {:?}", meta)));
        };
        let path = fields
            .next()
            .ok_or_else(|| GitError::Parse(format!("diff row without path: {:?}", meta)))?;
        entries.push(DiffEntry {
            old_mode: old_mode.to_string(),
            new_mode: new_mode.to_string(),
            old_id: parse_id(old_id)?,
            new_id: parse_id(new_id)?,
            status: status.to_string(),
            path: GitPath::from(path),
        });
    }

    Ok(entries)
}

/// Whitespace-separated object ids, in the order printed.
pub(super) fn id_list(out: &str) -> Result<Vec<ObjectId>, GitError> {
    out.split_whitespace().map(parse_id).collect()
}

/// First id of the output, if any (`ls-remote`, `merge-base`, `rev-parse`).
pub(super) fn first_id(out: &str) -> Result<Option<ObjectId>, GitError> {
    out.split_whitespace().next().map(parse_id).transpose()
}
