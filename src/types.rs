//! Shared types for gitkit

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::borrow::Borrow;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use thiserror::Error;

/// Error type for parsing failures
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("value cannot be empty")]
    Empty,
    #[error("invalid character in value: {0:?}")]
    InvalidCharacter(char),
    #[error("value cannot start with '{0}'")]
    InvalidStart(char),
    #[error("value cannot contain '..'")]
    Traversal,
    #[error("object id must be 4 to 64 hex digits, got {0}")]
    InvalidLength(usize),
}

/// A git object name (full or abbreviated hex SHA).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(String);

impl ObjectId {
    /// Returns the object id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First `len` characters, for display.
    pub fn short(&self, len: usize) -> &str {
        &self.0[..self.0.len().min(len)]
    }
}

impl FromStr for ObjectId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ParseError::Empty);
        }
        if let Some(c) = s.chars().find(|c| !c.is_ascii_hexdigit()) {
            return Err(ParseError::InvalidCharacter(c));
        }
        if !(4..=64).contains(&s.len()) {
            return Err(ParseError::InvalidLength(s.len()));
        }
        Ok(ObjectId(s.to_ascii_lowercase()))
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The type git reports for an object, with `Unknown` standing in for
/// anything the lookup could not resolve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ObjectKind {
    Blob,
    Tree,
    Commit,
    Tag,
    Unknown,
}

impl ObjectKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Blob => "blob",
            Self::Tree => "tree",
            Self::Commit => "commit",
            Self::Tag => "tag",
            Self::Unknown => "unknown",
        }
    }
}

impl FromStr for ObjectKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim() {
            "blob" => Self::Blob,
            "tree" => Self::Tree,
            "commit" => Self::Commit,
            "tag" => Self::Tag,
            _ => Self::Unknown,
        })
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A path inside a git tree, kept as the raw bytes git stores.
///
/// git does not require paths to be UTF-8, so two names that differ only in
/// invalid bytes stay distinct. Text forms (`Display`, serde) print valid
/// UTF-8 as is and every other byte as `\xNN`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GitPath(Vec<u8>);

impl GitPath {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The path as UTF-8, if it is.
    pub fn to_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }
}

impl From<&[u8]> for GitPath {
    fn from(bytes: &[u8]) -> Self {
        Self(bytes.to_vec())
    }
}

impl From<Vec<u8>> for GitPath {
    fn from(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }
}

impl From<&str> for GitPath {
    fn from(path: &str) -> Self {
        Self(path.as_bytes().to_vec())
    }
}

impl Borrow<[u8]> for GitPath {
    fn borrow(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq<str> for GitPath {
    fn eq(&self, other: &str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl PartialEq<&str> for GitPath {
    fn eq(&self, other: &&str) -> bool {
        self.0 == other.as_bytes()
    }
}

impl fmt::Display for GitPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for chunk in self.0.utf8_chunks() {
            f.write_str(chunk.valid())?;
            for byte in chunk.invalid() {
                write!(f, "\\x{:02x}", byte)?;
            }
        }
        Ok(())
    }
}

impl Serialize for GitPath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for GitPath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(|s| Self(s.into_bytes()))
    }
}

/// One row of a recursive tree listing: the content identity of a path at
/// one revision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub mode: String,
    pub kind: ObjectKind,
    pub id: ObjectId,
    pub path: GitPath,
}

/// One row of a `diff-tree -r` listing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffEntry {
    pub old_mode: String,
    pub new_mode: String,
    pub old_id: ObjectId,
    pub new_id: ObjectId,
    /// Status letter as git prints it (`A`, `M`, `D`, `R100`, ...).
    pub status: String,
    pub path: GitPath,
}

/// Secret material for authenticated transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Private key file handed to ssh for the duration of one invocation.
    SshKey(PathBuf),
}

/// Author identity for commits made through gitkit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
}

/// Validate that a git ref (branch name, tag, or commit SHA) does not contain dangerous patterns.
///
/// Rejects:
/// - Empty strings
/// - Strings containing `..` (path traversal)
/// - Strings starting with `-` (could be interpreted as flags)
/// - Strings containing null bytes or control characters
pub fn validate_ref(value: &str) -> Result<(), ParseError> {
    if value.is_empty() {
        return Err(ParseError::Empty);
    }
    if value.contains("..") {
        return Err(ParseError::Traversal);
    }
    if value.starts_with('-') {
        return Err(ParseError::InvalidStart('-'));
    }
    if let Some(c) = value.chars().find(|c| c.is_control()) {
        return Err(ParseError::InvalidCharacter(c));
    }
    Ok(())
}
