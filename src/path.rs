//! Slash-normalized paths relative to a synchronized root.

use crate::error::SyncError;
use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

/// Separator between path and hash on a manifest line. Never allowed inside a path.
pub const FIELD_SEPARATOR: char = ' ';

/// A file location relative to the synchronized root, using `/` as separator.
///
/// Construction guarantees the path is non-empty, has no leading `/`, no
/// empty, `.` or `..` segments, and contains no `\`, NUL, line break or
/// manifest field separator. Joining it onto a root can never leave that root.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelativePath(String);

impl RelativePath {
    pub fn new(path: impl Into<String>) -> Result<Self, SyncError> {
        let path = path.into();
        validate(&path)?;
        Ok(RelativePath(path))
    }

    /// Builds the relative path of `path` below `root`.
    ///
    /// Components are joined with `/` whatever the host separator is.
    pub fn from_fs_path(root: &Path, path: &Path) -> Result<Self, SyncError> {
        let rel = path.strip_prefix(root).map_err(|_| SyncError::InvalidPath {
            path: path.display().to_string(),
            reason: format!("not below {}", root.display()),
        })?;

        let mut segments = Vec::new();
        for component in rel.components() {
            match component {
                Component::Normal(name) => {
                    let name = name.to_str().ok_or_else(|| SyncError::InvalidPath {
                        path: rel.display().to_string(),
                        reason: "name is not valid UTF-8".to_string(),
                    })?;
                    segments.push(name);
                }
                Component::CurDir => {}
                _ => {
                    return Err(SyncError::InvalidPath {
                        path: rel.display().to_string(),
                        reason: "unexpected path component".to_string(),
                    })
                }
            }
        }

        RelativePath::new(segments.join("/"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.0.split('/')
    }

    /// Resolves this path below a local root.
    pub fn to_local(&self, root: &Path) -> PathBuf {
        let mut local = root.to_path_buf();
        for segment in self.segments() {
            local.push(segment);
        }
        local
    }
}

fn validate(path: &str) -> Result<(), SyncError> {
    let invalid = |reason: &str| SyncError::InvalidPath {
        path: path.to_string(),
        reason: reason.to_string(),
    };

    if path.is_empty() {
        return Err(invalid("empty path"));
    }
    if path.starts_with('/') {
        return Err(invalid("absolute path"));
    }
    if path.contains(FIELD_SEPARATOR) {
        return Err(invalid("contains the manifest field separator"));
    }
    if path.contains(['\n', '\r']) {
        return Err(invalid("contains a line break"));
    }
    if path.contains('\\') || path.contains('\0') {
        return Err(invalid("contains a forbidden character"));
    }
    for segment in path.split('/') {
        match segment {
            "" => return Err(invalid("empty segment")),
            "." | ".." => return Err(invalid("relative segment")),
            _ => {}
        }
    }
    Ok(())
}

impl fmt::Display for RelativePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RelativePath {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        RelativePath::new(s)
    }
}
