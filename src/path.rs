//! Module implement the path types used by rosters and changesets.
//!
//! A [FilePath] is an ordered sequence of [PathComponent]s, relative to
//! the tree root; the empty sequence denotes the root itself. A
//! [BookkeepingPath] lives under the workspace control directory and is
//! a distinct type so the two cannot be mixed.

use std::{cmp, fmt, result, str::FromStr};

use crate::{Error, Result};

/// Name of the workspace control directory, reserved at the tree root.
pub const BOOKKEEPING_ROOT: &str = "_MTN";

/// A single file or directory name.
///
/// Must be non-empty, not `.` or `..`, and must not contain `/` or NUL.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PathComponent(String);

impl PathComponent {
    pub fn new(s: &str) -> Result<PathComponent> {
        if s.is_empty() || s == "." || s == ".." {
            err_at!(UserError, msg: "invalid path component {:?}", s)?
        }
        if s.contains('/') || s.contains('\u{0}') {
            err_at!(UserError, msg: "invalid path component {:?}", s)?
        }
        Ok(PathComponent(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this component names the workspace control directory.
    pub fn is_bookkeeping(&self) -> bool {
        self.0 == BOOKKEEPING_ROOT
    }
}

impl fmt::Display for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for PathComponent {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "{:?}", self.0)
    }
}

impl FromStr for PathComponent {
    type Err = Error;

    fn from_str(s: &str) -> Result<PathComponent> {
        PathComponent::new(s)
    }
}

/// Path of a file or directory relative to the tree root. The empty
/// path denotes the root.
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct FilePath(Vec<PathComponent>);

impl FilePath {
    pub fn root() -> FilePath {
        FilePath(Vec::default())
    }

    pub fn from_components(comps: Vec<PathComponent>) -> FilePath {
        FilePath(comps)
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn components(&self) -> &[PathComponent] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// Append `name` to this path.
    pub fn join(&self, name: PathComponent) -> FilePath {
        let mut comps = self.0.clone();
        comps.push(name);
        FilePath(comps)
    }

    /// Split into (parent-path, basename). Return None for the root.
    pub fn split(&self) -> Option<(FilePath, PathComponent)> {
        match self.0.split_last() {
            Some((name, dir)) => Some((FilePath(dir.to_vec()), name.clone())),
            None => None,
        }
    }

    pub fn basename(&self) -> Option<&PathComponent> {
        self.0.last()
    }

    /// Whether `self` is a proper prefix of `other`.
    pub fn is_ancestor_of(&self, other: &FilePath) -> bool {
        other.0.len() > self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

// Paths order first by depth-agnostic component sequence, which matches
// the stable stanza order of serialized rosters.
impl PartialOrd for FilePath {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FilePath {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.0.cmp(&other.0)
    }
}

impl fmt::Display for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        if self.0.is_empty() {
            write!(f, "")
        } else {
            let parts: Vec<&str> = self.0.iter().map(|c| c.as_str()).collect();
            write!(f, "{}", parts.join("/"))
        }
    }
}

impl fmt::Debug for FilePath {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "FilePath({})", self)
    }
}

impl FromStr for FilePath {
    type Err = Error;

    /// Parse a `/`-separated path. The empty string is the root.
    fn from_str(s: &str) -> Result<FilePath> {
        if s.is_empty() {
            return Ok(FilePath::root());
        }
        let mut comps = vec![];
        for part in s.split('/') {
            comps.push(PathComponent::new(part)?);
        }
        Ok(FilePath(comps))
    }
}

/// Path under the workspace control directory, [BOOKKEEPING_ROOT].
/// Distinct from [FilePath] so the type system forbids mixing them.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BookkeepingPath(Vec<PathComponent>);

impl BookkeepingPath {
    /// Build a bookkeeping path from components below [BOOKKEEPING_ROOT].
    pub fn new(comps: Vec<PathComponent>) -> Result<BookkeepingPath> {
        if comps.is_empty() {
            err_at!(UserError, msg: "empty bookkeeping path")?
        }
        Ok(BookkeepingPath(comps))
    }

    pub fn components(&self) -> &[PathComponent] {
        &self.0
    }
}

impl fmt::Display for BookkeepingPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let parts: Vec<&str> = self.0.iter().map(|c| c.as_str()).collect();
        write!(f, "{}/{}", BOOKKEEPING_ROOT, parts.join("/"))
    }
}

impl fmt::Debug for BookkeepingPath {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        write!(f, "BookkeepingPath({})", self)
    }
}

impl FromStr for BookkeepingPath {
    type Err = Error;

    /// Parse a `/`-separated path that must start with [BOOKKEEPING_ROOT].
    fn from_str(s: &str) -> Result<BookkeepingPath> {
        let mut parts = s.split('/');
        match parts.next() {
            Some(root) if root == BOOKKEEPING_ROOT => (),
            _ => err_at!(UserError, msg: "not a bookkeeping path {:?}", s)?,
        }
        let mut comps = vec![];
        for part in parts {
            comps.push(PathComponent::new(part)?);
        }
        BookkeepingPath::new(comps)
    }
}

#[cfg(test)]
#[path = "path_test.rs"]
mod path_test;
