//! Revdb implement the storage and merge core of a distributed version
//! control system. The crate is organised as a collection of components,
//! leaves first:
//!
//! * _content-addressed store_, blobs and their delta-chains, any version
//!   reachable through a chain of deltas can be reconstructed, [store].
//! * _roster model_, the in-memory tree of files and directories at a
//!   revision, along with provenance markings, [roster].
//! * _revision graph_, a DAG of revisions, each edge carrying the changeset
//!   that rewrites the parent roster into the child roster, [graph] and
//!   [db].
//! * _certs_, signed name/value assertions attached to revisions, [cert].
//! * _merge engine_, three-way roster merge with a conflict taxonomy and
//!   user supplied resolutions, [merge].
//!
//! All mutations go through nested transactions, [txn]. Persistence is
//! handled by an embedded engine, [pile], which realizes the logical
//! relations as in-memory ordered maps backed by an append-only journal
//! of checksummed batches.
//!
//! Identifiers are 32-byte BLAKE3 content hashes wrapped in distinct
//! types, one per hash space, refer to [hash]. Canonical serializations
//! of rosters, revisions and conflict files are deterministic textual
//! stanzas, refer to [basic_io].

use std::{fmt, result};

/// Type alias for Result return type, used by this package.
pub type Result<T> = result::Result<T, Error>;

/// Error variants that are returned by this package's API.
///
/// Each variant carries a prefix, typically identifying the failing
/// location in code, and an error message.
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// Identifier lookup failed, non-fatal for callers that probe.
    NotFound(String, String),
    /// Checksum mismatch, broken delta chain, or a roster that fails
    /// its sanity check.
    Corrupt(String, String),
    /// Merge produced unresolved conflicts, message carries the
    /// serialized conflict report.
    Conflict(String, String),
    /// Invalid path, bad date, duplicate name on attach, unknown
    /// conflict resolution.
    UserError(String, String),
    /// API contract violated by the caller.
    InvalidInput(String, String),
    /// File or journal has an unexpected shape.
    InvalidFile(String, String),
    /// An invariant that this code controls was broken, always a bug.
    Fatal(String, String),
    IOError(String, String),
    FailCbor(String, String),
    FailConvert(String, String),
    DecodeFail(String, String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        use Error::*;

        match self {
            NotFound(p, msg) => write!(f, "NotFound:{} {}", p, msg),
            Corrupt(p, msg) => write!(f, "Corrupt:{} {}", p, msg),
            Conflict(p, msg) => write!(f, "Conflict:{} {}", p, msg),
            UserError(p, msg) => write!(f, "UserError:{} {}", p, msg),
            InvalidInput(p, msg) => write!(f, "InvalidInput:{} {}", p, msg),
            InvalidFile(p, msg) => write!(f, "InvalidFile:{} {}", p, msg),
            Fatal(p, msg) => write!(f, "Fatal:{} {}", p, msg),
            IOError(p, msg) => write!(f, "IOError:{} {}", p, msg),
            FailCbor(p, msg) => write!(f, "FailCbor:{} {}", p, msg),
            FailConvert(p, msg) => write!(f, "FailConvert:{} {}", p, msg),
            DecodeFail(p, msg) => write!(f, "DecodeFail:{} {}", p, msg),
        }
    }
}

impl std::error::Error for Error {}

impl Error {
    /// Semantic category for this error, one of `notfound`, `corrupt`,
    /// `conflict`, `user`, `invalid`, `internal`. Front-ends map these
    /// to exit codes.
    pub fn to_category(&self) -> &'static str {
        use Error::*;

        match self {
            NotFound(_, _) => "notfound",
            Corrupt(_, _) => "corrupt",
            Conflict(_, _) => "conflict",
            UserError(_, _) => "user",
            InvalidInput(_, _) | InvalidFile(_, _) => "invalid",
            Fatal(_, _) | IOError(_, _) => "internal",
            FailCbor(_, _) | FailConvert(_, _) | DecodeFail(_, _) => "internal",
        }
    }
}

/// Port for diagnostics the core emits while carrying on, like a
/// dropped delta or a filtered cert. Supplied by the embedding layer,
/// the core never writes to a global logger.
pub trait Monitor {
    fn warn(&mut self, msg: String);

    fn info(&mut self, _msg: String) {}
}

/// Monitor that drops all diagnostics.
pub struct Quiet;

impl Monitor for Quiet {
    fn warn(&mut self, _msg: String) {}
}

#[macro_export]
macro_rules! err_at {
    ($v:ident, msg: $($arg:expr),+) => {{
        let prefix = format!("{}:{}", file!(), line!());
        let msg = format!($($arg),+);
        Err($crate::Error::$v(prefix, msg))
    }};
    ($v:ident, $e:expr) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                Err($crate::Error::$v(prefix, format!("{}", err)))
            }
        }
    }};
    ($v:ident, $e:expr, $($arg:expr),+) => {{
        match $e {
            Ok(val) => Ok(val),
            Err(err) => {
                let prefix = format!("{}:{}", file!(), line!());
                let msg = format!($($arg),+);
                Err($crate::Error::$v(prefix, format!("{} {}", err, msg)))
            }
        }
    }};
}

pub mod basic_io;
pub mod cert;
pub mod dates;
pub mod db;
pub mod graph;
pub mod hash;
pub mod merge;
pub mod migrate;
pub mod path;
pub mod pile;
pub mod revision;
pub mod roster;
pub mod store;
pub mod txn;
pub mod util;

pub use crate::db::Database;
pub use crate::hash::{
    CertId, EpochId, FileId, Hash, KeyId, ManifestId, NodeId, RevisionId, RosterId,
};
pub use crate::path::{BookkeepingPath, FilePath, PathComponent};
