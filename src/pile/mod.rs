//! Module implement the embedded storage engine, called a pile.
//!
//! A pile realizes the logical schema as a set of named relations, each
//! an ordered map from byte-string key to byte-string value. The whole
//! state lives in memory and is persisted through an append-only journal
//! of checksummed batches, refer [journal]. Opening a pile replays the
//! journal; committing an outermost transaction appends one batch and
//! fsyncs it.
//!
//! Transactions nest. Mutations apply to the in-memory relations
//! immediately and push undo records; only the outermost commit writes
//! to the journal, a rollback replays its undo records in reverse.
//! Cross-handle writers are serialized with an advisory file lock taken
//! by exclusive transactions.

use fs2::FileExt;

use std::{collections::BTreeMap, ffi, fs, path};

use crate::{
    hash::{self, NodeId},
    util, Result,
};

pub mod journal;

use journal::{Batch, Op, Record};

/// Relations required by the core, the logical schema.
pub const TABLES: [&str; 14] = [
    "public_keys",
    "files",
    "file_deltas",
    "file_sizes",
    "rosters",
    "roster_deltas",
    "revisions",
    "revision_ancestry",
    "heights",
    "revision_certs",
    "branch_leaves",
    "branch_epochs",
    "db_vars",
    "next_roster_node_number",
];

/// Version hash for the schema realized by this build, derived from the
/// relation names.
pub fn schema_version() -> String {
    let text = format!("revdb-schema: {}", TABLES.join(","));
    hash::Hash::digest(text.as_bytes()).to_hex()
}

/// How to open a pile.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OpenMode {
    /// Refuse unless creator code and schema version both match.
    Normal,
    /// Verify the creator code only; used by the migration path.
    Maintenance,
}

// One undo record per mutation, replayed in reverse on rollback.
enum Undo {
    Set { table: String, key: Vec<u8>, old: Option<Vec<u8>> },
    Del { table: String, key: Vec<u8>, old: Vec<u8> },
}

struct Frame {
    undo: Vec<Undo>,
    redo_start: usize,
}

/// The storage engine handle.
pub struct Pile {
    location: ffi::OsString,
    file: fs::File,
    lock_file: fs::File,
    tables: BTreeMap<String, BTreeMap<Vec<u8>, Vec<u8>>>,
    schema: String,
    seqno: u64,

    frames: Vec<Frame>,
    redo: Vec<Op>,
    locked: bool,
}

impl Pile {
    /// Open or create a pile under directory `dir`. `mode` gates the
    /// schema check, refer [OpenMode].
    pub fn open(dir: &ffi::OsStr, name: &str, mode: OpenMode) -> Result<Pile> {
        let (file, location, records) = journal::open(dir, name, &schema_version())?;

        let lock_file = {
            let loc: path::PathBuf =
                [dir, ffi::OsStr::new(&format!("{}-lock", name))].iter().collect();
            let mut opts = fs::OpenOptions::new();
            err_at!(IOError, opts.create(true).write(true).open(&loc))?
        };

        let mut tables = BTreeMap::new();
        for table in TABLES.iter() {
            tables.insert(table.to_string(), BTreeMap::new());
        }

        let mut schema = String::default();
        let mut seqno = 0;
        for record in records.into_iter() {
            match record {
                Record::Header { header } => {
                    if header.creator_code != journal::CREATOR_CODE {
                        err_at!(
                            InvalidFile,
                            msg: "not a revdb pile {:?}, creator {:x}",
                            location, header.creator_code
                        )?
                    }
                    schema = header.schema_version;
                }
                Record::SchemaMark { schema_version } => schema = schema_version,
                Record::Batch { batch } => {
                    batch.validate()?;
                    seqno = batch.seqno;
                    for op in batch.ops.into_iter() {
                        match op {
                            Op::Set { table, key, value } => {
                                match tables.get_mut(&table) {
                                    Some(t) => {
                                        t.insert(key, value);
                                    }
                                    None => (), // relation from a newer schema
                                }
                            }
                            Op::Del { table, key } => match tables.get_mut(&table) {
                                Some(t) => {
                                    t.remove(&key);
                                }
                                None => (),
                            },
                        }
                    }
                }
            }
        }

        if mode == OpenMode::Normal && schema != schema_version() {
            err_at!(
                UserError,
                msg: "schema version {} does not match, migration required", schema
            )?
        }

        let pile = Pile {
            location,
            file,
            lock_file,
            tables,
            schema,
            seqno,
            frames: Vec::default(),
            redo: Vec::default(),
            locked: false,
        };
        Ok(pile)
    }

    /// Location of the backing journal file.
    pub fn to_location(&self) -> ffi::OsString {
        self.location.clone()
    }

    /// Schema version found on disk, may lag [schema_version] when the
    /// pile was opened for maintenance.
    pub fn to_schema(&self) -> String {
        self.schema.clone()
    }

    pub fn to_creator_code(&self) -> u32 {
        journal::CREATOR_CODE
    }

    /// Append a schema mark after migration rewrote the relations.
    pub fn mark_schema_current(&mut self) -> Result<()> {
        if !self.frames.is_empty() {
            err_at!(Fatal, msg: "schema mark inside an open transaction")?
        }
        journal::append_schema_mark(&mut self.file, &schema_version())?;
        self.schema = schema_version();
        Ok(())
    }
}

impl Pile {
    /// Begin a transaction, possibly nested. An exclusive transaction
    /// takes the advisory write lock for its duration.
    pub fn begin(&mut self, exclusive: bool) -> Result<()> {
        if exclusive && !self.locked {
            err_at!(IOError, self.lock_file.lock_exclusive())?;
            self.locked = true;
        }
        let frame = Frame {
            undo: Vec::default(),
            redo_start: self.redo.len(),
        };
        self.frames.push(frame);
        Ok(())
    }

    pub fn in_txn(&self) -> bool {
        !self.frames.is_empty()
    }

    pub fn txn_depth(&self) -> usize {
        self.frames.len()
    }

    /// Commit the innermost transaction. Only the outermost commit
    /// persists, appending one checksummed batch to the journal.
    pub fn commit(&mut self) -> Result<()> {
        let frame = match self.frames.pop() {
            Some(frame) => frame,
            None => err_at!(Fatal, msg: "commit without a transaction")?,
        };

        if let Some(parent) = self.frames.last_mut() {
            parent.undo.extend(frame.undo);
            return Ok(());
        }

        if !self.redo.is_empty() {
            self.seqno += 1;
            let ops: Vec<Op> = self.redo.drain(..).collect();
            let batch = Batch::new(self.seqno, ops)?;
            journal::append_batch(&mut self.file, batch)?;
        }
        self.release_lock()?;
        Ok(())
    }

    /// Roll back the innermost transaction, undoing its mutations.
    pub fn rollback(&mut self) -> Result<()> {
        let frame = match self.frames.pop() {
            Some(frame) => frame,
            None => err_at!(Fatal, msg: "rollback without a transaction")?,
        };

        self.redo.truncate(frame.redo_start);
        for undo in frame.undo.into_iter().rev() {
            match undo {
                Undo::Set { table, key, old } => {
                    let t = self.tables.get_mut(&table).unwrap();
                    match old {
                        Some(old) => t.insert(key, old),
                        None => t.remove(&key),
                    };
                }
                Undo::Del { table, key, old } => {
                    self.tables.get_mut(&table).unwrap().insert(key, old);
                }
            }
        }

        if self.frames.is_empty() {
            self.release_lock()?;
        }
        Ok(())
    }

    // the advisory lock is held until the outermost transaction ends,
    // whichever frame took it.
    fn release_lock(&mut self) -> Result<()> {
        if self.locked {
            err_at!(IOError, self.lock_file.unlock())?;
            self.locked = false;
        }
        Ok(())
    }

    fn table(&self, table: &str) -> Result<&BTreeMap<Vec<u8>, Vec<u8>>> {
        match self.tables.get(table) {
            Some(t) => Ok(t),
            None => err_at!(Fatal, msg: "no such relation {}", table),
        }
    }

    pub fn get(&self, table: &str, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.table(table)?.get(key).cloned())
    }

    pub fn exists(&self, table: &str, key: &[u8]) -> Result<bool> {
        Ok(self.table(table)?.contains_key(key))
    }

    /// Write `key -> value` into `table`. Requires an open transaction.
    pub fn set(&mut self, table: &str, key: &[u8], value: &[u8]) -> Result<()> {
        if self.frames.is_empty() {
            err_at!(Fatal, msg: "mutation outside a transaction")?
        }
        let t = match self.tables.get_mut(table) {
            Some(t) => t,
            None => err_at!(Fatal, msg: "no such relation {}", table)?,
        };
        let old = t.insert(key.to_vec(), value.to_vec());
        let frame = self.frames.last_mut().unwrap();
        frame.undo.push(Undo::Set { table: table.to_string(), key: key.to_vec(), old });
        self.redo.push(Op::Set {
            table: table.to_string(),
            key: key.to_vec(),
            value: value.to_vec(),
        });
        Ok(())
    }

    /// Delete `key` from `table`. Missing keys are a no-op. Requires an
    /// open transaction.
    pub fn del(&mut self, table: &str, key: &[u8]) -> Result<()> {
        if self.frames.is_empty() {
            err_at!(Fatal, msg: "mutation outside a transaction")?
        }
        let t = match self.tables.get_mut(table) {
            Some(t) => t,
            None => err_at!(Fatal, msg: "no such relation {}", table)?,
        };
        let old = match t.remove(key) {
            Some(old) => old,
            None => return Ok(()),
        };
        let frame = self.frames.last_mut().unwrap();
        frame.undo.push(Undo::Del { table: table.to_string(), key: key.to_vec(), old });
        self.redo.push(Op::Del { table: table.to_string(), key: key.to_vec() });
        Ok(())
    }

    /// All `(key, value)` pairs in `table`, in key order.
    pub fn iter(&self, table: &str) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let t = self.table(table)?;
        Ok(t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    /// All `(key, value)` pairs in `table` whose key starts with
    /// `prefix`, in key order.
    pub fn iter_prefix(&self, table: &str, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        let t = self.table(table)?;
        let iter = t.range(prefix.to_vec()..).take_while(|(k, _)| k.starts_with(prefix));
        Ok(iter.map(|(k, v)| (k.clone(), v.clone())).collect())
    }

    pub fn count(&self, table: &str) -> Result<usize> {
        Ok(self.table(table)?.len())
    }
}

impl Pile {
    /// Fetch the database variable `(domain, name)`.
    pub fn get_var(&self, domain: &str, name: &str) -> Result<Option<String>> {
        let key = key2(domain.as_bytes(), name.as_bytes());
        match self.get("db_vars", &key)? {
            Some(value) => {
                Ok(Some(err_at!(FailConvert, String::from_utf8(value))?))
            }
            None => Ok(None),
        }
    }

    /// Store the database variable `(domain, name) -> value`.
    pub fn set_var(&mut self, domain: &str, name: &str, value: &str) -> Result<()> {
        let key = key2(domain.as_bytes(), name.as_bytes());
        self.set("db_vars", &key, value.as_bytes())
    }

    pub fn del_var(&mut self, domain: &str, name: &str) -> Result<()> {
        let key = key2(domain.as_bytes(), name.as_bytes());
        self.del("db_vars", &key)
    }

    /// Allocate the next node identifier from the persistent counter.
    pub fn next_node_id(&mut self) -> Result<NodeId> {
        let key = b"next".to_vec();
        let next = match self.get("next_roster_node_number", &key)? {
            Some(value) => util::from_cbor_bytes::<u64>(&value)?.0,
            None => hash::FIRST_NODE,
        };
        if next + 1 >= hash::FIRST_TEMP_NODE {
            err_at!(Fatal, msg: "node counter exhausted")?
        }
        let value = util::into_cbor_bytes(next + 1)?;
        self.set("next_roster_node_number", &key, &value)?;
        Ok(NodeId(next))
    }
}

/// Encode a two-part key so that prefix scans by the first part work,
/// `[len(a) as u32 BE] a b`.
pub fn key2(a: &[u8], b: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + a.len() + b.len());
    key.extend_from_slice(&(a.len() as u32).to_be_bytes());
    key.extend_from_slice(a);
    key.extend_from_slice(b);
    key
}

/// Prefix matching every [key2] with first part `a`.
pub fn prefix2(a: &[u8]) -> Vec<u8> {
    let mut key = Vec::with_capacity(4 + a.len());
    key.extend_from_slice(&(a.len() as u32).to_be_bytes());
    key.extend_from_slice(a);
    key
}

/// Inverse of [key2].
pub fn split_key2(key: &[u8]) -> Result<(Vec<u8>, Vec<u8>)> {
    if key.len() < 4 {
        err_at!(DecodeFail, msg: "two-part key too short {}", key.len())?
    }
    let mut len = [0u8; 4];
    len.copy_from_slice(&key[..4]);
    let len = u32::from_be_bytes(len) as usize;
    if key.len() < 4 + len {
        err_at!(DecodeFail, msg: "two-part key too short {}/{}", key.len(), 4 + len)?
    }
    Ok((key[4..4 + len].to_vec(), key[4 + len..].to_vec()))
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
