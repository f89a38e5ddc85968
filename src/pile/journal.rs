//! Append-only journal backing a [Pile].
//!
//! The journal is a sequence of CBOR-framed records. The first record is
//! always a [Header] carrying the creator code and the schema version;
//! every subsequent record is either a [Batch] of table operations,
//! committed atomically, or a [SchemaMark] appended by the migration
//! path. Batches carry a checksum over their serialized operations,
//! recomputed on replay.

use cbordata::{Cbor, Cborize, FromCbor};

use std::{ffi, fs, io::Read, path};

use crate::{util, Result};

/// 32-bit creator code identifying a journal as belonging to this
/// system, ASCII "_MTN".
pub const CREATOR_CODE: u32 = 0x5f4d_544e;

const HEADER_VER: u32 = 0x000a_0001;
const BATCH_VER: u32 = 0x000a_0002;
const OP_VER: u32 = 0x000a_0003;
const RECORD_VER: u32 = 0x000a_0004;

/// Journal file name under the pile directory.
pub fn make_filename(name: &str) -> ffi::OsString {
    let file_name = format!("{}-pile.dat", name);
    let file_name: &ffi::OsStr = file_name.as_ref();
    file_name.to_os_string()
}

#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub struct Header {
    pub creator_code: u32,
    pub schema_version: String,
}

impl Header {
    const ID: u32 = HEADER_VER;
}

/// A single table operation, replayed in order.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub enum Op {
    Set { table: String, key: Vec<u8>, value: Vec<u8> },
    Del { table: String, key: Vec<u8> },
}

impl Op {
    const ID: u32 = OP_VER;
}

/// A batch of operations committed by one outermost transaction.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub struct Batch {
    pub seqno: u64,
    pub ops: Vec<Op>,
    pub checksum: u64,
}

impl Batch {
    const ID: u32 = BATCH_VER;

    pub fn new(seqno: u64, ops: Vec<Op>) -> Result<Batch> {
        let checksum = Self::compute_checksum(&ops)?;
        Ok(Batch { seqno, ops, checksum })
    }

    fn compute_checksum(ops: &[Op]) -> Result<u64> {
        let data = util::into_cbor_bytes(ops.to_vec())?;
        Ok(util::checksum(&data))
    }

    pub fn validate(&self) -> Result<()> {
        let checksum = Self::compute_checksum(&self.ops)?;
        if checksum != self.checksum {
            err_at!(
                Corrupt, msg: "journal batch {}, checksum {} != {}",
                self.seqno, checksum, self.checksum
            )?
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub enum Record {
    Header { header: Header },
    Batch { batch: Batch },
    SchemaMark { schema_version: String },
}

impl Record {
    const ID: u32 = RECORD_VER;
}

/// Open-or-create the journal file under `dir`, returning the live file
/// handle and the records found on disk. A fresh journal gets a header
/// record written and synced before this function returns.
pub fn open(
    dir: &ffi::OsStr,
    name: &str,
    schema_version: &str,
) -> Result<(fs::File, ffi::OsString, Vec<Record>)> {
    let location: path::PathBuf = [dir, &make_filename(name)].iter().collect();
    let location = location.into_os_string();

    let records = if path::Path::new(&location).exists() {
        read_records(&location)?
    } else {
        let mut file = util::create_file_a(&location)?;
        let header = Header {
            creator_code: CREATOR_CODE,
            schema_version: schema_version.to_string(),
        };
        let data = util::into_cbor_bytes(Record::Header { header: header.clone() })?;
        util::sync_write(&mut file, &data)?;
        vec![Record::Header { header }]
    };

    let file = util::open_file_a(&location)?;
    Ok((file, location, records))
}

fn read_records(location: &ffi::OsStr) -> Result<Vec<Record>> {
    let mut file = util::open_file_r(location)?;
    let mut data = vec![];
    err_at!(IOError, file.read_to_end(&mut data))?;

    let mut records = vec![];
    let mut buf = data.as_slice();
    while !buf.is_empty() {
        let (cbor, n) = err_at!(Corrupt, Cbor::decode(&mut buf), "truncated journal")?;
        let record = err_at!(Corrupt, Record::from_cbor(cbor), "bad journal record")?;
        if n == 0 {
            err_at!(Corrupt, msg: "journal decode made no progress")?
        }
        records.push(record);
    }

    match records.first() {
        Some(Record::Header { .. }) => Ok(records),
        Some(_) => err_at!(Corrupt, msg: "journal does not start with a header"),
        None => err_at!(Corrupt, msg: "empty journal {:?}", location),
    }
}

/// Append a committed batch, fsync before returning.
pub fn append_batch(file: &mut fs::File, batch: Batch) -> Result<()> {
    let data = util::into_cbor_bytes(Record::Batch { batch })?;
    util::sync_write(file, &data)?;
    Ok(())
}

/// Append a schema mark, recorded by the migration path after it has
/// rewritten the relations to a newer schema.
pub fn append_schema_mark(file: &mut fs::File, schema_version: &str) -> Result<()> {
    let record = Record::SchemaMark { schema_version: schema_version.to_string() };
    let data = util::into_cbor_bytes(record)?;
    util::sync_write(file, &data)?;
    Ok(())
}

#[cfg(test)]
#[path = "journal_test.rs"]
mod journal_test;
