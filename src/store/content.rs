//! Module implement the content-addressed blob store.
//!
//! Full versions land in the `files` relation, gzipped and checksummed;
//! edit scripts land in `file_deltas`. Writes of full versions are
//! delayed, buffered per transaction and written out on commit or once
//! the buffer crosses [DELAYED_BYTES_MAX]. Reads go through a value
//! cache shared with reconstruction, so repeated walks over the same
//! delta chain stay cheap.

use cbordata::Cborize;

use std::collections::BTreeMap;

use crate::{
    hash::{FileId, Hash},
    pile::{self, Pile},
    store::{self, lru::Lru, xdelta, DeltaDirection, ReconstructionGraph},
    util, Monitor, Result,
};

/// Flush the delayed-file buffer once it holds this many bytes.
pub const DELAYED_BYTES_MAX: usize = 16 * 1024 * 1024;

/// Default size bound for the value cache.
pub const VCACHE_BYTES: usize = 8 * 1024 * 1024;

const ROW_VER: u32 = 0x0031_0001;

/// Checksummed payload row, holding either a gzipped full version or a
/// serialized edit script.
#[derive(Clone, Debug, Eq, PartialEq, Cborize)]
pub struct ChainRow {
    pub checksum: u64,
    pub data: Vec<u8>,
}

impl ChainRow {
    pub const ID: u32 = ROW_VER;

    pub fn new(data: Vec<u8>) -> ChainRow {
        ChainRow { checksum: util::checksum(&data), data }
    }

    pub fn validate(&self, what: &str) -> Result<()> {
        let checksum = util::checksum(&self.data);
        if checksum != self.checksum {
            err_at!(Corrupt, msg: "{} row, checksum {} != {}", what, checksum, self.checksum)?
        }
        Ok(())
    }
}

struct ContentGraph<'a> {
    pile: &'a Pile,
    vcache: &'a Lru<Hash, Vec<u8>>,
    delayed: &'a BTreeMap<FileId, Vec<u8>>,
}

impl<'a> ReconstructionGraph for ContentGraph<'a> {
    fn is_base(&self, node: &Hash) -> Result<bool> {
        if self.vcache.exists(node) || self.delayed.contains_key(&FileId(*node)) {
            return Ok(true);
        }
        self.pile.exists("files", &node.to_bytes())
    }

    fn nexts(&self, node: &Hash) -> Result<Vec<Hash>> {
        let prefix = pile::prefix2(&node.to_bytes());
        let mut nexts = vec![];
        for (key, _) in self.pile.iter_prefix("file_deltas", &prefix)? {
            let (_, base) = pile::split_key2(&key)?;
            nexts.push(Hash::from_bytes(&base)?);
        }
        Ok(nexts)
    }
}

/// The blob half of the delta-chain store.
pub struct ContentStore {
    vcache: Lru<Hash, Vec<u8>>,
    delayed: BTreeMap<FileId, Vec<u8>>,
    delayed_bytes: usize,
}

impl ContentStore {
    pub fn new(vcache_bytes: usize) -> ContentStore {
        ContentStore {
            vcache: Lru::new(vcache_bytes, 1),
            delayed: BTreeMap::new(),
            delayed_bytes: 0,
        }
    }

    /// Whether `id` is reachable, as a base row, a delayed write or
    /// through a delta chain.
    pub fn exists(&self, pile: &Pile, id: &FileId) -> Result<bool> {
        if self.delayed.contains_key(id) {
            return Ok(true);
        }
        if pile.exists("files", &id.inner().to_bytes())? {
            return Ok(true);
        }
        let prefix = pile::prefix2(&id.inner().to_bytes());
        Ok(!pile.iter_prefix("file_deltas", &prefix)?.is_empty())
    }

    /// Idempotent full put. The write is delayed until commit or until
    /// the buffer crosses [DELAYED_BYTES_MAX].
    pub fn put_full(&mut self, pile: &mut Pile, id: &FileId, data: Vec<u8>) -> Result<()> {
        if id.is_null() {
            err_at!(InvalidInput, msg: "null file id")?
        }
        self.put_size(pile, id, data.len() as u64)?;
        if !self.delayed.contains_key(id) && !pile.exists("files", &id.inner().to_bytes())? {
            self.delayed_bytes += data.len();
            self.delayed.insert(*id, data);
        }
        if self.delayed_bytes > DELAYED_BYTES_MAX {
            self.flush_delayed(pile)?;
        }
        Ok(())
    }

    /// Materialize the blob identified by `id`.
    pub fn get(&mut self, pile: &Pile, id: &FileId) -> Result<Vec<u8>> {
        if let Some(data) = self.delayed.get(id) {
            return Ok(data.clone());
        }
        if let Some(data) = self.vcache.fetch(&id.inner()) {
            return Ok(data);
        }

        let path = {
            let graph = ContentGraph {
                pile,
                vcache: &self.vcache,
                delayed: &self.delayed,
            };
            match store::get_reconstruction_path(id.inner(), &graph) {
                Ok(path) => path,
                Err(crate::Error::Corrupt(p, m)) => {
                    // distinguish plain absence from breakage.
                    if !self.exists(pile, id)? {
                        err_at!(NotFound, msg: "no file {}", id)?
                    }
                    return Err(crate::Error::Corrupt(p, m));
                }
                Err(err) => return Err(err),
            }
        };

        let base = *path.last().unwrap();
        let mut data = match self.vcache.fetch(&base) {
            Some(data) => data,
            None => match self.delayed.get(&FileId(base)) {
                Some(data) => data.clone(),
                None => read_base(pile, "files", &base)?,
            },
        };

        for i in (0..path.len() - 1).rev() {
            let curr = path[i + 1];
            if !self.vcache.exists(&curr) {
                self.vcache.insert_clean(curr, data.clone(), data.len());
            }
            let delta = read_delta(pile, "file_deltas", &path[i], &curr)?;
            data = xdelta::patch(&data, &delta)?;
        }

        if Hash::digest(&data) != id.inner() {
            err_at!(Corrupt, msg: "delta-reconstructed files item {} does not match hash", id)?
        }
        self.vcache.insert_clean(id.inner(), data.clone(), data.len());
        Ok(data)
    }

    /// Record that `new_id` relates to `old_id` by `delta`, storing the
    /// rows dictated by the `delta-direction` variable. A missing
    /// preimage drops the delta with a warning.
    pub fn put_file_version(
        &mut self,
        pile: &mut Pile,
        monitor: &mut dyn Monitor,
        old_id: &FileId,
        new_id: &FileId,
        delta: &xdelta::Delta,
    ) -> Result<()> {
        if old_id == new_id {
            err_at!(Fatal, msg: "delta between identical versions {}", new_id)?
        }
        if !self.exists(pile, old_id)? {
            monitor.warn(format!("file preimage '{}' missing in db", old_id));
            monitor.warn(format!("dropping delta '{}' -> '{}'", old_id, new_id));
            return Ok(());
        }

        let direction =
            DeltaDirection::from_var(pile.get_var("database", "delta-direction")?, monitor);

        let old_data = self.get(pile, old_id)?;
        let (new_data, reverse) = xdelta::invert(&old_data, delta)?;
        if xdelta::patch(&new_data, &reverse)? != old_data {
            err_at!(Fatal, msg: "inverted delta fails to reproduce {}", old_id)?
        }

        pile.begin(false)?;
        let res = self.put_version_rows(
            pile, direction, old_id, new_id, delta, &reverse, new_data,
        );
        match res {
            Ok(_) => pile.commit(),
            Err(err) => {
                pile.rollback()?;
                Err(err)
            }
        }
    }

    fn put_version_rows(
        &mut self,
        pile: &mut Pile,
        direction: DeltaDirection,
        old_id: &FileId,
        new_id: &FileId,
        delta: &xdelta::Delta,
        reverse: &xdelta::Delta,
        new_data: Vec<u8>,
    ) -> Result<()> {
        let old_key = old_id.inner().to_bytes();
        let new_key = new_id.inner().to_bytes();

        if direction.is_reverse() {
            if !self.base_stored(pile, new_id)? {
                self.put_full(pile, new_id, new_data.clone())?;
            }
            let key = pile::key2(&old_key, &new_key);
            if !pile.exists("file_deltas", &key)? {
                put_delta(pile, "file_deltas", &old_key, &new_key, reverse)?;
            }
        }
        if direction.is_forward() {
            if !self.base_stored(pile, new_id)? {
                self.put_full(pile, new_id, new_data)?;
            }
            let key = pile::key2(&new_key, &old_key);
            if !pile.exists("file_deltas", &key)? {
                put_delta(pile, "file_deltas", &new_key, &old_key, delta)?;
            }
        } else {
            // the new version is a base now, stale rows deriving it
            // from elsewhere must go.
            let prefix = pile::prefix2(&new_key);
            for (key, _) in pile.iter_prefix("file_deltas", &prefix)? {
                pile.del("file_deltas", &key)?;
            }
        }

        // a descendant replaced the old head, dispose of the old base
        // once a chain row reaches it.
        if self.base_stored(pile, old_id)? {
            let prefix = pile::prefix2(&old_key);
            if !pile.iter_prefix("file_deltas", &prefix)?.is_empty() {
                self.drop_base(pile, old_id)?;
            }
        }
        Ok(())
    }

    /// Remove the base row for `id`. Delta rows pointing at it may
    /// remain as long as another reachable chain exists.
    pub fn drop_base(&mut self, pile: &mut Pile, id: &FileId) -> Result<()> {
        if let Some(data) = self.delayed.remove(id) {
            self.delayed_bytes -= data.len();
        }
        pile.del("files", &id.inner().to_bytes())
    }

    pub fn get_size(&self, pile: &Pile, id: &FileId) -> Result<Option<u64>> {
        match pile.get("file_sizes", &id.inner().to_bytes())? {
            Some(value) => Ok(Some(util::from_cbor_bytes::<u64>(&value)?.0)),
            None => Ok(None),
        }
    }

    fn put_size(&self, pile: &mut Pile, id: &FileId, size: u64) -> Result<()> {
        let value = util::into_cbor_bytes(size)?;
        pile.set("file_sizes", &id.inner().to_bytes(), &value)
    }

    /// Whether a full version is stored or pending in the delayed
    /// buffer.
    pub fn base_stored(&self, pile: &Pile, id: &FileId) -> Result<bool> {
        if self.delayed.contains_key(id) {
            return Ok(true);
        }
        pile.exists("files", &id.inner().to_bytes())
    }

    /// Write out the delayed buffer, called before the outermost
    /// commit.
    pub fn flush_delayed(&mut self, pile: &mut Pile) -> Result<()> {
        let delayed = std::mem::take(&mut self.delayed);
        self.delayed_bytes = 0;
        for (id, data) in delayed.into_iter() {
            if FileId::digest(&data) != id {
                err_at!(Fatal, msg: "delayed file {} does not match hash", id)?
            }
            let packed = util::encode_gzip(&data)?;
            let row = util::into_cbor_bytes(ChainRow::new(packed))?;
            pile.set("files", &id.inner().to_bytes(), &row)?;
        }
        Ok(())
    }

    /// Throw the delayed buffer away, called on rollback.
    pub fn clear_delayed(&mut self) {
        self.delayed.clear();
        self.delayed_bytes = 0;
    }
}

/// Read and validate a base row, returning the unpacked payload.
pub fn read_base(pile: &Pile, table: &'static str, id: &Hash) -> Result<Vec<u8>> {
    let value = match pile.get(table, &id.to_bytes())? {
        Some(value) => value,
        None => err_at!(NotFound, msg: "no base {} in {}", id, table)?,
    };
    let row = util::from_cbor_bytes::<ChainRow>(&value)?.0;
    row.validate(table)?;
    util::decode_gzip(&row.data)
}

/// Read and validate a delta row `id <- base`.
pub fn read_delta(
    pile: &Pile,
    table: &'static str,
    id: &Hash,
    base: &Hash,
) -> Result<xdelta::Delta> {
    let key = pile::key2(&id.to_bytes(), &base.to_bytes());
    let value = match pile.get(table, &key)? {
        Some(value) => value,
        None => err_at!(NotFound, msg: "no delta {} <- {} in {}", id, base, table)?,
    };
    let row = util::from_cbor_bytes::<ChainRow>(&value)?.0;
    row.validate(table)?;
    xdelta::Delta::from_bytes(&row.data)
}

/// Store a delta row `id <- base`.
pub fn put_delta(
    pile: &mut Pile,
    table: &'static str,
    id: &[u8],
    base: &[u8],
    delta: &xdelta::Delta,
) -> Result<()> {
    let key = pile::key2(id, base);
    let row = util::into_cbor_bytes(ChainRow::new(delta.to_bytes()?))?;
    pile.set(table, &key, &row)
}

#[cfg(test)]
#[path = "content_test.rs"]
mod content_test;
