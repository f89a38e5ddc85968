//! Module implement the roster store, the delta-chain mechanism applied
//! to serialized rosters and their markings.
//!
//! Rows are keyed by revision. A base row holds the gzipped full form;
//! a delta row holds a structured roster delta, refer
//! [crate::roster::delta]. Reads go through a write-back cache: puts
//! land dirty and are serialized out on flush or eviction, so building
//! a string of revisions touches the serializer once per surviving
//! roster, not once per revision.

use std::sync::Arc;

use crate::{
    hash::{Hash, NodeId, RevisionId},
    pile::{self, Pile},
    roster::{
        delta::{self, DeltaExtractor, RosterDelta},
        io, MarkingMap, Roster,
    },
    store::{self, content::ChainRow, lru::Lru, ReconstructionGraph},
    util, Result,
};

/// Default size bound for the roster cache.
pub const ROSTER_CACHE_BYTES: usize = 8 * 1024 * 1024;

/// Entries kept even when the size bound is exceeded.
pub const ROSTER_CACHE_MIN: usize = 3;

type CachedRoster = (Arc<Roster>, Arc<MarkingMap>);

// rough footprint of a cached roster, nodes dominate.
fn footprint(roster: &Roster, marking: &MarkingMap) -> usize {
    roster.len() * 512 + marking.len() * 256
}

struct RosterGraph<'a> {
    pile: &'a Pile,
    cache: &'a Lru<RevisionId, CachedRoster>,
}

impl<'a> ReconstructionGraph for RosterGraph<'a> {
    fn is_base(&self, node: &Hash) -> Result<bool> {
        if self.cache.exists(&RevisionId(*node)) {
            return Ok(true);
        }
        self.pile.exists("rosters", &node.to_bytes())
    }

    fn nexts(&self, node: &Hash) -> Result<Vec<Hash>> {
        let prefix = pile::prefix2(&node.to_bytes());
        let mut nexts = vec![];
        for (key, _) in self.pile.iter_prefix("roster_deltas", &prefix)? {
            let (_, base) = pile::split_key2(&key)?;
            nexts.push(Hash::from_bytes(&base)?);
        }
        Ok(nexts)
    }
}

/// The roster half of the delta-chain store.
pub struct RosterStore {
    cache: Lru<RevisionId, CachedRoster>,
}

impl RosterStore {
    pub fn new(cache_bytes: usize) -> RosterStore {
        RosterStore { cache: Lru::new(cache_bytes, ROSTER_CACHE_MIN) }
    }

    /// Whether a roster is reachable for `rev`.
    pub fn exists(&self, pile: &Pile, rev: &RevisionId) -> Result<bool> {
        if self.cache.exists(rev) {
            return Ok(true);
        }
        if pile.exists("rosters", &rev.inner().to_bytes())? {
            return Ok(true);
        }
        let prefix = pile::prefix2(&rev.inner().to_bytes());
        Ok(!pile.iter_prefix("roster_deltas", &prefix)?.is_empty())
    }

    // whether a full version is (or is about to be) stored.
    fn base_stored(&self, pile: &Pile, rev: &RevisionId) -> Result<bool> {
        if self.cache.is_dirty(rev) {
            return Ok(true);
        }
        pile.exists("rosters", &rev.inner().to_bytes())
    }

    /// Fetch the roster and markings of `rev`. Takes the pile mutably
    /// because filling the cache can evict a dirty entry, which must
    /// write out before it is lost; dirty entries only exist inside a
    /// transaction, so a read outside one never writes.
    pub fn get_roster(&mut self, pile: &mut Pile, rev: &RevisionId) -> Result<CachedRoster> {
        if let Some(cached) = self.cache.fetch(rev) {
            return Ok(cached);
        }

        let path = {
            let graph = RosterGraph { pile, cache: &self.cache };
            match store::get_reconstruction_path(rev.inner(), &graph) {
                Ok(path) => path,
                Err(crate::Error::Corrupt(p, m)) => {
                    if !self.exists(pile, rev)? {
                        err_at!(NotFound, msg: "no roster for {}", rev)?
                    }
                    return Err(crate::Error::Corrupt(p, m));
                }
                Err(err) => return Err(err),
            }
        };

        let base = RevisionId(*path.last().unwrap());
        let (mut roster, mut marking) = match self.cache.fetch(&base) {
            Some((roster, marking)) => ((*roster).clone(), (*marking).clone()),
            None => {
                let text = store::content::read_base(pile, "rosters", &base.inner())?;
                let text = err_at!(Corrupt, String::from_utf8(text), "roster {}", base)?;
                io::parse_roster_text(&text)?
            }
        };

        for i in (0..path.len() - 1).rev() {
            let delta = read_roster_delta(pile, &path[i], &path[i + 1])?;
            delta::apply_roster_delta(&delta, &mut roster, &mut marking)?;
        }

        roster.check_sane_against(&marking, |_| true)?;
        let cached = (Arc::new(roster), Arc::new(marking));
        let size = footprint(&cached.0, &cached.1);
        for (rev, (roster, marking)) in self.cache.insert_clean(*rev, cached.clone(), size) {
            self.writeout(pile, &rev, &roster, &marking)?;
        }
        Ok(cached)
    }

    /// Record the roster of a fresh revision. The write lands dirty in
    /// the cache; evicted dirty entries write out immediately.
    pub fn put_roster(
        &mut self,
        pile: &mut Pile,
        rev: &RevisionId,
        roster: Arc<Roster>,
        marking: Arc<MarkingMap>,
    ) -> Result<()> {
        let size = footprint(&roster, &marking);
        let spill = self.cache.insert_dirty(*rev, (roster, marking), size);
        for (rev, (roster, marking)) in spill {
            self.writeout(pile, &rev, &roster, &marking)?;
        }
        Ok(())
    }

    // serialize, gzip, checksum and write one base row.
    fn writeout(
        &mut self,
        pile: &mut Pile,
        rev: &RevisionId,
        roster: &Roster,
        marking: &MarkingMap,
    ) -> Result<()> {
        for (nid, _) in roster.all_nodes() {
            if nid.is_temp() {
                err_at!(Fatal, msg: "temporary {:?} written to store", nid)?
            }
        }
        let text = io::roster_text(roster, marking)?;
        let packed = util::encode_gzip(text.as_bytes())?;
        let row = util::into_cbor_bytes(ChainRow::new(packed))?;
        pile.set("rosters", &rev.inner().to_bytes(), &row)
    }

    /// Write out every dirty cache entry, called before the outermost
    /// commit.
    pub fn flush(&mut self, pile: &mut Pile) -> Result<()> {
        for (rev, (roster, marking)) in self.cache.take_dirty() {
            self.writeout(pile, &rev, &roster, &marking)?;
        }
        Ok(())
    }

    /// Drop dirty entries without writing, called on rollback.
    pub fn drop_dirty(&mut self) {
        self.cache.drop_dirty();
    }

    pub fn all_clean(&self) -> bool {
        self.cache.all_clean()
    }

    /// Replace the parent's base row with a delta row against the
    /// child, keeping the parent reachable through the chain.
    pub fn deltify(
        &mut self,
        pile: &mut Pile,
        old_rev: &RevisionId,
        new_rev: &RevisionId,
    ) -> Result<()> {
        if old_rev.is_null() || old_rev == new_rev {
            return Ok(());
        }
        if !self.base_stored(pile, old_rev)? || !self.exists(pile, new_rev)? {
            return Ok(());
        }

        let (old_roster, old_marking) = self.get_roster(pile, old_rev)?;
        let (new_roster, new_marking) = self.get_roster(pile, new_rev)?;
        // the stored delta rebuilds the old state out of the new one.
        let delta = delta::delta_rosters(&new_roster, &new_marking, &old_roster, &old_marking)?;

        let text = delta::write_roster_delta(&delta);
        let packed = util::encode_gzip(text.as_bytes())?;
        let row = util::into_cbor_bytes(ChainRow::new(packed))?;
        let key = pile::key2(&old_rev.inner().to_bytes(), &new_rev.inner().to_bytes());
        pile.set("roster_deltas", &key, &row)?;

        self.cache.mark_clean(old_rev);
        pile.del("rosters", &old_rev.inner().to_bytes())?;
        Ok(())
    }

    /// Walk the delta chain of `rev` with `extractor`, refer
    /// [DeltaExtractor]. The target roster is never rebuilt unless the
    /// walk reaches the base.
    pub fn extract<V>(
        &mut self,
        pile: &mut Pile,
        rev: &RevisionId,
        extractor: &V,
    ) -> Result<V::Out>
    where
        V: DeltaExtractor,
    {
        if let Some((roster, marking)) = self.cache.fetch(rev) {
            return extractor.from_base(&roster, &marking);
        }

        let path = {
            let graph = RosterGraph { pile, cache: &self.cache };
            store::get_reconstruction_path(rev.inner(), &graph)?
        };

        for i in 0..path.len() - 1 {
            let delta = read_roster_delta(pile, &path[i], &path[i + 1])?;
            if let Some(out) = extractor.from_delta(&delta) {
                return out;
            }
        }

        let base = RevisionId(*path.last().unwrap());
        let (roster, marking) = self.get_roster(pile, &base)?;
        extractor.from_base(&roster, &marking)
    }

    /// Convenience wrapper over [delta::MarkingsExtractor].
    pub fn get_markings(
        &mut self,
        pile: &mut Pile,
        rev: &RevisionId,
        nid: &NodeId,
    ) -> Result<crate::roster::Marking> {
        self.extract(pile, rev, &delta::MarkingsExtractor { nid: *nid })
    }

    /// Convenience wrapper over [delta::ContentExtractor].
    pub fn get_file_content(
        &mut self,
        pile: &mut Pile,
        rev: &RevisionId,
        nid: &NodeId,
    ) -> Result<crate::hash::FileId> {
        self.extract(pile, rev, &delta::ContentExtractor { nid: *nid })
    }
}

fn read_roster_delta(pile: &Pile, id: &Hash, base: &Hash) -> Result<RosterDelta> {
    let key = pile::key2(&id.to_bytes(), &base.to_bytes());
    let value = match pile.get("roster_deltas", &key)? {
        Some(value) => value,
        None => err_at!(NotFound, msg: "no roster delta {} <- {}", id, base)?,
    };
    let row = util::from_cbor_bytes::<ChainRow>(&value)?.0;
    row.validate("roster_deltas")?;
    let text = util::decode_gzip(&row.data)?;
    let text = err_at!(Corrupt, String::from_utf8(text), "roster delta")?;
    delta::read_roster_delta(&text)
}

#[cfg(test)]
#[path = "rosters_test.rs"]
mod rosters_test;
