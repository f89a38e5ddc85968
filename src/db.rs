//! Module implement the database facade tying the stores together.
//!
//! A [Database] owns the pile, the two delta-chain stores, the cert
//! store and the graph, and is the single handle higher layers talk
//! to. Every mutating operation runs inside a transaction; the
//! outermost commit flushes the delayed-file buffer and the dirty
//! roster cache before the engine commit, a rollback discards both.
//!
//! Storing a revision walks five phases: validate prerequisites, write
//! the revision row and ancestry edges, rebuild and store the roster
//! while checking the manifest, deltify the parents' file versions
//! toward the child, and assign the height.

use lazy_static::lazy_static;
use regex::Regex;

use std::{collections::BTreeSet, ffi, sync::Arc};

use crate::{
    cert::{self, Cert, CertStore, BRANCH_CERT},
    graph::Graph,
    hash::{EpochId, FileId, Hash, KeyId, RevisionId},
    pile::{self, OpenMode, Pile},
    revision::{self, Revision},
    roster::{
        cset::Cset,
        io as roster_io, mark, MarkingMap, Roster, TempIdSource,
    },
    store::{xdelta, ContentStore, RosterStore},
    txn::{CheckpointConfig, Checkpointer},
    util, Monitor, Quiet, Result,
};

lazy_static! {
    // branch names with netsync meta characters draw a warning.
    static ref BRANCH_META: Regex = Regex::new(r"[?,;*%+{}\[\]!^]").unwrap();
}

/// Tunables for a database handle.
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub vcache_bytes: usize,
    pub roster_cache_bytes: usize,
    pub checkpoint: CheckpointConfig,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            vcache_bytes: crate::store::content::VCACHE_BYTES,
            roster_cache_bytes: crate::store::rosters::ROSTER_CACHE_BYTES,
            checkpoint: CheckpointConfig::default(),
        }
    }
}

/// Handle over one pile and its caches.
pub struct Database {
    pile: Pile,
    content: ContentStore,
    rosters: RosterStore,
    certs: CertStore,
    graph: Graph,
    config: Config,
    monitor: Box<dyn Monitor>,
}

impl Database {
    /// Open or create a database under `dir`. `mode` gates the schema
    /// check, refer [OpenMode].
    pub fn open(
        dir: &ffi::OsStr,
        name: &str,
        mode: OpenMode,
        config: Config,
        monitor: Box<dyn Monitor>,
    ) -> Result<Database> {
        let pile = Pile::open(dir, name, mode)?;
        Ok(Database {
            pile,
            content: ContentStore::new(config.vcache_bytes),
            rosters: RosterStore::new(config.roster_cache_bytes),
            certs: CertStore::new(),
            graph: Graph::new(),
            config,
            monitor,
        })
    }

    /// Open with defaults and silent diagnostics.
    pub fn open_quiet(dir: &ffi::OsStr, name: &str) -> Result<Database> {
        Database::open(dir, name, OpenMode::Normal, Config::default(), Box::new(Quiet))
    }

    pub fn to_schema(&self) -> String {
        self.pile.to_schema()
    }

    pub fn to_creator_code(&self) -> u32 {
        self.pile.to_creator_code()
    }

    pub fn get_var(&self, domain: &str, name: &str) -> Result<Option<String>> {
        self.pile.get_var(domain, name)
    }

    pub fn set_var(&mut self, domain: &str, name: &str, value: &str) -> Result<()> {
        self.pile.set_var(domain, name, value)
    }

    pub(crate) fn pile_mut(&mut self) -> &mut Pile {
        &mut self.pile
    }
}

// transaction discipline.
impl Database {
    pub fn begin(&mut self) -> Result<()> {
        self.pile.begin(false)
    }

    pub fn begin_exclusive(&mut self) -> Result<()> {
        self.pile.begin(true)
    }

    /// Commit the innermost transaction. The outermost commit flushes
    /// the delayed buffers first.
    pub fn commit(&mut self) -> Result<()> {
        if self.pile.txn_depth() == 1 {
            self.flush_pending()?;
        }
        self.pile.commit()
    }

    /// Roll back the innermost transaction; leaving the outermost one
    /// discards the delayed buffers.
    pub fn rollback(&mut self) -> Result<()> {
        self.pile.rollback()?;
        if !self.pile.in_txn() {
            self.content.clear_delayed();
            self.rosters.drop_dirty();
        }
        Ok(())
    }

    fn flush_pending(&mut self) -> Result<()> {
        self.content.flush_delayed(&mut self.pile)?;
        self.rosters.flush(&mut self.pile)
    }

    /// Run `body` inside a transaction, commit on success, roll back
    /// on error.
    pub fn with_txn<T>(
        &mut self,
        exclusive: bool,
        body: impl FnOnce(&mut Database) -> Result<T>,
    ) -> Result<T> {
        self.pile.begin(exclusive)?;
        match body(self) {
            Ok(val) => {
                self.commit()?;
                Ok(val)
            }
            Err(err) => {
                self.rollback().ok();
                Err(err)
            }
        }
    }

    /// Split a long insertion, refer [Checkpointer]. Flushes the
    /// delayed buffers before the intermediate commit so nothing is
    /// lost to a later rollback.
    pub fn maybe_checkpoint(
        &mut self,
        ckpt: &mut Checkpointer,
        bytes: usize,
    ) -> Result<bool> {
        if !ckpt.note(bytes) {
            return Ok(false);
        }
        if self.pile.txn_depth() != 1 {
            err_at!(Fatal, msg: "checkpoint with {} transactions", self.pile.txn_depth())?
        }
        self.flush_pending()?;
        self.pile.commit()?;
        self.pile.begin(ckpt.is_exclusive())?;
        Ok(true)
    }

    pub fn checkpoint_config(&self) -> CheckpointConfig {
        self.config.checkpoint
    }
}

// files.
impl Database {
    pub fn file_version_exists(&self, id: &FileId) -> Result<bool> {
        self.content.exists(&self.pile, id)
    }

    pub fn get_file_version(&mut self, id: &FileId) -> Result<Vec<u8>> {
        self.content.get(&self.pile, id)
    }

    pub fn get_file_size(&self, id: &FileId) -> Result<Option<u64>> {
        self.content.get_size(&self.pile, id)
    }

    /// Idempotent full put of file content.
    pub fn put_file(&mut self, id: &FileId, data: Vec<u8>) -> Result<()> {
        self.with_txn(false, |db| db.content.put_full(&mut db.pile, id, data))
    }

    /// Record a new file version as a delta over an existing one.
    pub fn put_file_version(
        &mut self,
        old_id: &FileId,
        new_id: &FileId,
        delta: &xdelta::Delta,
    ) -> Result<()> {
        self.pile.begin(false)?;
        let res = self.content.put_file_version(
            &mut self.pile,
            self.monitor.as_mut(),
            old_id,
            new_id,
            delta,
        );
        match res {
            Ok(_) => self.commit(),
            Err(err) => {
                self.rollback().ok();
                Err(err)
            }
        }
    }
}

// keys and certs.
impl Database {
    pub fn put_key(&mut self, name: &str, public: &ed25519_dalek::PublicKey) -> Result<KeyId> {
        self.pile.begin(false)?;
        let res = cert::put_key(&mut self.pile, name, public);
        match res {
            Ok(id) => {
                self.commit()?;
                Ok(id)
            }
            Err(err) => {
                self.rollback().ok();
                Err(err)
            }
        }
    }

    pub fn get_key(&self, id: &KeyId) -> Result<(String, ed25519_dalek::PublicKey)> {
        cert::get_key(&self.pile, id)
    }

    /// Store a cert, maintaining the branch-leaf index for branch
    /// certs. Returns false when the cert is already present or its
    /// revision is missing.
    pub fn put_revision_cert(&mut self, cert: &Cert) -> Result<bool> {
        if self.certs.cert_exists(&self.pile, cert)? {
            self.monitor.info(format!(
                "revision cert on '{}' already exists in db", cert.ident
            ));
            return Ok(false);
        }
        if !self.revision_exists(&cert.ident)? {
            self.monitor.warn(format!("cert revision {} does not exist in db", cert.ident));
            self.monitor.warn("dropping cert".to_string());
            return Ok(false);
        }

        if cert.name == BRANCH_CERT
            && (BRANCH_META.is_match(&cert.value) || cert.value.starts_with('-'))
        {
            self.monitor.warn(format!(
                "the branch name '{}' contains meta characters (one or more \
                 of '?,;*%+{{}}[]!^') or starts with a dash, which might cause \
                 malfunctions when used in a netsync branch pattern",
                cert.value
            ));
        }

        self.with_txn(false, |db| {
            db.certs.put_cert_row(&mut db.pile, cert)?;
            if cert.name == BRANCH_CERT {
                db.record_as_branch_leaf(&cert.value, &cert.ident)?;
            }
            Ok(true)
        })
    }

    pub fn get_revision_certs(&self, rev: &RevisionId) -> Result<Vec<Cert>> {
        self.certs.get_certs(&self.pile, rev)
    }

    pub fn get_revision_certs_named(
        &self,
        rev: &RevisionId,
        name: &str,
    ) -> Result<Vec<Cert>> {
        self.certs.get_certs_named(&self.pile, rev, name)
    }

    /// Filter certs through signature checks and the trust callback,
    /// refer [CertStore::erase_bogus_certs].
    pub fn erase_bogus_certs(
        &mut self,
        trust_fn: &dyn Fn(&[String], &RevisionId, &str, &str) -> bool,
        certs: Vec<Cert>,
    ) -> Result<Vec<Cert>> {
        self.certs.erase_bogus_certs(&self.pile, self.monitor.as_mut(), trust_fn, certs)
    }

    /// Maintenance: delete stored certs whose signature fails.
    pub fn fix_bad_certs(&mut self) -> Result<usize> {
        self.pile.begin(false)?;
        let res = self.certs.fix_bad_certs(&mut self.pile, self.monitor.as_mut());
        match res {
            Ok(n) => {
                self.commit()?;
                Ok(n)
            }
            Err(err) => {
                self.rollback().ok();
                Err(err)
            }
        }
    }
}

// branch leaves and epochs.
impl Database {
    /// Current heads of `branch`.
    pub fn get_branch_leaves(&self, branch: &str) -> Result<BTreeSet<RevisionId>> {
        let prefix = pile::prefix2(branch.as_bytes());
        let mut leaves = BTreeSet::new();
        for (key, _) in self.pile.iter_prefix("branch_leaves", &prefix)? {
            let (_, rev) = pile::split_key2(&key)?;
            leaves.insert(RevisionId::from(Hash::from_bytes(&rev)?));
        }
        Ok(leaves)
    }

    fn record_as_branch_leaf(&mut self, branch: &str, rev: &RevisionId) -> Result<()> {
        let parents = self.graph.parents(&self.pile, rev)?;
        let mut current_leaves = self.get_branch_leaves(branch)?;

        if current_leaves.contains(rev) {
            return Ok(()); // must be adding a second branch cert
        }

        let mut all_parents_were_leaves = true;
        let mut some_ancestor_was_leaf = false;
        for parent in parents.iter() {
            if current_leaves.remove(parent) {
                some_ancestor_was_leaf = true;
                self.del_branch_leaf(branch, parent)?;
            } else {
                all_parents_were_leaves = false;
            }
        }

        // needed when the branch skips a generation:
        //   r1 (branch1)  ->  r2 (branch2)  ->  r3 (branch1)
        if !all_parents_were_leaves {
            for leaf in current_leaves.iter() {
                if self.graph.is_ancestor(&self.pile, leaf, rev)? {
                    some_ancestor_was_leaf = true;
                    self.del_branch_leaf(branch, leaf)?;
                }
            }
        }

        // are we really a leaf, or an ancestor of an existing one?
        if !some_ancestor_was_leaf {
            for leaf in current_leaves.iter() {
                if self.graph.is_ancestor(&self.pile, rev, leaf)? {
                    return Ok(());
                }
            }
        }

        let key = pile::key2(branch.as_bytes(), &rev.inner().to_bytes());
        self.pile.set("branch_leaves", &key, b"")
    }

    fn del_branch_leaf(&mut self, branch: &str, rev: &RevisionId) -> Result<()> {
        let key = pile::key2(branch.as_bytes(), &rev.inner().to_bytes());
        self.pile.del("branch_leaves", &key)
    }

    /// All revisions carrying a `branch = name` cert.
    pub fn get_branch_revisions(&self, branch: &str) -> Result<BTreeSet<RevisionId>> {
        let mut revs = BTreeSet::new();
        for cert in self.certs.all_certs(&self.pile)? {
            if cert.name == BRANCH_CERT && cert.value == branch {
                revs.insert(cert.ident);
            }
        }
        Ok(revs)
    }

    /// Maintenance: rebuild the leaf index of one branch from the
    /// branch certs.
    pub fn recalc_branch_leaves(&mut self, branch: &str) -> Result<()> {
        self.with_txn(false, |db| {
            let prefix = pile::prefix2(branch.as_bytes());
            for (key, _) in db.pile.iter_prefix("branch_leaves", &prefix)? {
                db.pile.del("branch_leaves", &key)?;
            }
            let revs = db.get_branch_revisions(branch)?;
            let heads = db.graph.erase_ancestors(&db.pile, &revs)?;
            for rev in heads.iter() {
                let key = pile::key2(branch.as_bytes(), &rev.inner().to_bytes());
                db.pile.set("branch_leaves", &key, b"")?;
            }
            Ok(())
        })
    }

    pub fn get_branch_epoch(&self, branch: &str) -> Result<Option<EpochId>> {
        match self.pile.get("branch_epochs", branch.as_bytes())? {
            Some(value) => Ok(Some(EpochId::from(Hash::from_bytes(&value)?))),
            None => Ok(None),
        }
    }

    pub fn set_branch_epoch(&mut self, branch: &str, epoch: &EpochId) -> Result<()> {
        self.with_txn(false, |db| {
            db.pile.set("branch_epochs", branch.as_bytes(), &epoch.inner().to_bytes())
        })
    }
}

// revisions and rosters.
impl Database {
    pub fn revision_exists(&self, rev: &RevisionId) -> Result<bool> {
        if rev.is_null() {
            return Ok(false);
        }
        self.pile.exists("revisions", &rev.inner().to_bytes())
    }

    pub fn get_revision(&self, rev: &RevisionId) -> Result<Revision> {
        if rev.is_null() {
            err_at!(InvalidInput, msg: "null revision id")?
        }
        let value = match self.pile.get("revisions", &rev.inner().to_bytes())? {
            Some(value) => value,
            None => err_at!(NotFound, msg: "no revision {}", rev)?,
        };
        let text = util::decode_gzip(&value)?;
        let text = err_at!(Corrupt, String::from_utf8(text), "revision {}", rev)?;
        if RevisionId::digest(text.as_bytes()) != *rev {
            err_at!(Corrupt, msg: "revisions row {} does not match hash", rev)?
        }
        revision::read_revision(&text)
    }

    pub fn get_rev_height(&mut self, rev: &RevisionId) -> Result<crate::graph::RevHeight> {
        self.graph.get_rev_height(&self.pile, rev)
    }

    pub fn get_revision_parents(&self, rev: &RevisionId) -> Result<Vec<RevisionId>> {
        self.graph.parents(&self.pile, rev)
    }

    pub fn get_revision_children(&self, rev: &RevisionId) -> Result<Vec<RevisionId>> {
        self.graph.children(&self.pile, rev)
    }

    pub fn get_leaves(&self) -> Result<BTreeSet<RevisionId>> {
        self.graph.leaves(&self.pile)
    }

    pub fn is_ancestor(&mut self, a: &RevisionId, b: &RevisionId) -> Result<bool> {
        self.graph.is_ancestor(&self.pile, a, b)
    }

    pub fn get_uncommon_ancestors(
        &mut self,
        a: &RevisionId,
        b: &RevisionId,
    ) -> Result<(BTreeSet<RevisionId>, BTreeSet<RevisionId>)> {
        self.graph.get_uncommon_ancestors(&self.pile, a, b)
    }

    pub fn get_common_ancestors(
        &self,
        revs: &BTreeSet<RevisionId>,
    ) -> Result<BTreeSet<RevisionId>> {
        self.graph.common_ancestors(&self.pile, revs)
    }

    /// Roster and markings at `rev`; the null revision yields the
    /// empty roster.
    pub fn get_roster(&mut self, rev: &RevisionId) -> Result<(Arc<Roster>, Arc<MarkingMap>)> {
        if rev.is_null() {
            return Ok((Arc::new(Roster::new()), Arc::new(MarkingMap::new())));
        }
        self.rosters.get_roster(&mut self.pile, rev)
    }

    pub fn get_manifest_id(&self, rev: &RevisionId) -> Result<crate::hash::ManifestId> {
        Ok(self.get_revision(rev)?.new_manifest)
    }

    /// Store a revision: validate, write row and ancestry, rebuild and
    /// store the roster, deltify parent files, assign the height.
    /// Returns false, without storing, for duplicates and missing
    /// prerequisites.
    pub fn put_revision(&mut self, new_id: &RevisionId, rev: Revision) -> Result<bool> {
        if new_id.is_null() {
            err_at!(InvalidInput, msg: "null revision id")?
        }
        if self.revision_exists(new_id)? {
            self.monitor.info(format!("revision '{}' already exists in db", new_id));
            return Ok(false);
        }
        rev.check_sane()?;

        let text = revision::write_revision(&rev);
        if RevisionId::digest(text.as_bytes()) != *new_id {
            err_at!(InvalidInput, msg: "revision does not hash to {}", new_id)?
        }

        // phase 1: confirm the revision makes sense and the needed
        // files actually exist.
        for (parent, cset) in rev.edges.iter() {
            if !parent.is_null() && !self.revision_exists(parent)? {
                self.monitor.warn(format!("missing prerequisite revision {}", parent));
                self.monitor.warn(format!("dropping revision {}", new_id));
                return Ok(false);
            }
            for (path, content) in cset.files_added.iter() {
                if !self.file_version_exists(content)? {
                    self.monitor.warn(format!(
                        "missing prerequisite file {} for {}", content, path
                    ));
                    self.monitor.warn(format!("dropping revision {}", new_id));
                    return Ok(false);
                }
            }
            for (path, (old, new)) in cset.deltas_applied.iter() {
                if old.is_null() || new.is_null() {
                    err_at!(InvalidInput, msg: "null file id in delta at {}", path)?
                }
                for id in [old, new].iter() {
                    if !self.file_version_exists(id)? {
                        self.monitor.warn(format!(
                            "missing prerequisite file {} for {}", id, path
                        ));
                        self.monitor.warn(format!("dropping revision {}", new_id));
                        return Ok(false);
                    }
                }
            }
        }

        let parents = rev.parents();
        self.with_txn(false, |db| {
            // phase 2: the revision row and its ancestry edges.
            let packed = util::encode_gzip(text.as_bytes())?;
            db.pile.set("revisions", &new_id.inner().to_bytes(), &packed)?;
            for parent in rev.edges.keys() {
                db.graph.put_ancestry_edge(&mut db.pile, parent, new_id)?;
            }

            // phase 3: construct and store the roster, checking the
            // manifest as it goes.
            if !db.rosters.exists(&db.pile, new_id)? {
                db.put_roster_for_revision(new_id, &rev)?;
            }

            // phase 4: rewrite parent files as deltas against ours.
            db.deltify_revision(&rev)?;

            // phase 5: the height.
            db.graph.put_height_for_revision(&mut db.pile, new_id, &parents)?;
            Ok(true)
        })
    }

    fn put_roster_for_revision(&mut self, new_id: &RevisionId, rev: &Revision) -> Result<()> {
        let (roster, marking) = self.make_roster_for_revision(new_id, rev)?;
        let manifest = roster_io::manifest_id(&roster)?;
        if manifest != rev.new_manifest {
            err_at!(InvalidInput, msg: "revision {} contains incorrect manifest id", new_id)?
        }
        roster.check_sane_against(&marking, |r| {
            *r == *new_id || self.pile.exists("revisions", &r.inner().to_bytes()).unwrap_or(false)
        })?;

        let parents = rev.parents();
        self.rosters.put_roster(&mut self.pile, new_id, Arc::new(roster), Arc::new(marking))?;
        for parent in parents.iter() {
            self.rosters.deltify(&mut self.pile, parent, new_id)?;
        }
        Ok(())
    }

    /// Rebuild the roster a revision describes, applying each edge's
    /// cset to its parent's roster and merging markings.
    pub fn make_roster_for_revision(
        &mut self,
        new_id: &RevisionId,
        rev: &Revision,
    ) -> Result<(Roster, MarkingMap)> {
        let edges: Vec<(RevisionId, Cset)> =
            rev.edges.iter().map(|(p, c)| (*p, c.clone())).collect();

        match edges.as_slice() {
            [(parent, cset)] if parent.is_null() => {
                let mut roster = Roster::new();
                cset.apply_to(&mut roster, &mut self.pile)?;
                let marking = mark::mark_roster_with_no_parents(*new_id, &roster);
                Ok((roster, marking))
            }
            [(parent, cset)] => {
                let (proster, pmarking) = self.rosters.get_roster(&mut self.pile, parent)?;
                let mut roster = (*proster).clone();
                cset.apply_to(&mut roster, &mut self.pile)?;
                let marking =
                    mark::mark_roster_with_one_parent(&proster, &pmarking, &roster, *new_id)?;
                Ok((roster, marking))
            }
            [(lparent, lcset), (rparent, rcset)] => {
                let (lroster, lmarking) = self.rosters.get_roster(&mut self.pile, lparent)?;
                let (rroster, rmarking) = self.rosters.get_roster(&mut self.pile, rparent)?;

                let mut left = (*lroster).clone();
                let mut right = (*rroster).clone();
                let mut scratch = TempIdSource::new();
                lcset.apply_to(&mut left, &mut scratch)?;
                rcset.apply_to(&mut right, &mut scratch)?;
                mark::unify_rosters(&mut left, &mut right, &mut self.pile)?;

                let marking = mark::mark_merge_roster(
                    &lroster, &lmarking, &rroster, &rmarking, &left, *new_id,
                )?;
                Ok((left, marking))
            }
            _ => err_at!(InvalidInput, msg: "revision with {} edges", edges.len()),
        }
    }

    // make sure parent file versions are replaced with deltas against
    // this revision's versions.
    fn deltify_revision(&mut self, rev: &Revision) -> Result<()> {
        for cset in rev.edges.values() {
            for (old_id, new_fid) in cset.deltas_applied.values() {
                let has_base = self.content.base_stored(&self.pile, old_id)?;
                if !has_base || !self.file_version_exists(new_fid)? {
                    continue;
                }
                let old_data = self.content.get(&self.pile, old_id)?;
                let new_data = self.content.get(&self.pile, new_fid)?;
                let delta = xdelta::diff(&old_data, &new_data);

                self.content.drop_base(&mut self.pile, new_fid)?;
                let prefix = pile::prefix2(&new_fid.inner().to_bytes());
                for (key, _) in self.pile.iter_prefix("file_deltas", &prefix)? {
                    self.pile.del("file_deltas", &key)?;
                }
                self.content.put_file_version(
                    &mut self.pile,
                    self.monitor.as_mut(),
                    old_id,
                    new_fid,
                    &delta,
                )?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[path = "db_test.rs"]
mod db_test;
