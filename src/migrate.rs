//! Module implement schema migration bookkeeping.
//!
//! Opening a pile whose schema version differs from the current one
//! fails unless the caller asked for maintenance mode; the migration
//! path then rewrites the relations and appends a schema mark. The
//! heavyweight rebuild recovers a revision graph from legacy
//! manifest-only ancestry: each manifest becomes a revision whose
//! roster is derived from its parent's, node identities carried by
//! path, and the legacy certs are re-issued against the new revision
//! identifiers.

use ed25519_dalek::Keypair;

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::{
    cert::Cert,
    db::Database,
    hash::{FileId, KeyId, ManifestId, RevisionId},
    path::FilePath,
    revision::{revision_id, Revision},
    roster::{cset::make_cset, io as roster_io, Roster, TempIdSource},
    Result,
};

/// Whether the pile on disk needs migration before normal use.
pub fn migration_needed(db: &Database) -> bool {
    db.to_schema() != crate::pile::schema_version()
}

/// A manifest from the pre-roster era: a flat map of file paths to
/// content identifiers.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyManifest {
    pub id: ManifestId,
    pub entries: Vec<(FilePath, FileId)>,
}

/// A cert from the pre-roster era, attached to a manifest. It is
/// re-signed during the rebuild, the old signatures do not carry over.
#[derive(Clone, Debug, PartialEq)]
pub struct LegacyCert {
    pub ident: ManifestId,
    pub name: String,
    pub value: String,
}

/// Legacy manifest-form ancestry, the input of [rebuild_ancestry].
#[derive(Clone, Debug, Default)]
pub struct LegacyAncestry {
    pub manifests: BTreeMap<ManifestId, LegacyManifest>,
    /// `(parent, child)` pairs over manifest identifiers.
    pub edges: Vec<(ManifestId, ManifestId)>,
    pub certs: Vec<LegacyCert>,
}

impl LegacyAncestry {
    fn parents_of(&self, id: &ManifestId) -> Vec<ManifestId> {
        self.edges
            .iter()
            .filter(|(_, child)| child == id)
            .map(|(parent, _)| *parent)
            .collect()
    }

    // children counts for a topological walk.
    fn topo_order(&self) -> Result<Vec<ManifestId>> {
        let mut indegree: BTreeMap<ManifestId, usize> =
            self.manifests.keys().map(|id| (*id, 0)).collect();
        for (parent, child) in self.edges.iter() {
            if !self.manifests.contains_key(parent) || !self.manifests.contains_key(child) {
                err_at!(InvalidInput, msg: "ancestry edge over unknown manifest")?
            }
            *indegree.get_mut(child).unwrap() += 1;
        }

        let mut queue: VecDeque<ManifestId> = indegree
            .iter()
            .filter(|(_, n)| **n == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut order = vec![];
        while let Some(id) = queue.pop_front() {
            order.push(id);
            for (parent, child) in self.edges.iter() {
                if parent == &id {
                    let n = indegree.get_mut(child).unwrap();
                    *n -= 1;
                    if *n == 0 {
                        queue.push_back(*child);
                    }
                }
            }
        }
        if order.len() != self.manifests.len() {
            err_at!(InvalidInput, msg: "legacy ancestry contains a cycle")?
        }
        Ok(order)
    }
}

// build the child's roster out of the parent's, carrying node identity
// for every path both sides know.
fn derive_roster(parent: &Roster, manifest: &LegacyManifest) -> Result<Roster> {
    let mut roster = parent.clone();
    let mut scratch = TempIdSource::new();

    if !roster.has_root() {
        let root = roster.create_dir_node(&mut scratch)?;
        roster.attach_node(root, &FilePath::root())?;
    }

    let wanted: BTreeMap<&FilePath, &FileId> =
        manifest.entries.iter().map(|(path, fid)| (path, fid)).collect();

    // drop files the manifest no longer lists, then directories that
    // became empty.
    let mut stale = vec![];
    for (nid, node) in roster.all_nodes() {
        if node.is_file() {
            let path = roster.get_name(nid)?;
            if !wanted.contains_key(&path) {
                stale.push(path);
            }
        }
    }
    for path in stale.into_iter() {
        let nid = roster.detach_node(&path)?;
        roster.drop_detached_node(&nid)?;
    }
    loop {
        let mut empties = vec![];
        for (nid, node) in roster.all_nodes() {
            if *nid == roster.root() {
                continue;
            }
            if let Some(children) = node.children() {
                if children.is_empty() {
                    empties.push(roster.get_name(nid)?);
                }
            }
        }
        if empties.is_empty() {
            break;
        }
        for path in empties.into_iter() {
            let nid = roster.detach_node(&path)?;
            roster.drop_detached_node(&nid)?;
        }
    }

    // add or update what the manifest lists.
    for (path, fid) in manifest.entries.iter() {
        // intermediate directories first.
        let comps = path.components();
        for depth in 1..comps.len() {
            let dir = FilePath::from_components(comps[..depth].to_vec());
            if !roster.has_path(&dir) {
                let nid = roster.create_dir_node(&mut scratch)?;
                roster.attach_node(nid, &dir)?;
            }
        }
        match roster.lookup(path) {
            Ok(nid) => {
                let node = roster.get_node(&nid)?;
                match node.content() {
                    Some(content) if content == fid => (),
                    Some(_) => roster.set_content(&nid, *fid)?,
                    None => err_at!(
                        InvalidInput, msg: "manifest path {} collides with a directory", path
                    )?,
                }
            }
            Err(_) => {
                let nid = roster.create_file_node(*fid, &mut scratch)?;
                roster.attach_node(nid, path)?;
            }
        }
    }

    Ok(roster)
}

/// Rebuild revisions, rosters and certs from legacy manifest ancestry.
/// Requires the referenced file contents to be present already.
/// Returns the manifest-to-revision mapping; finishes by stamping the
/// schema current.
pub fn rebuild_ancestry(
    db: &mut Database,
    legacy: &LegacyAncestry,
    signer: (KeyId, &Keypair),
) -> Result<BTreeMap<ManifestId, RevisionId>> {
    let order = legacy.topo_order()?;
    let mut mapping: BTreeMap<ManifestId, RevisionId> = BTreeMap::new();

    for manifest_id in order.iter() {
        let manifest = &legacy.manifests[manifest_id];
        let parents = legacy.parents_of(manifest_id);

        // the roster derives from the first parent, identities for the
        // remaining parents re-enter by deletion and addition, the
        // same reduction the original rebuild applied to bogus merge
        // edges.
        let base = match parents.first() {
            Some(parent) => {
                let rid = mapping[parent];
                let (roster, _) = db.get_roster(&rid)?;
                (*roster).clone()
            }
            None => Roster::new(),
        };
        let child = derive_roster(&base, manifest)?;
        let new_manifest = roster_io::manifest_id(&child)?;

        let mut rev = Revision::new(new_manifest);
        match parents.as_slice() {
            [] => {
                let cset = make_cset(&Roster::new(), &child)?;
                rev.edges.insert(RevisionId::null(), cset);
            }
            parents => {
                let seen: BTreeSet<&ManifestId> = parents.iter().collect();
                if seen.len() != parents.len() {
                    err_at!(InvalidInput, msg: "duplicate parent for {}", manifest_id)?
                }
                for parent in parents.iter() {
                    let rid = mapping[parent];
                    let (proster, _) = db.get_roster(&rid)?;
                    rev.edges.insert(rid, make_cset(&proster, &child)?);
                }
            }
        }

        let new_id = revision_id(&rev);
        if !db.put_revision(&new_id, rev)? && !db.revision_exists(&new_id)? {
            err_at!(InvalidInput, msg: "manifest {} failed to migrate", manifest_id)?
        }
        mapping.insert(*manifest_id, new_id);
    }

    let (key, keypair) = signer;
    for legacy_cert in legacy.certs.iter() {
        let rid = match mapping.get(&legacy_cert.ident) {
            Some(rid) => *rid,
            None => err_at!(
                InvalidInput, msg: "cert on unknown manifest {}", legacy_cert.ident
            )?,
        };
        let cert = Cert::make(rid, &legacy_cert.name, &legacy_cert.value, key, keypair);
        db.put_revision_cert(&cert)?;
    }

    db.pile_mut().mark_schema_current()?;
    Ok(mapping)
}

#[cfg(test)]
#[path = "migrate_test.rs"]
mod migrate_test;
