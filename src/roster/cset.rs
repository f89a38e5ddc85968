//! Module implement changesets, the functions that rewrite one roster
//! into another.
//!
//! A cset is a value; applying it walks a fixed order: delete, rename,
//! add-dir, add-file, delta, attr-clear, attr-set. Every step must be a
//! legal operation on the intermediate roster, anything else is a
//! structural error. [make_cset] computes the minimal cset between two
//! rosters using node identity, so a rename is never mistaken for a
//! delete plus add.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    basic_io::{Parser, Printer, Stanza},
    hash::FileId,
    path::FilePath,
    roster::{AttrKey, AttrValue, NodeIdSource, Roster},
    Result,
};

use std::str::FromStr;

/// A changeset. Field order mirrors application order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Cset {
    pub nodes_deleted: BTreeSet<FilePath>,
    pub nodes_renamed: BTreeMap<FilePath, FilePath>,
    pub dirs_added: BTreeSet<FilePath>,
    pub files_added: BTreeMap<FilePath, FileId>,
    pub deltas_applied: BTreeMap<FilePath, (FileId, FileId)>,
    pub attrs_cleared: BTreeSet<(FilePath, AttrKey)>,
    pub attrs_set: BTreeMap<(FilePath, AttrKey), AttrValue>,
}

impl Cset {
    pub fn new() -> Cset {
        Cset::default()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes_deleted.is_empty()
            && self.nodes_renamed.is_empty()
            && self.dirs_added.is_empty()
            && self.files_added.is_empty()
            && self.deltas_applied.is_empty()
            && self.attrs_cleared.is_empty()
            && self.attrs_set.is_empty()
    }

    /// Internal consistency of the cset value itself.
    pub fn check_sane(&self) -> Result<()> {
        let mut rename_targets = BTreeSet::new();
        for (src, dst) in self.nodes_renamed.iter() {
            if self.nodes_deleted.contains(src) {
                err_at!(InvalidInput, msg: "{} both renamed and deleted", src)?
            }
            if !rename_targets.insert(dst.clone()) {
                err_at!(InvalidInput, msg: "rename target {} duplicated", dst)?
            }
        }
        for path in self.dirs_added.iter() {
            if self.files_added.contains_key(path) {
                err_at!(InvalidInput, msg: "{} added as file and directory", path)?
            }
            if rename_targets.contains(path) {
                err_at!(InvalidInput, msg: "{} added and renamed to", path)?
            }
        }
        for path in self.files_added.keys() {
            if rename_targets.contains(path) {
                err_at!(InvalidInput, msg: "{} added and renamed to", path)?
            }
            if self.deltas_applied.contains_key(path) {
                err_at!(InvalidInput, msg: "{} both added and patched", path)?
            }
        }
        Ok(())
    }

    /// Apply this cset to `roster` in place. Fresh nodes are allocated
    /// from `nis`, the persistent counter for real rosters or the
    /// temporary range for scratch rosters.
    pub fn apply_to(&self, roster: &mut Roster, nis: &mut dyn NodeIdSource) -> Result<()> {
        self.check_sane()?;

        // deletes, children before parents.
        for path in self.nodes_deleted.iter().rev() {
            let nid = roster.detach_node(path)?;
            roster.drop_detached_node(&nid)?;
        }

        // renames, all sources detached before any target attaches so
        // pivots and swaps work; deeper sources first, their lookup
        // still needs the enclosing directories in place.
        let mut detached = vec![];
        for (src, dst) in self.nodes_renamed.iter().rev() {
            detached.push((roster.detach_node(src)?, dst.clone()));
        }
        detached.sort_by(|a, b| a.1.cmp(&b.1));
        for (nid, dst) in detached.into_iter() {
            roster.attach_node(nid, &dst)?;
        }

        for path in self.dirs_added.iter() {
            let nid = roster.create_dir_node(nis)?;
            roster.attach_node(nid, path)?;
        }
        for (path, content) in self.files_added.iter() {
            let nid = roster.create_file_node(*content, nis)?;
            roster.attach_node(nid, path)?;
        }

        for (path, (old, new)) in self.deltas_applied.iter() {
            let nid = roster.lookup(path)?;
            let node = roster.get_node(&nid)?;
            match node.content() {
                Some(content) if content == old => (),
                Some(content) => err_at!(
                    InvalidInput, msg: "delta preimage mismatch at {}, {} != {}",
                    path, content, old
                )?,
                None => err_at!(InvalidInput, msg: "patching directory {}", path)?,
            }
            roster.set_content(&nid, *new)?;
        }

        for (path, key) in self.attrs_cleared.iter() {
            let nid = roster.lookup(path)?;
            roster.clear_attr(&nid, key)?;
        }
        for ((path, key), value) in self.attrs_set.iter() {
            let nid = roster.lookup(path)?;
            roster.set_attr(&nid, key, value)?;
        }
        Ok(())
    }

    /// Render as grouped, sorted stanzas.
    pub fn push_stanzas(&self, pr: &mut Printer) {
        for path in self.nodes_deleted.iter() {
            let mut st = Stanza::new();
            st.push_str("delete", &path.to_string());
            pr.push_stanza(&st);
        }
        for (src, dst) in self.nodes_renamed.iter() {
            let mut st = Stanza::new();
            st.push_str("rename", &src.to_string());
            st.push_str("to", &dst.to_string());
            pr.push_stanza(&st);
        }
        for path in self.dirs_added.iter() {
            let mut st = Stanza::new();
            st.push_str("add_dir", &path.to_string());
            pr.push_stanza(&st);
        }
        for (path, content) in self.files_added.iter() {
            let mut st = Stanza::new();
            st.push_str("add_file", &path.to_string());
            st.push_hex("content", &content.to_hex());
            pr.push_stanza(&st);
        }
        for (path, (old, new)) in self.deltas_applied.iter() {
            let mut st = Stanza::new();
            st.push_str("patch", &path.to_string());
            st.push_hex("from", &old.to_hex());
            st.push_hex("to", &new.to_hex());
            pr.push_stanza(&st);
        }
        for (path, key) in self.attrs_cleared.iter() {
            let mut st = Stanza::new();
            st.push_str("clear", &path.to_string());
            st.push_str("attr", key);
            pr.push_stanza(&st);
        }
        for ((path, key), value) in self.attrs_set.iter() {
            let mut st = Stanza::new();
            st.push_str("set", &path.to_string());
            st.push_str("attr", key);
            st.push_str("value", value);
            pr.push_stanza(&st);
        }
    }

    /// Parse the stanza groups emitted by [Cset::push_stanzas],
    /// stopping at the first foreign symbol.
    pub fn parse(pars: &mut Parser) -> Result<Cset> {
        let mut cset = Cset::new();
        loop {
            if pars.symp("delete") {
                pars.esym("delete")?;
                cset.nodes_deleted.insert(FilePath::from_str(&pars.str_val()?)?);
            } else if pars.symp("rename") {
                pars.esym("rename")?;
                let src = FilePath::from_str(&pars.str_val()?)?;
                pars.esym("to")?;
                let dst = FilePath::from_str(&pars.str_val()?)?;
                cset.nodes_renamed.insert(src, dst);
            } else if pars.symp("add_dir") {
                pars.esym("add_dir")?;
                cset.dirs_added.insert(FilePath::from_str(&pars.str_val()?)?);
            } else if pars.symp("add_file") {
                pars.esym("add_file")?;
                let path = FilePath::from_str(&pars.str_val()?)?;
                pars.esym("content")?;
                let content = FileId::from_str(&pars.hex_val()?)?;
                cset.files_added.insert(path, content);
            } else if pars.symp("patch") {
                pars.esym("patch")?;
                let path = FilePath::from_str(&pars.str_val()?)?;
                pars.esym("from")?;
                let old = FileId::from_str(&pars.hex_val()?)?;
                pars.esym("to")?;
                let new = FileId::from_str(&pars.hex_val()?)?;
                cset.deltas_applied.insert(path, (old, new));
            } else if pars.symp("clear") {
                pars.esym("clear")?;
                let path = FilePath::from_str(&pars.str_val()?)?;
                pars.esym("attr")?;
                cset.attrs_cleared.insert((path, pars.str_val()?));
            } else if pars.symp("set") {
                pars.esym("set")?;
                let path = FilePath::from_str(&pars.str_val()?)?;
                pars.esym("attr")?;
                let key = pars.str_val()?;
                pars.esym("value")?;
                cset.attrs_set.insert((path, key), pars.str_val()?);
            } else {
                break;
            }
        }
        Ok(cset)
    }
}

/// Compute the minimal cset rewriting `from` into `to`, distinguishing
/// rename from delete plus add by node identity.
pub fn make_cset(from: &Roster, to: &Roster) -> Result<Cset> {
    let mut cset = Cset::new();

    for (nid, _) in from.all_nodes() {
        if !to.has_node(nid) {
            cset.nodes_deleted.insert(from.get_name(nid)?);
        }
    }

    for (nid, to_node) in to.all_nodes() {
        let to_path = to.get_name(nid)?;
        if !from.has_node(nid) {
            match to_node.content() {
                Some(content) => {
                    cset.files_added.insert(to_path.clone(), *content);
                }
                None => {
                    cset.dirs_added.insert(to_path.clone());
                }
            }
            // a freshly added node carries its attrs as plain sets.
            for (key, value) in to_node.live_attrs() {
                cset.attrs_set.insert((to_path.clone(), key), value);
            }
            continue;
        }

        let from_node = from.get_node(nid)?;
        if from_node.is_dir() != to_node.is_dir() {
            err_at!(Fatal, msg: "node {:?} changed kind", nid)?
        }

        if from_node.parent != to_node.parent || from_node.name != to_node.name {
            cset.nodes_renamed.insert(from.get_name(nid)?, to_path.clone());
        }

        match (from_node.content(), to_node.content()) {
            (Some(old), Some(new)) if old != new => {
                cset.deltas_applied.insert(to_path.clone(), (*old, *new));
            }
            _ => (),
        }

        let keys: BTreeSet<&AttrKey> =
            from_node.attrs.keys().chain(to_node.attrs.keys()).collect();
        for key in keys {
            let from_attr = from_node.attrs.get(key).cloned().unwrap_or((false, String::new()));
            let to_attr = to_node.attrs.get(key).cloned().unwrap_or((false, String::new()));
            match (from_attr.0, to_attr.0) {
                (true, false) => {
                    cset.attrs_cleared.insert((to_path.clone(), key.clone()));
                }
                (_, true) if from_attr != to_attr => {
                    cset.attrs_set.insert((to_path.clone(), key.clone()), to_attr.1);
                }
                _ => (),
            }
        }
    }

    Ok(cset)
}

#[cfg(test)]
#[path = "cset_test.rs"]
mod cset_test;
