//! Module implement the revision value.
//!
//! A revision records the manifest hash of its resulting roster and one
//! edge per parent, each edge carrying the cset that rewrites that
//! parent's roster into this revision's roster. A root revision has a
//! single edge from the null revision. The identifier of a revision is
//! the hash of its canonical serialization.

use std::{collections::BTreeMap, str::FromStr};

use crate::{
    basic_io::{Parser, Printer, Stanza},
    hash::{ManifestId, RevisionId},
    roster::Cset,
    Result,
};

/// A revision. Edges iterate in parent-id order, making the canonical
/// form deterministic.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Revision {
    pub new_manifest: ManifestId,
    pub edges: BTreeMap<RevisionId, Cset>,
}

impl Revision {
    pub fn new(new_manifest: ManifestId) -> Revision {
        Revision { new_manifest, edges: BTreeMap::new() }
    }

    pub fn is_root(&self) -> bool {
        self.edges.len() == 1 && self.edges.keys().next().map(|p| p.is_null()) == Some(true)
    }

    /// Parents of this revision, the null parent of a root excluded.
    pub fn parents(&self) -> Vec<RevisionId> {
        self.edges.keys().filter(|p| !p.is_null()).copied().collect()
    }

    pub fn check_sane(&self) -> Result<()> {
        if self.edges.is_empty() {
            err_at!(InvalidInput, msg: "revision without edges")?
        }
        if self.new_manifest.is_null() {
            err_at!(InvalidInput, msg: "revision without a manifest")?
        }
        if self.edges.len() > 1 && self.edges.keys().any(|p| p.is_null()) {
            err_at!(InvalidInput, msg: "null parent on a merge revision")?
        }
        for cset in self.edges.values() {
            cset.check_sane()?;
        }
        Ok(())
    }
}

/// Canonical serialization.
pub fn write_revision(rev: &Revision) -> String {
    let mut pr = Printer::new();

    let mut st = Stanza::new();
    st.push_str("format_version", "1");
    pr.push_stanza(&st);

    let mut st = Stanza::new();
    st.push_hex("new_manifest", &rev.new_manifest.to_hex());
    pr.push_stanza(&st);

    for (parent, cset) in rev.edges.iter() {
        let mut st = Stanza::new();
        let hex = if parent.is_null() { String::new() } else { parent.to_hex() };
        st.push_hex("old_revision", &hex);
        pr.push_stanza(&st);
        cset.push_stanzas(&mut pr);
    }
    pr.unwrap()
}

fn hex_or_null(raw: &str) -> Result<RevisionId> {
    if raw.is_empty() {
        Ok(RevisionId::null())
    } else {
        RevisionId::from_str(raw)
    }
}

/// Parse the canonical serialization.
pub fn read_revision(text: &str) -> Result<Revision> {
    let mut pars = Parser::new(text)?;
    pars.esym("format_version")?;
    let version = pars.str_val()?;
    if version != "1" {
        err_at!(DecodeFail, msg: "unknown revision format version {:?}", version)?
    }

    pars.esym("new_manifest")?;
    let new_manifest = ManifestId::from_str(&pars.hex_val()?)?;
    let mut rev = Revision::new(new_manifest);

    while !pars.eof() {
        pars.esym("old_revision")?;
        let parent = hex_or_null(&pars.hex_val()?)?;
        let cset = Cset::parse(&mut pars)?;
        if rev.edges.insert(parent, cset).is_some() {
            err_at!(DecodeFail, msg: "duplicate edge from {}", parent)?
        }
    }
    rev.check_sane()?;
    Ok(rev)
}

/// A revision's identifier, the hash of its canonical form.
pub fn revision_id(rev: &Revision) -> RevisionId {
    RevisionId::digest(write_revision(rev).as_bytes())
}

#[cfg(test)]
#[path = "revision_test.rs"]
mod revision_test;
