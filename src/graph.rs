//! Module implement the revision DAG queries and revision heights.
//!
//! A height is a sequence of integers ordered lexicographically, a
//! prefix sorting before any of its extensions. The root revision gets
//! `[0]`; the n-th child branches off its highest parent by appending
//! `n`. Heights give every edge `parent < child` and distinct values to
//! siblings, which is what lets ancestry walks prune by height instead
//! of materializing ancestor sets.

use std::{
    collections::{BTreeSet, HashMap},
    fmt, result,
};

use crate::{
    hash::{Hash, RevisionId},
    pile::{self, Pile},
    util, Result,
};

const FORWARD: u8 = b'F';
const REVERSE: u8 = b'R';

/// Total order over revisions compatible with ancestry.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RevHeight(Vec<u64>);

impl RevHeight {
    /// Height of the imaginary null revision, the empty sequence.
    /// Real roots branch off it at `[0]`, `[1]`, and so on.
    pub fn null_height() -> RevHeight {
        RevHeight(vec![])
    }

    /// Height of the first root revision, `[0]`.
    pub fn root_height() -> RevHeight {
        RevHeight(vec![0])
    }

    /// Height of this revision's child number `nr`.
    pub fn child_height(&self, nr: u64) -> RevHeight {
        let mut inner = self.0.clone();
        inner.push(nr);
        RevHeight(inner)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.0.len() * 8);
        for val in self.0.iter() {
            data.extend_from_slice(&val.to_be_bytes());
        }
        data
    }

    pub fn from_bytes(data: &[u8]) -> Result<RevHeight> {
        if data.is_empty() || data.len() % 8 != 0 {
            err_at!(Corrupt, msg: "mangled height, {} bytes", data.len())?
        }
        let mut inner = vec![];
        for chunk in data.chunks(8) {
            let mut bytes = [0u8; 8];
            bytes.copy_from_slice(chunk);
            inner.push(u64::from_be_bytes(bytes));
        }
        Ok(RevHeight(inner))
    }

    pub fn as_slice(&self) -> &[u64] {
        &self.0
    }
}

impl fmt::Display for RevHeight {
    fn fmt(&self, f: &mut fmt::Formatter) -> result::Result<(), fmt::Error> {
        let parts: Vec<String> = self.0.iter().map(|v| v.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

/// DAG queries over the `revision_ancestry` and `heights` relations,
/// with a per-handle height cache.
pub struct Graph {
    height_cache: HashMap<RevisionId, RevHeight>,
}

impl Default for Graph {
    fn default() -> Self {
        Graph::new()
    }
}

impl Graph {
    pub fn new() -> Graph {
        Graph { height_cache: HashMap::new() }
    }

    /// Record the edge `parent -> child`, both directions indexed. The
    /// null parent of a root is recorded with an empty key.
    pub fn put_ancestry_edge(
        &mut self,
        pile: &mut Pile,
        parent: &RevisionId,
        child: &RevisionId,
    ) -> Result<()> {
        let pbytes = rev_bytes(parent);
        let cbytes = rev_bytes(child);
        pile.set("revision_ancestry", &edge_key(FORWARD, &pbytes, &cbytes), b"")?;
        pile.set("revision_ancestry", &edge_key(REVERSE, &cbytes, &pbytes), b"")?;
        Ok(())
    }

    /// Parents of `rev`, the null parent of a root excluded.
    pub fn parents(&self, pile: &Pile, rev: &RevisionId) -> Result<Vec<RevisionId>> {
        self.edge_ends(pile, REVERSE, rev)
    }

    pub fn children(&self, pile: &Pile, rev: &RevisionId) -> Result<Vec<RevisionId>> {
        self.edge_ends(pile, FORWARD, rev)
    }

    fn edge_ends(&self, pile: &Pile, tag: u8, rev: &RevisionId) -> Result<Vec<RevisionId>> {
        let mut first = vec![tag];
        first.extend_from_slice(&rev_bytes(rev));
        let prefix = pile::prefix2(&first);
        let mut ends = vec![];
        for (key, _) in pile.iter_prefix("revision_ancestry", &prefix)? {
            let (_, end) = pile::split_key2(&key)?;
            if !end.is_empty() {
                ends.push(RevisionId::from(Hash::from_bytes(&end)?));
            }
        }
        Ok(ends)
    }

    /// Revisions with no children.
    pub fn leaves(&self, pile: &Pile) -> Result<BTreeSet<RevisionId>> {
        let mut leaves = BTreeSet::new();
        for (key, _) in pile.iter("revisions")? {
            let rev = RevisionId::from(Hash::from_bytes(&key)?);
            if self.children(pile, &rev)?.is_empty() {
                leaves.insert(rev);
            }
        }
        Ok(leaves)
    }

    /// Height of `rev`; the null revision reports the null height so
    /// root revisions are handled uniformly.
    pub fn get_rev_height(&mut self, pile: &Pile, rev: &RevisionId) -> Result<RevHeight> {
        if rev.is_null() {
            return Ok(RevHeight::null_height());
        }
        if let Some(height) = self.height_cache.get(rev) {
            return Ok(height.clone());
        }
        let key = pile::key2(b"rev", &rev.inner().to_bytes());
        let height = match pile.get("heights", &key)? {
            Some(value) => RevHeight::from_bytes(&value)?,
            None => err_at!(NotFound, msg: "no height for {}", rev)?,
        };
        self.height_cache.insert(*rev, height.clone());
        Ok(height)
    }

    pub fn put_rev_height(
        &mut self,
        pile: &mut Pile,
        rev: &RevisionId,
        height: &RevHeight,
    ) -> Result<()> {
        self.height_cache.remove(rev);
        let key = pile::key2(b"rev", &rev.inner().to_bytes());
        pile.set("heights", &key, &height.to_bytes())?;
        let by_height = pile::key2(b"height", &height.to_bytes());
        pile.set("heights", &by_height, &rev.inner().to_bytes())?;
        Ok(())
    }

    pub fn has_rev_height(&self, pile: &Pile, height: &RevHeight) -> Result<bool> {
        pile.exists("heights", &pile::key2(b"height", &height.to_bytes()))
    }

    /// Assign a height to a fresh revision: branch off the highest
    /// parent at the first unused child index.
    pub fn put_height_for_revision(
        &mut self,
        pile: &mut Pile,
        rev: &RevisionId,
        parents: &[RevisionId],
    ) -> Result<RevHeight> {
        // always branch off the highest parent; a root branches off
        // the null height.
        let mut highest = RevHeight::null_height();
        for parent in parents.iter() {
            let height = self.get_rev_height(pile, parent)?;
            if height > highest {
                highest = height;
            }
        }

        let mut childnr = 0;
        let height = loop {
            let candidate = highest.child_height(childnr);
            if !self.has_rev_height(pile, &candidate)? {
                break candidate;
            }
            childnr += 1;
        };
        self.put_rev_height(pile, rev, &height)?;
        Ok(height)
    }

    /// Whether `a` is a proper ancestor of `b`, walking children of `a`
    /// and pruning by height.
    pub fn is_ancestor(
        &mut self,
        pile: &Pile,
        a: &RevisionId,
        b: &RevisionId,
    ) -> Result<bool> {
        if a == b {
            return Ok(false);
        }
        let a_height = self.get_rev_height(pile, a)?;
        let b_height = self.get_rev_height(pile, b)?;
        if a_height > b_height {
            return Ok(false);
        }

        let mut todo = vec![*a];
        let mut seen = BTreeSet::new();
        while let Some(anc) = todo.pop() {
            for child in self.children(pile, &anc)? {
                if child == *b {
                    return Ok(true);
                }
                if seen.contains(&child) {
                    continue;
                }
                if b_height > self.get_rev_height(pile, &child)? {
                    seen.insert(child);
                    todo.push(child);
                }
            }
        }
        Ok(false)
    }

    /// All proper ancestors of `rev`.
    pub fn ancestors(&self, pile: &Pile, rev: &RevisionId) -> Result<BTreeSet<RevisionId>> {
        let mut ancestors = BTreeSet::new();
        let mut frontier = vec![*rev];
        while let Some(curr) = frontier.pop() {
            for parent in self.parents(pile, &curr)? {
                if ancestors.insert(parent) {
                    frontier.push(parent);
                }
            }
        }
        Ok(ancestors)
    }

    /// All proper descendants of `rev`.
    pub fn descendants(&self, pile: &Pile, rev: &RevisionId) -> Result<BTreeSet<RevisionId>> {
        let mut descendants = BTreeSet::new();
        let mut frontier = vec![*rev];
        while let Some(curr) = frontier.pop() {
            for child in self.children(pile, &curr)? {
                if descendants.insert(child) {
                    frontier.push(child);
                }
            }
        }
        Ok(descendants)
    }

    /// Ancestors common to every revision in `revs`, the revisions
    /// themselves included where applicable.
    pub fn common_ancestors(
        &self,
        pile: &Pile,
        revs: &BTreeSet<RevisionId>,
    ) -> Result<BTreeSet<RevisionId>> {
        let mut all: Option<BTreeSet<RevisionId>> = None;
        for rev in revs.iter() {
            let mut ancestors = self.ancestors(pile, rev)?;
            ancestors.insert(*rev);
            all = Some(match all {
                None => ancestors,
                Some(prev) => prev.intersection(&ancestors).copied().collect(),
            });
        }
        Ok(all.unwrap_or_default())
    }

    /// Produce the ancestors of `a` not shared with `b` and vice
    /// versa, each side including its own head. The walk runs a
    /// max-height-first frontier with two membership marks, so shared
    /// history below the meeting point is never materialized.
    pub fn get_uncommon_ancestors(
        &mut self,
        pile: &Pile,
        a: &RevisionId,
        b: &RevisionId,
    ) -> Result<(BTreeSet<RevisionId>, BTreeSet<RevisionId>)> {
        const LEFT: u8 = 1;
        const RIGHT: u8 = 2;
        const BOTH: u8 = LEFT | RIGHT;

        let mut bits: HashMap<RevisionId, u8> = HashMap::new();
        let mut frontier: BTreeSet<(RevHeight, RevisionId)> = BTreeSet::new();
        let mut unshared = 0usize;

        let mut schedule = |rev: &RevisionId,
                            add: u8,
                            this: &mut Graph,
                            bits: &mut HashMap<RevisionId, u8>,
                            frontier: &mut BTreeSet<(RevHeight, RevisionId)>,
                            unshared: &mut usize|
         -> Result<()> {
            let old = bits.get(rev).copied().unwrap_or(0);
            let new = old | add;
            if new == old {
                return Ok(());
            }
            bits.insert(*rev, new);
            let key = (this.get_rev_height(pile, rev)?, *rev);
            if frontier.contains(&key) {
                if old != BOTH && new == BOTH {
                    *unshared -= 1;
                }
            } else {
                frontier.insert(key);
                if new != BOTH {
                    *unshared += 1;
                }
            }
            Ok(())
        };

        schedule(a, LEFT, self, &mut bits, &mut frontier, &mut unshared)?;
        schedule(b, RIGHT, self, &mut bits, &mut frontier, &mut unshared)?;

        let mut a_uncommon = BTreeSet::new();
        let mut b_uncommon = BTreeSet::new();

        while unshared > 0 {
            let key = match frontier.iter().next_back() {
                Some(key) => key.clone(),
                None => break,
            };
            frontier.remove(&key);
            let (_, rev) = key;
            let marks = bits[&rev];
            if marks != BOTH {
                unshared -= 1;
                match marks {
                    LEFT => a_uncommon.insert(rev),
                    _ => b_uncommon.insert(rev),
                };
            }
            for parent in self.parents(pile, &rev)? {
                schedule(&parent, marks, self, &mut bits, &mut frontier, &mut unshared)?;
            }
        }

        Ok((a_uncommon, b_uncommon))
    }

    /// Remove every revision that is an ancestor of another member of
    /// the set, leaving its maximal elements.
    pub fn erase_ancestors(
        &mut self,
        pile: &Pile,
        revs: &BTreeSet<RevisionId>,
    ) -> Result<BTreeSet<RevisionId>> {
        let mut heads = BTreeSet::new();
        for rev in revs.iter() {
            let mut dominated = false;
            for other in revs.iter() {
                if other != rev && self.is_ancestor(pile, rev, other)? {
                    dominated = true;
                    break;
                }
            }
            if !dominated {
                heads.insert(*rev);
            }
        }
        Ok(heads)
    }
}

fn rev_bytes(rev: &RevisionId) -> Vec<u8> {
    if rev.is_null() {
        vec![]
    } else {
        rev.inner().to_bytes()
    }
}

fn edge_key(tag: u8, from: &[u8], to: &[u8]) -> Vec<u8> {
    let mut first = vec![tag];
    first.extend_from_slice(from);
    pile::key2(&first, to)
}

#[cfg(test)]
#[path = "graph_test.rs"]
mod graph_test;
