//! Module implement automatic content merging.
//!
//! The internal merger runs a three-way line merge: regions where only
//! one side departed from the ancestor take that side, regions where
//! both sides made the same change collapse, and regions where the
//! sides disagree fail the merge, leaving the conflict for the user.
//! The [ContentMergeAdaptor] fetches ancestral rosters and file
//! content from a database and records merged results back, writing a
//! forward delta from both parents.

use std::{collections::HashMap, sync::Arc};

use crate::{
    db::Database,
    hash::{FileId, NodeId},
    merge::MergeFrame,
    roster::{MarkingMap, Roster},
    store::xdelta,
    util, Result,
};

// split into lines, each keeping its newline; a final line without one
// is its own line.
fn split_lines(data: &[u8]) -> Vec<&[u8]> {
    let mut lines = vec![];
    let mut start = 0;
    for (i, byte) in data.iter().enumerate() {
        if *byte == b'\n' {
            lines.push(&data[start..=i]);
            start = i + 1;
        }
    }
    if start < data.len() {
        lines.push(&data[start..]);
    }
    lines
}

// longest common subsequence as index pairs, classic quadratic table.
fn lcs(a: &[u64], b: &[u64]) -> Vec<(usize, usize)> {
    let (n, m) = (a.len(), b.len());
    let mut table = vec![0u32; (n + 1) * (m + 1)];
    let at = |i: usize, j: usize| i * (m + 1) + j;

    for i in (0..n).rev() {
        for j in (0..m).rev() {
            table[at(i, j)] = if a[i] == b[j] {
                table[at(i + 1, j + 1)] + 1
            } else {
                table[at(i + 1, j)].max(table[at(i, j + 1)])
            };
        }
    }

    let mut pairs = vec![];
    let (mut i, mut j) = (0, 0);
    while i < n && j < m {
        if a[i] == b[j] {
            pairs.push((i, j));
            i += 1;
            j += 1;
        } else if table[at(i + 1, j)] >= table[at(i, j + 1)] {
            i += 1;
        } else {
            j += 1;
        }
    }
    pairs
}

fn line_keys(lines: &[&[u8]]) -> Vec<u64> {
    lines.iter().map(|line| util::checksum(line)).collect()
}

/// Three-way line merge of `left` and `right` against `ancestor`.
/// `None` when the sides collide.
pub fn merge3(ancestor: &[u8], left: &[u8], right: &[u8]) -> Option<Vec<u8>> {
    let alines = split_lines(ancestor);
    let llines = split_lines(left);
    let rlines = split_lines(right);

    let akeys = line_keys(&alines);
    let lkeys = line_keys(&llines);
    let rkeys = line_keys(&rlines);

    let lmap: HashMap<usize, usize> = lcs(&akeys, &lkeys).into_iter().collect();
    let rmap: HashMap<usize, usize> = lcs(&akeys, &rkeys).into_iter().collect();

    let mut out: Vec<u8> = vec![];
    let (mut i, mut l, mut r) = (0, 0, 0);

    loop {
        // find the next position stable on both sides.
        let mut stable = None;
        let mut i2 = i;
        while i2 < alines.len() {
            match (lmap.get(&i2), rmap.get(&i2)) {
                (Some(l2), Some(r2)) if *l2 >= l && *r2 >= r => {
                    stable = Some((i2, *l2, *r2));
                    break;
                }
                _ => i2 += 1,
            }
        }
        let (i2, l2, r2) = match stable {
            Some(found) => found,
            None => (alines.len(), llines.len(), rlines.len()),
        };

        // the unstable region before it.
        let a_region = &alines[i..i2];
        let l_region = &llines[l..l2];
        let r_region = &rlines[r..r2];
        let take: Option<&[&[u8]]> = if l_region == a_region {
            Some(r_region)
        } else if r_region == a_region || l_region == r_region {
            Some(l_region)
        } else {
            None
        };
        match take {
            Some(region) => {
                for line in region {
                    out.extend_from_slice(line);
                }
            }
            None => return None,
        }

        if i2 >= alines.len() {
            return Some(out);
        }

        // the stable line itself.
        out.extend_from_slice(alines[i2]);
        i = i2 + 1;
        l = l2 + 1;
        r = r2 + 1;
    }
}

/// Database-backed adaptor handed to conflict reporting and
/// resolution: ancestral rosters, file content, and recording of
/// merged content.
pub struct ContentMergeAdaptor<'a> {
    pub db: &'a mut Database,
    pub frame: MergeFrame,
}

impl<'a> ContentMergeAdaptor<'a> {
    pub fn new(db: &'a mut Database, frame: MergeFrame) -> ContentMergeAdaptor<'a> {
        ContentMergeAdaptor { db, frame }
    }

    /// The roster of the chosen common ancestor.
    pub fn get_ancestor_roster(&mut self) -> Result<(Arc<Roster>, Arc<MarkingMap>)> {
        self.db.get_roster(&self.frame.ancestor_rid)
    }

    /// Content of `nid` in the ancestor, `None` when the node or its
    /// content is not there.
    pub fn get_ancestor_content(&mut self, nid: &NodeId) -> Result<Option<Vec<u8>>> {
        let (roster, _) = self.get_ancestor_roster()?;
        if !roster.has_node(nid) {
            return Ok(None);
        }
        match roster.get_node(nid)?.content() {
            Some(content) => Ok(Some(self.db.get_file_version(content)?)),
            None => Ok(None),
        }
    }

    /// Ancestor-side file id of `nid`, when present.
    pub fn get_ancestor_file_id(&mut self, nid: &NodeId) -> Result<Option<FileId>> {
        let (roster, _) = self.get_ancestor_roster()?;
        if !roster.has_node(nid) {
            return Ok(None);
        }
        Ok(roster.get_node(nid)?.content().copied())
    }

    pub fn get_file(&mut self, id: &FileId) -> Result<Vec<u8>> {
        self.db.get_file_version(id)
    }

    /// Store merged content and delta both parents forward to it.
    pub fn record_merge(
        &mut self,
        left: &FileId,
        right: &FileId,
        data: Vec<u8>,
    ) -> Result<FileId> {
        let merged = FileId::digest(&data);
        self.db.put_file(&merged, data.clone())?;
        for parent in [left, right].iter() {
            if **parent == merged {
                continue;
            }
            let parent_data = self.db.get_file_version(parent)?;
            let delta = xdelta::diff(&parent_data, &data);
            self.db.put_file_version(parent, &merged, &delta)?;
        }
        Ok(merged)
    }

    /// Try the internal three-way merger on one content conflict.
    pub fn auto_merge(
        &mut self,
        nid: &NodeId,
        left: &FileId,
        right: &FileId,
    ) -> Result<Option<FileId>> {
        let ancestor = self.get_ancestor_content(nid)?.unwrap_or_default();
        let left_data = self.get_file(left)?;
        let right_data = self.get_file(right)?;
        match merge3(&ancestor, &left_data, &right_data) {
            Some(data) => Ok(Some(self.record_merge(left, right, data)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
#[path = "content_test.rs"]
mod content_test;
