//! Module implement mark computation for rebuilt rosters.
//!
//! When a revision is stored, its roster is rebuilt by applying the
//! edge csets to the parent rosters. The marking of every node is then
//! derived by the mark-merge rule: an aspect whose value differs from
//! all parents is marked with the new revision, otherwise it carries
//! the union of the marks of the parents that still agree with it.
//!
//! A two-parent rebuild first produces two candidate rosters, one per
//! edge, with freshly added nodes on temporary identifiers. The two
//! candidates describe the same tree; [unify_rosters] aligns their
//! node identities so the markings can be merged node-wise.

use std::collections::BTreeSet;

use crate::{
    hash::RevisionId,
    roster::{singleton, AttrValue, Marking, MarkingMap, Node, NodeIdSource, Roster},
    Result,
};

/// Mark-merge one aspect. `new_val` is the value in the child; each
/// parent contributes its value and the mark set for this aspect.
pub fn mark_merged_scalar<T: PartialEq>(
    left_val: &T,
    left_marks: &BTreeSet<RevisionId>,
    right_val: &T,
    right_marks: &BTreeSet<RevisionId>,
    new_val: &T,
    new_rev: RevisionId,
) -> BTreeSet<RevisionId> {
    match (new_val == left_val, new_val == right_val) {
        (true, true) => left_marks.union(right_marks).copied().collect(),
        (true, false) => left_marks.clone(),
        (false, true) => right_marks.clone(),
        (false, false) => singleton(new_rev),
    }
}

fn attr_state(node: &Node, key: &str) -> Option<(bool, AttrValue)> {
    node.attrs.get(key).cloned()
}

fn attr_marks(marking: &Marking, key: &str) -> BTreeSet<RevisionId> {
    marking.attrs.get(key).cloned().unwrap_or_default()
}

// marking for a node present in exactly one parent, the unchanged
// aspects keep the parent's marks.
fn mark_from_one_parent(
    parent_node: &Node,
    parent_marks: &Marking,
    node: &Node,
    new_rev: RevisionId,
) -> Marking {
    let mut marks = Marking {
        birth_revision: parent_marks.birth_revision,
        parent_name: BTreeSet::new(),
        file_content: BTreeSet::new(),
        attrs: Default::default(),
    };

    let same_place =
        parent_node.parent == node.parent && parent_node.name == node.name;
    marks.parent_name = if same_place {
        parent_marks.parent_name.clone()
    } else {
        singleton(new_rev)
    };

    if node.is_file() {
        marks.file_content = if parent_node.content() == node.content() {
            parent_marks.file_content.clone()
        } else {
            singleton(new_rev)
        };
    }

    for key in node.attrs.keys() {
        let set = if attr_state(parent_node, key) == attr_state(node, key) {
            match parent_marks.attrs.get(key) {
                Some(set) => set.clone(),
                None => singleton(new_rev),
            }
        } else {
            singleton(new_rev)
        };
        marks.attrs.insert(key.clone(), set);
    }
    marks
}

/// Markings for a root revision's roster, everything born here.
pub fn mark_roster_with_no_parents(rev: RevisionId, roster: &Roster) -> MarkingMap {
    let mut marking = MarkingMap::new();
    for (nid, node) in roster.all_nodes() {
        marking.insert(*nid, Marking::new_birth(rev, node));
    }
    marking
}

/// Markings for a one-parent rebuild.
pub fn mark_roster_with_one_parent(
    parent: &Roster,
    parent_marking: &MarkingMap,
    child: &Roster,
    rev: RevisionId,
) -> Result<MarkingMap> {
    let mut marking = MarkingMap::new();
    for (nid, node) in child.all_nodes() {
        let marks = if parent.has_node(nid) {
            mark_from_one_parent(parent.get_node(nid)?, parent_marking.get(nid)?, node, rev)
        } else {
            Marking::new_birth(rev, node)
        };
        marking.insert(*nid, marks);
    }
    Ok(marking)
}

/// Markings for a two-parent rebuild; node identities must already be
/// unified across `merged` and both parents.
pub fn mark_merge_roster(
    left: &Roster,
    left_marking: &MarkingMap,
    right: &Roster,
    right_marking: &MarkingMap,
    merged: &Roster,
    rev: RevisionId,
) -> Result<MarkingMap> {
    let mut marking = MarkingMap::new();

    for (nid, node) in merged.all_nodes() {
        let marks = match (left.has_node(nid), right.has_node(nid)) {
            (false, false) => Marking::new_birth(rev, node),
            (true, false) => {
                mark_from_one_parent(left.get_node(nid)?, left_marking.get(nid)?, node, rev)
            }
            (false, true) => {
                mark_from_one_parent(right.get_node(nid)?, right_marking.get(nid)?, node, rev)
            }
            (true, true) => {
                let lnode = left.get_node(nid)?;
                let rnode = right.get_node(nid)?;
                let lmarks = left_marking.get(nid)?;
                let rmarks = right_marking.get(nid)?;
                if lmarks.birth_revision != rmarks.birth_revision {
                    err_at!(Corrupt, msg: "birth disagreement on {:?}", nid)?
                }

                let mut marks = Marking {
                    birth_revision: lmarks.birth_revision,
                    parent_name: mark_merged_scalar(
                        &(lnode.parent, lnode.name.clone()),
                        &lmarks.parent_name,
                        &(rnode.parent, rnode.name.clone()),
                        &rmarks.parent_name,
                        &(node.parent, node.name.clone()),
                        rev,
                    ),
                    file_content: BTreeSet::new(),
                    attrs: Default::default(),
                };
                if node.is_file() {
                    marks.file_content = mark_merged_scalar(
                        &lnode.content().copied(),
                        &lmarks.file_content,
                        &rnode.content().copied(),
                        &rmarks.file_content,
                        &node.content().copied(),
                        rev,
                    );
                }
                for key in node.attrs.keys() {
                    let set = mark_merged_scalar(
                        &attr_state(lnode, key),
                        &attr_marks(lmarks, key),
                        &attr_state(rnode, key),
                        &attr_marks(rmarks, key),
                        &attr_state(node, key),
                        rev,
                    );
                    let set = if set.is_empty() { singleton(rev) } else { set };
                    marks.attrs.insert(key.clone(), set);
                }
                marks
            }
        };
        marking.insert(*nid, marks);
    }
    Ok(marking)
}

/// Align node identities of two candidate rosters describing the same
/// tree. Temporary identifiers adopt the true identifier from the
/// other side; nodes born on both sides get a fresh identifier from
/// `nis`. After this both rosters carry identical node ids.
pub fn unify_rosters(
    left: &mut Roster,
    right: &mut Roster,
    nis: &mut dyn NodeIdSource,
) -> Result<()> {
    let mut left_paths = vec![];
    for (nid, _) in left.all_nodes() {
        left_paths.push((left.get_name(nid)?, *nid));
    }
    left_paths.sort();

    let mut right_paths = vec![];
    for (nid, _) in right.all_nodes() {
        right_paths.push((right.get_name(nid)?, *nid));
    }
    right_paths.sort();

    if left_paths.len() != right_paths.len() {
        err_at!(Corrupt, msg: "candidate rosters disagree on tree size")?
    }

    for ((lpath, lnid), (rpath, rnid)) in left_paths.into_iter().zip(right_paths) {
        if lpath != rpath {
            err_at!(Corrupt, msg: "candidate rosters disagree at {} vs {}", lpath, rpath)?
        }
        match (lnid.is_temp(), rnid.is_temp()) {
            (false, false) if lnid == rnid => (),
            (false, false) => {
                err_at!(Corrupt, msg: "identity clash at {}, {:?} vs {:?}", lpath, lnid, rnid)?
            }
            (true, false) => left.replace_node_id(&lnid, rnid)?,
            (false, true) => right.replace_node_id(&rnid, lnid)?,
            (true, true) => {
                let fresh = nis.allocate()?;
                left.replace_node_id(&lnid, fresh)?;
                right.replace_node_id(&rnid, fresh)?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
#[path = "mark_test.rs"]
mod mark_test;
