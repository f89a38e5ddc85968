//! Module implement three-way roster merging.
//!
//! The merge is node-wise and driven entirely by mark sets: for each
//! aspect of each node, a side's value supersedes the other's when the
//! other side's marks are all part of the shared history, meaning the
//! superseding side saw that change and still decided differently.
//! Two sided changes where neither supersedes become conflicts, refer
//! [conflicts]. Nodes whose placement cannot be resolved stay in the
//! merged roster detached, waiting for a resolution.
//!
//! The inputs are the two head rosters with their markings and each
//! side's uncommon-ancestor set, obtained from the graph; an ancestor
//! roster is only needed later, for reporting and content merging.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    hash::{FileId, NodeId, RevisionId},
    path::PathComponent,
    roster::{mark, AttrValue, MarkingMap, Node, NodeData, Roster},
    Result,
};

pub mod conflicts;
pub mod content;
pub mod io;
pub mod resolve;

pub use conflicts::{MergeFrame, RosterMergeResult, Side};

use conflicts::{
    AttributeConflict, DirectoryLoopConflict, DroppedModifiedConflict,
    DuplicateNameConflict, FileContentConflict, InvalidNameConflict,
    MissingRootConflict, MultipleNameConflict, OrphanedNodeConflict, Wanted,
};

/// One side of a merge: a head's roster, markings, and the ancestors
/// not shared with the other head.
#[derive(Clone, Copy)]
pub struct MergeInput<'a> {
    pub roster: &'a Roster,
    pub marking: &'a MarkingMap,
    pub uncommon: &'a BTreeSet<RevisionId>,
}

enum Merged<T> {
    Value(T),
    Conflict,
}

// one scalar of one node: a side's value wins when the other side's
// marks are all in shared history.
fn merge_scalar<T: Clone + PartialEq>(
    left_val: &T,
    left_marks: &BTreeSet<RevisionId>,
    left_uncommon: &BTreeSet<RevisionId>,
    right_val: &T,
    right_marks: &BTreeSet<RevisionId>,
    right_uncommon: &BTreeSet<RevisionId>,
) -> Result<Merged<T>> {
    if left_val == right_val {
        return Ok(Merged::Value(left_val.clone()));
    }
    let right_superseded = right_marks.is_disjoint(right_uncommon);
    let left_superseded = left_marks.is_disjoint(left_uncommon);
    match (left_superseded, right_superseded) {
        (false, true) => Ok(Merged::Value(left_val.clone())),
        (true, false) => Ok(Merged::Value(right_val.clone())),
        (false, false) => Ok(Merged::Conflict),
        (true, true) => err_at!(
            Fatal, msg: "divergent values with no divergent marks"
        ),
    }
}

// what the planning pass decided about one node.
struct Planned {
    node: Node,
    wanted: Option<Wanted>,
    claim: Option<Side>,
}

/// Merge two head rosters. The result's roster holds every surviving
/// node; nodes with unresolved placement are left detached and listed
/// in the conflict vectors.
pub fn roster_merge(left: MergeInput, right: MergeInput) -> Result<RosterMergeResult> {
    let mut res = RosterMergeResult::default();

    let nids: BTreeSet<NodeId> = left
        .roster
        .all_nodes()
        .map(|(nid, _)| *nid)
        .chain(right.roster.all_nodes().map(|(nid, _)| *nid))
        .collect();

    let mut planned: BTreeMap<NodeId, Planned> = BTreeMap::new();

    for nid in nids.iter() {
        match (left.roster.has_node(nid), right.roster.has_node(nid)) {
            (true, true) => {
                let plan = merge_shared_node(*nid, &left, &right, &mut res)?;
                planned.insert(*nid, plan);
            }
            (true, false) => {
                if let Some(plan) = one_sided_node(*nid, &left, Side::Left, &mut res)? {
                    planned.insert(*nid, plan);
                }
            }
            (false, true) => {
                if let Some(plan) = one_sided_node(*nid, &right, Side::Right, &mut res)? {
                    planned.insert(*nid, plan);
                }
            }
            (false, false) => unreachable!(),
        }
    }

    // build the result roster: insert every surviving node, then
    // attach the ones whose placement resolved.
    for (nid, plan) in planned.iter() {
        res.roster.insert_node(*nid, plan.node.clone())?;
    }

    let root_nid = planned
        .iter()
        .find(|(_, plan)| matches!(plan.wanted, Some((_, None))))
        .map(|(nid, _)| *nid);

    for (nid, plan) in planned.iter() {
        let (parent, name) = match &plan.wanted {
            None => continue, // already conflicted
            Some(wanted) => wanted.clone(),
        };

        let name = match name {
            None => {
                // the root slot.
                if res.roster.has_root() {
                    let wanted = (parent, None);
                    res.multiple_name_conflicts.push(MultipleNameConflict {
                        nid: *nid,
                        left: wanted.clone(),
                        right: wanted,
                    });
                } else {
                    res.roster.attach_node(*nid, &crate::path::FilePath::root())?;
                }
                continue;
            }
            Some(name) => name,
        };

        if !res.roster.has_node(&parent) {
            res.orphaned_node_conflicts.push(OrphanedNodeConflict {
                nid: *nid,
                parent,
                name,
                side: orphan_side(&parent, &left, &right),
                resolution: None,
            });
            continue;
        }

        if Some(parent) == root_nid && name.is_bookkeeping() {
            res.invalid_name_conflicts.push(InvalidNameConflict {
                nid: *nid,
                parent,
                name,
            });
            continue;
        }

        if would_loop(&res.roster, nid, &parent)? {
            res.directory_loop_conflicts.push(DirectoryLoopConflict {
                nid: *nid,
                parent,
                name,
            });
            continue;
        }

        let occupant = res
            .roster
            .get_node(&parent)?
            .children()
            .and_then(|children| children.get(&name))
            .copied();
        if let Some(occupant) = occupant {
            // both claimants lose the name until a resolution says
            // otherwise.
            res.roster.unlink(&occupant)?;
            let (left_nid, right_nid) = order_claimants(occupant, *nid, &planned);
            res.duplicate_name_conflicts.push(DuplicateNameConflict {
                left_nid,
                right_nid,
                parent,
                name,
                left_resolution: None,
                right_resolution: None,
            });
            continue;
        }

        res.roster.attach_node_to(*nid, parent, name)?;
    }

    if !res.roster.has_root() {
        res.missing_root_conflicts.push(MissingRootConflict);
    }

    // a dropped-modified survivor whose parent also vanished is
    // orphaned on top.
    for conflict in res.dropped_modified_conflicts.iter_mut() {
        conflict.orphaned = !res.roster.has_node(&conflict.parent);
    }

    Ok(res)
}

fn merge_shared_node(
    nid: NodeId,
    left: &MergeInput,
    right: &MergeInput,
    res: &mut RosterMergeResult,
) -> Result<Planned> {
    let lnode = left.roster.get_node(&nid)?;
    let rnode = right.roster.get_node(&nid)?;
    let lmarks = left.marking.get(&nid)?;
    let rmarks = right.marking.get(&nid)?;

    let lwant: Wanted = (lnode.parent, lnode.name.clone());
    let rwant: Wanted = (rnode.parent, rnode.name.clone());
    let (wanted, claim) = match merge_scalar(
        &lwant,
        &lmarks.parent_name,
        left.uncommon,
        &rwant,
        &rmarks.parent_name,
        right.uncommon,
    )? {
        Merged::Value(wanted) => {
            let claim = if wanted == lwant && wanted == rwant {
                None
            } else if wanted == lwant {
                Some(Side::Left)
            } else {
                Some(Side::Right)
            };
            (Some(wanted), claim)
        }
        Merged::Conflict => {
            res.multiple_name_conflicts.push(MultipleNameConflict {
                nid,
                left: lwant,
                right: rwant,
            });
            (None, None)
        }
    };

    let data = match (lnode.content(), rnode.content()) {
        (None, None) => NodeData::Dir { children: BTreeMap::new() },
        (Some(lcontent), Some(rcontent)) => {
            match merge_scalar(
                lcontent,
                &lmarks.file_content,
                left.uncommon,
                rcontent,
                &rmarks.file_content,
                right.uncommon,
            )? {
                Merged::Value(content) => NodeData::File { content },
                Merged::Conflict => {
                    res.file_content_conflicts.push(FileContentConflict {
                        nid,
                        left: *lcontent,
                        right: *rcontent,
                        resolution: None,
                    });
                    NodeData::File { content: FileId::null() }
                }
            }
        }
        _ => err_at!(Fatal, msg: "node {:?} changed kind across the merge", nid)?,
    };

    let mut attrs: BTreeMap<String, (bool, AttrValue)> = BTreeMap::new();
    let keys: BTreeSet<&String> = lnode.attrs.keys().chain(rnode.attrs.keys()).collect();
    for key in keys {
        let lstate = lnode.attrs.get(key).cloned();
        let rstate = rnode.attrs.get(key).cloned();
        let empty = BTreeSet::new();
        let lset = lmarks.attrs.get(key).unwrap_or(&empty);
        let rset = rmarks.attrs.get(key).unwrap_or(&empty);
        match merge_scalar(&lstate, lset, left.uncommon, &rstate, rset, right.uncommon)? {
            Merged::Value(Some(state)) => {
                attrs.insert(key.clone(), state);
            }
            Merged::Value(None) => (),
            Merged::Conflict => {
                res.attribute_conflicts.push(AttributeConflict {
                    nid,
                    key: key.clone(),
                    left: lstate.clone().unwrap_or((false, AttrValue::new())),
                    right: rstate.clone().unwrap_or((false, AttrValue::new())),
                });
                // the left state stands in until someone re-commits.
                if let Some(state) = lstate {
                    attrs.insert(key.clone(), state);
                }
            }
        }
    }

    let node = Node {
        parent: NodeId::null(),
        name: None,
        attrs,
        data,
    };
    Ok(Planned { node, wanted, claim })
}

// a node alive on one side only: kept when it was born there, silently
// dead when the other side deleted it unchanged, a dropped-modified
// conflict otherwise.
fn one_sided_node(
    nid: NodeId,
    side_input: &MergeInput,
    side: Side,
    res: &mut RosterMergeResult,
) -> Result<Option<Planned>> {
    let node = side_input.roster.get_node(&nid)?;
    let marks = side_input.marking.get(&nid)?;

    let mut detached = node.clone();
    detached.parent = NodeId::null();
    let name = std::mem::take(&mut detached.name);
    if let NodeData::Dir { children } = &mut detached.data {
        children.clear();
    }

    if side_input.uncommon.contains(&marks.birth_revision) {
        // born here, unknown to the other side.
        let wanted = Some((node.parent, name));
        return Ok(Some(Planned { node: detached, wanted, claim: Some(side) }));
    }

    // the other side deleted it; was it modified on this side?
    let modified = !marks.parent_name.is_disjoint(side_input.uncommon)
        || !marks.file_content.is_disjoint(side_input.uncommon)
        || marks.attrs.values().any(|set| !set.is_disjoint(side_input.uncommon));

    if modified {
        let name = match name {
            Some(name) => name,
            // the root cannot be deleted out from under a change.
            None => err_at!(Fatal, msg: "root {:?} dropped on one side", nid)?,
        };
        res.dropped_modified_conflicts.push(DroppedModifiedConflict {
            nid,
            dropped: side.opposite(),
            parent: node.parent,
            name,
            orphaned: false,
            resolution: None,
        });
        return Ok(Some(Planned { node: detached, wanted: None, claim: Some(side) }));
    }

    Ok(None) // dead on both counts
}

// does attaching `nid` under `parent` close a cycle in the forest
// built so far?
fn would_loop(roster: &Roster, nid: &NodeId, parent: &NodeId) -> Result<bool> {
    let mut curr = *parent;
    let mut steps = roster.len() + 1;
    loop {
        if curr == *nid {
            return Ok(true);
        }
        if !roster.has_node(&curr) {
            return Ok(false);
        }
        let node = roster.get_node(&curr)?;
        if node.parent.is_null() || node.parent == curr {
            return Ok(false);
        }
        curr = node.parent;
        steps -= 1;
        if steps == 0 {
            return Ok(true);
        }
    }
}

fn orphan_side(parent: &NodeId, left: &MergeInput, right: &MergeInput) -> Side {
    match (left.roster.has_node(parent), right.roster.has_node(parent)) {
        (true, false) => Side::Left,
        (false, true) => Side::Right,
        _ => Side::Left,
    }
}

fn order_claimants(
    a: NodeId,
    b: NodeId,
    planned: &BTreeMap<NodeId, Planned>,
) -> (NodeId, NodeId) {
    let side_of = |nid: &NodeId| planned.get(nid).and_then(|plan| plan.claim);
    match (side_of(&a), side_of(&b)) {
        (Some(Side::Right), _) | (_, Some(Side::Left)) => (b, a),
        _ => (a, b),
    }
}

/// Markings for a cleanly merged roster, refer
/// [mark::mark_merge_roster].
pub fn mark_merge_result(
    left: &MergeInput,
    right: &MergeInput,
    merged: &Roster,
    merge_rev: RevisionId,
) -> Result<MarkingMap> {
    mark::mark_merge_roster(
        left.roster,
        left.marking,
        right.roster,
        right.marking,
        merged,
        merge_rev,
    )
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod mod_test;
