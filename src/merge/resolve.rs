//! Module implement applying conflict resolutions to a merge result.
//!
//! Resolutions move each conflicted node from detected to applied:
//! dropping it, attaching it somewhere, or substituting content. The
//! kinds without a resolution slot, and any conflict the user left
//! unresolved, abort with a `Conflict` error that carries the whole
//! set serialized through the conflict-file writer.

use crate::{
    hash::FileId,
    merge::{
        conflicts::{
            DroppedModifiedResolution, DuplicateNameResolution, FileContentResolution,
            OrphanedNodeResolution,
        },
        content::ContentMergeAdaptor,
        io, RosterMergeResult, Side,
    },
    path::FilePath,
    roster::{NodeIdSource, Roster},
    Error, Result,
};

use crate::hash::NodeId;

/// Callback reading a user-supplied resolution file out of the
/// workspace; the core never touches the filesystem for this.
pub type UserContent<'a> = dyn FnMut(&FilePath) -> Result<Vec<u8>> + 'a;

fn drop_subtree(roster: &mut Roster, nid: &NodeId) -> Result<()> {
    let children: Vec<NodeId> = match roster.get_node(nid)?.children() {
        Some(children) => children.values().copied().collect(),
        None => vec![],
    };
    for child in children {
        let path = roster.get_name(&child);
        match path {
            Ok(path) => {
                roster.detach_node(&path)?;
            }
            Err(_) => roster.unlink(&child)?,
        }
        drop_subtree(roster, &child)?;
    }
    roster.drop_detached_node(nid)
}

// substitute user content for a node: store it, delta'd against the
// node's current content, and point the node at it.
fn substitute_content(
    adaptor: &mut ContentMergeAdaptor,
    roster: &mut Roster,
    nid: &NodeId,
    data: Vec<u8>,
) -> Result<FileId> {
    let current = roster.get_node(nid)?.content().copied();
    let merged = match current {
        Some(current) if !current.is_null() => {
            adaptor.record_merge(&current, &current, data)?
        }
        _ => {
            let fid = FileId::digest(&data);
            adaptor.db.put_file(&fid, data)?;
            fid
        }
    };
    roster.set_content(nid, merged)?;
    Ok(merged)
}

/// Apply every recorded resolution in `result`, consuming the resolved
/// conflicts. Fails with `Conflict` if unresolvable kinds are present,
/// any conflict is left unresolved, or the resolved roster is not
/// sane. `read_user` fetches user-supplied content files.
pub fn resolve_merge_conflicts(
    adaptor: &mut ContentMergeAdaptor,
    left_roster: &Roster,
    right_roster: &Roster,
    result: &mut RosterMergeResult,
    read_user: &mut UserContent,
) -> Result<()> {
    if result.has_non_resolvable() {
        return Err(conflict_error(adaptor, left_roster, right_roster, result));
    }

    // content conflicts first, they do not move nodes around.
    let conflicts = std::mem::take(&mut result.file_content_conflicts);
    for mut c in conflicts.into_iter() {
        match c.resolution.take() {
            None => result.file_content_conflicts.push(c),
            Some(FileContentResolution::Internal) => {
                match adaptor.auto_merge(&c.nid, &c.left, &c.right)? {
                    Some(merged) => result.roster.set_content(&c.nid, merged)?,
                    None => result.file_content_conflicts.push(c), // still conflicted
                }
            }
            Some(FileContentResolution::User(path)) => {
                let data = read_user(&path)?;
                let merged = adaptor.record_merge(&c.left, &c.right, data)?;
                result.roster.set_content(&c.nid, merged)?;
            }
        }
    }

    let conflicts = std::mem::take(&mut result.orphaned_node_conflicts);
    for mut c in conflicts.into_iter() {
        match c.resolution.take() {
            None => result.orphaned_node_conflicts.push(c),
            Some(OrphanedNodeResolution::Drop) => {
                drop_subtree(&mut result.roster, &c.nid)?;
            }
            Some(OrphanedNodeResolution::Rename(path)) => {
                result.roster.attach_node(c.nid, &path)?;
            }
        }
    }

    let conflicts = std::mem::take(&mut result.dropped_modified_conflicts);
    for mut c in conflicts.into_iter() {
        match c.resolution.take() {
            None => result.dropped_modified_conflicts.push(c),
            Some(DroppedModifiedResolution::Drop) => {
                drop_subtree(&mut result.roster, &c.nid)?;
            }
            Some(DroppedModifiedResolution::Keep) => {
                if !result.roster.has_node(&c.parent) {
                    err_at!(
                        UserError,
                        msg: "cannot keep {:?}, parent directory is gone; rename it",
                        c.nid
                    )?
                }
                result.roster.attach_node_to(c.nid, c.parent, c.name.clone())?;
            }
            Some(DroppedModifiedResolution::Rename(path)) => {
                result.roster.attach_node(c.nid, &path)?;
            }
            Some(DroppedModifiedResolution::User(path)) => {
                let data = read_user(&path)?;
                substitute_content(adaptor, &mut result.roster, &c.nid, data)?;
                if !result.roster.has_node(&c.parent) {
                    err_at!(
                        UserError,
                        msg: "cannot keep {:?}, parent directory is gone; rename it",
                        c.nid
                    )?
                }
                result.roster.attach_node_to(c.nid, c.parent, c.name.clone())?;
            }
            Some(DroppedModifiedResolution::UserRename(name, content)) => {
                let data = read_user(&content)?;
                substitute_content(adaptor, &mut result.roster, &c.nid, data)?;
                result.roster.attach_node(c.nid, &name)?;
            }
        }
    }

    let conflicts = std::mem::take(&mut result.duplicate_name_conflicts);
    for mut c in conflicts.into_iter() {
        let (left_res, right_res) = (c.left_resolution.take(), c.right_resolution.take());
        let (left_res, right_res) = match (left_res, right_res) {
            (Some(left_res), Some(right_res)) => (left_res, right_res),
            (left_res, right_res) => {
                c.left_resolution = left_res;
                c.right_resolution = right_res;
                result.duplicate_name_conflicts.push(c);
                continue;
            }
        };

        let claims_name = |res: &DuplicateNameResolution| {
            matches!(res, DuplicateNameResolution::Keep | DuplicateNameResolution::User(_))
        };
        if claims_name(&left_res) && claims_name(&right_res) {
            err_at!(
                UserError,
                msg: "inconsistent resolutions: both sides keep the name {}", c.name
            )?
        }

        for (side, res) in vec![(Side::Left, left_res), (Side::Right, right_res)] {
            let nid = match side {
                Side::Left => c.left_nid,
                Side::Right => c.right_nid,
            };
            match res {
                DuplicateNameResolution::Drop => drop_subtree(&mut result.roster, &nid)?,
                DuplicateNameResolution::Keep => {
                    result.roster.attach_node_to(nid, c.parent, c.name.clone())?
                }
                DuplicateNameResolution::Rename(path) => {
                    result.roster.attach_node(nid, &path)?
                }
                DuplicateNameResolution::User(path) => {
                    let data = read_user(&path)?;
                    substitute_content(adaptor, &mut result.roster, &nid, data)?;
                    result.roster.attach_node_to(nid, c.parent, c.name.clone())?;
                }
            }
        }
    }

    if !result.is_clean() {
        return Err(conflict_error(adaptor, left_roster, right_roster, result));
    }
    result.roster.check_sane()?;
    Ok(())
}

/// Build the `Conflict` error carrying the serialized conflict set.
pub fn conflict_error(
    adaptor: &mut ContentMergeAdaptor,
    left_roster: &Roster,
    right_roster: &Roster,
    result: &RosterMergeResult,
) -> Error {
    let prefix = format!("{}:{}", file!(), line!());
    match io::write_conflict_text(adaptor, left_roster, right_roster, result) {
        Ok(text) => Error::Conflict(
            prefix,
            format!("{} unresolved conflicts\n{}", result.count_conflicts(), text),
        ),
        Err(err) => Error::Conflict(prefix, format!("unreportable conflicts: {}", err)),
    }
}

/// Rewrite the merged roster's temporary node ids with persistent
/// ones, in ascending order so allocation stays deterministic.
pub fn assign_true_node_ids(
    roster: &mut Roster,
    nis: &mut dyn NodeIdSource,
) -> Result<()> {
    let temps: Vec<NodeId> = roster
        .all_nodes()
        .map(|(nid, _)| *nid)
        .filter(|nid| nid.is_temp())
        .collect();
    for temp in temps {
        let fresh = nis.allocate()?;
        roster.replace_node_id(&temp, fresh)?;
    }
    Ok(())
}

#[cfg(test)]
#[path = "resolve_test.rs"]
mod resolve_test;
