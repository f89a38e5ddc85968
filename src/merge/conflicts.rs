//! Module implement the conflict taxonomy of a three-way roster merge.
//!
//! Every conflict names the nodes involved and, where the user can
//! intervene, carries an optional resolution. Conflicts without a
//! resolution slot can only be fixed by committing a change on one
//! side and merging again.

use std::collections::BTreeSet;

use crate::{
    hash::{FileId, NodeId, RevisionId},
    path::{FilePath, PathComponent},
    roster::AttrValue,
};

/// Which input of the merge something happened on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

/// Where a node wants to sit, parent plus basename; the root carries
/// no name.
pub type Wanted = (NodeId, Option<PathComponent>);

/// Neither side provided a root directory.
#[derive(Clone, Debug, PartialEq)]
pub struct MissingRootConflict;

/// The bookkeeping name surfaced at the tree root.
#[derive(Clone, Debug, PartialEq)]
pub struct InvalidNameConflict {
    pub nid: NodeId,
    pub parent: NodeId,
    pub name: PathComponent,
}

/// Attaching the node under the merged parents closes a directory
/// cycle.
#[derive(Clone, Debug, PartialEq)]
pub struct DirectoryLoopConflict {
    pub nid: NodeId,
    pub parent: NodeId,
    pub name: PathComponent,
}

/// Resolutions accepted for an orphaned node.
#[derive(Clone, Debug, PartialEq)]
pub enum OrphanedNodeResolution {
    Drop,
    Rename(FilePath),
}

/// The node's parent directory was deleted on the other side.
#[derive(Clone, Debug, PartialEq)]
pub struct OrphanedNodeConflict {
    pub nid: NodeId,
    /// The vanished parent and the basename the node had under it.
    pub parent: NodeId,
    pub name: PathComponent,
    /// The side the node still lives on.
    pub side: Side,
    pub resolution: Option<OrphanedNodeResolution>,
}

/// Both sides moved the node to different places.
#[derive(Clone, Debug, PartialEq)]
pub struct MultipleNameConflict {
    pub nid: NodeId,
    pub left: Wanted,
    pub right: Wanted,
}

/// Per-side resolutions accepted for a dropped-modified conflict.
#[derive(Clone, Debug, PartialEq)]
pub enum DroppedModifiedResolution {
    Drop,
    Keep,
    Rename(FilePath),
    /// Replace content from a user-supplied file, keep the old name.
    User(FilePath),
    /// Replace content from a user-supplied file and attach at a new
    /// name, `(new_name, content_source)`.
    UserRename(FilePath, FilePath),
}

/// The node was deleted on one side and modified on the other.
#[derive(Clone, Debug, PartialEq)]
pub struct DroppedModifiedConflict {
    pub nid: NodeId,
    /// Side that deleted the node; the opposite side modified it.
    pub dropped: Side,
    /// Where the surviving copy sat on the modified side.
    pub parent: NodeId,
    pub name: PathComponent,
    /// Whether the surviving copy is also orphaned.
    pub orphaned: bool,
    pub resolution: Option<DroppedModifiedResolution>,
}

/// Per-side resolutions accepted for a duplicate-name conflict.
#[derive(Clone, Debug, PartialEq)]
pub enum DuplicateNameResolution {
    Drop,
    Keep,
    Rename(FilePath),
    /// Keep the name, substitute content from a user-supplied file.
    User(FilePath),
}

/// Two distinct nodes collide on one `(parent, basename)`.
#[derive(Clone, Debug, PartialEq)]
pub struct DuplicateNameConflict {
    pub left_nid: NodeId,
    pub right_nid: NodeId,
    pub parent: NodeId,
    pub name: PathComponent,
    pub left_resolution: Option<DuplicateNameResolution>,
    pub right_resolution: Option<DuplicateNameResolution>,
}

/// Both sides changed one attribute to different values.
#[derive(Clone, Debug, PartialEq)]
pub struct AttributeConflict {
    pub nid: NodeId,
    pub key: String,
    pub left: (bool, AttrValue),
    pub right: (bool, AttrValue),
}

/// Resolutions accepted for a file-content conflict.
#[derive(Clone, Debug, PartialEq)]
pub enum FileContentResolution {
    /// Run the internal three-way line merger.
    Internal,
    /// Take content from a user-supplied file.
    User(FilePath),
}

/// Both sides changed the file content, neither change supersedes the
/// other.
#[derive(Clone, Debug, PartialEq)]
pub struct FileContentConflict {
    pub nid: NodeId,
    pub left: FileId,
    pub right: FileId,
    pub resolution: Option<FileContentResolution>,
}

/// Everything a roster merge produced: the merged roster with
/// conflicted nodes left detached, and the conflicts grouped by kind
/// in reporting order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RosterMergeResult {
    pub roster: crate::roster::Roster,
    pub missing_root_conflicts: Vec<MissingRootConflict>,
    pub invalid_name_conflicts: Vec<InvalidNameConflict>,
    pub directory_loop_conflicts: Vec<DirectoryLoopConflict>,
    pub orphaned_node_conflicts: Vec<OrphanedNodeConflict>,
    pub multiple_name_conflicts: Vec<MultipleNameConflict>,
    pub dropped_modified_conflicts: Vec<DroppedModifiedConflict>,
    pub duplicate_name_conflicts: Vec<DuplicateNameConflict>,
    pub attribute_conflicts: Vec<AttributeConflict>,
    pub file_content_conflicts: Vec<FileContentConflict>,
}

impl RosterMergeResult {
    pub fn is_clean(&self) -> bool {
        self.count_conflicts() == 0
    }

    pub fn count_conflicts(&self) -> usize {
        self.missing_root_conflicts.len()
            + self.invalid_name_conflicts.len()
            + self.directory_loop_conflicts.len()
            + self.orphaned_node_conflicts.len()
            + self.multiple_name_conflicts.len()
            + self.dropped_modified_conflicts.len()
            + self.duplicate_name_conflicts.len()
            + self.attribute_conflicts.len()
            + self.file_content_conflicts.len()
    }

    /// Conflict kinds with no resolution slot; their presence aborts
    /// the merge outright.
    pub fn has_non_resolvable(&self) -> bool {
        !self.missing_root_conflicts.is_empty()
            || !self.invalid_name_conflicts.is_empty()
            || !self.directory_loop_conflicts.is_empty()
            || !self.multiple_name_conflicts.is_empty()
            || !self.attribute_conflicts.is_empty()
    }

    /// Nodes that ended up detached pending a resolution.
    pub fn unresolved_nodes(&self) -> BTreeSet<NodeId> {
        let mut nodes = BTreeSet::new();
        for c in self.invalid_name_conflicts.iter() {
            nodes.insert(c.nid);
        }
        for c in self.directory_loop_conflicts.iter() {
            nodes.insert(c.nid);
        }
        for c in self.orphaned_node_conflicts.iter() {
            nodes.insert(c.nid);
        }
        for c in self.multiple_name_conflicts.iter() {
            nodes.insert(c.nid);
        }
        for c in self.dropped_modified_conflicts.iter() {
            nodes.insert(c.nid);
        }
        for c in self.duplicate_name_conflicts.iter() {
            nodes.insert(c.left_nid);
            nodes.insert(c.right_nid);
        }
        nodes
    }
}

/// The revisions a merge ran between, carried alongside the result for
/// reporting and resolution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MergeFrame {
    pub left_rid: RevisionId,
    pub right_rid: RevisionId,
    pub ancestor_rid: RevisionId,
}
