//! Module implement the roster, the in-memory tree of a revision.
//!
//! A roster maps dense [NodeId]s to nodes; directories carry a name to
//! child map, files carry a content identifier. The tree is flat, a
//! node points at its parent by id, so there are no ownership cycles.
//! Alongside every roster travels a [MarkingMap] with per-node
//! provenance: the birth revision, and for each changeable aspect the
//! set of revisions that last changed it, refer [Marking]. These mark
//! sets are what drives node-wise three-way merging.
//!
//! Nodes are created detached and later attached at a path, mirroring
//! how changesets are applied. Scratch rosters used during merge
//! allocate node ids from a disjoint temporary range which must never
//! be persisted.

use std::collections::{BTreeMap, BTreeSet};

use crate::{
    hash::{FileId, NodeId, RevisionId, FIRST_TEMP_NODE},
    path::{FilePath, PathComponent},
    pile::Pile,
    Result,
};

pub mod cset;
pub mod delta;
pub mod io;
pub mod mark;

pub use cset::Cset;
pub use delta::RosterDelta;

pub type AttrKey = String;
pub type AttrValue = String;

/// Source of fresh node identifiers.
pub trait NodeIdSource {
    fn allocate(&mut self) -> Result<NodeId>;
}

/// Hands out identifiers from the temporary range, for scratch rosters.
pub struct TempIdSource {
    next: u64,
}

impl TempIdSource {
    pub fn new() -> TempIdSource {
        TempIdSource { next: FIRST_TEMP_NODE }
    }
}

impl Default for TempIdSource {
    fn default() -> Self {
        TempIdSource::new()
    }
}

impl NodeIdSource for TempIdSource {
    fn allocate(&mut self) -> Result<NodeId> {
        let nid = NodeId(self.next);
        self.next += 1;
        Ok(nid)
    }
}

impl NodeIdSource for Pile {
    fn allocate(&mut self) -> Result<NodeId> {
        self.next_node_id()
    }
}

/// What a node is, directory or file.
#[derive(Clone, Debug, PartialEq)]
pub enum NodeData {
    Dir { children: BTreeMap<PathComponent, NodeId> },
    File { content: FileId },
}

/// A single tree node. Attribute values carry a liveness flag, a
/// cleared attribute stays in the map as dormant so its history
/// remains mergeable.
#[derive(Clone, Debug, PartialEq)]
pub struct Node {
    pub parent: NodeId,
    pub name: Option<PathComponent>,
    pub attrs: BTreeMap<AttrKey, (bool, AttrValue)>,
    pub data: NodeData,
}

impl Node {
    pub(crate) fn scratch_dir() -> Node {
        Node::new_dir()
    }

    pub(crate) fn scratch_file(content: FileId) -> Node {
        Node::new_file(content)
    }

    fn new_dir() -> Node {
        Node {
            parent: NodeId::null(),
            name: None,
            attrs: BTreeMap::new(),
            data: NodeData::Dir { children: BTreeMap::new() },
        }
    }

    fn new_file(content: FileId) -> Node {
        Node {
            parent: NodeId::null(),
            name: None,
            attrs: BTreeMap::new(),
            data: NodeData::File { content },
        }
    }

    pub fn is_dir(&self) -> bool {
        matches!(self.data, NodeData::Dir { .. })
    }

    pub fn is_file(&self) -> bool {
        matches!(self.data, NodeData::File { .. })
    }

    pub fn content(&self) -> Option<&FileId> {
        match &self.data {
            NodeData::File { content } => Some(content),
            NodeData::Dir { .. } => None,
        }
    }

    pub fn children(&self) -> Option<&BTreeMap<PathComponent, NodeId>> {
        match &self.data {
            NodeData::Dir { children } => Some(children),
            NodeData::File { .. } => None,
        }
    }

    /// Live attributes, the ones a serialized manifest shows.
    pub fn live_attrs(&self) -> BTreeMap<AttrKey, AttrValue> {
        self.attrs
            .iter()
            .filter(|(_, (live, _))| *live)
            .map(|(k, (_, v))| (k.clone(), v.clone()))
            .collect()
    }
}

/// Provenance for one node.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Marking {
    /// The revision that created this node.
    pub birth_revision: RevisionId,
    /// Revisions that last changed the `(parent, name)` pair.
    pub parent_name: BTreeSet<RevisionId>,
    /// For files, revisions that last changed the content.
    pub file_content: BTreeSet<RevisionId>,
    /// Per-attribute mark sets, dormant attributes included.
    pub attrs: BTreeMap<AttrKey, BTreeSet<RevisionId>>,
}

impl Marking {
    /// Fresh marking for a node born in `rev`, every aspect marked
    /// with the birth revision.
    pub fn new_birth(rev: RevisionId, node: &Node) -> Marking {
        let mut marking = Marking {
            birth_revision: rev,
            parent_name: singleton(rev),
            file_content: BTreeSet::new(),
            attrs: BTreeMap::new(),
        };
        if node.is_file() {
            marking.file_content = singleton(rev);
        }
        for key in node.attrs.keys() {
            marking.attrs.insert(key.clone(), singleton(rev));
        }
        marking
    }
}

pub(crate) fn singleton(rev: RevisionId) -> BTreeSet<RevisionId> {
    let mut set = BTreeSet::new();
    set.insert(rev);
    set
}

/// Markings for all live nodes of a roster.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MarkingMap {
    marks: BTreeMap<NodeId, Marking>,
}

impl MarkingMap {
    pub fn new() -> MarkingMap {
        MarkingMap::default()
    }

    pub fn get(&self, nid: &NodeId) -> Result<&Marking> {
        match self.marks.get(nid) {
            Some(marking) => Ok(marking),
            None => err_at!(Corrupt, msg: "no marking for {:?}", nid),
        }
    }

    pub fn get_mut(&mut self, nid: &NodeId) -> Result<&mut Marking> {
        match self.marks.get_mut(nid) {
            Some(marking) => Ok(marking),
            None => err_at!(Corrupt, msg: "no marking for {:?}", nid),
        }
    }

    pub fn contains(&self, nid: &NodeId) -> bool {
        self.marks.contains_key(nid)
    }

    pub fn insert(&mut self, nid: NodeId, marking: Marking) {
        self.marks.insert(nid, marking);
    }

    pub fn remove(&mut self, nid: &NodeId) -> Option<Marking> {
        self.marks.remove(nid)
    }

    pub fn len(&self) -> usize {
        self.marks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.marks.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, &Marking)> {
        self.marks.iter()
    }

    /// Renumber a node, used by migration and merge alignment.
    pub fn replace_node_id(&mut self, old: &NodeId, new: NodeId) -> Result<()> {
        match self.marks.remove(old) {
            Some(marking) => {
                self.marks.insert(new, marking);
                Ok(())
            }
            None => err_at!(Fatal, msg: "no marking for {:?}", old),
        }
    }
}

/// The tree at one revision, a flat map of nodes with a distinguished
/// root.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Roster {
    nodes: BTreeMap<NodeId, Node>,
    root: NodeId,
}

impl Roster {
    pub fn new() -> Roster {
        Roster::default()
    }

    pub fn has_root(&self) -> bool {
        !self.root.is_null()
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn has_node(&self, nid: &NodeId) -> bool {
        self.nodes.contains_key(nid)
    }

    pub fn get_node(&self, nid: &NodeId) -> Result<&Node> {
        match self.nodes.get(nid) {
            Some(node) => Ok(node),
            None => err_at!(InvalidInput, msg: "no node {:?}", nid),
        }
    }

    fn get_node_mut(&mut self, nid: &NodeId) -> Result<&mut Node> {
        match self.nodes.get_mut(nid) {
            Some(node) => Ok(node),
            None => err_at!(InvalidInput, msg: "no node {:?}", nid),
        }
    }

    /// All nodes in stable NodeId order, attached or not.
    pub fn all_nodes(&self) -> impl Iterator<Item = (&NodeId, &Node)> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `nid` currently sits in the tree. The root counts as
    /// attached.
    pub fn is_attached(&self, nid: &NodeId) -> bool {
        if *nid == self.root {
            return !self.root.is_null();
        }
        match self.nodes.get(nid) {
            Some(node) => !node.parent.is_null(),
            None => false,
        }
    }

    /// Resolve a path to a node.
    pub fn lookup(&self, path: &FilePath) -> Result<NodeId> {
        if !self.has_root() {
            err_at!(NotFound, msg: "roster has no root")?
        }
        let mut nid = self.root;
        for comp in path.components() {
            let node = self.get_node(&nid)?;
            nid = match node.children() {
                Some(children) => match children.get(comp) {
                    Some(child) => *child,
                    None => err_at!(NotFound, msg: "no node at {}", path)?,
                },
                None => err_at!(NotFound, msg: "{} crosses a file", path)?,
            };
        }
        Ok(nid)
    }

    pub fn has_path(&self, path: &FilePath) -> bool {
        self.lookup(path).is_ok()
    }

    /// Full path of an attached node.
    pub fn get_name(&self, nid: &NodeId) -> Result<FilePath> {
        let mut comps = vec![];
        let mut curr = *nid;
        loop {
            if curr == self.root {
                comps.reverse();
                return Ok(FilePath::from_components(comps));
            }
            let node = self.get_node(&curr)?;
            match (&node.name, node.parent.is_null()) {
                (Some(name), false) => comps.push(name.clone()),
                _ => err_at!(InvalidInput, msg: "node {:?} is detached", nid)?,
            }
            curr = node.parent;
        }
    }

    /// Insert a detached node under a caller-chosen id, used by the
    /// deserializer and the roster-delta walk.
    pub(crate) fn insert_node(&mut self, nid: NodeId, node: Node) -> Result<()> {
        if self.nodes.contains_key(&nid) {
            err_at!(InvalidInput, msg: "node {:?} already present", nid)?
        }
        self.nodes.insert(nid, node);
        Ok(())
    }

    /// Create a detached directory node.
    pub fn create_dir_node(&mut self, nis: &mut dyn NodeIdSource) -> Result<NodeId> {
        let nid = nis.allocate()?;
        self.nodes.insert(nid, Node::new_dir());
        Ok(nid)
    }

    /// Create a detached file node with `content`.
    pub fn create_file_node(
        &mut self,
        content: FileId,
        nis: &mut dyn NodeIdSource,
    ) -> Result<NodeId> {
        let nid = nis.allocate()?;
        self.nodes.insert(nid, Node::new_file(content));
        Ok(nid)
    }

    /// Attach a detached node at `path`. Attaching at the root path
    /// makes the node the root directory.
    pub fn attach_node(&mut self, nid: NodeId, path: &FilePath) -> Result<()> {
        match path.split() {
            None => {
                if self.has_root() {
                    err_at!(UserError, msg: "roster already has a root")?
                }
                if !self.get_node(&nid)?.is_dir() {
                    err_at!(UserError, msg: "root must be a directory")?
                }
                if self.get_node(&nid)?.parent != NodeId::null() {
                    err_at!(InvalidInput, msg: "node {:?} is attached", nid)?
                }
                self.root = nid;
                let node = self.get_node_mut(&nid)?;
                node.parent = nid; // the root is its own parent
                node.name = None;
                Ok(())
            }
            Some((dir, name)) => {
                let parent = self.lookup(&dir)?;
                self.attach_node_to(nid, parent, name)
            }
        }
    }

    /// Attach a detached node under directory `parent` as `name`.
    pub fn attach_node_to(
        &mut self,
        nid: NodeId,
        parent: NodeId,
        name: PathComponent,
    ) -> Result<()> {
        if self.get_node(&nid)?.parent != NodeId::null() {
            err_at!(InvalidInput, msg: "node {:?} is attached", nid)?
        }
        {
            let pnode = self.get_node(&parent)?;
            match pnode.children() {
                Some(children) if children.contains_key(&name) => {
                    err_at!(UserError, msg: "name {} already in use", name)?
                }
                Some(_) => (),
                None => err_at!(UserError, msg: "parent {:?} is not a directory", parent)?,
            }
        }

        match &mut self.get_node_mut(&parent)?.data {
            NodeData::Dir { children } => {
                children.insert(name.clone(), nid);
            }
            NodeData::File { .. } => unreachable!(),
        }
        let node = self.get_node_mut(&nid)?;
        node.parent = parent;
        node.name = Some(name);
        Ok(())
    }

    /// Detach the node at `path`, leaving it in the roster without a
    /// position. Return its id.
    pub fn detach_node(&mut self, path: &FilePath) -> Result<NodeId> {
        let nid = self.lookup(path)?;
        if nid == self.root {
            self.root = NodeId::null();
            let node = self.get_node_mut(&nid)?;
            node.parent = NodeId::null();
            node.name = None;
            return Ok(nid);
        }
        let (parent, name) = {
            let node = self.get_node(&nid)?;
            (node.parent, node.name.clone().unwrap())
        };
        match &mut self.get_node_mut(&parent)?.data {
            NodeData::Dir { children } => {
                children.remove(&name);
            }
            NodeData::File { .. } => unreachable!(),
        }
        let node = self.get_node_mut(&nid)?;
        node.parent = NodeId::null();
        node.name = None;
        Ok(nid)
    }

    /// Remove a detached node. Directories must be empty.
    pub fn drop_detached_node(&mut self, nid: &NodeId) -> Result<()> {
        if self.is_attached(nid) {
            err_at!(InvalidInput, msg: "node {:?} is attached", nid)?
        }
        if let Some(children) = self.get_node(nid)?.children() {
            if !children.is_empty() {
                err_at!(InvalidInput, msg: "dropping non-empty directory {:?}", nid)?
            }
        }
        self.nodes.remove(nid);
        Ok(())
    }

    /// Replace a file node's content.
    pub fn set_content(&mut self, nid: &NodeId, content: FileId) -> Result<()> {
        match &mut self.get_node_mut(nid)?.data {
            NodeData::File { content: slot } => {
                *slot = content;
                Ok(())
            }
            NodeData::Dir { .. } => {
                err_at!(InvalidInput, msg: "setting content on directory {:?}", nid)
            }
        }
    }

    /// Mark a live attribute dormant.
    pub fn clear_attr(&mut self, nid: &NodeId, key: &str) -> Result<()> {
        let node = self.get_node_mut(nid)?;
        match node.attrs.get_mut(key) {
            Some(attr) if attr.0 => {
                *attr = (false, AttrValue::new());
                Ok(())
            }
            _ => err_at!(InvalidInput, msg: "clearing unset attr {} on {:?}", key, nid),
        }
    }

    /// Set an attribute, reviving it if dormant.
    pub fn set_attr(&mut self, nid: &NodeId, key: &str, value: &str) -> Result<()> {
        let node = self.get_node_mut(nid)?;
        node.attrs.insert(key.to_string(), (true, value.to_string()));
        Ok(())
    }

    /// Structural renumbering, used during migration and merge
    /// alignment. Every other field is preserved and the parent's
    /// child entry is updated.
    pub fn replace_node_id(&mut self, old: &NodeId, new: NodeId) -> Result<()> {
        if self.nodes.contains_key(&new) {
            err_at!(InvalidInput, msg: "node {:?} already present", new)?
        }
        let mut node = match self.nodes.remove(old) {
            Some(node) => node,
            None => err_at!(InvalidInput, msg: "no node {:?}", old)?,
        };

        if *old == self.root {
            self.root = new;
            node.parent = new;
        } else if !node.parent.is_null() {
            let parent = node.parent;
            let name = node.name.clone().unwrap();
            match &mut self.get_node_mut(&parent)?.data {
                NodeData::Dir { children } => {
                    children.insert(name, new);
                }
                NodeData::File { .. } => unreachable!(),
            }
        }

        if let NodeData::Dir { children } = &node.data {
            let kids: Vec<NodeId> = children.values().copied().collect();
            for kid in kids {
                self.get_node_mut(&kid)?.parent = new;
            }
        }

        self.nodes.insert(new, node);
        Ok(())
    }

    // Raw unlink for the roster-delta walk, no legality checks.
    pub(crate) fn unlink(&mut self, nid: &NodeId) -> Result<()> {
        if *nid == self.root {
            self.root = NodeId::null();
            let node = self.get_node_mut(nid)?;
            node.parent = NodeId::null();
            node.name = None;
            return Ok(());
        }
        let (parent, name) = {
            let node = self.get_node(nid)?;
            (node.parent, node.name.clone())
        };
        if let (false, Some(name)) = (parent.is_null(), name) {
            if let Some(pnode) = self.nodes.get_mut(&parent) {
                if let NodeData::Dir { children } = &mut pnode.data {
                    children.remove(&name);
                }
            }
        }
        let node = self.get_node_mut(nid)?;
        node.parent = NodeId::null();
        node.name = None;
        Ok(())
    }

    // Raw link for the roster-delta walk; the target state is known to
    // be sane, so no legality checks.
    pub(crate) fn link(&mut self, nid: &NodeId, location: (NodeId, Option<PathComponent>)) -> Result<()> {
        let (parent, name) = location;
        match name {
            None => {
                self.root = *nid;
                let node = self.get_node_mut(nid)?;
                node.parent = *nid;
                node.name = None;
            }
            Some(name) => {
                match &mut self.get_node_mut(&parent)?.data {
                    NodeData::Dir { children } => {
                        children.insert(name.clone(), *nid);
                    }
                    NodeData::File { .. } => {
                        err_at!(Corrupt, msg: "link under file {:?}", parent)?
                    }
                }
                let node = self.get_node_mut(nid)?;
                node.parent = parent;
                node.name = Some(name);
            }
        }
        Ok(())
    }

    pub(crate) fn remove_raw(&mut self, nid: &NodeId) -> Result<()> {
        match self.nodes.remove(nid) {
            Some(_) => Ok(()),
            None => err_at!(Corrupt, msg: "removing missing node {:?}", nid),
        }
    }

    pub(crate) fn put_attr(
        &mut self,
        nid: &NodeId,
        key: &str,
        state: (bool, AttrValue),
    ) -> Result<()> {
        self.get_node_mut(nid)?.attrs.insert(key.to_string(), state);
        Ok(())
    }

    /// Verify the structural invariants: single directory root that is
    /// its own parent, parent/child links agree, no detached leftovers,
    /// and every node reaches the root.
    pub fn check_sane(&self) -> Result<()> {
        if !self.has_root() {
            err_at!(Corrupt, msg: "roster has no root")?
        }
        let root = self.get_node(&self.root)?;
        if !root.is_dir() || root.parent != self.root || root.name.is_some() {
            err_at!(Corrupt, msg: "mangled root {:?}", self.root)?
        }

        for (nid, node) in self.nodes.iter() {
            if nid.is_null() {
                err_at!(Corrupt, msg: "null node id in roster")?
            }
            if *nid == self.root {
                continue;
            }
            let name = match (&node.name, node.parent.is_null()) {
                (Some(name), false) => name,
                (None, true) => {
                    err_at!(Corrupt, msg: "detached node {:?} in roster", nid)?
                }
                _ => err_at!(Corrupt, msg: "half-attached node {:?}", nid)?,
            };
            let parent = self.get_node(&node.parent)?;
            match parent.children() {
                Some(children) if children.get(name) == Some(nid) => (),
                _ => err_at!(Corrupt, msg: "parent link broken for {:?}", nid)?,
            }

            // follow parents to the root, bounded by node count.
            let mut curr = *nid;
            let mut steps = self.nodes.len() + 1;
            while curr != self.root {
                curr = self.get_node(&curr)?.parent;
                if curr.is_null() {
                    err_at!(Corrupt, msg: "node {:?} does not reach the root", nid)?
                }
                steps -= 1;
                if steps == 0 {
                    err_at!(Corrupt, msg: "parent cycle at {:?}", nid)?
                }
            }

            if let NodeData::Dir { children } = &node.data {
                for (cname, cnid) in children.iter() {
                    let child = self.get_node(cnid)?;
                    if child.parent != *nid || child.name.as_ref() != Some(cname) {
                        err_at!(Corrupt, msg: "child link broken under {:?}", nid)?
                    }
                }
            }
        }
        Ok(())
    }

    /// [Roster::check_sane] plus the marking invariants: live nodes and
    /// markings correspond one to one, mark sets are non-empty, file
    /// marks only on files, and every referenced revision satisfies
    /// `rev_exists`.
    pub fn check_sane_against(
        &self,
        marking: &MarkingMap,
        rev_exists: impl Fn(&RevisionId) -> bool,
    ) -> Result<()> {
        self.check_sane()?;

        for (nid, node) in self.nodes.iter() {
            let marks = marking.get(nid)?;
            if marks.birth_revision.is_null() || !rev_exists(&marks.birth_revision) {
                err_at!(Corrupt, msg: "bad birth revision on {:?}", nid)?
            }
            if marks.parent_name.is_empty() {
                err_at!(Corrupt, msg: "empty parent-name mark on {:?}", nid)?
            }
            match node.is_file() {
                true if marks.file_content.is_empty() => {
                    err_at!(Corrupt, msg: "empty content mark on file {:?}", nid)?
                }
                false if !marks.file_content.is_empty() => {
                    err_at!(Corrupt, msg: "content mark on directory {:?}", nid)?
                }
                _ => (),
            }
            for key in node.attrs.keys() {
                match marks.attrs.get(key) {
                    Some(set) if !set.is_empty() => (),
                    _ => err_at!(Corrupt, msg: "missing attr mark {} on {:?}", key, nid)?,
                }
            }
            let sets = marks
                .parent_name
                .iter()
                .chain(marks.file_content.iter())
                .chain(marks.attrs.values().flatten());
            for rev in sets {
                if !rev_exists(rev) {
                    err_at!(Corrupt, msg: "marking references missing revision {}", rev)?
                }
            }
        }

        for (nid, _) in marking.iter() {
            if !self.nodes.contains_key(nid) {
                err_at!(Corrupt, msg: "marking for missing node {:?}", nid)?
            }
        }
        Ok(())
    }
}
