//! Module implement structured deltas between two rosters.
//!
//! Where blob deltas are byte edit scripts, roster deltas are per-node:
//! which nodes vanished, which appeared where, which moved, whose
//! content or attributes or markings changed. Applying a delta to the
//! neighbouring roster reproduces the target exactly. Because the
//! delta names nodes, single values can also be extracted from a chain
//! of deltas without rebuilding the target roster, refer
//! [DeltaExtractor].

use std::collections::{BTreeMap, BTreeSet};
use std::str::FromStr;

use crate::{
    basic_io::{Parser, Printer, Stanza, Value},
    hash::{FileId, NodeId, RevisionId},
    path::PathComponent,
    roster::{AttrKey, AttrValue, Marking, MarkingMap, Node, Roster},
    Result,
};

/// Where a node sits, parent and basename. The root carries no name.
pub type Location = (NodeId, Option<PathComponent>);

/// Per-node difference between two rosters, describing the target
/// relative to the source.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RosterDelta {
    pub nodes_deleted: BTreeSet<NodeId>,
    pub dirs_added: BTreeMap<NodeId, Location>,
    pub files_added: BTreeMap<NodeId, (Location, FileId)>,
    pub nodes_renamed: BTreeMap<NodeId, Location>,
    pub deltas_applied: BTreeMap<NodeId, FileId>,
    pub attrs_changed: BTreeMap<NodeId, BTreeMap<AttrKey, (bool, AttrValue)>>,
    pub markings_changed: BTreeMap<NodeId, Marking>,
}

impl RosterDelta {
    pub fn is_empty(&self) -> bool {
        self.nodes_deleted.is_empty()
            && self.dirs_added.is_empty()
            && self.files_added.is_empty()
            && self.nodes_renamed.is_empty()
            && self.deltas_applied.is_empty()
            && self.attrs_changed.is_empty()
            && self.markings_changed.is_empty()
    }
}

/// Compute the delta that rewrites `from` into `to`.
pub fn delta_rosters(
    from: &Roster,
    from_marking: &MarkingMap,
    to: &Roster,
    to_marking: &MarkingMap,
) -> Result<RosterDelta> {
    let mut delta = RosterDelta::default();

    for (nid, _) in from.all_nodes() {
        if !to.has_node(nid) {
            delta.nodes_deleted.insert(*nid);
        }
    }

    for (nid, to_node) in to.all_nodes() {
        let location = (to_node.parent, to_node.name.clone());
        let marks = to_marking.get(nid)?;

        if !from.has_node(nid) {
            match to_node.content() {
                None => {
                    delta.dirs_added.insert(*nid, location);
                }
                Some(content) => {
                    delta.files_added.insert(*nid, (location, *content));
                }
            }
            if !to_node.attrs.is_empty() {
                delta.attrs_changed.insert(*nid, to_node.attrs.clone());
            }
            delta.markings_changed.insert(*nid, marks.clone());
            continue;
        }

        let from_node = from.get_node(nid)?;
        if from_node.parent != to_node.parent || from_node.name != to_node.name {
            delta.nodes_renamed.insert(*nid, location);
        }
        match (from_node.content(), to_node.content()) {
            (Some(old), Some(new)) if old != new => {
                delta.deltas_applied.insert(*nid, *new);
            }
            _ => (),
        }

        let mut attrs = BTreeMap::new();
        let keys: BTreeSet<&AttrKey> =
            from_node.attrs.keys().chain(to_node.attrs.keys()).collect();
        for key in keys {
            let from_attr = from_node.attrs.get(key);
            let to_attr = to_node.attrs.get(key).cloned().unwrap_or((false, String::new()));
            if from_attr != Some(&to_attr) {
                attrs.insert(key.clone(), to_attr);
            }
        }
        if !attrs.is_empty() {
            delta.attrs_changed.insert(*nid, attrs);
        }

        if from_marking.get(nid)? != marks {
            delta.markings_changed.insert(*nid, marks.clone());
        }
    }

    Ok(delta)
}

/// Apply `delta` to `(roster, marking)` in place, producing the target
/// state.
pub fn apply_roster_delta(
    delta: &RosterDelta,
    roster: &mut Roster,
    marking: &mut MarkingMap,
) -> Result<()> {
    // free every moving node first so names cannot collide mid-way.
    for nid in delta.nodes_renamed.keys() {
        roster.unlink(nid)?;
    }
    for nid in delta.nodes_deleted.iter() {
        roster.unlink(nid)?;
        roster.remove_raw(nid)?;
        marking.remove(nid);
    }
    for (nid, _) in delta.dirs_added.iter() {
        roster.insert_node(*nid, Node::scratch_dir())?;
    }
    for (nid, (_, content)) in delta.files_added.iter() {
        roster.insert_node(*nid, Node::scratch_file(*content))?;
    }
    for (nid, location) in delta.nodes_renamed.iter() {
        roster.link(nid, location.clone())?;
    }
    for (nid, location) in delta.dirs_added.iter() {
        roster.link(nid, location.clone())?;
    }
    for (nid, (location, _)) in delta.files_added.iter() {
        roster.link(nid, location.clone())?;
    }

    for (nid, content) in delta.deltas_applied.iter() {
        roster.set_content(nid, *content)?;
    }
    for (nid, attrs) in delta.attrs_changed.iter() {
        for (key, state) in attrs.iter() {
            roster.put_attr(nid, key, state.clone())?;
        }
    }
    for (nid, marks) in delta.markings_changed.iter() {
        marking.insert(*nid, marks.clone());
    }
    Ok(())
}

/// Visitor over a chain of roster deltas, walking from the newer end
/// towards the base. The first delta that pins the answer ends the
/// walk; reaching the base falls back to reading the full roster. The
/// walk is shared, implementations differ only in the per-node hook.
pub trait DeltaExtractor {
    type Out;

    /// Inspect one delta on the walk; `Some` when this delta
    /// determines the value at the walk's origin.
    fn from_delta(&self, delta: &RosterDelta) -> Option<Result<Self::Out>>;

    /// Read the value out of the full roster at the end of the chain.
    fn from_base(&self, roster: &Roster, marking: &MarkingMap) -> Result<Self::Out>;
}

/// Extract a file node's content identifier.
pub struct ContentExtractor {
    pub nid: NodeId,
}

impl DeltaExtractor for ContentExtractor {
    type Out = FileId;

    fn from_delta(&self, delta: &RosterDelta) -> Option<Result<FileId>> {
        if delta.nodes_deleted.contains(&self.nid) {
            return Some(err_at!(NotFound, msg: "node {:?} not in roster", self.nid));
        }
        if let Some((_, content)) = delta.files_added.get(&self.nid) {
            return Some(Ok(*content));
        }
        delta.deltas_applied.get(&self.nid).map(|content| Ok(*content))
    }

    fn from_base(&self, roster: &Roster, _marking: &MarkingMap) -> Result<FileId> {
        match roster.get_node(&self.nid)?.content() {
            Some(content) => Ok(*content),
            None => err_at!(InvalidInput, msg: "node {:?} is a directory", self.nid),
        }
    }
}

/// Extract a node's marking.
pub struct MarkingsExtractor {
    pub nid: NodeId,
}

impl DeltaExtractor for MarkingsExtractor {
    type Out = Marking;

    fn from_delta(&self, delta: &RosterDelta) -> Option<Result<Marking>> {
        if delta.nodes_deleted.contains(&self.nid) {
            return Some(err_at!(NotFound, msg: "node {:?} not in roster", self.nid));
        }
        delta.markings_changed.get(&self.nid).map(|marks| Ok(marks.clone()))
    }

    fn from_base(&self, _roster: &Roster, marking: &MarkingMap) -> Result<Marking> {
        Ok(marking.get(&self.nid)?.clone())
    }
}

fn push_location(st: &mut Stanza, location: &Location) {
    st.push_str("parent", &location.0.to_string());
    match &location.1 {
        Some(name) => st.push_str("name", name.as_str()),
        None => st.push_str("name", ""),
    };
}

fn push_marking(st: &mut Stanza, marks: &Marking) {
    st.push_hex("birth", &marks.birth_revision.to_hex());
    for rev in marks.parent_name.iter() {
        st.push_hex("path_mark", &rev.to_hex());
    }
    for rev in marks.file_content.iter() {
        st.push_hex("content_mark", &rev.to_hex());
    }
    for (key, revs) in marks.attrs.iter() {
        for rev in revs.iter() {
            st.push_multi(
                "attr_mark",
                vec![Value::Str(key.clone()), Value::Hex(rev.to_hex())],
            );
        }
    }
}

/// Serialize to the textual form stored in `roster_deltas` rows.
pub fn write_roster_delta(delta: &RosterDelta) -> String {
    let mut pr = Printer::new();

    for nid in delta.nodes_deleted.iter() {
        let mut st = Stanza::new();
        st.push_str("deleted", &nid.to_string());
        pr.push_stanza(&st);
    }
    for (nid, location) in delta.nodes_renamed.iter() {
        let mut st = Stanza::new();
        st.push_str("rename", &nid.to_string());
        push_location(&mut st, location);
        pr.push_stanza(&st);
    }
    for (nid, location) in delta.dirs_added.iter() {
        let mut st = Stanza::new();
        st.push_str("add_dir", &nid.to_string());
        push_location(&mut st, location);
        pr.push_stanza(&st);
    }
    for (nid, (location, content)) in delta.files_added.iter() {
        let mut st = Stanza::new();
        st.push_str("add_file", &nid.to_string());
        push_location(&mut st, location);
        st.push_hex("content", &content.to_hex());
        pr.push_stanza(&st);
    }
    for (nid, content) in delta.deltas_applied.iter() {
        let mut st = Stanza::new();
        st.push_str("delta", &nid.to_string());
        st.push_hex("content", &content.to_hex());
        pr.push_stanza(&st);
    }
    for (nid, attrs) in delta.attrs_changed.iter() {
        for (key, (live, value)) in attrs.iter() {
            let mut st = Stanza::new();
            st.push_multi(
                "attr",
                vec![Value::Str(nid.to_string()), Value::Str(key.clone())],
            );
            st.push_str("state", if *live { "live" } else { "dormant" });
            st.push_str("value", value);
            pr.push_stanza(&st);
        }
    }
    for (nid, marks) in delta.markings_changed.iter() {
        let mut st = Stanza::new();
        st.push_str("marking", &nid.to_string());
        push_marking(&mut st, marks);
        pr.push_stanza(&st);
    }

    pr.unwrap()
}

fn parse_node_id(raw: &str) -> Result<NodeId> {
    Ok(NodeId(err_at!(DecodeFail, raw.parse::<u64>(), "bad node id {:?}", raw)?))
}

fn parse_location(pars: &mut Parser) -> Result<Location> {
    pars.esym("parent")?;
    let parent = parse_node_id(&pars.str_val()?)?;
    pars.esym("name")?;
    let name = match pars.str_val()?.as_str() {
        "" => None,
        raw => Some(PathComponent::new(raw)?),
    };
    Ok((parent, name))
}

fn parse_marking(pars: &mut Parser) -> Result<Marking> {
    let mut marks = Marking::default();
    pars.esym("birth")?;
    marks.birth_revision = RevisionId::from_str(&pars.hex_val()?)?;
    while pars.symp("path_mark") {
        pars.esym("path_mark")?;
        marks.parent_name.insert(RevisionId::from_str(&pars.hex_val()?)?);
    }
    while pars.symp("content_mark") {
        pars.esym("content_mark")?;
        marks.file_content.insert(RevisionId::from_str(&pars.hex_val()?)?);
    }
    while pars.symp("attr_mark") {
        pars.esym("attr_mark")?;
        let key = pars.str_val()?;
        let rev = RevisionId::from_str(&pars.hex_val()?)?;
        marks.attrs.entry(key).or_default().insert(rev);
    }
    Ok(marks)
}

/// Parse the form written by [write_roster_delta].
pub fn read_roster_delta(text: &str) -> Result<RosterDelta> {
    let mut pars = Parser::new(text)?;
    let mut delta = RosterDelta::default();

    while !pars.eof() {
        match pars.sym()?.as_str() {
            "deleted" => {
                delta.nodes_deleted.insert(parse_node_id(&pars.str_val()?)?);
            }
            "rename" => {
                let nid = parse_node_id(&pars.str_val()?)?;
                delta.nodes_renamed.insert(nid, parse_location(&mut pars)?);
            }
            "add_dir" => {
                let nid = parse_node_id(&pars.str_val()?)?;
                delta.dirs_added.insert(nid, parse_location(&mut pars)?);
            }
            "add_file" => {
                let nid = parse_node_id(&pars.str_val()?)?;
                let location = parse_location(&mut pars)?;
                pars.esym("content")?;
                let content = FileId::from_str(&pars.hex_val()?)?;
                delta.files_added.insert(nid, (location, content));
            }
            "delta" => {
                let nid = parse_node_id(&pars.str_val()?)?;
                pars.esym("content")?;
                let content = FileId::from_str(&pars.hex_val()?)?;
                delta.deltas_applied.insert(nid, content);
            }
            "attr" => {
                let nid = parse_node_id(&pars.str_val()?)?;
                let key = pars.str_val()?;
                pars.esym("state")?;
                let live = match pars.str_val()?.as_str() {
                    "live" => true,
                    "dormant" => false,
                    raw => err_at!(DecodeFail, msg: "bad attr state {:?}", raw)?,
                };
                pars.esym("value")?;
                let value = pars.str_val()?;
                delta.attrs_changed.entry(nid).or_default().insert(key, (live, value));
            }
            "marking" => {
                let nid = parse_node_id(&pars.str_val()?)?;
                delta.markings_changed.insert(nid, parse_marking(&mut pars)?);
            }
            sym => err_at!(DecodeFail, msg: "unexpected roster-delta stanza {:?}", sym)?,
        }
    }

    Ok(delta)
}

#[cfg(test)]
#[path = "delta_test.rs"]
mod delta_test;
