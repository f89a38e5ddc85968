//! Module implement the textual conflict file.
//!
//! Conflicts serialize as an ordered stream of stanzas, one per
//! conflict, in a fixed category order: missing root, invalid name,
//! directory loop, orphaned node, multiple names, dropped-modified,
//! duplicate name, attribute, content. A header stanza names the left,
//! right and ancestor revisions. Users append resolution lines to the
//! stanzas; the parser walks the file position for position against
//! the live conflict set and refuses a file that no longer matches.

use std::str::FromStr;

use crate::{
    basic_io::{Parser, Printer, Stanza},
    hash::{FileId, NodeId, RevisionId},
    merge::{
        conflicts::{
            DroppedModifiedResolution, DuplicateNameResolution, FileContentResolution,
            OrphanedNodeResolution,
        },
        content::ContentMergeAdaptor,
        RosterMergeResult, Side,
    },
    path::FilePath,
    roster::Roster,
    Result,
};

const MISMATCH: &str = "conflicts file does not match current conflicts";

fn node_type(rosters: &[&Roster], nid: &NodeId) -> &'static str {
    for roster in rosters {
        if roster.has_node(nid) {
            match roster.get_node(nid) {
                Ok(node) if node.is_file() => return "file",
                Ok(_) => return "directory",
                Err(_) => (),
            }
        }
    }
    "file"
}

fn push_side_name(st: &mut Stanza, sym: &str, roster: &Roster, nid: &NodeId) {
    if let Ok(path) = roster.get_name(nid) {
        st.push_str(sym, &path.to_string());
    }
}

fn push_side_file_id(st: &mut Stanza, sym: &str, roster: &Roster, nid: &NodeId) {
    if let Ok(node) = roster.get_node(nid) {
        if let Some(content) = node.content() {
            st.push_hex(sym, &content.to_hex());
        }
    }
}

// "added file", "renamed directory", ... depending on whether the
// ancestor knew the node.
fn change_kind(ancestor: &Roster, roster: &Roster, nid: &NodeId) -> String {
    let noun = match roster.get_node(nid) {
        Ok(node) if node.is_file() => "file",
        _ => "directory",
    };
    let verb = if ancestor.has_node(nid) { "renamed" } else { "added" };
    format!("{} {}", verb, noun)
}

fn side_sym(side: Side, base: &str) -> String {
    match side {
        Side::Left => format!("{}_left", base),
        Side::Right => format!("{}_right", base),
    }
}

/// Serialize the conflict set, resolutions included.
pub fn write_conflict_text(
    adaptor: &mut ContentMergeAdaptor,
    left_roster: &Roster,
    right_roster: &Roster,
    result: &RosterMergeResult,
) -> Result<String> {
    let (ancestor_roster, _) = adaptor.get_ancestor_roster()?;
    let frame = adaptor.frame;

    let mut pr = Printer::new();
    let mut st = Stanza::new();
    st.push_hex("left", &frame.left_rid.to_hex());
    st.push_hex("right", &frame.right_rid.to_hex());
    st.push_hex("ancestor", &frame.ancestor_rid.to_hex());
    pr.push_stanza(&st);

    let sides = [left_roster, right_roster];

    for _ in result.missing_root_conflicts.iter() {
        let mut st = Stanza::new();
        st.push_str("conflict", "missing_root");
        pr.push_stanza(&st);
    }

    for c in result.invalid_name_conflicts.iter() {
        let mut st = Stanza::new();
        st.push_str("conflict", "invalid_name");
        st.push_str("node_type", node_type(&sides, &c.nid));
        st.push_str("name", c.name.as_str());
        push_side_name(&mut st, "left_name", left_roster, &c.nid);
        push_side_name(&mut st, "right_name", right_roster, &c.nid);
        pr.push_stanza(&st);
    }

    for c in result.directory_loop_conflicts.iter() {
        let mut st = Stanza::new();
        st.push_str("conflict", "directory_loop");
        st.push_str("node_type", node_type(&sides, &c.nid));
        st.push_str("name", c.name.as_str());
        push_side_name(&mut st, "left_name", left_roster, &c.nid);
        push_side_name(&mut st, "right_name", right_roster, &c.nid);
        pr.push_stanza(&st);
    }

    for c in result.orphaned_node_conflicts.iter() {
        let mut st = Stanza::new();
        let kind = match node_type(&sides, &c.nid) {
            "file" => "orphaned_file",
            _ => "orphaned_directory",
        };
        st.push_str("conflict", kind);

        let (survivor, survivor_sym) = match c.side {
            Side::Left => (left_roster, "left"),
            Side::Right => (right_roster, "right"),
        };
        st.push_str(
            &side_sym(c.side.opposite(), "type"),
            "deleted directory",
        );
        if let Ok(parent_path) = survivor.get_name(&c.parent) {
            st.push_str("ancestor_name", &parent_path.to_string());
        }
        st.push_str(
            &format!("{}_type", survivor_sym),
            &change_kind(&ancestor_roster, survivor, &c.nid),
        );
        push_side_name(&mut st, &format!("{}_name", survivor_sym), survivor, &c.nid);
        push_side_file_id(&mut st, &format!("{}_file_id", survivor_sym), survivor, &c.nid);

        match &c.resolution {
            None => (),
            Some(OrphanedNodeResolution::Drop) => {
                st.push_str(&side_sym(c.side, "resolved_drop"), "");
            }
            Some(OrphanedNodeResolution::Rename(path)) => {
                st.push_str(&side_sym(c.side, "resolved_rename"), &path.to_string());
            }
        }
        pr.push_stanza(&st);
    }

    for c in result.multiple_name_conflicts.iter() {
        let mut st = Stanza::new();
        st.push_str("conflict", "multiple_names");
        st.push_str("node_type", node_type(&sides, &c.nid));
        push_side_name(&mut st, "left_name", left_roster, &c.nid);
        push_side_name(&mut st, "right_name", right_roster, &c.nid);
        push_side_file_id(&mut st, "left_file_id", left_roster, &c.nid);
        push_side_file_id(&mut st, "right_file_id", right_roster, &c.nid);
        pr.push_stanza(&st);
    }

    for c in result.dropped_modified_conflicts.iter() {
        let mut st = Stanza::new();
        st.push_str("conflict", "dropped_modified");
        st.push_str("node_type", node_type(&sides, &c.nid));

        let survivor_side = c.dropped.opposite();
        let (survivor, _) = match survivor_side {
            Side::Left => (left_roster, "left"),
            Side::Right => (right_roster, "right"),
        };
        if let Some(fid) = ancestor_file_id(&ancestor_roster, &c.nid) {
            st.push_hex("ancestor_file_id", &fid.to_hex());
        }
        if let Ok(path) = ancestor_roster.get_name(&c.nid) {
            st.push_str("ancestor_name", &path.to_string());
        }
        st.push_str(
            &side_sym(c.dropped, "type"),
            &format!("deleted {}", node_type(&sides, &c.nid)),
        );
        st.push_str(
            &side_sym(survivor_side, "type"),
            &format!("modified {}", node_type(&sides, &c.nid)),
        );
        push_side_name(&mut st, &side_sym(survivor_side, "name"), survivor, &c.nid);
        push_side_file_id(&mut st, &side_sym(survivor_side, "file_id"), survivor, &c.nid);
        if c.orphaned {
            st.push_str("orphaned", "true");
        }

        match &c.resolution {
            None => (),
            Some(DroppedModifiedResolution::Drop) => {
                st.push_str(&side_sym(survivor_side, "resolved_drop"), "");
            }
            Some(DroppedModifiedResolution::Keep) => {
                st.push_str(&side_sym(survivor_side, "resolved_keep"), "");
            }
            Some(DroppedModifiedResolution::Rename(path)) => {
                st.push_str(&side_sym(survivor_side, "resolved_rename"), &path.to_string());
            }
            Some(DroppedModifiedResolution::User(path)) => {
                st.push_str(&side_sym(survivor_side, "resolved_user"), &path.to_string());
            }
            Some(DroppedModifiedResolution::UserRename(name, content)) => {
                st.push_multi(
                    &side_sym(survivor_side, "resolved_user_rename"),
                    vec![
                        crate::basic_io::Value::Str(name.to_string()),
                        crate::basic_io::Value::Str(content.to_string()),
                    ],
                );
            }
        }
        pr.push_stanza(&st);
    }

    for c in result.duplicate_name_conflicts.iter() {
        let mut st = Stanza::new();
        st.push_str("conflict", "duplicate_name");
        st.push_str("left_type", &change_kind(&ancestor_roster, left_roster, &c.left_nid));
        push_side_name(&mut st, "left_name", left_roster, &c.left_nid);
        push_side_file_id(&mut st, "left_file_id", left_roster, &c.left_nid);
        st.push_str("right_type", &change_kind(&ancestor_roster, right_roster, &c.right_nid));
        push_side_name(&mut st, "right_name", right_roster, &c.right_nid);
        push_side_file_id(&mut st, "right_file_id", right_roster, &c.right_nid);

        for (side, resolution) in [
            (Side::Left, &c.left_resolution),
            (Side::Right, &c.right_resolution),
        ]
        .iter()
        {
            match resolution {
                None => (),
                Some(DuplicateNameResolution::Drop) => {
                    st.push_str(&side_sym(*side, "resolved_drop"), "");
                }
                Some(DuplicateNameResolution::Keep) => {
                    st.push_str(&side_sym(*side, "resolved_keep"), "");
                }
                Some(DuplicateNameResolution::Rename(path)) => {
                    st.push_str(&side_sym(*side, "resolved_rename"), &path.to_string());
                }
                Some(DuplicateNameResolution::User(path)) => {
                    st.push_str(&side_sym(*side, "resolved_user"), &path.to_string());
                }
            }
        }
        pr.push_stanza(&st);
    }

    for c in result.attribute_conflicts.iter() {
        let mut st = Stanza::new();
        st.push_str("conflict", "attribute");
        st.push_str("node_type", node_type(&sides, &c.nid));
        st.push_str("attr_name", &c.key);
        push_side_name(&mut st, "left_name", left_roster, &c.nid);
        match &c.left {
            (true, value) => st.push_str("left_attr_value", value),
            (false, _) => st.push_str("left_attr_state", "dropped"),
        };
        push_side_name(&mut st, "right_name", right_roster, &c.nid);
        match &c.right {
            (true, value) => st.push_str("right_attr_value", value),
            (false, _) => st.push_str("right_attr_state", "dropped"),
        };
        pr.push_stanza(&st);
    }

    for c in result.file_content_conflicts.iter() {
        let mut st = Stanza::new();
        st.push_str("conflict", "content");
        st.push_str("node_type", "file");
        if let Some(fid) = ancestor_file_id(&ancestor_roster, &c.nid) {
            st.push_hex("ancestor_file_id", &fid.to_hex());
        }
        if let Ok(path) = ancestor_roster.get_name(&c.nid) {
            st.push_str("ancestor_name", &path.to_string());
        }
        push_side_name(&mut st, "left_name", left_roster, &c.nid);
        st.push_hex("left_file_id", &c.left.to_hex());
        push_side_name(&mut st, "right_name", right_roster, &c.nid);
        st.push_hex("right_file_id", &c.right.to_hex());

        match &c.resolution {
            None => (),
            Some(FileContentResolution::Internal) => {
                st.push_str("resolved_internal", "");
            }
            Some(FileContentResolution::User(path)) => {
                st.push_str("resolved_user_left", &path.to_string());
            }
        }
        pr.push_stanza(&st);
    }

    Ok(pr.unwrap())
}

fn ancestor_file_id(ancestor: &Roster, nid: &NodeId) -> Option<FileId> {
    if !ancestor.has_node(nid) {
        return None;
    }
    ancestor.get_node(nid).ok().and_then(|node| node.content().copied())
}

// a resolution symbol found while scanning one stanza.
enum ResLine {
    DropLeft,
    DropRight,
    KeepLeft,
    KeepRight,
    RenameLeft(FilePath),
    RenameRight(FilePath),
    UserLeft(FilePath),
    UserRight(FilePath),
    UserRenameLeft(FilePath, FilePath),
    UserRenameRight(FilePath, FilePath),
    Internal,
}

impl ResLine {
    fn side(&self) -> Option<Side> {
        match self {
            ResLine::DropLeft
            | ResLine::KeepLeft
            | ResLine::RenameLeft(_)
            | ResLine::UserLeft(_)
            | ResLine::UserRenameLeft(_, _) => Some(Side::Left),
            ResLine::DropRight
            | ResLine::KeepRight
            | ResLine::RenameRight(_)
            | ResLine::UserRight(_)
            | ResLine::UserRenameRight(_, _) => Some(Side::Right),
            ResLine::Internal => None,
        }
    }
}

// swallow the values following a symbol, whatever their shapes.
fn skip_values(pars: &mut Parser) -> Result<()> {
    while !pars.eof() && !pars.at_sym() {
        if pars.at_str() {
            pars.str_val()?;
        } else {
            pars.hex_val()?;
        }
    }
    Ok(())
}

// consume the informational fields and resolution lines of one stanza,
// stopping at the next `conflict` header or end of input. The bare
// resolutions are written with an empty string value, consumed here.
fn scan_stanza(pars: &mut Parser) -> Result<Vec<ResLine>> {
    let mut lines = vec![];
    while !pars.eof() && !pars.symp("conflict") {
        let sym = pars.sym()?;
        match sym.as_str() {
            "resolved_drop_left" => {
                skip_values(pars)?;
                lines.push(ResLine::DropLeft);
            }
            "resolved_drop_right" => {
                skip_values(pars)?;
                lines.push(ResLine::DropRight);
            }
            "resolved_keep_left" => {
                skip_values(pars)?;
                lines.push(ResLine::KeepLeft);
            }
            "resolved_keep_right" => {
                skip_values(pars)?;
                lines.push(ResLine::KeepRight);
            }
            "resolved_internal" => {
                skip_values(pars)?;
                lines.push(ResLine::Internal);
            }
            "resolved_rename_left" => {
                lines.push(ResLine::RenameLeft(FilePath::from_str(&pars.str_val()?)?))
            }
            "resolved_rename_right" => {
                lines.push(ResLine::RenameRight(FilePath::from_str(&pars.str_val()?)?))
            }
            "resolved_user_left" => {
                lines.push(ResLine::UserLeft(FilePath::from_str(&pars.str_val()?)?))
            }
            "resolved_user_right" => {
                lines.push(ResLine::UserRight(FilePath::from_str(&pars.str_val()?)?))
            }
            "resolved_user_rename_left" => {
                let name = FilePath::from_str(&pars.str_val()?)?;
                let content = FilePath::from_str(&pars.str_val()?)?;
                lines.push(ResLine::UserRenameLeft(name, content));
            }
            "resolved_user_rename_right" => {
                let name = FilePath::from_str(&pars.str_val()?)?;
                let content = FilePath::from_str(&pars.str_val()?)?;
                lines.push(ResLine::UserRenameRight(name, content));
            }
            _ => skip_values(pars)?,
        }
    }
    Ok(lines)
}

fn expect_kind(pars: &mut Parser, kinds: &[&str]) -> Result<String> {
    if !pars.symp("conflict") {
        err_at!(UserError, msg: "{}", MISMATCH)?
    }
    pars.esym("conflict")?;
    let kind = pars.str_val()?;
    if !kinds.contains(&kind.as_str()) {
        err_at!(UserError, msg: "{}", MISMATCH)?
    }
    Ok(kind)
}

/// Parse a conflicts file against the live conflict set, filling in
/// resolution fields. The stanzas must match the conflicts position
/// for position; any drift fails with a mismatch error.
pub fn read_conflict_text(
    text: &str,
    result: &mut RosterMergeResult,
) -> Result<(RevisionId, RevisionId, Option<RevisionId>)> {
    let mut pars = Parser::new(text)?;

    pars.esym("left")?;
    let left_rid = RevisionId::from_str(&pars.hex_val()?)?;
    pars.esym("right")?;
    let right_rid = RevisionId::from_str(&pars.hex_val()?)?;
    let ancestor_rid = if pars.symp("ancestor") {
        pars.esym("ancestor")?;
        Some(RevisionId::from_str(&pars.hex_val()?)?)
    } else {
        None
    };

    for _ in result.missing_root_conflicts.iter() {
        expect_kind(&mut pars, &["missing_root"])?;
        scan_stanza(&mut pars)?;
    }
    for _ in result.invalid_name_conflicts.iter() {
        expect_kind(&mut pars, &["invalid_name"])?;
        scan_stanza(&mut pars)?;
    }
    for _ in result.directory_loop_conflicts.iter() {
        expect_kind(&mut pars, &["directory_loop"])?;
        scan_stanza(&mut pars)?;
    }
    for c in result.orphaned_node_conflicts.iter_mut() {
        expect_kind(&mut pars, &["orphaned_file", "orphaned_directory"])?;
        for line in scan_stanza(&mut pars)? {
            if line.side() != Some(c.side) {
                err_at!(UserError, msg: "{}", MISMATCH)?
            }
            c.resolution = Some(match line {
                ResLine::DropLeft | ResLine::DropRight => OrphanedNodeResolution::Drop,
                ResLine::RenameLeft(path) | ResLine::RenameRight(path) => {
                    OrphanedNodeResolution::Rename(path)
                }
                _ => err_at!(
                    UserError, msg: "unknown resolution for orphaned node"
                )?,
            });
        }
    }
    for _ in result.multiple_name_conflicts.iter() {
        expect_kind(&mut pars, &["multiple_names"])?;
        scan_stanza(&mut pars)?;
    }
    for c in result.dropped_modified_conflicts.iter_mut() {
        expect_kind(&mut pars, &["dropped_modified"])?;
        let survivor = c.dropped.opposite();
        for line in scan_stanza(&mut pars)? {
            if line.side() != Some(survivor) {
                err_at!(UserError, msg: "{}", MISMATCH)?
            }
            c.resolution = Some(match line {
                ResLine::DropLeft | ResLine::DropRight => DroppedModifiedResolution::Drop,
                ResLine::KeepLeft | ResLine::KeepRight => DroppedModifiedResolution::Keep,
                ResLine::RenameLeft(path) | ResLine::RenameRight(path) => {
                    DroppedModifiedResolution::Rename(path)
                }
                ResLine::UserLeft(path) | ResLine::UserRight(path) => {
                    DroppedModifiedResolution::User(path)
                }
                ResLine::UserRenameLeft(name, content)
                | ResLine::UserRenameRight(name, content) => {
                    DroppedModifiedResolution::UserRename(name, content)
                }
                ResLine::Internal => err_at!(
                    UserError, msg: "unknown resolution for dropped_modified"
                )?,
            });
        }
    }
    for c in result.duplicate_name_conflicts.iter_mut() {
        expect_kind(&mut pars, &["duplicate_name"])?;
        for line in scan_stanza(&mut pars)? {
            let resolution = match &line {
                ResLine::DropLeft | ResLine::DropRight => DuplicateNameResolution::Drop,
                ResLine::KeepLeft | ResLine::KeepRight => DuplicateNameResolution::Keep,
                ResLine::RenameLeft(path) | ResLine::RenameRight(path) => {
                    DuplicateNameResolution::Rename(path.clone())
                }
                ResLine::UserLeft(path) | ResLine::UserRight(path) => {
                    DuplicateNameResolution::User(path.clone())
                }
                _ => err_at!(
                    UserError, msg: "unknown resolution for duplicate_name"
                )?,
            };
            match line.side() {
                Some(Side::Left) => c.left_resolution = Some(resolution),
                Some(Side::Right) => c.right_resolution = Some(resolution),
                None => err_at!(UserError, msg: "{}", MISMATCH)?,
            }
        }
    }
    for _ in result.attribute_conflicts.iter() {
        expect_kind(&mut pars, &["attribute"])?;
        scan_stanza(&mut pars)?;
    }
    for c in result.file_content_conflicts.iter_mut() {
        expect_kind(&mut pars, &["content"])?;
        for line in scan_stanza(&mut pars)? {
            c.resolution = Some(match line {
                ResLine::Internal => FileContentResolution::Internal,
                ResLine::UserLeft(path) | ResLine::UserRight(path) => {
                    FileContentResolution::User(path)
                }
                _ => err_at!(UserError, msg: "unknown resolution for content")?,
            });
        }
    }

    if !pars.eof() {
        err_at!(UserError, msg: "{}", MISMATCH)?
    }
    Ok((left_rid, right_rid, ancestor_rid))
}

#[cfg(test)]
#[path = "io_test.rs"]
mod io_test;
