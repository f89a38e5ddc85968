//! Module implement the canonical textual forms of a roster.
//!
//! Two forms exist. The manifest form lists every node with its path,
//! content and live attributes; its hash is what a revision records as
//! `new_manifest`. The full form adds node identities, birth revisions
//! and mark sets and is what the roster store persists. Both forms are
//! deterministic, stanzas ordered by path, sets ordered ascending.

use std::str::FromStr;

use crate::{
    basic_io::{Parser, Printer, Stanza},
    hash::{FileId, ManifestId, NodeId, RevisionId, RosterId},
    path::FilePath,
    roster::{Marking, MarkingMap, Node, Roster},
    Result,
};

fn attached_paths(roster: &Roster) -> Result<Vec<(FilePath, NodeId)>> {
    let mut paths = vec![];
    for (nid, _) in roster.all_nodes() {
        if roster.is_attached(nid) {
            paths.push((roster.get_name(nid)?, *nid));
        } else {
            err_at!(InvalidInput, msg: "serializing roster with detached {:?}", nid)?
        }
    }
    paths.sort();
    Ok(paths)
}

fn push_node(st: &mut Stanza, path: &FilePath, node: &Node) {
    match node.content() {
        None => {
            st.push_str("dir", &path.to_string());
        }
        Some(content) => {
            st.push_str("file", &path.to_string());
            st.push_hex("content", &content.to_hex());
        }
    }
    for (key, (live, value)) in node.attrs.iter() {
        if *live {
            st.push_multi(
                "attr",
                vec![
                    crate::basic_io::Value::Str(key.clone()),
                    crate::basic_io::Value::Str(value.clone()),
                ],
            );
        }
    }
}

/// Manifest form, the restricted serialization without markings.
pub fn manifest_text(roster: &Roster) -> Result<String> {
    let mut pr = Printer::new();
    let mut st = Stanza::new();
    st.push_str("format_version", "1");
    pr.push_stanza(&st);

    for (path, nid) in attached_paths(roster)? {
        let mut st = Stanza::new();
        push_node(&mut st, &path, roster.get_node(&nid)?);
        pr.push_stanza(&st);
    }
    Ok(pr.unwrap())
}

/// Hash of the manifest form.
pub fn manifest_id(roster: &Roster) -> Result<ManifestId> {
    Ok(ManifestId::digest(manifest_text(roster)?.as_bytes()))
}

/// Full form, markings included; what the roster store persists.
pub fn roster_text(roster: &Roster, marking: &MarkingMap) -> Result<String> {
    let mut pr = Printer::new();
    let mut st = Stanza::new();
    st.push_str("format_version", "1");
    pr.push_stanza(&st);

    for (path, nid) in attached_paths(roster)? {
        let node = roster.get_node(&nid)?;
        let marks = marking.get(&nid)?;

        let mut st = Stanza::new();
        push_node(&mut st, &path, node);
        for (key, (live, _)) in node.attrs.iter() {
            if !*live {
                st.push_str("dormant_attr", key);
            }
        }
        st.push_str("ident", &nid.to_string());
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
                    vec![
                        crate::basic_io::Value::Str(key.clone()),
                        crate::basic_io::Value::Hex(rev.to_hex()),
                    ],
                );
            }
        }
        pr.push_stanza(&st);
    }
    Ok(pr.unwrap())
}

/// Hash of the full form.
pub fn roster_id(roster: &Roster, marking: &MarkingMap) -> Result<RosterId> {
    Ok(RosterId::digest(roster_text(roster, marking)?.as_bytes()))
}

/// Parse the full form back into a roster and its markings.
pub fn parse_roster_text(text: &str) -> Result<(Roster, MarkingMap)> {
    let mut pars = Parser::new(text)?;
    pars.esym("format_version")?;
    let version = pars.str_val()?;
    if version != "1" {
        err_at!(DecodeFail, msg: "unknown roster format version {:?}", version)?
    }

    let mut roster = Roster::new();
    let mut marking = MarkingMap::new();

    while !pars.eof() {
        let (path, mut node) = match pars.sym()?.as_str() {
            "dir" => {
                let path = FilePath::from_str(&pars.str_val()?)?;
                (path, Node::scratch_dir())
            }
            "file" => {
                let path = FilePath::from_str(&pars.str_val()?)?;
                pars.esym("content")?;
                let content = FileId::from_str(&pars.hex_val()?)?;
                (path, Node::scratch_file(content))
            }
            sym => err_at!(DecodeFail, msg: "unexpected roster stanza {:?}", sym)?,
        };

        while pars.symp("attr") {
            pars.esym("attr")?;
            let key = pars.str_val()?;
            let value = pars.str_val()?;
            node.attrs.insert(key, (true, value));
        }
        while pars.symp("dormant_attr") {
            pars.esym("dormant_attr")?;
            let key = pars.str_val()?;
            node.attrs.insert(key, (false, String::new()));
        }

        pars.esym("ident")?;
        let nid = {
            let raw = pars.str_val()?;
            NodeId(err_at!(DecodeFail, raw.parse::<u64>(), "bad ident {:?}", raw)?)
        };

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

        roster.insert_node(nid, node)?;
        roster.attach_node(nid, &path)?;
        marking.insert(nid, marks);
    }

    Ok((roster, marking))
}

#[cfg(test)]
#[path = "io_test.rs"]
mod io_test;
