use super::*;

use crate::roster::{
    mod_test::{fid, path, sample_roster},
    TempIdSource,
};

#[test]
fn test_apply_order() {
    let mut nis = TempIdSource::new();
    let (mut roster, _) = sample_roster(&mut nis);

    // delete readme, rename src -> lib, add dir src, add file src/new,
    // patch lib/main, set an attr on it.
    let mut cset = Cset::new();
    cset.nodes_deleted.insert(path("readme"));
    cset.nodes_renamed.insert(path("src"), path("lib"));
    cset.dirs_added.insert(path("src"));
    cset.files_added.insert(path("src/new"), fid(5));
    cset.deltas_applied.insert(path("lib/main"), (fid(1), fid(6)));
    cset.attrs_set.insert((path("lib/main"), "mtn:execute".to_string()), "true".to_string());

    cset.apply_to(&mut roster, &mut nis).unwrap();
    roster.check_sane().unwrap();

    assert!(!roster.has_path(&path("readme")));
    let main = roster.lookup(&path("lib/main")).unwrap();
    assert_eq!(roster.get_node(&main).unwrap().content(), Some(&fid(6)));
    assert_eq!(roster.lookup(&path("src/new")).is_ok(), true);
    assert_eq!(
        roster.get_node(&main).unwrap().live_attrs().get("mtn:execute"),
        Some(&"true".to_string())
    );
}

#[test]
fn test_apply_structural_errors() {
    let mut nis = TempIdSource::new();

    // deleting a non-empty directory is illegal.
    let (mut roster, _) = sample_roster(&mut nis);
    let mut cset = Cset::new();
    cset.nodes_deleted.insert(path("src"));
    assert!(cset.apply_to(&mut roster, &mut nis).is_err());

    // delta preimage must match.
    let (mut roster, _) = sample_roster(&mut nis);
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("src/main"), (fid(9), fid(10)));
    assert!(cset.apply_to(&mut roster, &mut nis).is_err());

    // adding over an existing name is illegal.
    let (mut roster, _) = sample_roster(&mut nis);
    let mut cset = Cset::new();
    cset.files_added.insert(path("readme"), fid(9));
    assert!(cset.apply_to(&mut roster, &mut nis).is_err());
}

#[test]
fn test_swap_renames() {
    let mut nis = TempIdSource::new();
    let (mut roster, nids) = sample_roster(&mut nis);

    let mut cset = Cset::new();
    cset.nodes_renamed.insert(path("readme"), path("src/main"));
    cset.nodes_renamed.insert(path("src/main"), path("readme"));
    cset.apply_to(&mut roster, &mut nis).unwrap();
    roster.check_sane().unwrap();

    assert_eq!(roster.lookup(&path("readme")).unwrap(), nids[2]);
    assert_eq!(roster.lookup(&path("src/main")).unwrap(), nids[3]);
}

#[test]
fn test_nested_renames() {
    let mut nis = TempIdSource::new();
    let (mut roster, nids) = sample_roster(&mut nis);

    // rename both a directory and a node inside it.
    let mut cset = Cset::new();
    cset.nodes_renamed.insert(path("src"), path("lib"));
    cset.nodes_renamed.insert(path("src/main"), path("lib/primary"));
    cset.apply_to(&mut roster, &mut nis).unwrap();
    roster.check_sane().unwrap();

    assert_eq!(roster.lookup(&path("lib")).unwrap(), nids[1]);
    assert_eq!(roster.lookup(&path("lib/primary")).unwrap(), nids[2]);
}

#[test]
fn test_make_cset_minimal() {
    let mut nis = TempIdSource::new();
    let (from, _) = sample_roster(&mut nis);
    let mut to = from.clone();

    // rename a directory; children paths change but only one rename
    // is recorded, node identity sees through the path shift.
    let src = to.detach_node(&path("src")).unwrap();
    to.attach_node(src, &path("lib")).unwrap();

    let cset = make_cset(&from, &to).unwrap();
    assert_eq!(cset.nodes_renamed.len(), 1);
    assert_eq!(cset.nodes_renamed.get(&path("src")), Some(&path("lib")));
    assert!(cset.nodes_deleted.is_empty());
    assert!(cset.dirs_added.is_empty());
    assert!(cset.files_added.is_empty());
    assert!(cset.deltas_applied.is_empty());
}

#[test]
fn test_make_cset_round_trip() {
    let mut nis = TempIdSource::new();
    let (from, _) = sample_roster(&mut nis);

    let mut to = from.clone();
    // a delete, a rename, an add, a patch and attr edits.
    let readme = to.detach_node(&path("readme")).unwrap();
    to.drop_detached_node(&readme).unwrap();
    let main = to.detach_node(&path("src/main")).unwrap();
    to.attach_node(main, &path("main")).unwrap();
    to.set_content(&main, fid(6)).unwrap();
    to.set_attr(&main, "mtn:execute", "true").unwrap();
    let new_dir = to.create_dir_node(&mut nis).unwrap();
    to.attach_node(new_dir, &path("docs")).unwrap();
    let new_file = to.create_file_node(fid(7), &mut nis).unwrap();
    to.attach_node(new_file, &path("docs/guide")).unwrap();

    let cset = make_cset(&from, &to).unwrap();
    let mut replay = from.clone();
    cset.apply_to(&mut replay, &mut nis).unwrap();

    // same shape and content, node for node, for shared identities.
    assert_eq!(replay.lookup(&path("main")).unwrap(), main);
    assert!(replay.has_path(&path("docs/guide")));
    assert!(!replay.has_path(&path("readme")));
    assert_eq!(
        replay.get_node(&main).unwrap().live_attrs(),
        to.get_node(&main).unwrap().live_attrs()
    );
    assert_eq!(replay.get_node(&main).unwrap().content(), Some(&fid(6)));

    // and apply(make_cset(from, to)) reproduces `to` as a cset fixpoint:
    let cset2 = make_cset(&from, &replay).unwrap();
    assert_eq!(cset, cset2);
}

#[test]
fn test_cset_serialization_round_trip() {
    let mut cset = Cset::new();
    cset.nodes_deleted.insert(path("old"));
    cset.nodes_renamed.insert(path("a"), path("b"));
    cset.dirs_added.insert(path("docs"));
    cset.files_added.insert(path("docs/guide"), fid(7));
    cset.deltas_applied.insert(path("main"), (fid(1), fid(2)));
    cset.attrs_cleared.insert((path("main"), "old:attr".to_string()));
    cset.attrs_set.insert((path("main"), "mtn:execute".to_string()), "true".to_string());

    let mut pr = crate::basic_io::Printer::new();
    cset.push_stanzas(&mut pr);
    let text = pr.unwrap();

    let mut pars = crate::basic_io::Parser::new(&text).unwrap();
    let back = Cset::parse(&mut pars).unwrap();
    assert!(pars.eof());
    assert_eq!(back, cset);

    // serialization is stable.
    let mut pr = crate::basic_io::Printer::new();
    back.push_stanzas(&mut pr);
    assert_eq!(pr.unwrap(), text);
}

#[test]
fn test_cset_check_sane() {
    let mut cset = Cset::new();
    cset.nodes_renamed.insert(path("a"), path("x"));
    cset.nodes_renamed.insert(path("b"), path("x"));
    assert!(cset.check_sane().is_err());

    let mut cset = Cset::new();
    cset.nodes_deleted.insert(path("a"));
    cset.nodes_renamed.insert(path("a"), path("b"));
    assert!(cset.check_sane().is_err());

    let mut cset = Cset::new();
    cset.dirs_added.insert(path("a"));
    cset.files_added.insert(path("a"), fid(1));
    assert!(cset.check_sane().is_err());

    let mut cset = Cset::new();
    cset.files_added.insert(path("a"), fid(1));
    cset.deltas_applied.insert(path("a"), (fid(1), fid(2)));
    assert!(cset.check_sane().is_err());
}

#[test]
fn test_root_add() {
    // the very first cset adds the root directory.
    let mut nis = TempIdSource::new();
    let mut roster = Roster::new();
    let mut cset = Cset::new();
    cset.dirs_added.insert(path(""));
    cset.files_added.insert(path("hello"), fid(1));
    cset.apply_to(&mut roster, &mut nis).unwrap();
    roster.check_sane().unwrap();
    assert!(roster.has_root());
    assert!(roster.has_path(&path("hello")));
}
