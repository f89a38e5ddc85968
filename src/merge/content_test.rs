use super::*;

use crate::{
    db::Database,
    merge::mod_test::{commit, path, put_file, simple_ancestor, tmpdir},
    merge::MergeFrame,
    roster::Cset,
};

#[test]
fn test_merge3_takes_both_sides() {
    let ancestor = b"hello\nworld\n";
    let left = b"hello\nworld\nworld2\n";
    let right = b"hi\nhello\nworld\n";

    let merged = merge3(ancestor, left, right).unwrap();
    assert_eq!(merged, b"hi\nhello\nworld\nworld2\n".to_vec());

    // and symmetrically.
    let merged = merge3(ancestor, right, left).unwrap();
    assert_eq!(merged, b"hi\nhello\nworld\nworld2\n".to_vec());
}

#[test]
fn test_merge3_identical_changes_collapse() {
    let ancestor = b"a\nb\nc\n";
    let both = b"a\nB\nc\n";
    assert_eq!(merge3(ancestor, both, both).unwrap(), both.to_vec());

    // one side unchanged.
    assert_eq!(merge3(ancestor, ancestor, both).unwrap(), both.to_vec());
    assert_eq!(merge3(ancestor, both, ancestor).unwrap(), both.to_vec());
}

#[test]
fn test_merge3_conflicting_changes_fail() {
    let ancestor = b"a\nb\nc\n";
    let left = b"a\nLEFT\nc\n";
    let right = b"a\nRIGHT\nc\n";
    assert_eq!(merge3(ancestor, left, right), None);
}

#[test]
fn test_merge3_deletions() {
    let ancestor = b"one\ntwo\nthree\n";
    let left = b"one\nthree\n"; // deleted two
    let right = b"one\ntwo\nthree\nfour\n"; // appended

    let merged = merge3(ancestor, left, right).unwrap();
    assert_eq!(merged, b"one\nthree\nfour\n".to_vec());

    // delete vs edit of the same line collides.
    let right = b"one\nTWO\nthree\n";
    assert_eq!(merge3(ancestor, left, right), None);
}

#[test]
fn test_merge3_empty_ancestor() {
    // both sides created different content with no common base.
    assert_eq!(merge3(b"", b"left\n", b"right\n"), None);
    // one side stayed empty.
    assert_eq!(merge3(b"", b"", b"right\n").unwrap(), b"right\n".to_vec());
    // both agree.
    assert_eq!(merge3(b"", b"same\n", b"same\n").unwrap(), b"same\n".to_vec());
}

#[test]
fn test_merge3_no_trailing_newline() {
    let ancestor = b"a\nb";
    let left = b"a\nb";
    let right = b"a\nb\nc";
    assert_eq!(merge3(ancestor, left, right).unwrap(), b"a\nb\nc".to_vec());
}

#[test]
fn test_adaptor_auto_merge() {
    let mut db = Database::open_quiet(&tmpdir("adaptor"), "test").unwrap();
    let r0 = simple_ancestor(&mut db); // hello = "hello\nworld\n"

    let old = crate::hash::FileId::digest(b"hello\nworld\n");
    let left = put_file(&mut db, b"hello\nworld\nworld2\n");
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("hello"), (old, left));
    let r1 = commit(&mut db, &r0, cset);

    let right = put_file(&mut db, b"hi\nhello\nworld\n");
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("hello"), (old, right));
    let r2 = commit(&mut db, &r0, cset);

    let (roster, _) = db.get_roster(&r0).unwrap();
    let nid = roster.lookup(&path("hello")).unwrap();

    let frame = MergeFrame { left_rid: r1, right_rid: r2, ancestor_rid: r0 };
    let mut adaptor = ContentMergeAdaptor::new(&mut db, frame);

    assert_eq!(
        adaptor.get_ancestor_content(&nid).unwrap(),
        Some(b"hello\nworld\n".to_vec())
    );
    assert_eq!(adaptor.get_ancestor_file_id(&nid).unwrap(), Some(old));

    let merged = adaptor.auto_merge(&nid, &left, &right).unwrap().unwrap();
    assert_eq!(
        db.get_file_version(&merged).unwrap(),
        b"hi\nhello\nworld\nworld2\n".to_vec()
    );
}

#[test]
fn test_adaptor_merge_failure_leaves_no_file() {
    let mut db = Database::open_quiet(&tmpdir("adaptor-fail"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    let old = crate::hash::FileId::digest(b"hello\nworld\n");
    let left = put_file(&mut db, b"LEFT\nworld\n");
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("hello"), (old, left));
    let r1 = commit(&mut db, &r0, cset);

    let right = put_file(&mut db, b"RIGHT\nworld\n");
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("hello"), (old, right));
    let r2 = commit(&mut db, &r0, cset);

    let (roster, _) = db.get_roster(&r0).unwrap();
    let nid = roster.lookup(&path("hello")).unwrap();

    let frame = MergeFrame { left_rid: r1, right_rid: r2, ancestor_rid: r0 };
    let mut adaptor = ContentMergeAdaptor::new(&mut db, frame);
    assert_eq!(adaptor.auto_merge(&nid, &left, &right).unwrap(), None);
}

#[test]
fn test_ancestor_content_of_fresh_node() {
    let mut db = Database::open_quiet(&tmpdir("fresh-node"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    let fresh = put_file(&mut db, b"fresh\n");
    let mut cset = Cset::new();
    cset.files_added.insert(path("fresh"), fresh);
    let r1 = commit(&mut db, &r0, cset);

    let (roster, _) = db.get_roster(&r1).unwrap();
    let nid = roster.lookup(&path("fresh")).unwrap();

    let frame = MergeFrame {
        left_rid: r1,
        right_rid: r0,
        ancestor_rid: r0,
    };
    let mut adaptor = ContentMergeAdaptor::new(&mut db, frame);
    assert_eq!(adaptor.get_ancestor_content(&nid).unwrap(), None);
}
