use super::*;

use std::str::FromStr;
use std::sync::Arc;

use crate::{
    db::Database,
    hash::FileId,
    path::FilePath,
    revision::{revision_id, Revision},
    roster::{cset::Cset, io as rio, TempIdSource},
};

pub(crate) fn tmpdir(name: &str) -> std::ffi::OsString {
    let mut dir = std::env::temp_dir();
    dir.push(format!("revdb-merge-test-{}-{}", name, std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    dir.into_os_string()
}

pub(crate) fn path(s: &str) -> FilePath {
    FilePath::from_str(s).unwrap()
}

// commit `cset` on top of `parent`, contents must be in the store.
pub(crate) fn commit(db: &mut Database, parent: &RevisionId, cset: Cset) -> RevisionId {
    let (proster, _) = db.get_roster(parent).unwrap();
    let mut roster = (*proster).clone();
    let mut scratch = TempIdSource::new();
    cset.apply_to(&mut roster, &mut scratch).unwrap();
    let manifest = rio::manifest_id(&roster).unwrap();

    let mut rev = Revision::new(manifest);
    rev.edges.insert(*parent, cset);
    let id = revision_id(&rev);
    assert!(db.put_revision(&id, rev).unwrap());
    id
}

pub(crate) fn put_file(db: &mut Database, data: &[u8]) -> FileId {
    let fid = FileId::digest(data);
    db.put_file(&fid, data.to_vec()).unwrap();
    fid
}

// everything roster_merge needs for the heads `left` and `right`.
pub(crate) struct Heads {
    pub left_roster: Arc<Roster>,
    pub left_marking: Arc<MarkingMap>,
    pub left_uncommon: BTreeSet<RevisionId>,
    pub right_roster: Arc<Roster>,
    pub right_marking: Arc<MarkingMap>,
    pub right_uncommon: BTreeSet<RevisionId>,
}

impl Heads {
    pub fn fetch(db: &mut Database, left: &RevisionId, right: &RevisionId) -> Heads {
        let (left_uncommon, right_uncommon) =
            db.get_uncommon_ancestors(left, right).unwrap();
        let (left_roster, left_marking) = db.get_roster(left).unwrap();
        let (right_roster, right_marking) = db.get_roster(right).unwrap();
        Heads {
            left_roster,
            left_marking,
            left_uncommon,
            right_roster,
            right_marking,
            right_uncommon,
        }
    }

    pub fn left(&self) -> MergeInput {
        MergeInput {
            roster: &self.left_roster,
            marking: &self.left_marking,
            uncommon: &self.left_uncommon,
        }
    }

    pub fn right(&self) -> MergeInput {
        MergeInput {
            roster: &self.right_roster,
            marking: &self.right_marking,
            uncommon: &self.right_uncommon,
        }
    }
}

// ancestor with `hello` under the root.
pub(crate) fn simple_ancestor(db: &mut Database) -> RevisionId {
    let hello = put_file(db, b"hello\nworld\n");
    let mut cset = Cset::new();
    cset.dirs_added.insert(path(""));
    cset.files_added.insert(path("hello"), hello);
    commit(db, &RevisionId::null(), cset)
}

#[test]
fn test_clean_merge_disjoint_edits() {
    let mut db = Database::open_quiet(&tmpdir("clean"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    // left adds a file, right edits hello.
    let extra = put_file(&mut db, b"extra\n");
    let mut cset = Cset::new();
    cset.files_added.insert(path("extra"), extra);
    let r1 = commit(&mut db, &r0, cset);

    let edited = put_file(&mut db, b"hello\nworld\nmore\n");
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("hello"), (FileId::digest(b"hello\nworld\n"), edited));
    let r2 = commit(&mut db, &r0, cset);

    let heads = Heads::fetch(&mut db, &r1, &r2);
    let result = roster_merge(heads.left(), heads.right()).unwrap();
    assert!(result.is_clean(), "{:?}", result);

    result.roster.check_sane().unwrap();
    assert!(result.roster.has_path(&path("extra")));
    let hello = result.roster.lookup(&path("hello")).unwrap();
    assert_eq!(result.roster.get_node(&hello).unwrap().content(), Some(&edited));

    // markings for the merged roster follow the mark-merge rule.
    let marking = mark_merge_result(
        &heads.left(),
        &heads.right(),
        &result.roster,
        RevisionId::digest(b"merge"),
    )
    .unwrap();
    assert_eq!(marking.get(&hello).unwrap().file_content, crate::roster::singleton(r2));
}

#[test]
fn test_merge_idempotence() {
    let mut db = Database::open_quiet(&tmpdir("idempotent"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    let heads = Heads::fetch(&mut db, &r0, &r0);
    assert!(heads.left_uncommon.is_empty() && heads.right_uncommon.is_empty());

    let result = roster_merge(heads.left(), heads.right()).unwrap();
    assert!(result.is_clean());
    assert_eq!(result.roster, *heads.left_roster);
}

#[test]
fn test_duplicate_name_conflict() {
    let mut db = Database::open_quiet(&tmpdir("dup"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    // left adds foo as a file, right adds foo as a directory.
    let f1 = put_file(&mut db, b"left content\n");
    let mut cset = Cset::new();
    cset.files_added.insert(path("foo"), f1);
    let r1 = commit(&mut db, &r0, cset);

    let mut cset = Cset::new();
    cset.dirs_added.insert(path("foo"));
    let r2 = commit(&mut db, &r0, cset);

    let heads = Heads::fetch(&mut db, &r1, &r2);
    let result = roster_merge(heads.left(), heads.right()).unwrap();

    assert_eq!(result.count_conflicts(), 1);
    let c = &result.duplicate_name_conflicts[0];
    assert_ne!(c.left_nid, c.right_nid);
    assert_eq!(c.name.as_str(), "foo");
    assert!(heads.left_roster.has_node(&c.left_nid));
    assert!(heads.right_roster.has_node(&c.right_nid));
    // both claimants sit detached until resolution.
    assert!(!result.roster.is_attached(&c.left_nid));
    assert!(!result.roster.is_attached(&c.right_nid));

    // structural symmetry: swapping the inputs swaps the sides.
    let swapped = roster_merge(heads.right(), heads.left()).unwrap();
    assert_eq!(swapped.count_conflicts(), 1);
    let s = &swapped.duplicate_name_conflicts[0];
    assert_eq!(s.left_nid, c.right_nid);
    assert_eq!(s.right_nid, c.left_nid);
}

#[test]
fn test_orphaned_node_conflict() {
    let mut db = Database::open_quiet(&tmpdir("orphan"), "test").unwrap();

    // ancestor has /a/b; left adds /a/c; right deletes the subtree.
    let b = put_file(&mut db, b"b content\n");
    let mut cset = Cset::new();
    cset.dirs_added.insert(path(""));
    cset.dirs_added.insert(path("a"));
    cset.files_added.insert(path("a/b"), b);
    let r0 = commit(&mut db, &RevisionId::null(), cset);

    let c = put_file(&mut db, b"c content\n");
    let mut cset = Cset::new();
    cset.files_added.insert(path("a/c"), c);
    let r1 = commit(&mut db, &r0, cset);

    let mut cset = Cset::new();
    cset.nodes_deleted.insert(path("a"));
    cset.nodes_deleted.insert(path("a/b"));
    let r2 = commit(&mut db, &r0, cset);

    let heads = Heads::fetch(&mut db, &r1, &r2);
    let result = roster_merge(heads.left(), heads.right()).unwrap();

    assert_eq!(result.count_conflicts(), 1, "{:?}", result);
    let conflict = &result.orphaned_node_conflicts[0];
    assert_eq!(conflict.side, Side::Left);
    assert_eq!(conflict.name.as_str(), "c");
    assert!(!result.roster.is_attached(&conflict.nid));
    // the deleted parent is really gone from the merged tree.
    assert!(!result.roster.has_node(&conflict.parent));
}

#[test]
fn test_dropped_modified_conflict() {
    let mut db = Database::open_quiet(&tmpdir("dropped"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    // left edits hello, right deletes it.
    let edited = put_file(&mut db, b"hello\nworld\nedited\n");
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("hello"), (FileId::digest(b"hello\nworld\n"), edited));
    let r1 = commit(&mut db, &r0, cset);

    let mut cset = Cset::new();
    cset.nodes_deleted.insert(path("hello"));
    let r2 = commit(&mut db, &r0, cset);

    let heads = Heads::fetch(&mut db, &r1, &r2);
    let result = roster_merge(heads.left(), heads.right()).unwrap();

    assert_eq!(result.count_conflicts(), 1, "{:?}", result);
    let c = &result.dropped_modified_conflicts[0];
    assert_eq!(c.dropped, Side::Right);
    assert_eq!(c.name.as_str(), "hello");
    assert!(!c.orphaned);
    assert!(result.roster.has_node(&c.nid));
    assert!(!result.roster.is_attached(&c.nid));
}

#[test]
fn test_delete_unmodified_is_silent() {
    let mut db = Database::open_quiet(&tmpdir("silent-delete"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    // left does something unrelated, right deletes hello.
    let extra = put_file(&mut db, b"extra\n");
    let mut cset = Cset::new();
    cset.files_added.insert(path("extra"), extra);
    let r1 = commit(&mut db, &r0, cset);

    let mut cset = Cset::new();
    cset.nodes_deleted.insert(path("hello"));
    let r2 = commit(&mut db, &r0, cset);

    let heads = Heads::fetch(&mut db, &r1, &r2);
    let result = roster_merge(heads.left(), heads.right()).unwrap();
    assert!(result.is_clean(), "{:?}", result);
    assert!(!result.roster.has_path(&path("hello")));
    assert!(result.roster.has_path(&path("extra")));
}

#[test]
fn test_content_conflict() {
    let mut db = Database::open_quiet(&tmpdir("content"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    let old = FileId::digest(b"hello\nworld\n");
    let left = put_file(&mut db, b"hello\nworld\nleft\n");
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("hello"), (old, left));
    let r1 = commit(&mut db, &r0, cset);

    let right = put_file(&mut db, b"right\nhello\nworld\n");
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("hello"), (old, right));
    let r2 = commit(&mut db, &r0, cset);

    let heads = Heads::fetch(&mut db, &r1, &r2);
    let result = roster_merge(heads.left(), heads.right()).unwrap();

    assert_eq!(result.count_conflicts(), 1);
    let c = &result.file_content_conflicts[0];
    assert_eq!(c.left, left);
    assert_eq!(c.right, right);
    // the node stays attached, its content pending.
    assert!(result.roster.is_attached(&c.nid));
    assert_eq!(result.roster.get_node(&c.nid).unwrap().content(), Some(&FileId::null()));
}

#[test]
fn test_multiple_name_conflict() {
    let mut db = Database::open_quiet(&tmpdir("multi-name"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    let mut cset = Cset::new();
    cset.nodes_renamed.insert(path("hello"), path("left-name"));
    let r1 = commit(&mut db, &r0, cset);

    let mut cset = Cset::new();
    cset.nodes_renamed.insert(path("hello"), path("right-name"));
    let r2 = commit(&mut db, &r0, cset);

    let heads = Heads::fetch(&mut db, &r1, &r2);
    let result = roster_merge(heads.left(), heads.right()).unwrap();

    assert_eq!(result.count_conflicts(), 1);
    let c = &result.multiple_name_conflicts[0];
    assert_eq!(c.left.1.as_ref().unwrap().as_str(), "left-name");
    assert_eq!(c.right.1.as_ref().unwrap().as_str(), "right-name");
    assert!(result.has_non_resolvable());
}

#[test]
fn test_rename_wins_over_stale_name() {
    let mut db = Database::open_quiet(&tmpdir("rename-wins"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    // left renames hello, right only edits its content.
    let mut cset = Cset::new();
    cset.nodes_renamed.insert(path("hello"), path("greeting"));
    let r1 = commit(&mut db, &r0, cset);

    let edited = put_file(&mut db, b"hello\nworld\nedited\n");
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path("hello"), (FileId::digest(b"hello\nworld\n"), edited));
    let r2 = commit(&mut db, &r0, cset);

    let heads = Heads::fetch(&mut db, &r1, &r2);
    let result = roster_merge(heads.left(), heads.right()).unwrap();
    assert!(result.is_clean(), "{:?}", result);

    let nid = result.roster.lookup(&path("greeting")).unwrap();
    assert_eq!(result.roster.get_node(&nid).unwrap().content(), Some(&edited));
}

#[test]
fn test_attribute_conflict_and_merge() {
    let mut db = Database::open_quiet(&tmpdir("attrs"), "test").unwrap();
    let r0 = simple_ancestor(&mut db);

    let mut cset = Cset::new();
    cset.attrs_set.insert((path("hello"), "mtn:execute".to_string()), "true".to_string());
    let r1 = commit(&mut db, &r0, cset);

    let mut cset = Cset::new();
    cset.attrs_set.insert((path("hello"), "mtn:execute".to_string()), "false".to_string());
    let r2 = commit(&mut db, &r0, cset);

    let heads = Heads::fetch(&mut db, &r1, &r2);
    let result = roster_merge(heads.left(), heads.right()).unwrap();
    assert_eq!(result.count_conflicts(), 1);
    let c = &result.attribute_conflicts[0];
    assert_eq!(c.key, "mtn:execute");
    assert_eq!(c.left, (true, "true".to_string()));
    assert_eq!(c.right, (true, "false".to_string()));

    // one-sided attr additions merge cleanly.
    let mut cset = Cset::new();
    cset.attrs_set.insert((path("hello"), "mtn:keep".to_string()), "yes".to_string());
    let r3 = commit(&mut db, &r1, cset);
    let heads = Heads::fetch(&mut db, &r3, &r1);
    let result = roster_merge(heads.left(), heads.right()).unwrap();
    assert!(result.is_clean());
}
