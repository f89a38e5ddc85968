use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

use crate::{
    revision::revision_id,
    roster::{cset::make_cset, io as rio},
};

use std::str::FromStr;

fn tmpdir(name: &str) -> std::ffi::OsString {
    let mut dir = std::env::temp_dir();
    dir.push(format!("revdb-db-test-{}-{}", name, std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    dir.into_os_string()
}

fn open_db(name: &str) -> Database {
    Database::open_quiet(&tmpdir(name), "test").unwrap()
}

fn path(s: &str) -> crate::path::FilePath {
    crate::path::FilePath::from_str(s).unwrap()
}

// build the revision committing `cset` on top of `parent`, computing
// the manifest by a scratch application.
fn make_revision(db: &mut Database, parent: &RevisionId, cset: Cset) -> (RevisionId, Revision) {
    let (proster, _) = db.get_roster(parent).unwrap();
    let mut roster = (*proster).clone();
    let mut scratch = TempIdSource::new();
    cset.apply_to(&mut roster, &mut scratch).unwrap();
    let manifest = rio::manifest_id(&roster).unwrap();

    let mut rev = Revision::new(manifest);
    rev.edges.insert(*parent, cset);
    let id = revision_id(&rev);
    (id, rev)
}

fn commit_root(db: &mut Database, files: &[(&str, &[u8])]) -> RevisionId {
    let mut cset = Cset::new();
    cset.dirs_added.insert(path(""));
    for (name, data) in files.iter() {
        let fid = FileId::digest(data);
        db.put_file(&fid, data.to_vec()).unwrap();
        cset.files_added.insert(path(name), fid);
    }
    let (id, rev) = make_revision(db, &RevisionId::null(), cset);
    assert!(db.put_revision(&id, rev).unwrap());
    id
}

fn commit_edit(
    db: &mut Database,
    parent: &RevisionId,
    name: &str,
    old: &[u8],
    new: &[u8],
) -> RevisionId {
    let new_fid = FileId::digest(new);
    db.put_file(&new_fid, new.to_vec()).unwrap();
    let mut cset = Cset::new();
    cset.deltas_applied.insert(path(name), (FileId::digest(old), new_fid));
    let (id, rev) = make_revision(db, parent, cset);
    assert!(db.put_revision(&id, rev).unwrap());
    id
}

#[test]
fn test_put_revision_round_trip() {
    let mut db = open_db("round-trip");

    let r0 = commit_root(&mut db, &[("hello", b"alpha\n")]);
    assert!(db.revision_exists(&r0).unwrap());

    let rev = db.get_revision(&r0).unwrap();
    assert!(rev.is_root());
    assert_eq!(revision_id(&rev), r0);

    // the stored roster matches the manifest recorded in the revision.
    let (roster, marking) = db.get_roster(&r0).unwrap();
    assert_eq!(rio::manifest_id(&roster).unwrap(), rev.new_manifest);
    roster.check_sane_against(&marking, |_| true).unwrap();
    assert!(roster.has_path(&path("hello")));

    // duplicate put is a no-op.
    let rev2 = db.get_revision(&r0).unwrap();
    assert!(!db.put_revision(&r0, rev2).unwrap());
}

#[test]
fn test_height_assignment_scenario() {
    let mut db = open_db("heights");

    let r0 = commit_root(&mut db, &[("hello", b"alpha\n")]);
    let r1 = commit_edit(&mut db, &r0, "hello", b"alpha\n", b"beta\n");
    let r2 = commit_edit(&mut db, &r0, "hello", b"alpha\n", b"gamma\n");

    let h0 = db.get_rev_height(&r0).unwrap();
    let h1 = db.get_rev_height(&r1).unwrap();
    let h2 = db.get_rev_height(&r2).unwrap();
    assert_eq!(h0.as_slice(), &[0]);
    assert_eq!(h1.as_slice(), &[0, 0]);
    assert_eq!(h2.as_slice(), &[0, 1]);
    assert!(h2 > h1);
}

#[test]
fn test_file_deltification() {
    let mut db = open_db("deltify");

    let r0 = commit_root(&mut db, &[("hello", b"alpha\n")]);
    let r1 = commit_edit(&mut db, &r0, "hello", b"alpha\n", b"alphabet\n");
    let _ = (r0, r1);

    let old = FileId::digest(b"alpha\n");
    let new = FileId::digest(b"alphabet\n");

    // with the default reverse direction the old base is gone but the
    // content still reconstructs.
    assert!(!db.pile_mut().exists("files", &old.inner().to_bytes()).unwrap());
    assert_eq!(db.get_file_version(&old).unwrap(), b"alpha\n".to_vec());
    assert_eq!(db.get_file_version(&new).unwrap(), b"alphabet\n".to_vec());
}

#[test]
fn test_branch_leaves_scenario() {
    let seed: u64 = random();
    println!("test_branch_leaves_scenario seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut db = open_db("branch-leaves");
    let pair = crate::cert::keypair_from_bytes(&rng.gen()).unwrap();
    let key = db.put_key("tester", &pair.public).unwrap();

    let r0 = commit_root(&mut db, &[("hello", b"alpha\n")]);
    let cert = Cert::make(r0, "branch", "main", key, &pair);
    assert!(db.put_revision_cert(&cert).unwrap());
    assert_eq!(db.get_branch_leaves("main").unwrap(), [r0].iter().copied().collect());

    let r1 = commit_edit(&mut db, &r0, "hello", b"alpha\n", b"beta\n");
    let cert = Cert::make(r1, "branch", "main", key, &pair);
    assert!(db.put_revision_cert(&cert).unwrap());
    assert_eq!(db.get_branch_leaves("main").unwrap(), [r1].iter().copied().collect());

    let r2 = commit_edit(&mut db, &r0, "hello", b"alpha\n", b"gamma\n");
    let cert = Cert::make(r2, "branch", "main", key, &pair);
    assert!(db.put_revision_cert(&cert).unwrap());
    assert_eq!(
        db.get_branch_leaves("main").unwrap(),
        [r1, r2].iter().copied().collect()
    );

    // recalculation reproduces the same index.
    db.recalc_branch_leaves("main").unwrap();
    assert_eq!(
        db.get_branch_leaves("main").unwrap(),
        [r1, r2].iter().copied().collect()
    );

    // a second branch cert on the same revision is independent.
    let cert = Cert::make(r1, "branch", "side", key, &pair);
    assert!(db.put_revision_cert(&cert).unwrap());
    assert_eq!(db.get_branch_leaves("side").unwrap(), [r1].iter().copied().collect());

    // duplicate cert is refused quietly.
    let cert = Cert::make(r1, "branch", "side", key, &pair);
    assert!(!db.put_revision_cert(&cert).unwrap());
}

#[test]
fn test_cert_on_missing_revision() {
    let seed: u64 = random();
    println!("test_cert_on_missing_revision seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut db = open_db("missing-rev-cert");
    let pair = crate::cert::keypair_from_bytes(&rng.gen()).unwrap();
    let key = db.put_key("tester", &pair.public).unwrap();

    let ghost = RevisionId::digest(b"never committed");
    let cert = Cert::make(ghost, "branch", "main", key, &pair);
    assert!(!db.put_revision_cert(&cert).unwrap());
    assert!(db.get_revision_certs(&ghost).unwrap().is_empty());
}

#[test]
fn test_put_revision_missing_prereqs() {
    let mut db = open_db("missing-prereqs");

    // a root referencing a file that was never stored.
    let mut cset = Cset::new();
    cset.dirs_added.insert(path(""));
    cset.files_added.insert(path("ghost"), FileId::digest(b"ghost content"));
    let (id, rev) = {
        let mut scratch = TempIdSource::new();
        let mut roster = Roster::new();
        cset.apply_to(&mut roster, &mut scratch).unwrap();
        let mut rev = Revision::new(rio::manifest_id(&roster).unwrap());
        rev.edges.insert(RevisionId::null(), cset);
        (revision_id(&rev), rev)
    };
    assert!(!db.put_revision(&id, rev).unwrap());
    assert!(!db.revision_exists(&id).unwrap());

    // a child of a revision the store has never seen.
    let ghost_parent = RevisionId::digest(b"ghost parent");
    let mut cset = Cset::new();
    cset.dirs_added.insert(path("docs"));
    let mut rev = Revision::new(crate::hash::ManifestId::digest(b"whatever"));
    rev.edges.insert(ghost_parent, cset);
    let id = revision_id(&rev);
    assert!(!db.put_revision(&id, rev).unwrap());
}

#[test]
fn test_put_revision_rejects_wrong_id() {
    let mut db = open_db("wrong-id");
    let r0 = commit_root(&mut db, &[("hello", b"alpha\n")]);

    let rev = db.get_revision(&r0).unwrap();
    let bogus = RevisionId::digest(b"not the hash");
    match db.put_revision(&bogus, rev) {
        Err(crate::Error::InvalidInput(_, _)) => (),
        res => panic!("{:?}", res.is_ok()),
    }
}

#[test]
fn test_merge_revision_rebuild() {
    let mut db = open_db("merge-rebuild");

    let r0 = commit_root(&mut db, &[("hello", b"alpha\n"), ("other", b"keep\n")]);
    let r1 = commit_edit(&mut db, &r0, "hello", b"alpha\n", b"left\n");
    let r2 = commit_edit(&mut db, &r0, "other", b"keep\n", b"right\n");

    // the merged tree carries both edits.
    let (left_roster, _) = db.get_roster(&r1).unwrap();
    let mut merged = (*left_roster).clone();
    let other = merged.lookup(&path("other")).unwrap();
    let right_fid = FileId::digest(b"right\n");
    merged.set_content(&other, right_fid).unwrap();
    let manifest = rio::manifest_id(&merged).unwrap();

    let (right_roster, _) = db.get_roster(&r2).unwrap();
    let mut rev = Revision::new(manifest);
    rev.edges.insert(r1, make_cset(&left_roster, &merged).unwrap());
    rev.edges.insert(r2, make_cset(&right_roster, &merged).unwrap());
    let id = revision_id(&rev);

    assert!(db.put_revision(&id, rev).unwrap());

    let (roster, marking) = db.get_roster(&id).unwrap();
    assert_eq!(rio::manifest_id(&roster).unwrap(), manifest);
    roster.check_sane_against(&marking, |_| true).unwrap();

    // content marks point at the revisions that introduced each edit.
    let hello = roster.lookup(&path("hello")).unwrap();
    let other = roster.lookup(&path("other")).unwrap();
    assert_eq!(marking.get(&hello).unwrap().file_content, crate::roster::singleton(r1));
    assert_eq!(marking.get(&other).unwrap().file_content, crate::roster::singleton(r2));

    // uncommon ancestors of the two heads meet at the merge's parents.
    let (left_u, right_u) = db.get_uncommon_ancestors(&r1, &r2).unwrap();
    assert_eq!(left_u, [r1].iter().copied().collect());
    assert_eq!(right_u, [r2].iter().copied().collect());
}

#[test]
fn test_reopen_persists_everything() {
    let dir = tmpdir("reopen");
    let (r0, r1, old, new) = {
        let mut db = Database::open_quiet(&dir, "test").unwrap();
        let r0 = commit_root(&mut db, &[("hello", b"alpha\n")]);
        let r1 = commit_edit(&mut db, &r0, "hello", b"alpha\n", b"alphabet\n");
        (r0, r1, FileId::digest(b"alpha\n"), FileId::digest(b"alphabet\n"))
    };

    let mut db = Database::open_quiet(&dir, "test").unwrap();
    assert!(db.revision_exists(&r0).unwrap());
    assert!(db.revision_exists(&r1).unwrap());
    assert_eq!(db.get_file_version(&old).unwrap(), b"alpha\n".to_vec());
    assert_eq!(db.get_file_version(&new).unwrap(), b"alphabet\n".to_vec());
    let (roster, _) = db.get_roster(&r1).unwrap();
    assert!(roster.has_path(&path("hello")));
    assert_eq!(db.get_revision_parents(&r1).unwrap(), vec![r0]);
    assert_eq!(db.get_leaves().unwrap(), [r1].iter().copied().collect());
}

#[test]
fn test_epochs_and_vars() {
    let mut db = open_db("epochs");
    assert_eq!(db.get_branch_epoch("main").unwrap(), None);
    let epoch = EpochId::digest(b"epoch zero");
    db.set_branch_epoch("main", &epoch).unwrap();
    assert_eq!(db.get_branch_epoch("main").unwrap(), Some(epoch));

    db.with_txn(false, |db| db.set_var("database", "delta-direction", "both"))
        .unwrap();
    assert_eq!(
        db.get_var("database", "delta-direction").unwrap(),
        Some("both".to_string())
    );
}
