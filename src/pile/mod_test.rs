use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

fn tmpdir(name: &str) -> ffi::OsString {
    let mut dir = std::env::temp_dir();
    dir.push(format!("revdb-pile-test-{}-{}", name, std::process::id()));
    std::fs::remove_dir_all(&dir).ok();
    dir.into_os_string()
}

#[test]
fn test_open_and_replay() {
    let dir = tmpdir("replay");
    let mut pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();
    assert_eq!(pile.to_schema(), schema_version());

    pile.begin(false).unwrap();
    pile.set("files", b"k1", b"v1").unwrap();
    pile.set("files", b"k2", b"v2").unwrap();
    pile.commit().unwrap();

    drop(pile);
    let pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();
    assert_eq!(pile.get("files", b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(pile.get("files", b"k2").unwrap(), Some(b"v2".to_vec()));
    assert_eq!(pile.count("files").unwrap(), 2);
}

#[test]
fn test_rollback() {
    let dir = tmpdir("rollback");
    let mut pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();

    pile.begin(false).unwrap();
    pile.set("files", b"k1", b"v1").unwrap();
    pile.commit().unwrap();

    pile.begin(false).unwrap();
    pile.set("files", b"k1", b"v1x").unwrap();
    pile.set("files", b"k2", b"v2").unwrap();
    pile.del("files", b"k1").unwrap();
    // mutations are visible inside the transaction.
    assert_eq!(pile.get("files", b"k1").unwrap(), None);
    assert_eq!(pile.get("files", b"k2").unwrap(), Some(b"v2".to_vec()));
    pile.rollback().unwrap();

    // back to committed state.
    assert_eq!(pile.get("files", b"k1").unwrap(), Some(b"v1".to_vec()));
    assert_eq!(pile.get("files", b"k2").unwrap(), None);
}

#[test]
fn test_nested_txn() {
    let dir = tmpdir("nested");
    let mut pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();

    pile.begin(false).unwrap();
    pile.set("files", b"outer", b"1").unwrap();

    pile.begin(false).unwrap();
    pile.set("files", b"inner", b"2").unwrap();
    pile.rollback().unwrap();

    pile.begin(false).unwrap();
    pile.set("files", b"inner", b"3").unwrap();
    pile.commit().unwrap();

    pile.commit().unwrap();

    drop(pile);
    let pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();
    assert_eq!(pile.get("files", b"outer").unwrap(), Some(b"1".to_vec()));
    assert_eq!(pile.get("files", b"inner").unwrap(), Some(b"3".to_vec()));
}

#[test]
fn test_mutation_outside_txn() {
    let dir = tmpdir("outside");
    let mut pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();
    assert!(pile.set("files", b"k", b"v").is_err());
    assert!(pile.del("files", b"k").is_err());
    assert!(pile.commit().is_err());
    assert!(pile.rollback().is_err());
}

#[test]
fn test_vars_and_node_counter() {
    let dir = tmpdir("vars");
    let mut pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();

    pile.begin(false).unwrap();
    assert_eq!(pile.get_var("database", "delta-direction").unwrap(), None);
    pile.set_var("database", "delta-direction", "forward").unwrap();
    assert_eq!(
        pile.get_var("database", "delta-direction").unwrap(),
        Some("forward".to_string())
    );

    let n1 = pile.next_node_id().unwrap();
    let n2 = pile.next_node_id().unwrap();
    assert_eq!(n1, NodeId(crate::hash::FIRST_NODE));
    assert_eq!(n2, NodeId(crate::hash::FIRST_NODE + 1));
    pile.commit().unwrap();

    drop(pile);
    let mut pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();
    pile.begin(false).unwrap();
    let n3 = pile.next_node_id().unwrap();
    assert_eq!(n3, NodeId(crate::hash::FIRST_NODE + 2));
    pile.rollback().unwrap();
}

#[test]
fn test_key2() {
    let key = key2(b"branch", b"rev");
    let (a, b) = split_key2(&key).unwrap();
    assert_eq!(a, b"branch".to_vec());
    assert_eq!(b, b"rev".to_vec());

    assert!(key.starts_with(&prefix2(b"branch")));
    assert!(!key.starts_with(&prefix2(b"branc")));
    assert!(split_key2(b"xy").is_err());
}

#[test]
fn test_iter_prefix() {
    let dir = tmpdir("prefix");
    let mut pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();

    pile.begin(false).unwrap();
    pile.set("branch_leaves", &key2(b"main", b"r1"), b"").unwrap();
    pile.set("branch_leaves", &key2(b"main", b"r2"), b"").unwrap();
    pile.set("branch_leaves", &key2(b"other", b"r3"), b"").unwrap();
    pile.commit().unwrap();

    let items = pile.iter_prefix("branch_leaves", &prefix2(b"main")).unwrap();
    assert_eq!(items.len(), 2);
    let revs: Vec<Vec<u8>> =
        items.iter().map(|(k, _)| split_key2(k).unwrap().1).collect();
    assert_eq!(revs, vec![b"r1".to_vec(), b"r2".to_vec()]);
}

#[test]
fn test_random_ops_replay() {
    let seed: u64 = random();
    println!("test_random_ops_replay seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let dir = tmpdir("random");
    let mut pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();
    let mut model: std::collections::BTreeMap<Vec<u8>, Vec<u8>> = Default::default();

    for _ in 0..100 {
        pile.begin(false).unwrap();
        let commit = rng.gen::<u8>() % 4 != 0;
        let mut scratch = model.clone();
        for _ in 0..(rng.gen::<usize>() % 20) {
            let key = vec![rng.gen::<u8>() % 32];
            if rng.gen::<bool>() {
                let value = vec![rng.gen::<u8>()];
                pile.set("files", &key, &value).unwrap();
                scratch.insert(key, value);
            } else {
                pile.del("files", &key).unwrap();
                scratch.remove(&key);
            }
        }
        if commit {
            pile.commit().unwrap();
            model = scratch;
        } else {
            pile.rollback().unwrap();
        }
        for (key, value) in model.iter() {
            assert_eq!(pile.get("files", key).unwrap().as_ref(), Some(value));
        }
        assert_eq!(pile.count("files").unwrap(), model.len());
    }

    drop(pile);
    let pile = Pile::open(&dir, "t", OpenMode::Normal).unwrap();
    assert_eq!(pile.count("files").unwrap(), model.len());
    for (key, value) in model.iter() {
        assert_eq!(pile.get("files", key).unwrap().as_ref(), Some(value));
    }
}
