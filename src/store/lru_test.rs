use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

#[test]
fn test_basic() {
    let mut lru: Lru<u64, Vec<u8>> = Lru::new(100, 0);

    assert!(lru.insert_clean(1, vec![1], 10).is_empty());
    assert!(lru.insert_clean(2, vec![2], 10).is_empty());
    assert_eq!(lru.len(), 2);
    assert_eq!(lru.size(), 20);

    assert_eq!(lru.fetch(&1), Some(vec![1]));
    assert_eq!(lru.fetch(&3), None);
    assert!(lru.exists(&2));

    lru.remove(&1);
    assert!(!lru.exists(&1));
    assert_eq!(lru.size(), 10);
}

#[test]
fn test_eviction_order() {
    let mut lru: Lru<u64, u64> = Lru::new(30, 0);

    lru.insert_clean(1, 1, 10);
    lru.insert_clean(2, 2, 10);
    lru.insert_clean(3, 3, 10);
    // refresh 1 so that 2 is now the least recently used.
    lru.touch(&1);
    lru.insert_clean(4, 4, 10);

    assert!(lru.exists(&1));
    assert!(!lru.exists(&2));
    assert!(lru.exists(&3));
    assert!(lru.exists(&4));
}

#[test]
fn test_dirty_spill() {
    let mut lru: Lru<u64, u64> = Lru::new(20, 0);

    assert!(lru.insert_dirty(1, 100, 10).is_empty());
    assert!(lru.insert_clean(2, 200, 10).is_empty());
    assert!(lru.is_dirty(&1));
    assert!(!lru.all_clean());

    // 1 is the oldest and dirty; inserting 3 spills it.
    let spill = lru.insert_clean(3, 300, 10);
    assert_eq!(spill, vec![(1, 100)]);
    assert!(!lru.exists(&1));
    assert!(lru.all_clean());
}

#[test]
fn test_min_items_overrides_size() {
    let mut lru: Lru<u64, u64> = Lru::new(10, 2);

    lru.insert_clean(1, 1, 100);
    let spill = lru.insert_dirty(2, 2, 100);
    assert!(spill.is_empty());
    assert_eq!(lru.len(), 2); // over budget yet kept

    lru.insert_clean(3, 3, 100);
    assert_eq!(lru.len(), 2);
}

#[test]
fn test_take_and_drop_dirty() {
    let mut lru: Lru<u64, u64> = Lru::new(1000, 0);

    lru.insert_dirty(1, 10, 1);
    lru.insert_dirty(2, 20, 1);
    lru.insert_clean(3, 30, 1);

    let mut dirty = lru.take_dirty();
    dirty.sort_unstable();
    assert_eq!(dirty, vec![(1, 10), (2, 20)]);
    assert!(lru.all_clean());
    assert!(lru.exists(&1)); // still cached, now clean

    lru.insert_dirty(4, 40, 1);
    lru.drop_dirty();
    assert!(!lru.exists(&4));
    assert!(lru.exists(&3));
    assert!(lru.all_clean());
}

#[test]
fn test_random_against_model() {
    let seed: u64 = random();
    println!("test_random_against_model seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let mut lru: Lru<u8, u64> = Lru::new(64, 0);
    for _ in 0..10_000 {
        let key = rng.gen::<u8>() % 32;
        match rng.gen::<u8>() % 4 {
            0 => {
                lru.insert_clean(key, key as u64, (rng.gen::<usize>() % 8) + 1);
            }
            1 => {
                lru.fetch(&key);
            }
            2 => lru.touch(&key),
            _ => lru.remove(&key),
        }
        assert!(lru.size() <= 64 + 8, "size {}", lru.size());
        assert!(lru.all_clean());
    }
}
