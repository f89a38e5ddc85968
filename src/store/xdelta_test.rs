use rand::{prelude::random, rngs::SmallRng, Rng, SeedableRng};

use super::*;

#[test]
fn test_diff_patch_simple() {
    let old = b"alpha\n".to_vec();
    let new = b"alphabet\n".to_vec();

    let delta = diff(&old, &new);
    assert_eq!(patch(&old, &delta).unwrap(), new);

    let (made, reverse) = invert(&old, &delta).unwrap();
    assert_eq!(made, new);
    assert_eq!(patch(&new, &reverse).unwrap(), old);
}

#[test]
fn test_diff_empty_cases() {
    let delta = diff(b"", b"");
    assert_eq!(patch(b"", &delta).unwrap(), b"".to_vec());

    let delta = diff(b"", b"data");
    assert_eq!(patch(b"", &delta).unwrap(), b"data".to_vec());

    let delta = diff(b"data", b"");
    assert_eq!(patch(b"data", &delta).unwrap(), b"".to_vec());
}

#[test]
fn test_diff_reuses_blocks() {
    let seed: u64 = random();
    println!("test_diff_reuses_blocks seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    let old: Vec<u8> = (0..8192).map(|_| rng.gen()).collect();
    // edit a few bytes in the middle, most of the content is shared.
    let mut new = old.clone();
    new[4000] ^= 0xff;
    new.splice(100..100, b"inserted run".iter().copied());

    let delta = diff(&old, &new);
    assert_eq!(patch(&old, &delta).unwrap(), new);

    let inserted: usize = {
        let data = delta.to_bytes().unwrap();
        data.len()
    };
    // the serialized delta must be much smaller than the full version.
    assert!(inserted < new.len() / 4, "{} vs {}", inserted, new.len());
}

#[test]
fn test_serialization_round_trip() {
    let old = b"the quick brown fox jumps over the lazy dog".repeat(10);
    let new = b"the quick brown cat naps over the lazy dog".repeat(10);

    let delta = diff(&old, &new);
    let data = delta.to_bytes().unwrap();
    let back = Delta::from_bytes(&data).unwrap();
    assert_eq!(back, delta);
    assert_eq!(patch(&old, &back).unwrap(), new);
}

#[test]
fn test_patch_rejects_bad_copy() {
    let delta = Delta { insns: vec![Insn::Copy { off: 10, len: 10 }] };
    assert!(patch(b"short", &delta).is_err());
}

#[test]
fn test_random_round_trips() {
    let seed: u64 = random();
    println!("test_random_round_trips seed:{}", seed);
    let mut rng = SmallRng::seed_from_u64(seed);

    for _ in 0..50 {
        let n = rng.gen::<usize>() % 4096;
        let old: Vec<u8> = (0..n).map(|_| rng.gen::<u8>() % 16).collect();
        let mut new = old.clone();
        for _ in 0..(rng.gen::<usize>() % 8) {
            if new.is_empty() {
                break;
            }
            let at = rng.gen::<usize>() % new.len();
            match rng.gen::<u8>() % 3 {
                0 => new[at] = rng.gen(),
                1 => {
                    new.insert(at, rng.gen());
                }
                _ => {
                    new.remove(at);
                }
            }
        }

        let delta = diff(&old, &new);
        assert_eq!(patch(&old, &delta).unwrap(), new);

        let (made, reverse) = invert(&old, &delta).unwrap();
        assert_eq!(made, new);
        assert_eq!(patch(&new, &reverse).unwrap(), old);
    }
}
