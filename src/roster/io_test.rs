use super::*;

use crate::roster::{
    mod_test::{birth_markings, path, rid, sample_roster},
    NodeIdSource, TempIdSource,
};

#[test]
fn test_manifest_text_stable() {
    let mut nis = TempIdSource::new();
    let (roster, _) = sample_roster(&mut nis);

    let text = manifest_text(&roster).unwrap();
    assert_eq!(text, manifest_text(&roster).unwrap());
    assert!(text.starts_with("format_version \"1\"\n\n"));

    // stanzas come out path sorted: "", readme, src, src/main.
    let dirs: Vec<usize> = ["dir \"\"", "file \"readme\"", "dir \"src\"", "file \"src/main\""]
        .iter()
        .map(|pat| text.find(pat).unwrap())
        .collect();
    let mut sorted = dirs.clone();
    sorted.sort_unstable();
    assert_eq!(dirs, sorted);
}

#[test]
fn test_manifest_ignores_markings_and_idents() {
    let mut nis = TempIdSource::new();
    let (roster, _) = sample_roster(&mut nis);

    let a = manifest_id(&roster).unwrap();

    // same shape under different node ids hashes identically.
    let mut nis2 = TempIdSource::new();
    for _ in 0..17 {
        nis2.allocate().unwrap();
    }
    let (other, _) = sample_roster(&mut nis2);
    assert_eq!(manifest_id(&other).unwrap(), a);
}

#[test]
fn test_roster_text_round_trip() {
    let mut nis = TempIdSource::new();
    let (mut roster, nids) = sample_roster(&mut nis);
    roster.set_attr(&nids[2], "mtn:execute", "true").unwrap();
    roster.set_attr(&nids[3], "old", "x").unwrap();
    roster.clear_attr(&nids[3], "old").unwrap();

    let rev = rid(1);
    let mut marking = birth_markings(&roster, rev);
    marking.get_mut(&nids[2]).unwrap().attrs.insert(
        "mtn:execute".to_string(),
        crate::roster::singleton(rev),
    );
    marking
        .get_mut(&nids[3])
        .unwrap()
        .attrs
        .insert("old".to_string(), crate::roster::singleton(rev));

    let text = roster_text(&roster, &marking).unwrap();
    let (back, back_marking) = parse_roster_text(&text).unwrap();

    assert_eq!(back, roster);
    assert_eq!(back_marking, marking);
    back.check_sane_against(&back_marking, |_| true).unwrap();

    // byte-stable round trip.
    assert_eq!(roster_text(&back, &back_marking).unwrap(), text);
}

#[test]
fn test_roster_text_includes_dormant() {
    let mut nis = TempIdSource::new();
    let (mut roster, nids) = sample_roster(&mut nis);
    roster.set_attr(&nids[3], "gone", "1").unwrap();
    roster.clear_attr(&nids[3], "gone").unwrap();
    let mut marking = birth_markings(&roster, rid(1));
    marking
        .get_mut(&nids[3])
        .unwrap()
        .attrs
        .insert("gone".to_string(), crate::roster::singleton(rid(1)));

    let full = roster_text(&roster, &marking).unwrap();
    assert!(full.contains("dormant_attr \"gone\""), "{}", full);

    // the manifest form shows live attributes only.
    let manifest = manifest_text(&roster).unwrap();
    assert!(!manifest.contains("gone"), "{}", manifest);
}

#[test]
fn test_parse_rejects_garbage() {
    assert!(parse_roster_text("format_version \"2\"\n").is_err());
    assert!(parse_roster_text("dir \"\"\n").is_err()); // no format_version
    // missing ident line.
    let text = "format_version \"1\"\n\ndir \"\"\nbirth [00]\n";
    assert!(parse_roster_text(text).is_err());
}

#[test]
fn test_detached_node_refuses_serialization() {
    let mut nis = TempIdSource::new();
    let (mut roster, _) = sample_roster(&mut nis);
    roster.detach_node(&path("readme")).unwrap();
    assert!(manifest_text(&roster).is_err());
}

#[test]
fn test_roster_id_covers_markings() {
    let mut nis = TempIdSource::new();
    let (roster, _nids) = sample_roster(&mut nis);
    let marking_a = birth_markings(&roster, rid(1));
    let marking_b = birth_markings(&roster, rid(2));

    // the manifest id is blind to markings, the roster id is not.
    assert_ne!(
        roster_id(&roster, &marking_a).unwrap(),
        roster_id(&roster, &marking_b).unwrap()
    );
}
