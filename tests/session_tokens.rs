//! Session token vector-clock properties.

use std::collections::BTreeMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use aeroroute::session::{SessionContainer, SessionToken, SessionTokenError};

fn token(raw: &str) -> SessionToken {
    SessionToken::parse(raw).unwrap()
}

fn random_token(rng: &mut StdRng, version: u64, regions: &[u32]) -> SessionToken {
    let locals: BTreeMap<u32, i64> = regions
        .iter()
        .map(|region| (*region, rng.gen_range(0..1_000)))
        .collect();
    SessionToken::new(version, rng.gen_range(0..10_000), locals)
}

#[test]
fn test_merge_scenario() {
    let merged = token("1#100#1=50#2=40")
        .merge(&token("1#120#1=55#2=30"))
        .unwrap();
    assert_eq!(merged.to_string(), "1#120#1=55#2=40");
}

#[test]
fn test_merge_is_commutative_and_idempotent() {
    let mut rng = StdRng::seed_from_u64(0x5e55);
    let regions = [1u32, 2, 5];
    for _ in 0..500 {
        let a = random_token(&mut rng, 3, &regions);
        let b = random_token(&mut rng, 3, &regions);

        let ab = a.merge(&b).unwrap();
        let ba = b.merge(&a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(a.merge(&a).unwrap(), a);
        assert!(a.is_valid(&a));
        assert!(a.is_valid(&ab));
        assert!(b.is_valid(&ab));
    }
}

#[test]
fn test_merge_across_versions_is_valid_against_both() {
    let mut rng = StdRng::seed_from_u64(42);
    for _ in 0..200 {
        let old = random_token(&mut rng, 1, &[1, 2]);
        let new = random_token(&mut rng, 2, &[1, 2, 3]);
        let merged = old.merge(&new).unwrap();
        assert_eq!(merged, new.merge(&old).unwrap());
        assert!(old.is_valid(&merged));
        assert!(new.is_valid(&merged));
        assert_eq!(merged.version(), 2);
    }
}

#[test]
fn test_equal_version_region_mismatch_is_consistency_violation() {
    let err = token("4#10#1=1").merge(&token("4#10#2=1")).unwrap_err();
    assert!(matches!(err, SessionTokenError::RegionMismatch { .. }));
    assert!(err.is_consistency_violation());
}

#[test]
fn test_malformed_tokens_are_hard_errors() {
    for raw in ["", "abc", "1#", "1#1#x", "1#1#1=", "-1#5"] {
        assert!(SessionToken::parse(raw).is_err(), "{} should not parse", raw);
    }
}

#[test]
fn test_container_merges_per_range() {
    let container = SessionContainer::new();
    container
        .apply("orders", "0", &token("1#100#1=50#2=40"))
        .unwrap();
    let merged = container
        .apply("orders", "0", &token("1#120#1=55#2=30"))
        .unwrap();
    assert_eq!(merged.to_string(), "1#120#1=55#2=40");
    container.apply("orders", "7", &token("1#5")).unwrap();

    assert_eq!(
        container.compound_token("orders").unwrap(),
        "0:1#120#1=55#2=40,7:1#5"
    );

    let conflict = container.apply("orders", "0", &token("1#500#3=1"));
    assert!(conflict.is_err());
    assert_eq!(
        container.resolve("orders", "0").unwrap().to_string(),
        "1#120#1=55#2=40"
    );
}
