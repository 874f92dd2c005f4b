//! Durability properties: save/reload identity, simulated-crash recovery,
//! and format-version enforcement.

use quiver::{Database, Error, Metric, Persistence};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::fs;
use tempfile::tempdir;

fn random_vector(rng: &mut StdRng, dim: usize) -> Vec<f32> {
    (0..dim).map(|_| rng.gen::<f32>() - 0.5).collect()
}

#[test]
fn reload_answers_queries_identically() {
    let mut rng = StdRng::seed_from_u64(404);
    let dir = tempdir().unwrap();

    let queries: Vec<Vec<f32>> = (0..10).map(|_| random_vector(&mut rng, 24)).collect();
    let before: Vec<Vec<(u64, f32)>>;

    {
        let mut db = Database::open(dir.path()).unwrap();
        let c = db.create_collection("vec500", 24, Metric::L2, None).unwrap();
        for i in 0..500u64 {
            c.insert(i, random_vector(&mut rng, 24)).unwrap();
        }
        for i in (0..500u64).step_by(13) {
            c.delete(i);
        }

        let c = db.collection("vec500").unwrap();
        before = queries
            .iter()
            .map(|q| c.search(q, 10, 50).unwrap())
            .collect();
        db.close().unwrap();
    }

    let db = Database::open(dir.path()).unwrap();
    let c = db.collection("vec500").unwrap();
    assert_eq!(c.count(), 500 - (0..500u64).step_by(13).count());

    for (q, expected) in queries.iter().zip(&before) {
        let after = c.search(q, 10, 50).unwrap();
        assert_eq!(&after, expected);
        for (&(_, d1), &(_, d2)) in expected.iter().zip(&after) {
            assert_eq!(d1.to_bits(), d2.to_bits());
        }
    }
}

#[test]
fn saving_twice_is_stable() {
    let dir = tempdir().unwrap();
    let mut db = Database::open(dir.path()).unwrap();
    let c = db.create_collection("stable", 2, Metric::L2, None).unwrap();
    c.insert(1, vec![0.25, 0.75]).unwrap();

    db.save().unwrap();
    let first = fs::read(dir.path().join("collections/stable.hnsw")).unwrap();
    db.save().unwrap();
    let second = fs::read(dir.path().join("collections/stable.hnsw")).unwrap();
    assert_eq!(first, second);
}

#[test]
fn truncation_at_every_offset_never_yields_a_mixed_state() {
    let dir = tempdir().unwrap();
    let root = dir.path();

    {
        let mut db = Database::open(root).unwrap();
        let c = db.create_collection("crash", 2, Metric::L2, None).unwrap();
        c.insert(1, vec![0.0, 0.0]).unwrap();
        c.insert(2, vec![1.0, 0.0]).unwrap();
        c.insert(3, vec![0.0, 1.0]).unwrap();
        db.close().unwrap();
    }

    for file in ["crash.meta", "crash.hnsw", "crash.vectors"] {
        let path = root.join("collections").join(file);
        let full = fs::read(&path).unwrap();

        for len in 0..full.len() {
            fs::write(&path, &full[..len]).unwrap();

            // A torn file must never load as a half-state: either it is
            // rejected outright or (at full length) the snapshot is intact.
            let p = Persistence::new(root).unwrap();
            match p.load_collection("crash") {
                Err(Error::Deserialization(_)) => {}
                other => panic!("{file} truncated to {len} bytes gave {other:?}"),
            }
        }

        fs::write(&path, &full).unwrap();
        let p = Persistence::new(root).unwrap();
        assert_eq!(p.load_collection("crash").unwrap().unwrap().count(), 3);
    }
}

#[test]
fn stale_meta_from_previous_snapshot_is_rejected() {
    let dir = tempdir().unwrap();
    let root = dir.path();
    let meta_path = root.join("collections/mixed.meta");

    let old_meta;
    {
        let mut db = Database::open(root).unwrap();
        let c = db.create_collection("mixed", 2, Metric::L2, None).unwrap();
        c.insert(1, vec![0.0, 0.0]).unwrap();
        c.insert(2, vec![1.0, 1.0]).unwrap();
        db.save().unwrap();
        old_meta = fs::read(&meta_path).unwrap();

        let c = db.collection_mut("mixed").unwrap();
        c.insert(3, vec![2.0, 2.0]).unwrap();
        db.close().unwrap();
    }

    // Simulate a crash after the index and vectors renamed but before the
    // metadata did: counts disagree across the triple.
    fs::write(&meta_path, &old_meta).unwrap();

    let p = Persistence::new(root).unwrap();
    assert!(matches!(
        p.load_collection("mixed"),
        Err(Error::Deserialization(_))
    ));
}

#[test]
fn future_hnsw_version_is_rejected() {
    let dir = tempdir().unwrap();
    let root = dir.path();

    {
        let mut db = Database::open(root).unwrap();
        let c = db.create_collection("versioned", 2, Metric::L2, None).unwrap();
        c.insert(1, vec![0.5, 0.5]).unwrap();
        db.close().unwrap();
    }

    let path = root.join("collections/versioned.hnsw");
    let mut bytes = fs::read(&path).unwrap();
    bytes[0] = 2;
    fs::write(&path, &bytes).unwrap();

    let p = Persistence::new(root).unwrap();
    assert!(matches!(
        p.load_collection("versioned"),
        Err(Error::Deserialization(_))
    ));
}

#[test]
fn failed_collection_does_not_block_the_rest() {
    let dir = tempdir().unwrap();
    let root = dir.path();

    {
        let mut db = Database::open(root).unwrap();
        let a = db.create_collection("alpha", 2, Metric::L2, None).unwrap();
        a.insert(1, vec![0.0, 0.0]).unwrap();
        let b = db.create_collection("beta", 2, Metric::L2, None).unwrap();
        b.insert(1, vec![1.0, 1.0]).unwrap();
        db.close().unwrap();
    }

    let hnsw = root.join("collections/alpha.hnsw");
    let mut bytes = fs::read(&hnsw).unwrap();
    bytes.truncate(bytes.len() / 2);
    fs::write(&hnsw, &bytes).unwrap();

    let db = Database::open(root).unwrap();
    assert_eq!(db.list_collections(), vec!["beta"]);
    assert_eq!(db.collection("beta").unwrap().count(), 1);
}
