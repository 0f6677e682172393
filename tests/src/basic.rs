use std::rc::Rc;

use tempfile::tempdir;

use zbucket::{IndexConfig, MemStore, Point, Range, RocksStore, ZOrderIndex};

#[test]
fn split_after_threshold() {
    let store = Rc::new(MemStore::new());
    let index = ZOrderIndex::open(
        store,
        "pts",
        IndexConfig::new().with_split_threshold(10),
    )
    .unwrap();

    // 11 distinct points in [0, 100]^2; the 11th passes the threshold.
    for i in 0..11u32 {
        let (x, y) = (i * 9 % 101, i * 37 % 101);
        index.insert(&Point::new(i64::from(i), x, y)).unwrap();
    }

    let entries = index.buckets().unwrap();
    assert!(
        entries.iter().any(|(key, _)| key.prefix_len > 2),
        "root bucket never split"
    );
    let total: i64 = entries.iter().map(|(_, size)| *size).sum();
    assert_eq!(total, 11);
}

#[test]
fn rocksdb_end_to_end() {
    let dir = tempdir().unwrap();
    let store = Rc::new(RocksStore::open(dir.path()).unwrap());
    let index = ZOrderIndex::open(
        store.clone(),
        "pts",
        IndexConfig::new().with_split_threshold(4),
    )
    .unwrap();

    for i in 0..20u32 {
        index.insert(&Point::new(i64::from(i), i, i)).unwrap();
    }

    let mut hits: Vec<u32> = index
        .range_query(&Range::new(5, 9).unwrap(), &Range::new(0, 100).unwrap())
        .unwrap()
        .map(|p| p.map(|p| p.x))
        .collect::<zbucket::Result<_>>()
        .unwrap();
    hits.sort_unstable();
    assert_eq!(hits, vec![5, 6, 7, 8, 9]);

    let nearest = index.nearest_neighbors(7, 7, 3).unwrap();
    assert_eq!(nearest.len(), 3);
    assert_eq!((nearest[0].x, nearest[0].y), (7, 7));

    // Splits happened and survive a reopen through a fresh handle.
    assert!(index.buckets().unwrap().len() > 4);
    drop(index);

    let reopened = ZOrderIndex::open(store, "pts", IndexConfig::default()).unwrap();
    assert_eq!(reopened.get(11, 11).unwrap().len(), 1);
    reopened.drop_tables().unwrap();
}

#[test]
fn ids_share_a_location() {
    let store = Rc::new(MemStore::new());
    let index = ZOrderIndex::open(store, "pts", IndexConfig::default()).unwrap();
    for id in 0..5i64 {
        index.insert(&Point::new(id, 42, 42)).unwrap();
    }
    let mut at = index.get(42, 42).unwrap();
    at.sort_by_key(|p| p.id);
    assert_eq!(at.len(), 5);
    assert_eq!(at[4], Point::new(4, 42, 42));

    let hits: Vec<_> = index
        .range_query(&Range::new(42, 42).unwrap(), &Range::new(42, 42).unwrap())
        .unwrap()
        .collect::<zbucket::Result<_>>()
        .unwrap();
    assert_eq!(hits.len(), 5);
}

#[test]
fn inverted_range_is_rejected() {
    assert!(Range::new(5, 4).is_err());
    assert!(Range::new(-3, -7).is_err());
}
