use std::rc::Rc;

use itertools::Itertools;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use zbucket::{IndexConfig, MemStore, Point, Range, ZOrderIndex};

fn populated(seed: u64, points: usize, side: u32, threshold: i64) -> (ZOrderIndex<MemStore>, Vec<Point>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let store = Rc::new(MemStore::new());
    let index = ZOrderIndex::open(
        store,
        "pts",
        IndexConfig::new()
            .with_split_threshold(threshold)
            .with_scan_caching(7),
    )
    .unwrap();
    let mut inserted = Vec::with_capacity(points);
    for id in 0..points {
        let point = Point::new(
            id as i64,
            rng.gen_range(0, side),
            rng.gen_range(0, side),
        );
        index.insert(&point).unwrap();
        inserted.push(point);
    }
    (index, inserted)
}

fn sorted_ids(points: &[Point]) -> Vec<i64> {
    points.iter().map(|p| p.id).sorted().collect()
}

#[test]
fn diagonal_rectangle() {
    let store = Rc::new(MemStore::new());
    let index = ZOrderIndex::open(store, "pts", IndexConfig::default()).unwrap();
    for i in 0..10u32 {
        index.insert(&Point::new(i64::from(i), i, i)).unwrap();
    }
    let hits: Vec<Point> = index
        .range_query(&Range::new(0, 4).unwrap(), &Range::new(0, 4).unwrap())
        .unwrap()
        .collect::<zbucket::Result<_>>()
        .unwrap();
    assert_eq!(sorted_ids(&hits), vec![0, 1, 2, 3, 4]);
}

#[test]
fn knn_along_diagonal() {
    let store = Rc::new(MemStore::new());
    let index = ZOrderIndex::open(store, "pts", IndexConfig::default()).unwrap();
    for (id, step) in (0..4i64).zip((0u32..).step_by(10)) {
        index.insert(&Point::new(id, step, step)).unwrap();
    }
    let nearest = index.nearest_neighbors(0, 0, 2).unwrap();
    assert_eq!(
        nearest.iter().map(|p| (p.x, p.y)).collect::<Vec<_>>(),
        vec![(0, 0), (10, 10)]
    );
}

#[test]
fn range_query_matches_brute_force() {
    let (index, inserted) = populated(0xdead, 300, 1000, 8);
    let mut rng = StdRng::seed_from_u64(0xbeef);
    for _ in 0..40 {
        let x1 = rng.gen_range(0, 1000);
        let x2 = rng.gen_range(0, 1000);
        let y1 = rng.gen_range(0, 1000);
        let y2 = rng.gen_range(0, 1000);
        let range_x = Range::new(i64::from(x1.min(x2)), i64::from(x1.max(x2))).unwrap();
        let range_y = Range::new(i64::from(y1.min(y2)), i64::from(y1.max(y2))).unwrap();

        let hits: Vec<Point> = index
            .range_query(&range_x, &range_y)
            .unwrap()
            .collect::<zbucket::Result<_>>()
            .unwrap();
        let expected: Vec<&Point> = inserted
            .iter()
            .filter(|p| range_x.contains(p.x) && range_y.contains(p.y))
            .collect();
        assert_eq!(
            sorted_ids(&hits),
            expected.iter().map(|p| p.id).sorted().collect::<Vec<_>>()
        );
    }
}

#[test]
fn range_query_is_repeatable() {
    let (index, _) = populated(7, 120, 256, 5);
    let range_x = Range::new(30, 200).unwrap();
    let range_y = Range::new(0, 256).unwrap();
    let first: Vec<Point> = index
        .range_query(&range_x, &range_y)
        .unwrap()
        .collect::<zbucket::Result<_>>()
        .unwrap();
    let second: Vec<Point> = index
        .range_query(&range_x, &range_y)
        .unwrap()
        .collect::<zbucket::Result<_>>()
        .unwrap();
    assert_eq!(sorted_ids(&first), sorted_ids(&second));
}

#[test]
fn knn_matches_brute_force() {
    let (index, inserted) = populated(0xfeed, 250, 800, 6);
    let mut rng = StdRng::seed_from_u64(0xf00d);
    for _ in 0..25 {
        let qx = rng.gen_range(0, 800);
        let qy = rng.gen_range(0, 800);
        let k = rng.gen_range(1, 12);

        let nearest = index.nearest_neighbors(qx, qy, k).unwrap();
        assert_eq!(nearest.len(), k.min(inserted.len()));

        let mut expected: Vec<&Point> = inserted.iter().collect();
        expected.sort_by(|a, b| {
            a.distance_to(qx, qy)
                .partial_cmp(&b.distance_to(qx, qy))
                .unwrap()
        });

        // Distances must agree; identities may differ on ties.
        for (got, want) in nearest.iter().zip(expected.iter()) {
            let got = got.distance_to(qx, qy);
            let want = want.distance_to(qx, qy);
            assert!(
                (got - want).abs() < 1e-9,
                "knn({}, {}, {}): got distance {}, want {}",
                qx,
                qy,
                k,
                got,
                want
            );
        }
    }
}

#[test]
fn knn_with_k_larger_than_population() {
    let (index, inserted) = populated(3, 17, 64, 4);
    let nearest = index.nearest_neighbors(32, 32, 100).unwrap();
    assert_eq!(nearest.len(), inserted.len());
    assert_eq!(sorted_ids(&nearest), sorted_ids(&inserted));
}

#[test]
fn query_far_from_any_point() {
    let (index, _) = populated(11, 60, 128, 5);
    // All points sit near the origin; query from the opposite corner.
    let nearest = index.nearest_neighbors(u32::MAX, u32::MAX, 3).unwrap();
    assert_eq!(nearest.len(), 3);
}
