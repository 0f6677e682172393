//! The query engine: point insertion, equality lookup, rectangle range
//! query, and k-nearest-neighbor search over one data table.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::rc::Rc;

use fxhash::FxHashSet;

use crate::codec;
use crate::config::IndexConfig;
use crate::error::Result;
use crate::geom::{Point, Range};
use crate::partition::{
    Bucket, BucketKey, BucketScan, Partition, PointScan, DATA_FAMILY, INDEX_FAMILY,
};
use crate::store::Store;

/// A two-dimensional Z-order index bound to one data table.
///
/// Only one writer may operate on a given table at a time. Readers may
/// interleave with the writer and observe either the pre- or post-split
/// partition; both are consistent.
pub struct ZOrderIndex<S: Store> {
    store: Rc<S>,
    partition: Partition<S>,
    data_table: String,
}

impl<S: Store> ZOrderIndex<S> {
    /// Bind to `table`, creating and bootstrapping the data and index
    /// tables on first use.
    pub fn open(store: Rc<S>, table: &str, config: IndexConfig) -> Result<Self> {
        let partition = Partition::new(store.clone(), table, config);
        if !store.table_exists(table)? {
            store.create_table(table, &[DATA_FAMILY])?;
            store.create_table(partition.index_table(), &[INDEX_FAMILY])?;
            partition.bootstrap()?;
        }
        Ok(ZOrderIndex {
            store,
            partition,
            data_table: table.to_string(),
        })
    }

    pub fn insert(&self, point: &Point) -> Result<()> {
        let row = codec::interleave(point.x, point.y);
        let bucket = self.partition.fetch_bucket(&row)?;
        bucket.insert(&row, point)?;
        self.partition.notify_insertion(&row)
    }

    /// All points stored at exactly `(x, y)`.
    pub fn get(&self, x: u32, y: u32) -> Result<Vec<Point>> {
        let row = codec::interleave(x, y);
        let bucket = self.partition.fetch_bucket(&row)?;
        bucket.get(&row)
    }

    /// Lazily stream every point inside `rx × ry`. Order is unspecified;
    /// duplicates are impossible since each cell lives in exactly one
    /// bucket.
    pub fn range_query(&self, range_x: &Range, range_y: &Range) -> Result<RangeScan<S>> {
        let buckets = self.partition.buckets_in_range(range_x, range_y)?;
        Ok(RangeScan {
            buckets,
            current: None,
            range_x: *range_x,
            range_y: *range_y,
        })
    }

    /// The `k` points closest to `(x, y)`, ascending by Euclidean
    /// distance, ties broken arbitrarily.
    ///
    /// Incremental best-first search: an expanding Chebyshev square feeds
    /// a priority queue of candidate buckets; a popped bucket farther than
    /// the current k-th distance proves no closer point exists.
    pub fn nearest_neighbors(&self, x: u32, y: u32, k: usize) -> Result<Vec<Point>> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let mut result: Vec<(f64, Point)> = Vec::with_capacity(k + 1);
        let mut farthest = f64::INFINITY;
        let mut seen: FxHashSet<BucketKey> = FxHashSet::default();
        let mut queue: BinaryHeap<Candidate<S>> = BinaryHeap::new();
        let mut offset: i64 = 0;

        'search: loop {
            let range_x = Range::window(x, offset);
            let range_y = Range::window(y, offset);
            for bucket in self.partition.buckets_in_range(&range_x, &range_y)? {
                let bucket = bucket?;
                if seen.insert(bucket.key()) {
                    queue.push(Candidate {
                        distance: bucket.distance_from(x, y),
                        bucket,
                    });
                }
            }
            if queue.is_empty() {
                // Everything outside the square is at Chebyshev distance
                // > offset, hence Euclidean distance > offset.
                if result.len() == k && offset as f64 >= farthest {
                    break;
                }
                if covers_domain(x, y, offset) {
                    break;
                }
                // Bucket rectangles are closed integer intervals; a square
                // ending exactly on a bucket boundary touches no neighbor.
                offset += 1;
                continue;
            }
            while let Some(candidate) = queue.pop() {
                if candidate.distance > farthest {
                    break 'search;
                }
                for point in candidate.bucket.scan_all()? {
                    let point = point?;
                    let distance = point.distance_to(x, y);
                    let at = match result.binary_search_by(|probe| probe.0.total_cmp(&distance)) {
                        Ok(i) | Err(i) => i,
                    };
                    result.insert(at, (distance, point));
                    if result.len() > k {
                        result.truncate(k);
                    }
                    if result.len() == k {
                        farthest = result[k - 1].0;
                    }
                }
                let (cx, cy) = candidate.bucket.farthest_corner_from(x, y);
                let reach = chebyshev(x, y, cx, cy);
                if reach > offset {
                    offset = reach;
                }
            }
        }
        Ok(result.into_iter().map(|(_, point)| point).collect())
    }

    /// All bucket entries with their size counters, ascending by Z-code.
    pub fn buckets(&self) -> Result<Vec<(BucketKey, i64)>> {
        self.partition.entries()
    }

    /// Delete the data and index tables.
    pub fn drop_tables(self) -> Result<()> {
        self.store.drop_table(&self.data_table)?;
        self.store.drop_table(self.partition.index_table())
    }
}

/// Lazy stream of points inside a query rectangle.
pub struct RangeScan<S: Store> {
    buckets: BucketScan<S>,
    current: Option<PointScan>,
    range_x: Range,
    range_y: Range,
}

impl<S: Store> Iterator for RangeScan<S> {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(scan) = &mut self.current {
                match scan.next() {
                    Some(item) => return Some(item),
                    None => self.current = None,
                }
            }
            match self.buckets.next()? {
                Err(e) => return Some(Err(e)),
                Ok(bucket) => match bucket.scan(&self.range_x, &self.range_y) {
                    Ok(scan) => self.current = Some(scan),
                    Err(e) => return Some(Err(e)),
                },
            }
        }
    }
}

struct Candidate<S: Store> {
    distance: f64,
    bucket: Bucket<S>,
}

impl<S: Store> PartialEq for Candidate<S> {
    fn eq(&self, other: &Self) -> bool {
        self.distance == other.distance
    }
}

impl<S: Store> Eq for Candidate<S> {}

impl<S: Store> PartialOrd for Candidate<S> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<S: Store> Ord for Candidate<S> {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the nearest bucket surfaces first.
        other.distance.total_cmp(&self.distance)
    }
}

fn chebyshev(x: u32, y: u32, cx: u32, cy: u32) -> i64 {
    let dx = (i64::from(x) - i64::from(cx)).abs();
    let dy = (i64::from(y) - i64::from(cy)).abs();
    dx.max(dy)
}

fn covers_domain(x: u32, y: u32, offset: i64) -> bool {
    let max = i64::from(u32::MAX);
    i64::from(x) - offset <= 0
        && i64::from(y) - offset <= 0
        && i64::from(x) + offset >= max
        && i64::from(y) + offset >= max
}
