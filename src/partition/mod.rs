//! The dynamic partition of the Z-code space into prefix buckets.
//!
//! Bucket metadata lives in its own table: one row per bucket keyed by the
//! bucket's minimum Z-code, columns `pl` (prefix length) and `bs` (size
//! counter). Buckets are only ever refined, never merged, so a floor
//! lookup resolves any Z-code to its covering bucket.

use std::convert::TryInto;
use std::rc::Rc;

use crate::codec;
use crate::config::IndexConfig;
use crate::error::{IndexError, Result};
use crate::geom::Range;
use crate::store::{Columns, Put, Scanner, Store};

pub(crate) mod bucket;
mod filter;

pub use bucket::{Bucket, BucketKey, PointScan};
pub use filter::RectFilter;

pub(crate) const DATA_FAMILY: &str = "P";
pub(crate) const INDEX_FAMILY: &str = "info";
pub(crate) const INDEX_SUFFIX: &str = "_index";

const QUAL_PREFIX_LEN: &[u8] = b"pl";
const QUAL_BUCKET_SIZE: &[u8] = b"bs";

// The partition starts pre-split into the four top-level quadrants.
const ROOT_PREFIX_LEN: u32 = 2;

pub struct Partition<S: Store> {
    store: Rc<S>,
    data_table: String,
    index_table: String,
    config: IndexConfig,
}

impl<S: Store> Partition<S> {
    pub(crate) fn new(store: Rc<S>, data_table: &str, config: IndexConfig) -> Self {
        Partition {
            store,
            data_table: data_table.to_string(),
            index_table: format!("{}{}", data_table, INDEX_SUFFIX),
            config,
        }
    }

    pub(crate) fn index_table(&self) -> &str {
        &self.index_table
    }

    /// Write the quadrant roots. One batch, so a reader never observes a
    /// partially initialized partition.
    pub(crate) fn bootstrap(&self) -> Result<()> {
        let mut puts = Vec::with_capacity(8);
        for quadrant in 0u8..4 {
            let mut min = [0u8; 8];
            min[0] = quadrant << 6;
            entry_puts(&min, ROOT_PREFIX_LEN, 0, &mut puts);
        }
        self.store.put_batch(&self.index_table, puts)?;
        log::debug!(
            "bootstrapped partition of {} with 4 quadrant roots",
            self.data_table
        );
        Ok(())
    }

    /// The bucket covering a Z-code.
    pub fn fetch_bucket(&self, z: &[u8; 8]) -> Result<Bucket<S>> {
        let (key, _) = self.floor_entry(z)?;
        Ok(self.bucket(key))
    }

    /// Buckets intersecting the rectangle `rx × ry`, lazily, ascending by
    /// minimum Z-code.
    ///
    /// Entries are enumerated over the Z-code interval of the rectangle,
    /// starting at the floor row of the start key so the bucket covering
    /// the min corner is included; each candidate is re-tested in 2D to
    /// drop the false positives the zig-zag coverage of the curve lets
    /// through.
    pub fn buckets_in_range(&self, range_x: &Range, range_y: &Range) -> Result<BucketScan<S>> {
        let start = codec::interleave(range_x.clamped_min(), range_y.clamped_min());
        let stop = codec::increment(&codec::interleave(
            range_x.clamped_max(),
            range_y.clamped_max(),
        ));
        let (scan_start, _) = self
            .store
            .floor_get(&self.index_table, &start, INDEX_FAMILY)?
            .ok_or_else(|| {
                IndexError::Corruption(format!("no bucket covers row {:02x?}", start))
            })?;
        log::trace!(
            "bucket scan of {} from {:02x?}, x {:?} y {:?}",
            self.index_table,
            scan_start,
            range_x,
            range_y
        );
        let rows = self.store.scan(
            &self.index_table,
            &scan_start,
            stop.as_ref().map(|s| &s[..]),
            INDEX_FAMILY,
            None,
            self.config.scan_caching(),
        )?;
        Ok(BucketScan {
            store: self.store.clone(),
            data_table: self.data_table.clone(),
            caching: self.config.scan_caching(),
            rows,
            range_x: *range_x,
            range_y: *range_y,
        })
    }

    /// Account for one new cell under `row`; splits the covering bucket
    /// once its counter passes the threshold.
    pub fn notify_insertion(&self, row: &[u8; 8]) -> Result<()> {
        let (key, _) = self.floor_entry(row)?;
        let size = self.store.atomic_increment(
            &self.index_table,
            &key.min,
            INDEX_FAMILY,
            QUAL_BUCKET_SIZE,
            1,
        )?;
        if size > self.config.split_threshold() {
            self.split_bucket(&key.min)?;
        }
        Ok(())
    }

    /// Refine the partition by one bit at the bucket covering `row`.
    ///
    /// The left child keeps the parent key; the right child sets the bit
    /// at the parent's prefix length. Child sizes are recounted from the
    /// data table, so counter drift in the parent converges here. Both
    /// entries are written in one batch.
    pub fn split_bucket(&self, row: &[u8; 8]) -> Result<()> {
        let (key, size) = self.floor_entry(row)?;
        let child_prefix_len = key.prefix_len + 1;
        if child_prefix_len > codec::ZCODE_BITS {
            // Maximum resolution; the bucket keeps absorbing inserts.
            return Ok(());
        }
        let left = key.min;
        let right = codec::set_bit(&key.min, key.prefix_len);
        let left_size = self.count_cells(&left, &right)?;
        let right_size = size - left_size;

        let mut puts = Vec::with_capacity(4);
        entry_puts(&left, child_prefix_len, left_size, &mut puts);
        entry_puts(&right, child_prefix_len, right_size, &mut puts);
        self.store.put_batch(&self.index_table, puts)?;
        log::debug!(
            "split bucket {} into prefix length {} ({} / {})",
            key,
            child_prefix_len,
            left_size,
            right_size
        );

        if left_size > self.config.split_threshold() {
            self.split_bucket(&left)?;
        }
        if right_size > self.config.split_threshold() {
            self.split_bucket(&right)?;
        }
        Ok(())
    }

    /// All bucket entries with their size counters, ascending by Z-code.
    pub fn entries(&self) -> Result<Vec<(BucketKey, i64)>> {
        let rows = self.store.scan(
            &self.index_table,
            &[0u8; 8],
            None,
            INDEX_FAMILY,
            None,
            self.config.scan_caching(),
        )?;
        rows.map(|row| {
            let row = row?;
            decode_entry(&row.key, &row.columns)
        })
        .collect()
    }

    fn bucket(&self, key: BucketKey) -> Bucket<S> {
        Bucket::new(
            self.store.clone(),
            &self.data_table,
            key,
            self.config.scan_caching(),
        )
    }

    fn floor_entry(&self, z: &[u8]) -> Result<(BucketKey, i64)> {
        let (row, columns) = self
            .store
            .floor_get(&self.index_table, z, INDEX_FAMILY)?
            .ok_or_else(|| IndexError::Corruption(format!("no bucket covers row {:02x?}", z)))?;
        decode_entry(&row, &columns)
    }

    fn count_cells(&self, start: &[u8; 8], stop: &[u8; 8]) -> Result<i64> {
        let rows = self.store.scan(
            &self.data_table,
            start,
            Some(&stop[..]),
            DATA_FAMILY,
            None,
            self.config.scan_caching(),
        )?;
        let mut cells = 0i64;
        for row in rows {
            cells += row?.columns.len() as i64;
        }
        Ok(cells)
    }
}

/// Lazy stream of buckets out of an index-table scan.
pub struct BucketScan<S: Store> {
    store: Rc<S>,
    data_table: String,
    caching: usize,
    rows: Scanner,
    range_x: Range,
    range_y: Range,
}

impl<S: Store> Iterator for BucketScan<S> {
    type Item = Result<Bucket<S>>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let row = match self.rows.next()? {
                Ok(row) => row,
                Err(e) => return Some(Err(e)),
            };
            let (key, _) = match decode_entry(&row.key, &row.columns) {
                Ok(entry) => entry,
                Err(e) => return Some(Err(e)),
            };
            let bucket = Bucket::new(self.store.clone(), &self.data_table, key, self.caching);
            if bucket.range_x().intersects(&self.range_x)
                && bucket.range_y().intersects(&self.range_y)
            {
                return Some(Ok(bucket));
            }
        }
    }
}

fn entry_puts(min: &[u8; 8], prefix_len: u32, size: i64, puts: &mut Vec<Put>) {
    puts.push(Put::new(
        min.to_vec(),
        INDEX_FAMILY,
        QUAL_PREFIX_LEN.to_vec(),
        prefix_len.to_be_bytes().to_vec(),
    ));
    puts.push(Put::new(
        min.to_vec(),
        INDEX_FAMILY,
        QUAL_BUCKET_SIZE.to_vec(),
        size.to_be_bytes().to_vec(),
    ));
}

fn decode_entry(row: &[u8], columns: &Columns) -> Result<(BucketKey, i64)> {
    let min: [u8; 8] = row.try_into().map_err(|_| {
        IndexError::Corruption(format!("index row key has {} bytes, want 8", row.len()))
    })?;
    let prefix_len = columns
        .get(QUAL_PREFIX_LEN)
        .ok_or_else(|| IndexError::Corruption(format!("bucket {:02x?} missing pl", row)))?;
    let prefix_len: [u8; 4] = prefix_len.as_slice().try_into().map_err(|_| {
        IndexError::Corruption(format!("bucket {:02x?} has malformed pl", row))
    })?;
    let prefix_len = u32::from_be_bytes(prefix_len);
    if !(1..=codec::ZCODE_BITS).contains(&prefix_len) {
        return Err(IndexError::Corruption(format!(
            "bucket {:02x?} has prefix length {}",
            row, prefix_len
        )));
    }
    let size = columns
        .get(QUAL_BUCKET_SIZE)
        .ok_or_else(|| IndexError::Corruption(format!("bucket {:02x?} missing bs", row)))?;
    let size: [u8; 8] = size.as_slice().try_into().map_err(|_| {
        IndexError::Corruption(format!("bucket {:02x?} has malformed bs", row))
    })?;
    Ok((
        BucketKey {
            min,
            prefix_len,
        },
        i64::from_be_bytes(size),
    ))
}
