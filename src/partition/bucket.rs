//! Leaf bucket views over the data table.

use std::collections::VecDeque;
use std::convert::TryInto;
use std::fmt;
use std::rc::Rc;

use bytes::{Buf, BufMut, BytesMut};

use crate::codec;
use crate::error::{IndexError, Result};
use crate::geom::{Point, Range};
use crate::store::{Columns, Row, Scanner, Store};

use super::filter::RectFilter;
use super::DATA_FAMILY;

/// Canonical identity of a bucket: minimum Z-code plus prefix length.
///
/// The low `64 - prefix_len` bits of `min` are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BucketKey {
    pub min: [u8; 8],
    pub prefix_len: u32,
}

impl fmt::Display for BucketKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&codec::prefix_string(&self.min, self.prefix_len))
    }
}

/// Read-mostly view over one leaf of the partition.
///
/// The Z-code interval `[start_row, stop_row)` and the rectangle are both
/// derived from the key; cells outlive any view of them.
pub struct Bucket<S: Store> {
    store: Rc<S>,
    data_table: String,
    key: BucketKey,
    start_row: [u8; 8],
    stop_row: Option<[u8; 8]>,
    range_x: Range,
    range_y: Range,
    caching: usize,
}

impl<S: Store> Bucket<S> {
    pub(crate) fn new(store: Rc<S>, data_table: &str, key: BucketKey, caching: usize) -> Self {
        let mask = codec::make_mask(key.prefix_len);
        let mut max = [0u8; 8];
        for (i, byte) in max.iter_mut().enumerate() {
            *byte = key.min[i] | !mask[i];
        }
        let (x_min, y_min) = codec::deinterleave(&key.min);
        let (x_max, y_max) = codec::deinterleave(&max);
        Bucket {
            store,
            data_table: data_table.to_string(),
            key,
            start_row: key.min,
            stop_row: codec::increment(&max),
            range_x: Range::closed(i64::from(x_min), i64::from(x_max)),
            range_y: Range::closed(i64::from(y_min), i64::from(y_max)),
            caching,
        }
    }

    #[inline(always)]
    pub fn key(&self) -> BucketKey {
        self.key
    }

    pub fn range_x(&self) -> &Range {
        &self.range_x
    }

    pub fn range_y(&self) -> &Range {
        &self.range_y
    }

    /// Write one cell for `point` at its Z-code row. The caller applies
    /// the insertion notification to the partition afterwards.
    pub(crate) fn insert(&self, row: &[u8; 8], point: &Point) -> Result<()> {
        self.store.put(
            &self.data_table,
            row,
            DATA_FAMILY,
            &point.id.to_be_bytes(),
            &encode_location(point.x, point.y),
        )
    }

    /// All points stored at one Z-code row.
    pub(crate) fn get(&self, row: &[u8; 8]) -> Result<Vec<Point>> {
        let columns = self.store.get(&self.data_table, row, DATA_FAMILY)?;
        decode_cells(&columns)
    }

    /// Lazily scan the bucket's interval for points inside `rx × ry`.
    pub fn scan(&self, range_x: &Range, range_y: &Range) -> Result<PointScan> {
        let filter = RectFilter::new(*range_x, *range_y);
        let rows = self.store.scan(
            &self.data_table,
            &self.start_row,
            self.stop_row.as_ref().map(|s| &s[..]),
            DATA_FAMILY,
            Some(Box::new(filter)),
            self.caching,
        )?;
        Ok(PointScan {
            rows,
            pending: VecDeque::new(),
        })
    }

    /// Scan the bucket's own rectangle, i.e. everything it holds.
    pub fn scan_all(&self) -> Result<PointScan> {
        let (range_x, range_y) = (self.range_x, self.range_y);
        self.scan(&range_x, &range_y)
    }

    /// Euclidean distance from a location to the rectangle, zero inside.
    pub fn distance_from(&self, x: u32, y: u32) -> f64 {
        let dx = self.range_x.distance_to(x);
        let dy = self.range_y.distance_to(y);
        (dx * dx + dy * dy).sqrt()
    }

    /// The rectangle corner farthest from a location, per axis.
    pub fn farthest_corner_from(&self, x: u32, y: u32) -> (u32, u32) {
        (
            self.range_x.farthest_from(x) as u32,
            self.range_y.farthest_from(y) as u32,
        )
    }
}

/// Lazy stream of decoded points out of a row scanner.
pub struct PointScan {
    rows: Scanner,
    pending: VecDeque<Point>,
}

impl Iterator for PointScan {
    type Item = Result<Point>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(point) = self.pending.pop_front() {
                return Some(Ok(point));
            }
            match self.rows.next()? {
                Err(e) => return Some(Err(e)),
                Ok(Row { columns, .. }) => match decode_cells(&columns) {
                    Ok(points) => self.pending.extend(points),
                    Err(e) => return Some(Err(e)),
                },
            }
        }
    }
}

pub(crate) fn encode_location(x: u32, y: u32) -> [u8; 8] {
    let mut buf = BytesMut::with_capacity(8);
    buf.put_u32(x);
    buf.put_u32(y);
    let mut out = [0u8; 8];
    out.copy_from_slice(&buf);
    out
}

pub(crate) fn decode_location(value: &[u8]) -> Result<(u32, u32)> {
    if value.len() != 8 {
        return Err(IndexError::Corruption(format!(
            "location cell has {} bytes, want 8",
            value.len()
        )));
    }
    let mut buf = value;
    Ok((buf.get_u32(), buf.get_u32()))
}

fn decode_cells(columns: &Columns) -> Result<Vec<Point>> {
    columns
        .iter()
        .map(|(qualifier, value)| {
            let id: [u8; 8] = qualifier.as_slice().try_into().map_err(|_| {
                IndexError::Corruption(format!(
                    "point qualifier has {} bytes, want 8",
                    qualifier.len()
                ))
            })?;
            let (x, y) = decode_location(value)?;
            Ok(Point::new(i64::from_be_bytes(id), x, y))
        })
        .collect()
}
