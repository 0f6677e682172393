//! Scan predicate for rectangle queries.

use crate::geom::Range;
use crate::store::{FilterDecision, ScanFilter};

use super::bucket::decode_location;

/// Accepts a cell iff its decoded location lies inside the query
/// rectangle. All cells of a row share one location, so a miss skips the
/// remaining cells of the row.
pub struct RectFilter {
    range_x: Range,
    range_y: Range,
}

impl RectFilter {
    pub fn new(range_x: Range, range_y: Range) -> Self {
        Self { range_x, range_y }
    }
}

impl ScanFilter for RectFilter {
    fn check(&self, value: &[u8]) -> FilterDecision {
        match decode_location(value) {
            Ok((x, y)) if self.range_x.contains(x) && self.range_y.contains(y) => {
                FilterDecision::Include
            }
            _ => FilterDecision::SkipRow,
        }
    }
}
