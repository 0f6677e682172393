//! Storage contract consumed by the index.
//!
//! Any sorted byte-keyed store with floor lookup, exclusive-stop scans and
//! an atomic counter primitive suffices. Scans hand back lazy, finite,
//! non-restartable row sequences that page through the backend
//! `caching` rows at a time.

use std::collections::BTreeMap;

use crate::error::Result;

pub mod mem;
pub use mem::MemStore;

cfg_if::cfg_if! {
    if #[cfg(feature = "embedded")] {
        pub mod rocks;
        pub use rocks::RocksStore;
    }
}

/// Columns of one row: qualifier to value.
pub type Columns = BTreeMap<Vec<u8>, Vec<u8>>;

/// One row yielded by a scanner.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub key: Vec<u8>,
    pub columns: Columns,
}

/// A single cell write, for batching.
#[derive(Debug, Clone)]
pub struct Put {
    pub row: Vec<u8>,
    pub family: String,
    pub qualifier: Vec<u8>,
    pub value: Vec<u8>,
}

impl Put {
    pub fn new(row: Vec<u8>, family: &str, qualifier: Vec<u8>, value: Vec<u8>) -> Self {
        Self {
            row,
            family: family.to_string(),
            qualifier,
            value,
        }
    }
}

/// Decision taken by a scan filter for one cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterDecision {
    /// Keep the cell.
    Include,
    /// Drop the remaining cells of the current row.
    SkipRow,
}

/// Cell-level predicate evaluated next to the store during scans.
pub trait ScanFilter {
    fn check(&self, value: &[u8]) -> FilterDecision;
}

/// Lazy, finite, non-restartable row sequence.
pub type Scanner = Box<dyn Iterator<Item = Result<Row>>>;

pub trait Store {
    fn create_table(&self, name: &str, families: &[&str]) -> Result<()>;
    fn table_exists(&self, name: &str) -> Result<bool>;
    fn drop_table(&self, name: &str) -> Result<()>;

    fn put(
        &self,
        table: &str,
        row: &[u8],
        family: &str,
        qualifier: &[u8],
        value: &[u8],
    ) -> Result<()>;

    /// All writes become visible together.
    fn put_batch(&self, table: &str, puts: Vec<Put>) -> Result<()>;

    /// Columns of `row`, empty when the row does not exist.
    fn get(&self, table: &str, row: &[u8], family: &str) -> Result<Columns>;

    /// Greatest row whose key is `<= row`, with its columns.
    fn floor_get(
        &self,
        table: &str,
        row: &[u8],
        family: &str,
    ) -> Result<Option<(Vec<u8>, Columns)>>;

    /// Add `delta` to an 8-byte big-endian counter cell, treating a missing
    /// cell as zero, and return the new value.
    fn atomic_increment(
        &self,
        table: &str,
        row: &[u8],
        family: &str,
        qualifier: &[u8],
        delta: i64,
    ) -> Result<i64>;

    /// Scan rows in `[start, stop)`; `stop` of `None` runs to the end of
    /// the table. Rows whose every cell is filtered away are not yielded.
    fn scan(
        &self,
        table: &str,
        start: &[u8],
        stop: Option<&[u8]>,
        family: &str,
        filter: Option<Box<dyn ScanFilter>>,
        caching: usize,
    ) -> Result<Scanner>;
}

pub(crate) fn apply_filter(columns: &Columns, filter: &Option<Box<dyn ScanFilter>>) -> Columns {
    let filter = match filter {
        None => return columns.clone(),
        Some(f) => f,
    };
    let mut kept = Columns::new();
    for (qualifier, value) in columns {
        match filter.check(value) {
            FilterDecision::Include => {
                kept.insert(qualifier.clone(), value.clone());
            }
            FilterDecision::SkipRow => return Columns::new(),
        }
    }
    kept
}

pub(crate) fn decode_counter(value: &[u8], what: &str) -> Result<i64> {
    use std::convert::TryInto;
    let bytes: [u8; 8] = value.try_into().map_err(|_| {
        crate::error::IndexError::Io(format!(
            "counter cell {} has {} bytes, want 8",
            what,
            value.len()
        ))
    })?;
    Ok(i64::from_be_bytes(bytes))
}
