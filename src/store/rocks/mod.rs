//! RocksDB backend. One database per table under a root directory, one
//! column family per family. Row values are stored as a single blob
//! framing the qualifier/value cells, so a row read or write is one
//! key-value operation.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::{Buf, BufMut, BytesMut};
use rocksdb::{ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};

use crate::error::{IndexError, Result};

use super::{apply_filter, decode_counter, Columns, Put, Row, ScanFilter, Scanner, Store};

pub struct RocksStore {
    root: PathBuf,
    dbs: Mutex<HashMap<String, Arc<DB>>>,
    // Serializes read-modify-write counter updates; sufficient under the
    // single-writer discipline of the index.
    incr_lock: Mutex<()>,
}

impl RocksStore {
    pub fn open<P: Into<PathBuf>>(root: P) -> Result<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)
                .map_err(|e| IndexError::Io(format!("create store root {:?}: {}", root, e)))?;
        }
        Ok(Self {
            root,
            dbs: Mutex::new(HashMap::new()),
            incr_lock: Mutex::new(()),
        })
    }

    fn table_path(&self, table: &str) -> PathBuf {
        self.root.join(table)
    }

    fn db(&self, table: &str) -> Result<Arc<DB>> {
        let mut dbs = lock(&self.dbs)?;
        if let Some(db) = dbs.get(table) {
            return Ok(db.clone());
        }
        let path = self.table_path(table);
        if !path.exists() {
            return Err(IndexError::Io(format!("no such table: {}", table)));
        }
        let families = DB::list_cf(&Options::default(), &path)
            .map_err(|e| IndexError::Io(format!("list families of {}: {}", table, e)))?;
        let descriptors = families
            .into_iter()
            .map(|name| ColumnFamilyDescriptor::new(name, Options::default()));
        let db = DB::open_cf_descriptors(&Options::default(), &path, descriptors)
            .map_err(|e| IndexError::Io(format!("open table {}: {}", table, e)))?;
        let db = Arc::new(db);
        dbs.insert(table.to_string(), db.clone());
        Ok(db)
    }

    fn read_row(db: &DB, table: &str, family: &str, row: &[u8]) -> Result<Columns> {
        let cf = cf_handle(db, table, family)?;
        match db
            .get_cf(cf, row)
            .map_err(|e| IndexError::Io(format!("get {}/{:02x?}: {}", table, row, e)))?
        {
            Some(blob) => decode_row_blob(&blob),
            None => Ok(Columns::new()),
        }
    }

    fn write_row(db: &DB, table: &str, family: &str, row: &[u8], columns: &Columns) -> Result<()> {
        let cf = cf_handle(db, table, family)?;
        db.put_cf(cf, row, encode_row_blob(columns))
            .map_err(|e| IndexError::Io(format!("put {}/{:02x?}: {}", table, row, e)))
    }
}

impl Store for RocksStore {
    fn create_table(&self, name: &str, families: &[&str]) -> Result<()> {
        let mut dbs = lock(&self.dbs)?;
        let path = self.table_path(name);
        if dbs.contains_key(name) || path.exists() {
            return Err(IndexError::Io(format!("table already exists: {}", name)));
        }
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        let descriptors = std::iter::once("default")
            .chain(families.iter().copied())
            .map(|f| ColumnFamilyDescriptor::new(f, Options::default()));
        let db = DB::open_cf_descriptors(&opts, &path, descriptors)
            .map_err(|e| IndexError::Io(format!("create table {}: {}", name, e)))?;
        dbs.insert(name.to_string(), Arc::new(db));
        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(lock(&self.dbs)?.contains_key(name) || self.table_path(name).exists())
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        let path = self.table_path(name);
        if !path.exists() {
            return Err(IndexError::Io(format!("no such table: {}", name)));
        }
        lock(&self.dbs)?.remove(name);
        DB::destroy(&Options::default(), &path)
            .map_err(|e| IndexError::Io(format!("drop table {}: {}", name, e)))
    }

    fn put(
        &self,
        table: &str,
        row: &[u8],
        family: &str,
        qualifier: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let db = self.db(table)?;
        let mut columns = Self::read_row(&db, table, family, row)?;
        columns.insert(qualifier.to_vec(), value.to_vec());
        Self::write_row(&db, table, family, row, &columns)
    }

    fn put_batch(&self, table: &str, puts: Vec<Put>) -> Result<()> {
        let db = self.db(table)?;
        let mut merged: BTreeMap<(String, Vec<u8>), Columns> = BTreeMap::new();
        for put in puts {
            let slot = (put.family.clone(), put.row.clone());
            if !merged.contains_key(&slot) {
                let existing = Self::read_row(&db, table, &put.family, &put.row)?;
                merged.insert(slot.clone(), existing);
            }
            if let Some(columns) = merged.get_mut(&slot) {
                columns.insert(put.qualifier, put.value);
            }
        }
        let mut batch = WriteBatch::default();
        for ((family, row), columns) in &merged {
            let cf = cf_handle(&db, table, family)?;
            batch.put_cf(cf, row, encode_row_blob(columns));
        }
        db.write(batch)
            .map_err(|e| IndexError::Io(format!("batch write to {}: {}", table, e)))
    }

    fn get(&self, table: &str, row: &[u8], family: &str) -> Result<Columns> {
        let db = self.db(table)?;
        Self::read_row(&db, table, family, row)
    }

    fn floor_get(
        &self,
        table: &str,
        row: &[u8],
        family: &str,
    ) -> Result<Option<(Vec<u8>, Columns)>> {
        let db = self.db(table)?;
        let cf = cf_handle(&db, table, family)?;
        let mut iter = db.iterator_cf(cf, IteratorMode::From(row, Direction::Reverse));
        match iter.next() {
            None => Ok(None),
            Some(item) => {
                let (key, blob) = item
                    .map_err(|e| IndexError::Io(format!("floor seek in {}: {}", table, e)))?;
                Ok(Some((key.to_vec(), decode_row_blob(&blob)?)))
            }
        }
    }

    fn atomic_increment(
        &self,
        table: &str,
        row: &[u8],
        family: &str,
        qualifier: &[u8],
        delta: i64,
    ) -> Result<i64> {
        let _guard = lock(&self.incr_lock)?;
        let db = self.db(table)?;
        let mut columns = Self::read_row(&db, table, family, row)?;
        let current = match columns.get(qualifier) {
            Some(value) => decode_counter(value, &format!("{}/{:02x?}", table, row))?,
            None => 0,
        };
        let updated = current + delta;
        columns.insert(qualifier.to_vec(), updated.to_be_bytes().to_vec());
        Self::write_row(&db, table, family, row, &columns)?;
        Ok(updated)
    }

    fn scan(
        &self,
        table: &str,
        start: &[u8],
        stop: Option<&[u8]>,
        family: &str,
        filter: Option<Box<dyn ScanFilter>>,
        caching: usize,
    ) -> Result<Scanner> {
        let db = self.db(table)?;
        // Fail fast on an unknown family before the first page.
        cf_handle(&db, table, family)?;
        Ok(Box::new(RocksScanner {
            db,
            table: table.to_string(),
            family: family.to_string(),
            next_start: Some(start.to_vec()),
            stop: stop.map(|s| s.to_vec()),
            filter,
            caching: caching.max(1),
            buf: VecDeque::new(),
        }))
    }
}

struct RocksScanner {
    db: Arc<DB>,
    table: String,
    family: String,
    // Inclusive resume position; `None` once the range is exhausted.
    next_start: Option<Vec<u8>>,
    stop: Option<Vec<u8>>,
    filter: Option<Box<dyn ScanFilter>>,
    caching: usize,
    buf: VecDeque<Row>,
}

impl RocksScanner {
    fn refill(&mut self) -> Result<()> {
        let start = match self.next_start.take() {
            Some(start) => start,
            None => return Ok(()),
        };
        let cf = cf_handle(&self.db, &self.table, &self.family)?;
        let iter = self
            .db
            .iterator_cf(cf, IteratorMode::From(&start[..], Direction::Forward));
        let mut scanned = 0;
        for item in iter {
            let (key, blob) = item
                .map_err(|e| IndexError::Io(format!("scan of {}: {}", self.table, e)))?;
            if let Some(stop) = self.stop.as_deref() {
                if key.as_ref() >= stop {
                    return Ok(());
                }
            }
            if scanned == self.caching {
                self.next_start = Some(key.to_vec());
                return Ok(());
            }
            scanned += 1;
            let columns = decode_row_blob(&blob)?;
            let kept = apply_filter(&columns, &self.filter);
            if !kept.is_empty() {
                self.buf.push_back(Row {
                    key: key.to_vec(),
                    columns: kept,
                });
            }
        }
        Ok(())
    }
}

impl Iterator for RocksScanner {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buf.pop_front() {
                return Some(Ok(row));
            }
            self.next_start.as_ref()?;
            if let Err(e) = self.refill() {
                self.next_start = None;
                return Some(Err(e));
            }
        }
    }
}

fn lock<'a, T>(mutex: &'a Mutex<T>) -> Result<std::sync::MutexGuard<'a, T>> {
    mutex
        .lock()
        .map_err(|_| IndexError::Io("store mutex poisoned".to_string()))
}

fn cf_handle<'a>(db: &'a DB, table: &str, family: &str) -> Result<&'a rocksdb::ColumnFamily> {
    db.cf_handle(family)
        .ok_or_else(|| IndexError::Io(format!("no such family: {}/{}", table, family)))
}

fn encode_row_blob(columns: &Columns) -> Vec<u8> {
    let size: usize = columns.iter().map(|(q, v)| 8 + q.len() + v.len()).sum();
    let mut buf = BytesMut::with_capacity(size);
    for (qualifier, value) in columns {
        buf.put_u32(qualifier.len() as u32);
        buf.put_slice(qualifier);
        buf.put_u32(value.len() as u32);
        buf.put_slice(value);
    }
    buf.to_vec()
}

fn decode_row_blob(blob: &[u8]) -> Result<Columns> {
    let mut buf = blob;
    let mut columns = Columns::new();
    while buf.has_remaining() {
        let qualifier = take_framed(&mut buf)?;
        let value = take_framed(&mut buf)?;
        columns.insert(qualifier, value);
    }
    Ok(columns)
}

fn take_framed(buf: &mut &[u8]) -> Result<Vec<u8>> {
    if buf.remaining() < 4 {
        return Err(IndexError::Io("truncated row blob".to_string()));
    }
    let len = buf.get_u32() as usize;
    if buf.remaining() < len {
        return Err(IndexError::Io("truncated row blob".to_string()));
    }
    let mut out = vec![0u8; len];
    buf.copy_to_slice(&mut out);
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_row_blob_roundtrip() {
        let mut columns = Columns::new();
        columns.insert(b"pl".to_vec(), vec![0, 0, 0, 2]);
        columns.insert(b"bs".to_vec(), vec![0; 8]);
        columns.insert(Vec::new(), Vec::new());
        assert_eq!(decode_row_blob(&encode_row_blob(&columns)).unwrap(), columns);
        assert!(decode_row_blob(&[1, 2, 3]).is_err());
    }

    #[test]
    fn test_end_to_end() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        store.create_table("t", &["f"]).unwrap();
        assert!(store.table_exists("t").unwrap());
        assert!(store.create_table("t", &["f"]).is_err());

        store.put("t", &[0x10], "f", b"a", b"1").unwrap();
        store.put("t", &[0x10], "f", b"b", b"2").unwrap();
        store.put("t", &[0x30], "f", b"a", b"3").unwrap();
        let columns = store.get("t", &[0x10], "f").unwrap();
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[&b"b".to_vec()], b"2".to_vec());

        let (row, _) = store.floor_get("t", &[0x20], "f").unwrap().unwrap();
        assert_eq!(row, vec![0x10]);
        assert!(store.floor_get("t", &[0x01], "f").unwrap().is_none());

        assert_eq!(store.atomic_increment("t", &[0x40], "f", b"c", 3).unwrap(), 3);
        assert_eq!(store.atomic_increment("t", &[0x40], "f", b"c", 4).unwrap(), 7);

        let rows: Vec<_> = store
            .scan("t", &[0x10], Some(&[0x40]), "f", None, 1)
            .unwrap()
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[1].key, vec![0x30]);

        store.drop_table("t").unwrap();
        assert!(!store.table_exists("t").unwrap());
    }

    #[test]
    fn test_batch_visible_together() {
        let dir = tempdir().unwrap();
        let store = RocksStore::open(dir.path()).unwrap();
        store.create_table("t", &["f"]).unwrap();
        let puts = vec![
            Put::new(vec![1], "f", b"q".to_vec(), b"a".to_vec()),
            Put::new(vec![1], "f", b"r".to_vec(), b"b".to_vec()),
            Put::new(vec![2], "f", b"q".to_vec(), b"c".to_vec()),
        ];
        store.put_batch("t", puts).unwrap();
        assert_eq!(store.get("t", &[1], "f").unwrap().len(), 2);
        assert_eq!(store.get("t", &[2], "f").unwrap().len(), 1);
    }

    #[test]
    fn test_reopen_after_restart() {
        let dir = tempdir().unwrap();
        {
            let store = RocksStore::open(dir.path()).unwrap();
            store.create_table("t", &["f"]).unwrap();
            store.put("t", &[1], "f", b"q", b"v").unwrap();
        }
        let store = RocksStore::open(dir.path()).unwrap();
        assert!(store.table_exists("t").unwrap());
        assert_eq!(store.get("t", &[1], "f").unwrap().len(), 1);
    }
}
