//! In-memory backend over `BTreeMap`. Reference semantics for the
//! contract and the substrate for unit tests.

use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use crate::error::{IndexError, Result};

use super::{apply_filter, decode_counter, Columns, Put, Row, ScanFilter, Scanner, Store};

type Family = std::collections::BTreeMap<Vec<u8>, Columns>;
type Table = HashMap<String, Rc<RefCell<Family>>>;

#[derive(Default)]
pub struct MemStore {
    tables: RefCell<HashMap<String, Table>>,
}

impl MemStore {
    pub fn new() -> Self {
        Default::default()
    }

    fn family(&self, table: &str, family: &str) -> Result<Rc<RefCell<Family>>> {
        let tables = self.tables.borrow();
        let t = tables
            .get(table)
            .ok_or_else(|| IndexError::Io(format!("no such table: {}", table)))?;
        let f = t
            .get(family)
            .ok_or_else(|| IndexError::Io(format!("no such family: {}/{}", table, family)))?;
        Ok(f.clone())
    }
}

impl Store for MemStore {
    fn create_table(&self, name: &str, families: &[&str]) -> Result<()> {
        let mut tables = self.tables.borrow_mut();
        if tables.contains_key(name) {
            return Err(IndexError::Io(format!("table already exists: {}", name)));
        }
        let table = families
            .iter()
            .map(|f| (f.to_string(), Rc::new(RefCell::new(Family::new()))))
            .collect();
        tables.insert(name.to_string(), table);
        Ok(())
    }

    fn table_exists(&self, name: &str) -> Result<bool> {
        Ok(self.tables.borrow().contains_key(name))
    }

    fn drop_table(&self, name: &str) -> Result<()> {
        self.tables
            .borrow_mut()
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IndexError::Io(format!("no such table: {}", name)))
    }

    fn put(
        &self,
        table: &str,
        row: &[u8],
        family: &str,
        qualifier: &[u8],
        value: &[u8],
    ) -> Result<()> {
        let family = self.family(table, family)?;
        family
            .borrow_mut()
            .entry(row.to_vec())
            .or_insert_with(Columns::new)
            .insert(qualifier.to_vec(), value.to_vec());
        Ok(())
    }

    fn put_batch(&self, table: &str, puts: Vec<Put>) -> Result<()> {
        for put in puts {
            self.put(table, &put.row, &put.family, &put.qualifier, &put.value)?;
        }
        Ok(())
    }

    fn get(&self, table: &str, row: &[u8], family: &str) -> Result<Columns> {
        let family = self.family(table, family)?;
        let family = family.borrow();
        Ok(family.get(row).cloned().unwrap_or_default())
    }

    fn floor_get(
        &self,
        table: &str,
        row: &[u8],
        family: &str,
    ) -> Result<Option<(Vec<u8>, Columns)>> {
        let family = self.family(table, family)?;
        let family = family.borrow();
        Ok(family
            .range(..=row.to_vec())
            .next_back()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn atomic_increment(
        &self,
        table: &str,
        row: &[u8],
        family: &str,
        qualifier: &[u8],
        delta: i64,
    ) -> Result<i64> {
        let family = self.family(table, family)?;
        let mut family = family.borrow_mut();
        let columns = family.entry(row.to_vec()).or_insert_with(Columns::new);
        let current = match columns.get(qualifier) {
            Some(value) => decode_counter(value, &format!("{:02x?}", row))?,
            None => 0,
        };
        let updated = current + delta;
        columns.insert(qualifier.to_vec(), updated.to_be_bytes().to_vec());
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
        let family = self.family(table, family)?;
        Ok(Box::new(MemScanner {
            family,
            next_start: Some(start.to_vec()),
            stop: stop.map(|s| s.to_vec()),
            filter,
            caching: caching.max(1),
            buf: VecDeque::new(),
        }))
    }
}

struct MemScanner {
    family: Rc<RefCell<Family>>,
    // Inclusive resume position; `None` once the range is exhausted.
    next_start: Option<Vec<u8>>,
    stop: Option<Vec<u8>>,
    filter: Option<Box<dyn ScanFilter>>,
    caching: usize,
    buf: VecDeque<Row>,
}

impl MemScanner {
    fn refill(&mut self) {
        let start = match self.next_start.take() {
            Some(start) => start,
            None => return,
        };
        let family = self.family.borrow();
        let mut scanned = 0;
        for (key, columns) in family.range(start..) {
            if let Some(stop) = self.stop.as_deref() {
                if key.as_slice() >= stop {
                    return;
                }
            }
            if scanned == self.caching {
                self.next_start = Some(key.clone());
                return;
            }
            scanned += 1;
            let kept = apply_filter(columns, &self.filter);
            if !kept.is_empty() {
                self.buf.push_back(Row {
                    key: key.clone(),
                    columns: kept,
                });
            }
        }
    }
}

impl Iterator for MemScanner {
    type Item = Result<Row>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(row) = self.buf.pop_front() {
                return Some(Ok(row));
            }
            self.next_start.as_ref()?;
            self.refill();
        }
    }
}
