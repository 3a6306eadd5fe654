//! Volatile in-memory archive store

use super::{check_write_order, ArchiveMetadata, ArchiveStore, RowReader, RowWriter};
use crate::row::ArchiveRow;
use crate::types::RowKey;
use crate::Result;
use std::sync::Arc;

/// Store that keeps the archive entirely in memory
#[derive(Debug, Default)]
pub struct VolatileStore {
    metadata: ArchiveMetadata,
    rows: Arc<Vec<ArchiveRow>>,
}

impl VolatileStore {
    /// Create an empty volatile store
    pub fn new(primary_key: Option<Vec<String>>) -> Self {
        Self {
            metadata: ArchiveMetadata::new(primary_key),
            rows: Arc::new(Vec::new()),
        }
    }
}

impl ArchiveStore for VolatileStore {
    type Reader = BufferReader;
    type Writer = ArchiveBuffer;

    fn metadata(&self) -> &ArchiveMetadata {
        &self.metadata
    }

    fn reader(&self) -> Result<BufferReader> {
        // The reader shares the current row vector; a later commit swaps in
        // a new vector without touching this one.
        Ok(BufferReader {
            rows: Arc::clone(&self.rows),
            next: 0,
        })
    }

    fn writer(&self) -> Result<ArchiveBuffer> {
        Ok(ArchiveBuffer {
            rows: Vec::new(),
            last_key: None,
        })
    }

    fn commit(&mut self, metadata: ArchiveMetadata, writer: ArchiveBuffer) -> Result<()> {
        self.metadata = metadata;
        self.rows = Arc::new(writer.rows);
        Ok(())
    }
}

/// Reader over an in-memory row buffer
pub struct BufferReader {
    rows: Arc<Vec<ArchiveRow>>,
    next: usize,
}

impl RowReader for BufferReader {
    fn next_row(&mut self) -> Result<Option<ArchiveRow>> {
        let row = self.rows.get(self.next).cloned();
        self.next += 1;
        Ok(row)
    }
}

/// Writer that accumulates the rows of a new version in memory
pub struct ArchiveBuffer {
    rows: Vec<ArchiveRow>,
    last_key: Option<RowKey>,
}

impl RowWriter for ArchiveBuffer {
    fn write_row(&mut self, row: ArchiveRow) -> Result<()> {
        check_write_order(&mut self.last_key, &row)?;
        self.rows.push(row);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scalar;
    use std::collections::BTreeMap;

    fn row(rowid: u64, index: i64) -> ArchiveRow {
        let mut values = BTreeMap::new();
        values.insert(0u32, Scalar::Int(index));
        ArchiveRow::create(rowid, RowKey::Index(index), index as usize, values, 0)
    }

    #[test]
    fn test_commit_and_read() {
        let mut store = VolatileStore::new(None);
        assert!(store.is_empty());
        let mut writer = store.writer().unwrap();
        writer.write_row(row(0, 0)).unwrap();
        writer.write_row(row(1, 1)).unwrap();
        store.commit(store.metadata().clone(), writer).unwrap();

        let mut reader = store.reader().unwrap();
        assert_eq!(reader.next_row().unwrap().unwrap().rowid, 0);
        assert_eq!(reader.next_row().unwrap().unwrap().rowid, 1);
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn test_reader_sees_consistent_state() {
        let mut store = VolatileStore::new(None);
        let mut writer = store.writer().unwrap();
        writer.write_row(row(0, 0)).unwrap();
        store.commit(store.metadata().clone(), writer).unwrap();

        // A reader opened before a commit keeps seeing the old rows.
        let mut reader = store.reader().unwrap();
        let mut writer = store.writer().unwrap();
        writer.write_row(row(0, 0)).unwrap();
        writer.write_row(row(1, 1)).unwrap();
        store.commit(store.metadata().clone(), writer).unwrap();

        assert_eq!(reader.next_row().unwrap().unwrap().rowid, 0);
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn test_out_of_order_write_rejected() {
        let store = VolatileStore::new(None);
        let mut writer = store.writer().unwrap();
        writer.write_row(row(1, 5)).unwrap();
        assert!(writer.write_row(row(2, 3)).is_err());
    }
}
