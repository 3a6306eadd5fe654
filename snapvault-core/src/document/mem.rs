//! In-memory snapshot documents

use super::{ColumnSpec, Document, DocumentReader, DocumentRow};
use crate::types::{Dataset, RowKey, Scalar};
use crate::{ArchiveError, Result};

/// A document over rows that are fully materialized in memory.
///
/// Un-keyed archives merge by row index: every row may carry an explicit
/// index (`None` marking a new row), defaulting to the row's position in the
/// document. Keyed archives ignore the index and derive keys from the
/// primary-key columns.
#[derive(Debug, Clone)]
pub struct InMemoryDocument {
    columns: Vec<ColumnSpec>,
    rows: Vec<Vec<Scalar>>,
    index: Vec<Option<i64>>,
}

impl InMemoryDocument {
    /// Create a document where each row is indexed by its position
    pub fn new<C: Into<ColumnSpec>>(columns: Vec<C>, rows: Vec<Vec<Scalar>>) -> Result<Self> {
        let index = (0..rows.len() as i64).map(Some).collect();
        Self::with_index(columns, rows, index)
    }

    /// Create a document with an explicit row index. `None` entries mark new
    /// rows that will be assigned fresh identifiers on merge.
    pub fn with_index<C: Into<ColumnSpec>>(
        columns: Vec<C>,
        rows: Vec<Vec<Scalar>>,
        index: Vec<Option<i64>>,
    ) -> Result<Self> {
        let columns: Vec<ColumnSpec> = columns.into_iter().map(Into::into).collect();
        if rows.len() != index.len() {
            return Err(ArchiveError::Document(format!(
                "row index length {} does not match row count {}",
                index.len(),
                rows.len()
            )));
        }
        for (pos, row) in rows.iter().enumerate() {
            if row.len() != columns.len() {
                return Err(ArchiveError::Document(format!(
                    "row {} has {} values, expected {}",
                    pos,
                    row.len(),
                    columns.len()
                )));
            }
        }
        Ok(Self {
            columns,
            rows,
            index,
        })
    }

    fn key_for(&self, pos: usize, key: &[usize]) -> RowKey {
        if key.is_empty() {
            match self.index[pos] {
                Some(idx) => RowKey::Index(idx),
                None => RowKey::New,
            }
        } else {
            let values: Vec<&Scalar> = key.iter().map(|&k| &self.rows[pos][k]).collect();
            RowKey::from_values(&values)
        }
    }
}

impl Document for InMemoryDocument {
    fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    fn sorted_reader(&mut self, key: &[usize]) -> Result<Box<dyn DocumentReader + '_>> {
        for &k in key {
            if k >= self.columns.len() {
                return Err(ArchiveError::Document(format!(
                    "key column position {} out of bounds",
                    k
                )));
            }
        }
        let mut order: Vec<(RowKey, usize)> = (0..self.rows.len())
            .map(|pos| (self.key_for(pos, key), pos))
            .collect();
        // Stable by position so that new rows keep their document order.
        order.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(Box::new(MemoryReader {
            doc: self,
            order,
            next: 0,
        }))
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

struct MemoryReader<'a> {
    doc: &'a InMemoryDocument,
    order: Vec<(RowKey, usize)>,
    next: usize,
}

impl DocumentReader for MemoryReader<'_> {
    fn next_row(&mut self) -> Result<Option<DocumentRow>> {
        if self.next >= self.order.len() {
            return Ok(None);
        }
        let (key, pos) = self.order[self.next].clone();
        self.next += 1;
        Ok(Some(DocumentRow {
            pos,
            key,
            values: self.doc.rows[pos].clone(),
        }))
    }
}

impl Dataset {
    /// Convert a reconstructed snapshot back into a document. The rows are
    /// indexed by their archive row identifier, so committing the document
    /// into the un-keyed archive it came from preserves row identity.
    pub fn to_document(&self) -> InMemoryDocument {
        let columns = self
            .columns
            .iter()
            .map(|c| ColumnSpec::with_id(c.name.clone(), c.id))
            .collect::<Vec<_>>();
        let rows = self.rows.iter().map(|r| r.values.clone()).collect();
        let index = self.rows.iter().map(|r| Some(r.rowid as i64)).collect();
        InMemoryDocument {
            columns,
            rows,
            index,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyValue;

    fn doc() -> InMemoryDocument {
        InMemoryDocument::new(
            vec!["Name", "Age"],
            vec![
                vec!["Claire".into(), 27.into()],
                vec!["Alice".into(), 32.into()],
                vec!["Bob".into(), 45.into()],
            ],
        )
        .unwrap()
    }

    fn read_all(reader: &mut dyn DocumentReader) -> Vec<DocumentRow> {
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_index_order() {
        let mut doc = doc();
        let mut reader = doc.sorted_reader(&[]).unwrap();
        let rows = read_all(reader.as_mut());
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[0].key, RowKey::Index(0));
        assert_eq!(rows[0].pos, 0);
        assert_eq!(rows[2].key, RowKey::Index(2));
    }

    #[test]
    fn test_key_order() {
        let mut doc = doc();
        let mut reader = doc.sorted_reader(&[0]).unwrap();
        let rows = read_all(reader.as_mut());
        assert_eq!(rows[0].key, RowKey::Value(KeyValue::Text("Alice".into())));
        assert_eq!(rows[0].pos, 1);
        assert_eq!(rows[1].key, RowKey::Value(KeyValue::Text("Bob".into())));
        assert_eq!(rows[2].key, RowKey::Value(KeyValue::Text("Claire".into())));
        assert_eq!(rows[2].pos, 0);
    }

    #[test]
    fn test_new_rows_sort_last() {
        let mut doc = InMemoryDocument::with_index(
            vec!["Name"],
            vec![
                vec!["Eve".into()],
                vec!["Alice".into()],
                vec!["Frank".into()],
            ],
            vec![None, Some(0), None],
        )
        .unwrap();
        let mut reader = doc.sorted_reader(&[]).unwrap();
        let rows = read_all(reader.as_mut());
        assert_eq!(rows[0].key, RowKey::Index(0));
        // New rows come last, in document order.
        assert_eq!(rows[1].key, RowKey::New);
        assert_eq!(rows[1].pos, 0);
        assert_eq!(rows[2].key, RowKey::New);
        assert_eq!(rows[2].pos, 2);
    }

    #[test]
    fn test_ragged_rows_rejected() {
        let err = InMemoryDocument::new(
            vec!["A", "B"],
            vec![vec![1.into()]],
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::Document(_)));
    }
}
