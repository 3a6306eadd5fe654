//! Streaming snapshot merge
//!
//! The merge is a streaming outer join of two sorted streams: the archive
//! rows in ascending merge-key order and the snapshot rows in ascending key
//! order. Matched rows have their histories extended with the new version,
//! unmatched archive rows pass through unchanged, and unmatched snapshot
//! rows become new archive rows. The writer receives the output in the
//! merge-key order of the new version.

use crate::document::{DocumentReader, DocumentRow};
use crate::row::ArchiveRow;
use crate::store::{RowReader, RowWriter};
use crate::types::{RowKey, Scalar};
use crate::{ArchiveError, Result};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use tracing::debug;

/// Merge a snapshot document into the archive row stream as the given
/// version. `columns` maps each document column position to its archive
/// column identifier. Returns the number of rows in the snapshot.
pub(crate) fn merge_snapshot(
    archive: &mut dyn RowReader,
    document: &mut dyn DocumentReader,
    columns: &[u32],
    version: u64,
    next_row_id: &mut u64,
    writer: &mut dyn RowWriter,
) -> Result<u64> {
    let mut prev_key: Option<RowKey> = None;
    let mut a = archive.next_row()?;
    let mut b = next_document_row(document, &mut prev_key, columns)?;
    let mut snapshot_rows = 0u64;
    loop {
        match (a.take(), b.take()) {
            (Some(row), Some(doc_row)) => match row.key.cmp(&doc_row.key) {
                Ordering::Less => {
                    // Row is absent from the new snapshot; its timestamp
                    // simply does not gain the new version.
                    writer.write_row(row)?;
                    a = archive.next_row()?;
                    b = Some(doc_row);
                }
                Ordering::Greater => {
                    writer.write_row(create_row(doc_row, columns, version, next_row_id))?;
                    snapshot_rows += 1;
                    a = Some(row);
                    b = next_document_row(document, &mut prev_key, columns)?;
                }
                Ordering::Equal => {
                    writer.write_row(extend_row(&row, doc_row, columns, version)?)?;
                    snapshot_rows += 1;
                    a = archive.next_row()?;
                    b = next_document_row(document, &mut prev_key, columns)?;
                }
            },
            (Some(row), None) => {
                writer.write_row(row)?;
                a = archive.next_row()?;
            }
            (None, Some(doc_row)) => {
                writer.write_row(create_row(doc_row, columns, version, next_row_id))?;
                snapshot_rows += 1;
                b = next_document_row(document, &mut prev_key, columns)?;
            }
            (None, None) => break,
        }
    }
    debug!(version, rows = snapshot_rows, "merged snapshot");
    Ok(snapshot_rows)
}

/// Read the next document row, validating the sort order and key
/// uniqueness of the stream
fn next_document_row(
    document: &mut dyn DocumentReader,
    prev_key: &mut Option<RowKey>,
    columns: &[u32],
) -> Result<Option<DocumentRow>> {
    let row = match document.next_row()? {
        Some(row) => row,
        None => return Ok(None),
    };
    if row.values.len() != columns.len() {
        return Err(ArchiveError::Document(format!(
            "snapshot row at position {} has {} values, expected {}",
            row.pos,
            row.values.len(),
            columns.len()
        )));
    }
    if let Some(prev) = prev_key {
        match row.key.cmp(prev) {
            Ordering::Less => {
                return Err(ArchiveError::UnsortedInput(format!(
                    "key {} after key {}",
                    row.key, prev
                )))
            }
            // Any number of new rows may share the marker key.
            Ordering::Equal if !row.key.is_new() => {
                return Err(ArchiveError::DuplicateKey(row.key.to_string()))
            }
            _ => {}
        }
    }
    *prev_key = Some(row.key.clone());
    Ok(Some(row))
}

fn cell_values(doc_row: &DocumentRow, columns: &[u32]) -> BTreeMap<u32, Scalar> {
    columns
        .iter()
        .zip(doc_row.values.iter())
        .map(|(&colid, value)| (colid, value.clone()))
        .collect()
}

fn create_row(
    doc_row: DocumentRow,
    columns: &[u32],
    version: u64,
    next_row_id: &mut u64,
) -> ArchiveRow {
    let rowid = *next_row_id;
    *next_row_id += 1;
    // New rows of an un-keyed archive adopt the fresh identifier as their
    // row index.
    let key = if doc_row.key.is_new() {
        RowKey::Index(rowid as i64)
    } else {
        doc_row.key.clone()
    };
    let values = cell_values(&doc_row, columns);
    ArchiveRow::create(rowid, key, doc_row.pos, values, version)
}

fn extend_row(
    row: &ArchiveRow,
    doc_row: DocumentRow,
    columns: &[u32],
    version: u64,
) -> Result<ArchiveRow> {
    if row.timestamp.contains(version) {
        return Err(ArchiveError::Integrity(format!(
            "row {} already contains version {}",
            row.rowid, version
        )));
    }
    let values = cell_values(&doc_row, columns);
    Ok(row.merge(&values, doc_row.pos, version))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::InMemoryDocument;
    use crate::document::Document;
    use crate::store::mem::VolatileStore;
    use crate::store::ArchiveStore;
    use crate::types::KeyValue;

    fn merge_into(
        store: &mut VolatileStore,
        doc: &mut InMemoryDocument,
        key: &[usize],
        columns: &[u32],
        version: u64,
    ) -> Result<()> {
        let mut next_row_id = store.metadata().next_row_id;
        let mut reader = store.reader()?;
        let mut doc_reader = doc.sorted_reader(key)?;
        let mut writer = store.writer()?;
        merge_snapshot(
            &mut reader,
            doc_reader.as_mut(),
            columns,
            version,
            &mut next_row_id,
            &mut writer,
        )?;
        drop(doc_reader);
        let mut metadata = store.metadata().clone();
        metadata.next_row_id = next_row_id;
        metadata.snapshots = metadata
            .snapshots
            .append(version, crate::snapshot::InputDescriptor::default())?;
        store.commit(metadata, writer)
    }

    fn rows_of(store: &VolatileStore) -> Vec<ArchiveRow> {
        let mut reader = store.reader().unwrap();
        let mut rows = Vec::new();
        while let Some(row) = reader.next_row().unwrap() {
            rows.push(row);
        }
        rows
    }

    #[test]
    fn test_keyed_merge_outer_join() {
        let mut store = VolatileStore::new(Some(vec!["Name".into()]));
        let mut doc = InMemoryDocument::new(
            vec!["Name", "Age"],
            vec![
                vec!["Alice".into(), 32.into()],
                vec!["Bob".into(), 45.into()],
            ],
        )
        .unwrap();
        merge_into(&mut store, &mut doc, &[0], &[0, 1], 0).unwrap();

        // Bob disappears, Claire appears.
        let mut doc = InMemoryDocument::new(
            vec!["Name", "Age"],
            vec![
                vec!["Alice".into(), 33.into()],
                vec!["Claire".into(), 27.into()],
            ],
        )
        .unwrap();
        merge_into(&mut store, &mut doc, &[0], &[0, 1], 1).unwrap();

        let rows = rows_of(&store);
        assert_eq!(rows.len(), 3);
        // Order is by key: Alice, Bob, Claire.
        assert_eq!(rows[0].key, RowKey::Value(KeyValue::Text("Alice".into())));
        assert_eq!(rows[0].timestamp.to_string(), "0-1");
        assert_eq!(rows[1].key, RowKey::Value(KeyValue::Text("Bob".into())));
        assert_eq!(rows[1].timestamp.to_string(), "0");
        assert_eq!(rows[2].key, RowKey::Value(KeyValue::Text("Claire".into())));
        assert_eq!(rows[2].timestamp.to_string(), "1");
        assert_eq!(rows[2].rowid, 2);
    }

    #[test]
    fn test_duplicate_key_is_fatal() {
        let mut store = VolatileStore::new(Some(vec!["k".into()]));
        let mut doc = InMemoryDocument::new(
            vec!["k", "v"],
            vec![
                vec!["A".into(), 1.into()],
                vec!["A".into(), 2.into()],
            ],
        )
        .unwrap();
        let err = merge_into(&mut store, &mut doc, &[0], &[0, 1], 0).unwrap_err();
        assert!(matches!(err, ArchiveError::DuplicateKey(_)));
    }

    #[test]
    fn test_unsorted_input_is_fatal() {
        // A reader that bypasses document sorting.
        struct Unsorted(Vec<DocumentRow>);
        impl DocumentReader for Unsorted {
            fn next_row(&mut self) -> Result<Option<DocumentRow>> {
                Ok(if self.0.is_empty() {
                    None
                } else {
                    Some(self.0.remove(0))
                })
            }
        }
        let store = VolatileStore::new(None);
        let mut reader = store.reader().unwrap();
        let mut writer = store.writer().unwrap();
        let mut document = Unsorted(vec![
            DocumentRow {
                pos: 0,
                key: RowKey::Index(5),
                values: vec![1.into()],
            },
            DocumentRow {
                pos: 1,
                key: RowKey::Index(2),
                values: vec![2.into()],
            },
        ]);
        let mut next_row_id = 0;
        let err = merge_snapshot(
            &mut reader,
            &mut document,
            &[0],
            0,
            &mut next_row_id,
            &mut writer,
        )
        .unwrap_err();
        assert!(matches!(err, ArchiveError::UnsortedInput(_)));
    }

    #[test]
    fn test_new_rows_get_fresh_identifiers() {
        let mut store = VolatileStore::new(None);
        let mut doc = InMemoryDocument::new(
            vec!["Name"],
            vec![vec!["Alice".into()], vec!["Bob".into()]],
        )
        .unwrap();
        merge_into(&mut store, &mut doc, &[], &[0], 0).unwrap();

        // One existing row and one new row without an index.
        let mut doc = InMemoryDocument::with_index(
            vec!["Name"],
            vec![vec!["Alice".into()], vec!["Eve".into()]],
            vec![Some(0), None],
        )
        .unwrap();
        merge_into(&mut store, &mut doc, &[], &[0], 1).unwrap();

        let rows = rows_of(&store);
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[2].rowid, 2);
        assert_eq!(rows[2].key, RowKey::Index(2));
        assert_eq!(rows[2].timestamp.to_string(), "1");
        // Bob was absent from version 1.
        assert_eq!(rows[1].timestamp.to_string(), "0");
    }
}
