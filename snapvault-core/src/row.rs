//! Archive rows
//!
//! Each row in an archived dataset has a stable identifier that survives
//! re-keyings and permutations. The row carries the history of its index
//! positions and of every cell value, plus the merge key under which it is
//! ordered in the row stream.

use crate::timestamp::Timestamp;
use crate::types::{RowKey, Scalar};
use crate::value::ArchiveValue;
use std::collections::BTreeMap;

/// A row and its full version history
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveRow {
    /// Stable row identifier, unique within the archive
    pub rowid: u64,
    /// Merge key: the primary-key value for keyed archives, the row index
    /// for un-keyed ones
    pub key: RowKey,
    /// History of 0-based index positions
    pub pos: ArchiveValue,
    /// Cell histories by column identifier
    pub cells: BTreeMap<u32, ArchiveValue>,
    /// Versions in which the row exists
    pub timestamp: Timestamp,
}

impl ArchiveRow {
    /// Create a row that first appears at the given version
    pub fn create(
        rowid: u64,
        key: RowKey,
        pos: usize,
        values: BTreeMap<u32, Scalar>,
        version: u64,
    ) -> Self {
        let cells = values
            .into_iter()
            .map(|(colid, value)| (colid, ArchiveValue::at(value, version)))
            .collect();
        Self {
            rowid,
            key,
            pos: ArchiveValue::at(Scalar::Int(pos as i64), version),
            cells,
            timestamp: Timestamp::at(version),
        }
    }

    /// Create a new version of the row with the given cell values and index
    /// position. Columns missing from the value map keep their history
    /// unchanged (they do not gain the new version).
    pub fn merge(
        &self,
        values: &BTreeMap<u32, Scalar>,
        pos: usize,
        version: u64,
    ) -> ArchiveRow {
        let mut cells = BTreeMap::new();
        for (&colid, value) in values {
            let cell = match self.cells.get(&colid) {
                Some(cell) => cell.merge(value, version),
                None => ArchiveValue::at(value.clone(), version),
            };
            cells.insert(colid, cell);
        }
        for (&colid, cell) in &self.cells {
            cells.entry(colid).or_insert_with(|| cell.clone());
        }
        ArchiveRow {
            rowid: self.rowid,
            key: self.key.clone(),
            pos: self.pos.merge(&Scalar::Int(pos as i64), version),
            cells,
            timestamp: self.timestamp.append(version),
        }
    }

    /// Get the index position of the row at the given version
    pub fn position_at(&self, version: u64) -> Option<usize> {
        match self.pos.at_version(version) {
            Some(Scalar::Int(p)) => Some(*p as usize),
            _ => None,
        }
    }

    /// Get the position and cell values of the row at the given version.
    /// Values are returned in the order of the given columns; a missing cell
    /// for a live column yields null. Returns `None` if the row was not
    /// present at the version.
    pub fn at_version(&self, version: u64, columns: &[u32]) -> Option<(usize, Vec<Scalar>)> {
        if !self.timestamp.contains(version) {
            return None;
        }
        let pos = self.position_at(version)?;
        let values = columns
            .iter()
            .map(|colid| {
                self.cells
                    .get(colid)
                    .and_then(|cell| cell.at_version(version))
                    .cloned()
                    .unwrap_or(Scalar::Null)
            })
            .collect();
        Some((pos, values))
    }

    /// Truncate the row history to versions lower or equal to the given one.
    /// Returns `None` if the row does not exist in any surviving version.
    pub fn rollback(&self, version: u64) -> Option<ArchiveRow> {
        let timestamp = self.timestamp.rollback(version);
        if timestamp.is_empty() {
            return None;
        }
        let pos = self.pos.rollback(version)?;
        let mut cells = BTreeMap::new();
        for (&colid, cell) in &self.cells {
            if let Some(cell) = cell.rollback(version) {
                cells.insert(colid, cell);
            }
        }
        Some(ArchiveRow {
            rowid: self.rowid,
            key: self.key.clone(),
            pos,
            cells,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::KeyValue;

    fn values(pairs: &[(u32, Scalar)]) -> BTreeMap<u32, Scalar> {
        pairs.iter().cloned().collect()
    }

    fn key(name: &str) -> RowKey {
        RowKey::Value(KeyValue::Text(name.to_string()))
    }

    #[test]
    fn test_create_and_read() {
        let row = ArchiveRow::create(
            0,
            key("Alice"),
            2,
            values(&[(0, "Alice".into()), (1, 32.into())]),
            0,
        );
        let (pos, vals) = row.at_version(0, &[0, 1]).unwrap();
        assert_eq!(pos, 2);
        assert_eq!(vals, vec![Scalar::from("Alice"), Scalar::from(32)]);
        assert!(row.at_version(1, &[0, 1]).is_none());
    }

    #[test]
    fn test_merge_extends_history() {
        let row = ArchiveRow::create(
            0,
            key("Alice"),
            0,
            values(&[(0, "Alice".into()), (1, 32.into())]),
            0,
        );
        let row = row.merge(&values(&[(0, "Alice".into()), (1, 33.into())]), 0, 1);
        let row = row.merge(&values(&[(0, "Alice".into()), (1, 32.into())]), 1, 2);
        assert_eq!(row.timestamp.to_string(), "0-2");
        // Unchanged cell stays a single value.
        assert!(row.cells[&0].is_single_version());
        // The changed cell reverted at version 2 and extends the old entry.
        assert_eq!(row.cells[&1].entries().len(), 2);
        assert_eq!(row.cells[&1].at_version(2), Some(&Scalar::Int(32)));
        // Position history tracks the move.
        assert_eq!(row.position_at(0), Some(0));
        assert_eq!(row.position_at(2), Some(1));
    }

    #[test]
    fn test_merge_missing_column_keeps_history() {
        let row = ArchiveRow::create(
            3,
            RowKey::Index(3),
            3,
            values(&[(0, "Dave".into()), (1, 23.into())]),
            0,
        );
        // Version 1 has no column 1.
        let row = row.merge(&values(&[(0, "Dave".into())]), 3, 1);
        assert_eq!(row.timestamp.to_string(), "0-1");
        assert_eq!(row.cells[&1].timestamp().to_string(), "0");
        assert_eq!(row.cells[&1].at_version(1), None);
    }

    #[test]
    fn test_missing_cell_reads_null() {
        let row = ArchiveRow::create(0, key("A"), 0, values(&[(0, 1.into())]), 0);
        let (_, vals) = row.at_version(0, &[0, 7]).unwrap();
        assert_eq!(vals[1], Scalar::Null);
    }

    #[test]
    fn test_rollback() {
        let row = ArchiveRow::create(0, key("A"), 0, values(&[(0, 1.into())]), 0);
        let row = row.merge(&values(&[(0, 2.into())]), 1, 1);
        let rolled = row.rollback(0).unwrap();
        assert_eq!(rolled.timestamp.to_string(), "0");
        assert!(rolled.cells[&0].is_single_version());
        assert_eq!(rolled.position_at(0), Some(0));
        // A row created after the rollback target disappears entirely.
        let late = ArchiveRow::create(9, key("B"), 1, values(&[(0, 5.into())]), 3);
        assert!(late.rollback(2).is_none());
    }
}
