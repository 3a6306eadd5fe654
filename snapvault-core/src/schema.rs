//! Archive schema
//!
//! Columns have a stable identifier together with timestamped names and
//! schema positions. Renames change the name history, reorderings change
//! the position history; the identifier never changes.

use crate::document::ColumnSpec;
use crate::timestamp::Timestamp;
use crate::types::{ColumnRef, Scalar};
use crate::value::ArchiveValue;
use crate::{ArchiveError, Result};
use std::collections::{BTreeMap, HashMap, HashSet};

/// Policy for aligning snapshot columns with existing archive columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ColumnMatching {
    /// Match by the external column identifier carried by the document
    /// schema; columns without an identifier are new columns
    ById,
    /// Match by name against the schema of the previous version
    #[default]
    ByName,
}

/// A column and its full name and position history
#[derive(Debug, Clone, PartialEq)]
pub struct ArchiveColumn {
    /// Stable column identifier
    pub id: u32,
    /// History of column names
    pub name: ArchiveValue,
    /// History of 0-based schema positions
    pub pos: ArchiveValue,
    /// Versions in which the column exists
    pub timestamp: Timestamp,
}

impl ArchiveColumn {
    /// Create a column that first appears at the given version
    pub fn create(id: u32, name: &str, pos: usize, version: u64) -> Self {
        Self {
            id,
            name: ArchiveValue::at(Scalar::Text(name.to_string()), version),
            pos: ArchiveValue::at(Scalar::Int(pos as i64), version),
            timestamp: Timestamp::at(version),
        }
    }

    /// Get the name and schema position of the column at the given version
    pub fn at_version(&self, version: u64) -> Option<(String, usize)> {
        let name = match self.name.at_version(version)? {
            Scalar::Text(name) => name.clone(),
            other => other.to_string(),
        };
        let pos = match self.pos.at_version(version)? {
            Scalar::Int(pos) => *pos as usize,
            _ => return None,
        };
        Some((name, pos))
    }

    /// Add the name and position for a new version to the column history
    pub fn merge(&self, name: &str, pos: usize, version: u64) -> ArchiveColumn {
        ArchiveColumn {
            id: self.id,
            name: self.name.merge(&Scalar::Text(name.to_string()), version),
            pos: self.pos.merge(&Scalar::Int(pos as i64), version),
            timestamp: self.timestamp.append(version),
        }
    }

    /// Truncate the column history to versions lower or equal to the given
    /// one
    pub fn rollback(&self, version: u64) -> Option<ArchiveColumn> {
        let timestamp = self.timestamp.rollback(version);
        if timestamp.is_empty() {
            return None;
        }
        Some(ArchiveColumn {
            id: self.id,
            name: self.name.rollback(version)?,
            pos: self.pos.rollback(version)?,
            timestamp,
        })
    }
}

/// The history of all columns of an archived dataset
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ArchiveSchema {
    columns: BTreeMap<u32, ArchiveColumn>,
}

impl ArchiveSchema {
    /// Create an empty schema
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a schema from a list of columns. Returns an error if column
    /// identifiers are not unique.
    pub fn from_columns(columns: Vec<ArchiveColumn>) -> Result<Self> {
        let mut map = BTreeMap::new();
        for column in columns {
            if map.insert(column.id, column.clone()).is_some() {
                return Err(ArchiveError::Integrity(format!(
                    "duplicate column identifier {}",
                    column.id
                )));
            }
        }
        Ok(Self { columns: map })
    }

    /// Iterate over all columns in identifier order
    pub fn iter(&self) -> impl Iterator<Item = &ArchiveColumn> {
        self.columns.values()
    }

    /// Number of columns in the history
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    /// Check if the schema has no columns
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Get the columns that were live at the given version, in their
    /// snapshot order
    pub fn at_version(&self, version: u64) -> Vec<ColumnRef> {
        let mut cols: Vec<(usize, ColumnRef)> = self
            .columns
            .values()
            .filter_map(|col| {
                let (name, pos) = col.at_version(version)?;
                Some((pos, ColumnRef { id: col.id, name }))
            })
            .collect();
        cols.sort_by_key(|(pos, _)| *pos);
        cols.into_iter().map(|(_, col)| col).collect()
    }

    /// Align the columns of a new snapshot with the archive schema.
    ///
    /// Every document column either matches an existing archive column
    /// (extending its history with the new name and position) or allocates a
    /// fresh identifier starting at `next_col_id`. Columns absent from the
    /// snapshot keep their history unchanged. Returns the new schema, the
    /// archive column identifier for each document column in document order,
    /// and the updated identifier counter.
    pub fn merge(
        &self,
        columns: &[ColumnSpec],
        version: u64,
        matching: ColumnMatching,
        origin: Option<u64>,
        mut next_col_id: u32,
    ) -> Result<(ArchiveSchema, Vec<u32>, u32)> {
        // Name index over the schema of the origin version, used when
        // matching by name. A name that is ambiguous at the origin cannot be
        // matched against.
        let mut name_index: HashMap<String, Option<u32>> = HashMap::new();
        if matching == ColumnMatching::ByName {
            if let Some(origin) = origin {
                for col in self.columns.values() {
                    if let Some((name, _)) = col.at_version(origin) {
                        name_index
                            .entry(name)
                            .and_modify(|id| *id = None)
                            .or_insert(Some(col.id));
                    }
                }
            }
        }
        let mut merged: BTreeMap<u32, ArchiveColumn> = BTreeMap::new();
        let mut aligned = Vec::with_capacity(columns.len());
        let mut seen_names: HashSet<&str> = HashSet::new();
        for (pos, spec) in columns.iter().enumerate() {
            if matching == ColumnMatching::ByName && !seen_names.insert(spec.name.as_str()) {
                return Err(ArchiveError::Schema(format!(
                    "duplicate column name '{}'",
                    spec.name
                )));
            }
            let matched = match matching {
                ColumnMatching::ById => spec.id.and_then(|id| self.columns.get(&id)),
                ColumnMatching::ByName => match name_index.get(spec.name.as_str()) {
                    Some(Some(id)) => self.columns.get(id),
                    Some(None) => {
                        return Err(ArchiveError::Schema(format!(
                            "column name '{}' is ambiguous at version {}",
                            spec.name,
                            origin.unwrap_or_default()
                        )))
                    }
                    None => None,
                },
            };
            let column = match matched {
                Some(col) => col.merge(&spec.name, pos, version),
                None => {
                    let col = ArchiveColumn::create(next_col_id, &spec.name, pos, version);
                    next_col_id += 1;
                    col
                }
            };
            aligned.push(column.id);
            if merged.insert(column.id, column).is_some() {
                return Err(ArchiveError::Schema(format!(
                    "column {} matched more than once",
                    spec.name
                )));
            }
        }
        // Carry over columns that are absent from the new snapshot.
        for (id, col) in &self.columns {
            merged.entry(*id).or_insert_with(|| col.clone());
        }
        Ok((ArchiveSchema { columns: merged }, aligned, next_col_id))
    }

    /// Truncate all column histories to versions lower or equal to the given
    /// one, dropping columns that do not survive
    pub fn rollback(&self, version: u64) -> ArchiveSchema {
        let columns = self
            .columns
            .values()
            .filter_map(|col| col.rollback(version))
            .map(|col| (col.id, col))
            .collect();
        ArchiveSchema { columns }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn specs(names: &[&str]) -> Vec<ColumnSpec> {
        names.iter().map(|n| ColumnSpec::from(*n)).collect()
    }

    #[test]
    fn test_merge_new_columns() {
        let schema = ArchiveSchema::empty();
        let (schema, aligned, next) = schema
            .merge(&specs(&["Name", "Age"]), 0, ColumnMatching::ByName, None, 0)
            .unwrap();
        assert_eq!(aligned, vec![0, 1]);
        assert_eq!(next, 2);
        let live = schema.at_version(0);
        assert_eq!(live.len(), 2);
        assert_eq!(live[0].name, "Name");
        assert_eq!(live[1].name, "Age");
    }

    #[test]
    fn test_merge_by_name_matches_origin() {
        let (schema, _, next) = ArchiveSchema::empty()
            .merge(&specs(&["Name", "Age"]), 0, ColumnMatching::ByName, None, 0)
            .unwrap();
        // Version 1 reorders the columns and adds a new one.
        let (schema, aligned, next) = schema
            .merge(
                &specs(&["Age", "Name", "City"]),
                1,
                ColumnMatching::ByName,
                Some(0),
                next,
            )
            .unwrap();
        assert_eq!(aligned, vec![1, 0, 2]);
        assert_eq!(next, 3);
        let live = schema.at_version(1);
        assert_eq!(
            live.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["Age", "Name", "City"]
        );
        // Version 0 order is unchanged.
        let v0 = schema.at_version(0);
        assert_eq!(
            v0.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            vec!["Name", "Age"]
        );
    }

    #[test]
    fn test_merge_by_id_renames() {
        let (schema, aligned, next) = ArchiveSchema::empty()
            .merge(&specs(&["Name", "Age"]), 0, ColumnMatching::ById, None, 0)
            .unwrap();
        let renamed = vec![
            ColumnSpec::with_id("FullName", aligned[0]),
            ColumnSpec::with_id("Age", aligned[1]),
        ];
        let (schema, aligned, _) = schema
            .merge(&renamed, 1, ColumnMatching::ById, Some(0), next)
            .unwrap();
        assert_eq!(aligned, vec![0, 1]);
        let live = schema.at_version(1);
        assert_eq!(live[0].name, "FullName");
        // The rename is visible only from version 1 on.
        assert_eq!(schema.at_version(0)[0].name, "Name");
    }

    #[test]
    fn test_absent_column_keeps_timestamp() {
        let (schema, _, next) = ArchiveSchema::empty()
            .merge(&specs(&["Name", "Age"]), 0, ColumnMatching::ByName, None, 0)
            .unwrap();
        let (schema, _, _) = schema
            .merge(&specs(&["Name"]), 1, ColumnMatching::ByName, Some(0), next)
            .unwrap();
        let live = schema.at_version(1);
        assert_eq!(live.len(), 1);
        // The dropped column still exists in the history at version 0.
        assert_eq!(schema.at_version(0).len(), 2);
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let err = ArchiveSchema::empty()
            .merge(&specs(&["A", "A"]), 0, ColumnMatching::ByName, None, 0)
            .unwrap_err();
        assert!(matches!(err, ArchiveError::Schema(_)));
    }

    #[test]
    fn test_rollback_drops_late_columns() {
        let (schema, _, next) = ArchiveSchema::empty()
            .merge(&specs(&["Name"]), 0, ColumnMatching::ByName, None, 0)
            .unwrap();
        let (schema, _, _) = schema
            .merge(
                &specs(&["Name", "Age"]),
                1,
                ColumnMatching::ByName,
                Some(0),
                next,
            )
            .unwrap();
        let rolled = schema.rollback(0);
        assert_eq!(rolled.len(), 1);
        assert_eq!(rolled.at_version(0)[0].name, "Name");
    }
}
