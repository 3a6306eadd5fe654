//! Archive facade
//!
//! The archive orchestrates commit, checkout, apply, and rollback over a
//! store, assigns version numbers, and enforces the single-writer,
//! multi-reader discipline: mutating operations hold an exclusive lock for
//! their whole duration, readers observe a consistent point-in-time state.

mod checkout;
mod merge;

use crate::document::{ColumnSpec, DatasetOperator, Document};
use crate::schema::ColumnMatching;
use crate::snapshot::{InputDescriptor, Snapshot, SnapshotListing};
use crate::store::{
    ArchiveMetadata, ArchiveStore, FileStore, RowReader, RowWriter, VolatileStore,
};
use crate::types::{Dataset, Scalar};
use crate::{ArchiveError, Result};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

/// Archive over the in-memory store
pub type VolatileArchive = Archive<VolatileStore>;

/// Archive over the file-system store
pub type PersistentArchive = Archive<FileStore>;

/// A dataset archive: every committed snapshot folded into one
/// nested-merge structure
pub struct Archive<S: ArchiveStore> {
    store: RwLock<S>,
    matching: ColumnMatching,
}

impl Archive<VolatileStore> {
    /// Create an empty in-memory archive merged by row index
    pub fn in_memory() -> VolatileArchive {
        Self::with_store(VolatileStore::new(None), ColumnMatching::default())
    }

    /// Create an in-memory archive keyed by the given primary-key columns.
    /// The initial document establishes the key columns and becomes
    /// version 0.
    pub fn in_memory_keyed<D: Document>(
        document: &mut D,
        primary_key: &[&str],
        descriptor: InputDescriptor,
    ) -> Result<(VolatileArchive, Snapshot)> {
        let key: Vec<String> = primary_key.iter().map(|s| s.to_string()).collect();
        let archive = Self::with_store(VolatileStore::new(Some(key)), ColumnMatching::default());
        let snapshot = archive.commit(document, descriptor)?;
        Ok((archive, snapshot))
    }
}

impl Archive<FileStore> {
    /// Open an archive directory, creating an empty un-keyed archive if
    /// none exists yet
    pub fn open(basedir: impl AsRef<Path>) -> Result<PersistentArchive> {
        Ok(Self::with_store(
            FileStore::open(basedir)?,
            ColumnMatching::default(),
        ))
    }

    /// Create a fresh archive directory keyed by the given primary-key
    /// columns, committing the initial document as version 0
    pub fn create_keyed<D: Document>(
        basedir: impl AsRef<Path>,
        document: &mut D,
        primary_key: &[&str],
        descriptor: InputDescriptor,
    ) -> Result<(PersistentArchive, Snapshot)> {
        let key: Vec<String> = primary_key.iter().map(|s| s.to_string()).collect();
        let archive = Self::with_store(
            FileStore::create(basedir, Some(key))?,
            ColumnMatching::default(),
        );
        let snapshot = archive.commit(document, descriptor)?;
        Ok((archive, snapshot))
    }

    /// Create a fresh un-keyed archive directory
    pub fn create(basedir: impl AsRef<Path>) -> Result<PersistentArchive> {
        Ok(Self::with_store(
            FileStore::create(basedir, None)?,
            ColumnMatching::default(),
        ))
    }
}

impl<S: ArchiveStore> Archive<S> {
    /// Create an archive over the given store
    pub fn with_store(store: S, matching: ColumnMatching) -> Self {
        Self {
            store: RwLock::new(store),
            matching,
        }
    }

    /// Check if the archive merges by primary key
    pub fn is_keyed(&self) -> bool {
        self.store.read().metadata().is_keyed()
    }

    /// The listing of all committed snapshots
    pub fn snapshots(&self) -> SnapshotListing {
        self.store.read().metadata().snapshots.clone()
    }

    /// Open a reader over the raw archive row stream in storage order,
    /// independent of any particular version
    pub fn reader(&self) -> Result<S::Reader> {
        self.store.read().reader()
    }

    /// Commit a snapshot document as the next version of the dataset.
    /// The document is closed on all exit paths. On error the archive is
    /// unchanged.
    pub fn commit<D: Document>(
        &self,
        document: &mut D,
        descriptor: InputDescriptor,
    ) -> Result<Snapshot> {
        let result = self.commit_document(document, descriptor);
        if let Err(e) = document.close() {
            warn!("failed to close document: {}", e);
        }
        result
    }

    fn commit_document<D: Document>(
        &self,
        document: &mut D,
        descriptor: InputDescriptor,
    ) -> Result<Snapshot> {
        let mut store = self.store.write();
        let meta = store.metadata().clone();
        let version = meta.next_version();
        let origin = meta.snapshots.last().map(|s| s.version);
        let specs: Vec<ColumnSpec> = document.columns().to_vec();
        let (schema, aligned, next_col_id) =
            meta.schema
                .merge(&specs, version, self.matching, origin, meta.next_col_id)?;
        let key_positions = key_column_positions(&meta, &specs)?;
        let mut next_row_id = meta.next_row_id;
        let mut reader = store.reader()?;
        let mut writer = store.writer()?;
        let rows = {
            let mut doc_reader = document.sorted_reader(&key_positions)?;
            merge::merge_snapshot(
                &mut reader,
                doc_reader.as_mut(),
                &aligned,
                version,
                &mut next_row_id,
                &mut writer,
            )?
        };
        let snapshots = meta.snapshots.append(version, descriptor)?;
        let snapshot = snapshots.last().expect("just appended").clone();
        store.commit(
            ArchiveMetadata {
                schema,
                snapshots,
                next_row_id,
                next_col_id,
                primary_key: meta.primary_key,
            },
            writer,
        )?;
        info!(version, rows, "committed snapshot");
        Ok(snapshot)
    }

    /// Reconstruct the table of a committed version
    pub fn checkout(&self, version: u64) -> Result<Dataset> {
        let store = self.store.read();
        if !store.metadata().snapshots.has_version(version) {
            return Err(ArchiveError::Version(version));
        }
        let mut reader = store.reader()?;
        checkout::checkout_version(&mut reader, &store.metadata().schema, version)
    }

    /// Rewrite the current version through a row operator as a new
    /// version. Rows are visited in merge-key order; the operator returns
    /// the new cell values for a row or `None` to delete it. Output
    /// positions are renumbered densely in visit order.
    pub fn apply<O: DatasetOperator>(
        &self,
        operator: &mut O,
        descriptor: InputDescriptor,
    ) -> Result<Snapshot> {
        let mut store = self.store.write();
        let meta = store.metadata().clone();
        let current = match meta.snapshots.last() {
            Some(snapshot) => snapshot.version,
            None => return Err(ArchiveError::Version(0)),
        };
        let version = meta.next_version();
        let columns = meta.schema.at_version(current);
        let colids: Vec<u32> = columns.iter().map(|c| c.id).collect();
        let key_ids: Vec<u32> = match &meta.primary_key {
            Some(names) => names
                .iter()
                .map(|name| {
                    columns
                        .iter()
                        .find(|c| c.name == *name)
                        .map(|c| c.id)
                        .ok_or_else(|| {
                            ArchiveError::Schema(format!("missing key column '{}'", name))
                        })
                })
                .collect::<Result<Vec<_>>>()?,
            None => Vec::new(),
        };
        // The operator keeps the schema of the current version; every live
        // column gains the new version.
        let specs: Vec<ColumnSpec> = columns
            .iter()
            .map(|c| ColumnSpec::with_id(c.name.clone(), c.id))
            .collect();
        let (schema, _, next_col_id) = meta.schema.merge(
            &specs,
            version,
            ColumnMatching::ById,
            Some(current),
            meta.next_col_id,
        )?;
        let mut reader = store.reader()?;
        let mut writer = store.writer()?;
        let mut next_pos = 0usize;
        let mut rows = 0u64;
        while let Some(row) = reader.next_row()? {
            if !row.timestamp.contains(current) {
                writer.write_row(row)?;
                continue;
            }
            let (pos, values) = row.at_version(current, &colids).ok_or_else(|| {
                ArchiveError::Integrity(format!(
                    "row {} is live at version {} but has no position",
                    row.rowid, current
                ))
            })?;
            match operator.eval(pos, values.clone()) {
                None => writer.write_row(row)?,
                Some(new_values) => {
                    if new_values.len() != colids.len() {
                        return Err(ArchiveError::Document(format!(
                            "operator returned {} values, expected {}",
                            new_values.len(),
                            colids.len()
                        )));
                    }
                    for (i, colid) in colids.iter().enumerate() {
                        if key_ids.contains(colid) && new_values[i] != values[i] {
                            return Err(ArchiveError::Schema(format!(
                                "operator changed key column {} of row {}",
                                colid, row.rowid
                            )));
                        }
                    }
                    let cells: BTreeMap<u32, Scalar> =
                        colids.iter().copied().zip(new_values).collect();
                    writer.write_row(row.merge(&cells, next_pos, version))?;
                    next_pos += 1;
                    rows += 1;
                }
            }
        }
        let snapshots = meta.snapshots.append(version, descriptor)?;
        let snapshot = snapshots.last().expect("just appended").clone();
        store.commit(
            ArchiveMetadata {
                schema,
                snapshots,
                next_row_id: meta.next_row_id,
                next_col_id,
                primary_key: meta.primary_key,
            },
            writer,
        )?;
        info!(version, rows, "applied operator");
        Ok(snapshot)
    }

    /// Drop all versions above the given one. Rows, columns, and values
    /// whose timestamps become empty are removed. Rolling back to the
    /// current version is a no-op.
    pub fn rollback(&self, version: u64) -> Result<()> {
        let mut store = self.store.write();
        let meta = store.metadata().clone();
        if !meta.snapshots.has_version(version) {
            return Err(ArchiveError::Version(version));
        }
        if meta.snapshots.last().map(|s| s.version) == Some(version) {
            return Ok(());
        }
        let mut reader = store.reader()?;
        let mut writer = store.writer()?;
        while let Some(row) = reader.next_row()? {
            if let Some(row) = row.rollback(version) {
                writer.write_row(row)?;
            }
        }
        store.commit(
            ArchiveMetadata {
                schema: meta.schema.rollback(version),
                snapshots: meta.snapshots.rollback(version),
                next_row_id: meta.next_row_id,
                next_col_id: meta.next_col_id,
                primary_key: meta.primary_key,
            },
            writer,
        )?;
        info!(version, "rolled back archive");
        Ok(())
    }

    /// Remove every snapshot and all history, keeping only the key
    /// configuration
    pub fn clear(&self) -> Result<()> {
        let mut store = self.store.write();
        let primary_key = store.metadata().primary_key.clone();
        let writer = store.writer()?;
        store.commit(ArchiveMetadata::new(primary_key), writer)?;
        info!("cleared archive");
        Ok(())
    }
}

/// Resolve the primary-key column names to their positions in the document
/// schema
fn key_column_positions(meta: &ArchiveMetadata, specs: &[ColumnSpec]) -> Result<Vec<usize>> {
    match &meta.primary_key {
        Some(names) => names
            .iter()
            .map(|name| {
                specs
                    .iter()
                    .position(|c| c.name == *name)
                    .ok_or_else(|| ArchiveError::Schema(format!("missing key column '{}'", name)))
            })
            .collect(),
        None => Ok(Vec::new()),
    }
}
