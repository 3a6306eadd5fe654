//! File-system archive store
//!
//! Each archive lives in its own directory with two files:
//!
//! - `rows.dat`: one serialized archive row per line, in merge-key order
//! - `metadata.dat`: schema history, snapshot listing, counters, and the
//!   serializer configuration
//!
//! A commit stages both files under temporary names and atomically renames
//! them into place, so readers always see either the previous or the new
//! version and a failed commit leaves no trace.

use super::serialize::DefaultSerializer;
use super::{check_write_order, ArchiveMetadata, ArchiveStore, RowReader, RowWriter};
use crate::row::ArchiveRow;
use crate::schema::ArchiveSchema;
use crate::snapshot::{Snapshot, SnapshotListing};
use crate::types::RowKey;
use crate::{ArchiveError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::fs::{self, File};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

const ROWS_FILE: &str = "rows.dat";
const METADATA_FILE: &str = "metadata.dat";
const ROWS_STAGING: &str = "rows.tmp";
const METADATA_STAGING: &str = "metadata.tmp";

/// Serialized layout of `metadata.dat`
#[derive(Serialize, Deserialize)]
struct MetadataDoc {
    schema: Vec<Json>,
    snapshots: Vec<Snapshot>,
    next_row_id: u64,
    next_col_id: u32,
    next_version: u64,
    primary_key: Option<Vec<String>>,
    serializer_id: String,
    encoder_config: Option<Json>,
}

/// Store that materializes the archive as files in a directory
#[derive(Debug)]
pub struct FileStore {
    basedir: PathBuf,
    serializer: DefaultSerializer,
    metadata: ArchiveMetadata,
}

impl FileStore {
    /// Open an archive directory, reading existing metadata if present.
    /// A directory without an archive starts out empty and un-keyed.
    pub fn open(basedir: impl AsRef<Path>) -> Result<Self> {
        let basedir = basedir.as_ref().to_path_buf();
        fs::create_dir_all(&basedir)?;
        let serializer = DefaultSerializer;
        let metafile = basedir.join(METADATA_FILE);
        let metadata = if metafile.is_file() {
            Self::load_metadata(&metafile, &serializer)?
        } else {
            ArchiveMetadata::default()
        };
        Ok(Self {
            basedir,
            serializer,
            metadata,
        })
    }

    /// Create a fresh archive in the directory, removing any archive files
    /// from a previous one
    pub fn create(basedir: impl AsRef<Path>, primary_key: Option<Vec<String>>) -> Result<Self> {
        let basedir = basedir.as_ref().to_path_buf();
        fs::create_dir_all(&basedir)?;
        for name in [ROWS_FILE, METADATA_FILE, ROWS_STAGING, METADATA_STAGING] {
            let path = basedir.join(name);
            if path.is_file() {
                fs::remove_file(&path)?;
            }
        }
        Ok(Self {
            basedir,
            serializer: DefaultSerializer,
            metadata: ArchiveMetadata::new(primary_key),
        })
    }

    /// The directory holding the archive files
    pub fn basedir(&self) -> &Path {
        &self.basedir
    }

    fn load_metadata(path: &Path, serializer: &DefaultSerializer) -> Result<ArchiveMetadata> {
        let file = File::open(path)?;
        let doc: MetadataDoc = serde_json::from_reader(BufReader::new(file))
            .map_err(|e| ArchiveError::Serialization(format!("bad metadata file: {}", e)))?;
        if doc.serializer_id != serializer.id() {
            return Err(ArchiveError::Serialization(format!(
                "unsupported serializer '{}'",
                doc.serializer_id
            )));
        }
        let columns = doc
            .schema
            .iter()
            .map(|c| serializer.deserialize_column(c))
            .collect::<Result<Vec<_>>>()?;
        let snapshots = SnapshotListing::from_snapshots(doc.snapshots)?;
        if doc.next_version != snapshots.next_version() {
            return Err(ArchiveError::Integrity(format!(
                "next_version {} does not match snapshot listing",
                doc.next_version
            )));
        }
        Ok(ArchiveMetadata {
            schema: ArchiveSchema::from_columns(columns)?,
            snapshots,
            next_row_id: doc.next_row_id,
            next_col_id: doc.next_col_id,
            primary_key: doc.primary_key,
        })
    }

    fn write_metadata(&self, metadata: &ArchiveMetadata) -> Result<PathBuf> {
        let doc = MetadataDoc {
            schema: metadata
                .schema
                .iter()
                .map(|c| self.serializer.serialize_column(c))
                .collect(),
            snapshots: metadata.snapshots.iter().cloned().collect(),
            next_row_id: metadata.next_row_id,
            next_col_id: metadata.next_col_id,
            next_version: metadata.next_version(),
            primary_key: metadata.primary_key.clone(),
            serializer_id: self.serializer.id().to_string(),
            encoder_config: None,
        };
        let path = self.basedir.join(METADATA_STAGING);
        let file = File::create(&path)?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer(&mut out, &doc)
            .map_err(|e| ArchiveError::Serialization(format!("metadata write failed: {}", e)))?;
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(path)
    }
}

impl ArchiveStore for FileStore {
    type Reader = FileReader;
    type Writer = FileWriter;

    fn metadata(&self) -> &ArchiveMetadata {
        &self.metadata
    }

    fn reader(&self) -> Result<FileReader> {
        let path = self.basedir.join(ROWS_FILE);
        let lines = if path.is_file() {
            // The open handle keeps streaming the current file even if a
            // commit renames a new one into place.
            Some(BufReader::new(File::open(&path)?).lines())
        } else {
            None
        };
        Ok(FileReader {
            lines,
            serializer: self.serializer,
            keyed: self.metadata.is_keyed(),
        })
    }

    fn writer(&self) -> Result<FileWriter> {
        let path = self.basedir.join(ROWS_STAGING);
        let file = File::create(&path)?;
        Ok(FileWriter {
            path,
            out: Some(BufWriter::new(file)),
            serializer: self.serializer,
            last_key: None,
            row_count: 0,
        })
    }

    fn commit(&mut self, metadata: ArchiveMetadata, mut writer: FileWriter) -> Result<()> {
        let rows_staged = writer.finish()?;
        let meta_staged = self.write_metadata(&metadata)?;
        // Swap the staged files into place. This is the point of no return.
        fs::rename(&meta_staged, self.basedir.join(METADATA_FILE))?;
        fs::rename(&rows_staged, self.basedir.join(ROWS_FILE))?;
        self.metadata = metadata;
        info!(
            archive = %self.basedir.display(),
            rows = writer.row_count,
            "committed archive state"
        );
        Ok(())
    }
}

/// Streaming reader over `rows.dat`
pub struct FileReader {
    lines: Option<std::io::Lines<BufReader<File>>>,
    serializer: DefaultSerializer,
    keyed: bool,
}

impl RowReader for FileReader {
    fn next_row(&mut self) -> Result<Option<ArchiveRow>> {
        let lines = match self.lines.as_mut() {
            Some(lines) => lines,
            None => return Ok(None),
        };
        let line = match lines.next() {
            Some(line) => line?,
            None => {
                self.lines = None;
                return Ok(None);
            }
        };
        let json: Json = serde_json::from_str(&line)
            .map_err(|e| ArchiveError::Serialization(format!("bad row record: {}", e)))?;
        Ok(Some(self.serializer.deserialize_row(&json, self.keyed)?))
    }
}

/// Writer that stages the row stream of a new version
pub struct FileWriter {
    path: PathBuf,
    out: Option<BufWriter<File>>,
    serializer: DefaultSerializer,
    last_key: Option<RowKey>,
    row_count: u64,
}

impl FileWriter {
    fn finish(&mut self) -> Result<PathBuf> {
        let mut out = self
            .out
            .take()
            .ok_or_else(|| ArchiveError::Integrity("writer already finished".into()))?;
        out.flush()?;
        out.get_ref().sync_all()?;
        Ok(self.path.clone())
    }
}

impl RowWriter for FileWriter {
    fn write_row(&mut self, row: ArchiveRow) -> Result<()> {
        check_write_order(&mut self.last_key, &row)?;
        let out = self
            .out
            .as_mut()
            .ok_or_else(|| ArchiveError::Integrity("writer already finished".into()))?;
        let json = self.serializer.serialize_row(&row);
        writeln!(out, "{}", json)?;
        self.row_count += 1;
        Ok(())
    }
}

impl Drop for FileWriter {
    fn drop(&mut self) {
        // An unfinished writer is an aborted commit; drop the staging file.
        if self.out.take().is_some() {
            let _ = fs::remove_file(&self.path);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Scalar;
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn row(rowid: u64, index: i64, version: u64) -> ArchiveRow {
        let mut values = BTreeMap::new();
        values.insert(0u32, Scalar::Int(index));
        ArchiveRow::create(rowid, RowKey::Index(index), index as usize, values, version)
    }

    fn committed_metadata(metadata: &ArchiveMetadata) -> ArchiveMetadata {
        let mut metadata = metadata.clone();
        metadata.snapshots = metadata
            .snapshots
            .append(
                metadata.snapshots.next_version(),
                crate::snapshot::InputDescriptor::default(),
            )
            .unwrap();
        metadata
    }

    #[test]
    fn test_commit_and_reload() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        assert!(store.is_empty());

        let mut writer = store.writer().unwrap();
        writer.write_row(row(0, 0, 0)).unwrap();
        writer.write_row(row(1, 1, 0)).unwrap();
        let metadata = committed_metadata(store.metadata());
        store.commit(metadata, writer).unwrap();

        // Reopen from disk and stream the rows back.
        let store = FileStore::open(dir.path()).unwrap();
        assert_eq!(store.metadata().snapshots.len(), 1);
        let mut reader = store.reader().unwrap();
        assert_eq!(reader.next_row().unwrap().unwrap().rowid, 0);
        assert_eq!(reader.next_row().unwrap().unwrap().rowid, 1);
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn test_dropped_writer_leaves_no_trace() {
        let dir = TempDir::new().unwrap();
        let store = FileStore::open(dir.path()).unwrap();
        {
            let mut writer = store.writer().unwrap();
            writer.write_row(row(0, 0, 0)).unwrap();
        }
        assert!(!dir.path().join(ROWS_STAGING).exists());
        assert!(!dir.path().join(ROWS_FILE).exists());
    }

    #[test]
    fn test_create_replaces_existing() {
        let dir = TempDir::new().unwrap();
        let mut store = FileStore::open(dir.path()).unwrap();
        let mut writer = store.writer().unwrap();
        writer.write_row(row(0, 0, 0)).unwrap();
        let metadata = committed_metadata(store.metadata());
        store.commit(metadata, writer).unwrap();

        let store = FileStore::create(dir.path(), Some(vec!["Name".into()])).unwrap();
        assert!(store.is_empty());
        assert!(store.metadata().is_keyed());
        let mut reader = store.reader().unwrap();
        assert!(reader.next_row().unwrap().is_none());
    }

    #[test]
    fn test_malformed_metadata_rejected() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(METADATA_FILE), b"not json").unwrap();
        assert!(matches!(
            FileStore::open(dir.path()),
            Err(ArchiveError::Serialization(_))
        ));
    }
}
