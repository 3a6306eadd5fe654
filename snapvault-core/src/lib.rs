//! SnapVault Core - Versioned Tabular Dataset Archive
//!
//! SnapVault archives a temporal sequence of dataset snapshots as a single
//! nested-merge structure and reconstructs any version or cell history on
//! demand. Instead of storing each snapshot, every row, cell value, and
//! position carries the set of versions in which it held that value, so
//! unchanged data is shared across the whole history.
//!
//! # Architecture
//!
//! - **Timestamps**: canonical interval lists over version numbers, the
//!   annotation on every archived value
//! - **Archive rows and columns**: identity-bearing entities whose
//!   positions, cell values, and names are timestamped histories
//! - **Merge**: a streaming outer join that folds a new snapshot into the
//!   archive row stream at the next version
//! - **Checkout**: a streaming scan that reconstructs one version as an
//!   ordered table
//! - **Stores**: an in-memory store for volatile archives and a file store
//!   (`rows.dat` + `metadata.dat`) with staged atomic commits

pub mod archive;
pub mod document;
pub mod error;
pub mod row;
pub mod schema;
pub mod snapshot;
pub mod store;
pub mod timestamp;
pub mod types;
pub mod value;

pub use archive::{Archive, PersistentArchive, VolatileArchive};
pub use document::{
    ColumnSpec, CsvDocument, CsvWriter, DatasetOperator, Document, DocumentReader, DocumentRow,
    InMemoryDocument,
};
pub use error::{ArchiveError, Result};
pub use row::ArchiveRow;
pub use schema::{ArchiveColumn, ArchiveSchema, ColumnMatching};
pub use snapshot::{InputDescriptor, Snapshot, SnapshotListing};
pub use store::{ArchiveStore, FileStore, RowReader, RowWriter, VolatileStore};
pub use timestamp::{TimeInterval, Timestamp};
pub use types::{ColumnRef, Dataset, DatasetRow, KeyValue, RowKey, Scalar};
pub use value::{ArchiveValue, TimestampedValue};

/// SnapVault version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod config {
    /// Rows buffered in memory per external-sort run
    pub const SORT_BUFFER_ROWS: usize = 65_536;
}
