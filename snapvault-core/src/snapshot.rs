//! Snapshot descriptors
//!
//! Every committed version of the dataset is described by a snapshot:
//! the version number, the commit time, and optional user-provided
//! metadata about what produced it.

use crate::{ArchiveError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Descriptor of one committed version
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Version number
    #[serde(rename = "v")]
    pub version: u64,
    /// Wall-clock commit time (UTC)
    #[serde(rename = "tt")]
    pub created_at: DateTime<Utc>,
    /// Optional user-provided description
    #[serde(rename = "d", default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Optional structured descriptor of the operation that created the
    /// snapshot
    #[serde(rename = "a", default, skip_serializing_if = "Option::is_none")]
    pub action: Option<serde_json::Value>,
    /// Optional identifier of the snapshot source
    #[serde(rename = "s", default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

/// User-provided metadata for a commit or apply operation
#[derive(Debug, Clone, Default)]
pub struct InputDescriptor {
    /// Human description of the snapshot
    pub description: Option<String>,
    /// Structured descriptor of the producing operation
    pub action: Option<serde_json::Value>,
    /// Identifier of the snapshot source
    pub source: Option<String>,
}

impl InputDescriptor {
    /// Descriptor with only a description set
    pub fn described(description: impl Into<String>) -> Self {
        Self {
            description: Some(description.into()),
            ..Self::default()
        }
    }
}

/// Ordered listing of all snapshots in an archive
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SnapshotListing {
    snapshots: Vec<Snapshot>,
}

impl SnapshotListing {
    /// Create a listing from existing descriptors. Returns an error if the
    /// version numbers are not strictly increasing.
    pub fn from_snapshots(snapshots: Vec<Snapshot>) -> Result<Self> {
        for pair in snapshots.windows(2) {
            if pair[0].version >= pair[1].version {
                return Err(ArchiveError::Integrity(format!(
                    "snapshot versions not increasing: {} before {}",
                    pair[0].version, pair[1].version
                )));
            }
        }
        Ok(Self { snapshots })
    }

    /// Check if the archive has no snapshots
    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Number of snapshots in the listing
    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    /// Iterate over the descriptors in version order
    pub fn iter(&self) -> impl Iterator<Item = &Snapshot> {
        self.snapshots.iter()
    }

    /// Get a descriptor by version number
    pub fn get(&self, version: u64) -> Option<&Snapshot> {
        self.snapshots.iter().find(|s| s.version == version)
    }

    /// Get a descriptor by its position in the listing
    pub fn at_position(&self, pos: usize) -> Option<&Snapshot> {
        self.snapshots.get(pos)
    }

    /// Check if the given version was committed
    pub fn has_version(&self, version: u64) -> bool {
        self.get(version).is_some()
    }

    /// The descriptor of the most recent snapshot
    pub fn last(&self) -> Option<&Snapshot> {
        self.snapshots.last()
    }

    /// The version number that the next commit will receive
    pub fn next_version(&self) -> u64 {
        self.last().map(|s| s.version + 1).unwrap_or(0)
    }

    /// Return a listing extended with a descriptor for the given version.
    /// The version must be the next version of this listing.
    pub fn append(
        &self,
        version: u64,
        descriptor: InputDescriptor,
    ) -> Result<SnapshotListing> {
        if version != self.next_version() {
            return Err(ArchiveError::Integrity(format!(
                "expected version {}, got {}",
                self.next_version(),
                version
            )));
        }
        let mut snapshots = self.snapshots.clone();
        snapshots.push(Snapshot {
            version,
            created_at: Utc::now(),
            description: descriptor.description,
            action: descriptor.action,
            source: descriptor.source,
        });
        Ok(SnapshotListing { snapshots })
    }

    /// Return a listing that retains only versions lower or equal to the
    /// given one
    pub fn rollback(&self, version: u64) -> SnapshotListing {
        let snapshots = self
            .snapshots
            .iter()
            .filter(|s| s.version <= version)
            .cloned()
            .collect();
        SnapshotListing { snapshots }
    }
}

impl IntoIterator for SnapshotListing {
    type Item = Snapshot;
    type IntoIter = std::vec::IntoIter<Snapshot>;

    fn into_iter(self) -> Self::IntoIter {
        self.snapshots.into_iter()
    }
}
