//! Timestamped archive values
//!
//! An archive value is the full history of one cell (or of a row position,
//! or a column name or position). The common case is a value that never
//! changed, represented without a list allocation as a single timestamped
//! scalar. Values that changed over the history of the dataset hold one
//! timestamped scalar per distinct value, with pairwise disjoint timestamps
//! whose union equals the timestamp of the containing entity.

use crate::timestamp::Timestamp;
use crate::types::Scalar;

/// A scalar bound to the versions in which it was the current value
#[derive(Debug, Clone, PartialEq)]
pub struct TimestampedValue {
    /// The scalar value
    pub value: Scalar,
    /// Versions in which the value was present
    pub timestamp: Timestamp,
}

impl TimestampedValue {
    /// Create a new timestamped value
    pub fn new(value: Scalar, timestamp: Timestamp) -> Self {
        Self { value, timestamp }
    }

    /// Return a copy with the given version appended to the timestamp
    pub fn append(&self, version: u64) -> Self {
        Self {
            value: self.value.clone(),
            timestamp: self.timestamp.append(version),
        }
    }
}

/// The history of a single cell, position, or name
#[derive(Debug, Clone, PartialEq)]
pub enum ArchiveValue {
    /// A value that has held a single scalar over its whole history
    Single(TimestampedValue),
    /// A value with more than one scalar over its history
    Multi(Vec<TimestampedValue>),
}

impl ArchiveValue {
    /// Create a single-version value
    pub fn single(value: Scalar, timestamp: Timestamp) -> Self {
        ArchiveValue::Single(TimestampedValue::new(value, timestamp))
    }

    /// Create a value first observed at the given version
    pub fn at(value: Scalar, version: u64) -> Self {
        Self::single(value, Timestamp::at(version))
    }

    /// Check if the value has held a single scalar over its history
    pub fn is_single_version(&self) -> bool {
        matches!(self, ArchiveValue::Single(_))
    }

    /// The timestamped entries of this value
    pub fn entries(&self) -> &[TimestampedValue] {
        match self {
            ArchiveValue::Single(v) => std::slice::from_ref(v),
            ArchiveValue::Multi(vs) => vs,
        }
    }

    /// Union of the timestamps of all entries
    pub fn timestamp(&self) -> Timestamp {
        match self {
            ArchiveValue::Single(v) => v.timestamp.clone(),
            ArchiveValue::Multi(vs) => vs
                .iter()
                .fold(Timestamp::empty(), |acc, v| acc.union(&v.timestamp)),
        }
    }

    /// Get the scalar that was current at the given version, or `None` if
    /// no entry covers the version
    pub fn at_version(&self, version: u64) -> Option<&Scalar> {
        self.entries()
            .iter()
            .find(|v| v.timestamp.contains(version))
            .map(|v| &v.value)
    }

    /// Add a value for the given version into the history. If any prior
    /// entry holds an equal scalar its timestamp is extended; otherwise a
    /// new entry is appended.
    pub fn merge(&self, value: &Scalar, version: u64) -> ArchiveValue {
        match self {
            ArchiveValue::Single(v) => {
                if v.value == *value {
                    ArchiveValue::Single(v.append(version))
                } else {
                    ArchiveValue::Multi(vec![
                        v.clone(),
                        TimestampedValue::new(value.clone(), Timestamp::at(version)),
                    ])
                }
            }
            ArchiveValue::Multi(vs) => {
                let mut entries = vs.clone();
                match entries.iter_mut().find(|v| v.value == *value) {
                    Some(entry) => *entry = entry.append(version),
                    None => entries.push(TimestampedValue::new(
                        value.clone(),
                        Timestamp::at(version),
                    )),
                }
                ArchiveValue::Multi(entries)
            }
        }
    }

    /// Extend the timestamp of the entry that was current at the origin
    /// version with the new version. If no entry covers the origin version
    /// the value is returned unchanged.
    pub fn extend(&self, version: u64, origin: u64) -> ArchiveValue {
        match self {
            ArchiveValue::Single(v) => {
                if v.timestamp.contains(origin) {
                    ArchiveValue::Single(v.append(version))
                } else {
                    self.clone()
                }
            }
            ArchiveValue::Multi(vs) => {
                let mut entries = vs.clone();
                for entry in entries.iter_mut() {
                    if entry.timestamp.contains(origin) {
                        *entry = entry.append(version);
                        return ArchiveValue::Multi(entries);
                    }
                }
                self.clone()
            }
        }
    }

    /// Truncate the history to versions lower or equal to the given one.
    /// Returns `None` if nothing of the history survives.
    pub fn rollback(&self, version: u64) -> Option<ArchiveValue> {
        let mut entries: Vec<TimestampedValue> = Vec::new();
        for entry in self.entries() {
            let ts = entry.timestamp.rollback(version);
            if !ts.is_empty() {
                entries.push(TimestampedValue::new(entry.value.clone(), ts));
            }
        }
        match entries.len() {
            0 => None,
            1 => Some(ArchiveValue::Single(entries.pop().unwrap())),
            _ => Some(ArchiveValue::Multi(entries)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_version_merge() {
        let v = ArchiveValue::at(Scalar::Int(32), 0);
        // Same scalar extends the timestamp.
        let v = v.merge(&Scalar::Int(32), 1);
        assert!(v.is_single_version());
        assert_eq!(v.at_version(1), Some(&Scalar::Int(32)));
        // A different scalar promotes to a multi-version value.
        let v = v.merge(&Scalar::Int(33), 2);
        assert!(!v.is_single_version());
        assert_eq!(v.at_version(0), Some(&Scalar::Int(32)));
        assert_eq!(v.at_version(2), Some(&Scalar::Int(33)));
        assert_eq!(v.at_version(3), None);
    }

    #[test]
    fn test_merge_reverts_to_prior_value() {
        // 32 at v0, 33 at v1, back to 32 at v2: the old entry is extended
        // rather than a third entry being added.
        let v = ArchiveValue::at(Scalar::Int(32), 0)
            .merge(&Scalar::Int(33), 1)
            .merge(&Scalar::Int(32), 2)
            .merge(&Scalar::Int(32), 3);
        assert_eq!(v.entries().len(), 2);
        assert_eq!(v.entries()[0].timestamp.to_string(), "0,2-3");
        assert_eq!(v.entries()[1].timestamp.to_string(), "1");
    }

    #[test]
    fn test_nan_never_coalesces() {
        let v = ArchiveValue::at(Scalar::Float(f64::NAN), 0)
            .merge(&Scalar::Float(f64::NAN), 1);
        assert_eq!(v.entries().len(), 2);
    }

    #[test]
    fn test_extend() {
        let v = ArchiveValue::at(Scalar::Int(1), 0).merge(&Scalar::Int(2), 1);
        // Extends the entry valid at the origin version.
        let v = v.extend(2, 1);
        assert_eq!(v.at_version(2), Some(&Scalar::Int(2)));
        // Unknown origin leaves the value unchanged.
        let w = v.extend(5, 4);
        assert_eq!(w, v);
    }

    #[test]
    fn test_value_timestamp() {
        let v = ArchiveValue::at(Scalar::Int(1), 0)
            .merge(&Scalar::Int(2), 1)
            .merge(&Scalar::Int(1), 3);
        assert_eq!(v.timestamp().to_string(), "0-1,3");
    }

    #[test]
    fn test_rollback() {
        let v = ArchiveValue::at(Scalar::Int(1), 0)
            .merge(&Scalar::Int(2), 1)
            .merge(&Scalar::Int(3), 2);
        // Dropping versions above 1 drops the last entry entirely.
        let v1 = v.rollback(1).unwrap();
        assert_eq!(v1.entries().len(), 2);
        assert_eq!(v1.at_version(1), Some(&Scalar::Int(2)));
        // Rolling back to version 0 collapses back to a single value.
        let v0 = v.rollback(0).unwrap();
        assert!(v0.is_single_version());
        // Rolling back everything yields None.
        let v = ArchiveValue::at(Scalar::Int(9), 4);
        assert!(v.rollback(3).is_none());
    }
}
