//! Timestamp algebra
//!
//! A timestamp is the set of versions in which an archive entity (row,
//! column, cell value, or position) was present. It is represented as a
//! sorted list of disjoint closed intervals in canonical form: no two
//! intervals overlap or touch. Timestamps are value objects; every
//! operation returns a new timestamp.

use crate::{ArchiveError, Result};
use serde::de::{SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// Closed interval of version numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeInterval {
    /// First version in the interval
    pub start: u64,
    /// Last version (inclusive) in the interval
    pub end: u64,
}

impl TimeInterval {
    /// Create an interval covering the versions from `start` to `end`
    /// (inclusive). Returns an error if `end` is lower than `start`.
    pub fn new(start: u64, end: u64) -> Result<Self> {
        if end < start {
            return Err(ArchiveError::Integrity(format!(
                "invalid interval [{},{}]",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Create a single-version interval
    pub fn at(version: u64) -> Self {
        Self {
            start: version,
            end: version,
        }
    }

    /// Check if the interval contains the given version
    pub fn contains(&self, version: u64) -> bool {
        self.start <= version && version <= self.end
    }

    /// Check if two intervals have at least one version in common
    pub fn overlaps(&self, other: &TimeInterval) -> bool {
        self.start <= other.end && other.start <= self.end
    }
}

impl fmt::Display for TimeInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start < self.end {
            write!(f, "{}-{}", self.start, self.end)
        } else {
            write!(f, "{}", self.start)
        }
    }
}

// Intervals are persisted as two-element arrays `[start, end]`.
impl Serialize for TimeInterval {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(2))?;
        seq.serialize_element(&self.start)?;
        seq.serialize_element(&self.end)?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for TimeInterval {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        struct IntervalVisitor;

        impl<'de> Visitor<'de> for IntervalVisitor {
            type Value = TimeInterval;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a two-element [start, end] array")
            }

            fn visit_seq<A: SeqAccess<'de>>(
                self,
                mut seq: A,
            ) -> std::result::Result<TimeInterval, A::Error> {
                let start: u64 = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(0, &self))?;
                let end: u64 = seq
                    .next_element()?
                    .ok_or_else(|| serde::de::Error::invalid_length(1, &self))?;
                if seq.next_element::<u64>()?.is_some() {
                    return Err(serde::de::Error::invalid_length(3, &self));
                }
                TimeInterval::new(start, end).map_err(serde::de::Error::custom)
            }
        }

        deserializer.deserialize_seq(IntervalVisitor)
    }
}

/// A set of versions as a canonical sorted list of disjoint, non-touching
/// intervals
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Timestamp {
    intervals: Vec<TimeInterval>,
}

impl Timestamp {
    /// The empty timestamp ("never")
    pub fn empty() -> Self {
        Self::default()
    }

    /// Timestamp containing a single version
    pub fn at(version: u64) -> Self {
        Self {
            intervals: vec![TimeInterval::at(version)],
        }
    }

    /// Create a timestamp from a list of intervals. Returns an error if the
    /// intervals are not in canonical form (sorted ascending, no two
    /// intervals overlapping or adjacent).
    pub fn from_intervals(intervals: Vec<TimeInterval>) -> Result<Self> {
        for pair in intervals.windows(2) {
            if pair[0].end + 1 >= pair[1].start {
                return Err(ArchiveError::Integrity(format!(
                    "adjacent or overlapping intervals {} and {}",
                    pair[0], pair[1]
                )));
            }
        }
        Ok(Self { intervals })
    }

    /// The intervals in this timestamp
    pub fn intervals(&self) -> &[TimeInterval] {
        &self.intervals
    }

    /// Check if the timestamp contains no versions
    pub fn is_empty(&self) -> bool {
        self.intervals.is_empty()
    }

    /// Check if the timestamp contains the given version.
    pub fn contains(&self, version: u64) -> bool {
        // Scan from the end since most lookups target recent versions.
        for interval in self.intervals.iter().rev() {
            if interval.contains(version) {
                return true;
            }
            if interval.end < version {
                return false;
            }
        }
        false
    }

    /// Get the first version in the timestamp, or `None` if it is empty
    pub fn first_version(&self) -> Option<u64> {
        self.intervals.first().map(|i| i.start)
    }

    /// Get the last version in the timestamp, or `None` if it is empty
    pub fn last_version(&self) -> Option<u64> {
        self.intervals.last().map(|i| i.end)
    }

    /// Return a timestamp with the given version added. Appending a version
    /// that is already contained returns an unchanged copy.
    pub fn append(&self, version: u64) -> Timestamp {
        match self.last_version() {
            None => Timestamp::at(version),
            Some(last) if version > last => {
                let mut intervals = self.intervals.clone();
                if version == last + 1 {
                    intervals.last_mut().unwrap().end = version;
                } else {
                    intervals.push(TimeInterval::at(version));
                }
                Timestamp { intervals }
            }
            _ => {
                if self.contains(version) {
                    self.clone()
                } else {
                    self.union(&Timestamp::at(version))
                }
            }
        }
    }

    /// Union of two timestamps, coalescing touching intervals
    pub fn union(&self, other: &Timestamp) -> Timestamp {
        let mut merged: Vec<TimeInterval> = Vec::with_capacity(
            self.intervals.len() + other.intervals.len(),
        );
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() || j < other.intervals.len() {
            let next = if j >= other.intervals.len()
                || (i < self.intervals.len()
                    && self.intervals[i].start <= other.intervals[j].start)
            {
                i += 1;
                self.intervals[i - 1]
            } else {
                j += 1;
                other.intervals[j - 1]
            };
            match merged.last_mut() {
                Some(last) if next.start <= last.end.saturating_add(1) => {
                    last.end = last.end.max(next.end);
                }
                _ => merged.push(next),
            }
        }
        Timestamp { intervals: merged }
    }

    /// Intersection of two timestamps
    pub fn intersect(&self, other: &Timestamp) -> Timestamp {
        let mut intervals = Vec::new();
        let (mut i, mut j) = (0, 0);
        while i < self.intervals.len() && j < other.intervals.len() {
            let a = self.intervals[i];
            let b = other.intervals[j];
            let start = a.start.max(b.start);
            let end = a.end.min(b.end);
            if start <= end {
                intervals.push(TimeInterval { start, end });
            }
            if a.end <= b.end {
                i += 1;
            } else {
                j += 1;
            }
        }
        Timestamp { intervals }
    }

    /// Return a timestamp containing only the versions lower or equal to the
    /// given version
    pub fn rollback(&self, version: u64) -> Timestamp {
        let mut intervals = Vec::new();
        for interval in &self.intervals {
            if interval.start > version {
                break;
            }
            intervals.push(TimeInterval {
                start: interval.start,
                end: interval.end.min(version),
            });
        }
        Timestamp { intervals }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.intervals.iter().map(|i| i.to_string()).collect();
        write!(f, "{}", parts.join(","))
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        self.intervals.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(
        deserializer: D,
    ) -> std::result::Result<Self, D::Error> {
        let intervals = Vec::<TimeInterval>::deserialize(deserializer)?;
        Timestamp::from_intervals(intervals).map_err(serde::de::Error::custom)
    }
}
