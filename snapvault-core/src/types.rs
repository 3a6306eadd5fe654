//! Core value types
//!
//! Cell values are modeled as a scalar sum type. Scalar equality is the
//! equality used when coalescing value histories: floats compare bit-exact
//! (NaN is never equal to anything, including itself), temporal values
//! compare by UTC instant, and there is no cross-type numeric equality.

use chrono::{DateTime, SecondsFormat, Utc};
use std::cmp::Ordering;
use std::fmt;

/// A single cell value in a dataset snapshot
#[derive(Debug, Clone)]
pub enum Scalar {
    /// Missing value
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Text
    Text(String),
    /// Point in time, compared by UTC instant
    DateTime(DateTime<Utc>),
}

impl Scalar {
    /// Check if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Scalar::Null)
    }
}

impl PartialEq for Scalar {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Scalar::Null, Scalar::Null) => true,
            (Scalar::Bool(a), Scalar::Bool(b)) => a == b,
            (Scalar::Int(a), Scalar::Int(b)) => a == b,
            (Scalar::Float(a), Scalar::Float(b)) => {
                if a.is_nan() || b.is_nan() {
                    false
                } else {
                    a.to_bits() == b.to_bits()
                }
            }
            (Scalar::Text(a), Scalar::Text(b)) => a == b,
            (Scalar::DateTime(a), Scalar::DateTime(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scalar::Null => Ok(()),
            Scalar::Bool(v) => write!(f, "{}", v),
            Scalar::Int(v) => write!(f, "{}", v),
            Scalar::Float(v) => write!(f, "{}", v),
            Scalar::Text(v) => write!(f, "{}", v),
            Scalar::DateTime(v) => {
                write!(f, "{}", v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }
}

impl From<bool> for Scalar {
    fn from(v: bool) -> Self {
        Scalar::Bool(v)
    }
}

impl From<i64> for Scalar {
    fn from(v: i64) -> Self {
        Scalar::Int(v)
    }
}

impl From<i32> for Scalar {
    fn from(v: i32) -> Self {
        Scalar::Int(v as i64)
    }
}

impl From<f64> for Scalar {
    fn from(v: f64) -> Self {
        Scalar::Float(v)
    }
}

impl From<&str> for Scalar {
    fn from(v: &str) -> Self {
        Scalar::Text(v.to_string())
    }
}

impl From<String> for Scalar {
    fn from(v: String) -> Self {
        Scalar::Text(v)
    }
}

impl From<DateTime<Utc>> for Scalar {
    fn from(v: DateTime<Utc>) -> Self {
        Scalar::DateTime(v)
    }
}

impl<T: Into<Scalar>> From<Option<T>> for Scalar {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(v) => v.into(),
            None => Scalar::Null,
        }
    }
}

/// A single key component derived from a scalar cell value.
///
/// Keys carry a total order for the streaming merge. Null keys sort before
/// all non-null keys; numbers sort before text. Mixed integer/float
/// components compare numerically, with NaN ordered after all other numbers.
#[derive(Debug, Clone)]
pub enum KeyValue {
    /// Null key component
    Null,
    /// Integer component
    Int(i64),
    /// Float component
    Float(f64),
    /// Text component
    Text(String),
}

impl KeyValue {
    /// Derive a key component from a cell value
    pub fn from_scalar(value: &Scalar) -> KeyValue {
        match value {
            Scalar::Null => KeyValue::Null,
            Scalar::Bool(v) => KeyValue::Int(*v as i64),
            Scalar::Int(v) => KeyValue::Int(*v),
            Scalar::Float(v) => KeyValue::Float(*v),
            Scalar::Text(v) => KeyValue::Text(v.clone()),
            Scalar::DateTime(v) => {
                KeyValue::Text(v.to_rfc3339_opts(SecondsFormat::AutoSi, true))
            }
        }
    }

    fn rank(&self) -> u8 {
        match self {
            KeyValue::Null => 0,
            KeyValue::Int(_) | KeyValue::Float(_) => 1,
            KeyValue::Text(_) => 2,
        }
    }
}

impl Ord for KeyValue {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (KeyValue::Int(a), KeyValue::Int(b)) => a.cmp(b),
            (KeyValue::Float(a), KeyValue::Float(b)) => a.total_cmp(b),
            (KeyValue::Int(a), KeyValue::Float(b)) => (*a as f64).total_cmp(b),
            (KeyValue::Float(a), KeyValue::Int(b)) => a.total_cmp(&(*b as f64)),
            (KeyValue::Text(a), KeyValue::Text(b)) => a.cmp(b),
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for KeyValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for KeyValue {}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => write!(f, "null"),
            KeyValue::Int(v) => write!(f, "{}", v),
            KeyValue::Float(v) => write!(f, "{}", v),
            KeyValue::Text(v) => write!(f, "{}", v),
        }
    }
}

/// The merge key of a document or archive row.
///
/// Keyed archives derive the key from the declared primary-key columns;
/// un-keyed archives use the document-provided row index, with `New`
/// marking rows that have no index yet. `New` sorts after everything, so
/// fresh rows are always appended at the end of the merge stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RowKey {
    /// Row index of an un-keyed archive row
    Index(i64),
    /// Single-column primary key
    Value(KeyValue),
    /// Multi-column primary key
    Tuple(Vec<KeyValue>),
    /// A new row without an index; assigned a fresh row identifier on merge
    New,
}

impl RowKey {
    /// Derive the key for a document row from its key-column values. An
    /// empty column list yields an index key from the row position.
    pub fn from_values(values: &[&Scalar]) -> RowKey {
        match values {
            [single] => RowKey::Value(KeyValue::from_scalar(single)),
            _ => RowKey::Tuple(values.iter().map(|v| KeyValue::from_scalar(v)).collect()),
        }
    }

    /// Check if this key marks a new row
    pub fn is_new(&self) -> bool {
        matches!(self, RowKey::New)
    }

    fn rank(&self) -> u8 {
        match self {
            RowKey::Index(_) => 0,
            RowKey::Value(_) => 1,
            RowKey::Tuple(_) => 2,
            RowKey::New => 3,
        }
    }
}

impl Ord for RowKey {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (RowKey::Index(a), RowKey::Index(b)) => a.cmp(b),
            (RowKey::Value(a), RowKey::Value(b)) => a.cmp(b),
            (RowKey::Tuple(a), RowKey::Tuple(b)) => a.cmp(b),
            (RowKey::New, RowKey::New) => Ordering::Equal,
            _ => self.rank().cmp(&other.rank()),
        }
    }
}

impl PartialOrd for RowKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Index(v) => write!(f, "{}", v),
            RowKey::Value(v) => write!(f, "{}", v),
            RowKey::Tuple(vs) => {
                let parts: Vec<String> = vs.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(","))
            }
            RowKey::New => write!(f, "<new>"),
        }
    }
}

/// Column handle in a reconstructed snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnRef {
    /// Stable archive column identifier
    pub id: u32,
    /// Column name at the reconstructed version
    pub name: String,
}

/// A row in a reconstructed snapshot
#[derive(Debug, Clone, PartialEq)]
pub struct DatasetRow {
    /// Archive row identifier
    pub rowid: u64,
    /// Cell values in column order
    pub values: Vec<Scalar>,
}

/// A single reconstructed version of the archived dataset: the columns that
/// were live at the version and the rows in their snapshot order
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    /// Columns in snapshot order
    pub columns: Vec<ColumnRef>,
    /// Rows ordered by their position at the version
    pub rows: Vec<DatasetRow>,
}

impl Dataset {
    /// Get the position of the named column, if present
    pub fn column_position(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }

    /// Get all values of the named column in row order
    pub fn column_values(&self, name: &str) -> Option<Vec<&Scalar>> {
        let pos = self.column_position(name)?;
        Some(self.rows.iter().map(|r| &r.values[pos]).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_scalar_equality() {
        assert_eq!(Scalar::Int(1), Scalar::Int(1));
        assert_ne!(Scalar::Int(1), Scalar::Float(1.0));
        assert_eq!(Scalar::Float(1.5), Scalar::Float(1.5));
        assert_ne!(Scalar::Float(f64::NAN), Scalar::Float(f64::NAN));
        assert_ne!(Scalar::Float(0.0), Scalar::Float(-0.0));
        assert_eq!(Scalar::Null, Scalar::Null);
        assert_ne!(Scalar::Null, Scalar::Int(0));
        let t = Utc.with_ymd_and_hms(2021, 3, 1, 12, 0, 0).unwrap();
        assert_eq!(Scalar::DateTime(t), Scalar::DateTime(t));
    }

    #[test]
    fn test_key_ordering() {
        // Nulls sort before all non-null keys.
        assert!(KeyValue::Null < KeyValue::Int(i64::MIN));
        assert!(KeyValue::Null < KeyValue::Text(String::new()));
        // Numbers sort before text, and mix numerically.
        assert!(KeyValue::Int(2) < KeyValue::Float(2.5));
        assert!(KeyValue::Float(1.5) < KeyValue::Int(2));
        assert!(KeyValue::Int(100) < KeyValue::Text("0".into()));
        assert_eq!(KeyValue::Int(2), KeyValue::Float(2.0));
        assert!(KeyValue::Text("a".into()) < KeyValue::Text("b".into()));
    }

    #[test]
    fn test_row_key_ordering() {
        assert!(RowKey::Index(3) < RowKey::Index(4));
        assert!(RowKey::Index(100) < RowKey::New);
        assert!(RowKey::Value(KeyValue::Text("z".into())) < RowKey::New);
        assert_eq!(RowKey::New, RowKey::New);
        let a = RowKey::Tuple(vec![KeyValue::Int(1), KeyValue::Text("a".into())]);
        let b = RowKey::Tuple(vec![KeyValue::Int(1), KeyValue::Text("b".into())]);
        assert!(a < b);
    }

    #[test]
    fn test_key_from_values() {
        let name = Scalar::from("Alice");
        let age = Scalar::from(32);
        assert_eq!(
            RowKey::from_values(&[&name]),
            RowKey::Value(KeyValue::Text("Alice".into()))
        );
        assert_eq!(
            RowKey::from_values(&[&name, &age]),
            RowKey::Tuple(vec![KeyValue::Text("Alice".into()), KeyValue::Int(32)])
        );
    }

    #[test]
    fn test_dataset_column_access() {
        let ds = Dataset {
            columns: vec![
                ColumnRef { id: 0, name: "Name".into() },
                ColumnRef { id: 1, name: "Age".into() },
            ],
            rows: vec![
                DatasetRow { rowid: 0, values: vec!["Alice".into(), 32.into()] },
                DatasetRow { rowid: 1, values: vec!["Bob".into(), 45.into()] },
            ],
        };
        assert_eq!(ds.column_position("Age"), Some(1));
        assert_eq!(
            ds.column_values("Age").unwrap(),
            vec![&Scalar::Int(32), &Scalar::Int(45)]
        );
        assert!(ds.column_values("Salary").is_none());
    }
}
