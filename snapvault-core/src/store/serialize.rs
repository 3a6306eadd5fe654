//! Default archive record serializer
//!
//! Rows, schema columns, and snapshot descriptors are persisted as
//! self-describing JSON objects with single-character labels to keep the
//! storage overhead low:
//!
//! - `r` row identifier, `t` timestamp, `k` merge key, `p` position
//!   history, `c` cell histories by column identifier
//! - `c` column identifier, `n` name history, `p` position history,
//!   `t` timestamp (schema records)
//!
//! A timestamp is a list of `[start, end]` interval pairs. A value history
//! is either a single `{t?, v}` object (the `t` omitted when it equals the
//! parent timestamp) or a list of such objects. Scalars that JSON cannot
//! express directly are `$`-tagged single-key objects.

use crate::row::ArchiveRow;
use crate::schema::ArchiveColumn;
use crate::timestamp::Timestamp;
use crate::types::{KeyValue, RowKey, Scalar};
use crate::value::{ArchiveValue, TimestampedValue};
use crate::{ArchiveError, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value as Json};
use std::collections::BTreeMap;

/// Label for timestamps
const LABEL_TIMESTAMP: &str = "t";
/// Label for timestamped scalar values
const LABEL_VALUE: &str = "v";
/// Label for position histories
const LABEL_POS: &str = "p";
/// Label for row identifiers
const LABEL_ROWID: &str = "r";
/// Label for merge keys
const LABEL_KEY: &str = "k";
/// Label for cell histories
const LABEL_CELLS: &str = "c";
/// Label for column identifiers
const LABEL_COLID: &str = "c";
/// Label for column name histories
const LABEL_NAME: &str = "n";

/// Tag for datetime scalars
const TAG_DATETIME: &str = "$datetime";
/// Tag for non-finite float scalars
const TAG_FLOAT: &str = "$float";

/// Identifier of this serializer in the archive metadata
pub const SERIALIZER_ID: &str = "default";

fn malformed(what: &str, value: &Json) -> ArchiveError {
    ArchiveError::Serialization(format!("malformed {}: {}", what, value))
}

/// Encode a scalar as JSON
pub fn scalar_to_json(value: &Scalar) -> Json {
    match value {
        Scalar::Null => Json::Null,
        Scalar::Bool(v) => json!(v),
        Scalar::Int(v) => json!(v),
        Scalar::Float(v) => {
            if v.is_finite() {
                json!(v)
            } else if v.is_nan() {
                json!({ TAG_FLOAT: "nan" })
            } else if *v > 0.0 {
                json!({ TAG_FLOAT: "inf" })
            } else {
                json!({ TAG_FLOAT: "-inf" })
            }
        }
        Scalar::Text(v) => json!(v),
        Scalar::DateTime(v) => {
            json!({ TAG_DATETIME: v.to_rfc3339_opts(SecondsFormat::AutoSi, true) })
        }
    }
}

/// Decode a scalar from JSON
pub fn scalar_from_json(value: &Json) -> Result<Scalar> {
    match value {
        Json::Null => Ok(Scalar::Null),
        Json::Bool(v) => Ok(Scalar::Bool(*v)),
        Json::Number(n) => {
            if let Some(v) = n.as_i64() {
                Ok(Scalar::Int(v))
            } else if let Some(v) = n.as_f64() {
                Ok(Scalar::Float(v))
            } else {
                Err(malformed("number", value))
            }
        }
        Json::String(v) => Ok(Scalar::Text(v.clone())),
        Json::Object(obj) if obj.len() == 1 => {
            if let Some(Json::String(iso)) = obj.get(TAG_DATETIME) {
                let parsed = DateTime::parse_from_rfc3339(iso)
                    .map_err(|e| ArchiveError::Serialization(format!("bad datetime: {}", e)))?;
                Ok(Scalar::DateTime(parsed.with_timezone(&Utc)))
            } else if let Some(Json::String(tag)) = obj.get(TAG_FLOAT) {
                match tag.as_str() {
                    "nan" => Ok(Scalar::Float(f64::NAN)),
                    "inf" => Ok(Scalar::Float(f64::INFINITY)),
                    "-inf" => Ok(Scalar::Float(f64::NEG_INFINITY)),
                    _ => Err(malformed("float tag", value)),
                }
            } else {
                Err(malformed("scalar", value))
            }
        }
        _ => Err(malformed("scalar", value)),
    }
}

/// The default row and metadata serializer
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSerializer;

impl DefaultSerializer {
    /// Serializer identifier persisted in the archive metadata
    pub fn id(&self) -> &'static str {
        SERIALIZER_ID
    }

    /// Serialize a timestamp as a list of interval pairs
    pub fn serialize_timestamp(&self, ts: &Timestamp) -> Json {
        serde_json::to_value(ts).expect("timestamp serialization is infallible")
    }

    /// Deserialize a timestamp from a list of interval pairs
    pub fn deserialize_timestamp(&self, value: &Json) -> Result<Timestamp> {
        serde_json::from_value(value.clone())
            .map_err(|e| ArchiveError::Serialization(format!("bad timestamp: {}", e)))
    }

    /// Serialize a value history. A single-version value whose timestamp
    /// equals the parent timestamp elides its own.
    pub fn serialize_value(&self, value: &ArchiveValue, parent: &Timestamp) -> Json {
        match value {
            ArchiveValue::Single(v) => {
                let mut obj = Map::new();
                if v.timestamp != *parent {
                    obj.insert(
                        LABEL_TIMESTAMP.to_string(),
                        self.serialize_timestamp(&v.timestamp),
                    );
                }
                obj.insert(LABEL_VALUE.to_string(), scalar_to_json(&v.value));
                Json::Object(obj)
            }
            ArchiveValue::Multi(vs) => Json::Array(
                vs.iter()
                    .map(|v| {
                        json!({
                            LABEL_TIMESTAMP: self.serialize_timestamp(&v.timestamp),
                            LABEL_VALUE: scalar_to_json(&v.value),
                        })
                    })
                    .collect(),
            ),
        }
    }

    /// Deserialize a value history, inheriting the parent timestamp for
    /// single-version values without their own
    pub fn deserialize_value(&self, value: &Json, parent: &Timestamp) -> Result<ArchiveValue> {
        match value {
            Json::Object(obj) => {
                let ts = match obj.get(LABEL_TIMESTAMP) {
                    Some(ts) => self.deserialize_timestamp(ts)?,
                    None => parent.clone(),
                };
                let scalar = scalar_from_json(
                    obj.get(LABEL_VALUE).ok_or_else(|| malformed("value", value))?,
                )?;
                Ok(ArchiveValue::single(scalar, ts))
            }
            Json::Array(items) => {
                let mut entries = Vec::with_capacity(items.len());
                for item in items {
                    let obj = item.as_object().ok_or_else(|| malformed("value", item))?;
                    let ts = self.deserialize_timestamp(
                        obj.get(LABEL_TIMESTAMP)
                            .ok_or_else(|| malformed("value timestamp", item))?,
                    )?;
                    let scalar = scalar_from_json(
                        obj.get(LABEL_VALUE).ok_or_else(|| malformed("value", item))?,
                    )?;
                    entries.push(TimestampedValue::new(scalar, ts));
                }
                if entries.len() < 2 {
                    return Err(malformed("multi-version value", value));
                }
                Ok(ArchiveValue::Multi(entries))
            }
            _ => Err(malformed("value", value)),
        }
    }

    fn serialize_key(&self, key: &RowKey) -> Json {
        fn key_value(v: &KeyValue) -> Json {
            match v {
                KeyValue::Null => Json::Null,
                KeyValue::Int(v) => json!(v),
                KeyValue::Float(v) => scalar_to_json(&Scalar::Float(*v)),
                KeyValue::Text(v) => json!(v),
            }
        }
        match key {
            RowKey::Index(v) => json!(v),
            RowKey::Value(v) => key_value(v),
            RowKey::Tuple(vs) => Json::Array(vs.iter().map(key_value).collect()),
            // New keys are resolved to fresh identifiers before rows are
            // written; a stored row never carries one.
            RowKey::New => Json::Null,
        }
    }

    fn deserialize_key(&self, value: &Json, keyed: bool) -> Result<RowKey> {
        fn key_value(value: &Json) -> Result<KeyValue> {
            match scalar_from_json(value)? {
                Scalar::Null => Ok(KeyValue::Null),
                Scalar::Int(v) => Ok(KeyValue::Int(v)),
                Scalar::Float(v) => Ok(KeyValue::Float(v)),
                Scalar::Text(v) => Ok(KeyValue::Text(v)),
                other => Ok(KeyValue::Text(other.to_string())),
            }
        }
        if !keyed {
            return match value.as_i64() {
                Some(idx) => Ok(RowKey::Index(idx)),
                None => Err(malformed("row index key", value)),
            };
        }
        match value {
            Json::Array(items) => {
                let values = items.iter().map(key_value).collect::<Result<Vec<_>>>()?;
                Ok(RowKey::Tuple(values))
            }
            _ => Ok(RowKey::Value(key_value(value)?)),
        }
    }

    /// Serialize an archive row
    pub fn serialize_row(&self, row: &ArchiveRow) -> Json {
        let ts = &row.timestamp;
        let cells: Map<String, Json> = row
            .cells
            .iter()
            .map(|(colid, cell)| (colid.to_string(), self.serialize_value(cell, ts)))
            .collect();
        json!({
            LABEL_ROWID: row.rowid,
            LABEL_KEY: self.serialize_key(&row.key),
            LABEL_TIMESTAMP: self.serialize_timestamp(ts),
            LABEL_POS: self.serialize_value(&row.pos, ts),
            LABEL_CELLS: cells,
        })
    }

    /// Deserialize an archive row. The `keyed` flag selects how the `k`
    /// field is interpreted.
    pub fn deserialize_row(&self, value: &Json, keyed: bool) -> Result<ArchiveRow> {
        let obj = value.as_object().ok_or_else(|| malformed("row", value))?;
        let ts = self.deserialize_timestamp(
            obj.get(LABEL_TIMESTAMP)
                .ok_or_else(|| malformed("row timestamp", value))?,
        )?;
        let rowid = obj
            .get(LABEL_ROWID)
            .and_then(Json::as_u64)
            .ok_or_else(|| malformed("row identifier", value))?;
        let key = self.deserialize_key(
            obj.get(LABEL_KEY).ok_or_else(|| malformed("row key", value))?,
            keyed,
        )?;
        let pos = self.deserialize_value(
            obj.get(LABEL_POS).ok_or_else(|| malformed("row position", value))?,
            &ts,
        )?;
        let mut cells = BTreeMap::new();
        let cell_obj = obj
            .get(LABEL_CELLS)
            .and_then(Json::as_object)
            .ok_or_else(|| malformed("row cells", value))?;
        for (colid, cell) in cell_obj {
            let colid: u32 = colid
                .parse()
                .map_err(|_| malformed("column identifier", value))?;
            cells.insert(colid, self.deserialize_value(cell, &ts)?);
        }
        Ok(ArchiveRow {
            rowid,
            key,
            pos,
            cells,
            timestamp: ts,
        })
    }

    /// Serialize an archive schema column
    pub fn serialize_column(&self, column: &ArchiveColumn) -> Json {
        let ts = &column.timestamp;
        json!({
            LABEL_COLID: column.id,
            LABEL_NAME: self.serialize_value(&column.name, ts),
            LABEL_POS: self.serialize_value(&column.pos, ts),
            LABEL_TIMESTAMP: self.serialize_timestamp(ts),
        })
    }

    /// Deserialize an archive schema column
    pub fn deserialize_column(&self, value: &Json) -> Result<ArchiveColumn> {
        let obj = value.as_object().ok_or_else(|| malformed("column", value))?;
        let ts = self.deserialize_timestamp(
            obj.get(LABEL_TIMESTAMP)
                .ok_or_else(|| malformed("column timestamp", value))?,
        )?;
        let id = obj
            .get(LABEL_COLID)
            .and_then(Json::as_u64)
            .ok_or_else(|| malformed("column identifier", value))? as u32;
        let name = self.deserialize_value(
            obj.get(LABEL_NAME).ok_or_else(|| malformed("column name", value))?,
            &ts,
        )?;
        let pos = self.deserialize_value(
            obj.get(LABEL_POS).ok_or_else(|| malformed("column position", value))?,
            &ts,
        )?;
        Ok(ArchiveColumn {
            id,
            name,
            pos,
            timestamp: ts,
        })
    }
}
