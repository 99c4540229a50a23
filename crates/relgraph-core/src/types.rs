//! Column value types and their load/store conversions.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, TypeError};
use crate::value::Value;

/// The declared value type of a column.
///
/// The type drives two conversions: [`ColumnType::encode`] shapes a row value
/// for binding, and [`ColumnType::decode`] normalizes what a transport hands back
/// (SQLite, for instance, reports booleans and timestamps as plain integers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ColumnType {
    Boolean,
    Integer,
    BigInt,
    Double,
    Text,
    Blob,
    Timestamp,
    Json,
    /// A serialized object stored as JSON bytes in a blob column.
    Object,
}

impl ColumnType {
    /// Get the SQL type name for this type.
    pub const fn sql_name(self) -> &'static str {
        match self {
            ColumnType::Boolean => "BOOLEAN",
            ColumnType::Integer => "INTEGER",
            ColumnType::BigInt => "BIGINT",
            ColumnType::Double => "DOUBLE PRECISION",
            ColumnType::Text => "TEXT",
            ColumnType::Blob | ColumnType::Object => "BLOB",
            ColumnType::Timestamp => "TIMESTAMP",
            ColumnType::Json => "JSON",
        }
    }

    /// Check that `value` can be stored in a column of this type.
    pub fn check(self, column: &str, value: &Value) -> Result<()> {
        let ok = match (self, value) {
            (_, Value::Null) => true,
            (ColumnType::Boolean, Value::Bool(_) | Value::Int(_) | Value::BigInt(_)) => true,
            (ColumnType::Integer | ColumnType::BigInt, Value::Int(_) | Value::BigInt(_)) => true,
            (ColumnType::Double, Value::Double(_) | Value::Int(_) | Value::BigInt(_)) => true,
            (ColumnType::Text, Value::Text(_)) => true,
            (ColumnType::Blob, Value::Bytes(_)) => true,
            (ColumnType::Timestamp, Value::Timestamp(_) | Value::BigInt(_) | Value::Int(_)) => {
                true
            }
            (ColumnType::Json | ColumnType::Object, Value::Json(_)) => true,
            (ColumnType::Json, Value::Text(_)) => true,
            (ColumnType::Object, Value::Bytes(_)) => true,
            _ => false,
        };
        if ok {
            Ok(())
        } else {
            Err(Error::Type(TypeError {
                expected: self.sql_name(),
                actual: value.type_name().to_string(),
                column: Some(column.to_string()),
            }))
        }
    }

    /// Shape a row value for binding.
    pub fn encode(self, value: &Value) -> Result<Value> {
        Ok(match (self, value) {
            (ColumnType::Object, Value::Json(json)) => Value::Bytes(serde_json::to_vec(json)?),
            (ColumnType::Json, Value::Json(json)) => Value::Text(serde_json::to_string(json)?),
            _ => value.clone(),
        })
    }

    /// Normalize a value read back from a transport.
    ///
    /// `Object` columns hold JSON bytes. Bytes that do not decode are kept as
    /// raw `Value::Bytes` instead of failing the load; callers that require a
    /// decoded object must check the variant.
    pub fn decode(self, column: &str, value: Value) -> Value {
        match (self, value) {
            (_, Value::Null) => Value::Null,
            (ColumnType::Boolean, Value::Int(v)) => Value::Bool(v != 0),
            (ColumnType::Boolean, Value::BigInt(v)) => Value::Bool(v != 0),
            (ColumnType::BigInt, Value::Int(v)) => Value::BigInt(i64::from(v)),
            (ColumnType::Integer, Value::BigInt(v)) => match i32::try_from(v) {
                Ok(small) => Value::Int(small),
                Err(_) => Value::BigInt(v),
            },
            (ColumnType::Double, Value::Int(v)) => Value::Double(f64::from(v)),
            (ColumnType::Double, Value::BigInt(v)) => Value::Double(v as f64),
            (ColumnType::Timestamp, Value::Int(v)) => Value::Timestamp(i64::from(v)),
            (ColumnType::Timestamp, Value::BigInt(v)) => Value::Timestamp(v),
            (ColumnType::Json, Value::Text(text)) => match serde_json::from_str(&text) {
                Ok(json) => Value::Json(json),
                Err(_) => Value::Text(text),
            },
            (ColumnType::Object, Value::Bytes(bytes)) => {
                match serde_json::from_slice::<serde_json::Value>(&bytes) {
                    Ok(json) => Value::Json(json),
                    Err(e) => {
                        tracing::warn!(
                            column = column,
                            len = bytes.len(),
                            error = %e,
                            "object column did not decode; keeping raw bytes"
                        );
                        Value::Bytes(bytes)
                    }
                }
            }
            (_, other) => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_sqlite_integers() {
        assert_eq!(
            ColumnType::Boolean.decode("active", Value::Int(1)),
            Value::Bool(true)
        );
        assert_eq!(
            ColumnType::BigInt.decode("id", Value::Int(9)),
            Value::BigInt(9)
        );
        assert_eq!(
            ColumnType::Timestamp.decode("at", Value::BigInt(1_700_000_000)),
            Value::Timestamp(1_700_000_000)
        );
        assert_eq!(
            ColumnType::Integer.decode("n", Value::BigInt(5)),
            Value::Int(5)
        );
    }

    #[test]
    fn test_object_round_trip_through_bytes() {
        let json = serde_json::json!({"rank": 3, "tags": ["a"]});
        let stored = ColumnType::Object.encode(&Value::Json(json.clone())).unwrap();
        assert!(matches!(stored, Value::Bytes(_)));
        assert_eq!(ColumnType::Object.decode("meta", stored), Value::Json(json));
    }

    #[test]
    fn test_object_decode_failure_keeps_bytes() {
        let raw = vec![0xff, 0x00, 0x13];
        assert_eq!(
            ColumnType::Object.decode("meta", Value::Bytes(raw.clone())),
            Value::Bytes(raw)
        );
    }

    #[test]
    fn test_check_rejects_mismatched_value() {
        assert!(ColumnType::Text.check("name", &Value::Text("x".into())).is_ok());
        assert!(ColumnType::Text.check("name", &Value::Null).is_ok());
        let err = ColumnType::Text.check("name", &Value::Int(1)).unwrap_err();
        assert!(err.to_string().contains("column 'name'"));
    }
}
