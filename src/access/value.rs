use crate::storage::error::{StorageError, StorageResult};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Data types supported by the database
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Boolean = 1,
    Int32 = 2,
    Int64 = 3,
    Varchar = 4,
    Double = 5,
    Varbinary = 6,
    Blob = 7,
    Clob = 8,
}

impl DataType {
    pub fn from_u8(value: u8) -> StorageResult<Self> {
        match value {
            1 => Ok(DataType::Boolean),
            2 => Ok(DataType::Int32),
            3 => Ok(DataType::Int64),
            4 => Ok(DataType::Varchar),
            5 => Ok(DataType::Double),
            6 => Ok(DataType::Varbinary),
            7 => Ok(DataType::Blob),
            8 => Ok(DataType::Clob),
            _ => Err(StorageError::FileCorrupted(format!(
                "Unknown data type: {}",
                value
            ))),
        }
    }

    /// BLOB and CLOB columns live in large-object storage and cannot be indexed.
    pub fn is_large_object(&self) -> bool {
        matches!(self, DataType::Blob | DataType::Clob)
    }

    pub fn sql_name(&self) -> &'static str {
        match self {
            DataType::Boolean => "BOOLEAN",
            DataType::Int32 => "INT",
            DataType::Int64 => "BIGINT",
            DataType::Varchar => "VARCHAR",
            DataType::Double => "DOUBLE",
            DataType::Varbinary => "VARBINARY",
            DataType::Blob => "BLOB",
            DataType::Clob => "CLOB",
        }
    }
}

/// Values that can be stored in the database
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
}

impl Value {
    /// Get the data type of this value
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Boolean(_) => Some(DataType::Boolean),
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Double(_) => Some(DataType::Double),
            Value::String(_) => Some(DataType::Varchar),
            Value::Bytes(_) => Some(DataType::Varbinary),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Check if this value is compatible with the given data type
    pub fn is_compatible_with(&self, data_type: DataType) -> bool {
        match (self, data_type) {
            (Value::Null, _) => true, // NULL is compatible with any type
            (Value::Boolean(_), DataType::Boolean) => true,
            (Value::Int32(_), DataType::Int32) => true,
            (Value::Int64(_), DataType::Int64) => true,
            (Value::Double(_), DataType::Double) => true,
            (Value::String(_), DataType::Varchar | DataType::Clob) => true,
            (Value::Bytes(_), DataType::Varbinary | DataType::Blob) => true,
            _ => false,
        }
    }

    /// Compare two values of possibly different types.
    ///
    /// Numbers compare numerically across widths. Values of unrelated types
    /// order by type rank so the result is still a total order. NULL sorts
    /// below everything; index code handles NULL ordering itself.
    pub fn compare_type_safe(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Null, _) => Ordering::Less,
            (_, Value::Null) => Ordering::Greater,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int32(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Int32(a), Value::Int64(b)) => (*a as i64).cmp(b),
            (Value::Int64(a), Value::Int32(b)) => a.cmp(&(*b as i64)),
            (Value::Double(a), Value::Double(b)) => a.total_cmp(b),
            (Value::Double(a), b) if b.as_f64().is_some() => {
                a.total_cmp(&b.as_f64().unwrap_or_default())
            }
            (a, Value::Double(b)) if a.as_f64().is_some() => {
                a.as_f64().unwrap_or_default().total_cmp(b)
            }
            (Value::String(a), Value::String(b)) => a.cmp(b),
            (Value::Bytes(a), Value::Bytes(b)) => a.cmp(b),
            (a, b) => a.type_rank().cmp(&b.type_rank()),
        }
    }

    fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int32(v) => Some(*v as f64),
            Value::Int64(v) => Some(*v as f64),
            Value::Double(v) => Some(*v),
            _ => None,
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int32(_) | Value::Int64(_) | Value::Double(_) => 2,
            Value::String(_) => 3,
            Value::Bytes(_) => 4,
        }
    }

    /// Estimated heap footprint, used for cache sizing.
    pub fn memory(&self) -> usize {
        match self {
            Value::Null => 0,
            Value::Boolean(_) | Value::Int32(_) => 24,
            Value::Int64(_) | Value::Double(_) => 32,
            Value::String(s) => 48 + s.len() * 2,
            Value::Bytes(b) => 40 + b.len(),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", if *b { "TRUE" } else { "FALSE" }),
            Value::Int32(v) => write!(f, "{}", v),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
            Value::Bytes(b) => {
                write!(f, "X'")?;
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                write!(f, "'")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_type_conversion() -> StorageResult<()> {
        assert_eq!(DataType::from_u8(1)?, DataType::Boolean);
        assert_eq!(DataType::from_u8(3)?, DataType::Int64);
        assert_eq!(DataType::from_u8(8)?, DataType::Clob);
        assert!(DataType::from_u8(99).is_err());
        Ok(())
    }

    #[test]
    fn test_large_object_types() {
        assert!(DataType::Blob.is_large_object());
        assert!(DataType::Clob.is_large_object());
        assert!(!DataType::Varbinary.is_large_object());
        assert!(!DataType::Varchar.is_large_object());
    }

    #[test]
    fn test_value_compatibility() {
        assert!(Value::Null.is_compatible_with(DataType::Int32));
        assert!(Value::Boolean(true).is_compatible_with(DataType::Boolean));
        assert!(Value::Int64(42).is_compatible_with(DataType::Int64));
        assert!(Value::String("hello".to_string()).is_compatible_with(DataType::Clob));

        assert!(!Value::Boolean(true).is_compatible_with(DataType::Int32));
        assert!(!Value::Int32(42).is_compatible_with(DataType::Varchar));
    }

    #[test]
    fn test_compare_numeric_widths() {
        assert_eq!(
            Value::Int32(5).compare_type_safe(&Value::Int64(5)),
            Ordering::Equal
        );
        assert_eq!(
            Value::Int64(-1).compare_type_safe(&Value::Int32(3)),
            Ordering::Less
        );
        assert_eq!(
            Value::Double(2.5).compare_type_safe(&Value::Int32(2)),
            Ordering::Greater
        );
    }

    #[test]
    fn test_compare_null_and_mixed() {
        assert_eq!(Value::Null.compare_type_safe(&Value::Int32(0)), Ordering::Less);
        assert_eq!(
            Value::String("a".into()).compare_type_safe(&Value::Int32(9)),
            Ordering::Greater
        );
        assert_eq!(
            Value::String("abc".into()).compare_type_safe(&Value::String("abd".into())),
            Ordering::Less
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Value::String("it's".into()).to_string(), "'it''s'");
        assert_eq!(Value::Bytes(vec![0x0a, 0xff]).to_string(), "X'0aff'");
        assert_eq!(Value::Null.to_string(), "NULL");
    }
}
