use crate::error::{Result, ShardError};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Column types a physical cursor can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Null,
    Boolean,
    Int64,
    Float64,
    Utf8,
    Binary,
}

impl DataType {
    /// Two shards agree on a column when the types match or either side could
    /// only report NULL for it.
    pub fn is_compatible_with(&self, other: &DataType) -> bool {
        self == other || *self == DataType::Null || *other == DataType::Null
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::Null => "NULL",
            DataType::Boolean => "BOOLEAN",
            DataType::Int64 => "BIGINT",
            DataType::Float64 => "DOUBLE",
            DataType::Utf8 => "VARCHAR",
            DataType::Binary => "VARBINARY",
        };
        write!(f, "{}", name)
    }
}

/// A single SQL value, as bound to a parameter or read from a cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Boolean(bool),
    Int64(i64),
    Float64(f64),
    Utf8(String),
    Binary(Vec<u8>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn data_type(&self) -> DataType {
        match self {
            Value::Null => DataType::Null,
            Value::Boolean(_) => DataType::Boolean,
            Value::Int64(_) => DataType::Int64,
            Value::Float64(_) => DataType::Float64,
            Value::Utf8(_) => DataType::Utf8,
            Value::Binary(_) => DataType::Binary,
        }
    }

    /// Integral view of the value. Text is accepted when it parses as an
    /// integer, since sharding keys often arrive as string literals.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int64(v) => Some(*v),
            Value::Float64(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            Value::Boolean(b) => Some(*b as i64),
            Value::Utf8(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int64(v) => Some(*v as f64),
            Value::Float64(v) => Some(*v),
            Value::Utf8(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Canonical bytes used by hash-based sharding; stable across processes.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        match self {
            Value::Null => Vec::new(),
            Value::Boolean(b) => vec![*b as u8],
            Value::Int64(v) => v.to_be_bytes().to_vec(),
            Value::Float64(v) => v.to_be_bytes().to_vec(),
            Value::Utf8(s) => s.as_bytes().to_vec(),
            Value::Binary(b) => b.clone(),
        }
    }

    fn type_rank(&self) -> u8 {
        match self {
            Value::Null => 0,
            Value::Boolean(_) => 1,
            Value::Int64(_) | Value::Float64(_) => 2,
            Value::Utf8(_) => 3,
            Value::Binary(_) => 4,
        }
    }

    /// Total order used by ORDER BY merging and range sharding.
    ///
    /// NULL sorts below everything; integers and floats compare numerically.
    /// Note that `Int64(1)` and `Float64(1.0)` compare `Equal` here while they
    /// are distinct under `Eq`/`Hash`.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Value::Null, Value::Null) => Ordering::Equal,
            (Value::Boolean(a), Value::Boolean(b)) => a.cmp(b),
            (Value::Int64(a), Value::Int64(b)) => a.cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).total_cmp(b),
            (Value::Float64(a), Value::Int64(b)) => a.total_cmp(&(*b as f64)),
            (Value::Float64(a), Value::Float64(b)) => a.total_cmp(b),
            (Value::Utf8(a), Value::Utf8(b)) => a.cmp(b),
            (Value::Binary(a), Value::Binary(b)) => a.cmp(b),
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Addition used by SUM/COUNT accumulation. NULL is the identity.
    pub fn add(&self, other: &Value) -> Result<Value> {
        match (self, other) {
            (Value::Null, v) | (v, Value::Null) => Ok(v.clone()),
            (Value::Int64(a), Value::Int64(b)) => Ok(match a.checked_add(*b) {
                Some(sum) => Value::Int64(sum),
                None => Value::Float64(*a as f64 + *b as f64),
            }),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) if a.is_numeric() && b.is_numeric() => {
                    Ok(Value::Float64(x + y))
                }
                _ => Err(ShardError::TypeMismatch {
                    expected: "numeric".to_string(),
                    found: format!("{} + {}", a.data_type(), b.data_type()),
                }),
            },
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Int64(_) | Value::Float64(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::Int64(a), Value::Int64(b)) => a == b,
            (Value::Float64(a), Value::Float64(b)) => normalized_bits(*a) == normalized_bits(*b),
            (Value::Utf8(a), Value::Utf8(b)) => a == b,
            (Value::Binary(a), Value::Binary(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        std::mem::discriminant(self).hash(state);
        match self {
            Value::Null => {}
            Value::Boolean(b) => b.hash(state),
            Value::Int64(v) => v.hash(state),
            Value::Float64(v) => normalized_bits(*v).hash(state),
            Value::Utf8(s) => s.hash(state),
            Value::Binary(b) => b.hash(state),
        }
    }
}

// -0.0 and 0.0 must land in the same group.
fn normalized_bits(v: f64) -> u64 {
    if v == 0.0 {
        0.0f64.to_bits()
    } else if v.is_nan() {
        f64::NAN.to_bits()
    } else {
        v.to_bits()
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "NULL"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Int64(v) => write!(f, "{}", v),
            Value::Float64(v) => write!(f, "{}", v),
            Value::Utf8(s) => write!(f, "{}", s),
            Value::Binary(b) => {
                for byte in b {
                    write!(f, "{:02x}", byte)?;
                }
                Ok(())
            }
        }
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int64(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int64(v as i64)
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        match i64::try_from(v) {
            Ok(v) => Value::Int64(v),
            Err(_) => Value::Float64(v as f64),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float64(v)
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Utf8(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Utf8(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Metadata for one column of a physical or merged cursor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnMetadata {
    pub name: String,
    pub label: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnMetadata {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        let name = name.into();
        Self {
            label: name.clone(),
            name,
            data_type,
            nullable,
        }
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_compare_mixed_numeric() {
        assert_eq!(Value::Int64(2).compare(&Value::Float64(1.5)), Ordering::Greater);
        assert_eq!(Value::Float64(2.0).compare(&Value::Int64(2)), Ordering::Equal);
        assert_eq!(Value::Null.compare(&Value::Int64(i64::MIN)), Ordering::Less);
        assert_eq!(
            Value::from("abc").compare(&Value::from("abd")),
            Ordering::Less
        );
    }

    #[test]
    fn test_add() {
        assert_eq!(Value::Int64(2).add(&Value::Int64(3)).unwrap(), Value::Int64(5));
        assert_eq!(Value::Null.add(&Value::Int64(3)).unwrap(), Value::Int64(3));
        assert_eq!(
            Value::Int64(1).add(&Value::Float64(0.5)).unwrap(),
            Value::Float64(1.5)
        );
        assert_eq!(
            Value::Int64(i64::MAX).add(&Value::Int64(1)).unwrap(),
            Value::Float64(i64::MAX as f64 + 1.0)
        );
        assert!(Value::from("a").add(&Value::Int64(1)).is_err());
    }

    #[test]
    fn test_hash_negative_zero() {
        let mut set = HashSet::new();
        set.insert(Value::Float64(0.0));
        assert!(set.contains(&Value::Float64(-0.0)));
    }

    #[test]
    fn test_as_i64_from_text() {
        assert_eq!(Value::from("42").as_i64(), Some(42));
        assert_eq!(Value::from("x").as_i64(), None);
        assert_eq!(Value::Float64(3.0).as_i64(), Some(3));
        assert_eq!(Value::Float64(3.5).as_i64(), None);
    }

    #[test]
    fn test_type_compatibility() {
        assert!(DataType::Null.is_compatible_with(&DataType::Int64));
        assert!(!DataType::Utf8.is_compatible_with(&DataType::Int64));
    }
}
