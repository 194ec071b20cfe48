//! Decoded row operation definitions

use std::fmt;

use crate::error::{LogError, Result};
use crate::schema::{DataType, Schema, Value};

/// Kind of row mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RowOperationType {
    Insert = 0x01,
    Update = 0x02,
    Delete = 0x03,
    Upsert = 0x04,
}

impl RowOperationType {
    pub fn from_tag(tag: u8) -> Result<Self> {
        match tag {
            0x01 => Ok(RowOperationType::Insert),
            0x02 => Ok(RowOperationType::Update),
            0x03 => Ok(RowOperationType::Delete),
            0x04 => Ok(RowOperationType::Upsert),
            _ => Err(LogError::InvalidArgument(format!(
                "unknown row operation type: 0x{tag:02x}"
            ))),
        }
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    /// True for operations that may create a row
    pub fn creates_row(self) -> bool {
        matches!(self, RowOperationType::Insert | RowOperationType::Upsert)
    }

    pub fn name(self) -> &'static str {
        match self {
            RowOperationType::Insert => "INSERT",
            RowOperationType::Update => "UPDATE",
            RowOperationType::Delete => "DELETE",
            RowOperationType::Upsert => "UPSERT",
        }
    }
}

/// A decoded cell; variable-length data lives in the decode arena
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellValue<'a> {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Timestamp(i64),
    String(&'a str),
    Binary(&'a [u8]),
}

impl<'a> CellValue<'a> {
    pub fn is_null(&self) -> bool {
        matches!(self, CellValue::Null)
    }

    pub fn data_type(&self) -> Option<DataType> {
        match self {
            CellValue::Null => None,
            CellValue::Bool(_) => Some(DataType::Bool),
            CellValue::Int8(_) => Some(DataType::Int8),
            CellValue::Int16(_) => Some(DataType::Int16),
            CellValue::Int32(_) => Some(DataType::Int32),
            CellValue::Int64(_) => Some(DataType::Int64),
            CellValue::Float(_) => Some(DataType::Float),
            CellValue::Double(_) => Some(DataType::Double),
            CellValue::Timestamp(_) => Some(DataType::Timestamp),
            CellValue::String(_) => Some(DataType::String),
            CellValue::Binary(_) => Some(DataType::Binary),
        }
    }

    /// Copy out of the arena
    pub fn to_value(&self) -> Value {
        match *self {
            CellValue::Null => Value::Null,
            CellValue::Bool(v) => Value::Bool(v),
            CellValue::Int8(v) => Value::Int8(v),
            CellValue::Int16(v) => Value::Int16(v),
            CellValue::Int32(v) => Value::Int32(v),
            CellValue::Int64(v) => Value::Int64(v),
            CellValue::Float(v) => Value::Float(v),
            CellValue::Double(v) => Value::Double(v),
            CellValue::Timestamp(v) => Value::Timestamp(v),
            CellValue::String(v) => Value::String(v.to_string()),
            CellValue::Binary(v) => Value::Binary(v.to_vec()),
        }
    }
}

impl fmt::Display for CellValue<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Null => f.write_str("NULL"),
            CellValue::Bool(v) => write!(f, "{v}"),
            CellValue::Int8(v) => write!(f, "{v}"),
            CellValue::Int16(v) => write!(f, "{v}"),
            CellValue::Int32(v) => write!(f, "{v}"),
            CellValue::Int64(v) => write!(f, "{v}"),
            CellValue::Float(v) => write!(f, "{v}"),
            CellValue::Double(v) => write!(f, "{v}"),
            CellValue::Timestamp(v) => write!(f, "{v}"),
            CellValue::String(v) => write!(f, "{v:?}"),
            CellValue::Binary(v) => {
                f.write_str("0x")?;
                for byte in v.iter() {
                    write!(f, "{byte:02x}")?;
                }
                Ok(())
            }
        }
    }
}

/// One row mutation expressed against the tablet schema
///
/// Borrows from the arena it was decoded into; the arena cannot be reset or
/// dropped while any operation is alive.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedRowOperation<'a> {
    pub op_type: RowOperationType,

    /// One value per tablet key column, in key order
    pub key_values: Vec<CellValue<'a>>,

    /// `(tablet column index, value)` for non-key columns, ascending by index.
    /// INSERT/UPSERT carry every non-key column; UPDATE only the ones it sets;
    /// DELETE none.
    pub column_values: Vec<(usize, CellValue<'a>)>,
}

impl<'a> DecodedRowOperation<'a> {
    /// Value assigned to a tablet column, if this operation sets it
    pub fn column(&self, column_idx: usize) -> Option<&CellValue<'a>> {
        self.column_values
            .iter()
            .find(|(idx, _)| *idx == column_idx)
            .map(|(_, value)| value)
    }

    /// Human-readable form, e.g. `INSERT (int32 id=1, string name="a")`
    pub fn describe(&self, schema: &Schema) -> String {
        let key = self
            .key_values
            .iter()
            .zip(schema.key_columns())
            .map(|(value, col)| format!("{} {}={}", col.data_type, col.name, value))
            .collect::<Vec<_>>()
            .join(", ");
        let columns = self
            .column_values
            .iter()
            .map(|(idx, value)| match schema.columns().get(*idx) {
                Some(col) => format!("{} {}={}", col.data_type, col.name, value),
                None => format!("#{idx}={value}"),
            })
            .collect::<Vec<_>>()
            .join(", ");

        match self.op_type {
            RowOperationType::Delete => format!("DELETE ({key})"),
            RowOperationType::Update => format!("UPDATE ({key}) SET {columns}"),
            op if columns.is_empty() => format!("{} ({key})", op.name()),
            op => format!("{} ({key}, {columns})", op.name()),
        }
    }
}
