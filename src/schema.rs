//! Table schemas
//!
//! A schema is an ordered list of columns with the key columns first. Segment
//! headers embed one (the tablet schema at segment creation) and every write
//! request carries the schema the client encoded its rows with.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};

/// Physical type of a column
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataType {
    Bool,
    Int8,
    Int16,
    Int32,
    Int64,
    Float,
    Double,
    /// Microseconds since the Unix epoch
    Timestamp,
    String,
    Binary,
}

impl DataType {
    /// Encoded width of a cell of this type in the row buffer.
    ///
    /// Variable-length types occupy an `(offset: u32, len: u32)` pair
    /// pointing into the indirect data buffer.
    pub fn cell_width(self) -> usize {
        match self {
            DataType::Bool | DataType::Int8 => 1,
            DataType::Int16 => 2,
            DataType::Int32 | DataType::Float => 4,
            DataType::Int64 | DataType::Double | DataType::Timestamp => 8,
            DataType::String | DataType::Binary => 8,
        }
    }

    pub fn is_variable_length(self) -> bool {
        matches!(self, DataType::String | DataType::Binary)
    }

    pub fn name(self) -> &'static str {
        match self {
            DataType::Bool => "bool",
            DataType::Int8 => "int8",
            DataType::Int16 => "int16",
            DataType::Int32 => "int32",
            DataType::Int64 => "int64",
            DataType::Float => "float",
            DataType::Double => "double",
            DataType::Timestamp => "timestamp",
            DataType::String => "string",
            DataType::Binary => "binary",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An owned cell value (column defaults, encoder input)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int8(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Float(f32),
    Double(f64),
    Timestamp(i64),
    String(String),
    Binary(Vec<u8>),
}

impl Value {
    /// Type of the value, `None` for NULL
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Value::Null => None,
            Value::Bool(_) => Some(DataType::Bool),
            Value::Int8(_) => Some(DataType::Int8),
            Value::Int16(_) => Some(DataType::Int16),
            Value::Int32(_) => Some(DataType::Int32),
            Value::Int64(_) => Some(DataType::Int64),
            Value::Float(_) => Some(DataType::Float),
            Value::Double(_) => Some(DataType::Double),
            Value::Timestamp(_) => Some(DataType::Timestamp),
            Value::String(_) => Some(DataType::String),
            Value::Binary(_) => Some(DataType::Binary),
        }
    }
}

/// Definition of one column
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnSchema {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    pub is_key: bool,
    /// Value used when an inserted row does not set this column
    pub default: Option<Value>,
}

impl ColumnSchema {
    /// A non-nullable, non-key column
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable: false,
            is_key: false,
            default: None,
        }
    }

    /// A key column (always non-nullable)
    pub fn key(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            is_key: true,
            ..Self::new(name, data_type)
        }
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }
}

/// Ordered set of columns, key columns first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ColumnSchema>", into = "Vec<ColumnSchema>")]
pub struct Schema {
    columns: Vec<ColumnSchema>,
    num_key_columns: usize,
}

impl Schema {
    /// Build a schema, validating its shape.
    ///
    /// Requires at least one key column, all key columns before any non-key
    /// column, unique names, non-nullable keys, and defaults matching the
    /// column type.
    pub fn new(columns: Vec<ColumnSchema>) -> Result<Self> {
        let num_key_columns = columns.iter().take_while(|c| c.is_key).count();
        if num_key_columns == 0 {
            return Err(LogError::InvalidArgument(
                "schema must have at least one key column".to_string(),
            ));
        }
        if columns[num_key_columns..].iter().any(|c| c.is_key) {
            return Err(LogError::InvalidArgument(
                "key columns must precede all non-key columns".to_string(),
            ));
        }

        let mut seen = HashSet::with_capacity(columns.len());
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(LogError::InvalidArgument(format!(
                    "duplicate column name: {}",
                    col.name
                )));
            }
            if col.is_key && col.nullable {
                return Err(LogError::InvalidArgument(format!(
                    "key column {} cannot be nullable",
                    col.name
                )));
            }
            match &col.default {
                Some(Value::Null) if !col.nullable => {
                    return Err(LogError::InvalidArgument(format!(
                        "non-nullable column {} has a NULL default",
                        col.name
                    )));
                }
                Some(v) if v.data_type().is_some_and(|t| t != col.data_type) => {
                    return Err(LogError::InvalidArgument(format!(
                        "default for column {} does not match type {}",
                        col.name, col.data_type
                    )));
                }
                _ => {}
            }
        }

        Ok(Self {
            columns,
            num_key_columns,
        })
    }

    pub fn columns(&self) -> &[ColumnSchema] {
        &self.columns
    }

    pub fn column(&self, idx: usize) -> &ColumnSchema {
        &self.columns[idx]
    }

    pub fn num_columns(&self) -> usize {
        self.columns.len()
    }

    pub fn num_key_columns(&self) -> usize {
        self.num_key_columns
    }

    pub fn key_columns(&self) -> &[ColumnSchema] {
        &self.columns[..self.num_key_columns]
    }

    pub fn non_key_columns(&self) -> &[ColumnSchema] {
        &self.columns[self.num_key_columns..]
    }

    /// Index of the column with the given name
    pub fn find_column(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.name == name)
    }
}

impl TryFrom<Vec<ColumnSchema>> for Schema {
    type Error = LogError;

    fn try_from(columns: Vec<ColumnSchema>) -> Result<Self> {
        Schema::new(columns)
    }
}

impl From<Schema> for Vec<ColumnSchema> {
    fn from(schema: Schema) -> Self {
        schema.columns
    }
}

impl fmt::Display for Schema {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("(")?;
        for (i, col) in self.columns.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{} {}", col.name, col.data_type)?;
            if col.nullable {
                f.write_str(" NULLABLE")?;
            }
            if col.is_key {
                f.write_str(" KEY")?;
            }
        }
        f.write_str(")")
    }
}
