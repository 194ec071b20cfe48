//! Row operation encoding
//!
//! Builds a `RowOperations` batch against the schema a client writes with.

use crate::error::{LogError, Result};
use crate::schema::{ColumnSchema, Schema, Value};

use super::operation::RowOperationType;
use super::{bitmap_set, bitmap_size, RowOperations};

/// Accumulates row operations into an encoded batch
pub struct RowOperationsEncoder<'s> {
    schema: &'s Schema,
    ops: RowOperations,
    count: usize,
}

impl<'s> RowOperationsEncoder<'s> {
    pub fn new(schema: &'s Schema) -> Self {
        Self {
            schema,
            ops: RowOperations::default(),
            count: 0,
        }
    }

    /// Number of operations added so far
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Append one operation.
    ///
    /// `cells` names columns of the encoder's schema. Every key column must be
    /// present and non-null. DELETE carries key columns only. Non-key columns
    /// left out are encoded as unset.
    pub fn add(&mut self, op_type: RowOperationType, cells: &[(&str, Value)]) -> Result<()> {
        let mut assigned: Vec<Option<&Value>> = vec![None; self.schema.num_columns()];
        for (name, value) in cells {
            let idx = self.schema.find_column(name).ok_or_else(|| {
                LogError::InvalidArgument(format!("unknown column: {name}"))
            })?;
            if assigned[idx].is_some() {
                return Err(LogError::InvalidArgument(format!(
                    "column {name} assigned twice"
                )));
            }
            check_value(self.schema.column(idx), value)?;
            assigned[idx] = Some(value);
        }

        let num_keys = self.schema.num_key_columns();
        let (key_cells, value_cells) = assigned.split_at(num_keys);

        if op_type == RowOperationType::Delete && value_cells.iter().any(Option::is_some) {
            return Err(LogError::InvalidArgument(
                "DELETE may only set key columns".to_string(),
            ));
        }

        // Build into a scratch buffer so a failed add leaves the batch intact
        let mut row = vec![op_type.tag()];
        let mut indirect_len = self.ops.indirect_data.len();
        let mut indirect = Vec::new();

        for (col, cell) in self.schema.key_columns().iter().zip(key_cells) {
            match cell {
                Some(value) if !matches!(value, Value::Null) => {
                    encode_cell(value, &mut row, &mut indirect, &mut indirect_len)?
                }
                _ => {
                    return Err(LogError::InvalidArgument(format!(
                        "key column {} not set",
                        col.name
                    )))
                }
            }
        }

        if op_type != RowOperationType::Delete {
            let bits = value_cells.len();
            let mut isset = vec![0u8; bitmap_size(bits)];
            let mut nulls = vec![0u8; bitmap_size(bits)];
            for (j, cell) in value_cells.iter().enumerate() {
                match cell {
                    Some(Value::Null) => {
                        bitmap_set(&mut isset, j);
                        bitmap_set(&mut nulls, j);
                    }
                    Some(_) => bitmap_set(&mut isset, j),
                    None => {}
                }
            }
            row.extend_from_slice(&isset);
            row.extend_from_slice(&nulls);
            for value in value_cells.iter().flatten() {
                if !matches!(value, Value::Null) {
                    encode_cell(value, &mut row, &mut indirect, &mut indirect_len)?;
                }
            }
        }

        self.ops.rows.extend_from_slice(&row);
        self.ops.indirect_data.extend_from_slice(&indirect);
        self.count += 1;
        Ok(())
    }

    /// Take the encoded batch
    pub fn finish(self) -> RowOperations {
        self.ops
    }
}

fn check_value(col: &ColumnSchema, value: &Value) -> Result<()> {
    match value.data_type() {
        None if col.nullable => Ok(()),
        None => Err(LogError::InvalidArgument(format!(
            "column {} is not nullable",
            col.name
        ))),
        Some(t) if t == col.data_type => Ok(()),
        Some(t) => Err(LogError::InvalidArgument(format!(
            "column {} has type {}, got {t}",
            col.name, col.data_type
        ))),
    }
}

fn encode_cell(
    value: &Value,
    row: &mut Vec<u8>,
    indirect: &mut Vec<u8>,
    indirect_len: &mut usize,
) -> Result<()> {
    match value {
        Value::Null => {}
        Value::Bool(v) => row.push(u8::from(*v)),
        Value::Int8(v) => row.extend_from_slice(&v.to_le_bytes()),
        Value::Int16(v) => row.extend_from_slice(&v.to_le_bytes()),
        Value::Int32(v) => row.extend_from_slice(&v.to_le_bytes()),
        Value::Int64(v) | Value::Timestamp(v) => row.extend_from_slice(&v.to_le_bytes()),
        Value::Float(v) => row.extend_from_slice(&v.to_le_bytes()),
        Value::Double(v) => row.extend_from_slice(&v.to_le_bytes()),
        Value::String(s) => push_indirect(s.as_bytes(), row, indirect, indirect_len)?,
        Value::Binary(b) => push_indirect(b, row, indirect, indirect_len)?,
    }
    Ok(())
}

fn push_indirect(
    data: &[u8],
    row: &mut Vec<u8>,
    indirect: &mut Vec<u8>,
    indirect_len: &mut usize,
) -> Result<()> {
    let offset = u32::try_from(*indirect_len)
        .map_err(|_| LogError::InvalidArgument("indirect data exceeds 4GB".to_string()))?;
    let len = u32::try_from(data.len())
        .map_err(|_| LogError::InvalidArgument("cell exceeds 4GB".to_string()))?;
    row.extend_from_slice(&offset.to_le_bytes());
    row.extend_from_slice(&len.to_le_bytes());
    indirect.extend_from_slice(data);
    *indirect_len += data.len();
    Ok(())
}
