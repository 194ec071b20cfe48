//! Row operation decoding
//!
//! Decodes a batch encoded against the client's schema into operations on the
//! tablet schema. Decoding runs in two passes:
//! 1. Walk the row buffer, copying variable-length cells into the arena and
//!    recording where each one landed
//! 2. Seal the arena batch and resolve the recorded positions into borrowed
//!    slices
//!
//! The raw batch is never modified.

use tracing::debug;

use crate::arena::Arena;
use crate::error::{LogError, Result};
use crate::schema::{ColumnSchema, DataType, Schema, Value};

use super::operation::{CellValue, DecodedRowOperation, RowOperationType};
use super::{bitmap_size, bitmap_test, RowOperations};

/// Decode `ops` (encoded with `client_schema`) into `arena`
pub fn decode<'a>(
    ops: &RowOperations,
    client_schema: &Schema,
    tablet_schema: &Schema,
    arena: &'a mut Arena,
) -> Result<Vec<DecodedRowOperation<'a>>> {
    RowOperationsDecoder::new(ops, client_schema, tablet_schema).decode_operations(arena)
}

/// Decodes one encoded batch against a tablet schema
pub struct RowOperationsDecoder<'s> {
    ops: &'s RowOperations,
    client_schema: &'s Schema,
    tablet_schema: &'s Schema,
}

impl<'s> RowOperationsDecoder<'s> {
    pub fn new(ops: &'s RowOperations, client_schema: &'s Schema, tablet_schema: &'s Schema) -> Self {
        Self {
            ops,
            client_schema,
            tablet_schema,
        }
    }

    /// Decode every operation in the batch.
    ///
    /// Fails with `InvalidArgument` when the batch is malformed, names a
    /// column the tablet lacks, disagrees on a column type, leaves a required
    /// column without a value, or would grow the arena past its limit.
    pub fn decode_operations<'a>(&self, arena: &'a mut Arena) -> Result<Vec<DecodedRowOperation<'a>>> {
        let projection = self.project()?;

        arena.begin(self.ops.indirect_data.len());
        let mut cursor = Cursor::new(&self.ops.rows);
        let mut staged = Vec::new();
        while !cursor.is_empty() {
            staged.push(self.decode_one(&mut cursor, &projection, arena)?);
        }

        let batch: &'a [u8] = arena.seal();
        let decoded = staged
            .into_iter()
            .map(|op| op.resolve(batch))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            count = decoded.len(),
            rows_bytes = self.ops.rows.len(),
            indirect_bytes = self.ops.indirect_data.len(),
            "Decoded row operations"
        );
        Ok(decoded)
    }

    // =========================================================================
    // Schema Projection
    // =========================================================================

    /// Map each client non-key column to its tablet column index
    fn project(&self) -> Result<Vec<usize>> {
        let client_keys = self.client_schema.key_columns();
        let tablet_keys = self.tablet_schema.key_columns();
        if client_keys.len() != tablet_keys.len() {
            return Err(LogError::InvalidArgument(format!(
                "client schema has {} key columns, tablet has {}",
                client_keys.len(),
                tablet_keys.len()
            )));
        }
        for (client, tablet) in client_keys.iter().zip(tablet_keys) {
            if client.name != tablet.name || client.data_type != tablet.data_type {
                return Err(LogError::InvalidArgument(format!(
                    "key column {} {} does not match tablet key column {} {}",
                    client.name, client.data_type, tablet.name, tablet.data_type
                )));
            }
        }

        self.client_schema
            .non_key_columns()
            .iter()
            .map(|client| {
                let idx = self.tablet_schema.find_column(&client.name).ok_or_else(|| {
                    LogError::InvalidArgument(format!(
                        "column {} does not exist in the tablet schema",
                        client.name
                    ))
                })?;
                let tablet = self.tablet_schema.column(idx);
                if tablet.is_key {
                    return Err(LogError::InvalidArgument(format!(
                        "column {} is a key column of the tablet",
                        client.name
                    )));
                }
                if tablet.data_type != client.data_type {
                    return Err(LogError::InvalidArgument(format!(
                        "column {} has type {} in the tablet, client sent {}",
                        client.name, tablet.data_type, client.data_type
                    )));
                }
                Ok(idx)
            })
            .collect()
    }

    // =========================================================================
    // First Pass
    // =========================================================================

    fn decode_one(
        &self,
        cursor: &mut Cursor<'_>,
        projection: &[usize],
        arena: &mut Arena,
    ) -> Result<StagedOperation> {
        let op_type = RowOperationType::from_tag(cursor.read(1)?[0])?;

        let mut key_values = Vec::with_capacity(self.client_schema.num_key_columns());
        for col in self.client_schema.key_columns() {
            key_values.push(self.read_cell(cursor, col.data_type, arena)?);
        }

        if op_type == RowOperationType::Delete {
            return Ok(StagedOperation {
                op_type,
                key_values,
                column_values: Vec::new(),
            });
        }

        let bits = projection.len();
        let isset = cursor.read(bitmap_size(bits))?;
        let nulls = cursor.read(bitmap_size(bits))?;

        // Client-supplied values, by tablet column index
        let mut supplied: Vec<Option<StagedCell>> = vec![None; self.tablet_schema.num_columns()];
        for (j, &tablet_idx) in projection.iter().enumerate() {
            if !bitmap_test(isset, j) {
                continue;
            }
            let col = self.tablet_schema.column(tablet_idx);
            let cell = if bitmap_test(nulls, j) {
                if !col.nullable {
                    return Err(LogError::InvalidArgument(format!(
                        "NULL for non-nullable column {}",
                        col.name
                    )));
                }
                StagedCell::Null
            } else {
                self.read_cell(cursor, col.data_type, arena)?
            };
            supplied[tablet_idx] = Some(cell);
        }

        let num_keys = self.tablet_schema.num_key_columns();
        let mut column_values = Vec::new();
        for (idx, slot) in supplied.into_iter().enumerate().skip(num_keys) {
            match slot {
                Some(cell) => column_values.push((idx, cell)),
                None if op_type.creates_row() => {
                    let col = self.tablet_schema.column(idx);
                    column_values.push((idx, default_cell(col, arena)?));
                }
                None => {}
            }
        }

        if op_type == RowOperationType::Update && column_values.is_empty() {
            return Err(LogError::InvalidArgument(
                "UPDATE does not set any column".to_string(),
            ));
        }

        Ok(StagedOperation {
            op_type,
            key_values,
            column_values,
        })
    }

    fn read_cell(
        &self,
        cursor: &mut Cursor<'_>,
        data_type: DataType,
        arena: &mut Arena,
    ) -> Result<StagedCell> {
        let bytes = cursor.read(data_type.cell_width())?;
        let fixed = match data_type {
            DataType::Bool => CellValue::Bool(bytes[0] != 0),
            DataType::Int8 => CellValue::Int8(i8::from_le_bytes([bytes[0]])),
            DataType::Int16 => CellValue::Int16(i16::from_le_bytes(le_array(bytes))),
            DataType::Int32 => CellValue::Int32(i32::from_le_bytes(le_array(bytes))),
            DataType::Int64 => CellValue::Int64(i64::from_le_bytes(le_array(bytes))),
            DataType::Float => CellValue::Float(f32::from_le_bytes(le_array(bytes))),
            DataType::Double => CellValue::Double(f64::from_le_bytes(le_array(bytes))),
            DataType::Timestamp => CellValue::Timestamp(i64::from_le_bytes(le_array(bytes))),
            DataType::String | DataType::Binary => {
                let offset = u32::from_le_bytes(le_array(&bytes[..4])) as usize;
                let len = u32::from_le_bytes(le_array(&bytes[4..])) as usize;
                let data = offset
                    .checked_add(len)
                    .and_then(|end| self.ops.indirect_data.get(offset..end))
                    .ok_or_else(|| {
                        LogError::InvalidArgument(format!(
                            "indirect cell {offset}+{len} outside {} bytes of indirect data",
                            self.ops.indirect_data.len()
                        ))
                    })?;
                let start = arena.copy_in(data)?;
                return Ok(StagedCell::Indirect {
                    start,
                    len,
                    data_type,
                });
            }
        };
        Ok(StagedCell::Fixed(fixed))
    }
}

/// Value for a column the operation leaves unset
fn default_cell(col: &ColumnSchema, arena: &mut Arena) -> Result<StagedCell> {
    let fixed = match &col.default {
        None if col.nullable => return Ok(StagedCell::Null),
        None => {
            return Err(LogError::InvalidArgument(format!(
                "missing value for required column {}",
                col.name
            )))
        }
        Some(Value::Null) => return Ok(StagedCell::Null),
        Some(Value::String(s)) => return indirect_default(s.as_bytes(), DataType::String, arena),
        Some(Value::Binary(b)) => return indirect_default(b, DataType::Binary, arena),
        Some(Value::Bool(v)) => CellValue::Bool(*v),
        Some(Value::Int8(v)) => CellValue::Int8(*v),
        Some(Value::Int16(v)) => CellValue::Int16(*v),
        Some(Value::Int32(v)) => CellValue::Int32(*v),
        Some(Value::Int64(v)) => CellValue::Int64(*v),
        Some(Value::Float(v)) => CellValue::Float(*v),
        Some(Value::Double(v)) => CellValue::Double(*v),
        Some(Value::Timestamp(v)) => CellValue::Timestamp(*v),
    };
    Ok(StagedCell::Fixed(fixed))
}

fn indirect_default(data: &[u8], data_type: DataType, arena: &mut Arena) -> Result<StagedCell> {
    let start = arena.copy_in(data)?;
    Ok(StagedCell::Indirect {
        start,
        len: data.len(),
        data_type,
    })
}

fn le_array<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes[..N]);
    out
}

// =============================================================================
// Staging
// =============================================================================

/// A cell whose variable-length bytes are not yet addressable
#[derive(Debug, Clone, Copy)]
enum StagedCell {
    Null,
    Fixed(CellValue<'static>),
    Indirect {
        start: usize,
        len: usize,
        data_type: DataType,
    },
}

impl StagedCell {
    fn resolve(self, batch: &[u8]) -> Result<CellValue<'_>> {
        match self {
            StagedCell::Null => Ok(CellValue::Null),
            StagedCell::Fixed(value) => Ok(value),
            StagedCell::Indirect {
                start,
                len,
                data_type,
            } => {
                let bytes = batch.get(start..start + len).ok_or_else(|| {
                    LogError::IllegalState(format!(
                        "arena batch of {} bytes lacks cell {start}+{len}",
                        batch.len()
                    ))
                })?;
                match data_type {
                    DataType::String => std::str::from_utf8(bytes)
                        .map(CellValue::String)
                        .map_err(|e| LogError::InvalidArgument(format!("invalid UTF-8 string: {e}"))),
                    _ => Ok(CellValue::Binary(bytes)),
                }
            }
        }
    }
}

struct StagedOperation {
    op_type: RowOperationType,
    key_values: Vec<StagedCell>,
    column_values: Vec<(usize, StagedCell)>,
}

impl StagedOperation {
    fn resolve(self, batch: &[u8]) -> Result<DecodedRowOperation<'_>> {
        let key_values = self
            .key_values
            .into_iter()
            .map(|cell| cell.resolve(batch))
            .collect::<Result<Vec<_>>>()?;
        let column_values = self
            .column_values
            .into_iter()
            .map(|(idx, cell)| cell.resolve(batch).map(|value| (idx, value)))
            .collect::<Result<Vec<_>>>()?;
        Ok(DecodedRowOperation {
            op_type: self.op_type,
            key_values,
            column_values,
        })
    }
}

/// Bounds-checked reader over the row buffer
struct Cursor<'b> {
    data: &'b [u8],
    pos: usize,
}

impl<'b> Cursor<'b> {
    fn new(data: &'b [u8]) -> Self {
        Self { data, pos: 0 }
    }

    fn is_empty(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn read(&mut self, n: usize) -> Result<&'b [u8]> {
        let end = self.pos + n;
        let bytes = self.data.get(self.pos..end).ok_or_else(|| {
            LogError::InvalidArgument(format!(
                "row operations truncated: need {n} bytes at offset {}, have {}",
                self.pos,
                self.data.len() - self.pos
            ))
        })?;
        self.pos = end;
        Ok(bytes)
    }
}
