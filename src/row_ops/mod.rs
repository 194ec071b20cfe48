//! Row Operations
//!
//! Wire encoding of the row mutations carried by a WRITE replicate, and the
//! decoder that turns them into typed operations against the tablet schema.
//!
//! ## Batch Format
//! A batch is two buffers: `rows` holds the operations back to back, and
//! `indirect_data` holds the bytes of every STRING/BINARY cell.
//!
//! ### Operation Layout
//! ```text
//! ┌──────────┬──────────────────┬─────────────┬─────────────┬──────────────┐
//! │ Type (1) │ Key cells        │ Isset bits  │ Null bits   │ Value cells  │
//! └──────────┴──────────────────┴─────────────┴─────────────┴──────────────┘
//!                                 └──────── absent for DELETE ───────────┘
//! ```
//! - Key cells: one per key column of the request schema, in order
//! - Isset / null bits: one bit per non-key column, `ceil(n / 8)` bytes each
//! - Value cells: one per column that is set and not null
//!
//! ### Cell Encoding
//! - Fixed-width types: little-endian, `DataType::cell_width()` bytes
//! - STRING / BINARY: `offset: u32` + `len: u32` into `indirect_data`
//!
//! ### Operation Types
//! - 0x01: INSERT
//! - 0x02: UPDATE
//! - 0x03: DELETE
//! - 0x04: UPSERT

mod decoder;
mod encoder;
mod operation;

use serde::{Deserialize, Serialize};

pub use decoder::{decode, RowOperationsDecoder};
pub use encoder::RowOperationsEncoder;
pub use operation::{CellValue, DecodedRowOperation, RowOperationType};

/// An encoded batch of row operations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowOperations {
    pub rows: Vec<u8>,
    pub indirect_data: Vec<u8>,
}

impl RowOperations {
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Bytes needed for a bitmap of `bits` bits
pub(crate) fn bitmap_size(bits: usize) -> usize {
    (bits + 7) / 8
}

pub(crate) fn bitmap_test(bitmap: &[u8], bit: usize) -> bool {
    bitmap[bit / 8] & (1 << (bit % 8)) != 0
}

pub(crate) fn bitmap_set(bitmap: &mut [u8], bit: usize) {
    bitmap[bit / 8] |= 1 << (bit % 8);
}
