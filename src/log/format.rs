//! Segment file codec
//!
//! Byte-level encoding of the segment preamble, header, entry frames and
//! footer trailer. Everything here works on in-memory buffers; file handling
//! lives in `segment` and `writer`.

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::opid::OpId;
use crate::schema::Schema;

// =============================================================================
// Constants
// =============================================================================

/// Magic bytes opening every segment file
pub const SEGMENT_MAGIC: &[u8; 4] = b"OPLG";

/// Current segment format version
pub const FORMAT_VERSION: u32 = 1;

/// Magic bytes closing a sealed segment
pub const FOOTER_MAGIC: &[u8; 4] = b"OPLF";

/// Magic (4) + Version (4)
pub const PREAMBLE_SIZE: usize = 8;

/// Trailing CRC32 of every entry frame
pub const FRAME_CRC_SIZE: usize = 4;

/// Footer CRC (4) + Footer length (4) + Footer magic (4)
pub const FOOTER_TRAILER_SIZE: usize = 12;

/// Longest LEB128 encoding of a u64
pub const MAX_VARINT_LEN: usize = 10;

// =============================================================================
// Header / Footer
// =============================================================================

/// Written once when a segment is created
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegmentHeader {
    /// Replicated unit this log belongs to
    pub tablet_id: String,
    /// Position of this segment in the log, assigned at creation
    pub sequence_number: u64,
    /// Tablet schema at the time the segment was created
    pub schema: Schema,
    /// Creation time (unix micros)
    pub created_at_micros: u64,
}

/// Written once when a segment is sealed
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentFooter {
    /// Number of entries (REPLICATE and COMMIT) in the segment
    pub num_entries: u64,
    /// Smallest REPLICATE id in the segment
    pub min_op_id: Option<OpId>,
    /// Largest REPLICATE id in the segment
    pub max_op_id: Option<OpId>,
    /// Bytes occupied by entry frames
    pub total_entry_bytes: u64,
    /// Seal time (unix micros), zero for footers rebuilt by scanning
    pub closed_at_micros: u64,
}

impl SegmentFooter {
    /// Fold one entry into the running aggregates
    pub(crate) fn observe(&mut self, replicate_id: Option<OpId>, frame_len: u64) {
        self.num_entries += 1;
        self.total_entry_bytes += frame_len;
        if let Some(id) = replicate_id {
            if self.min_op_id.map_or(true, |min| id < min) {
                self.min_op_id = Some(id);
            }
            if self.max_op_id.map_or(true, |max| id > max) {
                self.max_op_id = Some(id);
            }
        }
    }
}

/// Encode preamble + length-prefixed header
pub fn encode_header(header: &SegmentHeader) -> Result<Vec<u8>> {
    let payload = bincode::serialize(header)?;
    let mut buf = Vec::with_capacity(PREAMBLE_SIZE + MAX_VARINT_LEN + payload.len());
    buf.put_slice(SEGMENT_MAGIC);
    buf.put_u32_le(FORMAT_VERSION);
    encode_varint_u64(&mut buf, payload.len() as u64);
    buf.put_slice(&payload);
    Ok(buf)
}

/// Decode the preamble and header.
///
/// Returns the header and the offset of the first entry frame.
pub fn decode_header(data: &[u8], path: &Path) -> Result<(SegmentHeader, usize)> {
    let (len, start) = decode_preamble(data, path)?;
    let end = start
        .checked_add(len as usize)
        .filter(|&end| end <= data.len())
        .ok_or_else(|| LogError::CorruptHeader {
            path: path.to_path_buf(),
            reason: format!("header declares {len} bytes past end of file"),
        })?;
    let header = decode_header_payload(&data[start..end], path)?;
    Ok((header, end))
}

/// Validate magic and version, then read the header length.
///
/// `data` needs at most `PREAMBLE_SIZE + MAX_VARINT_LEN` bytes. Returns the
/// declared header length and the offset where the header payload starts.
pub fn decode_preamble(data: &[u8], path: &Path) -> Result<(u64, usize)> {
    let corrupt = |reason: String| LogError::CorruptHeader {
        path: path.to_path_buf(),
        reason,
    };

    if data.len() < PREAMBLE_SIZE {
        return Err(corrupt(format!(
            "file too short for preamble: {} bytes",
            data.len()
        )));
    }
    if &data[0..4] != SEGMENT_MAGIC {
        return Err(corrupt(format!("bad magic {:?}", &data[0..4])));
    }
    let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
    if version != FORMAT_VERSION {
        return Err(corrupt(format!("unsupported format version {version}")));
    }

    match decode_varint_u64(&data[PREAMBLE_SIZE..]) {
        Varint::Value { value, len } => Ok((value, PREAMBLE_SIZE + len)),
        Varint::Incomplete => Err(corrupt("truncated header length".to_string())),
        Varint::Overflow => Err(corrupt("malformed header length".to_string())),
    }
}

pub fn decode_header_payload(payload: &[u8], path: &Path) -> Result<SegmentHeader> {
    bincode::deserialize(payload).map_err(|e| LogError::CorruptHeader {
        path: path.to_path_buf(),
        reason: format!("unparseable header: {e}"),
    })
}

/// Encode the footer block appended at seal time
pub fn encode_footer(footer: &SegmentFooter) -> Result<Vec<u8>> {
    let payload = bincode::serialize(footer)?;
    let mut buf = Vec::with_capacity(payload.len() + FOOTER_TRAILER_SIZE);
    buf.put_slice(&payload);
    buf.put_u32_le(crc32fast::hash(&payload));
    buf.put_u32_le(payload.len() as u32);
    buf.put_slice(FOOTER_MAGIC);
    Ok(buf)
}

/// Look for a footer block at the end of `data`.
///
/// Returns the footer and the offset where it starts (the end of the entry
/// region). A trailer that does not check out is not a footer: the segment is
/// then treated as unsealed.
pub fn locate_footer(
    data: &[u8],
    entries_start: usize,
    path: &Path,
) -> Result<Option<(SegmentFooter, usize)>> {
    if data.len() < entries_start + FOOTER_TRAILER_SIZE {
        return Ok(None);
    }
    let trailer_start = data.len() - FOOTER_TRAILER_SIZE;
    let (crc, len) = match parse_footer_trailer(&data[trailer_start..]) {
        Some(parsed) => parsed,
        None => return Ok(None),
    };
    let footer_start = match trailer_start.checked_sub(len as usize) {
        Some(start) if start >= entries_start => start,
        _ => return Ok(None),
    };
    Ok(decode_footer_payload(&data[footer_start..trailer_start], crc, path)?
        .map(|footer| (footer, footer_start)))
}

/// Split a footer trailer into `(crc, footer_len)` if its magic matches
pub fn parse_footer_trailer(trailer: &[u8]) -> Option<(u32, u32)> {
    if trailer.len() != FOOTER_TRAILER_SIZE || &trailer[8..12] != FOOTER_MAGIC {
        return None;
    }
    let crc = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let len = u32::from_le_bytes([trailer[4], trailer[5], trailer[6], trailer[7]]);
    Some((crc, len))
}

/// Decode a footer payload, `None` when its checksum does not match
pub fn decode_footer_payload(
    payload: &[u8],
    crc: u32,
    path: &Path,
) -> Result<Option<SegmentFooter>> {
    if crc32fast::hash(payload) != crc {
        return Ok(None);
    }
    bincode::deserialize(payload)
        .map(Some)
        .map_err(|e| LogError::CorruptFooter {
            path: path.to_path_buf(),
            reason: format!("unparseable footer: {e}"),
        })
}

// =============================================================================
// Entry Frames
// =============================================================================

/// Frame an encoded entry: `[len varint][payload][crc32]`
pub fn encode_frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(MAX_VARINT_LEN + payload.len() + FRAME_CRC_SIZE);
    encode_varint_u64(&mut buf, payload.len() as u64);
    buf.put_slice(payload);
    buf.put_u32_le(crc32fast::hash(payload));
    buf
}

/// Outcome of reading one frame
#[derive(Debug, PartialEq, Eq)]
pub enum FrameRead<'a> {
    /// A complete frame whose checksum matched
    Complete { payload: &'a [u8], next_offset: usize },
    /// Fewer bytes remain than the frame needs: a crash-torn tail
    Truncated { declared: u64, available: usize },
    /// The frame is complete but its checksum does not match
    ChecksumMismatch { expected: u32, actual: u32 },
    /// Declared length zero: zero-filled (never written) space
    Zeroed,
    /// Declared length is larger than any legal entry
    Oversized { declared: u64 },
}

/// Read the frame starting at `offset`, never looking past `end`.
pub fn read_frame(data: &[u8], offset: usize, end: usize, max_entry_size: u64) -> FrameRead<'_> {
    let region = &data[offset..end];
    let (declared, len_size) = match decode_varint_u64(region) {
        Varint::Value { value, len } => (value, len),
        Varint::Incomplete => {
            return FrameRead::Truncated {
                declared: 0,
                available: region.len(),
            }
        }
        Varint::Overflow => return FrameRead::Oversized { declared: u64::MAX },
    };

    if declared == 0 {
        return FrameRead::Zeroed;
    }
    if declared > max_entry_size {
        return FrameRead::Oversized { declared };
    }

    let payload_start = len_size;
    let payload_end = payload_start + declared as usize;
    if payload_end + FRAME_CRC_SIZE > region.len() {
        return FrameRead::Truncated {
            declared,
            available: region.len() - len_size,
        };
    }

    let payload = &region[payload_start..payload_end];
    let crc_bytes = &region[payload_end..payload_end + FRAME_CRC_SIZE];
    let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let actual = crc32fast::hash(payload);
    if expected != actual {
        return FrameRead::ChecksumMismatch { expected, actual };
    }

    FrameRead::Complete {
        payload,
        next_offset: offset + payload_end + FRAME_CRC_SIZE,
    }
}

// =============================================================================
// Varints (LEB128)
// =============================================================================

/// Encode an unsigned integer as a varint
pub fn encode_varint_u64(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80; // continuation
        }
        buf.put_u8(byte);
        if value == 0 {
            break;
        }
    }
}

/// Result of decoding a varint from the front of a buffer
#[derive(Debug, PartialEq, Eq)]
pub enum Varint {
    Value { value: u64, len: usize },
    /// Buffer ended before the terminating byte
    Incomplete,
    /// More than 64 bits of payload
    Overflow,
}

/// Decode a varint from the front of `buf`
pub fn decode_varint_u64(buf: &[u8]) -> Varint {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    for (i, &byte) in buf.iter().enumerate() {
        if shift >= 64 || (shift == 63 && byte > 1) {
            return Varint::Overflow;
        }
        value |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Varint::Value { value, len: i + 1 };
        }
        shift += 7;
    }
    Varint::Incomplete
}

/// Current wall-clock time in unix micros
pub(crate) fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
