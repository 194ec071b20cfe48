//! Readable log segments
//!
//! Opens one segment file, validates its header, finds its footer and scans
//! entry frames back out of it.
//!
//! ## Tail tolerance
//! A segment without a footer is the active segment, or one whose writer
//! crashed before sealing. Its tail may hold a frame that was only partly
//! written; such a tail ends the scan without an error. A sealed segment
//! asserts completeness, so any damaged frame inside it is fatal.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::config::LogConfig;
use crate::error::{LogError, Result};

use super::entry::LogEntry;
use super::format::{
    decode_footer_payload, decode_header_payload, decode_preamble, locate_footer,
    parse_footer_trailer, read_frame, FrameRead, SegmentFooter, SegmentHeader,
    FOOTER_TRAILER_SIZE, MAX_VARINT_LEN, PREAMBLE_SIZE,
};

/// Mutability state of a segment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentState {
    /// No footer: being appended to, or left behind by a crash
    Writable,
    /// Footer written; contents are complete and immutable
    Sealed,
}

/// How an unsealed segment's scan ended before the end of the file
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TailDamage {
    /// The last frame is shorter than its declared length
    Truncated {
        offset: u64,
        declared: u64,
        available: u64,
    },
    /// The last readable frame failed its checksum
    ChecksumMismatch { offset: u64 },
    /// The frame length is larger than any legal entry
    Oversized { offset: u64, declared: u64 },
    /// Zero-filled space that was never written
    ZeroFilled { offset: u64 },
}

/// One entry found by a scan, with its location
#[derive(Debug, Clone, PartialEq)]
pub struct ScannedEntry {
    /// Byte offset of the frame within the segment file
    pub offset: u64,
    /// Size of the whole frame (length prefix, payload, checksum)
    pub frame_len: u64,
    pub entry: LogEntry,
}

/// Result of scanning a segment
#[derive(Debug, Clone, PartialEq)]
pub struct SegmentScan {
    /// Entries in on-disk order
    pub entries: Vec<ScannedEntry>,
    /// Offset just past the last complete frame
    pub end_offset: u64,
    /// Set when an unsealed segment's tail was discarded
    pub tail_damage: Option<TailDamage>,
}

/// A segment opened for reading
///
/// Handles hold no open file and no cursor; every read opens the file afresh,
/// so one handle may be read from many threads while a writer appends.
#[derive(Debug)]
pub struct ReadableSegment {
    path: PathBuf,
    header: SegmentHeader,
    footer: Option<SegmentFooter>,
    state: SegmentState,
    /// Offset of the first entry frame
    entries_start: u64,
    /// Offset of the footer block, for sealed segments
    entries_end: Option<u64>,
    max_entry_size: u64,
}

impl ReadableSegment {
    /// Open a segment with the default frame size limit
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_limit(path, LogConfig::default().max_entry_size)
    }

    /// Open a segment, validating its header and locating its footer.
    ///
    /// Fails with `CorruptHeader` if the preamble or header is unusable. A
    /// missing footer is not an error: the segment opens as `Writable`.
    pub fn open_with_limit(path: impl AsRef<Path>, max_entry_size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let file_size = file.metadata()?.len();

        // Preamble + header length
        let head_len = file_size.min((PREAMBLE_SIZE + MAX_VARINT_LEN) as u64) as usize;
        let mut head = vec![0u8; head_len];
        file.read_exact(&mut head)?;
        let (header_len, header_start) = decode_preamble(&head, &path)?;

        let entries_start = match (header_start as u64).checked_add(header_len) {
            Some(end) if end <= file_size => end,
            _ => {
                return Err(LogError::CorruptHeader {
                    path,
                    reason: format!("header declares {header_len} bytes past end of file"),
                })
            }
        };
        let mut payload = vec![0u8; header_len as usize];
        file.seek(SeekFrom::Start(header_start as u64))?;
        file.read_exact(&mut payload)?;
        let header = decode_header_payload(&payload, &path)?;

        let footer = Self::read_footer(&mut file, file_size, entries_start, &path)?;
        let (state, entries_end, footer) = match footer {
            Some((footer, start)) => (SegmentState::Sealed, Some(start), Some(footer)),
            None => (SegmentState::Writable, None, None),
        };

        debug!(
            path = %path.display(),
            sequence = header.sequence_number,
            sealed = footer.is_some(),
            "Opened log segment"
        );

        Ok(Self {
            path,
            header,
            footer,
            state,
            entries_start,
            entries_end,
            max_entry_size,
        })
    }

    /// Read the footer trailer from the file end, if one is there
    fn read_footer(
        file: &mut File,
        file_size: u64,
        entries_start: u64,
        path: &Path,
    ) -> Result<Option<(SegmentFooter, u64)>> {
        let trailer_len = FOOTER_TRAILER_SIZE as u64;
        if file_size < entries_start + trailer_len {
            return Ok(None);
        }

        let mut trailer = [0u8; FOOTER_TRAILER_SIZE];
        file.seek(SeekFrom::Start(file_size - trailer_len))?;
        file.read_exact(&mut trailer)?;
        let (crc, len) = match parse_footer_trailer(&trailer) {
            Some(parsed) => parsed,
            None => return Ok(None),
        };

        let footer_start = match (file_size - trailer_len).checked_sub(len as u64) {
            Some(start) if start >= entries_start => start,
            _ => return Ok(None),
        };
        let mut payload = vec![0u8; len as usize];
        file.seek(SeekFrom::Start(footer_start))?;
        file.read_exact(&mut payload)?;

        Ok(decode_footer_payload(&payload, crc, path)?.map(|footer| (footer, footer_start)))
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    /// Footer written at seal time, `None` for unsealed segments
    pub fn footer(&self) -> Option<&SegmentFooter> {
        self.footer.as_ref()
    }

    pub fn has_footer(&self) -> bool {
        self.footer.is_some()
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    pub fn sequence_number(&self) -> u64 {
        self.header.sequence_number
    }

    /// Offset of the first entry frame
    pub fn entries_start(&self) -> u64 {
        self.entries_start
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Read every entry in on-disk (and therefore OpId) order
    pub fn read_entries(&self) -> Result<Vec<LogEntry>> {
        Ok(self.scan()?.entries.into_iter().map(|e| e.entry).collect())
    }

    /// Scan all entry frames, recording where each one lives.
    ///
    /// For a `Writable` segment a torn, zero-filled or checksum-failing tail
    /// ends the scan successfully and is reported in `tail_damage`. For a
    /// `Sealed` segment the same conditions are `CorruptEntry`.
    pub fn scan(&self) -> Result<SegmentScan> {
        let region = self.read_region()?;
        let base = self.entries_start;

        // An unsealed handle may be read after its writer sealed the file.
        let end = match self.state {
            SegmentState::Sealed => region.len(),
            SegmentState::Writable => match locate_footer(&region, 0, &self.path)? {
                Some((_, footer_start)) => footer_start,
                None => region.len(),
            },
        };

        let mut entries = Vec::new();
        let mut offset = 0usize;
        let mut tail_damage = None;

        while offset < end {
            let abs = base + offset as u64;
            let damage = match read_frame(&region, offset, end, self.max_entry_size) {
                FrameRead::Complete {
                    payload,
                    next_offset,
                } => {
                    let entry = LogEntry::decode(payload).map_err(|e| LogError::CorruptEntry {
                        path: self.path.clone(),
                        offset: abs,
                        reason: format!("unparseable entry: {e}"),
                    })?;
                    entries.push(ScannedEntry {
                        offset: abs,
                        frame_len: (next_offset - offset) as u64,
                        entry,
                    });
                    offset = next_offset;
                    continue;
                }
                FrameRead::Truncated {
                    declared,
                    available,
                } => TailDamage::Truncated {
                    offset: abs,
                    declared,
                    available: available as u64,
                },
                FrameRead::ChecksumMismatch { expected, actual } => {
                    if self.state == SegmentState::Sealed {
                        return Err(self.corrupt_entry(
                            abs,
                            format!("checksum mismatch: stored {expected:#010x}, computed {actual:#010x}"),
                        ));
                    }
                    TailDamage::ChecksumMismatch { offset: abs }
                }
                FrameRead::Oversized { declared } => TailDamage::Oversized {
                    offset: abs,
                    declared,
                },
                FrameRead::Zeroed => TailDamage::ZeroFilled { offset: abs },
            };

            if self.state == SegmentState::Sealed {
                return Err(self.corrupt_entry(abs, format!("damaged frame in sealed segment: {damage:?}")));
            }
            match damage {
                TailDamage::ZeroFilled { .. } => debug!(
                    path = %self.path.display(),
                    offset = abs,
                    "Reached zero-filled tail"
                ),
                _ => warn!(
                    path = %self.path.display(),
                    offset = abs,
                    entries = entries.len(),
                    ?damage,
                    "Discarding damaged tail of unsealed segment"
                ),
            }
            tail_damage = Some(damage);
            break;
        }

        Ok(SegmentScan {
            end_offset: base + offset as u64,
            entries,
            tail_damage,
        })
    }

    /// Read the single entry whose frame starts at `offset`
    pub fn read_entry_at(&self, offset: u64) -> Result<LogEntry> {
        if offset < self.entries_start || self.entries_end.is_some_and(|end| offset >= end) {
            return Err(LogError::InvalidArgument(format!(
                "offset {offset} is outside the entry region of {}",
                self.path.display()
            )));
        }

        let mut file = File::open(&self.path)?;
        let file_end = match self.entries_end {
            Some(end) => end,
            None => file.metadata()?.len(),
        };
        if offset >= file_end {
            return Err(LogError::NotFound(format!(
                "no frame at offset {offset} of {}",
                self.path.display()
            )));
        }
        let frame_limit = (MAX_VARINT_LEN as u64 + self.max_entry_size + 4).min(file_end - offset);

        file.seek(SeekFrom::Start(offset))?;
        let mut buf = Vec::new();
        file.take(frame_limit).read_to_end(&mut buf)?;

        match read_frame(&buf, 0, buf.len(), self.max_entry_size) {
            FrameRead::Complete { payload, .. } => {
                LogEntry::decode(payload).map_err(|e| self.corrupt_entry(offset, format!("unparseable entry: {e}")))
            }
            other => Err(self.corrupt_entry(offset, format!("no complete frame: {other:?}"))),
        }
    }

    /// Derive a footer by scanning, for a segment that was never sealed
    pub fn rebuild_footer(&self) -> Result<SegmentFooter> {
        let scan = self.scan()?;
        let mut footer = SegmentFooter::default();
        for scanned in &scan.entries {
            footer.observe(scanned.entry.replicate_id(), scanned.frame_len);
        }
        Ok(footer)
    }

    /// Bytes from the first entry frame to the footer (or current file end)
    fn read_region(&self) -> Result<Vec<u8>> {
        let mut file = File::open(&self.path)?;
        file.seek(SeekFrom::Start(self.entries_start))?;
        let mut region = Vec::new();
        match self.entries_end {
            Some(end) => {
                region.resize((end - self.entries_start) as usize, 0);
                file.read_exact(&mut region)?;
            }
            None => {
                file.read_to_end(&mut region)?;
            }
        }
        Ok(region)
    }

    fn corrupt_entry(&self, offset: u64, reason: String) -> LogError {
        LogError::CorruptEntry {
            path: self.path.clone(),
            offset,
            reason,
        }
    }
}
