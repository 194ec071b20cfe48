//! Log writers
//!
//! `WritableSegment` appends frames to one segment file and seals it.
//! `LogWriter` owns a whole log directory: it recovers a crashed tail on
//! open, rotates segments, and publishes every change to the shared
//! `LogReader` and `LogIndex`.
//!
//! One writer per log. Appends are not internally synchronized; `&mut self`
//! makes rotation mutually exclusive with appends.

use std::fs::{self, File, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::{LogConfig, SyncStrategy};
use crate::error::{LogError, Result};
use crate::opid::OpId;
use crate::schema::Schema;

use super::entry::LogEntry;
use super::format::{encode_footer, encode_frame, encode_header, now_micros, SegmentFooter, SegmentHeader};
use super::index::LogIndex;
use super::reader::{parse_segment_filename, segment_filename, LogIssue, LogReader};
use super::segment::{ReadableSegment, SegmentState};
use super::{CORRUPT_SUFFIX, INDEX_FILENAME};

// =============================================================================
// WritableSegment
// =============================================================================

/// Appends entries to a single segment file
pub struct WritableSegment {
    path: PathBuf,
    file: File,
    header: SegmentHeader,
    state: SegmentState,
    /// Current end of file
    size: u64,
    /// Running footer aggregates
    footer: SegmentFooter,
    last_replicate: Option<OpId>,
    sync_strategy: SyncStrategy,
    unsynced: usize,
}

impl WritableSegment {
    /// Create a new segment file and write its header
    pub fn create(path: &Path, header: SegmentHeader, sync_strategy: SyncStrategy) -> Result<Self> {
        let mut file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(path)?;

        let bytes = encode_header(&header)?;
        file.write_all(&bytes)?;
        file.sync_all()?;

        debug!(path = %path.display(), sequence = header.sequence_number, "Created log segment");

        Ok(Self {
            path: path.to_path_buf(),
            file,
            header,
            state: SegmentState::Writable,
            size: bytes.len() as u64,
            footer: SegmentFooter::default(),
            last_replicate: None,
            sync_strategy,
            unsynced: 0,
        })
    }

    /// Continue REPLICATE ordering from an earlier segment
    pub fn with_last_replicate(mut self, last: Option<OpId>) -> Self {
        self.last_replicate = last;
        self
    }

    /// Append one entry; returns the offset of its frame.
    ///
    /// REPLICATE ids must strictly increase.
    pub fn append(&mut self, entry: &LogEntry) -> Result<u64> {
        if self.state == SegmentState::Sealed {
            return Err(LogError::IllegalState(format!(
                "append to sealed segment {}",
                self.path.display()
            )));
        }
        if let (Some(id), Some(last)) = (entry.replicate_id(), self.last_replicate) {
            if id <= last {
                return Err(LogError::IllegalState(format!(
                    "replicate {id} does not follow {last}"
                )));
            }
        }

        let frame = encode_frame(&entry.encode()?);
        self.file.write_all(&frame)?;

        let offset = self.size;
        self.size += frame.len() as u64;
        self.footer.observe(entry.replicate_id(), frame.len() as u64);
        if let Some(id) = entry.replicate_id() {
            self.last_replicate = Some(id);
        }

        self.unsynced += 1;
        let due = match self.sync_strategy {
            SyncStrategy::EveryWrite => true,
            SyncStrategy::EveryNEntries { count } => self.unsynced >= count,
        };
        if due {
            self.sync()?;
        }

        Ok(offset)
    }

    /// Force appended data to disk
    pub fn sync(&mut self) -> Result<()> {
        self.file.sync_data()?;
        self.unsynced = 0;
        Ok(())
    }

    /// Write the footer and make the segment immutable
    pub fn seal(&mut self) -> Result<SegmentFooter> {
        if self.state == SegmentState::Sealed {
            return Err(LogError::IllegalState(format!(
                "segment {} is already sealed",
                self.path.display()
            )));
        }

        let mut footer = self.footer.clone();
        footer.closed_at_micros = now_micros();
        let bytes = encode_footer(&footer)?;
        self.file.write_all(&bytes)?;
        self.file.sync_all()?;

        self.size += bytes.len() as u64;
        self.state = SegmentState::Sealed;
        self.unsynced = 0;

        info!(
            path = %self.path.display(),
            entries = footer.num_entries,
            "Sealed log segment"
        );
        Ok(footer)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn header(&self) -> &SegmentHeader {
        &self.header
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Bytes written so far, including the header
    pub fn size(&self) -> u64 {
        self.size
    }

    pub fn last_replicate(&self) -> Option<OpId> {
        self.last_replicate
    }
}

/// Close a segment a crashed writer left unsealed.
///
/// The damaged tail (if any) is cut off at the end of the last complete
/// frame and a footer rebuilt from the surviving entries is appended.
pub fn seal_recovered_segment(segment: &ReadableSegment) -> Result<SegmentFooter> {
    if segment.state() == SegmentState::Sealed {
        return Err(LogError::IllegalState(format!(
            "segment {} is already sealed",
            segment.path().display()
        )));
    }

    let scan = segment.scan()?;
    let mut footer = SegmentFooter::default();
    for scanned in &scan.entries {
        footer.observe(scanned.entry.replicate_id(), scanned.frame_len);
    }
    footer.closed_at_micros = now_micros();

    let mut file = OpenOptions::new().write(true).open(segment.path())?;
    file.set_len(scan.end_offset)?;
    file.seek(SeekFrom::Start(scan.end_offset))?;
    file.write_all(&encode_footer(&footer)?)?;
    file.sync_all()?;

    warn!(
        path = %segment.path().display(),
        entries = footer.num_entries,
        tail_damage = ?scan.tail_damage,
        "Sealed segment left open by a crashed writer"
    );
    Ok(footer)
}

/// Sequence number encoded in a segment's file name
fn segment_path_sequence(path: &Path) -> Option<u64> {
    path.file_name()
        .and_then(|name| name.to_str())
        .and_then(parse_segment_filename)
}

// =============================================================================
// LogWriter
// =============================================================================

/// Single writer for one tablet's log
pub struct LogWriter {
    config: LogConfig,
    tablet_id: String,
    schema: Schema,
    log_dir: PathBuf,
    reader: Arc<LogReader>,
    index: Arc<LogIndex>,
    active: WritableSegment,
}

impl LogWriter {
    /// Open (or create) the log of `tablet_id`.
    ///
    /// On open:
    /// 1. Create the log directory if needed
    /// 2. Load the side index, or start empty
    /// 3. Discover existing segments, drop empty ones, move aside a newest
    ///    segment with a partial header, and seal a crashed last segment
    /// 4. Index every existing REPLICATE
    /// 5. Start a fresh active segment after the last one
    pub fn open(config: LogConfig, tablet_id: &str, schema: Schema) -> Result<Self> {
        config.validate()?;
        let log_dir = config.log_dir(tablet_id);
        fs::create_dir_all(&log_dir)?;

        let index_path = log_dir.join(INDEX_FILENAME);
        let index = if index_path.exists() {
            match LogIndex::load(&index_path) {
                Ok(index) => index,
                Err(e) => {
                    warn!(path = %index_path.display(), error = %e, "Ignoring unusable side index");
                    LogIndex::new()
                }
            }
        } else {
            LogIndex::new()
        };
        let index = Arc::new(index);

        let reader = Arc::new(LogReader::open_with_index(
            &log_dir,
            Some(Arc::clone(&index)),
            &config,
        )?);

        // A crash between create and header write leaves an empty file or a
        // partial header occupying the next sequence number. Corrupt segments
        // newer than every readable one are moved aside; older ones are kept.
        let newest_readable = reader
            .segments_snapshot()
            .last()
            .map_or(0, |s| s.sequence_number());
        for issue in reader.issues() {
            match issue {
                LogIssue::EmptySegment { path } => {
                    warn!(path = %path.display(), "Removing empty log segment");
                    fs::remove_file(path)?;
                }
                LogIssue::CorruptHeader { path, .. }
                    if segment_path_sequence(path).is_some_and(|seq| seq > newest_readable) =>
                {
                    let mut aside = path.clone().into_os_string();
                    aside.push(CORRUPT_SUFFIX);
                    warn!(
                        path = %path.display(),
                        "Moving aside log segment with partially written header"
                    );
                    fs::rename(path, aside)?;
                }
                _ => {}
            }
        }

        if let Some(last) = reader.segments_snapshot().last() {
            if last.state() == SegmentState::Writable {
                seal_recovered_segment(last)?;
                let reopened = ReadableSegment::open_with_limit(last.path(), config.max_entry_size)?;
                reader.replace_last_segment(Arc::new(reopened))?;
            }
        }

        if let Err(e) = reader.build_index() {
            match e {
                LogError::IndexConflict { .. } => {
                    warn!(error = %e, "Side index disagrees with segments, rebuilding");
                    index.clear();
                    reader.build_index()?;
                }
                other => return Err(other),
            }
        }

        let snapshot = reader.segments_snapshot();
        let next_sequence = snapshot.last().map_or(1, |s| s.sequence_number() + 1);
        let last_replicate = snapshot
            .iter()
            .rev()
            .find_map(|s| s.footer().and_then(|f| f.max_op_id));

        let active = Self::create_segment(&config, &log_dir, tablet_id, &schema, next_sequence)?
            .with_last_replicate(last_replicate);
        reader.append_segment(Arc::new(ReadableSegment::open_with_limit(
            active.path(),
            config.max_entry_size,
        )?))?;

        info!(
            tablet_id,
            active_sequence = next_sequence,
            segments = reader.num_segments(),
            "Opened log for writing"
        );

        Ok(Self {
            config,
            tablet_id: tablet_id.to_string(),
            schema,
            log_dir,
            reader,
            index,
            active,
        })
    }

    fn create_segment(
        config: &LogConfig,
        log_dir: &Path,
        tablet_id: &str,
        schema: &Schema,
        sequence_number: u64,
    ) -> Result<WritableSegment> {
        let header = SegmentHeader {
            tablet_id: tablet_id.to_string(),
            sequence_number,
            schema: schema.clone(),
            created_at_micros: now_micros(),
        };
        WritableSegment::create(
            &log_dir.join(segment_filename(sequence_number)),
            header,
            config.sync_strategy,
        )
    }

    /// Append one entry, rolling over first if the active segment is full.
    ///
    /// Returns the offset of the entry within the active segment.
    pub fn append(&mut self, entry: &LogEntry) -> Result<u64> {
        if self.active.size() >= self.config.max_segment_size {
            self.roll_over()?;
        }
        let offset = self.active.append(entry)?;
        if let Some(id) = entry.replicate_id() {
            self.index
                .record(id, self.active.header().sequence_number, offset)?;
        }
        Ok(offset)
    }

    /// Seal the active segment and start the next one.
    ///
    /// Readers holding an earlier snapshot keep seeing the old list.
    pub fn roll_over(&mut self) -> Result<()> {
        self.seal_active()?;

        let next_sequence = self.active.header().sequence_number + 1;
        let next = Self::create_segment(
            &self.config,
            &self.log_dir,
            &self.tablet_id,
            &self.schema,
            next_sequence,
        )?
        .with_last_replicate(self.active.last_replicate());
        self.reader.append_segment(Arc::new(ReadableSegment::open_with_limit(
            next.path(),
            self.config.max_entry_size,
        )?))?;
        self.active = next;

        info!(tablet_id = %self.tablet_id, sequence = next_sequence, "Rolled over log segment");
        Ok(())
    }

    /// Switch the schema stamped into future segments
    pub fn set_schema(&mut self, schema: Schema) {
        self.schema = schema;
    }

    /// Seal the active segment and persist the side index
    pub fn close(mut self) -> Result<SegmentFooter> {
        let footer = self.seal_active()?;
        self.index.save(&self.log_dir.join(INDEX_FILENAME))?;
        Ok(footer)
    }

    fn seal_active(&mut self) -> Result<SegmentFooter> {
        let footer = self.active.seal()?;
        let sealed = ReadableSegment::open_with_limit(self.active.path(), self.config.max_entry_size)?;
        self.reader.replace_last_segment(Arc::new(sealed))?;
        Ok(footer)
    }

    pub fn sync(&mut self) -> Result<()> {
        self.active.sync()
    }

    /// Shared reader over this log
    pub fn reader(&self) -> Arc<LogReader> {
        Arc::clone(&self.reader)
    }

    pub fn index(&self) -> Arc<LogIndex> {
        Arc::clone(&self.index)
    }

    pub fn active_sequence(&self) -> u64 {
        self.active.header().sequence_number
    }

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }
}
