//! Log Reader
//!
//! Discovers the segments of one log directory and hands out point-in-time
//! snapshots of the segment list.
//!
//! ## Concurrency:
//! - `segments`: `Arc<Vec<..>>` swapped under a `parking_lot::Mutex`
//! - A snapshot clones the `Arc` and never sees later rotations
//! - The lock is never held across I/O

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::config::LogConfig;
use crate::error::{LogError, Result};
use crate::opid::OpId;

use super::entry::{LogEntry, ReplicateMsg};
use super::index::LogIndex;
use super::segment::ReadableSegment;

/// Prefix of segment file names
pub const SEGMENT_PREFIX: &str = "wal-";

/// Immutable, ordered view of a log's segments
pub type SegmentSequence = Arc<Vec<Arc<ReadableSegment>>>;

/// Build the canonical file name for a segment
///
/// Format: `wal-000000001`
pub fn segment_filename(sequence_number: u64) -> String {
    format!("{SEGMENT_PREFIX}{sequence_number:09}")
}

/// Parse the sequence number from a segment file name
pub fn parse_segment_filename(name: &str) -> Option<u64> {
    let digits = name.strip_prefix(SEGMENT_PREFIX)?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Non-fatal findings from opening a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogIssue {
    /// Segment skipped because its header is unusable
    CorruptHeader { path: PathBuf, reason: String },
    /// Zero-length segment file (writer crashed right after creating it)
    EmptySegment { path: PathBuf },
    /// Sequence numbers are not contiguous
    Discontinuity { expected: u64, found: u64 },
}

/// Reads the segments of one log
pub struct LogReader {
    /// Directory holding this log's segment files
    log_dir: PathBuf,

    /// Optional shared OpId index
    index: Option<Arc<LogIndex>>,

    /// Segments ordered by sequence number
    segments: Mutex<SegmentSequence>,

    /// Findings from open, in discovery order
    issues: Vec<LogIssue>,
}

impl LogReader {
    /// Open a log directory with default limits and no index
    pub fn open(log_dir: impl AsRef<Path>) -> Result<Self> {
        Self::open_with_index(log_dir, None, &LogConfig::default())
    }

    /// Open a log directory.
    ///
    /// On open:
    /// 1. Discover `wal-*` files (other files are ignored)
    /// 2. Open each one; unusable headers and empty files become `issues()`
    /// 3. Order by the sequence number embedded in each header
    /// 4. Report gaps in the sequence as `Discontinuity` issues
    pub fn open_with_index(
        log_dir: impl AsRef<Path>,
        index: Option<Arc<LogIndex>>,
        config: &LogConfig,
    ) -> Result<Self> {
        let log_dir = log_dir.as_ref().to_path_buf();
        let mut issues = Vec::new();
        let mut segments = Vec::new();

        for dir_entry in fs::read_dir(&log_dir)? {
            let dir_entry = dir_entry?;
            let file_name = dir_entry.file_name();
            let name = file_name.to_string_lossy();
            let Some(name_sequence) = parse_segment_filename(&name) else {
                continue;
            };

            let path = dir_entry.path();
            if dir_entry.metadata()?.len() == 0 {
                warn!(path = %path.display(), "Skipping empty log segment");
                issues.push(LogIssue::EmptySegment { path });
                continue;
            }

            match ReadableSegment::open_with_limit(&path, config.max_entry_size) {
                Ok(segment) => {
                    if segment.sequence_number() != name_sequence {
                        warn!(
                            path = %path.display(),
                            header_sequence = segment.sequence_number(),
                            "Segment file name disagrees with its header"
                        );
                    }
                    segments.push(Arc::new(segment));
                }
                Err(LogError::CorruptHeader { path, reason }) => {
                    warn!(path = %path.display(), %reason, "Skipping segment with corrupt header");
                    issues.push(LogIssue::CorruptHeader { path, reason });
                }
                Err(e) => return Err(e),
            }
        }

        segments.sort_by_key(|s| s.sequence_number());

        for pair in segments.windows(2) {
            let expected = pair[0].sequence_number() + 1;
            let found = pair[1].sequence_number();
            if found != expected {
                warn!(expected, found, log_dir = %log_dir.display(), "Log discontinuity");
                issues.push(LogIssue::Discontinuity { expected, found });
            }
        }

        debug!(
            count = segments.len(),
            issues = issues.len(),
            dir = %log_dir.display(),
            "Discovered log segments"
        );

        Ok(Self {
            log_dir,
            index,
            segments: Mutex::new(Arc::new(segments)),
            issues,
        })
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn log_dir(&self) -> &Path {
        &self.log_dir
    }

    pub fn index(&self) -> Option<&Arc<LogIndex>> {
        self.index.as_ref()
    }

    /// Non-fatal findings from open
    pub fn issues(&self) -> &[LogIssue] {
        &self.issues
    }

    /// First sequence gap found at open, as an error
    pub fn check_continuity(&self) -> Result<()> {
        self.issues
            .iter()
            .find_map(|issue| match issue {
                LogIssue::Discontinuity { expected, found } => Some(LogError::LogDiscontinuity {
                    expected: *expected,
                    found: *found,
                }),
                _ => None,
            })
            .map_or(Ok(()), Err)
    }

    /// Point-in-time copy of the segment list
    pub fn segments_snapshot(&self) -> SegmentSequence {
        Arc::clone(&self.segments.lock())
    }

    pub fn num_segments(&self) -> usize {
        self.segments.lock().len()
    }

    // =========================================================================
    // Reading
    // =========================================================================

    /// Every entry of every segment in the current snapshot, in order
    pub fn read_all_entries(&self) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        for segment in self.segments_snapshot().iter() {
            entries.extend(segment.read_entries()?);
        }
        Ok(entries)
    }

    /// Scan every segment of the current snapshot into the index
    pub fn build_index(&self) -> Result<usize> {
        let index = self.require_index()?;
        let mut recorded = 0;
        for segment in self.segments_snapshot().iter() {
            let scan = segment.scan()?;
            recorded += index.record_scan(segment.sequence_number(), &scan)?;
        }
        info!(recorded, dir = %self.log_dir.display(), "Built log index");
        Ok(recorded)
    }

    /// Fetch one REPLICATE by id through the index, without replay
    pub fn lookup(&self, op_id: OpId) -> Result<ReplicateMsg> {
        let location = self.require_index()?.lookup(op_id)?;
        let snapshot = self.segments_snapshot();
        let segment = snapshot
            .iter()
            .find(|s| s.sequence_number() == location.segment_sequence)
            .ok_or_else(|| {
                LogError::NotFound(format!(
                    "segment {} holding op {op_id} is gone",
                    location.segment_sequence
                ))
            })?;

        match segment.read_entry_at(location.offset)? {
            LogEntry::Replicate(msg) if msg.id == op_id => Ok(msg),
            other => Err(LogError::CorruptEntry {
                path: segment.path().to_path_buf(),
                offset: location.offset,
                reason: format!("index points at {:?}, expected replicate {op_id}", other.op_id()),
            }),
        }
    }

    /// REPLICATEs with `start_index <= id.index <= end_index`, in order.
    ///
    /// Fails with `NotFound` if any index in the range is missing.
    pub fn read_replicates_in_range(
        &self,
        start_index: u64,
        end_index: u64,
    ) -> Result<Vec<ReplicateMsg>> {
        if start_index > end_index {
            return Err(LogError::InvalidArgument(format!(
                "empty range {start_index}..={end_index}"
            )));
        }
        let expected = (end_index - start_index).checked_add(1).ok_or_else(|| {
            LogError::InvalidArgument(format!(
                "range {start_index}..={end_index} is too large"
            ))
        })?;

        let mut replicates = Vec::new();
        for segment in self.segments_snapshot().iter() {
            if let Some(footer) = segment.footer() {
                let outside = match (footer.min_op_id, footer.max_op_id) {
                    (Some(min), Some(max)) => max.index < start_index || min.index > end_index,
                    _ => true,
                };
                if outside {
                    continue;
                }
            }
            for entry in segment.read_entries()? {
                match entry {
                    LogEntry::Replicate(msg)
                        if msg.id.index >= start_index && msg.id.index <= end_index =>
                    {
                        replicates.push(msg)
                    }
                    LogEntry::Replicate(_) | LogEntry::Commit(_) => {}
                }
            }
        }

        let contiguous = replicates
            .iter()
            .enumerate()
            .all(|(i, msg)| Some(msg.id.index) == start_index.checked_add(i as u64));
        if replicates.len() as u64 != expected || !contiguous {
            return Err(LogError::NotFound(format!(
                "replicates {start_index}..={end_index} not all present (found {})",
                replicates.len()
            )));
        }
        Ok(replicates)
    }

    // =========================================================================
    // Writer-side Mutation
    // =========================================================================

    /// Publish a newly created segment at the end of the list
    pub fn append_segment(&self, segment: Arc<ReadableSegment>) -> Result<()> {
        let mut guard = self.segments.lock();
        if let Some(last) = guard.last() {
            if segment.sequence_number() != last.sequence_number() + 1 {
                return Err(LogError::IllegalState(format!(
                    "segment {} does not follow {}",
                    segment.sequence_number(),
                    last.sequence_number()
                )));
            }
        }
        let mut next = Vec::with_capacity(guard.len() + 1);
        next.extend(guard.iter().cloned());
        next.push(segment);
        *guard = Arc::new(next);
        Ok(())
    }

    /// Swap the last segment's handle (e.g. for its sealed reopening)
    pub fn replace_last_segment(&self, segment: Arc<ReadableSegment>) -> Result<()> {
        let mut guard = self.segments.lock();
        match guard.last() {
            Some(last) if last.sequence_number() == segment.sequence_number() => {}
            _ => {
                return Err(LogError::IllegalState(format!(
                    "segment {} is not the last segment",
                    segment.sequence_number()
                )))
            }
        }
        let mut next: Vec<_> = guard.iter().cloned().collect();
        if let Some(last) = next.last_mut() {
            *last = segment;
        }
        *guard = Arc::new(next);
        Ok(())
    }

    /// Forget segments with sequence number `<= sequence_number`.
    ///
    /// Index entries pointing at them are pruned. Files are left on disk;
    /// deleting them is the garbage collector's job.
    pub fn trim_segments_up_to(&self, sequence_number: u64) -> usize {
        let removed = {
            let mut guard = self.segments.lock();
            let kept: Vec<_> = guard
                .iter()
                .filter(|s| s.sequence_number() > sequence_number)
                .cloned()
                .collect();
            let removed = guard.len() - kept.len();
            *guard = Arc::new(kept);
            removed
        };
        if let Some(index) = &self.index {
            index.prune_up_to(sequence_number);
        }
        info!(removed, up_to = sequence_number, "Trimmed log segments");
        removed
    }

    fn require_index(&self) -> Result<&Arc<LogIndex>> {
        self.index
            .as_ref()
            .ok_or_else(|| LogError::IllegalState("log reader was opened without an index".to_string()))
    }
}
