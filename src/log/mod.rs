//! Segmented Operation Log
//!
//! Provides durable, ordered storage of replicated operations.
//!
//! ## Responsibilities
//! - Append REPLICATE / COMMIT entries to the active segment
//! - CRC32 checksums on every entry frame
//! - Seal segments with a footer summarizing their contents
//! - Tolerate a crash-torn tail on the unsealed segment
//! - Locate any REPLICATE by OpId without replay
//!
//! ## File Format
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ Preamble                                                 │
//! │ ┌───────────┬─────────────┐                              │
//! │ │ Magic (4) │ Version (4) │                              │
//! │ └───────────┴─────────────┘                              │
//! ├──────────────────────────────────────────────────────────┤
//! │ Header                                                   │
//! │ ┌─────────────────┬────────────────────────────────────┐ │
//! │ │ Len (varint)    │ SegmentHeader (bincode)            │ │
//! │ └─────────────────┴────────────────────────────────────┘ │
//! ├──────────────────────────────────────────────────────────┤
//! │ Entry frames (repeated)                                  │
//! │ ┌─────────────────┬─────────────────────┬─────────────┐  │
//! │ │ Len (varint)    │ LogEntry (bincode)  │ CRC32 (4)   │  │
//! │ └─────────────────┴─────────────────────┴─────────────┘  │
//! ├──────────────────────────────────────────────────────────┤
//! │ Footer (sealed segments only)                            │
//! │ ┌───────────────────┬─────────┬─────────┬────────────┐   │
//! │ │ SegmentFooter     │ CRC (4) │ Len (4) │ Magic (4)  │   │
//! │ └───────────────────┴─────────┴─────────┴────────────┘   │
//! └──────────────────────────────────────────────────────────┘
//! ```
//! The footer ends with a fixed-size trailer so it can be found from the end
//! of the file. All fixed-width integers are little-endian.

mod entry;
mod format;
mod index;
mod reader;
mod segment;
mod writer;

pub use entry::{
    CommitMsg, ExternalConsistencyMode, LogEntry, OperationType, ReplicateMsg, WriteRequest,
};
pub use format::{
    decode_header, encode_footer, encode_frame, encode_header, SegmentFooter, SegmentHeader,
    FOOTER_MAGIC, FORMAT_VERSION, SEGMENT_MAGIC,
};
pub use index::{IndexEntry, LogIndex};
pub use reader::{
    parse_segment_filename, segment_filename, LogIssue, LogReader, SegmentSequence,
    SEGMENT_PREFIX,
};
pub use segment::{ReadableSegment, ScannedEntry, SegmentScan, SegmentState, TailDamage};
pub use writer::{seal_recovered_segment, LogWriter, WritableSegment};

/// Name of the side index file inside a log directory
pub const INDEX_FILENAME: &str = "index.bin";

/// Suffix given to an unreadable segment the writer moves out of the way
pub const CORRUPT_SUFFIX: &str = ".corrupt";
