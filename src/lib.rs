//! # oplog
//!
//! A durable, replicated operation log for a tablet:
//! - Segmented, checksummed log files with crash-torn tail tolerance
//! - Footers summarizing sealed segments
//! - An OpId index for point lookups without replay
//! - Snapshot reads that never block on segment rotation
//! - Decoding of row operations carried by WRITE replicates
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LogWriter                            │
//! │              (append, roll over, seal, recover)             │
//! └──────────────┬───────────────────────────────┬──────────────┘
//!                │ publishes segments            │ records ids
//!                ▼                               ▼
//! ┌──────────────────────────────┐      ┌──────────────────────┐
//! │          LogReader           │─────▶│       LogIndex       │
//! │ (Arc<Vec<..>> snapshots)     │      │  OpId → (seq, off)   │
//! └──────────────┬───────────────┘      └──────────────────────┘
//!                │
//!                ▼
//! ┌──────────────────────────────┐      ┌──────────────────────┐
//! │       ReadableSegment        │      │ RowOperationsDecoder │
//! │ header / frames / footer     │      │   (decodes into an   │
//! └──────────────────────────────┘      │        Arena)        │
//!                                       └──────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod opid;
pub mod schema;
pub mod arena;
pub mod log;
pub mod row_ops;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{LogError, Result};
pub use config::{LogConfig, SyncStrategy};
pub use opid::OpId;
pub use schema::{ColumnSchema, DataType, Schema, Value};
pub use arena::Arena;
pub use log::{LogEntry, LogIndex, LogReader, LogWriter, ReadableSegment};
pub use row_ops::{DecodedRowOperation, RowOperations, RowOperationsDecoder};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of oplog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
