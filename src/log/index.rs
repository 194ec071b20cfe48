//! Log index
//!
//! Maps the id of every REPLICATE to the segment and byte offset holding it,
//! so a single operation can be fetched without replaying the log. The index
//! is derived data: it can always be rebuilt by scanning segments in order.
//! COMMIT entries are not indexed; their `committed_id` names a REPLICATE that
//! is indexed under its own location.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::Path;

use bytes::{Buf, BufMut};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{LogError, Result};
use crate::opid::OpId;

use super::segment::SegmentScan;

/// Magic bytes identifying a persisted index file
const INDEX_MAGIC: &[u8; 4] = b"OPLI";

/// Magic (4) + CRC32 (4)
const INDEX_HEADER_SIZE: usize = 8;

/// Location of one REPLICATE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub segment_sequence: u64,
    pub offset: u64,
}

impl fmt::Display for IndexEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "segment {} offset {}", self.segment_sequence, self.offset)
    }
}

/// OpId → location map shared by readers and the writer
#[derive(Debug, Default)]
pub struct LogIndex {
    entries: RwLock<BTreeMap<OpId, IndexEntry>>,
}

impl LogIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record where `op_id` lives.
    ///
    /// Recording the same location twice is a no-op. Recording a different
    /// location for an id already present is an `IndexConflict`.
    pub fn record(&self, op_id: OpId, segment_sequence: u64, offset: u64) -> Result<()> {
        let location = IndexEntry {
            segment_sequence,
            offset,
        };
        let mut entries = self.entries.write();
        match entries.get(&op_id) {
            Some(existing) if *existing == location => Ok(()),
            Some(existing) => Err(LogError::IndexConflict {
                op_id,
                existing: existing.to_string(),
                attempted: location.to_string(),
            }),
            None => {
                entries.insert(op_id, location);
                Ok(())
            }
        }
    }

    /// Record every REPLICATE found by a segment scan
    pub fn record_scan(&self, segment_sequence: u64, scan: &SegmentScan) -> Result<usize> {
        let mut recorded = 0;
        for scanned in &scan.entries {
            if let Some(id) = scanned.entry.replicate_id() {
                self.record(id, segment_sequence, scanned.offset)?;
                recorded += 1;
            }
        }
        Ok(recorded)
    }

    /// Exact-match lookup
    pub fn lookup(&self, op_id: OpId) -> Result<IndexEntry> {
        self.entries
            .read()
            .get(&op_id)
            .copied()
            .ok_or_else(|| LogError::NotFound(format!("op {op_id} is not indexed")))
    }

    /// Drop every entry pointing at `segment_sequence`
    pub fn prune(&self, segment_sequence: u64) -> usize {
        self.retain(|entry| entry.segment_sequence != segment_sequence)
    }

    /// Drop every entry pointing at segments up to and including `segment_sequence`
    pub fn prune_up_to(&self, segment_sequence: u64) -> usize {
        self.retain(|entry| entry.segment_sequence > segment_sequence)
    }

    fn retain(&self, keep: impl Fn(&IndexEntry) -> bool) -> usize {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|_, entry| keep(entry));
        let removed = before - entries.len();
        debug!(removed, remaining = entries.len(), "Pruned log index");
        removed
    }

    /// Drop everything, before a rebuild from scratch
    pub fn clear(&self) {
        self.entries.write().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    // =========================================================================
    // Side File
    // =========================================================================

    /// Persist the index as `[magic][crc32][bincode entries]`
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot: Vec<(OpId, IndexEntry)> =
            self.entries.read().iter().map(|(k, v)| (*k, *v)).collect();
        let payload = bincode::serialize(&snapshot)?;

        let mut buf = Vec::with_capacity(INDEX_HEADER_SIZE + payload.len());
        buf.put_slice(INDEX_MAGIC);
        buf.put_u32_le(crc32fast::hash(&payload));
        buf.put_slice(&payload);

        let tmp = path.with_extension("tmp");
        fs::write(&tmp, &buf)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), entries = snapshot.len(), "Saved log index");
        Ok(())
    }

    /// Load an index written by `save`
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        if data.len() < INDEX_HEADER_SIZE || &data[0..4] != INDEX_MAGIC {
            return Err(LogError::Serialization(format!(
                "{} is not a log index file",
                path.display()
            )));
        }
        let mut crc_bytes = &data[4..INDEX_HEADER_SIZE];
        let stored_crc = crc_bytes.get_u32_le();
        let payload = &data[INDEX_HEADER_SIZE..];
        if crc32fast::hash(payload) != stored_crc {
            return Err(LogError::Serialization(format!(
                "checksum mismatch in log index {}",
                path.display()
            )));
        }

        let snapshot: Vec<(OpId, IndexEntry)> = bincode::deserialize(payload)?;
        Ok(Self {
            entries: RwLock::new(snapshot.into_iter().collect()),
        })
    }
}
