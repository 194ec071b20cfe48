//! Log entry definitions
//!
//! Defines the two kinds of logged unit and the write-request envelope that
//! WRITE replicates carry.

use serde::{Deserialize, Serialize};

use crate::error::{LogError, Result};
use crate::opid::OpId;
use crate::row_ops::RowOperations;
use crate::schema::Schema;

/// A single entry in a log segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LogEntry {
    /// A proposed operation
    Replicate(ReplicateMsg),

    /// Acknowledgement that an earlier REPLICATE was applied
    Commit(CommitMsg),
}

impl LogEntry {
    pub fn replicate(
        id: OpId,
        timestamp: u64,
        op_type: OperationType,
        payload: Vec<u8>,
    ) -> Self {
        LogEntry::Replicate(ReplicateMsg {
            id,
            timestamp,
            op_type,
            payload,
        })
    }

    pub fn commit(committed_id: OpId) -> Self {
        LogEntry::Commit(CommitMsg { committed_id })
    }

    /// Id of the operation this entry proposes, `None` for COMMIT
    pub fn replicate_id(&self) -> Option<OpId> {
        match self {
            LogEntry::Replicate(msg) => Some(msg.id),
            LogEntry::Commit(_) => None,
        }
    }

    /// The id this entry is about: proposed id or committed id
    pub fn op_id(&self) -> OpId {
        match self {
            LogEntry::Replicate(msg) => msg.id,
            LogEntry::Commit(msg) => msg.committed_id,
        }
    }

    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

/// Kind of replicated operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    NoOp,
    Write,
    AlterSchema,
    ChangeConfig,
}

impl OperationType {
    pub fn name(self) -> &'static str {
        match self {
            OperationType::NoOp => "NO_OP",
            OperationType::Write => "WRITE_OP",
            OperationType::AlterSchema => "ALTER_SCHEMA_OP",
            OperationType::ChangeConfig => "CHANGE_CONFIG_OP",
        }
    }
}

/// A proposed operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicateMsg {
    /// Strictly increasing within one log
    pub id: OpId,

    /// Hybrid timestamp assigned by the leader
    pub timestamp: u64,

    pub op_type: OperationType,

    /// Operation-specific body; a bincode `WriteRequest` for `Write`
    pub payload: Vec<u8>,
}

impl ReplicateMsg {
    /// Decode the write-request envelope of a WRITE replicate
    pub fn write_request(&self) -> Result<WriteRequest> {
        if self.op_type != OperationType::Write {
            return Err(LogError::InvalidArgument(format!(
                "replicate {} is {}, not a write",
                self.id,
                self.op_type.name()
            )));
        }
        WriteRequest::decode(&self.payload)
    }
}

/// Acknowledgement of an earlier replicate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitMsg {
    pub committed_id: OpId,
}

/// How a write must be ordered relative to other clients' writes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExternalConsistencyMode {
    ClientPropagated,
    CommitWait,
}

impl ExternalConsistencyMode {
    pub fn name(self) -> &'static str {
        match self {
            ExternalConsistencyMode::ClientPropagated => "CLIENT_PROPAGATED",
            ExternalConsistencyMode::CommitWait => "COMMIT_WAIT",
        }
    }
}

/// Envelope of a WRITE operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WriteRequest {
    pub tablet_id: String,

    /// Schema the client encoded `row_operations` with
    pub schema: Schema,

    pub row_operations: RowOperations,

    pub consistency_mode: ExternalConsistencyMode,

    pub propagated_timestamp: Option<u64>,
}

impl WriteRequest {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| LogError::InvalidArgument(format!("unparseable write request: {e}")))
    }
}
