//! Registry Network Protocol
//!
//! Defines the API endpoints and Data Transfer Objects (DTOs) used for
//! inter-node registry communication (submission, forwarding, replication,
//! locking, anti-entropy) plus the collaborator-facing status API.

use super::types::{TaskDescriptor, TaskEntry, TaskId, TaskState, Transition};
use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};

// --- API Endpoints ---

/// Public endpoint for task submission.
pub const ENDPOINT_TASK_SUBMIT: &str = "/task/submit";
/// Public endpoint for task status queries.
pub const ENDPOINT_TASK_STATUS: &str = "/task/status";
/// Internal endpoint for submissions forwarded to the partition Primary.
pub const ENDPOINT_TASK_INTERNAL_SUBMIT: &str = "/internal/task/submit";
/// Internal endpoint for direct entry retrieval (bypassing routing logic).
pub const ENDPOINT_TASK_INTERNAL_GET: &str = "/internal/task/get";
/// Internal endpoint for writes routed to the partition Primary.
pub const ENDPOINT_TASK_PUT: &str = "/internal/task/put";
/// Internal endpoint for Primary-to-Backup synchronization.
pub const ENDPOINT_TASK_REPLICATE: &str = "/internal/task/replicate";
/// Internal endpoint for bulk partition transfer (anti-entropy).
pub const ENDPOINT_TASK_PARTITION_DUMP: &str = "/internal/task/partition";
/// Internal endpoint for per-entry lock acquisition (long-poll).
pub const ENDPOINT_TASK_LOCK: &str = "/internal/task/lock";
/// Internal endpoint for per-entry lock release.
pub const ENDPOINT_TASK_UNLOCK: &str = "/internal/task/unlock";

// --- Data Transfer Objects ---

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    pub descriptor: TaskDescriptor,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: Option<TaskId>,
}

/// A fully-formed entry forwarded to the partition Primary by the node that
/// accepted the submission.
#[derive(Debug, Serialize, Deserialize)]
pub struct ForwardEntryRequest {
    pub partition: u32,
    pub entry: TaskEntry,
}

/// A modified entry routed to the partition Primary for write-back.
///
/// Includes the `op_id` so retried requests do not cause duplicate
/// replication fan-out.
#[derive(Debug, Serialize, Deserialize)]
pub struct PutEntryRequest {
    pub partition: u32,
    pub op_id: String,
    pub entry: TaskEntry,
}

/// Payload for synchronizing an entry from a Primary to a Backup node.
#[derive(Debug, Serialize, Deserialize)]
pub struct ReplicateEntryRequest {
    pub partition: u32,
    pub op_id: String,
    pub entry: TaskEntry,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct GetEntryResponse {
    pub entry: Option<TaskEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PutResponse {
    pub success: bool,
}

/// Collaborator-facing task status report.
#[derive(Debug, Serialize, Deserialize)]
pub struct TaskStatusResponse {
    pub task_id: TaskId,
    pub state: TaskState,
    pub owner_id: Option<NodeId>,
    pub runtime_id: Option<NodeId>,
    pub transitions: Vec<Transition>,
}

/// Response format for partition dump requests (anti-entropy).
#[derive(Debug, Serialize, Deserialize)]
pub struct PartitionDumpResponse {
    pub partition: u32,
    pub entries: Vec<TaskEntry>,
}

/// Per-entry lock acquisition, sent to the partition Primary.
///
/// The Primary holds the request open until the lock is granted or
/// `timeout_ms` elapses.
#[derive(Debug, Serialize, Deserialize)]
pub struct LockRequest {
    pub task_id: TaskId,
    pub holder: NodeId,
    pub timeout_ms: u64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LockResponse {
    pub granted: bool,
    /// Snapshot read under the lock; the caller's optimistic-concurrency
    /// comparison value.
    pub entry: Option<TaskEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UnlockRequest {
    pub task_id: TaskId,
    pub holder: NodeId,
}
