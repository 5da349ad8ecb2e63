use crate::membership::types::NodeId;
use crate::registry::types::TaskId;
use serde::{Deserialize, Serialize};

/// The control and lifecycle messages exchanged over the bus.
///
/// Every message is broadcast to the whole cluster; receivers filter locally.
/// A `receiver_id` of `None` means "relevant to whichever node owns the
/// task's partition"; a concrete `receiver_id` addresses one node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum TaskMessage {
    /// Request an execution node to run a task.
    RunTask {
        sender_id: NodeId,
        receiver_id: Option<NodeId>,
        task_id: TaskId,
    },

    /// Request termination of a running task, by name.
    KillTask { task_name: String },

    /// The runtime node spawned the process.
    TaskStarted { task_id: TaskId, runtime_id: NodeId },

    /// The process exited; `error` is set on spawn failure or non-zero exit.
    TaskFinished {
        task_id: TaskId,
        runtime_id: NodeId,
        error: Option<String>,
    },

    /// The process was killed on request.
    TaskKilled {
        task_id: TaskId,
        runtime_id: NodeId,
        task_name: String,
    },

    // --- Scheduling-internal control messages (never sent by collaborators) ---
    /// Evaluate a task for scheduling.
    Schedule { task_id: TaskId },

    /// Re-run the scheduling decision for a task that may already be placed.
    Reschedule { task_id: TaskId },

    /// Probe whether a runtime exists for the task; parks it as waiting if not.
    CheckSchedulability { task_id: TaskId },

    /// Abort a task with a reason.
    Abort { task_id: TaskId, reason: String },

    /// Record a new owning node for a task's entry.
    NewOwner { task_id: TaskId, owner_id: NodeId },

    /// (Re)schedule every task belonging to the named context.
    RunContext { context: String },
}

impl TaskMessage {
    /// The node a message is addressed to, when it is not a broadcast.
    pub fn receiver(&self) -> Option<&NodeId> {
        match self {
            TaskMessage::RunTask { receiver_id, .. } => receiver_id.as_ref(),
            _ => None,
        }
    }
}
