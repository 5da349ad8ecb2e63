use crate::membership::types::NodeId;
use serde::{Deserialize, Serialize};

/// Unique identifier for a task within the cluster.
///
/// Wrapper around a UUID string to ensure global uniqueness.
/// This ID is hashed to determine which partition (and thus which node) owns the task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct TaskId(pub String);

impl TaskId {
    /// Generates a new random UUID v4-based TaskId.
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

/// Represents the lifecycle state of a task in the registry.
///
/// States form a DAG: once a task leaves `Submitted` it never returns, and
/// `Finished`/`Aborted` are terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TaskState {
    /// Task has been created but no scheduling decision has been made yet.
    Submitted,
    /// Task has been validated by an external submitter and handed over.
    Accepted,
    /// A runtime node has been assigned; a run request is (or will be) on the bus.
    Scheduled,
    /// No suitable runtime node was available; the task is parked until the
    /// next membership change or reschedule trigger.
    Waiting,
    /// The runtime node reported the process as started.
    Running,
    /// The process exited (successfully or not; see the transition reason).
    Finished,
    /// The task was aborted or its process was killed.
    Aborted,
}

impl TaskState {
    /// Terminal states accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Finished | TaskState::Aborted)
    }

    /// States from which a (re)schedule attempt is legal.
    pub fn is_schedulable(&self) -> bool {
        matches!(
            self,
            TaskState::Submitted | TaskState::Accepted | TaskState::Waiting | TaskState::Scheduled
        )
    }

    /// Encodes the state transition DAG.
    ///
    /// `Scheduled -> Scheduled` is allowed so an explicit reschedule can move
    /// a task to a different runtime node. No edge re-enters `Submitted`.
    pub fn can_transition_to(&self, next: TaskState) -> bool {
        use TaskState::*;
        match self {
            Submitted => matches!(next, Accepted | Scheduled | Waiting | Aborted),
            Accepted => matches!(next, Scheduled | Waiting | Aborted),
            Scheduled => matches!(next, Scheduled | Running | Waiting | Finished | Aborted),
            Waiting => matches!(next, Scheduled | Aborted),
            Running => matches!(next, Finished | Aborted),
            Finished | Aborted => false,
        }
    }
}

/// The definition of a unit of work: which external process to launch.
///
/// Opaque to the scheduling pipeline; only the runtime node interprets it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskDescriptor {
    /// Cluster-wide task name. At most one process per name runs concurrently
    /// on any single runtime node.
    pub name: String,
    /// The program to launch.
    pub command: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// Optional grouping key; a run-context message schedules every task of
    /// the named context.
    pub context: Option<String>,
}

/// One entry of the append-only transition log.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Transition {
    pub state: TaskState,
    pub reason: String,
    /// Timestamp (ms) when the transition was applied.
    pub at: u64,
}

/// The persisted record of one schedulable unit of work.
///
/// This structure is what gets partitioned and replicated across nodes.
/// All mutations after creation go through [`TaskEntry::transition`] while
/// the per-entry lock is held; equality comparison of two snapshots is the
/// optimistic concurrency check.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskEntry {
    pub id: TaskId,
    /// Immutable after creation.
    pub descriptor: TaskDescriptor,
    pub state: TaskState,
    /// The cluster node currently responsible for this entry's partition.
    /// `None` until a scheduler first claims the entry; repaired by the
    /// ownership scanner after partition moves.
    pub owner_id: Option<NodeId>,
    /// The runtime node chosen to run this task. Non-`None` exactly while the
    /// state is `Scheduled`, `Running` or `Finished`.
    pub runtime_id: Option<NodeId>,
    /// Append-only ordered log of every state change.
    pub transitions: Vec<Transition>,
}

impl TaskEntry {
    /// Creates a fresh entry in `Submitted` state with one log record.
    pub fn new(descriptor: TaskDescriptor) -> Self {
        Self {
            id: TaskId::new(),
            descriptor,
            state: TaskState::Submitted,
            owner_id: None,
            runtime_id: None,
            transitions: vec![Transition {
                state: TaskState::Submitted,
                reason: "submitted".to_string(),
                at: now_ms(),
            }],
        }
    }

    /// Applies a state transition, appending to the transition log.
    ///
    /// Fails if the DAG forbids the edge. Entering any state other than
    /// `Scheduled`/`Running`/`Finished` clears `runtime_id`; the caller sets
    /// it when assigning a runtime on entry into `Scheduled`.
    pub fn transition(&mut self, next: TaskState, reason: impl Into<String>) -> anyhow::Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(anyhow::anyhow!(
                "illegal transition {:?} -> {:?} for task {}",
                self.state,
                next,
                self.id
            ));
        }

        self.state = next;
        if !matches!(
            next,
            TaskState::Scheduled | TaskState::Running | TaskState::Finished
        ) {
            self.runtime_id = None;
        }
        self.transitions.push(Transition {
            state: next,
            reason: reason.into(),
            at: now_ms(),
        });

        Ok(())
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}

/// Helper to get the current system time in milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
