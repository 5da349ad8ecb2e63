//! Message-to-Action Scheduling Pipeline
//!
//! Each cluster node runs one scheduler. It listens to three event sources
//! (local registry changes, bus messages, membership changes) plus a
//! low-frequency sweep timer, translates every input into exactly one typed
//! [`Action`], and executes it. There is no leader: multiple nodes may race
//! on the same entry, and the per-entry lock plus the snapshot re-check in
//! the actions is the sole correctness mechanism.

use super::actions::*;
use super::scanner::OwnershipScanner;
use super::selector::RuntimeSelector;
use crate::bus::bus::MessageBus;
use crate::bus::messages::TaskMessage;
use crate::membership::service::MembershipService;
use crate::membership::types::{MembershipEvent, NodeId};
use crate::registry::map::{RegistryEvent, RegistryEventKind, TaskRegistry};
use crate::registry::types::{TaskId, TaskState};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

/// How often parked (Waiting) entries are re-offered to the selector even
/// without a membership change or explicit reschedule.
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

pub struct Scheduler {
    pub registry: Arc<TaskRegistry>,
    pub bus: Arc<MessageBus>,
    pub membership: Arc<MembershipService>,
    pub selector: Arc<dyn RuntimeSelector>,
    scanner: OwnershipScanner,
}

impl Scheduler {
    pub fn new(
        registry: Arc<TaskRegistry>,
        bus: Arc<MessageBus>,
        membership: Arc<MembershipService>,
        selector: Arc<dyn RuntimeSelector>,
    ) -> Arc<Self> {
        let scanner = OwnershipScanner::new(registry.clone());
        Arc::new(Self {
            registry,
            bus,
            membership,
            selector,
            scanner,
        })
    }

    pub fn local_node_id(&self) -> NodeId {
        self.membership.local_node.id.clone()
    }

    /// Spawns the event loops and returns immediately.
    ///
    /// Subscriptions are taken before spawning, so events fired right after
    /// `start` returns are already captured.
    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting scheduler...");

        let registry_events = self.registry.subscribe();
        let bus_messages = self.bus.subscribe();
        let membership_events = self.membership.subscribe_events();

        let _registry_handle = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.registry_loop(registry_events).await;
            })
        };

        let _bus_handle = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.bus_loop(bus_messages).await;
            })
        };

        let _membership_handle = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.membership_loop(membership_events).await;
            })
        };

        let _sweep_handle = {
            let scheduler = self.clone();
            tokio::spawn(async move {
                scheduler.sweep_loop().await;
            })
        };

        tracing::info!("Scheduler event loops started");
    }

    async fn registry_loop(&self, mut events: broadcast::Receiver<RegistryEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let Some(entry) = self.registry.get_local(&event.task_id) else {
                        continue;
                    };
                    let action = translate_registry_event(&event, entry.state);
                    self.run_action(action).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    // Missed events are repaired by the sweep.
                    tracing::warn!("Registry event stream lagged, missed {}", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn bus_loop(&self, mut messages: broadcast::Receiver<TaskMessage>) {
        loop {
            match messages.recv().await {
                Ok(msg) => {
                    if !self.is_relevant(&msg) {
                        continue;
                    }
                    let state = scheduling_task_id(&msg)
                        .and_then(|id| self.registry.get_local(id))
                        .map(|entry| entry.state);
                    let action = translate_message(&msg, state);
                    self.run_action(action).await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Bus message stream lagged, missed {}", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn membership_loop(&self, mut events: broadcast::Receiver<MembershipEvent>) {
        loop {
            match events.recv().await {
                Ok(event) => {
                    tracing::info!(
                        "Membership changed ({:?} {:?}), rescanning ownership",
                        event.kind,
                        event.node_id
                    );
                    self.scanner.scan().await;
                    self.sweep_parked().await;
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Membership event stream lagged, missed {}", missed);
                    self.scanner.scan().await;
                    self.sweep_parked().await;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    async fn sweep_loop(&self) {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        // The first tick fires immediately; skip it so startup is quiet.
        interval.tick().await;

        loop {
            interval.tick().await;
            self.sweep_parked().await;
        }
    }

    /// Re-offers parked entries to the selector.
    ///
    /// Covers Waiting entries (no runtime was available) and Submitted
    /// entries whose added-event was lost.
    pub async fn sweep_parked(&self) {
        for task_id in self.registry.local_keys() {
            let Some(entry) = self.registry.get_local(&task_id) else {
                continue;
            };
            if !matches!(entry.state, TaskState::Waiting | TaskState::Submitted) {
                continue;
            }

            tracing::debug!("Sweep re-evaluating task {} ({:?})", task_id, entry.state);
            self.run_action(Action::Schedule(ScheduleTaskAction { task_id }))
                .await;
        }
    }

    /// Executes one action, absorbing failures locally; event handlers have
    /// no caller to surface errors to.
    pub async fn run_action(&self, action: Action) {
        if matches!(action, Action::Noop) {
            return;
        }
        tracing::debug!("Executing action: {:?}", action);
        if let Err(e) = action.execute(self).await {
            tracing::error!("Action failed: {}", e);
        }
    }

    /// Drops inputs this node must not act on: task-scoped messages belong to
    /// the node currently primary for the task's partition, run/kill requests
    /// belong to the runtime engine.
    fn is_relevant(&self, msg: &TaskMessage) -> bool {
        match msg {
            TaskMessage::RunTask { .. } | TaskMessage::KillTask { .. } => false,
            TaskMessage::RunContext { .. } => true,
            _ => match scheduling_task_id(msg) {
                Some(task_id) => {
                    let partition = self.registry.partitioner.get_partition(&task_id.0);
                    self.registry.partitioner.is_local_primary(partition)
                }
                None => false,
            },
        }
    }
}

/// The task a scheduling or lifecycle message refers to.
fn scheduling_task_id(msg: &TaskMessage) -> Option<&TaskId> {
    match msg {
        TaskMessage::Schedule { task_id }
        | TaskMessage::Reschedule { task_id }
        | TaskMessage::CheckSchedulability { task_id }
        | TaskMessage::Abort { task_id, .. }
        | TaskMessage::NewOwner { task_id, .. }
        | TaskMessage::TaskStarted { task_id, .. }
        | TaskMessage::TaskFinished { task_id, .. }
        | TaskMessage::TaskKilled { task_id, .. } => Some(task_id),
        TaskMessage::RunTask { .. }
        | TaskMessage::KillTask { .. }
        | TaskMessage::RunContext { .. } => None,
    }
}

/// Translates a local registry change into an action.
///
/// Only a fresh Submitted entry triggers scheduling; updates to entries in
/// any other state are the scheduler's own writes echoing back.
pub fn translate_registry_event(event: &RegistryEvent, state: TaskState) -> Action {
    match (event.kind, state) {
        (RegistryEventKind::Added, TaskState::Submitted)
        | (RegistryEventKind::Updated, TaskState::Submitted) => {
            Action::Schedule(ScheduleTaskAction {
                task_id: event.task_id.clone(),
            })
        }
        _ => Action::Noop,
    }
}

/// Translates a bus message into an action, given the current state of the
/// referenced entry (`None` when the entry is not held locally).
pub fn translate_message(msg: &TaskMessage, state: Option<TaskState>) -> Action {
    match msg {
        TaskMessage::Schedule { task_id }
        | TaskMessage::Reschedule { task_id }
        | TaskMessage::CheckSchedulability { task_id } => match state {
            Some(s) if s.is_schedulable() => Action::Schedule(ScheduleTaskAction {
                task_id: task_id.clone(),
            }),
            _ => Action::Noop,
        },

        TaskMessage::Abort { task_id, reason } => match state {
            Some(s) if !s.is_terminal() => Action::Abort(AbortTaskAction {
                task_id: task_id.clone(),
                reason: reason.clone(),
            }),
            _ => Action::Noop,
        },

        TaskMessage::NewOwner { task_id, owner_id } => Action::ChangeOwner(ChangeOwnerAction {
            task_id: task_id.clone(),
            owner_id: owner_id.clone(),
        }),

        TaskMessage::RunContext { context } => Action::RunContext(RunContextAction {
            context: context.clone(),
        }),

        TaskMessage::TaskStarted {
            task_id,
            runtime_id,
        } => match state {
            Some(s) if !s.is_terminal() => Action::Transition(TransitionTaskAction {
                task_id: task_id.clone(),
                target: TaskState::Running,
                reason: format!("started on runtime {}", runtime_id),
            }),
            _ => Action::Noop,
        },

        TaskMessage::TaskFinished {
            task_id,
            runtime_id,
            error,
        } => match state {
            Some(s) if !s.is_terminal() => Action::Transition(TransitionTaskAction {
                task_id: task_id.clone(),
                target: TaskState::Finished,
                reason: match error {
                    Some(error) => format!("failed on runtime {}: {}", runtime_id, error),
                    None => format!("completed on runtime {}", runtime_id),
                },
            }),
            _ => Action::Noop,
        },

        TaskMessage::TaskKilled {
            task_id,
            runtime_id,
            ..
        } => match state {
            Some(s) if !s.is_terminal() => Action::Abort(AbortTaskAction {
                task_id: task_id.clone(),
                reason: format!("killed on runtime {}", runtime_id),
            }),
            _ => Action::Noop,
        },

        // Runtime-engine messages; never acted on here.
        TaskMessage::RunTask { .. } | TaskMessage::KillTask { .. } => Action::Noop,
    }
}
