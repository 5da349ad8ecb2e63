//! Typed scheduling actions.
//!
//! Every scheduler input (registry change, bus message) is translated into
//! exactly one [`Action`] value, then executed. Actions that mutate an entry
//! follow the guarded read-modify-write discipline: acquire the per-entry
//! lock with a bounded timeout, re-read under the lock, compare against the
//! pre-lock snapshot where a scheduling decision was derived from it, write
//! back, unlock on every exit path.

use super::scheduler::Scheduler;
use crate::bus::messages::TaskMessage;
use crate::membership::types::NodeId;
use crate::registry::map::DEFAULT_LOCK_TIMEOUT;
use crate::registry::types::{TaskId, TaskState};

use anyhow::Result;

/// The scheduling decision derived from one input.
#[derive(Debug)]
pub enum Action {
    Schedule(ScheduleTaskAction),
    Abort(AbortTaskAction),
    Transition(TransitionTaskAction),
    ChangeOwner(ChangeOwnerAction),
    RunContext(RunContextAction),
    Noop,
}

impl Action {
    pub async fn execute(self, scheduler: &Scheduler) -> Result<()> {
        match self {
            Action::Schedule(action) => action.execute(scheduler).await,
            Action::Abort(action) => action.execute(scheduler).await,
            Action::Transition(action) => action.execute(scheduler).await,
            Action::ChangeOwner(action) => action.execute(scheduler).await,
            Action::RunContext(action) => action.execute(scheduler).await,
            Action::Noop => Ok(()),
        }
    }
}

/// Assign a runtime node to a task and announce the run over the bus.
#[derive(Debug)]
pub struct ScheduleTaskAction {
    pub task_id: TaskId,
}

impl ScheduleTaskAction {
    /// Runs the scheduling decision for one task.
    ///
    /// 1. Snapshot-read the entry and ask the selector for a runtime node.
    /// 2. Acquire the per-entry lock (bounded); a timeout is logged and
    ///    dropped, a later event retries naturally.
    /// 3. Re-read under the lock; abandon if another node raced ahead.
    /// 4. Transition to Scheduled, record the runtime, write back.
    /// 5. Unlock, then publish the run request. Publishing strictly follows
    ///    the unlock and the durable write so the runtime node can never
    ///    outrun the registry's record of the assignment.
    ///
    /// With no runtime available the entry is parked as Waiting instead and
    /// reconsidered at the next registry change or membership event.
    pub async fn execute(&self, scheduler: &Scheduler) -> Result<()> {
        let registry = &scheduler.registry;

        let Some(snapshot) = registry.get(&self.task_id).await else {
            tracing::debug!("Task {} no longer exists, nothing to schedule", self.task_id);
            return Ok(());
        };
        if !snapshot.state.is_schedulable() {
            return Ok(());
        }

        let candidates = scheduler.membership.get_runtime_members();
        match scheduler.selector.select(&snapshot, &candidates) {
            Ok(runtime) => {
                let locked = match registry
                    .try_lock_and_get(&self.task_id, DEFAULT_LOCK_TIMEOUT)
                    .await
                {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("Could not lock task {}: {}", self.task_id, e);
                        return Ok(());
                    }
                };

                if locked != snapshot {
                    tracing::debug!(
                        "Task {} changed since snapshot, abandoning schedule attempt",
                        self.task_id
                    );
                    registry.unlock(&self.task_id).await;
                    return Ok(());
                }

                let mut entry = locked;
                match entry.transition(
                    TaskState::Scheduled,
                    format!("assigned to runtime {}", runtime.id),
                ) {
                    Ok(()) => {
                        entry.runtime_id = Some(runtime.id.clone());
                        entry.owner_id = Some(scheduler.local_node_id());
                        if let Err(e) = registry.put(entry).await {
                            tracing::error!("Failed to write scheduled task {}: {}", self.task_id, e);
                            registry.unlock(&self.task_id).await;
                            return Ok(());
                        }
                        registry.unlock(&self.task_id).await;

                        scheduler.bus.publish(TaskMessage::RunTask {
                            sender_id: scheduler.local_node_id(),
                            receiver_id: Some(runtime.id.clone()),
                            task_id: self.task_id.clone(),
                        });
                        tracing::info!(
                            "Scheduled task {} onto runtime {}",
                            self.task_id,
                            runtime.id
                        );
                    }
                    Err(e) => {
                        tracing::debug!("Schedule of task {} rejected: {}", self.task_id, e);
                        registry.unlock(&self.task_id).await;
                    }
                }

                Ok(())
            }
            Err(_) => {
                // No runtime available: park the entry as Waiting under the
                // same guarded discipline.
                let locked = match registry
                    .try_lock_and_get(&self.task_id, DEFAULT_LOCK_TIMEOUT)
                    .await
                {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!("Could not lock task {}: {}", self.task_id, e);
                        return Ok(());
                    }
                };

                if locked != snapshot {
                    registry.unlock(&self.task_id).await;
                    return Ok(());
                }

                if locked.state != TaskState::Waiting {
                    let mut entry = locked;
                    match entry.transition(TaskState::Waiting, "no suitable host found") {
                        Ok(()) => {
                            entry.owner_id = Some(scheduler.local_node_id());
                            if let Err(e) = registry.put(entry).await {
                                tracing::error!(
                                    "Failed to park task {} as waiting: {}",
                                    self.task_id,
                                    e
                                );
                            } else {
                                tracing::info!("Task {} is waiting for a runtime", self.task_id);
                            }
                        }
                        Err(e) => {
                            tracing::debug!("Task {} cannot wait: {}", self.task_id, e);
                        }
                    }
                }
                registry.unlock(&self.task_id).await;

                Ok(())
            }
        }
    }
}

/// Move a task into the terminal Aborted state.
#[derive(Debug)]
pub struct AbortTaskAction {
    pub task_id: TaskId,
    pub reason: String,
}

impl AbortTaskAction {
    /// Idempotent: aborting an already-terminal entry is a no-op and the
    /// first reason wins.
    pub async fn execute(&self, scheduler: &Scheduler) -> Result<()> {
        let registry = &scheduler.registry;

        let locked = match registry
            .try_lock_and_get(&self.task_id, DEFAULT_LOCK_TIMEOUT)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Could not lock task {}: {}", self.task_id, e);
                return Ok(());
            }
        };

        if !locked.is_terminal() {
            let mut entry = locked;
            match entry.transition(TaskState::Aborted, self.reason.clone()) {
                Ok(()) => {
                    entry.owner_id = Some(scheduler.local_node_id());
                    if let Err(e) = registry.put(entry).await {
                        tracing::error!("Failed to write aborted task {}: {}", self.task_id, e);
                    } else {
                        tracing::info!("Aborted task {}: {}", self.task_id, self.reason);
                    }
                }
                Err(e) => {
                    tracing::debug!("Abort of task {} rejected: {}", self.task_id, e);
                }
            }
        }
        registry.unlock(&self.task_id).await;

        Ok(())
    }
}

/// Apply a lifecycle transition reported by a runtime node.
#[derive(Debug)]
pub struct TransitionTaskAction {
    pub task_id: TaskId,
    pub target: TaskState,
    pub reason: String,
}

impl TransitionTaskAction {
    pub async fn execute(&self, scheduler: &Scheduler) -> Result<()> {
        let registry = &scheduler.registry;

        let locked = match registry
            .try_lock_and_get(&self.task_id, DEFAULT_LOCK_TIMEOUT)
            .await
        {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!("Could not lock task {}: {}", self.task_id, e);
                return Ok(());
            }
        };

        if locked.state.can_transition_to(self.target) {
            let mut entry = locked;
            if entry
                .transition(self.target, self.reason.clone())
                .is_ok()
            {
                entry.owner_id = Some(scheduler.local_node_id());
                if let Err(e) = registry.put(entry).await {
                    tracing::error!("Failed to write task {}: {}", self.task_id, e);
                } else {
                    tracing::info!(
                        "Task {} is now {:?} ({})",
                        self.task_id,
                        self.target,
                        self.reason
                    );
                }
            }
        } else {
            tracing::debug!(
                "Ignoring {:?} report for task {} in state {:?}",
                self.target,
                self.task_id,
                locked.state
            );
        }
        registry.unlock(&self.task_id).await;

        Ok(())
    }
}

/// Rewrite the owning node recorded on an entry.
///
/// A best-effort, unlocked repair: ownership alone does not change
/// scheduling state, so it does not need the guarded transition path.
#[derive(Debug)]
pub struct ChangeOwnerAction {
    pub task_id: TaskId,
    pub owner_id: NodeId,
}

impl ChangeOwnerAction {
    pub async fn execute(&self, scheduler: &Scheduler) -> Result<()> {
        let registry = &scheduler.registry;

        let Some(mut entry) = registry.get_local(&self.task_id) else {
            tracing::debug!("Task {} not held locally, owner unchanged", self.task_id);
            return Ok(());
        };

        if entry.owner_id.as_ref() == Some(&self.owner_id) {
            return Ok(());
        }

        entry.owner_id = Some(self.owner_id.clone());
        registry.put(entry).await?;
        tracing::info!("Task {} owner set to {}", self.task_id, self.owner_id);

        Ok(())
    }
}

/// (Re)schedule every locally-owned, schedulable task of a context.
#[derive(Debug)]
pub struct RunContextAction {
    pub context: String,
}

impl RunContextAction {
    pub async fn execute(&self, scheduler: &Scheduler) -> Result<()> {
        for task_id in scheduler.registry.local_keys() {
            let Some(entry) = scheduler.registry.get_local(&task_id) else {
                continue;
            };
            if entry.descriptor.context.as_deref() != Some(self.context.as_str()) {
                continue;
            }
            if !entry.state.is_schedulable() {
                continue;
            }

            let action = ScheduleTaskAction {
                task_id: task_id.clone(),
            };
            if let Err(e) = action.execute(scheduler).await {
                tracing::error!("Context {} schedule of {} failed: {}", self.context, task_id, e);
            }
        }

        Ok(())
    }
}
