//! Process Supervision Engine
//!
//! Runs on every execution node. Accepts run requests addressed to this node,
//! launches one external OS process per task, tracks it in a node-local slot
//! table, and reports lifecycle events back over the bus. The engine never
//! writes to the task registry; registry mutation stays with the scheduler.
//!
//! ## Responsibilities
//! - **At-most-one execution per task name**: a second run request for a name
//!   that is already tracked is rejected with `false`, never an error.
//! - **Supervision**: one spawned supervisor per slot blocks on the process
//!   until it exits, then clears the slot and reports the outcome.
//! - **Kill handling**: kill requests signal the slot's supervisor, which
//!   terminates the process; killing an unknown name is a no-op.

use crate::bus::bus::MessageBus;
use crate::bus::messages::TaskMessage;
use crate::membership::service::MembershipService;
use crate::membership::types::NodeId;
use crate::registry::map::TaskRegistry;
use crate::registry::types::{TaskDescriptor, TaskId};

use dashmap::DashMap;
use std::sync::Arc;
use tokio::process::Command;
use tokio::sync::broadcast;
use tokio::sync::mpsc;

/// Node-local record binding a task name to a live supervised process.
///
/// Not distributed and not persisted; an engine restart loses all slots and
/// leaves recovery to the cluster's liveness handling.
pub struct ExecutionSlot {
    pub task_id: TaskId,
    kill_tx: mpsc::Sender<()>,
}

pub struct ExecutionEngine {
    slots: Arc<DashMap<String, ExecutionSlot>>,
    registry: Arc<TaskRegistry>,
    bus: Arc<MessageBus>,
    membership: Arc<MembershipService>,
}

impl ExecutionEngine {
    pub fn new(
        registry: Arc<TaskRegistry>,
        bus: Arc<MessageBus>,
        membership: Arc<MembershipService>,
    ) -> Arc<Self> {
        Arc::new(Self {
            slots: Arc::new(DashMap::new()),
            registry,
            bus,
            membership,
        })
    }

    /// Spawns the bus listener and returns immediately.
    ///
    /// The subscription is taken before spawning, so run requests published
    /// right after `start` returns are already captured.
    pub async fn start(self: Arc<Self>) {
        tracing::info!("Starting execution engine...");

        let messages = self.bus.subscribe();
        let engine = self.clone();
        tokio::spawn(async move {
            engine.bus_loop(messages).await;
        });
    }

    pub fn running_task_count(&self) -> usize {
        self.slots.len()
    }

    pub fn is_running(&self, task_name: &str) -> bool {
        self.slots.contains_key(task_name)
    }

    async fn bus_loop(self: Arc<Self>, mut messages: broadcast::Receiver<TaskMessage>) {
        loop {
            match messages.recv().await {
                Ok(TaskMessage::RunTask {
                    receiver_id,
                    task_id,
                    ..
                }) => {
                    let local = &self.membership.local_node.id;
                    let addressed = match &receiver_id {
                        Some(id) => id == local,
                        None => self.membership.local_node.is_runtime,
                    };
                    if !addressed {
                        continue;
                    }

                    match self.registry.get(&task_id).await {
                        Some(entry) => {
                            if !self.try_run_task(task_id.clone(), entry.descriptor) {
                                tracing::warn!(
                                    "Rejected run request for task {}: name already executing",
                                    task_id
                                );
                            }
                        }
                        None => {
                            tracing::warn!("Run request for unknown task {}", task_id);
                        }
                    }
                }

                Ok(TaskMessage::KillTask { task_name }) => {
                    if !self.kill_task(&task_name) {
                        tracing::debug!("Kill request for untracked task name {}", task_name);
                    }
                }

                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!("Engine bus stream lagged, missed {}", missed);
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    /// Accepts a run request unless the task name is already executing here.
    ///
    /// Returns `false` on a duplicate: at most one process per task name runs
    /// concurrently on this node. On acceptance the slot is reserved first
    /// and a supervisor task takes over; the task counts as complete only
    /// after the supervisor has cleared the slot again.
    pub fn try_run_task(&self, task_id: TaskId, descriptor: TaskDescriptor) -> bool {
        let (kill_tx, kill_rx) = mpsc::channel(1);
        let name = descriptor.name.clone();

        match self.slots.entry(name) {
            dashmap::mapref::entry::Entry::Occupied(_) => false,
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                vacant.insert(ExecutionSlot {
                    task_id: task_id.clone(),
                    kill_tx,
                });

                let slots = self.slots.clone();
                let bus = self.bus.clone();
                let runtime_id = self.membership.local_node.id.clone();
                tokio::spawn(async move {
                    supervise(slots, bus, runtime_id, task_id, descriptor, kill_rx).await;
                });

                true
            }
        }
    }

    /// Forcibly terminates the named task's process.
    ///
    /// Returns `false` when the name is not tracked (it may have finished or
    /// never started here); that is a normal outcome, not an error.
    pub fn kill_task(&self, task_name: &str) -> bool {
        match self.slots.get(task_name) {
            Some(slot) => {
                // Signal only; the supervisor kills the process and clears
                // the slot. A full channel means a kill is already pending.
                let _ = slot.kill_tx.try_send(());
                true
            }
            None => false,
        }
    }
}

/// Launches and tracks one external process until it exits or is killed.
///
/// Runs detached from the engine so a blocked `wait` never holds anything
/// but its own slot.
async fn supervise(
    slots: Arc<DashMap<String, ExecutionSlot>>,
    bus: Arc<MessageBus>,
    runtime_id: NodeId,
    task_id: TaskId,
    descriptor: TaskDescriptor,
    mut kill_rx: mpsc::Receiver<()>,
) {
    let name = descriptor.name.clone();

    tracing::info!(
        "Launching task {} ({}): {} {:?}",
        name,
        task_id,
        descriptor.command,
        descriptor.args
    );

    let mut command = Command::new(&descriptor.command);
    command.args(&descriptor.args);
    // Take the process down with us if this node shuts down uncleanly.
    command.kill_on_drop(true);

    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) => {
            tracing::error!("Failed to spawn task {}: {}", name, e);
            slots.remove(&name);
            bus.publish(TaskMessage::TaskFinished {
                task_id,
                runtime_id,
                error: Some(format!("spawn failed: {}", e)),
            });
            return;
        }
    };

    bus.publish(TaskMessage::TaskStarted {
        task_id: task_id.clone(),
        runtime_id: runtime_id.clone(),
    });

    tokio::select! {
        status = child.wait() => {
            slots.remove(&name);

            let error = match status {
                Ok(status) if status.success() => None,
                Ok(status) => Some(format!("exit status: {}", status)),
                Err(e) => Some(format!("wait failed: {}", e)),
            };

            match &error {
                None => tracing::info!("Task {} finished", name),
                Some(error) => tracing::warn!("Task {} failed: {}", name, error),
            }

            bus.publish(TaskMessage::TaskFinished {
                task_id,
                runtime_id,
                error,
            });
        }

        _ = kill_rx.recv() => {
            tracing::info!("Killing task {} on request", name);

            if let Err(e) = child.start_kill() {
                tracing::warn!("Kill of task {} failed: {}", name, e);
            }
            let _ = child.wait().await;

            slots.remove(&name);
            bus.publish(TaskMessage::TaskKilled {
                task_id,
                runtime_id,
                task_name: name,
            });
        }
    }
}
