//! Scheduler Module Tests
//!
//! Covers the message-to-action translation tables, the guarded scheduling
//! actions (no-runtime parking, stale-snapshot abandonment, idempotent
//! abort), ownership repair, and the full submit-to-finished path on a
//! single node that is both scheduler and runtime.

#[cfg(test)]
mod tests {
    use crate::bus::bus::MessageBus;
    use crate::bus::messages::TaskMessage;
    use crate::membership::service::MembershipService;
    use crate::membership::types::NodeId;
    use crate::registry::map::{RegistryEvent, RegistryEventKind, TaskRegistry};
    use crate::registry::partitioner::PartitionManager;
    use crate::registry::types::{TaskDescriptor, TaskId, TaskState};
    use crate::runtime::engine::ExecutionEngine;
    use crate::scheduler::actions::*;
    use crate::scheduler::scanner::OwnershipScanner;
    use crate::scheduler::scheduler::{Scheduler, translate_message, translate_registry_event};
    use crate::scheduler::selector::{RuntimeSelector, UniformRandomSelector};
    use std::sync::Arc;
    use std::time::Duration;

    async fn single_node(
        is_runtime: bool,
    ) -> (
        Arc<MembershipService>,
        Arc<TaskRegistry>,
        Arc<MessageBus>,
        Arc<Scheduler>,
    ) {
        let membership = MembershipService::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            vec![],
            is_runtime,
        )
        .await
        .unwrap();
        let partitioner = Arc::new(PartitionManager::new(membership.clone()));
        let registry = Arc::new(TaskRegistry::new(membership.clone(), partitioner));
        let bus = MessageBus::new(membership.clone());
        let scheduler = Scheduler::new(
            registry.clone(),
            bus.clone(),
            membership.clone(),
            Arc::new(UniformRandomSelector),
        );
        (membership, registry, bus, scheduler)
    }

    fn descriptor(name: &str, seconds: &str) -> TaskDescriptor {
        TaskDescriptor {
            name: name.to_string(),
            command: "sleep".to_string(),
            args: vec![seconds.to_string()],
            context: None,
        }
    }

    // ============================================================
    // TRANSLATION TABLES
    // ============================================================

    #[test]
    fn test_registry_event_translation() {
        let added = RegistryEvent {
            task_id: TaskId::new(),
            kind: RegistryEventKind::Added,
        };
        assert!(matches!(
            translate_registry_event(&added, TaskState::Submitted),
            Action::Schedule(_)
        ));
        assert!(matches!(
            translate_registry_event(&added, TaskState::Scheduled),
            Action::Noop
        ));

        let updated = RegistryEvent {
            task_id: TaskId::new(),
            kind: RegistryEventKind::Updated,
        };
        assert!(matches!(
            translate_registry_event(&updated, TaskState::Submitted),
            Action::Schedule(_)
        ));
        // Updates in any other state are the scheduler's own writes echoing back.
        assert!(matches!(
            translate_registry_event(&updated, TaskState::Waiting),
            Action::Noop
        ));
        assert!(matches!(
            translate_registry_event(&updated, TaskState::Finished),
            Action::Noop
        ));
    }

    #[test]
    fn test_schedule_message_translation() {
        let task_id = TaskId::new();
        let msg = TaskMessage::Reschedule {
            task_id: task_id.clone(),
        };

        for state in [
            TaskState::Submitted,
            TaskState::Accepted,
            TaskState::Waiting,
            TaskState::Scheduled,
        ] {
            assert!(
                matches!(translate_message(&msg, Some(state)), Action::Schedule(_)),
                "{:?} should be schedulable",
                state
            );
        }
        for state in [TaskState::Running, TaskState::Finished, TaskState::Aborted] {
            assert!(
                matches!(translate_message(&msg, Some(state)), Action::Noop),
                "{:?} should not be schedulable",
                state
            );
        }
        assert!(matches!(translate_message(&msg, None), Action::Noop));
    }

    #[test]
    fn test_abort_and_lifecycle_translation() {
        let task_id = TaskId::new();
        let runtime_id = NodeId::new();

        let abort = TaskMessage::Abort {
            task_id: task_id.clone(),
            reason: "operator request".to_string(),
        };
        assert!(matches!(
            translate_message(&abort, Some(TaskState::Running)),
            Action::Abort(_)
        ));
        assert!(matches!(
            translate_message(&abort, Some(TaskState::Aborted)),
            Action::Noop
        ));

        let started = TaskMessage::TaskStarted {
            task_id: task_id.clone(),
            runtime_id: runtime_id.clone(),
        };
        match translate_message(&started, Some(TaskState::Scheduled)) {
            Action::Transition(action) => assert_eq!(action.target, TaskState::Running),
            other => panic!("Unexpected action: {:?}", other),
        }

        let finished = TaskMessage::TaskFinished {
            task_id: task_id.clone(),
            runtime_id: runtime_id.clone(),
            error: Some("exit status: 1".to_string()),
        };
        match translate_message(&finished, Some(TaskState::Running)) {
            Action::Transition(action) => {
                assert_eq!(action.target, TaskState::Finished);
                assert!(action.reason.contains("exit status: 1"));
            }
            other => panic!("Unexpected action: {:?}", other),
        }

        let killed = TaskMessage::TaskKilled {
            task_id: task_id.clone(),
            runtime_id: runtime_id.clone(),
            task_name: "bench-1".to_string(),
        };
        match translate_message(&killed, Some(TaskState::Running)) {
            Action::Abort(action) => assert!(action.reason.contains("killed")),
            other => panic!("Unexpected action: {:?}", other),
        }

        // Engine-side messages never produce scheduler work.
        let run = TaskMessage::RunTask {
            sender_id: NodeId::new(),
            receiver_id: None,
            task_id,
        };
        assert!(matches!(
            translate_message(&run, Some(TaskState::Scheduled)),
            Action::Noop
        ));
        let kill = TaskMessage::KillTask {
            task_name: "bench-1".to_string(),
        };
        assert!(matches!(translate_message(&kill, None), Action::Noop));
    }

    // ============================================================
    // SELECTOR
    // ============================================================

    #[tokio::test]
    async fn test_selector_fails_on_empty_pool() {
        let (_membership, registry, _bus, _scheduler) = single_node(false).await;
        let task_id = registry.submit(descriptor("t1", "1")).await.unwrap();
        let entry = registry.get_local(&task_id).unwrap();

        let selector = UniformRandomSelector;
        let result = selector.select(&entry, &[]);
        assert!(result.unwrap_err().to_string().contains("no runtime found"));
    }

    // ============================================================
    // SCHEDULING ACTIONS
    // ============================================================

    #[tokio::test]
    async fn test_schedule_without_runtime_parks_waiting() {
        let (membership, registry, _bus, scheduler) = single_node(false).await;
        let task_id = registry.submit(descriptor("t1", "1")).await.unwrap();

        let action = ScheduleTaskAction {
            task_id: task_id.clone(),
        };
        action.execute(&scheduler).await.unwrap();

        let entry = registry.get_local(&task_id).unwrap();
        assert_eq!(entry.state, TaskState::Waiting);
        assert_eq!(entry.runtime_id, None);
        assert_eq!(entry.owner_id, Some(membership.local_node.id.clone()));
        assert_eq!(entry.transitions.last().unwrap().reason, "no suitable host found");

        // A second pass with still no runtime does not stack Waiting records.
        let action = ScheduleTaskAction {
            task_id: task_id.clone(),
        };
        action.execute(&scheduler).await.unwrap();
        let entry = registry.get_local(&task_id).unwrap();
        assert_eq!(entry.transitions.len(), 2);
    }

    #[tokio::test]
    async fn test_waiting_task_schedules_once_runtime_registers() {
        let (membership, registry, _bus, scheduler) = single_node(false).await;
        let task_id = registry.submit(descriptor("t1", "1")).await.unwrap();

        let action = ScheduleTaskAction {
            task_id: task_id.clone(),
        };
        action.execute(&scheduler).await.unwrap();
        assert_eq!(
            registry.get_local(&task_id).unwrap().state,
            TaskState::Waiting
        );

        // The local node registers as a runtime; the sweep picks the task up.
        membership
            .members
            .get_mut(&membership.local_node.id)
            .unwrap()
            .is_runtime = true;
        scheduler.sweep_parked().await;

        let entry = registry.get_local(&task_id).unwrap();
        assert_eq!(entry.state, TaskState::Scheduled);
        assert_eq!(entry.runtime_id, Some(membership.local_node.id.clone()));
    }

    #[tokio::test]
    async fn test_stale_snapshot_is_abandoned() {
        let (_membership, registry, _bus, scheduler) = single_node(true).await;
        let task_id = registry.submit(descriptor("t1", "1")).await.unwrap();

        // Another node holds the entry lock while our action snapshots.
        let other_node = NodeId::new();
        registry
            .lock_local(&task_id, &other_node, Duration::from_secs(1))
            .await
            .unwrap();

        let racing = {
            let scheduler = scheduler.clone();
            let task_id = task_id.clone();
            tokio::spawn(async move {
                ScheduleTaskAction { task_id }.execute(&scheduler).await
            })
        };

        // Give the action time to snapshot and start polling the lock, then
        // change the entry under the other node's lock and release it.
        tokio::time::sleep(Duration::from_millis(150)).await;
        let mut entry = registry.get_local(&task_id).unwrap();
        entry
            .transition(TaskState::Waiting, "parked by another scheduler")
            .unwrap();
        registry.put(entry).await.unwrap();
        registry.unlock_local(&task_id, &other_node);

        racing.await.unwrap().unwrap();

        // The racing action must have detected the stale snapshot and backed
        // off: no Scheduled record anywhere in the log.
        let entry = registry.get_local(&task_id).unwrap();
        assert_eq!(entry.state, TaskState::Waiting);
        assert!(
            entry
                .transitions
                .iter()
                .all(|t| t.state != TaskState::Scheduled),
            "Stale schedule attempt must not commit"
        );
    }

    #[tokio::test]
    async fn test_two_writers_race_exactly_one_schedules() {
        let (membership, registry, _bus, _scheduler) = single_node(true).await;
        let task_id = registry.submit(descriptor("t1", "1")).await.unwrap();
        let runtime_id = membership.local_node.id.clone();

        // Both writers snapshot the entry before either takes the lock.
        let snapshot_a = registry.get(&task_id).await.unwrap();
        let snapshot_b = registry.get(&task_id).await.unwrap();

        // Writer A wins: lock, verify snapshot, commit.
        let locked = registry
            .try_lock_and_get(&task_id, Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(locked, snapshot_a);
        let mut entry = locked;
        entry
            .transition(TaskState::Scheduled, "assigned to runtime a")
            .unwrap();
        entry.runtime_id = Some(runtime_id.clone());
        registry.put(entry).await.unwrap();
        registry.unlock(&task_id).await;

        // Writer B: lock, find the snapshot stale, abandon without writing.
        let locked = registry
            .try_lock_and_get(&task_id, Duration::from_secs(1))
            .await
            .unwrap();
        assert_ne!(locked, snapshot_b, "B must observe A's write");
        registry.unlock(&task_id).await;

        let entry = registry.get_local(&task_id).unwrap();
        let scheduled_count = entry
            .transitions
            .iter()
            .filter(|t| t.state == TaskState::Scheduled)
            .count();
        assert_eq!(scheduled_count, 1, "Exactly one schedule attempt may win");
    }

    #[tokio::test]
    async fn test_abort_is_idempotent_first_reason_wins() {
        let (_membership, registry, _bus, scheduler) = single_node(false).await;
        let task_id = registry.submit(descriptor("t1", "1")).await.unwrap();

        AbortTaskAction {
            task_id: task_id.clone(),
            reason: "cancelled by user".to_string(),
        }
        .execute(&scheduler)
        .await
        .unwrap();

        AbortTaskAction {
            task_id: task_id.clone(),
            reason: "a different reason".to_string(),
        }
        .execute(&scheduler)
        .await
        .unwrap();

        let entry = registry.get_local(&task_id).unwrap();
        assert_eq!(entry.state, TaskState::Aborted);
        let aborted: Vec<_> = entry
            .transitions
            .iter()
            .filter(|t| t.state == TaskState::Aborted)
            .collect();
        assert_eq!(aborted.len(), 1);
        assert_eq!(aborted[0].reason, "cancelled by user");
    }

    #[tokio::test]
    async fn test_run_context_schedules_matching_tasks() {
        let (_membership, registry, _bus, scheduler) = single_node(false).await;

        let mut in_context = descriptor("ctx-1", "1");
        in_context.context = Some("nightly".to_string());
        let ctx_task = registry.submit(in_context).await.unwrap();

        let other_task = registry.submit(descriptor("solo-1", "1")).await.unwrap();

        RunContextAction {
            context: "nightly".to_string(),
        }
        .execute(&scheduler)
        .await
        .unwrap();

        // No runtime exists, so scheduling the context parks its tasks; the
        // unrelated task stays untouched.
        assert_eq!(
            registry.get_local(&ctx_task).unwrap().state,
            TaskState::Waiting
        );
        assert_eq!(
            registry.get_local(&other_task).unwrap().state,
            TaskState::Submitted
        );
    }

    // ============================================================
    // OWNERSHIP SCANNER
    // ============================================================

    #[tokio::test]
    async fn test_scan_repairs_orphaned_owner() {
        let (membership, registry, _bus, _scheduler) = single_node(false).await;
        let task_id = registry.submit(descriptor("t1", "1")).await.unwrap();

        // Recorded against a node that has left the cluster.
        let departed = NodeId::new();
        let mut entry = registry.get_local(&task_id).unwrap();
        entry.owner_id = Some(departed);
        registry.put(entry).await.unwrap();

        let scanner = OwnershipScanner::new(registry.clone());
        scanner.scan().await;

        let entry = registry.get_local(&task_id).unwrap();
        assert_eq!(entry.owner_id, Some(membership.local_node.id.clone()));
    }

    #[tokio::test]
    async fn test_scan_leaves_unclaimed_entries_alone() {
        let (_membership, registry, _bus, _scheduler) = single_node(false).await;
        let task_id = registry.submit(descriptor("t1", "1")).await.unwrap();

        let scanner = OwnershipScanner::new(registry.clone());
        scanner.scan().await;

        // Never claimed, so the scanner only logs it.
        let entry = registry.get_local(&task_id).unwrap();
        assert_eq!(entry.owner_id, None);
        assert_eq!(entry.state, TaskState::Submitted);
    }

    // ============================================================
    // END TO END
    // ============================================================

    #[tokio::test]
    async fn test_submitted_task_runs_to_finished() {
        let (membership, registry, bus, scheduler) = single_node(true).await;
        let engine = ExecutionEngine::new(registry.clone(), bus.clone(), membership.clone());

        scheduler.clone().start().await;
        engine.clone().start().await;

        let task_id = registry.submit(descriptor("bench-sleep", "1")).await.unwrap();

        let mut finished = None;
        for _ in 0..150 {
            if let Some(entry) = registry.get_local(&task_id)
                && entry.state == TaskState::Finished
            {
                finished = Some(entry);
                break;
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }

        let entry = finished.expect("Task did not finish in time");
        let states: Vec<TaskState> = entry.transitions.iter().map(|t| t.state).collect();
        assert_eq!(
            states,
            vec![
                TaskState::Submitted,
                TaskState::Scheduled,
                TaskState::Running,
                TaskState::Finished
            ]
        );
        assert_eq!(entry.runtime_id, Some(membership.local_node.id.clone()));
        assert!(
            !engine.is_running("bench-sleep"),
            "Slot must be cleared after completion"
        );
    }
}
