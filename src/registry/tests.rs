//! Registry Module Tests
//!
//! Validates partition placement, the task state machine, local storage
//! mechanics, change notification, and the per-entry lock table.
//!
//! *Note: cross-node operations (replication, forwarding, remote locks) need
//! a running HTTP surface and are exercised by multi-node deployments, not
//! here.*

#[cfg(test)]
mod tests {
    use crate::membership::service::MembershipService;
    use crate::membership::types::NodeId;
    use crate::registry::map::{RegistryEventKind, TaskRegistry};
    use crate::registry::partitioner::PartitionManager;
    use crate::registry::types::{TaskDescriptor, TaskEntry, TaskId, TaskState};
    use std::sync::Arc;
    use std::time::Duration;

    async fn single_node_registry() -> (Arc<MembershipService>, Arc<TaskRegistry>) {
        let membership = MembershipService::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            vec![],
            false,
        )
        .await
        .unwrap();
        let partitioner = Arc::new(PartitionManager::new(membership.clone()));
        let registry = Arc::new(TaskRegistry::new(membership.clone(), partitioner));
        (membership, registry)
    }

    fn sleep_descriptor(name: &str) -> TaskDescriptor {
        TaskDescriptor {
            name: name.to_string(),
            command: "sleep".to_string(),
            args: vec!["1".to_string()],
            context: None,
        }
    }

    // ============================================================
    // PARTITIONER TESTS
    // ============================================================

    #[tokio::test]
    async fn test_partition_is_deterministic() {
        let (membership, _) = single_node_registry().await;
        let partitioner = PartitionManager::new(membership);

        let p1 = partitioner.get_partition("task_100");
        let p2 = partitioner.get_partition("task_100");
        assert_eq!(p1, p2, "The same key should yield the same partition");
        assert!(p1 < partitioner.num_partitions);
    }

    #[tokio::test]
    async fn test_partition_distribution() {
        let (membership, _) = single_node_registry().await;
        let partitioner = PartitionManager::new(membership);

        let mut partition_counts = std::collections::HashMap::new();
        for i in 0..10000 {
            let key = format!("task_{}", i);
            let partition = partitioner.get_partition(&key);
            *partition_counts.entry(partition).or_insert(0) += 1;
        }

        // With 256 partitions and 10000 keys, expect a broad spread.
        assert!(
            partition_counts.len() > 100,
            "Should have more than 100 distinct partitions used, got: {}",
            partition_counts.len()
        );
    }

    #[tokio::test]
    async fn test_get_owners_single_node() {
        let (membership, _) = single_node_registry().await;
        let partitioner = PartitionManager::new(membership.clone());

        let owners = partitioner.get_owners(0);

        // With one node the owner list collapses to just the primary.
        assert_eq!(owners, vec![membership.local_node.id.clone()]);
    }

    #[tokio::test]
    async fn test_single_node_owns_all_partitions() {
        let (membership, _) = single_node_registry().await;
        let partitioner = PartitionManager::new(membership);

        assert_eq!(
            partitioner.my_primary_partitions().len() as u32,
            partitioner.num_partitions
        );
    }

    // ============================================================
    // STATE MACHINE TESTS
    // ============================================================

    #[test]
    fn test_state_dag_edges() {
        use TaskState::*;

        assert!(Submitted.can_transition_to(Scheduled));
        assert!(Submitted.can_transition_to(Waiting));
        assert!(Scheduled.can_transition_to(Running));
        assert!(Scheduled.can_transition_to(Scheduled));
        assert!(Waiting.can_transition_to(Scheduled));
        assert!(Running.can_transition_to(Finished));
        assert!(Running.can_transition_to(Aborted));

        // No cycles back to Submitted, terminals accept nothing.
        assert!(!Scheduled.can_transition_to(Submitted));
        assert!(!Waiting.can_transition_to(Submitted));
        assert!(!Finished.can_transition_to(Aborted));
        assert!(!Aborted.can_transition_to(Scheduled));
        assert!(!Submitted.can_transition_to(Running));
    }

    #[test]
    fn test_transition_appends_to_log() {
        let mut entry = TaskEntry::new(sleep_descriptor("t1"));
        assert_eq!(entry.state, TaskState::Submitted);
        assert_eq!(entry.transitions.len(), 1);

        entry
            .transition(TaskState::Scheduled, "assigned to runtime n1")
            .unwrap();
        entry.runtime_id = Some(NodeId::new());
        entry.transition(TaskState::Running, "started").unwrap();
        entry.transition(TaskState::Finished, "completed").unwrap();

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
        assert_eq!(entry.transitions[1].reason, "assigned to runtime n1");
    }

    #[test]
    fn test_illegal_transition_is_rejected() {
        let mut entry = TaskEntry::new(sleep_descriptor("t1"));

        assert!(entry.transition(TaskState::Running, "nope").is_err());
        assert_eq!(entry.state, TaskState::Submitted);
        assert_eq!(entry.transitions.len(), 1);

        entry.transition(TaskState::Aborted, "cancelled").unwrap();
        assert!(entry.transition(TaskState::Scheduled, "too late").is_err());
    }

    #[test]
    fn test_runtime_id_cleared_when_leaving_placed_states() {
        let mut entry = TaskEntry::new(sleep_descriptor("t1"));

        entry.transition(TaskState::Scheduled, "assigned").unwrap();
        entry.runtime_id = Some(NodeId::new());

        // Regressing to Waiting clears the placement.
        entry
            .transition(TaskState::Waiting, "runtime lost")
            .unwrap();
        assert_eq!(entry.runtime_id, None);

        entry.transition(TaskState::Scheduled, "reassigned").unwrap();
        entry.runtime_id = Some(NodeId::new());
        entry.transition(TaskState::Running, "started").unwrap();
        assert!(entry.runtime_id.is_some(), "placement survives Running");

        entry.transition(TaskState::Finished, "completed").unwrap();
        assert!(entry.runtime_id.is_some(), "placement survives Finished");
    }

    // ============================================================
    // REGISTRY STORAGE & EVENTS
    // ============================================================

    #[tokio::test]
    async fn test_submit_stores_locally_and_fires_added() {
        let (_membership, registry) = single_node_registry().await;
        let mut events = registry.subscribe();

        let task_id = registry.submit(sleep_descriptor("t1")).await.unwrap();

        let entry = registry.get_local(&task_id).expect("Entry should exist");
        assert_eq!(entry.state, TaskState::Submitted);
        assert_eq!(entry.owner_id, None);
        assert_eq!(entry.runtime_id, None);
        assert!(registry.local_keys().contains(&task_id));

        let event = events.recv().await.unwrap();
        assert_eq!(event.task_id, task_id);
        assert_eq!(event.kind, RegistryEventKind::Added);
    }

    #[tokio::test]
    async fn test_put_fires_updated() {
        let (membership, registry) = single_node_registry().await;

        let task_id = registry.submit(sleep_descriptor("t1")).await.unwrap();

        let mut events = registry.subscribe();
        let mut entry = registry.get_local(&task_id).unwrap();
        entry.owner_id = Some(membership.local_node.id.clone());
        registry.put(entry).await.unwrap();

        let event = events.recv().await.unwrap();
        assert_eq!(event.task_id, task_id);
        assert_eq!(event.kind, RegistryEventKind::Updated);

        let stored = registry.get_local(&task_id).unwrap();
        assert_eq!(stored.owner_id, Some(membership.local_node.id.clone()));
    }

    #[tokio::test]
    async fn test_store_replica_dedups_by_op_id() {
        let (_membership, registry) = single_node_registry().await;

        let entry = TaskEntry::new(sleep_descriptor("t1"));
        let partition = registry.partitioner.get_partition(&entry.id.0);

        registry.store_replica(partition, "op-1".to_string(), entry.clone());

        let mut changed = entry.clone();
        changed.transition(TaskState::Aborted, "should be ignored").unwrap();
        registry.store_replica(partition, "op-1".to_string(), changed);

        let stored = registry.get_local(&entry.id).unwrap();
        assert_eq!(stored.state, TaskState::Submitted);
    }

    // ============================================================
    // LOCK TABLE TESTS
    // ============================================================

    #[tokio::test]
    async fn test_lock_returns_snapshot_and_blocks_second_holder() {
        let (_membership, registry) = single_node_registry().await;
        let task_id = registry.submit(sleep_descriptor("t1")).await.unwrap();

        let snapshot = registry
            .try_lock_and_get(&task_id, Duration::from_secs(1))
            .await
            .expect("First lock should be granted");
        assert_eq!(snapshot.state, TaskState::Submitted);

        // A second holder cannot get in while the lock is held.
        let other = NodeId::new();
        let blocked = registry
            .lock_local(&task_id, &other, Duration::from_millis(200))
            .await;
        assert!(blocked.is_err(), "Contended lock should time out");

        registry.unlock(&task_id).await;

        let reacquired = registry
            .lock_local(&task_id, &other, Duration::from_millis(500))
            .await;
        assert!(reacquired.is_ok(), "Released lock should be acquirable");
        registry.unlock_local(&task_id, &other);
    }

    #[tokio::test]
    async fn test_lock_on_missing_task_fails_and_releases_claim() {
        let (_membership, registry) = single_node_registry().await;
        let ghost = TaskId::new();
        let holder = NodeId::new();

        let first = registry
            .lock_local(&ghost, &holder, Duration::from_millis(100))
            .await;
        assert!(first.is_err());

        // The failed acquisition must not leave a claim behind; a retry fails
        // with "not found" immediately rather than timing out on contention.
        let second = registry
            .lock_local(&ghost, &holder, Duration::from_millis(100))
            .await;
        assert!(second.unwrap_err().to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_unlock_requires_matching_holder() {
        let (_membership, registry) = single_node_registry().await;
        let task_id = registry.submit(sleep_descriptor("t1")).await.unwrap();

        let holder = NodeId::new();
        registry
            .lock_local(&task_id, &holder, Duration::from_millis(200))
            .await
            .unwrap();

        // A stranger's unlock is ignored.
        let stranger = NodeId::new();
        registry.unlock_local(&task_id, &stranger);
        let blocked = registry
            .lock_local(&task_id, &stranger, Duration::from_millis(150))
            .await;
        assert!(blocked.is_err(), "Lock must still be held");

        registry.unlock_local(&task_id, &holder);
    }
}
