//! Bus Module Tests
//!
//! Local delivery semantics only; the HTTP fan-out path needs peers with a
//! running server and is exercised in multi-node deployments.

#[cfg(test)]
mod tests {
    use crate::bus::bus::MessageBus;
    use crate::bus::messages::TaskMessage;
    use crate::membership::service::MembershipService;
    use crate::membership::types::NodeId;
    use crate::registry::types::TaskId;
    use std::sync::Arc;
    use std::time::Duration;

    async fn local_bus() -> (Arc<MembershipService>, Arc<MessageBus>) {
        let membership = MembershipService::new(
            "127.0.0.1:0".parse().unwrap(),
            "127.0.0.1:0".parse().unwrap(),
            vec![],
            false,
        )
        .await
        .unwrap();
        let bus = MessageBus::new(membership.clone());
        (membership, bus)
    }

    #[tokio::test]
    async fn test_publish_reaches_local_subscriber() {
        let (_membership, bus) = local_bus().await;
        let mut messages = bus.subscribe();

        let task_id = TaskId::new();
        bus.publish(TaskMessage::Schedule {
            task_id: task_id.clone(),
        });

        let received = tokio::time::timeout(Duration::from_secs(1), messages.recv())
            .await
            .unwrap()
            .unwrap();

        match received {
            TaskMessage::Schedule { task_id: id } => assert_eq!(id, task_id),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_deliver_local_feeds_subscribers() {
        let (_membership, bus) = local_bus().await;
        let mut messages = bus.subscribe();

        bus.deliver_local(TaskMessage::KillTask {
            task_name: "bench-1".to_string(),
        });

        let received = messages.recv().await.unwrap();
        match received {
            TaskMessage::KillTask { task_name } => assert_eq!(task_name, "bench-1"),
            other => panic!("Unexpected message: {:?}", other),
        }
    }

    #[test]
    fn test_receiver_only_set_for_run_requests() {
        let addressed = TaskMessage::RunTask {
            sender_id: NodeId::new(),
            receiver_id: Some(NodeId::new()),
            task_id: TaskId::new(),
        };
        assert!(addressed.receiver().is_some());

        let broadcast = TaskMessage::RunTask {
            sender_id: NodeId::new(),
            receiver_id: None,
            task_id: TaskId::new(),
        };
        assert!(broadcast.receiver().is_none());

        let kill = TaskMessage::KillTask {
            task_name: "bench-1".to_string(),
        };
        assert!(kill.receiver().is_none());
    }
}
