//! Membership Module Tests
//!
//! Covers local cluster-view bookkeeping and the join path over real UDP
//! sockets on the loopback interface.

#[cfg(test)]
mod tests {
    use crate::membership::service::MembershipService;
    use crate::membership::types::{MembershipEventKind, Node, NodeId, NodeState};
    use std::net::SocketAddr;
    use std::time::Duration;

    fn ephemeral() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_membership_creation() {
        let service = MembershipService::new(ephemeral(), ephemeral(), vec![], false)
            .await
            .expect("Failed to create service");

        assert_eq!(service.members.len(), 1);

        let members = service.get_alive_members();
        assert_eq!(members.len(), 1);
        assert_eq!(members[0].state, NodeState::Alive);
    }

    #[tokio::test]
    async fn test_runtime_members_filtered_by_role() {
        let service = MembershipService::new(ephemeral(), ephemeral(), vec![], false)
            .await
            .unwrap();

        // Local node is not a runtime, so the candidate pool starts empty.
        assert!(service.get_runtime_members().is_empty());

        let runtime_node = Node {
            id: NodeId::new(),
            gossip_addr: ephemeral(),
            http_addr: ephemeral(),
            state: NodeState::Alive,
            incarnation: 1,
            is_runtime: true,
            last_seen: None,
        };
        service
            .members
            .insert(runtime_node.id.clone(), runtime_node.clone());

        let runtimes = service.get_runtime_members();
        assert_eq!(runtimes.len(), 1);
        assert_eq!(runtimes[0].id, runtime_node.id);

        // Dead runtime nodes are not candidates.
        service.members.get_mut(&runtime_node.id).unwrap().state = NodeState::Dead;
        assert!(service.get_runtime_members().is_empty());
    }

    #[tokio::test]
    async fn test_runtime_flag_set_on_local_node() {
        let service = MembershipService::new(ephemeral(), ephemeral(), vec![], true)
            .await
            .unwrap();

        assert!(service.local_node.is_runtime);
        assert_eq!(service.get_runtime_members().len(), 1);
    }

    #[tokio::test]
    async fn test_join_via_seed_publishes_event() {
        let seed = MembershipService::new(ephemeral(), ephemeral(), vec![], false)
            .await
            .unwrap();
        let mut events = seed.subscribe_events();
        seed.clone().start().await;

        // A second node joins through the seed's real gossip address.
        let joiner = MembershipService::new(
            ephemeral(),
            ephemeral(),
            vec![seed.local_node.gossip_addr],
            true,
        )
        .await
        .unwrap();

        let event = tokio::time::timeout(Duration::from_secs(5), events.recv())
            .await
            .expect("No membership event within timeout")
            .expect("Event channel closed");

        assert_eq!(event.kind, MembershipEventKind::Joined);
        assert_eq!(event.node_id, joiner.local_node.id);
        assert_eq!(seed.members.len(), 2);

        // The advertised runtime role survived the join.
        let joined = seed.get_member(&joiner.local_node.id).unwrap();
        assert!(joined.is_runtime);
    }
}
