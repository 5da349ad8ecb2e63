use crate::membership::{service::MembershipService, types::NodeId};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// Assigns partitions to cluster nodes.
///
/// Placement is derived deterministically from the sorted list of alive node
/// ids, so every node computes the same owners without coordination. Owner
/// lists shift when membership changes; the ownership scanner repairs entries
/// afterwards.
pub struct PartitionManager {
    pub num_partitions: u32,
    membership: Arc<MembershipService>,
}

impl PartitionManager {
    pub fn new(membership: Arc<MembershipService>) -> Self {
        Self {
            num_partitions: 256,
            membership,
        }
    }

    pub fn get_partition(&self, key: &str) -> u32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        let hash = hasher.finish() as u32;
        hash % self.num_partitions
    }

    /// Owner list for a partition: `[primary, backup]`, deduplicated when the
    /// cluster is smaller than the replication factor.
    pub fn get_owners(&self, partition: u32) -> Vec<NodeId> {
        let alive_nodes = self.membership.get_alive_members();
        if alive_nodes.is_empty() {
            return vec![];
        }
        let mut node_ids: Vec<NodeId> = alive_nodes.into_iter().map(|node| node.id).collect();
        node_ids.sort_by(|a, b| a.0.cmp(&b.0));

        let primary_idx = (partition as usize) % node_ids.len();
        let mut owners = vec![node_ids[primary_idx].clone()];
        if node_ids.len() > 1 {
            let backup_idx = (primary_idx + 1) % node_ids.len();
            owners.push(node_ids[backup_idx].clone());
        }
        owners
    }

    pub fn is_local_primary(&self, partition: u32) -> bool {
        let owners = self.get_owners(partition);
        !owners.is_empty() && owners[0] == self.membership.local_node.id
    }

    pub fn my_primary_partitions(&self) -> Vec<u32> {
        (0..self.num_partitions)
            .filter(|&partition| self.is_local_primary(partition))
            .collect()
    }
}
