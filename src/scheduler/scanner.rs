use crate::registry::map::TaskRegistry;

use std::sync::Arc;

/// Repairs partition ownership after membership changes.
///
/// Partitioned stores do not notify client code when a partition's ownership
/// moves, so the scanner periodically walks the locally-owned keys and fixes
/// entries still recorded against a node that no longer hosts them. Each pass
/// is idempotent and unlocked: rewriting ownership changes no scheduling
/// state, and a missed pass is repaired by the next one.
pub struct OwnershipScanner {
    registry: Arc<TaskRegistry>,
}

impl OwnershipScanner {
    pub fn new(registry: Arc<TaskRegistry>) -> Self {
        Self { registry }
    }

    /// One repair pass over the locally-primary partitions.
    pub async fn scan(&self) {
        self.sync_partitions().await;

        let local = self.registry.local_node_id();
        let mut repaired = 0usize;

        for task_id in self.registry.local_keys() {
            let Some(mut entry) = self.registry.get_local(&task_id) else {
                continue;
            };

            match &entry.owner_id {
                None => {
                    // Newly submitted and not yet claimed; the scheduler will
                    // pick it up.
                    tracing::debug!("Task {} has no owner yet", task_id);
                }
                Some(owner) if owner != &local => {
                    tracing::info!(
                        "Repairing orphaned task {}: owner {} -> {}",
                        task_id,
                        owner,
                        local
                    );
                    entry.owner_id = Some(local.clone());
                    if let Err(e) = self.registry.put(entry).await {
                        tracing::warn!("Owner repair of task {} failed: {}", task_id, e);
                    } else {
                        repaired += 1;
                    }
                }
                _ => {}
            }
        }

        if repaired > 0 {
            tracing::info!("Ownership scan repaired {} entries", repaired);
        }
    }

    /// Pulls partitions this node became Primary for but does not hold yet
    /// (anti-entropy after a partition moved here).
    async fn sync_partitions(&self) {
        let alive = self.registry.membership.get_alive_members();
        if alive.len() < 2 {
            return;
        }

        for partition in self.registry.partitioner.my_primary_partitions() {
            if self.registry.has_partition(partition) {
                continue;
            }

            let owners = self.registry.partitioner.get_owners(partition);
            for owner in owners.iter().skip(1) {
                match self.registry.fetch_partition(owner, partition).await {
                    Ok(entries) if !entries.is_empty() => {
                        tracing::info!(
                            "Pulled {} entries of partition {} from {}",
                            entries.len(),
                            partition,
                            owner
                        );
                        self.registry.apply_partition_entries(partition, entries);
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::debug!(
                            "Partition {} pull from {} failed: {}",
                            partition,
                            owner,
                            e
                        );
                    }
                }
            }
        }
    }
}
