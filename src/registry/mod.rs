//! Distributed Task Registry Module
//!
//! Implements the sharded, replicated in-memory map of task entries that every
//! scheduling decision flows through.
//!
//! ## Core Concepts
//! - **Partitioning**: Task ids hash into fixed partitions (shards); `PartitionManager`
//!   assigns each partition a Primary node and a Backup node.
//! - **Replication**: Writes are coordinated by the Primary and pushed to the Backup
//!   for fault tolerance.
//! - **Locking**: Each entry has a cluster-wide lock hosted by its partition Primary.
//!   Read-modify-write sequences hold it across the read and the write-back, and a
//!   snapshot-equality re-check under the lock detects raced writers.
//! - **Local Change Events**: The Primary for a key emits added/updated events that
//!   drive the scheduler; no other node observes them.
//!
//! ## Submodules
//! - **`types`**: The task data model (ids, descriptors, states, transition log).
//! - **`partitioner`**: Partition placement over the alive membership view.
//! - **`map`**: `TaskRegistry`, the store itself.
//! - **`protocol`**: HTTP API contracts for inter-node registry traffic.
//! - **`handlers`**: Axum handlers mounted by the node binary.

pub mod handlers;
pub mod map;
pub mod partitioner;
pub mod protocol;
pub mod types;

#[cfg(test)]
mod tests;
