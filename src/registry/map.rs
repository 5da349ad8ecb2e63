//! Partitioned Task Registry
//!
//! Implements the cluster-wide map from task id to [`TaskEntry`]. Entries are
//! assigned to partitions by hashing their id; each partition has a Primary
//! node (serving reads, writes and locks) and a Backup node (durability).
//!
//! ## Responsibilities
//! - **Partitioning**: Routing reads and writes to the correct node.
//! - **Replication**: Pushing writes to backup nodes so entries survive node failures.
//! - **Forwarding**: Redirecting requests received on a non-owner node to the Primary.
//! - **Locking**: Per-entry, lease-stamped locks hosted by the partition Primary.
//! - **Notification**: Local change events, fired only on the node that is
//!   Primary for the written key.

use super::partitioner::PartitionManager;
use super::protocol::*;
use super::types::{TaskDescriptor, TaskEntry, TaskId, now_ms};
use crate::membership::{service::MembershipService, types::NodeId};

use anyhow::Result;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default bound on lock acquisition.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(60);

/// A lock claim expires after this long, so a crashed holder cannot wedge a
/// key forever. The snapshot re-check under the lock still protects writers
/// that race a stolen claim.
const LOCK_LEASE_MS: u64 = 120_000;

const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(25);
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Kind of local registry change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegistryEventKind {
    Added,
    Updated,
}

/// A change to a locally-owned entry.
#[derive(Debug, Clone)]
pub struct RegistryEvent {
    pub task_id: TaskId,
    pub kind: RegistryEventKind,
}

/// An active per-entry lock, held by one node at a time.
#[derive(Debug, Clone)]
struct LockClaim {
    holder: NodeId,
    expires: u64,
}

/// The central component managing distributed task state.
pub struct TaskRegistry {
    /// Local storage. Structure: `Partition ID -> Task ID -> TaskEntry`.
    local_entries: Arc<DashMap<u32, DashMap<TaskId, TaskEntry>>>,

    /// Per-entry lock table. Only meaningful on the node that is Primary for
    /// the entry's partition; remote nodes acquire through HTTP.
    locks: Arc<DashMap<TaskId, LockClaim>>,

    /// Operation-id dedup table for replicated/forwarded writes.
    processed_ops: Arc<DashMap<String, u64>>,

    pub membership: Arc<MembershipService>,
    pub partitioner: Arc<PartitionManager>,

    http_client: reqwest::Client,
    events: broadcast::Sender<RegistryEvent>,
}

impl TaskRegistry {
    pub fn new(membership: Arc<MembershipService>, partitioner: Arc<PartitionManager>) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            local_entries: Arc::new(DashMap::new()),
            locks: Arc::new(DashMap::new()),
            processed_ops: Arc::new(DashMap::new()),
            membership,
            partitioner,
            http_client: reqwest::Client::new(),
            events,
        }
    }

    /// Change notifications for locally-owned keys.
    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.events.subscribe()
    }

    pub fn local_node_id(&self) -> NodeId {
        self.membership.local_node.id.clone()
    }

    fn publish_event(&self, task_id: TaskId, kind: RegistryEventKind) {
        let _ = self.events.send(RegistryEvent { task_id, kind });
    }

    fn should_process(&self, op_id: &str) -> bool {
        if self.processed_ops.contains_key(op_id) {
            return false;
        }
        if self.processed_ops.len() > 10_000 {
            self.processed_ops.clear();
        }
        self.processed_ops.insert(op_id.to_string(), now_ms());
        true
    }

    // --- Submission ---

    /// Creates a new entry for the descriptor and places it in the cluster.
    ///
    /// 1. If **Local Node is Primary**: stores the entry locally and replicates to backups.
    /// 2. If **Remote Node is Primary**: forwards the entry via HTTP to that node.
    /// 3. If **No Nodes Alive**: falls back to local storage (emergency mode).
    pub async fn submit(&self, descriptor: TaskDescriptor) -> Result<TaskId> {
        let entry = TaskEntry::new(descriptor);
        let task_id = entry.id.clone();
        let partition = self.partitioner.get_partition(&task_id.0);
        let owners = self.partitioner.get_owners(partition);

        if owners.is_empty() {
            tracing::warn!("No alive nodes, storing task {} locally", task_id);
            self.store_local(partition, entry);
            self.publish_event(task_id.clone(), RegistryEventKind::Added);
            return Ok(task_id);
        }

        let primary = &owners[0];

        if primary == &self.membership.local_node.id {
            tracing::debug!(
                "Storing task {} in partition {} (I'm primary)",
                task_id,
                partition
            );
            self.store_as_primary(partition, entry).await?;
        } else {
            tracing::debug!("Forwarding task {} to primary {:?}", task_id, primary);
            self.forward_submit(primary, partition, entry).await?;
        }

        Ok(task_id)
    }

    /// Stores an entry locally and synchronously replicates it to the backup.
    ///
    /// Used when this node is Primary for the partition; fires the local
    /// change event that drives the scheduler.
    pub async fn store_as_primary(&self, partition: u32, entry: TaskEntry) -> Result<()> {
        let task_id = entry.id.clone();
        let existed = self
            .local_entries
            .get(&partition)
            .map(|map| map.contains_key(&task_id))
            .unwrap_or(false);

        self.store_local(partition, entry.clone());

        let op_id = Uuid::new_v4().to_string();
        let owners = self.partitioner.get_owners(partition);
        // Skip index 0 because that is us (the primary).
        for backup in owners.iter().skip(1) {
            if let Err(e) = self
                .replicate_to_backup(backup, partition, op_id.clone(), entry.clone())
                .await
            {
                tracing::warn!("Replication of task {} to {:?} failed: {}", task_id, backup, e);
            }
        }

        let kind = if existed {
            RegistryEventKind::Updated
        } else {
            RegistryEventKind::Added
        };
        self.publish_event(task_id, kind);

        Ok(())
    }

    /// Low-level insert into the local partition map.
    pub fn store_local(&self, partition: u32, entry: TaskEntry) {
        let partition_map = self
            .local_entries
            .entry(partition)
            .or_insert_with(DashMap::new);
        partition_map.insert(entry.id.clone(), entry);
    }

    /// Stores a copy received from the partition Primary (no event, no re-replication).
    pub fn store_replica(&self, partition: u32, op_id: String, entry: TaskEntry) {
        if !self.should_process(&op_id) {
            return;
        }
        self.store_local(partition, entry);
    }

    async fn replicate_to_backup(
        &self,
        backup_node_id: &NodeId,
        partition: u32,
        op_id: String,
        entry: TaskEntry,
    ) -> Result<()> {
        let node = self
            .membership
            .get_member(backup_node_id)
            .ok_or_else(|| anyhow::anyhow!("Backup node not found"))?;

        let payload = ReplicateEntryRequest {
            partition,
            op_id,
            entry,
        };

        let response = self
            .post_with_retry(
                format!("http://{}{}", node.http_addr, ENDPOINT_TASK_REPLICATE),
                &payload,
                Duration::from_millis(500),
                3,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Replication failed: {}", response.status()));
        }
        Ok(())
    }

    async fn forward_submit(
        &self,
        target: &NodeId,
        partition: u32,
        entry: TaskEntry,
    ) -> Result<()> {
        let node = self
            .membership
            .get_member(target)
            .ok_or_else(|| anyhow::anyhow!("Target node not found"))?;

        let payload = ForwardEntryRequest { partition, entry };

        let response = self
            .post_with_retry(
                format!("http://{}{}", node.http_addr, ENDPOINT_TASK_INTERNAL_SUBMIT),
                &payload,
                Duration::from_millis(500),
                3,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Forward failed: {}", response.status()));
        }

        Ok(())
    }

    // --- Reads ---

    /// Local lookup only.
    pub fn get_local(&self, task_id: &TaskId) -> Option<TaskEntry> {
        let partition = self.partitioner.get_partition(&task_id.0);

        if let Some(partition_map) = self.local_entries.get(&partition)
            && let Some(entry) = partition_map.get(task_id)
        {
            return Some(entry.clone());
        }

        None
    }

    /// Retrieves an entry, trying local storage first and the partition
    /// owners over HTTP otherwise. Reads elsewhere may lag writes; this is an
    /// eventually-consistent store.
    pub async fn get(&self, task_id: &TaskId) -> Option<TaskEntry> {
        if let Some(entry) = self.get_local(task_id) {
            return Some(entry);
        }

        let partition = self.partitioner.get_partition(&task_id.0);
        let owners = self.partitioner.get_owners(partition);

        for owner in owners.iter() {
            if owner == &self.membership.local_node.id {
                continue;
            }
            match self.fetch_remote(owner, task_id).await {
                Ok(Some(entry)) => return Some(entry),
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!("Failed to fetch task {} from {:?}: {}", task_id, owner, e);
                    continue;
                }
            }
        }

        None
    }

    async fn fetch_remote(&self, node_id: &NodeId, task_id: &TaskId) -> Result<Option<TaskEntry>> {
        let node = self
            .membership
            .get_member(node_id)
            .ok_or_else(|| anyhow::anyhow!("Owner node not found: {:?}", node_id))?;

        let url = format!(
            "http://{}{}/{}",
            node.http_addr, ENDPOINT_TASK_INTERNAL_GET, task_id.0
        );

        let response = self
            .get_with_retry(url, Duration::from_millis(500), 3)
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("GET request failed {}", response.status()));
        }

        let get_response: GetEntryResponse = response.json().await?;
        Ok(get_response.entry)
    }

    // --- Writes ---

    /// Writes back a modified entry, routed to the partition Primary and
    /// replicated to backups. Read-modify-write callers hold the per-entry
    /// lock across the read and this write.
    pub async fn put(&self, entry: TaskEntry) -> Result<()> {
        let op_id = Uuid::new_v4().to_string();
        self.put_with_op(entry, op_id).await
    }

    pub async fn put_with_op(&self, entry: TaskEntry, op_id: String) -> Result<()> {
        if !self.should_process(&op_id) {
            return Ok(());
        }

        let partition = self.partitioner.get_partition(&entry.id.0);
        let owners = self.partitioner.get_owners(partition);

        if owners.is_empty() {
            tracing::warn!("No alive nodes, storing task {} locally as fallback", entry.id);
            let task_id = entry.id.clone();
            self.store_local(partition, entry);
            self.publish_event(task_id, RegistryEventKind::Updated);
            return Ok(());
        }

        if self.membership.local_node.id != owners[0] {
            self.forward_put(&owners[0], partition, op_id, entry).await
        } else {
            let task_id = entry.id.clone();
            self.store_local(partition, entry.clone());

            for backup in owners.iter().skip(1) {
                if let Err(e) = self
                    .replicate_to_backup(backup, partition, op_id.clone(), entry.clone())
                    .await
                {
                    tracing::warn!(
                        "Replication of task {} to {:?} failed: {}",
                        task_id,
                        backup,
                        e
                    );
                }
            }

            self.publish_event(task_id, RegistryEventKind::Updated);
            Ok(())
        }
    }

    async fn forward_put(
        &self,
        primary_node_id: &NodeId,
        partition: u32,
        op_id: String,
        entry: TaskEntry,
    ) -> Result<()> {
        let node = self
            .membership
            .get_member(primary_node_id)
            .ok_or_else(|| anyhow::anyhow!("Primary node not found"))?;

        let payload = PutEntryRequest {
            partition,
            op_id,
            entry,
        };
        let response = self
            .post_with_retry(
                format!("http://{}{}", node.http_addr, ENDPOINT_TASK_PUT),
                &payload,
                Duration::from_millis(500),
                3,
            )
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Forwarded put failed {}", response.status()));
        }

        Ok(())
    }

    // --- Locking ---

    /// Acquires the per-entry lock, blocking up to `timeout`, and returns a
    /// consistent snapshot read under the lock.
    ///
    /// The lock lives on the partition Primary: local acquisition claims a
    /// slot in the lock table, remote acquisition long-polls the Primary over
    /// HTTP. Every success must be paired with [`TaskRegistry::unlock`] on
    /// every exit path.
    pub async fn try_lock_and_get(&self, task_id: &TaskId, timeout: Duration) -> Result<TaskEntry> {
        let partition = self.partitioner.get_partition(&task_id.0);
        let owners = self.partitioner.get_owners(partition);

        if owners.is_empty() || owners[0] == self.membership.local_node.id {
            let holder = self.membership.local_node.id.clone();
            return self.lock_local(task_id, &holder, timeout).await;
        }

        self.lock_remote(&owners[0], task_id, timeout).await
    }

    /// Claims the local lock slot for `holder`, polling until the deadline.
    ///
    /// Strictly exclusive: even two acquisitions by the same node serialize,
    /// so concurrent actions on one node cannot both hold the lock. An
    /// expired claim may be stolen.
    pub async fn lock_local(
        &self,
        task_id: &TaskId,
        holder: &NodeId,
        timeout: Duration,
    ) -> Result<TaskEntry> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let claimed = {
                use dashmap::mapref::entry::Entry;
                match self.locks.entry(task_id.clone()) {
                    Entry::Vacant(vacant) => {
                        vacant.insert(LockClaim {
                            holder: holder.clone(),
                            expires: now_ms() + LOCK_LEASE_MS,
                        });
                        true
                    }
                    Entry::Occupied(mut occupied) => {
                        if occupied.get().expires < now_ms() {
                            tracing::warn!(
                                "Stealing expired lock on task {} from {}",
                                task_id,
                                occupied.get().holder
                            );
                            occupied.insert(LockClaim {
                                holder: holder.clone(),
                                expires: now_ms() + LOCK_LEASE_MS,
                            });
                            true
                        } else {
                            false
                        }
                    }
                }
            };

            if claimed {
                return self.get_local(task_id).ok_or_else(|| {
                    // Grabbed a lock for an entry we don't hold; release it.
                    self.unlock_local(task_id, holder);
                    anyhow::anyhow!("Task {} not found in local partition", task_id)
                });
            }

            if tokio::time::Instant::now() >= deadline {
                return Err(anyhow::anyhow!(
                    "Timed out acquiring lock on task {}",
                    task_id
                ));
            }
            tokio::time::sleep(LOCK_POLL_INTERVAL).await;
        }
    }

    async fn lock_remote(
        &self,
        primary: &NodeId,
        task_id: &TaskId,
        timeout: Duration,
    ) -> Result<TaskEntry> {
        let node = self
            .membership
            .get_member(primary)
            .ok_or_else(|| anyhow::anyhow!("Primary node not found"))?;

        let payload = LockRequest {
            task_id: task_id.clone(),
            holder: self.membership.local_node.id.clone(),
            timeout_ms: timeout.as_millis() as u64,
        };

        // Long-poll: the primary holds the request until granted or timed out.
        let response = self
            .http_client
            .post(format!("http://{}{}", node.http_addr, ENDPOINT_TASK_LOCK))
            .json(&payload)
            .timeout(timeout + Duration::from_secs(2))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Lock request failed {}", response.status()));
        }

        let lock_response: LockResponse = response.json().await?;
        if !lock_response.granted {
            return Err(anyhow::anyhow!(
                "Timed out acquiring lock on task {}",
                task_id
            ));
        }
        lock_response
            .entry
            .ok_or_else(|| anyhow::anyhow!("Task {} not found on primary", task_id))
    }

    /// Releases the per-entry lock. Best-effort: a failed remote release is
    /// logged and left to lease expiry.
    pub async fn unlock(&self, task_id: &TaskId) {
        let partition = self.partitioner.get_partition(&task_id.0);
        let owners = self.partitioner.get_owners(partition);
        let local = self.membership.local_node.id.clone();

        if owners.is_empty() || owners[0] == local {
            self.unlock_local(task_id, &local);
            return;
        }

        let Some(node) = self.membership.get_member(&owners[0]) else {
            return;
        };
        let payload = UnlockRequest {
            task_id: task_id.clone(),
            holder: local,
        };
        match self
            .post_with_retry(
                format!("http://{}{}", node.http_addr, ENDPOINT_TASK_UNLOCK),
                &payload,
                Duration::from_millis(500),
                2,
            )
            .await
        {
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(
                    "Failed to release lock on task {} (lease will expire): {}",
                    task_id,
                    e
                );
            }
        }
    }

    /// Removes a lock claim if `holder` owns it.
    pub fn unlock_local(&self, task_id: &TaskId, holder: &NodeId) {
        self.locks
            .remove_if(task_id, |_, claim| &claim.holder == holder);
    }

    // --- Partition iteration & anti-entropy ---

    /// Ids of entries in locally-primary partitions.
    pub fn local_keys(&self) -> Vec<TaskId> {
        let mut keys = Vec::new();
        for partition in self.partitioner.my_primary_partitions() {
            if let Some(partition_map) = self.local_entries.get(&partition) {
                for entry in partition_map.iter() {
                    keys.push(entry.key().clone());
                }
            }
        }
        keys
    }

    pub fn local_entry_count(&self) -> usize {
        self.local_entries
            .iter()
            .map(|entry| entry.value().len())
            .sum()
    }

    pub fn has_partition(&self, partition: u32) -> bool {
        self.local_entries
            .get(&partition)
            .map(|map| !map.is_empty())
            .unwrap_or(false)
    }

    /// Dumps all entries in a partition (anti-entropy source side).
    pub fn dump_partition(&self, partition: u32) -> Vec<TaskEntry> {
        let mut entries = Vec::new();
        if let Some(partition_map) = self.local_entries.get(&partition) {
            for entry in partition_map.iter() {
                entries.push(entry.value().clone());
            }
        }
        entries
    }

    /// Bulk-inserts entries received from a peer; existing local entries win.
    pub fn apply_partition_entries(&self, partition: u32, entries: Vec<TaskEntry>) {
        let partition_map = self
            .local_entries
            .entry(partition)
            .or_insert_with(DashMap::new);
        for entry in entries {
            if !partition_map.contains_key(&entry.id) {
                partition_map.insert(entry.id.clone(), entry);
            }
        }
    }

    /// Fetches all entries of a partition from a remote node (anti-entropy pull).
    pub async fn fetch_partition(
        &self,
        node_id: &NodeId,
        partition: u32,
    ) -> Result<Vec<TaskEntry>> {
        let node = self
            .membership
            .get_member(node_id)
            .ok_or_else(|| anyhow::anyhow!("Owner node not found: {:?}", node_id))?;

        let url = format!(
            "http://{}{}/{}",
            node.http_addr, ENDPOINT_TASK_PARTITION_DUMP, partition
        );

        let response = self
            .get_with_retry(url, Duration::from_millis(500), 3)
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(anyhow::anyhow!(
                "Partition dump failed {}",
                response.status()
            ));
        }

        let dump: PartitionDumpResponse = response.json().await?;
        Ok(dump.entries)
    }

    // --- HTTP Helpers with Backoff ---

    async fn post_with_retry<T: serde::Serialize>(
        &self,
        url: String,
        payload: &T,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .post(url.clone())
                .json(payload)
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    // Simple jitter to prevent thundering herd
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }

    async fn get_with_retry(
        &self,
        url: String,
        timeout: Duration,
        attempts: usize,
    ) -> Result<reqwest::Response> {
        let mut delay_ms = 150u64;

        for attempt in 0..attempts {
            let response = self
                .http_client
                .get(url.clone())
                .timeout(timeout)
                .send()
                .await;

            match response {
                Ok(resp) => return Ok(resp),
                Err(e) => {
                    if attempt + 1 == attempts {
                        return Err(anyhow::anyhow!(e));
                    }
                    let jitter = rand::random::<u64>() % 50;
                    tokio::time::sleep(Duration::from_millis(delay_ms + jitter)).await;
                    delay_ms = (delay_ms * 2).min(1200);
                }
            }
        }

        Err(anyhow::anyhow!("Retry attempts exhausted"))
    }
}
