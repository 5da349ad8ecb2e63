use super::handlers::ENDPOINT_BUS;
use super::messages::TaskMessage;
use crate::membership::service::MembershipService;

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

const LOCAL_CHANNEL_CAPACITY: usize = 512;
const PUBLISH_TIMEOUT: Duration = Duration::from_millis(500);

/// Cluster-wide publish/subscribe channel.
///
/// Publishing delivers to local subscribers immediately and fans out to every
/// alive peer as a single-attempt, fire-and-forget HTTP post. There is no
/// delivery guarantee; consumers are idempotent and rely on re-triggering
/// events (registry changes, membership changes, sweeps) to recover from a
/// lost message.
pub struct MessageBus {
    membership: Arc<MembershipService>,
    local: broadcast::Sender<TaskMessage>,
    http_client: reqwest::Client,
}

impl MessageBus {
    pub fn new(membership: Arc<MembershipService>) -> Arc<Self> {
        let (local, _) = broadcast::channel(LOCAL_CHANNEL_CAPACITY);
        Arc::new(Self {
            membership,
            local,
            http_client: reqwest::Client::new(),
        })
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskMessage> {
        self.local.subscribe()
    }

    /// Publishes a message to the whole cluster.
    ///
    /// Local subscribers receive it synchronously; the remote fan-out runs in
    /// a detached task so publishing never blocks on peer availability.
    pub fn publish(&self, msg: TaskMessage) {
        tracing::debug!("Publishing bus message: {:?}", msg);
        let _ = self.local.send(msg.clone());

        let peers: Vec<_> = self
            .membership
            .get_alive_members()
            .into_iter()
            .filter(|node| node.id != self.membership.local_node.id)
            .collect();

        if peers.is_empty() {
            return;
        }

        let client = self.http_client.clone();
        tokio::spawn(async move {
            for node in peers {
                let result = client
                    .post(format!("http://{}{}", node.http_addr, ENDPOINT_BUS))
                    .json(&msg)
                    .timeout(PUBLISH_TIMEOUT)
                    .send()
                    .await;

                if let Err(e) = result {
                    tracing::warn!("Failed to publish to {:?}: {}", node.id, e);
                }
            }
        });
    }

    /// Injects a message received from a peer into the local channel.
    pub fn deliver_local(&self, msg: TaskMessage) {
        let _ = self.local.send(msg);
    }
}
