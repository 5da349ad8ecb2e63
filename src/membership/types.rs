use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Instant;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum NodeState {
    Alive,
    Suspect,
    Dead,
}

/// Represents a single member in the cluster.
///
/// Contains identity, network addressing, role, and current lifecycle state.
/// The `incarnation` field is a logical clock used to order updates and resolve
/// conflicts (e.g., refuting a false "Suspect" claim). Nodes with `is_runtime`
/// set advertise themselves as execution nodes and are eligible targets for
/// the runtime selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Node {
    pub id: NodeId,
    pub gossip_addr: SocketAddr,
    pub http_addr: SocketAddr,
    pub state: NodeState,
    pub incarnation: u64,
    /// Whether this node accepts run-task requests.
    pub is_runtime: bool,

    #[serde(skip)]
    pub last_seen: Option<Instant>,
}

/// The wire protocol for inter-node gossip communication.
///
/// - `Ping/Ack`: Used for liveness checks and state synchronization.
/// - `Join`: Sent by new nodes to seed nodes to enter the cluster.
/// - `Suspect/Alive`: Disseminates changes in node health.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum GossipMessage {
    Ping {
        from: NodeId,
        incarnation: u64,
    },

    Ack {
        from: NodeId,
        incarnation: u64,
        members: Vec<Node>,
    },

    Join {
        node: Node,
    },

    Suspect {
        node_id: NodeId,
        incarnation: u64,
    },

    Alive {
        node_id: NodeId,
        incarnation: u64,
    },
}

/// Kind of topology change reported to subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipEventKind {
    Joined,
    Left,
}

/// A cluster topology change.
///
/// Delivery is best-effort: a lagging subscriber may miss events, which is
/// harmless because every consumer pass (ownership scan, reschedule sweep)
/// is idempotent and re-triggerable.
#[derive(Debug, Clone)]
pub struct MembershipEvent {
    pub node_id: NodeId,
    pub kind: MembershipEventKind,
}
