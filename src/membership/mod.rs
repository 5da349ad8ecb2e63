//! Membership & Discovery Module
//!
//! Implements a Gossip-based membership protocol (inspired by SWIM) to manage the
//! cluster topology. Nodes use this service to discover each other, detect failures,
//! and disseminate cluster state updates.
//!
//! ## Core Mechanisms
//! - **Gossip Protocol**: Nodes periodically exchange status updates via UDP to maintain
//!   a consistent view of the cluster.
//! - **Failure Detection**: Uses a "Suspect" -> "Dead" transition model with timeouts to
//!   handle node crashes gracefully.
//! - **Incarnation Numbers**: Solves conflict resolution when node state (Alive/Suspect)
//!   is disputed.
//! - **Topology Events**: Join/leave notifications are broadcast to subscribers; the
//!   scheduler uses them to trigger ownership scans and reschedule sweeps. This module
//!   contains no scheduling logic of its own, it is purely an event source.

pub mod service;
pub mod types;

#[cfg(test)]
mod tests;
