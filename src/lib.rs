//! Distributed Grid Execution Cluster Library
//!
//! This library crate defines the core modules that make up the distributed system.
//! It serves as the foundation for the binary executable (`main.rs`).
//!
//! ## Architecture Modules
//! The system is composed of five loosely coupled subsystems:
//!
//! - **`membership`**: The cluster coordination layer. Uses a UDP-based Gossip protocol
//!   (SWIM-like) to manage node discovery, failure detection, and cluster topology.
//!   Publishes join/leave events consumed by the scheduler.
//! - **`registry`**: The distributed state layer. A sharded, replicated in-memory
//!   task registry with per-entry locking, partition ownership, and local change
//!   notification.
//! - **`bus`**: The cluster-wide publish/subscribe channel carrying control and
//!   lifecycle messages between scheduler nodes and runtime nodes.
//! - **`scheduler`**: The message-to-action pipeline. Translates registry changes
//!   and bus messages into typed actions, assigns tasks to runtime nodes under
//!   per-entry locking, and repairs partition ownership after membership changes.
//! - **`runtime`**: The execution-node-side process supervisor. Runs one external
//!   OS process per task name, tracks it, and reports lifecycle events back over
//!   the bus.

pub mod bus;
pub mod membership;
pub mod registry;
pub mod runtime;
pub mod scheduler;
