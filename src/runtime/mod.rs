//! Execution Node Runtime Module
//!
//! The side of the system that actually runs things: a per-node process
//! supervisor receiving run/kill requests over the bus and reporting task
//! lifecycle events back. All state here is node-local; a crash loses the
//! slot table and leaves the cluster-side record to liveness handling.

pub mod engine;
