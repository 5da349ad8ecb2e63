//! Distributed Scheduler Module
//!
//! Converts registry change notifications and bus messages into typed actions
//! and executes them against the task registry.
//!
//! ## Architecture Overview
//! 1. **Translation**: Every input maps to exactly one [`actions::Action`] via an
//!    exhaustive match over the message kind and the entry's current state.
//! 2. **Guarded Execution**: Actions that change scheduling state lock the entry,
//!    re-read it, and abandon the attempt when the pre-lock snapshot is stale.
//!    First lock holder with a valid snapshot wins; everyone else backs off.
//! 3. **Ownership Repair**: Membership changes trigger the
//!    [`scanner::OwnershipScanner`], which pulls moved partitions and rewrites
//!    stale owner records.
//! 4. **Re-evaluation**: Waiting entries are swept back into scheduling on
//!    membership changes and on a low-frequency timer.
//!
//! ## Submodules
//! - **`scheduler`**: Event loops, relevance filtering, translation tables.
//! - **`actions`**: The action sum type and its execution logic.
//! - **`scanner`**: Partition ownership repair.
//! - **`selector`**: Runtime-node selection policy (default: uniform random).

pub mod actions;
pub mod scanner;
pub mod scheduler;
pub mod selector;

#[cfg(test)]
mod tests;
