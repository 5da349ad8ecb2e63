//! Cluster Message Bus Module
//!
//! A broadcast publish/subscribe channel carrying run/kill requests, task
//! lifecycle notifications, and scheduling-internal control messages. Every
//! node receives every message and filters locally by relevance (partition
//! ownership for scheduling messages, explicit receiver id for run requests).
//!
//! Delivery is fire-and-forget: local subscribers get the message through an
//! in-process channel, remote nodes through a single-attempt HTTP post.

pub mod bus;
pub mod handlers;
pub mod messages;

#[cfg(test)]
mod tests;
