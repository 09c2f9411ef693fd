//! Actor-based monitoring daemon
//!
//! Every long-running component is an independent tokio task with an mpsc command
//! channel and a cloneable handle.
//!
//! ## Architecture Overview
//!
//! ```text
//!                      +------------------+
//!                      | pingguard (main) |
//!                      +--------+---------+
//!                               | starts
//!                      +--------v---------+
//!                      |    Supervisor    |
//!                      +--------+---------+
//!                               | spawns one per target
//!            +------------------+------------------+
//!            |                                     |
//!   +--------v---------+                  +--------v---------+
//!   | TargetMonitor-1  |       ...        | TargetMonitor-N  |
//!   | (probe process)  |                  | (probe process)  |
//!   +---+----------+---+                  +---+----------+---+
//!       |          | CheckNow                 |          |
//!       |   +------v-------------------------v--+        |
//!       |   |        ConnectivityActor          |        |
//!       |   +------+----------------------------+        |
//!       |          | writes                              |
//!       |   +------v------+   read on every line         |
//!       |   | SharedState | <----------------------------+
//!       |   +-------------+
//!       | AlertEvent
//!   +---v---------------+      +-------------------+
//!   | AlertDispatcher   +----->| channel / queue   |
//!   +-------------------+      +-------------------+
//! ```
//!
//! ## Communication Patterns
//!
//! 1. **Commands**: each actor has an mpsc command channel for control messages
//! 2. **Request/Response**: oneshot channels for forced checks, flushes and state queries
//! 3. **Shared state**: grace deadline, connectivity and reset epoch in an `Arc<SharedState>`

pub mod connectivity;
pub mod dispatcher;
pub mod messages;
pub mod supervisor;
pub mod target_monitor;
