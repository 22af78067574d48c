//! Segsync: Causal State Synchronization for Live Media Segments
//!
//! Publishes a continuously growing set of file references (live media
//! segments) into a shared, replicated state tree via patch-based
//! transactions forming a causal DAG, backed by content-addressed blob
//! storage on a replication peer.

pub mod builder;
pub mod commit;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;
pub mod patch;
pub mod peer;
pub mod reader;
pub mod session;
pub mod types;
pub mod watch;
