//! # MemDB - Distributed In-Memory Document Database
//!
//! MemDB keeps JSON-like documents in memory across a set of shards and runs
//! ACID transactions against them. Shards coordinate through a shared lock
//! service: a transaction locks every document it touches, works on private
//! copies, and flushes its changes to the shared backend when it commits.
//!
//! ## Key Features
//!
//! - **Sharded**: any shard can serve any document; locks keep shards consistent
//! - **Transactions**: read committed isolation, rollback on any error or panic
//! - **Unique indexes**: declared per collection and enforced across shards
//! - **Auto connection**: per-shard connections opened and reopened on demand
//! - **Events**: connection lifecycle events for lost shards and idle timeouts
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use memdb::memdb::MemDb;
//! use memdb::doc;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let db = MemDb::builder()
//!     .shard("s1", "127.0.0.1", 31017)
//!     .shard("s2", "127.0.0.1", 31018)
//!     .open()?;
//!
//! let autoconn = db.auto_connect()?;
//! let player = autoconn.collection("player");
//!
//! autoconn.transaction(|_| player.insert(doc! { _id: "p1", name: "rain", level: 0 }), Some("s1"))?;
//! autoconn.transaction(|_| player.update("p1", doc! { "$inc": { level: 1 } }), Some("s2"))?;
//!
//! autoconn.close()?;
//! db.shutdown();
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`backend`] - Storage of committed documents and index maintenance
//! - [`collection`] - Documents, selectors, modifiers and the collection API
//! - [`common`] - Values, constants, the event bus and the scheduler
//! - [`config`] - Cluster and connection configuration
//! - [`connection`] - Connections, auto connection and lifecycle events
//! - [`errors`] - Error types and result definitions
//! - [`lock`] - Lock service and the backoff lock client
//! - [`memdb`] - In-process cluster entry point
//! - [`memdb_builder`] - Cluster builder
//! - [`shard`] - Shards, descriptors and the local cluster
//! - [`store`] - Document cache and transaction working sets
//! - [`transaction`] - Transactions and their lifecycle

use crate::common::Scheduler;
use std::sync::LazyLock;

pub mod backend;
pub mod collection;
pub mod common;
pub mod config;
pub mod connection;
pub mod errors;
pub mod lock;
pub mod memdb;
pub mod memdb_builder;
pub mod shard;
pub mod store;
pub mod transaction;

pub(crate) static SCHEDULER: LazyLock<Scheduler> = LazyLock::new(Scheduler::new);
