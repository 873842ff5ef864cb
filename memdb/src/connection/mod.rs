//! Connections to shards: single-shard [Connection]s with lifecycle events,
//! and the [AutoConnection] router that opens them on demand.

mod auto_connection;
#[allow(clippy::module_inception)]
mod connection;
mod event;

pub use auto_connection::*;
pub use connection::*;
pub use event::*;
