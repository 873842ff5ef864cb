//! Shard processes, the in-process cluster and the connector the router
//! uses to reach them.

mod cluster;
mod descriptor;
#[allow(clippy::module_inception)]
mod shard;

pub use cluster::*;
pub use descriptor::*;
pub use shard::*;
