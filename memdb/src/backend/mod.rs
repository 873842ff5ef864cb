mod adapter;
mod backend_provider;
mod memory;

pub use adapter::*;
pub use backend_provider::*;
pub use memory::*;
