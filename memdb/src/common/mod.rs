//! Shared types and utilities: values, constants, the event bus and the
//! scheduler used for periodic work.

mod constants;
mod event_bus;
pub mod util;
mod value;

pub use constants::*;
pub use event_bus::*;
pub use util::*;
pub use value::*;
