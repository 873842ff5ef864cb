mod field_escape;
mod task_util;

pub use field_escape::*;
pub use task_util::*;
