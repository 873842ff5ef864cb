mod document_cache;
mod working_set;

pub use document_cache::*;
pub use working_set::*;
