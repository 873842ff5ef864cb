//! Documents, collection schemas and the transactional collection API.

#[allow(clippy::module_inception)]
mod collection;
mod document;
mod index;
mod modifier;
mod selector;

pub use collection::*;
pub use document::*;
pub use index::*;
pub use modifier::*;
pub use selector::*;
