//! Persistence contracts consumed by the engine

pub mod memory;
mod traits;

pub use memory::InMemoryRecordStore;
pub use traits::{RecordStore, RelationshipFilter};
