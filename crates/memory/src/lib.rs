//! Store implementations for convogen.
//!
//! The pipeline reads history and annotations through the core store
//! traits; these backends keep everything in process memory.

pub mod in_memory;

pub use in_memory::{InMemoryAnnotationStore, InMemoryHistoryStore};
