//! The ordered key-value engine abstraction. Everything above this layer
//! (composite-key encoding, versioning, replication) operates on raw byte
//! strings; the engine only needs to keep them sorted and support floor
//! lookups and directional cursors.

pub mod engine;
pub mod file_engine;
pub mod file_log;
pub mod memory_engine;

pub use engine::{CursorStep, Engine};
pub use file_engine::FileEngine;
pub use memory_engine::MemoryEngine;


