pub mod engine;
pub mod memory;

pub use engine::KvStore;
pub use engine::{ScanCursor, ScanPage};
pub use memory::MemoryStore;
