// rkv-common - Shared error types and wire helpers for RecordKV
//
// Every other crate in the workspace depends on this one for the error
// taxonomy, the RESP2 frame codec and the glob matcher used by SCAN.

pub mod error;
pub mod glob;
pub mod protocol;

// Re-export for convenience
pub use error::*;
pub use glob::{escape_glob, glob_match};
pub use protocol::{Frame, FrameParser, RespError};
