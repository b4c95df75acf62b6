//! In-process host used by tests and the `pipsync simulate` command.

mod document;
mod media;
mod transport;

pub use document::{MemoryDocument, Region};
pub use media::{MemoryMedia, MemoryPipeline};
pub use transport::{parse_status, MemoryProbe, MemoryTransport};
