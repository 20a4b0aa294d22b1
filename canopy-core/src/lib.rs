//! # Canopy Core
//!
//! A content-addressed, immutable, versioned value store.
//!
//! Structured values (maps, lists, sets, strings, blobs, structs) are
//! canonically encoded and cut into chunks at content-defined boundaries by
//! a rolling hash, forming a deduplicated Merkle forest of prolly trees.
//! Chunk boundaries are a pure function of content and the chunking
//! parameters, so tree shape is history-independent: the same logical value
//! always has the same root hash, and a local edit disturbs only O(log n)
//! chunks. Named datasets point at commit values and advance by optimistic
//! compare-and-set.

pub mod chunk;
pub mod chunker;
pub mod cursor;
pub mod dataset;
pub mod diff;
pub mod encoding;
pub mod error;
pub mod gc;
pub mod hash;
pub mod rolling;
pub mod sequence;
mod splice;
pub mod stats;
pub mod value;
pub mod valuestore;

// Re-export commonly used types
pub use chunk::{ChunkStore, FileSystemChunkStore, MemoryChunkStore};
pub use chunker::SequenceChunker;
pub use cursor::SequenceCursor;
pub use dataset::{commit_payload, commit_type, Dataset};
pub use diff::{diff_chunks, ChunkDiff};
pub use encoding::{decode_value, encode_value};
pub use error::{CoreError, CoreResult};
pub use gc::{find_garbage, find_reachable, gc_stats, live_roots, sweep, GcStats};
pub use hash::Hash;
pub use rolling::{ChunkConfig, RollingValueHasher};
pub use sequence::{Item, Sequence};
pub use stats::{chunk_stats, ChunkStats};
pub use value::{Kind, Ref, StructDef, StructValue, Type, Value};
pub use valuestore::ValueStore;
