//! Transparent chunking for SpanStore.
//!
//! Content larger than a backend's object limit is split by the
//! [`Chunker`] into ordered chunks plus a JSON [`Manifest`], and reassembled
//! on read by the [`Stitcher`]. [`ChunkedStore`] puts both behind one
//! logical-content API.

pub mod chunker;
pub mod manifest;
pub mod naming;
pub mod stitcher;
pub mod store;

#[cfg(test)]
mod test_support;

pub use chunker::{ChunkReport, ChunkState, Chunker, ChunkerConfig};
pub use manifest::{chunk_count, chunk_size, ChunkEntry, Manifest, MANIFEST_VERSION};
pub use stitcher::Stitcher;
pub use store::{ChunkedStore, ChunkedStoreConfig, WriteOptions, DEFAULT_CHUNK_SIZE};
