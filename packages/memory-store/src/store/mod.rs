//! The two store implementations (§4.C, §4.D) plus the shared payload codec
//! (§6) and filter compiler (§4.E) they build on.

pub mod chunk_store;
pub mod codec;
pub mod filter;
pub mod relationship_store;

pub use chunk_store::{ChunkStore, DriverChunkStore, SCROLL_CAP};
pub use relationship_store::{DriverRelationshipStore, RelationshipStore, DEFAULT_MAX_DEPTH};
