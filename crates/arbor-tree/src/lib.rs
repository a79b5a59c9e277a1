//! Persistent hash tree for arbor.
//!
//! A model is a map from [`NodeId`](arbor_types::NodeId) to [`NodeData`]
//! stored as a trie of content-addressed [`TreeChunk`]s. A [`Tree`] is only
//! the hash of its root chunk: edits copy the chunks on one root-to-leaf path
//! and share every other chunk with the previous tree.
//!
//! # Components
//!
//! - [`Tree`] -- immutable snapshot with reads, raw writes and model edits
//! - [`ChunkLoader`] -- chunk reads through the bulk executor and a cache
//! - [`Descendants`], [`AllChildren`] -- lazy, restartable, batched sequences
//!
//! The trie shape depends only on the set of nodes, so two trees holding the
//! same nodes have the same hash regardless of edit history.

pub mod chunk;
pub mod edit;
pub mod error;
mod hamt;
pub mod loader;
pub mod node;
pub mod traversal;
pub mod tree;

pub use chunk::TreeChunk;
pub use error::{TreeError, TreeResult};
pub use hamt::NodeChange;
pub use loader::{ChunkLoader, DEFAULT_CHUNK_BATCH};
pub use node::NodeData;
pub use traversal::{AllChildren, AllChildrenIter, Descendants, DescendantsIter};
pub use tree::Tree;
