//! Foundation types for arbor.
//!
//! Every other arbor crate depends on `arbor-types`.
//!
//! # Key Types
//!
//! - [`ObjectHash`]: SHA-256 content hash, the key of every stored record
//! - [`NodeId`] / [`VersionId`]: client-allocated 64-bit identifiers
//! - [`IdGenerator`]: per-client id allocation
//! - [`RepositoryId`] / [`BranchReference`]: names of the mutable head pointers
//! - [`Timestamp`] / [`TimeRange`]: version times for history queries

pub mod error;
pub mod hash;
pub mod ids;
pub mod repository;
pub mod temporal;

pub use error::TypeError;
pub use hash::ObjectHash;
pub use ids::{IdGenerator, NodeId, NodeReference, VersionId};
pub use repository::{BranchReference, RepositoryId};
pub use temporal::{TimeRange, Timestamp};
