//! Content hashing for arbor.
//!
//! A record's key is the SHA-256 digest of exactly the bytes stored under it,
//! so any holder of the bytes can recompute and check the key. Records carry
//! their kind tag inside those bytes; no extra domain prefix is mixed in.
//!
//! Digests come from the `sha2` crate.

pub mod hasher;

pub use hasher::{ContentHasher, HasherError};
