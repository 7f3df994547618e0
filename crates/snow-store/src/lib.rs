//! snow-store — content-addressed object storage for snow.
//!
//! This crate is deliberately small and free of repository knowledge: it
//! knows how to fingerprint files ([`hasher`]), how to lay blobs out under an
//! `objects/` directory ([`store`]), and nothing else. Mount tables, clone
//! primitives, and trash policy belong to the calling crate, which injects a
//! copy function per operation.

pub mod error;
pub mod hash;
pub mod hasher;
pub mod store;

pub use error::StoreError;
pub use hash::Hash;
pub use hasher::{BLOCK_HASH_LIMIT, BLOCK_SIZE, FileHash, HashBlock};
pub use store::{BlobStore, CopyFn, WrittenBlob};
