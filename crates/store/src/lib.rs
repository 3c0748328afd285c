//! Persistence ports and reference implementations.
//!
//! The repository traits in [`ports`] are the only persistence contract the
//! rest of the system sees. [`memory`] provides the in-process reference
//! implementation used by the dev composition and the test suites; a
//! relational implementation plugs in behind the same traits. [`blob`]
//! holds the blob gateway port and a local-filesystem implementation.

pub mod blob;
pub mod memory;
pub mod ports;

pub use blob::{BlobGateway, LocalBlobStore, UploadUrl};
pub use memory::MemoryStore;
pub use ports::{SessionRepo, UsageRepo, UserRepo};
