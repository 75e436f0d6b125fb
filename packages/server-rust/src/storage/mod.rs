//! Reference implementations of the persistence and identity collaborators.
//!
//! - [`MemoryRepository`]: node store, version history and transactions in memory
//! - [`StaticAuthenticator`]: account directory for the identity service

pub mod directory;
pub mod memory;

pub use directory::StaticAuthenticator;
pub use memory::{MemoryRepository, ROOT_NODE_TYPE};
