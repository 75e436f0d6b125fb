//! Docvault server: operation dispatch with per-call identity scoping,
//! a check-out / check-in version-control core and an HTTP invoke adapter.

pub mod network;
pub mod service;
pub mod storage;
pub mod time;
pub mod traits;

pub use network::{NetworkConfig, NetworkModule};
pub use service::{build_dispatcher, Collaborators, Dispatcher, ServerConfig, ServiceError};
pub use traits::{Authenticator, NodeStore, Transaction, TransactionManager, VersionStore};
