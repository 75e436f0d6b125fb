use std::sync::Arc;

use async_trait::async_trait;
use docvault_core::{Association, DeleteMode, Node, Principal, Version};
use uuid::Uuid;

use crate::service::operation::RepositoryError;

/// Identity service that verifies credentials for an (authority, tenant) pair.
#[async_trait]
pub trait Authenticator: Send + Sync {
    /// Authenticate `authority` within `tenant`.
    ///
    /// Rejections are reported as `RepositoryError::Unauthenticated`.
    async fn authenticate(
        &self,
        authority: &str,
        tenant: &str,
        password: &str,
    ) -> Result<Principal, RepositoryError>;
}

/// Node persistence behind the repository's graph engine.
#[async_trait]
pub trait NodeStore: Send + Sync {
    /// Load a live node. Missing and soft-deleted nodes are `NotFound`.
    async fn get_node(&self, uuid: Uuid) -> Result<Node, RepositoryError>;

    /// Persist a new node and return its UUID.
    async fn create_node(&self, node: Node) -> Result<Uuid, RepositoryError>;

    /// Shallow-copy `source` (no descendants) under `association.target`
    /// using `association` as the copy's only edge. Returns the stored copy.
    async fn copy_node(
        &self,
        source: Uuid,
        association: Association,
    ) -> Result<Node, RepositoryError>;

    /// Replace the stored state of an existing node.
    async fn save_node(&self, node: &Node) -> Result<(), RepositoryError>;

    /// Remove a node according to `mode`.
    async fn delete_node(&self, uuid: Uuid, mode: DeleteMode) -> Result<(), RepositoryError>;
}

/// Append-only version history.
#[async_trait]
pub trait VersionStore: Send + Sync {
    /// Snapshot `node` into the next version number.
    async fn create_version(
        &self,
        node: &Node,
        creator: &str,
        tag: Option<&str>,
    ) -> Result<Version, RepositoryError>;

    /// All versions of `node`, ascending by number. Empty when none exist.
    async fn list_versions(&self, node: Uuid) -> Result<Vec<Version>, RepositoryError>;
}

/// Opens transaction boundaries over the node and version stores.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn Transaction>, RepositoryError>;
}

/// An open transaction.
///
/// Only writes made through [`nodes`](Self::nodes) and
/// [`versions`](Self::versions) belong to it. Dropping it without committing
/// rolls those writes back.
#[async_trait]
pub trait Transaction: Send {
    /// Node store whose writes join this transaction.
    fn nodes(&self) -> Arc<dyn NodeStore>;

    /// Version store whose writes join this transaction.
    fn versions(&self) -> Arc<dyn VersionStore>;

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError>;

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError>;
}
