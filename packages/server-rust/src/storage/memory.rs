//! In-memory repository backed by [`DashMap`].
//!
//! Implements every persistence collaborator of the operation core
//! ([`NodeStore`], [`VersionStore`], [`TransactionManager`]). Used by the
//! server binary and by tests.
//!
//! Transactions are serialized by a single async lock, and writes made
//! directly on the repository take the same lock, so they wait for an open
//! transaction to end. A transaction journals the prior value of every key
//! it writes; rollback (explicit or by drop) restores exactly those keys.
//! Reads are never blocked and may observe uncommitted writes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use docvault_core::{properties, Association, AssociationKind, DeleteMode, Node, Value, Version};
use parking_lot::Mutex;
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::service::operation::RepositoryError;
use crate::time::now_millis;
use crate::traits::{NodeStore, Transaction, TransactionManager, VersionStore};

/// Node type of the repository root created by [`MemoryRepository::create_root`].
pub const ROOT_NODE_TYPE: &str = "dv:root";

/// Prior values of the keys a transaction wrote; `None` means absent.
#[derive(Default)]
struct Journal {
    nodes: HashMap<Uuid, Option<Node>>,
    versions: HashMap<Uuid, Option<Vec<Version>>>,
}

#[derive(Default)]
struct MemoryState {
    nodes: DashMap<Uuid, Node>,
    versions: DashMap<Uuid, Vec<Version>>,
    tx_lock: Arc<AsyncMutex<()>>,
}

impl MemoryState {
    fn live(&self, uuid: Uuid) -> Result<Node, RepositoryError> {
        self.nodes
            .get(&uuid)
            .filter(|n| !n.deleted)
            .map(|n| n.clone())
            .ok_or_else(|| RepositoryError::not_found(format!("node {uuid}")))
    }

    /// `root` and every node reachable from it through hard parent edges.
    fn hard_descendants(&self, root: Uuid) -> Vec<Uuid> {
        let mut found = vec![root];
        let mut cursor = 0;
        while cursor < found.len() {
            let parent = found[cursor];
            cursor += 1;
            for entry in &self.nodes {
                let is_child = entry.value().associations.iter().any(|a| {
                    a.kind == AssociationKind::Parent && a.hard && a.target == parent
                });
                if is_child && !found.contains(entry.key()) {
                    found.push(*entry.key());
                }
            }
        }
        found
    }

    fn journal_node(&self, journal: Option<&Mutex<Journal>>, uuid: Uuid) {
        if let Some(journal) = journal {
            let prior = self.nodes.get(&uuid).map(|n| n.clone());
            journal.lock().nodes.entry(uuid).or_insert(prior);
        }
    }

    fn journal_versions(&self, journal: Option<&Mutex<Journal>>, node: Uuid) {
        if let Some(journal) = journal {
            let prior = self.versions.get(&node).map(|h| h.clone());
            journal.lock().versions.entry(node).or_insert(prior);
        }
    }

    fn create_node(&self, node: Node, journal: Option<&Mutex<Journal>>) -> Result<Uuid, RepositoryError> {
        let uuid = node.uuid;
        if self.nodes.contains_key(&uuid) {
            return Err(RepositoryError::illegal_argument(format!(
                "node {uuid} already exists"
            )));
        }
        self.journal_node(journal, uuid);
        self.nodes.insert(uuid, node);
        Ok(uuid)
    }

    fn copy_node(
        &self,
        source: Uuid,
        association: Association,
        journal: Option<&Mutex<Journal>>,
    ) -> Result<Node, RepositoryError> {
        let original = self.live(source)?;
        self.live(association.target)?;

        let copy = Node {
            uuid: Uuid::new_v4(),
            associations: vec![association],
            deleted: false,
            ..original
        };
        self.journal_node(journal, copy.uuid);
        self.nodes.insert(copy.uuid, copy.clone());
        debug!(source = %source, copy = %copy.uuid, "node copied");
        Ok(copy)
    }

    fn save_node(&self, node: &Node, journal: Option<&Mutex<Journal>>) -> Result<(), RepositoryError> {
        self.live(node.uuid)?;
        self.journal_node(journal, node.uuid);
        self.nodes.insert(node.uuid, node.clone());
        Ok(())
    }

    fn delete_node(
        &self,
        uuid: Uuid,
        mode: DeleteMode,
        journal: Option<&Mutex<Journal>>,
    ) -> Result<(), RepositoryError> {
        match mode {
            DeleteMode::Soft => {
                let mut node = self.live(uuid)?;
                self.journal_node(journal, uuid);
                node.deleted = true;
                self.nodes.insert(uuid, node);
            }
            DeleteMode::Purge => {
                if !self.nodes.contains_key(&uuid) {
                    return Err(RepositoryError::not_found(format!("node {uuid}")));
                }
                self.journal_node(journal, uuid);
                self.nodes.remove(&uuid);
            }
            DeleteMode::PurgeComplete => {
                if !self.nodes.contains_key(&uuid) {
                    return Err(RepositoryError::not_found(format!("node {uuid}")));
                }
                for doomed in self.hard_descendants(uuid) {
                    self.journal_node(journal, doomed);
                    self.nodes.remove(&doomed);
                }
            }
        }
        debug!(node = %uuid, %mode, "node deleted");
        Ok(())
    }

    fn create_version(
        &self,
        node: &Node,
        creator: &str,
        tag: Option<&str>,
        journal: Option<&Mutex<Journal>>,
    ) -> Result<Version, RepositoryError> {
        self.journal_versions(journal, node.uuid);
        let mut history = self.versions.entry(node.uuid).or_default();
        let number = u32::try_from(history.len() + 1)
            .map_err(|_| anyhow::anyhow!("version numbers of {} exhausted", node.uuid))?;
        let version = Version {
            node: node.uuid,
            number,
            tag: tag.map(str::to_string),
            created_at: now_millis(),
            creator: creator.to_string(),
            metadata: node.metadata(),
        };
        history.push(version.clone());
        Ok(version)
    }

    fn list_versions(&self, node: Uuid) -> Vec<Version> {
        self.versions.get(&node).map(|h| h.clone()).unwrap_or_default()
    }

    /// Puts every journaled key back to its prior value.
    fn restore(&self, journal: Journal) {
        for (uuid, prior) in journal.nodes {
            match prior {
                Some(node) => {
                    self.nodes.insert(uuid, node);
                }
                None => {
                    self.nodes.remove(&uuid);
                }
            }
        }
        for (node, prior) in journal.versions {
            match prior {
                Some(history) => {
                    self.versions.insert(node, history);
                }
                None => {
                    self.versions.remove(&node);
                }
            }
        }
    }
}

/// Cloneable handle to a shared in-memory repository.
#[derive(Clone, Default)]
pub struct MemoryRepository {
    state: Arc<MemoryState>,
}

impl MemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a parentless root node named `name` and returns its UUID.
    /// Meant for setup, before the repository is shared.
    #[must_use]
    pub fn create_root(&self, name: &str) -> Uuid {
        let mut root = Node::new(ROOT_NODE_TYPE);
        root.properties
            .insert(properties::NAME.to_string(), Value::from(name));
        let uuid = root.uuid;
        self.state.nodes.insert(uuid, root);
        uuid
    }

    /// Stored state of `uuid`, including soft-deleted nodes.
    #[must_use]
    pub fn raw_node(&self, uuid: Uuid) -> Option<Node> {
        self.state.nodes.get(&uuid).map(|n| n.clone())
    }

    /// Number of stored nodes, including soft-deleted ones.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.state.nodes.len()
    }
}

#[async_trait]
impl NodeStore for MemoryRepository {
    async fn get_node(&self, uuid: Uuid) -> Result<Node, RepositoryError> {
        self.state.live(uuid)
    }

    async fn create_node(&self, node: Node) -> Result<Uuid, RepositoryError> {
        let _lock = self.state.tx_lock.lock().await;
        self.state.create_node(node, None)
    }

    async fn copy_node(
        &self,
        source: Uuid,
        association: Association,
    ) -> Result<Node, RepositoryError> {
        let _lock = self.state.tx_lock.lock().await;
        self.state.copy_node(source, association, None)
    }

    async fn save_node(&self, node: &Node) -> Result<(), RepositoryError> {
        let _lock = self.state.tx_lock.lock().await;
        self.state.save_node(node, None)
    }

    async fn delete_node(&self, uuid: Uuid, mode: DeleteMode) -> Result<(), RepositoryError> {
        let _lock = self.state.tx_lock.lock().await;
        self.state.delete_node(uuid, mode, None)
    }
}

#[async_trait]
impl VersionStore for MemoryRepository {
    async fn create_version(
        &self,
        node: &Node,
        creator: &str,
        tag: Option<&str>,
    ) -> Result<Version, RepositoryError> {
        let _lock = self.state.tx_lock.lock().await;
        self.state.create_version(node, creator, tag, None)
    }

    async fn list_versions(&self, node: Uuid) -> Result<Vec<Version>, RepositoryError> {
        Ok(self.state.list_versions(node))
    }
}

// ---------------------------------------------------------------------------
// Transactions
// ---------------------------------------------------------------------------

/// Stores handed out by a [`MemoryTransaction`]. Writes are journaled and
/// refused once the transaction has ended.
struct TransactionStore {
    state: Arc<MemoryState>,
    journal: Mutex<Journal>,
    open: AtomicBool,
}

impl TransactionStore {
    fn journal(&self) -> Result<&Mutex<Journal>, RepositoryError> {
        if self.open.load(Ordering::Acquire) {
            Ok(&self.journal)
        } else {
            Err(RepositoryError::Transaction(
                "write through a transaction that has already ended".to_string(),
            ))
        }
    }
}

#[async_trait]
impl NodeStore for TransactionStore {
    async fn get_node(&self, uuid: Uuid) -> Result<Node, RepositoryError> {
        self.state.live(uuid)
    }

    async fn create_node(&self, node: Node) -> Result<Uuid, RepositoryError> {
        self.state.create_node(node, Some(self.journal()?))
    }

    async fn copy_node(
        &self,
        source: Uuid,
        association: Association,
    ) -> Result<Node, RepositoryError> {
        self.state.copy_node(source, association, Some(self.journal()?))
    }

    async fn save_node(&self, node: &Node) -> Result<(), RepositoryError> {
        self.state.save_node(node, Some(self.journal()?))
    }

    async fn delete_node(&self, uuid: Uuid, mode: DeleteMode) -> Result<(), RepositoryError> {
        self.state.delete_node(uuid, mode, Some(self.journal()?))
    }
}

#[async_trait]
impl VersionStore for TransactionStore {
    async fn create_version(
        &self,
        node: &Node,
        creator: &str,
        tag: Option<&str>,
    ) -> Result<Version, RepositoryError> {
        self.state.create_version(node, creator, tag, Some(self.journal()?))
    }

    async fn list_versions(&self, node: Uuid) -> Result<Vec<Version>, RepositoryError> {
        Ok(self.state.list_versions(node))
    }
}

struct MemoryTransaction {
    store: Arc<TransactionStore>,
    _lock: OwnedMutexGuard<()>,
}

impl MemoryTransaction {
    /// Closes the store and returns what it journaled.
    fn finish(&self) -> Journal {
        self.store.open.store(false, Ordering::Release);
        std::mem::take(&mut *self.store.journal.lock())
    }
}

#[async_trait]
impl TransactionManager for MemoryRepository {
    async fn begin(&self) -> Result<Box<dyn Transaction>, RepositoryError> {
        let lock = Arc::clone(&self.state.tx_lock).lock_owned().await;
        Ok(Box::new(MemoryTransaction {
            store: Arc::new(TransactionStore {
                state: Arc::clone(&self.state),
                journal: Mutex::new(Journal::default()),
                open: AtomicBool::new(true),
            }),
            _lock: lock,
        }))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn nodes(&self) -> Arc<dyn NodeStore> {
        Arc::clone(&self.store) as Arc<dyn NodeStore>
    }

    fn versions(&self) -> Arc<dyn VersionStore> {
        Arc::clone(&self.store) as Arc<dyn VersionStore>
    }

    async fn commit(self: Box<Self>) -> Result<(), RepositoryError> {
        self.finish();
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), RepositoryError> {
        let journal = self.finish();
        self.store.state.restore(journal);
        debug!("transaction rolled back");
        Ok(())
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.store.open.load(Ordering::Acquire) {
            let journal = self.finish();
            self.store.state.restore(journal);
            warn!("transaction dropped before it ended; rolled back");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
