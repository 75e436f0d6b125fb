//! Domain operation providers.
//!
//! - [`versioning`]: check-out / check-in state machine and version history
//! - [`nodes`]: node create / read / update / delete
//!
//! Every provider method runs inside the
//! [`ExecutionPipeline`](crate::service::execution::ExecutionPipeline) and
//! takes the caller's credential bundle as argument 0.

pub mod nodes;
pub mod versioning;

use std::future::Future;
use std::sync::Arc;

use docvault_core::{IdentityContext, Node};
use tracing::warn;

use crate::service::operation::RepositoryError;
use crate::traits::{NodeStore, TransactionManager, VersionStore};

pub use nodes::NodeOperationsService;
pub use versioning::VersionControlService;

/// Position of the credential bundle in every domain operation.
pub(crate) const CONTEXT_ARG: &[usize] = &[0];

/// Role allowed to modify any node.
pub const ADMIN_ROLE: &str = "admin";

/// The identity established for a call that carried credentials.
pub(crate) fn caller(identity: Option<IdentityContext>) -> Result<IdentityContext, RepositoryError> {
    identity.ok_or_else(|| RepositoryError::Unauthenticated("no identity bound to call".to_string()))
}

/// Owner, explicit writers and admins may modify a node. A node without an
/// owner is writable by everyone.
pub(crate) fn ensure_writable(node: &Node, identity: &IdentityContext) -> Result<(), RepositoryError> {
    let who = identity.authority();
    let allowed = match &node.acl.owner {
        None => true,
        Some(owner) => {
            owner == who
                || node.acl.writers.contains(who)
                || identity.principal.roles.iter().any(|r| r == ADMIN_ROLE)
        }
    };
    if allowed {
        Ok(())
    } else {
        Err(RepositoryError::Forbidden(format!(
            "{who} may not modify node {}",
            node.uuid
        )))
    }
}

/// Stores bound to one open transaction.
pub(crate) struct TxStores {
    pub nodes: Arc<dyn NodeStore>,
    pub versions: Arc<dyn VersionStore>,
}

/// Runs `work` against the stores of a fresh transaction: committed on
/// success, rolled back on failure. If `work` panics or is dropped midway,
/// dropping the open transaction rolls it back.
pub(crate) async fn in_transaction<T, F, Fut>(
    transactions: &dyn TransactionManager,
    work: F,
) -> Result<T, RepositoryError>
where
    F: FnOnce(TxStores) -> Fut,
    Fut: Future<Output = Result<T, RepositoryError>>,
{
    let tx = transactions.begin().await?;
    let stores = TxStores {
        nodes: tx.nodes(),
        versions: tx.versions(),
    };
    match work(stores).await {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback().await {
                warn!(error = %rollback, "transaction rollback failed");
            }
            Err(err)
        }
    }
}
