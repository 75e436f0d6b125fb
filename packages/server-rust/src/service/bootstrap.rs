//! Startup wiring: collaborators in, ready [`Dispatcher`] out.

use std::sync::Arc;

use tracing::info;

use super::config::ServerConfig;
use super::dispatcher::Dispatcher;
use super::domain::{NodeOperationsService, VersionControlService};
use super::execution::ExecutionPipeline;
use super::failure::FailureMapper;
use super::identity::IdentityService;
use super::registry::{MethodRegistry, ServiceContext};
use crate::storage::{MemoryRepository, StaticAuthenticator};
use crate::traits::{Authenticator, NodeStore, TransactionManager, VersionStore};

/// External collaborators the operation core calls.
#[derive(Clone)]
pub struct Collaborators {
    pub authenticator: Arc<dyn Authenticator>,
    pub nodes: Arc<dyn NodeStore>,
    pub versions: Arc<dyn VersionStore>,
    pub transactions: Arc<dyn TransactionManager>,
}

impl Collaborators {
    /// Every persistence collaborator backed by one in-memory repository.
    #[must_use]
    pub fn in_memory(repo: &MemoryRepository, authenticator: StaticAuthenticator) -> Self {
        Self {
            authenticator: Arc::new(authenticator),
            nodes: Arc::new(repo.clone()),
            versions: Arc::new(repo.clone()),
            transactions: Arc::new(repo.clone()),
        }
    }
}

/// Builds the method table from every operation provider, initializes the
/// providers and returns the dispatcher over them.
///
/// # Errors
///
/// Returns an error if any provider fails to initialize.
pub async fn build_dispatcher(
    config: Arc<ServerConfig>,
    collaborators: Collaborators,
) -> anyhow::Result<Dispatcher> {
    let mapper = FailureMapper::new(config.host_name.clone());
    let pipeline = Arc::new(ExecutionPipeline::new(
        IdentityService::new(collaborators.authenticator, &config),
        mapper.clone(),
    ));

    let mut registry = MethodRegistry::new();
    registry.register(Arc::new(VersionControlService::new(
        Arc::clone(&pipeline),
        Arc::clone(&collaborators.nodes),
        collaborators.versions,
        collaborators.transactions,
    )));
    registry.register(Arc::new(NodeOperationsService::new(
        pipeline,
        collaborators.nodes,
    )));

    registry
        .init_all(&ServiceContext {
            config: Arc::clone(&config),
        })
        .await?;
    info!(
        operations = registry.len(),
        host = %config.host_name,
        "method table built"
    );

    Ok(Dispatcher::new(Arc::new(registry), &config, mapper))
}
