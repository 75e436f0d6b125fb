//! Node create / read / update / delete operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use docvault_core::{properties, Association, DeleteMode, Node, Value};
use tracing::info;
use uuid::Uuid;

use super::{caller, ensure_writable, CONTEXT_ARG};
use crate::service::execution::ExecutionPipeline;
use crate::service::identity::CredentialBundle;
use crate::service::operation::{
    operation_names, Arguments, OperationResponse, RepositoryError, ServiceError,
};
use crate::service::registry::{OperationDescriptor, OperationFuture, OperationProvider};
use crate::service::scope::CallScope;
use crate::traits::NodeStore;

/// Association type linking a node to the folder that contains it.
pub const CONTAINS: &str = "dv:contains";

/// Working-copy bookkeeping is only ever written by check-out.
fn reject_reserved(props: &BTreeMap<String, Value>) -> Result<(), RepositoryError> {
    for reserved in [properties::WORKING_COPY_OWNER, properties::COPIED_FROM] {
        if props.contains_key(reserved) {
            return Err(RepositoryError::illegal_argument(format!(
                "property {reserved} is reserved"
            )));
        }
    }
    Ok(())
}

pub struct NodeOperationsService {
    pipeline: Arc<ExecutionPipeline>,
    nodes: Arc<dyn NodeStore>,
}

impl NodeOperationsService {
    #[must_use]
    pub fn new(pipeline: Arc<ExecutionPipeline>, nodes: Arc<dyn NodeStore>) -> Self {
        Self { pipeline, nodes }
    }

    /// Creates a node of `node_type` named `name` under `parent`.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty name or type or a reserved property,
    /// `NoSuchNode` when the parent does not exist.
    pub async fn create_node(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        parent: Uuid,
        name: &str,
        node_type: &str,
        props: BTreeMap<String, Value>,
    ) -> Result<Uuid, ServiceError> {
        self.pipeline.validate(|| {
            if name.is_empty() || node_type.is_empty() {
                return Err(RepositoryError::illegal_argument(
                    "node name and type must not be empty",
                ));
            }
            reject_reserved(&props)
        })?;
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                let identity = caller(identity)?;
                self.nodes.get_node(parent).await?;

                let mut node = Node::new(node_type);
                node.properties = props;
                node.properties
                    .insert(properties::NAME.to_string(), Value::from(name));
                node.associations
                    .push(Association::primary_parent(CONTAINS, name, parent));
                node.acl.owner = Some(identity.authority().to_string());
                node.acl.inherit = true;

                let uuid = self.nodes.create_node(node).await?;
                info!(node = %uuid, parent = %parent, node_type, "node created");
                Ok(uuid)
            })
            .await
    }

    /// # Errors
    ///
    /// `NoSuchNode` for missing and soft-deleted nodes.
    pub async fn get_node(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        uuid: Uuid,
    ) -> Result<Node, ServiceError> {
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                caller(identity)?;
                self.nodes.get_node(uuid).await
            })
            .await
    }

    /// Merges `props` into the node's properties. A null value removes the
    /// property.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for reserved properties, `PermissionDenied` when
    /// the caller may not modify the node, `NoSuchNode` for a missing node.
    pub async fn update_properties(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        uuid: Uuid,
        props: BTreeMap<String, Value>,
    ) -> Result<(), ServiceError> {
        self.pipeline.validate(|| reject_reserved(&props))?;
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                let identity = caller(identity)?;
                let mut node = self.nodes.get_node(uuid).await?;
                ensure_writable(&node, &identity)?;
                for (key, value) in props {
                    if value.is_null() {
                        node.properties.remove(&key);
                    } else {
                        node.properties.insert(key, value);
                    }
                }
                self.nodes.save_node(&node).await
            })
            .await
    }

    /// Deletes a node. `mode` is `0` (soft), `1` (purge) or `2`
    /// (purge-complete).
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for any other mode, `PermissionDenied` when the
    /// caller may not modify the node, `NoSuchNode` for a missing node.
    pub async fn delete_node(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        uuid: Uuid,
        mode: i64,
    ) -> Result<(), ServiceError> {
        let mode = self.pipeline.validate(|| {
            DeleteMode::try_from(mode).map_err(|e| RepositoryError::illegal_argument(e.to_string()))
        })?;
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                let identity = caller(identity)?;
                let node = self.nodes.get_node(uuid).await?;
                ensure_writable(&node, &identity)?;
                self.nodes.delete_node(uuid, mode).await?;
                info!(node = %uuid, %mode, by = identity.authority(), "node deleted");
                Ok(())
            })
            .await
    }
}

#[async_trait]
impl OperationProvider for NodeOperationsService {
    fn name(&self) -> &'static str {
        "nodes"
    }

    fn operations(self: Arc<Self>) -> Vec<OperationDescriptor> {
        use operation_names as op;
        vec![
            OperationDescriptor::bind(op::CREATE_NODE, 5, &self, handle_create_node),
            OperationDescriptor::bind(op::GET_NODE, 2, &self, handle_get_node),
            OperationDescriptor::bind(op::UPDATE_PROPERTIES, 3, &self, handle_update_properties),
            OperationDescriptor::bind(op::DELETE_NODE, 3, &self, handle_delete_node),
        ]
        .into_iter()
        .map(|d| d.sensitive(CONTEXT_ARG))
        .collect()
    }
}

type Svc = Arc<NodeOperationsService>;

fn handle_create_node(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let parent = args.uuid(1, "parent")?;
        let name = args.string(2, "name")?;
        let node_type = args.string(3, "node type")?;
        let props = args.map(4, "properties")?;
        svc.create_node(&scope, &context, parent, &name, &node_type, props)
            .await
            .map(OperationResponse::Uuid)
    })
}

fn handle_get_node(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let uuid = args.uuid(1, "node")?;
        svc.get_node(&scope, &context, uuid)
            .await
            .map(|n| OperationResponse::Node(Box::new(n)))
    })
}

fn handle_update_properties(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let uuid = args.uuid(1, "node")?;
        let props = args.map(2, "properties")?;
        svc.update_properties(&scope, &context, uuid, props)
            .await
            .map(|()| OperationResponse::Empty)
    })
}

fn handle_delete_node(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let uuid = args.uuid(1, "node")?;
        let mode = args.int(2, "delete mode")?;
        svc.delete_node(&scope, &context, uuid, mode)
            .await
            .map(|()| OperationResponse::Empty)
    })
}
