//! Check-out / check-in version-control state machine.
//!
//! A node is ACTIVE until checked out. Check-out makes a shallow working
//! copy next to it (not a lock; several may coexist). Check-in snapshots the
//! source into a new version, promotes the working copy's metadata onto the
//! source and purges the working copy, all in one transaction. Cancel purges
//! the working copy without versioning. Revert replaces the live metadata
//! with a stored version's snapshot.

use std::sync::{Arc, LazyLock};

use async_trait::async_trait;
use docvault_core::{
    aspects, parse_version_label, properties, Association, DeleteMode, IdentityContext, Node,
    Value, Version, VersionLabel,
};
use regex::Regex;
use tracing::info;
use uuid::Uuid;

use super::{caller, ensure_writable, in_transaction, TxStores, CONTEXT_ARG};
use crate::service::execution::ExecutionPipeline;
use crate::service::identity::CredentialBundle;
use crate::service::operation::{
    operation_names, Arguments, OperationResponse, RepositoryError, ServiceError,
};
use crate::service::registry::{OperationDescriptor, OperationFuture, OperationProvider};
use crate::service::scope::CallScope;
use crate::time::now_millis;
use crate::traits::{NodeStore, TransactionManager, VersionStore};

static WORKING_COPY_SUFFIX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"_wc_\d+$").expect("working-copy suffix pattern is valid"));

/// Association name of a working copy: `name` with any previous
/// `_wc_<digits>` suffix replaced by `_wc_<millis>`.
fn working_copy_name(name: &str, millis: u64) -> String {
    let base = WORKING_COPY_SUFFIX.replace(name, "");
    format!("{base}_wc_{millis}")
}

fn parse_label(label: &str) -> Result<VersionLabel, RepositoryError> {
    parse_version_label(label).map_err(|e| RepositoryError::illegal_argument(e.to_string()))
}

/// The version `label` designates in `history`.
///
/// A missing explicit number is a missing node version; a tag nobody carries
/// is a transactional failure naming the tag.
fn resolve<'a>(
    node: Uuid,
    label: &VersionLabel,
    history: &'a [Version],
) -> Result<&'a Version, RepositoryError> {
    label.find(history).ok_or_else(|| match label {
        VersionLabel::Explicit(number) => {
            RepositoryError::not_found(format!("version 1.{number} of node {node}"))
        }
        VersionLabel::Tagged(tag) => {
            RepositoryError::Transaction(format!("no version of node {node} is tagged '{tag}'"))
        }
    })
}

/// Source UUID of a working copy.
fn source_of(copy: &Node) -> Result<Uuid, RepositoryError> {
    if !copy.is_working_copy() {
        return Err(RepositoryError::illegal_argument(format!(
            "{} is not a working copy",
            copy.uuid
        )));
    }
    copy.copied_from().ok_or_else(|| {
        ServiceError::check_in_check_out(copy.uuid, "working copy has no source reference").into()
    })
}

fn check_in_failure(working_copy: Uuid, err: &RepositoryError) -> RepositoryError {
    ServiceError::check_in_check_out(working_copy, err.to_string()).into()
}

/// Snapshot-then-promote: the new version captures `live` as it was before
/// the working copy's metadata replaced it.
async fn promote(
    tx: &TxStores,
    identity: &IdentityContext,
    copy: &Node,
    mut live: Node,
) -> Result<Version, RepositoryError> {
    let version = tx
        .versions
        .create_version(&live, identity.authority(), None)
        .await?;
    live.apply_metadata(&copy.metadata());
    tx.nodes.save_node(&live).await?;
    tx.nodes.delete_node(copy.uuid, DeleteMode::Purge).await?;
    Ok(version)
}

// ---------------------------------------------------------------------------
// VersionControlService
// ---------------------------------------------------------------------------

pub struct VersionControlService {
    pipeline: Arc<ExecutionPipeline>,
    nodes: Arc<dyn NodeStore>,
    versions: Arc<dyn VersionStore>,
    transactions: Arc<dyn TransactionManager>,
}

impl VersionControlService {
    #[must_use]
    pub fn new(
        pipeline: Arc<ExecutionPipeline>,
        nodes: Arc<dyn NodeStore>,
        versions: Arc<dyn VersionStore>,
        transactions: Arc<dyn TransactionManager>,
    ) -> Self {
        Self {
            pipeline,
            nodes,
            versions,
            transactions,
        }
    }

    /// Creates a working copy of `node` under its primary parent and returns
    /// the working copy's UUID.
    ///
    /// # Errors
    ///
    /// `NoSuchNode` when the node is missing or has no hard parent
    /// association; `InvalidParameter` when it is itself a working copy;
    /// `PermissionDenied` when the caller may not modify it.
    pub async fn check_out(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        node: Uuid,
    ) -> Result<Uuid, ServiceError> {
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                let identity = caller(identity)?;
                let source = self.nodes.get_node(node).await?;
                ensure_writable(&source, &identity)?;
                if source.is_working_copy() {
                    return Err(RepositoryError::illegal_argument(format!(
                        "{node} is a working copy and cannot be checked out"
                    )));
                }
                let parent = source.primary_parent().ok_or_else(|| {
                    RepositoryError::not_found(format!(
                        "node {node} has no primary parent and is not versionable"
                    ))
                })?;
                let association = Association {
                    name: working_copy_name(&parent.name, now_millis()),
                    ..parent.clone()
                };

                let identity = &identity;
                let working_copy = in_transaction(self.transactions.as_ref(), |tx| async move {
                    let mut copy = tx.nodes.copy_node(node, association).await?;
                    // The copy belongs to whoever checked it out; the source
                    // owner keeps write access to it.
                    if let Some(owner) = copy.acl.owner.take() {
                        if owner != identity.authority() {
                            copy.acl.writers.insert(owner);
                        }
                    }
                    copy.acl.owner = Some(identity.authority().to_string());
                    copy.aspects.insert(aspects::WORKING_COPY.to_string());
                    copy.properties.insert(
                        properties::WORKING_COPY_OWNER.to_string(),
                        Value::from(identity.authority()),
                    );
                    copy.properties.insert(
                        properties::COPIED_FROM.to_string(),
                        Value::String(format!("/{}/{node}", identity.tenant)),
                    );
                    tx.nodes.save_node(&copy).await?;
                    Ok(copy.uuid)
                })
                .await?;

                info!(
                    node = %node,
                    working_copy = %working_copy,
                    owner = identity.authority(),
                    "node checked out"
                );
                Ok(working_copy)
            })
            .await
    }

    /// Promotes `working_copy` onto its source and returns the source UUID.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a node that is not a working copy, `NoSuchNode`
    /// when the working copy is already gone, `PermissionDenied` when the
    /// caller may not modify the working copy or its source, and
    /// `CheckInCheckOut` for any failure of the promotion itself (after
    /// rollback).
    pub async fn check_in(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        working_copy: Uuid,
    ) -> Result<Uuid, ServiceError> {
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                let identity = caller(identity)?;
                let identity = &identity;
                let (source, version) = in_transaction(self.transactions.as_ref(), |tx| async move {
                    let copy = tx.nodes.get_node(working_copy).await?;
                    ensure_writable(&copy, identity)?;
                    let source = source_of(&copy)?;
                    let live = tx
                        .nodes
                        .get_node(source)
                        .await
                        .map_err(|err| check_in_failure(working_copy, &err))?;
                    ensure_writable(&live, identity)?;
                    let version = promote(&tx, identity, &copy, live)
                        .await
                        .map_err(|err| check_in_failure(working_copy, &err))?;
                    Ok((source, version))
                })
                .await?;

                info!(
                    node = %source,
                    working_copy = %working_copy,
                    version = %version.label(),
                    "working copy checked in"
                );
                Ok(source)
            })
            .await
    }

    /// Discards `working_copy` without versioning and returns the source
    /// UUID.
    ///
    /// # Errors
    ///
    /// As [`check_in`](Self::check_in); a failed purge is `CheckInCheckOut`.
    /// Permission is checked on the working copy only.
    pub async fn cancel_checkout(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        working_copy: Uuid,
    ) -> Result<Uuid, ServiceError> {
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                let identity = caller(identity)?;
                let identity = &identity;
                let source = in_transaction(self.transactions.as_ref(), |tx| async move {
                    let copy = tx.nodes.get_node(working_copy).await?;
                    ensure_writable(&copy, identity)?;
                    let source = source_of(&copy)?;
                    tx.nodes
                        .delete_node(working_copy, DeleteMode::Purge)
                        .await
                        .map_err(|err| check_in_failure(working_copy, &err))?;
                    Ok(source)
                })
                .await?;

                info!(node = %source, working_copy = %working_copy, "checkout cancelled");
                Ok(source)
            })
            .await
    }

    /// Replaces the live metadata of `node` with the snapshot of the version
    /// `label` designates, returning that version.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for a malformed label, `NoSuchNode` for a missing
    /// node or version number, `Transaction` for an unknown tag,
    /// `PermissionDenied` when the caller may not modify the node.
    pub async fn revert(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        node: Uuid,
        label: &str,
    ) -> Result<Version, ServiceError> {
        let label = self.pipeline.validate(|| parse_label(label))?;
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                let identity = caller(identity)?;
                let (identity, label) = (&identity, &label);
                let target = in_transaction(self.transactions.as_ref(), |tx| async move {
                    let mut live = tx.nodes.get_node(node).await?;
                    ensure_writable(&live, identity)?;
                    let history = tx.versions.list_versions(node).await?;
                    let target = resolve(node, label, &history)?.clone();
                    live.apply_metadata(&target.metadata);
                    tx.nodes.save_node(&live).await?;
                    Ok(target)
                })
                .await?;

                info!(
                    node = %node,
                    version = %target.label(),
                    by = identity.authority(),
                    "node reverted"
                );
                Ok(target)
            })
            .await
    }

    /// The version of `node` designated by `label`.
    ///
    /// # Errors
    ///
    /// As [`revert`](Self::revert).
    pub async fn get_version(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        node: Uuid,
        label: &str,
    ) -> Result<Version, ServiceError> {
        let label = self.pipeline.validate(|| parse_label(label))?;
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                caller(identity)?;
                self.nodes.get_node(node).await?;
                let history = self.versions.list_versions(node).await?;
                resolve(node, &label, &history).cloned()
            })
            .await
    }

    /// Version history of `node`, ascending. With `label`, the history
    /// starts at the version it designates.
    ///
    /// # Errors
    ///
    /// As [`revert`](Self::revert); without a label only `NoSuchNode`.
    pub async fn list_versions(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        node: Uuid,
        label: Option<&str>,
    ) -> Result<Vec<Version>, ServiceError> {
        let from = label
            .map(|label| self.pipeline.validate(|| parse_label(label)))
            .transpose()?;
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                caller(identity)?;
                self.nodes.get_node(node).await?;
                let history = self.versions.list_versions(node).await?;
                let Some(from) = from else {
                    return Ok(history);
                };
                let start = resolve(node, &from, &history)?.number;
                Ok(history.into_iter().filter(|v| v.number >= start).collect())
            })
            .await
    }

    /// Snapshots the current metadata of an ACTIVE node into a new version.
    ///
    /// # Errors
    ///
    /// `InvalidParameter` for an empty tag or a working copy, `NoSuchNode`
    /// for a missing node, `PermissionDenied` when the caller may not modify
    /// it.
    pub async fn create_version(
        &self,
        scope: &CallScope,
        context: &CredentialBundle,
        node: Uuid,
        tag: Option<&str>,
    ) -> Result<Version, ServiceError> {
        self.pipeline.validate(|| match tag {
            Some("") => Err(RepositoryError::illegal_argument("version tag must not be empty")),
            _ => Ok(()),
        })?;
        self.pipeline
            .call(scope, Some(context), |identity| async move {
                let identity = caller(identity)?;
                let live = self.nodes.get_node(node).await?;
                ensure_writable(&live, &identity)?;
                if live.is_working_copy() {
                    return Err(RepositoryError::illegal_argument(format!(
                        "{node} is a working copy; check it in instead"
                    )));
                }
                let version = self
                    .versions
                    .create_version(&live, identity.authority(), tag)
                    .await?;
                info!(node = %node, version = %version.label(), "version created");
                Ok(version)
            })
            .await
    }
}

// ---------------------------------------------------------------------------
// OperationProvider
// ---------------------------------------------------------------------------

#[async_trait]
impl OperationProvider for VersionControlService {
    fn name(&self) -> &'static str {
        "versioning"
    }

    fn operations(self: Arc<Self>) -> Vec<OperationDescriptor> {
        use operation_names as op;
        vec![
            OperationDescriptor::bind(op::CHECKOUT, 2, &self, handle_check_out),
            OperationDescriptor::bind(op::CHECKIN, 2, &self, handle_check_in),
            OperationDescriptor::bind(op::CANCEL_CHECKOUT, 2, &self, handle_cancel_checkout),
            OperationDescriptor::bind(op::REVERT, 3, &self, handle_revert),
            OperationDescriptor::bind(op::GET_VERSION, 3, &self, handle_get_version),
            OperationDescriptor::bind(op::LIST_VERSIONS, 3, &self, handle_list_versions),
            OperationDescriptor::bind(op::CREATE_VERSION, 3, &self, handle_create_version),
        ]
        .into_iter()
        .map(|d| d.sensitive(CONTEXT_ARG))
        .collect()
    }
}

type Svc = Arc<VersionControlService>;

fn handle_check_out(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let node = args.uuid(1, "node")?;
        svc.check_out(&scope, &context, node)
            .await
            .map(OperationResponse::Uuid)
    })
}

fn handle_check_in(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let working_copy = args.uuid(1, "working copy")?;
        svc.check_in(&scope, &context, working_copy)
            .await
            .map(OperationResponse::Uuid)
    })
}

fn handle_cancel_checkout(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let working_copy = args.uuid(1, "working copy")?;
        svc.cancel_checkout(&scope, &context, working_copy)
            .await
            .map(OperationResponse::Uuid)
    })
}

fn handle_revert(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let node = args.uuid(1, "node")?;
        let label = args.string(2, "version label")?;
        svc.revert(&scope, &context, node, &label)
            .await
            .map(|v| OperationResponse::Version(Box::new(v)))
    })
}

fn handle_get_version(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let node = args.uuid(1, "node")?;
        let label = args.string(2, "version label")?;
        svc.get_version(&scope, &context, node, &label)
            .await
            .map(|v| OperationResponse::Version(Box::new(v)))
    })
}

fn handle_list_versions(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let node = args.uuid(1, "node")?;
        let label = args.optional_string(2, "version label")?;
        svc.list_versions(&scope, &context, node, label.as_deref())
            .await
            .map(OperationResponse::Versions)
    })
}

fn handle_create_version(svc: Svc, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
    Box::pin(async move {
        let context = args.credentials(0)?;
        let node = args.uuid(1, "node")?;
        let tag = args.optional_string(2, "tag")?;
        svc.create_version(&scope, &context, node, tag.as_deref())
            .await
            .map(|v| OperationResponse::Version(Box::new(v)))
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
