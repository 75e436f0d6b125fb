//! The public entry point of the operation core: `invoke(name, args)`.

use std::sync::Arc;

use docvault_core::Value;
use tower::ServiceExt;

use super::config::ServerConfig;
use super::failure::FailureMapper;
use super::middleware::{build_dispatch_pipeline, DispatchService};
use super::operation::{Invocation, OperationResponse, ServiceError};
use super::registry::MethodRegistry;
use super::router::MethodRouter;
use super::scope::CallScope;

/// Cheaply cloneable handle that protocol adapters invoke operations through.
///
/// Every invocation runs through the full middleware stack: timing and
/// metrics, identity teardown, panic capture, then name routing.
#[derive(Clone)]
pub struct Dispatcher {
    service: DispatchService,
    registry: Arc<MethodRegistry>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(registry: Arc<MethodRegistry>, config: &ServerConfig, mapper: FailureMapper) -> Self {
        let router = MethodRouter::new(Arc::clone(&registry), config.trace_arguments);
        Self {
            service: build_dispatch_pipeline(router, mapper),
            registry,
        }
    }

    /// Invokes `operation` in a fresh call scope.
    ///
    /// # Errors
    ///
    /// Any [`ServiceError`]; unknown names fail with `NotImplemented`.
    pub async fn invoke(
        &self,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<OperationResponse, ServiceError> {
        self.invoke_in(&CallScope::new(), operation, args).await
    }

    /// Invokes `operation` in a caller-provided scope. The scope is empty
    /// again once this returns.
    ///
    /// # Errors
    ///
    /// Any [`ServiceError`]; unknown names fail with `NotImplemented`.
    pub async fn invoke_in(
        &self,
        scope: &Arc<CallScope>,
        operation: &str,
        args: Vec<Value>,
    ) -> Result<OperationResponse, ServiceError> {
        let inv = Invocation {
            operation: operation.to_string(),
            args,
            scope: Arc::clone(scope),
        };
        self.service.clone().oneshot(inv).await
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<MethodRegistry> {
        &self.registry
    }

    /// Shuts every provider down in reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns the first provider shutdown failure.
    pub async fn shutdown(&self, terminate: bool) -> anyhow::Result<()> {
        self.registry.shutdown_all(terminate).await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use docvault_core::{properties, Node, Version};
    use uuid::Uuid;

    use super::*;
    use crate::service::bootstrap::{build_dispatcher, Collaborators};
    use crate::service::identity::CredentialBundle;
    use crate::service::operation::operation_names as op;
    use crate::service::domain::caller;
    use crate::service::execution::ExecutionPipeline;
    use crate::service::identity::IdentityService;
    use crate::service::operation::{Arguments, RepositoryError};
    use crate::service::registry::{OperationDescriptor, OperationFuture, OperationProvider};
    use crate::storage::{MemoryRepository, StaticAuthenticator};

    struct Harness {
        dispatcher: Dispatcher,
        root: Uuid,
    }

    async fn harness() -> Harness {
        let repo = MemoryRepository::new();
        let root = repo.create_root("root");
        let auth = StaticAuthenticator::new();
        auth.add_account("alice", "acme", "s3cret", &[]);
        auth.add_account("bob", "acme", "hunter2", &[]);
        let config = Arc::new(ServerConfig {
            host_name: "repo-1".to_string(),
            ..ServerConfig::default()
        });
        let dispatcher = build_dispatcher(config, Collaborators::in_memory(&repo, auth))
            .await
            .unwrap();
        Harness { dispatcher, root }
    }

    fn ctx() -> Value {
        CredentialBundle::new("alice@acme", "s3cret").to_value()
    }

    fn id(uuid: Uuid) -> Value {
        Value::from(uuid.to_string())
    }

    fn uuid_of(response: OperationResponse) -> Uuid {
        match response {
            OperationResponse::Uuid(uuid) => uuid,
            other => panic!("expected uuid, got {other:?}"),
        }
    }

    impl Harness {
        async fn call(&self, operation: &str, args: Vec<Value>) -> Result<OperationResponse, ServiceError> {
            self.dispatcher.invoke(operation, args).await
        }

        async fn document(&self, title: &str) -> Uuid {
            let props = BTreeMap::from([("title".to_string(), Value::from(title))]);
            let response = self
                .call(
                    op::CREATE_NODE,
                    vec![ctx(), id(self.root), "report".into(), "dv:document".into(), Value::Map(props)],
                )
                .await
                .unwrap();
            uuid_of(response)
        }

        async fn node(&self, uuid: Uuid) -> Result<Node, ServiceError> {
            match self.call(op::GET_NODE, vec![ctx(), id(uuid)]).await? {
                OperationResponse::Node(node) => Ok(*node),
                other => panic!("expected node, got {other:?}"),
            }
        }

        async fn versions(&self, uuid: Uuid) -> Vec<Version> {
            match self
                .call(op::LIST_VERSIONS, vec![ctx(), id(uuid), Value::Null])
                .await
                .unwrap()
            {
                OperationResponse::Versions(versions) => versions,
                other => panic!("expected versions, got {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn reused_scope_is_unbound_after_every_call() {
        let h = harness().await;
        let scope = CallScope::new();

        let ok = h
            .dispatcher
            .invoke_in(&scope, op::GET_NODE, vec![ctx(), id(h.root)])
            .await;
        assert!(ok.is_ok());
        assert!(!scope.is_bound());

        let bad = CredentialBundle::new("alice@acme", "wrong").to_value();
        let err = h
            .dispatcher
            .invoke_in(&scope, op::GET_NODE, vec![bad, id(h.root)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "InvalidCredentials");
        assert!(!scope.is_bound());
    }

    #[tokio::test]
    async fn unknown_operation_is_not_implemented() {
        let h = harness().await;
        let scope = CallScope::new();
        let err = h
            .dispatcher
            .invoke_in(&scope, "defragment", vec![ctx()])
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ServiceError::NotImplemented {
                operation: "defragment".to_string()
            }
        );
        assert!(!scope.is_bound());
    }

    #[tokio::test]
    async fn arity_mismatch_is_invalid_parameter() {
        let h = harness().await;
        let err = h.call(op::CHECKOUT, vec![ctx()]).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidParameter(ref m) if m.contains("takes 2")));
    }

    #[tokio::test]
    async fn checkout_then_cancel_leaves_source_untouched() {
        let h = harness().await;
        let doc = h.document("Q3").await;
        let before = h.node(doc).await.unwrap();

        let wc = uuid_of(h.call(op::CHECKOUT, vec![ctx(), id(doc)]).await.unwrap());
        let copy = h.node(wc).await.unwrap();
        assert!(copy.is_working_copy());
        assert_eq!(
            copy.properties.get(properties::COPIED_FROM),
            Some(&Value::from(format!("/acme/{doc}")))
        );

        h.call(op::CANCEL_CHECKOUT, vec![ctx(), id(wc)]).await.unwrap();

        assert_eq!(h.node(wc).await.unwrap_err().kind(), "NoSuchNode");
        assert_eq!(h.node(doc).await.unwrap(), before);
        assert!(h.versions(doc).await.is_empty());
    }

    #[tokio::test]
    async fn checkin_snapshots_then_promotes_working_copy() {
        let h = harness().await;
        let doc = h.document("Q3").await;
        let wc = uuid_of(h.call(op::CHECKOUT, vec![ctx(), id(doc)]).await.unwrap());

        let edit = BTreeMap::from([("title".to_string(), Value::from("Q3 final"))]);
        h.call(op::UPDATE_PROPERTIES, vec![ctx(), id(wc), Value::Map(edit)])
            .await
            .unwrap();
        h.call(op::CHECKIN, vec![ctx(), id(wc)]).await.unwrap();

        let versions = h.versions(doc).await;
        assert_eq!(versions.len(), 1);
        assert_eq!(
            versions[0].metadata.properties.get("title"),
            Some(&Value::from("Q3"))
        );
        let source = h.node(doc).await.unwrap();
        assert_eq!(source.properties.get("title"), Some(&Value::from("Q3 final")));
        assert!(!source.is_working_copy());
        assert_eq!(h.node(wc).await.unwrap_err().kind(), "NoSuchNode");

        let again = h.call(op::CHECKIN, vec![ctx(), id(wc)]).await.unwrap_err();
        assert_eq!(again.kind(), "NoSuchNode");
    }

    #[tokio::test]
    async fn checkin_of_plain_node_is_invalid_parameter() {
        let h = harness().await;
        let doc = h.document("Q3").await;
        let err = h.call(op::CHECKIN, vec![ctx(), id(doc)]).await.unwrap_err();
        assert_eq!(err.kind(), "InvalidParameter");
    }

    #[tokio::test]
    async fn checkout_of_parentless_node_is_no_such_node() {
        let h = harness().await;
        let err = h.call(op::CHECKOUT, vec![ctx(), id(h.root)]).await.unwrap_err();
        assert_eq!(err.kind(), "NoSuchNode");
    }

    #[tokio::test]
    async fn labels_resolve_alike_across_operations() {
        let h = harness().await;
        let doc = h.document("Q3").await;
        h.call(op::CREATE_VERSION, vec![ctx(), id(doc), "draft".into()])
            .await
            .unwrap();

        for operation in [op::GET_VERSION, op::REVERT, op::LIST_VERSIONS] {
            let tagged = h
                .call(operation, vec![ctx(), id(doc), "#draft".into()])
                .await;
            assert!(tagged.is_ok(), "{operation}: {tagged:?}");

            let cases = [("1.3", "NoSuchNode"), ("#final", "Transaction"), ("garbage", "InvalidParameter")];
            for (label, kind) in cases {
                let err = h
                    .call(operation, vec![ctx(), id(doc), label.into()])
                    .await
                    .unwrap_err();
                assert_eq!(err.kind(), kind, "{operation} with {label}");
            }
        }
    }

    /// Reports the identity each call ran under, after yielding once so
    /// that concurrent calls interleave.
    struct Whoami {
        pipeline: Arc<ExecutionPipeline>,
        seen: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl OperationProvider for Whoami {
        fn name(&self) -> &'static str {
            "whoami"
        }

        fn operations(self: Arc<Self>) -> Vec<OperationDescriptor> {
            vec![OperationDescriptor::bind("whoami", 2, &self, handle_whoami).sensitive(&[0])]
        }
    }

    fn handle_whoami(svc: Arc<Whoami>, scope: Arc<CallScope>, args: Arguments) -> OperationFuture {
        Box::pin(async move {
            let context = args.credentials(0)?;
            let expected = args.string(1, "expected authority")?;
            let (recorder, bound) = (Arc::clone(&svc), Arc::clone(&scope));
            svc.pipeline
                .call(&scope, Some(&context), |identity| async move {
                    let identity = caller(identity)?;
                    tokio::task::yield_now().await;
                    let in_scope = bound.identity().map(|i| i.authority().to_string());
                    if identity.authority() != expected || in_scope.as_deref() != Some(expected.as_str()) {
                        return Err(RepositoryError::illegal_argument(format!(
                            "expected {expected}, ran as {} with scope {in_scope:?}",
                            identity.authority()
                        )));
                    }
                    recorder.seen.lock().push(expected);
                    Ok(OperationResponse::Empty)
                })
                .await
        })
    }

    fn whoami_dispatcher() -> (Dispatcher, Arc<Whoami>) {
        let auth = StaticAuthenticator::new();
        auth.add_account("alice", "acme", "s3cret", &[]);
        auth.add_account("bob", "acme", "hunter2", &[]);
        let config = ServerConfig::default();
        let provider = Arc::new(Whoami {
            pipeline: Arc::new(ExecutionPipeline::new(
                IdentityService::new(Arc::new(auth), &config),
                FailureMapper::new("repo-1"),
            )),
            seen: parking_lot::Mutex::new(Vec::new()),
        });
        let mut registry = MethodRegistry::new();
        registry.register(Arc::clone(&provider));
        let dispatcher = Dispatcher::new(Arc::new(registry), &config, FailureMapper::new("repo-1"));
        (dispatcher, provider)
    }

    fn login(user: &str) -> (Value, &'static str) {
        match user {
            "alice" => (ctx(), "alice"),
            _ => (CredentialBundle::new("bob@acme", "hunter2").to_value(), "bob"),
        }
    }

    #[tokio::test]
    async fn one_scope_serves_callers_in_turn() {
        let (dispatcher, provider) = whoami_dispatcher();
        let scope = CallScope::new();

        for user in ["alice", "bob", "alice"] {
            let (context, authority) = login(user);
            dispatcher
                .invoke_in(&scope, "whoami", vec![context, authority.into()])
                .await
                .unwrap();
            assert!(!scope.is_bound());
        }
        assert_eq!(*provider.seen.lock(), vec!["alice", "bob", "alice"]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_calls_see_only_their_own_identity() {
        let (dispatcher, provider) = whoami_dispatcher();

        let calls: Vec<_> = (0..64)
            .map(|i| {
                let dispatcher = dispatcher.clone();
                tokio::spawn(async move {
                    let (context, authority) = login(if i % 2 == 0 { "alice" } else { "bob" });
                    let scope = CallScope::new();
                    let result = dispatcher
                        .invoke_in(&scope, "whoami", vec![context, authority.into()])
                        .await;
                    assert!(!scope.is_bound());
                    result
                })
            })
            .collect();
        for call in calls {
            call.await.unwrap().unwrap();
        }

        let seen = provider.seen.lock();
        assert_eq!(seen.len(), 64);
        assert_eq!(seen.iter().filter(|a| *a == "bob").count(), 32);
    }

    #[tokio::test]
    async fn strangers_cannot_change_or_version_a_document() {
        let h = harness().await;
        let doc = h.document("Q3").await;
        h.call(op::CREATE_VERSION, vec![ctx(), id(doc), Value::Null])
            .await
            .unwrap();
        let before = h.node(doc).await.unwrap();
        let (bob, _) = login("bob");

        let edit = BTreeMap::from([("title".to_string(), Value::from("hijacked"))]);
        let attempts = [
            (op::UPDATE_PROPERTIES, vec![bob.clone(), id(doc), Value::Map(edit)]),
            (op::REVERT, vec![bob.clone(), id(doc), "1.1".into()]),
            (op::CHECKOUT, vec![bob.clone(), id(doc)]),
        ];
        for (operation, args) in attempts {
            let err = h.call(operation, args).await.unwrap_err();
            assert_eq!(err.kind(), "PermissionDenied", "{operation}");
        }

        let wc = uuid_of(h.call(op::CHECKOUT, vec![ctx(), id(doc)]).await.unwrap());
        let err = h.call(op::CHECKIN, vec![bob, id(wc)]).await.unwrap_err();
        assert_eq!(err.kind(), "PermissionDenied");

        assert_eq!(h.node(doc).await.unwrap(), before);
        assert_eq!(h.versions(doc).await.len(), 1);
    }

    #[tokio::test]
    async fn registry_is_shared_and_shutdown_succeeds() {
        let h = harness().await;
        let clone = h.dispatcher.clone();
        assert!(Arc::ptr_eq(h.dispatcher.registry(), clone.registry()));
        assert_eq!(h.dispatcher.registry().len(), 11);
        h.dispatcher.shutdown(false).await.unwrap();
    }
}
