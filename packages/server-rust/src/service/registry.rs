use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use tracing::{info, warn};

use super::config::ServerConfig;
use super::operation::{Arguments, OperationResponse, ServiceError};
use super::scope::CallScope;

// ---------------------------------------------------------------------------
// Handler types
// ---------------------------------------------------------------------------

/// Future returned by an operation handler.
pub type OperationFuture = BoxFuture<'static, Result<OperationResponse, ServiceError>>;

/// Type-erased operation handler.
pub type OperationHandler = Arc<dyn Fn(Arc<CallScope>, Arguments) -> OperationFuture + Send + Sync>;

/// One operation exposed by a provider.
#[derive(Clone)]
pub struct OperationDescriptor {
    pub name: &'static str,
    /// Exact number of positional arguments.
    pub arity: usize,
    /// Argument positions never written to logs (credentials).
    pub sensitive: &'static [usize],
    pub handler: OperationHandler,
}

impl OperationDescriptor {
    pub fn new<H>(name: &'static str, arity: usize, handler: H) -> Self
    where
        H: Fn(Arc<CallScope>, Arguments) -> OperationFuture + Send + Sync + 'static,
    {
        Self {
            name,
            arity,
            sensitive: &[],
            handler: Arc::new(handler),
        }
    }

    /// Binds a provider method: `handler` receives a clone of `provider` on
    /// every call.
    pub fn bind<P>(
        name: &'static str,
        arity: usize,
        provider: &Arc<P>,
        handler: fn(Arc<P>, Arc<CallScope>, Arguments) -> OperationFuture,
    ) -> Self
    where
        P: Send + Sync + 'static,
    {
        let provider = Arc::clone(provider);
        Self::new(name, arity, move |scope, args| {
            handler(Arc::clone(&provider), scope, args)
        })
    }

    /// Marks argument positions as non-loggable.
    #[must_use]
    pub fn sensitive(mut self, positions: &'static [usize]) -> Self {
        self.sensitive = positions;
        self
    }
}

impl fmt::Debug for OperationDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationDescriptor")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .field("sensitive", &self.sensitive)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServiceContext
// ---------------------------------------------------------------------------

/// Context provided to providers during initialization.
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub config: Arc<ServerConfig>,
}

// ---------------------------------------------------------------------------
// OperationProvider trait
// ---------------------------------------------------------------------------

/// A lifecycle-managed group of named operations.
///
/// Providers are initialized in registration order and shut down in reverse
/// registration order.
#[async_trait]
pub trait OperationProvider: Send + Sync + 'static {
    /// Unique provider name (e.g., `"versioning"`).
    fn name(&self) -> &'static str;

    /// Operations this provider exposes.
    fn operations(self: Arc<Self>) -> Vec<OperationDescriptor>;

    async fn init(&self, _ctx: &ServiceContext) -> anyhow::Result<()> {
        Ok(())
    }

    /// Shut down. If `terminate` is true, skip graceful cleanup.
    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MethodRegistry
// ---------------------------------------------------------------------------

/// A registered operation and the provider that owns it.
#[derive(Debug, Clone)]
pub struct RegisteredOperation {
    pub provider: &'static str,
    pub descriptor: OperationDescriptor,
}

/// Operation name -> (provider, handler) table.
///
/// Populated during startup through `&mut self`; once shared behind an `Arc`
/// it is read-only, so lookups need no locking.
#[derive(Default)]
pub struct MethodRegistry {
    operations: HashMap<&'static str, RegisteredOperation>,
    providers: Vec<Arc<dyn OperationProvider>>,
}

impl MethodRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register every operation of `provider`.
    ///
    /// A name already in the table is replaced by the later registration.
    pub fn register<P: OperationProvider>(&mut self, provider: Arc<P>) {
        let provider_name = provider.name();
        for descriptor in Arc::clone(&provider).operations() {
            let name = descriptor.name;
            let entry = RegisteredOperation {
                provider: provider_name,
                descriptor,
            };
            if let Some(previous) = self.operations.insert(name, entry) {
                warn!(
                    operation = name,
                    previous = previous.provider,
                    replacement = provider_name,
                    "operation name registered twice; later registration wins"
                );
            }
        }
        self.providers.push(provider);
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&RegisteredOperation> {
        self.operations.get(name)
    }

    /// Registered operation names, sorted.
    #[must_use]
    pub fn operation_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.operations.keys().copied().collect();
        names.sort_unstable();
        names
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    /// Initialize all providers in registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if any provider's `init()` call fails.
    pub async fn init_all(&self, ctx: &ServiceContext) -> anyhow::Result<()> {
        for provider in &self.providers {
            provider.init(ctx).await?;
            info!(provider = provider.name(), "provider initialized");
        }
        Ok(())
    }

    /// Shut down all providers in reverse registration order.
    ///
    /// # Errors
    ///
    /// Returns an error if any provider's `shutdown()` call fails.
    pub async fn shutdown_all(&self, terminate: bool) -> anyhow::Result<()> {
        for provider in self.providers.iter().rev() {
            provider.shutdown(terminate).await?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
