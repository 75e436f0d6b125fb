//! Operation dispatch and execution framework.
//!
//! An invocation flows through:
//!
//! 1. **Dispatcher** (`dispatcher`): `invoke(name, args)` entry point
//! 2. **Middleware** (`middleware`): Tower layers (metrics, scope teardown)
//! 3. **Routing** (`router`): Name lookup in the method table (`registry`)
//! 4. **Domain providers** (`domain`): Operation logic, each unit run through
//!    the execution pipeline (`execution`), which establishes the call
//!    identity (`identity`) and maps failures (`failure`)

pub mod bootstrap;
pub mod config;
pub mod dispatcher;
pub mod domain;
pub mod execution;
pub mod failure;
pub mod identity;
pub mod middleware;
pub mod operation;
pub mod registry;
pub mod router;
pub mod scope;

// Re-export key types for convenient access.
pub use bootstrap::{build_dispatcher, Collaborators};
pub use config::ServerConfig;
pub use dispatcher::Dispatcher;
pub use execution::ExecutionPipeline;
pub use failure::FailureMapper;
pub use identity::{CredentialBundle, IdentityService};
pub use operation::{
    operation_names, Arguments, Invocation, OperationResponse, RepositoryError, ServiceError,
};
pub use registry::{MethodRegistry, OperationDescriptor, OperationProvider, ServiceContext};
pub use router::MethodRouter;
pub use scope::{CallScope, ScopeGuard};
