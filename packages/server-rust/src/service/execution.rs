//! Execution pipeline wrapping every unit of operation work.
//!
//! [`ExecutionPipeline::call`] establishes the call identity (unless the
//! operation carries its own), runs the unit, and maps its failure.
//! [`ExecutionPipeline::validate`] runs a side-effect-free check and maps
//! its failure the same way. Either way the caller only ever sees a
//! [`ServiceError`].

use std::future::Future;

use docvault_core::IdentityContext;
use tracing::debug;

use super::failure::FailureMapper;
use super::identity::{CredentialBundle, IdentityService};
use super::operation::{RepositoryError, ServiceError};
use super::scope::CallScope;

pub struct ExecutionPipeline {
    identity: IdentityService,
    mapper: FailureMapper,
}

impl ExecutionPipeline {
    #[must_use]
    pub fn new(identity: IdentityService, mapper: FailureMapper) -> Self {
        Self { identity, mapper }
    }

    #[must_use]
    pub fn mapper(&self) -> &FailureMapper {
        &self.mapper
    }

    /// Runs `unit` inside the call scope.
    ///
    /// With `context`, the identity is established from it first and handed
    /// to `unit`. Without it (pre-authenticated operations) `unit` receives
    /// whatever identity the scope already holds.
    ///
    /// # Errors
    ///
    /// Authentication failures and every failure of `unit`, mapped.
    pub async fn call<T, F, Fut>(
        &self,
        scope: &CallScope,
        context: Option<&CredentialBundle>,
        unit: F,
    ) -> Result<T, ServiceError>
    where
        F: FnOnce(Option<IdentityContext>) -> Fut,
        Fut: Future<Output = Result<T, RepositoryError>>,
    {
        let identity = match context {
            Some(bundle) => Some(
                self.identity
                    .establish(scope, Some(bundle))
                    .await
                    .map_err(|e| self.mapper.map(e))?,
            ),
            None => scope.identity(),
        };

        unit(identity).await.map_err(|e| self.mapper.map(e))
    }

    /// Runs a validation `check`.
    ///
    /// # Errors
    ///
    /// Validation-shaped failures become `InvalidParameter`; anything else
    /// goes through the failure mapper.
    pub fn validate<T, F>(&self, check: F) -> Result<T, ServiceError>
    where
        F: FnOnce() -> Result<T, RepositoryError>,
    {
        match check() {
            Ok(value) => Ok(value),
            Err(RepositoryError::IllegalArgument(msg) | RepositoryError::MissingArgument(msg)) => {
                debug!(reason = %msg, "validation rejected call");
                Err(ServiceError::InvalidParameter(msg))
            }
            Err(other) => Err(self.mapper.map(other)),
        }
    }
}
