//! Maps internal failures onto the protocol-visible [`ServiceError`] kinds.
//!
//! The mapper is the single place an internal failure is logged. Unexpected
//! failures are logged in full under a fresh correlation id and surface to
//! the caller as [`ServiceError::OpaqueInternal`] carrying only that id and
//! the reporting host.

use std::fmt::Display;

use tracing::{error, warn};
use uuid::Uuid;

use super::operation::{RepositoryError, ServiceError};

/// Total mapping from [`RepositoryError`] to [`ServiceError`].
#[derive(Debug, Clone)]
pub struct FailureMapper {
    host: String,
}

impl FailureMapper {
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }

    /// Host name reported in opaque failures.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Maps `err`, logging it once.
    #[must_use]
    pub fn map(&self, err: RepositoryError) -> ServiceError {
        let mapped = match err {
            RepositoryError::Unauthenticated(msg) => ServiceError::InvalidCredentials(msg),
            RepositoryError::Forbidden(msg) => ServiceError::PermissionDenied(msg),
            RepositoryError::MalformedQuery(msg) | RepositoryError::SearchBackend(msg) => {
                ServiceError::SearchFailure(msg)
            }
            RepositoryError::IllegalArgument(msg) | RepositoryError::MissingArgument(msg) => {
                ServiceError::InvalidParameter(msg)
            }
            RepositoryError::NotFound(msg) => ServiceError::NoSuchNode(msg),
            RepositoryError::Transaction(msg) => ServiceError::Transaction(msg),
            RepositoryError::Service(service) => service,
            RepositoryError::Unexpected(source) => return self.opaque(&format!("{source:#}")),
        };
        warn!(kind = mapped.kind(), error = %mapped, "operation failed");
        mapped
    }

    /// Builds an opaque failure for `detail`, logging the detail locally
    /// under the new correlation id.
    #[must_use]
    pub fn opaque(&self, detail: &dyn Display) -> ServiceError {
        let correlation_id = Uuid::new_v4();
        error!(
            correlation_id = %correlation_id,
            host = %self.host,
            detail = %detail,
            "unexpected internal failure"
        );
        ServiceError::OpaqueInternal {
            correlation_id,
            host: self.host.clone(),
        }
    }
}
