//! Call authentication: turns a caller-supplied credential bundle into an
//! [`IdentityContext`] bound to the call's [`CallScope`].

use std::fmt;
use std::sync::Arc;

use docvault_core::{Channel, IdentityContext, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::config::ServerConfig;
use super::operation::RepositoryError;
use super::scope::CallScope;
use crate::traits::Authenticator;

/// Identity bundle carried with every call by the protocol adapters.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialBundle {
    /// `user` or `user@tenant`.
    pub username: Option<String>,
    pub password: Option<String>,
    pub application: Option<String>,
    #[serde(alias = "physicalIdentity")]
    pub physical_identity: Option<String>,
    pub repository: Option<String>,
}

impl CredentialBundle {
    #[must_use]
    pub fn new(username: &str, password: &str) -> Self {
        Self {
            username: Some(username.to_string()),
            password: Some(password.to_string()),
            ..Self::default()
        }
    }

    /// Decodes a bundle from an operation argument.
    ///
    /// # Errors
    ///
    /// Returns a description of the problem when `value` is not a map of
    /// string fields.
    pub fn from_value(value: &Value) -> Result<Self, String> {
        if value.as_map().is_none() {
            return Err("call context must be a map".to_string());
        }
        serde_json::from_value(value.to_json()).map_err(|e| format!("malformed call context: {e}"))
    }

    /// Encodes the bundle as an operation argument.
    #[must_use]
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).map_or(Value::Null, Value::from)
    }
}

impl fmt::Debug for CredentialBundle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialBundle")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("application", &self.application)
            .field("physical_identity", &self.physical_identity)
            .field("repository", &self.repository)
            .finish()
    }
}

/// Splits `user@tenant` on the first `@`. An empty tenant reads as absent.
fn split_tenant(username: &str) -> (&str, Option<&str>) {
    match username.split_once('@') {
        Some((user, tenant)) if !tenant.is_empty() => (user, Some(tenant)),
        Some((user, _)) => (user, None),
        None => (username, None),
    }
}

/// Establishes the identity context of a call.
pub struct IdentityService {
    authenticator: Arc<dyn Authenticator>,
    default_tenant: String,
    channel: Channel,
    api_level: u32,
}

impl IdentityService {
    #[must_use]
    pub fn new(authenticator: Arc<dyn Authenticator>, config: &ServerConfig) -> Self {
        Self {
            authenticator,
            default_tenant: config.default_tenant.clone(),
            channel: config.channel,
            api_level: config.api_level,
        }
    }

    /// Authenticates `bundle` and binds the resulting identity to `scope`.
    ///
    /// # Errors
    ///
    /// - `MissingArgument` when the bundle, username or password is absent
    /// - `Unauthenticated` when the identity service rejects the credentials
    pub async fn establish(
        &self,
        scope: &CallScope,
        bundle: Option<&CredentialBundle>,
    ) -> Result<IdentityContext, RepositoryError> {
        let bundle = bundle.ok_or_else(|| missing("call context"))?;
        let username = bundle
            .username
            .as_deref()
            .filter(|u| !u.is_empty())
            .ok_or_else(|| missing("username"))?;
        let password = bundle.password.as_deref().ok_or_else(|| missing("password"))?;

        let (authority, tenant) = split_tenant(username);
        if authority.is_empty() {
            return Err(missing("username"));
        }
        let tenant = tenant.unwrap_or(&self.default_tenant);

        let principal = self
            .authenticator
            .authenticate(authority, tenant, password)
            .await?;

        let identity = IdentityContext {
            principal,
            tenant: tenant.to_string(),
            channel: self.channel,
            api_level: self.api_level,
            application: bundle.application.clone(),
            physical_identity: bundle.physical_identity.clone(),
            repository: bundle.repository.clone(),
        };
        debug!(
            authority = identity.authority(),
            tenant = %identity.tenant,
            application = ?identity.application,
            "identity established"
        );
        scope.bind(identity.clone());
        Ok(identity)
    }
}

fn missing(what: &str) -> RepositoryError {
    RepositoryError::MissingArgument(format!("{what} is required"))
}
