//! Operation types: invocations, responses, argument decoding, and the two
//! failure vocabularies (internal [`RepositoryError`], external
//! [`ServiceError`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use docvault_core::{Node, Value, Version};
use serde::Serialize;
use uuid::Uuid;

use super::identity::CredentialBundle;
use super::scope::CallScope;

/// Registered operation names.
pub mod operation_names {
    pub const CHECKOUT: &str = "checkout";
    pub const CHECKIN: &str = "checkin";
    pub const CANCEL_CHECKOUT: &str = "cancel_checkout";
    pub const REVERT: &str = "revert";
    pub const GET_VERSION: &str = "get_version";
    pub const LIST_VERSIONS: &str = "list_versions";
    pub const CREATE_VERSION: &str = "create_version";
    pub const CREATE_NODE: &str = "create_node";
    pub const GET_NODE: &str = "get_node";
    pub const UPDATE_PROPERTIES: &str = "update_properties";
    pub const DELETE_NODE: &str = "delete_node";
}

/// One call to a named operation, carrying the scope its identity binds to.
#[derive(Debug)]
pub struct Invocation {
    pub operation: String,
    pub args: Vec<Value>,
    pub scope: Arc<CallScope>,
}

/// Successful result of an operation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum OperationResponse {
    Uuid(Uuid),
    Node(Box<Node>),
    Version(Box<Version>),
    Versions(Vec<Version>),
    Empty,
}

/// Protocol-visible failure kinds. No other error type crosses the dispatch
/// boundary.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),
    #[error("invalid credentials: {0}")]
    InvalidCredentials(String),
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("no such node: {0}")]
    NoSuchNode(String),
    #[error("search failed: {0}")]
    SearchFailure(String),
    #[error("check-in/check-out failed for {uuid}: {message}")]
    CheckInCheckOut { uuid: Uuid, message: String },
    #[error("transaction failed: {0}")]
    Transaction(String),
    #[error("operation not implemented: {operation}")]
    NotImplemented { operation: String },
    #[error("internal error {correlation_id} reported by {host}")]
    OpaqueInternal { correlation_id: Uuid, host: String },
}

impl ServiceError {
    /// Stable name of the failure kind as exposed to callers.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidParameter(_) => "InvalidParameter",
            ServiceError::InvalidCredentials(_) => "InvalidCredentials",
            ServiceError::PermissionDenied(_) => "PermissionDenied",
            ServiceError::NoSuchNode(_) => "NoSuchNode",
            ServiceError::SearchFailure(_) => "SearchFailure",
            ServiceError::CheckInCheckOut { .. } => "CheckInCheckOut",
            ServiceError::Transaction(_) => "Transaction",
            ServiceError::NotImplemented { .. } => "NotImplemented",
            ServiceError::OpaqueInternal { .. } => "OpaqueInternalError",
        }
    }

    pub fn invalid_parameter(msg: impl Into<String>) -> Self {
        Self::InvalidParameter(msg.into())
    }

    pub fn check_in_check_out(uuid: Uuid, message: impl Into<String>) -> Self {
        Self::CheckInCheckOut {
            uuid,
            message: message.into(),
        }
    }
}

/// Failures raised by domain services and collaborators, before mapping.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("unauthenticated: {0}")]
    Unauthenticated(String),
    #[error("forbidden: {0}")]
    Forbidden(String),
    #[error("malformed query: {0}")]
    MalformedQuery(String),
    #[error("search backend failure: {0}")]
    SearchBackend(String),
    #[error("illegal argument: {0}")]
    IllegalArgument(String),
    #[error("missing argument: {0}")]
    MissingArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transaction failure: {0}")]
    Transaction(String),
    /// Already mapped; passed through unchanged.
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}

impl RepositoryError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn illegal_argument(msg: impl Into<String>) -> Self {
        Self::IllegalArgument(msg.into())
    }

    /// Whether this is a caller-fixable input problem.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            RepositoryError::IllegalArgument(_) | RepositoryError::MissingArgument(_)
        )
    }
}

/// Positional operation arguments with typed accessors.
///
/// Decoding failures are `InvalidParameter`, raised before any side effect.
#[derive(Debug, Clone, Default)]
pub struct Arguments(Vec<Value>);

impl Arguments {
    #[must_use]
    pub fn new(values: Vec<Value>) -> Self {
        Self(values)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn values(&self) -> &[Value] {
        &self.0
    }

    fn get(&self, index: usize) -> &Value {
        self.0.get(index).unwrap_or(&Value::Null)
    }

    /// Identity bundle at `index`. A null argument is rejected.
    pub fn credentials(&self, index: usize) -> Result<CredentialBundle, ServiceError> {
        match self.get(index) {
            Value::Null => Err(ServiceError::invalid_parameter("call context is required")),
            value => CredentialBundle::from_value(value).map_err(ServiceError::InvalidParameter),
        }
    }

    pub fn uuid(&self, index: usize, name: &str) -> Result<Uuid, ServiceError> {
        let raw = self.string(index, name)?;
        Uuid::parse_str(&raw)
            .map_err(|_| ServiceError::invalid_parameter(format!("{name} is not a valid UUID: {raw}")))
    }

    pub fn string(&self, index: usize, name: &str) -> Result<String, ServiceError> {
        self.optional_string(index, name)?
            .ok_or_else(|| ServiceError::invalid_parameter(format!("{name} is required")))
    }

    /// String at `index`, or `None` when the argument is null.
    pub fn optional_string(&self, index: usize, name: &str) -> Result<Option<String>, ServiceError> {
        match self.get(index) {
            Value::Null => Ok(None),
            Value::String(s) => Ok(Some(s.clone())),
            _ => Err(ServiceError::invalid_parameter(format!("{name} must be a string"))),
        }
    }

    pub fn int(&self, index: usize, name: &str) -> Result<i64, ServiceError> {
        self.get(index)
            .as_i64()
            .ok_or_else(|| ServiceError::invalid_parameter(format!("{name} must be an integer")))
    }

    /// Property map at `index`; null reads as empty.
    pub fn map(&self, index: usize, name: &str) -> Result<BTreeMap<String, Value>, ServiceError> {
        match self.get(index) {
            Value::Null => Ok(BTreeMap::new()),
            Value::Map(entries) => Ok(entries.clone()),
            _ => Err(ServiceError::invalid_parameter(format!("{name} must be a map"))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_are_stable() {
        assert_eq!(ServiceError::invalid_parameter("x").kind(), "InvalidParameter");
        assert_eq!(
            ServiceError::OpaqueInternal {
                correlation_id: Uuid::nil(),
                host: "h".to_string()
            }
            .kind(),
            "OpaqueInternalError"
        );
    }

    #[test]
    fn opaque_message_carries_only_id_and_host() {
        let id = Uuid::new_v4();
        let err = ServiceError::OpaqueInternal {
            correlation_id: id,
            host: "repo-1".to_string(),
        };
        assert_eq!(err.to_string(), format!("internal error {id} reported by repo-1"));
    }

    #[test]
    fn null_credentials_are_rejected() {
        let args = Arguments::new(vec![Value::Null]);
        assert!(matches!(
            args.credentials(0),
            Err(ServiceError::InvalidParameter(_))
        ));
    }

    #[test]
    fn uuid_argument_must_parse() {
        let args = Arguments::new(vec![Value::from("not-a-uuid")]);
        assert!(matches!(args.uuid(0, "node"), Err(ServiceError::InvalidParameter(_))));

        let id = Uuid::new_v4();
        let args = Arguments::new(vec![Value::from(id.to_string())]);
        assert_eq!(args.uuid(0, "node").unwrap(), id);
    }

    #[test]
    fn missing_positions_read_as_null() {
        let args = Arguments::new(Vec::new());
        assert_eq!(args.optional_string(3, "label").unwrap(), None);
        assert!(args.map(1, "properties").unwrap().is_empty());
        assert!(args.int(0, "mode").is_err());
    }

    #[test]
    fn validation_classification() {
        assert!(RepositoryError::illegal_argument("x").is_validation());
        assert!(RepositoryError::MissingArgument("x".into()).is_validation());
        assert!(!RepositoryError::not_found("x").is_validation());
    }
}
