use serde::{Deserialize, Serialize};

use crate::types::Principal;

/// Wire protocol a call arrived through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Channel {
    /// Envelope-style RPC protocol.
    Rpc,
    /// Resource-oriented HTTP protocol.
    Rest,
}

/// Per-call identity context carrying the authenticated principal, tenancy,
/// and caller-application metadata.
///
/// Lives for exactly one dispatched call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityContext {
    /// Authenticated principal.
    pub principal: Principal,
    /// Tenant scope for multi-tenant isolation.
    pub tenant: String,
    pub channel: Channel,
    /// Protocol API level negotiated by the adapter.
    pub api_level: u32,
    /// Caller application identity.
    pub application: Option<String>,
    /// Physical identity label of the calling host or device.
    pub physical_identity: Option<String>,
    /// Repository the caller addressed.
    pub repository: Option<String>,
}

impl IdentityContext {
    /// Authority name of the authenticated principal.
    #[must_use]
    pub fn authority(&self) -> &str {
        &self.principal.id
    }

    /// `user@tenant` form of the authority.
    #[must_use]
    pub fn qualified_authority(&self) -> String {
        format!("{}@{}", self.principal.id, self.tenant)
    }
}
