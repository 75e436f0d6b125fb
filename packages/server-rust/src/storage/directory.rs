//! Static account directory implementing [`Authenticator`].

use async_trait::async_trait;
use dashmap::DashMap;
use docvault_core::Principal;
use subtle::ConstantTimeEq;

use crate::service::operation::RepositoryError;
use crate::traits::Authenticator;

struct Account {
    password: String,
    roles: Vec<String>,
}

/// Accounts keyed by `(authority, tenant)`, held in memory.
///
/// Password comparison is constant-time. Unknown accounts and wrong
/// passwords are rejected with the same message.
#[derive(Default)]
pub struct StaticAuthenticator {
    accounts: DashMap<(String, String), Account>,
}

impl StaticAuthenticator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces the account of `authority` in `tenant`.
    pub fn add_account(&self, authority: &str, tenant: &str, password: &str, roles: &[&str]) {
        self.accounts.insert(
            (authority.to_string(), tenant.to_string()),
            Account {
                password: password.to_string(),
                roles: roles.iter().map(ToString::to_string).collect(),
            },
        );
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.accounts.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

#[async_trait]
impl Authenticator for StaticAuthenticator {
    async fn authenticate(
        &self,
        authority: &str,
        tenant: &str,
        password: &str,
    ) -> Result<Principal, RepositoryError> {
        let key = (authority.to_string(), tenant.to_string());
        let principal = self.accounts.get(&key).and_then(|account| {
            let matches: bool = account.password.as_bytes().ct_eq(password.as_bytes()).into();
            matches.then(|| Principal {
                id: authority.to_string(),
                roles: account.roles.clone(),
            })
        });
        principal.ok_or_else(|| {
            RepositoryError::Unauthenticated(format!("invalid credentials for {authority}@{tenant}"))
        })
    }
}
