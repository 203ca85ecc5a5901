//! Tenant-to-credential routing.
//!
//! Each tenant bills against its own API key. A tenant without a configured
//! key fails the call with a distinct error kind; there is deliberately no
//! shared-key fallback.

use std::collections::HashMap;

use secrecy::SecretString;

use tally_core::config::TenantCredentialConfig;
use tally_core::{GovernorError, TenantId};

pub struct CredentialStore {
    keys: HashMap<TenantId, SecretString>,
}

impl CredentialStore {
    pub fn new(tenants: &[TenantCredentialConfig]) -> Self {
        let keys = tenants
            .iter()
            .map(|tenant| (TenantId(tenant.id.clone()), tenant.api_key.clone()))
            .collect();
        Self { keys }
    }

    pub fn resolve(&self, tenant_id: &TenantId) -> Result<&SecretString, GovernorError> {
        self.keys
            .get(tenant_id)
            .ok_or_else(|| GovernorError::InvalidCredential(tenant_id.clone()))
    }

    pub fn tenant_ids(&self) -> Vec<&TenantId> {
        let mut ids: Vec<_> = self.keys.keys().collect();
        ids.sort();
        ids
    }
}

#[cfg(test)]
mod tests {
    use super::CredentialStore;
    use tally_core::config::TenantCredentialConfig;
    use tally_core::{GovernorError, TenantId};

    #[test]
    fn unknown_tenant_gets_a_distinct_error_not_a_fallback() {
        let store = CredentialStore::new(&[TenantCredentialConfig {
            id: "acme".to_string(),
            api_key: "sk-acme".to_string().into(),
        }]);

        assert!(store.resolve(&TenantId("acme".into())).is_ok());
        let err = store.resolve(&TenantId("globex".into())).unwrap_err();
        assert_eq!(err, GovernorError::InvalidCredential(TenantId("globex".into())));
    }
}
