use serde::{Deserialize, Serialize};

use crate::model::Account;
use crate::store::{Store, StoreError};

/// Who is asking. Carried on every request; the daemon never trusts a raw
/// string as an account, it resolves through here first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActorContext {
    /// Stable principal identifier (e.g. a Windows SID), when available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub login_name: Option<String>,
}

impl ActorContext {
    pub fn from_login(login: impl Into<String>) -> Self {
        Self {
            principal_id: None,
            login_name: Some(login.into()),
        }
    }

    /// Human-readable label for audit records and diagnostics.
    pub fn label(&self) -> &str {
        self.login_name
            .as_deref()
            .or(self.principal_id.as_deref())
            .unwrap_or("<unknown>")
    }
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("no account for actor '{0}'")]
    Unresolved(String),
    #[error("account '{0}' is deactivated")]
    Inactive(String),
    #[error("failed to provision account for '{login}': {source}")]
    Provision {
        login: String,
        source: StoreError,
    },
}

/// Maps an incoming actor context to a stored account. Principal id wins
/// over login name so renamed accounts keep their history.
pub struct IdentityResolver {
    auto_provision: bool,
}

impl IdentityResolver {
    pub fn new(auto_provision: bool) -> Self {
        Self { auto_provision }
    }

    pub fn resolve(
        &self,
        store: &mut dyn Store,
        ctx: &ActorContext,
    ) -> Result<Account, IdentityError> {
        let found = ctx
            .principal_id
            .as_deref()
            .and_then(|p| store.account_by_principal(p))
            .or_else(|| {
                ctx.login_name
                    .as_deref()
                    .and_then(|l| store.account_by_login(l))
            });

        if let Some(account) = found {
            if !account.is_active {
                return Err(IdentityError::Inactive(account.login_name));
            }
            return Ok(account);
        }

        if !self.auto_provision {
            return Err(IdentityError::Unresolved(ctx.label().to_string()));
        }
        let Some(login) = ctx.login_name.clone() else {
            return Err(IdentityError::Unresolved(ctx.label().to_string()));
        };

        let mut account = Account::new(login.clone());
        account.principal_id = ctx.principal_id.clone();
        store
            .insert_account(account.clone())
            .map_err(|source| IdentityError::Provision { login, source })?;
        Ok(account)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::JsonStore;

    #[test]
    fn test_resolve_by_principal_beats_login() {
        let mut store = JsonStore::in_memory();
        let mut by_principal = Account::new("CORP\\old-name");
        by_principal.principal_id = Some("S-1-5-21-1".to_string());
        let expected = by_principal.id;
        store.insert_account(by_principal).unwrap();
        store.insert_account(Account::new("CORP\\msander")).unwrap();

        let ctx = ActorContext {
            principal_id: Some("S-1-5-21-1".to_string()),
            login_name: Some("CORP\\msander".to_string()),
        };
        let resolved = IdentityResolver::new(false)
            .resolve(&mut store, &ctx)
            .unwrap();
        assert_eq!(resolved.id, expected);
    }

    #[test]
    fn test_resolve_by_login_when_principal_unknown() {
        let mut store = JsonStore::in_memory();
        let account = Account::new("CORP\\msander");
        let expected = account.id;
        store.insert_account(account).unwrap();

        let ctx = ActorContext::from_login("corp\\MSANDER");
        let resolved = IdentityResolver::new(false)
            .resolve(&mut store, &ctx)
            .unwrap();
        assert_eq!(resolved.id, expected);
    }

    #[test]
    fn test_unknown_actor_without_provisioning_fails() {
        let mut store = JsonStore::in_memory();
        let err = IdentityResolver::new(false)
            .resolve(&mut store, &ActorContext::from_login("CORP\\nobody"))
            .unwrap_err();
        assert!(matches!(err, IdentityError::Unresolved(_)));
    }

    #[test]
    fn test_inactive_account_is_rejected() {
        let mut store = JsonStore::in_memory();
        let mut account = Account::new("CORP\\msander");
        account.is_active = false;
        store.insert_account(account).unwrap();

        let err = IdentityResolver::new(true)
            .resolve(&mut store, &ActorContext::from_login("CORP\\msander"))
            .unwrap_err();
        assert!(matches!(err, IdentityError::Inactive(_)));
    }

    #[test]
    fn test_auto_provision_creates_active_non_admin_account() {
        let mut store = JsonStore::in_memory();
        let ctx = ActorContext {
            principal_id: Some("S-1-5-21-7".to_string()),
            login_name: Some("CORP\\new".to_string()),
        };
        let account = IdentityResolver::new(true)
            .resolve(&mut store, &ctx)
            .unwrap();
        assert!(account.is_active);
        assert!(!account.is_global_admin);
        assert_eq!(account.principal_id.as_deref(), Some("S-1-5-21-7"));
        // Durable: the same actor resolves to the same account next time.
        let again = IdentityResolver::new(true)
            .resolve(&mut store, &ctx)
            .unwrap();
        assert_eq!(again.id, account.id);
    }

    #[test]
    fn test_auto_provision_needs_a_login_name() {
        let mut store = JsonStore::in_memory();
        let ctx = ActorContext {
            principal_id: Some("S-1-5-21-7".to_string()),
            login_name: None,
        };
        let err = IdentityResolver::new(true)
            .resolve(&mut store, &ctx)
            .unwrap_err();
        assert!(matches!(err, IdentityError::Unresolved(_)));
    }

    #[test]
    fn test_label_falls_back_to_principal() {
        let ctx = ActorContext {
            principal_id: Some("S-1-5-21-7".to_string()),
            login_name: None,
        };
        assert_eq!(ctx.label(), "S-1-5-21-7");
        assert_eq!(ActorContext::default().label(), "<unknown>");
    }
}
