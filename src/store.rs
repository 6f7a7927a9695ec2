use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{Account, ActivityRecord, AppKindTag, ManagedApplication, OwnershipGrant};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("no application with id {0}")]
    ApplicationNotFound(Uuid),
    #[error("no account with id {0}")]
    AccountNotFound(Uuid),
    #[error("ownership grant already exists")]
    DuplicateGrant,
    #[error("ownership grant not found")]
    GrantNotFound,
    #[error("application kind cannot change after creation")]
    KindImmutable,
    #[error("{entity} is still referenced by {referrer}")]
    StillReferenced {
        entity: &'static str,
        referrer: &'static str,
    },
    #[error("failed to persist state: {0}")]
    Persist(String),
}

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Durable registry of accounts, applications, ownership grants and the
/// audit trail. Writes go through here so persistence stays in one place.
pub trait Store: Send + Sync {
    // Accounts
    fn account(&self, id: Uuid) -> Option<Account>;
    fn account_by_principal(&self, principal_id: &str) -> Option<Account>;
    fn account_by_login(&self, login_name: &str) -> Option<Account>;
    fn insert_account(&mut self, account: Account) -> Result<(), StoreError>;
    fn update_account(&mut self, account: Account) -> Result<(), StoreError>;
    fn delete_account(&mut self, id: Uuid) -> Result<(), StoreError>;

    // Applications
    fn application(&self, id: Uuid) -> Option<ManagedApplication>;
    fn application_by_name(&self, name: &str) -> Option<ManagedApplication>;
    fn application_by_pool(&self, pool_name: &str) -> Option<ManagedApplication>;
    fn applications(&self) -> Vec<ManagedApplication>;
    fn applications_of_kind(&self, tag: AppKindTag) -> Vec<ManagedApplication>;
    fn insert_application(&mut self, app: ManagedApplication) -> Result<(), StoreError>;
    fn update_application(&mut self, app: ManagedApplication) -> Result<(), StoreError>;
    fn delete_application(&mut self, id: Uuid) -> Result<(), StoreError>;

    // Ownership grants
    fn grants_for_account(&self, account_id: Uuid) -> Vec<OwnershipGrant>;
    fn grants_for_application(&self, application_id: Uuid) -> Vec<OwnershipGrant>;
    fn grant_exists(&self, account_id: Uuid, application_id: Uuid) -> bool;
    fn insert_grant(&mut self, grant: OwnershipGrant) -> Result<(), StoreError>;
    fn delete_grant(
        &mut self,
        account_id: Uuid,
        application_id: Uuid,
    ) -> Result<OwnershipGrant, StoreError>;

    // Audit trail, append-only
    fn append_activity(&mut self, record: ActivityRecord) -> Result<(), StoreError>;
    fn activity(&self, application_id: Option<Uuid>, limit: usize) -> Vec<ActivityRecord>;
}

pub type SharedStore = Arc<tokio::sync::RwLock<Box<dyn Store>>>;

pub fn shared(store: impl Store + 'static) -> SharedStore {
    Arc::new(tokio::sync::RwLock::new(Box::new(store)))
}

// ---------------------------------------------------------------------------
// JSON-file store
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    #[serde(default)]
    accounts: Vec<Account>,
    #[serde(default)]
    applications: Vec<ManagedApplication>,
    #[serde(default)]
    grants: Vec<OwnershipGrant>,
    #[serde(default)]
    activity: Vec<ActivityRecord>,
}

/// Write-through store backed by a single pretty-printed JSON file.
pub struct JsonStore {
    path: Option<PathBuf>,
    state: StateFile,
}

impl JsonStore {
    pub fn open(path: PathBuf) -> Result<Self, StoreError> {
        let state = match fs::read_to_string(&path) {
            Ok(text) => serde_json::from_str(&text)
                .map_err(|e| StoreError::Persist(format!("{}: {e}", path.display())))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StateFile::default(),
            Err(e) => return Err(StoreError::Persist(format!("{}: {e}", path.display()))),
        };
        Ok(Self {
            path: Some(path),
            state,
        })
    }

    pub fn in_memory() -> Self {
        Self {
            path: None,
            state: StateFile::default(),
        }
    }

    fn flush(&self) -> Result<(), StoreError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_string_pretty(&self.state)
            .map_err(|e| StoreError::Persist(e.to_string()))?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| StoreError::Persist(e.to_string()))?;
        }
        // Write to a sibling temp file first so a crash mid-write cannot
        // truncate the live state file.
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| StoreError::Persist(e.to_string()))?;
        fs::rename(&tmp, path).map_err(|e| StoreError::Persist(e.to_string()))?;
        Ok(())
    }
}

impl Store for JsonStore {
    fn account(&self, id: Uuid) -> Option<Account> {
        self.state.accounts.iter().find(|a| a.id == id).cloned()
    }

    fn account_by_principal(&self, principal_id: &str) -> Option<Account> {
        self.state
            .accounts
            .iter()
            .find(|a| a.principal_id.as_deref() == Some(principal_id))
            .cloned()
    }

    fn account_by_login(&self, login_name: &str) -> Option<Account> {
        self.state
            .accounts
            .iter()
            .find(|a| a.login_name.eq_ignore_ascii_case(login_name))
            .cloned()
    }

    fn insert_account(&mut self, account: Account) -> Result<(), StoreError> {
        self.state.accounts.push(account);
        self.flush()
    }

    fn update_account(&mut self, account: Account) -> Result<(), StoreError> {
        let slot = self
            .state
            .accounts
            .iter_mut()
            .find(|a| a.id == account.id)
            .ok_or(StoreError::AccountNotFound(account.id))?;
        *slot = account;
        self.flush()
    }

    fn delete_account(&mut self, id: Uuid) -> Result<(), StoreError> {
        if !self.state.accounts.iter().any(|a| a.id == id) {
            return Err(StoreError::AccountNotFound(id));
        }
        if self.state.activity.iter().any(|r| r.account_id == id) {
            return Err(StoreError::StillReferenced {
                entity: "account",
                referrer: "activity records",
            });
        }
        self.state.grants.retain(|g| g.account_id != id);
        self.state.accounts.retain(|a| a.id != id);
        self.flush()
    }

    fn application(&self, id: Uuid) -> Option<ManagedApplication> {
        self.state.applications.iter().find(|a| a.id == id).cloned()
    }

    fn application_by_name(&self, name: &str) -> Option<ManagedApplication> {
        self.state
            .applications
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
            .cloned()
    }

    fn application_by_pool(&self, pool_name: &str) -> Option<ManagedApplication> {
        self.state
            .applications
            .iter()
            .find(|a| {
                a.kind
                    .pool_name()
                    .is_some_and(|p| p.eq_ignore_ascii_case(pool_name))
            })
            .cloned()
    }

    fn applications(&self) -> Vec<ManagedApplication> {
        let mut apps = self.state.applications.clone();
        apps.sort_by(|a, b| a.name.to_lowercase().cmp(&b.name.to_lowercase()));
        apps
    }

    fn applications_of_kind(&self, tag: AppKindTag) -> Vec<ManagedApplication> {
        self.applications()
            .into_iter()
            .filter(|a| a.kind.tag() == tag)
            .collect()
    }

    fn insert_application(&mut self, app: ManagedApplication) -> Result<(), StoreError> {
        self.state.applications.push(app);
        self.flush()
    }

    fn update_application(&mut self, app: ManagedApplication) -> Result<(), StoreError> {
        let slot = self
            .state
            .applications
            .iter_mut()
            .find(|a| a.id == app.id)
            .ok_or(StoreError::ApplicationNotFound(app.id))?;
        if slot.kind.tag() != app.kind.tag() {
            return Err(StoreError::KindImmutable);
        }
        *slot = app;
        self.flush()
    }

    fn delete_application(&mut self, id: Uuid) -> Result<(), StoreError> {
        if !self.state.applications.iter().any(|a| a.id == id) {
            return Err(StoreError::ApplicationNotFound(id));
        }
        if self.state.grants.iter().any(|g| g.application_id == id) {
            return Err(StoreError::StillReferenced {
                entity: "application",
                referrer: "ownership grants",
            });
        }
        self.state.applications.retain(|a| a.id != id);
        self.flush()
    }

    fn grants_for_account(&self, account_id: Uuid) -> Vec<OwnershipGrant> {
        self.state
            .grants
            .iter()
            .filter(|g| g.account_id == account_id)
            .cloned()
            .collect()
    }

    fn grants_for_application(&self, application_id: Uuid) -> Vec<OwnershipGrant> {
        self.state
            .grants
            .iter()
            .filter(|g| g.application_id == application_id)
            .cloned()
            .collect()
    }

    fn grant_exists(&self, account_id: Uuid, application_id: Uuid) -> bool {
        self.state
            .grants
            .iter()
            .any(|g| g.account_id == account_id && g.application_id == application_id)
    }

    fn insert_grant(&mut self, grant: OwnershipGrant) -> Result<(), StoreError> {
        if self.grant_exists(grant.account_id, grant.application_id) {
            return Err(StoreError::DuplicateGrant);
        }
        self.state.grants.push(grant);
        self.flush()
    }

    fn delete_grant(
        &mut self,
        account_id: Uuid,
        application_id: Uuid,
    ) -> Result<OwnershipGrant, StoreError> {
        let idx = self
            .state
            .grants
            .iter()
            .position(|g| g.account_id == account_id && g.application_id == application_id)
            .ok_or(StoreError::GrantNotFound)?;
        let removed = self.state.grants.remove(idx);
        self.flush()?;
        Ok(removed)
    }

    fn append_activity(&mut self, record: ActivityRecord) -> Result<(), StoreError> {
        self.state.activity.push(record);
        self.flush()
    }

    fn activity(&self, application_id: Option<Uuid>, limit: usize) -> Vec<ActivityRecord> {
        let mut records: Vec<ActivityRecord> = self
            .state
            .activity
            .iter()
            .filter(|r| application_id.is_none_or(|id| r.application_id == id))
            .cloned()
            .collect();
        records.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        records.truncate(limit);
        records
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionKind, AppKind};
    use chrono::Utc;

    fn native_app(name: &str) -> ManagedApplication {
        ManagedApplication::new(
            name,
            AppKind::NativeProcess {
                executable_path: "/usr/bin/true".to_string(),
                arguments: None,
                working_directory: None,
                requires_elevation: false,
            },
        )
    }

    fn pool_app(name: &str, pool: &str) -> ManagedApplication {
        ManagedApplication::new(
            name,
            AppKind::IisAppPool {
                pool_name: pool.to_string(),
                site_name: None,
            },
        )
    }

    #[test]
    fn test_account_lookup_by_principal_and_login() {
        let mut store = JsonStore::in_memory();
        let mut account = Account::new("CORP\\msander");
        account.principal_id = Some("S-1-5-21-1".to_string());
        let id = account.id;
        store.insert_account(account).unwrap();

        assert_eq!(store.account_by_principal("S-1-5-21-1").map(|a| a.id), Some(id));
        assert_eq!(store.account_by_login("corp\\MSANDER").map(|a| a.id), Some(id));
        assert!(store.account_by_principal("S-1-5-21-9").is_none());
    }

    #[test]
    fn test_application_lookup_by_pool_is_case_insensitive() {
        let mut store = JsonStore::in_memory();
        let app = pool_app("checkout", "CheckoutPool");
        let id = app.id;
        store.insert_application(app).unwrap();

        assert_eq!(store.application_by_pool("checkoutpool").map(|a| a.id), Some(id));
        assert!(store.application_by_pool("other").is_none());
    }

    #[test]
    fn test_applications_sorted_by_name() {
        let mut store = JsonStore::in_memory();
        store.insert_application(native_app("zeta")).unwrap();
        store.insert_application(native_app("Alpha")).unwrap();
        let names: Vec<String> = store.applications().into_iter().map(|a| a.name).collect();
        assert_eq!(names, vec!["Alpha", "zeta"]);
    }

    #[test]
    fn test_update_cannot_change_kind() {
        let mut store = JsonStore::in_memory();
        let app = native_app("billing");
        let id = app.id;
        store.insert_application(app).unwrap();

        let mut swapped = pool_app("billing", "BillingPool");
        swapped.id = id;
        assert!(matches!(
            store.update_application(swapped),
            Err(StoreError::KindImmutable)
        ));
    }

    #[test]
    fn test_duplicate_grant_rejected() {
        let mut store = JsonStore::in_memory();
        let account = Account::new("CORP\\msander");
        let app = native_app("billing");
        let grant = OwnershipGrant::new(account.id, app.id, "CORP\\msander", "admin");
        store.insert_account(account).unwrap();
        store.insert_application(app).unwrap();
        store.insert_grant(grant.clone()).unwrap();

        assert!(matches!(
            store.insert_grant(grant),
            Err(StoreError::DuplicateGrant)
        ));
    }

    #[test]
    fn test_delete_application_refused_while_grants_exist() {
        let mut store = JsonStore::in_memory();
        let account = Account::new("CORP\\msander");
        let app = native_app("billing");
        let app_id = app.id;
        let grant = OwnershipGrant::new(account.id, app_id, "CORP\\msander", "admin");
        let account_id = account.id;
        store.insert_account(account).unwrap();
        store.insert_application(app).unwrap();
        store.insert_grant(grant).unwrap();

        assert!(matches!(
            store.delete_application(app_id),
            Err(StoreError::StillReferenced { .. })
        ));
        store.delete_grant(account_id, app_id).unwrap();
        store.delete_application(app_id).unwrap();
    }

    #[test]
    fn test_delete_account_refused_while_activity_references_it() {
        let mut store = JsonStore::in_memory();
        let account = Account::new("CORP\\msander");
        let account_id = account.id;
        let app = native_app("billing");
        let app_id = app.id;
        store.insert_account(account).unwrap();
        store.insert_application(app).unwrap();
        store
            .append_activity(ActivityRecord::new(
                app_id,
                account_id,
                "CORP\\msander",
                ActionKind::Start,
                "started",
            ))
            .unwrap();

        assert!(matches!(
            store.delete_account(account_id),
            Err(StoreError::StillReferenced { .. })
        ));
    }

    #[test]
    fn test_delete_account_removes_its_grants() {
        let mut store = JsonStore::in_memory();
        let account = Account::new("CORP\\msander");
        let account_id = account.id;
        let app = native_app("billing");
        let app_id = app.id;
        store.insert_account(account).unwrap();
        store.insert_application(app).unwrap();
        store
            .insert_grant(OwnershipGrant::new(account_id, app_id, "CORP\\msander", "admin"))
            .unwrap();

        store.delete_account(account_id).unwrap();
        assert!(store.grants_for_application(app_id).is_empty());
    }

    #[test]
    fn test_activity_newest_first_with_filter_and_limit() {
        let mut store = JsonStore::in_memory();
        let account_id = Uuid::new_v4();
        let app_a = Uuid::new_v4();
        let app_b = Uuid::new_v4();
        for (app, detail) in [(app_a, "one"), (app_b, "two"), (app_a, "three")] {
            let mut rec = ActivityRecord::new(app, account_id, "x", ActionKind::Start, detail);
            // Spread timestamps so ordering is deterministic.
            rec.timestamp = Utc::now() + chrono::Duration::seconds(store.state.activity.len() as i64);
            store.append_activity(rec).unwrap();
        }

        let all = store.activity(None, 10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].detail, "three");

        let only_a = store.activity(Some(app_a), 10);
        assert_eq!(only_a.len(), 2);

        let limited = store.activity(None, 1);
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].detail, "three");
    }

    #[test]
    fn test_reopen_round_trips_state() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut store = JsonStore::open(path.clone()).unwrap();
        let app = pool_app("checkout", "CheckoutPool");
        let app_id = app.id;
        store.insert_application(app).unwrap();
        drop(store);

        let reopened = JsonStore::open(path).unwrap();
        assert_eq!(reopened.application(app_id).map(|a| a.name), Some("checkout".to_string()));
    }
}
