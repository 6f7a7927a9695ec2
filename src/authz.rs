use uuid::Uuid;

use crate::model::Account;
use crate::store::Store;

/// Whether `account` may control `application_id`. Global admins may
/// control everything; everyone else needs an ownership grant for the
/// specific application. Evaluated fresh on every call so a revoked
/// grant takes effect immediately.
pub fn authorize(store: &dyn Store, account: &Account, application_id: Uuid) -> bool {
    if !account.is_active {
        return false;
    }
    account.is_global_admin || store.grant_exists(account.id, application_id)
}
