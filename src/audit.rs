use uuid::Uuid;

use crate::model::{ActionKind, ActivityRecord};
use crate::store::SharedStore;

/// Append-only writer for the activity trail. Recording must never turn
/// a completed lifecycle action into a failure, so store errors are
/// reported on stderr and swallowed.
#[derive(Clone)]
pub struct ActivityAuditor {
    store: SharedStore,
}

impl ActivityAuditor {
    pub fn new(store: SharedStore) -> Self {
        Self { store }
    }

    pub async fn record(
        &self,
        application_id: Uuid,
        account_id: Uuid,
        actor_label: &str,
        action: ActionKind,
        detail: impl Into<String>,
    ) {
        let record = ActivityRecord::new(application_id, account_id, actor_label, action, detail);
        let mut store = self.store.write().await;
        if let Err(e) = store.append_activity(record) {
            eprintln!("appctl: failed to record {action} activity: {e}");
        }
    }

    pub async fn recent(
        &self,
        application_id: Option<Uuid>,
        limit: usize,
    ) -> Vec<ActivityRecord> {
        self.store.read().await.activity(application_id, limit)
    }
}
