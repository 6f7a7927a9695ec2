use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ModelError {
    #[error("application name must not be empty")]
    EmptyName,
    #[error("native applications require an executable path")]
    MissingExecutablePath,
    #[error("IIS applications require a pool name")]
    MissingPoolName,
}

// ---------------------------------------------------------------------------
// Managed applications
// ---------------------------------------------------------------------------

/// What kind of target an application is. The kind is fixed at creation;
/// the store refuses updates that would change it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AppKind {
    NativeProcess {
        executable_path: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        arguments: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        working_directory: Option<String>,
        #[serde(default)]
        requires_elevation: bool,
    },
    IisAppPool {
        pool_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        site_name: Option<String>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppKindTag {
    NativeProcess,
    IisAppPool,
}

impl std::fmt::Display for AppKindTag {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AppKindTag::NativeProcess => write!(f, "native"),
            AppKindTag::IisAppPool => write!(f, "app-pool"),
        }
    }
}

impl AppKind {
    pub fn tag(&self) -> AppKindTag {
        match self {
            AppKind::NativeProcess { .. } => AppKindTag::NativeProcess,
            AppKind::IisAppPool { .. } => AppKindTag::IisAppPool,
        }
    }

    pub fn pool_name(&self) -> Option<&str> {
        match self {
            AppKind::IisAppPool { pool_name, .. } => Some(pool_name.as_str()),
            AppKind::NativeProcess { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ManagedApplication {
    pub id: Uuid,
    pub name: String,
    #[serde(flatten)]
    pub kind: AppKind,
    #[serde(default)]
    pub is_started: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_launched_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_launch_reason: Option<String>,
    /// Tracked OS process id, native kind only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process_id: Option<u32>,
}

impl ManagedApplication {
    pub fn new(name: impl Into<String>, kind: AppKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            kind,
            is_started: false,
            last_launched_at: None,
            last_launch_reason: None,
            process_id: None,
        }
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.name.trim().is_empty() {
            return Err(ModelError::EmptyName);
        }
        match &self.kind {
            AppKind::NativeProcess {
                executable_path, ..
            } if executable_path.trim().is_empty() => Err(ModelError::MissingExecutablePath),
            AppKind::IisAppPool { pool_name, .. } if pool_name.trim().is_empty() => {
                Err(ModelError::MissingPoolName)
            }
            _ => Ok(()),
        }
    }
}

// ---------------------------------------------------------------------------
// Accounts
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub login_name: String,
    /// Stable principal identifier (e.g. a Windows SID). Survives renames,
    /// so it is checked before the login name when resolving an actor.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal_id: Option<String>,
    #[serde(default)]
    pub is_global_admin: bool,
    #[serde(default)]
    pub is_active: bool,
}

impl Account {
    pub fn new(login_name: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            login_name: login_name.into(),
            principal_id: None,
            is_global_admin: false,
            is_active: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Ownership grants
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnershipGrant {
    pub id: Uuid,
    pub account_id: Uuid,
    pub application_id: Uuid,
    /// Login label kept for audit display even after account renames.
    pub login_label: String,
    pub created_at: DateTime<Utc>,
    pub created_by: String,
}

impl OwnershipGrant {
    pub fn new(
        account_id: Uuid,
        application_id: Uuid,
        login_label: impl Into<String>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            application_id,
            login_label: login_label.into(),
            created_at: Utc::now(),
            created_by: created_by.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Lifecycle actions & activity records
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleAction {
    Start,
    Stop,
    Restart,
    Recycle,
}

impl LifecycleAction {
    /// The audit action kind recorded for this action's outcome.
    pub fn action_kind(self, success: bool) -> ActionKind {
        match (self, success) {
            (LifecycleAction::Start, true) => ActionKind::Start,
            (LifecycleAction::Start, false) => ActionKind::StartFailed,
            (LifecycleAction::Stop, true) => ActionKind::Stop,
            (LifecycleAction::Stop, false) => ActionKind::StopFailed,
            (LifecycleAction::Restart, true) => ActionKind::Restart,
            (LifecycleAction::Restart, false) => ActionKind::RestartFailed,
            (LifecycleAction::Recycle, true) => ActionKind::Recycle,
            (LifecycleAction::Recycle, false) => ActionKind::RecycleFailed,
        }
    }
}

impl std::fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LifecycleAction::Start => write!(f, "start"),
            LifecycleAction::Stop => write!(f, "stop"),
            LifecycleAction::Restart => write!(f, "restart"),
            LifecycleAction::Recycle => write!(f, "recycle"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ActionKind {
    Start,
    Stop,
    Restart,
    Recycle,
    OwnershipCreated,
    OwnershipDeleted,
    ApplicationCreated,
    ApplicationDeleted,
    StartFailed,
    StopFailed,
    RestartFailed,
    RecycleFailed,
    OwnershipCreateFailed,
    OwnershipDeleteFailed,
    ApplicationCreateFailed,
    ApplicationDeleteFailed,
}

impl ActionKind {
    pub fn is_failure(self) -> bool {
        matches!(
            self,
            ActionKind::StartFailed
                | ActionKind::StopFailed
                | ActionKind::RestartFailed
                | ActionKind::RecycleFailed
                | ActionKind::OwnershipCreateFailed
                | ActionKind::OwnershipDeleteFailed
                | ActionKind::ApplicationCreateFailed
                | ActionKind::ApplicationDeleteFailed
        )
    }

    pub fn failed(self) -> ActionKind {
        match self {
            ActionKind::Start => ActionKind::StartFailed,
            ActionKind::Stop => ActionKind::StopFailed,
            ActionKind::Restart => ActionKind::RestartFailed,
            ActionKind::Recycle => ActionKind::RecycleFailed,
            ActionKind::OwnershipCreated => ActionKind::OwnershipCreateFailed,
            ActionKind::OwnershipDeleted => ActionKind::OwnershipDeleteFailed,
            ActionKind::ApplicationCreated => ActionKind::ApplicationCreateFailed,
            ActionKind::ApplicationDeleted => ActionKind::ApplicationDeleteFailed,
            other => other,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionKind::Start => "start",
            ActionKind::Stop => "stop",
            ActionKind::Restart => "restart",
            ActionKind::Recycle => "recycle",
            ActionKind::OwnershipCreated => "ownership-created",
            ActionKind::OwnershipDeleted => "ownership-deleted",
            ActionKind::ApplicationCreated => "application-created",
            ActionKind::ApplicationDeleted => "application-deleted",
            ActionKind::StartFailed => "start-failed",
            ActionKind::StopFailed => "stop-failed",
            ActionKind::RestartFailed => "restart-failed",
            ActionKind::RecycleFailed => "recycle-failed",
            ActionKind::OwnershipCreateFailed => "ownership-create-failed",
            ActionKind::OwnershipDeleteFailed => "ownership-delete-failed",
            ActionKind::ApplicationCreateFailed => "application-create-failed",
            ActionKind::ApplicationDeleteFailed => "application-delete-failed",
        };
        write!(f, "{s}")
    }
}

/// One immutable audit entry. Never updated or deleted by normal
/// operation; every lifecycle attempt produces exactly one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActivityRecord {
    pub id: Uuid,
    pub application_id: Uuid,
    pub account_id: Uuid,
    pub actor_label: String,
    pub action: ActionKind,
    pub detail: String,
    pub timestamp: DateTime<Utc>,
}

impl ActivityRecord {
    pub fn new(
        application_id: Uuid,
        account_id: Uuid,
        actor_label: impl Into<String>,
        action: ActionKind,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            application_id,
            account_id,
            actor_label: actor_label.into(),
            action,
            detail: detail.into(),
            timestamp: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
