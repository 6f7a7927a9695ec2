use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use uuid::Uuid;

use crate::audit::ActivityAuditor;
use crate::authz;
use crate::config::Settings;
use crate::cpu::SharedSampler;
use crate::identity::{ActorContext, IdentityError, IdentityResolver};
use crate::model::{Account, ActionKind, AppKind, LifecycleAction, ManagedApplication};
use crate::pool::{PoolControlSurface, PoolError, PoolState, SharedSurface, call_surface};
use crate::process::{LaunchSpec, ProcessController, StopOutcome};
use crate::protocol::{ActionOutcome, ActivityRow, AppRow, PoolRow};
use crate::store::{SharedStore, Store, StoreError};
use crate::sys;
use crate::verify::{SettleDelays, VerifyOutcome, verify};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ControllerError {
    #[error(transparent)]
    Identity(#[from] IdentityError),
    #[error("'{0}' is not authorized for this operation")]
    Denied(String),
    #[error("no application matching '{0}'")]
    UnknownTarget(String),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Pool(#[from] PoolError),
}

// ---------------------------------------------------------------------------
// LifecycleController
// ---------------------------------------------------------------------------

/// Everything the daemon does to an application funnels through here:
/// resolve the actor, authorize, serialize per target, act, verify, and
/// leave exactly one audit record per lifecycle attempt.
pub struct LifecycleController {
    store: SharedStore,
    resolver: IdentityResolver,
    processes: ProcessController,
    surface: SharedSurface,
    sampler: SharedSampler,
    delays: SettleDelays,
    auditor: ActivityAuditor,
    locks: Mutex<HashMap<Uuid, Arc<tokio::sync::Mutex<()>>>>,
}

impl LifecycleController {
    pub fn new(
        store: SharedStore,
        settings: &Settings,
        surface: SharedSurface,
        sampler: SharedSampler,
    ) -> Self {
        Self {
            auditor: ActivityAuditor::new(store.clone()),
            store,
            resolver: IdentityResolver::new(settings.auto_provision_accounts),
            processes: ProcessController::new(
                Duration::from_millis(settings.graceful_stop_timeout_ms),
                Duration::from_millis(settings.restart_settle_ms),
            ),
            surface,
            sampler,
            delays: SettleDelays::from_millis(
                settings.verify_start_ms,
                settings.verify_stop_ms,
                settings.verify_recycle_ms,
            ),
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// One mutex per application id, so concurrent requests against the
    /// same target run one at a time while different targets proceed in
    /// parallel.
    fn lock_for(&self, id: Uuid) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks
            .entry(id)
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn resolve_actor(&self, actor: &ActorContext) -> Result<Account, ControllerError> {
        let mut guard = self.store.write().await;
        let store: &mut dyn Store = guard.as_mut();
        Ok(self.resolver.resolve(store, actor)?)
    }

    async fn resolve_target(&self, target: &str) -> Result<ManagedApplication, ControllerError> {
        let guard = self.store.read().await;
        let found = match target.parse::<Uuid>() {
            Ok(id) => guard.application(id),
            Err(_) => guard.application_by_name(target),
        };
        found.ok_or_else(|| ControllerError::UnknownTarget(target.to_string()))
    }

    // -----------------------------------------------------------------
    // Lifecycle actions
    // -----------------------------------------------------------------

    pub async fn perform(
        &self,
        target: &str,
        action: LifecycleAction,
        actor: &ActorContext,
        reason: Option<String>,
    ) -> Result<ActionOutcome, ControllerError> {
        let account = self.resolve_actor(actor).await?;
        let app = self.resolve_target(target).await?;

        {
            let guard = self.store.read().await;
            if !authz::authorize(guard.as_ref(), &account, app.id) {
                // Denials are surfaced but deliberately not audited; the
                // trail records attempts against targets, not probes.
                eprintln!(
                    "appctl: denied {} on '{}' for {}",
                    action,
                    app.name,
                    actor.label()
                );
                return Err(ControllerError::Denied(actor.label().to_string()));
            }
        }

        let lock = self.lock_for(app.id);
        let _held = lock.lock().await;

        // Re-read under the lock; a concurrent action may have moved it.
        let app = self.resolve_target(&app.id.to_string()).await?;

        let outcome = match &app.kind {
            AppKind::NativeProcess { .. } => self.perform_native(&app, action).await,
            AppKind::IisAppPool { pool_name, .. } => {
                self.perform_pool(pool_name.clone(), action).await
            }
        };

        let mut detail = outcome.message.clone();
        if let Some(reason) = &reason {
            detail.push_str(&format!(" (reason: {reason})"));
        }
        self.auditor
            .record(
                app.id,
                account.id,
                &account.login_name,
                action.action_kind(outcome.success),
                detail,
            )
            .await;

        if outcome.success {
            self.record_state(&app, action, reason).await;
        }

        Ok(outcome)
    }

    async fn perform_native(
        &self,
        app: &ManagedApplication,
        action: LifecycleAction,
    ) -> ActionOutcome {
        let AppKind::NativeProcess {
            executable_path,
            arguments,
            working_directory,
            ..
        } = &app.kind
        else {
            return ActionOutcome::failed("not a native application");
        };
        let spec = LaunchSpec {
            executable_path: executable_path.clone(),
            arguments: arguments.clone(),
            working_directory: working_directory.clone(),
        };

        match action {
            LifecycleAction::Start => {
                if let Some(pid) = app.process_id
                    && sys::is_pid_alive(pid)
                {
                    return ActionOutcome::ok(format!(
                        "'{}' is already running (pid {pid})",
                        app.name
                    ));
                }
                match self.processes.start(&spec).await {
                    Ok(pid) => {
                        self.store_pid(app.id, Some(pid)).await;
                        ActionOutcome::ok(format!("started '{}' (pid {pid})", app.name))
                    }
                    Err(e) => ActionOutcome::failed(format!("failed to start '{}': {e}", app.name)),
                }
            }
            LifecycleAction::Stop => match self.processes.stop(app.process_id).await {
                Ok(StopOutcome::Stopped) => {
                    self.store_pid(app.id, None).await;
                    ActionOutcome::ok(format!("stopped '{}'", app.name))
                }
                Ok(StopOutcome::NothingToStop) => {
                    self.store_pid(app.id, None).await;
                    ActionOutcome::ok(format!("'{}' was not running", app.name))
                }
                Err(e) => ActionOutcome::failed(format!("failed to stop '{}': {e}", app.name)),
            },
            LifecycleAction::Restart => {
                match self.processes.restart(app.process_id, &spec).await {
                    Ok(pid) => {
                        self.store_pid(app.id, Some(pid)).await;
                        ActionOutcome::ok(format!("restarted '{}' (pid {pid})", app.name))
                    }
                    Err(e) => {
                        ActionOutcome::failed(format!("failed to restart '{}': {e}", app.name))
                    }
                }
            }
            LifecycleAction::Recycle => {
                ActionOutcome::failed("recycle applies to IIS application pools only")
            }
        }
    }

    async fn perform_pool(&self, pool: String, action: LifecycleAction) -> ActionOutcome {
        let current = {
            let name = pool.clone();
            match call_surface(self.surface.clone(), move |s: &dyn PoolControlSurface| {
                s.state(&name)
            })
            .await
            {
                Ok(state) => state,
                Err(e) => return ActionOutcome::failed(e.to_string()),
            }
        };

        match action {
            LifecycleAction::Start => {
                if current == PoolState::Started {
                    return ActionOutcome::ok(format!("pool '{pool}' is already started"));
                }
                self.pool_command_verified(&pool, PoolCommand::Start, self.delays.start)
                    .await
            }
            LifecycleAction::Stop => {
                if current == PoolState::Stopped {
                    return ActionOutcome::ok(format!("pool '{pool}' is already stopped"));
                }
                self.pool_command_verified(&pool, PoolCommand::Stop, self.delays.stop)
                    .await
            }
            LifecycleAction::Recycle => {
                if current == PoolState::Stopped {
                    return ActionOutcome::failed(format!(
                        "pool '{pool}' is stopped; recycle requires a started pool"
                    ));
                }
                self.pool_command_verified(&pool, PoolCommand::Recycle, self.delays.recycle)
                    .await
            }
            LifecycleAction::Restart => {
                if current == PoolState::Started {
                    let stopped = self
                        .pool_command_verified(&pool, PoolCommand::Stop, self.delays.stop)
                        .await;
                    if !stopped.success {
                        return stopped;
                    }
                }
                let started = self
                    .pool_command_verified(&pool, PoolCommand::Start, self.delays.start)
                    .await;
                if started.success {
                    ActionOutcome::ok(format!("restarted pool '{pool}'"))
                } else {
                    started
                }
            }
        }
    }

    async fn pool_command_verified(
        &self,
        pool: &str,
        command: PoolCommand,
        settle: Duration,
    ) -> ActionOutcome {
        let name = pool.to_string();
        let result = call_surface(self.surface.clone(), move |s: &dyn PoolControlSurface| {
            match command {
                PoolCommand::Start => s.start(&name),
                PoolCommand::Stop => s.stop(&name),
                PoolCommand::Recycle => s.recycle(&name),
            }
        })
        .await;
        if let Err(e) = result {
            return ActionOutcome::failed(e.to_string());
        }

        let expected = command.expected_state();
        match verify(self.surface.clone(), pool, expected, settle).await {
            Ok(VerifyOutcome::Verified) => {
                ActionOutcome::ok(format!("pool '{pool}' verified {expected}"))
            }
            Ok(VerifyOutcome::Mismatch { actual }) => ActionOutcome::failed(format!(
                "{command} for pool '{pool}' was not confirmed: expected {expected}, currently {actual}"
            )),
            Err(e) => ActionOutcome::failed(format!(
                "pool '{pool}' could not be verified after {command}: {e}"
            )),
        }
    }

    /// Post-success bookkeeping on the stored application record.
    async fn record_state(
        &self,
        app: &ManagedApplication,
        action: LifecycleAction,
        reason: Option<String>,
    ) {
        let mut guard = self.store.write().await;
        let Some(mut stored) = guard.application(app.id) else {
            return;
        };
        match action {
            LifecycleAction::Start | LifecycleAction::Restart => {
                stored.is_started = true;
                stored.last_launched_at = Some(chrono::Utc::now());
                stored.last_launch_reason = reason;
            }
            LifecycleAction::Stop => {
                stored.is_started = false;
            }
            LifecycleAction::Recycle => {}
        }
        if let Err(e) = guard.update_application(stored) {
            eprintln!("appctl: failed to record state for '{}': {e}", app.name);
        }
    }

    async fn store_pid(&self, id: Uuid, pid: Option<u32>) {
        let mut guard = self.store.write().await;
        let Some(mut stored) = guard.application(id) else {
            return;
        };
        stored.process_id = pid;
        if let Err(e) = guard.update_application(stored) {
            eprintln!("appctl: failed to record pid: {e}");
        }
    }

    // -----------------------------------------------------------------
    // Ownership administration
    // -----------------------------------------------------------------

    pub async fn grant_ownership(
        &self,
        target: &str,
        owner_login: &str,
        actor: &ActorContext,
    ) -> Result<ActionOutcome, ControllerError> {
        let admin = self.require_admin(actor).await?;
        let app = self.resolve_target(target).await?;

        let outcome = {
            let mut guard = self.store.write().await;
            match guard.account_by_login(owner_login) {
                Some(owner) => {
                    let grant = crate::model::OwnershipGrant::new(
                        owner.id,
                        app.id,
                        owner.login_name.clone(),
                        admin.login_name.clone(),
                    );
                    match guard.insert_grant(grant) {
                        Ok(()) => ActionOutcome::ok(format!(
                            "granted '{}' to {}",
                            app.name, owner.login_name
                        )),
                        Err(e) => ActionOutcome::failed(e.to_string()),
                    }
                }
                None => ActionOutcome::failed(format!("no account with login '{owner_login}'")),
            }
        };

        let kind = if outcome.success {
            ActionKind::OwnershipCreated
        } else {
            ActionKind::OwnershipCreateFailed
        };
        self.auditor
            .record(app.id, admin.id, &admin.login_name, kind, &outcome.message)
            .await;
        Ok(outcome)
    }

    pub async fn revoke_ownership(
        &self,
        target: &str,
        owner_login: &str,
        actor: &ActorContext,
    ) -> Result<ActionOutcome, ControllerError> {
        let admin = self.require_admin(actor).await?;
        let app = self.resolve_target(target).await?;

        let outcome = {
            let mut guard = self.store.write().await;
            match guard.account_by_login(owner_login) {
                Some(owner) => match guard.delete_grant(owner.id, app.id) {
                    Ok(removed) => ActionOutcome::ok(format!(
                        "revoked '{}' from {}",
                        app.name, removed.login_label
                    )),
                    Err(e) => ActionOutcome::failed(e.to_string()),
                },
                None => ActionOutcome::failed(format!("no account with login '{owner_login}'")),
            }
        };

        let kind = if outcome.success {
            ActionKind::OwnershipDeleted
        } else {
            ActionKind::OwnershipDeleteFailed
        };
        self.auditor
            .record(app.id, admin.id, &admin.login_name, kind, &outcome.message)
            .await;
        Ok(outcome)
    }

    // -----------------------------------------------------------------
    // Application administration
    // -----------------------------------------------------------------

    pub async fn create_application(
        &self,
        app: ManagedApplication,
        actor: &ActorContext,
    ) -> Result<ActionOutcome, ControllerError> {
        let admin = self.require_admin(actor).await?;

        if let Err(e) = app.validate() {
            return Ok(ActionOutcome::failed(e.to_string()));
        }

        let outcome = {
            let mut guard = self.store.write().await;
            if guard.application_by_name(&app.name).is_some() {
                ActionOutcome::failed(format!("an application named '{}' already exists", app.name))
            } else {
                match guard.insert_application(app.clone()) {
                    Ok(()) => ActionOutcome::ok(format!("registered '{}' ({})", app.name, app.id)),
                    Err(e) => ActionOutcome::failed(e.to_string()),
                }
            }
        };

        let kind = if outcome.success {
            ActionKind::ApplicationCreated
        } else {
            ActionKind::ApplicationCreateFailed
        };
        self.auditor
            .record(app.id, admin.id, &admin.login_name, kind, &outcome.message)
            .await;
        Ok(outcome)
    }

    pub async fn delete_application(
        &self,
        target: &str,
        actor: &ActorContext,
    ) -> Result<ActionOutcome, ControllerError> {
        let admin = self.require_admin(actor).await?;
        let app = self.resolve_target(target).await?;

        let outcome = {
            let mut guard = self.store.write().await;
            match guard.delete_application(app.id) {
                Ok(()) => ActionOutcome::ok(format!("removed '{}'", app.name)),
                Err(e) => ActionOutcome::failed(e.to_string()),
            }
        };

        let kind = if outcome.success {
            ActionKind::ApplicationDeleted
        } else {
            ActionKind::ApplicationDeleteFailed
        };
        self.auditor
            .record(app.id, admin.id, &admin.login_name, kind, &outcome.message)
            .await;
        Ok(outcome)
    }

    async fn require_admin(&self, actor: &ActorContext) -> Result<Account, ControllerError> {
        let account = self.resolve_actor(actor).await?;
        if !account.is_global_admin {
            return Err(ControllerError::Denied(actor.label().to_string()));
        }
        Ok(account)
    }

    // -----------------------------------------------------------------
    // Listings
    // -----------------------------------------------------------------

    pub async fn list_applications(
        &self,
        actor: &ActorContext,
    ) -> Result<Vec<AppRow>, ControllerError> {
        let account = self.resolve_actor(actor).await?;
        let apps = {
            let guard = self.store.read().await;
            let all = guard.applications();
            if account.is_global_admin {
                all
            } else {
                all.into_iter()
                    .filter(|a| guard.grant_exists(account.id, a.id))
                    .collect()
            }
        };

        let mut rows = Vec::with_capacity(apps.len());
        for app in apps {
            let mut row = AppRow {
                id: app.id,
                name: app.name.clone(),
                kind: app.kind.tag(),
                is_started: app.is_started,
                pid: app.process_id,
                pool_name: app.kind.pool_name().map(str::to_string),
                cpu_percent: None,
                last_launched_at: app.last_launched_at,
                last_launch_reason: app.last_launch_reason.clone(),
            };
            match &app.kind {
                AppKind::NativeProcess { .. } => {
                    let alive = app.process_id.is_some_and(sys::is_pid_alive);
                    row.is_started = alive;
                    if alive {
                        row.cpu_percent = self.sampler.sample_process(app.process_id.unwrap_or(0));
                    } else {
                        row.pid = None;
                    }
                }
                AppKind::IisAppPool { pool_name, .. } => {
                    let name = pool_name.clone();
                    if let Ok(state) =
                        call_surface(self.surface.clone(), move |s: &dyn PoolControlSurface| {
                            s.state(&name)
                        })
                        .await
                    {
                        row.is_started = state == PoolState::Started;
                    }
                }
            }
            rows.push(row);
        }
        Ok(rows)
    }

    /// List live pools. For admins, pools the host reports but the
    /// registry doesn't know yet are materialized as new applications so
    /// they become grantable.
    pub async fn pools(&self, actor: &ActorContext) -> Result<Vec<PoolRow>, ControllerError> {
        let account = self.resolve_actor(actor).await?;
        let snapshots =
            call_surface(self.surface.clone(), |s: &dyn PoolControlSurface| s.list()).await?;

        let mut rows = Vec::new();
        for snapshot in snapshots {
            let registered = {
                let guard = self.store.read().await;
                guard.application_by_pool(&snapshot.name)
            };

            let app = match registered {
                Some(app) => Some(app),
                None if account.is_global_admin => {
                    let app = ManagedApplication::new(
                        snapshot.name.clone(),
                        AppKind::IisAppPool {
                            pool_name: snapshot.name.clone(),
                            site_name: None,
                        },
                    );
                    let mut guard = self.store.write().await;
                    match guard.insert_application(app.clone()) {
                        Ok(()) => Some(app),
                        Err(e) => {
                            eprintln!(
                                "appctl: failed to register discovered pool '{}': {e}",
                                snapshot.name
                            );
                            None
                        }
                    }
                }
                None => None,
            };

            // Non-admins only see pools backed by an application they
            // hold a grant for.
            let has_grant = match &app {
                Some(a) => {
                    let guard = self.store.read().await;
                    guard.grant_exists(account.id, a.id)
                }
                None => false,
            };

            if account.is_global_admin || has_grant {
                rows.push(PoolRow {
                    pool_name: snapshot.name,
                    state: snapshot.state,
                    application: app.as_ref().map(|a| a.name.clone()),
                    application_id: app.as_ref().map(|a| a.id),
                });
            }
        }
        Ok(rows)
    }

    pub async fn history(
        &self,
        target: Option<&str>,
        limit: usize,
        actor: &ActorContext,
    ) -> Result<Vec<ActivityRow>, ControllerError> {
        let account = self.resolve_actor(actor).await?;

        let application_id = match target {
            Some(t) => {
                let app = self.resolve_target(t).await?;
                let guard = self.store.read().await;
                if !authz::authorize(guard.as_ref(), &account, app.id) {
                    return Err(ControllerError::Denied(actor.label().to_string()));
                }
                Some(app.id)
            }
            None => {
                // The unscoped trail is admin-only.
                if !account.is_global_admin {
                    return Err(ControllerError::Denied(actor.label().to_string()));
                }
                None
            }
        };

        let guard = self.store.read().await;
        let rows = guard
            .activity(application_id, limit)
            .into_iter()
            .map(|record| ActivityRow {
                timestamp: record.timestamp,
                actor: record.actor_label,
                action: record.action,
                application: guard
                    .application(record.application_id)
                    .map(|a| a.name)
                    .unwrap_or_else(|| record.application_id.to_string()),
                detail: record.detail,
            })
            .collect();
        Ok(rows)
    }
}

#[derive(Debug, Clone, Copy)]
enum PoolCommand {
    Start,
    Stop,
    Recycle,
}

impl PoolCommand {
    fn expected_state(self) -> PoolState {
        match self {
            PoolCommand::Start | PoolCommand::Recycle => PoolState::Started,
            PoolCommand::Stop => PoolState::Stopped,
        }
    }
}

impl std::fmt::Display for PoolCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolCommand::Start => write!(f, "start"),
            PoolCommand::Stop => write!(f, "stop"),
            PoolCommand::Recycle => write!(f, "recycle"),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
