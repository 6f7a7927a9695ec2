use std::fs;
use std::sync::Arc;

use color_eyre::eyre::bail;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::watch;

use crate::config::Settings;
use crate::controller::{ControllerError, LifecycleController};
use crate::cpu;
use crate::model::{Account, AppKind, ManagedApplication};
use crate::paths::Paths;
use crate::pid;
use crate::pool::surface_from_settings;
use crate::protocol::{self, Request, Response};
use crate::store::{JsonStore, SharedStore, shared};
use crate::sys;

pub async fn run(paths: Paths) -> color_eyre::Result<()> {
    fs::create_dir_all(paths.data_dir())?;

    if pid::is_daemon_running(&paths)? {
        bail!("daemon is already running");
    }

    pid::write_pid_file(&paths)?;

    let settings = Settings::load(&paths.config_file())?;
    let store = shared(JsonStore::open(paths.state_file())?);
    seed_admins(&store, &settings.admin_logins).await;

    let surface = surface_from_settings(&settings);
    let sampler = cpu::detect();
    let controller = Arc::new(LifecycleController::new(
        store, &settings, surface, sampler,
    ));

    let listener = sys::ipc_bind(&paths).await?;
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

    let result = run_accept_loop(&listener, &shutdown_tx, &mut shutdown_rx, &controller).await;

    sys::ipc_cleanup(&paths).await;
    pid::remove_pid_file(&paths);

    result
}

/// Make sure every configured admin login exists as an active global
/// admin. Existing accounts are promoted, not duplicated.
async fn seed_admins(store: &SharedStore, admin_logins: &[String]) {
    let mut guard = store.write().await;
    for login in admin_logins {
        match guard.account_by_login(login) {
            Some(mut account) => {
                if !account.is_global_admin || !account.is_active {
                    account.is_global_admin = true;
                    account.is_active = true;
                    if let Err(e) = guard.update_account(account) {
                        eprintln!("appctl: failed to promote admin '{login}': {e}");
                    }
                }
            }
            None => {
                let mut account = Account::new(login.clone());
                account.is_global_admin = true;
                if let Err(e) = guard.insert_account(account) {
                    eprintln!("appctl: failed to seed admin '{login}': {e}");
                }
            }
        }
    }
}

async fn run_accept_loop(
    listener: &sys::IpcListener,
    shutdown_tx: &watch::Sender<bool>,
    shutdown_rx: &mut watch::Receiver<bool>,
    controller: &Arc<LifecycleController>,
) -> color_eyre::Result<()> {
    loop {
        tokio::select! {
            accept_result = sys::ipc_accept(listener) => {
                let stream = accept_result?;
                let tx = shutdown_tx.clone();
                let ctl = Arc::clone(controller);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, &tx, &ctl).await {
                        eprintln!("connection error: {e}");
                    }
                });
            }
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    break;
                }
            }
            _ = sys::signal_shutdown() => {
                break;
            }
        }
    }

    Ok(())
}

async fn handle_connection(
    stream: sys::IpcStream,
    shutdown_tx: &watch::Sender<bool>,
    controller: &Arc<LifecycleController>,
) -> color_eyre::Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut buf_reader = BufReader::new(reader);
    let mut line = String::new();
    buf_reader.read_line(&mut line).await?;

    if line.is_empty() {
        return Ok(());
    }

    let request = protocol::decode_request(&line)?;
    let response = dispatch(request, shutdown_tx, controller).await;
    let encoded = protocol::encode_response(&response)?;
    writer.write_all(&encoded).await?;
    writer.shutdown().await?;

    Ok(())
}

async fn dispatch(
    request: Request,
    shutdown_tx: &watch::Sender<bool>,
    controller: &Arc<LifecycleController>,
) -> Response {
    match request {
        Request::Perform {
            target,
            action,
            actor,
            reason,
        } => outcome_response(controller.perform(&target, action, &actor, reason).await),
        Request::ListApps { actor } => match controller.list_applications(&actor).await {
            Ok(apps) => Response::Apps { apps },
            Err(e) => error_response(e),
        },
        Request::ListPools { actor } => match controller.pools(&actor).await {
            Ok(pools) => Response::Pools { pools },
            Err(e) => error_response(e),
        },
        Request::History {
            target,
            limit,
            actor,
        } => match controller.history(target.as_deref(), limit, &actor).await {
            Ok(records) => Response::Activity { records },
            Err(e) => error_response(e),
        },
        Request::Grant {
            target,
            owner,
            actor,
        } => outcome_response(controller.grant_ownership(&target, &owner, &actor).await),
        Request::Revoke {
            target,
            owner,
            actor,
        } => outcome_response(controller.revoke_ownership(&target, &owner, &actor).await),
        Request::AddApp {
            name,
            executable,
            arguments,
            working_directory,
            pool,
            site,
            elevated,
            actor,
        } => {
            let kind = match (executable, pool) {
                (Some(_), Some(_)) => {
                    return Response::Error {
                        message: "an application is either native or an IIS pool, not both"
                            .to_string(),
                    };
                }
                (Some(executable_path), None) => AppKind::NativeProcess {
                    executable_path,
                    arguments,
                    working_directory,
                    requires_elevation: elevated,
                },
                (None, Some(pool_name)) => AppKind::IisAppPool {
                    pool_name,
                    site_name: site,
                },
                (None, None) => {
                    return Response::Error {
                        message: "specify either an executable or a pool name".to_string(),
                    };
                }
            };
            let app = ManagedApplication::new(name, kind);
            outcome_response(controller.create_application(app, &actor).await)
        }
        Request::RemoveApp { target, actor } => {
            outcome_response(controller.delete_application(&target, &actor).await)
        }
        Request::Kill => {
            let _ = shutdown_tx.send(true);
            Response::Success {
                message: Some("daemon shutting down".to_string()),
            }
        }
    }
}

fn outcome_response(
    result: Result<protocol::ActionOutcome, ControllerError>,
) -> Response {
    match result {
        Ok(outcome) => Response::Outcome { outcome },
        Err(e) => error_response(e),
    }
}

fn error_response(e: ControllerError) -> Response {
    Response::Error {
        message: e.to_string(),
    }
}
