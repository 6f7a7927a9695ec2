use clap::{CommandFactory, Parser};
use comfy_table::{Attribute, Cell, Color, Table, presets::UTF8_FULL_CONDENSED};
use owo_colors::OwoColorize;

use appctl::cli::{Cli, Command};
use appctl::identity::ActorContext;
use appctl::model::LifecycleAction;
use appctl::pool::PoolState;
use appctl::protocol::{Request, Response};

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    if cli.daemon {
        let paths = appctl::paths::Paths::new()?;
        appctl::daemon::run(paths).await?;
    } else if let Some(command) = cli.command {
        let paths = appctl::paths::Paths::new()?;
        let actor = resolve_actor(cli.actor);
        let request = command_to_request(command, actor);
        let response = appctl::client::send_request(&paths, &request)?;
        if cli.json {
            print_response_json(&response);
        } else {
            print_response(&response);
        }
        if failed(&response) {
            std::process::exit(1);
        }
    } else {
        Cli::command().print_help()?;
    }

    Ok(())
}

/// The actor is the `--as` login when given, otherwise the OS user.
fn resolve_actor(override_login: Option<String>) -> ActorContext {
    let login = override_login
        .or_else(|| std::env::var("USER").ok())
        .or_else(|| std::env::var("USERNAME").ok());
    match login {
        Some(login) => ActorContext::from_login(login),
        None => ActorContext::default(),
    }
}

fn failed(response: &Response) -> bool {
    match response {
        Response::Error { .. } => true,
        Response::Outcome { outcome } => !outcome.success,
        _ => false,
    }
}

fn command_to_request(command: Command, actor: ActorContext) -> Request {
    match command {
        Command::Start { target, reason } => Request::Perform {
            target,
            action: LifecycleAction::Start,
            actor,
            reason,
        },
        Command::Stop { target, reason } => Request::Perform {
            target,
            action: LifecycleAction::Stop,
            actor,
            reason,
        },
        Command::Restart { target, reason } => Request::Perform {
            target,
            action: LifecycleAction::Restart,
            actor,
            reason,
        },
        Command::Recycle { target, reason } => Request::Perform {
            target,
            action: LifecycleAction::Recycle,
            actor,
            reason,
        },
        Command::List => Request::ListApps { actor },
        Command::Pools => Request::ListPools { actor },
        Command::History { target, limit } => Request::History {
            target,
            limit,
            actor,
        },
        Command::Grant { target, owner } => Request::Grant {
            target,
            owner,
            actor,
        },
        Command::Revoke { target, owner } => Request::Revoke {
            target,
            owner,
            actor,
        },
        Command::AddApp {
            name,
            exec,
            args,
            cwd,
            pool,
            site,
            elevated,
        } => Request::AddApp {
            name,
            executable: exec,
            arguments: args,
            working_directory: cwd,
            pool,
            site,
            elevated,
            actor,
        },
        Command::RemoveApp { target } => Request::RemoveApp { target, actor },
        Command::Kill => Request::Kill,
    }
}

fn print_response_json(response: &Response) {
    let json = serde_json::to_string(response).expect("failed to serialize response");
    println!("{json}");
}

fn state_color(started: bool) -> Color {
    if started { Color::Green } else { Color::Reset }
}

fn pool_state_color(state: PoolState) -> Color {
    match state {
        PoolState::Started => Color::Green,
        PoolState::Starting | PoolState::Stopping => Color::Yellow,
        PoolState::Stopped => Color::Reset,
        PoolState::Unknown => Color::Red,
    }
}

fn print_response(response: &Response) {
    match response {
        Response::Success { message } => {
            if let Some(msg) = message {
                println!("{}", msg.green());
            } else {
                println!("{}", "ok".green());
            }
        }
        Response::Error { message } => {
            eprintln!("{} {}", "error:".red().bold(), message);
        }
        Response::Outcome { outcome } => {
            if outcome.success {
                println!("{}", outcome.message.green());
            } else {
                eprintln!("{} {}", "failed:".red().bold(), outcome.message);
            }
        }
        Response::Apps { apps } => {
            if apps.is_empty() {
                println!("{}", "no applications registered".yellow());
                return;
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(vec![
                Cell::new("name").add_attribute(Attribute::Bold),
                Cell::new("kind").add_attribute(Attribute::Bold),
                Cell::new("state").add_attribute(Attribute::Bold),
                Cell::new("pid").add_attribute(Attribute::Bold),
                Cell::new("cpu").add_attribute(Attribute::Bold),
                Cell::new("last launched").add_attribute(Attribute::Bold),
                Cell::new("reason").add_attribute(Attribute::Bold),
            ]);
            for app in apps {
                let state = if app.is_started { "started" } else { "stopped" };
                let pid = app
                    .pid
                    .map(|p| p.to_string())
                    .unwrap_or_else(|| "-".to_string());
                let launched = app
                    .last_launched_at
                    .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                    .unwrap_or_else(|| "-".to_string());
                table.add_row(vec![
                    Cell::new(&app.name).fg(Color::Cyan),
                    Cell::new(app.kind.to_string()).fg(Color::Magenta),
                    Cell::new(state).fg(state_color(app.is_started)),
                    Cell::new(pid),
                    Cell::new(format_cpu(app.cpu_percent)),
                    Cell::new(launched),
                    Cell::new(app.last_launch_reason.as_deref().unwrap_or("-")),
                ]);
            }
            println!("{table}");
        }
        Response::Pools { pools } => {
            if pools.is_empty() {
                println!("{}", "no application pools visible".yellow());
                return;
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(vec![
                Cell::new("pool").add_attribute(Attribute::Bold),
                Cell::new("state").add_attribute(Attribute::Bold),
                Cell::new("application").add_attribute(Attribute::Bold),
            ]);
            for pool in pools {
                table.add_row(vec![
                    Cell::new(&pool.pool_name).fg(Color::Cyan),
                    Cell::new(pool.state.to_string()).fg(pool_state_color(pool.state)),
                    Cell::new(pool.application.as_deref().unwrap_or("-")),
                ]);
            }
            println!("{table}");
        }
        Response::Activity { records } => {
            if records.is_empty() {
                println!("{}", "no activity recorded".yellow());
                return;
            }
            let mut table = Table::new();
            table.load_preset(UTF8_FULL_CONDENSED);
            table.set_header(vec![
                Cell::new("when").add_attribute(Attribute::Bold),
                Cell::new("actor").add_attribute(Attribute::Bold),
                Cell::new("action").add_attribute(Attribute::Bold),
                Cell::new("application").add_attribute(Attribute::Bold),
                Cell::new("detail").add_attribute(Attribute::Bold),
            ]);
            for record in records {
                let action_cell = if record.action.is_failure() {
                    Cell::new(record.action.to_string()).fg(Color::Red)
                } else {
                    Cell::new(record.action.to_string()).fg(Color::Green)
                };
                table.add_row(vec![
                    Cell::new(record.timestamp.format("%Y-%m-%d %H:%M:%S").to_string()),
                    Cell::new(&record.actor),
                    action_cell,
                    Cell::new(&record.application).fg(Color::Cyan),
                    Cell::new(&record.detail),
                ]);
            }
            println!("{table}");
        }
    }
}

fn format_cpu(cpu: Option<f64>) -> String {
    match cpu {
        Some(v) => format!("{v:.1}%"),
        None => "-".to_string(),
    }
}
