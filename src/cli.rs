use clap::{Parser, Subcommand};

#[derive(Debug, Parser)]
#[command(name = "appctl", about = "Application lifecycle controller", version)]
pub struct Cli {
    #[arg(long, hide = true)]
    pub daemon: bool,

    #[arg(long, global = true)]
    pub json: bool,

    /// Act as this login instead of the OS user. Authorization still
    /// applies to the chosen account.
    #[arg(long = "as", global = true, value_name = "LOGIN")]
    pub actor: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start an application or pool
    Start {
        target: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Stop an application or pool
    Stop {
        target: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Restart an application or pool
    Restart {
        target: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// Recycle an IIS application pool
    Recycle {
        target: String,
        #[arg(long)]
        reason: Option<String>,
    },
    /// List applications you can control
    #[command(visible_alias = "ls")]
    List,
    /// List live IIS application pools
    Pools,
    /// Show the activity trail
    History {
        target: Option<String>,
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Grant ownership of an application to an account (admin)
    Grant { target: String, owner: String },
    /// Revoke ownership of an application (admin)
    Revoke { target: String, owner: String },
    /// Register a new application (admin)
    AddApp {
        name: String,
        #[arg(long, conflicts_with = "pool")]
        exec: Option<String>,
        #[arg(long, requires = "exec", allow_hyphen_values = true)]
        args: Option<String>,
        #[arg(long, requires = "exec")]
        cwd: Option<String>,
        #[arg(long)]
        pool: Option<String>,
        #[arg(long, requires = "pool")]
        site: Option<String>,
        #[arg(long, requires = "exec", conflicts_with = "pool")]
        elevated: bool,
    },
    /// Remove a registered application (admin)
    RemoveApp { target: String },
    /// Shut down the daemon
    Kill,
}
