use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SurfaceChoice {
    /// Use the platform's real pool control surface when one exists.
    #[default]
    Auto,
    /// In-memory surface seeded from `static_pools`. Meant for tests and
    /// hosts without IIS.
    Static,
    /// No pool surface at all; pool operations fail with a clear message.
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct Settings {
    /// Create an account on first contact instead of rejecting unknown
    /// actors. Off by default so access stays deny-by-default.
    pub auto_provision_accounts: bool,
    /// Logins seeded as active global admins at daemon startup.
    pub admin_logins: Vec<String>,
    pub graceful_stop_timeout_ms: u64,
    pub restart_settle_ms: u64,
    pub verify_start_ms: u64,
    pub verify_stop_ms: u64,
    pub verify_recycle_ms: u64,
    pub pool_surface: SurfaceChoice,
    /// Pool names pre-loaded into the static surface (started).
    pub static_pools: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_provision_accounts: false,
            admin_logins: Vec::new(),
            graceful_stop_timeout_ms: 3000,
            restart_settle_ms: 2000,
            verify_start_ms: 1000,
            verify_stop_ms: 1000,
            verify_recycle_ms: 3000,
            pool_surface: SurfaceChoice::Auto,
            static_pools: Vec::new(),
        }
    }
}

#[derive(Debug, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("TOML parse error: {0}")]
    TomlParse(String),
    #[error("{0}")]
    IoError(String),
}

impl Settings {
    /// Load settings from `path`. A missing file is not an error; the
    /// daemon runs on defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(ConfigError::IoError(format!("{}: {e}", path.display()))),
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::TomlParse(e.to_string()))
    }
}
