use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Command;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{Settings, SurfaceChoice};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Ceiling for any single call into the pool control surface. The
/// surface shells out to host tooling that can hang; the daemon must not.
pub const SURFACE_CALL_TIMEOUT: Duration = Duration::from_secs(3);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("application pool '{0}' was not found on this host")]
    NotFound(String),
    #[error(
        "access denied controlling application pool '{0}'; run the service with IIS administration rights"
    )]
    AccessDenied(String),
    #[error(
        "cannot read the pool configuration store at {0}; check that IIS is installed and its shared configuration is reachable"
    )]
    ConfigUnavailable(String),
    #[error("no application pool control surface is available: {0}")]
    SurfaceUnavailable(String),
    #[error("pool operation timed out after {}ms", .0.as_millis())]
    Timeout(Duration),
    // Uncategorized; the marker flags it for operator attention.
    #[error("\u{26a0} pool command failed: {0}")]
    Unknown(String),
}

// ---------------------------------------------------------------------------
// Pool state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolState {
    Started,
    Stopped,
    Starting,
    Stopping,
    /// The host reported something we don't recognize. Never treated as
    /// a verified state.
    Unknown,
}

impl FromStr for PoolState {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "started" => PoolState::Started,
            "stopped" => PoolState::Stopped,
            "starting" => PoolState::Starting,
            "stopping" => PoolState::Stopping,
            _ => PoolState::Unknown,
        })
    }
}

impl std::fmt::Display for PoolState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PoolState::Started => write!(f, "started"),
            PoolState::Stopped => write!(f, "stopped"),
            PoolState::Starting => write!(f, "starting"),
            PoolState::Stopping => write!(f, "stopping"),
            PoolState::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub name: String,
    pub state: PoolState,
}

// ---------------------------------------------------------------------------
// Control surface trait
// ---------------------------------------------------------------------------

/// Host-side control of IIS application pools. Synchronous by design;
/// the daemon calls through `call_surface` which runs it on a blocking
/// thread under a timeout.
pub trait PoolControlSurface: Send + Sync {
    fn list(&self) -> Result<Vec<PoolSnapshot>, PoolError>;
    fn state(&self, pool: &str) -> Result<PoolState, PoolError>;
    fn start(&self, pool: &str) -> Result<(), PoolError>;
    fn stop(&self, pool: &str) -> Result<(), PoolError>;
    fn recycle(&self, pool: &str) -> Result<(), PoolError>;
}

pub type SharedSurface = Arc<dyn PoolControlSurface>;

/// Run one surface call on a blocking thread under `SURFACE_CALL_TIMEOUT`.
pub async fn call_surface<T, F>(surface: SharedSurface, op: F) -> Result<T, PoolError>
where
    T: Send + 'static,
    F: FnOnce(&dyn PoolControlSurface) -> Result<T, PoolError> + Send + 'static,
{
    let task = tokio::task::spawn_blocking(move || op(surface.as_ref()));
    match tokio::time::timeout(SURFACE_CALL_TIMEOUT, task).await {
        Ok(Ok(result)) => result,
        Ok(Err(join)) => Err(PoolError::Unknown(join.to_string())),
        Err(_) => Err(PoolError::Timeout(SURFACE_CALL_TIMEOUT)),
    }
}

pub fn surface_from_settings(settings: &Settings) -> SharedSurface {
    match settings.pool_surface {
        SurfaceChoice::Static => Arc::new(StaticSurface::new(&settings.static_pools)),
        SurfaceChoice::None => Arc::new(UnsupportedSurface::new(
            "pool control disabled in configuration",
        )),
        SurfaceChoice::Auto => {
            #[cfg(windows)]
            {
                match AppCmdSurface::detect() {
                    Ok(surface) => Arc::new(surface),
                    Err(e) => Arc::new(UnsupportedSurface::new(e.to_string())),
                }
            }
            #[cfg(not(windows))]
            {
                Arc::new(UnsupportedSurface::new(
                    "IIS is not available on this platform",
                ))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Static surface (tests, IIS-less hosts)
// ---------------------------------------------------------------------------

/// In-memory pool table. Seeded pools begin started. `frozen` makes the
/// surface accept commands without changing state, which is how the
/// verification path gets exercised without a real IIS host.
pub struct StaticSurface {
    pools: Mutex<HashMap<String, PoolState>>,
    frozen: bool,
}

impl StaticSurface {
    pub fn new(seed: &[String]) -> Self {
        let pools = seed
            .iter()
            .map(|name| (name.clone(), PoolState::Started))
            .collect();
        Self {
            pools: Mutex::new(pools),
            frozen: false,
        }
    }

    pub fn frozen(seed: &[String]) -> Self {
        let mut surface = Self::new(seed);
        surface.frozen = true;
        surface
    }

    fn set(&self, pool: &str, state: PoolState) -> Result<(), PoolError> {
        let mut pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        let slot = pools
            .get_mut(pool)
            .ok_or_else(|| PoolError::NotFound(pool.to_string()))?;
        if !self.frozen {
            *slot = state;
        }
        Ok(())
    }
}

impl PoolControlSurface for StaticSurface {
    fn list(&self) -> Result<Vec<PoolSnapshot>, PoolError> {
        let pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        let mut snapshots: Vec<PoolSnapshot> = pools
            .iter()
            .map(|(name, state)| PoolSnapshot {
                name: name.clone(),
                state: *state,
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(snapshots)
    }

    fn state(&self, pool: &str) -> Result<PoolState, PoolError> {
        let pools = self.pools.lock().unwrap_or_else(|e| e.into_inner());
        pools
            .get(pool)
            .copied()
            .ok_or_else(|| PoolError::NotFound(pool.to_string()))
    }

    fn start(&self, pool: &str) -> Result<(), PoolError> {
        self.set(pool, PoolState::Started)
    }

    fn stop(&self, pool: &str) -> Result<(), PoolError> {
        self.set(pool, PoolState::Stopped)
    }

    fn recycle(&self, pool: &str) -> Result<(), PoolError> {
        // A recycle lands back in the started state.
        self.set(pool, PoolState::Started)
    }
}

// ---------------------------------------------------------------------------
// appcmd surface (IIS hosts)
// ---------------------------------------------------------------------------

/// Drives IIS through `appcmd.exe`. Compiled everywhere so the output
/// parser stays testable; only selected on Windows hosts.
pub struct AppCmdSurface {
    appcmd: PathBuf,
    config_dir: PathBuf,
}

impl AppCmdSurface {
    pub fn detect() -> Result<Self, PoolError> {
        let windir = std::env::var("WINDIR").unwrap_or_else(|_| "C:\\Windows".to_string());
        let inetsrv = PathBuf::from(windir).join("System32").join("inetsrv");
        let appcmd = inetsrv.join("appcmd.exe");
        if !appcmd.exists() {
            return Err(PoolError::SurfaceUnavailable(format!(
                "{} not found; is IIS installed?",
                appcmd.display()
            )));
        }
        Ok(Self {
            appcmd,
            config_dir: inetsrv.join("config"),
        })
    }

    /// Cheap check before shelling out: the IIS configuration store must
    /// exist and `applicationHost.config` must open for shared read.
    /// Catches a broken or half-uninstalled IIS without the 3s timeout.
    fn preflight(&self) -> Result<(), PoolError> {
        if !self.config_dir.is_dir() {
            return Err(PoolError::ConfigUnavailable(
                self.config_dir.display().to_string(),
            ));
        }
        let host_config = self.config_dir.join("applicationHost.config");
        match std::fs::File::open(&host_config) {
            Ok(_) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                Err(PoolError::AccessDenied(host_config.display().to_string()))
            }
            Err(_) => Err(PoolError::ConfigUnavailable(
                host_config.display().to_string(),
            )),
        }
    }

    fn run(&self, args: &[&str], pool: &str) -> Result<String, PoolError> {
        self.preflight()?;
        let output = Command::new(&self.appcmd)
            .args(args)
            .output()
            .map_err(|e| PoolError::Unknown(e.to_string()))?;

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        let combined = format!("{stdout}{stderr}");
        let lowered = combined.to_ascii_lowercase();
        if lowered.contains("cannot find") || lowered.contains("not found") {
            Err(PoolError::NotFound(pool.to_string()))
        } else if lowered.contains("access is denied") || lowered.contains("access denied") {
            Err(PoolError::AccessDenied(pool.to_string()))
        } else {
            Err(PoolError::Unknown(combined.trim().to_string()))
        }
    }
}

impl PoolControlSurface for AppCmdSurface {
    fn list(&self) -> Result<Vec<PoolSnapshot>, PoolError> {
        let text = self.run(&["list", "apppool"], "")?;
        Ok(parse_appcmd_list(&text))
    }

    fn state(&self, pool: &str) -> Result<PoolState, PoolError> {
        let text = self.run(&["list", "apppool", pool], pool)?;
        parse_appcmd_list(&text)
            .into_iter()
            .find(|s| s.name.eq_ignore_ascii_case(pool))
            .map(|s| s.state)
            .ok_or_else(|| PoolError::NotFound(pool.to_string()))
    }

    fn start(&self, pool: &str) -> Result<(), PoolError> {
        self.run(&["start", "apppool", &format!("/apppool.name:{pool}")], pool)
            .map(|_| ())
    }

    fn stop(&self, pool: &str) -> Result<(), PoolError> {
        self.run(&["stop", "apppool", &format!("/apppool.name:{pool}")], pool)
            .map(|_| ())
    }

    fn recycle(&self, pool: &str) -> Result<(), PoolError> {
        self.run(
            &["recycle", "apppool", &format!("/apppool.name:{pool}")],
            pool,
        )
        .map(|_| ())
    }
}

/// Parse `appcmd list apppool` output lines of the form:
/// `APPPOOL "DefaultAppPool" (MgdVersion:v4.0,MgdMode:Integrated,state:Started)`
pub fn parse_appcmd_list(text: &str) -> Vec<PoolSnapshot> {
    let mut snapshots = Vec::new();
    for line in text.lines() {
        let line = line.trim();
        let Some(rest) = line.strip_prefix("APPPOOL \"") else {
            continue;
        };
        let Some(quote_end) = rest.find('"') else {
            continue;
        };
        let name = &rest[..quote_end];

        let state = rest[quote_end..]
            .split("state:")
            .nth(1)
            .map(|s| {
                let raw = s.trim_end_matches(')').trim();
                let raw = raw.split([',', ')']).next().unwrap_or(raw);
                raw.parse::<PoolState>().unwrap_or(PoolState::Unknown)
            })
            .unwrap_or(PoolState::Unknown);

        snapshots.push(PoolSnapshot {
            name: name.to_string(),
            state,
        });
    }
    snapshots
}

// ---------------------------------------------------------------------------
// Unsupported surface
// ---------------------------------------------------------------------------

pub struct UnsupportedSurface {
    reason: String,
}

impl UnsupportedSurface {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn unavailable<T>(&self) -> Result<T, PoolError> {
        Err(PoolError::SurfaceUnavailable(self.reason.clone()))
    }
}

impl PoolControlSurface for UnsupportedSurface {
    fn list(&self) -> Result<Vec<PoolSnapshot>, PoolError> {
        // No surface means no pools, which keeps listings usable on
        // hosts that only run native applications.
        Ok(Vec::new())
    }

    fn state(&self, _pool: &str) -> Result<PoolState, PoolError> {
        self.unavailable()
    }

    fn start(&self, _pool: &str) -> Result<(), PoolError> {
        self.unavailable()
    }

    fn stop(&self, _pool: &str) -> Result<(), PoolError> {
        self.unavailable()
    }

    fn recycle(&self, _pool: &str) -> Result<(), PoolError> {
        self.unavailable()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn seed(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_pool_state_parse() {
        assert_eq!("Started".parse::<PoolState>().unwrap(), PoolState::Started);
        assert_eq!("  stopped ".parse::<PoolState>().unwrap(), PoolState::Stopped);
        assert_eq!("Starting".parse::<PoolState>().unwrap(), PoolState::Starting);
        assert_eq!("weird".parse::<PoolState>().unwrap(), PoolState::Unknown);
    }

    #[test]
    fn test_static_surface_lifecycle() {
        let surface = StaticSurface::new(&seed(&["CheckoutPool"]));
        assert_eq!(surface.state("CheckoutPool").unwrap(), PoolState::Started);

        surface.stop("CheckoutPool").unwrap();
        assert_eq!(surface.state("CheckoutPool").unwrap(), PoolState::Stopped);

        surface.start("CheckoutPool").unwrap();
        surface.recycle("CheckoutPool").unwrap();
        assert_eq!(surface.state("CheckoutPool").unwrap(), PoolState::Started);
    }

    #[test]
    fn test_static_surface_unknown_pool() {
        let surface = StaticSurface::new(&seed(&["CheckoutPool"]));
        assert!(matches!(
            surface.start("Other"),
            Err(PoolError::NotFound(_))
        ));
        assert!(matches!(
            surface.state("Other"),
            Err(PoolError::NotFound(_))
        ));
    }

    #[test]
    fn test_frozen_surface_accepts_but_does_not_change() {
        let surface = StaticSurface::frozen(&seed(&["CheckoutPool"]));
        surface.stop("CheckoutPool").unwrap();
        // Command was accepted but the pool never moved.
        assert_eq!(surface.state("CheckoutPool").unwrap(), PoolState::Started);
    }

    #[test]
    fn test_static_surface_list_sorted() {
        let surface = StaticSurface::new(&seed(&["Zeta", "Alpha"]));
        let names: Vec<String> = surface.list().unwrap().into_iter().map(|s| s.name).collect();
        assert_eq!(names, vec!["Alpha", "Zeta"]);
    }

    #[test]
    fn test_parse_appcmd_list() {
        let text = "APPPOOL \"DefaultAppPool\" (MgdVersion:v4.0,MgdMode:Integrated,state:Started)\n\
                    APPPOOL \"CheckoutPool\" (MgdVersion:v4.0,MgdMode:Integrated,state:Stopped)\n\
                    unrelated noise line\n";
        let snapshots = parse_appcmd_list(text);
        assert_eq!(snapshots.len(), 2);
        assert_eq!(snapshots[0].name, "DefaultAppPool");
        assert_eq!(snapshots[0].state, PoolState::Started);
        assert_eq!(snapshots[1].name, "CheckoutPool");
        assert_eq!(snapshots[1].state, PoolState::Stopped);
    }

    #[test]
    fn test_parse_appcmd_list_unknown_state() {
        let snapshots = parse_appcmd_list("APPPOOL \"X\" (state:Flickering)\n");
        assert_eq!(snapshots[0].state, PoolState::Unknown);
    }

    #[test]
    fn test_unsupported_surface_lists_empty_but_refuses_control() {
        let surface = UnsupportedSurface::new("no IIS here");
        assert!(surface.list().unwrap().is_empty());
        assert!(matches!(
            surface.start("CheckoutPool"),
            Err(PoolError::SurfaceUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_call_surface_runs_op() {
        let surface: SharedSurface = Arc::new(StaticSurface::new(&seed(&["CheckoutPool"])));
        let state = call_surface(surface, |s| s.state("CheckoutPool"))
            .await
            .unwrap();
        assert_eq!(state, PoolState::Started);
    }

    #[test]
    fn test_surface_from_settings() {
        let mut settings = Settings::default();
        settings.pool_surface = SurfaceChoice::Static;
        settings.static_pools = seed(&["CheckoutPool"]);
        let surface = surface_from_settings(&settings);
        assert_eq!(surface.state("CheckoutPool").unwrap(), PoolState::Started);

        settings.pool_surface = SurfaceChoice::None;
        let surface = surface_from_settings(&settings);
        assert!(matches!(
            surface.start("CheckoutPool"),
            Err(PoolError::SurfaceUnavailable(_))
        ));
    }
}
