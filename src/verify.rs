use std::time::Duration;

use crate::pool::{PoolControlSurface, PoolError, PoolState, SharedSurface, call_surface};

/// Settle ceiling. Verification waits are bounded so a wedged pool
/// cannot stall the daemon's request loop.
pub const MAX_SETTLE: Duration = Duration::from_secs(3);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    /// The pool read back in the expected state.
    Verified,
    /// The command was accepted but the pool reads back differently.
    Mismatch { actual: PoolState },
}

#[derive(Debug, Clone, Copy)]
pub struct SettleDelays {
    pub start: Duration,
    pub stop: Duration,
    pub recycle: Duration,
}

impl SettleDelays {
    pub fn from_millis(start_ms: u64, stop_ms: u64, recycle_ms: u64) -> Self {
        let clamp = |ms: u64| Duration::from_millis(ms).min(MAX_SETTLE);
        Self {
            start: clamp(start_ms),
            stop: clamp(stop_ms),
            recycle: clamp(recycle_ms),
        }
    }
}

impl Default for SettleDelays {
    fn default() -> Self {
        Self::from_millis(1000, 1000, 3000)
    }
}

/// Wait out the settle delay, re-read the pool, and compare against what
/// the command should have produced. An `Unknown` read-back never
/// verifies, even if we cannot say what the pool is actually doing.
pub async fn verify(
    surface: SharedSurface,
    pool: &str,
    expected: PoolState,
    settle: Duration,
) -> Result<VerifyOutcome, PoolError> {
    tokio::time::sleep(settle).await;

    let name = pool.to_string();
    let actual = call_surface(surface, move |s: &dyn PoolControlSurface| s.state(&name)).await?;

    if actual == expected && expected != PoolState::Unknown {
        Ok(VerifyOutcome::Verified)
    } else {
        Ok(VerifyOutcome::Mismatch { actual })
    }
}
