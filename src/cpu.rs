use std::sync::Arc;

// ---------------------------------------------------------------------------
// Sampler trait
// ---------------------------------------------------------------------------

/// Advisory CPU readings for listings. A sampler that cannot answer
/// returns `None`; nothing downstream treats a missing sample as an
/// error.
pub trait CpuSampler: Send + Sync {
    fn sample_process(&self, pid: u32) -> Option<f64>;
    fn sample_aggregate(&self, pids: &[u32]) -> Option<f64> {
        let samples: Vec<f64> = pids
            .iter()
            .filter_map(|&pid| self.sample_process(pid))
            .collect();
        if samples.is_empty() {
            None
        } else {
            Some(samples.iter().sum())
        }
    }
}

pub type SharedSampler = Arc<dyn CpuSampler>;

pub fn detect() -> SharedSampler {
    if cfg!(unix) {
        Arc::new(PsCpuSampler)
    } else {
        Arc::new(NoCpuSampler)
    }
}

// ---------------------------------------------------------------------------
// ps-based sampler
// ---------------------------------------------------------------------------

pub struct PsCpuSampler;

impl CpuSampler for PsCpuSampler {
    fn sample_process(&self, pid: u32) -> Option<f64> {
        let output = std::process::Command::new("ps")
            .args(["-o", "%cpu=", "-p", &pid.to_string()])
            .output()
            .ok()?;

        if !output.status.success() {
            return None;
        }

        let text = String::from_utf8_lossy(&output.stdout);
        text.trim().parse().ok()
    }
}

// ---------------------------------------------------------------------------
// No-op sampler
// ---------------------------------------------------------------------------

pub struct NoCpuSampler;

impl CpuSampler for NoCpuSampler {
    fn sample_process(&self, _pid: u32) -> Option<f64> {
        None
    }
}
