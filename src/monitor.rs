//! CPU utilization sampling for capture-interval throttling.
//!
//! The scheduler widens its intervals when the host is under CPU pressure
//! and restores them once pressure drops. Sampling lives here so the
//! scheduler itself stays pure and testable.

use sysinfo::System;
use tracing::debug;

/// CPU percentage above which intervals start widening
pub const DEFAULT_CPU_THRESHOLD: f32 = 80.0;

/// Widening multiplier for a given CPU reading.
///
/// At or below the threshold nothing changes; between the threshold and 90%
/// intervals stretch by half; beyond that they double.
pub fn throttle_factor(cpu_percent: f32, threshold: f32) -> f64 {
    if cpu_percent <= threshold {
        1.0
    } else if cpu_percent <= 90.0 {
        1.5
    } else {
        2.0
    }
}

/// Samples host CPU usage via sysinfo.
///
/// CPU readings are deltas between refreshes, so the constructor performs a
/// baseline refresh and the first tick's reading settles from there.
pub struct ResourceMonitor {
    system: System,
    threshold: f32,
}

impl ResourceMonitor {
    pub fn new(threshold: f32) -> Self {
        let mut system = System::new();
        system.refresh_cpu_usage();
        Self { system, threshold }
    }

    /// Current global CPU usage in percent
    pub fn sample_cpu(&mut self) -> f32 {
        self.system.refresh_cpu_usage();
        self.system.global_cpu_usage()
    }

    /// Sample and convert to the scheduler's widening factor
    pub fn sample_throttle_factor(&mut self) -> f64 {
        let cpu = self.sample_cpu();
        let factor = throttle_factor(cpu, self.threshold);
        if factor > 1.0 {
            debug!("cpu at {cpu:.1}%, widening capture intervals x{factor}");
        }
        factor
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_CPU_THRESHOLD)
    }
}
