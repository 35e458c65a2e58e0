//! System resource sampling attached to probe results.

use serde::Serialize;
use sysinfo::System;

/// Point-in-time memory/CPU reading.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct ResourceSnapshot {
    pub memory_used_mb: u64,
    pub cpu_usage_percent: f32,
}

/// Owns the [`sysinfo::System`] handle and produces snapshots on demand.
pub struct ResourceMonitor {
    system: System,
}

impl ResourceMonitor {
    pub fn new() -> Self {
        Self {
            system: System::new_all(),
        }
    }

    pub fn snapshot(&mut self) -> ResourceSnapshot {
        self.system.refresh_memory();
        self.system.refresh_cpu();
        ResourceSnapshot {
            memory_used_mb: self.system.used_memory() / (1024 * 1024),
            cpu_usage_percent: self.system.global_cpu_info().cpu_usage(),
        }
    }
}

impl Default for ResourceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
