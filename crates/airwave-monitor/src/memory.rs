//! Memory figures for health reports.

use parking_lot::Mutex;
use serde::Serialize;
use sysinfo::{Pid, System};

use crate::error::MonitorError;

/// Point-in-time memory figures of this process, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MemorySnapshot {
    /// Resident set size of this process.
    pub resident_bytes: u64,
    /// Virtual memory reserved by this process.
    pub virtual_bytes: u64,
    /// Budget the resident size is measured against: the configured limit,
    /// or the host's total memory when none is set.
    pub limit_bytes: u64,
}

impl MemorySnapshot {
    /// `resident / limit`, or `None` when the limit is unknown.
    pub fn usage_ratio(&self) -> Option<f64> {
        (self.limit_bytes > 0).then(|| self.resident_bytes as f64 / self.limit_bytes as f64)
    }
}

/// Source of memory figures.
pub trait MemoryProbe: Send + Sync {
    fn snapshot(&self) -> Result<MemorySnapshot, MonitorError>;
}

/// Reads this process's memory through `sysinfo`.
///
/// Other processes on the host never count towards the ratio; only the
/// resident size of this one does.
pub struct SystemMemoryProbe {
    system: Mutex<System>,
    pid: Option<Pid>,
    budget_bytes: Option<u64>,
}

impl SystemMemoryProbe {
    /// Probe measured against the host's total memory.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
            budget_bytes: None,
        }
    }

    /// Probe measured against an explicit budget, e.g. the container limit.
    /// `None` or zero falls back to the host's total memory.
    pub fn with_budget(budget_bytes: Option<u64>) -> Self {
        Self {
            budget_bytes: budget_bytes.filter(|bytes| *bytes > 0),
            ..Self::new()
        }
    }
}

impl Default for SystemMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for SystemMemoryProbe {
    fn snapshot(&self) -> Result<MemorySnapshot, MonitorError> {
        let pid = self
            .pid
            .ok_or_else(|| MonitorError::memory_unavailable("current process id is unknown"))?;

        let mut system = self.system.lock();

        let limit_bytes = match self.budget_bytes {
            Some(budget) => budget,
            None => {
                system.refresh_memory();
                system.total_memory()
            }
        };
        if limit_bytes == 0 {
            return Err(MonitorError::memory_unavailable(
                "platform reported zero total memory",
            ));
        }

        if !system.refresh_process(pid) {
            return Err(MonitorError::memory_unavailable(format!(
                "process {pid} not found"
            )));
        }
        let (resident_bytes, virtual_bytes) = system
            .process(pid)
            .map(|process| (process.memory(), process.virtual_memory()))
            .ok_or_else(|| MonitorError::memory_unavailable(format!("process {pid} not found")))?;

        Ok(MemorySnapshot {
            resident_bytes,
            virtual_bytes,
            limit_bytes,
        })
    }
}
