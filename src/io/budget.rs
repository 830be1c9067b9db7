//! Per-batch wall-clock and memory budget.

use super::traits::MemoryGauge;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

/// Fraction of physical memory used when no explicit ceiling is set.
const DERIVED_MEMORY_PERCENT: u64 = 90;

/// Why a batch stopped early.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetExceeded {
    /// The wall-clock deadline passed.
    Time,
    /// Resident memory crossed the ceiling.
    Memory,
}

impl fmt::Display for BudgetExceeded {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Time => f.write_str("time limit"),
            Self::Memory => f.write_str("memory limit"),
        }
    }
}

/// Deadline and memory ceiling checked after every row.
#[derive(Clone)]
pub struct ResourceBudget {
    started: Instant,
    time_limit: Option<Duration>,
    memory_limit: Option<u64>,
    gauge: Option<Arc<dyn MemoryGauge>>,
}

impl fmt::Debug for ResourceBudget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceBudget")
            .field("time_limit", &self.time_limit)
            .field("memory_limit", &self.memory_limit)
            .field("has_gauge", &self.gauge.is_some())
            .finish_non_exhaustive()
    }
}

impl ResourceBudget {
    /// A budget that never stops a batch.
    #[must_use]
    pub fn unlimited() -> Self {
        Self {
            started: Instant::now(),
            time_limit: None,
            memory_limit: None,
            gauge: None,
        }
    }

    /// Sets the wall-clock limit, measured from now. Zero disables it.
    #[must_use]
    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.started = Instant::now();
        self.time_limit = (!limit.is_zero()).then_some(limit);
        self
    }

    /// Sets the memory ceiling in bytes.
    ///
    /// Zero derives the ceiling from the gauge's total memory.
    #[must_use]
    pub fn with_memory_limit(mut self, limit_bytes: u64, gauge: Arc<dyn MemoryGauge>) -> Self {
        self.memory_limit = if limit_bytes > 0 {
            Some(limit_bytes)
        } else {
            gauge
                .total_bytes()
                .map(|total| total / 100 * DERIVED_MEMORY_PERCENT)
        };
        self.gauge = Some(gauge);
        self
    }

    /// Restarts the clock for a new batch.
    #[must_use]
    pub fn restarted(&self) -> Self {
        Self {
            started: Instant::now(),
            ..self.clone()
        }
    }

    /// Effective memory ceiling in bytes.
    #[must_use]
    pub const fn memory_limit(&self) -> Option<u64> {
        self.memory_limit
    }

    /// Returns the first exhausted resource, if any.
    #[must_use]
    pub fn exceeded(&self) -> Option<BudgetExceeded> {
        if self
            .time_limit
            .is_some_and(|limit| self.started.elapsed() >= limit)
        {
            return Some(BudgetExceeded::Time);
        }
        let limit = self.memory_limit?;
        let used = self.gauge.as_ref()?.used_bytes()?;
        (used >= limit).then_some(BudgetExceeded::Memory)
    }
}

impl Default for ResourceBudget {
    fn default() -> Self {
        Self::unlimited()
    }
}

/// [`MemoryGauge`] backed by `sysinfo`.
pub struct SysinfoGauge {
    system: Mutex<System>,
    pid: Option<Pid>,
}

impl SysinfoGauge {
    /// Creates a gauge for the current process.
    #[must_use]
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }
}

impl Default for SysinfoGauge {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryGauge for SysinfoGauge {
    fn used_bytes(&self) -> Option<u64> {
        let pid = self.pid?;
        let mut system = self.system.lock().ok()?;
        system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[pid]),
            true,
            ProcessRefreshKind::new().with_memory(),
        );
        system.process(pid).map(sysinfo::Process::memory)
    }

    fn total_bytes(&self) -> Option<u64> {
        let mut system = self.system.lock().ok()?;
        system.refresh_memory();
        Some(system.total_memory()).filter(|total| *total > 0)
    }
}
