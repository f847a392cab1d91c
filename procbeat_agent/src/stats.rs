//! System-wide counters from `/proc/stat` and `/proc/meminfo`.

use std::path::{Path, PathBuf};

use crate::error::CollectError;
use crate::procfs::ProcFs;

/// Number of counters on the aggregate `cpu` line
/// (user nice system idle iowait irq softirq steal guest guest_nice).
pub const CPU_COUNTERS: usize = 10;
const IDLE_IDX: usize = 3;

/// One reading of the aggregate `cpu` line of `/proc/stat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuSnapshot {
    pub counters: [u64; CPU_COUNTERS],
}

impl CpuSnapshot {
    pub fn idle(&self) -> u64 {
        self.counters[IDLE_IDX]
    }

    pub fn total(&self) -> u64 {
        self.counters.iter().fold(0u64, |acc, v| acc.saturating_add(*v))
    }
}

/// Parses `cpu  user nice system idle ...` into a snapshot.
pub fn parse_cpu_line(line: &str) -> Result<CpuSnapshot, String> {
    let mut it = line.split_whitespace();
    match it.next() {
        Some("cpu") => {}
        Some(other) => return Err(format!("expected aggregate 'cpu' line, got {other:?}")),
        None => return Err("empty cpu line".into()),
    }
    let mut counters = [0u64; CPU_COUNTERS];
    for (i, slot) in counters.iter_mut().enumerate() {
        let tok = it
            .next()
            .ok_or_else(|| format!("expected {CPU_COUNTERS} cpu counters, got {i}"))?;
        *slot = tok
            .parse()
            .map_err(|_| format!("cpu counter {i} is not a number: {tok:?}"))?;
    }
    Ok(CpuSnapshot { counters })
}

/// Parses a `Label:   1234 kB` meminfo line, checking the label.
pub fn parse_meminfo_line(line: &str, label: &str) -> Result<u64, String> {
    let rest = line
        .strip_prefix(label)
        .and_then(|r| r.strip_prefix(':'))
        .ok_or_else(|| format!("expected {label}: line, got {line:?}"))?;
    let tok = rest
        .split_whitespace()
        .next()
        .ok_or_else(|| format!("{label} has no value"))?;
    tok.parse()
        .map_err(|_| format!("{label} value is not a number: {tok:?}"))
}

/// Free/used system memory, KiB.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemoryUsage {
    pub free: u64,
    pub used: u64,
}

impl MemoryUsage {
    /// Used share of `total` in percent.
    pub fn percent_of(&self, total: u64) -> f32 {
        if total == 0 {
            return 0.0;
        }
        self.used as f32 / total as f32 * 100.0
    }
}

/// Reads CPU utilization and memory totals, keeping the previous CPU
/// counters between calls.
///
/// The previous counters start at zero, so the first utilization reading is
/// the average since boot; call [`SystemStatsReader::warm_up`] once at
/// startup and discard it.
#[derive(Debug)]
pub struct SystemStatsReader<F> {
    fs: F,
    stat_path: PathBuf,
    meminfo_path: PathBuf,
    prev_idle: u64,
    prev_total: u64,
}

impl<F: ProcFs> SystemStatsReader<F> {
    pub fn new(fs: F, proc_root: &Path) -> Self {
        Self {
            fs,
            stat_path: proc_root.join("stat"),
            meminfo_path: proc_root.join("meminfo"),
            prev_idle: 0,
            prev_total: 0,
        }
    }

    pub fn read_cpu_snapshot(&self) -> Result<CpuSnapshot, CollectError> {
        let s = self
            .fs
            .read_to_string(&self.stat_path)
            .map_err(|e| CollectError::unavailable(&self.stat_path, e))?;
        let line = s
            .lines()
            .next()
            .ok_or_else(|| CollectError::malformed(&self.stat_path, "file is empty"))?;
        parse_cpu_line(line).map_err(|r| CollectError::malformed(&self.stat_path, r))
    }

    /// Busy fraction in [0,1] since the previous call.
    pub fn read_cpu_utilization(&mut self) -> Result<f32, CollectError> {
        let snap = self.read_cpu_snapshot()?;
        Ok(self.advance(&snap))
    }

    /// Primes the previous counters; the returned value is meaningless.
    pub fn warm_up(&mut self) -> Result<(), CollectError> {
        self.read_cpu_utilization().map(|_| ())
    }

    fn advance(&mut self, snap: &CpuSnapshot) -> f32 {
        let idle = snap.idle();
        let total = snap.total();
        let d_total = total.saturating_sub(self.prev_total);
        let d_idle = idle.saturating_sub(self.prev_idle);
        self.prev_total = total;
        self.prev_idle = idle;
        if d_total == 0 {
            return 0.0;
        }
        (1.0 - d_idle as f64 / d_total as f64).clamp(0.0, 1.0) as f32
    }

    fn meminfo_line(&self, idx: usize, label: &str) -> Result<u64, CollectError> {
        let s = self
            .fs
            .read_to_string(&self.meminfo_path)
            .map_err(|e| CollectError::unavailable(&self.meminfo_path, e))?;
        let line = s.lines().nth(idx).ok_or_else(|| {
            CollectError::malformed(&self.meminfo_path, format!("missing {label} line"))
        })?;
        parse_meminfo_line(line, label).map_err(|r| CollectError::malformed(&self.meminfo_path, r))
    }

    /// `MemTotal` in KiB (first meminfo line).
    pub fn read_memory_total(&self) -> Result<u64, CollectError> {
        self.meminfo_line(0, "MemTotal")
    }

    /// `MemFree` (second meminfo line) and `mem_total - free`.
    pub fn read_memory_usage(&self, mem_total: u64) -> Result<MemoryUsage, CollectError> {
        let free = self.meminfo_line(1, "MemFree")?;
        Ok(MemoryUsage {
            free,
            used: mem_total.saturating_sub(free),
        })
    }
}
