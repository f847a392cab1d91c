//! One fast tick's worth of metrics.

use std::path::Path;

use crate::error::CollectError;
use crate::process::ProcessEnumerator;
use crate::procfs::ProcFs;
use crate::stats::{MemoryUsage, SystemStatsReader};

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessStat {
    /// Resident memory as a percentage of total system memory.
    pub memory_share: f32,
    pub command_line: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Busy fraction in [0,1].
    pub cpu_utilization: f32,
    /// Sorted by `memory_share`, largest first.
    pub process_stats: Vec<ProcessStat>,
}

/// Largest `memory_share` first. Ties keep no particular order.
pub fn rank_by_memory(stats: &mut [ProcessStat]) {
    stats.sort_unstable_by(|a, b| b.memory_share.total_cmp(&a.memory_share));
}

/// Drives the system reader and the process enumerator for one tick.
#[derive(Debug)]
pub struct SampleCollector<F> {
    stats: SystemStatsReader<F>,
    procs: ProcessEnumerator<F>,
}

impl<F: ProcFs + Clone> SampleCollector<F> {
    pub fn new(fs: F, proc_root: &Path) -> Self {
        Self {
            stats: SystemStatsReader::new(fs.clone(), proc_root),
            procs: ProcessEnumerator::new(fs, proc_root),
        }
    }
}

impl<F: ProcFs> SampleCollector<F> {
    pub fn stats(&self) -> &SystemStatsReader<F> {
        &self.stats
    }

    pub fn stats_mut(&mut self) -> &mut SystemStatsReader<F> {
        &mut self.stats
    }

    /// Reads CPU utilization and every process, ranked by memory.
    ///
    /// Only a failed CPU read fails the tick; unreadable processes are
    /// dropped from the sample.
    pub fn collect(&mut self, mem_total: u64) -> Result<Sample, CollectError> {
        let cpu_utilization = self.stats.read_cpu_utilization()?;
        let mut process_stats = self.procs.collect_all(mem_total);
        rank_by_memory(&mut process_stats);
        Ok(Sample {
            cpu_utilization,
            process_stats,
        })
    }

    pub fn memory_usage(&self, mem_total: u64) -> Result<MemoryUsage, CollectError> {
        self.stats.read_memory_usage(mem_total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::procfs::mock::MockFs;

    #[test]
    fn collect_ranks_descending() {
        let fs = MockFs::new();
        let root = Path::new("/proc");
        fs.set_cpu_line(root, "cpu 10 0 10 80 0 0 0 0 0 0");
        let rss = [30u64, 5, 90, 5, 60, 0, 45];
        for (i, r) in rss.iter().enumerate() {
            fs.add_process(
                root,
                i as u32 + 1,
                format!("p{i}\0").as_bytes(),
                Some(&format!("1000 {r} 0 0 0 0 0")),
            );
        }
        let mut c = SampleCollector::new(fs, root);
        let s = c.collect(1000).unwrap();
        assert_eq!(s.process_stats.len(), rss.len());
        assert!(s
            .process_stats
            .windows(2)
            .all(|w| w[0].memory_share >= w[1].memory_share));
        assert_eq!(s.process_stats[0].command_line, "p2");
        assert!((s.cpu_utilization - 0.2).abs() < 1e-6);
    }

    #[test]
    fn cpu_failure_fails_the_sample() {
        let fs = MockFs::new();
        let root = Path::new("/proc");
        fs.add_process(root, 1, b"init\0", Some("1 1 0 0 0 0 0"));
        let mut c = SampleCollector::new(fs, root);
        assert!(c.collect(1024).is_err());
    }
}
