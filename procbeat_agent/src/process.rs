//! Per-process enumeration: pid listing, command lines and resident memory.

use std::path::{Path, PathBuf};

use tracing::{trace, warn};

use crate::procfs::ProcFs;
use crate::sample::ProcessStat;

/// Longest command line kept per process, in bytes.
pub const CMDLINE_MAX: usize = 99;

/// True for non-empty, all-digit names (`"0"` included).
pub fn is_pid_name(name: &str) -> bool {
    !name.is_empty() && name.bytes().all(|b| b.is_ascii_digit())
}

/// argv[0] of a raw `cmdline` blob, cut to [`CMDLINE_MAX`] bytes.
pub fn command_name(raw: &[u8]) -> String {
    let first = raw.split(|b| *b == 0).next().unwrap_or_default();
    // cut after decoding: each U+FFFD replacement is 3 bytes
    let mut name = String::from_utf8_lossy(first).into_owned();
    if name.len() > CMDLINE_MAX {
        let mut end = CMDLINE_MAX;
        while !name.is_char_boundary(end) {
            end -= 1;
        }
        name.truncate(end);
    }
    name
}

/// Resident pages: second field of `/proc/<pid>/statm`.
pub fn parse_statm_resident(content: &str) -> Option<u64> {
    content.split_whitespace().nth(1)?.parse().ok()
}

#[derive(Debug, Clone)]
pub struct ProcessEnumerator<F> {
    fs: F,
    root: PathBuf,
}

impl<F: ProcFs> ProcessEnumerator<F> {
    pub fn new(fs: F, proc_root: &Path) -> Self {
        Self {
            fs,
            root: proc_root.to_path_buf(),
        }
    }

    /// Numeric entries under the proc root, ascending.
    ///
    /// An unreadable root yields an empty list; the tick still carries its
    /// CPU reading.
    pub fn list_process_ids(&self) -> Vec<u32> {
        let names = match self.fs.list_dir(&self.root) {
            Ok(n) => n,
            Err(e) => {
                warn!("cannot list {}: {e}", self.root.display());
                return Vec::new();
            }
        };
        let mut pids: Vec<u32> = names
            .iter()
            .filter(|n| is_pid_name(n))
            .filter_map(|n| n.parse().ok())
            .collect();
        pids.sort_unstable();
        pids
    }

    /// Command line of `pid`; empty when the process is a zombie or gone.
    pub fn read_command_line(&self, pid: u32) -> String {
        let path = self.root.join(pid.to_string()).join("cmdline");
        match self.fs.read(&path) {
            Ok(raw) => command_name(&raw),
            Err(_) => String::new(),
        }
    }

    /// Resident set size as reported by `statm` (pages, not KiB).
    pub fn read_resident_memory(&self, pid: u32) -> Option<u64> {
        let path = self.root.join(pid.to_string()).join("statm");
        let content = self.fs.read_to_string(&path).ok()?;
        parse_statm_resident(&content)
    }

    /// One [`ProcessStat`] per live, readable process, in pid order.
    ///
    /// `memory_share` divides resident pages by `mem_total` KiB without
    /// converting units, matching the historical reports.
    pub fn collect_all(&self, mem_total: u64) -> Vec<ProcessStat> {
        let pids = self.list_process_ids();
        let mut out = Vec::with_capacity(pids.len());
        for pid in pids {
            let command_line = self.read_command_line(pid);
            if command_line.is_empty() {
                trace!(pid, "skipping zombie");
                continue;
            }
            let Some(resident) = self.read_resident_memory(pid) else {
                trace!(pid, "skipping, statm unreadable");
                continue;
            };
            let memory_share = if mem_total == 0 {
                0.0
            } else {
                (resident as f64 / mem_total as f64 * 100.0) as f32
            };
            out.push(ProcessStat {
                memory_share,
                command_line,
            });
        }
        out
    }
}
