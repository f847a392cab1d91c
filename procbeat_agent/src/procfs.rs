//! Filesystem access for the `/proc` readers.
//!
//! Collectors read through [`ProcFs`] so tests can feed canned `/proc`
//! content via [`mock::MockFs`] instead of the live kernel view.

use std::io;
use std::path::Path;

/// Read-only view of the process pseudo-filesystem.
pub trait ProcFs: Send + Sync {
    /// Reads a whole file as raw bytes.
    fn read(&self, path: &Path) -> io::Result<Vec<u8>>;

    /// Reads a whole file as UTF-8 text.
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    /// Names of the subdirectories directly under `path`.
    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>>;
}

/// Live filesystem, delegates to `std::fs`.
#[derive(Debug, Default, Clone, Copy)]
pub struct RealFs;

impl ProcFs for RealFs {
    fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
        std::fs::read(path)
    }

    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            // entries can vanish between readdir and stat; just skip them
            let Ok(ft) = entry.file_type() else { continue };
            if !ft.is_dir() {
                continue;
            }
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }
}

pub mod mock {
    //! In-memory `/proc` for tests.

    use super::ProcFs;
    use std::collections::{BTreeSet, HashMap};
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    #[derive(Debug, Default)]
    struct Inner {
        files: HashMap<PathBuf, Vec<u8>>,
        dirs: BTreeSet<PathBuf>,
    }

    /// Shared, mutable in-memory filesystem.
    ///
    /// Clones share storage, so a test can keep a handle and rewrite
    /// `/proc/stat` between scheduler ticks.
    #[derive(Debug, Default, Clone)]
    pub struct MockFs {
        inner: Arc<RwLock<Inner>>,
    }

    impl MockFs {
        pub fn new() -> Self {
            Self::default()
        }

        /// Adds (or replaces) a file; parent directories are created.
        pub fn add_file(&self, path: impl AsRef<Path>, content: impl Into<Vec<u8>>) {
            let path = path.as_ref().to_path_buf();
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let mut parent = path.parent();
            while let Some(p) = parent {
                if !p.as_os_str().is_empty() {
                    inner.dirs.insert(p.to_path_buf());
                }
                parent = p.parent();
            }
            inner.files.insert(path, content.into());
        }

        pub fn add_dir(&self, path: impl AsRef<Path>) {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            let mut cur = Some(path.as_ref());
            while let Some(p) = cur {
                if !p.as_os_str().is_empty() {
                    inner.dirs.insert(p.to_path_buf());
                }
                cur = p.parent();
            }
        }

        pub fn remove(&self, path: impl AsRef<Path>) {
            let path = path.as_ref();
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());
            inner.files.remove(path);
            inner.dirs.remove(path);
        }

        /// Adds `/proc/<pid>/cmdline` and `/proc/<pid>/statm` under `root`.
        ///
        /// `statm` of `None` leaves the file missing (process vanished).
        pub fn add_process(&self, root: &Path, pid: u32, cmdline: &[u8], statm: Option<&str>) {
            let base = root.join(pid.to_string());
            self.add_dir(&base);
            self.add_file(base.join("cmdline"), cmdline.to_vec());
            if let Some(statm) = statm {
                self.add_file(base.join("statm"), statm);
            }
        }

        pub fn set_cpu_line(&self, root: &Path, line: &str) {
            self.add_file(root.join("stat"), format!("{line}\ncpu0 0 0 0 0 0 0 0 0 0 0\n"));
        }

        pub fn set_meminfo(&self, root: &Path, total_kib: u64, free_kib: u64) {
            self.add_file(
                root.join("meminfo"),
                format!(
                    "MemTotal:       {total_kib} kB\nMemFree:        {free_kib} kB\nMemAvailable:   {free_kib} kB\n"
                ),
            );
        }
    }

    impl ProcFs for MockFs {
        fn read(&self, path: &Path) -> io::Result<Vec<u8>> {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            inner.files.get(path).cloned().ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{}: no such file", path.display()),
                )
            })
        }

        fn list_dir(&self, path: &Path) -> io::Result<Vec<String>> {
            let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
            if !inner.dirs.contains(path) {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{}: no such directory", path.display()),
                ));
            }
            Ok(inner
                .dirs
                .iter()
                .filter(|d| d.parent() == Some(path))
                .filter_map(|d| d.file_name().and_then(|n| n.to_str()).map(str::to_string))
                .collect())
        }
    }
}
