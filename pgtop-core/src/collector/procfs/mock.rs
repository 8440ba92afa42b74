//! In-memory `FileSystem` fixture for unit tests.
//!
//! Grounded on the teacher's `collector/mock/mod.rs` / `mock/filesystem.rs`
//! (`MockFs::typical_system()`-style canned fixtures).

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

use super::FileSystem;

#[derive(Debug, Clone, Default)]
pub struct MockFs {
    files: HashMap<PathBuf, String>,
    dirs: HashMap<PathBuf, Vec<String>>,
    symlinks: HashMap<PathBuf, String>,
    devs: HashMap<PathBuf, u64>,
}

impl MockFs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_file(mut self, path: impl Into<PathBuf>, content: impl Into<String>) -> Self {
        self.files.insert(path.into(), content.into());
        self
    }

    pub fn with_dir(mut self, path: impl Into<PathBuf>, names: Vec<&str>) -> Self {
        self.dirs
            .insert(path.into(), names.into_iter().map(String::from).collect());
        self
    }

    pub fn with_symlink(mut self, path: impl Into<PathBuf>, target: impl Into<String>) -> Self {
        self.symlinks.insert(path.into(), target.into());
        self
    }

    pub fn with_dev(mut self, path: impl Into<PathBuf>, dev: u64) -> Self {
        self.devs.insert(path.into(), dev);
        self
    }

    /// A minimal fixture covering one backend process and one host, enough
    /// to exercise the full collector pipeline end to end in tests.
    pub fn typical_system() -> Self {
        Self::new()
            .with_dir("/proc", vec!["1234", "stat", "meminfo", "loadavg", "diskstats", "mounts"])
            .with_file(
                "/proc/stat",
                "cpu  100 10 50 800 20 0 5 0 0 0\ncpu0 100 10 50 800 20 0 5 0 0 0\nctxt 50000\nbtime 1700000000\nprocesses 120\nprocs_running 1\nprocs_blocked 0\n",
            )
            .with_file(
                "/proc/meminfo",
                "MemTotal:       16384000 kB\nMemFree:         2048000 kB\nBuffers:          100000 kB\nCached:          400000 kB\nDirty:              2000 kB\nCommitLimit:    20000000 kB\nCommitted_AS:    8000000 kB\n",
            )
            .with_file("/proc/loadavg", "0.50 0.40 0.30 1/200 5678\n")
            .with_dir(
                "/proc/1234",
                vec!["stat", "status", "io", "cmdline", "comm"],
            )
            .with_file(
                "/proc/1234/stat",
                "1234 (postgres) S 1 1234 1234 0 -1 4194560 100 0 0 0 10 5 0 0 20 0 1 0 500 102400 256 18446744073709551615 1 1 0 0 0 0 0 0 0 0 0 0 17 0 0 0 0 0 0\n",
            )
            .with_file(
                "/proc/1234/status",
                "Name:\tpostgres\nUid:\t1000\t1000\t1000\t1000\nVmRSS:\t  4096 kB\nState:\tS (sleeping)\n",
            )
            .with_file(
                "/proc/1234/io",
                "rchar: 1000\nwchar: 2000\nsyscr: 10\nsyscw: 20\nread_bytes: 4096\nwrite_bytes: 8192\ncancelled_write_bytes: 0\n",
            )
            .with_file("/proc/1234/cmdline", "postgres\0-D\0/var/lib/pgsql/data\0")
            .with_file("/proc/1234/comm", "postgres\n")
    }
}

impl FileSystem for MockFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        self.files
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn read_dir_names(&self, path: &Path) -> io::Result<Vec<String>> {
        self.dirs
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn symlink_target(&self, path: &Path) -> io::Result<String> {
        self.symlinks
            .get(path)
            .cloned()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }

    fn metadata_dev(&self, path: &Path) -> io::Result<u64> {
        self.devs
            .get(path)
            .copied()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, path.display().to_string()))
    }
}
