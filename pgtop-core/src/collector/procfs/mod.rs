//! `/proc`-backed primitives: the `FileSystem` abstraction that lets every
//! collector in this crate be exercised against a fixture instead of a
//! real kernel, plus the line-oriented parsers shared by the host, system,
//! memory and process collectors.
//!
//! Grounded on the teacher's `collector/traits.rs` (`FileSystem` trait) and
//! `collector/mock/mod.rs` (`MockFs`); the trait shape here is unchanged,
//! only the concrete collectors built on top of it differ.

pub mod mock;
pub mod parser;
pub mod process;

use std::io;
use std::path::Path;

/// Filesystem access abstraction. `RealFs` reads the live kernel; `MockFs`
/// (test-only) serves fixed content so collector logic can be unit tested
/// without root or a particular kernel version.
pub trait FileSystem {
    fn read_to_string(&self, path: &Path) -> io::Result<String>;
    fn read_dir_names(&self, path: &Path) -> io::Result<Vec<String>>;
    fn symlink_target(&self, path: &Path) -> io::Result<String>;
    fn metadata_dev(&self, path: &Path) -> io::Result<u64>;
}

/// Reads straight through to the real filesystem, usually rooted at `/proc`
/// but reusable for `/sys` and `/etc/passwd` reads as well.
#[derive(Debug, Clone, Default)]
pub struct RealFs;

impl RealFs {
    pub fn new() -> Self {
        Self
    }
}

impl FileSystem for RealFs {
    fn read_to_string(&self, path: &Path) -> io::Result<String> {
        std::fs::read_to_string(path)
    }

    fn read_dir_names(&self, path: &Path) -> io::Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(path)? {
            let entry = entry?;
            if let Some(name) = entry.file_name().to_str() {
                names.push(name.to_string());
            }
        }
        Ok(names)
    }

    fn symlink_target(&self, path: &Path) -> io::Result<String> {
        std::fs::read_link(path).map(|p| p.to_string_lossy().into_owned())
    }

    fn metadata_dev(&self, path: &Path) -> io::Result<u64> {
        use std::os::unix::fs::MetadataExt;
        Ok(std::fs::metadata(path)?.dev())
    }
}
