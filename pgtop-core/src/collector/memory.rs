//! Memory Collector (spec.md §4.4): one row, no diffs.

use std::path::Path;

use super::procfs::parser::parse_meminfo;
use super::procfs::FileSystem;
use super::{Align, Cell, HeaderPlacement, RefreshCadence, Status};
use crate::display::Displayer;
use crate::value::{Row, Value};

pub struct MemoryCollector<F: FileSystem> {
    fs: F,
    proc_path: String,
    cadence: RefreshCadence,
    row: Option<Row>,
}

impl<F: FileSystem> MemoryCollector<F> {
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            cadence: RefreshCadence::new(1),
            row: None,
        }
    }
}

/// Picks the largest of {TB, GB, MB} with value >= 1, else "N KB", rounded
/// to one decimal — generalizes the teacher's `fmt.rs::format_kb` two-tier
/// picker to three tiers per SPEC_FULL.md §4.4.
pub fn format_kb(kb: u64) -> String {
    const KB_PER_MB: f64 = 1_024.0;
    const KB_PER_GB: f64 = KB_PER_MB * 1_024.0;
    const KB_PER_TB: f64 = KB_PER_GB * 1_024.0;
    let kb = kb as f64;
    if kb / KB_PER_TB >= 1.0 {
        format!("{:.1} TB", kb / KB_PER_TB)
    } else if kb / KB_PER_GB >= 1.0 {
        format!("{:.1} GB", kb / KB_PER_GB)
    } else if kb / KB_PER_MB >= 1.0 {
        format!("{:.1} MB", kb / KB_PER_MB)
    } else {
        format!("{kb:.0} KB")
    }
}

impl<F: FileSystem> super::Collector for MemoryCollector<F> {
    fn tick(&mut self) {
        self.cadence.tick();
    }

    fn needs_refresh(&self) -> bool {
        self.cadence.needs_refresh()
    }

    fn refresh(&mut self) {
        let path = format!("{}/meminfo", self.proc_path);
        let Ok(content) = self.fs.read_to_string(Path::new(&path)) else {
            return;
        };
        let m = parse_meminfo(&content);
        let mut row = Row::new();
        let total = m.get("MemTotal").copied().unwrap_or(0);
        let free = m.get("MemFree").copied().unwrap_or(0);
        let cached = m.get("Cached").copied().unwrap_or(0);
        let dirty = m.get("Dirty").copied().unwrap_or(0);
        row.insert("mem_total", Value::Int(total as i64));
        row.insert("mem_free", Value::Int(free as i64));
        row.insert("cached", Value::Int(cached as i64));
        row.insert("dirty", Value::Int(dirty as i64));
        if let Some(buffers) = m.get("Buffers") {
            row.insert("buffers", Value::Int(*buffers as i64));
        }
        if let (Some(limit), Some(committed)) = (m.get("CommitLimit"), m.get("Committed_AS")) {
            row.insert("commit_limit", Value::Int(*limit as i64));
            row.insert("committed_as", Value::Int(*committed as i64));
            row.insert(
                "commit_left",
                Value::Int(limit.saturating_sub(*committed) as i64),
            );
        }
        self.row = Some(row);
        self.cadence.mark_refreshed();
    }

    fn diff(&mut self) {}

    fn output(&self, sink: &mut dyn Displayer) {
        let Some(row) = &self.row else { return };
        let mut cells = Vec::new();
        for key in ["mem_total", "mem_free", "cached", "dirty"] {
            if let Some(kb) = row.get(key).and_then(Value::as_i64) {
                cells.push(Cell {
                    value: format_kb(kb.max(0) as u64),
                    header: Some(key),
                    header_placement: HeaderPlacement::Inline,
                    status: Status::Ok,
                });
            }
        }
        if let Some(left) = row.get("commit_left").and_then(Value::as_i64) {
            cells.push(Cell {
                value: format_kb(left.max(0) as u64),
                header: Some("commit_left"),
                header_placement: HeaderPlacement::Inline,
                status: if left < 0 { Status::Critical } else { Status::Ok },
            });
        }
        sink.emit_panel("memory", &cells, Align::Left);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_kb_picks_largest_tier() {
        assert_eq!(format_kb(512), "512 KB");
        assert_eq!(format_kb(2 * 1024), "2.0 MB");
        assert_eq!(format_kb(3 * 1024 * 1024), "3.0 GB");
        assert_eq!(format_kb(5 * 1024 * 1024 * 1024), "5.0 TB");
    }
}
