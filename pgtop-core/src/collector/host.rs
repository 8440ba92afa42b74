//! Host Collector (spec.md §4.2): one row per tick, no diffs — uptime,
//! load averages, hostname/OS, CPU count.

use std::path::Path;
use std::time::Instant;

use super::procfs::parser::parse_loadavg;
use super::procfs::FileSystem;
use super::{Align, Cell, ColumnSpec, HeaderPlacement, RefreshCadence, Status, Thresholds};
use crate::display::Displayer;
use crate::value::{Row, Value};

/// Raw load is compared against these thresholds directly (not normalized
/// per core) — see SPEC_FULL.md §9 Open Question decision.
const LOAD_THRESHOLDS: Thresholds = Thresholds::new(5.0, 20.0);

pub const COLUMNS: &[ColumnSpec] = &[];

pub struct HostCollector<F: FileSystem> {
    fs: F,
    proc_path: String,
    cadence: RefreshCadence,
    row: Option<Row>,
}

impl<F: FileSystem> HostCollector<F> {
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            cadence: RefreshCadence::new(1),
            row: None,
        }
    }

    fn read_loadavg(&self) -> Option<(f64, f64, f64)> {
        let path = format!("{}/loadavg", self.proc_path);
        let content = self.fs.read_to_string(Path::new(&path)).ok()?;
        let l = parse_loadavg(&content).ok()?;
        Some((l.load1, l.load5, l.load15))
    }

    fn read_uptime_secs(&self) -> Option<u64> {
        let path = format!("{}/uptime", self.proc_path);
        let content = self.fs.read_to_string(Path::new(&path)).ok()?;
        content
            .split_whitespace()
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .map(|f| f as u64)
    }

    fn read_hostname(&self) -> String {
        self.fs
            .read_to_string(Path::new("/proc/sys/kernel/hostname"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string())
    }

    /// OS name + release (spec.md §4.2's `uname()` field), read from
    /// `/proc/sys/kernel/{ostype,osrelease}` rather than calling `uname()`
    /// directly so `MockFs` can exercise this without a real kernel ABI call,
    /// matching the file's existing hostname-via-`/proc/sys` idiom.
    fn read_os(&self) -> String {
        let ostype = self
            .fs
            .read_to_string(Path::new("/proc/sys/kernel/ostype"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "Linux".to_string());
        let osrelease = self
            .fs
            .read_to_string(Path::new("/proc/sys/kernel/osrelease"))
            .map(|s| s.trim().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        format!("{ostype} {osrelease}")
    }

    fn read_ncpu(&self) -> usize {
        let path = format!("{}/stat", self.proc_path);
        self.fs
            .read_to_string(Path::new(&path))
            .map(|content| {
                content
                    .lines()
                    .filter(|l| l.starts_with("cpu") && l.as_bytes().get(3).is_some_and(u8::is_ascii_digit))
                    .count()
                    .max(1)
            })
            .unwrap_or(1)
    }
}

/// `"D days, HH:MM:SS"`, matching the teacher's `fmt.rs::format_duration`
/// shape generalized to include a day count.
pub fn format_uptime(total_secs: u64) -> String {
    let days = total_secs / 86_400;
    let rem = total_secs % 86_400;
    let hours = rem / 3_600;
    let minutes = (rem % 3_600) / 60;
    let seconds = rem % 60;
    if days > 0 {
        format!("{days} days, {hours:02}:{minutes:02}:{seconds:02}")
    } else {
        format!("{hours:02}:{minutes:02}:{seconds:02}")
    }
}

impl<F: FileSystem> super::Collector for HostCollector<F> {
    fn tick(&mut self) {
        self.cadence.tick();
    }

    fn needs_refresh(&self) -> bool {
        self.cadence.needs_refresh()
    }

    fn refresh(&mut self) {
        let _ = Instant::now();
        let Some((load1, load5, load15)) = self.read_loadavg() else {
            return;
        };
        let mut row = Row::new();
        row.insert("load1", Value::Float(load1));
        row.insert("load5", Value::Float(load5));
        row.insert("load15", Value::Float(load15));
        row.insert(
            "uptime",
            Value::Text(format_uptime(self.read_uptime_secs().unwrap_or(0))),
        );
        row.insert("hostname", Value::Text(self.read_hostname()));
        row.insert("os", Value::Text(self.read_os()));
        row.insert("ncpu", Value::Int(self.read_ncpu() as i64));
        self.row = Some(row);
        self.cadence.mark_refreshed();
    }

    fn diff(&mut self) {
        // Host row carries no diffs; nothing to do.
    }

    fn output(&self, sink: &mut dyn Displayer) {
        let Some(row) = &self.row else { return };
        let mut cells = Vec::new();
        for (key, status) in [
            ("load1", Status::Ok),
            ("load5", Status::Ok),
            ("load15", Status::Ok),
        ] {
            let v = row.get(key).cloned().unwrap_or(Value::Absent);
            let status = v
                .as_f64()
                .map(|f| LOAD_THRESHOLDS.status_of(f))
                .unwrap_or(status);
            cells.push(Cell {
                value: v.as_f64().map(|f| format!("{f:.2}")).unwrap_or_default(),
                header: Some(key),
                header_placement: HeaderPlacement::Inline,
                status,
            });
        }
        if let Some(Value::Text(uptime)) = row.get("uptime") {
            cells.push(Cell {
                value: uptime.clone(),
                header: Some("uptime"),
                header_placement: HeaderPlacement::Inline,
                status: Status::Ok,
            });
        }
        if let Some(Value::Text(hostname)) = row.get("hostname") {
            cells.push(Cell {
                value: hostname.clone(),
                header: Some("hostname"),
                header_placement: HeaderPlacement::Inline,
                status: Status::Ok,
            });
        }
        if let Some(Value::Text(os)) = row.get("os") {
            cells.push(Cell {
                value: os.clone(),
                header: Some("os"),
                header_placement: HeaderPlacement::Inline,
                status: Status::Ok,
            });
        }
        if let Some(Value::Int(ncpu)) = row.get("ncpu") {
            cells.push(Cell {
                value: ncpu.to_string(),
                header: Some("ncpu"),
                header_placement: HeaderPlacement::Inline,
                status: Status::Ok,
            });
        }
        sink.emit_panel("host", &cells, Align::Left);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::procfs::mock::MockFs;
    use crate::collector::Collector;

    #[test]
    fn uptime_formats_days() {
        assert_eq!(format_uptime(90_061), "1 days, 01:01:01");
        assert_eq!(format_uptime(3_661), "01:01:01");
    }

    #[test]
    fn refresh_reads_os_name_and_release() {
        let fs = MockFs::typical_system()
            .with_file("/proc/sys/kernel/ostype", "Linux\n")
            .with_file("/proc/sys/kernel/osrelease", "6.1.0-amd64\n");
        let mut collector = HostCollector::new(fs, "/proc");
        collector.tick();
        collector.refresh();
        assert_eq!(collector.row.as_ref().unwrap().get("os"), Some(&Value::Text("Linux 6.1.0-amd64".to_string())));
    }

    #[test]
    fn read_os_falls_back_when_proc_sys_missing() {
        let fs = MockFs::typical_system();
        let collector = HostCollector::new(fs, "/proc");
        assert_eq!(collector.read_os(), "Linux unknown");
    }

    #[test]
    fn load_thresholds() {
        assert_eq!(LOAD_THRESHOLDS.status_of(1.0), Status::Ok);
        assert_eq!(LOAD_THRESHOLDS.status_of(6.0), Status::Warning);
        assert_eq!(LOAD_THRESHOLDS.status_of(21.0), Status::Critical);
    }
}
