//! System Collector (spec.md §4.3): one row, diffs turn cumulative tick
//! counters into percentages of the tick budget spent in each CPU state.

use std::path::Path;
use std::time::Instant;

use super::procfs::parser::{parse_proc_stat, CpuTicks};
use super::procfs::FileSystem;
use super::{Align, Cell, HeaderPlacement, RefreshCadence, Status, Thresholds, TwoSampleRing};
use crate::display::Displayer;
use crate::value::{Row, Value};

const STIME_THRESHOLDS: Thresholds = Thresholds::new(10.0, 30.0);
const IOWAIT_THRESHOLDS: Thresholds = Thresholds::new(20.0, 50.0);

pub struct SystemCollector<F: FileSystem> {
    fs: F,
    proc_path: String,
    cadence: RefreshCadence,
    ring: TwoSampleRing<(), CpuTicks>,
    ctxt_ring: TwoSampleRing<(), u64>,
    running: i64,
    blocked: i64,
    diff_row: Option<Row>,
}

impl<F: FileSystem> SystemCollector<F> {
    pub fn new(fs: F, proc_path: impl Into<String>) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            cadence: RefreshCadence::new(1),
            ring: TwoSampleRing::default(),
            ctxt_ring: TwoSampleRing::default(),
            running: 0,
            blocked: 0,
            diff_row: None,
        }
    }
}

impl<F: FileSystem> super::Collector for SystemCollector<F> {
    fn tick(&mut self) {
        self.cadence.tick();
    }

    fn needs_refresh(&self) -> bool {
        self.cadence.needs_refresh()
    }

    fn refresh(&mut self) {
        let path = format!("{}/stat", self.proc_path);
        let Ok(content) = self.fs.read_to_string(Path::new(&path)) else {
            return;
        };
        let Ok(stat) = parse_proc_stat(&content) else {
            return;
        };
        let now = Instant::now();
        self.ring.rotate((), stat.cpu, now);
        self.ctxt_ring.rotate((), stat.ctxt, now);
        self.running = stat.procs_running as i64;
        self.blocked = stat.procs_blocked as i64;
        self.cadence.mark_refreshed();
    }

    fn diff(&mut self) {
        let (Some((_, prev, _)), Some((_, cur, _))) = (&self.ring.previous, &self.ring.current)
        else {
            self.diff_row = None;
            return;
        };
        let dt = self.ring.dt().unwrap_or(0.0).max(0.001);

        let delta = |a: u64, b: u64| b.saturating_sub(a) as f64;
        let d_user = delta(prev.user, cur.user);
        let d_nice = delta(prev.nice, cur.nice);
        let d_system = delta(prev.system, cur.system);
        let d_idle = delta(prev.idle, cur.idle);
        let d_iowait = delta(prev.iowait, cur.iowait);
        let d_irq = delta(prev.irq, cur.irq);
        let d_softirq = delta(prev.softirq, cur.softirq);
        let d_steal = delta(prev.steal, cur.steal);
        let total = (d_user + d_nice + d_system + d_idle + d_iowait + d_irq + d_softirq + d_steal)
            .max(1.0);

        let pct = |d: f64| (d / total * 100.0 * 10.0).round() / 10.0;

        let mut row = Row::new();
        row.insert("user", Value::Float(pct(d_user)));
        row.insert("nice", Value::Float(pct(d_nice)));
        row.insert("system", Value::Float(pct(d_system)));
        row.insert("idle", Value::Float(pct(d_idle)));
        row.insert("iowait", Value::Float(pct(d_iowait)));
        row.insert("irq", Value::Float(pct(d_irq)));
        row.insert("softirq", Value::Float(pct(d_softirq)));
        row.insert("steal", Value::Float(pct(d_steal)));

        if let (Some((_, c0, _)), Some((_, c1, _))) = (&self.ctxt_ring.previous, &self.ctxt_ring.current) {
            row.insert("ctxt_per_sec", Value::Float(delta(*c0, *c1) / dt));
        }
        row.insert("procs_running", Value::Int(self.running));
        row.insert("procs_blocked", Value::Int(self.blocked));

        self.diff_row = Some(row);
    }

    fn output(&self, sink: &mut dyn Displayer) {
        let Some(row) = &self.diff_row else { return };
        let mut cells = Vec::new();
        for (key, thresholds) in [
            ("user", None),
            ("nice", None),
            ("system", Some(STIME_THRESHOLDS)),
            ("idle", None),
            ("iowait", Some(IOWAIT_THRESHOLDS)),
            ("irq", None),
            ("softirq", None),
            ("steal", None),
        ] {
            let v = row.get(key).and_then(Value::as_f64).unwrap_or(0.0);
            let status = thresholds
                .map(|t: Thresholds| t.status_of(v))
                .unwrap_or(Status::Ok);
            cells.push(Cell {
                value: format!("{v:.1}"),
                header: Some(key),
                header_placement: HeaderPlacement::Inline,
                status,
            });
        }
        let blocked = row.get("procs_blocked").and_then(Value::as_i64).unwrap_or(0);
        cells.push(Cell {
            value: blocked.to_string(),
            header: Some("blocked"),
            header_placement: HeaderPlacement::Inline,
            status: if blocked >= 1 { Status::Warning } else { Status::Ok },
        });
        sink.emit_panel("cpu", &cells, Align::Right);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::procfs::mock::MockFs;
    use crate::collector::Collector as _;

    #[test]
    fn cpu_percentages_sum_near_100() {
        let fs = MockFs::new().with_file(
            "/proc/stat",
            "cpu  100 0 0 900 0 0 0 0\nctxt 10\nbtime 1\nprocs_running 1\nprocs_blocked 0\n",
        );
        let mut c = SystemCollector::new(fs.clone(), "/proc");
        c.refresh();
        std::thread::sleep(std::time::Duration::from_millis(2));
        let fs2 = fs.with_file(
            "/proc/stat",
            "cpu  200 0 0 1800 0 0 0 0\nctxt 20\nbtime 1\nprocs_running 0\nprocs_blocked 0\n",
        );
        c.fs = fs2;
        c.refresh();
        c.diff();
        let row = c.diff_row.unwrap();
        let sum: f64 = ["user", "nice", "system", "idle", "iowait", "irq", "softirq", "steal"]
            .iter()
            .map(|k| row.get(*k).and_then(Value::as_f64).unwrap_or(0.0))
            .sum();
        assert!((sum - 100.0).abs() < 0.5);
    }
}
