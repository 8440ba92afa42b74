//! Collector framework: the declarative column model, the two-sample diff
//! ring and the `Collector` trait every concrete collector implements.
//!
//! Grounded on `Collector`/`CollectorTiming` in the teacher's
//! `collector/collector.rs` (per-phase orchestration) generalized from a
//! single monolithic `collect_snapshot` into one `Collector` impl per
//! entity, each independently tickable.

pub mod host;
pub mod memory;
pub mod partition;
pub mod pg_process;
pub mod procfs;
pub mod system;

use std::time::{Duration, Instant};

use crate::value::{Row, Value};

/// Cell alignment in the rendered table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Align {
    Left,
    Right,
}

/// Where a column's header is drawn relative to its cells, matching the
/// teacher's `tui/render.rs` convention of inline vs. stacked headers for
/// narrow numeric columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderPlacement {
    Inline,
    Stacked,
}

/// Severity used to colorize a cell and to decide whether `hide_if_ok`
/// columns should be shown this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Status {
    Ok,
    Warning,
    Critical,
}

/// A pair of thresholds evaluated against a numeric value: `>= critical`
/// wins over `>= warning` wins over `Ok`. Some metrics invert the sense
/// (lower is worse); those provide their own `status_fn` instead.
#[derive(Debug, Clone, Copy)]
pub struct Thresholds {
    pub warning: f64,
    pub critical: f64,
}

impl Thresholds {
    pub const fn new(warning: f64, critical: f64) -> Self {
        Self { warning, critical }
    }

    pub fn status_of(&self, v: f64) -> Status {
        if v >= self.critical {
            Status::Critical
        } else if v >= self.warning {
            Status::Warning
        } else {
            Status::Ok
        }
    }
}

/// How a column's diff row is derived from the previous/current raw rows.
/// The default for a numeric field is `Rate`; `CarryForward` is used for
/// values that are already a point-in-time measure (counts, percentages
/// computed some other way); `Custom` covers the handful of fields with a
/// bespoke diff formula (CPU bucket percentages, disk fill rate).
#[derive(Clone, Copy)]
pub enum DiffRule {
    CarryForward,
    Rate,
    Custom(fn(prev: &Value, cur: &Value, dt: f64) -> Value),
}

/// Declarative description of one output column, combining the "what to
/// diff" and "how to render" concerns the way the teacher's display code
/// keeps them colocated per field rather than in two parallel tables.
pub struct ColumnSpec {
    pub out: &'static str,
    pub input: &'static str,
    pub diff: DiffRule,
    pub transform: Option<fn(&Value) -> Value>,
    pub round: Option<u32>,
    pub unit: Option<&'static str>,
    pub min_width: u16,
    pub position: i16,
    pub align: Align,
    pub header: HeaderPlacement,
    pub no_autohide: bool,
    pub hide_if_ok: bool,
    pub maxw: Option<u16>,
    pub thresholds: Option<Thresholds>,
    pub status_fn: Option<fn(&Value) -> Status>,
    pub highlight: bool,
}

impl ColumnSpec {
    pub const fn new(out: &'static str, input: &'static str) -> Self {
        Self {
            out,
            input,
            diff: DiffRule::CarryForward,
            transform: None,
            round: None,
            unit: None,
            min_width: 4,
            position: 0,
            align: Align::Right,
            header: HeaderPlacement::Inline,
            no_autohide: false,
            hide_if_ok: false,
            maxw: None,
            thresholds: None,
            status_fn: None,
            highlight: false,
        }
    }

    pub fn status_of(&self, v: &Value) -> Status {
        if let Some(f) = self.status_fn {
            return f(v);
        }
        match (self.thresholds, v.as_f64()) {
            (Some(t), Some(n)) => t.status_of(n),
            _ => Status::Ok,
        }
    }
}

/// A rendered cell: the formatted string plus enough metadata for the
/// display layer to colorize and lay it out without re-touching the
/// originating `Value`.
#[derive(Debug, Clone)]
pub struct Cell {
    pub value: String,
    pub header: Option<&'static str>,
    pub header_placement: HeaderPlacement,
    pub status: Status,
}

impl Cell {
    /// Display width, matching spec.md's rule: the longer of the formatted
    /// value and its header when the header is drawn inline.
    pub fn display_len(&self) -> usize {
        let header_len = match self.header_placement {
            HeaderPlacement::Inline => self.header.map(str::len).unwrap_or(0),
            HeaderPlacement::Stacked => 0,
        };
        self.value.chars().count().max(header_len)
    }
}

/// Holds the previous and current raw sample for one entity together with
/// the wall-clock delta between them, matching spec.md's "two-sample ring"
/// — not a full history, just enough to compute one generation of diffs.
pub struct TwoSampleRing<K, T> {
    pub previous: Option<(K, T, Instant)>,
    pub current: Option<(K, T, Instant)>,
}

impl<K, T> Default for TwoSampleRing<K, T> {
    fn default() -> Self {
        Self {
            previous: None,
            current: None,
        }
    }
}

impl<K, T> TwoSampleRing<K, T> {
    pub fn rotate(&mut self, key: K, sample: T, at: Instant) {
        self.previous = self.current.take();
        self.current = Some((key, sample, at));
    }

    /// Wall-clock seconds between the previous and current sample, or
    /// `None` if there is no previous sample yet (first tick).
    pub fn dt(&self) -> Option<f64> {
        match (&self.previous, &self.current) {
            (Some((_, _, t0)), Some((_, _, t1))) => Some(t1.duration_since(*t0).as_secs_f64()),
            _ => None,
        }
    }
}

/// Behavior every concrete collector implements. `tick`/`refresh`/`diff`/
/// `output` are kept as separate steps (rather than one `collect()` call)
/// so the main loop can interleave refresh cadences that differ per
/// collector, matching spec.md §4.1's `ticks_per_refresh` knob.
pub trait Collector {
    /// Called once per main-loop tick regardless of refresh cadence.
    fn tick(&mut self);

    /// Whether this tick should pull a fresh raw sample.
    fn needs_refresh(&self) -> bool;

    /// Pulls a fresh raw sample and rotates the two-sample ring.
    fn refresh(&mut self);

    /// Recomputes the diff row(s) from the current ring state.
    fn diff(&mut self);

    /// Renders the current diff row(s) into the given sink.
    fn output(&self, sink: &mut dyn crate::display::Displayer);
}

/// Shared refresh-cadence bookkeeping, grounded on spec.md §4.1's
/// `ticks_per_refresh` parameter.
pub struct RefreshCadence {
    ticks_per_refresh: u32,
    ticks_since_refresh: u32,
}

impl RefreshCadence {
    pub fn new(ticks_per_refresh: u32) -> Self {
        Self {
            ticks_per_refresh: ticks_per_refresh.max(1),
            ticks_since_refresh: u32::MAX, // force refresh on first check
        }
    }

    pub fn tick(&mut self) {
        self.ticks_since_refresh = self.ticks_since_refresh.saturating_add(1);
    }

    pub fn needs_refresh(&self) -> bool {
        self.ticks_since_refresh >= self.ticks_per_refresh
    }

    pub fn mark_refreshed(&mut self) {
        self.ticks_since_refresh = 0;
    }
}

pub const MIN_DT: Duration = Duration::from_millis(1);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn thresholds_order() {
        let t = Thresholds::new(10.0, 30.0);
        assert_eq!(t.status_of(0.0), Status::Ok);
        assert_eq!(t.status_of(10.0), Status::Warning);
        assert_eq!(t.status_of(30.0), Status::Critical);
    }

    #[test]
    fn cadence_forces_refresh_on_first_check() {
        let c = RefreshCadence::new(5);
        assert!(c.needs_refresh());
    }

    #[test]
    fn cadence_respects_period() {
        let mut c = RefreshCadence::new(3);
        c.mark_refreshed();
        c.tick();
        c.tick();
        assert!(!c.needs_refresh());
        c.tick();
        assert!(c.needs_refresh());
    }

    #[test]
    fn two_sample_ring_rotates() {
        let mut ring: TwoSampleRing<(), i32> = TwoSampleRing::default();
        let t0 = Instant::now();
        ring.rotate((), 1, t0);
        assert!(ring.previous.is_none());
        ring.rotate((), 2, t0 + Duration::from_secs(1));
        assert!(ring.previous.is_some());
        assert_eq!(ring.current.as_ref().unwrap().1, 2);
    }
}
