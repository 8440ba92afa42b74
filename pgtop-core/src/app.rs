//! Main Loop (spec.md §4.9): per-tick collector orchestration and the
//! single-writer global UI flag state.
//!
//! Grounded on the flat teacher package's `AppState` struct shape
//! (`src/tui/state/mod.rs`) for the single-struct-of-flags convention and
//! `src/tui/app.rs`'s tick-driven refresh loop for the orchestration order.

use std::collections::HashMap;
use std::time::Duration;

use crate::cluster::ClusterHandle;
use crate::collector::host::HostCollector;
use crate::collector::memory::MemoryCollector;
use crate::collector::partition::{PathRole, WatchedPath};
use crate::collector::procfs::FileSystem;
use crate::collector::system::SystemCollector;
use crate::collector::Collector;
use crate::display::Displayer;

/// Global UI flags (spec.md §5/§6): single-writer from the key handler,
/// read by the main loop and the displayer within one tick — no locking
/// required since both reader and writer run on the same thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UiFlags {
    pub freeze: bool,
    pub filter_aux: bool,
    pub display_units: bool,
    pub autohide_fields: bool,
    pub notrim: bool,
    pub realtime: bool,
}

impl Default for UiFlags {
    fn default() -> Self {
        Self {
            freeze: false,
            filter_aux: false,
            display_units: true,
            autohide_fields: true,
            notrim: false,
            realtime: false,
        }
    }
}

impl UiFlags {
    /// Applies one keyboard toggle (spec.md §6: `s f u a t r`), returning
    /// whether the key was recognized as a flag toggle. `q`/quit is
    /// handled by the caller, not here, since it isn't a flag.
    pub fn toggle(&mut self, key: char) -> bool {
        match key {
            's' => self.filter_aux = !self.filter_aux,
            'f' => self.freeze = !self.freeze,
            'u' => self.display_units = !self.display_units,
            'a' => self.autohide_fields = !self.autohide_fields,
            't' => self.notrim = !self.notrim,
            'r' => self.realtime = !self.realtime,
            _ => return false,
        }
        true
    }
}

/// Owns every collector for one run: the three host-wide singletons plus
/// one `ClusterHandle` per discovered cluster, and the UI flags the key
/// handler mutates. `F` is the `FileSystem` implementation threaded
/// through every `/proc`-reading collector (always `RealFs` outside
/// tests).
pub struct App<F: FileSystem + Clone> {
    pub host: HostCollector<F>,
    pub system: SystemCollector<F>,
    pub memory: MemoryCollector<F>,
    pub clusters: Vec<ClusterHandle<F>>,
    pub flags: UiFlags,
    pub tick_len: Duration,
    pub should_quit: bool,
}

impl<F: FileSystem + Clone> App<F> {
    pub fn new(
        fs: F,
        proc_path: impl Into<String>,
        clusters: Vec<ClusterHandle<F>>,
        tick_len: Duration,
    ) -> Self {
        let proc_path = proc_path.into();
        let mut app = Self {
            host: HostCollector::new(fs.clone(), proc_path.clone()),
            system: SystemCollector::new(fs.clone(), proc_path.clone()),
            memory: MemoryCollector::new(fs, proc_path),
            clusters,
            flags: UiFlags::default(),
            tick_len,
            should_quit: false,
        };
        app.refresh_disk_watch_list();
        app
    }

    /// Pushes the current cluster set's watched data/WAL paths (and their
    /// resolved backing devices) down to each cluster's disk sampler
    /// thread. Called on construction and whenever cluster membership
    /// changes (spec.md §4.9 step 4's "cluster set can change as clusters
    /// are discovered/lost between ticks").
    pub fn refresh_disk_watch_list(&mut self) {
        for cluster in &mut self.clusters {
            let watched: Vec<WatchedPath> = cluster.watched_paths();
            let devices: HashMap<(String, PathRole), String> = cluster.resolved_devices();
            cluster.partition.set_watched(watched, devices);
        }
    }

    /// One full tick (spec.md §4.9 steps 1-2 and part of 4; key polling
    /// and sleeping are left to the caller since they differ per `-o`
    /// mode). `tick`/`refresh`/`diff` always run in the declared order:
    /// host, system, memory, then per cluster partition before pg.
    pub fn run_tick(&mut self) {
        self.host.tick();
        if !self.flags.freeze && self.host.needs_refresh() {
            self.host.refresh();
        }
        self.host.diff();

        self.system.tick();
        if !self.flags.freeze && self.system.needs_refresh() {
            self.system.refresh();
        }
        self.system.diff();

        self.memory.tick();
        if !self.flags.freeze && self.memory.needs_refresh() {
            self.memory.refresh();
        }
        self.memory.diff();

        for cluster in &mut self.clusters {
            cluster.tick();
            if !self.flags.freeze {
                cluster.refresh();
            }
            cluster.diff();
            cluster.pg.set_show_aux(!self.flags.filter_aux);
        }
    }

    /// Renders every collector's current diff rows through `sink`, per
    /// spec.md §4.9 step 4, in the same declared order as `run_tick`.
    pub fn output(&self, sink: &mut dyn Displayer) {
        self.host.output(sink);
        self.system.output(sink);
        self.memory.output(sink);
        for cluster in &self.clusters {
            cluster.output(sink);
        }
    }

    /// Dispatches one keyboard event (spec.md §6). `q` sets `should_quit`;
    /// every other recognized key toggles a `UiFlags` field.
    pub fn handle_key(&mut self, key: char) {
        if key == 'q' {
            self.should_quit = true;
            return;
        }
        self.flags.toggle(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggle_flips_named_flag_only() {
        let mut flags = UiFlags::default();
        let before_freeze = flags.freeze;
        assert!(flags.toggle('f'));
        assert_eq!(flags.freeze, !before_freeze);
        assert_eq!(flags.display_units, UiFlags::default().display_units);
    }

    #[test]
    fn toggle_rejects_unknown_key() {
        let mut flags = UiFlags::default();
        assert!(!flags.toggle('x'));
    }
}
