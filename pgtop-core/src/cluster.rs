//! `ClusterHandle` (spec.md §3's "cluster descriptor"): the main loop's
//! exclusive owner of one discovered cluster's connection, partition
//! collector, and PG process collector, bundled so `app.rs` can drive a
//! `Vec<ClusterHandle>` without knowing about any collector's internals.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::collector::partition::{resolve_device, PartitionCollector, PathRole, WatchedPath};
use crate::collector::pg_process::{PgProcessCollector, ReconnectSpec};
use crate::collector::procfs::FileSystem;
use crate::collector::Collector;
use crate::config::InstanceConfig;
use crate::display::Displayer;
use crate::resolver::{ClusterDescriptor, Endpoint};

/// WAL directory name changed from `pg_xlog` to `pg_wal` at Postgres 10,
/// per the GLOSSARY's "WAL / xlog" entry.
fn wal_subdir_name(server_version: f32) -> &'static str {
    if server_version >= 10.0 {
        "pg_wal"
    } else {
        "pg_xlog"
    }
}

/// One discovered, connected cluster plus the two per-cluster collectors
/// that join against it (spec.md §3: "exclusively owned by the main loop;
/// the PG process collector borrows its SQL connection for the
/// collector's lifetime").
pub struct ClusterHandle<F: FileSystem + Clone> {
    pub name: String,
    pub server_version: f32,
    pub work_dir: String,
    pub wal_dir: String,
    pub postmaster_pid: i32,
    pub partition: PartitionCollector,
    pub pg: PgProcessCollector<F>,
}

impl<F: FileSystem + Clone> ClusterHandle<F> {
    /// `instance_cfg` is this cluster's `[name]` section from the cluster
    /// config file, if any (spec.md §6): any key it sets overrides the
    /// value the resolver/CLI would otherwise supply, per config.rs's
    /// "absent keys fall back to CLI-supplied defaults" contract.
    pub fn new(
        fs: F,
        proc_path: impl Into<String>,
        descriptor: ClusterDescriptor,
        default_user: &str,
        default_dbname: &str,
        instance_cfg: Option<&InstanceConfig>,
        always_track: HashSet<i32>,
        sample_interval: Duration,
    ) -> Self {
        let proc_path = proc_path.into();
        let wal_dir = format!("{}/{}", descriptor.work_dir, wal_subdir_name(descriptor.server_version));
        let (discovered_host, discovered_port) = match &descriptor.endpoint {
            Endpoint::Unix { dir, port } => (dir.clone(), *port),
            Endpoint::Tcp { host, port } => (host.clone(), *port),
            Endpoint::Tcp6 { host, port } => (host.clone(), *port),
        };
        let reconnect = ReconnectSpec {
            host: instance_cfg.and_then(|c| c.host.clone()).unwrap_or(discovered_host),
            port: instance_cfg.and_then(|c| c.port).unwrap_or(discovered_port),
            user: instance_cfg
                .and_then(|c| c.user.clone())
                .unwrap_or_else(|| default_user.to_string()),
            dbname: instance_cfg
                .and_then(|c| c.dbname.clone())
                .unwrap_or_else(|| default_dbname.to_string()),
        };
        let pg = PgProcessCollector::new(
            fs,
            proc_path,
            descriptor.postmaster_pid,
            descriptor.server_version,
            reconnect,
            always_track,
        );
        Self {
            name: descriptor.name,
            server_version: descriptor.server_version,
            work_dir: descriptor.work_dir,
            wal_dir,
            postmaster_pid: descriptor.postmaster_pid,
            partition: PartitionCollector::new("/proc", sample_interval),
            pg,
        }
    }

    /// Watched-path descriptors for this cluster's data/WAL directories,
    /// handed to the disk sampler thread by `App` whenever cluster
    /// membership changes, per spec.md §4.5.
    pub fn watched_paths(&self) -> Vec<WatchedPath> {
        vec![
            WatchedPath {
                cluster: self.name.clone(),
                role: PathRole::Data,
                path: self.work_dir.clone().into(),
            },
            WatchedPath {
                cluster: self.name.clone(),
                role: PathRole::Xlog,
                path: self.wal_dir.clone().into(),
            },
        ]
    }

    /// Resolves the backing device for both watched paths, per spec.md
    /// §4.5. Reads `/proc/mounts` fresh since mounts rarely change but the
    /// cost of staying current is one file read per cluster per
    /// discovery pass.
    pub fn resolved_devices(&self) -> std::collections::HashMap<(String, PathRole), String> {
        let mut out = std::collections::HashMap::new();
        let Ok(mounts) = std::fs::read_to_string("/proc/mounts") else {
            return out;
        };
        let sys_block = Path::new("/sys/block");
        if let Some(dev) = resolve_device(Path::new(&self.work_dir), &mounts, sys_block) {
            out.insert((self.name.clone(), PathRole::Data), dev);
        }
        if let Some(dev) = resolve_device(Path::new(&self.wal_dir), &mounts, sys_block) {
            out.insert((self.name.clone(), PathRole::Xlog), dev);
        }
        out
    }

    pub fn tick(&mut self) {
        self.partition.tick();
        self.pg.tick();
    }

    pub fn refresh(&mut self) {
        if self.partition.needs_refresh() {
            self.partition.refresh();
        }
        if self.pg.needs_refresh() {
            self.pg.refresh();
        }
    }

    pub fn diff(&mut self) {
        self.partition.diff();
        self.pg.diff();
    }

    /// Prefix line shown above this cluster's partition rows, per spec.md
    /// §4.9 ("set each partition collector's prefix to the string its
    /// sibling pg collector produces") — here the caller passes the
    /// rendered prefix text straight to `output` instead of mutating
    /// collector state, since `Collector::output` takes `&self`.
    pub fn prefix(&self) -> String {
        if self.pg.is_connected() {
            format!("{} ({})\n", self.name, self.server_version)
        } else {
            format!("{} ({}) (offline)\n", self.name, self.server_version)
        }
    }

    pub fn output(&self, sink: &mut dyn Displayer) {
        sink.emit_prefix(&self.prefix());
        self.partition.output(sink);
        self.pg.output(sink);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wal_subdir_switches_at_version_10() {
        assert_eq!(wal_subdir_name(9.6), "pg_xlog");
        assert_eq!(wal_subdir_name(10.0), "pg_wal");
        assert_eq!(wal_subdir_name(14.2), "pg_wal");
    }
}
