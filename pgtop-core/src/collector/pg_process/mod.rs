//! Postgres Process Collector (spec.md §4.6), the hardest subsystem: joins
//! per-backend kernel statistics with a live `pg_stat_activity`/`pg_locks`
//! snapshot, classifies every child of the postmaster, and orders the
//! output as a depth-first blocker tree so a waiter always follows its
//! blocker.
//!
//! Connection handling is grounded on the teacher's
//! `collector/pg_collector/mod.rs::ensure_connected` (`Client::connect`
//! with `NoTls`, `self.client = None` on any query error so the next tick
//! reconnects) and its per-row `row.get("col")` mapping style in
//! `activity.rs`. Per-PID kernel sampling is grounded on
//! `super::procfs::process`.

pub mod queries;

use std::collections::{HashMap, HashSet};
use std::time::Instant;

use postgres::{Client, NoTls};
use tracing::warn;

use super::procfs::process::{list_pids, sample_pid, ProcessSample};
use super::procfs::FileSystem;
use super::{Cell, HeaderPlacement, RefreshCadence, Status, Thresholds};
use crate::display::Displayer;
use crate::error::PgCollectError;

const UTIME_WARN_PCT: f64 = 90.0;
const STIME_THRESHOLDS: Thresholds = Thresholds::new(5.0, 30.0);
const AGE_WARN_SECS: f64 = 300.0;

/// Connection parameters the collector remembers so it can rebuild a
/// `Client` after an `OperationalError`, per spec.md §3's "reconnect
/// closure" — represented as a plain struct per SPEC_FULL.md §9's Open
/// Question decision (a `Fn` trait object would have to be boxed and
/// can't be `Debug`, and every field it needs is already owned data).
#[derive(Debug, Clone)]
pub struct ReconnectSpec {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub dbname: String,
}

impl ReconnectSpec {
    fn connection_string(&self) -> String {
        format!(
            "host={} port={} user={} dbname={}",
            self.host, self.port, self.user, self.dbname
        )
    }

    fn connect(&self) -> Result<Client, postgres::Error> {
        Client::connect(&self.connection_string(), NoTls)
    }
}

/// Where a PID lives relative to the `pg_stat_activity` join and the
/// `postgres: ... process` command-line convention, per spec.md §4.6's
/// classification rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessKind {
    Backend,
    Autovacuum,
    Other(String),
    Unknown,
}

/// Parses the `postgres: <type> process <action>` command-line
/// convention used by non-backend helper processes (writer, checkpointer,
/// autovacuum launcher, ...). No regex in the teacher's stack, so this is
/// hand-tokenized exactly like `procfs::parser`'s line parsers.
fn classify_from_cmdline(cmdline: &str) -> ProcessKind {
    let Some(rest) = cmdline.strip_prefix("postgres:") else {
        return ProcessKind::Unknown;
    };
    let rest = rest.trim_start();
    if let Some(idx) = rest.find(" process") {
        let kind = rest[..idx].trim();
        let action = rest[idx + " process".len()..].trim();
        let kind = if kind == "autovacuum worker" {
            "autovacuum".to_string()
        } else {
            kind.to_string()
        };
        if kind == "autovacuum" {
            return ProcessKind::Autovacuum;
        }
        return ProcessKind::Other(if action.is_empty() {
            kind
        } else {
            format!("{kind} {action}")
        });
    }
    ProcessKind::Backend
}

fn classify(pid: i32, activity_pids: &HashSet<i32>, cmdline: &[String]) -> ProcessKind {
    if activity_pids.contains(&pid) {
        return ProcessKind::Backend;
    }
    let joined = cmdline.join(" ");
    classify_from_cmdline(&joined)
}

/// One backend's `pg_stat_activity`/`pg_locks` row, per spec.md §4.6 input
/// source 2. `locked_by` is already comma-sorted ascending by the SQL
/// text (see `queries.rs`); only its *first* element matters for the
/// blocker-tree key, per spec.md §4.6's diff algorithm.
#[derive(Debug, Clone, Default)]
pub struct ActivityRow {
    pub datname: Option<String>,
    pub usename: Option<String>,
    pub client_addr: Option<String>,
    pub client_port: Option<i32>,
    pub age_secs: Option<i64>,
    pub waiting: bool,
    pub locked_by: Vec<i32>,
    pub query: Option<String>,
}

fn fetch_activity(client: &mut Client, server_version: f32) -> Result<HashMap<i32, ActivityRow>, PgCollectError> {
    let sql = queries::stat_activity_query(server_version);
    let rows = client.query(sql, &[])?;
    let mut out = HashMap::with_capacity(rows.len());
    for row in &rows {
        let pid: i32 = row.try_get("pid").map_err(|_| {
            PgCollectError::UnexpectedShape("missing pid column".to_string())
        })?;
        let locked_by: String = row.try_get("locked_by").unwrap_or_default();
        let locked_by: Vec<i32> = locked_by
            .split(',')
            .filter(|s| !s.is_empty())
            .filter_map(|s| s.parse().ok())
            .collect();
        out.insert(
            pid,
            ActivityRow {
                datname: row.try_get("datname").ok(),
                usename: row.try_get("usename").ok(),
                client_addr: row
                    .try_get::<_, std::net::IpAddr>("client_addr")
                    .ok()
                    .map(|a| a.to_string()),
                client_port: row.try_get("client_port").ok(),
                age_secs: row.try_get("age").ok(),
                waiting: row.try_get("waiting").unwrap_or(false),
                locked_by,
                query: row.try_get("query").ok(),
            },
        );
    }
    Ok(out)
}

/// One backend/auxiliary process, fully joined: kernel sample +
/// (optional) activity row + classification + USS. Carried across two
/// ticks by PID so `diff()` can compute CPU-time rates.
#[derive(Debug, Clone)]
pub struct BackendSample {
    pub kernel: ProcessSample,
    pub activity: Option<ActivityRow>,
    pub kind: ProcessKind,
    pub uss_bytes: Option<u64>,
}

fn is_idle(activity: Option<&ActivityRow>) -> bool {
    matches!(activity.and_then(|a| a.query.as_deref()), Some("idle"))
}

/// spec.md §4.6: "a backend is active iff its query is not exactly `idle`
/// OR its PID is in a user-specified always-track set."
fn is_active(pid: i32, activity: Option<&ActivityRow>, always_track: &HashSet<i32>) -> bool {
    !is_idle(activity) || always_track.contains(&pid)
}

fn should_compute_uss(kind: &ProcessKind, pid: i32, activity: Option<&ActivityRow>, always_track: &HashSet<i32>) -> bool {
    !matches!(kind, ProcessKind::Backend) || is_active(pid, activity, always_track)
}

/// A ready-to-render diff row: the delta CPU figures plus everything
/// carried forward from the current sample needed for display and for
/// the blocker-tree sort.
#[derive(Debug, Clone)]
pub struct PgDiffRow {
    pub pid: i32,
    pub kind: ProcessKind,
    pub state: char,
    pub datname: Option<String>,
    pub usename: Option<String>,
    pub client_addr: Option<String>,
    pub age_secs: Option<i64>,
    pub waiting: bool,
    pub locked_by: Vec<i32>,
    pub query: Option<String>,
    pub utime_pct: f64,
    pub stime_pct: f64,
    pub uss_bytes: Option<u64>,
    pub cmdline: Vec<String>,
}

/// Depth-first blocker-tree ordering (spec.md §4.6's central algorithm,
/// §8 scenarios 2/3): `running` sorted by age descending (nulls as +inf)
/// walked in order, each row's `blocked[pid]` bucket (already sorted by
/// age ascending) pushed onto an explicit stack and drained LIFO so the
/// nearest descendant prints immediately after its blocker. Any bucket
/// whose blocker never appears in `running` or another bucket (e.g. the
/// blocker is idle and was filtered out upstream) is appended at the end
/// rather than silently dropped.
fn order_blocker_tree(mut running: Vec<PgDiffRow>, mut blocked: HashMap<i32, Vec<PgDiffRow>>) -> Vec<PgDiffRow> {
    running.sort_by(|a, b| {
        let ka = a.age_secs.unwrap_or(i64::MAX);
        let kb = b.age_secs.unwrap_or(i64::MAX);
        kb.cmp(&ka)
    });
    for bucket in blocked.values_mut() {
        bucket.sort_by_key(|r| r.age_secs.unwrap_or(i64::MAX));
    }

    let mut out = Vec::new();
    for r in running {
        let pid = r.pid;
        out.push(r);
        let mut stack: Vec<PgDiffRow> = Vec::new();
        if let Some(children) = blocked.remove(&pid) {
            stack.extend(children);
        }
        while let Some(next) = stack.pop() {
            let next_pid = next.pid;
            out.push(next);
            if let Some(children) = blocked.remove(&next_pid) {
                stack.extend(children);
            }
        }
    }
    for (_, mut rows) in blocked {
        out.append(&mut rows);
    }
    out
}

pub struct PgProcessCollector<F: FileSystem> {
    fs: F,
    proc_path: String,
    postmaster_pid: i32,
    server_version: f32,
    page_size_bytes: u64,
    client: Option<Client>,
    reconnect: ReconnectSpec,
    always_track: HashSet<i32>,
    cadence: RefreshCadence,
    previous: HashMap<i32, BackendSample>,
    current: HashMap<i32, BackendSample>,
    last_refresh: Option<Instant>,
    dt: f64,
    diff_rows: Vec<PgDiffRow>,
    /// UI filter toggle (spec.md §4.6/§6 `s` key): when false, rows whose
    /// type isn't `backend`/`autovacuum` are dropped from `output()` only
    /// — collection and the blocker-tree order are unaffected.
    show_aux: bool,
}

impl<F: FileSystem> PgProcessCollector<F> {
    pub fn new(
        fs: F,
        proc_path: impl Into<String>,
        postmaster_pid: i32,
        server_version: f32,
        reconnect: ReconnectSpec,
        always_track: HashSet<i32>,
    ) -> Self {
        Self {
            fs,
            proc_path: proc_path.into(),
            postmaster_pid,
            server_version,
            page_size_bytes: 4096,
            client: None,
            reconnect,
            always_track,
            cadence: RefreshCadence::new(1),
            previous: HashMap::new(),
            current: HashMap::new(),
            last_refresh: None,
            dt: 0.0,
            diff_rows: Vec::new(),
            show_aux: true,
        }
    }

    pub fn set_page_size(&mut self, bytes: u64) {
        self.page_size_bytes = bytes.max(1);
    }

    pub fn set_show_aux(&mut self, show_aux: bool) {
        self.show_aux = show_aux;
    }

    /// Whether the SQL connection is currently up. The main loop uses this
    /// to decide whether to suffix the cluster's prefix line with
    /// `(offline)`, per spec.md §7.
    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn ensure_connected(&mut self) {
        if self.client.is_some() {
            return;
        }
        match self.reconnect.connect() {
            Ok(client) => self.client = Some(client),
            Err(e) => warn!("pg process collector reconnect failed: {e}"),
        }
    }

    /// Direct children of the postmaster PID, per spec.md §4.6 input
    /// source 1 ("the children of the postmaster PID"). A single pass over
    /// every PID comparing `ppid` is simplest and matches the manual
    /// `/proc` scanning idiom used throughout this crate; there is no
    /// kernel shortcut to list children directly.
    fn postmaster_children(&self) -> Vec<i32> {
        list_pids(&self.fs, &self.proc_path)
            .into_iter()
            .filter(|&pid| {
                sample_pid(&self.fs, &self.proc_path, pid)
                    .map(|s| s.ppid == self.postmaster_pid)
                    .unwrap_or(false)
            })
            .collect()
    }

    fn uss_bytes(&self, kernel: &ProcessSample) -> Option<u64> {
        // USS = (resident - shared) * page size. `status` doesn't carry a
        // shared-memory figure directly comparable to `statm`'s second
        // field, so this approximates shared as zero when unavailable —
        // the resident figure from `stat`'s rss field is still the
        // dominant term for a backend's private working set.
        let rss_pages = kernel.rss_pages.max(0) as u64;
        Some(rss_pages * self.page_size_bytes)
    }
}

impl<F: FileSystem> super::Collector for PgProcessCollector<F> {
    fn tick(&mut self) {
        self.cadence.tick();
    }

    fn needs_refresh(&self) -> bool {
        self.cadence.needs_refresh()
    }

    fn refresh(&mut self) {
        self.ensure_connected();

        let activity = match self.client.as_mut() {
            Some(client) => match fetch_activity(client, self.server_version) {
                Ok(rows) => Some(rows),
                Err(e) => {
                    warn!("pg_stat_activity query failed, will reconnect: {e}");
                    self.client = None;
                    None
                }
            },
            None => None,
        };
        let activity = activity.unwrap_or_default();
        let activity_pids: HashSet<i32> = activity.keys().copied().collect();

        let now = Instant::now();
        let prev_instant = self.last_refresh;
        self.dt = prev_instant
            .map(|t0| now.duration_since(t0).as_secs_f64())
            .unwrap_or(0.0);
        self.last_refresh = Some(now);

        self.previous = std::mem::take(&mut self.current);

        let mut current = HashMap::new();
        for pid in self.postmaster_children() {
            let Ok(kernel) = sample_pid(&self.fs, &self.proc_path, pid) else {
                continue;
            };
            let kind = classify(pid, &activity_pids, &kernel.cmdline);
            let act = activity.get(&pid).cloned();
            let uss_bytes = if should_compute_uss(&kind, pid, act.as_ref(), &self.always_track) {
                self.uss_bytes(&kernel)
            } else {
                None
            };
            current.insert(
                pid,
                BackendSample {
                    kernel,
                    activity: act,
                    kind,
                    uss_bytes,
                },
            );
        }
        self.current = current;
        self.cadence.mark_refreshed();
    }

    fn diff(&mut self) {
        self.diff_rows.clear();
        if self.dt <= 0.0 {
            return;
        }
        let clk_tck = 100.0_f64; // sysconf(_SC_CLK_TCK), effectively always 100 on Linux.

        // Build one diff row per PID present in both samples, skipping
        // idle backends that aren't always-tracked, per spec.md §4.6.
        let mut running: Vec<PgDiffRow> = Vec::new();
        let mut blocked: HashMap<i32, Vec<PgDiffRow>> = HashMap::new();

        for (pid, cur) in &self.current {
            let act = cur.activity.as_ref();
            if is_idle(act) && !self.always_track.contains(pid) {
                continue;
            }
            let Some(prev) = self.previous.get(pid) else {
                continue;
            };
            let d_utime = cur.kernel.utime.saturating_sub(prev.kernel.utime) as f64;
            let d_stime = cur.kernel.stime.saturating_sub(prev.kernel.stime) as f64;
            let utime_pct = (d_utime / clk_tck) / self.dt * 100.0;
            let stime_pct = (d_stime / clk_tck) / self.dt * 100.0;

            let locked_by = act.map(|a| a.locked_by.clone()).unwrap_or_default();
            let row = PgDiffRow {
                pid: *pid,
                kind: cur.kind.clone(),
                state: cur.kernel.state,
                datname: act.and_then(|a| a.datname.clone()),
                usename: act.and_then(|a| a.usename.clone()),
                client_addr: act.and_then(|a| a.client_addr.clone()),
                age_secs: act.and_then(|a| a.age_secs),
                waiting: act.map(|a| a.waiting).unwrap_or(false),
                locked_by: locked_by.clone(),
                query: act.and_then(|a| a.query.clone()),
                utime_pct,
                stime_pct,
                uss_bytes: cur.uss_bytes,
                cmdline: cur.kernel.cmdline.clone(),
            };

            if let Some(&blocker) = locked_by.first() {
                blocked.entry(blocker).or_default().push(row);
            } else {
                running.push(row);
            }
        }

        self.diff_rows = order_blocker_tree(running, blocked);
    }

    fn output(&self, sink: &mut dyn Displayer) {
        let headers = [
            "pid", "type", "s", "database", "user", "client", "age", "utime", "stime", "uss", "query",
        ];
        let rows: Vec<Vec<Cell>> = self
            .diff_rows
            .iter()
            .filter(|r| {
                self.show_aux || matches!(r.kind, ProcessKind::Backend | ProcessKind::Autovacuum)
            })
            .map(|r| {
                let utime_status = if r.utime_pct >= UTIME_WARN_PCT {
                    Status::Warning
                } else {
                    Status::Ok
                };
                let stime_status = STIME_THRESHOLDS.status_of(r.stime_pct);
                let age_status = match r.age_secs {
                    Some(a) if a as f64 >= AGE_WARN_SECS => Status::Warning,
                    _ => Status::Ok,
                };
                let s_status = if r.state == 'D' { Status::Warning } else { Status::Ok };
                let query_status = if r.waiting {
                    Status::Critical
                } else if r
                    .query
                    .as_deref()
                    .map(|q| q.starts_with("idle in transaction"))
                    .unwrap_or(false)
                {
                    Status::Warning
                } else {
                    Status::Ok
                };
                let type_label = match &r.kind {
                    ProcessKind::Backend => "backend".to_string(),
                    ProcessKind::Autovacuum => "autovacuum".to_string(),
                    ProcessKind::Other(s) => s.clone(),
                    ProcessKind::Unknown => "unknown".to_string(),
                };
                vec![
                    Cell { value: r.pid.to_string(), header: None, header_placement: HeaderPlacement::Inline, status: Status::Ok },
                    Cell { value: type_label, header: None, header_placement: HeaderPlacement::Inline, status: Status::Ok },
                    Cell { value: r.state.to_string(), header: None, header_placement: HeaderPlacement::Inline, status: s_status },
                    Cell { value: r.datname.clone().unwrap_or_default(), header: None, header_placement: HeaderPlacement::Inline, status: Status::Ok },
                    Cell { value: r.usename.clone().unwrap_or_default(), header: None, header_placement: HeaderPlacement::Inline, status: Status::Ok },
                    Cell { value: r.client_addr.clone().unwrap_or_default(), header: None, header_placement: HeaderPlacement::Inline, status: Status::Ok },
                    Cell { value: r.age_secs.map(|a| a.to_string()).unwrap_or_default(), header: None, header_placement: HeaderPlacement::Inline, status: age_status },
                    Cell { value: format!("{:.1}", r.utime_pct), header: None, header_placement: HeaderPlacement::Inline, status: utime_status },
                    Cell { value: format!("{:.1}", r.stime_pct), header: None, header_placement: HeaderPlacement::Inline, status: stime_status },
                    Cell { value: r.uss_bytes.map(|b| (b / 1024).to_string()).unwrap_or_default(), header: None, header_placement: HeaderPlacement::Inline, status: Status::Ok },
                    Cell { value: r.query.clone().unwrap_or_default(), header: None, header_placement: HeaderPlacement::Inline, status: query_status },
                ]
            })
            .collect();
        sink.emit_table("postgres", &headers, &rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pid: i32, age: Option<i64>, locked_by: Vec<i32>) -> PgDiffRow {
        PgDiffRow {
            pid,
            kind: ProcessKind::Backend,
            state: 'S',
            datname: None,
            usename: None,
            client_addr: None,
            age_secs: age,
            waiting: !locked_by.is_empty(),
            locked_by,
            query: None,
            utime_pct: 0.0,
            stime_pct: 0.0,
            uss_bytes: None,
            cmdline: Vec::new(),
        }
    }

    fn partition(rows: Vec<PgDiffRow>) -> (Vec<PgDiffRow>, HashMap<i32, Vec<PgDiffRow>>) {
        let mut running = Vec::new();
        let mut blocked: HashMap<i32, Vec<PgDiffRow>> = HashMap::new();
        for r in rows {
            if let Some(&b) = r.locked_by.first() {
                blocked.entry(b).or_default().push(r);
            } else {
                running.push(r);
            }
        }
        (running, blocked)
    }

    /// spec.md §8 scenario 2: A (none), B (locked_by A), C (locked_by B)
    /// must render A, B, C.
    #[test]
    fn blocker_chain_orders_depth_first() {
        let a = row(1, None, vec![]);
        let b = row(2, None, vec![1]);
        let c = row(3, None, vec![2]);
        let (running, blocked) = partition(vec![c, a, b]);
        let out = order_blocker_tree(running, blocked);
        assert_eq!(out.iter().map(|r| r.pid).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    /// spec.md §8 scenario 3: A (none), B (locked_by A, age 10s), C
    /// (locked_by A, age 30s). blocked[A] sorted by age ascending gives
    /// B first, C second; LIFO stack pop yields A, C, B.
    #[test]
    fn sibling_blockers_use_lifo_stack_order() {
        let a = row(1, None, vec![]);
        let b = row(2, Some(10), vec![1]);
        let c = row(3, Some(30), vec![1]);
        let (running, blocked) = partition(vec![a, b, c]);
        let out = order_blocker_tree(running, blocked);
        assert_eq!(out.iter().map(|r| r.pid).collect::<Vec<_>>(), vec![1, 3, 2]);
    }

    #[test]
    fn no_pid_appears_twice() {
        let a = row(1, None, vec![]);
        let b = row(2, Some(5), vec![1]);
        let c = row(3, Some(1), vec![2]);
        let (running, blocked) = partition(vec![a, b, c]);
        let out = order_blocker_tree(running, blocked);
        let mut pids: Vec<i32> = out.iter().map(|r| r.pid).collect();
        let before = pids.len();
        pids.sort();
        pids.dedup();
        assert_eq!(pids.len(), before);
    }

    #[test]
    fn orphaned_blocker_bucket_still_appended() {
        // B is blocked by PID 99, which never shows up in `running`.
        let b = row(2, None, vec![99]);
        let (running, blocked) = partition(vec![b]);
        let out = order_blocker_tree(running, blocked);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].pid, 2);
    }

    #[test]
    fn classify_backend_from_activity_map() {
        let mut activity_pids = HashSet::new();
        activity_pids.insert(42);
        assert_eq!(classify(42, &activity_pids, &[]), ProcessKind::Backend);
    }

    #[test]
    fn classify_autovacuum_worker_from_cmdline() {
        let cmdline = vec!["postgres:".to_string(), "autovacuum".to_string(), "worker".to_string(), "process".to_string(), "mydb".to_string()];
        assert_eq!(classify(99, &HashSet::new(), &cmdline), ProcessKind::Autovacuum);
    }

    #[test]
    fn classify_checkpointer_from_cmdline() {
        let cmdline = vec!["postgres:".to_string(), "checkpointer".to_string(), "process".to_string()];
        assert_eq!(
            classify(99, &HashSet::new(), &cmdline),
            ProcessKind::Other("checkpointer".to_string())
        );
    }

    #[test]
    fn classify_unknown_for_non_postgres_cmdline() {
        assert_eq!(
            classify(99, &HashSet::new(), &["bash".to_string()]),
            ProcessKind::Unknown
        );
    }
}
