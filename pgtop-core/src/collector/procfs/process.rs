//! Per-process kernel sampling for the Postgres Process Collector
//! (spec.md §4.6 input source 3): `/proc/[pid]/{stat,status,io,cmdline}`
//! plus the `cwd` symlink used by the cluster resolver (spec.md §4.7).
//!
//! Builds on `super::parser::parse_proc_pid_stat` for the numeric fields
//! and adds the two fields that parser only stubs (priority, vsize, rss,
//! delayacct_blkio_ticks, guest_time), plus `/proc/[pid]/io` and
//! `/proc/[pid]/cmdline`, matching the teacher's one-struct-per-file idiom
//! in `collector/procfs/process.rs`.

use std::path::Path;

use super::{FileSystem, parser::{parse_proc_pid_io, ProcPidIo}};
use crate::error::CollectError;

/// Everything the PG process collector samples for one PID each tick.
#[derive(Debug, Clone, Default)]
pub struct ProcessSample {
    pub pid: i32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
    pub utime: u64,
    pub stime: u64,
    pub priority: i64,
    pub starttime: u64,
    pub vsize: u64,
    pub rss_pages: i64,
    pub delayacct_blkio_ticks: u64,
    pub guest_time: u64,
    pub io: ProcPidIo,
    pub cmdline: Vec<String>,
}

/// Full `/proc/[pid]/stat` tokenization: unlike
/// `parser::parse_proc_pid_stat` (which only extracts the fields the
/// system-wide view needs), this reads every field the process collector
/// joins against `pg_stat_activity`.
fn parse_full_stat(content: &str) -> Result<ProcessSample, CollectError> {
    let open = content
        .find('(')
        .ok_or_else(|| CollectError::Parse("no '(' in /proc/[pid]/stat".into()))?;
    let close = content
        .rfind(')')
        .ok_or_else(|| CollectError::Parse("no ')' in /proc/[pid]/stat".into()))?;
    if close <= open {
        return Err(CollectError::Parse("malformed comm field".into()));
    }
    let pid: i32 = content[..open]
        .trim()
        .parse()
        .map_err(|_| CollectError::Parse("bad pid field".into()))?;
    let comm = content[open + 1..close].to_string();
    let rest: Vec<&str> = content[close + 1..].split_whitespace().collect();
    // Fields after `)`, 0-indexed: 0=state 1=ppid ... 11=utime 12=stime
    // 15=priority 19=starttime 20=vsize 21=rss(pages) 41=guest_time
    // 41 is only present on kernels >= 2.6.24; absent -> 0.
    let get_u64 = |i: usize| rest.get(i).and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
    let get_i64 = |i: usize| rest.get(i).and_then(|s| s.parse::<i64>().ok()).unwrap_or(0);
    let state = rest
        .first()
        .and_then(|s| s.chars().next())
        .ok_or_else(|| CollectError::Parse("missing state field".into()))?;
    let ppid: i32 = rest
        .get(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CollectError::Parse("missing ppid field".into()))?;
    Ok(ProcessSample {
        pid,
        comm,
        state,
        ppid,
        utime: get_u64(11),
        stime: get_u64(12),
        priority: get_i64(15),
        starttime: get_u64(19),
        vsize: get_u64(20),
        rss_pages: get_i64(21),
        delayacct_blkio_ticks: get_u64(39),
        guest_time: get_u64(41),
        io: ProcPidIo::default(),
        cmdline: Vec::new(),
    })
}

/// `/proc/[pid]/cmdline`: NUL-separated argv, trailing NULs stripped.
fn parse_cmdline(content: &str) -> Vec<String> {
    content
        .split('\0')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Samples one PID. Returns `Err(CollectError::Gone(..))` when the process
/// exited mid-sample (any of the three files vanished) so the caller can
/// drop it from `current` without logging it as a parse failure.
pub fn sample_pid<F: FileSystem>(fs: &F, proc_path: &str, pid: i32) -> Result<ProcessSample, CollectError> {
    let stat_path = format!("{proc_path}/{pid}/stat");
    let stat_content = fs
        .read_to_string(Path::new(&stat_path))
        .map_err(|_| CollectError::Gone(format!("pid {pid}")))?;
    let mut sample = parse_full_stat(&stat_content)?;

    let io_path = format!("{proc_path}/{pid}/io");
    if let Ok(io_content) = fs.read_to_string(Path::new(&io_path)) {
        sample.io = parse_proc_pid_io(&io_content);
    }

    let cmdline_path = format!("{proc_path}/{pid}/cmdline");
    if let Ok(cmdline_content) = fs.read_to_string(Path::new(&cmdline_path)) {
        sample.cmdline = parse_cmdline(&cmdline_content);
    }

    Ok(sample)
}

/// Lists PIDs currently present under `proc_path`, i.e. every numeric
/// directory entry. Non-numeric entries (`stat`, `meminfo`, ...) and
/// entries that raced an exit between `read_dir` and `stat` are skipped.
pub fn list_pids<F: FileSystem>(fs: &F, proc_path: &str) -> Vec<i32> {
    fs.read_dir_names(Path::new(proc_path))
        .map(|names| names.iter().filter_map(|n| n.parse().ok()).collect())
        .unwrap_or_default()
}

/// Resolves a process's current working directory via the `cwd` symlink,
/// used by the cluster resolver (spec.md §4.7) to find a postmaster's data
/// directory.
pub fn read_cwd<F: FileSystem>(fs: &F, proc_path: &str, pid: i32) -> Option<String> {
    let path = format!("{proc_path}/{pid}/cwd");
    fs.symlink_target(Path::new(&path)).ok()
}

/// Parses `/proc/[pid]/status`'s `Name:` line, used to match the `postgres`
/// / `postmaster` process name during cluster autodetection without
/// depending on the (truncated-to-15-chars) `comm` field from `stat`.
pub fn read_status_name<F: FileSystem>(fs: &F, proc_path: &str, pid: i32) -> Option<String> {
    let path = format!("{proc_path}/{pid}/status");
    let content = fs.read_to_string(Path::new(&path)).ok()?;
    content
        .lines()
        .find_map(|l| l.strip_prefix("Name:"))
        .map(|s| s.trim().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::procfs::mock::MockFs;

    #[test]
    fn parses_full_stat_fields() {
        let content = "1234 (postgres) S 1 1234 1234 0 -1 4194560 100 0 0 0 10 5 0 0 20 0 1 0 500 102400 256 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 0 7\n";
        let s = parse_full_stat(content).unwrap();
        assert_eq!(s.pid, 1234);
        assert_eq!(s.comm, "postgres");
        assert_eq!(s.utime, 10);
        assert_eq!(s.stime, 5);
        assert_eq!(s.starttime, 500);
        assert_eq!(s.vsize, 102400);
        assert_eq!(s.rss_pages, 256);
    }

    #[test]
    fn parses_cmdline_nul_separated() {
        assert_eq!(
            parse_cmdline("postgres\0-D\0/var/lib/pgsql/data\0"),
            vec!["postgres", "-D", "/var/lib/pgsql/data"]
        );
    }

    #[test]
    fn sample_pid_reads_fixture() {
        let fs = MockFs::typical_system();
        let sample = sample_pid(&fs, "/proc", 1234).unwrap();
        assert_eq!(sample.pid, 1234);
        assert_eq!(sample.comm, "postgres");
        assert_eq!(sample.io.read_bytes, 4096);
        assert_eq!(sample.cmdline, vec!["postgres", "-D", "/var/lib/pgsql/data"]);
    }

    #[test]
    fn list_pids_filters_non_numeric() {
        let fs = MockFs::typical_system();
        assert_eq!(list_pids(&fs, "/proc"), vec![1234]);
    }
}
