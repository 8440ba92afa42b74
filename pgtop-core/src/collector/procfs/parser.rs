//! Manual line-oriented parsers for `/proc` files. No regex, matching the
//! teacher's `collector/procfs/parser.rs` idiom: split on whitespace/colon
//! and parse tokens directly.

use crate::error::CollectError;

/// `/proc/stat`'s `cpu ` line: eight tick buckets plus the derived total.
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuTicks {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuTicks {
    pub fn total(&self) -> u64 {
        self.user
            + self.nice
            + self.system
            + self.idle
            + self.iowait
            + self.irq
            + self.softirq
            + self.steal
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProcStat {
    pub cpu: CpuTicks,
    pub ctxt: u64,
    pub btime: u64,
    pub processes: u64,
    pub procs_running: u64,
    pub procs_blocked: u64,
}

pub fn parse_proc_stat(content: &str) -> Result<ProcStat, CollectError> {
    let mut out = ProcStat::default();
    let mut saw_cpu = false;
    for line in content.lines() {
        let mut fields = line.split_whitespace();
        let Some(key) = fields.next() else { continue };
        match key {
            "cpu" => {
                let nums: Vec<u64> = fields.filter_map(|s| s.parse().ok()).collect();
                if nums.len() < 8 {
                    return Err(CollectError::Parse("short cpu line in /proc/stat".into()));
                }
                out.cpu = CpuTicks {
                    user: nums[0],
                    nice: nums[1],
                    system: nums[2],
                    idle: nums[3],
                    iowait: nums[4],
                    irq: nums[5],
                    softirq: nums[6],
                    steal: nums[7],
                };
                saw_cpu = true;
            }
            "ctxt" => out.ctxt = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0),
            "btime" => out.btime = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0),
            "processes" => out.processes = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0),
            "procs_running" => {
                out.procs_running = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0)
            }
            "procs_blocked" => {
                out.procs_blocked = fields.next().and_then(|s| s.parse().ok()).unwrap_or(0)
            }
            _ => {}
        }
    }
    if !saw_cpu {
        return Err(CollectError::Parse("no cpu line in /proc/stat".into()));
    }
    Ok(out)
}

/// `/proc/meminfo` key/value pairs, the rare `kB`/`mB`/`gB` unit token on a
/// line rewritten to kB, per spec.md's exact rule.
pub fn parse_meminfo(content: &str) -> std::collections::HashMap<String, u64> {
    let mut out = std::collections::HashMap::new();
    for line in content.lines() {
        let mut parts = line.splitn(2, ':');
        let (Some(key), Some(rest)) = (parts.next(), parts.next()) else {
            continue;
        };
        let mut tokens = rest.split_whitespace();
        let Some(value_tok) = tokens.next() else {
            continue;
        };
        let Ok(mut value) = value_tok.parse::<u64>() else {
            continue;
        };
        if let Some(unit) = tokens.next() {
            match unit {
                "mB" => value *= 1_000,
                "gB" => value *= 1_000_000,
                _ => {}
            }
        }
        out.insert(key.trim().to_string(), value);
    }
    out
}

/// `/proc/loadavg`: three load averages plus the running/total process
/// counts and the most recently created PID.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoadAvg {
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

pub fn parse_loadavg(content: &str) -> Result<LoadAvg, CollectError> {
    let mut fields = content.split_whitespace();
    let load1 = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CollectError::Parse("missing load1 in /proc/loadavg".into()))?;
    let load5 = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CollectError::Parse("missing load5 in /proc/loadavg".into()))?;
    let load15 = fields
        .next()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CollectError::Parse("missing load15 in /proc/loadavg".into()))?;
    Ok(LoadAvg {
        load1,
        load5,
        load15,
    })
}

/// `/proc/[pid]/stat`: only the fields the process collector needs. The
/// comm field is parenthesized and may itself contain spaces/parens, so it
/// is located by the last `)` rather than by whitespace-splitting.
#[derive(Debug, Clone, Default)]
pub struct ProcPidStat {
    pub pid: i32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
    pub utime: u64,
    pub stime: u64,
    pub starttime: u64,
}

pub fn parse_proc_pid_stat(content: &str) -> Result<ProcPidStat, CollectError> {
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
    // rest[0] = state, rest[1] = ppid, ... rest[11] = utime, rest[12] = stime,
    // rest[19] = starttime (0-indexed from state).
    let state = rest
        .first()
        .and_then(|s| s.chars().next())
        .ok_or_else(|| CollectError::Parse("missing state field".into()))?;
    let ppid: i32 = rest
        .get(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| CollectError::Parse("missing ppid field".into()))?;
    let utime: u64 = rest.get(11).and_then(|s| s.parse().ok()).unwrap_or(0);
    let stime: u64 = rest.get(12).and_then(|s| s.parse().ok()).unwrap_or(0);
    let starttime: u64 = rest.get(19).and_then(|s| s.parse().ok()).unwrap_or(0);
    Ok(ProcPidStat {
        pid,
        comm,
        state,
        ppid,
        utime,
        stime,
        starttime,
    })
}

/// `/proc/[pid]/status`: only `Uid` (real uid, first of four) and `VmRSS`.
pub fn parse_proc_pid_status(content: &str) -> (Option<u32>, Option<u64>) {
    let mut uid = None;
    let mut rss_kb = None;
    for line in content.lines() {
        if let Some(rest) = line.strip_prefix("Uid:") {
            uid = rest.split_whitespace().next().and_then(|s| s.parse().ok());
        } else if let Some(rest) = line.strip_prefix("VmRSS:") {
            rss_kb = rest
                .split_whitespace()
                .next()
                .and_then(|s| s.parse().ok());
        }
    }
    (uid, rss_kb)
}

/// `/proc/[pid]/io`: counters absent entirely when the caller lacks
/// permission to read another user's process; the collector treats that
/// as "all zero / absent" rather than an error.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcPidIo {
    pub read_bytes: u64,
    pub write_bytes: u64,
}

pub fn parse_proc_pid_io(content: &str) -> ProcPidIo {
    let mut out = ProcPidIo::default();
    for line in content.lines() {
        let mut parts = line.splitn(2, ':');
        let (Some(key), Some(val)) = (parts.next(), parts.next()) else {
            continue;
        };
        let val: u64 = val.trim().parse().unwrap_or(0);
        match key {
            "read_bytes" => out.read_bytes = val,
            "write_bytes" => out.write_bytes = val,
            _ => {}
        }
    }
    out
}

/// `/etc/passwd`: uid -> username, used to render a human name instead of
/// a raw uid in the process table.
pub fn parse_passwd(content: &str) -> std::collections::HashMap<u32, String> {
    let mut out = std::collections::HashMap::new();
    for line in content.lines() {
        let cols: Vec<&str> = line.split(':').collect();
        // name:passwd:uid:gid:gecos:home:shell
        if cols.len() < 3 {
            continue;
        }
        if let Ok(uid) = cols[2].parse::<u32>() {
            out.insert(uid, cols[0].to_string());
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_cpu_line() {
        let stat = parse_proc_stat("cpu  100 10 50 800 20 0 5 0\nctxt 42\nbtime 1700000000\n")
            .unwrap();
        assert_eq!(stat.cpu.user, 100);
        assert_eq!(stat.cpu.idle, 800);
        assert_eq!(stat.ctxt, 42);
        assert_eq!(stat.btime, 1_700_000_000);
    }

    #[test]
    fn parses_meminfo_unit_rewrite() {
        let m = parse_meminfo("MemTotal:  1 mB\nMemFree: 512 kB\n");
        assert_eq!(m["MemTotal"], 1_000);
        assert_eq!(m["MemFree"], 512);
    }

    #[test]
    fn parses_loadavg() {
        let l = parse_loadavg("0.50 0.40 0.30 1/200 5678\n").unwrap();
        assert_eq!(l.load1, 0.50);
        assert_eq!(l.load15, 0.30);
    }

    #[test]
    fn parses_pid_stat_with_parens_in_comm() {
        let s = parse_proc_pid_stat(
            "42 (my (cool) proc) S 1 42 42 0 -1 0 0 0 0 0 10 5 0 0 20 0 1 0 999 0 0\n",
        )
        .unwrap();
        assert_eq!(s.pid, 42);
        assert_eq!(s.comm, "my (cool) proc");
        assert_eq!(s.state, 'S');
        assert_eq!(s.utime, 10);
        assert_eq!(s.stime, 5);
    }

    #[test]
    fn parses_pid_status() {
        let (uid, rss) = parse_proc_pid_status("Uid:\t1000\t1000\t1000\t1000\nVmRSS:\t4096 kB\n");
        assert_eq!(uid, Some(1000));
        assert_eq!(rss, Some(4096));
    }
}
