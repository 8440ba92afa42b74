//! Cluster Discovery & Connection Resolver (spec.md §4.7): autodetects
//! running postmasters from the process table, discovers their listening
//! sockets from `/proc/net/{unix,tcp,tcp6}`, and selects the first
//! reachable endpoint.
//!
//! Grounded on `other_examples/59e6466a_allenap-pgdo__pgdo-lib-src-cluster.rs.rs`'s
//! `Cluster` struct (datadir + reachable-endpoint shape, generalized here
//! from lifecycle management to read-only discovery) and on
//! `collector::procfs::process` for `/proc` process-table scanning. No
//! crate in the teacher's stack parses `/proc/net/*` tables, so the hex
//! address parsing is hand-rolled in the same manual-tokenizing idiom as
//! `collector::procfs::parser`.

use std::collections::HashSet;
use std::path::Path;

use postgres::{Client, NoTls};
use tracing::warn;

use crate::collector::procfs::process::{list_pids, read_cwd, read_status_name, sample_pid};
use crate::collector::procfs::FileSystem;
use crate::error::ResolveError;

/// A discovered, connected cluster, ready to be handed to the partition
/// and PG process collectors. Exclusively owned by the main loop (spec.md
/// §3); the PG process collector only borrows its connection parameters.
pub struct ClusterDescriptor {
    pub name: String,
    pub server_version: f32,
    pub work_dir: String,
    pub postmaster_pid: i32,
    pub endpoint: Endpoint,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Unix { dir: String, port: u16 },
    Tcp { host: String, port: u16 },
    Tcp6 { host: String, port: u16 },
}

impl Endpoint {
    fn host_port(&self) -> (String, u16) {
        match self {
            Endpoint::Unix { dir, port } => (dir.clone(), *port),
            Endpoint::Tcp { host, port } => (host.clone(), *port),
            Endpoint::Tcp6 { host, port } => (host.clone(), *port),
        }
    }
}

/// A process table candidate: a running `postgres`/`postmaster` image
/// whose parent is not itself such a process (i.e. the top of its
/// process group), per spec.md §4.7.
#[derive(Debug, Clone)]
struct PostmasterCandidate {
    pid: i32,
    cwd: String,
}

fn is_postmaster_name(name: &str) -> bool {
    name == "postgres" || name == "postmaster"
}

/// Scans every PID under `proc_path`, keeping those whose `status` `Name:`
/// line matches `postgres`/`postmaster` and whose parent PID is not itself
/// such a process.
fn scan_postmasters<F: FileSystem>(fs: &F, proc_path: &str) -> Vec<PostmasterCandidate> {
    let pids = list_pids(fs, proc_path);
    let mut names = std::collections::HashMap::new();
    for &pid in &pids {
        if let Some(name) = read_status_name(fs, proc_path, pid) {
            names.insert(pid, name);
        }
    }
    let mut out = Vec::new();
    for &pid in &pids {
        let Some(name) = names.get(&pid) else { continue };
        if !is_postmaster_name(name) {
            continue;
        }
        let ppid = sample_pid(fs, proc_path, pid).map(|s| s.ppid).unwrap_or(0);
        let parent_is_postmaster = names.get(&ppid).map(|n| is_postmaster_name(n)).unwrap_or(false);
        if parent_is_postmaster {
            continue;
        }
        let Some(cwd) = read_cwd(fs, proc_path, pid) else { continue };
        out.push(PostmasterCandidate { pid, cwd });
    }
    out
}

/// Reads `PG_VERSION` from a data directory, returning the server major
/// version as `X.Y` (e.g. `9.6`, `14.0`).
fn read_server_version<F: FileSystem>(fs: &F, data_dir: &str) -> Option<f32> {
    let path = format!("{data_dir}/PG_VERSION");
    let content = fs.read_to_string(Path::new(&path)).ok()?;
    let text = content.trim();
    let major: f32 = text.split('.').next()?.parse().ok()?;
    if text.contains('.') && major < 10.0 {
        // Pre-10 versions are themselves `major.minor` (e.g. "9.6");
        // 10+ versions are a single integer ("14") in this file.
        text.parse().ok()
    } else {
        Some(major)
    }
}

/// Derives a cluster's display name from its data directory path,
/// matching spec.md §4.7's `/pgsql_<name>(/<ver>)?/data/?` convention;
/// falls back to the path itself when it doesn't match.
pub fn derive_cluster_name(work_dir: &str) -> String {
    let trimmed = work_dir.trim_end_matches('/');
    let Some(idx) = trimmed.find("/pgsql_") else {
        return work_dir.to_string();
    };
    let rest = &trimmed[idx + "/pgsql_".len()..];
    let name_end = rest.find('/').unwrap_or(rest.len());
    let name = &rest[..name_end];
    if name.is_empty() {
        work_dir.to_string()
    } else {
        name.to_string()
    }
}

/// `/proc/net/unix`: looks for PostgreSQL listening sockets whose path
/// matches `(.*)/\.s\.PGSQL\.(\d+)$`, keyed by inode so the caller can
/// cross-reference a process's open file descriptors.
pub fn parse_net_unix(content: &str) -> Vec<(u64, String, u16)> {
    let mut lines = content.lines();
    let Some(header) = lines.next() else { return Vec::new() };
    let cols: Vec<&str> = header.split_whitespace().collect();
    let Some(inode_idx) = cols.iter().position(|&c| c == "Inode") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(inode_str) = fields.get(inode_idx) else { continue };
        let Ok(inode) = inode_str.parse::<u64>() else { continue };
        // The socket path, if present, is always the last field.
        let Some(&path) = fields.last() else { continue };
        let Some((dir, port)) = parse_pgsql_socket_path(path) else {
            continue;
        };
        out.push((inode, dir, port));
    }
    out
}

/// Matches `(.*)/\.s\.PGSQL\.(\d+)$` by hand (no regex in the teacher's
/// stack): split on the last `/`, check the filename prefix/suffix, parse
/// the digits in between.
fn parse_pgsql_socket_path(path: &str) -> Option<(String, u16)> {
    let (dir, filename) = path.rsplit_once('/')?;
    let digits = filename.strip_prefix(".s.PGSQL.")?;
    let port: u16 = digits.parse().ok()?;
    Some((dir.to_string(), port))
}

/// `/proc/net/tcp` / `/proc/net/tcp6`: the local-address column is
/// `HEX_ADDR:HEX_PORT`. IPv4 addresses are stored little-endian (reverse
/// the 4 bytes to get the dotted quad); IPv6 addresses are stored as four
/// little-endian 32-bit words (reverse bytes within each word, keep word
/// order, to get the eight 16-bit colon groups), per spec.md §4.7/§8
/// scenario 4.
pub fn parse_net_tcp(content: &str, v6: bool) -> Vec<(u64, String, u16)> {
    let mut lines = content.lines();
    let Some(header) = lines.next() else { return Vec::new() };
    let cols: Vec<&str> = header.split_whitespace().collect();
    let Some(inode_idx) = cols.iter().position(|&c| c == "inode") else {
        return Vec::new();
    };
    let Some(local_idx) = cols.iter().position(|&c| c == "local_address") else {
        return Vec::new();
    };
    let mut out = Vec::new();
    for line in lines {
        let fields: Vec<&str> = line.split_whitespace().collect();
        let Some(local) = fields.get(local_idx) else { continue };
        let Some(inode_str) = fields.get(inode_idx) else { continue };
        let Ok(inode) = inode_str.parse::<u64>() else { continue };
        let Some((addr_hex, port_hex)) = local.split_once(':') else { continue };
        let Ok(port) = u16::from_str_radix(port_hex, 16) else { continue };
        let host = if v6 {
            decode_ipv6_hex(addr_hex)
        } else {
            decode_ipv4_hex(addr_hex)
        };
        let Some(host) = host else { continue };
        out.push((inode, host, port));
    }
    out
}

fn decode_ipv4_hex(hex: &str) -> Option<String> {
    if hex.len() != 8 {
        return None;
    }
    let raw = u32::from_str_radix(hex, 16).ok()?;
    let bytes = raw.to_le_bytes();
    Some(format!("{}.{}.{}.{}", bytes[0], bytes[1], bytes[2], bytes[3]))
}

fn decode_ipv6_hex(hex: &str) -> Option<String> {
    if hex.len() != 32 {
        return None;
    }
    let mut groups: Vec<String> = Vec::with_capacity(8);
    for word_idx in 0..4 {
        let word_hex = &hex[word_idx * 8..word_idx * 8 + 8];
        let raw = u32::from_str_radix(word_hex, 16).ok()?;
        let bytes = raw.to_le_bytes();
        groups.push(format!("{:02x}{:02x}", bytes[0], bytes[1]));
        groups.push(format!("{:02x}{:02x}", bytes[2], bytes[3]));
    }
    Some(groups.join(":"))
}

/// Lists the socket inodes a PID currently holds open, by reading every
/// `/proc/[pid]/fd/*` symlink and keeping the `socket:[N]` targets.
fn open_socket_inodes<F: FileSystem>(fs: &F, proc_path: &str, pid: i32) -> HashSet<u64> {
    let fd_dir = format!("{proc_path}/{pid}/fd");
    let Ok(fds) = fs.read_dir_names(Path::new(&fd_dir)) else {
        return HashSet::new();
    };
    let mut out = HashSet::new();
    for fd in fds {
        let link_path = format!("{fd_dir}/{fd}");
        if let Ok(target) = fs.symlink_target(Path::new(&link_path)) {
            if let Some(digits) = target.strip_prefix("socket:[").and_then(|s| s.strip_suffix(']')) {
                if let Ok(inode) = digits.parse() {
                    out.insert(inode);
                }
            }
        }
    }
    out
}

/// Resolves every endpoint a postmaster is listening on, preferring unix
/// sockets, then IPv4 TCP, then IPv6 TCP, per spec.md §4.7's selection
/// order.
fn resolve_endpoints<F: FileSystem>(fs: &F, proc_path: &str, pid: i32) -> Vec<Endpoint> {
    let my_inodes = open_socket_inodes(fs, proc_path, pid);
    if my_inodes.is_empty() {
        return Vec::new();
    }

    let mut endpoints = Vec::new();

    if let Ok(content) = fs.read_to_string(Path::new(&format!("{proc_path}/net/unix"))) {
        for (inode, dir, port) in parse_net_unix(&content) {
            if my_inodes.contains(&inode) {
                endpoints.push(Endpoint::Unix { dir, port });
            }
        }
    }
    if let Ok(content) = fs.read_to_string(Path::new(&format!("{proc_path}/net/tcp"))) {
        for (inode, host, port) in parse_net_tcp(&content, false) {
            if my_inodes.contains(&inode) {
                endpoints.push(Endpoint::Tcp { host, port });
            }
        }
    }
    if let Ok(content) = fs.read_to_string(Path::new(&format!("{proc_path}/net/tcp6"))) {
        for (inode, host, port) in parse_net_tcp(&content, true) {
            if my_inodes.contains(&inode) {
                endpoints.push(Endpoint::Tcp6 { host, port });
            }
        }
    }
    endpoints
}

/// `postmaster.pid`'s line layout (spec.md §4.7 fallback, only attempted
/// for server versions >= 9.1): line 4 port, line 5 unix socket dir (empty
/// = absent), line 6 TCP listen address (`*` rewritten to `127.0.0.1`).
/// Returns `None` when the file has fewer than 6 lines.
pub fn parse_postmaster_pid_fallback(content: &str) -> Option<Endpoint> {
    let lines: Vec<&str> = content.lines().collect();
    if lines.len() < 6 {
        return None;
    }
    let port: u16 = lines[3].trim().parse().ok()?;
    let unix_dir = lines[4].trim();
    if !unix_dir.is_empty() {
        return Some(Endpoint::Unix {
            dir: unix_dir.to_string(),
            port,
        });
    }
    let tcp_addr = lines[5].trim();
    if tcp_addr.is_empty() {
        return None;
    }
    let host = if tcp_addr == "*" {
        "127.0.0.1".to_string()
    } else {
        tcp_addr.to_string()
    };
    Some(Endpoint::Tcp { host, port })
}

/// Parameters supplied by the caller (CLI/config) used to complete a
/// trial connection: username and database, plus which clusters to limit
/// discovery to, per spec.md §6.
pub struct DiscoveryFilter<'a> {
    pub instance_name: Option<&'a str>,
    pub server_version: Option<f32>,
    pub user: &'a str,
    pub dbname: &'a str,
}

/// Tries to open a trial connection to an endpoint, returning the live
/// `Client` on success. Callers try `unix`, `tcp`, `tcp6` in order and
/// keep the first that opens, per spec.md §4.7's selection rule.
fn try_connect(endpoint: &Endpoint, user: &str, dbname: &str) -> Result<Client, postgres::Error> {
    let (host, port) = endpoint.host_port();
    let conn_str = format!("host={host} port={port} user={user} dbname={dbname}");
    Client::connect(&conn_str, NoTls)
}

/// Discovers all running clusters, resolves a working endpoint for each,
/// and opens the SQL connection the PG process collector will subsequently
/// borrow. Duplicate postmasters (same PID reachable via more than one
/// endpoint) are only reported once, per spec.md §4.7's dedup rule.
pub fn discover_clusters<F: FileSystem>(
    fs: &F,
    proc_path: &str,
    filter: &DiscoveryFilter<'_>,
) -> Vec<(ClusterDescriptor, Client)> {
    let mut accepted_pids = HashSet::new();
    let mut out = Vec::new();

    for candidate in scan_postmasters(fs, proc_path) {
        if accepted_pids.contains(&candidate.pid) {
            continue;
        }
        let Some(version) = read_server_version(fs, &candidate.cwd) else {
            warn!("no PG_VERSION in {}, skipping candidate pid {}", candidate.cwd, candidate.pid);
            continue;
        };
        if let Some(wanted) = filter.server_version {
            if (version - wanted).abs() > f32::EPSILON {
                continue;
            }
        }
        let name = derive_cluster_name(&candidate.cwd);
        if let Some(wanted) = filter.instance_name {
            if name != wanted {
                continue;
            }
        }

        let mut endpoints = resolve_endpoints(fs, proc_path, candidate.pid);
        if endpoints.is_empty() && version >= 9.1 {
            let pid_file = format!("{}/postmaster.pid", candidate.cwd);
            if let Ok(content) = fs.read_to_string(Path::new(&pid_file)) {
                if let Some(ep) = parse_postmaster_pid_fallback(&content) {
                    endpoints.push(ep);
                }
            }
        }

        let mut connected = None;
        for endpoint in &endpoints {
            match try_connect(endpoint, filter.user, filter.dbname) {
                Ok(client) => {
                    connected = Some((endpoint.clone(), client));
                    break;
                }
                Err(e) => warn!("trial connection to {:?} failed: {e}", endpoint),
            }
        }

        let Some((endpoint, client)) = connected else {
            warn!("no reachable endpoint for cluster '{name}' (pid {})", candidate.pid);
            continue;
        };

        accepted_pids.insert(candidate.pid);
        out.push((
            ClusterDescriptor {
                name,
                server_version: version,
                work_dir: candidate.cwd,
                postmaster_pid: candidate.pid,
                endpoint,
            },
            client,
        ));
    }

    if out.is_empty() {
        warn!("no reachable clusters found");
    }
    out
}

/// One attempt at resolving a candidate into a `ResolveError`-reporting
/// result, used by callers that want an explicit error instead of a log
/// line for a single cluster (e.g. a `-c`-configured static endpoint).
pub fn connect_static(host: &str, port: u16, user: &str, dbname: &str) -> Result<Client, ResolveError> {
    let conn_str = format!("host={host} port={port} user={user} dbname={dbname}");
    Client::connect(&conn_str, NoTls).map_err(ResolveError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collector::procfs::mock::MockFs;

    #[test]
    fn derives_cluster_name_from_pgsql_path() {
        assert_eq!(derive_cluster_name("/var/lib/pgsql_main/9.6/data"), "main");
        assert_eq!(derive_cluster_name("/var/lib/pgsql_main/data/"), "main");
        assert_eq!(derive_cluster_name("/opt/other/data"), "/opt/other/data");
    }

    #[test]
    fn parses_pgsql_unix_socket_path() {
        assert_eq!(
            parse_pgsql_socket_path("/var/run/postgresql/.s.PGSQL.5432"),
            Some(("/var/run/postgresql".to_string(), 5432))
        );
        assert_eq!(parse_pgsql_socket_path("/var/run/postgresql/other.sock"), None);
    }

    #[test]
    fn parses_net_unix_table() {
        let content = "Num       RefCount Protocol Flags    Type St Inode Path\n\
0: 00000002 00000000 00010000 0001 01 12345 /var/run/postgresql/.s.PGSQL.5432\n";
        let out = parse_net_unix(content);
        assert_eq!(out, vec![(12345, "/var/run/postgresql".to_string(), 5432)]);
    }

    /// spec.md §8 scenario 4: local column `0100007F:1538` with IPv4 ->
    /// host `127.0.0.1`, port `5432`.
    #[test]
    fn decodes_ipv4_tcp_hex() {
        assert_eq!(decode_ipv4_hex("0100007F"), Some("127.0.0.1".to_string()));
        assert_eq!(u16::from_str_radix("1538", 16).unwrap(), 5432);
    }

    #[test]
    fn parses_net_tcp_table() {
        let content = "  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode\n\
   0: 0100007F:1538 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 54321 1 0000000000000000 100 0 0 10 0\n";
        let out = parse_net_tcp(content, false);
        assert_eq!(out, vec![(54321, "127.0.0.1".to_string(), 5432)]);
    }

    #[test]
    fn decodes_ipv6_hex() {
        // ::1 stored as 00000000000000000000000001000000
        let hex = "00000000000000000000000001000000";
        assert_eq!(decode_ipv6_hex(hex), Some("0000:0000:0000:0000:0000:0000:0001:0000".to_string()));
    }

    #[test]
    fn postmaster_pid_fallback_needs_six_lines() {
        let short = "1234\n/data\n1700000000\n5432\n";
        assert_eq!(parse_postmaster_pid_fallback(short), None);
    }

    #[test]
    fn postmaster_pid_fallback_unix_socket() {
        let content = "1234\n/data\n1700000000\n5432\n/var/run/postgresql\n*\n";
        assert_eq!(
            parse_postmaster_pid_fallback(content),
            Some(Endpoint::Unix {
                dir: "/var/run/postgresql".to_string(),
                port: 5432
            })
        );
    }

    #[test]
    fn postmaster_pid_fallback_tcp_star_rewritten() {
        let content = "1234\n/data\n1700000000\n5432\n\n*\n";
        assert_eq!(
            parse_postmaster_pid_fallback(content),
            Some(Endpoint::Tcp {
                host: "127.0.0.1".to_string(),
                port: 5432
            })
        );
    }

    #[test]
    fn scan_postmasters_finds_candidate_via_status_name() {
        let fs = MockFs::new()
            .with_dir("/proc", vec!["1234"])
            .with_dir("/proc/1234", vec!["stat", "status", "cwd"])
            .with_file(
                "/proc/1234/stat",
                "1234 (postgres) S 1 1234 1234 0 -1 0 0 0 0 0 0 0 0 0 0 0 1 0 0 0 0\n",
            )
            .with_file("/proc/1234/status", "Name:\tpostgres\n")
            .with_symlink("/proc/1234/cwd", "/var/lib/pgsql_main/data");
        let candidates = scan_postmasters(&fs, "/proc");
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].pid, 1234);
        assert_eq!(candidates[0].cwd, "/var/lib/pgsql_main/data");
    }

    #[test]
    fn reads_pre10_and_post10_pg_version() {
        let fs = MockFs::new().with_file("/data/PG_VERSION", "9.6\n");
        assert_eq!(read_server_version(&fs, "/data"), Some(9.6));
        let fs2 = MockFs::new().with_file("/data/PG_VERSION", "14\n");
        assert_eq!(read_server_version(&fs2, "/data"), Some(14.0));
    }
}
