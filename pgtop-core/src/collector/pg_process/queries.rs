//! Version-keyed `pg_stat_activity` join text (spec.md §4.6/§6): three
//! buckets, `< 9.2`, `[9.2, 9.6)`, `>= 9.6`, matching the shape of the
//! teacher's `build_stat_activity_query` version-branching in
//! `collector/pg_collector/queries.rs` (there keyed on a single `>= 14`
//! cutover; here keyed on the spec's three buckets).

/// Picks the query text for the given `server_version_num`-style float
/// (e.g. `9.6`, `14.2`).
pub fn stat_activity_query(server_version: f32) -> &'static str {
    if server_version < 9.2 {
        PRE_92
    } else if server_version < 9.6 {
        PRE_96
    } else {
        MODERN
    }
}

/// Every variant projects the same column set regardless of server-version
/// quirks, per spec.md §4.6 input source 2: `datname, pid, usename,
/// client_addr, client_port, age (seconds), waiting, locked_by, query`.
/// `locked_by` is a comma-sorted string of blocker PIDs built from
/// `pg_locks`; a backend with no entry there is unblocked (empty string).

/// Before 9.2, `pg_stat_activity` has no `wait_event`/`state` columns and
/// exposes `procpid` instead of `pid`; `waiting` is a native boolean
/// column and `current_query` replaces `query` (with the `<IDLE>` and
/// `<IDLE> in transaction` sentinels normalized to plain text here so the
/// collector's idle-state matching doesn't need three spellings).
const PRE_92: &str = "\
SELECT datname,
       procpid AS pid,
       usename,
       client_addr,
       client_port,
       EXTRACT(EPOCH FROM (now() - query_start))::bigint AS age,
       waiting,
       COALESCE((SELECT string_agg(l2.pid::text, ',' ORDER BY l2.pid)
                 FROM pg_locks l1 JOIN pg_locks l2
                   ON l1.locktype = l2.locktype
                  AND l1.database IS NOT DISTINCT FROM l2.database
                  AND l1.relation IS NOT DISTINCT FROM l2.relation
                  AND l1.pid != l2.pid
                 WHERE l1.pid = pg_stat_activity.procpid AND NOT l1.granted AND l2.granted), '') AS locked_by,
       CASE WHEN current_query = '<IDLE>' THEN 'idle'
            WHEN current_query = '<IDLE> in transaction' THEN 'idle in transaction'
            ELSE current_query END AS query
FROM pg_stat_activity";

/// 9.2 through 9.5 add `state`/`pid`/`wait_event` but not
/// `wait_event_type`; `waiting` is still a boolean column, `locked_by`
/// built the same way as the pre-9.2 variant.
const PRE_96: &str = "\
SELECT datname,
       pid,
       usename,
       client_addr,
       client_port,
       EXTRACT(EPOCH FROM (now() - query_start))::bigint AS age,
       waiting,
       COALESCE((SELECT string_agg(l2.pid::text, ',' ORDER BY l2.pid)
                 FROM pg_locks l1 JOIN pg_locks l2
                   ON l1.locktype = l2.locktype
                  AND l1.database IS NOT DISTINCT FROM l2.database
                  AND l1.relation IS NOT DISTINCT FROM l2.relation
                  AND l1.pid != l2.pid
                 WHERE l1.pid = pg_stat_activity.pid AND NOT l1.granted AND l2.granted), '') AS locked_by,
       CASE WHEN state = 'idle' THEN 'idle'
            WHEN state = 'idle in transaction' THEN 'idle in transaction'
            ELSE query END AS query
FROM pg_stat_activity";

/// 9.6+ : `wait_event_type`/`wait_event` replace the boolean `waiting`
/// column as the canonical block signal; `waiting` here is synthesized
/// from `wait_event_type = 'Lock'` so downstream code has one uniform
/// boolean across all three variants.
const MODERN: &str = "\
SELECT datname,
       pid,
       usename,
       client_addr,
       client_port,
       EXTRACT(EPOCH FROM (now() - query_start))::bigint AS age,
       (wait_event_type = 'Lock') AS waiting,
       COALESCE((SELECT string_agg(blocking.pid::text, ',' ORDER BY blocking.pid)
                 FROM unnest(pg_blocking_pids(pg_stat_activity.pid)) AS blocking(pid)), '') AS locked_by,
       CASE WHEN state = 'idle' THEN 'idle'
            WHEN state = 'idle in transaction' THEN 'idle in transaction'
            ELSE query END AS query
FROM pg_stat_activity";

/// Lock-tree annotation for blocked backends, grounded on the teacher's
/// `build_lock_tree_query` CTE shape (`pg_collector::locks`). Supplemental
/// to the core blocker-tree contract: surfaced as optional display columns
/// only (SPEC_FULL.md §4.6).
pub const LOCK_ANNOTATIONS: &str = "\
SELECT blocked_locks.pid AS blocked_pid,
       blocking_locks.pid AS blocking_pid,
       blocked_locks.locktype,
       blocked_locks.relation::regclass AS target
FROM pg_catalog.pg_locks blocked_locks
JOIN pg_catalog.pg_locks blocking_locks
  ON blocking_locks.locktype = blocked_locks.locktype
 AND blocking_locks.database IS NOT DISTINCT FROM blocked_locks.database
 AND blocking_locks.relation IS NOT DISTINCT FROM blocked_locks.relation
 AND blocking_locks.pid != blocked_locks.pid
WHERE NOT blocked_locks.granted";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_routes_to_correct_bucket() {
        assert_eq!(stat_activity_query(9.1), PRE_92);
        assert_eq!(stat_activity_query(9.2), PRE_96);
        assert_eq!(stat_activity_query(9.5), PRE_96);
        assert_eq!(stat_activity_query(9.6), MODERN);
        assert_eq!(stat_activity_query(14.2), MODERN);
    }
}
