//! Command-line surface (spec.md §6). Grounded on the teacher's `Args`
//! derive structs in `crates/rpglotd/src/main.rs` and `src/bin/rpglot.rs`
//! (doc-comment-as-help, `#[command(name, about, version)]`).

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Interactive terminal monitor for one or more co-located PostgreSQL
/// clusters.
#[derive(Parser, Debug)]
#[command(name = "pgtop", about = "Interactive terminal monitor for PostgreSQL clusters", version)]
pub struct Cli {
    /// Limit to the named instance.
    #[arg(short = 'i', long = "instance", value_name = "NAME")]
    pub instance: Option<String>,

    /// Limit to the given server version (e.g. 14.2).
    #[arg(short = 'V', long = "version", value_name = "VER")]
    pub server_version: Option<f32>,

    /// Tick length in seconds.
    #[arg(short = 't', long = "tick", default_value_t = 1, value_name = "SECS")]
    pub tick_secs: u64,

    /// Output mode.
    #[arg(short = 'o', long = "output", default_value = "curses")]
    pub output: OutputMode,

    /// Log file path. Defaults to stderr when absent.
    #[arg(short = 'l', long = "log-file", value_name = "FILE")]
    pub log_file: Option<PathBuf>,

    /// Clear the screen each tick in non-curses output modes.
    #[arg(short = 'R', long = "clear-screen")]
    pub clear_screen: bool,

    /// Cluster configuration file (INI-style, one section per instance).
    #[arg(short = 'c', long = "config", value_name = "FILE")]
    pub config_file: Option<PathBuf>,

    /// PID to always track regardless of idle state. Repeatable.
    #[arg(short = 'P', long = "always-track", value_name = "PID")]
    pub always_track: Vec<i32>,

    /// PostgreSQL connection username.
    #[arg(short = 'U', long = "user", value_name = "USER")]
    pub user: Option<String>,

    /// PostgreSQL connection database name.
    #[arg(short = 'd', long = "dbname", value_name = "DBNAME")]
    pub dbname: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputMode {
    Console,
    Json,
    Curses,
}

/// Process exit codes, per spec.md §6.
pub mod exit_code {
    pub const OK: i32 = 0;
    pub const BAD_ARGS_OR_NO_CLUSTERS: i32 = 1;
    pub const NON_LINUX: i32 = 243;
    pub const MISSING_SQL_DRIVER: i32 = 254;
}
