//! Cluster configuration file (spec.md §6): INI-style, one section per
//! instance, keys `host`/`port`/`user`/`dbname`. No ecosystem crate in the
//! teacher's stack covers INI — this is a hand-rolled line-oriented parser
//! in the same manual-tokenizing idiom as `collector::procfs::parser`.

use std::collections::HashMap;
use std::fmt;

/// One `[instance]` section. Absent keys are omitted rather than
/// defaulted, per spec.md §6 — the caller (resolver wiring) falls back to
/// CLI-supplied defaults for any key a section doesn't set.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstanceConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub dbname: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClusterConfig {
    pub instances: HashMap<String, InstanceConfig>,
}

#[derive(Debug)]
pub enum ConfigError {
    KeyOutsideSection(usize),
    UnknownKey(usize, String),
    BadPort(usize, String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::KeyOutsideSection(line) => {
                write!(f, "line {line}: key/value before any [section]")
            }
            ConfigError::UnknownKey(line, key) => {
                write!(f, "line {line}: unknown key '{key}'")
            }
            ConfigError::BadPort(line, value) => {
                write!(f, "line {line}: invalid port '{value}'")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Parses an INI-style cluster config: `[name]` section headers, `key =
/// value` lines, `#`/`;` full-line comments, blank lines ignored.
pub fn parse(content: &str) -> Result<ClusterConfig, ConfigError> {
    let mut instances = HashMap::new();
    let mut current: Option<String> = None;

    for (idx, raw_line) in content.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(name) = line.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            let name = name.trim().to_string();
            instances.entry(name.clone()).or_insert_with(InstanceConfig::default);
            current = Some(name);
            continue;
        }
        let Some(section) = &current else {
            return Err(ConfigError::KeyOutsideSection(line_no));
        };
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        let value = value.trim().to_string();
        let entry = instances.entry(section.clone()).or_insert_with(InstanceConfig::default);
        match key {
            "host" => entry.host = Some(value),
            "port" => {
                entry.port = Some(
                    value
                        .parse()
                        .map_err(|_| ConfigError::BadPort(line_no, value.clone()))?,
                )
            }
            "user" => entry.user = Some(value),
            "dbname" => entry.dbname = Some(value),
            other => return Err(ConfigError::UnknownKey(line_no, other.to_string())),
        }
    }

    Ok(ClusterConfig { instances })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_instance_section() {
        let content = "[main]\nhost = /var/run/postgresql\nport = 5432\nuser = monitor\ndbname = postgres\n";
        let cfg = parse(content).unwrap();
        let main = &cfg.instances["main"];
        assert_eq!(main.host.as_deref(), Some("/var/run/postgresql"));
        assert_eq!(main.port, Some(5432));
        assert_eq!(main.user.as_deref(), Some("monitor"));
        assert_eq!(main.dbname.as_deref(), Some("postgres"));
    }

    #[test]
    fn absent_keys_stay_none_rather_than_defaulted() {
        let content = "[main]\nhost = localhost\n";
        let cfg = parse(content).unwrap();
        let main = &cfg.instances["main"];
        assert_eq!(main.port, None);
        assert_eq!(main.user, None);
    }

    #[test]
    fn comments_and_blank_lines_are_skipped() {
        let content = "; a comment\n\n[main]\n# another comment\nhost = localhost\n";
        let cfg = parse(content).unwrap();
        assert!(cfg.instances.contains_key("main"));
    }

    #[test]
    fn key_before_any_section_is_an_error() {
        let content = "host = localhost\n[main]\n";
        assert!(matches!(parse(content), Err(ConfigError::KeyOutsideSection(1))));
    }

    #[test]
    fn unknown_key_is_an_error() {
        let content = "[main]\nsslmode = require\n";
        assert!(matches!(parse(content), Err(ConfigError::UnknownKey(2, _))));
    }

    #[test]
    fn bad_port_is_an_error() {
        let content = "[main]\nport = not-a-number\n";
        assert!(matches!(parse(content), Err(ConfigError::BadPort(2, _))));
    }

    #[test]
    fn multiple_sections_stay_independent() {
        let content = "[main]\nhost = a\n[replica]\nhost = b\n";
        let cfg = parse(content).unwrap();
        assert_eq!(cfg.instances["main"].host.as_deref(), Some("a"));
        assert_eq!(cfg.instances["replica"].host.as_deref(), Some("b"));
    }
}
