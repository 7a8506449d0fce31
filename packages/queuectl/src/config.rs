//! Environment-driven bootstrap config (DB location) plus the defaults for
//! the `config` table's recognized keys (§3 Config).
//!
//! Live config reload across running workers is a declared Non-goal; each
//! worker cycle re-reads the `config` table instead (§9 allowance).

use std::collections::BTreeMap;
use std::env;

use dotenvy::dotenv;

/// Keys `set_config` accepts, with their defaults, in the order the
/// original tool seeds them.
pub const DEFAULT_KEYS: [(&str, &str); 4] = [
    ("max_retries", "3"),
    ("backoff_base", "2"),
    ("poll_interval", "0.5"),
    ("job_timeout", "120"),
];

pub fn default_config() -> BTreeMap<String, String> {
    DEFAULT_KEYS
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub fn is_known_key(key: &str) -> bool {
    DEFAULT_KEYS.iter().any(|(k, _)| *k == key)
}

/// Resolve the SQLite database path from `QUEUECTL_DB` / `DATABASE_URL`,
/// stripping a `sqlite:///` prefix. `QUEUECTL_DB` wins when both are set.
pub fn resolve_db_path() -> String {
    let _ = dotenv();

    let queuectl_db = env::var("QUEUECTL_DB").ok();
    let database_url = env::var("DATABASE_URL").ok();

    let raw = queuectl_db
        .or(database_url)
        .unwrap_or_else(|| "queuectl.db".to_string());

    raw.strip_prefix("sqlite:///")
        .map(str::to_string)
        .unwrap_or(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // Environment variables are process-global; serialize tests that touch them.
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    #[test]
    fn queuectl_db_wins_over_database_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::set_var("QUEUECTL_DB", "/tmp/a.db");
        env::set_var("DATABASE_URL", "sqlite:///tmp/b.db");
        assert_eq!(resolve_db_path(), "/tmp/a.db");
        env::remove_var("QUEUECTL_DB");
        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn sqlite_prefix_is_stripped_from_database_url() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("QUEUECTL_DB");
        env::set_var("DATABASE_URL", "sqlite:///var/data/queuectl.db");
        assert_eq!(resolve_db_path(), "var/data/queuectl.db");
        env::remove_var("DATABASE_URL");
    }

    #[test]
    fn defaults_to_queuectl_db_in_cwd() {
        let _guard = ENV_LOCK.lock().unwrap();
        env::remove_var("QUEUECTL_DB");
        env::remove_var("DATABASE_URL");
        assert_eq!(resolve_db_path(), "queuectl.db");
    }

    #[test]
    fn rejects_unknown_config_keys() {
        assert!(is_known_key("max_retries"));
        assert!(!is_known_key("bogus"));
    }
}
