use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Runtime knobs for the ledger engine. Monetary values are minor units.
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// Path of the single persisted JSON document.
    pub file: PathBuf,
    /// Directory for periodic snapshot backups.
    pub backup_dir: PathBuf,
    /// Smallest payout an affiliate may request.
    pub minimum_payout: i64,
    /// Days-left thresholds at which expiry reminders fire.
    pub reminder_days: Vec<i64>,
    /// Days past expiry before access is hard-removed.
    pub grace_period_days: i64,
    /// Autosave after this many unsaved mutations.
    pub autosave_max_changes: u32,
    /// Autosave when unsaved mutations are older than this.
    pub autosave_max_age: Duration,
    /// Snapshots older than this many days are pruned.
    pub backup_retention_days: i64,
    /// UTC hour of the fixed daily lifecycle scan.
    pub daily_scan_hour: u32,
    /// Interval of the repeating lifecycle scan.
    pub scan_interval: Duration,
    /// Upper bound on a single notifier/revoker call.
    pub collaborator_timeout: Duration,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            file: PathBuf::from("data/ledger.json"),
            backup_dir: PathBuf::from("data/backups"),
            minimum_payout: 1_000_000,
            reminder_days: vec![7, 3, 1, 0],
            grace_period_days: 3,
            autosave_max_changes: 5,
            autosave_max_age: Duration::from_secs(30),
            backup_retention_days: 7,
            daily_scan_hour: 9,
            scan_interval: Duration::from_secs(6 * 3600),
            collaborator_timeout: Duration::from_secs(10),
        }
    }
}

impl LedgerConfig {
    /// Reads the configuration from the environment, falling back to defaults
    /// for anything unset or unparseable. The daemon loads `.env` first.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            file: env::var("LEDGER_FILE")
                .map(PathBuf::from)
                .unwrap_or(base.file),
            backup_dir: env::var("BACKUP_DIR")
                .map(PathBuf::from)
                .unwrap_or(base.backup_dir),
            minimum_payout: env_parse("MINIMUM_PAYOUT", base.minimum_payout),
            reminder_days: env::var("REMINDER_DAYS")
                .ok()
                .map(|raw| {
                    raw.split(',')
                        .filter_map(|part| part.trim().parse().ok())
                        .collect::<Vec<i64>>()
                })
                .filter(|days| !days.is_empty())
                .unwrap_or(base.reminder_days),
            grace_period_days: env_parse("GRACE_PERIOD_DAYS", base.grace_period_days),
            autosave_max_changes: env_parse("AUTOSAVE_MAX_CHANGES", base.autosave_max_changes),
            autosave_max_age: Duration::from_secs(env_parse("AUTOSAVE_MAX_SECS", 30)),
            backup_retention_days: env_parse("BACKUP_RETENTION_DAYS", base.backup_retention_days),
            daily_scan_hour: env_parse("DAILY_SCAN_HOUR", base.daily_scan_hour).min(23),
            scan_interval: Duration::from_secs(
                env_parse("SCAN_INTERVAL_HOURS", 6u64).max(1) * 3600,
            ),
            collaborator_timeout: Duration::from_secs(env_parse("COLLABORATOR_TIMEOUT_SECS", 10)),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|raw| raw.trim().parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = LedgerConfig::default();
        assert_eq!(config.reminder_days, vec![7, 3, 1, 0]);
        assert_eq!(config.grace_period_days, 3);
        assert_eq!(config.autosave_max_changes, 5);
        assert_eq!(config.autosave_max_age, Duration::from_secs(30));
    }

    #[test]
    fn env_overrides_apply() {
        // Env vars are process-global, so keep the keys unique to this test.
        unsafe {
            env::set_var("REMINDER_DAYS", "14, 7,1");
            env::set_var("GRACE_PERIOD_DAYS", "5");
            env::set_var("DAILY_SCAN_HOUR", "99");
        }
        let config = LedgerConfig::from_env();
        assert_eq!(config.reminder_days, vec![14, 7, 1]);
        assert_eq!(config.grace_period_days, 5);
        assert_eq!(config.daily_scan_hour, 23);
        unsafe {
            env::remove_var("REMINDER_DAYS");
            env::remove_var("GRACE_PERIOD_DAYS");
            env::remove_var("DAILY_SCAN_HOUR");
        }
    }
}
