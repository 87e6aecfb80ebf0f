use std::time::Duration;

pub const DEFAULT_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_STATUS_TTL_SECS: u64 = 60;
pub const DEFAULT_THROTTLE_SECS: u64 = 10;
pub const DEFAULT_LOG_KEEP: usize = 7;

#[derive(Clone, Debug)]
pub struct Config {
    pub addr: String,
    pub debug: bool,
    pub db_path: Option<String>,
    pub seed_path: Option<String>,
    pub tokens_path: Option<String>,
    pub notify_url: Option<String>,
    pub status_ttl: Duration,
    pub throttle_window: Duration,
    pub ping_interval: Duration,
    pub stale_after: Duration,
    pub write_timeout: Duration,
    /// Directory for daily log files; stdout only when unset.
    pub log_dir: Option<String>,
    /// Fallback filter directive when `RUST_LOG` is unset.
    pub log_level: Option<String>,
    /// Daily log files kept in `log_dir`.
    pub log_keep: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: DEFAULT_ADDR.to_string(),
            debug: false,
            db_path: None,
            seed_path: None,
            tokens_path: None,
            notify_url: None,
            status_ttl: Duration::from_secs(DEFAULT_STATUS_TTL_SECS),
            throttle_window: Duration::from_secs(DEFAULT_THROTTLE_SECS),
            ping_interval: Duration::from_secs(25),
            stale_after: Duration::from_secs(90),
            write_timeout: Duration::from_secs(2),
            log_dir: None,
            log_level: None,
            log_keep: DEFAULT_LOG_KEEP,
        }
    }
}
