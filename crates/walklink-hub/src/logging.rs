//! Log output: stdout always, plus one file per UTC day when a log
//! directory is configured.

use crate::config::Config;
use chrono::{NaiveDate, Utc};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const LOG_FILE_PREFIX: &str = "walklink-hub-";
const LOG_FILE_SUFFIX: &str = ".log";

/// Filter used when `RUST_LOG` is unset.
pub fn default_directive(config: &Config) -> String {
    if config.debug {
        return "debug".to_string();
    }
    config
        .log_level
        .clone()
        .unwrap_or_else(|| "info".to_string())
}

/// Installs the global subscriber. The returned guard flushes the log
/// file when dropped.
pub fn init(config: &Config) -> Option<LogGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(config)));
    let daily = match &config.log_dir {
        Some(dir) => match DailyFile::open(dir, config.log_keep) {
            Ok(file) => Some(Arc::new(Mutex::new(file))),
            Err(err) => {
                eprintln!("log_dir_unavailable: {dir}: {err}");
                None
            }
        },
        None => None,
    };
    let sink = daily.clone();
    let make_writer = BoxMakeWriter::new(move || TeeWriter {
        daily: sink.clone(),
    });
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(LogGuard { daily })
}

pub struct LogGuard {
    daily: Option<Arc<Mutex<DailyFile>>>,
}

impl Drop for LogGuard {
    fn drop(&mut self) {
        if let Some(daily) = &self.daily {
            if let Ok(mut daily) = daily.lock() {
                let _ = daily.flush();
            }
        }
    }
}

/// Stdout plus the daily file, if any. File errors never block stdout.
struct TeeWriter {
    daily: Option<Arc<Mutex<DailyFile>>>,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = io::stdout().write_all(buf);
        if let Some(daily) = &self.daily {
            if let Ok(mut daily) = daily.lock() {
                let _ = daily.write_on(Utc::now().date_naive(), buf);
            }
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = io::stdout().flush();
        if let Some(daily) = &self.daily {
            if let Ok(mut daily) = daily.lock() {
                let _ = daily.flush();
            }
        }
        Ok(())
    }
}

/// Appends to `walklink-hub-YYYY-MM-DD.log`, switching files when the
/// date changes and keeping at most `keep` of them.
pub struct DailyFile {
    dir: PathBuf,
    keep: usize,
    current: Option<(NaiveDate, File)>,
}

impl DailyFile {
    pub fn open(dir: impl Into<PathBuf>, keep: usize) -> io::Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            keep: keep.max(1),
            current: None,
        })
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "{LOG_FILE_PREFIX}{}{LOG_FILE_SUFFIX}",
            date.format("%Y-%m-%d")
        ))
    }

    pub fn write_on(&mut self, date: NaiveDate, buf: &[u8]) -> io::Result<()> {
        let stale = match &self.current {
            Some((open_date, _)) => *open_date != date,
            None => true,
        };
        if stale {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.path_for(date))?;
            self.current = Some((date, file));
            self.prune()?;
        }
        match &mut self.current {
            Some((_, file)) => file.write_all(buf),
            None => Ok(()),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match &mut self.current {
            Some((_, file)) => file.flush(),
            None => Ok(()),
        }
    }

    /// Removes the oldest daily files beyond `keep`. Other files in the
    /// directory are left alone.
    fn prune(&self) -> io::Result<()> {
        let mut names: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(Result::ok)
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| is_daily_log(name))
            .collect();
        if names.len() <= self.keep {
            return Ok(());
        }
        names.sort();
        let excess = names.len() - self.keep;
        for name in names.into_iter().take(excess) {
            fs::remove_file(self.dir.join(name))?;
        }
        Ok(())
    }
}

fn is_daily_log(name: &str) -> bool {
    name.strip_prefix(LOG_FILE_PREFIX)
        .and_then(|rest| rest.strip_suffix(LOG_FILE_SUFFIX))
        .is_some_and(|date| NaiveDate::parse_from_str(date, "%Y-%m-%d").is_ok())
}
